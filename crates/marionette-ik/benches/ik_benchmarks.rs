//! Solver benchmarks for Marionette IK

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use glam::{DQuat, DVec3, Vec3};
use marionette_ik::testing::FixtureSkeleton;
use marionette_ik::{IkModifier, Pose, QcpSolver};

fn qcp_superpose_benchmark(c: &mut Criterion) {
    let q = DQuat::from_axis_angle(DVec3::new(0.3, 1.0, -0.2).normalize(), 0.6);
    let moved: Vec<DVec3> = vec![
        DVec3::new(1.0, 0.0, 0.0),
        DVec3::new(-1.0, 0.0, 0.0),
        DVec3::new(0.0, 0.0, 1.0),
        DVec3::new(0.0, 0.0, -1.0),
        DVec3::new(0.4, 1.3, 0.0),
        DVec3::new(0.0, 2.0, 0.5),
        DVec3::new(1.0, 1.0, 1.0),
    ];
    let target: Vec<DVec3> = moved.iter().map(|&p| q * p + DVec3::splat(0.1)).collect();
    let weights = vec![1.0; moved.len()];

    let mut solver = QcpSolver::default();
    c.bench_function("qcp_superpose_7", |b| {
        b.iter(|| {
            let result = solver.weighted_superpose(
                black_box(&moved),
                black_box(&target),
                black_box(&weights),
                true,
            );
            black_box(result);
        });
    });
}

fn full_solve_benchmark(c: &mut Criterion) {
    let mut host = FixtureSkeleton::new();
    host.add_chain(
        &["root", "spine", "chest", "shoulder", "upper", "lower", "hand"],
        Vec3::X,
    );
    host.set_node("goal", Pose::from_origin(Vec3::new(3.0, 3.0, 1.0)));

    let mut modifier = IkModifier::new();
    modifier.set_root_bone("root");
    modifier.set_ik_iterations(10).unwrap();
    modifier
        .add_target("hand", Some("goal"), false, Pose::IDENTITY)
        .unwrap();

    let mut frame = 0u32;
    c.bench_function("six_bone_chain_solve", |b| {
        b.iter(|| {
            // Nudge the goal so every tick actually solves.
            frame = frame.wrapping_add(1);
            let wobble = (frame % 100) as f32 * 0.001;
            host.set_node("goal", Pose::from_origin(Vec3::new(3.0, 3.0 + wobble, 1.0)));
            modifier.execute(black_box(&mut host), 1.0 / 60.0);
        });
    });
}

criterion_group!(benches, qcp_superpose_benchmark, full_solve_benchmark);
criterion_main!(benches);
