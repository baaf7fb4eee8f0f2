//! Drives a two-bone reach on the fixture host and prints the residual as
//! the iteration budget grows.
//!
//! Run with `cargo run -p marionette-ik --example two_bone_reach`.

use anyhow::Result;
use glam::Vec3;
use marionette_ik::testing::FixtureSkeleton;
use marionette_ik::{IkModifier, Pose, SkeletonHost};

fn main() -> Result<()> {
    marionette_core::init(marionette_core::LogLevel::Info)?;

    let goal = Vec3::new(1.0, 1.0, 0.0);

    for iterations in [1, 2, 5, 10, 20] {
        let mut host = FixtureSkeleton::new();
        host.add_chain(&["root", "upper", "lower"], Vec3::X);
        host.set_node("goal", Pose::from_origin(goal));

        let mut modifier = IkModifier::new();
        modifier.set_root_bone("root");
        modifier.set_ik_iterations(iterations)?;
        modifier.add_target("lower", Some("goal"), false, Pose::IDENTITY)?;

        modifier.execute(&mut host, 1.0 / 60.0);

        let hand = host
            .world_pose(host.find_bone("lower").expect("bone exists"))
            .expect("pose exists");
        println!(
            "{iterations:>3} iterations -> hand at ({:+.4}, {:+.4}, {:+.4}), residual {:.6}",
            hand.origin.x,
            hand.origin.y,
            hand.origin.z,
            (hand.origin - goal).length()
        );
    }

    Ok(())
}
