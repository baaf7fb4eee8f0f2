//! # Marionette IK
//!
//! A real-time inverse-kinematics solver for articulated skeletal
//! hierarchies. The skeleton is partitioned into pin-terminated segments;
//! each solver iteration runs a weighted QCP superposition per bone between
//! the heading clouds derived from tip and target transforms, clamped by
//! per-bone dampening and optional joint constraints.
//!
//! The solver talks to its runtime through the [`SkeletonHost`] trait and
//! writes results back through the host's transient pose-override channel,
//! blended by a strength scalar.
//!
//! ```
//! use glam::Vec3;
//! use marionette_ik::testing::FixtureSkeleton;
//! use marionette_ik::{IkModifier, Pose};
//!
//! let mut host = FixtureSkeleton::new();
//! let ids = host.add_chain(&["root", "upper", "lower"], Vec3::X);
//!
//! let mut modifier = IkModifier::new();
//! modifier.set_root_bone("root");
//! let target = modifier
//!     .add_target("lower", Some("goal"), false, Pose::IDENTITY)
//!     .unwrap();
//! modifier.set_target_priority(target, Vec3::ZERO).unwrap();
//! host.set_node("goal", Pose::from_origin(Vec3::new(1.0, 1.0, 0.0)));
//!
//! modifier.execute(&mut host, 1.0 / 60.0);
//! let reached = host.world_pose(ids[2]).unwrap().origin;
//! assert!((reached - Vec3::new(1.0, 1.0, 0.0)).length() < 1e-2);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod bone;
pub mod constraint;
pub mod effector;
pub mod host;
pub mod modifier;
pub mod qcp;
pub mod segment;
pub mod skeleton;
pub mod testing;
pub mod transform;

pub use bone::{IkBone, DEFAULT_DAMPENING};
pub use constraint::{BoneConstraint, ConstraintHook};
pub use effector::IkEffector;
pub use host::SkeletonHost;
pub use marionette_core::BoneId;
pub use modifier::{IkModifier, IkTargetConfig};
pub use qcp::QcpSolver;
pub use segment::BoneSegment;
pub use skeleton::ShadowSkeleton;
pub use transform::{IkTransform, Pose};
