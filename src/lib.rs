//! Kusudama IK - 多效应器骨骼 IK 求解器
//!
//! 提供：
//! - 球面限制锥（LimitCone）与切圆路径几何
//! - Kusudama 摆动/扭转约束
//! - 按固定点（Pin）切分骨骼链（BoneSegment）
//! - 加权朝向对齐迭代求解（阻尼 + 约束投影）

pub mod config;
pub mod constraint;
pub mod humanoid;
pub mod math;
pub mod skeleton;

pub use config::{ConfigWarning, ConstraintConfig, IkConfig, LimitConeConfig, PinConfig};
pub use constraint::{BoundsClass, Kusudama, LimitCone};
pub use skeleton::{BoneDesc, BoneTransform, IkBone, IkEffector, IkSolver, PinTargetSource, SkeletonDesc};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IkError {
    #[error("Invalid skeleton topology: {0}")]
    InvalidTopology(String),

    #[error("Non-finite transform: {0}")]
    NonFiniteTransform(String),

    #[error("Pose length mismatch: expected {expected}, got {actual}")]
    PoseMismatch { expected: usize, actual: usize },

    #[error("No skeleton registered")]
    NoSkeleton,

    #[error("Index out of range: {0}")]
    IndexOutOfRange(String),
}

pub type Result<T> = std::result::Result<T, IkError>;
