//! 关节约束 - 限制锥与 Kusudama

mod kusudama;
mod limit_cone;

pub use kusudama::{ConstraintFlags, ConstraintFrame, Kusudama, DEFAULT_CONE_RADIUS, DEFAULT_TWIST_RANGE};
pub use limit_cone::{BoundsClass, ConeBoundary, LimitCone, TangentCircle, TangentHandles};
