//! IK 配置
//!
//! 所有参数扁平化，默认值直接写在 Default 中。
//! 配置项由 IkSolver 持有，修改后在下一次求解前重建骨骼段。

use glam::Vec3;
use thiserror::Error;

use crate::constraint::{ConstraintFlags, Kusudama, LimitCone};
use crate::math::to_tau;

/// 求解器全局配置（扁平化，不嵌套）
#[derive(Debug, Clone)]
pub struct IkConfig {
    // ========== 迭代 ==========
    /// 每帧迭代次数，默认 10
    /// 链越长、约束越紧，需要越多迭代
    pub iterations_per_frame: usize,
    /// 默认阻尼（单次迭代最大旋转，弧度），默认 5°
    pub default_damp: f32,
    /// 提前结束阈值（所有 Pin 位置误差都小于此值时停止），默认 0（关闭）
    pub convergence_epsilon: f32,

    // ========== 约束 ==========
    /// 是否启用缓冲区软约束，默认 false
    pub soft_constraints: bool,

    // ========== 并行 ==========
    /// 多个独立骨骼岛是否并行求解，默认 true
    pub parallel_islands: bool,

    // ========== 调试 ==========
    /// 是否输出调试日志，默认 false
    pub debug_log: bool,
}

impl Default for IkConfig {
    fn default() -> Self {
        Self {
            // ====== 迭代 ======
            // 10 次对一般人形足够；精确贴合长链可加到 50 以上
            iterations_per_frame: 10,
            // 阻尼越小越平滑，但收敛越慢
            default_damp: 5.0_f32.to_radians(),
            convergence_epsilon: 0.0,

            // ====== 约束 ======
            soft_constraints: false,

            // ====== 并行 ======
            parallel_islands: true,

            // ====== 调试 ======
            debug_log: false,
        }
    }
}

/// 固定点（Pin）配置
#[derive(Debug, Clone)]
pub struct PinConfig {
    /// 被固定的骨骼名
    pub bone_name: String,
    /// 权重 [0, 1]，默认 1.0
    pub weight: f32,
    /// 各轴朝向优先级（X, Y, Z），0 表示只跟随位置，默认 (0.2, 0, 0.2)
    pub direction_priorities: Vec3,
    /// 向祖先段传递的比例 [0, 1]，默认 0
    pub passthrough_factor: f32,
}

impl PinConfig {
    pub fn new(bone_name: impl Into<String>) -> Self {
        Self {
            bone_name: bone_name.into(),
            weight: 1.0,
            direction_priorities: Vec3::new(0.2, 0.0, 0.2),
            passthrough_factor: 0.0,
        }
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight.clamp(0.0, 1.0);
        self
    }

    pub fn with_direction_priorities(mut self, priorities: Vec3) -> Self {
        self.direction_priorities = priorities.max(Vec3::ZERO);
        self
    }

    pub fn with_passthrough(mut self, factor: f32) -> Self {
        self.passthrough_factor = factor.clamp(0.0, 1.0);
        self
    }
}

/// 单个限制锥配置
#[derive(Debug, Clone, Copy)]
pub struct LimitConeConfig {
    /// 锥轴（约束空间，+Y 为骨骼静止方向）
    pub center: Vec3,
    /// 半角（弧度）
    pub radius: f32,
    /// 缓冲比例，1.0 为硬边界
    pub cushion: f32,
}

impl LimitConeConfig {
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self {
            center,
            radius,
            cushion: 1.0,
        }
    }
}

/// Kusudama 约束配置
#[derive(Debug, Clone)]
pub struct ConstraintConfig {
    pub bone_name: String,
    /// 扭转起点（弧度），默认 π
    pub twist_from: f32,
    /// 扭转区间宽度（弧度），默认接近整圈
    pub twist_range: f32,
    pub limit_cones: Vec<LimitConeConfig>,
    /// 是否启用摆动约束，默认 true
    pub orientationally_constrained: bool,
    /// 是否启用扭转约束，默认 true
    pub axially_constrained: bool,
}

impl ConstraintConfig {
    pub fn new(bone_name: impl Into<String>) -> Self {
        Self {
            bone_name: bone_name.into(),
            twist_from: std::f32::consts::PI,
            twist_range: crate::constraint::DEFAULT_TWIST_RANGE,
            limit_cones: Vec::new(),
            orientationally_constrained: true,
            axially_constrained: true,
        }
    }

    pub fn with_twist(mut self, from: f32, range: f32) -> Self {
        self.twist_from = to_tau(from);
        self.twist_range = range.clamp(0.0, std::f32::consts::TAU);
        self
    }

    pub fn with_cone(mut self, center: Vec3, radius: f32) -> Self {
        self.limit_cones.push(LimitConeConfig::new(center, radius));
        self
    }

    /// 构建 Kusudama，半径非正的锥被跳过并记录警告
    pub fn build(&self, warnings: &mut Vec<ConfigWarning>) -> Kusudama {
        let mut kusudama = Kusudama::new();
        kusudama.set_twist(self.twist_from, self.twist_range);
        kusudama.flags.set(ConstraintFlags::ORIENTATIONAL, self.orientationally_constrained);
        kusudama.flags.set(ConstraintFlags::AXIAL, self.axially_constrained);
        for (index, cone) in self.limit_cones.iter().enumerate() {
            if !(cone.radius > 0.0) {
                warnings.push(ConfigWarning::NonPositiveConeRadius {
                    bone: self.bone_name.clone(),
                    index,
                    radius: cone.radius,
                });
                continue;
            }
            kusudama.push_cone(LimitCone::with_cushion(cone.center, cone.radius, cone.cushion));
        }
        kusudama
    }
}

/// 可恢复的配置问题（记录后忽略或取默认值）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigWarning {
    #[error("Pin references unknown bone '{0}'")]
    UnknownPinBone(String),

    #[error("Constraint references unknown bone '{0}'")]
    UnknownConstraintBone(String),

    #[error("Duplicate constraint for bone '{0}', later entry ignored")]
    DuplicateConstraint(String),

    #[error("Cone {index} on bone '{bone}' has non-positive radius {radius}")]
    NonPositiveConeRadius { bone: String, index: usize, radius: f32 },

    #[error("Invalid damp {damp} for bone '{bone}', using default")]
    InvalidDamp { bone: String, damp: f32 },

    #[error("Pins configured but skeleton has no bones")]
    PinsWithoutBones,
}
