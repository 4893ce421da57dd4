//! 固定点（Pin）效应器
//!
//! 为求解骨骼生成朝向对（末端朝向 / 目标朝向）：
//! - 1 条位置朝向：骨骼原点 → 末端原点
//! - 每个优先级 > 0 的轴 2 条：末端原点 ± 轴 × 尺度
//!
//! 末端与目标的朝向顺序必须一致，权重只随目标一侧写入。

use glam::{Mat4, Vec3};

use crate::config::PinConfig;
use crate::math::{matrix_origin, matrix_rotation};

/// 固定点效应器
#[derive(Clone, Debug)]
pub struct IkEffector {
    /// 对应的 Pin 配置索引
    pub pin_index: usize,
    pub weight: f32,
    pub direction_priorities: Vec3,
    pub passthrough_factor: f32,
    /// 当前目标（全局空间）
    pub target: Mat4,
}

impl IkEffector {
    pub fn from_config(pin_index: usize, config: &PinConfig, target: Mat4) -> Self {
        Self {
            pin_index,
            weight: config.weight.clamp(0.0, 1.0),
            direction_priorities: config.direction_priorities.max(Vec3::ZERO),
            passthrough_factor: config.passthrough_factor.clamp(0.0, 1.0),
            target,
        }
    }

    /// 每次求解生成的朝向数量
    pub fn heading_count(&self) -> usize {
        let axes = self.direction_priorities.to_array().iter().filter(|p| **p > 0.0).count();
        1 + axes * 2
    }

    #[inline]
    pub fn target_origin(&self) -> Vec3 {
        matrix_origin(&self.target)
    }

    /// 轴朝向的长度，保证至少为 1
    #[inline]
    fn axis_scale(&self, bone_origin: Vec3) -> f32 {
        (self.target_origin() - bone_origin).length().max(1.0)
    }

    /// 追加末端朝向
    pub fn update_tip_headings(&self, tip_global: &Mat4, bone_origin: Vec3, tips: &mut Vec<Vec3>) {
        let scale = self.axis_scale(bone_origin);
        push_headings(tip_global, bone_origin, scale, self.direction_priorities, tips);
    }

    /// 追加目标朝向与权重
    pub fn update_target_headings(
        &self,
        bone_origin: Vec3,
        weight_scale: f32,
        targets: &mut Vec<Vec3>,
        weights: &mut Vec<f32>,
    ) {
        let scale = self.axis_scale(bone_origin);
        push_headings(&self.target, bone_origin, scale, self.direction_priorities, targets);

        let weight = self.weight * weight_scale;
        weights.push(weight);
        for priority in self.direction_priorities.to_array() {
            if priority > 0.0 {
                weights.push(weight * priority);
                weights.push(weight * priority);
            }
        }
    }
}

fn push_headings(transform: &Mat4, bone_origin: Vec3, scale: f32, priorities: Vec3, out: &mut Vec<Vec3>) {
    let origin = matrix_origin(transform);
    out.push(origin - bone_origin);

    let rotation = matrix_rotation(transform);
    let axes = [rotation * Vec3::X, rotation * Vec3::Y, rotation * Vec3::Z];
    for (axis, priority) in axes.iter().zip(priorities.to_array()) {
        if priority > 0.0 {
            out.push(origin + *axis * scale - bone_origin);
            out.push(origin - *axis * scale - bone_origin);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Quat;

    #[test]
    fn test_heading_layout() {
        let config = PinConfig::new("tip").with_direction_priorities(Vec3::new(0.5, 0.0, 0.25));
        let target = Mat4::from_rotation_translation(Quat::IDENTITY, Vec3::new(0.0, 3.0, 0.0));
        let effector = IkEffector::from_config(0, &config, target);
        assert_eq!(effector.heading_count(), 5);

        let mut tips = Vec::new();
        let mut targets = Vec::new();
        let mut weights = Vec::new();
        effector.update_tip_headings(&Mat4::IDENTITY, Vec3::ZERO, &mut tips);
        effector.update_target_headings(Vec3::ZERO, 0.5, &mut targets, &mut weights);
        assert_eq!(tips.len(), 5);
        assert_eq!(targets.len(), 5);
        assert_eq!(weights.len(), 5);

        assert!((targets[0] - Vec3::new(0.0, 3.0, 0.0)).length() < 1e-6);
        // 尺度 = 到目标的距离
        assert!((targets[1] - Vec3::new(3.0, 3.0, 0.0)).length() < 1e-5);
        assert!((weights[0] - 0.5).abs() < 1e-6);
        assert!((weights[1] - 0.25).abs() < 1e-6);
        assert!((weights[3] - 0.125).abs() < 1e-6);
    }

    #[test]
    fn test_position_only_pin() {
        let config = PinConfig::new("tip").with_direction_priorities(Vec3::ZERO);
        let effector = IkEffector::from_config(0, &config, Mat4::IDENTITY);
        assert_eq!(effector.heading_count(), 1);
    }
}
