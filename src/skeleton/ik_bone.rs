//! IK 骨骼节点
//!
//! 每个 IkBone 代表骨骼岛中的一个节点，父子关系用岛内索引表示。
//!
//! 坐标系：
//! - 姿态坐标系：与外部骨骼一致（`pose`，相对父骨骼）
//! - 骨骼方向坐标系：+Y 沿静止姿态下的骨骼方向
//! - 约束坐标系：静止旋转 × 骨骼方向旋转，Kusudama 在其中求值

use bitflags::bitflags;
use glam::{Mat4, Quat, Vec3};

use super::effector::IkEffector;
use super::BoneTransform;
use crate::constraint::{ConstraintFrame, Kusudama};
use crate::math::{clamp_rotation_angle, matrix_origin, matrix_rotation, EPSILON};

// ============================================================================
// 骨骼标志
// ============================================================================

bitflags! {
    /// 骨骼标志位
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct BoneFlags: u32 {
        /// 属于某个骨骼段，参与求解
        const IK_ENABLED = 1 << 0;
        /// 挂有 Pin
        const PINNED = 1 << 1;
        /// 挂有 Kusudama
        const CONSTRAINED = 1 << 2;
    }
}

// ============================================================================
// 骨骼节点
// ============================================================================

/// IK 骨骼节点
///
/// - 静态数据：名称、父子关系、静止姿态、坐标系、约束（重建时确定）
/// - 动态数据：`pose` 与 `global`（每次迭代更新）
/// - 变换计算：global = parent.global * pose
#[derive(Clone, Debug)]
pub struct IkBone {
    // ========================================
    // 静态数据（重建后不变）
    // ========================================

    pub name: String,

    /// 外部骨骼中的索引
    pub skeleton_id: usize,

    /// 父骨骼（岛内索引）
    pub parent: Option<usize>,

    /// 子骨骼（岛内索引）
    pub children: Vec<usize>,

    /// 静止姿态（相对父骨骼）
    pub rest: BoneTransform,

    /// 约束求值坐标系
    pub frame: ConstraintFrame,

    pub constraint: Option<Kusudama>,

    /// 单次迭代最大旋转（弧度）
    pub dampening: f32,

    pub pin: Option<IkEffector>,

    pub flags: BoneFlags,

    // ========================================
    // 动态数据（每次迭代更新）
    // ========================================

    /// 当前本地姿态（相对父骨骼）
    pub pose: BoneTransform,

    /// 当前全局变换
    pub global: Mat4,
}

impl IkBone {
    pub fn new(name: String, skeleton_id: usize, parent: Option<usize>, rest: BoneTransform, dampening: f32) -> Self {
        Self {
            name,
            skeleton_id,
            parent,
            children: Vec::new(),
            rest,
            frame: ConstraintFrame::default(),
            constraint: None,
            dampening,
            pin: None,
            flags: BoneFlags::empty(),
            pose: rest,
            global: Mat4::IDENTITY,
        }
    }

    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.flags.contains(BoneFlags::PINNED)
    }

    #[inline]
    pub fn is_constrained(&self) -> bool {
        self.flags.contains(BoneFlags::CONSTRAINED)
    }

    #[inline]
    pub fn is_ik_enabled(&self) -> bool {
        self.flags.contains(BoneFlags::IK_ENABLED)
    }

    pub fn set_pin(&mut self, pin: Option<IkEffector>) {
        self.flags.set(BoneFlags::PINNED, pin.is_some());
        self.pin = pin;
    }

    pub fn set_constraint(&mut self, constraint: Option<Kusudama>) {
        self.flags.set(BoneFlags::CONSTRAINED, constraint.is_some());
        self.constraint = constraint;
    }

    /// 全局原点
    #[inline]
    pub fn origin(&self) -> Vec3 {
        matrix_origin(&self.global)
    }

    /// 全局旋转
    #[inline]
    pub fn global_rotation(&self) -> Quat {
        matrix_rotation(&self.global)
    }

    /// 本地变换矩阵
    #[inline]
    pub fn local_matrix(&self) -> Mat4 {
        self.pose.to_matrix()
    }

    /// 由子骨骼静止偏移计算骨骼方向坐标系
    ///
    /// 方向取子骨骼静止原点的平均值；叶骨骼使用自身静止偏移
    /// （换算到骨骼本地空间）；都退化时为 +Y。
    pub fn update_default_bone_direction_transform(&mut self, child_rest_origins: &[Vec3]) {
        let centroid = if child_rest_origins.is_empty() {
            self.rest.rotation.inverse() * self.rest.translation
        } else {
            child_rest_origins.iter().copied().sum::<Vec3>() / child_rest_origins.len() as f32
        };
        let direction = if centroid.length_squared() > EPSILON {
            centroid.normalize()
        } else {
            Vec3::Y
        };
        self.frame.bone_direction = Quat::from_rotation_arc(Vec3::Y, direction);
    }

    /// 约束坐标系 = 静止旋转 × 骨骼方向旋转
    pub fn update_default_constraint_transform(&mut self) {
        self.frame.constraint = (self.rest.rotation * self.frame.bone_direction).normalize();
    }

    /// 朝期望本地旋转迈一步
    ///
    /// 期望旋转先投影到约束范围内，再把相对当前姿态的变化限制在 `dampening` 以内。
    /// 当前姿态在约束外时，每步最多向允许范围移动 `dampening`。
    pub fn step_local_rotation(&mut self, desired: Quat, soft: bool) {
        let desired = desired.normalize();
        let constrained = match &self.constraint {
            Some(kusudama) => kusudama.constrain_orientation(desired, &self.frame, soft),
            None => desired,
        };
        let current = self.pose.rotation;
        let change = clamp_rotation_angle(current.inverse() * constrained, self.dampening);
        self.pose.rotation = (current * change).normalize();
    }

    /// 当前扭转在允许区间内的比例（无约束时 None）
    pub fn twist_fraction(&self) -> Option<f32> {
        self.constraint
            .as_ref()
            .map(|k| k.get_current_twist_rotation(self.pose.rotation, &self.frame))
    }

    /// 按比例设置扭转（无约束时返回 false）
    pub fn set_twist_fraction(&mut self, fraction: f32) -> bool {
        let Some(kusudama) = &self.constraint else {
            return false;
        };
        self.pose.rotation = kusudama.set_current_twist_rotation(self.pose.rotation, &self.frame, fraction);
        true
    }
}

// ============================================================================
// 变换更新
// ============================================================================

/// 递归更新骨骼及其子孙的全局变换
pub fn update_global_transform_recursive(bones: &mut [IkBone], idx: usize) {
    let parent_global = match bones[idx].parent {
        Some(p) => bones[p].global,
        None => Mat4::IDENTITY,
    };
    bones[idx].global = parent_global * bones[idx].local_matrix();

    for i in 0..bones[idx].children.len() {
        let child = bones[idx].children[i];
        update_global_transform_recursive(bones, child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> Vec<IkBone> {
        let mut root = IkBone::new("root".into(), 0, None, BoneTransform::default(), 0.1);
        root.children.push(1);
        let child = IkBone::new(
            "child".into(),
            1,
            Some(0),
            BoneTransform::from_translation(Vec3::new(0.0, 2.0, 0.0)),
            0.1,
        );
        vec![root, child]
    }

    #[test]
    fn test_global_propagation() {
        let mut bones = chain();
        bones[0].pose.rotation = Quat::from_axis_angle(Vec3::Z, std::f32::consts::FRAC_PI_2);
        update_global_transform_recursive(&mut bones, 0);
        assert!((bones[1].origin() - Vec3::new(-2.0, 0.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_bone_direction_from_children() {
        let mut bone = IkBone::new("b".into(), 0, None, BoneTransform::default(), 0.1);
        bone.update_default_bone_direction_transform(&[Vec3::new(1.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.2)]);
        let direction = bone.frame.bone_direction * Vec3::Y;
        assert!(direction.x > 0.99);

        bone.update_default_bone_direction_transform(&[Vec3::new(0.0, -3.0, 0.0)]);
        let direction = bone.frame.bone_direction * Vec3::Y;
        assert!((direction + Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn test_flags_follow_attachments() {
        let mut bone = IkBone::new("b".into(), 0, None, BoneTransform::default(), 0.1);
        bone.set_constraint(Some(Kusudama::new()));
        assert!(bone.is_constrained());
        assert!(!bone.is_pinned());
        bone.set_constraint(None);
        assert!(!bone.is_constrained());
    }

    #[test]
    fn test_step_is_damped_after_constraint() {
        let mut bone = IkBone::new("b".into(), 0, None, BoneTransform::default(), 0.05);
        let mut kusudama = Kusudama::new();
        kusudama.add_limit_cone(Vec3::Y, 30.0_f32.to_radians());
        bone.set_constraint(Some(kusudama));
        // 起始姿态在锥外 60°
        let start = Quat::from_axis_angle(Vec3::Z, -std::f32::consts::FRAC_PI_2);
        bone.pose.rotation = start;

        bone.step_local_rotation(start, false);
        let change = crate::math::rotation_angle(start.inverse() * bone.pose.rotation);
        assert!(change <= 0.05 + 1e-4, "change {}", change);
        assert!(change > 0.04);

        for _ in 0..40 {
            bone.step_local_rotation(start, false);
        }
        let swing = crate::math::angle_between(bone.pose.rotation * Vec3::Y, Vec3::Y);
        assert!((swing - 30.0_f32.to_radians()).abs() < 1e-3);
    }
}
