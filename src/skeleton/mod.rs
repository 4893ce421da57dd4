//! 骨骼系统 - 骨骼岛、骨骼段与求解器
//!
//! 核心设计思想：
//! - IkBone: 骨骼节点，扁平数组 + 索引表示父子关系
//! - IkEffector: 固定点目标
//! - BoneSegment: 根/分叉点到被固定末端的骨骼链
//! - SkeletonIsland: 一个根骨骼下的所有骨骼，可独立求解
//! - IkSolver: 对外接口（配置、重建、求解、写回）

mod bone_segment;
mod effector;
mod ik_bone;
mod ik_solver;
mod island;

pub use bone_segment::BoneSegment;
pub use effector::IkEffector;
pub use ik_bone::{BoneFlags, IkBone};
pub use ik_solver::IkSolver;
pub use island::SkeletonIsland;

use glam::{Mat4, Quat, Vec3};
use std::collections::{HashMap, HashSet};

use crate::{IkError, Result};

// ============================================================================
// 公共类型定义
// ============================================================================

/// 骨骼变换数据
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoneTransform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for BoneTransform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl BoneTransform {
    /// 只有平移的变换
    #[inline]
    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Default::default()
        }
    }

    /// 转换为 4x4 矩阵
    #[inline]
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }

    /// 从矩阵分解
    #[inline]
    pub fn from_matrix(m: Mat4) -> Self {
        let (scale, rotation, translation) = m.to_scale_rotation_translation();
        Self { translation, rotation, scale }
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.translation.is_finite() && self.rotation.is_finite() && self.scale.is_finite()
    }
}

// ============================================================================
// 骨骼拓扑
// ============================================================================

/// 单根骨骼的拓扑描述
#[derive(Clone, Debug)]
pub struct BoneDesc {
    pub name: String,
    /// 父骨骼索引（None 表示根骨骼）
    pub parent: Option<usize>,
    /// 静止姿态（相对父骨骼）
    pub rest: BoneTransform,
}

/// 骨骼拓扑（有序骨骼列表）
#[derive(Clone, Debug, Default)]
pub struct SkeletonDesc {
    pub bones: Vec<BoneDesc>,
}

impl SkeletonDesc {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加骨骼，返回其索引
    pub fn add_bone(&mut self, name: impl Into<String>, parent: Option<usize>, rest: BoneTransform) -> usize {
        self.bones.push(BoneDesc {
            name: name.into(),
            parent,
            rest,
        });
        self.bones.len() - 1
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bones.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|b| b.name == name)
    }

    /// 子骨骼表（按骨骼顺序）
    pub fn children(&self) -> Vec<Vec<usize>> {
        let mut children = vec![Vec::new(); self.bones.len()];
        for (i, bone) in self.bones.iter().enumerate() {
            if let Some(parent) = bone.parent {
                if parent < children.len() {
                    children[parent].push(i);
                }
            }
        }
        children
    }

    /// 根骨骼索引
    pub fn roots(&self) -> impl Iterator<Item = usize> + '_ {
        self.bones
            .iter()
            .enumerate()
            .filter(|(_, b)| b.parent.is_none())
            .map(|(i, _)| i)
    }

    /// 检查拓扑：名称非空且唯一、父索引有效、无环、静止姿态有限
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::with_capacity(self.bones.len());
        for (i, bone) in self.bones.iter().enumerate() {
            if bone.name.is_empty() {
                return Err(IkError::InvalidTopology(format!("bone {} has an empty name", i)));
            }
            if !names.insert(bone.name.as_str()) {
                return Err(IkError::InvalidTopology(format!("duplicate bone name '{}'", bone.name)));
            }
            if let Some(parent) = bone.parent {
                if parent >= self.bones.len() || parent == i {
                    return Err(IkError::InvalidTopology(format!(
                        "bone '{}' has invalid parent {}",
                        bone.name, parent
                    )));
                }
            }
            if !bone.rest.is_finite() {
                return Err(IkError::NonFiniteTransform(format!("rest pose of '{}'", bone.name)));
            }
        }

        // 沿父链最多走 len 步，超过即有环
        for (i, bone) in self.bones.iter().enumerate() {
            let mut current = bone.parent;
            let mut steps = 0;
            while let Some(p) = current {
                steps += 1;
                if steps > self.bones.len() || p == i {
                    return Err(IkError::InvalidTopology(format!("cycle through bone '{}'", bone.name)));
                }
                current = self.bones[p].parent;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Pin 目标来源
// ============================================================================

/// 每帧提供 Pin 目标变换（全局空间）
///
/// 返回 None 时该 Pin 保持当前姿态。
pub trait PinTargetSource {
    fn pin_target(&self, pin_index: usize, bone_name: &str) -> Option<Mat4>;
}

impl PinTargetSource for [Mat4] {
    fn pin_target(&self, pin_index: usize, _bone_name: &str) -> Option<Mat4> {
        self.get(pin_index).copied()
    }
}

impl PinTargetSource for Vec<Mat4> {
    fn pin_target(&self, pin_index: usize, bone_name: &str) -> Option<Mat4> {
        self.as_slice().pin_target(pin_index, bone_name)
    }
}

impl PinTargetSource for HashMap<String, Mat4> {
    fn pin_target(&self, _pin_index: usize, bone_name: &str) -> Option<Mat4> {
        self.get(bone_name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_cycle() {
        let mut desc = SkeletonDesc::new();
        desc.add_bone("a", Some(1), BoneTransform::default());
        desc.add_bone("b", Some(0), BoneTransform::default());
        assert!(matches!(desc.validate(), Err(IkError::InvalidTopology(_))));
    }

    #[test]
    fn test_validate_rejects_bad_parent_and_duplicates() {
        let mut desc = SkeletonDesc::new();
        desc.add_bone("a", None, BoneTransform::default());
        desc.add_bone("b", Some(7), BoneTransform::default());
        assert!(desc.validate().is_err());

        let mut desc = SkeletonDesc::new();
        desc.add_bone("a", None, BoneTransform::default());
        desc.add_bone("a", Some(0), BoneTransform::default());
        assert!(desc.validate().is_err());
    }

    #[test]
    fn test_children_and_roots() {
        let mut desc = SkeletonDesc::new();
        let root = desc.add_bone("root", None, BoneTransform::default());
        let a = desc.add_bone("a", Some(root), BoneTransform::default());
        let b = desc.add_bone("b", Some(root), BoneTransform::default());
        let other = desc.add_bone("other", None, BoneTransform::default());
        assert!(desc.validate().is_ok());
        assert_eq!(desc.children()[root], vec![a, b]);
        assert_eq!(desc.roots().collect::<Vec<_>>(), vec![root, other]);
    }

    #[test]
    fn test_transform_matrix_roundtrip() {
        let t = BoneTransform {
            translation: Vec3::new(1.0, 2.0, 3.0),
            rotation: Quat::from_axis_angle(Vec3::Y, 0.5),
            scale: Vec3::ONE,
        };
        let back = BoneTransform::from_matrix(t.to_matrix());
        assert!((back.translation - t.translation).length() < 1e-5);
        assert!(back.rotation.angle_between(t.rotation) < 1e-4);
    }
}
