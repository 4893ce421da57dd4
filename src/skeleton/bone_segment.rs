//! 骨骼段 - 根/分叉点到被固定末端的骨骼链
//!
//! 切分规则：
//! - 从段根向下走，当前骨骼未被固定且恰好一个子树含 Pin 时继续
//! - 停下的骨骼为段末端（被固定，或 ≥2 个子树含 Pin 的分叉点）
//! - 末端下每个含 Pin 的子树生成一个子段，分叉骨骼归父段
//!
//! 求解顺序：先递归求解子段，再按 末端 → 根 求解本段骨骼。
//! 每根骨骼旋转后立即刷新其子孙的全局变换，子骨骼总能读到已更新的父骨骼。

use glam::{Quat, Vec3};

use super::ik_bone::{update_global_transform_recursive, IkBone};
use crate::math::{get_orthogonal, quat_from_axis_angle_safe, rotation_angle, weighted_superpose, EPSILON};

/// 拟合旋转小于此角度时视为停滞
const STALL_ANGLE: f32 = 1.0e-3;

/// 共线判定容差（相对叉积长度）
const COLLINEAR_TOLERANCE: f32 = 1.0e-4;

/// 径向误差低于此值时不再弯曲
const RADIAL_TOLERANCE: f32 = 1.0e-5;

/// 段内生效的效应器（骨骼索引 + 累积的传递权重）
#[derive(Clone, Copy, Debug)]
struct EffectorRef {
    bone: usize,
    weight_scale: f32,
}

/// 骨骼段
#[derive(Clone, Debug)]
pub struct BoneSegment {
    /// 段根（岛内索引）
    pub root: usize,
    /// 段末端（岛内索引）
    pub tip: usize,
    /// 段内骨骼，末端 → 根
    pub bones: Vec<usize>,
    pub children: Vec<BoneSegment>,
    effectors: Vec<EffectorRef>,
    // 朝向缓冲（重建时按容量分配，求解时复用）
    tip_headings: Vec<Vec3>,
    target_headings: Vec<Vec3>,
    heading_weights: Vec<f32>,
}

impl BoneSegment {
    /// 从 `root` 开始切分；子树中没有 Pin 时返回 None
    ///
    /// `bones` 必须按先序排列（父骨骼索引小于子骨骼）。
    pub fn generate(bones: &[IkBone], root: usize) -> Option<Self> {
        let has_pin = pinned_subtrees(bones);
        Self::generate_from(bones, root, &has_pin)
    }

    fn generate_from(bones: &[IkBone], root: usize, has_pin: &[bool]) -> Option<Self> {
        if !has_pin[root] {
            return None;
        }

        let pinned_children = |idx: usize| -> Vec<usize> {
            bones[idx].children.iter().copied().filter(|c| has_pin[*c]).collect()
        };

        let mut chain = vec![root];
        let mut current = root;
        loop {
            if bones[current].is_pinned() {
                break;
            }
            let next = pinned_children(current);
            if next.len() != 1 {
                break;
            }
            current = next[0];
            chain.push(current);
        }

        let children = pinned_children(current)
            .into_iter()
            .filter_map(|child| Self::generate_from(bones, child, has_pin))
            .collect();

        chain.reverse();
        Some(Self {
            root,
            tip: current,
            bones: chain,
            children,
            effectors: Vec::new(),
            tip_headings: Vec::new(),
            target_headings: Vec::new(),
            heading_weights: Vec::new(),
        })
    }

    /// 是否由分叉点终止（末端未被固定）
    pub fn is_fork(&self, bones: &[IkBone]) -> bool {
        !bones[self.tip].is_pinned()
    }

    /// 收集本段生效的效应器并分配朝向缓冲
    ///
    /// 子段的效应器按末端 Pin 的传递系数（末端未固定时为 1）折算后加入本段。
    pub fn update_pinned_list(&mut self, bones: &[IkBone]) {
        self.effectors.clear();
        for child in &mut self.children {
            child.update_pinned_list(bones);
        }

        let tip_pin = bones[self.tip].pin.as_ref();
        if tip_pin.is_some() {
            self.effectors.push(EffectorRef {
                bone: self.tip,
                weight_scale: 1.0,
            });
        }

        let passthrough = tip_pin.map_or(1.0, |p| p.passthrough_factor);
        if passthrough > 0.0 {
            for child in &self.children {
                for effector in &child.effectors {
                    self.effectors.push(EffectorRef {
                        bone: effector.bone,
                        weight_scale: effector.weight_scale * passthrough,
                    });
                }
            }
        }

        let capacity: usize = self
            .effectors
            .iter()
            .filter_map(|e| bones[e.bone].pin.as_ref())
            .map(|p| p.heading_count())
            .sum();
        self.tip_headings = Vec::with_capacity(capacity);
        self.target_headings = Vec::with_capacity(capacity);
        self.heading_weights = Vec::with_capacity(capacity);
    }

    /// 本段生效的被固定骨骼
    pub fn effector_bones(&self) -> impl Iterator<Item = usize> + '_ {
        self.effectors.iter().map(|e| e.bone)
    }

    /// 段内所有骨骼（含子段）
    pub fn collect_bones(&self, out: &mut Vec<usize>) {
        out.extend_from_slice(&self.bones);
        for child in &self.children {
            child.collect_bones(out);
        }
    }

    /// 单次迭代：子段 → 本段（末端 → 根）
    pub fn segment_solver(&mut self, bones: &mut [IkBone], soft: bool) {
        for child in &mut self.children {
            child.segment_solver(bones, soft);
        }
        for i in 0..self.bones.len() {
            let bone = self.bones[i];
            self.solve_bone(bones, bone, soft);
        }
    }

    fn solve_bone(&mut self, bones: &mut [IkBone], idx: usize, soft: bool) {
        if self.effectors.is_empty() {
            return;
        }

        self.tip_headings.clear();
        self.target_headings.clear();
        self.heading_weights.clear();

        let bone_origin = bones[idx].origin();
        for effector in &self.effectors {
            let pinned = &bones[effector.bone];
            let Some(pin) = pinned.pin.as_ref() else {
                continue;
            };
            pin.update_tip_headings(&pinned.global, bone_origin, &mut self.tip_headings);
            pin.update_target_headings(
                bone_origin,
                effector.weight_scale,
                &mut self.target_headings,
                &mut self.heading_weights,
            );
        }

        let mut delta = weighted_superpose(&self.tip_headings, &self.target_headings, &self.heading_weights);
        if rotation_angle(delta) < STALL_ANGLE {
            let bend = self.effectors.iter().find_map(|effector| {
                let pinned = &bones[effector.bone];
                let pin = pinned.pin.as_ref()?;
                straight_chain_bend(bones, idx, pinned.origin() - bone_origin, pin.target_origin() - bone_origin)
            });
            if let Some(bend) = bend {
                delta = bend * delta;
            }
        }

        // 全局增量换算到父空间：L' = P⁻¹ · Δ · P · L
        let parent_rotation = match bones[idx].parent {
            Some(p) => bones[p].global_rotation(),
            None => Quat::IDENTITY,
        };
        let desired = parent_rotation.inverse() * delta * parent_rotation * bones[idx].pose.rotation;
        bones[idx].step_local_rotation(desired, soft);

        update_global_transform_recursive(bones, idx);
    }
}

/// 链条伸直时的弯曲
///
/// 父骨骼原点、当前骨骼原点、末端、目标四点共线且目标比末端近时，
/// 任何单骨骼旋转都改变不了径向距离，拟合结果恒为单位旋转。
/// 此时按余弦定理弯曲当前骨骼，使末端到父骨骼原点的距离等于目标距离，
/// 父骨骼随后即可把末端转到目标上。
fn straight_chain_bend(bones: &[IkBone], idx: usize, tip: Vec3, target: Vec3) -> Option<Quat> {
    let parent = bones[idx].parent?;
    let segment = bones[idx].origin() - bones[parent].origin();
    let (a, c, g) = (segment.length(), tip.length(), target.length());
    if a <= EPSILON || c <= EPSILON || g <= EPSILON || g >= c - RADIAL_TOLERANCE {
        return None;
    }

    let same_line = |u: Vec3, v: Vec3, lu: f32, lv: f32| {
        u.dot(v) > 0.0 && u.cross(v).length() <= COLLINEAR_TOLERANCE * lu * lv
    };
    if !same_line(tip, target, c, g) || !same_line(segment, tip, a, c) {
        return None;
    }

    let reach = a + g;
    let cos = ((reach * reach - a * a - c * c) / (2.0 * a * c)).clamp(-1.0, 1.0);
    Some(quat_from_axis_angle_safe(get_orthogonal(tip), cos.acos()))
}

/// 每根骨骼的子树（含自身）是否有 Pin
fn pinned_subtrees(bones: &[IkBone]) -> Vec<bool> {
    let mut has_pin: Vec<bool> = bones.iter().map(|b| b.is_pinned()).collect();
    for i in (0..bones.len()).rev() {
        if has_pin[i] {
            if let Some(parent) = bones[i].parent {
                has_pin[parent] = true;
            }
        }
    }
    has_pin
}
