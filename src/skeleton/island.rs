//! 骨骼岛 - 一个根骨骼下的全部骨骼
//!
//! 不同骨骼岛之间不共享骨骼，可以并行求解。

use glam::Mat4;
use std::collections::HashMap;

use super::bone_segment::BoneSegment;
use super::effector::IkEffector;
use super::ik_bone::{update_global_transform_recursive, BoneFlags, IkBone};
use super::{BoneTransform, PinTargetSource, SkeletonDesc};
use crate::config::PinConfig;
use crate::constraint::Kusudama;
use crate::{IkError, Result};

/// 构建骨骼岛所需的逐骨骼设置
pub(crate) struct IslandSettings<'a> {
    pub dampening: &'a [f32],
    pub constraints: &'a HashMap<usize, Kusudama>,
    pub pins: &'a HashMap<usize, (usize, PinConfig)>,
}

/// 骨骼岛
#[derive(Clone, Debug)]
pub struct SkeletonIsland {
    /// 岛内骨骼（先序，0 为根）
    bones: Vec<IkBone>,
    /// 岛内索引 → 外部骨骼索引
    global_ids: Vec<usize>,
    root_segment: Option<BoneSegment>,
}

impl SkeletonIsland {
    /// 从外部骨骼的某个根骨骼构建
    pub(crate) fn build(desc: &SkeletonDesc, children: &[Vec<usize>], root: usize, settings: &IslandSettings<'_>) -> Self {
        // 先序遍历
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(idx) = stack.pop() {
            order.push(idx);
            for &child in children[idx].iter().rev() {
                stack.push(child);
            }
        }

        let local_of: HashMap<usize, usize> = order.iter().enumerate().map(|(local, &gid)| (gid, local)).collect();

        let mut bones: Vec<IkBone> = order
            .iter()
            .map(|&gid| {
                let bone = &desc.bones[gid];
                let parent = bone.parent.and_then(|p| local_of.get(&p).copied());
                IkBone::new(bone.name.clone(), gid, parent, bone.rest, settings.dampening[gid])
            })
            .collect();

        for local in 0..bones.len() {
            if let Some(parent) = bones[local].parent {
                bones[parent].children.push(local);
            }
        }

        for local in 0..bones.len() {
            let child_origins: Vec<_> = bones[local]
                .children
                .iter()
                .map(|&c| bones[c].rest.translation)
                .collect();
            let bone = &mut bones[local];
            bone.update_default_bone_direction_transform(&child_origins);
            bone.update_default_constraint_transform();

            let gid = bone.skeleton_id;
            bone.set_constraint(settings.constraints.get(&gid).cloned());
            if let Some((pin_index, config)) = settings.pins.get(&gid) {
                bone.set_pin(Some(IkEffector::from_config(*pin_index, config, Mat4::IDENTITY)));
            }
        }

        if !bones.is_empty() {
            update_global_transform_recursive(&mut bones, 0);
        }

        // 初始目标 = 静止姿态下的全局变换
        for bone in &mut bones {
            let global = bone.global;
            if let Some(pin) = bone.pin.as_mut() {
                pin.target = global;
            }
        }

        let mut root_segment = BoneSegment::generate(&bones, 0);
        if let Some(segment) = root_segment.as_mut() {
            segment.update_pinned_list(&bones);
            let mut solved = Vec::new();
            segment.collect_bones(&mut solved);
            for idx in solved {
                bones[idx].flags.insert(BoneFlags::IK_ENABLED);
            }
        }

        Self {
            bones,
            global_ids: order,
            root_segment,
        }
    }

    #[inline]
    pub fn bones(&self) -> &[IkBone] {
        &self.bones
    }

    #[inline]
    pub fn root_segment(&self) -> Option<&BoneSegment> {
        self.root_segment.as_ref()
    }

    pub fn pin_count(&self) -> usize {
        self.bones.iter().filter(|b| b.is_pinned()).count()
    }

    pub fn find(&self, name: &str) -> Option<&IkBone> {
        self.bones.iter().find(|b| b.name == name)
    }

    pub(crate) fn find_mut(&mut self, skeleton_id: usize) -> Option<&mut IkBone> {
        self.bones.iter_mut().find(|b| b.skeleton_id == skeleton_id)
    }

    /// 用外部姿态初始化骨骼
    pub fn seed_pose(&mut self, pose: &[BoneTransform]) -> Result<()> {
        for (local, &gid) in self.global_ids.iter().enumerate() {
            let transform = pose[gid];
            if !transform.is_finite() {
                return Err(IkError::NonFiniteTransform(format!("pose of '{}'", self.bones[local].name)));
            }
            self.bones[local].pose = transform;
        }
        self.refresh_globals();
        Ok(())
    }

    /// 读取本帧 Pin 目标；来源未提供时保持当前骨骼位置
    pub fn update_targets<S: PinTargetSource + ?Sized>(&mut self, targets: &S) -> Result<()> {
        for bone in &mut self.bones {
            let global = bone.global;
            let Some(pin) = bone.pin.as_mut() else {
                continue;
            };
            match targets.pin_target(pin.pin_index, &bone.name) {
                Some(target) if !target.is_finite() => {
                    return Err(IkError::NonFiniteTransform(format!("pin target of '{}'", bone.name)));
                }
                Some(target) => pin.target = target,
                None => pin.target = global,
            }
        }
        Ok(())
    }

    /// 迭代求解
    ///
    /// `convergence_epsilon > 0` 时，所有 Pin 位置误差都低于该值即提前结束。
    /// 返回实际迭代次数。
    pub fn solve(&mut self, iterations: usize, soft: bool, convergence_epsilon: f32) -> usize {
        let Some(segment) = self.root_segment.as_mut() else {
            return 0;
        };
        for iteration in 0..iterations {
            segment.segment_solver(&mut self.bones, soft);
            if convergence_epsilon > 0.0 && max_pin_error(&self.bones) < convergence_epsilon {
                return iteration + 1;
            }
        }
        iterations
    }

    /// 写回本地姿态
    pub fn write_back(&self, pose: &mut [BoneTransform]) {
        for (local, &gid) in self.global_ids.iter().enumerate() {
            pose[gid] = self.bones[local].pose;
        }
    }

    pub(crate) fn refresh_globals(&mut self) {
        if !self.bones.is_empty() {
            update_global_transform_recursive(&mut self.bones, 0);
        }
    }
}

/// 所有 Pin 的最大位置误差
fn max_pin_error(bones: &[IkBone]) -> f32 {
    bones
        .iter()
        .filter_map(|b| b.pin.as_ref().map(|p| (b.origin() - p.target_origin()).length()))
        .fold(0.0, f32::max)
}
