//! IK 求解器 - 对外接口
//!
//! 职责：
//! - 持有拓扑、Pin、约束、阻尼配置（任何修改都标记为 dirty）
//! - 求解前按需重建骨骼岛与骨骼段
//! - 每帧：读取外部姿态 → 更新 Pin 目标 → 迭代 → 写回

use glam::{Mat4, Vec3};
use rayon::prelude::*;
use std::collections::HashMap;
use std::f32::consts::TAU;

use super::island::{IslandSettings, SkeletonIsland};
use super::{BoneTransform, PinTargetSource, SkeletonDesc};
use crate::config::{ConfigWarning, ConstraintConfig, IkConfig, LimitConeConfig, PinConfig};
use crate::constraint::DEFAULT_CONE_RADIUS;
use crate::humanoid::HUMANOID_PRESETS;
use crate::math::to_tau;
use crate::{IkError, Result};

/// 多效应器 IK 求解器
#[derive(Debug, Default)]
pub struct IkSolver {
    config: IkConfig,
    skeleton: Option<SkeletonDesc>,
    pins: Vec<PinConfig>,
    constraints: Vec<ConstraintConfig>,
    damp_overrides: HashMap<String, f32>,
    islands: Vec<SkeletonIsland>,
    warnings: Vec<ConfigWarning>,
    dirty: bool,
}

impl IkSolver {
    pub fn new(config: IkConfig) -> Self {
        Self {
            config,
            dirty: true,
            ..Default::default()
        }
    }

    // ========================================================================
    // 全局配置
    // ========================================================================

    #[inline]
    pub fn config(&self) -> &IkConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: IkConfig) {
        self.config = config;
        self.dirty = true;
    }

    pub fn set_iterations_per_frame(&mut self, iterations: usize) {
        self.config.iterations_per_frame = iterations;
    }

    pub fn set_default_damp(&mut self, damp: f32) {
        self.config.default_damp = damp;
        self.dirty = true;
    }

    /// 单根骨骼的阻尼覆盖
    pub fn set_bone_damp(&mut self, bone_name: impl Into<String>, damp: f32) {
        self.damp_overrides.insert(bone_name.into(), damp);
        self.dirty = true;
    }

    pub fn clear_bone_damp(&mut self, bone_name: &str) {
        if self.damp_overrides.remove(bone_name).is_some() {
            self.dirty = true;
        }
    }

    /// 骨骼生效的阻尼
    pub fn bone_damp(&self, bone_name: &str) -> f32 {
        self.damp_overrides
            .get(bone_name)
            .copied()
            .filter(|d| *d > 0.0 && d.is_finite())
            .unwrap_or(self.config.default_damp)
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// 最近一次重建产生的配置警告
    #[inline]
    pub fn warnings(&self) -> &[ConfigWarning] {
        &self.warnings
    }

    // ========================================================================
    // 拓扑
    // ========================================================================

    /// 注册骨骼拓扑（校验失败时保留旧拓扑）
    pub fn set_skeleton(&mut self, skeleton: SkeletonDesc) -> Result<()> {
        skeleton.validate()?;
        self.skeleton = Some(skeleton);
        self.dirty = true;
        Ok(())
    }

    #[inline]
    pub fn skeleton(&self) -> Option<&SkeletonDesc> {
        self.skeleton.as_ref()
    }

    #[inline]
    pub fn islands(&self) -> &[SkeletonIsland] {
        &self.islands
    }

    // ========================================================================
    // Pin
    // ========================================================================

    pub fn add_pin(&mut self, pin: PinConfig) -> usize {
        self.pins.push(pin);
        self.dirty = true;
        self.pins.len() - 1
    }

    pub fn remove_pin(&mut self, index: usize) -> Result<PinConfig> {
        if index >= self.pins.len() {
            return Err(IkError::IndexOutOfRange(format!("pin {}", index)));
        }
        self.dirty = true;
        Ok(self.pins.remove(index))
    }

    #[inline]
    pub fn pins(&self) -> &[PinConfig] {
        &self.pins
    }

    pub fn find_pin(&self, bone_name: &str) -> Option<usize> {
        self.pins.iter().position(|p| p.bone_name == bone_name)
    }

    fn pin_mut(&mut self, index: usize) -> Result<&mut PinConfig> {
        self.dirty = true;
        self.pins
            .get_mut(index)
            .ok_or_else(|| IkError::IndexOutOfRange(format!("pin {}", index)))
    }

    pub fn set_pin_bone_name(&mut self, index: usize, bone_name: impl Into<String>) -> Result<()> {
        self.pin_mut(index)?.bone_name = bone_name.into();
        Ok(())
    }

    pub fn set_pin_weight(&mut self, index: usize, weight: f32) -> Result<()> {
        self.pin_mut(index)?.weight = weight.clamp(0.0, 1.0);
        Ok(())
    }

    pub fn set_pin_direction_priorities(&mut self, index: usize, priorities: Vec3) -> Result<()> {
        self.pin_mut(index)?.direction_priorities = priorities.max(Vec3::ZERO);
        Ok(())
    }

    pub fn set_pin_passthrough_factor(&mut self, index: usize, factor: f32) -> Result<()> {
        self.pin_mut(index)?.passthrough_factor = factor.clamp(0.0, 1.0);
        Ok(())
    }

    // ========================================================================
    // 约束
    // ========================================================================

    pub fn add_constraint(&mut self, constraint: ConstraintConfig) -> usize {
        self.constraints.push(constraint);
        self.dirty = true;
        self.constraints.len() - 1
    }

    pub fn remove_constraint(&mut self, index: usize) -> Result<ConstraintConfig> {
        if index >= self.constraints.len() {
            return Err(IkError::IndexOutOfRange(format!("constraint {}", index)));
        }
        self.dirty = true;
        Ok(self.constraints.remove(index))
    }

    #[inline]
    pub fn constraints(&self) -> &[ConstraintConfig] {
        &self.constraints
    }

    pub fn find_constraint(&self, bone_name: &str) -> Option<usize> {
        self.constraints.iter().position(|c| c.bone_name == bone_name)
    }

    fn constraint_mut(&mut self, index: usize) -> Result<&mut ConstraintConfig> {
        self.dirty = true;
        self.constraints
            .get_mut(index)
            .ok_or_else(|| IkError::IndexOutOfRange(format!("constraint {}", index)))
    }

    /// 设置扭转区间（from 归一化到 [0, 2π)，range 夹到 [0, 2π]）
    pub fn set_kusudama_twist(&mut self, index: usize, from: f32, range: f32) -> Result<()> {
        let constraint = self.constraint_mut(index)?;
        constraint.twist_from = to_tau(from);
        constraint.twist_range = range.clamp(0.0, TAU);
        Ok(())
    }

    /// 调整锥数量，新增锥为 (+Y, 10°)
    pub fn set_kusudama_limit_cone_count(&mut self, index: usize, count: usize) -> Result<()> {
        self.constraint_mut(index)?
            .limit_cones
            .resize(count, LimitConeConfig::new(Vec3::Y, DEFAULT_CONE_RADIUS));
        Ok(())
    }

    fn cone_mut(&mut self, index: usize, cone: usize) -> Result<&mut LimitConeConfig> {
        self.constraint_mut(index)?
            .limit_cones
            .get_mut(cone)
            .ok_or_else(|| IkError::IndexOutOfRange(format!("cone {} of constraint {}", cone, index)))
    }

    /// 设置锥轴（零向量视为 +Y，存储为单位向量）
    pub fn set_kusudama_limit_cone_center(&mut self, index: usize, cone: usize, center: Vec3) -> Result<()> {
        self.cone_mut(index, cone)?.center = center.try_normalize().unwrap_or(Vec3::Y);
        Ok(())
    }

    pub fn set_kusudama_limit_cone_radius(&mut self, index: usize, cone: usize, radius: f32) -> Result<()> {
        self.cone_mut(index, cone)?.radius = radius;
        Ok(())
    }

    /// 为骨架中存在且尚未约束的人形骨骼添加预设约束，返回新增数量
    pub fn setup_humanoid_constraints(&mut self) -> usize {
        let Some(skeleton) = self.skeleton.as_ref() else {
            return 0;
        };
        let mut added = Vec::new();
        for preset in HUMANOID_PRESETS.iter() {
            if skeleton.find(&preset.bone_name).is_none() || self.find_constraint(&preset.bone_name).is_some() {
                continue;
            }
            added.push(preset.clone());
        }
        let count = added.len();
        if count > 0 {
            self.constraints.extend(added);
            self.dirty = true;
        }
        if self.config.debug_log {
            log::info!("[IK] 人形预设约束: {} 个", count);
        }
        count
    }

    // ========================================================================
    // 扭转
    // ========================================================================

    fn constraint_bone_id(&self, index: usize) -> Result<usize> {
        let name = &self
            .constraints
            .get(index)
            .ok_or_else(|| IkError::IndexOutOfRange(format!("constraint {}", index)))?
            .bone_name;
        let skeleton = self.skeleton.as_ref().ok_or(IkError::NoSkeleton)?;
        skeleton
            .find(name)
            .ok_or_else(|| IkError::IndexOutOfRange(format!("constraint bone '{}' not in skeleton", name)))
    }

    /// 约束骨骼当前扭转在区间内的比例 [0, 1]
    pub fn get_kusudama_twist_current(&mut self, index: usize) -> Result<f32> {
        let id = self.constraint_bone_id(index)?;
        self.ensure_built();
        self.islands
            .iter()
            .flat_map(|island| island.bones())
            .find(|bone| bone.skeleton_id == id)
            .and_then(|bone| bone.twist_fraction())
            .ok_or_else(|| IkError::IndexOutOfRange(format!("constraint {} is not active", index)))
    }

    /// 按比例设置约束骨骼的扭转（之后用 `write_back` 取回姿态）
    ///
    /// 设置后按当前 Pin 目标重新迭代 `iterations_per_frame` 次，其余骨骼随之调整。
    pub fn set_kusudama_twist_current(&mut self, index: usize, fraction: f32) -> Result<()> {
        let id = self.constraint_bone_id(index)?;
        self.ensure_built();
        let iterations = self.config.iterations_per_frame;
        let soft = self.config.soft_constraints;
        let epsilon = self.config.convergence_epsilon;
        for island in &mut self.islands {
            let applied = island.find_mut(id).map(|bone| bone.set_twist_fraction(fraction));
            match applied {
                Some(true) => {
                    island.refresh_globals();
                    island.solve(iterations, soft, epsilon);
                    return Ok(());
                }
                Some(false) => break,
                None => continue,
            }
        }
        Err(IkError::IndexOutOfRange(format!("constraint {} is not active", index)))
    }

    // ========================================================================
    // 重建
    // ========================================================================

    fn ensure_built(&mut self) {
        if self.dirty {
            self.rebuild();
        }
    }

    /// 重建骨骼岛与骨骼段，返回配置警告
    pub fn rebuild(&mut self) -> &[ConfigWarning] {
        self.dirty = false;
        self.islands.clear();
        let mut warnings = Vec::new();

        let Some(skeleton) = self.skeleton.as_ref() else {
            self.warnings = warnings;
            return &self.warnings;
        };

        if skeleton.is_empty() {
            if !self.pins.is_empty() {
                warnings.push(ConfigWarning::PinsWithoutBones);
            }
            log_warnings(&warnings);
            self.warnings = warnings;
            return &self.warnings;
        }

        // 阻尼
        let mut default_damp = self.config.default_damp;
        if !(default_damp > 0.0) || !default_damp.is_finite() {
            warnings.push(ConfigWarning::InvalidDamp {
                bone: "<default>".to_string(),
                damp: default_damp,
            });
            default_damp = IkConfig::default().default_damp;
        }
        let mut dampening = vec![default_damp; skeleton.len()];
        for (name, &damp) in &self.damp_overrides {
            let Some(id) = skeleton.find(name) else {
                log::debug!("[IK] 阻尼覆盖的骨骼不存在: {}", name);
                continue;
            };
            if damp > 0.0 && damp.is_finite() {
                dampening[id] = damp;
            } else {
                warnings.push(ConfigWarning::InvalidDamp {
                    bone: name.clone(),
                    damp,
                });
            }
        }

        // 约束
        let mut constraints = HashMap::new();
        for config in &self.constraints {
            match skeleton.find(&config.bone_name) {
                None => warnings.push(ConfigWarning::UnknownConstraintBone(config.bone_name.clone())),
                Some(id) if constraints.contains_key(&id) => {
                    warnings.push(ConfigWarning::DuplicateConstraint(config.bone_name.clone()));
                }
                Some(id) => {
                    let kusudama = config.build(&mut warnings);
                    constraints.insert(id, kusudama);
                }
            }
        }

        // Pin：骨骼不存在时只从本次求解中移除，配置保留
        let mut pins = HashMap::new();
        for (pin_index, config) in self.pins.iter().enumerate() {
            match skeleton.find(&config.bone_name) {
                None => {
                    log::debug!("[IK] Pin {} 的骨骼不存在: {}", pin_index, config.bone_name);
                    warnings.push(ConfigWarning::UnknownPinBone(config.bone_name.clone()));
                }
                Some(id) => {
                    pins.entry(id).or_insert_with(|| (pin_index, config.clone()));
                }
            }
        }

        let children = skeleton.children();
        let settings = IslandSettings {
            dampening: &dampening,
            constraints: &constraints,
            pins: &pins,
        };
        let islands: Vec<SkeletonIsland> = skeleton
            .roots()
            .map(|root| SkeletonIsland::build(skeleton, &children, root, &settings))
            .collect();

        log_warnings(&warnings);
        if self.config.debug_log {
            log::info!(
                "[IK] 重建完成: {} 个骨骼, {} 个骨骼岛, {} 个 Pin, {} 个约束",
                skeleton.len(),
                islands.len(),
                pins.len(),
                constraints.len()
            );
        }

        self.islands = islands;
        self.warnings = warnings;
        &self.warnings
    }

    // ========================================================================
    // 求解
    // ========================================================================

    /// 求解一帧
    ///
    /// `pose` 按骨骼索引排列，既是初始姿态也是输出。
    pub fn solve<S: PinTargetSource + ?Sized>(&mut self, pose: &mut [BoneTransform], targets: &S) -> Result<()> {
        let expected = self.skeleton.as_ref().ok_or(IkError::NoSkeleton)?.len();
        if pose.len() != expected {
            return Err(IkError::PoseMismatch {
                expected,
                actual: pose.len(),
            });
        }
        self.ensure_built();

        for island in &mut self.islands {
            island.seed_pose(pose)?;
            island.update_targets(targets)?;
        }

        let iterations = self.config.iterations_per_frame;
        let soft = self.config.soft_constraints;
        let epsilon = self.config.convergence_epsilon;

        if self.config.parallel_islands && self.islands.len() > 1 {
            self.islands.par_iter_mut().for_each(|island| {
                island.solve(iterations, soft, epsilon);
            });
        } else {
            for island in &mut self.islands {
                island.solve(iterations, soft, epsilon);
            }
        }

        self.write_back(pose)
    }

    /// 把当前求解结果写入外部姿态
    pub fn write_back(&self, pose: &mut [BoneTransform]) -> Result<()> {
        let expected = self.skeleton.as_ref().ok_or(IkError::NoSkeleton)?.len();
        if pose.len() != expected {
            return Err(IkError::PoseMismatch {
                expected,
                actual: pose.len(),
            });
        }
        for island in &self.islands {
            island.write_back(pose);
        }
        Ok(())
    }

    /// 求解后骨骼的全局变换
    pub fn bone_global(&self, bone_name: &str) -> Option<Mat4> {
        self.islands.iter().find_map(|i| i.find(bone_name)).map(|b| b.global)
    }
}

fn log_warnings(warnings: &[ConfigWarning]) {
    for warning in warnings {
        match warning {
            ConfigWarning::UnknownPinBone(_) => {}
            _ => log::warn!("[IK] {}", warning),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{angle_between, matrix_origin, rotation_angle};
    use std::f32::consts::PI;

    fn chain(names: &[&str]) -> SkeletonDesc {
        let mut desc = SkeletonDesc::new();
        let mut parent = None;
        for (i, name) in names.iter().enumerate() {
            let offset = if i == 0 { Vec3::ZERO } else { Vec3::Y };
            parent = Some(desc.add_bone(*name, parent, BoneTransform::from_translation(offset)));
        }
        desc
    }

    fn rest_pose(desc: &SkeletonDesc) -> Vec<BoneTransform> {
        desc.bones.iter().map(|b| b.rest).collect()
    }

    fn position_pin(name: &str) -> PinConfig {
        PinConfig::new(name).with_direction_priorities(Vec3::ZERO)
    }

    #[test]
    fn test_chain_converges() {
        // 目标在伸直链条的正前方，需要先弯曲才能缩短距离
        for pin in [position_pin("b3"), PinConfig::new("b3")] {
            let desc = chain(&["b0", "b1", "b2", "b3"]);
            let mut pose = rest_pose(&desc);
            let mut solver = IkSolver::new(IkConfig {
                iterations_per_frame: 50,
                default_damp: PI,
                ..Default::default()
            });
            solver.set_skeleton(desc).unwrap();
            solver.add_pin(pin);

            let target = Vec3::new(0.0, 2.9, 0.0);
            solver.solve(&mut pose, &[Mat4::from_translation(target)][..]).unwrap();

            let tip = matrix_origin(&solver.bone_global("b3").unwrap());
            assert!((tip - target).length() < 1e-3, "tip {:?}", tip);
        }
    }

    #[test]
    fn test_chain_converges_off_axis() {
        let desc = chain(&["b0", "b1", "b2", "b3"]);
        let mut pose = rest_pose(&desc);
        let mut solver = IkSolver::new(IkConfig {
            iterations_per_frame: 50,
            default_damp: PI,
            ..Default::default()
        });
        solver.set_skeleton(desc).unwrap();
        solver.add_pin(position_pin("b3"));

        let target = Vec3::new(0.0, 0.18_f32.cos(), 0.18_f32.sin()) * 2.9;
        solver.solve(&mut pose, &[Mat4::from_translation(target)][..]).unwrap();

        let tip = matrix_origin(&solver.bone_global("b3").unwrap());
        assert!((tip - target).length() < 1e-3, "tip {:?}", tip);
    }

    #[test]
    fn test_cone_contains_swing() {
        let desc = chain(&["arm", "tip"]);
        let mut pose = rest_pose(&desc);
        let mut solver = IkSolver::new(IkConfig {
            iterations_per_frame: 20,
            default_damp: PI,
            ..Default::default()
        });
        solver.set_skeleton(desc).unwrap();
        solver.add_pin(position_pin("tip"));
        solver.add_constraint(ConstraintConfig::new("arm").with_cone(Vec3::Y, 30.0_f32.to_radians()));

        solver.solve(&mut pose, &[Mat4::from_translation(Vec3::X)][..]).unwrap();

        let direction = pose[0].rotation * Vec3::Y;
        let swing = angle_between(direction, Vec3::Y);
        assert!(swing <= 30.0_f32.to_radians() + 1e-3);
        assert!((swing - 30.0_f32.to_radians()).abs() < 1e-3);
        let tip = matrix_origin(&solver.bone_global("tip").unwrap());
        assert!((tip - Vec3::new(0.5, 0.866_025, 0.0)).length() < 1e-3);
    }

    #[test]
    fn test_damping_bounds_each_iteration() {
        let desc = chain(&["b0", "b1", "b2"]);
        let mut pose = rest_pose(&desc);
        let before = pose.clone();
        let mut solver = IkSolver::new(IkConfig {
            iterations_per_frame: 1,
            default_damp: 0.05,
            ..Default::default()
        });
        solver.set_skeleton(desc).unwrap();
        solver.add_pin(PinConfig::new("b2"));
        let target = Mat4::from_rotation_translation(
            glam::Quat::from_axis_angle(Vec3::X, 2.0),
            Vec3::new(1.5, -0.5, 0.5),
        );
        solver.solve(&mut pose, &[target][..]).unwrap();

        for (old, new) in before.iter().zip(&pose) {
            let change = rotation_angle(old.rotation.inverse() * new.rotation);
            assert!(change <= 0.05 + 1e-4, "change {}", change);
        }
    }

    #[test]
    fn test_damping_bounds_constrained_bone() {
        let desc = chain(&["arm", "tip"]);
        let mut pose = rest_pose(&desc);
        // 起始姿态在 30° 锥外
        pose[0].rotation = glam::Quat::from_axis_angle(Vec3::Z, -std::f32::consts::FRAC_PI_2);
        let before = pose[0].rotation;
        let mut solver = IkSolver::new(IkConfig {
            iterations_per_frame: 1,
            default_damp: 0.05,
            ..Default::default()
        });
        solver.set_skeleton(desc).unwrap();
        solver.add_pin(position_pin("tip"));
        solver.add_constraint(ConstraintConfig::new("arm").with_cone(Vec3::Y, 30.0_f32.to_radians()));
        let targets = [Mat4::from_translation(Vec3::X)];

        solver.solve(&mut pose, &targets[..]).unwrap();
        let change = rotation_angle(before.inverse() * pose[0].rotation);
        assert!(change <= 0.05 + 1e-4, "change {}", change);
        assert!(change > 0.04);

        // 多次迭代后回到锥内
        solver.set_iterations_per_frame(40);
        solver.solve(&mut pose, &targets[..]).unwrap();
        let swing = angle_between(pose[0].rotation * Vec3::Y, Vec3::Y);
        assert!(swing <= 30.0_f32.to_radians() + 1e-3, "swing {}", swing);
    }

    /// root ─ a1 ─ a2*, root ─ b1 ─ b2*
    fn fork(a_first: bool) -> SkeletonDesc {
        let mut desc = SkeletonDesc::new();
        let root = desc.add_bone("root", None, BoneTransform::default());
        let branch = |desc: &mut SkeletonDesc, prefix: &str, side: f32| {
            let first = desc.add_bone(
                format!("{prefix}1"),
                Some(root),
                BoneTransform::from_translation(Vec3::new(side, 1.0, 0.0)),
            );
            desc.add_bone(format!("{prefix}2"), Some(first), BoneTransform::from_translation(Vec3::Y));
        };
        if a_first {
            branch(&mut desc, "a", 1.0);
            branch(&mut desc, "b", -1.0);
        } else {
            branch(&mut desc, "b", -1.0);
            branch(&mut desc, "a", 1.0);
        }
        desc
    }

    fn solve_fork(a_first: bool) -> HashMap<String, BoneTransform> {
        let desc = fork(a_first);
        let mut pose = rest_pose(&desc);
        let mut solver = IkSolver::new(IkConfig {
            iterations_per_frame: 15,
            default_damp: 0.3,
            ..Default::default()
        });
        solver.add_pin(position_pin("a2"));
        solver.add_pin(position_pin("b2"));
        solver.set_skeleton(desc.clone()).unwrap();

        let mut targets = HashMap::new();
        targets.insert("a2".to_string(), Mat4::from_translation(Vec3::new(1.8, 1.2, 0.6)));
        targets.insert("b2".to_string(), Mat4::from_translation(Vec3::new(-0.5, 2.2, -0.7)));
        solver.solve(&mut pose, &targets).unwrap();

        desc.bones
            .iter()
            .zip(pose)
            .map(|(bone, transform)| (bone.name.clone(), transform))
            .collect()
    }

    #[test]
    fn test_fork_branches_are_order_independent() {
        let forward = solve_fork(true);
        let reversed = solve_fork(false);
        for (name, transform) in &forward {
            let other = reversed[name];
            assert!(
                transform.rotation.angle_between(other.rotation) < 1e-3,
                "bone {} differs",
                name
            );
        }
        // 根骨骼确实参与了求解
        assert!(rotation_angle(forward["root"].rotation) > 1e-3);
    }

    #[test]
    fn test_unknown_names_are_warnings() {
        let desc = chain(&["b0", "b1"]);
        let mut pose = rest_pose(&desc);
        let before = pose.clone();
        let mut solver = IkSolver::new(IkConfig::default());
        solver.set_skeleton(desc).unwrap();
        solver.add_pin(PinConfig::new("missing"));
        solver.add_constraint(ConstraintConfig::new("nowhere").with_cone(Vec3::Y, 0.5));
        solver.add_constraint(ConstraintConfig::new("b0").with_cone(Vec3::Y, -1.0));

        solver.solve(&mut pose, &Vec::<Mat4>::new()).unwrap();
        let warnings = solver.warnings();
        assert!(warnings.contains(&ConfigWarning::UnknownPinBone("missing".into())));
        assert!(warnings.contains(&ConfigWarning::UnknownConstraintBone("nowhere".into())));
        assert!(warnings
            .iter()
            .any(|w| matches!(w, ConfigWarning::NonPositiveConeRadius { .. })));
        // 没有有效 Pin，姿态不变
        for (a, b) in before.iter().zip(&pose) {
            assert!(a.rotation.angle_between(b.rotation) < 1e-6);
        }
        // 配置仍保留，骨骼出现后生效
        assert_eq!(solver.find_pin("missing"), Some(0));
    }

    #[test]
    fn test_rebuild_after_topology_change() {
        let mut solver = IkSolver::new(IkConfig::default());
        solver.add_pin(position_pin("tip"));
        solver.set_skeleton(chain(&["root", "mid"])).unwrap();
        solver.rebuild();
        assert_eq!(solver.warnings().len(), 1);

        solver.set_skeleton(chain(&["root", "mid", "tip"])).unwrap();
        assert!(solver.is_dirty());
        let mut pose = rest_pose(solver.skeleton().unwrap());
        solver.solve(&mut pose, &[Mat4::from_translation(Vec3::new(0.5, 1.5, 0.0))][..]).unwrap();
        assert!(solver.warnings().is_empty());
        assert_eq!(solver.islands()[0].pin_count(), 1);
    }

    #[test]
    fn test_reported_errors() {
        let mut solver = IkSolver::new(IkConfig::default());
        let mut pose = vec![BoneTransform::default(); 2];
        assert!(matches!(
            solver.solve(&mut pose, &Vec::<Mat4>::new()),
            Err(IkError::NoSkeleton)
        ));

        solver.set_skeleton(chain(&["b0", "b1"])).unwrap();
        let mut short = vec![BoneTransform::default(); 1];
        assert!(matches!(
            solver.solve(&mut short, &Vec::<Mat4>::new()),
            Err(IkError::PoseMismatch { expected: 2, actual: 1 })
        ));

        solver.add_pin(PinConfig::new("b1"));
        let bad = Mat4::from_translation(Vec3::new(f32::NAN, 0.0, 0.0));
        assert!(matches!(
            solver.solve(&mut pose, &[bad][..]),
            Err(IkError::NonFiniteTransform(_))
        ));

        assert!(solver.set_pin_weight(5, 0.5).is_err());
        assert!(solver.remove_constraint(0).is_err());
    }

    #[test]
    fn test_twist_current_roundtrip() {
        let mut solver = IkSolver::new(IkConfig::default());
        solver.set_skeleton(chain(&["arm", "hand"])).unwrap();
        let index = solver.add_constraint(ConstraintConfig::new("arm").with_cone(Vec3::Y, 1.0));
        solver.set_kusudama_twist(index, -1.0, 2.0).unwrap();

        solver.set_kusudama_twist_current(index, 0.75).unwrap();
        let current = solver.get_kusudama_twist_current(index).unwrap();
        assert!((current - 0.75).abs() < 1e-3);

        solver.set_kusudama_twist_current(index, 3.0).unwrap();
        let current = solver.get_kusudama_twist_current(index).unwrap();
        assert!((current - 1.0).abs() < 1e-3);

        let mut pose = rest_pose(solver.skeleton().unwrap());
        solver.write_back(&mut pose).unwrap();
        assert!(rotation_angle(pose[0].rotation) > 0.5);
    }

    #[test]
    fn test_twist_current_keeps_pin_on_target() {
        // upper ─ lower ─ hand，hand 偏离 upper 的骨骼轴，扭转 upper 会带走 hand
        let mut desc = SkeletonDesc::new();
        let upper = desc.add_bone("upper", None, BoneTransform::default());
        let lower = desc.add_bone("lower", Some(upper), BoneTransform::from_translation(Vec3::Y));
        desc.add_bone("hand", Some(lower), BoneTransform::from_translation(Vec3::X));
        let mut pose = rest_pose(&desc);

        let mut solver = IkSolver::new(IkConfig {
            iterations_per_frame: 50,
            default_damp: PI,
            ..Default::default()
        });
        solver.set_skeleton(desc).unwrap();
        solver.add_pin(position_pin("hand"));
        let index = solver.add_constraint(ConstraintConfig::new("upper").with_cone(Vec3::Y, 1.0));
        solver.set_kusudama_twist(index, -1.0, 2.0).unwrap();

        let target = Vec3::new(1.0, 1.0, 0.0);
        solver.solve(&mut pose, &[Mat4::from_translation(target)][..]).unwrap();

        solver.set_kusudama_twist_current(index, 0.75).unwrap();
        let hand = matrix_origin(&solver.bone_global("hand").unwrap());
        assert!((hand - target).length() < 1e-3, "hand {:?}", hand);
        let current = solver.get_kusudama_twist_current(index).unwrap();
        assert!((current - 0.75).abs() < 1e-2);
    }

    #[test]
    fn test_twist_range_is_clamped_at_setter() {
        let mut solver = IkSolver::new(IkConfig::default());
        let index = solver.add_constraint(ConstraintConfig::new("arm"));
        solver.set_kusudama_twist(index, 0.5, 10.0).unwrap();
        assert!((solver.constraints()[index].twist_range - TAU).abs() < 1e-6);
        solver.set_kusudama_twist(index, 0.5, -1.0).unwrap();
        assert!(solver.constraints()[index].twist_range.abs() < 1e-6);
    }

    #[test]
    fn test_cone_editing() {
        let mut solver = IkSolver::new(IkConfig::default());
        let index = solver.add_constraint(ConstraintConfig::new("arm"));
        solver.set_kusudama_limit_cone_count(index, 2).unwrap();
        solver.set_kusudama_limit_cone_center(index, 1, Vec3::ZERO).unwrap();
        solver.set_kusudama_limit_cone_radius(index, 0, 0.4).unwrap();
        let cones = &solver.constraints()[index].limit_cones;
        assert_eq!(cones.len(), 2);
        assert!((cones[1].center - Vec3::Y).length() < 1e-6);
        assert!((cones[1].radius - DEFAULT_CONE_RADIUS).abs() < 1e-6);
        assert!((cones[0].radius - 0.4).abs() < 1e-6);
        assert!(solver.set_kusudama_limit_cone_radius(index, 5, 0.1).is_err());
    }

    #[test]
    fn test_humanoid_setup() {
        let mut solver = IkSolver::new(IkConfig::default());
        solver.set_skeleton(chain(&["Hips", "Spine", "Head", "Tail"])).unwrap();
        assert_eq!(solver.setup_humanoid_constraints(), 3);
        assert_eq!(solver.setup_humanoid_constraints(), 0);
        assert!(solver.find_constraint("Tail").is_none());
    }

    #[test]
    fn test_parallel_islands_match_sequential() {
        let mut desc = chain(&["a0", "a1", "a2"]);
        let root = desc.add_bone("c0", None, BoneTransform::from_translation(Vec3::new(3.0, 0.0, 0.0)));
        let mid = desc.add_bone("c1", Some(root), BoneTransform::from_translation(Vec3::Y));
        desc.add_bone("c2", Some(mid), BoneTransform::from_translation(Vec3::Y));

        let mut targets = HashMap::new();
        targets.insert("a2".to_string(), Mat4::from_translation(Vec3::new(1.0, 1.2, 0.0)));
        targets.insert("c2".to_string(), Mat4::from_translation(Vec3::new(3.5, 1.0, 1.0)));

        let run = |parallel: bool| {
            let mut solver = IkSolver::new(IkConfig {
                parallel_islands: parallel,
                iterations_per_frame: 20,
                ..Default::default()
            });
            solver.set_skeleton(desc.clone()).unwrap();
            solver.add_pin(position_pin("a2"));
            solver.add_pin(position_pin("c2"));
            let mut pose = rest_pose(&desc);
            solver.solve(&mut pose, &targets).unwrap();
            assert_eq!(solver.islands().len(), 2);
            pose
        };

        let parallel = run(true);
        let sequential = run(false);
        for (a, b) in parallel.iter().zip(&sequential) {
            assert!(a.rotation.angle_between(b.rotation) < 1e-6);
        }
    }

    #[test]
    fn test_early_exit_keeps_result() {
        let desc = chain(&["b0", "b1", "b2"]);
        let mut pose = rest_pose(&desc);
        let mut solver = IkSolver::new(IkConfig {
            iterations_per_frame: 200,
            default_damp: PI,
            convergence_epsilon: 1e-3,
            ..Default::default()
        });
        solver.set_skeleton(desc).unwrap();
        solver.add_pin(position_pin("b2"));
        let target = Vec3::new(0.6, 1.6, 0.3);
        solver.solve(&mut pose, &[Mat4::from_translation(target)][..]).unwrap();
        let tip = matrix_origin(&solver.bone_global("b2").unwrap());
        assert!((tip - target).length() < 1e-3);
    }
}
