//! Kusudama 约束 - 限制锥序列（摆动）+ 扭转区间
//!
//! 约束空间约定：
//! - 约束空间的 +Y 是骨骼静止方向
//! - 扭转绕约束空间 +Y 测量，归一化到 [0, 2π)
//! - 候选旋转先换算到约束空间，夹紧后再换回骨骼本地空间

use bitflags::bitflags;
use glam::{Quat, Vec3};
use std::f32::consts::TAU;

use super::limit_cone::{ConeBoundary, LimitCone};
use crate::math::{angle_between, slerp_direction, swing_twist, to_tau, twist_angle, EPSILON};

/// 新增锥的默认半角（10°）
pub const DEFAULT_CONE_RADIUS: f32 = 10.0 * std::f32::consts::PI / 180.0;

/// 默认扭转区间宽度（几乎整圈）
pub const DEFAULT_TWIST_RANGE: f32 = TAU - 1.0e-4;

/// 判定缓冲点落在锥缓冲圆上的角度容差
const BAND_MATCH_TOLERANCE: f32 = 1.0e-3;

bitflags! {
    /// 约束启用标志
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ConstraintFlags: u8 {
        /// 摆动（限制锥）约束
        const ORIENTATIONAL = 1 << 0;
        /// 扭转约束
        const AXIAL = 1 << 1;
    }
}

impl Default for ConstraintFlags {
    fn default() -> Self {
        ConstraintFlags::ORIENTATIONAL | ConstraintFlags::AXIAL
    }
}

/// 约束求值所需的骨骼坐标系
///
/// - `constraint`: 约束空间在父空间中的朝向（静止旋转 × 骨骼方向旋转）
/// - `bone_direction`: 骨骼本地空间中把 +Y 转到骨骼方向的旋转
#[derive(Clone, Copy, Debug)]
pub struct ConstraintFrame {
    pub constraint: Quat,
    pub bone_direction: Quat,
}

impl Default for ConstraintFrame {
    fn default() -> Self {
        Self {
            constraint: Quat::IDENTITY,
            bone_direction: Quat::IDENTITY,
        }
    }
}

impl ConstraintFrame {
    /// 本地旋转 → 约束空间中的相对旋转
    #[inline]
    pub fn to_constraint_space(&self, local: Quat) -> Quat {
        (self.constraint.inverse() * local * self.bone_direction).normalize()
    }

    /// 约束空间中的相对旋转 → 本地旋转
    #[inline]
    pub fn to_local(&self, relative: Quat) -> Quat {
        (self.constraint * relative * self.bone_direction.inverse()).normalize()
    }
}

/// Kusudama 摆动/扭转约束
#[derive(Clone, Debug)]
pub struct Kusudama {
    limit_cones: Vec<LimitCone>,
    twist_from: f32,
    twist_range: f32,
    pub flags: ConstraintFlags,
}

impl Default for Kusudama {
    fn default() -> Self {
        Self {
            limit_cones: Vec::new(),
            twist_from: std::f32::consts::PI,
            twist_range: DEFAULT_TWIST_RANGE,
            flags: ConstraintFlags::default(),
        }
    }
}

impl Kusudama {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // 限制锥
    // ========================================================================

    #[inline]
    pub fn limit_cones(&self) -> &[LimitCone] {
        &self.limit_cones
    }

    /// 追加一个限制锥并刷新切圆
    pub fn add_limit_cone(&mut self, center: Vec3, radius: f32) {
        self.push_cone(LimitCone::new(center, radius));
    }

    pub fn push_cone(&mut self, cone: LimitCone) {
        self.limit_cones.push(cone);
        self.update_tangent_radii();
    }

    pub fn remove_cone(&mut self, index: usize) -> Option<LimitCone> {
        if index >= self.limit_cones.len() {
            return None;
        }
        let cone = self.limit_cones.remove(index);
        self.update_tangent_radii();
        Some(cone)
    }

    /// 调整锥数量，新增锥为 (+Y, 10°)
    pub fn set_cone_count(&mut self, count: usize) {
        self.limit_cones
            .resize_with(count, || LimitCone::new(Vec3::Y, DEFAULT_CONE_RADIUS));
        self.update_tangent_radii();
    }

    pub fn set_cone_center(&mut self, index: usize, center: Vec3) -> bool {
        let Some(cone) = self.limit_cones.get_mut(index) else {
            return false;
        };
        cone.set_control_point(center);
        self.update_tangent_radii();
        true
    }

    pub fn set_cone_radius(&mut self, index: usize, radius: f32) -> bool {
        let Some(cone) = self.limit_cones.get_mut(index) else {
            return false;
        };
        cone.set_radius(radius);
        self.update_tangent_radii();
        true
    }

    pub fn set_cone_cushion(&mut self, index: usize, cushion: f32) -> bool {
        let Some(cone) = self.limit_cones.get_mut(index) else {
            return false;
        };
        cone.set_cushion(cushion);
        self.update_tangent_radii();
        true
    }

    /// 重新计算相邻锥之间的切圆（最后一个锥不保存切圆）
    pub fn update_tangent_radii(&mut self) {
        for i in 0..self.limit_cones.len() {
            let (head, tail) = self.limit_cones.split_at_mut(i + 1);
            head[i].update_tangent_handles(tail.first());
        }
    }

    /// 是否有锥设置了缓冲
    pub fn has_cushion(&self) -> bool {
        self.limit_cones.iter().any(|c| c.cushion() < 1.0)
    }

    // ========================================================================
    // 扭转
    // ========================================================================

    #[inline]
    pub fn twist_from(&self) -> f32 {
        self.twist_from
    }

    #[inline]
    pub fn twist_range(&self) -> f32 {
        self.twist_range
    }

    /// 设置扭转区间 [from, from + range)
    pub fn set_twist(&mut self, from: f32, range: f32) {
        self.twist_from = to_tau(from);
        self.twist_range = range.clamp(0.0, TAU);
    }

    /// 扭转角是否在允许区间内（模 2π）
    pub fn is_twist_in_range(&self, angle: f32) -> bool {
        to_tau(angle - self.twist_from) < self.twist_range
    }

    /// 把扭转角夹到区间内，越界时取圆周距离较近的端点
    pub fn clamp_twist(&self, angle: f32) -> f32 {
        let angle = to_tau(angle);
        if self.is_twist_in_range(angle) {
            return angle;
        }
        let offset = to_tau(angle - self.twist_from);
        let past_end = offset - self.twist_range;
        let before_start = TAU - offset;
        if past_end < before_start {
            to_tau(self.twist_from + self.twist_range)
        } else {
            self.twist_from
        }
    }

    /// 扭转角 → 区间内的比例 [0, 1]
    pub fn twist_fraction(&self, angle: f32) -> f32 {
        if self.twist_range <= EPSILON {
            return 0.0;
        }
        let offset = to_tau(angle - self.twist_from);
        if offset <= self.twist_range {
            return offset / self.twist_range;
        }
        // 区间外：归到较近端点
        if offset - self.twist_range < TAU - offset {
            1.0
        } else {
            0.0
        }
    }

    /// 当前本地旋转的扭转比例
    pub fn get_current_twist_rotation(&self, local: Quat, frame: &ConstraintFrame) -> f32 {
        let relative = frame.to_constraint_space(local);
        let (_, twist) = swing_twist(relative, Vec3::Y);
        self.twist_fraction(twist_angle(twist, Vec3::Y))
    }

    /// 按比例设置扭转，保持摆动不变，返回新的本地旋转
    pub fn set_current_twist_rotation(&self, local: Quat, frame: &ConstraintFrame, fraction: f32) -> Quat {
        let relative = frame.to_constraint_space(local);
        let (swing, _) = swing_twist(relative, Vec3::Y);
        let angle = self.twist_from + fraction.clamp(0.0, 1.0) * self.twist_range;
        let twist = Quat::from_axis_angle(Vec3::Y, angle);
        frame.to_local(swing * twist)
    }

    // ========================================================================
    // 摆动
    // ========================================================================

    /// 方向是否在锥序列允许的区域内（空序列不限制）
    pub fn is_in_limits(&self, direction: Vec3) -> bool {
        self.rectify(direction, false).is_none()
    }

    /// 返回允许区域内离 `direction` 最近的方向
    pub fn point_in_limits(&self, direction: Vec3) -> Vec3 {
        self.rectify(direction, false).unwrap_or(direction)
    }

    /// 越界时返回最近的合法方向
    fn rectify(&self, direction: Vec3, cushion: bool) -> Option<Vec3> {
        self.rectify_indexed(direction, cushion).map(|(point, _)| point)
    }

    /// 越界时返回最近的合法方向，以及给出该方向的锥（或锥对）的索引
    ///
    /// 先检查是否有任一相邻锥对接受该方向；都不接受时，
    /// 在所有候选修正点中取与输入余弦最大的一个。
    fn rectify_indexed(&self, direction: Vec3, cushion: bool) -> Option<(Vec3, usize)> {
        match self.limit_cones.as_slice() {
            [] => None,
            [single] => boundary(single, cushion)
                .closest_collision(None, direction)
                .map(|point| (point, 0)),
            cones => {
                let in_bounds = cones.windows(2).any(|pair| {
                    let next = boundary(&pair[1], cushion);
                    boundary(&pair[0], cushion)
                        .classify(Some(&next), direction)
                        .is_in_bounds()
                });
                if in_bounds {
                    return None;
                }

                let mut best: Option<(Vec3, usize)> = None;
                let mut best_cos = f32::NEG_INFINITY;
                for (index, pair) in cones.windows(2).enumerate() {
                    let next = boundary(&pair[1], cushion);
                    let Some(candidate) = boundary(&pair[0], cushion).closest_collision(Some(&next), direction) else {
                        continue;
                    };
                    let cos = candidate.dot(direction);
                    if cos > best_cos {
                        best_cos = cos;
                        best = Some((candidate, index));
                    }
                }
                best
            }
        }
    }

    /// 缓冲区软化：在缓冲边界与硬边界之间按深度把方向拉回缓冲边界
    fn soften(&self, direction: Vec3) -> Vec3 {
        let Some((cushion_point, index)) = self.rectify_indexed(direction, true) else {
            return direction;
        };

        let band = self.cushion_band(index, cushion_point);
        if band <= EPSILON {
            return direction;
        }
        let depth = (angle_between(direction, cushion_point) / band).clamp(0.0, 1.0);
        slerp_direction(direction, cushion_point, 0.5 * depth)
    }

    /// 缓冲点所在边界的缓冲带宽度（弧度）
    ///
    /// 缓冲点落在某个锥的缓冲圆上时取该锥的带宽；
    /// 落在切圆上时取缓冲切圆与硬切圆的半径差。
    fn cushion_band(&self, index: usize, cushion_point: Vec3) -> f32 {
        for cone in self.limit_cones.iter().skip(index).take(2) {
            let offset = angle_between(cushion_point, cone.control_point()) - cone.cushion_radius();
            if offset.abs() <= BAND_MATCH_TOLERANCE {
                return cone.radius() - cone.cushion_radius();
            }
        }
        self.limit_cones
            .get(index)
            .and_then(|cone| cone.tangent_handles())
            .map_or(0.0, |handles| handles.cushion_boundary.radius - handles.hard_boundary.radius)
    }

    // ========================================================================
    // 约束
    // ========================================================================

    /// 把候选本地旋转约束到允许范围内
    ///
    /// 1. 换算到约束空间并做摆动/扭转分解（扭转轴 +Y）
    /// 2. 摆动方向按锥序列修正（`soft` 时缓冲区软化）
    /// 3. 扭转角夹到 [from, from + range)
    /// 4. 重新组合并换回本地空间
    pub fn constrain_orientation(&self, candidate: Quat, frame: &ConstraintFrame, soft: bool) -> Quat {
        let relative = frame.to_constraint_space(candidate);
        let (mut swing, mut twist) = swing_twist(relative, Vec3::Y);

        if self.flags.contains(ConstraintFlags::ORIENTATIONAL) && !self.limit_cones.is_empty() {
            let direction = (swing * Vec3::Y).normalize();
            let mut limited = self.point_in_limits(direction);
            if soft && self.has_cushion() {
                limited = self.soften(limited);
            }
            if (limited - direction).length_squared() > EPSILON * EPSILON {
                swing = (Quat::from_rotation_arc(direction, limited) * swing).normalize();
            }
        }

        if self.flags.contains(ConstraintFlags::AXIAL) {
            let angle = twist_angle(twist, Vec3::Y);
            if !self.is_twist_in_range(angle) {
                twist = Quat::from_axis_angle(Vec3::Y, self.clamp_twist(angle));
            }
        }

        frame.to_local(swing * twist)
    }
}

fn boundary(cone: &LimitCone, cushion: bool) -> ConeBoundary<'_> {
    if cushion {
        cone.cushion_boundary()
    } else {
        cone.hard_boundary()
    }
}
