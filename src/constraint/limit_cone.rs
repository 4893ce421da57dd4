//! 限制锥 - 单个球冠约束及其到下一个锥的切圆路径
//!
//! 约定：
//! - 所有方向向量都是单位向量（在约束空间中）
//! - 切圆只在“本锥 → 下一锥”之间计算，存储在本锥上
//! - 硬边界与缓冲（cushion）边界各存一份完整切圆数据

use glam::Vec3;
use std::f32::consts::PI;

use crate::math::{get_orthogonal, rotate_toward, Ray3, BOUNDARY_EPSILON, EPSILON};

/// 方向相对于“本锥 → 下一锥”的位置分类
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundsClass {
    /// 严格位于本锥内
    InThisCone,
    /// 严格位于下一锥内
    InNextCone,
    /// 位于两锥之间由切圆界定的路径内
    InPath,
    /// 恰好位于锥边界上（容差内）
    OnBoundary,
    /// 越界
    OutOfBounds,
}

impl BoundsClass {
    /// 除 OutOfBounds 外都视为允许
    #[inline]
    pub fn is_in_bounds(self) -> bool {
        self != BoundsClass::OutOfBounds
    }
}

/// 与两个相邻锥同时相切的一对切圆
#[derive(Clone, Copy, Debug)]
pub struct TangentCircle {
    /// 位于 `本锥轴 × 下一锥轴` 负侧的切圆中心
    pub center1: Vec3,
    /// 位于正侧的切圆中心
    pub center2: Vec3,
    /// 切圆半径（弧度）
    pub radius: f32,
    /// 切圆半径余弦
    pub radius_cos: f32,
    /// 两锥轴平行/反向或不存在切圆时的退化结果
    pub degenerate: bool,
}

impl TangentCircle {
    /// 计算与半径为 `radius_a`、`radius_b` 的两个锥同时相切的切圆
    ///
    /// 切圆半径取 (π - (ra + rb)) / 2：两锥半径和为 0 时切圆覆盖半球，
    /// 半径和为 π 时切圆消失。
    pub fn between(a: Vec3, radius_a: f32, b: Vec3, radius_b: f32) -> Self {
        let tangent_radius = ((PI - (radius_a + radius_b)) * 0.5).max(0.0);
        let radius_cos = tangent_radius.cos();

        let arc_normal = a.cross(b);
        if arc_normal.length_squared() < EPSILON {
            return Self::degenerate_for(a, tangent_radius);
        }

        // 切圆中心 T 满足 T·A = cos(ra + tr), T·B = cos(rb + tr), |T| = 1
        let cos_a = (radius_a + tangent_radius).cos();
        let cos_b = (radius_b + tangent_radius).cos();
        let c = a.dot(b);
        let denominator = 1.0 - c * c;
        let alpha = (cos_a - c * cos_b) / denominator;
        let beta = (cos_b - c * cos_a) / denominator;
        let on_plane = a * alpha + b * beta;

        let ray = Ray3::new(on_plane, on_plane + arc_normal.normalize());
        match ray.intersects_sphere(Vec3::ZERO, 1.0) {
            Some((first, second)) => {
                let (Some(center1), Some(center2)) = (first.try_normalize(), second.try_normalize()) else {
                    return Self::degenerate_for(a, tangent_radius);
                };
                Self {
                    center1,
                    center2,
                    radius: tangent_radius,
                    radius_cos,
                    degenerate: false,
                }
            }
            // 一个锥包含另一个锥，没有切圆
            None => Self::degenerate_for(a, tangent_radius),
        }
    }

    fn degenerate_for(a: Vec3, radius: f32) -> Self {
        let center1 = get_orthogonal(a).try_normalize().unwrap_or(Vec3::X);
        Self {
            center1,
            center2: -center1,
            radius,
            radius_cos: radius.cos(),
            degenerate: true,
        }
    }
}

/// 本锥到下一锥的切圆（硬边界与缓冲边界）
#[derive(Clone, Copy, Debug)]
pub struct TangentHandles {
    pub hard_boundary: TangentCircle,
    pub cushion_boundary: TangentCircle,
}

/// 某一边界模式下的锥视图
#[derive(Clone, Copy, Debug)]
pub struct ConeBoundary<'a> {
    pub control_point: Vec3,
    pub radius: f32,
    pub radius_cos: f32,
    pub tangent: Option<&'a TangentCircle>,
}

impl<'a> ConeBoundary<'a> {
    /// 分类单位向量 `input`
    ///
    /// 只使用点积与叉积；`input` 必须已归一化。
    pub fn classify(&self, next: Option<&ConeBoundary<'_>>, input: Vec3) -> BoundsClass {
        let this_cos = self.control_point.dot(input);
        if this_cos > self.radius_cos + BOUNDARY_EPSILON {
            return BoundsClass::InThisCone;
        }

        let next_cos = next.map(|n| n.control_point.dot(input));
        if let (Some(next), Some(next_cos)) = (next, next_cos) {
            if next_cos > next.radius_cos + BOUNDARY_EPSILON {
                return BoundsClass::InNextCone;
            }
        }

        if let (Some(next), Some(tangent)) = (next, self.tangent) {
            if !tangent.degenerate && self.in_path(next, tangent, input) {
                return BoundsClass::InPath;
            }
        }

        let on_this = (this_cos - self.radius_cos).abs() <= BOUNDARY_EPSILON;
        let on_next = match (next, next_cos) {
            (Some(next), Some(next_cos)) => (next_cos - next.radius_cos).abs() <= BOUNDARY_EPSILON,
            _ => false,
        };
        if on_this || on_next {
            BoundsClass::OnBoundary
        } else {
            BoundsClass::OutOfBounds
        }
    }

    /// 是否位于两锥之间、切圆之外的路径区域
    fn in_path(&self, next: &ConeBoundary<'_>, tangent: &TangentCircle, input: Vec3) -> bool {
        // 切圆边界本身属于路径
        let inside_cos = tangent.radius_cos + BOUNDARY_EPSILON;
        if tangent.center1.dot(input) > inside_cos || tangent.center2.dot(input) > inside_cos {
            return false;
        }
        let c1 = self.control_point;
        let c2 = next.control_point;
        if input.dot(c1.cross(c2)) < 0.0 {
            let t1 = tangent.center1;
            input.dot(c1.cross(t1)) > 0.0 && input.dot(t1.cross(c2)) > 0.0
        } else {
            let t2 = tangent.center2;
            input.dot(t2.cross(c1)) > 0.0 && input.dot(c2.cross(t2)) > 0.0
        }
    }

    /// 大切线三角形内的修正
    ///
    /// - None：不在三角形区域内，无法用切圆修正
    /// - Some(input)：在三角形内且在切圆外，已合法
    /// - Some(p)：在切圆内，被推到切圆边界上的最近点
    pub fn on_great_tangent_triangle(&self, next: &ConeBoundary<'_>, input: Vec3) -> Option<Vec3> {
        let tangent = self.tangent?;
        if tangent.degenerate {
            return None;
        }
        let c1 = self.control_point;
        let c2 = next.control_point;

        let center = if input.dot(c1.cross(c2)) < 0.0 {
            let t1 = tangent.center1;
            if input.dot(c1.cross(t1)) > 0.0 && input.dot(t1.cross(c2)) > 0.0 {
                t1
            } else {
                return None;
            }
        } else {
            let t2 = tangent.center2;
            if input.dot(t2.cross(c1)) > 0.0 && input.dot(c2.cross(t2)) > 0.0 {
                t2
            } else {
                return None;
            }
        };

        if input.dot(center) > tangent.radius_cos {
            Some(rotate_toward(center, input, tangent.radius))
        } else {
            Some(input)
        }
    }

    /// 把 `input` 夹到本锥边界上；已在锥内时返回 None
    pub fn closest_to_cone(&self, input: Vec3) -> Option<Vec3> {
        if input.dot(self.control_point) >= self.radius_cos - BOUNDARY_EPSILON {
            return None;
        }
        Some(rotate_toward(self.control_point, input, self.radius))
    }

    /// 两锥中较近一侧的边界点；已在任一锥内时返回 None
    ///
    /// 等距时取控制点与输入点积较大的锥，再相同则取本锥。
    pub fn closest_point_on_closest_cone(&self, next: &ConeBoundary<'_>, input: Vec3) -> Option<Vec3> {
        let to_this = self.closest_to_cone(input)?;
        let to_next = next.closest_to_cone(input)?;
        let cos_this = input.dot(to_this);
        let cos_next = input.dot(to_next);
        if (cos_this - cos_next).abs() <= BOUNDARY_EPSILON {
            if input.dot(next.control_point) > input.dot(self.control_point) {
                return Some(to_next);
            }
            return Some(to_this);
        }
        if cos_this > cos_next {
            Some(to_this)
        } else {
            Some(to_next)
        }
    }

    /// 越界时返回最近的合法边界点，合法时返回 None
    pub fn closest_collision(&self, next: Option<&ConeBoundary<'_>>, input: Vec3) -> Option<Vec3> {
        if self.classify(next, input).is_in_bounds() {
            return None;
        }
        match next {
            Some(next) => {
                if let Some(on_triangle) = self.on_great_tangent_triangle(next, input) {
                    return Some(on_triangle);
                }
                self.closest_point_on_closest_cone(next, input)
            }
            None => self.closest_to_cone(input),
        }
    }
}

/// 限制锥
#[derive(Clone, Debug)]
pub struct LimitCone {
    control_point: Vec3,
    radius: f32,
    radius_cos: f32,
    cushion: f32,
    cushion_radius: f32,
    cushion_cos: f32,
    /// 到下一锥的切圆；序列最后一个锥或单锥时为 None
    tangent: Option<TangentHandles>,
}

impl LimitCone {
    /// 创建硬边界限制锥
    pub fn new(direction: Vec3, radius: f32) -> Self {
        Self::with_cushion(direction, radius, 1.0)
    }

    /// 创建带缓冲的限制锥
    ///
    /// `cushion` ∈ [0, 1]：1 为硬边界，越小越早开始减速。
    pub fn with_cushion(direction: Vec3, radius: f32, cushion: f32) -> Self {
        let mut cone = Self {
            control_point: Vec3::Y,
            radius: 0.0,
            radius_cos: 1.0,
            cushion: 1.0,
            cushion_radius: 0.0,
            cushion_cos: 1.0,
            tangent: None,
        };
        cone.set_control_point(direction);
        cone.set_radius(radius);
        cone.set_cushion(cushion);
        cone
    }

    #[inline]
    pub fn control_point(&self) -> Vec3 {
        self.control_point
    }

    /// 设置锥轴（零向量视为 +Y，始终归一化）
    pub fn set_control_point(&mut self, direction: Vec3) {
        self.control_point = direction.try_normalize().unwrap_or(Vec3::Y);
    }

    #[inline]
    pub fn radius(&self) -> f32 {
        self.radius
    }

    #[inline]
    pub fn radius_cos(&self) -> f32 {
        self.radius_cos
    }

    /// 设置半角（弧度），至少为一个极小正数
    pub fn set_radius(&mut self, radius: f32) {
        self.radius = radius.clamp(f32::MIN_POSITIVE, PI);
        self.radius_cos = self.radius.cos();
        self.update_cushion();
    }

    #[inline]
    pub fn cushion(&self) -> f32 {
        self.cushion
    }

    #[inline]
    pub fn cushion_radius(&self) -> f32 {
        self.cushion_radius
    }

    pub fn set_cushion(&mut self, cushion: f32) {
        self.cushion = cushion.clamp(0.0, 1.0);
        self.update_cushion();
    }

    fn update_cushion(&mut self) {
        self.cushion_radius = self.radius * self.cushion;
        self.cushion_cos = self.cushion_radius.cos();
    }

    #[inline]
    pub fn tangent_handles(&self) -> Option<&TangentHandles> {
        self.tangent.as_ref()
    }

    /// 重新计算到下一锥的切圆（None 表示本锥是序列末尾）
    pub fn update_tangent_handles(&mut self, next: Option<&LimitCone>) {
        self.tangent = next.map(|next| TangentHandles {
            hard_boundary: TangentCircle::between(
                self.control_point,
                self.radius,
                next.control_point,
                next.radius,
            ),
            cushion_boundary: TangentCircle::between(
                self.control_point,
                self.cushion_radius,
                next.control_point,
                next.cushion_radius,
            ),
        });
    }

    /// 硬边界视图
    pub fn hard_boundary(&self) -> ConeBoundary<'_> {
        ConeBoundary {
            control_point: self.control_point,
            radius: self.radius,
            radius_cos: self.radius_cos,
            tangent: self.tangent.as_ref().map(|t| &t.hard_boundary),
        }
    }

    /// 缓冲边界视图
    pub fn cushion_boundary(&self) -> ConeBoundary<'_> {
        ConeBoundary {
            control_point: self.control_point,
            radius: self.cushion_radius,
            radius_cos: self.cushion_cos,
            tangent: self.tangent.as_ref().map(|t| &t.cushion_boundary),
        }
    }

    /// 分类单位方向 `input`（相对本锥与下一锥）
    ///
    /// `input` 必须已归一化，这里不再检查。
    pub fn determine_if_in_bounds(&self, next: Option<&LimitCone>, input: Vec3) -> BoundsClass {
        let next = next.map(|n| n.hard_boundary());
        self.hard_boundary().classify(next.as_ref(), input)
    }

    /// 越界时返回最近的合法边界点，合法时返回 None
    pub fn get_closest_collision(&self, next: Option<&LimitCone>, input: Vec3) -> Option<Vec3> {
        let next = next.map(|n| n.hard_boundary());
        self.hard_boundary().closest_collision(next.as_ref(), input)
    }

    /// 见 [`ConeBoundary::on_great_tangent_triangle`]
    pub fn get_on_great_tangent_triangle(&self, next: &LimitCone, input: Vec3) -> Option<Vec3> {
        self.hard_boundary().on_great_tangent_triangle(&next.hard_boundary(), input)
    }

    /// 把 `input` 夹到本锥边界；已在锥内时返回 None
    pub fn closest_to_cone(&self, input: Vec3) -> Option<Vec3> {
        self.hard_boundary().closest_to_cone(input)
    }
}
