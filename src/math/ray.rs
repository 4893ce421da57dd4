//! 射线 - 用于切圆中心的球面求交

use glam::Vec3;

use super::EPSILON;

/// 由两点定义的射线（p1 为起点，p2 - p1 为方向）
#[derive(Clone, Copy, Debug)]
pub struct Ray3 {
    pub p1: Vec3,
    pub p2: Vec3,
}

impl Ray3 {
    pub fn new(p1: Vec3, p2: Vec3) -> Self {
        Self { p1, p2 }
    }

    /// 射线方向（未归一化）
    #[inline]
    pub fn heading(&self) -> Vec3 {
        self.p2 - self.p1
    }

    /// 参数 t 处的点
    #[inline]
    pub fn point_at(&self, t: f32) -> Vec3 {
        self.p1 + self.heading() * t
    }

    /// 求射线所在直线与球面的两个交点
    ///
    /// 返回值按射线参数升序排列；不相交或方向退化时返回 None。
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> Option<(Vec3, Vec3)> {
        let d = self.heading();
        let a = d.dot(d);
        if a < EPSILON * EPSILON {
            return None;
        }
        let oc = self.p1 - center;
        let b = 2.0 * d.dot(oc);
        let c = oc.dot(oc) - radius * radius;
        let discriminant = b * b - 4.0 * a * c;
        if discriminant < 0.0 {
            return None;
        }
        let root = discriminant.sqrt();
        let t1 = (-b - root) / (2.0 * a);
        let t2 = (-b + root) / (2.0 * a);
        Some((self.point_at(t1), self.point_at(t2)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_sphere_intersection() {
        let ray = Ray3::new(Vec3::new(0.0, 0.0, -5.0), Vec3::new(0.0, 0.0, -4.0));
        let (a, b) = ray.intersects_sphere(Vec3::ZERO, 1.0).unwrap();
        assert!((a - Vec3::new(0.0, 0.0, -1.0)).length() < 1e-5);
        assert!((b - Vec3::new(0.0, 0.0, 1.0)).length() < 1e-5);
    }

    #[test]
    fn test_miss() {
        let ray = Ray3::new(Vec3::new(2.0, 0.0, 0.0), Vec3::new(2.0, 1.0, 0.0));
        assert!(ray.intersects_sphere(Vec3::ZERO, 1.0).is_none());
    }
}
