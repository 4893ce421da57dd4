//! 几何基础 - 球面弧、四元数分解、射线求交

mod qcp;
mod ray;

pub use qcp::weighted_superpose;
pub use ray::Ray3;

use glam::{Mat4, Quat, Vec3};
use std::f32::consts::{PI, TAU};

/// 通用浮点容差
pub const EPSILON: f32 = 1.0e-6;

/// 边界判定容差（余弦空间）
pub const BOUNDARY_EPSILON: f32 = 1.0e-5;

/// 返回与输入正交的向量（未归一化）
///
/// 选取绝对值最小分量置零，避免叉积退化。
pub fn get_orthogonal(v: Vec3) -> Vec3 {
    let threshold = v.length() * 0.6;
    if threshold > 0.0 {
        if v.x.abs() <= threshold {
            return Vec3::new(0.0, v.z, -v.y);
        } else if v.y.abs() <= threshold {
            return Vec3::new(-v.z, 0.0, v.x);
        } else {
            return Vec3::new(v.y, -v.x, 0.0);
        }
    }
    Vec3::ZERO
}

/// 角度归一化到 [0, 2π)
pub fn to_tau(angle: f32) -> f32 {
    let mut r = angle % TAU;
    if r < 0.0 {
        r += TAU;
    }
    if r >= TAU {
        r -= TAU;
    }
    r
}

/// 两个单位向量之间的夹角
#[inline]
pub fn angle_between(a: Vec3, b: Vec3) -> f32 {
    a.dot(b).clamp(-1.0, 1.0).acos()
}

/// 绕轴旋转的四元数，轴退化时返回单位四元数
pub fn quat_from_axis_angle_safe(axis: Vec3, angle: f32) -> Quat {
    match axis.try_normalize() {
        Some(axis) => Quat::from_axis_angle(axis, angle),
        None => Quat::IDENTITY,
    }
}

/// 沿大圆把 `from` 朝 `toward` 旋转 `angle` 弧度
///
/// 两者反向时任取一个正交轴。
pub fn rotate_toward(from: Vec3, toward: Vec3, angle: f32) -> Vec3 {
    let mut axis = from.cross(toward);
    if axis.length_squared() < EPSILON * EPSILON {
        axis = get_orthogonal(from);
    }
    quat_from_axis_angle_safe(axis, angle) * from
}

/// 单位向量的球面插值
pub fn slerp_direction(from: Vec3, to: Vec3, t: f32) -> Vec3 {
    if from.dot(to) < -1.0 + EPSILON {
        let total = PI;
        return rotate_toward(from, to, total * t);
    }
    let arc = Quat::from_rotation_arc(from, to);
    (Quat::IDENTITY.slerp(arc, t) * from).normalize_or_zero()
}

/// 四元数转到 w >= 0 的半球（最短路径）
#[inline]
pub fn shortest_path(q: Quat) -> Quat {
    if q.w < 0.0 {
        -q
    } else {
        q
    }
}

/// 旋转角度（弧度，[0, π]）
#[inline]
pub fn rotation_angle(q: Quat) -> f32 {
    let q = shortest_path(q.normalize());
    2.0 * q.w.clamp(-1.0, 1.0).acos()
}

/// 将旋转幅度限制在 `max_angle` 以内，保持旋转轴不变
pub fn clamp_rotation_angle(q: Quat, max_angle: f32) -> Quat {
    let q = shortest_path(q.normalize());
    if max_angle <= 0.0 {
        return Quat::IDENTITY;
    }
    let angle = rotation_angle(q);
    if angle <= max_angle {
        return q;
    }
    let (axis, _) = q.to_axis_angle();
    quat_from_axis_angle_safe(axis, max_angle)
}

/// 摆动/扭转分解：`q = swing * twist`，twist 绕 `axis`
pub fn swing_twist(q: Quat, axis: Vec3) -> (Quat, Quat) {
    let q = q.normalize();
    let r = Vec3::new(q.x, q.y, q.z);
    let projected = axis * r.dot(axis);
    let twist = Quat::from_xyzw(projected.x, projected.y, projected.z, q.w);
    let twist = if twist.length_squared() < EPSILON * EPSILON {
        // 180° 摆动，扭转无定义
        Quat::IDENTITY
    } else {
        shortest_path(twist.normalize())
    };
    let swing = q * twist.inverse();
    (swing.normalize(), twist)
}

/// 绕 `axis` 的扭转角，归一化到 [0, 2π)
pub fn twist_angle(twist: Quat, axis: Vec3) -> f32 {
    let v = Vec3::new(twist.x, twist.y, twist.z);
    to_tau(2.0 * v.dot(axis).atan2(twist.w))
}

/// 从矩阵中取出纯旋转（去除缩放）
#[inline]
pub fn matrix_rotation(m: &Mat4) -> Quat {
    let (_, rotation, _) = m.to_scale_rotation_translation();
    rotation.normalize()
}

/// 矩阵平移分量
#[inline]
pub fn matrix_origin(m: &Mat4) -> Vec3 {
    m.col(3).truncate()
}
