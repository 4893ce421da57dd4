//! 加权朝向对齐（Wahba 问题）
//!
//! 求旋转 R 使 Σ wᵢ |R·tipᵢ - targetᵢ|² 最小。
//! 对加权互协方差矩阵做 SVD（Kabsch），秩不足时退化为最小弧旋转。

use glam::{Mat3, Quat, Vec3};
use nalgebra::{Matrix3, Vector3};

use super::EPSILON;

/// SVD 最大迭代次数
const MAX_SVD_ITERATIONS: usize = 64;

/// 秩判定阈值（相对最大奇异值）
const RANK_TOLERANCE: f32 = 1.0e-5;

#[inline]
fn to_na(v: Vec3) -> Vector3<f32> {
    Vector3::new(v.x, v.y, v.z)
}

#[inline]
fn column(m: &Matrix3<f32>, i: usize) -> Vec3 {
    Vec3::new(m[(0, i)], m[(1, i)], m[(2, i)])
}

/// 求把 `tips` 对齐到 `targets` 的最优旋转
///
/// 三个切片长度必须一致（多余部分被忽略）。总权重为零、
/// 输入非有限或矩阵退化时返回单位四元数，绝不产生 NaN。
pub fn weighted_superpose(tips: &[Vec3], targets: &[Vec3], weights: &[f32]) -> Quat {
    let mut covariance = Matrix3::<f32>::zeros();
    let mut total_weight = 0.0_f32;

    for ((tip, target), &weight) in tips.iter().zip(targets.iter()).zip(weights.iter()) {
        if weight <= 0.0 || !tip.is_finite() || !target.is_finite() {
            continue;
        }
        covariance += to_na(*tip) * to_na(*target).transpose() * weight;
        total_weight += weight;
    }

    if total_weight <= EPSILON {
        return Quat::IDENTITY;
    }

    let Some(svd) = covariance.try_svd(true, true, f32::EPSILON, MAX_SVD_ITERATIONS) else {
        return Quat::IDENTITY;
    };
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Quat::IDENTITY;
    };
    let s = svd.singular_values;

    // 奇异值不保证有序，手动找最大/中间/最小
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| s[b].partial_cmp(&s[a]).unwrap_or(std::cmp::Ordering::Equal));
    let (max_i, mid_i, min_i) = (order[0], order[1], order[2]);

    if s[max_i] <= EPSILON {
        return Quat::IDENTITY;
    }

    let v = v_t.transpose();

    if s[mid_i] <= s[max_i] * RANK_TOLERANCE {
        // 单一朝向：取最小弧，避免绕朝向轴的任意扭转
        let from = column(&u, max_i).normalize_or_zero();
        let to = column(&v, max_i).normalize_or_zero();
        if from == Vec3::ZERO || to == Vec3::ZERO {
            return Quat::IDENTITY;
        }
        return Quat::from_rotation_arc(from, to);
    }

    let mut correction = Matrix3::<f32>::identity();
    if (v * u.transpose()).determinant() < 0.0 {
        correction[(min_i, min_i)] = -1.0;
    }
    let r = v * correction * u.transpose();

    let rotation = Mat3::from_cols(column(&r, 0), column(&r, 1), column(&r, 2));
    let q = Quat::from_mat3(&rotation);
    if !q.is_finite() || q.length_squared() < EPSILON {
        return Quat::IDENTITY;
    }
    q.normalize()
}
