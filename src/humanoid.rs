//! 人形骨骼约束预设
//!
//! 骨骼名与常见人形骨骼配置一致（Hips, Spine, LeftUpperArm ...）。
//! 锥轴在约束空间中给出：+Y 为骨骼静止方向，+Z 为模型前方。

use glam::Vec3;
use once_cell::sync::Lazy;

use crate::config::ConstraintConfig;

/// 扭转区间以 0 为中心、半宽 `half_deg`
fn centered_twist(config: ConstraintConfig, half_deg: f32) -> ConstraintConfig {
    config.with_twist(-half_deg.to_radians(), 2.0 * half_deg.to_radians())
}

fn preset(name: &str, half_twist_deg: f32, cones: &[(Vec3, f32)]) -> ConstraintConfig {
    let mut config = centered_twist(ConstraintConfig::new(name), half_twist_deg);
    for &(center, radius_deg) in cones {
        config = config.with_cone(center, radius_deg.to_radians());
    }
    config
}

const FRONT: Vec3 = Vec3::new(0.0, 0.0, 1.0);
const REAR: Vec3 = Vec3::new(0.0, 0.0, -1.0);
const FRONT_UP: Vec3 = Vec3::new(0.0, 0.5, 0.866);

/// 人形约束预设表
pub static HUMANOID_PRESETS: Lazy<Vec<ConstraintConfig>> = Lazy::new(|| {
    let mut presets = vec![
        // ====== 躯干 ======
        preset("Hips", 30.0, &[(Vec3::Y, 30.0)]),
        preset("Spine", 20.0, &[(Vec3::Y, 25.0)]),
        preset("Chest", 15.0, &[(Vec3::Y, 20.0)]),
        preset("UpperChest", 10.0, &[(Vec3::Y, 15.0)]),
        preset("Neck", 40.0, &[(Vec3::Y, 30.0)]),
        preset("Head", 50.0, &[(Vec3::Y, 35.0)]),
    ];

    for side in ["Left", "Right"] {
        presets.extend([
            // ====== 上肢 ======
            preset(&format!("{side}Shoulder"), 10.0, &[(Vec3::Y, 15.0)]),
            preset(&format!("{side}UpperArm"), 70.0, &[(Vec3::Y, 50.0), (FRONT_UP, 40.0)]),
            // 肘：两个小锥构成铰链弧
            preset(&format!("{side}LowerArm"), 80.0, &[(Vec3::Y, 10.0), (FRONT, 10.0)]),
            preset(&format!("{side}Hand"), 20.0, &[(Vec3::Y, 50.0)]),
            // ====== 下肢 ======
            preset(&format!("{side}UpperLeg"), 40.0, &[(Vec3::Y, 45.0), (FRONT_UP, 35.0)]),
            // 膝：向后弯
            preset(&format!("{side}LowerLeg"), 10.0, &[(Vec3::Y, 10.0), (REAR, 10.0)]),
            preset(&format!("{side}Foot"), 15.0, &[(Vec3::Y, 30.0)]),
        ]);
    }
    presets
});

/// 按骨骼名查找预设
pub fn find_preset(bone_name: &str) -> Option<&'static ConstraintConfig> {
    HUMANOID_PRESETS.iter().find(|p| p.bone_name == bone_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        for config in HUMANOID_PRESETS.iter() {
            let mut warnings = Vec::new();
            let kusudama = config.build(&mut warnings);
            assert!(warnings.is_empty(), "{}", config.bone_name);
            assert!(!kusudama.limit_cones().is_empty());
            // 静止方向总是允许的
            assert!(kusudama.is_in_limits(Vec3::Y), "{}", config.bone_name);
        }
    }

    #[test]
    fn test_mirrored_sides() {
        assert!(find_preset("LeftLowerArm").is_some());
        assert!(find_preset("RightLowerArm").is_some());
        assert!(find_preset("Tail").is_none());
    }
}
