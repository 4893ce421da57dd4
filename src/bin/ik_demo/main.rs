//! IK 演示 - 肩 / 上臂 / 前臂 / 手，手部 Pin 追踪一个绕圈的目标

use glam::{Mat4, Vec3};
use kusudama_ik::{BoneTransform, ConstraintConfig, IkConfig, IkSolver, PinConfig, SkeletonDesc};

fn build_arm() -> SkeletonDesc {
    let mut desc = SkeletonDesc::new();
    let shoulder = desc.add_bone("LeftShoulder", None, BoneTransform::default());
    let upper = desc.add_bone(
        "LeftUpperArm",
        Some(shoulder),
        BoneTransform::from_translation(Vec3::new(0.0, 0.2, 0.0)),
    );
    let lower = desc.add_bone(
        "LeftLowerArm",
        Some(upper),
        BoneTransform::from_translation(Vec3::new(0.0, 0.3, 0.0)),
    );
    desc.add_bone("LeftHand", Some(lower), BoneTransform::from_translation(Vec3::new(0.0, 0.25, 0.0)));
    desc
}

fn main() -> kusudama_ik::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let skeleton = build_arm();
    let mut pose: Vec<BoneTransform> = skeleton.bones.iter().map(|b| b.rest).collect();

    let mut solver = IkSolver::new(IkConfig {
        iterations_per_frame: 30,
        debug_log: true,
        ..Default::default()
    });
    solver.set_skeleton(skeleton)?;
    solver.add_pin(PinConfig::new("LeftHand").with_direction_priorities(Vec3::ZERO));
    // 肘部：两个小锥组成铰链
    solver.add_constraint(
        ConstraintConfig::new("LeftLowerArm")
            .with_twist(-0.5, 1.0)
            .with_cone(Vec3::Y, 10.0_f32.to_radians())
            .with_cone(Vec3::Z, 10.0_f32.to_radians()),
    );
    let added = solver.setup_humanoid_constraints();
    log::info!("[demo] 追加人形预设 {} 个", added);

    for frame in 0..8 {
        let angle = frame as f32 * std::f32::consts::TAU / 8.0;
        let target = Vec3::new(0.3 * angle.cos(), 0.45, 0.3 * angle.sin());
        solver.solve(&mut pose, &[Mat4::from_translation(target)][..])?;

        let hand = solver.bone_global("LeftHand").map(|m| m.col(3).truncate()).unwrap_or(Vec3::ZERO);
        log::info!(
            "[demo] frame {}: target {:.3?} hand {:.3?} error {:.4}",
            frame,
            target,
            hand,
            (hand - target).length()
        );
    }

    for warning in solver.warnings() {
        log::warn!("[demo] {}", warning);
    }
    Ok(())
}
