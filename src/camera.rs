use core::f32::consts::TAU;

use crate::{CharacterControllerState, input::RotateCamera, prelude::*};

pub(super) fn plugin(app: &mut App) {
    app.add_systems(
        RunFixedMainLoop,
        sync_camera_transform.after(TransformEasingSystems::UpdateEasingTick),
    )
    .add_observer(rotate_camera);
}

#[derive(Component, Clone, Copy)]
#[relationship(relationship_target = CharacterControllerCamera)]
#[require(ViewHeight)]
pub struct CharacterControllerCameraOf(pub Entity);

#[derive(Component, Clone, Copy)]
#[relationship_target(relationship = CharacterControllerCameraOf)]
pub struct CharacterControllerCamera(Entity);

impl CharacterControllerCamera {
    pub fn get(self) -> Entity {
        self.0
    }
}

/// Eye height above the character's feet, blended between standing and crouching.
#[derive(Component, Clone, Copy, Reflect, Debug, Default, PartialEq)]
#[reflect(Component)]
pub struct ViewHeight(pub Option<f32>);

/// Move `current` toward `target`, covering `full_range` in `blend_duration` seconds.
fn blend_view_height(current: f32, target: f32, full_range: f32, blend_duration: f32, dt: f32) -> f32 {
    if blend_duration <= 0.0 {
        return target;
    }
    let max_step = full_range.abs() / blend_duration * dt;
    current + (target - current).clamp(-max_step, max_step)
}

pub(crate) fn sync_camera_transform(
    mut cameras: Query<
        (&mut Transform, &mut ViewHeight, &CharacterControllerCameraOf),
        (Without<CharacterControllerState>,),
    >,
    kccs: Query<(&Transform, &CharacterController, &CharacterControllerState)>,
    time: Res<Time>,
) {
    // Can't use GlobalTransform directly: outdated -> jitter
    for (mut camera_transform, mut view_height, camera_of) in cameras.iter_mut() {
        let Ok((kcc_transform, cfg, state)) = kccs.get(camera_of.0) else {
            continue;
        };
        let target = if state.is_crouching() {
            cfg.crouch_view_height
        } else {
            cfg.standing_view_height
        };
        let height = match view_height.0 {
            Some(current) => blend_view_height(
                current,
                target,
                cfg.standing_view_height - cfg.crouch_view_height,
                cfg.crouch_blend_duration,
                time.delta_secs(),
            ),
            None => target,
        };
        view_height.0 = Some(height);
        // The transform stays where the standing capsule's center is, whatever the collider.
        let feet = kcc_transform.translation - Vec3::Y * cfg.initial_capsule_half_height();
        camera_transform.translation = feet + Vec3::Y * height;
    }
}

fn rotate_camera(
    rotate: On<Fire<RotateCamera>>,
    cameras: Query<&CharacterControllerCamera>,
    mut transforms: Query<&mut Transform>,
) {
    let Ok(camera) = cameras.get(rotate.context) else {
        return;
    };
    let Ok(mut transform) = transforms.get_mut(camera.get()) else {
        return;
    };
    let (mut yaw, mut pitch, _) = transform.rotation.to_euler(EulerRot::YXZ);

    let delta = -rotate.value;
    yaw += delta.x.to_radians();
    pitch += delta.y.to_radians();
    pitch = pitch.clamp(-TAU / 4.0 + 0.01, TAU / 4.0 - 0.01);

    transform.rotation = Quat::from_euler(EulerRot::YXZ, yaw, pitch, 0.0);
}
