//! The building and robot models shared by the showcase and model scenes.

use glam::Vec3;

use crate::assets::{MaterialOverride, ModelRequest, z_up_to_y_up};
use crate::mesh::Transform;
use crate::viewer::MountContext;

pub const BUILDING: &str = "models/F4.glb";
pub const ENVIRONMENT: &str = "textures/qwantani_dusk_2_puresky_1k.hdr";

/// A robot placed in the robot group's Z-up frame.
#[derive(Clone, Copy, Debug)]
pub struct RobotModel {
    pub path: &'static str,
    pub position: Vec3,
    /// Frame the camera on this robot once it loads.
    pub focus: bool,
}

pub const ROBOTS: [RobotModel; 3] = [
    RobotModel {
        path: "models/g1-opt.glb",
        position: Vec3::new(0.0, 0.0, 0.8),
        focus: true,
    },
    RobotModel {
        path: "models/x30-opt.glb",
        position: Vec3::new(0.0, -1.0, 0.66),
        focus: false,
    },
    RobotModel {
        path: "models/go2-opt.glb",
        position: Vec3::new(0.0, 1.0, 0.46),
        focus: false,
    },
];

/// Where the robot group stands in the scene.
const ROBOT_GROUP_POSITION: Vec3 = Vec3::new(22.0, 0.0, -12.0);

/// The glass facade mesh of the building.
const GLASS_MESH: &str = "网格002";

/// Queues the building and the robots. Everything is released with the
/// mount scope.
pub fn load_site(ctx: &mut MountContext<'_>) {
    let building = ModelRequest::new()
        .with_override(MaterialOverride::all().metal_rough(0.0, 1.0))
        .with_override(MaterialOverride::named(GLASS_MESH).metal_rough(0.4, 0.0));
    let path = ctx.asset_path(BUILDING);
    ctx.load_model(path, building);

    let root = ctx.scene.root();
    let group = ctx.scene.add_group(
        root,
        "robotGroup",
        Transform::from_matrix(z_up_to_y_up()).position(ROBOT_GROUP_POSITION),
    );
    ctx.track(group);

    for robot in ROBOTS {
        let mut request = ModelRequest::new()
            .under(group)
            .transform(Transform::from_position(robot.position));
        if robot.focus {
            request = request.fit_camera();
        }
        let path = ctx.asset_path(robot.path);
        ctx.load_model(path, request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn robot_group_stands_upright() {
        let transform = Transform::from_matrix(z_up_to_y_up()).position(ROBOT_GROUP_POSITION);
        let up = transform.matrix().transform_vector3(Vec3::Z);
        assert!((up - Vec3::Y).length() < 1e-5);
        let g1 = transform.matrix().transform_point3(ROBOTS[0].position);
        assert!((g1 - Vec3::new(22.0, 0.8, -12.0)).length() < 1e-5);
    }

    #[test]
    fn exactly_one_robot_frames_the_camera() {
        assert_eq!(ROBOTS.iter().filter(|r| r.focus).count(), 1);
    }
}
