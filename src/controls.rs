use std::f32::consts::PI;

use glam::Vec3;
use winit::event::MouseButton;

use crate::camera::PerspectiveCamera;
use crate::input::Input;
use crate::mesh::Aabb;

/// Spherical coordinates around a target. `polar` is measured from +Y.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Spherical {
    pub radius: f32,
    pub azimuth: f32,
    pub polar: f32,
}

impl Spherical {
    pub fn from_offset(offset: Vec3) -> Self {
        let radius = offset.length();
        if radius == 0.0 {
            return Self {
                radius,
                azimuth: 0.0,
                polar: 0.0,
            };
        }
        Self {
            radius,
            azimuth: offset.x.atan2(offset.z),
            polar: (offset.y / radius).clamp(-1.0, 1.0).acos(),
        }
    }

    pub fn offset(&self) -> Vec3 {
        let (sin_p, cos_p) = self.polar.sin_cos();
        let (sin_a, cos_a) = self.azimuth.sin_cos();
        Vec3::new(sin_p * sin_a, cos_p, sin_p * cos_a) * self.radius
    }
}

/// Critically damped spring toward `target`, as in Unity's `SmoothDamp`.
pub fn smooth_damp(
    current: f32,
    target: f32,
    velocity: &mut f32,
    smooth_time: f32,
    dt: f32,
) -> f32 {
    if dt <= 0.0 {
        return current;
    }
    let smooth_time = smooth_time.max(1e-4);
    let omega = 2.0 / smooth_time;
    let x = omega * dt;
    let exp = 1.0 / (1.0 + x + 0.48 * x * x + 0.235 * x * x * x);
    let change = current - target;
    let temp = (*velocity + omega * change) * dt;
    *velocity = (*velocity - omega * temp) * exp;
    let mut output = target + (change + temp) * exp;

    // Never overshoot.
    if (target - current > 0.0) == (output > target) {
        output = target;
        *velocity = 0.0;
    }
    output
}

/// Orbit/dolly/pan camera controller with smoothed transitions.
///
/// Input and API calls move a goal pose; [`update`](Self::update) eases the
/// current pose toward it.
#[derive(Clone, Debug)]
pub struct OrbitControls {
    pub min_distance: f32,
    pub max_distance: f32,
    pub min_polar_angle: f32,
    pub max_polar_angle: f32,
    /// Seconds to (approximately) reach the goal.
    pub smooth_time: f32,
    pub dolly_speed: f32,
    /// Radians per pixel of drag.
    pub rotate_speed: f32,
    pub enabled: bool,

    target: Vec3,
    spherical: Spherical,
    goal_target: Vec3,
    goal: Spherical,
    velocity: [f32; 6],
    saved: (Vec3, Spherical),
}

impl Default for OrbitControls {
    fn default() -> Self {
        let spherical = Spherical::from_offset(Vec3::splat(5.0));
        Self {
            min_distance: 0.2,
            max_distance: f32::INFINITY,
            min_polar_angle: 0.0,
            max_polar_angle: PI,
            smooth_time: 0.2,
            dolly_speed: 0.2,
            rotate_speed: 2.0 * PI / 1000.0,
            enabled: true,
            target: Vec3::ZERO,
            spherical,
            goal_target: Vec3::ZERO,
            goal: spherical,
            velocity: [0.0; 6],
            saved: (Vec3::ZERO, spherical),
        }
    }
}

impl OrbitControls {
    /// Controls matching `camera`'s current pose.
    pub fn for_camera(camera: &PerspectiveCamera) -> Self {
        let mut controls = Self::default();
        controls.set_look_at(camera.position, camera.target, false);
        controls.save_state();
        controls
    }

    pub fn target(&self) -> Vec3 {
        self.target
    }

    pub fn position(&self) -> Vec3 {
        self.target + self.spherical.offset()
    }

    pub fn distance(&self) -> f32 {
        self.spherical.radius
    }

    pub fn polar_angle(&self) -> f32 {
        self.spherical.polar
    }

    pub fn goal_position(&self) -> Vec3 {
        self.goal_target + self.goal.offset()
    }

    pub fn is_settled(&self) -> bool {
        self.target.abs_diff_eq(self.goal_target, 1e-4)
            && (self.spherical.radius - self.goal.radius).abs() < 1e-4
            && (self.spherical.azimuth - self.goal.azimuth).abs() < 1e-4
            && (self.spherical.polar - self.goal.polar).abs() < 1e-4
    }

    fn clamp_goal(&mut self) {
        self.goal.radius = self.goal.radius.clamp(self.min_distance, self.max_distance);
        self.goal.polar = self
            .goal
            .polar
            .clamp(self.min_polar_angle, self.max_polar_angle)
            .clamp(1e-4, PI - 1e-4);
    }

    fn jump_to_goal(&mut self) {
        self.target = self.goal_target;
        self.spherical = self.goal;
        self.velocity = [0.0; 6];
    }

    pub fn set_look_at(&mut self, position: Vec3, target: Vec3, transition: bool) {
        self.goal_target = target;
        self.goal = Spherical::from_offset(position - target);
        self.clamp_goal();
        if !transition {
            self.jump_to_goal();
        }
    }

    /// Moves the camera, keeping the target.
    pub fn set_position(&mut self, position: Vec3, transition: bool) {
        self.set_look_at(position, self.goal_target, transition);
    }

    /// Moves the target, keeping the camera position.
    pub fn set_target(&mut self, target: Vec3, transition: bool) {
        self.set_look_at(self.goal_position(), target, transition);
    }

    /// Frames `bounds`: targets its center and backs off until the bounding
    /// sphere fits the vertical field of view.
    pub fn fit_to_box(&mut self, bounds: Aabb, fov_y_degrees: f32, transition: bool) {
        if bounds.is_empty() {
            return;
        }
        let radius = bounds.size().length() * 0.5;
        let half_fov = (fov_y_degrees.to_radians() * 0.5).max(1e-3);
        self.goal_target = bounds.center();
        self.goal.radius = radius / half_fov.sin();
        self.clamp_goal();
        if !transition {
            self.jump_to_goal();
        }
    }

    pub fn rotate(&mut self, azimuth: f32, polar: f32) {
        self.goal.azimuth += azimuth;
        self.goal.polar += polar;
        self.clamp_goal();
    }

    /// Scales the goal distance. Positive steps move closer.
    pub fn dolly(&mut self, steps: f32) {
        self.goal.radius *= (1.0 - self.dolly_speed).powf(steps);
        self.clamp_goal();
    }

    /// Moves the target in the view plane.
    pub fn truck(&mut self, right: f32, up: f32) {
        let forward = -self.goal.offset().normalize_or_zero();
        let side = forward.cross(Vec3::Y).normalize_or(Vec3::X);
        let camera_up = side.cross(forward);
        self.goal_target += side * right + camera_up * up;
    }

    pub fn save_state(&mut self) {
        self.saved = (self.goal_target, self.goal);
    }

    pub fn reset(&mut self, transition: bool) {
        (self.goal_target, self.goal) = self.saved;
        self.clamp_goal();
        if !transition {
            self.jump_to_goal();
        }
    }

    /// Applies input to the goal and eases toward it. Returns whether the
    /// pose changed.
    pub fn update(&mut self, input: &Input, dt: f32) -> bool {
        if self.enabled {
            let drag = input.mouse_delta();
            if input.mouse_down(MouseButton::Left) {
                self.rotate(-drag.x * self.rotate_speed, -drag.y * self.rotate_speed);
            }
            if input.mouse_down(MouseButton::Right) || input.mouse_down(MouseButton::Middle) {
                let scale = self.goal.radius * 0.002;
                self.truck(-drag.x * scale, drag.y * scale);
            }
            let scroll = input.scroll_delta().y;
            if scroll != 0.0 {
                self.dolly(scroll);
            }
        }

        let before = (self.target, self.spherical);
        let [vx, vy, vz, vr, va, vp] = &mut self.velocity;
        let t = self.smooth_time;
        self.target = Vec3::new(
            smooth_damp(self.target.x, self.goal_target.x, vx, t, dt),
            smooth_damp(self.target.y, self.goal_target.y, vy, t, dt),
            smooth_damp(self.target.z, self.goal_target.z, vz, t, dt),
        );
        self.spherical = Spherical {
            radius: smooth_damp(self.spherical.radius, self.goal.radius, vr, t, dt),
            azimuth: smooth_damp(self.spherical.azimuth, self.goal.azimuth, va, t, dt),
            polar: smooth_damp(self.spherical.polar, self.goal.polar, vp, t, dt),
        };
        if self.is_settled() {
            self.jump_to_goal();
        }
        before != (self.target, self.spherical)
    }

    pub fn apply(&self, camera: &mut PerspectiveCamera) {
        camera.position = self.position();
        camera.target = self.target;
    }
}
