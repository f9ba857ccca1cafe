use glam::{Mat4, Vec2, Vec3};

/// A perspective camera looking from `position` toward `target`.
///
/// Keeps last frame's view-projection so the geometry pass can write motion
/// vectors, and an optional sub-pixel jitter that temporal anti-aliasing
/// applies to the projection only.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PerspectiveCamera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    jitter: Vec2,
    previous_view_proj: Option<Mat4>,
}

impl Default for PerspectiveCamera {
    fn default() -> Self {
        Self {
            position: Vec3::splat(5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov: 50.0,
            aspect: 1.0,
            near: 0.1,
            far: 1000.0,
            jitter: Vec2::ZERO,
            previous_view_proj: None,
        }
    }
}

impl PerspectiveCamera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clip(mut self, near: f32, far: f32) -> Self {
        self.near = near;
        self.far = far;
        self
    }

    pub fn at(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn looking_at(mut self, target: Vec3) -> Self {
        self.target = target;
        self
    }

    /// Keeps the aspect ratio in sync with the surface. Zero sizes are
    /// ignored (minimized windows).
    pub fn set_viewport(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize_or_zero()
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Projection without jitter.
    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov.to_radians(), self.aspect, self.near, self.far)
    }

    /// Projection with the current sub-pixel jitter applied.
    pub fn jittered_projection(&self) -> Mat4 {
        Mat4::from_translation(self.jitter.extend(0.0)) * self.projection()
    }

    pub fn view_proj(&self) -> Mat4 {
        self.projection() * self.view()
    }

    /// Last committed frame's view-projection, or the current one before the
    /// first commit so the first frame has zero motion.
    pub fn previous_view_proj(&self) -> Mat4 {
        self.previous_view_proj.unwrap_or_else(|| self.view_proj())
    }

    /// Sets the jitter offset in NDC units.
    pub fn set_jitter(&mut self, ndc: Vec2) {
        self.jitter = ndc;
    }

    pub fn jitter(&self) -> Vec2 {
        self.jitter
    }

    /// Records this frame's matrices as history for the next frame.
    pub fn commit_frame(&mut self) {
        self.previous_view_proj = Some(self.view_proj());
    }

    /// Forgets motion history, e.g. after a camera cut.
    pub fn reset_history(&mut self) {
        self.previous_view_proj = None;
    }
}

/// Element `index` of the Halton sequence in `base`, in `[0, 1)`.
pub fn halton(mut index: u32, base: u32) -> f32 {
    let mut f = 1.0;
    let mut r = 0.0;
    while index > 0 {
        f /= base as f32;
        r += f * (index % base) as f32;
        index /= base;
    }
    r
}

/// TAA jitter for `frame` in NDC units, cycling through 8 Halton(2,3) samples.
pub fn taa_jitter(frame: u64, width: u32, height: u32) -> Vec2 {
    let i = (frame % 8) as u32 + 1;
    let offset = Vec2::new(halton(i, 2), halton(i, 3)) - 0.5;
    Vec2::new(
        offset.x * 2.0 / width.max(1) as f32,
        offset.y * 2.0 / height.max(1) as f32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_viewport_keeps_aspect() {
        let mut camera = PerspectiveCamera::new();
        camera.set_viewport(1600, 800);
        camera.set_viewport(0, 800);
        assert_eq!(camera.aspect, 2.0);
    }

    #[test]
    fn first_frame_has_no_motion() {
        let camera = PerspectiveCamera::new();
        assert_eq!(camera.previous_view_proj(), camera.view_proj());
    }

    #[test]
    fn commit_keeps_last_frame() {
        let mut camera = PerspectiveCamera::new();
        camera.commit_frame();
        let before = camera.view_proj();
        camera.position = Vec3::new(10.0, 0.0, 0.0);
        assert_eq!(camera.previous_view_proj(), before);
        assert_ne!(camera.view_proj(), before);
    }

    #[test]
    fn halton_matches_known_values() {
        assert_eq!(halton(1, 2), 0.5);
        assert_eq!(halton(2, 2), 0.25);
        assert!((halton(1, 3) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn jitter_stays_within_a_pixel() {
        for frame in 0..16 {
            let j = taa_jitter(frame, 100, 50);
            assert!(j.x.abs() <= 1.0 / 100.0);
            assert!(j.y.abs() <= 1.0 / 50.0);
        }
    }
}
