//! CPU reference backend.
//!
//! Executes the same graphs as the wgpu backend, one pixel at a time, into
//! [`Image`]s that tests can inspect channel by channel. The math follows the
//! WGSL passes closely but not bit for bit: the geometry pass clips whole
//! triangles at the near plane and does not render shadow maps.

use std::collections::{HashMap, HashSet};

use glam::{Mat3, Mat4, Vec2, Vec3, Vec4, Vec4Swizzles};

use crate::error::RenderError;
use crate::mesh::MaterialKind;
use crate::scene::{Environment, Scene};

use super::backend::{FrameView, RenderBackend};
use super::channel::{Channel, ChannelRef, PassId};
use super::pass::{
    AerialPerspectiveParams, BloomParams, CompositeParams, LensFlareParams, PassKind, PassNode,
    SsgiParams, SsrParams, TaaParams,
};
use super::tonemap::{luminance, tone_map};

/// A floating-point RGBA image, row-major, top row first.
#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<Vec4>,
}

impl Image {
    pub fn new(width: u32, height: u32, fill: Vec4) -> Self {
        Self {
            width,
            height,
            pixels: vec![fill; (width * height) as usize],
        }
    }

    pub fn get(&self, x: u32, y: u32) -> Vec4 {
        self.pixels[(y * self.width + x) as usize]
    }

    /// Texel fetch with clamp-to-edge addressing.
    pub fn at(&self, x: i32, y: i32) -> Vec4 {
        let x = x.clamp(0, self.width as i32 - 1) as u32;
        let y = y.clamp(0, self.height as i32 - 1) as u32;
        self.get(x, y)
    }

    pub fn set(&mut self, x: u32, y: u32, value: Vec4) {
        let i = (y * self.width + x) as usize;
        self.pixels[i] = value;
    }

    /// Bilinear sample at a UV coordinate, clamp-to-edge.
    pub fn sample(&self, uv: Vec2) -> Vec4 {
        let p = uv * Vec2::new(self.width as f32, self.height as f32) - 0.5;
        let base = p.floor();
        let f = p - base;
        let (x, y) = (base.x as i32, base.y as i32);
        let top = self.at(x, y).lerp(self.at(x + 1, y), f.x);
        let bottom = self.at(x, y + 1).lerp(self.at(x + 1, y + 1), f.x);
        top.lerp(bottom, f.y)
    }

    pub fn map(&self, mut f: impl FnMut(u32, u32, Vec4) -> Vec4) -> Image {
        let mut out = self.clone();
        for y in 0..self.height {
            for x in 0..self.width {
                out.set(x, y, f(x, y, self.get(x, y)));
            }
        }
        out
    }

    /// Raw bit patterns, for exact comparisons that also catch NaNs.
    pub fn bits(&self) -> Vec<[u32; 4]> {
        self.pixels
            .iter()
            .map(|p| p.to_array().map(f32::to_bits))
            .collect()
    }

    pub fn is_finite(&self) -> bool {
        self.pixels.iter().all(|p| p.is_finite())
    }

    /// 8-bit sRGB encoding of a display-referred image.
    pub fn to_rgba8(&self) -> image::RgbaImage {
        let mut out = image::RgbaImage::new(self.width, self.height);
        for (x, y, px) in out.enumerate_pixels_mut() {
            let c = self.get(x, y);
            let rgb = c.xyz().clamp(Vec3::ZERO, Vec3::ONE).map(linear_to_srgb);
            let to_u8 = |v: f32| (v * 255.0 + 0.5) as u8;
            *px = image::Rgba([
                to_u8(rgb.x),
                to_u8(rgb.y),
                to_u8(rgb.z),
                to_u8(c.w.clamp(0.0, 1.0)),
            ]);
        }
        out
    }
}

fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.0031308 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

fn ndc_to_uv(ndc: Vec2) -> Vec2 {
    Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5)
}

fn uv_to_ndc(uv: Vec2) -> Vec2 {
    Vec2::new(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0)
}

/// Ordered 4x4 threshold used for screen-door transparency.
fn bayer4(x: u32, y: u32) -> f32 {
    const M: [u32; 16] = [0, 8, 2, 10, 12, 4, 14, 6, 3, 11, 1, 9, 15, 7, 13, 5];
    (M[((y % 4) * 4 + x % 4) as usize] as f32 + 0.5) / 16.0
}

/// Interleaved gradient noise in `[0, 1)`.
fn gradient_noise(x: f32, y: f32) -> f32 {
    (52.982919 * (0.06711056 * x + 0.00583715 * y).fract()).fract()
}

/// Camera matrices shared by the screen-space passes.
struct Projection {
    proj: Mat4,
    inv_proj: Mat4,
    inv_view: Mat4,
    width: u32,
    height: u32,
}

impl Projection {
    fn new(frame: &FrameView<'_>, width: u32, height: u32) -> Self {
        let proj = frame.camera.projection();
        Self {
            proj,
            inv_proj: proj.inverse(),
            inv_view: frame.camera.view().inverse(),
            width,
            height,
        }
    }

    fn uv(&self, x: u32, y: u32) -> Vec2 {
        Vec2::new(
            (x as f32 + 0.5) / self.width as f32,
            (y as f32 + 0.5) / self.height as f32,
        )
    }

    /// View-space position of a pixel from its hardware depth.
    fn view_position(&self, uv: Vec2, depth: f32) -> Vec3 {
        let ndc = uv_to_ndc(uv);
        self.inv_proj.project_point3(ndc.extend(depth))
    }

    /// Screen UV of a view-space point.
    fn project(&self, p: Vec3) -> Vec2 {
        ndc_to_uv(self.proj.project_point3(p).truncate())
    }

    fn pixel(&self, uv: Vec2) -> Option<(u32, u32)> {
        if !(0.0..1.0).contains(&uv.x) || !(0.0..1.0).contains(&uv.y) {
            return None;
        }
        Some((
            (uv.x * self.width as f32) as u32,
            (uv.y * self.height as f32) as u32,
        ))
    }
}

fn decode_normal(encoded: Vec4) -> Vec3 {
    (encoded.xyz() * 2.0 - 1.0).normalize_or_zero()
}

/// Rendering on the CPU into inspectable images.
pub struct SoftwareBackend {
    width: u32,
    height: u32,
    allocated: HashSet<PassId>,
    channels: HashMap<ChannelRef, Image>,
    history: HashMap<PassId, Image>,
    presented: Option<(ChannelRef, Image)>,
    display: Option<Image>,
    detached: bool,
}

impl SoftwareBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            allocated: HashSet::new(),
            channels: HashMap::new(),
            history: HashMap::new(),
            presented: None,
            display: None,
            detached: false,
        }
    }

    /// A channel written during the last frame.
    pub fn channel(&self, channel: ChannelRef) -> Option<&Image> {
        self.channels.get(&channel)
    }

    /// The presented channel of the last frame, before the display transform.
    pub fn presented(&self) -> Option<&Image> {
        self.presented.as_ref().map(|(_, image)| image)
    }

    pub fn presented_channel(&self) -> Option<ChannelRef> {
        self.presented.as_ref().map(|(c, _)| *c)
    }

    /// The last frame as it would appear on screen.
    pub fn display(&self) -> Option<&Image> {
        self.display.as_ref()
    }

    pub fn allocated_passes(&self) -> usize {
        self.allocated.len()
    }

    fn input(&self, pass: &PassNode, slot: &str) -> Result<&Image, RenderError> {
        let source = pass.input(slot).ok_or(RenderError::Unallocated(pass.id))?;
        self.channels
            .get(&source)
            .ok_or(RenderError::Unallocated(source.pass))
    }

    fn execute(&mut self, pass: &PassNode, frame: &FrameView<'_>) -> Result<(), RenderError> {
        let cam = Projection::new(frame, self.width, self.height);
        let mut outputs: Vec<(Channel, Image)> = Vec::new();

        match pass.kind {
            PassKind::Geometry => {
                let g = rasterize(frame, self.width, self.height);
                outputs.extend([
                    (Channel::Color, g.color),
                    (Channel::Depth, g.depth),
                    (Channel::Normal, g.normal),
                    (Channel::MetalRough, g.metal_rough),
                    (Channel::Velocity, g.velocity),
                ]);
            }
            PassKind::Reflection(params) => {
                let image = reflect(
                    &params,
                    &cam,
                    self.input(pass, "color")?,
                    self.input(pass, "depth")?,
                    self.input(pass, "normal")?,
                    self.input(pass, "metalrough")?,
                );
                outputs.push((Channel::Reflection, image));
            }
            PassKind::GlobalIllumination(params) => {
                let (gi, ao) = global_illumination(
                    &params,
                    &cam,
                    self.input(pass, "color")?,
                    self.input(pass, "depth")?,
                    self.input(pass, "normal")?,
                );
                outputs.extend([(Channel::Gi, gi), (Channel::Ao, ao)]);
            }
            PassKind::Bloom(params) => {
                outputs.push((Channel::Bloom, bloom(&params, self.input(pass, "color")?)));
            }
            PassKind::Composite(params) => {
                let image = composite(
                    params,
                    self.input(pass, "color")?,
                    pass.input("gi").map(|_| self.input(pass, "gi")).transpose()?,
                    pass.input("ao").map(|_| self.input(pass, "ao")).transpose()?,
                    pass.input("bloom").map(|_| self.input(pass, "bloom")).transpose()?,
                    pass.input("reflection")
                        .map(|_| self.input(pass, "reflection"))
                        .transpose()?,
                );
                outputs.push((Channel::Color, image));
            }
            PassKind::AerialPerspective(params) => {
                let image = aerial_perspective(
                    &params,
                    &cam,
                    &frame.scene.environment,
                    self.input(pass, "color")?,
                    self.input(pass, "depth")?,
                );
                outputs.push((Channel::Color, image));
            }
            PassKind::LensFlare(params) => {
                outputs.push((Channel::Color, lens_flare(&params, self.input(pass, "color")?)));
            }
            PassKind::ToneMap(params) => {
                let image = self.input(pass, "color")?.map(|_, _, c| {
                    tone_map(params.operator, c.xyz(), params.exposure).extend(c.w)
                });
                outputs.push((Channel::Color, image));
            }
            PassKind::TemporalAa(params) => {
                let image = temporal_aa(
                    &params,
                    self.input(pass, "color")?,
                    self.input(pass, "velocity")?,
                    self.history.get(&pass.id),
                );
                self.history.insert(pass.id, image.clone());
                outputs.push((Channel::Color, image));
            }
            PassKind::Dither => {
                let image = self.input(pass, "color")?.map(|x, y, c| {
                    let n = gradient_noise(x as f32, y as f32) - 0.5;
                    (c.xyz() + Vec3::splat(n / 255.0)).extend(c.w)
                });
                outputs.push((Channel::Color, image));
            }
        }

        for (channel, image) in outputs {
            self.channels.insert(pass.id.channel(channel), image);
        }
        Ok(())
    }
}

impl RenderBackend for SoftwareBackend {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.width = width;
        self.height = height;
        self.channels.clear();
        self.history.clear();
    }

    fn allocate(&mut self, pass: &PassNode) -> Result<(), RenderError> {
        self.allocated.insert(pass.id);
        Ok(())
    }

    fn release(&mut self, pass: PassId) {
        self.allocated.remove(&pass);
        self.channels.retain(|c, _| c.pass != pass);
        self.history.remove(&pass);
        if self.presented_channel().is_some_and(|c| c.pass == pass) {
            self.presented = None;
            self.display = None;
        }
    }

    fn render(&mut self, frame: &FrameView<'_>) -> Result<(), RenderError> {
        if self.detached {
            return Ok(());
        }
        let schedule = frame.schedule();
        for pass in &schedule {
            if !self.allocated.contains(&pass.id) {
                return Err(RenderError::Unallocated(pass.id));
            }
        }
        for pass in schedule {
            self.execute(pass, frame)?;
        }

        let presented = self
            .channels
            .get(&frame.output)
            .cloned()
            .ok_or(RenderError::Unallocated(frame.output.pass))?;
        let display = presented.map(|_, _, c| frame.display.apply(c.xyz()).extend(c.w));
        self.presented = Some((frame.output, presented));
        self.display = Some(display);
        Ok(())
    }

    fn detach(&mut self) {
        self.detached = true;
    }
}

struct GBuffer {
    color: Image,
    depth: Image,
    normal: Image,
    metal_rough: Image,
    velocity: Image,
}

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

fn rasterize(frame: &FrameView<'_>, width: u32, height: u32) -> GBuffer {
    let camera = frame.camera;
    let scene: &Scene = frame.scene;
    let view = camera.view();
    let view_proj = camera.jittered_projection() * view;
    let current = camera.view_proj();
    let previous = camera.previous_view_proj();
    let inv_view_proj = current.inverse();
    let lights = scene.directional_lights();
    let ambient_light = scene.ambient_light();

    let mut color = Image::new(width, height, Vec4::ZERO);
    for y in 0..height {
        for x in 0..width {
            let uv = Vec2::new(
                (x as f32 + 0.5) / width as f32,
                (y as f32 + 0.5) / height as f32,
            );
            let far = inv_view_proj.project_point3(uv_to_ndc(uv).extend(1.0));
            let dir = (far - camera.position).normalize_or_zero();
            color.set(x, y, scene.environment.background(dir, scene.clear_color));
        }
    }
    let mut depth = Image::new(width, height, Vec4::new(1.0, 0.0, 0.0, 1.0));
    let mut normal = Image::new(width, height, Vec4::new(0.5, 0.5, 1.0, 1.0));
    let mut metal_rough = Image::new(width, height, Vec4::new(0.0, 1.0, 0.0, 1.0));
    let mut velocity = Image::new(width, height, Vec4::ZERO);

    let size = Vec2::new(width as f32, height as f32);

    for draw in scene.collect_draws() {
        let normal_matrix = Mat3::from_mat4(draw.world).inverse().transpose();
        let view3 = Mat3::from_mat4(view);
        let material = draw.material;
        let (metalness, roughness) = material.metal_rough();

        for tri in draw.mesh.indices.chunks_exact(3) {
            let Some(verts) = tri
                .iter()
                .map(|&i| draw.mesh.vertices.get(i as usize))
                .collect::<Option<Vec<_>>>()
            else {
                continue;
            };
            let world: Vec<Vec3> = verts
                .iter()
                .map(|v| draw.world.transform_point3(Vec3::from(v.position)))
                .collect();
            let clip: Vec<Vec4> = world.iter().map(|p| view_proj * p.extend(1.0)).collect();
            if clip.iter().any(|c| c.w <= camera.near * 0.5) {
                continue;
            }
            let ndc: Vec<Vec3> = clip.iter().map(|c| c.xyz() / c.w).collect();
            let screen: Vec<Vec2> = ndc.iter().map(|n| ndc_to_uv(n.truncate()) * size).collect();

            // Screen space has y down, so counter-clockwise faces have
            // negative area here.
            let area = edge(screen[0], screen[1], screen[2]);
            if area >= 0.0 {
                continue;
            }

            let min = screen[0].min(screen[1]).min(screen[2]).max(Vec2::ZERO);
            let max = screen[0].max(screen[1]).max(screen[2]).min(size);
            let normals: Vec<Vec3> = verts
                .iter()
                .map(|v| (normal_matrix * Vec3::from(v.normal)).normalize_or_zero())
                .collect();

            for py in min.y.floor() as u32..max.y.ceil().min(size.y) as u32 {
                for px in min.x.floor() as u32..max.x.ceil().min(size.x) as u32 {
                    let p = Vec2::new(px as f32 + 0.5, py as f32 + 0.5);
                    let b = Vec3::new(
                        edge(screen[1], screen[2], p) / area,
                        edge(screen[2], screen[0], p) / area,
                        edge(screen[0], screen[1], p) / area,
                    );
                    if b.min_element() < 0.0 {
                        continue;
                    }
                    let z = b.x * ndc[0].z + b.y * ndc[1].z + b.z * ndc[2].z;
                    if !(0.0..=1.0).contains(&z) || z >= depth.get(px, py).x {
                        continue;
                    }
                    if material.base_color.w < bayer4(px, py) {
                        continue;
                    }

                    // Perspective-correct weights.
                    let pw = Vec3::new(b.x / clip[0].w, b.y / clip[1].w, b.z / clip[2].w);
                    let pw = pw / (pw.x + pw.y + pw.z);
                    let position = world[0] * pw.x + world[1] * pw.y + world[2] * pw.z;
                    let n = (normals[0] * pw.x + normals[1] * pw.y + normals[2] * pw.z)
                        .normalize_or_zero();

                    let shaded = shade(
                        &material,
                        metalness,
                        roughness,
                        position,
                        n,
                        camera.position,
                        &scene.environment,
                        &lights,
                        ambient_light,
                    );

                    let cur = current.project_point3(position).truncate();
                    let prev = previous.project_point3(position).truncate();
                    let motion = ndc_to_uv(cur) - ndc_to_uv(prev);
                    let view_normal = (view3 * n).normalize_or_zero();

                    depth.set(px, py, Vec4::new(z, 0.0, 0.0, 1.0));
                    color.set(px, py, shaded.extend(1.0));
                    normal.set(px, py, (view_normal * 0.5 + 0.5).extend(1.0));
                    metal_rough.set(px, py, Vec4::new(metalness, roughness, 0.0, 1.0));
                    velocity.set(px, py, Vec4::new(motion.x, motion.y, 0.0, 1.0));
                }
            }
        }
    }

    GBuffer {
        color,
        depth,
        normal,
        metal_rough,
        velocity,
    }
}

#[allow(clippy::too_many_arguments)]
fn shade(
    material: &crate::mesh::Material,
    metalness: f32,
    roughness: f32,
    position: Vec3,
    n: Vec3,
    eye: Vec3,
    environment: &Environment,
    lights: &[crate::scene::DirectionalLight],
    ambient_light: Vec3,
) -> Vec3 {
    let base = material.base_color.xyz();
    let diffuse_color = base * (1.0 - metalness);
    let mut diffuse = ambient_light + environment.ambient(n);
    for light in lights {
        diffuse += light.color * light.intensity * n.dot(light.direction).max(0.0);
    }
    let mut out = diffuse_color * diffuse + material.emissive;

    if material.kind == MaterialKind::Standard {
        let v = (eye - position).normalize_or_zero();
        let r = (-v).reflect(n);
        let f0 = Vec3::splat(0.04).lerp(base, metalness);
        let gloss = (1.0 - roughness).powi(2);
        out += environment.ambient(r) * f0 * gloss;
    }
    out
}

fn reflect(
    params: &SsrParams,
    cam: &Projection,
    color: &Image,
    depth: &Image,
    normal: &Image,
    metal_rough: &Image,
) -> Image {
    let steps = params.steps.max(1);
    let step = params.max_distance / steps as f32;
    let raw = depth.map(|x, y, d| {
        let roughness = metal_rough.get(x, y).y;
        if d.x >= 1.0 || roughness > 0.9 {
            return Vec4::ZERO;
        }
        let uv = cam.uv(x, y);
        let origin = cam.view_position(uv, d.x);
        let n = decode_normal(normal.get(x, y));
        let dir = origin.normalize_or_zero().reflect(n);

        for i in 1..=steps {
            let p = origin + dir * step * i as f32;
            if p.z >= -1e-3 {
                break;
            }
            let Some((sx, sy)) = cam.pixel(cam.project(p)) else {
                break;
            };
            let scene_depth = depth.get(sx, sy).x;
            if scene_depth >= 1.0 {
                continue;
            }
            let surface = cam.view_position(cam.uv(sx, sy), scene_depth);
            let behind = surface.z - p.z;
            if behind > 0.0 && behind < params.thickness {
                let hit_uv = cam.uv(sx, sy);
                let edge = (hit_uv - 0.5).abs().max_element() * 2.0;
                let fade = (1.0 - edge).clamp(0.0, 1.0)
                    * (1.0 - i as f32 / steps as f32)
                    * (1.0 - roughness);
                return color.get(sx, sy).xyz().extend(fade);
            }
        }
        Vec4::ZERO
    });
    box_blur(&raw, params.blur_quality as i32)
}

fn box_blur(image: &Image, radius: i32) -> Image {
    if radius <= 0 {
        return image.clone();
    }
    let n = ((2 * radius + 1) * (2 * radius + 1)) as f32;
    image.map(|x, y, _| {
        let mut sum = Vec4::ZERO;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                sum += image.at(x as i32 + dx, y as i32 + dy);
            }
        }
        sum / n
    })
}

fn global_illumination(
    params: &SsgiParams,
    cam: &Projection,
    color: &Image,
    depth: &Image,
    normal: &Image,
) -> (Image, Image) {
    let mut gi = Image::new(color.width, color.height, Vec4::new(0.0, 0.0, 0.0, 1.0));
    let mut ao = Image::new(color.width, color.height, Vec4::ONE);
    let slices = params.slice_count.max(1);
    let steps = params.step_count.max(1);
    let samples = (slices * 2 * steps) as f32;
    let focal = cam.proj.col(1).y * 0.5 * cam.height as f32;

    for y in 0..color.height {
        for x in 0..color.width {
            let d = depth.get(x, y).x;
            if d >= 1.0 {
                continue;
            }
            let uv = cam.uv(x, y);
            let pos = cam.view_position(uv, d);
            let n = decode_normal(normal.get(x, y));
            let screen_radius = params.radius * focal / (-pos.z).max(1e-3);

            let mut occlusion = 0.0;
            let mut bounce = Vec3::ZERO;
            for s in 0..slices {
                let angle = std::f32::consts::PI * (s as f32 + 0.5) / slices as f32;
                let axis = Vec2::new(angle.cos(), angle.sin());
                for side in [-1.0, 1.0] {
                    for k in 1..=steps {
                        let offset = axis * side * screen_radius * k as f32 / steps as f32;
                        let sx = x as i32 + offset.x.round() as i32;
                        let sy = y as i32 + offset.y.round() as i32;
                        if sx < 0 || sy < 0 || sx >= color.width as i32 || sy >= color.height as i32
                        {
                            continue;
                        }
                        let sd = depth.get(sx as u32, sy as u32).x;
                        if sd >= 1.0 {
                            continue;
                        }
                        let sp = cam.view_position(cam.uv(sx as u32, sy as u32), sd);
                        let delta = sp - pos;
                        let dist = delta.length();
                        if dist <= 1e-4 || dist >= params.radius {
                            continue;
                        }
                        let cos_h = n.dot(delta / dist).max(0.0);
                        let falloff = 1.0 - dist / params.radius;
                        occlusion += cos_h * falloff;
                        bounce += color.get(sx as u32, sy as u32).xyz() * cos_h * falloff;
                    }
                }
            }

            let a = (1.0 - params.ao_intensity * occlusion / samples).clamp(0.0, 1.0);
            ao.set(x, y, Vec4::new(a, a, a, 1.0));
            gi.set(x, y, (bounce * params.gi_intensity / samples).extend(1.0));
        }
    }
    (gi, ao)
}

fn bloom(params: &BloomParams, color: &Image) -> Image {
    let bright = color.map(|_, _, c| {
        let l = luminance(c.xyz());
        if l <= params.threshold || l <= 0.0 {
            Vec4::ZERO
        } else {
            (c.xyz() * ((l - params.threshold) / l)).extend(0.0)
        }
    });
    let radius = (params.radius * 8.0).round().max(1.0) as i32;
    let sigma = radius as f32 / 2.0;
    let weights: Vec<f32> = (-radius..=radius)
        .map(|i| (-(i * i) as f32 / (2.0 * sigma * sigma)).exp())
        .collect();
    let total: f32 = weights.iter().sum();

    let blur = |image: &Image, horizontal: bool| {
        image.map(|x, y, _| {
            let mut sum = Vec4::ZERO;
            for (k, w) in weights.iter().enumerate() {
                let o = k as i32 - radius;
                let (sx, sy) = if horizontal {
                    (x as i32 + o, y as i32)
                } else {
                    (x as i32, y as i32 + o)
                };
                sum += image.at(sx, sy) * *w;
            }
            sum / total
        })
    };
    let blurred = blur(&blur(&bright, true), false);
    blurred.map(|_, _, c| c * params.strength)
}

/// `color * ao + color * gi`, plus bloom, then alpha-blended under the
/// reflection. Channels that are not bound are never read.
fn composite(
    params: CompositeParams,
    color: &Image,
    gi: Option<&Image>,
    ao: Option<&Image>,
    bloom: Option<&Image>,
    reflection: Option<&Image>,
) -> Image {
    color.map(|x, y, c| {
        let base = c.xyz();
        let mut out = match (params.gi, gi, ao) {
            (true, Some(gi), Some(ao)) => base * ao.get(x, y).x + base * gi.get(x, y).xyz(),
            _ => base,
        };
        if let (true, Some(bloom)) = (params.bloom, bloom) {
            out += bloom.get(x, y).xyz();
        }
        if let (true, Some(reflection)) = (params.reflection, reflection) {
            let r = reflection.get(x, y);
            out = out.lerp(r.xyz(), r.w.clamp(0.0, 1.0));
        }
        out.extend(c.w)
    })
}

/// Relative Rayleigh extinction per channel, normalized to green.
const RAYLEIGH_TINT: Vec3 = Vec3::new(0.4296, 1.0, 2.4519);

fn aerial_perspective(
    params: &AerialPerspectiveParams,
    cam: &Projection,
    environment: &Environment,
    color: &Image,
    depth: &Image,
) -> Image {
    color.map(|x, y, c| {
        let d = depth.get(x, y).x;
        if d >= 1.0 {
            return c;
        }
        let view_pos = cam.view_position(cam.uv(x, y), d);
        let meters = view_pos.length() * params.world_to_meters;
        let extinction = RAYLEIGH_TINT * params.rayleigh_density + Vec3::splat(params.mie_density);
        let transmittance = (-extinction * meters).map(f32::exp);
        let world_dir = cam.inv_view.transform_vector3(view_pos).normalize_or_zero();
        let horizon = Vec3::new(world_dir.x, world_dir.y.max(0.02), world_dir.z);
        let sky = match environment {
            Environment::None => Vec3::new(0.62, 0.72, 0.86),
            env => env.background(horizon, Vec4::ZERO).xyz(),
        };
        let inscatter = sky * (Vec3::ONE - transmittance) * params.inscatter_strength;
        (c.xyz() * transmittance + inscatter).extend(c.w)
    })
}

fn lens_flare(params: &LensFlareParams, color: &Image) -> Image {
    let w = color.width as f32;
    let h = color.height as f32;
    let bright = |uv: Vec2| {
        let c = color.sample(uv).xyz();
        (c - Vec3::splat(params.threshold)).max(Vec3::ZERO)
    };
    color.map(|x, y, c| {
        let uv = Vec2::new((x as f32 + 0.5) / w, (y as f32 + 0.5) / h);
        let ghost_vec = (Vec2::splat(0.5) - uv) * params.ghost_spacing;
        let mut flare = Vec3::ZERO;
        for i in 0..params.ghost_count {
            let s = wrap(uv + ghost_vec * i as f32);
            let weight = (1.0 - (Vec2::splat(0.5) - s).length() / std::f32::consts::FRAC_1_SQRT_2)
                .max(0.0)
                .powi(10);
            flare += bright(s) * weight;
        }
        let halo_dir = ghost_vec.normalize_or_zero() * params.halo_width;
        let halo_uv = wrap(uv + halo_dir);
        let halo_weight =
            (1.0 - (Vec2::splat(0.5) - halo_uv).length() / std::f32::consts::FRAC_1_SQRT_2)
                .max(0.0)
                .powi(5);
        flare += bright(halo_uv) * halo_weight;
        (c.xyz() + flare * params.intensity).extend(c.w)
    })
}

fn wrap(uv: Vec2) -> Vec2 {
    uv - uv.floor()
}

fn temporal_aa(
    params: &TaaParams,
    color: &Image,
    velocity: &Image,
    history: Option<&Image>,
) -> Image {
    let Some(history) =
        history.filter(|h| h.width == color.width && h.height == color.height)
    else {
        return color.clone();
    };
    let w = color.width as f32;
    let h = color.height as f32;
    color.map(|x, y, c| {
        let uv = Vec2::new((x as f32 + 0.5) / w, (y as f32 + 0.5) / h);
        let prev_uv = uv - velocity.get(x, y).truncate().truncate();
        if !(0.0..=1.0).contains(&prev_uv.x) || !(0.0..=1.0).contains(&prev_uv.y) {
            return c;
        }
        let mut lo = Vec4::splat(f32::INFINITY);
        let mut hi = Vec4::splat(f32::NEG_INFINITY);
        for dy in -1..=1 {
            for dx in -1..=1 {
                let n = color.at(x as i32 + dx, y as i32 + dy);
                lo = lo.min(n);
                hi = hi.max(n);
            }
        }
        let past = history.sample(prev_uv).clamp(lo, hi);
        c.lerp(past, params.history_weight.clamp(0.0, 0.99))
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::camera::PerspectiveCamera;
    use crate::mesh::{Material, MeshData, Transform};
    use crate::render_graph::{
        DisplayTransform, PipelineConfig, PostProcessing, RenderGraph, build_pipeline,
    };
    use crate::scene::{DirectionalLight, Light, Sky};

    fn test_scene() -> Scene {
        let mut scene = Scene::new();
        scene.environment = Environment::Sky(Sky::default());
        scene.add_mesh(
            scene.root(),
            "ground",
            Arc::new(MeshData::plane(20.0)),
            Material::standard(Vec4::new(0.6, 0.6, 0.6, 1.0), 0.0, 0.2),
            Transform::new(),
        );
        scene.add_mesh(
            scene.root(),
            "cube",
            Arc::new(MeshData::cube()),
            Material::standard(Vec4::new(0.9, 0.2, 0.1, 1.0), 0.4, 0.0),
            Transform::from_position(Vec3::new(0.0, 0.5, 0.0)),
        );
        scene.add_light(
            "sun",
            Light::Directional(DirectionalLight {
                direction: Vec3::new(0.3, 1.0, 0.2).normalize(),
                color: Vec3::ONE,
                intensity: 3.0,
                distance: 80.0,
                target: Vec3::ZERO,
                shadow: None,
            }),
        );
        scene
    }

    fn frame<'a>(
        graph: &'a RenderGraph,
        output: ChannelRef,
        scene: &'a Scene,
        camera: &'a PerspectiveCamera,
        index: u64,
    ) -> FrameView<'a> {
        FrameView {
            graph,
            output,
            display: DisplayTransform::default(),
            shadows: false,
            scene,
            camera,
            time: index as f32 / 60.0,
            delta: 1.0 / 60.0,
            frame_index: index,
        }
    }

    fn camera() -> PerspectiveCamera {
        let mut camera = PerspectiveCamera::new().at(Vec3::new(3.0, 2.5, 4.0));
        camera.set_viewport(48, 32);
        camera
    }

    #[test]
    fn geometry_pass_covers_the_cube() {
        let scene = test_scene();
        let camera = camera();
        let built = build_pipeline(&PipelineConfig::plain()).unwrap();
        let mut backend = SoftwareBackend::new(48, 32);
        let post = PostProcessing::install(built, &mut backend).unwrap();
        let graph = post.graph();
        backend
            .render(&frame(graph, graph.output(), &scene, &camera, 0))
            .unwrap();

        let depth = backend
            .channel(post.pipeline().geometry.channel(Channel::Depth))
            .unwrap();
        let center = depth.get(24, 16).x;
        assert!(center < 1.0, "center pixel should hit geometry");
        let mr = backend
            .channel(post.pipeline().geometry.channel(Channel::MetalRough))
            .unwrap();
        assert!(mr.pixels.iter().any(|p| p.x == 0.4));
    }

    #[test]
    fn disabled_effects_present_geometry_color_bit_for_bit() {
        let scene = test_scene();
        let camera = camera();
        let mut backend = SoftwareBackend::new(48, 32);
        let built = build_pipeline(&PipelineConfig::plain()).unwrap();
        let raw = built.raw;
        let post = PostProcessing::install(built, &mut backend).unwrap();

        for i in 0..3 {
            backend
                .render(&frame(post.graph(), post.output(), &scene, &camera, i))
                .unwrap();
            let presented = backend.presented().unwrap();
            let color = backend.channel(raw).unwrap();
            assert_eq!(presented.bits(), color.bits());
        }
    }

    #[test]
    fn full_chain_stays_finite() {
        let scene = test_scene();
        let mut camera = camera();
        let mut config = PipelineConfig::screen_space_effects();
        config.aerial_perspective = Some(Default::default());
        config.lens_flare = Some(Default::default());
        config.tone_mapping = Some(Default::default());
        config.dithering = true;

        let built = build_pipeline(&config).unwrap();
        let mut backend = SoftwareBackend::new(48, 32);
        let post = PostProcessing::install(built, &mut backend).unwrap();
        for i in 0..3 {
            backend
                .render(&frame(post.graph(), post.output(), &scene, &camera, i))
                .unwrap();
            camera.commit_frame();
            camera.position.x += 0.05;
        }
        for pass in post.graph().passes() {
            for &ch in pass.outputs() {
                let image = backend.channel(pass.id.channel(ch)).unwrap();
                assert!(image.is_finite(), "{} {:?} has non-finite texels", pass.label, ch);
            }
        }
        assert!(backend.display().unwrap().is_finite());
    }

    #[test]
    fn composite_without_bound_channels_is_identity() {
        let color = Image::new(2, 2, Vec4::new(0.25, 0.5, f32::MAX, 1.0));
        let out = composite(CompositeParams::default(), &color, None, None, None, None);
        assert_eq!(out.bits(), color.bits());
    }

    #[test]
    fn composite_applies_ao_gi_bloom_and_reflection() {
        let color = Image::new(1, 1, Vec4::new(1.0, 0.5, 0.25, 1.0));
        let gi = Image::new(1, 1, Vec4::new(0.5, 0.5, 0.5, 1.0));
        let ao = Image::new(1, 1, Vec4::splat(0.5));
        let bloom = Image::new(1, 1, Vec4::new(0.1, 0.1, 0.1, 0.0));
        let reflection = Image::new(1, 1, Vec4::new(0.0, 0.0, 0.0, 0.5));
        let params = CompositeParams {
            gi: true,
            bloom: true,
            reflection: true,
        };
        let out = composite(params, &color, Some(&gi), Some(&ao), Some(&bloom), Some(&reflection));
        // (c*0.5 + c*0.5 + 0.1) blended halfway toward black.
        let expected = (Vec3::new(1.0, 0.5, 0.25) + 0.1) * 0.5;
        assert!((out.get(0, 0).xyz() - expected).length() < 1e-6);
        assert_eq!(out.get(0, 0).w, 1.0);
    }

    #[test]
    fn taa_without_history_passes_color_through() {
        let color = Image::new(4, 4, Vec4::new(0.3, 0.2, 0.1, 1.0));
        let velocity = Image::new(4, 4, Vec4::ZERO);
        let out = temporal_aa(&TaaParams::default(), &color, &velocity, None);
        assert_eq!(out, color);
    }

    #[test]
    fn taa_converges_on_static_input() {
        let color = Image::new(4, 4, Vec4::new(0.3, 0.2, 0.1, 1.0));
        let velocity = Image::new(4, 4, Vec4::ZERO);
        let history = Image::new(4, 4, Vec4::new(0.0, 0.0, 0.0, 1.0));
        let out = temporal_aa(&TaaParams::default(), &color, &velocity, Some(&history));
        // History is clamped to the neighborhood, which is uniform.
        for (a, b) in out.pixels.iter().zip(&color.pixels) {
            assert!((*a - *b).abs().max_element() < 1e-6);
        }
    }

    #[test]
    fn released_pass_is_not_renderable() {
        let scene = test_scene();
        let camera = camera();
        let mut backend = SoftwareBackend::new(16, 16);
        let built = build_pipeline(&PipelineConfig::plain()).unwrap();
        let mut post = PostProcessing::install(built, &mut backend).unwrap();
        post.dispose(&mut backend);
        assert_eq!(backend.allocated_passes(), 0);
        let err = backend
            .render(&frame(post.graph(), post.output(), &scene, &camera, 0))
            .unwrap_err();
        assert!(matches!(err, RenderError::Unallocated(_)));
    }

    #[test]
    fn srgb_encoding_hits_endpoints() {
        let image = Image::new(1, 1, Vec4::new(0.0, 1.0, 0.5, 1.0));
        let px = image.to_rgba8().get_pixel(0, 0).0;
        assert_eq!(px[0], 0);
        assert_eq!(px[1], 255);
        assert_eq!(px[3], 255);
        assert!(px[2] > 180 && px[2] < 192);
    }
}
