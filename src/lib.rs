//! # uspace
//!
//! **A wgpu scene viewer built around a typed post-processing render graph.**
//!
//! A [`Viewer`] owns one [`RenderBackend`](render_graph::RenderBackend), a
//! `hecs`-backed [`Scene`](scene::Scene), an orbit camera and an asynchronous
//! asset loader. Scenes are mounted with a setup closure and a
//! [`PipelineConfig`](render_graph::PipelineConfig); the viewer builds the
//! matching graph (geometry, SSR, SSGI, bloom, composite, atmosphere stages,
//! tone mapping, TAA, dithering) and presents it every frame.
//!
//! ## Quick Start
//!
//! ```no_run
//! use uspace::scenes::SceneKind;
//! use uspace::ViewerConfig;
//!
//! fn main() -> Result<(), uspace::error::ViewerError> {
//!     let config = ViewerConfig::new().title("uspace").size(1600, 900);
//!     uspace::run(config, SceneKind::Atmosphere)
//! }
//! ```
//!
//! Mounting a custom scene on any backend:
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Instant;
//!
//! use uspace::mesh::{Material, MeshData, Transform};
//! use uspace::render_graph::{PipelineConfig, SoftwareBackend};
//! use uspace::{Input, Viewer, ViewerConfig};
//!
//! let mut viewer = Viewer::new(SoftwareBackend::new(320, 240), ViewerConfig::default());
//! viewer
//!     .mount("cube", PipelineConfig::screen_space_effects(), |ctx| {
//!         let root = ctx.scene.root();
//!         let cube = ctx.scene.add_mesh(
//!             root,
//!             "cube",
//!             Arc::new(MeshData::cube()),
//!             Material::default(),
//!             Transform::new(),
//!         );
//!         ctx.track(cube);
//!         Ok(())
//!     })
//!     .unwrap();
//! viewer.frame(Instant::now(), &Input::new()).unwrap();
//! ```

mod app;
pub mod assets;
pub mod atmosphere;
pub mod camera;
pub mod clock;
pub mod config;
pub mod controls;
pub mod error;
pub mod gpu;
pub mod gpu_graph;
pub mod input;
pub mod lifecycle;
pub mod mesh;
pub mod render_graph;
pub mod scene;
pub mod scenes;
pub mod texture;
pub mod tiles;
pub mod viewer;

pub use app::run;
pub use camera::PerspectiveCamera;
pub use config::{ToneMapping, ViewerConfig};
pub use controls::OrbitControls;
pub use gpu::GpuContext;
pub use gpu_graph::GpuBackend;
pub use input::Input;
pub use viewer::{HookContext, HookId, MountContext, Viewer};

// Re-export glam math types for convenience
pub use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

// Re-export commonly used winit types for convenience
pub use winit::event::MouseButton;
pub use winit::keyboard::KeyCode;

pub use hecs::Entity;
