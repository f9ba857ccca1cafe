//! The windowed frame loop.

use std::sync::Arc;
use std::time::Instant;

use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowAttributes, WindowId};

use crate::config::ViewerConfig;
use crate::error::ViewerError;
use crate::gpu_graph::GpuBackend;
use crate::input::Input;
use crate::scenes::{self, SceneKind};
use crate::viewer::Viewer;

/// Opens a window, mounts `scene` and runs until the window closes.
///
/// Returns the first error that stopped the loop, if any.
pub fn run(config: ViewerConfig, scene: SceneKind) -> Result<(), ViewerError> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = ViewerApp::Pending {
        config: Some(config),
        scene,
    };
    event_loop.run_app(&mut app)?;

    match app {
        ViewerApp::Failed(err) => Err(err),
        _ => Ok(()),
    }
}

enum ViewerApp {
    Pending {
        config: Option<ViewerConfig>,
        scene: SceneKind,
    },
    Running {
        window: Arc<Window>,
        viewer: Viewer<GpuBackend>,
        input: Input,
    },
    Failed(ViewerError),
}

impl ViewerApp {
    fn start(
        event_loop: &ActiveEventLoop,
        config: ViewerConfig,
        scene: SceneKind,
    ) -> Result<Self, ViewerError> {
        let window_attrs = WindowAttributes::default()
            .with_title(format!("{} - {}", config.title, scene.name()))
            .with_inner_size(winit::dpi::LogicalSize::new(config.width, config.height));
        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let backend = GpuBackend::new(window.clone())?;
        let mut viewer = Viewer::new(backend, config);
        scenes::mount(&mut viewer, scene)?;
        window.request_redraw();

        Ok(ViewerApp::Running {
            window,
            viewer,
            input: Input::new(),
        })
    }
}

impl ApplicationHandler for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let ViewerApp::Pending { config, scene } = self else {
            return;
        };
        let Some(config) = config.take() else {
            return;
        };
        *self = match Self::start(event_loop, config, *scene) {
            Ok(running) => running,
            Err(err) => {
                tracing::error!(error = %err, "failed to start viewer");
                event_loop.exit();
                ViewerApp::Failed(err)
            }
        };
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let ViewerApp::Running {
            window,
            viewer,
            input,
        } = self
        else {
            return;
        };

        input.handle_event(&event);

        match event {
            WindowEvent::CloseRequested => {
                viewer.dispose();
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                viewer.resize(size.width, size.height);
            }
            WindowEvent::RedrawRequested => {
                match viewer.frame(Instant::now(), input) {
                    Ok(true) => window.request_redraw(),
                    Ok(false) => event_loop.exit(),
                    Err(err) => {
                        tracing::error!(error = %err, "frame failed");
                        viewer.dispose();
                        event_loop.exit();
                        *self = ViewerApp::Failed(err);
                        return;
                    }
                }
                input.end_frame();
            }
            _ => {}
        }
    }
}
