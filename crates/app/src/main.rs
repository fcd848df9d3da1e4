//! Ember - demo application entry point.
//!
//! Owns the winit event loop and feeds it into the engine: keyboard input
//! cycles the background effect, resize events latch a swapchain rebuild,
//! and every redraw renders one frame. While the window is minimized the
//! loop parks in `ControlFlow::Wait` and stops requesting redraws.

use anyhow::Result;
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use ember_core::Timer;
use ember_engine::{Engine, EngineConfig, EngineError, NoOverlay};
use ember_platform::{InputState, KeyCode, Window};

struct App {
    config: EngineConfig,
    window: Option<Window>,
    engine: Option<Engine>,
    input: InputState,
    /// Drawable area is zero; skip frames until the window comes back
    minimized: bool,
    /// Initialization failure, reported by `main` after the loop exits
    init_error: Option<anyhow::Error>,
}

impl App {
    fn new(config: EngineConfig) -> Self {
        Self {
            config,
            window: None,
            engine: None,
            input: InputState::new(),
            minimized: false,
            init_error: None,
        }
    }

    fn draw_frame(&mut self) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };

        engine.update(&self.input);

        if let Err(e) = engine.draw() {
            match e {
                EngineError::FrameTimeout => error!("GPU stopped responding: {e}"),
                other => error!("Frame failed: {other}"),
            }
            // The device may be hung; tearing the engine down would block
            // on it. Leave cleanup to the OS.
            std::process::exit(1);
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let startup = Timer::new();
        let created = Window::new(
            event_loop,
            self.config.width,
            self.config.height,
            &self.config.title,
        )
        .map_err(anyhow::Error::from)
        .and_then(|window| {
            let engine = Engine::new(&window, &self.config, Box::new(NoOverlay::new()))?;
            Ok((window, engine))
        });

        match created {
            Ok((window, engine)) => {
                info!(
                    "Initialization complete in {:.2}s, entering main loop",
                    startup.elapsed_secs()
                );
                self.window = Some(window);
                self.engine = Some(engine);
            }
            Err(e) => {
                error!("Initialization failed: {e:?}");
                self.init_error = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Window close requested, exiting");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                info!("Window now {}x{}", size.width, size.height);
                if let Some(ref mut engine) = self.engine {
                    engine.request_resize(size.width, size.height);
                }

                self.minimized = size.width == 0 || size.height == 0;
                // No redraws arrive while minimized, so polling would spin
                // for nothing.
                event_loop.set_control_flow(if self.minimized {
                    ControlFlow::Wait
                } else {
                    ControlFlow::Poll
                });
            }
            WindowEvent::RedrawRequested => {
                if !self.minimized {
                    self.draw_frame();
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::PhysicalKey;
                if let PhysicalKey::Code(key) = event.physical_key {
                    if event.state.is_pressed() {
                        self.input.on_key_pressed(key);
                        if key == KeyCode::Escape {
                            info!("Escape pressed, shutting down");
                            event_loop.exit();
                        }
                    } else {
                        self.input.on_key_released(key);
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        self.input.begin_frame();
        if !self.minimized
            && let Some(ref window) = self.window
        {
            window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    ember_core::init_logging();
    info!("Starting Ember");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(EngineConfig {
        width: 1280,
        height: 720,
        ..EngineConfig::default()
    });
    event_loop.run_app(&mut app)?;

    if let Some(e) = app.init_error {
        return Err(e);
    }
    Ok(())
}
