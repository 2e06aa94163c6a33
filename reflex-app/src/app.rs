use crate::demo::{ArrowTask, RecordLog};
use anyhow::{Context, Result};
use pixels::{Pixels, SurfaceTexture};
use rand::rngs::ThreadRng;
use reflex_engine::{EngineConfig, Session};
use reflex_render::{Scene, SkiaRenderer};
use reflex_store::MemoryPersistence;
use reflex_timing::{Clock, HostClock};
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{Key, NamedKey},
    window::{Fullscreen, Window, WindowId},
};

/// Environment variable naming an optional JSON engine config file.
const CONFIG_ENV: &str = "REFLEX_CONFIG";

pub struct App {
    window: Option<Arc<Window>>,
    pixels: Option<Pixels<'static>>,
    renderer: Option<SkiaRenderer>,
    scene: Scene,
    session: Session<HostClock, ThreadRng, MemoryPersistence>,
    task: Option<ArrowTask>,
    records: RecordLog,
    rng: ThreadRng,
    trials: u32,
    refresh_rate: Option<f64>,

    should_exit: bool,
}

impl App {
    pub fn new(trials: u32) -> Result<Self> {
        let config = match std::env::var(CONFIG_ENV) {
            Ok(path) => {
                let json = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading engine config {path}"))?;
                EngineConfig::from_json(&json).with_context(|| format!("parsing {path}"))?
            }
            Err(_) => EngineConfig::default(),
        };
        let clock = HostClock::detect();
        tracing::info!(
            version = %config.version,
            clock = clock.capability().as_str(),
            "engine configured"
        );
        let session = Session::new(config, clock, rand::rng(), MemoryPersistence::new());

        Ok(Self {
            window: None,
            pixels: None,
            renderer: None,
            scene: Scene::new(),
            session,
            task: None,
            records: RecordLog::default(),
            rng: rand::rng(),
            trials,
            refresh_rate: None,
            should_exit: false,
        })
    }

    pub fn run(mut self) -> Result<()> {
        let event_loop = EventLoop::new()?;
        tracing::info!(
            os = std::env::consts::OS,
            arch = std::env::consts::ARCH,
            "press F for a left arrow, J for a right arrow, ESC to quit"
        );
        event_loop.run_app(&mut self)?;
        Ok(())
    }

    fn create_window_and_surface(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let primary_monitor = event_loop
            .primary_monitor()
            .or_else(|| event_loop.available_monitors().next())
            .context("no monitor available")?;

        self.refresh_rate = primary_monitor
            .refresh_rate_millihertz()
            .map(|rate| rate as f64 / 1000.0);

        let window_attributes = Window::default_attributes()
            .with_title("Reflex")
            .with_fullscreen(Some(Fullscreen::Borderless(Some(primary_monitor))))
            .with_resizable(false);

        let window = Arc::new(event_loop.create_window(window_attributes)?);
        let size = window.inner_size();
        tracing::info!(
            width = size.width,
            height = size.height,
            scale = window.scale_factor(),
            refresh_hz = self.refresh_rate,
            "display configured"
        );

        let surface_texture = SurfaceTexture::new(size.width, size.height, window.clone());
        self.pixels = Some(Pixels::new(size.width, size.height, surface_texture)?);
        self.renderer = Some(SkiaRenderer::new(size.width, size.height)?);

        let center = (size.width as f32 / 2.0, size.height as f32 / 2.0);
        let mut task = ArrowTask::new(&self.scene, center, self.trials);
        task.next_trial(&mut self.session, &mut self.rng);
        self.task = Some(task);

        window.set_cursor_visible(false);
        window.request_redraw();
        self.window = Some(window);

        Ok(())
    }

    /// Advances the session by one frame and presents the scene.
    fn frame(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let (Some(pixels), Some(renderer)) = (self.pixels.as_mut(), self.renderer.as_mut()) else {
            return Ok(());
        };

        let report = self.session.tick(&mut self.records);
        for event in &report.events {
            tracing::debug!(?event, "frame event");
        }

        let stats = renderer.render_frame(&self.scene, pixels.frame_mut())?;
        pixels.render()?;
        if stats.drawn > 0 || stats.dirty_count > 0 {
            tracing::trace!(
                clear_ms = stats.clear.as_secs_f64() * 1e3,
                draw_ms = stats.draw.as_secs_f64() * 1e3,
                copy_ms = stats.copy.as_secs_f64() * 1e3,
                total_ms = stats.total.as_secs_f64() * 1e3,
                dirty = stats.dirty_count,
                "frame rendered"
            );
        }

        if self.session.phase().is_finished() {
            let started = self
                .task
                .as_mut()
                .is_some_and(|task| task.next_trial(&mut self.session, &mut self.rng));
            if !started {
                self.cleanup_and_exit(event_loop);
                return Ok(());
            }
        }

        if let Some(window) = &self.window {
            window.request_redraw();
        }
        Ok(())
    }

    fn handle_key(&mut self, event: KeyEvent, event_loop: &ActiveEventLoop) {
        match event.logical_key {
            Key::Named(NamedKey::Escape) => self.cleanup_and_exit(event_loop),
            Key::Character(ref text) => {
                let Some(symbol) = text.chars().next() else {
                    return;
                };
                if !self.session.is_capturing() {
                    return;
                }
                let outcome = self.session.handle_input(symbol);
                if let Some(record) = outcome.latched {
                    tracing::info!(
                        symbol = %symbol,
                        rt_ms = record.rt,
                        accuracy = record.accuracy,
                        "response"
                    );
                }
            }
            _ => {}
        }
    }

    fn handle_resize(&mut self, new_size: PhysicalSize<u32>) {
        if let Some(pixels) = &mut self.pixels {
            if let Err(err) = pixels.resize_surface(new_size.width, new_size.height) {
                tracing::error!(%err, "failed to resize surface");
            }
            if let Err(err) = pixels.resize_buffer(new_size.width, new_size.height) {
                tracing::error!(%err, "failed to resize buffer");
            }
        }
        if let Some(renderer) = &mut self.renderer {
            if let Err(err) = renderer.resize(new_size.width, new_size.height) {
                tracing::error!(%err, "failed to resize canvas");
            }
        }
        tracing::info!(width = new_size.width, height = new_size.height, "display resized");
    }

    fn cleanup_and_exit(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.set_cursor_visible(true);
        }
        let correct = self
            .records
            .records
            .iter()
            .filter(|r| r.field("probe[ACC]") == Some("1"))
            .count();
        tracing::info!(
            trials = self.records.records.len(),
            correct,
            compatible = self.session.is_compatible(),
            "session finished"
        );
        self.should_exit = true;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(err) = self.create_window_and_surface(event_loop) {
                tracing::error!(error = %format!("{err:#}"), "failed to create window and surface");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => self.cleanup_and_exit(event_loop),
            WindowEvent::RedrawRequested => {
                if let Err(err) = self.frame(event_loop) {
                    tracing::error!(error = %format!("{err:#}"), "frame failed");
                    self.cleanup_and_exit(event_loop);
                }
            }
            WindowEvent::KeyboardInput { event, .. } if event.state.is_pressed() && !event.repeat => {
                self.handle_key(event, event_loop);
            }
            WindowEvent::Resized(size) => self.handle_resize(size),
            WindowEvent::ScaleFactorChanged { .. } => {
                if let Some(window) = &self.window {
                    self.handle_resize(window.inner_size());
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.should_exit {
            event_loop.exit();
        }
    }
}
