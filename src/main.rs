// =============================================================================
// FRAME SCHEDULER DEMO - windowed driver for the GPU frame scheduler
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit App (window, input, redraw loop)                         │
// │    └── Renderer (selected sample)                               │
// │          └── GpuFrameScheduler (slots, fence, present)          │
// │                └── Vulkan backend (device, surface, queues)     │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Resize the surface if the window changed
// 2. begin_frame: wait only for the slot being reused
// 3. Sample records into the slot's command context
// 4. submit: execute and signal the frame fence
// 5. Stereo only: hand both eyes to the compositor
// 6. present
//
// =============================================================================

mod samples;

use anyhow::{Context, Result};
use frame_scheduler::backend::{TimelineFence, VulkanBackend, VulkanDevice, VulkanSurface};
use frame_scheduler::config::Config;
use frame_scheduler::frame::{GpuFrameScheduler, PresentationSurface};
use frame_scheduler::FrameError;
use samples::Renderer;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Fullscreen, Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    let config = Config::load();
    frame_scheduler::logging::init(&config.debug)?;

    log::info!("Starting frame scheduler demo");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!(
        "Present mode: {}, vsync interval {}",
        config.graphics.present_mode,
        config.graphics.vsync_interval
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Field order matters for Drop: the renderer (and every GPU resource it
/// owns) goes before the window its surface was created from.
struct App {
    // ─────────────────────────────────────────────────────────────────────────
    // CONFIGURATION
    // ─────────────────────────────────────────────────────────────────────────
    config: Config,

    // ─────────────────────────────────────────────────────────────────────────
    // RENDERING
    // ─────────────────────────────────────────────────────────────────────────
    renderer: Option<Renderer>,

    // ─────────────────────────────────────────────────────────────────────────
    // WINDOW
    // ─────────────────────────────────────────────────────────────────────────
    window: Option<Arc<Window>>,
    is_fullscreen: bool,

    // ─────────────────────────────────────────────────────────────────────────
    // STATE FLAGS
    // ─────────────────────────────────────────────────────────────────────────
    /// Set when the window size changed - the surface is rebuilt before the next frame
    needs_resize: bool,
    /// Window has zero area - skip rendering
    is_minimized: bool,
    /// First fatal error; main returns it so the process exits non-zero.
    error: Option<anyhow::Error>,

    fps: FpsCounter,
}

/// Frames per one-second window, reported in the title bar.
struct FpsCounter {
    frames: u32,
    window_start: Instant,
    last_frame: Instant,
}

impl FpsCounter {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            frames: 0,
            window_start: now,
            last_frame: now,
        }
    }

    /// Count one frame; returns (fps, last frame ms) once per second.
    fn tick(&mut self) -> Option<(f32, f32)> {
        let now = Instant::now();
        let frame_ms = (now - self.last_frame).as_secs_f32() * 1000.0;
        self.last_frame = now;
        self.frames += 1;

        let window = (now - self.window_start).as_secs_f32();
        if window < 1.0 {
            return None;
        }
        let fps = self.frames as f32 / window;
        self.frames = 0;
        self.window_start = now;
        Some((fps, frame_ms))
    }
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            is_fullscreen: config.window.fullscreen,
            config,
            renderer: None,
            window: None,
            needs_resize: false,
            is_minimized: false,
            error: None,
            fps: FpsCounter::new(),
        }
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    /// Device, surface, scheduler and sample, in that order.
    fn init_renderer(&self, window: &Window) -> Result<Renderer> {
        log::info!("Initializing Vulkan...");

        let device = VulkanDevice::new(&self.config.window.title, self.config.debug.validation_layers, window)
            .context("Failed to create Vulkan device")?;

        // ─────────────────────────────────────────────────────────────────────
        // One fence for the whole frame loop; the surface keeps a handle to
        // know when an acquire semaphore may be reused.
        // ─────────────────────────────────────────────────────────────────────
        let fence = TimelineFence::new(&device).context("Failed to create frame fence")?;

        let size = window.inner_size();
        let surface = VulkanSurface::new(
            Arc::clone(&device),
            size.width,
            size.height,
            self.config.get_present_mode(),
            self.config.graphics.vsync_interval,
            fence.clone(),
            self.config.scheduler_config().wait_timeout,
        )
        .context("Failed to create swapchain")?;

        let scheduler = GpuFrameScheduler::<VulkanBackend>::new(
            Arc::clone(&device),
            device.graphics_queue(),
            surface,
            fence,
            self.config.scheduler_config(),
        )
        .context("Failed to create frame scheduler")?;

        let renderer = Renderer::new(device, scheduler, &self.config)?;
        log::info!("Vulkan initialized successfully!");
        Ok(renderer)
    }

    /// Record a fatal error and leave the event loop.
    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:#}", error);
        self.shutdown();
        if self.error.is_none() {
            self.error = Some(error);
        }
        event_loop.exit();
    }

    /// Drain the GPU and release every GPU resource while the window still exists.
    fn shutdown(&mut self) {
        if let Some(mut renderer) = self.renderer.take() {
            log::info!("Shutting down renderer...");
            if let Err(e) = renderer.shutdown() {
                log::error!("Shutdown did not drain cleanly: {}", e);
            }
        }
    }

    // =========================================================================
    // RENDERING
    // =========================================================================

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        if self.is_minimized {
            return;
        }
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        if self.needs_resize {
            let Some(window) = self.window.as_ref() else {
                return;
            };
            let size = window.inner_size();
            if let Err(e) = renderer.resize(size.width, size.height) {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to resize surface"));
                return;
            }
            self.needs_resize = false;
        }

        match renderer.frame() {
            Ok(status) => {
                if status.needs_resize() {
                    log::debug!("Present reported {:?}", status);
                    self.needs_resize = true;
                }
                self.update_title();
            }
            Err(FrameError::SurfaceOutOfDate) => {
                self.needs_resize = true;
            }
            Err(FrameError::Cancelled) => {
                self.shutdown();
                event_loop.exit();
            }
            Err(e) => self.fail(event_loop, anyhow::Error::new(e).context("Frame failed")),
        }
    }

    // =========================================================================
    // INPUT
    // =========================================================================

    /// Escape quits, F11 toggles borderless fullscreen.
    fn handle_key(&mut self, event_loop: &ActiveEventLoop, key: KeyCode) {
        match key {
            KeyCode::Escape => {
                log::info!("Escape pressed, exiting");
                self.shutdown();
                event_loop.exit();
            }
            KeyCode::F11 => {
                let Some(window) = self.window.as_ref() else {
                    return;
                };
                self.is_fullscreen = !self.is_fullscreen;
                let mode = self.is_fullscreen.then_some(Fullscreen::Borderless(None));
                window.set_fullscreen(mode);
                log::info!("Fullscreen: {}", self.is_fullscreen);
                self.needs_resize = true;
            }
            _ => {}
        }
    }

    fn update_title(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }
        let Some((fps, frame_ms)) = self.fps.tick() else {
            return;
        };

        if let (Some(window), Some(renderer)) = (&self.window, &self.renderer) {
            let scheduler = renderer.scheduler();
            let extent = scheduler.surface().extent();
            window.set_title(&format!(
                "{} - {:.0} FPS ({:.2}ms) [{}x{}, {} stalls]",
                self.config.window.title,
                fps,
                frame_ms,
                extent.width,
                extent.height,
                scheduler.stats().stalls
            ));
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));
        if self.config.window.fullscreen {
            window_attributes = window_attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        match self.init_renderer(&window) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                self.fail(event_loop, e.context("Failed to initialize Vulkan"));
                return;
            }
        }
        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            // ─────────────────────────────────────────────────────────────────
            // CLOSE REQUEST
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown();
                event_loop.exit();
            }

            // ─────────────────────────────────────────────────────────────────
            // WINDOW RESIZED
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);

                if size.width == 0 || size.height == 0 {
                    self.is_minimized = true;
                } else {
                    self.is_minimized = false;
                    self.needs_resize = true;
                }
            }

            WindowEvent::RedrawRequested => self.redraw(event_loop),

            // ─────────────────────────────────────────────────────────────────
            // KEYBOARD INPUT
            // ─────────────────────────────────────────────────────────────────
            WindowEvent::KeyboardInput { event, .. } => match event.physical_key {
                PhysicalKey::Code(key) if event.state.is_pressed() => self.handle_key(event_loop, key),
                _ => {}
            },

            _ => {}
        }
    }

    /// Continuous redraws; the scheduler's slot wait is what paces the loop.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}
