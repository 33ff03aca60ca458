// =============================================================================
// VULKAN PRESENT LOOP - device setup, swapchain, frame pacing
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  Engine (window, main loop, App lifecycle)                      │
// │    └── Instance + adapter probe                                 │
// │          └── Surface + logical device                           │
// │                └── Swapchain (image buffers)                    │
// │                      └── Frame synchronizer (fences, semaphores)│
// └─────────────────────────────────────────────────────────────────┘
//
// The demo app below clears every swapchain image to the configured color
// and shows the frame rate in the window title.
//
// =============================================================================

mod backend;
mod clock;
mod config;
mod engine;
mod error;
mod renderer;
mod window;

use anyhow::{Context, Result};
use backend::Renderer;
use config::{Config, WindowMode};
use engine::{App, Engine, EngineContext};
use error::EngineError;
use std::fs::OpenOptions;
use std::io::Write;
use std::time::Instant;

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Logging first, so config load problems are reported
    init_logging();

    // Load configuration from config.toml
    let config = Config::load();
    if config.debug.log_to_file {
        write_log_header(&config);
    }

    log::info!("Starting {} {}", config.app.name, config.app.version);
    match &config.window {
        WindowMode::Windowed(windowed) => log::info!(
            "Window: {}x{} (windowed{})",
            windowed.size.x,
            windowed.size.y,
            if windowed.floating { ", floating" } else { "" }
        ),
        WindowMode::Fullscreen(fullscreen) => {
            log::info!("Window: fullscreen on monitor {}", fullscreen.monitor)
        }
    }

    Engine::launch::<ClearApp>(config)
}

/// Initialize logging at Info unless RUST_LOG says otherwise
fn init_logging() {
    use env_logger::Builder;
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();
    builder.init();
}

/// Create/clear the log file for validation errors
fn write_log_header(config: &Config) {
    match OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&config.debug.log_file)
    {
        Ok(mut file) => {
            let _ = writeln!(file, "=== {} Log ===", config.app.name);
            let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
            let _ = writeln!(file);
        }
        Err(e) => log::warn!("Cannot open log file {:?}: {}", config.debug.log_file, e),
    }
}

// =============================================================================
// DEMO APP
// =============================================================================

#[derive(Default)]
struct ClearApp {
    renderer: Option<Renderer>,
    last_title_update: Option<Instant>,
}

impl ClearApp {
    /// Refresh the title once per second
    fn update_title(&mut self, ctx: &EngineContext) {
        let clock = ctx.clock();
        let now = clock.last_frame();

        let due = self
            .last_title_update
            .map_or(true, |last| now.duration_since(last).as_secs_f32() >= 1.0);
        if !due {
            return;
        }
        self.last_title_update = Some(now);

        ctx.window().set_title(&format!(
            "{} - {:.0} FPS ({:.2}ms)",
            ctx.window().title(),
            clock.smoothed_fps(),
            clock.frame_time().as_secs_f64() * 1000.0,
        ));
    }
}

impl App for ClearApp {
    fn setup(&mut self, ctx: &mut EngineContext) -> Result<()> {
        let families = ctx.queue_families();
        log::debug!(
            "Rendering on {:?} (family {}), presenting on {:?} (family {})",
            ctx.graphics_queue(),
            families.graphics,
            ctx.present_queue(),
            families.present
        );

        let graphics = &ctx.config().graphics;
        let renderer = Renderer::for_swapchain(
            ctx.device().clone(),
            ctx.swapchain().clone(),
            graphics.clear_color,
            graphics.fence_timeout_ns(),
        )
        .context("Failed to create frame resources")?;

        self.renderer = Some(renderer);
        Ok(())
    }

    fn update(&mut self, ctx: &mut EngineContext, _dt: f64) -> Result<()> {
        let renderer = self.renderer.as_mut().context("Renderer not initialized")?;
        match renderer.render_frame() {
            Ok(()) => {}
            // The swapchain is never rebuilt; a stale one ends the run normally
            Err(EngineError::SwapchainOutOfDate) => {
                log::info!("Swapchain out of date after {} frames, stopping", renderer.frame_count());
                ctx.stop();
            }
            Err(e) => {
                log::warn!(
                    "Frame {} failed: {} ({:?} error, retryable: {})",
                    renderer.frame_count(),
                    e,
                    e.kind(),
                    e.is_retryable()
                );
                return Err(e).context("Failed to render frame");
            }
        }

        if ctx.is_running() && ctx.config().debug.show_fps {
            self.update_title(ctx);
        }
        Ok(())
    }

    fn cleanup(&mut self, ctx: &mut EngineContext) {
        if let Some(mut renderer) = self.renderer.take() {
            renderer.destroy();
            log::info!("Submitted {} frames", renderer.frame_count());
        }

        let clock = ctx.clock();
        log::info!(
            "Ran {} frames in {:.2}s (average {:.1} FPS, last {:.1} FPS)",
            clock.frame_count(),
            clock.uptime().as_secs_f64(),
            clock.average_fps(),
            clock.fps()
        );
    }
}
