// Platform window driven by polling
//
// The engine owns the main loop, so winit runs in pump mode: every
// `pump_events()` drains what is pending and returns immediately.

use ash::vk;
use raw_window_handle::{
    HasRawDisplayHandle, HasRawWindowHandle, RawDisplayHandle, RawWindowHandle,
};
use std::sync::Arc;
use std::time::Duration;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    monitor::MonitorHandle,
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Fullscreen, WindowAttributes, WindowId, WindowLevel},
};

use crate::config::WindowMode;
use crate::error::{EngineError, EngineResult};

/// Pumps allowed for the platform to deliver `resumed` at startup
const STARTUP_PUMPS: usize = 100;
const STARTUP_PUMP_TIMEOUT: Duration = Duration::from_millis(10);

struct WindowState {
    title: String,
    mode: WindowMode,
    window: Option<Arc<winit::window::Window>>,
    create_error: Option<String>,
    close_requested: bool,
}

impl WindowState {
    fn attributes(&self, event_loop: &ActiveEventLoop) -> WindowAttributes {
        let attributes = winit::window::Window::default_attributes().with_title(&self.title);

        match &self.mode {
            WindowMode::Windowed(windowed) => attributes
                .with_inner_size(winit::dpi::PhysicalSize::new(
                    windowed.size.x,
                    windowed.size.y,
                ))
                .with_resizable(windowed.resizable)
                .with_window_level(if windowed.floating {
                    WindowLevel::AlwaysOnTop
                } else {
                    WindowLevel::Normal
                }),
            WindowMode::Fullscreen(fullscreen) => {
                let monitors: Vec<_> = event_loop.available_monitors().collect();
                let monitor = fullscreen
                    .resolve_monitor(monitors.len())
                    .map(|index| monitors[index].clone());

                if !monitors.is_empty() && fullscreen.monitor >= monitors.len() {
                    log::warn!(
                        "Monitor {} requested but only {} connected, using the last one",
                        fullscreen.monitor,
                        monitors.len()
                    );
                }

                attributes.with_fullscreen(Some(fullscreen_on(monitor)))
            }
        }
    }
}

/// Exclusive fullscreen in the monitor's native mode, borderless when the
/// monitor reports no modes. No monitor: the platform picks the current one.
fn fullscreen_on(monitor: Option<MonitorHandle>) -> Fullscreen {
    let Some(monitor) = monitor else {
        return Fullscreen::Borderless(None);
    };

    let native = monitor.size();
    let mode = pick_video_mode(monitor.video_modes(), |mode| mode.size() == native);

    match mode {
        Some(mode) => {
            log::info!(
                "Exclusive fullscreen: {}x{} @ {} mHz",
                mode.size().width,
                mode.size().height,
                mode.refresh_rate_millihertz()
            );
            Fullscreen::Exclusive(mode)
        }
        None => {
            log::info!("Monitor reports no video modes, using borderless fullscreen");
            Fullscreen::Borderless(Some(monitor))
        }
    }
}

/// First mode at the native size, otherwise the first mode listed.
fn pick_video_mode<M>(modes: impl IntoIterator<Item = M>, is_native: impl Fn(&M) -> bool) -> Option<M> {
    let mut first = None;
    for mode in modes {
        if is_native(&mode) {
            return Some(mode);
        }
        if first.is_none() {
            first = Some(mode);
        }
    }
    first
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        match event_loop.create_window(self.attributes(event_loop)) {
            Ok(window) => self.window = Some(Arc::new(window)),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                self.create_error = Some(e.to_string());
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.close_requested = true;
            }
            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
            }
            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    self.close_requested = true;
                }
            }
            _ => {}
        }
    }
}

pub struct Window {
    state: WindowState,
    handle: Arc<winit::window::Window>,
    // Declared last: the event loop must outlive the window
    event_loop: EventLoop<()>,
}

impl Window {
    pub fn new(title: &str, mode: &WindowMode) -> EngineResult<Self> {
        let mut event_loop = EventLoop::new().map_err(|e| EngineError::Window(e.to_string()))?;

        let mut state = WindowState {
            title: title.to_string(),
            mode: mode.clone(),
            window: None,
            create_error: None,
            close_requested: false,
        };

        // The window is created from `resumed`, delivered by the first pumps
        for _ in 0..STARTUP_PUMPS {
            let status = event_loop.pump_app_events(Some(STARTUP_PUMP_TIMEOUT), &mut state);
            if state.window.is_some() || state.create_error.is_some() {
                break;
            }
            if let PumpStatus::Exit(code) = status {
                return Err(EngineError::Window(format!(
                    "event loop exited with code {} before the window was created",
                    code
                )));
            }
        }

        if let Some(error) = state.create_error.take() {
            return Err(EngineError::Window(error));
        }
        let handle = state
            .window
            .clone()
            .ok_or_else(|| EngineError::Window("platform never resumed the application".into()))?;

        let size = handle.inner_size();
        log::info!(
            "Window '{}' created: {}x{} ({})",
            title,
            size.width,
            size.height,
            match mode {
                WindowMode::Windowed(_) => "windowed",
                WindowMode::Fullscreen(_) => "fullscreen",
            }
        );

        Ok(Self {
            state,
            handle,
            event_loop,
        })
    }

    /// Drain pending window events without blocking.
    pub fn pump_events(&mut self) {
        let status = self
            .event_loop
            .pump_app_events(Some(Duration::ZERO), &mut self.state);

        if let PumpStatus::Exit(code) = status {
            log::debug!("Event loop exited with code {}", code);
            self.state.close_requested = true;
        }
    }

    pub fn should_close(&self) -> bool {
        self.state.close_requested
    }

    /// Drawable size in pixels
    pub fn framebuffer_size(&self) -> vk::Extent2D {
        let size = self.handle.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }

    pub fn set_title(&self, title: &str) {
        self.handle.set_title(title);
    }

    pub fn title(&self) -> &str {
        &self.state.title
    }
}

unsafe impl HasRawWindowHandle for Window {
    fn raw_window_handle(&self) -> RawWindowHandle {
        self.handle.raw_window_handle()
    }
}

unsafe impl HasRawDisplayHandle for Window {
    fn raw_display_handle(&self) -> RawDisplayHandle {
        self.handle.raw_display_handle()
    }
}
