// =============================================================================
// ENGINE - startup, main loop, teardown
// =============================================================================
//
// STARTUP:
// window -> instance -> adapter -> surface -> device -> swapchain -> app.setup
//
// LOOP (one iteration):
// pump events -> clock tick -> app.update(dt) -> stop check
//
// TEARDOWN:
// wait idle -> app.cleanup -> app dropped -> swapchain, device, surface,
// instance, window
//
// =============================================================================

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::HasRawDisplayHandle;
use std::sync::Arc;

use crate::backend::device::QueueFamilies;
use crate::backend::probe::{list_adapters, pick_adapter};
use crate::backend::{DeviceRequirements, Surface, Swapchain, VulkanDevice, VulkanInstance};
use crate::clock::AppClock;
use crate::config::Config;
use crate::window::Window;

/// Lifecycle hooks of an application run by the engine
pub trait App {
    /// Called once, after the swapchain exists and before the first update.
    fn setup(&mut self, ctx: &mut EngineContext) -> Result<()>;

    /// Called once per loop iteration with the last frame's duration in seconds.
    /// Returning an error stops the loop.
    fn update(&mut self, ctx: &mut EngineContext, dt: f64) -> Result<()>;

    /// Called once after the loop ends and the device is idle.
    fn cleanup(&mut self, ctx: &mut EngineContext);
}

/// What an app sees of the engine during a lifecycle call
pub struct EngineContext<'a> {
    config: &'a Config,
    clock: &'a AppClock,
    window: &'a Window,
    device: &'a Arc<VulkanDevice>,
    swapchain: &'a Arc<Swapchain>,
    running: &'a mut bool,
}

impl<'a> EngineContext<'a> {
    pub fn config(&self) -> &Config {
        self.config
    }

    pub fn clock(&self) -> &AppClock {
        self.clock
    }

    pub fn window(&self) -> &Window {
        self.window
    }

    pub fn device(&self) -> &Arc<VulkanDevice> {
        self.device
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.device.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.device.present_queue
    }

    pub fn queue_families(&self) -> QueueFamilies {
        self.device.queue_families
    }

    pub fn swapchain(&self) -> &Arc<Swapchain> {
        self.swapchain
    }

    /// Ask the engine to leave the loop after the current iteration.
    pub fn stop(&mut self) {
        *self.running = false;
    }

    pub fn is_running(&self) -> bool {
        *self.running
    }
}

/// Everything created at startup. Field order is drop order.
struct Core {
    swapchain: Arc<Swapchain>,
    device: Arc<VulkanDevice>,
    _surface: Arc<Surface>,
    _instance: Arc<VulkanInstance>,
    window: Window,
}

impl Core {
    fn new(config: &Config) -> Result<Self> {
        let window = Window::new(&config.app.name, &config.window)
            .context("Failed to create window")?;

        // Enable validation layers based on config (and debug build)
        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
        let instance = VulkanInstance::new(&config.app, window.raw_display_handle(), enable_validation)
            .context("Failed to create Vulkan instance")?;

        let adapter = list_adapters(&instance)
            .and_then(pick_adapter)
            .context("Failed to find a GPU")?;
        adapter.log_capabilities();

        let surface = Surface::new(instance.clone(), &window)
            .context("Failed to create window surface")?;

        let device = VulkanDevice::new(
            instance.clone(),
            adapter,
            &surface,
            &DeviceRequirements::default(),
        )
        .context("Failed to create logical device")?;

        let swapchain = Swapchain::new(device.clone(), surface.clone(), window.framebuffer_size())
            .context("Failed to create swapchain")?;

        log::info!("Vulkan initialized successfully!");

        Ok(Self {
            swapchain: Arc::new(swapchain),
            device,
            _surface: surface,
            _instance: instance,
            window,
        })
    }

    fn context<'a>(
        &'a self,
        config: &'a Config,
        clock: &'a AppClock,
        running: &'a mut bool,
    ) -> EngineContext<'a> {
        EngineContext {
            config,
            clock,
            window: &self.window,
            device: &self.device,
            swapchain: &self.swapchain,
            running,
        }
    }
}

pub struct Engine {
    config: Config,
}

impl Engine {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run a default-constructed `A` until it or the window asks to stop.
    pub fn launch<A: App + Default + 'static>(config: Config) -> Result<()> {
        Self::new(config).run(Box::new(A::default()))
    }

    pub fn run(self, mut app: Box<dyn App>) -> Result<()> {
        let mut core = Core::new(&self.config)?;
        let result = self.drive(&mut core, app.as_mut());

        // The app may hold GPU objects; they go before the core they came from
        drop(app);
        drop(core);
        log::info!("Cleanup complete");

        result
    }

    fn drive(&self, core: &mut Core, app: &mut dyn App) -> Result<()> {
        let mut clock = AppClock::new();
        let mut running = true;

        app.setup(&mut core.context(&self.config, &clock, &mut running))
            .context("Application setup failed")?;

        let mut failure = None;
        while running {
            core.window.pump_events();
            clock.next_frame();
            let dt = clock.frame_time().as_secs_f64();

            if let Err(e) = app.update(&mut core.context(&self.config, &clock, &mut running), dt) {
                log::error!("Update failed, stopping: {:#}", e);
                failure = Some(e);
                break;
            }

            if core.window.should_close() {
                running = false;
            }
        }

        log::info!(
            "Main loop finished after {} frames ({:.2}s)",
            clock.frame_count(),
            clock.last_frame().duration_since(clock.start_time()).as_secs_f64()
        );
        if let Err(e) = core.device.wait_idle() {
            log::warn!("Device did not go idle: {}", e);
        }

        app.cleanup(&mut core.context(&self.config, &clock, &mut running));

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
