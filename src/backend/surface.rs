// Presentation surface bound to the window

use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::sync::Arc;

use super::VulkanInstance;
use crate::error::EngineResult;

/// Owns the `vk::SurfaceKHR`. The swapchain holds an `Arc` to it, so the
/// surface is always destroyed after the swapchain built on it.
pub struct Surface {
    pub surface: vk::SurfaceKHR,
    pub loader: ash::extensions::khr::Surface,
    _instance: Arc<VulkanInstance>,
}

impl Surface {
    pub fn new<W>(instance: Arc<VulkanInstance>, window: &W) -> EngineResult<Arc<Self>>
    where
        W: HasRawDisplayHandle + HasRawWindowHandle,
    {
        let surface = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }?;
        let loader = ash::extensions::khr::Surface::new(&instance.entry, &instance.instance);
        log::debug!("Created window surface");

        Ok(Arc::new(Self {
            surface,
            loader,
            _instance: instance,
        }))
    }

    /// Whether `queue_family` on `gpu` can present to this surface.
    pub fn supports_present(&self, gpu: vk::PhysicalDevice, queue_family: u32) -> EngineResult<bool> {
        let supported = unsafe {
            self.loader
                .get_physical_device_surface_support(gpu, queue_family, self.surface)
        }?;
        Ok(supported)
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.surface, None);
        }
        log::debug!("Destroyed window surface");
    }
}
