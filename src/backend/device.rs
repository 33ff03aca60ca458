// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Graphics/present queue family selection
// - Required extension/feature validation (before any driver call)
// - Logical device + queue creation

use ash::vk;
use std::ffi::CStr;
use std::sync::Arc;

use super::probe::{missing_features, Adapter};
use super::{Surface, VulkanInstance};
use crate::error::{EngineError, EngineResult};

/// What the logical device must be created with. Passed in explicitly so
/// the caller owns the policy.
#[derive(Clone)]
pub struct DeviceRequirements {
    pub extensions: Vec<&'static CStr>,
    pub features: vk::PhysicalDeviceFeatures,
}

impl Default for DeviceRequirements {
    fn default() -> Self {
        Self {
            extensions: vec![ash::extensions::khr::Swapchain::name()],
            features: vk::PhysicalDeviceFeatures::default(),
        }
    }
}

/// Per queue family: can it do graphics, can it present to our surface
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilySupport {
    pub graphics: bool,
    pub present: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// First graphics-capable family and first present-capable family,
    /// chosen independently.
    pub fn select(support: &[QueueFamilySupport]) -> EngineResult<Self> {
        let mut graphics = None;
        let mut present = None;

        for (index, family) in (0u32..).zip(support) {
            if graphics.is_none() && family.graphics {
                graphics = Some(index);
            }
            if present.is_none() && family.present {
                present = Some(index);
            }
        }

        Ok(Self {
            graphics: graphics.ok_or(EngineError::NoSuitableQueueFamily("graphics"))?,
            present: present.ok_or(EngineError::NoSuitableQueueFamily("presentation"))?,
        })
    }

    pub fn same_family(&self) -> bool {
        self.graphics == self.present
    }

    /// One entry if both roles share a family, two otherwise
    pub fn unique(&self) -> Vec<u32> {
        if self.same_family() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Every name in `required` must be in the adapter's extension set.
pub fn check_required_extensions(adapter: &Adapter, required: &[&CStr]) -> EngineResult<()> {
    for ext in required {
        let name = ext.to_string_lossy();
        if !adapter.supports_extension(&name) {
            log::error!("GPU does not support extension '{}'", name);
            return Err(EngineError::UnsupportedExtension(name.into_owned()));
        }
    }
    Ok(())
}

/// Everything decided before `vkCreateDevice` is called.
#[derive(Debug)]
pub struct DevicePlan {
    pub families: QueueFamilies,
    pub extensions: Vec<&'static CStr>,
    pub features: vk::PhysicalDeviceFeatures,
}

impl DevicePlan {
    pub fn new(
        adapter: &Adapter,
        support: &[QueueFamilySupport],
        requirements: &DeviceRequirements,
    ) -> EngineResult<Self> {
        let families = QueueFamilies::select(support)?;

        check_required_extensions(adapter, &requirements.extensions)?;

        if let Some(&feature) = missing_features(&adapter.features, &requirements.features).first() {
            return Err(EngineError::UnsupportedFeature(feature));
        }

        Ok(Self {
            families,
            extensions: requirements.extensions.clone(),
            features: requirements.features,
        })
    }
}

/// Logical device with automatic cleanup
pub struct VulkanDevice {
    pub device: ash::Device,
    pub adapter: Adapter,

    // Queue handles; identical when both roles share a family
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub queue_families: QueueFamilies,

    pub instance: Arc<VulkanInstance>,
}

impl VulkanDevice {
    pub fn new(
        instance: Arc<VulkanInstance>,
        adapter: Adapter,
        surface: &Surface,
        requirements: &DeviceRequirements,
    ) -> EngineResult<Arc<Self>> {
        let support = Self::query_queue_families(&adapter, surface)?;
        let plan = DevicePlan::new(&adapter, &support, requirements)?;
        let families = plan.families;

        log::info!(
            "Queue families: graphics #{}, present #{}{}",
            families.graphics,
            families.present,
            if families.same_family() { " (shared)" } else { "" }
        );

        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions: Vec<_> = plan.extensions.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&plan.features);

        let device = unsafe {
            instance.instance.create_device(adapter.handle, &create_info, None)
        }?;
        log::info!("Created logical device");

        let (graphics_queue, present_queue) = unsafe {
            (
                device.get_device_queue(families.graphics, 0),
                device.get_device_queue(families.present, 0),
            )
        };

        Ok(Arc::new(Self {
            device,
            adapter,
            graphics_queue,
            present_queue,
            queue_families: families,
            instance,
        }))
    }

    fn query_queue_families(
        adapter: &Adapter,
        surface: &Surface,
    ) -> EngineResult<Vec<QueueFamilySupport>> {
        (0u32..)
            .zip(&adapter.queue_families)
            .map(|(index, family)| -> EngineResult<QueueFamilySupport> {
                let support = QueueFamilySupport {
                    graphics: family.queue_flags.contains(vk::QueueFlags::GRAPHICS),
                    present: surface.supports_present(adapter.handle, index)?,
                };
                log::debug!(
                    "Queue family #{}: {:?} x{}, present: {}",
                    index,
                    family.queue_flags,
                    family.queue_count,
                    support.present
                );
                Ok(support)
            })
            .collect()
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.adapter.handle
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> EngineResult<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        // Wait for device to finish
        let _ = self.wait_idle();

        unsafe {
            self.device.destroy_device(None);
        }
    }
}
