// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// Built once per session; a resized or lost surface is reported as
// `SwapchainOutOfDate` rather than rebuilt.

use ash::vk;
use std::sync::Arc;

use super::device::QueueFamilies;
use super::{Surface, VulkanDevice};
use crate::error::{EngineError, EngineResult};

/// `min + 1` for one image of slack, capped by `max` (0 = no cap)
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        wanted.min(caps.max_image_count)
    } else {
        wanted
    }
}

/// BGRA8 sRGB with the sRGB non-linear color space if offered, otherwise the
/// first reported format. Later matches replace earlier ones.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    let mut chosen = *formats.first()?;
    for format in formats {
        if format.format == vk::Format::B8G8R8A8_SRGB
            && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        {
            chosen = *format;
        }
    }
    Some(chosen)
}

// FIFO: Vsync enabled, guaranteed available
// MAILBOX: No tearing, lowest latency, used whenever offered
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's current extent, unless it reports `u32::MAX` ("match the
/// window"), in which case the framebuffer size clamped to the surface limits.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: framebuffer.width.clamp(
            caps.min_image_extent.width,
            caps.max_image_extent.width,
        ),
        height: framebuffer.height.clamp(
            caps.min_image_extent.height,
            caps.max_image_extent.height,
        ),
    }
}

/// Exclusive when one family does both jobs; concurrent across both otherwise.
pub fn choose_sharing_mode(families: &QueueFamilies) -> (vk::SharingMode, Vec<u32>) {
    if families.same_family() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (vk::SharingMode::CONCURRENT, vec![families.graphics, families.present])
    }
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::extensions::khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    device: Arc<VulkanDevice>,
    _surface: Arc<Surface>,
}

impl Swapchain {
    pub fn new(
        device: Arc<VulkanDevice>,
        surface: Arc<Surface>,
        framebuffer_size: vk::Extent2D,
    ) -> EngineResult<Self> {
        let gpu = device.physical_device();

        let (surface_caps, formats, present_modes) = unsafe {
            (
                surface
                    .loader
                    .get_physical_device_surface_capabilities(gpu, surface.surface)?,
                surface
                    .loader
                    .get_physical_device_surface_formats(gpu, surface.surface)?,
                surface
                    .loader
                    .get_physical_device_surface_present_modes(gpu, surface.surface)?,
            )
        };

        let surface_format = choose_surface_format(&formats)
            .ok_or(EngineError::SwapchainCreationFailed(vk::Result::ERROR_FORMAT_NOT_SUPPORTED))?;
        let present_mode = choose_present_mode(&present_modes);
        let extent = choose_extent(&surface_caps, framebuffer_size);
        let image_count = choose_image_count(&surface_caps);
        let (sharing_mode, queue_family_indices) = choose_sharing_mode(&device.queue_families);

        log::info!(
            "Creating swapchain: {}x{}, {:?}/{:?}, {:?}, {} images requested",
            extent.width,
            extent.height,
            surface_format.format,
            surface_format.color_space,
            present_mode,
            image_count
        );

        let swapchain_loader =
            ash::extensions::khr::Swapchain::new(&device.instance.instance, &device.device);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&queue_family_indices)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(EngineError::SwapchainCreationFailed)?;

        // From here on the swapchain is owned by `this`, so a failure while
        // creating views still releases everything created so far.
        let mut this = Self {
            swapchain,
            swapchain_loader,
            images: Vec::new(),
            image_views: Vec::new(),
            format: surface_format.format,
            present_mode,
            extent,
            device,
            _surface: surface,
        };

        this.images = unsafe { this.swapchain_loader.get_swapchain_images(swapchain) }?;
        log::info!("Obtained {} images from swapchain", this.images.len());

        for &image in &this.images {
            let view = create_color_view(&this.device.device, image, this.format)?;
            this.image_views.push(view);
        }

        Ok(this)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire next image for rendering
    pub fn acquire_next_image(&self, timeout: u64, semaphore: vk::Semaphore) -> EngineResult<u32> {
        let (index, suboptimal) = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout,
                semaphore,
                vk::Fence::null(),
            )
        }?;

        if suboptimal {
            log::debug!("Swapchain is suboptimal for the surface");
        }
        Ok(index)
    }

    /// Present rendered image to screen
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> EngineResult<()> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let suboptimal = unsafe { self.swapchain_loader.queue_present(queue, &present_info) }?;
        if suboptimal {
            log::debug!("Swapchain is suboptimal for the surface");
        }
        Ok(())
    }
}

fn create_color_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
) -> EngineResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping {
            r: vk::ComponentSwizzle::IDENTITY,
            g: vk::ComponentSwizzle::IDENTITY,
            b: vk::ComponentSwizzle::IDENTITY,
            a: vk::ComponentSwizzle::IDENTITY,
        })
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        });

    let view = unsafe { device.create_image_view(&create_info, None) }?;
    Ok(view)
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
        log::info!("Destroyed swapchain");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn prefers_srgb_bgra_anywhere_in_list() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn srgb_format_needs_matching_color_space() {
        let formats = [
            format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::R16G16B16A16_SFLOAT);
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::R8G8B8A8_UNORM);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn mailbox_wins_wherever_listed() {
        let modes = [
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::FIFO_RELAXED,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);

        let modes = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn fifo_without_mailbox() {
        let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&[]), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn undefined_extent_uses_framebuffer_size() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(u32::MAX, u32::MAX),
            min_image_extent: extent(1, 1),
            max_image_extent: extent(4096, 4096),
            ..Default::default()
        };
        assert_eq!(choose_extent(&caps, extent(1920, 1080)), extent(1920, 1080));
        assert_eq!(choose_extent(&caps, extent(8000, 0)), extent(4096, 1));
    }

    #[test]
    fn concrete_extent_is_used_verbatim() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(800, 600),
            min_image_extent: extent(1, 1),
            max_image_extent: extent(4096, 4096),
            ..Default::default()
        };
        assert_eq!(choose_extent(&caps, extent(1920, 1080)), extent(800, 600));
        assert_eq!(choose_extent(&caps, extent(10, 10)), extent(800, 600));
    }

    #[test]
    fn image_count_respects_max() {
        let caps = |min_image_count, max_image_count| vk::SurfaceCapabilitiesKHR {
            min_image_count,
            max_image_count,
            ..Default::default()
        };
        assert_eq!(choose_image_count(&caps(2, 0)), 3);
        assert_eq!(choose_image_count(&caps(2, 8)), 3);
        assert_eq!(choose_image_count(&caps(2, 2)), 2);
        assert_eq!(choose_image_count(&caps(1, 0)), 2);
    }

    #[test]
    fn sharing_mode_follows_queue_families() {
        let (mode, indices) = choose_sharing_mode(&QueueFamilies { graphics: 0, present: 0 });
        assert_eq!(mode, vk::SharingMode::EXCLUSIVE);
        assert!(indices.is_empty());

        let (mode, indices) = choose_sharing_mode(&QueueFamilies { graphics: 1, present: 0 });
        assert_eq!(mode, vk::SharingMode::CONCURRENT);
        assert_eq!(indices, vec![1, 0]);
    }
}
