// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash with safety and ergonomics
// Ownership: every object holds an Arc to what it was created from, so
// drop order always runs swapchain -> device/surface -> instance

pub mod device;
pub mod frames;
pub mod instance;
pub mod probe;
pub mod render_pass;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use device::{DeviceRequirements, VulkanDevice};
pub use frames::{Renderer, VulkanFrames};
pub use instance::VulkanInstance;
pub use probe::Adapter;
pub use surface::Surface;
pub use swapchain::Swapchain;
