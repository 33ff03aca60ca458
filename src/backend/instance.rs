// Vulkan instance
//
// Responsibilities:
// - Load the Vulkan library
// - Instance creation with the window system's surface extensions
// - Validation layers + debug messenger routed into `log`

use ash::{vk, Entry};
use raw_window_handle::RawDisplayHandle;
use std::ffi::{CStr, CString};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::EngineResult;

const ENGINE_NAME: &CStr = c"vk-present";
const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance wrapper with automatic cleanup. Everything created from the
/// instance (surface, device) keeps an `Arc` to it so it is destroyed last.
pub struct VulkanInstance {
    pub entry: Entry,
    pub instance: ash::Instance,
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create the instance.
    ///
    /// # Arguments
    /// * `app` - Application name and version reported to the driver
    /// * `display` - Display the surfaces will be created on
    /// * `enable_validation` - Enable Vulkan validation layers (debug only)
    pub fn new(
        app: &AppConfig,
        display: RawDisplayHandle,
        enable_validation: bool,
    ) -> EngineResult<Arc<Self>> {
        log::info!("Creating Vulkan instance for {} {}", app.name, app.version);

        let entry = unsafe { Entry::load() }?;

        let enable_validation = enable_validation && Self::has_validation_layer(&entry);

        let app_name = CString::new(app.name.replace('\0', "")).unwrap_or_default();

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(app.version.to_vk())
            .engine_name(ENGINE_NAME)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        // Platform surface extensions come from the window system
        let mut extensions = ash_window::enumerate_required_extensions(display)?.to_vec();
        if enable_validation {
            extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
        }

        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }?;
        log::info!("Created instance");

        let debug_utils = if enable_validation {
            match Self::setup_debug_messenger(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    log::warn!("Debug messenger unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Ok(Arc::new(Self {
            entry,
            instance,
            debug_utils,
        }))
    }

    fn has_validation_layer(entry: &Entry) -> bool {
        let available = entry
            .enumerate_instance_layer_properties()
            .unwrap_or_default()
            .iter()
            .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER);

        if !available {
            log::warn!("Validation layers requested but not installed");
        }
        available
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> EngineResult<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe {
            debug_utils.create_debug_utils_messenger(&create_info, None)
        }?;

        Ok((debug_utils, messenger))
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        log::info!("Destroyed Vulkan instance");
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
