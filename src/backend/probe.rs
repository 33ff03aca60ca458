// Capability probe - GPU discovery
//
// Enumerates every physical device once at startup and caches what device
// creation later needs to know: properties, features, queue families and
// the supported device extension/layer names.

use ash::vk;
use std::collections::HashSet;
use std::ffi::CStr;

use super::VulkanInstance;
use crate::error::{EngineError, EngineResult};

/// Expands to the `(name, field)` table for every `vk::PhysicalDeviceFeatures` flag.
macro_rules! feature_table {
    ($($field:ident),* $(,)?) => {
        /// Every Vulkan 1.0 feature flag as `(name, enabled)`.
        pub fn feature_flags(features: &vk::PhysicalDeviceFeatures) -> Vec<(&'static str, bool)> {
            vec![$((stringify!($field), features.$field == vk::TRUE)),*]
        }
    };
}

feature_table!(
    robust_buffer_access,
    full_draw_index_uint32,
    image_cube_array,
    independent_blend,
    geometry_shader,
    tessellation_shader,
    sample_rate_shading,
    dual_src_blend,
    logic_op,
    multi_draw_indirect,
    draw_indirect_first_instance,
    depth_clamp,
    depth_bias_clamp,
    fill_mode_non_solid,
    depth_bounds,
    wide_lines,
    large_points,
    alpha_to_one,
    multi_viewport,
    sampler_anisotropy,
    texture_compression_etc2,
    texture_compression_astc_ldr,
    texture_compression_bc,
    occlusion_query_precise,
    pipeline_statistics_query,
    vertex_pipeline_stores_and_atomics,
    fragment_stores_and_atomics,
    shader_tessellation_and_geometry_point_size,
    shader_image_gather_extended,
    shader_storage_image_extended_formats,
    shader_storage_image_multisample,
    shader_storage_image_read_without_format,
    shader_storage_image_write_without_format,
    shader_uniform_buffer_array_dynamic_indexing,
    shader_sampled_image_array_dynamic_indexing,
    shader_storage_buffer_array_dynamic_indexing,
    shader_storage_image_array_dynamic_indexing,
    shader_clip_distance,
    shader_cull_distance,
    shader_float64,
    shader_int64,
    shader_int16,
    shader_resource_residency,
    shader_resource_min_lod,
    sparse_binding,
    sparse_residency_buffer,
    sparse_residency_image2_d,
    sparse_residency_image3_d,
    sparse_residency2_samples,
    sparse_residency4_samples,
    sparse_residency8_samples,
    sparse_residency16_samples,
    sparse_residency_aliased,
    variable_multisample_rate,
    inherited_queries,
);

/// Same for every `vk::PhysicalDeviceLimits` field, formatted for the log.
macro_rules! limit_table {
    ($($field:ident),* $(,)?) => {
        /// Every Vulkan 1.0 device limit as `(name, value)`.
        pub fn limit_values(limits: &vk::PhysicalDeviceLimits) -> Vec<(&'static str, String)> {
            vec![$((stringify!($field), format!("{:?}", limits.$field))),*]
        }
    };
}

limit_table!(
    max_image_dimension1_d,
    max_image_dimension2_d,
    max_image_dimension3_d,
    max_image_dimension_cube,
    max_image_array_layers,
    max_texel_buffer_elements,
    max_uniform_buffer_range,
    max_storage_buffer_range,
    max_push_constants_size,
    max_memory_allocation_count,
    max_sampler_allocation_count,
    buffer_image_granularity,
    sparse_address_space_size,
    max_bound_descriptor_sets,
    max_per_stage_descriptor_samplers,
    max_per_stage_descriptor_uniform_buffers,
    max_per_stage_descriptor_storage_buffers,
    max_per_stage_descriptor_sampled_images,
    max_per_stage_descriptor_storage_images,
    max_per_stage_descriptor_input_attachments,
    max_per_stage_resources,
    max_descriptor_set_samplers,
    max_descriptor_set_uniform_buffers,
    max_descriptor_set_uniform_buffers_dynamic,
    max_descriptor_set_storage_buffers,
    max_descriptor_set_storage_buffers_dynamic,
    max_descriptor_set_sampled_images,
    max_descriptor_set_storage_images,
    max_descriptor_set_input_attachments,
    max_vertex_input_attributes,
    max_vertex_input_bindings,
    max_vertex_input_attribute_offset,
    max_vertex_input_binding_stride,
    max_vertex_output_components,
    max_tessellation_generation_level,
    max_tessellation_patch_size,
    max_tessellation_control_per_vertex_input_components,
    max_tessellation_control_per_vertex_output_components,
    max_tessellation_control_per_patch_output_components,
    max_tessellation_control_total_output_components,
    max_tessellation_evaluation_input_components,
    max_tessellation_evaluation_output_components,
    max_geometry_shader_invocations,
    max_geometry_input_components,
    max_geometry_output_components,
    max_geometry_output_vertices,
    max_geometry_total_output_components,
    max_fragment_input_components,
    max_fragment_output_attachments,
    max_fragment_dual_src_attachments,
    max_fragment_combined_output_resources,
    max_compute_shared_memory_size,
    max_compute_work_group_count,
    max_compute_work_group_invocations,
    max_compute_work_group_size,
    sub_pixel_precision_bits,
    sub_texel_precision_bits,
    mipmap_precision_bits,
    max_draw_indexed_index_value,
    max_draw_indirect_count,
    max_sampler_lod_bias,
    max_sampler_anisotropy,
    max_viewports,
    max_viewport_dimensions,
    viewport_bounds_range,
    viewport_sub_pixel_bits,
    min_memory_map_alignment,
    min_texel_buffer_offset_alignment,
    min_uniform_buffer_offset_alignment,
    min_storage_buffer_offset_alignment,
    min_texel_offset,
    max_texel_offset,
    min_texel_gather_offset,
    max_texel_gather_offset,
    min_interpolation_offset,
    max_interpolation_offset,
    sub_pixel_interpolation_offset_bits,
    max_framebuffer_width,
    max_framebuffer_height,
    max_framebuffer_layers,
    framebuffer_color_sample_counts,
    framebuffer_depth_sample_counts,
    framebuffer_stencil_sample_counts,
    framebuffer_no_attachments_sample_counts,
    max_color_attachments,
    sampled_image_color_sample_counts,
    sampled_image_integer_sample_counts,
    sampled_image_depth_sample_counts,
    sampled_image_stencil_sample_counts,
    storage_image_sample_counts,
    max_sample_mask_words,
    timestamp_compute_and_graphics,
    timestamp_period,
    max_clip_distances,
    max_cull_distances,
    max_combined_clip_and_cull_distances,
    discrete_queue_priorities,
    point_size_range,
    line_width_range,
    point_size_granularity,
    line_width_granularity,
    strict_lines,
    standard_sample_locations,
    optimal_buffer_copy_offset_alignment,
    optimal_buffer_copy_row_pitch_alignment,
    non_coherent_atom_size,
);

/// Names of features enabled in `requested` but not in `supported`.
pub fn missing_features(
    supported: &vk::PhysicalDeviceFeatures,
    requested: &vk::PhysicalDeviceFeatures,
) -> Vec<&'static str> {
    feature_flags(requested)
        .into_iter()
        .zip(feature_flags(supported))
        .filter(|((_, wanted), (_, have))| *wanted && !*have)
        .map(|((name, _), _)| name)
        .collect()
}

/// A physical GPU as seen at discovery time. Immutable afterwards.
pub struct Adapter {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    extensions: HashSet<String>,
    layers: HashSet<String>,
}

impl Adapter {
    fn query(instance: &ash::Instance, handle: vk::PhysicalDevice) -> EngineResult<Self> {
        let (properties, features, queue_families, extensions, layers) = unsafe {
            (
                instance.get_physical_device_properties(handle),
                instance.get_physical_device_features(handle),
                instance.get_physical_device_queue_family_properties(handle),
                instance.enumerate_device_extension_properties(handle)?,
                instance.enumerate_device_layer_properties(handle)?,
            )
        };

        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        Ok(Self {
            handle,
            name,
            properties,
            features,
            queue_families,
            extensions: extensions
                .iter()
                .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) })
                .map(|name| name.to_string_lossy().into_owned())
                .collect(),
            layers: layers
                .iter()
                .map(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) })
                .map(|name| name.to_string_lossy().into_owned())
                .collect(),
        })
    }

    pub fn vendor_id(&self) -> u32 {
        self.properties.vendor_id
    }

    pub fn device_id(&self) -> u32 {
        self.properties.device_id
    }

    pub fn device_type(&self) -> vk::PhysicalDeviceType {
        self.properties.device_type
    }

    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.properties.limits
    }

    pub fn supports_extension(&self, name: &str) -> bool {
        self.extensions.contains(name)
    }

    pub fn supports_layer(&self, name: &str) -> bool {
        self.layers.contains(name)
    }

    /// One-line summary at info, the full capability dump at debug.
    pub fn log_capabilities(&self) {
        let props = &self.properties;
        log::info!(
            "GPU: {} ({:?}, vendor {:#06x}, device {:#06x}, API {}.{}.{})",
            self.name,
            self.device_type(),
            self.vendor_id(),
            self.device_id(),
            vk::api_version_major(props.api_version),
            vk::api_version_minor(props.api_version),
            vk::api_version_patch(props.api_version),
        );

        if !log::log_enabled!(log::Level::Debug) {
            return;
        }

        log::debug!("Driver version: {:#x}", props.driver_version);

        log::debug!("GPU Limits:");
        for (name, value) in limit_values(self.limits()) {
            log::debug!("- {}: {}", name, value);
        }

        log::debug!("GPU Features:");
        for (name, enabled) in feature_flags(&self.features) {
            log::debug!("- {}: {}", name, enabled);
        }

        let mut extensions: Vec<_> = self.extensions.iter().collect();
        extensions.sort();
        log::debug!("Supported Device Extensions:");
        for ext in extensions {
            log::debug!("- {}", ext);
        }

        log::debug!(
            "Device-level validation layer: {}",
            self.supports_layer("VK_LAYER_KHRONOS_validation")
        );
        log::debug!("Supported Device Layers:");
        for layer in &self.layers {
            log::debug!("- {}", layer);
        }
    }

    fn score(&self) -> u32 {
        match self.device_type() {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
            _ => 1,
        }
    }
}

/// Enumerate every GPU the driver exposes.
pub fn list_adapters(instance: &VulkanInstance) -> EngineResult<Vec<Adapter>> {
    let devices = unsafe { instance.instance.enumerate_physical_devices() }?;

    if devices.is_empty() {
        return Err(EngineError::NoAdapterFound);
    }

    let adapters = devices
        .into_iter()
        .map(|device| Adapter::query(&instance.instance, device))
        .collect::<EngineResult<Vec<_>>>()?;

    log::info!("Found {} GPU(s)", adapters.len());
    Ok(adapters)
}

/// Prefer discrete over integrated over anything else; first wins on ties.
pub fn pick_adapter(adapters: Vec<Adapter>) -> EngineResult<Adapter> {
    let mut best: Option<Adapter> = None;
    for adapter in adapters {
        if best.as_ref().map_or(true, |b| adapter.score() > b.score()) {
            best = Some(adapter);
        }
    }
    best.ok_or(EngineError::NoAdapterFound)
}

#[cfg(test)]
pub(crate) fn test_adapter(
    device_type: vk::PhysicalDeviceType,
    extensions: &[&str],
    layers: &[&str],
) -> Adapter {
    Adapter {
        handle: vk::PhysicalDevice::null(),
        name: format!("{:?}", device_type),
        properties: vk::PhysicalDeviceProperties {
            device_type,
            ..Default::default()
        },
        features: vk::PhysicalDeviceFeatures::default(),
        queue_families: Vec::new(),
        extensions: extensions.iter().map(|s| s.to_string()).collect(),
        layers: layers.iter().map(|s| s.to_string()).collect(),
    }
}
