//! GPU context management.

use crate::capabilities::GpuCapabilities;
use crate::error::{GpuError, Result};
use crate::instance::{create_instance, select_physical_device};
use crate::memory::GpuAllocator;
use ash::vk;
use parking_lot::Mutex;
use std::ffi::CStr;
use std::sync::Arc;

/// Main GPU context holding Vulkan resources.
///
/// Owns a single graphics/compute/transfer queue; every submission in the
/// pipeline goes through it.
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    pub(crate) entry: ash::Entry,
    pub(crate) instance: ash::Instance,
    pub(crate) physical_device: vk::PhysicalDevice,
    pub(crate) device: Arc<ash::Device>,
    pub(crate) capabilities: GpuCapabilities,
    pub(crate) allocator: Mutex<GpuAllocator>,
    pub(crate) acceleration_structure: ash::khr::acceleration_structure::Device,

    pub(crate) queue_family: u32,
    pub(crate) queue: vk::Queue,
}

impl GpuContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the physical device handle.
    pub const fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get the Vulkan instance handle.
    pub const fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get GPU capabilities.
    pub const fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Get the acceleration structure extension loader.
    pub const fn acceleration_structure_loader(&self) -> &ash::khr::acceleration_structure::Device {
        &self.acceleration_structure
    }

    /// Get the graphics/compute/transfer queue.
    pub const fn queue(&self) -> vk::Queue {
        self.queue
    }

    /// Get the graphics/compute/transfer queue family index.
    pub const fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Get access to the GPU allocator.
    pub const fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    /// Wait for device to be idle.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Shutdown allocator BEFORE destroying device
            // This frees all VkDeviceMemory allocations
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
        tracing::debug!("GPU context destroyed");
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    api_version: u32,
    enable_validation: bool,
    workgroup_tile: (u32, u32),
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "rtquery".to_string(),
            api_version: vk::API_VERSION_1_3,
            enable_validation: cfg!(debug_assertions),
            workgroup_tile: (16, 8),
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Set the minimum Vulkan API version.
    pub const fn api_version(mut self, version: u32) -> Self {
        self.api_version = version;
        self
    }

    /// Enable or disable validation layers.
    pub const fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Workgroup tile the compute shader will use; checked against device limits.
    pub const fn workgroup_tile(mut self, width: u32, height: u32) -> Self {
        self.workgroup_tile = (width, height);
        self
    }

    /// Build the GPU context.
    pub fn build(self) -> Result<GpuContext> {
        let entry =
            unsafe { ash::Entry::load() }.map_err(|e| GpuError::Loading(e.to_string()))?;

        let instance = unsafe {
            create_instance(&entry, &self.app_name, self.api_version, self.enable_validation)
        }?;

        // Everything created past this point is released again on failure
        match unsafe { self.build_on(entry, &instance) } {
            Ok(ctx) => Ok(ctx),
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                Err(e)
            }
        }
    }

    /// Pick a device on `instance` and create the context around it.
    ///
    /// On error the instance is left for the caller to destroy.
    unsafe fn build_on(&self, entry: ash::Entry, instance: &ash::Instance) -> Result<GpuContext> {
        let extensions = required_device_extensions();
        let physical_device =
            unsafe { select_physical_device(instance, self.api_version, &extensions) }?;

        let capabilities = unsafe { GpuCapabilities::query(instance, physical_device) };
        check_device(&capabilities, self.api_version, self.workgroup_tile)?;

        tracing::info!("Selected GPU: {}", capabilities.summary());
        tracing::debug!(
            "Acceleration structure limits: {} geometries, {} instances, {} primitives, scratch alignment {}",
            capabilities.ray_tracing.max_geometry_count,
            capabilities.ray_tracing.max_instance_count,
            capabilities.ray_tracing.max_primitive_count,
            capabilities.ray_tracing.min_scratch_offset_alignment,
        );

        let queue_family = unsafe { find_queue_family(instance, physical_device) }?;

        let (device, queue) =
            unsafe { create_device(instance, physical_device, queue_family, &extensions)? };

        let acceleration_structure = ash::khr::acceleration_structure::Device::new(instance, &device);

        let device = Arc::new(device);

        let allocator = match unsafe { GpuAllocator::new(instance, device.clone(), physical_device) } {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e);
            }
        };

        Ok(GpuContext {
            entry,
            instance: instance.clone(),
            physical_device,
            device,
            capabilities,
            allocator: Mutex::new(allocator),
            acceleration_structure,
            queue_family,
            queue,
        })
    }
}

/// Reject a device that cannot run ray-query compute with a
/// `tile.0 x tile.1` workgroup at `api_version`.
pub fn check_device(capabilities: &GpuCapabilities, api_version: u32, tile: (u32, u32)) -> Result<()> {
    if !capabilities.ray_tracing.is_supported() {
        return Err(GpuError::RayTracingUnsupported(format!(
            "{} lacks {}",
            capabilities.device_name,
            capabilities.ray_tracing.missing_features().join(", ")
        )));
    }
    if !capabilities.meets_requirements(api_version, tile) {
        return Err(GpuError::NoSuitableDevice);
    }
    Ok(())
}

/// Find a queue family supporting graphics, compute and transfer.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn find_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<u32> {
    let families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };

    let required = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;

    families
        .iter()
        .position(|family| family.queue_flags.contains(required))
        .map(|i| i as u32)
        .ok_or(GpuError::NoSuitableDevice)
}

/// Device extensions needed for ray-query compute.
pub fn required_device_extensions() -> Vec<&'static CStr> {
    vec![
        ash::khr::deferred_host_operations::NAME,
        ash::khr::acceleration_structure::NAME,
        ash::khr::ray_query::NAME,
    ]
}

/// Create the logical device with ray tracing features enabled.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
    extensions: &[&CStr],
) -> Result<(ash::Device, vk::Queue)> {
    let queue_priority = 1.0_f32;
    let queue_create_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(std::slice::from_ref(&queue_priority));

    let extension_names: Vec<*const i8> = extensions.iter().map(|ext| ext.as_ptr()).collect();

    let mut acceleration_structure_features =
        vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default().acceleration_structure(true);
    let mut ray_query_features = vk::PhysicalDeviceRayQueryFeaturesKHR::default().ray_query(true);

    let mut vulkan_1_3_features = vk::PhysicalDeviceVulkan13Features::default()
        .synchronization2(true)
        .maintenance4(true);

    let mut vulkan_1_2_features = vk::PhysicalDeviceVulkan12Features::default()
        .buffer_device_address(true)
        .scalar_block_layout(true);

    let features = vk::PhysicalDeviceFeatures::default().shader_int64(true);

    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .features(features)
        .push_next(&mut acceleration_structure_features)
        .push_next(&mut ray_query_features)
        .push_next(&mut vulkan_1_3_features)
        .push_next(&mut vulkan_1_2_features);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(std::slice::from_ref(&queue_create_info))
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2);

    let device = unsafe { instance.create_device(physical_device, &device_create_info, None)? };

    let queue = unsafe { device.get_device_queue(queue_family, 0) };

    Ok((device, queue))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ray_query_extensions_are_required() {
        let names: Vec<_> = required_device_extensions()
            .iter()
            .map(|ext| ext.to_str().unwrap().to_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "VK_KHR_deferred_host_operations",
                "VK_KHR_acceleration_structure",
                "VK_KHR_ray_query",
            ]
        );
    }

    fn capabilities(ray_query: bool) -> GpuCapabilities {
        GpuCapabilities {
            vendor: crate::GpuVendor::Amd,
            device_name: "Test GPU".to_string(),
            api_version: vk::API_VERSION_1_3,
            driver_version: 0,
            device_local_memory_mb: 4096,
            max_compute_workgroup_size: [1024, 1024, 64],
            max_compute_workgroup_invocations: 1024,
            max_compute_workgroup_count: [65535, 65535, 65535],
            ray_tracing: crate::RayTracingCapabilities {
                acceleration_structure: true,
                ray_query,
                buffer_device_address: true,
                ..Default::default()
            },
            available_extensions: std::collections::HashSet::new(),
        }
    }

    #[test]
    fn device_without_ray_query_is_rejected() {
        let err = check_device(&capabilities(false), vk::API_VERSION_1_3, (16, 8)).unwrap_err();
        match err {
            GpuError::RayTracingUnsupported(message) => assert!(message.contains("rayQuery")),
            other => panic!("expected RayTracingUnsupported, got {other:?}"),
        }
    }

    #[test]
    fn device_limits_are_checked() {
        let caps = capabilities(true);
        check_device(&caps, vk::API_VERSION_1_3, (16, 8)).unwrap();
        assert!(matches!(
            check_device(&caps, vk::API_VERSION_1_3, (64, 64)),
            Err(GpuError::NoSuitableDevice)
        ));
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn failed_build_returns_error() {
        // 4096 invocations per workgroup is beyond common device limits
        let result = GpuContextBuilder::new()
            .validation(false)
            .workgroup_tile(64, 64)
            .build();
        assert!(matches!(result, Err(GpuError::NoSuitableDevice)));
    }

    #[test]
    #[ignore = "Requires GPU hardware"]
    fn context_creation() {
        let ctx = GpuContextBuilder::new().validation(false).build().unwrap();
        assert!(ctx.capabilities().ray_tracing.is_supported());
        ctx.wait_idle().unwrap();
    }
}
