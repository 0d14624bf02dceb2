//! GPU capability detection.

use ash::vk;
use std::collections::HashSet;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub const fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Ray tracing feature bits and limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RayTracingCapabilities {
    /// `VkPhysicalDeviceAccelerationStructureFeaturesKHR::accelerationStructure`
    pub acceleration_structure: bool,
    /// `VkPhysicalDeviceRayQueryFeaturesKHR::rayQuery`
    pub ray_query: bool,
    /// Buffer device address (core in 1.2)
    pub buffer_device_address: bool,
    /// Maximum geometries in a single BLAS.
    pub max_geometry_count: u64,
    /// Maximum instances in a single TLAS.
    pub max_instance_count: u64,
    /// Maximum primitives across all geometries of a BLAS.
    pub max_primitive_count: u64,
    /// Required alignment of scratch buffer device addresses.
    pub min_scratch_offset_alignment: u32,
}

impl RayTracingCapabilities {
    /// Whether every feature needed for ray-query compute is present.
    pub const fn is_supported(&self) -> bool {
        self.acceleration_structure && self.ray_query && self.buffer_device_address
    }

    /// Names of the missing feature bits, for error reporting.
    pub fn missing_features(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.acceleration_structure {
            missing.push("accelerationStructure");
        }
        if !self.ray_query {
            missing.push("rayQuery");
        }
        if !self.buffer_device_address {
            missing.push("bufferDeviceAddress");
        }
        missing
    }
}

/// Detected GPU capabilities.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    /// GPU vendor
    pub vendor: GpuVendor,
    /// Device name
    pub device_name: String,
    /// Vulkan API version
    pub api_version: u32,
    /// Driver version
    pub driver_version: u32,

    /// Device-local memory in MB
    pub device_local_memory_mb: u64,

    // Compute limits
    /// Maximum compute workgroup size
    pub max_compute_workgroup_size: [u32; 3],
    /// Maximum compute workgroup invocations
    pub max_compute_workgroup_invocations: u32,
    /// Maximum workgroup count per dispatch
    pub max_compute_workgroup_count: [u32; 3],

    /// Ray tracing support
    pub ray_tracing: RayTracingCapabilities,

    // Available extensions
    pub available_extensions: HashSet<String>,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        let extensions = unsafe { instance.enumerate_device_extension_properties(physical_device) }
            .unwrap_or_default();

        let available_extensions: HashSet<String> = extensions
            .iter()
            .filter_map(|ext| {
                ext.extension_name_as_c_str()
                    .ok()
                    .and_then(|name| name.to_str().ok())
                    .map(String::from)
            })
            .collect();

        // Feature bits
        let mut as_features = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default();
        let mut rq_features = vk::PhysicalDeviceRayQueryFeaturesKHR::default();
        let mut vk12_features = vk::PhysicalDeviceVulkan12Features::default();
        let mut features2 = vk::PhysicalDeviceFeatures2::default()
            .push_next(&mut as_features)
            .push_next(&mut rq_features)
            .push_next(&mut vk12_features);
        unsafe { instance.get_physical_device_features2(physical_device, &mut features2) };

        // Limits
        let mut as_properties = vk::PhysicalDeviceAccelerationStructurePropertiesKHR::default();
        let mut properties2 = vk::PhysicalDeviceProperties2::default().push_next(&mut as_properties);
        unsafe { instance.get_physical_device_properties2(physical_device, &mut properties2) };
        let properties = properties2.properties;

        let has_as_ext = available_extensions.contains("VK_KHR_acceleration_structure");
        let has_rq_ext = available_extensions.contains("VK_KHR_ray_query");

        let ray_tracing = RayTracingCapabilities {
            acceleration_structure: has_as_ext && as_features.acceleration_structure == vk::TRUE,
            ray_query: has_rq_ext && rq_features.ray_query == vk::TRUE,
            buffer_device_address: vk12_features.buffer_device_address == vk::TRUE,
            max_geometry_count: as_properties.max_geometry_count,
            max_instance_count: as_properties.max_instance_count,
            max_primitive_count: as_properties.max_primitive_count,
            min_scratch_offset_alignment: as_properties
                .min_acceleration_structure_scratch_offset_alignment,
        };

        let device_name = properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let device_local_memory_mb: u64 = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        Self {
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name,
            api_version: properties.api_version,
            driver_version: properties.driver_version,
            device_local_memory_mb,
            max_compute_workgroup_size: properties.limits.max_compute_work_group_size,
            max_compute_workgroup_invocations: properties.limits.max_compute_work_group_invocations,
            max_compute_workgroup_count: properties.limits.max_compute_work_group_count,
            ray_tracing,
            available_extensions,
        }
    }

    /// Check that the device can run a `tile_w x tile_h` workgroup and
    /// supports ray-query compute at `api_version` or later.
    pub fn meets_requirements(&self, api_version: u32, tile: (u32, u32)) -> bool {
        if vk::api_version_major(self.api_version) < vk::api_version_major(api_version)
            || (vk::api_version_major(self.api_version) == vk::api_version_major(api_version)
                && vk::api_version_minor(self.api_version) < vk::api_version_minor(api_version))
        {
            return false;
        }

        if !self.ray_tracing.is_supported() {
            return false;
        }

        tile.0 <= self.max_compute_workgroup_size[0]
            && tile.1 <= self.max_compute_workgroup_size[1]
            && tile.0 * tile.1 <= self.max_compute_workgroup_invocations
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}) - Vulkan {}.{}.{} - {} MB VRAM - ray query {}",
            self.device_name,
            self.vendor,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
            if self.ray_tracing.is_supported() { "yes" } else { "no" },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(ray_tracing: RayTracingCapabilities) -> GpuCapabilities {
        GpuCapabilities {
            vendor: GpuVendor::Nvidia,
            device_name: "Test GPU".to_string(),
            api_version: vk::API_VERSION_1_3,
            driver_version: 0,
            device_local_memory_mb: 8192,
            max_compute_workgroup_size: [1024, 1024, 64],
            max_compute_workgroup_invocations: 1024,
            max_compute_workgroup_count: [65535, 65535, 65535],
            ray_tracing,
            available_extensions: HashSet::new(),
        }
    }

    fn full_rt() -> RayTracingCapabilities {
        RayTracingCapabilities {
            acceleration_structure: true,
            ray_query: true,
            buffer_device_address: true,
            min_scratch_offset_alignment: 128,
            ..Default::default()
        }
    }

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn missing_ray_query_is_reported() {
        let rt = RayTracingCapabilities {
            ray_query: false,
            ..full_rt()
        };
        assert!(!rt.is_supported());
        assert_eq!(rt.missing_features(), vec!["rayQuery"]);
        assert!(!caps(rt).meets_requirements(vk::API_VERSION_1_3, (16, 8)));
    }

    #[test]
    fn full_support_meets_requirements() {
        let caps = caps(full_rt());
        assert!(caps.ray_tracing.missing_features().is_empty());
        assert!(caps.meets_requirements(vk::API_VERSION_1_3, (16, 8)));
    }

    #[test]
    fn old_api_version_is_rejected() {
        let mut caps = caps(full_rt());
        caps.api_version = vk::API_VERSION_1_2;
        assert!(!caps.meets_requirements(vk::API_VERSION_1_3, (16, 8)));
    }

    #[test]
    fn oversized_workgroup_is_rejected() {
        let mut caps = caps(full_rt());
        caps.max_compute_workgroup_invocations = 64;
        assert!(!caps.meets_requirements(vk::API_VERSION_1_3, (16, 8)));
    }
}
