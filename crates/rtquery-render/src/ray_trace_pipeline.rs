//! Ray-query compute pipeline and its descriptor bindings.
//!
//! The shader sees one descriptor set with a fixed layout:
//!
//! | Slot | Type | Resource |
//! |------|------|----------|
//! | 0 | storage buffer | output image |
//! | 1 | acceleration structure | TLAS |
//! | 2 | storage buffer | vertex positions |
//! | 3 | storage buffer | triangle indices |

use ash::vk;
use rtquery_core::WorkgroupGrid;
use rtquery_gpu::descriptors::{
    write_acceleration_structure, write_storage_buffer, DescriptorPool,
    DescriptorSetLayoutBuilder,
};
use rtquery_gpu::{ComputePipeline, GpuBuffer, Result};
use rtquery_shaders::RayTracePushConstants;

/// Output image binding.
pub const OUTPUT_BINDING: u32 = 0;
/// Top-level acceleration structure binding.
pub const TLAS_BINDING: u32 = 1;
/// Vertex buffer binding.
pub const VERTEX_BINDING: u32 = 2;
/// Index buffer binding.
pub const INDEX_BINDING: u32 = 3;

/// Layout of the single descriptor set, compute stage only.
pub fn binding_layout() -> DescriptorSetLayoutBuilder<'static> {
    DescriptorSetLayoutBuilder::new()
        .storage_buffer(OUTPUT_BINDING, vk::ShaderStageFlags::COMPUTE)
        .acceleration_structure(TLAS_BINDING, vk::ShaderStageFlags::COMPUTE)
        .storage_buffer(VERTEX_BINDING, vk::ShaderStageFlags::COMPUTE)
        .storage_buffer(INDEX_BINDING, vk::ShaderStageFlags::COMPUTE)
}

/// Barrier making shader writes to the output buffer visible to host reads.
pub fn host_readback_barrier() -> vk::MemoryBarrier2<'static> {
    vk::MemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)
        .src_access_mask(vk::AccessFlags2::SHADER_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags2::HOST)
        .dst_access_mask(vk::AccessFlags2::HOST_READ)
}

/// Descriptor set layout, pool and the one set allocated from it.
pub struct RayTraceBindings {
    layout: vk::DescriptorSetLayout,
    pool: DescriptorPool,
    set: vk::DescriptorSet,
}

impl RayTraceBindings {
    /// Create the layout, a pool sized for one set, and the set.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        let builder = binding_layout();
        let layout = unsafe { builder.build(device)? };

        let pool = match unsafe { DescriptorPool::new(device, 1, &builder.pool_sizes(1)) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.destroy_descriptor_set_layout(layout, None) };
                return Err(e);
            }
        };

        let set = match unsafe { pool.allocate(device, &[layout]) } {
            Ok(sets) => sets[0],
            Err(e) => {
                unsafe {
                    pool.destroy(device);
                    device.destroy_descriptor_set_layout(layout, None);
                }
                return Err(e);
            }
        };

        Ok(Self { layout, pool, set })
    }

    /// The descriptor set layout.
    pub const fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// The descriptor set.
    pub const fn set(&self) -> vk::DescriptorSet {
        self.set
    }

    /// Point every slot at its resource.
    ///
    /// The output binding covers exactly the output buffer; vertex and index
    /// bindings cover their whole buffers.
    ///
    /// # Safety
    /// The device and all resources must be valid and the set not in use.
    pub unsafe fn write(
        &self,
        device: &ash::Device,
        output: &GpuBuffer,
        tlas: vk::AccelerationStructureKHR,
        vertices: &GpuBuffer,
        indices: &GpuBuffer,
    ) {
        unsafe {
            write_storage_buffer(device, self.set, OUTPUT_BINDING, output.buffer, 0, output.size);
            write_acceleration_structure(device, self.set, TLAS_BINDING, tlas);
            write_storage_buffer(
                device,
                self.set,
                VERTEX_BINDING,
                vertices.buffer,
                0,
                vk::WHOLE_SIZE,
            );
            write_storage_buffer(
                device,
                self.set,
                INDEX_BINDING,
                indices.buffer,
                0,
                vk::WHOLE_SIZE,
            );
        }
    }

    /// Destroy the pool (freeing the set) and the layout.
    ///
    /// # Safety
    /// The device must be valid and the set not in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            self.pool.destroy(device);
            device.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Push-constant range holding the image extent.
pub fn push_constant_range() -> vk::PushConstantRange {
    vk::PushConstantRange::default()
        .stage_flags(vk::ShaderStageFlags::COMPUTE)
        .offset(0)
        .size(RayTracePushConstants::SIZE)
}

/// Compute pipeline running the ray-query shader.
pub struct RayTracePipeline {
    pipeline: ComputePipeline,
}

impl RayTracePipeline {
    /// Create the pipeline from a loaded shader module.
    ///
    /// # Safety
    /// The device and module must be valid.
    pub unsafe fn new(
        device: &ash::Device,
        shader_module: vk::ShaderModule,
        bindings: &RayTraceBindings,
    ) -> Result<Self> {
        let pipeline = unsafe {
            ComputePipeline::from_module(
                device,
                shader_module,
                &[bindings.layout()],
                &[push_constant_range()],
            )?
        };

        Ok(Self { pipeline })
    }

    /// Record one dispatch over a `width x height` image followed by the
    /// host readback barrier.
    ///
    /// # Safety
    /// The command buffer must be recording.
    pub unsafe fn record_dispatch(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        bindings: &RayTraceBindings,
        width: u32,
        height: u32,
    ) -> WorkgroupGrid {
        let grid = WorkgroupGrid::for_image(width, height);
        let push_constants = RayTracePushConstants { width, height };

        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, self.pipeline.pipeline);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                self.pipeline.layout,
                0,
                &[bindings.set()],
                &[],
            );
            device.cmd_push_constants(
                cmd,
                self.pipeline.layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                bytemuck::bytes_of(&push_constants),
            );

            device.cmd_dispatch(cmd, grid.x, grid.y, grid.z);

            let barrier = host_readback_barrier();
            let dependency_info =
                vk::DependencyInfo::default().memory_barriers(std::slice::from_ref(&barrier));
            device.cmd_pipeline_barrier2(cmd, &dependency_info);
        }

        grid
    }

    /// Destroy the pipeline and its layout.
    ///
    /// # Safety
    /// The device must be valid and the pipeline not in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe { self.pipeline.destroy(device) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_table() {
        let builder = binding_layout();
        let bindings = builder.bindings();
        assert_eq!(bindings.len(), 4);

        let expected = [
            (OUTPUT_BINDING, vk::DescriptorType::STORAGE_BUFFER),
            (TLAS_BINDING, vk::DescriptorType::ACCELERATION_STRUCTURE_KHR),
            (VERTEX_BINDING, vk::DescriptorType::STORAGE_BUFFER),
            (INDEX_BINDING, vk::DescriptorType::STORAGE_BUFFER),
        ];
        for (binding, (slot, ty)) in bindings.iter().zip(expected) {
            assert_eq!(binding.binding, slot);
            assert_eq!(binding.descriptor_type, ty);
            assert_eq!(binding.descriptor_count, 1);
            assert_eq!(binding.stage_flags, vk::ShaderStageFlags::COMPUTE);
        }
    }

    #[test]
    fn one_set_pool() {
        let sizes = binding_layout().pool_sizes(1);
        let storage = sizes
            .iter()
            .find(|s| s.ty == vk::DescriptorType::STORAGE_BUFFER)
            .unwrap();
        let tlas = sizes
            .iter()
            .find(|s| s.ty == vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
            .unwrap();
        assert_eq!(storage.descriptor_count, 3);
        assert_eq!(tlas.descriptor_count, 1);
    }

    #[test]
    fn readback_barrier_targets_host() {
        let barrier = host_readback_barrier();
        assert_eq!(barrier.src_stage_mask, vk::PipelineStageFlags2::COMPUTE_SHADER);
        assert_eq!(barrier.src_access_mask, vk::AccessFlags2::SHADER_WRITE);
        assert_eq!(barrier.dst_stage_mask, vk::PipelineStageFlags2::HOST);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags2::HOST_READ);
    }

    #[test]
    fn push_constants_fill_the_range() {
        let range = push_constant_range();
        let push_constants = RayTracePushConstants {
            width: 800,
            height: 600,
        };
        assert_eq!(range.stage_flags, vk::ShaderStageFlags::COMPUTE);
        assert_eq!(range.offset, 0);
        assert_eq!(
            bytemuck::bytes_of(&push_constants).len(),
            range.size as usize
        );
    }
}
