//! Bottom- and top-level acceleration structure builds.

use ash::vk;
use gpu_allocator::MemoryLocation;
use rtquery_gpu::{execute_single_time_commands, CommandPool, FirstError, GpuBuffer, GpuContext};

use crate::error::{AccelError, Result};
use crate::input::{align_up, validate_blas_inputs, BlasInput, InstanceDesc};

/// Build flags used unless the caller asks for something else.
pub const DEFAULT_BUILD_FLAGS: vk::BuildAccelerationStructureFlagsKHR =
    vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE;

/// Bottom-level acceleration structure over one triangle mesh.
pub struct TriangleBlas {
    /// Vulkan acceleration structure handle.
    pub acceleration_structure: vk::AccelerationStructureKHR,
    /// Backing storage.
    pub buffer: GpuBuffer,
    /// Device address referenced by TLAS instances.
    pub device_address: vk::DeviceAddress,
    /// Geometry the structure was built from.
    pub input: BlasInput,
}

/// Top-level acceleration structure.
pub struct Tlas {
    /// Vulkan acceleration structure handle.
    pub acceleration_structure: vk::AccelerationStructureKHR,
    /// Backing storage.
    pub buffer: GpuBuffer,
    /// Instance records the structure was built from.
    pub instance_buffer: GpuBuffer,
    /// Device address of the acceleration structure.
    pub device_address: vk::DeviceAddress,
    pub instance_count: u32,
}

/// Owns every BLAS and the TLAS of a scene.
///
/// Structures are released by [`destroy`](Self::destroy), TLAS first, then
/// BLASes in reverse build order. A failed build leaves whatever was created
/// owned by the builder so `destroy` still frees it.
#[derive(Default)]
pub struct AccelerationStructureBuilder {
    blas: Vec<TriangleBlas>,
    tlas: Option<Tlas>,
}

/// Create backing storage and an acceleration structure handle of `ty`.
///
/// # Safety
/// The context must be valid.
unsafe fn create_structure(
    ctx: &GpuContext,
    ty: vk::AccelerationStructureTypeKHR,
    size: vk::DeviceSize,
    name: &str,
) -> Result<(vk::AccelerationStructureKHR, GpuBuffer, vk::DeviceAddress)> {
    let loader = ctx.acceleration_structure_loader();
    let mut buffer = ctx.allocator().lock().create_buffer(
        size,
        vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
        MemoryLocation::GpuOnly,
        name,
    )?;

    let create_info = vk::AccelerationStructureCreateInfoKHR::default()
        .buffer(buffer.buffer)
        .offset(0)
        .size(size)
        .ty(ty);

    let acceleration_structure =
        match unsafe { loader.create_acceleration_structure(&create_info, None) } {
            Ok(handle) => handle,
            Err(e) => {
                ctx.allocator().lock().free_buffer(&mut buffer)?;
                return Err(e.into());
            }
        };

    let address_info = vk::AccelerationStructureDeviceAddressInfoKHR::default()
        .acceleration_structure(acceleration_structure);
    let device_address =
        unsafe { loader.get_acceleration_structure_device_address(&address_info) };

    Ok((acceleration_structure, buffer, device_address))
}

/// Scratch buffer whose device address honours the device alignment.
struct Scratch {
    buffer: GpuBuffer,
    address: vk::DeviceAddress,
}

impl Scratch {
    fn new(ctx: &GpuContext, size: vk::DeviceSize, name: &str) -> Result<Self> {
        let alignment = u64::from(
            ctx.capabilities()
                .ray_tracing
                .min_scratch_offset_alignment,
        );
        // Pad so the aligned start still leaves `size` bytes
        let buffer = ctx.allocator().lock().create_buffer(
            size + alignment,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::GpuOnly,
            name,
        )?;
        let address = align_up(buffer.device_address(ctx.device()), alignment);
        Ok(Self { buffer, address })
    }

    fn free(mut self, ctx: &GpuContext) -> Result<()> {
        ctx.allocator().lock().free_buffer(&mut self.buffer)?;
        Ok(())
    }
}

/// Make one build's writes visible to the next build.
///
/// # Safety
/// The command buffer must be recording.
unsafe fn record_build_barrier(device: &ash::Device, cmd: vk::CommandBuffer) {
    let barrier = vk::MemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR)
        .src_access_mask(vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR)
        .dst_stage_mask(vk::PipelineStageFlags2::ACCELERATION_STRUCTURE_BUILD_KHR)
        .dst_access_mask(
            vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR
                | vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR,
        );

    let dependency_info =
        vk::DependencyInfo::default().memory_barriers(std::slice::from_ref(&barrier));

    unsafe { device.cmd_pipeline_barrier2(cmd, &dependency_info) };
}

impl AccelerationStructureBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Built bottom-level structures, in build order.
    pub fn blas(&self) -> &[TriangleBlas] {
        &self.blas
    }

    /// Number of built bottom-level structures.
    pub fn blas_count(&self) -> usize {
        self.blas.len()
    }

    /// Device address of BLAS `index`.
    pub fn blas_device_address(&self, index: usize) -> Result<vk::DeviceAddress> {
        self.blas
            .get(index)
            .map(|blas| blas.device_address)
            .ok_or(AccelError::MissingBlas {
                index,
                count: self.blas.len(),
            })
    }

    /// The top-level structure, once built.
    pub fn tlas(&self) -> Result<&Tlas> {
        self.tlas
            .as_ref()
            .ok_or(AccelError::InvalidState("TLAS not built"))
    }

    /// Build one BLAS per input in a single blocking submission.
    ///
    /// Builds share one scratch buffer and are serialized by barriers.
    pub fn build_blas(
        &mut self,
        ctx: &GpuContext,
        pool: &CommandPool,
        inputs: &[BlasInput],
        flags: vk::BuildAccelerationStructureFlagsKHR,
    ) -> Result<()> {
        validate_blas_inputs(inputs, ctx.capabilities().ray_tracing.max_primitive_count)?;

        let loader = ctx.acceleration_structure_loader();
        let first = self.blas.len();
        let mut scratch_size = 0;

        for (i, input) in inputs.iter().enumerate() {
            let geometry = input.geometry();
            let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
                .ty(vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL)
                .flags(flags)
                .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
                .geometries(std::slice::from_ref(&geometry));

            let mut build_sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
            unsafe {
                loader.get_acceleration_structure_build_sizes(
                    vk::AccelerationStructureBuildTypeKHR::DEVICE,
                    &build_info,
                    &[input.triangle_count()],
                    &mut build_sizes,
                );
            }
            scratch_size = scratch_size.max(build_sizes.build_scratch_size);

            let (acceleration_structure, buffer, device_address) = unsafe {
                create_structure(
                    ctx,
                    vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
                    build_sizes.acceleration_structure_size,
                    &format!("blas_{}", first + i),
                )?
            };

            tracing::debug!(
                "BLAS {}: {} triangles, {} bytes, scratch {} bytes",
                first + i,
                input.triangle_count(),
                build_sizes.acceleration_structure_size,
                build_sizes.build_scratch_size,
            );

            self.blas.push(TriangleBlas {
                acceleration_structure,
                buffer,
                device_address,
                input: *input,
            });
        }

        let scratch = Scratch::new(ctx, scratch_size, "blas_scratch")?;

        let built = unsafe {
            execute_single_time_commands(ctx.device(), pool, ctx.queue(), |cmd| {
                for (i, blas) in self.blas[first..].iter().enumerate() {
                    if i > 0 {
                        record_build_barrier(ctx.device(), cmd);
                    }
                    let geometry = blas.input.geometry();
                    let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
                        .ty(vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL)
                        .flags(flags)
                        .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
                        .dst_acceleration_structure(blas.acceleration_structure)
                        .geometries(std::slice::from_ref(&geometry))
                        .scratch_data(vk::DeviceOrHostAddressKHR {
                            device_address: scratch.address,
                        });
                    let build_range = blas.input.build_range();

                    loader.cmd_build_acceleration_structures(
                        cmd,
                        &[build_info],
                        &[std::slice::from_ref(&build_range)],
                    );
                }
                Ok(())
            })
        };

        scratch.free(ctx)?;
        built?;

        tracing::info!("Built {} BLAS", inputs.len());
        Ok(())
    }

    /// Build the single TLAS over `instances` in one blocking submission.
    pub fn build_tlas(
        &mut self,
        ctx: &GpuContext,
        pool: &CommandPool,
        instances: &[InstanceDesc],
        flags: vk::BuildAccelerationStructureFlagsKHR,
    ) -> Result<()> {
        if self.tlas.is_some() {
            return Err(AccelError::InvalidState("TLAS already built"));
        }
        if instances.is_empty() {
            return Err(AccelError::NoInstances);
        }
        let limits = &ctx.capabilities().ray_tracing;
        if instances.len() as u64 > limits.max_instance_count {
            return Err(AccelError::LimitExceeded {
                what: "instance",
                count: instances.len() as u64,
                limit: limits.max_instance_count,
            });
        }
        let records = instances
            .iter()
            .map(|desc| desc.to_vk(self.blas_device_address(desc.blas_index)?))
            .collect::<Result<Vec<_>>>()?;
        let instance_count = u32::try_from(records.len()).map_err(|_| AccelError::LimitExceeded {
            what: "instance",
            count: records.len() as u64,
            limit: u64::from(u32::MAX),
        })?;

        let bytes = std::mem::size_of_val(records.as_slice());
        // SAFETY: instance records are plain repr(C) data
        let record_bytes =
            unsafe { std::slice::from_raw_parts(records.as_ptr().cast::<u8>(), bytes) };

        let mut instance_buffer = ctx.allocator().lock().create_buffer(
            bytes as u64,
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
            MemoryLocation::CpuToGpu,
            "tlas_instances",
        )?;
        if let Err(e) = instance_buffer.write_bytes(0, record_bytes) {
            ctx.allocator().lock().free_buffer(&mut instance_buffer)?;
            return Err(e.into());
        }
        let instance_address = instance_buffer.device_address(ctx.device());

        let geometry = vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::INSTANCES)
            .flags(vk::GeometryFlagsKHR::OPAQUE)
            .geometry(vk::AccelerationStructureGeometryDataKHR {
                instances: vk::AccelerationStructureGeometryInstancesDataKHR::default()
                    .array_of_pointers(false)
                    .data(vk::DeviceOrHostAddressConstKHR {
                        device_address: instance_address,
                    }),
            });

        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(vk::AccelerationStructureTypeKHR::TOP_LEVEL)
            .flags(flags)
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(std::slice::from_ref(&geometry));

        let loader = ctx.acceleration_structure_loader();
        let mut build_sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
        unsafe {
            loader.get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_info,
                &[instance_count],
                &mut build_sizes,
            );
        }

        let created = unsafe {
            create_structure(
                ctx,
                vk::AccelerationStructureTypeKHR::TOP_LEVEL,
                build_sizes.acceleration_structure_size,
                "tlas",
            )
        };
        let (acceleration_structure, buffer, device_address) = match created {
            Ok(created) => created,
            Err(e) => {
                ctx.allocator().lock().free_buffer(&mut instance_buffer)?;
                return Err(e);
            }
        };
        let tlas = self.tlas.insert(Tlas {
            acceleration_structure,
            buffer,
            instance_buffer,
            device_address,
            instance_count,
        });

        let scratch = Scratch::new(ctx, build_sizes.build_scratch_size, "tlas_scratch")?;

        let build_info = build_info
            .dst_acceleration_structure(tlas.acceleration_structure)
            .scratch_data(vk::DeviceOrHostAddressKHR {
                device_address: scratch.address,
            });
        let build_range = vk::AccelerationStructureBuildRangeInfoKHR::default()
            .primitive_count(instance_count)
            .primitive_offset(0)
            .first_vertex(0)
            .transform_offset(0);

        let built = unsafe {
            execute_single_time_commands(ctx.device(), pool, ctx.queue(), |cmd| {
                // BLAS builds from an earlier submission must be visible here
                record_build_barrier(ctx.device(), cmd);
                loader.cmd_build_acceleration_structures(
                    cmd,
                    &[build_info],
                    &[std::slice::from_ref(&build_range)],
                );
                Ok(())
            })
        };

        scratch.free(ctx)?;
        built?;

        tracing::info!(
            "Built TLAS: {} instances, {} bytes",
            instance_count,
            build_sizes.acceleration_structure_size
        );
        Ok(())
    }

    /// Destroy the TLAS, then every BLAS in reverse build order.
    ///
    /// Every structure is released even if freeing one buffer fails; the
    /// first failure is returned.
    ///
    /// # Safety
    /// No submitted work may still reference the structures.
    pub unsafe fn destroy(&mut self, ctx: &GpuContext) -> Result<()> {
        let loader = ctx.acceleration_structure_loader();
        let mut allocator = ctx.allocator().lock();
        let mut errors: FirstError<AccelError> = FirstError::new();

        if let Some(mut tlas) = self.tlas.take() {
            unsafe { loader.destroy_acceleration_structure(tlas.acceleration_structure, None) };
            errors.record(allocator.free_buffer(&mut tlas.buffer));
            errors.record(allocator.free_buffer(&mut tlas.instance_buffer));
        }
        while let Some(mut blas) = self.blas.pop() {
            unsafe { loader.destroy_acceleration_structure(blas.acceleration_structure, None) };
            errors.record(allocator.free_buffer(&mut blas.buffer));
        }

        tracing::debug!("Acceleration structures destroyed");
        errors.finish()
    }
}
