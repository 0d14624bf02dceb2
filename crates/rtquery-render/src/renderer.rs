//! Headless render orchestration.
//!
//! A render creates, in order: the output buffer, a command pool, the vertex
//! and index buffers, the acceleration structures, the descriptor set, the
//! shader module and the compute pipeline. Every step blocks until the GPU is
//! idle. Teardown releases the same resources in exact reverse order and
//! checks that order against a [`TeardownLedger`], even when a step failed.

use ash::vk;
use gpu_allocator::MemoryLocation;
use rtquery_accel::{AccelerationStructureBuilder, BlasInput, InstanceDesc, DEFAULT_BUILD_FLAGS};
use rtquery_core::constants::{WORKGROUP_HEIGHT, WORKGROUP_WIDTH};
use rtquery_core::{output_buffer_size, WorkgroupGrid};
use rtquery_gpu::{
    create_shader_module, execute_single_time_commands, upload_buffer, CommandPool, GpuBuffer,
    FirstError, GpuContext, GpuContextBuilder, ResourceId, TeardownLedger,
};
use rtquery_scene::Scene;
use tracing::{debug, info};

use crate::config::{Checkpoint, RenderConfig};
use crate::error::{RenderError, Result};
use crate::hdr::write_hdr;
use crate::ray_trace_pipeline::{RayTraceBindings, RayTracePipeline};

/// What a render produced.
#[derive(Debug, Clone)]
pub struct RenderOutput {
    /// Checkpoint the run stopped at.
    pub checkpoint: Checkpoint,
    pub width: u32,
    pub height: u32,
    /// Linear RGB floats, present only for a full render.
    pub pixels: Option<Vec<f32>>,
    /// Workgroup grid covering the image.
    pub grid: WorkgroupGrid,
    pub blas_count: usize,
    pub instance_count: u32,
}

impl RenderOutput {
    fn stopped(checkpoint: Checkpoint, width: u32, height: u32) -> Self {
        Self {
            checkpoint,
            width,
            height,
            pixels: None,
            grid: WorkgroupGrid::for_image(width, height),
            blas_count: 0,
            instance_count: 0,
        }
    }
}

fn count_u32(count: usize, what: &str) -> Result<u32> {
    u32::try_from(count).map_err(|_| RenderError::TooLarge(format!("{count} {what}")))
}

fn create_output_buffer(ctx: &GpuContext, width: u32, height: u32) -> Result<GpuBuffer> {
    let buffer = ctx.allocator().lock().create_buffer(
        output_buffer_size(width, height),
        vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
        MemoryLocation::GpuToCpu,
        "output_image",
    )?;
    debug!("Output buffer: {} bytes", buffer.size);
    Ok(buffer)
}

/// Resources of one render, each paired with its ledger entry.
struct Frame<'a> {
    ctx: &'a GpuContext,
    ledger: TeardownLedger,
    output: Option<(ResourceId, GpuBuffer)>,
    command_pool: Option<(ResourceId, CommandPool)>,
    vertices: Option<(ResourceId, GpuBuffer)>,
    indices: Option<(ResourceId, GpuBuffer)>,
    accel: Option<(ResourceId, AccelerationStructureBuilder)>,
    bindings: Option<(ResourceId, RayTraceBindings)>,
    shader_module: Option<(ResourceId, vk::ShaderModule)>,
    pipeline: Option<(ResourceId, RayTracePipeline)>,
}

impl<'a> Frame<'a> {
    fn new(ctx: &'a GpuContext) -> Self {
        Self {
            ctx,
            ledger: TeardownLedger::new(),
            output: None,
            command_pool: None,
            vertices: None,
            indices: None,
            accel: None,
            bindings: None,
            shader_module: None,
            pipeline: None,
        }
    }

    fn allocate_output(&mut self, width: u32, height: u32) -> Result<()> {
        let buffer = create_output_buffer(self.ctx, width, height)?;
        self.output = Some((self.ledger.register("output buffer"), buffer));
        Ok(())
    }

    fn render(
        &mut self,
        scene: &Scene,
        shader: &[u32],
        width: u32,
        height: u32,
    ) -> Result<RenderOutput> {
        let ctx = self.ctx;
        let device = ctx.device();

        let vertex_count = count_u32(scene.vertex_count(), "vertices")?;
        let triangle_count = count_u32(scene.triangle_count(), "triangles")?;

        let grid = WorkgroupGrid::for_image(width, height);
        let limits = ctx.capabilities().max_compute_workgroup_count;
        if grid.x > limits[0] || grid.y > limits[1] {
            return Err(RenderError::TooLarge(format!(
                "{width}x{height} needs {}x{} workgroups, device allows {}x{}",
                grid.x, grid.y, limits[0], limits[1]
            )));
        }

        let output = create_output_buffer(ctx, width, height)?;
        let output = &self
            .output
            .insert((self.ledger.register("output buffer"), output))
            .1;

        let pool = unsafe {
            CommandPool::new(
                device,
                ctx.queue_family(),
                vk::CommandPoolCreateFlags::TRANSIENT,
            )?
        };
        let pool = &self
            .command_pool
            .insert((self.ledger.register("command pool"), pool))
            .1;

        let usage = vk::BufferUsageFlags::STORAGE_BUFFER
            | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;

        let vertices = upload_buffer(ctx, pool, scene.vertices(), usage, "vertices")?;
        let vertices = &self
            .vertices
            .insert((self.ledger.register("vertex buffer"), vertices))
            .1;

        let indices = upload_buffer(ctx, pool, scene.indices(), usage, "indices")?;
        let indices = &self
            .indices
            .insert((self.ledger.register("index buffer"), indices))
            .1;

        let input = BlasInput::from_triangles(
            vertices.device_address(device),
            indices.device_address(device),
            vertex_count,
            triangle_count,
        )?;

        let accel = &mut self
            .accel
            .insert((
                self.ledger.register("acceleration structures"),
                AccelerationStructureBuilder::new(),
            ))
            .1;
        accel.build_blas(ctx, pool, &[input], DEFAULT_BUILD_FLAGS)?;
        accel.build_tlas(ctx, pool, &[InstanceDesc::new(0)], DEFAULT_BUILD_FLAGS)?;
        let tlas = accel.tlas()?;

        let bindings = unsafe { RayTraceBindings::new(device)? };
        let bindings = &self
            .bindings
            .insert((self.ledger.register("descriptor set"), bindings))
            .1;
        unsafe {
            bindings.write(
                device,
                output,
                tlas.acceleration_structure,
                vertices,
                indices,
            );
        }

        let module = unsafe { create_shader_module(device, shader)? };
        let module = self
            .shader_module
            .insert((self.ledger.register("shader module"), module))
            .1;

        let pipeline = unsafe { RayTracePipeline::new(device, module, bindings)? };
        let pipeline = &self
            .pipeline
            .insert((self.ledger.register("compute pipeline"), pipeline))
            .1;

        unsafe {
            execute_single_time_commands(device, pool, ctx.queue(), |cmd| {
                Ok(pipeline.record_dispatch(device, cmd, bindings, width, height))
            })?;
        }
        info!(
            "Dispatched {}x{}x{} workgroups of {}x{} for {}x{} pixels",
            grid.x, grid.y, grid.z, WORKGROUP_WIDTH, WORKGROUP_HEIGHT, width, height
        );

        let pixels = output.read::<f32>()?;

        Ok(RenderOutput {
            checkpoint: Checkpoint::Full,
            width,
            height,
            pixels: Some(pixels),
            grid,
            blas_count: accel.blas_count(),
            instance_count: tlas.instance_count,
        })
    }

    /// Release everything in reverse creation order.
    ///
    /// A failed step does not stop the remaining releases; the first error
    /// is returned.
    fn teardown(&mut self) -> Result<()> {
        let ctx = self.ctx;
        let device = ctx.device();
        let mut errors: FirstError<RenderError> = FirstError::new();
        errors.record(ctx.wait_idle());

        if let Some((id, pipeline)) = self.pipeline.take() {
            errors.record(self.ledger.release(id));
            unsafe { pipeline.destroy(device) };
        }
        if let Some((id, module)) = self.shader_module.take() {
            errors.record(self.ledger.release(id));
            unsafe { device.destroy_shader_module(module, None) };
        }
        if let Some((id, bindings)) = self.bindings.take() {
            errors.record(self.ledger.release(id));
            unsafe { bindings.destroy(device) };
        }
        if let Some((id, mut accel)) = self.accel.take() {
            errors.record(self.ledger.release(id));
            errors.record(unsafe { accel.destroy(ctx) });
        }
        for slot in [&mut self.indices, &mut self.vertices] {
            if let Some((id, mut buffer)) = slot.take() {
                errors.record(self.ledger.release(id));
                errors.record(ctx.allocator().lock().free_buffer(&mut buffer));
            }
        }
        if let Some((id, pool)) = self.command_pool.take() {
            errors.record(self.ledger.release(id));
            unsafe { pool.destroy(device) };
        }
        if let Some((id, mut buffer)) = self.output.take() {
            errors.record(self.ledger.release(id));
            errors.record(ctx.allocator().lock().free_buffer(&mut buffer));
        }

        errors.record(self.ledger.finish());
        debug!("Render resources released");
        errors.finish()
    }
}

/// Owns the GPU context; renders any number of scenes with it.
pub struct Renderer {
    ctx: GpuContext,
}

impl Renderer {
    /// Create the device context.
    pub fn new(config: &RenderConfig) -> Result<Self> {
        let ctx = GpuContextBuilder::new()
            .app_name(config.app_name.clone())
            .validation(config.validation)
            .workgroup_tile(WORKGROUP_WIDTH, WORKGROUP_HEIGHT)
            .build()?;
        Ok(Self { ctx })
    }

    /// Wrap an existing context.
    pub const fn with_context(ctx: GpuContext) -> Self {
        Self { ctx }
    }

    /// The device context.
    pub const fn context(&self) -> &GpuContext {
        &self.ctx
    }

    /// Allocate the output buffer and release it again.
    pub fn allocate_storage(&self, width: u32, height: u32) -> Result<RenderOutput> {
        let mut frame = Frame::new(&self.ctx);
        let allocated = frame.allocate_output(width, height);
        let teardown = frame.teardown();
        allocated?;
        teardown?;
        Ok(RenderOutput::stopped(Checkpoint::Storage, width, height))
    }

    /// Render `scene` once with the given SPIR-V and read the image back.
    pub fn render_scene(
        &self,
        scene: &Scene,
        shader: &[u32],
        width: u32,
        height: u32,
    ) -> Result<RenderOutput> {
        let mut frame = Frame::new(&self.ctx);
        let rendered = frame.render(scene, shader, width, height);
        let teardown = frame.teardown();
        let output = rendered?;
        teardown?;
        Ok(output)
    }
}

/// Run the whole pipeline as configured, writing the HDR file on a full run.
pub fn run(config: &RenderConfig) -> Result<RenderOutput> {
    config.validate()?;
    let (width, height) = (config.width, config.height);

    let renderer = Renderer::new(config)?;

    let output = match config.checkpoint {
        Checkpoint::Context => RenderOutput::stopped(Checkpoint::Context, width, height),
        Checkpoint::Storage => renderer.allocate_storage(width, height)?,
        Checkpoint::Full => {
            let scene = Scene::find_and_load(&config.search_paths, &config.scene)?;
            let shader = rtquery_shaders::load_raytrace_shader(&config.search_paths, &config.shader)?;
            let output = renderer.render_scene(&scene, &shader, width, height)?;
            if let Some(pixels) = &output.pixels {
                write_hdr(&config.output, pixels, width, height)?;
            }
            output
        }
    };

    info!("Stopped at checkpoint {:?}", output.checkpoint);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_output_has_no_pixels() {
        let output = RenderOutput::stopped(Checkpoint::Storage, 800, 600);
        assert!(output.pixels.is_none());
        assert_eq!(output.grid, WorkgroupGrid::for_image(800, 600));
        assert_eq!(output.blas_count, 0);
    }

    #[test]
    fn oversized_counts_are_reported() {
        assert_eq!(count_u32(12, "triangles").unwrap(), 12);
        #[cfg(target_pointer_width = "64")]
        assert!(matches!(
            count_u32(usize::MAX, "triangles"),
            Err(RenderError::TooLarge(_))
        ));
    }
}
