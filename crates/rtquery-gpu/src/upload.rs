//! Staged uploads into device-local buffers.

use ash::vk;
use gpu_allocator::MemoryLocation;

use crate::command::{execute_single_time_commands, CommandPool};
use crate::context::GpuContext;
use crate::error::Result;
use crate::memory::GpuBuffer;

/// Upload `data` into a new device-local buffer.
///
/// A host-visible staging buffer is filled, copied with a one-shot command
/// buffer, and freed after the queue goes idle. `TRANSFER_DST` is added to
/// `usage` automatically. The returned buffer's contents are visible to any
/// GPU work submitted afterwards.
pub fn upload_buffer<T: bytemuck::Pod>(
    ctx: &GpuContext,
    pool: &CommandPool,
    data: &[T],
    usage: vk::BufferUsageFlags,
    name: &str,
) -> Result<GpuBuffer> {
    let bytes: &[u8] = bytemuck::cast_slice(data);
    let size = bytes.len() as u64;

    let (mut staging, mut buffer) = {
        let mut allocator = ctx.allocator().lock();
        let mut staging = allocator.create_buffer(
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            &format!("{name}_staging"),
        )?;
        if let Err(e) = staging.write_bytes(0, bytes) {
            allocator.free_buffer(&mut staging)?;
            return Err(e);
        }
        let buffer = match allocator.create_buffer(
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuOnly,
            name,
        ) {
            Ok(buffer) => buffer,
            Err(e) => {
                allocator.free_buffer(&mut staging)?;
                return Err(e);
            }
        };
        (staging, buffer)
    };

    let copy = unsafe {
        execute_single_time_commands(ctx.device(), pool, ctx.queue(), |cmd| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            ctx.device()
                .cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region]);
            Ok(())
        })
    };

    let mut allocator = ctx.allocator().lock();
    allocator.free_buffer(&mut staging)?;
    if let Err(e) = copy {
        allocator.free_buffer(&mut buffer)?;
        return Err(e);
    }

    tracing::debug!("Uploaded {name} ({size} bytes)");
    Ok(buffer)
}
