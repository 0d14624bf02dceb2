//! Host-side build descriptions.
//!
//! Everything here is validated before any Vulkan call is made.

use ash::vk;
use glam::Mat4;

use crate::error::{AccelError, Result};

/// Byte stride of one `R32G32B32_SFLOAT` vertex.
pub const VERTEX_STRIDE: vk::DeviceSize = 12;

const MAX_24_BIT: u32 = (1 << 24) - 1;

/// Round `value` up to a multiple of `alignment`.
///
/// An alignment of zero or one leaves the value unchanged.
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        value
    } else {
        value.div_ceil(alignment) * alignment
    }
}

/// One opaque triangle geometry for a bottom-level build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlasInput {
    vertex_address: vk::DeviceAddress,
    index_address: vk::DeviceAddress,
    vertex_count: u32,
    triangle_count: u32,
}

impl BlasInput {
    /// Describe an indexed triangle list living in device memory.
    ///
    /// Vertices are tightly packed `f32` triples; indices are `u32`.
    pub fn from_triangles(
        vertex_address: vk::DeviceAddress,
        index_address: vk::DeviceAddress,
        vertex_count: u32,
        triangle_count: u32,
    ) -> Result<Self> {
        let input = Self {
            vertex_address,
            index_address,
            vertex_count,
            triangle_count,
        };
        input.validate()?;
        Ok(input)
    }

    /// Reject geometry with nothing to build.
    pub fn validate(&self) -> Result<()> {
        if self.vertex_count == 0 {
            return Err(AccelError::EmptyGeometry("zero vertices"));
        }
        if self.triangle_count == 0 {
            return Err(AccelError::EmptyGeometry("zero triangles"));
        }
        Ok(())
    }

    /// Device address of the vertex data.
    pub const fn vertex_address(&self) -> vk::DeviceAddress {
        self.vertex_address
    }

    /// Device address of the index data.
    pub const fn index_address(&self) -> vk::DeviceAddress {
        self.index_address
    }

    pub const fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub const fn triangle_count(&self) -> u32 {
        self.triangle_count
    }

    /// Highest vertex index the build may read.
    pub const fn max_vertex(&self) -> u32 {
        self.vertex_count.saturating_sub(1)
    }

    /// Geometry record for the build commands.
    pub fn geometry(&self) -> vk::AccelerationStructureGeometryKHR<'static> {
        vk::AccelerationStructureGeometryKHR::default()
            .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
            .flags(vk::GeometryFlagsKHR::OPAQUE)
            .geometry(vk::AccelerationStructureGeometryDataKHR {
                triangles: vk::AccelerationStructureGeometryTrianglesDataKHR::default()
                    .vertex_format(vk::Format::R32G32B32_SFLOAT)
                    .vertex_data(vk::DeviceOrHostAddressConstKHR {
                        device_address: self.vertex_address,
                    })
                    .vertex_stride(VERTEX_STRIDE)
                    .max_vertex(self.max_vertex())
                    .index_type(vk::IndexType::UINT32)
                    .index_data(vk::DeviceOrHostAddressConstKHR {
                        device_address: self.index_address,
                    }),
            })
    }

    /// Range record covering every triangle.
    pub fn build_range(&self) -> vk::AccelerationStructureBuildRangeInfoKHR {
        vk::AccelerationStructureBuildRangeInfoKHR::default()
            .primitive_count(self.triangle_count)
            .primitive_offset(0)
            .first_vertex(0)
            .transform_offset(0)
    }
}

/// Check a bottom-level batch against the device primitive limit.
///
/// Runs before any Vulkan call.
pub fn validate_blas_inputs(inputs: &[BlasInput], max_primitive_count: u64) -> Result<()> {
    if inputs.is_empty() {
        return Err(AccelError::NoBlasInputs);
    }
    for input in inputs {
        input.validate()?;
        if u64::from(input.triangle_count) > max_primitive_count {
            return Err(AccelError::LimitExceeded {
                what: "triangle",
                count: u64::from(input.triangle_count),
                limit: max_primitive_count,
            });
        }
    }
    Ok(())
}

/// One TLAS instance referencing a BLAS by index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceDesc {
    pub blas_index: usize,
    /// Object-to-world transform; only the upper 3x4 part is used.
    pub transform: Mat4,
    pub custom_index: u32,
    pub mask: u8,
    pub sbt_offset: u32,
    pub flags: vk::GeometryInstanceFlagsKHR,
}

impl InstanceDesc {
    /// Identity-transformed, fully visible, culling disabled.
    pub const fn new(blas_index: usize) -> Self {
        Self {
            blas_index,
            transform: Mat4::IDENTITY,
            custom_index: 0,
            mask: 0xFF,
            sbt_offset: 0,
            flags: vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE,
        }
    }

    /// Set the transform.
    #[must_use]
    pub const fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    /// Set the value reported as `gl_InstanceCustomIndex`.
    #[must_use]
    pub const fn with_custom_index(mut self, custom_index: u32) -> Self {
        self.custom_index = custom_index;
        self
    }

    /// Set the visibility mask.
    #[must_use]
    pub const fn with_mask(mut self, mask: u8) -> Self {
        self.mask = mask;
        self
    }

    /// Set the instance flags.
    #[must_use]
    pub const fn with_flags(mut self, flags: vk::GeometryInstanceFlagsKHR) -> Self {
        self.flags = flags;
        self
    }

    /// Row-major 3x4 transform as Vulkan expects it.
    pub fn transform_matrix(&self) -> vk::TransformMatrixKHR {
        let rows = [
            self.transform.row(0),
            self.transform.row(1),
            self.transform.row(2),
        ];
        let mut matrix = [0.0; 12];
        for (r, row) in rows.iter().enumerate() {
            matrix[r * 4..r * 4 + 4].copy_from_slice(&row.to_array());
        }
        vk::TransformMatrixKHR { matrix }
    }

    /// Pack into the device instance record.
    pub fn to_vk(&self, blas_address: vk::DeviceAddress) -> Result<vk::AccelerationStructureInstanceKHR> {
        if self.custom_index > MAX_24_BIT {
            return Err(AccelError::FieldOverflow {
                field: "custom index",
                value: self.custom_index,
            });
        }
        if self.sbt_offset > MAX_24_BIT {
            return Err(AccelError::FieldOverflow {
                field: "SBT offset",
                value: self.sbt_offset,
            });
        }

        // Instance flags occupy the top 8 bits
        #[allow(clippy::cast_possible_truncation)]
        let flags = self.flags.as_raw() as u8;

        Ok(vk::AccelerationStructureInstanceKHR {
            transform: self.transform_matrix(),
            instance_custom_index_and_mask: vk::Packed24_8::new(self.custom_index, self.mask),
            instance_shader_binding_table_record_offset_and_flags: vk::Packed24_8::new(
                self.sbt_offset,
                flags,
            ),
            acceleration_structure_reference: vk::AccelerationStructureReferenceKHR {
                device_handle: blas_address,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec3;

    #[test]
    fn zero_triangles_fail_before_gpu() {
        assert!(matches!(
            BlasInput::from_triangles(0x1000, 0x2000, 3, 0),
            Err(AccelError::EmptyGeometry(_))
        ));
        assert!(matches!(
            BlasInput::from_triangles(0x1000, 0x2000, 0, 1),
            Err(AccelError::EmptyGeometry(_))
        ));
    }

    #[test]
    fn batch_validation_rejects_empty_geometry() {
        let good = BlasInput::from_triangles(0x1000, 0x2000, 3, 1).unwrap();
        let empty = BlasInput {
            vertex_address: 0x1000,
            index_address: 0x2000,
            vertex_count: 0,
            triangle_count: 0,
        };
        assert_eq!(empty.max_vertex(), 0);
        assert!(matches!(
            validate_blas_inputs(&[good, empty], u64::MAX),
            Err(AccelError::EmptyGeometry(_))
        ));
        assert!(matches!(
            validate_blas_inputs(&[], u64::MAX),
            Err(AccelError::NoBlasInputs)
        ));
        validate_blas_inputs(&[good], u64::MAX).unwrap();
    }

    #[test]
    fn batch_validation_enforces_primitive_limit() {
        let input = BlasInput::from_triangles(0x1000, 0x2000, 8, 12).unwrap();
        assert!(matches!(
            validate_blas_inputs(&[input], 11),
            Err(AccelError::LimitExceeded { count: 12, limit: 11, .. })
        ));
        validate_blas_inputs(&[input], 12).unwrap();
    }

    #[test]
    fn triangle_geometry_layout() {
        let input = BlasInput::from_triangles(0x1000, 0x2000, 8, 12).unwrap();
        assert_eq!(input.max_vertex(), 7);

        let geometry = input.geometry();
        assert_eq!(geometry.geometry_type, vk::GeometryTypeKHR::TRIANGLES);
        assert_eq!(geometry.flags, vk::GeometryFlagsKHR::OPAQUE);
        let triangles = unsafe { geometry.geometry.triangles };
        assert_eq!(triangles.vertex_format, vk::Format::R32G32B32_SFLOAT);
        assert_eq!(triangles.vertex_stride, 12);
        assert_eq!(triangles.max_vertex, 7);
        assert_eq!(triangles.index_type, vk::IndexType::UINT32);
        assert_eq!(unsafe { triangles.vertex_data.device_address }, 0x1000);
        assert_eq!(unsafe { triangles.index_data.device_address }, 0x2000);

        assert_eq!(input.build_range().primitive_count, 12);
    }

    #[test]
    fn default_instance_packing() {
        let instance = InstanceDesc::new(0).to_vk(0xABCD_0000).unwrap();
        assert_eq!(instance.instance_custom_index_and_mask.low_24(), 0);
        assert_eq!(instance.instance_custom_index_and_mask.high_8(), 0xFF);
        assert_eq!(
            instance
                .instance_shader_binding_table_record_offset_and_flags
                .high_8(),
            vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw() as u8
        );
        assert_eq!(
            unsafe { instance.acceleration_structure_reference.device_handle },
            0xABCD_0000
        );
        assert_eq!(
            instance.transform.matrix,
            [1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0]
        );
    }

    #[test]
    fn translation_lands_in_last_column() {
        let desc = InstanceDesc::new(0)
            .with_transform(Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)));
        let m = desc.transform_matrix().matrix;
        assert_relative_eq!(m[3], 1.0);
        assert_relative_eq!(m[7], 2.0);
        assert_relative_eq!(m[11], 3.0);
    }

    #[test]
    fn scale_lands_on_diagonal() {
        let desc = InstanceDesc::new(0).with_transform(Mat4::from_scale(Vec3::new(2.0, 3.0, 4.0)));
        let m = desc.transform_matrix().matrix;
        assert_relative_eq!(m[0], 2.0);
        assert_relative_eq!(m[5], 3.0);
        assert_relative_eq!(m[10], 4.0);
    }

    #[test]
    fn custom_index_must_fit_24_bits() {
        let desc = InstanceDesc::new(0).with_custom_index(1 << 24);
        assert!(matches!(
            desc.to_vk(0),
            Err(AccelError::FieldOverflow { value, .. }) if value == 1 << 24
        ));
        let desc = InstanceDesc::new(0).with_custom_index((1 << 24) - 1).with_mask(0x0F);
        let instance = desc.to_vk(0).unwrap();
        assert_eq!(instance.instance_custom_index_and_mask.low_24(), (1 << 24) - 1);
        assert_eq!(instance.instance_custom_index_and_mask.high_8(), 0x0F);
    }

    #[test]
    fn alignment() {
        assert_eq!(align_up(0, 128), 0);
        assert_eq!(align_up(1, 128), 128);
        assert_eq!(align_up(128, 128), 128);
        assert_eq!(align_up(129, 128), 256);
        assert_eq!(align_up(77, 0), 77);
        assert_eq!(align_up(77, 1), 77);
    }
}
