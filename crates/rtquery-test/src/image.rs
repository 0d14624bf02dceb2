//! Linear RGB float images and comparisons.

use std::path::Path;

use rtquery_render::hdr::{float_count, read_hdr, write_hdr};

use crate::{Result, TestError};

/// Tightly packed, row-major RGB32F image.
#[derive(Debug, Clone, PartialEq)]
pub struct RgbImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl RgbImage {
    /// Wrap raw floats, checking the length.
    pub fn from_raw(width: u32, height: u32, data: Vec<f32>) -> Result<Self> {
        if data.len() != float_count(width, height) {
            return Err(TestError::ImageComparison(format!(
                "{}x{} image needs {} floats, got {}",
                width,
                height,
                float_count(width, height),
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Load a Radiance HDR file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let (data, width, height) = read_hdr(path)?;
        Self::from_raw(width, height, data)
    }

    /// Save as a Radiance HDR file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_hdr(path, &self.data, self.width, self.height)?;
        Ok(())
    }

    /// Pixel at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[f32; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = 3 * (y as usize * self.width as usize + x as usize);
        Some([self.data[i], self.data[i + 1], self.data[i + 2]])
    }

    /// Whether every channel is finite and non-negative.
    pub fn is_finite_non_negative(&self) -> bool {
        self.data.iter().all(|v| v.is_finite() && *v >= 0.0)
    }

    fn check_dimensions(&self, other: &Self) -> Result<()> {
        if (self.width, self.height) != (other.width, other.height) {
            return Err(TestError::ImageComparison(format!(
                "Image dimensions don't match: {}x{} vs {}x{}",
                self.width, self.height, other.width, other.height
            )));
        }
        Ok(())
    }

    /// Mean absolute per-channel difference.
    pub fn mean_abs_difference(&self, other: &Self) -> Result<f64> {
        self.check_dimensions(other)?;
        if self.data.is_empty() {
            return Ok(0.0);
        }
        let total: f64 = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| f64::from((a - b).abs()))
            .sum();
        Ok(total / self.data.len() as f64)
    }

    /// Largest absolute per-channel difference.
    pub fn max_abs_difference(&self, other: &Self) -> Result<f32> {
        self.check_dimensions(other)?;
        Ok(self
            .data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f32::max))
    }

    /// Image highlighting channels that differ by more than `tolerance`.
    pub fn difference_image(&self, other: &Self, tolerance: f32) -> Result<Self> {
        self.check_dimensions(other)?;
        let data = self
            .data
            .chunks_exact(3)
            .zip(other.data.chunks_exact(3))
            .flat_map(|(a, b)| {
                let differs = a.iter().zip(b).any(|(x, y)| (x - y).abs() > tolerance);
                if differs {
                    // Highlight differences in red
                    [1.0, 0.0, 0.0]
                } else {
                    [a[0] * 0.5, a[1] * 0.5, a[2] * 0.5]
                }
            })
            .collect();
        Ok(Self {
            width: self.width,
            height: self.height,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn solid(width: u32, height: u32, value: f32) -> RgbImage {
        RgbImage::from_raw(width, height, vec![value; float_count(width, height)]).unwrap()
    }

    #[test]
    fn length_is_checked() {
        assert!(RgbImage::from_raw(2, 2, vec![0.0; 11]).is_err());
        assert!(RgbImage::from_raw(2, 2, vec![0.0; 12]).is_ok());
    }

    #[test]
    fn pixel_lookup() {
        let mut image = solid(4, 2, 0.0);
        image.data[3 * (4 + 2)..3 * (4 + 2) + 3].copy_from_slice(&[1.0, 2.0, 3.0]);
        assert_eq!(image.pixel(2, 1), Some([1.0, 2.0, 3.0]));
        assert_eq!(image.pixel(4, 0), None);
        assert_eq!(image.pixel(0, 2), None);
    }

    #[test]
    fn finite_non_negative() {
        let mut image = solid(2, 2, 0.25);
        assert!(image.is_finite_non_negative());
        image.data[5] = -0.1;
        assert!(!image.is_finite_non_negative());
        image.data[5] = f32::NAN;
        assert!(!image.is_finite_non_negative());
    }

    #[test]
    fn differences() {
        let a = solid(2, 2, 0.5);
        let mut b = solid(2, 2, 0.5);
        assert_relative_eq!(a.mean_abs_difference(&b).unwrap(), 0.0);

        b.data[0] = 0.8;
        assert_relative_eq!(a.max_abs_difference(&b).unwrap(), 0.3, epsilon = 1e-6);
        assert_relative_eq!(a.mean_abs_difference(&b).unwrap(), 0.3 / 12.0, epsilon = 1e-6);

        let diff = a.difference_image(&b, 0.1).unwrap();
        assert_eq!(diff.pixel(0, 0), Some([1.0, 0.0, 0.0]));
        assert_eq!(diff.pixel(1, 0), Some([0.25, 0.25, 0.25]));
    }

    #[test]
    fn dimension_mismatch() {
        assert!(matches!(
            solid(2, 2, 0.0).mean_abs_difference(&solid(2, 3, 0.0)),
            Err(TestError::ImageComparison(_))
        ));
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solid.hdr");
        let image = solid(8, 4, 0.5);
        image.save(&path).unwrap();

        let loaded = RgbImage::load(&path).unwrap();
        assert_eq!((loaded.width, loaded.height), (8, 4));
        assert!(image.max_abs_difference(&loaded).unwrap() < 0.01);
    }
}
