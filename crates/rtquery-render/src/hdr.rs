//! Radiance HDR output.
//!
//! The output buffer is tightly packed, row-major, three `f32` per pixel and
//! is written as-is: no tone mapping and no colour conversion.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use image::codecs::hdr::HdrEncoder;
use image::Rgb;
use thiserror::Error;
use tracing::info;

/// Errors raised while writing or reading HDR files.
#[derive(Error, Debug)]
pub enum HdrError {
    /// Pixel data was the wrong size for the image.
    #[error("Invalid image data: expected {expected} floats, got {actual}")]
    InvalidImageData { expected: usize, actual: usize },

    /// File could not be created or flushed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Encoding or decoding failed.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Number of floats in a `width` x `height` RGB image.
pub fn float_count(width: u32, height: u32) -> usize {
    width as usize * height as usize * 3
}

fn to_pixels(data: &[f32], width: u32, height: u32) -> Result<Vec<Rgb<f32>>, HdrError> {
    let expected = float_count(width, height);
    if data.len() != expected || expected == 0 {
        return Err(HdrError::InvalidImageData {
            expected,
            actual: data.len(),
        });
    }
    Ok(data
        .chunks_exact(3)
        .map(|rgb| Rgb([rgb[0], rgb[1], rgb[2]]))
        .collect())
}

/// Encode linear RGB floats as Radiance HDR into `writer`.
pub fn encode_hdr(
    writer: impl Write,
    data: &[f32],
    width: u32,
    height: u32,
) -> Result<(), HdrError> {
    let pixels = to_pixels(data, width, height)?;
    HdrEncoder::new(writer).encode(&pixels, width as usize, height as usize)?;
    Ok(())
}

/// Write linear RGB floats to a Radiance HDR file.
pub fn write_hdr(
    path: impl AsRef<Path>,
    data: &[f32],
    width: u32,
    height: u32,
) -> Result<(), HdrError> {
    let path = path.as_ref();
    // Validate before touching the file system
    let pixels = to_pixels(data, width, height)?;

    let mut writer = BufWriter::new(File::create(path)?);
    HdrEncoder::new(&mut writer).encode(&pixels, width as usize, height as usize)?;
    writer.flush()?;

    info!("Wrote {}x{} HDR image: {}", width, height, path.display());
    Ok(())
}

/// Read a Radiance HDR file back as linear RGB floats.
pub fn read_hdr(path: impl AsRef<Path>) -> Result<(Vec<f32>, u32, u32), HdrError> {
    let image = image::open(path)?.into_rgb32f();
    let (width, height) = image.dimensions();
    Ok((image.into_raw(), width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn gradient(width: u32, height: u32) -> Vec<f32> {
        let mut data = Vec::with_capacity(float_count(width, height));
        for y in 0..height {
            for x in 0..width {
                data.push(x as f32 / width as f32);
                data.push(y as f32 / height as f32);
                data.push(0.5);
            }
        }
        data
    }

    #[test]
    fn wrong_length_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.hdr");
        match write_hdr(&path, &[0.0; 10], 2, 2) {
            Err(HdrError::InvalidImageData { expected, actual }) => {
                assert_eq!(expected, 12);
                assert_eq!(actual, 10);
            }
            other => panic!("expected InvalidImageData, got {other:?}"),
        }
        assert!(!path.exists());
    }

    #[test]
    fn empty_image_is_rejected() {
        let mut out = Vec::new();
        assert!(matches!(
            encode_hdr(&mut out, &[], 0, 0),
            Err(HdrError::InvalidImageData { .. })
        ));
    }

    #[test]
    fn header_is_radiance() {
        let mut out = Vec::new();
        encode_hdr(&mut out, &gradient(4, 2), 4, 2).unwrap();
        assert!(out.starts_with(b"#?RADIANCE"));
    }

    #[test]
    fn written_file_reads_back() {
        let (width, height) = (16, 8);
        let data = gradient(width, height);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.hdr");

        write_hdr(&path, &data, width, height).unwrap();
        let (read, w, h) = read_hdr(&path).unwrap();

        assert_eq!((w, h), (width, height));
        assert_eq!(read.len(), data.len());
        for (a, b) in read.iter().zip(&data) {
            assert!(a.is_finite() && *a >= 0.0);
            // RGBE keeps an 8-bit mantissa per channel
            assert_relative_eq!(*a, *b, epsilon = 0.02);
        }
    }
}
