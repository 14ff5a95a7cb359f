//! Media metadata probing.
//!
//! Only image headers are read; the pixel data is never decoded. The pixel
//! count from the header is checked against a configured ceiling so that
//! decompression-bomb inputs are rejected before any later stage decodes
//! them, and rejected distinctly from plain decode failures.

use crate::error::MediaError;
use std::path::Path;

/// Read the dimensions of an image file.
///
/// Fails with [`MediaError::TooLarge`] when `width * height` exceeds
/// `max_pixels`, and [`MediaError::Decode`] for unreadable or malformed
/// input.
pub fn probe_dimensions(path: &Path, max_pixels: u64) -> Result<(u32, u32), MediaError> {
    let decode = |e: &dyn std::fmt::Display| MediaError::Decode {
        path: path.display().to_string(),
        detail: e.to_string(),
    };

    let reader = image::ImageReader::open(path).map_err(|e| decode(&e))?;
    let (width, height) = reader
        .with_guessed_format()
        .map_err(|e| decode(&e))?
        .into_dimensions()
        .map_err(|e| decode(&e))?;

    let pixels = u64::from(width) * u64::from(height);
    if pixels > max_pixels {
        return Err(MediaError::TooLarge {
            path: path.display().to_string(),
            detail: format!("{pixels} pixels exceeds the {max_pixels} pixel limit"),
        });
    }

    Ok((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_png(path: &Path, width: u32, height: u32) {
        let img = image::ImageBuffer::from_fn(width, height, |x, y| {
            if (x + y) % 2 == 0 {
                image::Rgba([255u8, 0, 0, 255])
            } else {
                image::Rgba([0u8, 255, 0, 255])
            }
        });
        img.save(path).expect("write png");
    }

    #[test]
    fn probes_dimensions_from_the_header() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("small.png");
        write_png(&path, 4, 2);

        let (width, height) = probe_dimensions(&path, 1_000_000).expect("probe");
        assert_eq!((width, height), (4, 2));
    }

    #[test]
    fn oversized_images_fail_distinctly() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("big.png");
        write_png(&path, 64, 64);

        let error = probe_dimensions(&path, 16).expect_err("should exceed limit");
        assert!(matches!(error, MediaError::TooLarge { .. }));
    }

    #[test]
    fn garbage_bytes_fail_as_decode_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("fake.png");
        std::fs::write(&path, b"this is not an image").expect("write garbage");

        let error = probe_dimensions(&path, 1_000_000).expect_err("should fail to decode");
        assert!(matches!(error, MediaError::Decode { .. }));
    }
}
