//! Projection images and estimator errors.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::classify::ClassifyError;

#[derive(Error, Debug)]
pub enum CorError {
    #[error("Failed to decode {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Image sizes differ: {left:?} vs {right:?}")]
    SizeMismatch {
        left: (u32, u32),
        right: (u32, u32),
    },

    #[error("No object pixels left in the {0} mask")]
    EmptyMask(&'static str),

    #[error(transparent)]
    Classify(#[from] ClassifyError),
}

pub type EstimateResult<T> = Result<T, CorError>;

/// A 16-bit greyscale image, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    width: u32,
    height: u32,
    pixels: Vec<u16>,
}

impl Projection {
    /// Returns `None` when `pixels` does not hold `width * height` values.
    pub fn from_raw(width: u32, height: u32, pixels: Vec<u16>) -> Option<Self> {
        if pixels.len() != width as usize * height as usize {
            return None;
        }
        Some(Self {
            width,
            height,
            pixels,
        })
    }

    /// Decode any supported image as 16-bit luma.
    pub fn load(path: &Path) -> EstimateResult<Self> {
        let img = image::open(path).map_err(|source| CorError::Image {
            path: path.to_path_buf(),
            source,
        })?;
        let luma = img.into_luma16();
        let (width, height) = luma.dimensions();
        Ok(Self {
            width,
            height,
            pixels: luma.into_raw(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixels(&self) -> &[u16] {
        &self.pixels
    }

    pub fn get(&self, x: u32, y: u32) -> u16 {
        self.pixels[(y as usize) * self.width as usize + x as usize]
    }

    pub fn max_value(&self) -> u16 {
        self.pixels.iter().copied().max().unwrap_or(0)
    }

    fn ensure_same_size(&self, other: &Projection) -> EstimateResult<()> {
        if self.dimensions() != other.dimensions() {
            return Err(CorError::SizeMismatch {
                left: self.dimensions(),
                right: other.dimensions(),
            });
        }
        Ok(())
    }

    /// Subtract `flat` pixel-wise, clamping at zero.
    pub fn subtract(&self, flat: &Projection) -> EstimateResult<Projection> {
        self.ensure_same_size(flat)?;
        let pixels = self
            .pixels
            .iter()
            .zip(&flat.pixels)
            .map(|(&p, &f)| p.saturating_sub(f))
            .collect();
        Ok(self.with_pixels(pixels))
    }

    /// Mirror left to right.
    pub fn mirrored(&self) -> Projection {
        let mut pixels = Vec::with_capacity(self.pixels.len());
        for row in self.pixels.chunks(self.width.max(1) as usize) {
            pixels.extend(row.iter().rev());
        }
        self.with_pixels(pixels)
    }

    /// `u16::MAX - v` for every pixel.
    pub fn inverted(&self) -> Projection {
        let pixels = self.pixels.iter().map(|&p| u16::MAX - p).collect();
        self.with_pixels(pixels)
    }

    fn with_pixels(&self, pixels: Vec<u16>) -> Projection {
        Projection {
            width: self.width,
            height: self.height,
            pixels,
        }
    }
}

/// Binary mask with the image's dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    pub width: u32,
    pub height: u32,
    pub on: Vec<bool>,
}

impl Mask {
    pub fn count(&self) -> usize {
        self.on.iter().filter(|&&b| b).count()
    }
}

/// Mean coordinate of the `on` pixels, with the pixel-centre offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Centroid {
    pub x: f64,
    pub y: f64,
    pub count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma};
    use tempfile::tempdir;

    fn proj(width: u32, height: u32, pixels: &[u16]) -> Projection {
        Projection::from_raw(width, height, pixels.to_vec()).unwrap()
    }

    #[test]
    fn from_raw_checks_length() {
        assert!(Projection::from_raw(2, 2, vec![0; 3]).is_none());
        assert!(Projection::from_raw(2, 2, vec![0; 4]).is_some());
    }

    #[test]
    fn mirror_invert_subtract() {
        let p = proj(3, 2, &[1, 2, 3, 4, 5, 6]);
        assert_eq!(p.mirrored().pixels(), &[3, 2, 1, 6, 5, 4]);
        assert_eq!(p.inverted().get(0, 0), u16::MAX - 1);

        let flat = proj(3, 2, &[2, 2, 2, 2, 2, 2]);
        assert_eq!(p.subtract(&flat).unwrap().pixels(), &[0, 0, 1, 2, 3, 4]);
        assert!(matches!(
            p.subtract(&proj(2, 3, &[0; 6])),
            Err(CorError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn load_reads_sixteen_bit_tiff() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("p.tif");
        let img: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_fn(4, 3, |x, y| Luma([(y * 1000 + x) as u16 + 40000]));
        img.save(&path).unwrap();

        let p = Projection::load(&path).unwrap();
        assert_eq!(p.dimensions(), (4, 3));
        assert_eq!(p.get(3, 2), 42003);
        assert_eq!(p.max_value(), 42003);
    }

    #[test]
    fn load_failure_names_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.tif");
        match Projection::load(&path) {
            Err(CorError::Image { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
