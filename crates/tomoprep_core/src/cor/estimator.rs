//! Centre-of-rotation estimate from a 0/180 degree projection pair.

use std::path::PathBuf;

use crate::classify::{Classification, ReferenceSide};
use crate::config::CorSettings;
use crate::models::{Category, CorResult};

use super::threshold::{binarize, centroid, otsu_threshold, zero_band};
use super::types::{CorError, EstimateResult, Projection};

/// Frame files used for one estimate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorPair {
    pub projection_0: PathBuf,
    pub projection_180: PathBuf,
    pub flat_0: Option<PathBuf>,
    pub flat_180: Option<PathBuf>,
}

impl CorPair {
    /// First and last projection, after checking they sit at 0 and 180
    /// degrees, with the flats nearest to each (preceding for 0, following
    /// for 180).
    pub fn select(classification: &Classification, angle_tolerance: f64) -> EstimateResult<Self> {
        let (lo, hi) = classification.check_rotation_range(angle_tolerance)?;
        let flat = |idx, side| {
            classification
                .nearest_reference(Category::Flat, idx, side)
                .map(|i| classification.frames[i].file_path.clone())
        };
        Ok(Self {
            projection_0: classification.frames[lo].file_path.clone(),
            projection_180: classification.frames[hi].file_path.clone(),
            flat_0: flat(lo, ReferenceSide::Before),
            flat_180: flat(hi, ReferenceSide::After),
        })
    }
}

/// Estimates the rotation axis by comparing mask centroids.
#[derive(Debug, Clone)]
pub struct RotationCenterEstimator {
    band_rows: u32,
    flat_field_correction: bool,
}

impl RotationCenterEstimator {
    pub fn new(settings: &CorSettings) -> Self {
        Self {
            band_rows: settings.band_rows,
            flat_field_correction: settings.flat_field_correction,
        }
    }

    /// Load the pair and estimate. Flats are only read when flat-field
    /// correction is enabled and both are known.
    pub fn estimate_files(&self, pair: &CorPair) -> EstimateResult<CorResult> {
        let at_0 = Projection::load(&pair.projection_0)?;
        let at_180 = Projection::load(&pair.projection_180)?;
        let flats = match (&pair.flat_0, &pair.flat_180) {
            (Some(f0), Some(f180)) if self.flat_field_correction => {
                Some((Projection::load(f0)?, Projection::load(f180)?))
            }
            _ => None,
        };
        self.estimate(&at_0, &at_180, flats.as_ref().map(|(a, b)| (a, b)))
    }

    pub fn estimate(
        &self,
        at_0: &Projection,
        at_180: &Projection,
        flats: Option<(&Projection, &Projection)>,
    ) -> EstimateResult<CorResult> {
        if at_0.dimensions() != at_180.dimensions() {
            return Err(CorError::SizeMismatch {
                left: at_0.dimensions(),
                right: at_180.dimensions(),
            });
        }

        let (a0, a180) = match flats {
            Some((f0, f180)) => (at_0.subtract(f0)?, at_180.subtract(f180)?),
            None => (at_0.clone(), at_180.clone()),
        };
        let a0 = a0.inverted();
        let a180 = a180.mirrored().inverted();

        let c0 = self.object_centroid(&a0, "0 degree")?;
        let c180 = self.object_centroid(&a180, "180 degree")?;

        let shift_x = c180.x - c0.x;
        let shift_y = c180.y - c0.y;
        let result = CorResult {
            axis_x: 0.5 * (at_0.width() as f64 - shift_x),
            axis_y: shift_y,
        };
        tracing::debug!(
            "Centroids 0deg=({:.2}, {:.2}) 180deg=({:.2}, {:.2}) -> axis {:.2}",
            c0.x,
            c0.y,
            c180.x,
            c180.y,
            result.axis_x
        );
        Ok(result)
    }

    fn object_centroid(
        &self,
        img: &Projection,
        label: &'static str,
    ) -> EstimateResult<super::types::Centroid> {
        let threshold = otsu_threshold(img);
        let mut mask = binarize(img, threshold);
        zero_band(&mut mask, self.band_rows);
        let c = centroid(&mask);
        if c.count == 0 {
            return Err(CorError::EmptyMask(label));
        }
        tracing::debug!("{} mask: threshold {}, {} pixels", label, threshold, c.count);
        Ok(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::FrameClassifier;
    use crate::config::ClassificationSettings;
    use crate::dataset::ScanData;
    use image::{ImageBuffer, Luma};
    use tempfile::tempdir;

    const W: u32 = 64;
    const H: u32 = 24;

    /// Bright background with a dark bar over `cols`, below row 4.
    fn bar(cols: std::ops::Range<u32>) -> Projection {
        let mut pixels = Vec::with_capacity((W * H) as usize);
        for y in 0..H {
            for x in 0..W {
                let v = if y >= 4 && cols.contains(&x) { 1000 } else { 50000 };
                pixels.push(v);
            }
        }
        Projection::from_raw(W, H, pixels).unwrap()
    }

    fn estimator() -> RotationCenterEstimator {
        RotationCenterEstimator::new(&CorSettings {
            band_rows: 2,
            ..CorSettings::default()
        })
    }

    #[test]
    fn recovers_axis_of_shifted_pair() {
        // Axis at x = 30: a bar centred on 13 lands centred on 47 at 180.
        let result = estimator().estimate(&bar(10..16), &bar(44..50), None).unwrap();
        assert!((result.axis_x - 30.0).abs() < 1e-9, "{result:?}");
        assert!(result.axis_y.abs() < 1e-9);
    }

    #[test]
    fn centred_axis() {
        let result = estimator().estimate(&bar(29..35), &bar(29..35), None).unwrap();
        assert!((result.axis_x - 32.0).abs() < 1e-9);
    }

    #[test]
    fn banded_out_object_is_an_error() {
        let est = RotationCenterEstimator::new(&CorSettings {
            band_rows: H,
            ..CorSettings::default()
        });
        assert!(matches!(
            est.estimate(&bar(10..16), &bar(44..50), None),
            Err(CorError::EmptyMask(_))
        ));
    }

    #[test]
    fn flat_correction_keeps_the_estimate() {
        let flat = Projection::from_raw(W, H, vec![500; (W * H) as usize]).unwrap();
        let result = estimator()
            .estimate(&bar(10..16), &bar(44..50), Some((&flat, &flat)))
            .unwrap();
        assert!((result.axis_x - 30.0).abs() < 1e-9);
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let small = Projection::from_raw(2, 2, vec![0; 4]).unwrap();
        assert!(matches!(
            estimator().estimate(&bar(0..4), &small, None),
            Err(CorError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn select_and_estimate_from_files() {
        let dir = tempdir().unwrap();
        let save = |name: &str, p: &Projection| {
            let path = dir.path().join(name);
            let img: ImageBuffer<Luma<u16>, Vec<u16>> =
                ImageBuffer::from_raw(W, H, p.pixels().to_vec()).unwrap();
            img.save(&path).unwrap();
            path
        };
        let flat = Projection::from_raw(W, H, vec![50000; (W * H) as usize]).unwrap();
        let f = save("flat.tif", &flat);
        let p0 = save("p0.tif", &bar(10..16));
        let p90 = save("p90.tif", &bar(20..26));
        let p180 = save("p180.tif", &bar(44..50));

        // flat, 0, 90, 180, flat
        let scan = ScanData {
            shutter: vec![1.0; 5],
            stage: vec![1.0, 0.0, 0.0, 0.0, 1.0],
            rotation: vec![0.0, 0.0, 90.0, 180.0, 180.0],
            file_paths: vec![f.clone(), p0.clone(), p90, p180.clone(), f.clone()],
            image_keys: Some(vec![1, 0, 0, 0, 1]),
        };
        let classification = FrameClassifier::new(ClassificationSettings {
            min_projections: 1,
            missing_reference_policy: crate::models::MissingReferencePolicy::Warn,
            ..ClassificationSettings::default()
        })
        .classify(&scan)
        .unwrap();

        let pair = CorPair::select(&classification, 0.001).unwrap();
        assert_eq!(pair.projection_0, p0);
        assert_eq!(pair.projection_180, p180);
        assert_eq!(pair.flat_0.as_deref(), Some(f.as_path()));
        assert_eq!(pair.flat_180.as_deref(), Some(f.as_path()));

        let result = estimator().estimate_files(&pair).unwrap();
        assert!((result.axis_x - 30.0).abs() < 1e-9);
    }

    #[test]
    fn select_rejects_wrong_rotation_range() {
        let scan = ScanData {
            shutter: vec![1.0; 3],
            stage: vec![0.0; 3],
            rotation: vec![0.0, 45.0, 90.0],
            file_paths: vec![PathBuf::from("a"), PathBuf::from("b"), PathBuf::from("c")],
            image_keys: Some(vec![0, 0, 0]),
        };
        let classification = FrameClassifier::new(ClassificationSettings {
            min_projections: 1,
            missing_reference_policy: crate::models::MissingReferencePolicy::Warn,
            ..ClassificationSettings::default()
        })
        .classify(&scan)
        .unwrap();
        assert!(matches!(
            CorPair::select(&classification, 0.001),
            Err(CorError::Classify(_))
        ));
    }
}
