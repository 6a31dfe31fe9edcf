//! Frame classifier.

use crate::config::ClassificationSettings;
use crate::dataset::ScanData;
use crate::models::{Category, MissingReferencePolicy, SubSequence};

use super::types::{Classification, ClassifyError, ClassifyResult};

/// Map a physical position onto a logical 0/1 state.
///
/// Returns `Some(0)` within `tolerance * |at0 - at1|` of `at0`, `Some(1)`
/// within the same distance of `at1` and `None` otherwise.
pub fn map_to_logical(value: f64, at0: f64, at1: f64, tolerance: f64) -> Option<u8> {
    let eps = (at0 - at1).abs() * tolerance;
    if (value - at0).abs() <= eps {
        Some(0)
    } else if (value - at1).abs() <= eps {
        Some(1)
    } else {
        None
    }
}

/// Assigns a category to every frame of a scan.
#[derive(Debug, Clone)]
pub struct FrameClassifier {
    settings: ClassificationSettings,
}

impl FrameClassifier {
    pub fn new(settings: ClassificationSettings) -> Self {
        Self { settings }
    }

    fn min_projections(&self) -> usize {
        self.settings.min_projections.max(1) as usize
    }

    /// Classify all frames and group them into sub-sequences.
    pub fn classify(&self, data: &ScanData) -> ClassifyResult<Classification> {
        let n = check_lengths(data)?;
        if n == 0 {
            return Err(ClassifyError::Empty);
        }

        let frames = data.frames();
        let (categories, used_image_keys) = match &data.image_keys {
            Some(keys) => (
                keys.iter().map(|k| Category::from_image_key(*k)).collect(),
                true,
            ),
            None => (self.classify_physical(data)?, false),
        };

        let mut classification = Classification {
            sub_sequences: build_sub_sequences(&categories),
            frames,
            categories,
            used_image_keys,
            warnings: Vec::new(),
        };

        self.check_limits(&mut classification)?;

        tracing::info!(
            "Classified {} frames: {} dark, {} flat, {} projections, {} unclassified ({} sub-sequences)",
            n,
            classification.count(Category::Dark),
            classification.count(Category::Flat),
            classification.count(Category::Projection),
            classification.count(Category::Unclassified),
            classification.sub_sequences.len()
        );

        Ok(classification)
    }

    fn classify_physical(&self, data: &ScanData) -> ClassifyResult<Vec<Category>> {
        let s = &self.settings;
        let in_beam = s
            .stage_in_beam
            .ok_or(ClassifyError::MissingParameter("stage_in_beam"))?;
        let out_of_beam = s
            .stage_out_of_beam
            .ok_or(ClassifyError::MissingParameter("stage_out_of_beam"))?;

        Ok(data
            .shutter
            .iter()
            .zip(&data.stage)
            .map(|(shutter, stage)| {
                let shutter_state =
                    map_to_logical(*shutter, s.shutter_closed, s.shutter_open, s.tolerance);
                let stage_state = map_to_logical(*stage, out_of_beam, in_beam, s.tolerance);
                Category::from_logical(shutter_state, stage_state)
            })
            .collect())
    }

    fn check_limits(&self, classification: &mut Classification) -> ClassifyResult<()> {
        let projections = classification.count(Category::Projection);
        if projections < self.min_projections() {
            return Err(ClassifyError::InsufficientProjections {
                found: projections,
                required: self.min_projections(),
            });
        }

        let unclassified = classification.count(Category::Unclassified);
        let allowed = self.settings.max_unclassified as usize;
        if unclassified > allowed {
            return Err(ClassifyError::TooManyUnclassified {
                found: unclassified,
                allowed,
            });
        }

        for category in [Category::Dark, Category::Flat] {
            if classification.count(category) > 0 {
                continue;
            }
            match self.settings.missing_reference_policy {
                MissingReferencePolicy::Fatal => {
                    return Err(ClassifyError::NoReferenceFrames(category));
                }
                MissingReferencePolicy::Warn => {
                    let msg = format!(
                        "No {} frames found; constant {} correction will be used",
                        category, category
                    );
                    tracing::warn!("{}", msg);
                    classification.warnings.push(msg);
                }
            }
        }

        Ok(())
    }
}

fn check_lengths(data: &ScanData) -> ClassifyResult<usize> {
    let lengths = data.array_lengths();
    let expected = lengths.first().map(|(_, n)| *n).unwrap_or(0);
    for (array, found) in lengths {
        if found != expected {
            return Err(ClassifyError::LengthMismatch {
                array,
                expected,
                found,
            });
        }
    }
    Ok(expected)
}

/// Start a new sub-sequence whenever the category changes.
fn build_sub_sequences(categories: &[Category]) -> Vec<SubSequence> {
    let mut out: Vec<SubSequence> = Vec::new();
    for (index, category) in categories.iter().enumerate() {
        match out.last_mut() {
            Some(current) if current.category == *category => current.frame_indices.push(index),
            _ => out.push(SubSequence::new(*category, index)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ReferenceSide;
    use std::path::PathBuf;

    const IN_BEAM: f64 = 10.0;
    const OUT_OF_BEAM: f64 = 0.0;

    fn settings() -> ClassificationSettings {
        ClassificationSettings {
            stage_in_beam: Some(IN_BEAM),
            stage_out_of_beam: Some(OUT_OF_BEAM),
            ..Default::default()
        }
    }

    /// 5 dark, 5 flat, `projections` projections spanning 0..=180 degrees.
    fn synthetic_scan(projections: usize) -> ScanData {
        let mut data = ScanData::default();
        let mut push = |shutter: f64, stage: f64, angle: f64| {
            let i = data.shutter.len();
            data.shutter.push(shutter);
            data.stage.push(stage);
            data.rotation.push(angle);
            data.file_paths
                .push(PathBuf::from(format!("/data/564/pco1/p_{:05}.tif", i)));
        };
        for _ in 0..5 {
            push(0.0, IN_BEAM, 0.0);
        }
        for _ in 0..5 {
            push(1.0, OUT_OF_BEAM, 0.0);
        }
        for k in 0..projections {
            let angle = 180.0 * k as f64 / (projections - 1) as f64;
            push(1.0, IN_BEAM, angle);
        }
        data
    }

    #[test]
    fn logical_mapping_respects_tolerance() {
        assert_eq!(map_to_logical(0.05, 0.0, 1.0, 0.1), Some(0));
        assert_eq!(map_to_logical(0.95, 0.0, 1.0, 0.1), Some(1));
        assert_eq!(map_to_logical(0.5, 0.0, 1.0, 0.1), None);
        assert_eq!(map_to_logical(9.0, 0.0, 10.0, 0.1), Some(1));
        assert_eq!(map_to_logical(8.9, 0.0, 10.0, 0.1), None);
    }

    #[test]
    fn classifies_synthetic_scan() {
        let classifier = FrameClassifier::new(settings());
        let result = classifier.classify(&synthetic_scan(200)).unwrap();

        assert_eq!(result.count(Category::Dark), 5);
        assert_eq!(result.count(Category::Flat), 5);
        assert_eq!(result.count(Category::Projection), 200);
        assert_eq!(result.count(Category::Unclassified), 0);
        assert_eq!(result.sub_sequences.len(), 3);
        assert!(!result.used_image_keys);
    }

    #[test]
    fn sub_sequences_cover_every_frame_once() {
        let mut data = synthetic_scan(150);
        // Trailing flats and a dark in the middle make extra sub-sequences.
        data.shutter[60] = 0.0;
        for _ in 0..3 {
            data.shutter.push(1.0);
            data.stage.push(OUT_OF_BEAM);
            data.rotation.push(180.0);
            data.file_paths.push(PathBuf::from("/data/564/pco1/extra.tif"));
        }
        let classifier = FrameClassifier::new(settings());
        let result = classifier.classify(&data).unwrap();

        let concatenated: Vec<usize> = result
            .sub_sequences
            .iter()
            .flat_map(|s| s.frame_indices.iter().copied())
            .collect();
        let expected: Vec<usize> = (0..data.shutter.len()).collect();
        assert_eq!(concatenated, expected);
        assert_eq!(result.sub_sequences_of(Category::Flat).count(), 2);
        assert_eq!(result.sub_sequences_of(Category::Dark).count(), 2);
        for pair in result.sub_sequences.windows(2) {
            assert_ne!(pair[0].category, pair[1].category);
        }
    }

    #[test]
    fn image_keys_take_precedence() {
        let mut data = synthetic_scan(130);
        // Positions claim projection everywhere; keys say otherwise.
        data.stage = vec![IN_BEAM; data.shutter.len()];
        data.shutter = vec![1.0; data.shutter.len()];
        let mut keys = vec![2; 5];
        keys.extend(vec![1; 5]);
        keys.extend(vec![0; 130]);
        data.image_keys = Some(keys);

        let mut s = settings();
        s.stage_in_beam = None;
        s.stage_out_of_beam = None;
        let result = FrameClassifier::new(s).classify(&data).unwrap();
        assert!(result.used_image_keys);
        assert_eq!(result.count(Category::Dark), 5);
        assert_eq!(result.count(Category::Flat), 5);
    }

    #[test]
    fn length_mismatch_is_fatal() {
        let mut data = synthetic_scan(200);
        data.rotation.pop();
        let err = FrameClassifier::new(settings()).classify(&data).unwrap_err();
        assert_eq!(
            err,
            ClassifyError::LengthMismatch {
                array: "rotation",
                expected: 210,
                found: 209
            }
        );
    }

    #[test]
    fn missing_stage_reference_is_config_error() {
        let mut s = settings();
        s.stage_out_of_beam = None;
        let err = FrameClassifier::new(s).classify(&synthetic_scan(200)).unwrap_err();
        assert_eq!(err, ClassifyError::MissingParameter("stage_out_of_beam"));
    }

    #[test]
    fn too_few_projections_is_fatal() {
        let err = FrameClassifier::new(settings())
            .classify(&synthetic_scan(100))
            .unwrap_err();
        assert_eq!(
            err,
            ClassifyError::InsufficientProjections {
                found: 100,
                required: 129
            }
        );
    }

    #[test]
    fn min_projections_clamped_to_one() {
        let mut s = settings();
        s.min_projections = 0;
        let classifier = FrameClassifier::new(s);
        assert_eq!(classifier.min_projections(), 1);
    }

    #[test]
    fn unclassified_above_limit_is_fatal() {
        let mut data = synthetic_scan(200);
        data.stage[20] = 5.0;
        let err = FrameClassifier::new(settings()).classify(&data).unwrap_err();
        assert_eq!(err, ClassifyError::TooManyUnclassified { found: 1, allowed: 0 });

        let mut s = settings();
        s.max_unclassified = 1;
        assert!(FrameClassifier::new(s).classify(&data).is_ok());
    }

    #[test]
    fn missing_flats_follow_policy() {
        let mut data = synthetic_scan(200);
        for i in 5..10 {
            data.stage[i] = IN_BEAM;
        }
        let err = FrameClassifier::new(settings()).classify(&data).unwrap_err();
        assert_eq!(err, ClassifyError::NoReferenceFrames(Category::Flat));

        let mut s = settings();
        s.missing_reference_policy = MissingReferencePolicy::Warn;
        let result = FrameClassifier::new(s).classify(&data).unwrap();
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(
            result.flat_dark_mode(Category::Flat),
            crate::models::FlatDarkMode::Constant
        );
        assert_eq!(
            result.flat_dark_mode(Category::Dark),
            crate::models::FlatDarkMode::Row
        );
    }

    #[test]
    fn rotation_range_and_references() {
        let result = FrameClassifier::new(settings())
            .classify(&synthetic_scan(200))
            .unwrap();
        let (lo, hi) = result.check_rotation_range(0.001).unwrap();
        assert_eq!((lo, hi), (10, 209));

        assert_eq!(
            result.nearest_reference(Category::Flat, lo, ReferenceSide::Before),
            Some(9)
        );
        // No flat after the last projection: falls back to the nearest before.
        assert_eq!(
            result.nearest_reference(Category::Flat, hi, ReferenceSide::After),
            Some(9)
        );
    }

    #[test]
    fn rotation_range_rejects_partial_scan() {
        let mut data = synthetic_scan(200);
        let last = data.rotation.len() - 1;
        data.rotation[last] = 179.0;
        let result = FrameClassifier::new(settings()).classify(&data).unwrap();
        assert!(matches!(
            result.check_rotation_range(0.001),
            Err(ClassifyError::RotationRange(_))
        ));
    }
}
