//! Layout manager for building and populating the processing tree.

use std::fs;
use std::path::{Path, PathBuf};

use super::links::{create_link, decimate, ensure_dir, LinkOutcome, NumberedName};
use super::types::{LayoutError, LayoutResult, LinkSummary, ProcessingLayout};
use crate::classify::Classification;
use crate::config::LayoutSettings;
use crate::models::Category;

/// Creates the processing tree for a scan and links frames into it.
#[derive(Debug, Clone)]
pub struct LayoutManager {
    settings: LayoutSettings,
    /// Processing root override; derived from the reference frame if absent.
    output_override: Option<PathBuf>,
}

impl LayoutManager {
    pub fn new(settings: LayoutSettings, output_override: Option<PathBuf>) -> Self {
        Self {
            settings,
            output_override,
        }
    }

    fn decimation(&self) -> usize {
        self.settings.decimation.max(1) as usize
    }

    /// Work out every directory of the tree from a reference frame path.
    ///
    /// Without an override the root is `<ref>/../../../processing`; an
    /// override gets the mandatory directory name appended unless it
    /// already ends with it. The scan name is the reference file's
    /// grandparent directory.
    pub fn resolve(&self, reference: &Path) -> LayoutResult<ProcessingLayout> {
        let mandatory = self.settings.mandatory_dir.as_str();
        let root = match &self.output_override {
            Some(dir) if dir.file_name().is_some_and(|n| n == mandatory) => dir.clone(),
            Some(dir) => dir.join(mandatory),
            None => ancestor(reference, 3)
                .ok_or_else(|| LayoutError::InvalidReference(reference.to_path_buf()))?
                .join(mandatory),
        };

        let scan_name = ancestor(reference, 2)
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| LayoutError::InvalidReference(reference.to_path_buf()))?;

        let raw_dir = root.join("rawdata").join(&scan_name);
        let sino_dir = root.join("sino").join(&scan_name);
        let hold = self.settings.hold_raw_references;

        Ok(ProcessingLayout {
            projections_dir: raw_dir.join("projections"),
            sino_dark_dir: sino_dir.join("dark"),
            sino_flat_dir: sino_dir.join("flat"),
            reconstruction_dir: root.join("reconstruction").join(&scan_name),
            raw_dark_dir: hold.then(|| raw_dir.join("dark")),
            raw_flat_dir: hold.then(|| raw_dir.join("flat")),
            sino_dir,
            root,
            scan_name,
        })
    }

    /// Create every directory of the layout (idempotent).
    pub fn create_dirs(&self, layout: &ProcessingLayout) -> LayoutResult<()> {
        let mut dirs = vec![
            &layout.projections_dir,
            &layout.sino_dark_dir,
            &layout.sino_flat_dir,
            &layout.reconstruction_dir,
        ];
        dirs.extend(layout.raw_dark_dir.iter());
        dirs.extend(layout.raw_flat_dir.iter());

        for dir in dirs {
            ensure_dir(dir)?;
        }
        tracing::debug!("Processing tree ready under {}", layout.root.display());
        Ok(())
    }

    /// Link reference and projection frames into the layout.
    ///
    /// The first dark and first flat frame become `dark.tif`/`flat.tif`;
    /// a category with no frames is skipped. Projections are decimated and
    /// linked as `p_NNNNN.tif`, numbered consecutively.
    pub fn populate(
        &self,
        layout: &ProcessingLayout,
        classification: &Classification,
    ) -> LayoutResult<LinkSummary> {
        let mut summary = LinkSummary::default();

        if let Some(dark) = classification.first_of(Category::Dark) {
            tally(&mut summary, create_link(&dark.file_path, &layout.dark_file())?);
            summary.dark_links += 1;
        }
        if let Some(flat) = classification.first_of(Category::Flat) {
            tally(&mut summary, create_link(&flat.file_path, &layout.flat_file())?);
            summary.flat_links += 1;
        }

        let projections = classification.indices(Category::Projection);
        if projections.is_empty() {
            return Err(LayoutError::NothingToLink("projection"));
        }
        let names = NumberedName::projection();
        for (n, frame_index) in decimate(&projections, self.decimation()).iter().enumerate() {
            let src = &classification.frames[*frame_index].file_path;
            let outcome = create_link(src, &names.in_dir(&layout.projections_dir, n))?;
            tally(&mut summary, outcome);
            summary.projection_links += 1;
        }

        if let Some(dir) = &layout.raw_dark_dir {
            summary.held_links +=
                hold_references(dir, classification, Category::Dark, &mut summary.unchanged)?;
        }
        if let Some(dir) = &layout.raw_flat_dir {
            summary.held_links +=
                hold_references(dir, classification, Category::Flat, &mut summary.unchanged)?;
        }

        tracing::info!(
            "Linked {} projections, {} dark, {} flat ({} unchanged)",
            summary.projection_links,
            summary.dark_links,
            summary.flat_links,
            summary.unchanged
        );
        Ok(summary)
    }

    /// Remove and recreate the quick-preview output directory.
    pub fn reset_quick_dir(&self, layout: &ProcessingLayout) -> LayoutResult<PathBuf> {
        let dir = layout.quick_reconstruction_dir();
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| LayoutError::io("remove quick dir", &dir, e))?;
        }
        ensure_dir(&dir)?;
        Ok(dir)
    }
}

/// Walk `generations` parents up from `path`.
fn ancestor(path: &Path, generations: usize) -> Option<&Path> {
    let mut current = path;
    for _ in 0..generations {
        current = current.parent()?;
    }
    (!current.as_os_str().is_empty()).then_some(current)
}

fn tally(summary: &mut LinkSummary, outcome: LinkOutcome) {
    if outcome == LinkOutcome::AlreadyPresent {
        summary.unchanged += 1;
    }
}

/// Link every frame of each sub-sequence into `<dir>/<k>/`, `k` counting
/// that category's sub-sequences from 1.
fn hold_references(
    dir: &Path,
    classification: &Classification,
    category: Category,
    unchanged: &mut usize,
) -> LayoutResult<usize> {
    let prefix = match category {
        Category::Dark => "d_",
        _ => "f_",
    };
    let names = NumberedName::new(prefix, 5, ".tif");
    let mut count = 0;
    for (k, sub) in classification.sub_sequences_of(category).enumerate() {
        let sub_dir = dir.join((k + 1).to_string());
        ensure_dir(&sub_dir)?;
        for index in &sub.frame_indices {
            let src = &classification.frames[*index].file_path;
            if create_link(src, &names.in_dir(&sub_dir, *index))? == LinkOutcome::AlreadyPresent {
                *unchanged += 1;
            }
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::FrameClassifier;
    use crate::config::ClassificationSettings;
    use crate::dataset::ScanData;
    use tempfile::tempdir;

    /// Writes `dark`, `flat`, `projections` frames under
    /// `<base>/data/2024/cm1/564/pco1/` and returns the scan arrays.
    fn write_scan(base: &Path, darks: usize, flats: usize, projections: usize) -> ScanData {
        let det_dir = base.join("data/2024/cm1/564/pco1");
        fs::create_dir_all(&det_dir).unwrap();
        let mut data = ScanData::default();
        let layout = [(2, darks), (1, flats), (0, projections), (1, flats)];
        let mut keys = Vec::new();
        for (key, count) in layout {
            for _ in 0..count {
                let i = data.shutter.len();
                let path = det_dir.join(format!("pco1564-{:05}.tif", i));
                fs::write(&path, b"frame").unwrap();
                data.shutter.push(1.0);
                data.stage.push(0.0);
                data.rotation.push(0.0);
                data.file_paths.push(path);
                keys.push(key);
            }
        }
        data.image_keys = Some(keys);
        data
    }

    fn classify(data: &ScanData) -> Classification {
        FrameClassifier::new(ClassificationSettings::default())
            .classify(data)
            .unwrap()
    }

    #[test]
    fn resolve_derives_root_and_scan() {
        let manager = LayoutManager::new(LayoutSettings::default(), None);
        let layout = manager
            .resolve(Path::new("/dls/i12/data/2024/cm1/564/pco1/p_00001.tif"))
            .unwrap();
        assert_eq!(layout.root, PathBuf::from("/dls/i12/data/2024/cm1/processing"));
        assert_eq!(layout.scan_name, "564");
        assert_eq!(
            layout.projections_dir,
            PathBuf::from("/dls/i12/data/2024/cm1/processing/rawdata/564/projections")
        );
        assert_eq!(
            layout.dark_file(),
            PathBuf::from("/dls/i12/data/2024/cm1/processing/sino/564/dark/dark.tif")
        );
        assert!(layout.raw_dark_dir.is_none());
    }

    #[test]
    fn override_gets_mandatory_dir_appended() {
        let reference = Path::new("/dls/i12/data/2024/cm1/564/pco1/p_00001.tif");

        let manager = LayoutManager::new(LayoutSettings::default(), Some("/scratch/me".into()));
        assert_eq!(
            manager.resolve(reference).unwrap().root,
            PathBuf::from("/scratch/me/processing")
        );

        let manager =
            LayoutManager::new(LayoutSettings::default(), Some("/scratch/processing".into()));
        assert_eq!(manager.resolve(reference).unwrap().root, PathBuf::from("/scratch/processing"));
    }

    #[test]
    fn shallow_reference_is_rejected() {
        let manager = LayoutManager::new(LayoutSettings::default(), None);
        assert!(matches!(
            manager.resolve(Path::new("p.tif")),
            Err(LayoutError::InvalidReference(_))
        ));
    }

    #[test]
    fn populates_one_dark_one_flat_and_all_projections() {
        let dir = tempdir().unwrap();
        let data = write_scan(dir.path(), 5, 5, 200);
        let classification = classify(&data);

        let manager = LayoutManager::new(LayoutSettings::default(), None);
        let reference = &classification.first_of(Category::Projection).unwrap().file_path;
        let layout = manager.resolve(reference).unwrap();
        manager.create_dirs(&layout).unwrap();
        let summary = manager.populate(&layout, &classification).unwrap();

        assert_eq!(summary.dark_links, 1);
        assert_eq!(summary.flat_links, 1);
        assert_eq!(summary.projection_links, 200);
        assert_eq!(fs::read_dir(&layout.projections_dir).unwrap().count(), 200);
        assert_eq!(fs::read_dir(&layout.sino_dark_dir).unwrap().count(), 1);
        assert_eq!(fs::read_dir(&layout.sino_flat_dir).unwrap().count(), 1);
        assert_eq!(
            fs::canonicalize(layout.dark_file()).unwrap(),
            fs::canonicalize(&data.file_paths[0]).unwrap()
        );
        assert_eq!(
            fs::canonicalize(layout.projections_dir.join("p_00000.tif")).unwrap(),
            fs::canonicalize(&data.file_paths[10]).unwrap()
        );

        // Re-running is a no-op.
        let again = manager.populate(&layout, &classification).unwrap();
        assert_eq!(again.unchanged, 202);
    }

    #[test]
    fn decimation_reduces_projection_links() {
        let dir = tempdir().unwrap();
        let data = write_scan(dir.path(), 2, 2, 150);
        let classification = classify(&data);

        let mut settings = LayoutSettings::default();
        settings.decimation = 4;
        let manager = LayoutManager::new(settings, Some(dir.path().join("out")));
        let layout = manager
            .resolve(&classification.first_of(Category::Projection).unwrap().file_path)
            .unwrap();
        manager.create_dirs(&layout).unwrap();
        let summary = manager.populate(&layout, &classification).unwrap();

        assert_eq!(summary.projection_links, 37);
        // Position 4 of the projection list is frame 4 + 3 = 7.
        assert_eq!(
            fs::canonicalize(layout.projections_dir.join("p_00000.tif")).unwrap(),
            fs::canonicalize(&data.file_paths[7]).unwrap()
        );
    }

    #[test]
    fn holding_dirs_number_sub_sequences() {
        let dir = tempdir().unwrap();
        let data = write_scan(dir.path(), 3, 2, 130);
        let classification = classify(&data);

        let mut settings = LayoutSettings::default();
        settings.hold_raw_references = true;
        let manager = LayoutManager::new(settings, Some(dir.path().join("out")));
        let layout = manager
            .resolve(&classification.first_of(Category::Projection).unwrap().file_path)
            .unwrap();
        manager.create_dirs(&layout).unwrap();
        let summary = manager.populate(&layout, &classification).unwrap();

        let flat_dir = layout.raw_flat_dir.clone().unwrap();
        assert_eq!(fs::read_dir(flat_dir.join("1")).unwrap().count(), 2);
        assert_eq!(fs::read_dir(flat_dir.join("2")).unwrap().count(), 2);
        assert_eq!(
            fs::read_dir(layout.raw_dark_dir.clone().unwrap().join("1"))
                .unwrap()
                .count(),
            3
        );
        assert_eq!(summary.held_links, 7);
    }

    #[test]
    fn conflicting_existing_link_aborts() {
        let dir = tempdir().unwrap();
        let data = write_scan(dir.path(), 1, 1, 130);
        let classification = classify(&data);

        let manager = LayoutManager::new(LayoutSettings::default(), Some(dir.path().join("out")));
        let layout = manager
            .resolve(&classification.first_of(Category::Projection).unwrap().file_path)
            .unwrap();
        manager.create_dirs(&layout).unwrap();

        let stray = dir.path().join("stray.tif");
        fs::write(&stray, b"x").unwrap();
        create_link(&stray, &layout.dark_file()).unwrap();

        let err = manager.populate(&layout, &classification).unwrap_err();
        assert!(matches!(err, LayoutError::LinkConflict { .. }));
    }

    #[test]
    fn reset_quick_dir_clears_old_output() {
        let dir = tempdir().unwrap();
        let manager = LayoutManager::new(LayoutSettings::default(), Some(dir.path().to_path_buf()));
        let layout = manager
            .resolve(Path::new("/dls/i12/data/2024/cm1/564/pco1/p_00001.tif"))
            .unwrap();

        let quick = layout.quick_reconstruction_dir();
        fs::create_dir_all(&quick).unwrap();
        fs::write(quick.join("old.tif"), b"").unwrap();

        let reset = manager.reset_quick_dir(&layout).unwrap();
        assert_eq!(reset, quick);
        assert_eq!(fs::read_dir(&quick).unwrap().count(), 0);
    }
}
