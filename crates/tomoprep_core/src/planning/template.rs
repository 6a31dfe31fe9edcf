//! Reconstruction settings templating.
//!
//! The template is a TOML document with `[InputData]`, `[OutputData]`,
//! `[FlatDarkFields]` and `[Backprojection]` tables. Everything the
//! templater does not rewrite is carried through untouched, comments
//! included.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use toml_edit::{DocumentMut, Item, TableLike, Value};

use crate::models::{ChunkDescriptor, FlatDarkMode};

/// Top-level key the launch script patches with the acquired device slot.
pub const RESOURCE_KEY: &str = "GPUDeviceNumber";

/// Template shipped with the crate.
pub const DEFAULT_TEMPLATE: &str = include_str!("../../resources/recon_template.toml");

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("I/O error in {operation} ({path}): {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed template: {0}")]
    Parse(#[from] toml_edit::TomlError),

    #[error("Template is missing the [{0}] table")]
    MissingSection(&'static str),

    #[error("No chunks to template")]
    NoChunks,
}

pub type TemplateResult<T> = Result<T, TemplateError>;

/// Paths and values shared by every chunk of one reconstruction run.
#[derive(Debug, Clone)]
pub struct ReconInputs {
    /// Folder holding `sino_NNNNN.tiff`.
    pub sinogram_dir: PathBuf,
    /// Folder receiving `image_NNNNN.tif`.
    pub output_dir: PathBuf,
    /// Folder for per-chunk configs and logs.
    pub files_dir: PathBuf,
    pub flat_file: PathBuf,
    pub dark_file: PathBuf,
    pub flat_mode: FlatDarkMode,
    pub dark_mode: FlatDarkMode,
    /// Used when `flat_mode` is constant.
    pub flat_value: f64,
    /// Used when `dark_mode` is constant.
    pub dark_value: f64,
    pub centre: f64,
    pub slice_step: usize,
}

/// Files written by [`SettingsTemplater::write_all`].
#[derive(Debug, Clone)]
pub struct TemplateOutput {
    /// One config per chunk, in chunk order.
    pub chunk_files: Vec<PathBuf>,
    pub settings_used: PathBuf,
    pub chunklist: PathBuf,
}

/// Renders per-chunk reconstruction configs.
#[derive(Debug, Clone)]
pub struct SettingsTemplater {
    template: DocumentMut,
}

impl SettingsTemplater {
    /// Load and check a template file.
    pub fn load(path: &Path) -> TemplateResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| TemplateError::Io {
            operation: "read template",
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// The shipped [`DEFAULT_TEMPLATE`].
    pub fn builtin() -> TemplateResult<Self> {
        Self::parse(DEFAULT_TEMPLATE)
    }

    pub fn parse(content: &str) -> TemplateResult<Self> {
        let template: DocumentMut = content.parse()?;
        for name in ["InputData", "OutputData", "FlatDarkFields", "Backprojection"] {
            if template.get(name).and_then(Item::as_table_like).is_none() {
                return Err(TemplateError::MissingSection(name));
            }
        }
        Ok(Self { template })
    }

    /// Config file name for a chunk, keyed by its scheduler task id.
    pub fn chunk_file_name(chunk: &ChunkDescriptor) -> String {
        format!("chunk_{:03}.toml", chunk.task_id)
    }

    /// Render the config covering `[first, last]`, logging to `log_file`.
    pub fn render(
        &self,
        inputs: &ReconInputs,
        first: usize,
        last: usize,
        log_file: &Path,
    ) -> TemplateResult<String> {
        let mut doc = self.template.clone();

        let input = section(&mut doc, "InputData")?;
        set(input, "Folder", path_str(&inputs.sinogram_dir));
        set(input, "Prefix", "sino_");
        set(input, "FileFirst", first as i64);
        set(input, "FileLast", last as i64);
        set(input, "FileStep", inputs.slice_step.max(1) as i64);

        let output = section(&mut doc, "OutputData")?;
        set(output, "Folder", path_str(&inputs.output_dir));
        set(output, "Prefix", "image_");

        let flat_dark = section(&mut doc, "FlatDarkFields")?;
        set_reference(
            flat_dark,
            "FlatField",
            inputs.flat_mode,
            &inputs.flat_file,
            inputs.flat_value,
        )?;
        set_reference(
            flat_dark,
            "DarkField",
            inputs.dark_mode,
            &inputs.dark_file,
            inputs.dark_value,
        )?;

        set(section(&mut doc, "Backprojection")?, "ImageCentre", inputs.centre);

        set(doc.as_table_mut(), "LogFile", path_str(log_file));
        set(doc.as_table_mut(), RESOURCE_KEY, -1_i64);

        Ok(doc.to_string())
    }

    /// Write `chunk_NNN.toml` per chunk, `settings_used.toml` covering the
    /// whole range, and `chunklist.txt` into `inputs.files_dir`.
    pub fn write_all(
        &self,
        inputs: &ReconInputs,
        chunks: &[ChunkDescriptor],
    ) -> TemplateResult<TemplateOutput> {
        let (first, last) = match (chunks.first(), chunks.last()) {
            (Some(first), Some(last)) => (first.start_slice, last.end_slice),
            _ => return Err(TemplateError::NoChunks),
        };
        let dir = &inputs.files_dir;
        fs::create_dir_all(dir).map_err(|source| TemplateError::Io {
            operation: "create settings folder",
            path: dir.clone(),
            source,
        })?;

        let mut chunk_files = Vec::with_capacity(chunks.len());
        let mut manifest = String::new();
        for chunk in chunks {
            let log_file = dir.join(format!("log_{:03}", chunk.task_id));
            let rendered = self.render(inputs, chunk.start_slice, chunk.end_slice, &log_file)?;
            let path = dir.join(Self::chunk_file_name(chunk));
            write_file(&path, &rendered)?;
            chunk_files.push(path);

            manifest.push_str(&chunk.manifest_line());
            manifest.push('\n');
        }

        let settings_used = dir.join("settings_used.toml");
        let used = self.render(inputs, first, last, &dir.join("log_all"))?;
        write_file(&settings_used, &used)?;

        let chunklist = dir.join("chunklist.txt");
        write_file(&chunklist, &manifest)?;

        tracing::debug!("Wrote {} chunk configs to {}", chunk_files.len(), dir.display());
        Ok(TemplateOutput {
            chunk_files,
            settings_used,
            chunklist,
        })
    }
}

fn section<'a>(
    doc: &'a mut DocumentMut,
    name: &'static str,
) -> TemplateResult<&'a mut dyn TableLike> {
    doc.get_mut(name)
        .and_then(Item::as_table_like_mut)
        .ok_or(TemplateError::MissingSection(name))
}

fn set_reference(
    flat_dark: &mut dyn TableLike,
    name: &'static str,
    mode: FlatDarkMode,
    file: &Path,
    constant: f64,
) -> TemplateResult<()> {
    let table = flat_dark
        .entry(name)
        .or_insert(toml_edit::table())
        .as_table_like_mut()
        .ok_or(TemplateError::MissingSection(name))?;
    set(table, "Type", mode.as_str());
    match mode {
        FlatDarkMode::Row => {
            set(table, "FileBefore", path_str(file));
            table.remove("ValueBefore");
        }
        FlatDarkMode::Constant => {
            set(table, "ValueBefore", constant);
            table.remove("FileBefore");
        }
    }
    Ok(())
}

/// Replace the value under `key`, keeping the key's comments and the
/// value's surrounding whitespace. Absent keys are appended.
fn set(table: &mut dyn TableLike, key: &str, new: impl Into<Value>) {
    let mut new = new.into();
    match table.get_mut(key).and_then(Item::as_value_mut) {
        Some(existing) => {
            *new.decor_mut() = existing.decor().clone();
            *existing = new;
        }
        None => {
            table.insert(key, Item::Value(new));
        }
    }
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn write_file(path: &Path, content: &str) -> TemplateResult<()> {
    fs::write(path, content).map_err(|source| TemplateError::Io {
        operation: "write settings",
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planning::ChunkPlanner;
    use tempfile::tempdir;

    fn inputs(dir: &Path) -> ReconInputs {
        ReconInputs {
            sinogram_dir: dir.join("sino"),
            output_dir: dir.join("images"),
            files_dir: dir.join("files"),
            flat_file: dir.join("flat/flat.tif"),
            dark_file: dir.join("dark/dark.tif"),
            flat_mode: FlatDarkMode::Row,
            dark_mode: FlatDarkMode::Constant,
            flat_value: 1.0,
            dark_value: 0.0,
            centre: 1998.5,
            slice_step: 1,
        }
    }

    #[test]
    fn render_rewrites_fields_and_keeps_the_rest() {
        let dir = tempdir().unwrap();
        let templater = SettingsTemplater::builtin().unwrap();
        let rendered = templater
            .render(&inputs(dir.path()), 100, 199, &dir.path().join("log_002"))
            .unwrap();

        let doc: DocumentMut = rendered.parse().unwrap();
        assert_eq!(doc["InputData"]["FileFirst"].as_integer(), Some(100));
        assert_eq!(doc["InputData"]["FileLast"].as_integer(), Some(199));
        assert_eq!(doc["InputData"]["Prefix"].as_str(), Some("sino_"));
        assert_eq!(doc["InputData"]["Type"].as_str(), Some("Tiff"));
        assert_eq!(doc["OutputData"]["Prefix"].as_str(), Some("image_"));
        assert_eq!(doc["OutputData"]["Bits"].as_integer(), Some(32));
        assert_eq!(doc["Backprojection"]["ImageCentre"].as_float(), Some(1998.5));
        assert_eq!(doc["Backprojection"]["Filter"].as_str(), Some("PR"));
        assert_eq!(doc["FlatDarkFields"]["FlatField"]["Type"].as_str(), Some("Row"));
        assert!(doc["FlatDarkFields"]["FlatField"]["FileBefore"]
            .as_str()
            .unwrap()
            .ends_with("flat.tif"));
        assert_eq!(doc["FlatDarkFields"]["DarkField"]["Type"].as_str(), Some("Constant"));
        assert_eq!(doc["FlatDarkFields"]["DarkField"]["ValueBefore"].as_float(), Some(0.0));
        assert!(doc["FlatDarkFields"]["FlatField"].get("ValueBefore").is_none());
        assert_eq!(doc[RESOURCE_KEY].as_integer(), Some(-1));
        assert!(rendered.starts_with("# reconstruction defaults"));
    }

    #[test]
    fn rewritten_keys_keep_their_comments() {
        let template = "\
# site header
# second line
GPUDeviceNumber = 0 # patched per task
LogFile = \"none\"

[InputData]
# where the sinograms live
Folder = \"unset\"
FileFirst = 0  # first row
[OutputData]
Folder = \"unset\"
[FlatDarkFields]
[FlatDarkFields.FlatField]
Type = \"User\"
ValueBefore = 1.0
[FlatDarkFields.DarkField]
Type = \"Row\"
FileBefore = \"/old/dark.tif\"
[Backprojection]
ImageCentre = 0.0
";
        let dir = tempdir().unwrap();
        let rendered = SettingsTemplater::parse(template)
            .unwrap()
            .render(&inputs(dir.path()), 5, 9, &dir.path().join("log_001"))
            .unwrap();

        assert!(rendered.starts_with("# site header\n# second line\n"));
        assert!(rendered.contains("GPUDeviceNumber = -1 # patched per task\n"));
        assert!(rendered.contains("# where the sinograms live\nFolder = "));
        assert!(rendered.contains("FileFirst = 5  # first row"));

        let doc: DocumentMut = rendered.parse().unwrap();
        let flat = &doc["FlatDarkFields"]["FlatField"];
        assert_eq!(flat["Type"].as_str(), Some("Row"));
        assert!(flat.get("ValueBefore").is_none());
        let dark = &doc["FlatDarkFields"]["DarkField"];
        assert_eq!(dark["Type"].as_str(), Some("Constant"));
        assert_eq!(dark["ValueBefore"].as_float(), Some(0.0));
        assert!(dark.get("FileBefore").is_none());
    }

    #[test]
    fn write_all_emits_configs_manifest_and_provenance() {
        let dir = tempdir().unwrap();
        let templater = SettingsTemplater::builtin().unwrap();
        let chunks = ChunkPlanner::plan(0, 99, 4).unwrap();
        let output = templater.write_all(&inputs(dir.path()), &chunks).unwrap();

        assert_eq!(output.chunk_files.len(), 4);
        assert!(output.chunk_files[0].ends_with("chunk_001.toml"));
        assert!(output.chunk_files[3].ends_with("chunk_004.toml"));

        let manifest = fs::read_to_string(&output.chunklist).unwrap();
        let lines: Vec<&str> = manifest.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[3], "chunk 3 sge-task 4 start 75 end 99 num 25");

        let used: DocumentMut = fs::read_to_string(&output.settings_used)
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(used["InputData"]["FileFirst"].as_integer(), Some(0));
        assert_eq!(used["InputData"]["FileLast"].as_integer(), Some(99));

        let third: DocumentMut = fs::read_to_string(&output.chunk_files[2])
            .unwrap()
            .parse()
            .unwrap();
        assert!(third["LogFile"].as_str().unwrap().ends_with("log_003"));
    }

    #[test]
    fn missing_table_is_config_error() {
        let err = SettingsTemplater::parse("[InputData]\n[OutputData]\n[FlatDarkFields]\n")
            .unwrap_err();
        assert!(matches!(err, TemplateError::MissingSection("Backprojection")));
    }

    #[test]
    fn malformed_template_is_parse_error() {
        assert!(matches!(
            SettingsTemplater::parse("[InputData\nFolder ="),
            Err(TemplateError::Parse(_))
        ));
    }
}
