//! Settings struct with TOML-based sections.
//!
//! Settings are organized into logical sections that map to TOML tables.
//! Each section can be updated independently for atomic section-level updates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::logging::LogLevel;
use crate::models::MissingReferencePolicy;

/// Root settings structure containing all configuration sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Processing root, template and log locations.
    #[serde(default)]
    pub paths: PathSettings,

    /// Where per-frame arrays live inside the scan dataset.
    #[serde(default)]
    pub dataset: DatasetSettings,

    /// Frame classification references and limits.
    #[serde(default)]
    pub classification: ClassificationSettings,

    /// Processing directory layout.
    #[serde(default)]
    pub layout: LayoutSettings,

    /// Batch scheduler submission.
    #[serde(default)]
    pub scheduler: SchedulerSettings,

    /// Sinogram stage.
    #[serde(default)]
    pub sinogram: SinogramSettings,

    /// Reconstruction stage.
    #[serde(default)]
    pub reconstruction: ReconstructionSettings,

    /// Quick preview stage.
    #[serde(default)]
    pub preview: PreviewSettings,

    /// Scheduler status polling.
    #[serde(default)]
    pub monitor: MonitorSettings,

    /// Rotation-centre estimation.
    #[serde(default)]
    pub cor: CorSettings,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Path configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    /// Processing root override. Empty means derive from the first projection.
    #[serde(default)]
    pub output_dir: String,

    /// Reconstruction settings template (TOML). Empty uses the built-in one.
    #[serde(default)]
    pub template_path: String,

    /// Folder for run log files.
    #[serde(default = "default_logs_dir")]
    pub logs_dir: String,
}

fn default_logs_dir() -> String {
    ".logs".to_string()
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            output_dir: String::new(),
            template_path: String::new(),
            logs_dir: default_logs_dir(),
        }
    }
}

/// Locations of the per-frame arrays inside a scan document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSettings {
    #[serde(default = "default_shutter_path")]
    pub shutter_path: String,

    #[serde(default = "default_stage_path")]
    pub stage_path: String,

    #[serde(default = "default_rotation_path")]
    pub rotation_path: String,

    #[serde(default = "default_file_path_path")]
    pub file_path_path: String,

    /// Optional explicit image-key array. Preferred over thresholding.
    #[serde(default = "default_image_key_path")]
    pub image_key_path: Option<String>,
}

fn default_shutter_path() -> String {
    "/entry1/instrument/tomoScanDevice/tomography_shutter".to_string()
}

fn default_stage_path() -> String {
    "/entry1/instrument/tomoScanDevice/ss1_x".to_string()
}

fn default_rotation_path() -> String {
    "/entry1/instrument/tomoScanDevice/ss1_rot".to_string()
}

fn default_file_path_path() -> String {
    "/entry1/instrument/pco1_hw_tif/image_data".to_string()
}

fn default_image_key_path() -> Option<String> {
    Some("/entry1/instrument/tomoScanDevice/image_key".to_string())
}

impl Default for DatasetSettings {
    fn default() -> Self {
        Self {
            shutter_path: default_shutter_path(),
            stage_path: default_stage_path(),
            rotation_path: default_rotation_path(),
            file_path_path: default_file_path_path(),
            image_key_path: default_image_key_path(),
        }
    }
}

/// Physical reference values and acceptance limits for classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationSettings {
    #[serde(default = "default_shutter_open")]
    pub shutter_open: f64,

    #[serde(default)]
    pub shutter_closed: f64,

    /// Stage position with the sample in the beam.
    #[serde(default)]
    pub stage_in_beam: Option<f64>,

    /// Stage position with the sample out of the beam.
    #[serde(default)]
    pub stage_out_of_beam: Option<f64>,

    /// Fraction of the reference separation accepted as a match.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    #[serde(default = "default_min_projections")]
    pub min_projections: u32,

    #[serde(default)]
    pub max_unclassified: u32,

    #[serde(default)]
    pub missing_reference_policy: MissingReferencePolicy,
}

fn default_shutter_open() -> f64 {
    1.0
}

fn default_tolerance() -> f64 {
    0.1
}

fn default_min_projections() -> u32 {
    129
}

impl Default for ClassificationSettings {
    fn default() -> Self {
        Self {
            shutter_open: default_shutter_open(),
            shutter_closed: 0.0,
            stage_in_beam: None,
            stage_out_of_beam: None,
            tolerance: default_tolerance(),
            min_projections: default_min_projections(),
            max_unclassified: 0,
            missing_reference_policy: MissingReferencePolicy::default(),
        }
    }
}

/// Processing directory layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutSettings {
    /// Keep every k-th projection (values below 1 behave as 1).
    #[serde(default = "default_decimation")]
    pub decimation: u32,

    /// Directory name the processing root must end with.
    #[serde(default = "default_mandatory_dir")]
    pub mandatory_dir: String,

    /// Also link every dark/flat frame into per-sub-sequence holding dirs.
    #[serde(default)]
    pub hold_raw_references: bool,
}

fn default_decimation() -> u32 {
    1
}

fn default_mandatory_dir() -> String {
    "processing".to_string()
}

impl Default for LayoutSettings {
    fn default() -> Self {
        Self {
            decimation: default_decimation(),
            mandatory_dir: default_mandatory_dir(),
            hold_raw_references: false,
        }
    }
}

/// Batch scheduler submission settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Project/account passed with `-P`; also selects the resource profile.
    #[serde(default = "default_project")]
    pub project: String,

    #[serde(default = "default_submit_program")]
    pub submit_program: String,

    #[serde(default = "default_status_program")]
    pub status_program: String,

    /// Queue for the short finishing job held on each chunk job.
    #[serde(default = "default_finish_queue")]
    pub finish_queue: String,

    /// Prepended to `PATH` for scheduler commands when non-empty.
    #[serde(default)]
    pub path_prefix: String,

    /// Projects that request accelerators by count (`-l gpus=N`).
    #[serde(default = "default_accelerator_projects")]
    pub accelerator_projects: Vec<String>,

    #[serde(default = "default_slots")]
    pub slots: u32,

    #[serde(default = "default_accelerators")]
    pub accelerators: u32,

    /// Resource requested by name for non-accelerator projects.
    #[serde(default = "default_named_resource")]
    pub named_resource: String,

    #[serde(default = "default_named_slots")]
    pub named_slots: u32,

    /// Host-local lock directory. Empty means `/tmp/tomo-<project>-$USER/lock`.
    #[serde(default)]
    pub lock_dir: String,

    /// Number of exclusive accelerator lock slots per host.
    #[serde(default = "default_lock_slots")]
    pub lock_slots: u32,

    /// Lock rounds attempted before a task gives up.
    #[serde(default = "default_lock_attempts")]
    pub lock_attempts: u32,

    /// `flock -w` timeout per slot.
    #[serde(default = "default_lock_wait_secs")]
    pub lock_wait_secs: u32,

    /// Sleep between lock rounds.
    #[serde(default = "default_lock_backoff_secs")]
    pub lock_backoff_secs: u32,

    /// Mail recipient for the finishing job's error report.
    #[serde(default)]
    pub notify_address: Option<String>,

    /// Extra environment for scheduler commands. Kept last so it
    /// serializes as a trailing sub-table.
    #[serde(default = "default_environment")]
    pub environment: BTreeMap<String, String>,
}

fn default_project() -> String {
    "i12".to_string()
}

fn default_submit_program() -> String {
    "qsub".to_string()
}

fn default_status_program() -> String {
    "qstat".to_string()
}

fn default_finish_queue() -> String {
    "high.q".to_string()
}

fn default_environment() -> BTreeMap<String, String> {
    [
        ("SGE_CELL", "DLS"),
        ("SGE_EXECD_PORT", "60001"),
        ("SGE_QMASTER_PORT", "60000"),
        ("SGE_ROOT", "/dls_sw/apps/sge/SGE6.2"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_accelerator_projects() -> Vec<String> {
    vec!["i12".to_string()]
}

fn default_slots() -> u32 {
    4
}

fn default_accelerators() -> u32 {
    1
}

fn default_named_resource() -> String {
    "tesla64".to_string()
}

fn default_named_slots() -> u32 {
    6
}

fn default_lock_slots() -> u32 {
    2
}

fn default_lock_attempts() -> u32 {
    10
}

fn default_lock_wait_secs() -> u32 {
    5
}

fn default_lock_backoff_secs() -> u32 {
    5
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            project: default_project(),
            submit_program: default_submit_program(),
            status_program: default_status_program(),
            finish_queue: default_finish_queue(),
            path_prefix: String::new(),
            accelerator_projects: default_accelerator_projects(),
            slots: default_slots(),
            accelerators: default_accelerators(),
            named_resource: default_named_resource(),
            named_slots: default_named_slots(),
            lock_dir: String::new(),
            lock_slots: default_lock_slots(),
            lock_attempts: default_lock_attempts(),
            lock_wait_secs: default_lock_wait_secs(),
            lock_backoff_secs: default_lock_backoff_secs(),
            notify_address: None,
            environment: default_environment(),
        }
    }
}

/// Sinogram stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinogramSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_sino_program")]
    pub program: String,

    #[serde(default = "default_sino_queue")]
    pub queue: String,

    #[serde(default = "default_chunks")]
    pub chunks: u32,

    /// Image width override; detected from the first projection otherwise.
    #[serde(default)]
    pub width: Option<u32>,

    /// Image height override; detected from the first projection otherwise.
    #[serde(default)]
    pub height: Option<u32>,

    /// How long to wait for the sinogram folder after the job finishes.
    #[serde(default = "default_wait_for_output_secs")]
    pub wait_for_output_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_sino_program() -> String {
    "sino_chunk_tiff".to_string()
}

fn default_sino_queue() -> String {
    "low.q".to_string()
}

fn default_chunks() -> u32 {
    16
}

fn default_wait_for_output_secs() -> u64 {
    60
}

impl Default for SinogramSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            program: default_sino_program(),
            queue: default_sino_queue(),
            chunks: default_chunks(),
            width: None,
            height: None,
            wait_for_output_secs: default_wait_for_output_secs(),
        }
    }
}

/// Reconstruction stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconstructionSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_recon_program")]
    pub program: String,

    #[serde(default = "default_recon_queue")]
    pub queue: String,

    #[serde(default = "default_chunks")]
    pub chunks: u32,

    #[serde(default)]
    pub first_slice: u32,

    /// Last slice, inclusive. Defaults to the image height minus one.
    #[serde(default)]
    pub last_slice: Option<u32>,

    #[serde(default = "default_slice_step")]
    pub slice_step: u32,

    /// User-supplied rotation centre. Takes precedence over estimation.
    #[serde(default)]
    pub centre: Option<f64>,

    /// Estimate the centre from the 0/180 degree pair when none is given.
    #[serde(default = "default_true")]
    pub estimate_centre: bool,

    /// Run identifier used in folder names. Defaults to a timestamp.
    #[serde(default)]
    pub run_id: Option<String>,

    /// Constant flat value used when no flat frames exist.
    #[serde(default = "default_flat_value")]
    pub flat_value: f64,

    /// Constant dark value used when no dark frames exist.
    #[serde(default)]
    pub dark_value: f64,
}

fn default_recon_program() -> String {
    "dt64n".to_string()
}

fn default_recon_queue() -> String {
    "medium.q".to_string()
}

fn default_slice_step() -> u32 {
    1
}

fn default_flat_value() -> f64 {
    1.0
}

impl Default for ReconstructionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            program: default_recon_program(),
            queue: default_recon_queue(),
            chunks: default_chunks(),
            first_slice: 0,
            last_slice: None,
            slice_step: default_slice_step(),
            centre: None,
            estimate_centre: true,
            run_id: None,
            flat_value: default_flat_value(),
            dark_value: 0.0,
        }
    }
}

/// Quick preview stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewSettings {
    #[serde(default)]
    pub enabled: bool,

    /// Keep every n-th sinogram row.
    #[serde(default = "default_preview_step")]
    pub step: u32,

    /// Centre used when no rotation centre is known.
    #[serde(default = "default_preview_centre")]
    pub centre: f64,
}

fn default_preview_step() -> u32 {
    100
}

fn default_preview_centre() -> f64 {
    1320.0
}

impl Default for PreviewSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            step: default_preview_step(),
            centre: default_preview_centre(),
        }
    }
}

/// Scheduler status polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_total_wait_ms")]
    pub total_wait_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_total_wait_ms() -> u64 {
    45 * 60 * 1_000
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            total_wait_ms: default_total_wait_ms(),
        }
    }
}

/// Rotation-centre estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorSettings {
    /// Subtract the nearest flat field before thresholding.
    #[serde(default)]
    pub flat_field_correction: bool,

    /// Rows zeroed at the top of each mask (timestamp burn-in).
    #[serde(default = "default_band_rows")]
    pub band_rows: u32,

    /// Allowed deviation of the pair from 0 and 180 degrees.
    #[serde(default = "default_angle_tolerance")]
    pub angle_tolerance: f64,
}

fn default_band_rows() -> u32 {
    256
}

fn default_angle_tolerance() -> f64 {
    0.001
}

impl Default for CorSettings {
    fn default() -> Self {
        Self {
            flat_field_correction: false,
            band_rows: default_band_rows(),
            angle_tolerance: default_angle_tolerance(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default)]
    pub level: LogLevel,

    /// Keep external command output in the tail buffer only.
    #[serde(default = "default_true")]
    pub compact: bool,

    /// Number of error lines to show in tail.
    #[serde(default = "default_error_tail")]
    pub error_tail: u32,

    /// Progress update step percentage.
    #[serde(default = "default_progress_step")]
    pub progress_step: u32,

    #[serde(default = "default_true")]
    pub show_timestamps: bool,
}

fn default_error_tail() -> u32 {
    20
}

fn default_progress_step() -> u32 {
    20
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            compact: true,
            error_tail: default_error_tail(),
            progress_step: default_progress_step(),
            show_timestamps: true,
        }
    }
}

/// Names of config sections for targeted updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigSection {
    Paths,
    Dataset,
    Classification,
    Layout,
    Scheduler,
    Sinogram,
    Reconstruction,
    Preview,
    Monitor,
    Cor,
    Logging,
}

impl ConfigSection {
    /// Every section, in file order.
    pub const ALL: [ConfigSection; 11] = [
        ConfigSection::Paths,
        ConfigSection::Dataset,
        ConfigSection::Classification,
        ConfigSection::Layout,
        ConfigSection::Scheduler,
        ConfigSection::Sinogram,
        ConfigSection::Reconstruction,
        ConfigSection::Preview,
        ConfigSection::Monitor,
        ConfigSection::Cor,
        ConfigSection::Logging,
    ];

    /// Get the TOML table name for this section.
    pub fn table_name(&self) -> &'static str {
        match self {
            ConfigSection::Paths => "paths",
            ConfigSection::Dataset => "dataset",
            ConfigSection::Classification => "classification",
            ConfigSection::Layout => "layout",
            ConfigSection::Scheduler => "scheduler",
            ConfigSection::Sinogram => "sinogram",
            ConfigSection::Reconstruction => "reconstruction",
            ConfigSection::Preview => "preview",
            ConfigSection::Monitor => "monitor",
            ConfigSection::Cor => "cor",
            ConfigSection::Logging => "logging",
        }
    }

    /// Comment line written above the section in generated files.
    pub fn comment(&self) -> &'static str {
        match self {
            ConfigSection::Paths => "# Processing root, template and log locations",
            ConfigSection::Dataset => "# Array paths inside the scan document",
            ConfigSection::Classification => "# Dark/flat/projection classification",
            ConfigSection::Layout => "# Processing directory layout",
            ConfigSection::Scheduler => "# Batch scheduler submission",
            ConfigSection::Sinogram => "# Sinogram stage",
            ConfigSection::Reconstruction => "# Reconstruction stage",
            ConfigSection::Preview => "# Quick preview stage",
            ConfigSection::Monitor => "# Scheduler status polling",
            ConfigSection::Cor => "# Rotation-centre estimation",
            ConfigSection::Logging => "# Logging configuration",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_serialize() {
        let settings = Settings::default();
        let toml_str = toml::to_string_pretty(&settings).unwrap();
        assert!(toml_str.contains("[classification]"));
        assert!(toml_str.contains("[scheduler]"));
        assert!(toml_str.contains("min_projections = 129"));
    }

    #[test]
    fn partial_config_uses_defaults() {
        let toml_str = r#"
[classification]
min_projections = 50
stage_in_beam = 10.0
stage_out_of_beam = 0.0
"#;
        let settings: Settings = toml::from_str(toml_str).unwrap();
        assert_eq!(settings.classification.min_projections, 50);
        assert_eq!(settings.classification.stage_in_beam, Some(10.0));
        assert_eq!(settings.classification.tolerance, 0.1);
        assert_eq!(settings.sinogram.queue, "low.q");
        assert_eq!(settings.reconstruction.queue, "medium.q");
        assert_eq!(settings.monitor.poll_interval_ms, 5_000);
    }

    #[test]
    fn default_environment_targets_cluster() {
        let settings = SchedulerSettings::default();
        assert_eq!(settings.environment.get("SGE_CELL").map(String::as_str), Some("DLS"));
        assert_eq!(settings.environment.len(), 4);
    }

    #[test]
    fn section_names_are_unique() {
        let mut names: Vec<_> = ConfigSection::ALL.iter().map(|s| s.table_name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), ConfigSection::ALL.len());
    }
}
