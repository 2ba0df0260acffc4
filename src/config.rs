use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Where the dataset lives and which columns carry meaning.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DatasetLayout {
    /// Folder that holds both the input dataset and the feature output.
    pub root: PathBuf,
    pub input_dir: String,
    /// Sub-folder of `input_dir` with one `<id>.csv` per subject.
    pub data_dir: String,
    pub output_dir: String,
    pub roster_file: String,
    pub id_column: String,
    pub discriminator_column: String,
    /// Discriminator value that marks a ground-truth event row.
    pub ground_truth_event: String,
    pub ground_truth_column: String,
    /// Used by sudden-death mode when no identifiers are given.
    pub default_subject: String,
    pub feature_prefix: String,
    pub null_markers: Vec<String>,
}

impl Default for DatasetLayout {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            input_dir: "mobile_phone_use".to_string(),
            data_dir: "data".to_string(),
            output_dir: "features".to_string(),
            roster_file: "pinfo.csv".to_string(),
            id_column: "uuid".to_string(),
            discriminator_column: "sensor_id".to_string(),
            ground_truth_event: "Esm".to_string(),
            ground_truth_column: "Esm_TiredAwake".to_string(),
            default_subject: "u000".to_string(),
            feature_prefix: "ft_".to_string(),
            null_markers: default_null_markers(),
        }
    }
}

fn default_null_markers() -> Vec<String> {
    ["", "NA", "N/A", "NaN", "nan", "null", "NULL", "None"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl DatasetLayout {
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn roster_path(&self) -> PathBuf {
        self.root.join(&self.input_dir).join(&self.roster_file)
    }

    pub fn input_root(&self) -> PathBuf {
        self.root.join(&self.input_dir).join(&self.data_dir)
    }

    pub fn output_root(&self) -> PathBuf {
        self.root.join(&self.output_dir)
    }
}

/// Loads a layout from a JSON file. Fields absent from the file keep their defaults.
pub fn load_config(path: &Path) -> Result<DatasetLayout, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }

    let file = File::open(path).map_err(|e| ConfigError::IoError {
        path: path.to_path_buf(),
        source: e,
    })?;
    let reader = BufReader::new(file);

    serde_json::from_reader(reader).map_err(|e| ConfigError::JsonParseError {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Settings for one batch run, fixed once the run starts.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub workers: usize,
    pub input_root: PathBuf,
    pub output_root: PathBuf,
    /// `None` processes every subject; `Some` is sudden-death mode.
    pub subset: Option<Vec<String>>,
    pub clean_output: bool,
    /// Upper bound the scheduler applies to `workers`.
    pub max_parallelism: usize,
}

impl RunConfig {
    pub fn new(
        layout: &DatasetLayout,
        requested_workers: i64,
        subset: Option<Vec<String>>,
    ) -> Self {
        let max_parallelism = available_parallelism();
        Self {
            workers: resolve_workers(requested_workers, max_parallelism),
            input_root: layout.input_root(),
            output_root: layout.output_root(),
            subset,
            clean_output: true,
            max_parallelism,
        }
    }
}

pub fn available_parallelism() -> usize {
    num_cpus::get().max(1)
}

/// Non-positive requests pick about 80% of the available cores; explicit
/// requests are capped at what the machine offers.
pub fn resolve_workers(requested: i64, available: usize) -> usize {
    let available = available.max(1);
    if requested <= 0 {
        ((available as f64 * 0.8 + 0.5) as usize).clamp(1, available)
    } else {
        (requested as usize).min(available)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_auto_workers_leave_headroom() {
        assert_eq!(resolve_workers(0, 10), 8);
        assert_eq!(resolve_workers(-3, 4), 3);
        assert_eq!(resolve_workers(0, 1), 1);
        for cores in 1..64 {
            let n = resolve_workers(0, cores);
            assert!(n >= 1 && n <= cores, "{} workers for {} cores", n, cores);
        }
    }

    #[test]
    fn test_explicit_workers_capped() {
        assert_eq!(resolve_workers(2, 8), 2);
        assert_eq!(resolve_workers(32, 8), 8);
        assert_eq!(resolve_workers(1, 8), 1);
    }

    #[test]
    fn test_layout_paths() {
        let layout = DatasetLayout::default().with_root("/data/mpu");
        assert_eq!(layout.roster_path(), PathBuf::from("/data/mpu/mobile_phone_use/pinfo.csv"));
        assert_eq!(layout.input_root(), PathBuf::from("/data/mpu/mobile_phone_use/data"));
        assert_eq!(layout.output_root(), PathBuf::from("/data/mpu/features"));
    }

    #[test]
    fn test_load_config_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"ground_truth_column": "Esm_Mood", "output_dir": "out"}}"#).unwrap();

        let layout = load_config(file.path()).unwrap();
        assert_eq!(layout.ground_truth_column, "Esm_Mood");
        assert_eq!(layout.output_dir, "out");
        assert_eq!(layout.roster_file, "pinfo.csv");
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn test_load_config_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = load_config(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::JsonParseError { .. }));
    }
}
