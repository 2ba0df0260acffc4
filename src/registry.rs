use crate::errors::ConfigError;
use csv::ReaderBuilder;
use log::{info, warn};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// One participant from the roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectRecord {
    pub id: String,
    /// Every other roster column, verbatim.
    pub metadata: BTreeMap<String, String>,
}

impl SubjectRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.metadata.get(field).map(String::as_str)
    }
}

/// Loads the roster CSV, one subject per row.
pub fn load_roster(path: &Path, id_column: &str) -> Result<Vec<SubjectRecord>, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::RosterNotFound {
            path: path.to_path_buf(),
        });
    }

    let read_err = |e: csv::Error| ConfigError::RosterRead {
        path: path.to_path_buf(),
        source: e,
    };
    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path).map_err(read_err)?;
    let headers = reader.headers().map_err(read_err)?.clone();
    let id_idx = headers
        .iter()
        .position(|h| h == id_column)
        .ok_or_else(|| ConfigError::MissingIdColumn {
            path: path.to_path_buf(),
            column: id_column.to_string(),
        })?;

    let mut subjects = Vec::new();
    let mut seen = HashSet::new();
    for result in reader.records() {
        let record = result.map_err(read_err)?;
        let id = record.get(id_idx).unwrap_or_default().to_string();
        if !seen.insert(id.clone()) {
            warn!("Duplicate subject '{}' in roster {}; keeping the first row", id, path.display());
            continue;
        }
        let metadata = headers
            .iter()
            .zip(record.iter())
            .enumerate()
            .filter(|(i, _)| *i != id_idx)
            .map(|(_, (k, v))| (k.to_string(), v.to_string()))
            .collect();
        subjects.push(SubjectRecord { id, metadata });
    }

    info!("Loaded {} subjects from {}", subjects.len(), path.display());
    Ok(subjects)
}

/// Applies sudden-death filtering.
///
/// `None` keeps everyone. An empty subset means "the default subject".
/// Requested identifiers that are not in the roster are dropped silently.
pub fn filter_subjects(
    subjects: Vec<SubjectRecord>,
    subset: Option<&[String]>,
    default_subject: &str,
) -> Vec<SubjectRecord> {
    let Some(subset) = subset else {
        return subjects;
    };

    let wanted: HashSet<&str> = if subset.is_empty() {
        HashSet::from([default_subject])
    } else {
        subset.iter().map(String::as_str).collect()
    };

    subjects
        .into_iter()
        .filter(|s| wanted.contains(s.id.as_str()))
        .collect()
}
