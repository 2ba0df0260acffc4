//! Pluggable feature computation.
//!
//! An extractor receives a subject's metadata, the full input table and the
//! feature shell (one row per labelled ground-truth event). It adds feature
//! columns to the shell, aligned to its rows. Built-in extractors name their
//! columns with the layout's feature prefix (`ft_` by default); custom ones
//! are expected to do the same but that is not enforced.

use crate::config::DatasetLayout;
use crate::data_models::{forward_fill, FeatureFrame, Table};
use crate::errors::{ConfigError, ExtractError};
use crate::registry::SubjectRecord;
use std::sync::Arc;

pub trait FeatureExtractor: Send + Sync {
    fn name(&self) -> &str;

    fn extract(
        &self,
        subject: &SubjectRecord,
        input: &Table,
        features: &mut FeatureFrame,
    ) -> Result<(), ExtractError>;
}

/// Last accelerometer reading before each ESM event.
#[derive(Debug, Clone)]
pub struct LastAccelerationExtractor {
    pub source_column: String,
    pub feature_column: String,
}

impl LastAccelerationExtractor {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            source_column: "Acc_Avg".to_string(),
            feature_column: format!("{}last_acc", prefix),
        }
    }
}

impl Default for LastAccelerationExtractor {
    fn default() -> Self {
        Self::with_prefix("ft_")
    }
}

impl FeatureExtractor for LastAccelerationExtractor {
    fn name(&self) -> &str {
        "last-acc"
    }

    fn extract(
        &self,
        _subject: &SubjectRecord,
        input: &Table,
        features: &mut FeatureFrame,
    ) -> Result<(), ExtractError> {
        let readings = input
            .column(&self.source_column)
            .ok_or_else(|| ExtractError::MissingColumn {
                column: self.source_column.clone(),
            })?;
        let filled = forward_fill(&readings);
        features.insert_aligned(&self.feature_column, &filled, input.height())
    }
}

pub fn available_extractors() -> Vec<&'static str> {
    vec!["last-acc"]
}

/// Builds the named extractor, naming its columns after `layout.feature_prefix`.
pub fn extractor_by_name(
    name: &str,
    layout: &DatasetLayout,
) -> Result<Arc<dyn FeatureExtractor>, ConfigError> {
    match name {
        "last-acc" => Ok(Arc::new(LastAccelerationExtractor::with_prefix(
            &layout.feature_prefix,
        ))),
        _ => Err(ConfigError::UnknownExtractor {
            name: name.to_string(),
            available: available_extractors(),
        }),
    }
}
