//! Output column ordering for feature tables.

use crate::errors::SchemaError;

/// Sorts column names lexicographically and moves `ground_truth` to the end.
///
/// Duplicate names collapse to one. Fails when `ground_truth` is absent,
/// which means the shell was never built or the extractor dropped it.
pub fn normalize_columns<S: AsRef<str>>(
    columns: &[S],
    ground_truth: &str,
) -> Result<Vec<String>, SchemaError> {
    let mut sorted: Vec<String> = columns.iter().map(|c| c.as_ref().to_string()).collect();
    sorted.sort();
    sorted.dedup();

    let gt_pos = sorted
        .iter()
        .position(|c| c == ground_truth)
        .ok_or_else(|| SchemaError::MissingGroundTruth {
            column: ground_truth.to_string(),
        })?;
    let gt = sorted.remove(gt_pos);
    sorted.push(gt);
    Ok(sorted)
}
