use crate::errors::{ExtractError, LoadError, SchemaError};
use std::fmt;

/// One CSV cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
    Missing,
}

impl Value {
    /// Null markers win over numeric parsing, so "NaN" reads as missing.
    pub fn parse(raw: &str, null_markers: &[String]) -> Self {
        if null_markers.iter().any(|m| m == raw) {
            return Value::Missing;
        }
        match raw.trim().parse::<f64>() {
            Ok(num) if !num.is_nan() => Value::Number(num),
            Ok(_) => Value::Missing,
            Err(_) => Value::Text(raw.to_string()),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }

    /// Compares against a literal the way it would appear in the file.
    pub fn matches(&self, literal: &str) -> bool {
        match self {
            Value::Text(s) => s == literal,
            Value::Number(n) => literal.trim().parse::<f64>().map_or(false, |v| v == *n),
            Value::Missing => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // whole numbers keep a trailing ".0"
            Value::Number(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e16 => {
                write!(f, "{:.1}", n)
            }
            Value::Number(n) => write!(f, "{}", n),
            Value::Text(s) => f.write_str(s),
            Value::Missing => Ok(()),
        }
    }
}

/// Carries the last seen non-missing value forward over gaps.
pub fn forward_fill(values: &[Value]) -> Vec<Value> {
    let mut last = Value::Missing;
    values
        .iter()
        .map(|v| {
            if !v.is_missing() {
                last = v.clone();
            }
            last.clone()
        })
        .collect()
}

/// A subject's raw event log, row-major in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Value>) {
        debug_assert_eq!(row.len(), self.columns.len());
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column(&self, name: &str) -> Option<Vec<Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|row| row[idx].clone()).collect())
    }
}

/// Feature table under construction: one row per kept ground-truth event.
///
/// Each row remembers which input row it came from, so full-length input
/// columns can be sampled onto it by index.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame {
    source_rows: Vec<usize>,
    columns: Vec<(String, Vec<Value>)>,
}

impl FeatureFrame {
    /// Keeps rows whose discriminator equals `event`, projected onto
    /// `ground_truth`, and drops those with a missing label.
    pub fn from_ground_truth(
        input: &Table,
        discriminator: &str,
        event: &str,
        ground_truth: &str,
    ) -> Result<Self, LoadError> {
        let disc_idx = input
            .column_index(discriminator)
            .ok_or_else(|| LoadError::MissingColumn {
                column: discriminator.to_string(),
            })?;
        let gt_idx = input
            .column_index(ground_truth)
            .ok_or_else(|| LoadError::MissingColumn {
                column: ground_truth.to_string(),
            })?;

        let mut source_rows = Vec::new();
        let mut labels = Vec::new();
        for (i, row) in input.rows().iter().enumerate() {
            if row[disc_idx].matches(event) && !row[gt_idx].is_missing() {
                source_rows.push(i);
                labels.push(row[gt_idx].clone());
            }
        }

        Ok(Self {
            source_rows,
            columns: vec![(ground_truth.to_string(), labels)],
        })
    }

    pub fn height(&self) -> usize {
        self.source_rows.len()
    }

    /// Input row index behind each feature row.
    pub fn source_rows(&self) -> &[usize] {
        &self.source_rows
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&[Value]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
    }

    /// Adds or replaces a column whose values are already one per feature row.
    pub fn insert_column(&mut self, name: &str, values: Vec<Value>) -> Result<(), ExtractError> {
        if values.len() != self.height() {
            return Err(ExtractError::LengthMismatch {
                column: name.to_string(),
                expected: self.height(),
                actual: values.len(),
            });
        }
        match self.columns.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = values,
            None => self.columns.push((name.to_string(), values)),
        }
        Ok(())
    }

    /// Samples a full-length input column at each feature row's source index.
    pub fn insert_aligned(
        &mut self,
        name: &str,
        input_column: &[Value],
        input_height: usize,
    ) -> Result<(), ExtractError> {
        if input_column.len() != input_height {
            return Err(ExtractError::LengthMismatch {
                column: name.to_string(),
                expected: input_height,
                actual: input_column.len(),
            });
        }
        let sampled = self
            .source_rows
            .iter()
            .map(|&i| input_column[i].clone())
            .collect();
        self.insert_column(name, sampled)
    }

    pub fn remove_column(&mut self, name: &str) -> Option<Vec<Value>> {
        let idx = self.columns.iter().position(|(n, _)| n == name)?;
        Some(self.columns.remove(idx).1)
    }

    /// Materialises the frame with columns in the given order.
    pub fn select(&self, order: &[String]) -> Result<Table, SchemaError> {
        let mut picked = Vec::with_capacity(order.len());
        for name in order {
            let values = self.column(name).ok_or_else(|| SchemaError::UnknownColumn {
                column: name.clone(),
            })?;
            picked.push(values);
        }

        let mut table = Table::new(order.to_vec());
        for row in 0..self.height() {
            table.push_row(picked.iter().map(|col| col[row].clone()).collect());
        }
        Ok(table)
    }
}
