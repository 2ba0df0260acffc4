use crate::data_models::{Table, Value};
use crate::errors::{LoadError, WriteError};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use std::fs::{self, File};
use std::path::Path;

/// Reads a headed CSV file. Rows with a field count different from the
/// header are rejected.
pub fn read_table(path: &Path, null_markers: &[String]) -> Result<Table, LoadError> {
    let file = File::open(path).map_err(|e| LoadError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut reader = ReaderBuilder::new().has_headers(true).flexible(false).from_reader(file);

    let csv_err = |e: csv::Error| LoadError::Csv {
        path: path.to_path_buf(),
        source: e,
    };

    let headers = reader.headers().map_err(csv_err)?.clone();
    let mut table = Table::new(headers.iter().map(|h| h.to_string()).collect());

    let mut record = StringRecord::new();
    while reader.read_record(&mut record).map_err(csv_err)? {
        table.push_row(record.iter().map(|cell| Value::parse(cell, null_markers)).collect());
    }
    Ok(table)
}

/// Writes the table with a header row and no index column.
///
/// The rows go to a sibling `.partial` file that is renamed into place, so
/// a failed write never leaves a truncated table at `path`.
pub fn write_table(table: &Table, path: &Path) -> Result<(), WriteError> {
    let partial = path.with_extension("partial");
    let result = write_csv(table, &partial).and_then(|_| {
        fs::rename(&partial, path).map_err(|e| WriteError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    });
    if result.is_err() {
        let _ = fs::remove_file(&partial);
    }
    result
}

fn write_csv(table: &Table, path: &Path) -> Result<(), WriteError> {
    let file = File::create(path).map_err(|e| WriteError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut writer = WriterBuilder::new().from_writer(file);

    let csv_err = |e: csv::Error| WriteError::Csv {
        path: path.to_path_buf(),
        source: e,
    };

    writer.write_record(table.columns()).map_err(csv_err)?;
    for row in table.rows() {
        writer
            .write_record(row.iter().map(|v| v.to_string()))
            .map_err(csv_err)?;
    }
    writer.flush().map_err(|e| WriteError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(())
}
