//! Delimited-text persistence: feature tables, score matrices and variance
//! tables.

use crate::emotion::ScoreMatrix;
use crate::features::{FeatureSet, FeatureVector, VarianceTable};
use std::io;
use std::path::Path;

pub const FILENAME_COLUMN: &str = "filename";

#[derive(thiserror::Error, Debug)]
pub enum ReportError {
    #[error("cannot access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("missing `filename` column")]
    MissingFilenameColumn,

    #[error("row {row}, column `{column}`: `{value}` is not a number")]
    InvalidNumber {
        row: usize,
        column: String,
        value: String,
    },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> ReportError + '_ {
    move |source| ReportError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn format_value(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Writes `filename` then one column per entry of `columns`; absent values
/// become empty cells.
pub fn write_feature_set<W: io::Write>(
    writer: W,
    set: &FeatureSet,
    columns: &[String],
) -> Result<(), ReportError> {
    let mut w = csv::Writer::from_writer(writer);
    w.write_record(std::iter::once(FILENAME_COLUMN).chain(columns.iter().map(String::as_str)))?;
    for r in set.recordings() {
        let mut record = vec![r.id.clone()];
        record.extend(columns.iter().map(|c| format_value(r.features.get(c))));
        w.write_record(&record)?;
    }
    w.flush().map_err(csv::Error::from)?;
    Ok(())
}

pub fn save_feature_set(path: &Path, set: &FeatureSet, columns: &[String]) -> Result<(), ReportError> {
    let file = std::fs::File::create(path).map_err(io_error(path))?;
    write_feature_set(io::BufWriter::new(file), set, columns)
}

pub fn write_score_matrix<W: io::Write>(writer: W, matrix: &ScoreMatrix) -> Result<(), ReportError> {
    let mut w = csv::Writer::from_writer(writer);
    w.write_record(
        std::iter::once(FILENAME_COLUMN).chain(matrix.emotions().iter().map(String::as_str)),
    )?;
    for row in matrix.rows() {
        let mut record = vec![row.recording.clone()];
        record.extend(row.scores.iter().map(|s| format!("{s:.2}")));
        w.write_record(&record)?;
    }
    w.flush().map_err(csv::Error::from)?;
    Ok(())
}

pub fn save_score_matrix(path: &Path, matrix: &ScoreMatrix) -> Result<(), ReportError> {
    let file = std::fs::File::create(path).map_err(io_error(path))?;
    write_score_matrix(io::BufWriter::new(file), matrix)
}

/// Reads a `filename` + per-feature table of instability measures. Blank
/// cells are missing values.
pub fn read_variance_table<R: io::Read>(reader: R) -> Result<VarianceTable, ReportError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_owned).collect();
    let id_idx = headers
        .iter()
        .position(|h| h == FILENAME_COLUMN)
        .ok_or(ReportError::MissingFilenameColumn)?;

    let mut table = VarianceTable::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let mut values = FeatureVector::new();
        for (i, column) in headers.iter().enumerate() {
            if i == id_idx {
                continue;
            }
            let cell = record.get(i).unwrap_or_default();
            if cell.is_empty() {
                continue;
            }
            let value: f64 = cell.parse().map_err(|_| ReportError::InvalidNumber {
                row: row + 1,
                column: column.clone(),
                value: cell.to_owned(),
            })?;
            values.insert(column, value);
        }
        table.insert(record.get(id_idx).unwrap_or_default(), values);
    }
    Ok(table)
}

pub fn load_variance_table(path: &Path) -> Result<VarianceTable, ReportError> {
    let file = std::fs::File::open(path).map_err(io_error(path))?;
    read_variance_table(io::BufReader::new(file))
}
