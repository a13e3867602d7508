//! CSV import of daily metrics.
//!
//! One row per tracking code and day:
//! `tracking_code,date,clicks,registrations,ftds,qualified_cpa,deposit_amount,commission_cpa,commission_rev`.
//! Values are stored exactly as given. A file with any bad row is rejected
//! as a whole.

use csv::{ReaderBuilder, Trim};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::api::validation::{validate_date, validate_metric_values, validate_tracking_code};
use crate::db::{BulkMetricResult, DailyMetric, DbPool, LinkTarget, MetricValues, TrackingLink};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV file contains no rows")]
    Empty,

    #[error("Invalid rows:\n{}", .0.join("\n"))]
    InvalidRows(Vec<String>),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct CsvMetricRow {
    pub tracking_code: String,
    pub date: String,
    pub clicks: i64,
    pub registrations: i64,
    pub ftds: i64,
    pub qualified_cpa: i64,
    pub deposit_amount: f64,
    pub commission_cpa: f64,
    pub commission_rev: f64,
}

impl CsvMetricRow {
    pub fn values(&self) -> MetricValues {
        MetricValues {
            clicks: self.clicks,
            registrations: self.registrations,
            ftds: self.ftds,
            qualified_cpa: self.qualified_cpa,
            deposit_amount: self.deposit_amount,
            commission_cpa: self.commission_cpa,
            commission_rev: self.commission_rev,
        }
    }
}

/// A parsed row with its 1-based line number in the file
#[derive(Debug, Clone)]
pub struct NumberedRow {
    pub line: usize,
    pub row: CsvMetricRow,
}

pub fn read_metrics<R: Read>(reader: R) -> Result<Vec<NumberedRow>, ImportError> {
    let mut csv_reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    let mut errors = Vec::new();

    for (idx, result) in csv_reader.deserialize::<CsvMetricRow>().enumerate() {
        let line = idx + 2; // header is line 1

        match result {
            Ok(row) => rows.push(NumberedRow { line, row }),
            Err(e) => errors.push(format!("Row {}: {}", line, e)),
        }
    }

    if !errors.is_empty() {
        return Err(ImportError::InvalidRows(errors));
    }
    if rows.is_empty() {
        return Err(ImportError::Empty);
    }
    Ok(rows)
}

pub fn read_metrics_file(path: &Path) -> Result<Vec<NumberedRow>, ImportError> {
    let file = File::open(path).map_err(|source| ImportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    read_metrics(BufReader::new(file))
}

/// Validate every row, then upsert them all in one transaction
pub async fn import_metrics(
    db: &DbPool,
    rows: &[NumberedRow],
) -> Result<BulkMetricResult, ImportError> {
    let mut errors = Vec::new();
    let mut entries = Vec::with_capacity(rows.len());
    let mut conn = db.acquire().await?;

    for NumberedRow { line, row } in rows {
        let values = row.values();
        let problems: Vec<String> = [
            validate_tracking_code(&row.tracking_code),
            validate_date(&row.date),
            validate_metric_values(&values),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect();

        if !problems.is_empty() {
            errors.push(format!("Row {}: {}", line, problems.join("; ")));
            continue;
        }

        if TrackingLink::find_by_code(&mut conn, &row.tracking_code)
            .await?
            .is_none()
        {
            errors.push(format!(
                "Row {}: Unknown tracking code '{}'",
                line, row.tracking_code
            ));
            continue;
        }

        entries.push((
            LinkTarget::Code(row.tracking_code.clone()),
            row.date.clone(),
            values,
        ));
    }
    drop(conn);

    if !errors.is_empty() {
        return Err(ImportError::InvalidRows(errors));
    }

    let result = DailyMetric::bulk_upsert(db, &entries).await?;
    tracing::info!(
        created = result.created,
        updated = result.updated,
        "Imported metrics from CSV"
    );
    Ok(result)
}
