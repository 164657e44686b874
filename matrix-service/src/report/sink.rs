// Report Sinks
// Destinations that receive each matrix report when the matrix finishes

use crate::error::{ServiceError, ServiceResult};
use crate::model::MatrixReport;

use parking_lot::Mutex;

use std::fs;
use std::path::{Path, PathBuf};

/// Receives every finished matrix report
pub trait ReportSink: Send + Sync {
    fn publish(&self, report: &MatrixReport) -> ServiceResult<()>;
}

/// Writes `<matrix>.json` into a directory
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File a report is written to
    pub fn path_for(&self, matrix: &str) -> PathBuf {
        let file: String = matrix
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", file))
    }
}

impl ReportSink for JsonFileSink {
    fn publish(&self, report: &MatrixReport) -> ServiceResult<()> {
        fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(report).map_err(|e| ServiceError::Report(e.to_string()))?;
        let path = self.path_for(&report.name);
        fs::write(&path, json)?;
        tracing::debug!(matrix = %report.name, path = %path.display(), "Report written");
        Ok(())
    }
}

/// Keeps reports in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    reports: Mutex<Vec<MatrixReport>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<MatrixReport> {
        self.reports.lock().clone()
    }
}

impl ReportSink for MemorySink {
    fn publish(&self, report: &MatrixReport) -> ServiceResult<()> {
        self.reports.lock().push(report.clone());
        Ok(())
    }
}
