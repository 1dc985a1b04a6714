//! Calibration report and export functionality

use crate::calibrate::Calibration;
use crate::config::CalibrationConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Complete calibration report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationReport {
    pub metadata: ReportMetadata,
    /// Settings the measurement ran with
    pub config: CalibrationConfig,
    pub result: CalibrationResult,
}

/// Report metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Report generation timestamp (RFC 3339)
    pub generated_at: String,
    /// Application version
    pub version: String,
    /// Key the measurement was restricted to, if any
    pub key: Option<String>,
}

/// Measured values, all in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationResult {
    pub interval_ms: f64,
    pub interval_ms_rounded: u64,
    pub elapsed_ms: f64,
    pub samples: u32,
    pub min_gap_ms: Option<f64>,
    pub max_gap_ms: Option<f64>,
    pub jitter_ms: Option<f64>,
}

fn millis(d: std::time::Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

impl From<&Calibration> for CalibrationResult {
    fn from(c: &Calibration) -> Self {
        Self {
            interval_ms: c.interval_ms(),
            interval_ms_rounded: c.interval_ms_rounded(),
            elapsed_ms: millis(c.elapsed),
            samples: c.samples,
            min_gap_ms: c.min_gap.map(millis),
            max_gap_ms: c.max_gap.map(millis),
            jitter_ms: c.jitter.map(millis),
        }
    }
}

impl CalibrationReport {
    pub fn new(calibration: &Calibration, config: &CalibrationConfig, key: Option<String>) -> Self {
        let now: DateTime<Utc> = Utc::now();
        Self {
            metadata: ReportMetadata {
                generated_at: now.to_rfc3339(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                key,
            },
            config: config.clone(),
            result: CalibrationResult::from(calibration),
        }
    }

    /// Export report to a JSON file
    pub fn export_json(&self, path: &Path) -> Result<(), ReportError> {
        let json = self.to_json()?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
