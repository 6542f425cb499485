use crate::collectors::SystemInfo;
use crate::sample::Sample;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

const CSV_HEADER: &str = "timestamp,cpu_usage,cpu_cores,cpu_speed,cpu_temperature,memory_usage_percent,memory_used,memory_free,memory_total,disk_usage_percent,disk_read_speed,disk_write_speed,network_download_speed,network_upload_speed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("не удалось записать файл экспорта {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("не удалось сериализовать данные экспорта: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct ExportDocument<'a> {
    exported_at: DateTime<Utc>,
    metrics_count: usize,
    data: &'a [Arc<Sample>],
    #[serde(skip_serializing_if = "Option::is_none")]
    system_info: Option<&'a SystemInfo>,
    version: &'static str,
}

pub fn render_json(
    samples: &[Arc<Sample>],
    system_info: Option<&SystemInfo>,
    exported_at: DateTime<Utc>,
) -> Result<String, ExportError> {
    let doc = ExportDocument {
        exported_at,
        metrics_count: samples.len(),
        data: samples,
        system_info,
        version: env!("CARGO_PKG_VERSION"),
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}

/// One row per sample. A missing CPU temperature is written as 0.
pub fn render_csv(
    samples: &[Arc<Sample>],
    system_info: Option<&SystemInfo>,
    exported_at: DateTime<Utc>,
) -> String {
    if samples.is_empty() {
        return "No data to export".to_string();
    }

    let mut csv = String::with_capacity(CSV_HEADER.len() + samples.len() * 128);
    csv.push_str(CSV_HEADER);
    csv.push('\n');
    for s in samples {
        let _ = writeln!(
            csv,
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            s.taken_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            s.cpu.usage_percent,
            s.cpu.core_count,
            s.cpu.clock_ghz,
            s.cpu.temperature_c.unwrap_or(0.0),
            s.memory.usage_percent,
            s.memory.used_bytes,
            s.memory.free_bytes,
            s.memory.total_bytes,
            s.disk.usage_percent,
            s.disk.read_rate_mbs,
            s.disk.write_rate_mbs,
            s.network.download_rate_mbps,
            s.network.upload_rate_mbps,
        );
    }

    if let Some(info) = system_info {
        let unknown = "unknown";
        csv.push_str("\n# System Information\n");
        let _ = writeln!(csv, "# Hostname: {}", info.host_name.as_deref().unwrap_or(unknown));
        let _ = writeln!(csv, "# OS: {}", info.os_name.as_deref().unwrap_or(unknown));
        let _ = writeln!(csv, "# Architecture: {}", info.arch);
        let _ = writeln!(csv, "# vigild Version: {}", env!("CARGO_PKG_VERSION"));
        let _ = writeln!(
            csv,
            "# Export Date: {}",
            exported_at.to_rfc3339_opts(SecondsFormat::Millis, true)
        );
    }
    csv
}

/// `vigild-metrics-<timestamp>.<ext>` with `:` and `.` made file-name safe.
pub fn default_file_name(format: ExportFormat, now: DateTime<Utc>) -> String {
    let stamp = now
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("vigild-metrics-{stamp}.{}", format.extension())
}

/// Writes `samples` in `format` to `output`, or to the default file name in
/// the working directory. Returns the path written.
pub async fn write_export(
    samples: &[Arc<Sample>],
    format: ExportFormat,
    output: Option<&Path>,
    system_info: Option<&SystemInfo>,
) -> Result<PathBuf, ExportError> {
    let now = Utc::now();
    let path = match output {
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(default_file_name(format, now)),
    };
    let contents = match format {
        ExportFormat::Json => render_json(samples, system_info, now)?,
        ExportFormat::Csv => render_csv(samples, system_info, now),
    };

    tokio::fs::write(&path, contents)
        .await
        .map_err(|source| ExportError::Io {
            path: path.display().to_string(),
            source,
        })?;
    info!(path = %path.display(), count = samples.len(), "метрики экспортированы");
    Ok(path)
}
