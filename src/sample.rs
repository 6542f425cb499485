use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::collectors::{DiskRaw, MemoryRaw};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Cpu,
    Memory,
    Disk,
    Network,
}

impl MetricKind {
    pub const ALL: [MetricKind; 4] = [
        MetricKind::Cpu,
        MetricKind::Memory,
        MetricKind::Disk,
        MetricKind::Network,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Cpu => "cpu",
            MetricKind::Memory => "memory",
            MetricKind::Disk => "disk",
            MetricKind::Network => "network",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One atomic snapshot of every monitored metric, taken in a single tick.
///
/// All sub-readings share `taken_at`. Samples are never built partially and
/// never mutated once handed out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub cpu: CpuReading,
    pub memory: MemoryReading,
    pub disk: DiskReading,
    pub network: NetworkReading,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuReading {
    pub usage_percent: f64,
    pub core_count: u32,
    pub clock_ghz: f64,
    pub temperature_c: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryReading {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub available_bytes: u64,
    pub usage_percent: f64,
    pub swap_total_bytes: u64,
    pub swap_used_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskReading {
    pub read_rate_mbs: f64,
    pub write_rate_mbs: f64,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkReading {
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub download_rate_mbps: f64,
    pub upload_rate_mbps: f64,
}

impl MemoryReading {
    /// Used memory excludes reclaimable cache and buffers: `total - available`.
    pub fn from_raw(raw: &MemoryRaw) -> Self {
        let used = raw.total_bytes.saturating_sub(raw.available_bytes);
        Self {
            total_bytes: raw.total_bytes,
            used_bytes: used,
            free_bytes: raw.free_bytes,
            available_bytes: raw.available_bytes,
            usage_percent: percent(used, raw.total_bytes),
            swap_total_bytes: raw.swap_total_bytes,
            swap_used_bytes: raw.swap_used_bytes,
        }
    }
}

impl DiskReading {
    pub fn from_raw(raw: &DiskRaw, read_rate_mbs: f64, write_rate_mbs: f64) -> Self {
        let used = raw.total_bytes.saturating_sub(raw.available_bytes);
        Self {
            read_rate_mbs: round2(read_rate_mbs),
            write_rate_mbs: round2(write_rate_mbs),
            total_bytes: raw.total_bytes,
            used_bytes: used,
            free_bytes: raw.available_bytes,
            usage_percent: percent(used, raw.total_bytes),
        }
    }
}

impl Sample {
    /// Value an alert rule for `metric` is compared against.
    pub fn value_of(&self, metric: MetricKind) -> f64 {
        match metric {
            MetricKind::Cpu => self.cpu.usage_percent,
            MetricKind::Memory => self.memory.usage_percent,
            MetricKind::Disk => self.disk.usage_percent,
            MetricKind::Network => {
                round2(self.network.download_rate_mbps + self.network.upload_rate_mbps)
            }
        }
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(part as f64 / total as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_usage_excludes_reclaimable_cache() {
        let reading = MemoryReading::from_raw(&MemoryRaw {
            total_bytes: 16_000,
            free_bytes: 1_000,
            available_bytes: 6_000,
            swap_total_bytes: 0,
            swap_used_bytes: 0,
        });
        assert_eq!(reading.used_bytes, 10_000);
        assert_eq!(reading.usage_percent, 62.5);
    }

    #[test]
    fn percent_of_empty_total_is_zero() {
        assert_eq!(percent(10, 0), 0.0);
        assert_eq!(percent(1, 3), 33.33);
    }

    #[test]
    fn round2_keeps_two_decimals() {
        assert_eq!(round2(80.004), 80.0);
        assert_eq!(round2(79.996), 80.0);
        assert_eq!(round2(12.345_6), 12.35);
    }

    #[test]
    fn network_value_is_rounded_sum_of_rates() {
        let sample = Sample {
            cpu: CpuReading {
                usage_percent: 0.0,
                core_count: 1,
                clock_ghz: 1.0,
                temperature_c: None,
            },
            memory: MemoryReading::from_raw(&MemoryRaw {
                total_bytes: 100,
                free_bytes: 50,
                available_bytes: 50,
                swap_total_bytes: 0,
                swap_used_bytes: 0,
            }),
            disk: DiskReading {
                read_rate_mbs: 0.0,
                write_rate_mbs: 0.0,
                total_bytes: 100,
                used_bytes: 50,
                free_bytes: 50,
                usage_percent: 50.0,
            },
            network: NetworkReading {
                bytes_received: 0,
                bytes_sent: 0,
                download_rate_mbps: 0.1,
                upload_rate_mbps: 0.2,
            },
            taken_at: Utc::now(),
        };
        assert_eq!(sample.value_of(MetricKind::Network), 0.3);
    }
}
