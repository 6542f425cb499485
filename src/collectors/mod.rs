pub mod system;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Raw point-in-time CPU figures as reported by the OS.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuRaw {
    pub usage_percent: f64,
    pub core_count: u32,
    pub clock_ghz: f64,
    pub temperature_c: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryRaw {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub available_bytes: u64,
    pub swap_total_bytes: u64,
    pub swap_used_bytes: u64,
}

/// Space of the primary filesystem plus cumulative IO counters since boot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiskRaw {
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub read_bytes_total: u64,
    pub written_bytes_total: u64,
}

/// Cumulative byte counters summed over the non-loopback interfaces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkRaw {
    pub rx_bytes_total: u64,
    pub tx_bytes_total: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SystemInfo {
    pub host_name: Option<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub kernel_version: Option<String>,
    pub arch: String,
    pub cpu_brand: Option<String>,
    pub cpu_cores: u32,
    pub cpu_physical_cores: Option<u32>,
    pub cpu_clock_ghz: f64,
    pub memory_total_bytes: u64,
    pub uptime_seconds: u64,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("данные недоступны: {0}")]
    Unavailable(String),
    #[error("чтение не уложилось в {0:?}")]
    Timeout(Duration),
    #[error("фоновая задача чтения завершилась аварийно: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Capability that yields point-in-time OS readings.
///
/// Each read is independent of the others, so callers may run all four
/// concurrently.
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn read_cpu(&self) -> Result<CpuRaw, SourceError>;
    async fn read_memory(&self) -> Result<MemoryRaw, SourceError>;
    async fn read_disk(&self) -> Result<DiskRaw, SourceError>;
    async fn read_network(&self) -> Result<NetworkRaw, SourceError>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::sample::MetricKind;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    /// In-memory source whose counters and failures are set by the test.
    #[derive(Default)]
    pub(crate) struct ScriptedSource {
        script: Mutex<Script>,
        cpu_reads: AtomicU64,
        cpu_in_flight: AtomicU64,
        max_cpu_in_flight: AtomicU64,
    }

    #[derive(Debug, Default)]
    pub(crate) struct Script {
        pub cpu_series: VecDeque<f64>,
        pub cpu_usage: f64,
        pub disk_read: u64,
        pub disk_written: u64,
        pub rx: u64,
        pub tx: u64,
        pub failing: Vec<MetricKind>,
        pub cpu_delay: Option<Duration>,
    }

    impl ScriptedSource {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub(crate) fn update(&self, f: impl FnOnce(&mut Script)) {
            let mut script = self.script.lock().unwrap();
            f(&mut script);
        }

        pub(crate) fn cpu_reads(&self) -> u64 {
            self.cpu_reads.load(Ordering::SeqCst)
        }

        /// Highest number of CPU reads ever running at the same time.
        pub(crate) fn max_cpu_in_flight(&self) -> u64 {
            self.max_cpu_in_flight.load(Ordering::SeqCst)
        }

        fn check(&self, kind: MetricKind) -> Result<(), SourceError> {
            if self.script.lock().unwrap().failing.contains(&kind) {
                return Err(SourceError::Unavailable(format!("{kind} offline")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl MetricSource for ScriptedSource {
        async fn read_cpu(&self) -> Result<CpuRaw, SourceError> {
            self.cpu_reads.fetch_add(1, Ordering::SeqCst);
            let in_flight = self.cpu_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_cpu_in_flight.fetch_max(in_flight, Ordering::SeqCst);
            let delay = self.script.lock().unwrap().cpu_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.cpu_in_flight.fetch_sub(1, Ordering::SeqCst);
            self.check(MetricKind::Cpu)?;
            let mut script = self.script.lock().unwrap();
            if let Some(next) = script.cpu_series.pop_front() {
                script.cpu_usage = next;
            }
            Ok(CpuRaw {
                usage_percent: script.cpu_usage,
                core_count: 8,
                clock_ghz: 3.2,
                temperature_c: Some(55.0),
            })
        }

        async fn read_memory(&self) -> Result<MemoryRaw, SourceError> {
            self.check(MetricKind::Memory)?;
            Ok(MemoryRaw {
                total_bytes: 16 * 1024 * 1024 * 1024,
                free_bytes: 2 * 1024 * 1024 * 1024,
                available_bytes: 8 * 1024 * 1024 * 1024,
                swap_total_bytes: 0,
                swap_used_bytes: 0,
            })
        }

        async fn read_disk(&self) -> Result<DiskRaw, SourceError> {
            self.check(MetricKind::Disk)?;
            let script = self.script.lock().unwrap();
            Ok(DiskRaw {
                total_bytes: 500 * 1024 * 1024 * 1024,
                available_bytes: 200 * 1024 * 1024 * 1024,
                read_bytes_total: script.disk_read,
                written_bytes_total: script.disk_written,
            })
        }

        async fn read_network(&self) -> Result<NetworkRaw, SourceError> {
            self.check(MetricKind::Network)?;
            let script = self.script.lock().unwrap();
            Ok(NetworkRaw {
                rx_bytes_total: script.rx,
                tx_bytes_total: script.tx,
            })
        }
    }
}
