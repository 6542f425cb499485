use crate::collectors::{CpuRaw, DiskRaw, MemoryRaw, MetricSource, NetworkRaw, SourceError};
use crate::sample::{
    round2, CpuReading, DiskReading, MemoryReading, MetricKind, NetworkReading, Sample,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::warn;

const BYTES_PER_MIB: f64 = 1_048_576.0;

/// A tick could not produce a sample. Lists every metric whose read failed.
#[derive(Debug, Clone, Error, Serialize)]
#[error("сбор метрик не удался ({}): {cause}", join_kinds(.failed))]
pub struct CollectionError {
    pub failed: Vec<MetricKind>,
    pub cause: String,
}

fn join_kinds(kinds: &[MetricKind]) -> String {
    kinds
        .iter()
        .map(|k| k.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Derived {
    pub bytes_per_sec: f64,
    pub reset: bool,
}

/// Per-second rate between two cumulative counter readings. A counter that
/// went backwards (wrap, device change) yields zero and is flagged.
pub(crate) fn derive_rate(previous: u64, current: u64, elapsed_secs: f64) -> Derived {
    if current < previous {
        return Derived {
            bytes_per_sec: 0.0,
            reset: true,
        };
    }
    if elapsed_secs <= 0.0 {
        return Derived::default();
    }
    Derived {
        bytes_per_sec: (current - previous) as f64 / elapsed_secs,
        reset: false,
    }
}

#[derive(Debug, Clone, Copy)]
struct CounterMark {
    first: u64,
    second: u64,
    at: Instant,
}

impl CounterMark {
    fn rates_to(&self, current: &CounterMark) -> (Derived, Derived) {
        let elapsed = current.at.saturating_duration_since(self.at).as_secs_f64();
        (
            derive_rate(self.first, current.first, elapsed),
            derive_rate(self.second, current.second, elapsed),
        )
    }
}

/// Counters of the last successful tick. Replaced as a whole, never partially.
#[derive(Debug, Clone, Default)]
pub struct RateState {
    disk: Option<CounterMark>,
    network: Option<CounterMark>,
}

pub(crate) struct RawReadings {
    pub cpu: CpuRaw,
    pub memory: MemoryRaw,
    pub disk: DiskRaw,
    pub network: NetworkRaw,
}

pub struct Sampler {
    source: Arc<dyn MetricSource>,
    read_timeout: Duration,
    rates: RateState,
}

impl Sampler {
    pub fn new(source: Arc<dyn MetricSource>, read_timeout: Duration) -> Self {
        Self {
            source,
            read_timeout,
            rates: RateState::default(),
        }
    }

    /// Reads all four metrics concurrently and builds one sample.
    ///
    /// Fails as a whole when any read fails or exceeds the read timeout; the
    /// rate state is then left untouched.
    pub async fn collect(&mut self) -> Result<Sample, CollectionError> {
        let limit = self.read_timeout;
        let (cpu, memory, disk, network) = tokio::join!(
            bounded(limit, self.source.read_cpu()),
            bounded(limit, self.source.read_memory()),
            bounded(limit, self.source.read_disk()),
            bounded(limit, self.source.read_network()),
        );
        let now = Instant::now();
        let taken_at = Utc::now();

        let mut failures = Vec::new();
        let cpu = keep(MetricKind::Cpu, cpu, &mut failures);
        let memory = keep(MetricKind::Memory, memory, &mut failures);
        let disk = keep(MetricKind::Disk, disk, &mut failures);
        let network = keep(MetricKind::Network, network, &mut failures);

        let (Some(cpu), Some(memory), Some(disk), Some(network)) = (cpu, memory, disk, network)
        else {
            return Err(CollectionError {
                failed: failures.iter().map(|(kind, _)| *kind).collect(),
                cause: failures
                    .iter()
                    .map(|(kind, err)| format!("{kind}: {err}"))
                    .collect::<Vec<_>>()
                    .join("; "),
            });
        };

        Ok(self.assemble(
            RawReadings {
                cpu,
                memory,
                disk,
                network,
            },
            now,
            taken_at,
        ))
    }

    pub(crate) fn assemble(
        &mut self,
        raw: RawReadings,
        now: Instant,
        taken_at: DateTime<Utc>,
    ) -> Sample {
        let disk_mark = CounterMark {
            first: raw.disk.read_bytes_total,
            second: raw.disk.written_bytes_total,
            at: now,
        };
        let net_mark = CounterMark {
            first: raw.network.rx_bytes_total,
            second: raw.network.tx_bytes_total,
            at: now,
        };

        let (read, write) = self
            .rates
            .disk
            .map(|prev| prev.rates_to(&disk_mark))
            .unwrap_or_default();
        let (down, up) = self
            .rates
            .network
            .map(|prev| prev.rates_to(&net_mark))
            .unwrap_or_default();

        if read.reset || write.reset {
            warn!(metric = "disk", "счётчик ввода-вывода диска уменьшился, скорость принята равной нулю");
        }
        if down.reset || up.reset {
            warn!(metric = "network", "сетевой счётчик уменьшился, скорость принята равной нулю");
        }

        self.rates = RateState {
            disk: Some(disk_mark),
            network: Some(net_mark),
        };

        Sample {
            cpu: CpuReading {
                usage_percent: round2(raw.cpu.usage_percent),
                core_count: raw.cpu.core_count,
                clock_ghz: round2(raw.cpu.clock_ghz),
                temperature_c: raw.cpu.temperature_c.map(round2),
            },
            memory: MemoryReading::from_raw(&raw.memory),
            disk: DiskReading::from_raw(
                &raw.disk,
                read.bytes_per_sec / BYTES_PER_MIB,
                write.bytes_per_sec / BYTES_PER_MIB,
            ),
            network: NetworkReading {
                bytes_received: raw.network.rx_bytes_total,
                bytes_sent: raw.network.tx_bytes_total,
                download_rate_mbps: round2(down.bytes_per_sec * 8.0 / BYTES_PER_MIB),
                upload_rate_mbps: round2(up.bytes_per_sec * 8.0 / BYTES_PER_MIB),
            },
            taken_at,
        }
    }
}

async fn bounded<T>(
    limit: Duration,
    read: impl Future<Output = Result<T, SourceError>>,
) -> Result<T, SourceError> {
    match tokio::time::timeout(limit, read).await {
        Ok(result) => result,
        Err(_elapsed) => Err(SourceError::Timeout(limit)),
    }
}

fn keep<T>(
    kind: MetricKind,
    result: Result<T, SourceError>,
    failures: &mut Vec<(MetricKind, SourceError)>,
) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            failures.push((kind, err));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::testing::ScriptedSource;

    fn raw(disk_read: u64, disk_written: u64, rx: u64, tx: u64) -> RawReadings {
        RawReadings {
            cpu: CpuRaw {
                usage_percent: 12.346,
                core_count: 4,
                clock_ghz: 2.4,
                temperature_c: None,
            },
            memory: MemoryRaw {
                total_bytes: 1000,
                free_bytes: 100,
                available_bytes: 400,
                swap_total_bytes: 0,
                swap_used_bytes: 0,
            },
            disk: DiskRaw {
                total_bytes: 1000,
                available_bytes: 250,
                read_bytes_total: disk_read,
                written_bytes_total: disk_written,
            },
            network: NetworkRaw {
                rx_bytes_total: rx,
                tx_bytes_total: tx,
            },
        }
    }

    fn sampler() -> Sampler {
        Sampler::new(ScriptedSource::new(), Duration::from_secs(1))
    }

    #[test]
    fn first_tick_has_zero_rates() {
        let mut sampler = sampler();
        let sample = sampler.assemble(raw(5_000_000, 7_000_000, 900, 900), Instant::now(), Utc::now());
        assert_eq!(sample.disk.read_rate_mbs, 0.0);
        assert_eq!(sample.disk.write_rate_mbs, 0.0);
        assert_eq!(sample.network.download_rate_mbps, 0.0);
        assert_eq!(sample.network.upload_rate_mbps, 0.0);
        assert_eq!(sample.cpu.usage_percent, 12.35);
        assert_eq!(sample.memory.used_bytes, 600);
        assert_eq!(sample.disk.usage_percent, 75.0);
    }

    #[test]
    fn disk_rate_in_mib_per_second() {
        let mut sampler = sampler();
        let t0 = Instant::now();
        sampler.assemble(raw(1_048_576, 0, 0, 0), t0, Utc::now());
        let sample = sampler.assemble(
            raw(3_145_728, 0, 0, 0),
            t0 + Duration::from_secs(1),
            Utc::now(),
        );
        assert_eq!(sample.disk.read_rate_mbs, 2.0);
        assert_eq!(sample.disk.write_rate_mbs, 0.0);
    }

    #[test]
    fn network_rate_in_megabits_per_second() {
        let mut sampler = sampler();
        let t0 = Instant::now();
        sampler.assemble(raw(0, 0, 0, 0), t0, Utc::now());
        // 1 MiB over two seconds = 4 Mbit/s
        let sample = sampler.assemble(
            raw(0, 0, 1_048_576, 0),
            t0 + Duration::from_secs(2),
            Utc::now(),
        );
        assert_eq!(sample.network.download_rate_mbps, 4.0);
    }

    #[test]
    fn counter_reset_clamps_to_zero() {
        let mut sampler = sampler();
        let t0 = Instant::now();
        sampler.assemble(raw(0, 0, 0, 5000), t0, Utc::now());
        let sample = sampler.assemble(raw(0, 0, 0, 100), t0 + Duration::from_secs(1), Utc::now());
        assert_eq!(sample.network.upload_rate_mbps, 0.0);
        assert_eq!(sample.network.bytes_sent, 100);

        // the lowered counter is the new baseline
        let sample = sampler.assemble(
            raw(0, 0, 0, 100 + 131_072),
            t0 + Duration::from_secs(2),
            Utc::now(),
        );
        assert_eq!(sample.network.upload_rate_mbps, 1.0);
    }

    #[test]
    fn derive_rate_handles_zero_elapsed() {
        assert_eq!(derive_rate(10, 20, 0.0), Derived::default());
        assert!(derive_rate(20, 10, 1.0).reset);
        assert_eq!(derive_rate(10, 20, 2.0).bytes_per_sec, 5.0);
    }

    #[tokio::test]
    async fn failed_read_fails_whole_tick() {
        let source = ScriptedSource::new();
        source.update(|s| s.failing = vec![MetricKind::Memory, MetricKind::Network]);
        let mut sampler = Sampler::new(source.clone(), Duration::from_secs(1));

        let err = sampler.collect().await.unwrap_err();
        assert_eq!(err.failed, vec![MetricKind::Memory, MetricKind::Network]);
        assert!(err.cause.contains("memory offline"));
        assert!(sampler.rates.disk.is_none());

        source.update(|s| s.failing.clear());
        let sample = sampler.collect().await.unwrap();
        assert_eq!(sample.disk.read_rate_mbs, 0.0);
        assert!(sampler.rates.disk.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_read_times_out() {
        let source = ScriptedSource::new();
        source.update(|s| s.cpu_delay = Some(Duration::from_secs(10)));
        let mut sampler = Sampler::new(source, Duration::from_millis(500));

        let err = sampler.collect().await.unwrap_err();
        assert_eq!(err.failed, vec![MetricKind::Cpu]);
        assert!(err.to_string().contains("cpu"));
    }
}
