use crate::collectors::{
    CpuRaw, DiskRaw, MemoryRaw, MetricSource, NetworkRaw, SourceError, SystemInfo,
};
use async_trait::async_trait;
#[cfg(target_os = "linux")]
use std::fs;
#[cfg(target_os = "linux")]
use std::path::Path;
use std::sync::Arc;
use sysinfo::{ComponentExt, CpuExt, DiskExt, NetworkExt, NetworksExt, System, SystemExt};
use tokio::sync::Mutex;
use tokio::task::spawn_blocking;
use tracing::debug;

const CPU_TEMP_MARKERS: [&str; 7] = ["cpu", "package", "core", "tctl", "tdie", "coretemp", "k10temp"];
const GPU_MARKERS: [&str; 4] = ["gpu", "nvidia", "amdgpu", "radeon"];

/// `MetricSource` over `sysinfo`.
///
/// Every metric owns its own `System` so the four reads of a tick can
/// refresh in parallel on the blocking pool.
pub struct SysinfoSource {
    cpu: Arc<Mutex<System>>,
    memory: Arc<Mutex<System>>,
    disk: Arc<Mutex<System>>,
    network: Arc<Mutex<System>>,
}

impl SysinfoSource {
    pub fn new() -> Self {
        let mut cpu = System::new();
        // first refresh primes the usage delta for the first tick
        cpu.refresh_cpu();
        cpu.refresh_components_list();

        let mut disk = System::new();
        disk.refresh_disks_list();

        let mut network = System::new();
        network.refresh_networks_list();

        Self {
            cpu: Arc::new(Mutex::new(cpu)),
            memory: Arc::new(Mutex::new(System::new())),
            disk: Arc::new(Mutex::new(disk)),
            network: Arc::new(Mutex::new(network)),
        }
    }
}

impl SysinfoSource {
    /// CPU usage is a delta between two refreshes; waits out the minimum
    /// gap so the first read after `new` is meaningful.
    pub async fn warm_up(&self) {
        tokio::time::sleep(<System as SystemExt>::MINIMUM_CPU_UPDATE_INTERVAL).await;
    }
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricSource for SysinfoSource {
    async fn read_cpu(&self) -> Result<CpuRaw, SourceError> {
        let system = Arc::clone(&self.cpu);
        spawn_blocking(move || {
            let mut system = system.blocking_lock();
            system.refresh_cpu();
            system.refresh_components();
            cpu_reading(&system)
        })
        .await?
    }

    async fn read_memory(&self) -> Result<MemoryRaw, SourceError> {
        let system = Arc::clone(&self.memory);
        spawn_blocking(move || {
            let mut system = system.blocking_lock();
            system.refresh_memory();
            let total = system.total_memory();
            if total == 0 {
                return Err(SourceError::Unavailable(
                    "объём памяти равен нулю".to_string(),
                ));
            }
            Ok(MemoryRaw {
                total_bytes: total,
                free_bytes: system.free_memory(),
                available_bytes: system.available_memory(),
                swap_total_bytes: system.total_swap(),
                swap_used_bytes: system.used_swap(),
            })
        })
        .await?
    }

    async fn read_disk(&self) -> Result<DiskRaw, SourceError> {
        let system = Arc::clone(&self.disk);
        spawn_blocking(move || {
            let mut system = system.blocking_lock();
            system.refresh_disks_list();
            system.refresh_disks();
            let disk = system
                .disks()
                .iter()
                .find(|d| d.mount_point() == std::path::Path::new("/"))
                .or_else(|| system.disks().first())
                .ok_or_else(|| SourceError::Unavailable("не найдено ни одного диска".to_string()))?;
            let total_bytes = disk.total_space();
            let available_bytes = disk.available_space();
            let (read_bytes_total, written_bytes_total) = disk_io_counters(&mut system)?;
            Ok(DiskRaw {
                total_bytes,
                available_bytes,
                read_bytes_total,
                written_bytes_total,
            })
        })
        .await?
    }

    async fn read_network(&self) -> Result<NetworkRaw, SourceError> {
        let system = Arc::clone(&self.network);
        spawn_blocking(move || {
            let mut system = system.blocking_lock();
            system.refresh_networks_list();
            system.refresh_networks();
            let mut raw = NetworkRaw::default();
            for (iface, data) in system.networks().iter() {
                if is_loopback(iface) {
                    continue;
                }
                raw.rx_bytes_total = raw.rx_bytes_total.saturating_add(data.total_received());
                raw.tx_bytes_total = raw.tx_bytes_total.saturating_add(data.total_transmitted());
            }
            Ok(raw)
        })
        .await?
    }
}

fn cpu_reading(system: &System) -> Result<CpuRaw, SourceError> {
    let cpus = system.cpus();
    if cpus.is_empty() {
        return Err(SourceError::Unavailable("список CPU пуст".to_string()));
    }
    let sum: f32 = cpus.iter().map(|c| c.cpu_usage()).sum();
    let usage_percent = (sum / cpus.len() as f32) as f64;
    let clock_ghz = cpus.first().map(|c| c.frequency()).unwrap_or(0) as f64 / 1000.0;
    let temperatures: Vec<(String, f64)> = system
        .components()
        .iter()
        .map(|c| (c.label().to_string(), c.temperature() as f64))
        .collect();

    Ok(CpuRaw {
        usage_percent: usage_percent.clamp(0.0, 100.0),
        core_count: cpus.len() as u32,
        clock_ghz,
        temperature_c: cpu_temperature(&temperatures),
    })
}

/// Hottest CPU sensor; falls back to ACPI thermal zones when no sensor is
/// labelled as a CPU. GPU sensors never count.
fn cpu_temperature(sensors: &[(String, f64)]) -> Option<f64> {
    let plausible = || {
        sensors
            .iter()
            .filter(|(_, t)| (0.0..=130.0).contains(t))
            .filter(|(label, _)| {
                let s = label.to_lowercase();
                !GPU_MARKERS.iter().any(|m| s.contains(m))
            })
    };

    let primary = plausible()
        .filter(|(label, _)| {
            let s = label.to_lowercase();
            CPU_TEMP_MARKERS.iter().any(|m| s.contains(m))
        })
        .map(|(_, t)| *t)
        .max_by(|a, b| a.total_cmp(b));
    if primary.is_some() {
        return primary;
    }

    plausible()
        .filter(|(label, _)| {
            let s = label.to_lowercase();
            s.contains("acpi") || s.contains("thermal zone") || s.contains("_tz")
        })
        .map(|(_, t)| *t)
        .max_by(|a, b| a.total_cmp(b))
}

fn is_loopback(iface: &str) -> bool {
    iface == "lo" || iface.starts_with("lo0") || iface.starts_with("Loopback")
}

#[cfg(target_os = "linux")]
fn disk_io_counters(_system: &mut System) -> Result<(u64, u64), SourceError> {
    let text = fs::read_to_string("/proc/diskstats")
        .map_err(|err| SourceError::Unavailable(format!("/proc/diskstats: {err}")))?;
    Ok(parse_diskstats(&text, is_whole_device))
}

/// Sums per-process cumulative IO. Exited processes drop out of the sum, so
/// the total may shrink between ticks; the sampler clamps that to zero.
#[cfg(not(target_os = "linux"))]
fn disk_io_counters(system: &mut System) -> Result<(u64, u64), SourceError> {
    use sysinfo::ProcessExt;

    system.refresh_processes();
    let mut read = 0_u64;
    let mut written = 0_u64;
    for process in system.processes().values() {
        let usage = process.disk_usage();
        read = read.saturating_add(usage.total_read_bytes);
        written = written.saturating_add(usage.total_written_bytes);
    }
    Ok((read, written))
}

#[cfg(target_os = "linux")]
fn is_whole_device(name: &str) -> bool {
    if name.starts_with("loop") || name.starts_with("ram") || name.starts_with("zram") {
        return false;
    }
    Path::new("/sys/block").join(name).exists()
}

/// Cumulative (read, written) bytes of the devices accepted by `include`.
/// Sector counts in `/proc/diskstats` are always 512-byte units.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_diskstats(text: &str, include: impl Fn(&str) -> bool) -> (u64, u64) {
    const SECTOR_BYTES: u64 = 512;
    let mut read = 0_u64;
    let mut written = 0_u64;
    for line in text.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 || !include(fields[2]) {
            continue;
        }
        let sectors_read = fields[5].parse::<u64>().unwrap_or(0);
        let sectors_written = fields[9].parse::<u64>().unwrap_or(0);
        read = read.saturating_add(sectors_read.saturating_mul(SECTOR_BYTES));
        written = written.saturating_add(sectors_written.saturating_mul(SECTOR_BYTES));
    }
    (read, written)
}

/// One-shot host description for `info` and `/api/system-info`. Blocking.
pub fn collect_system_info() -> SystemInfo {
    let mut system = System::new();
    system.refresh_cpu();
    system.refresh_memory();
    let cpus = system.cpus();
    let info = SystemInfo {
        host_name: system.host_name(),
        os_name: system.name(),
        os_version: system.long_os_version().or_else(|| system.os_version()),
        kernel_version: system.kernel_version(),
        arch: std::env::consts::ARCH.to_string(),
        cpu_brand: cpus.first().map(|c| c.brand().trim().to_string()),
        cpu_cores: cpus.len() as u32,
        cpu_physical_cores: system.physical_core_count().map(|n| n as u32),
        cpu_clock_ghz: cpus.first().map(|c| c.frequency()).unwrap_or(0) as f64 / 1000.0,
        memory_total_bytes: system.total_memory(),
        uptime_seconds: system.uptime(),
    };
    debug!(host = ?info.host_name, cores = info.cpu_cores, "собрана информация о системе");
    info
}
