use crate::hub::{MonitorEvent, Subscription};
use crate::sample::{MetricKind, Sample};
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    started_at: Instant,
    pub cpu_usage_percent: Gauge,
    pub cpu_temperature_celsius: Gauge,
    pub memory_used_bytes: Gauge,
    pub memory_total_bytes: Gauge,
    pub memory_usage_percent: Gauge,
    pub disk_used_bytes: Gauge,
    pub disk_total_bytes: Gauge,
    pub disk_usage_percent: Gauge,
    pub disk_io_mbs: GaugeVec,
    pub network_rate_mbps: GaugeVec,
    pub network_bytes_total: GaugeVec,
    pub subscribers: Gauge,
    pub uptime_seconds: Gauge,
    pub last_sample_timestamp_seconds: Gauge,
    pub ticks_total: Counter,
    pub collect_errors_total: CounterVec,
    pub alerts_total: CounterVec,
    pub scrape_count_total: Counter,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let cpu_usage_percent = Gauge::with_opts(opts!(
            "vigild_cpu_usage_percent",
            "CPU usage in percent, averaged over cores"
        ))?;
        let cpu_temperature_celsius = Gauge::with_opts(opts!(
            "vigild_cpu_temperature_celsius",
            "Hottest CPU sensor, NaN when unavailable"
        ))?;
        let memory_used_bytes =
            Gauge::with_opts(opts!("vigild_memory_used_bytes", "Used memory in bytes"))?;
        let memory_total_bytes =
            Gauge::with_opts(opts!("vigild_memory_total_bytes", "Total memory in bytes"))?;
        let memory_usage_percent =
            Gauge::with_opts(opts!("vigild_memory_usage_percent", "Memory usage in percent"))?;
        let disk_used_bytes =
            Gauge::with_opts(opts!("vigild_disk_used_bytes", "Root filesystem used bytes"))?;
        let disk_total_bytes =
            Gauge::with_opts(opts!("vigild_disk_total_bytes", "Root filesystem size in bytes"))?;
        let disk_usage_percent = Gauge::with_opts(opts!(
            "vigild_disk_usage_percent",
            "Root filesystem usage in percent"
        ))?;
        let disk_io_mbs = GaugeVec::new(
            opts!("vigild_disk_io_mbs", "Disk throughput in MB/s by direction"),
            &["direction"],
        )?;
        let network_rate_mbps = GaugeVec::new(
            opts!(
                "vigild_network_rate_mbps",
                "Network throughput in Mbps by direction"
            ),
            &["direction"],
        )?;
        let network_bytes_total = GaugeVec::new(
            opts!(
                "vigild_network_bytes_total",
                "Cumulative interface bytes by direction"
            ),
            &["direction"],
        )?;
        let subscribers =
            Gauge::with_opts(opts!("vigild_subscribers", "Active event subscribers"))?;
        let uptime_seconds =
            Gauge::with_opts(opts!("vigild_uptime_seconds", "Process uptime in seconds"))?;
        let last_sample_timestamp_seconds = Gauge::with_opts(opts!(
            "vigild_last_sample_timestamp_seconds",
            "Unix timestamp of the last sample"
        ))?;
        let ticks_total = Counter::with_opts(opts!(
            "vigild_ticks_total",
            "Ticks run, successful or not"
        ))?;
        let collect_errors_total = CounterVec::new(
            opts!(
                "vigild_collect_errors_total",
                "Failed reads total by metric"
            ),
            &["metric"],
        )?;
        let alerts_total = CounterVec::new(
            opts!("vigild_alerts_total", "Fired alerts total by metric"),
            &["metric"],
        )?;
        let scrape_count_total = Counter::with_opts(opts!(
            "vigild_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;

        register(&registry, &cpu_usage_percent)?;
        register(&registry, &cpu_temperature_celsius)?;
        register(&registry, &memory_used_bytes)?;
        register(&registry, &memory_total_bytes)?;
        register(&registry, &memory_usage_percent)?;
        register(&registry, &disk_used_bytes)?;
        register(&registry, &disk_total_bytes)?;
        register(&registry, &disk_usage_percent)?;
        register(&registry, &disk_io_mbs)?;
        register(&registry, &network_rate_mbps)?;
        register(&registry, &network_bytes_total)?;
        register(&registry, &subscribers)?;
        register(&registry, &uptime_seconds)?;
        register(&registry, &last_sample_timestamp_seconds)?;
        register(&registry, &ticks_total)?;
        register(&registry, &collect_errors_total)?;
        register(&registry, &alerts_total)?;
        register(&registry, &scrape_count_total)?;

        // labelled series exist from the start so a scrape before the
        // first failure still shows them at zero
        for metric in MetricKind::ALL {
            collect_errors_total.with_label_values(&[metric.as_str()]);
            alerts_total.with_label_values(&[metric.as_str()]);
        }

        Ok(Arc::new(Self {
            registry,
            started_at: Instant::now(),
            cpu_usage_percent,
            cpu_temperature_celsius,
            memory_used_bytes,
            memory_total_bytes,
            memory_usage_percent,
            disk_used_bytes,
            disk_total_bytes,
            disk_usage_percent,
            disk_io_mbs,
            network_rate_mbps,
            network_bytes_total,
            subscribers,
            uptime_seconds,
            last_sample_timestamp_seconds,
            ticks_total,
            collect_errors_total,
            alerts_total,
            scrape_count_total,
        }))
    }

    pub fn observe(&self, event: &MonitorEvent) {
        match event {
            MonitorEvent::Sample(sample) => {
                self.ticks_total.inc();
                self.update_from_sample(sample);
            }
            MonitorEvent::Error(err) => {
                self.ticks_total.inc();
                for metric in &err.failed {
                    self.collect_errors_total
                        .with_label_values(&[metric.as_str()])
                        .inc();
                }
            }
            MonitorEvent::Alert(alert) => {
                self.alerts_total
                    .with_label_values(&[alert.metric.as_str()])
                    .inc();
            }
            MonitorEvent::Started | MonitorEvent::Stopped => {}
        }
    }

    pub fn update_from_sample(&self, sample: &Sample) {
        self.cpu_usage_percent.set(sample.cpu.usage_percent);
        self.cpu_temperature_celsius
            .set(sample.cpu.temperature_c.unwrap_or(f64::NAN));

        self.memory_used_bytes.set(sample.memory.used_bytes as f64);
        self.memory_total_bytes.set(sample.memory.total_bytes as f64);
        self.memory_usage_percent.set(sample.memory.usage_percent);

        self.disk_used_bytes.set(sample.disk.used_bytes as f64);
        self.disk_total_bytes.set(sample.disk.total_bytes as f64);
        self.disk_usage_percent.set(sample.disk.usage_percent);
        self.disk_io_mbs
            .with_label_values(&["read"])
            .set(sample.disk.read_rate_mbs);
        self.disk_io_mbs
            .with_label_values(&["write"])
            .set(sample.disk.write_rate_mbs);

        self.network_rate_mbps
            .with_label_values(&["download"])
            .set(sample.network.download_rate_mbps);
        self.network_rate_mbps
            .with_label_values(&["upload"])
            .set(sample.network.upload_rate_mbps);
        self.network_bytes_total
            .with_label_values(&["received"])
            .set(sample.network.bytes_received as f64);
        self.network_bytes_total
            .with_label_values(&["sent"])
            .set(sample.network.bytes_sent as f64);

        self.last_sample_timestamp_seconds
            .set(sample.taken_at.timestamp_millis() as f64 / 1000.0);
    }

    pub fn set_subscribers(&self, count: usize) {
        self.subscribers.set(count as f64);
    }

    pub fn inc_scrape_count(&self) {
        self.scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        self.uptime_seconds
            .set(self.started_at.elapsed().as_secs_f64().floor());
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

/// Feeds every event of `subscription` into `metrics` until the hub drops it.
pub fn spawn_exporter(metrics: Arc<Metrics>, mut subscription: Subscription) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            metrics.observe(&event);
        }
        debug!(subscriber = subscription.id(), "экспорт метрик Prometheus остановлен");
    })
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}
