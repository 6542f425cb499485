mod alerts;
mod collectors;
mod config;
mod display;
mod export;
mod history;
mod http;
mod hub;
mod metrics;
mod monitor;
mod sample;
mod sampler;

use axum::serve;
use clap::{Args, Parser, Subcommand};
use collectors::system::{collect_system_info, SysinfoSource};
use config::{Config, ConfigError, DEFAULT_CONFIG_PATH};
use export::{ExportError, ExportFormat};
use hub::MonitorEvent;
use metrics::Metrics;
use monitor::Monitor;
use sample::MetricKind;
use sampler::{CollectionError, Sampler};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "vigild")]
#[command(version, about = "Host metrics monitor")]
struct Cli {
    #[command(flatten)]
    settings: ConfigArgs,
    #[arg(long)]
    print_default_config: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

/// Where the config comes from plus the flags layered over it. Kept whole so
/// a SIGHUP reload applies the same overrides again.
#[derive(Args, Debug, Clone)]
struct ConfigArgs {
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Tick period, e.g. `2s` or `500ms`
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    interval: Option<Duration>,
    /// CPU usage alert threshold, percent
    #[arg(long, global = true)]
    cpu: Option<f64>,
    /// Memory usage alert threshold, percent
    #[arg(long, global = true)]
    memory: Option<f64>,
    /// Disk usage alert threshold, percent
    #[arg(long, global = true)]
    disk: Option<f64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Live terminal dashboard until Ctrl+C (default)
    Monitor,
    /// Collect one sample, print it and exit
    Status,
    /// Print a description of this host
    Info,
    /// Run the engine behind the HTTP API
    Serve {
        #[arg(long)]
        listen: Option<String>,
        /// Also render the terminal dashboard
        #[arg(long)]
        with_monitor: bool,
    },
    /// Collect samples and write them to a file
    Export {
        #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
        format: ExportFormat,
        #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
        samples: u64,
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        no_system_info: bool,
    },
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("не удалось инициализировать метрики: {0}")]
    Metrics(#[from] prometheus::Error),
    #[error("не удалось запустить HTTP-сервер на {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error(transparent)]
    Collection(#[from] CollectionError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error("фоновая задача завершилась аварийно: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    if let Err(err) = run(cli).await {
        error!(error = %err, "vigild завершился с ошибкой");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let settings = cli.settings;
    let cfg = load_config(&settings)?;
    match cli.command.unwrap_or(Command::Monitor) {
        Command::Monitor => run_monitor(cfg, settings).await,
        Command::Status => run_status(cfg).await,
        Command::Info => run_info().await,
        Command::Serve {
            listen,
            with_monitor,
        } => {
            let mut cfg = cfg;
            if let Some(listen) = listen {
                cfg.listen = listen;
                cfg.validate()?;
            }
            run_serve(cfg, settings, with_monitor).await
        }
        Command::Export {
            format,
            samples,
            output,
            no_system_info,
        } => run_export(cfg, format, samples as usize, output, !no_system_info).await,
    }
}

fn load_config(args: &ConfigArgs) -> Result<Config, ConfigError> {
    let mut cfg = Config::load_or_default(&args.config)?;
    if let Some(interval) = args.interval {
        cfg.interval_ms = interval.as_millis() as u64;
    }
    for (metric, threshold) in [
        (MetricKind::Cpu, args.cpu),
        (MetricKind::Memory, args.memory),
        (MetricKind::Disk, args.disk),
    ] {
        if let Some(threshold) = threshold {
            cfg.override_threshold(metric, threshold);
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

async fn build_monitor(cfg: &Config) -> Monitor {
    let source = SysinfoSource::new();
    source.warm_up().await;
    Monitor::new(Arc::new(source), cfg.monitor_config(), cfg.monitor_options())
}

async fn run_monitor(cfg: Config, settings: ConfigArgs) -> Result<(), AppError> {
    info!(interval_ms = cfg.interval_ms, rules = cfg.alerts.len(), "запуск мониторинга в терминале");
    let monitor = build_monitor(&cfg).await;
    let renderer = display::spawn_renderer(monitor.subscribe().await);

    monitor.start().await?;
    let reload = spawn_config_reload(monitor.clone(), settings);
    wait_for_ctrl_c().await;

    if let Some(reload) = reload {
        reload.abort();
    }
    monitor.stop().await;
    monitor.disconnect_all().await;
    renderer.await?;
    Ok(())
}

async fn run_status(cfg: Config) -> Result<(), AppError> {
    let source = SysinfoSource::new();
    source.warm_up().await;
    let mut sampler = Sampler::new(Arc::new(source), cfg.monitor_options().read_timeout);
    let sample = sampler.collect().await?;

    println!("{}", display::render_sample(&sample));
    for alert in alerts::evaluate(&sample, &cfg.alerts) {
        println!("{}", display::render_alert(&alert));
    }
    Ok(())
}

async fn run_info() -> Result<(), AppError> {
    let info = tokio::task::spawn_blocking(collect_system_info).await?;
    println!("{}", display::render_system_info(&info));
    Ok(())
}

async fn run_serve(cfg: Config, settings: ConfigArgs, with_monitor: bool) -> Result<(), AppError> {
    let addr: SocketAddr = cfg
        .listen
        .parse()
        .map_err(|_| ConfigError::Validation(format!("некорректный адрес listen: {}", cfg.listen)))?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| AppError::Bind { addr, source })?;

    let metrics = Metrics::new()?;
    let monitor = build_monitor(&cfg).await;
    let exporter = metrics::spawn_exporter(metrics.clone(), monitor.subscribe().await);
    let renderer = if with_monitor {
        Some(display::spawn_renderer(monitor.subscribe().await))
    } else {
        None
    };

    info!(
        listen = %addr,
        interval_ms = cfg.interval_ms,
        with_monitor,
        "запуск vigild"
    );
    monitor.start().await?;

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let http_task = {
        let app = http::build_router(metrics, monitor.clone());
        tokio::spawn(async move {
            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });
            if let Err(err) = server.await {
                error!(error = %err, "ошибка HTTP-сервера");
            }
        })
    };

    let reload = spawn_config_reload(monitor.clone(), settings);
    wait_for_ctrl_c().await;

    if let Some(reload) = reload {
        reload.abort();
    }
    monitor.stop().await;
    // open SSE streams end once their subscriptions are gone
    monitor.disconnect_all().await;
    let _ = shutdown_tx.send(true);

    http_task.await?;
    exporter.await?;
    if let Some(renderer) = renderer {
        renderer.await?;
    }
    Ok(())
}

async fn run_export(
    cfg: Config,
    format: ExportFormat,
    count: usize,
    output: Option<PathBuf>,
    with_system_info: bool,
) -> Result<(), AppError> {
    let monitor = build_monitor(&cfg).await;
    let mut events = monitor.subscribe().await;
    info!(count, format = format.extension(), "сбор метрик для экспорта");

    monitor.start().await?;
    let mut collected = Vec::with_capacity(count);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    while collected.len() < count {
        tokio::select! {
            _ = &mut ctrl_c => {
                warn!(collected = collected.len(), "сбор прерван, экспортируются уже собранные данные");
                break;
            }
            event = events.recv() => match event {
                Some(MonitorEvent::Sample(sample)) => collected.push(sample),
                Some(_) => {}
                None => break,
            },
        }
    }
    monitor.stop().await;
    monitor.disconnect_all().await;

    let info = if with_system_info {
        Some(tokio::task::spawn_blocking(collect_system_info).await?)
    } else {
        None
    };
    let path = export::write_export(&collected, format, output.as_deref(), info.as_ref()).await?;
    println!("Exported {} samples to {}", collected.len(), path.display());
    Ok(())
}

/// Re-reads the config on SIGHUP and hands interval and rules to the
/// running monitor. A bad file is logged and the current config kept.
#[cfg(unix)]
fn spawn_config_reload(monitor: Monitor, settings: ConfigArgs) -> Option<JoinHandle<()>> {
    use crate::monitor::ConfigPatch;
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!(error = %err, "не удалось подписаться на SIGHUP, перечитывание конфигурации отключено");
            return None;
        }
    };
    Some(tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            let cfg = match load_config(&settings) {
                Ok(cfg) => cfg,
                Err(err) => {
                    warn!(error = %err, "не удалось перечитать конфигурацию, остаётся прежняя");
                    continue;
                }
            };
            let patch = ConfigPatch {
                interval: Some(cfg.interval()),
                alert_rules: Some(cfg.alerts),
            };
            match monitor.update_config(patch).await {
                Ok(()) => info!(state = ?monitor.state(), "конфигурация перечитана по SIGHUP"),
                Err(err) => warn!(error = %err, "новая конфигурация отклонена"),
            }
        }
    }))
}

#[cfg(not(unix))]
fn spawn_config_reload(_monitor: Monitor, _settings: ConfigArgs) -> Option<JoinHandle<()>> {
    None
}

async fn wait_for_ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "не удалось дождаться Ctrl+C");
    }
    info!("получен Ctrl+C, выполняется остановка");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
