use crate::alerts::Alert;
use crate::collectors::SystemInfo;
use crate::hub::{MonitorEvent, Subscription};
use crate::sample::Sample;
use crate::sampler::CollectionError;
use chrono::Local;
use colored::*;
use std::fmt::Write as _;
use tokio::task::JoinHandle;

const BAR_WIDTH: usize = 30;
const CLEAR_SCREEN: &str = "\x1B[2J\x1B[H";

pub fn render_sample(sample: &Sample) -> String {
    let mut out = String::new();
    let border = "═".repeat(60);
    let rule = "─".repeat(40);

    let _ = writeln!(out, "{}", border.dimmed());
    let _ = writeln!(out, "{:>40}", "vigild - system monitor".bold().cyan());
    let _ = writeln!(out, "{}\n", border.dimmed());

    let cpu = &sample.cpu;
    let _ = writeln!(out, "{}", "CPU".bold().blue());
    let _ = writeln!(out, "{}", rule.dimmed());
    let _ = writeln!(out, "Usage:      {}", usage_line(cpu.usage_percent));
    let _ = writeln!(out, "Cores:      {}", cpu.core_count);
    let _ = writeln!(out, "Speed:      {:.2} GHz", cpu.clock_ghz);
    if let Some(temp) = cpu.temperature_c {
        let text = format!("{temp:.1}°C");
        let text = if temp > 80.0 {
            text.red()
        } else if temp > 60.0 {
            text.yellow()
        } else {
            text.green()
        };
        let _ = writeln!(out, "Temp:       {text}");
    }
    out.push('\n');

    let memory = &sample.memory;
    let _ = writeln!(out, "{}", "Memory".bold().green());
    let _ = writeln!(out, "{}", rule.dimmed());
    let _ = writeln!(out, "Usage:      {}", usage_line(memory.usage_percent));
    let _ = writeln!(out, "Used:       {}", format_bytes(memory.used_bytes));
    let _ = writeln!(out, "Free:       {}", format_bytes(memory.free_bytes));
    let _ = writeln!(out, "Total:      {}", format_bytes(memory.total_bytes));
    if memory.swap_used_bytes > 0 {
        let _ = writeln!(
            out,
            "Swap:       {} / {}",
            format_bytes(memory.swap_used_bytes).yellow(),
            format_bytes(memory.swap_total_bytes)
        );
    }
    out.push('\n');

    let disk = &sample.disk;
    let _ = writeln!(out, "{}", "Disk".bold().yellow());
    let _ = writeln!(out, "{}", rule.dimmed());
    let _ = writeln!(out, "Usage:      {}", usage_line(disk.usage_percent));
    let _ = writeln!(out, "Used:       {}", format_bytes(disk.used_bytes));
    let _ = writeln!(out, "Free:       {}", format_bytes(disk.free_bytes));
    let _ = writeln!(out, "Total:      {}", format_bytes(disk.total_bytes));
    let _ = writeln!(out, "Read:       {}", format_rate(disk.read_rate_mbs, "MB/s").cyan());
    let _ = writeln!(out, "Write:      {}", format_rate(disk.write_rate_mbs, "MB/s").magenta());
    out.push('\n');

    let network = &sample.network;
    let _ = writeln!(out, "{}", "Network".bold().cyan());
    let _ = writeln!(out, "{}", rule.dimmed());
    let _ = writeln!(out, "Download:   {}", format_rate(network.download_rate_mbps, "Mbps").green());
    let _ = writeln!(out, "Upload:     {}", format_rate(network.upload_rate_mbps, "Mbps").blue());
    let _ = writeln!(out, "Received:   {}", format_bytes(network.bytes_received));
    let _ = writeln!(out, "Sent:       {}", format_bytes(network.bytes_sent));
    out.push('\n');

    let taken_at = sample.taken_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S");
    let _ = writeln!(out, "{}", border.dimmed());
    let _ = writeln!(out, "{}", format!("Last update: {taken_at}").dimmed());
    let _ = write!(out, "{}", "Press Ctrl+C to exit".dimmed());
    out
}

fn usage_line(percent: f64) -> String {
    format!(
        "{} {}",
        format_percent(percent).color(usage_color(percent)),
        progress_bar(percent, BAR_WIDTH)
    )
}

pub fn render_alert(alert: &Alert) -> String {
    format!(
        "ALERT: {} is {:.2} (threshold {} {})",
        alert.metric.as_str().to_uppercase(),
        alert.value,
        alert.comparator,
        alert.threshold
    )
    .bold()
    .red()
    .to_string()
}

pub fn render_error(err: &CollectionError) -> String {
    format!("{} {}", "Error:".bold().red(), err)
}

pub fn render_started() -> String {
    format!(
        "{}\n{}\n",
        "vigild started".green(),
        "Collecting system metrics...".dimmed()
    )
}

pub fn render_stopped() -> String {
    format!("\n{}", "vigild stopped.".yellow())
}

pub fn render_system_info(info: &SystemInfo) -> String {
    let unknown = || "unknown".to_string();
    let mut out = String::new();
    let _ = writeln!(out, "{}", "System information".bold().bright_cyan());
    let _ = writeln!(out, "{}", "=".repeat(40));
    let _ = writeln!(out, "Host:       {}", info.host_name.clone().unwrap_or_else(unknown));
    let _ = writeln!(
        out,
        "OS:         {} {}",
        info.os_name.clone().unwrap_or_else(unknown),
        info.os_version.clone().unwrap_or_default()
    );
    let _ = writeln!(out, "Kernel:     {}", info.kernel_version.clone().unwrap_or_else(unknown));
    let _ = writeln!(out, "Arch:       {}", info.arch);
    let _ = writeln!(out, "CPU:        {}", info.cpu_brand.clone().unwrap_or_else(unknown));
    match info.cpu_physical_cores {
        Some(physical) => {
            let _ = writeln!(out, "Cores:      {} physical, {} logical", physical, info.cpu_cores);
        }
        None => {
            let _ = writeln!(out, "Cores:      {}", info.cpu_cores);
        }
    }
    let _ = writeln!(out, "Speed:      {:.2} GHz", info.cpu_clock_ghz);
    let _ = writeln!(out, "Memory:     {}", format_bytes(info.memory_total_bytes));
    let _ = write!(out, "Uptime:     {}", format_uptime(info.uptime_seconds));
    out
}

/// Prints every event of `subscription` to stdout until the hub drops it.
pub fn spawn_renderer(mut subscription: Subscription) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = subscription.recv().await {
            match event {
                MonitorEvent::Started => println!("{}", render_started()),
                MonitorEvent::Sample(sample) => {
                    print!("{CLEAR_SCREEN}");
                    println!("{}", render_sample(&sample));
                }
                MonitorEvent::Alert(alert) => println!("{}", render_alert(&alert)),
                MonitorEvent::Error(err) => eprintln!("{}", render_error(&err)),
                MonitorEvent::Stopped => println!("{}", render_stopped()),
            }
        }
    })
}

pub fn usage_color(percent: f64) -> Color {
    if percent < 50.0 {
        Color::Green
    } else if percent < 80.0 {
        Color::Yellow
    } else {
        Color::Red
    }
}

pub fn progress_bar(percent: f64, width: usize) -> String {
    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * width as f64).round() as usize;
    format!("{}{}", "█".repeat(filled), "░".repeat(width - filled))
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

pub fn format_percent(percent: f64) -> String {
    format!("{percent:.1}%")
}

pub fn format_rate(value: f64, unit: &str) -> String {
    format!("{value:.2} {unit}")
}

pub fn format_uptime(seconds: u64) -> String {
    let days = seconds / 86_400;
    let hours = (seconds % 86_400) / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m {secs}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}
