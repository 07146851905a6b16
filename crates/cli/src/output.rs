//! Output formatting utilities
//!
//! Sinks rendering each published snapshot either as a redrawn table or as
//! one JSON array per line.

use chrono::Local;
use clap::ValueEnum;
use colored::{Color, Colorize};
use kubetop_lib::{Stats, StatsSink};
use std::io::{ErrorKind, Write};
use std::sync::Arc;
use tabled::{settings::Style, Table, Tabled};
use tokio::sync::broadcast;
use tracing::warn;

/// Shown in place of a usage value that is not known yet
const PENDING_GLYPH: &str = "⏱";

/// Clear screen and move the cursor home
const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

const MIB: f64 = 1024.0 * 1024.0;

/// Output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

impl OutputFormat {
    /// Sink for this format. `shutdown` is signalled once stdout is closed.
    pub fn sink(self, shutdown: broadcast::Sender<()>) -> Arc<dyn StatsSink> {
        let out = FrameWriter::new(shutdown);
        match self {
            OutputFormat::Table => Arc::new(TableSink { out }),
            OutputFormat::Json => Arc::new(JsonSink { out }),
        }
    }
}

/// Writes whole frames to stdout and stops the dashboard when the reader
/// goes away (`kubetop -f json | head -n1`)
#[derive(Clone)]
pub struct FrameWriter {
    shutdown: broadcast::Sender<()>,
}

impl FrameWriter {
    pub fn new(shutdown: broadcast::Sender<()>) -> Self {
        Self { shutdown }
    }

    fn write(&self, frame: &str) {
        self.write_to(&mut std::io::stdout().lock(), frame);
    }

    fn write_to<W: Write>(&self, out: &mut W, frame: &str) {
        match out.write_all(frame.as_bytes()).and_then(|_| out.flush()) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                warn!(error = %e, "Output closed, stopping");
                let _ = self.shutdown.send(());
            }
            Err(e) => warn!(error = %e, "Failed to write output"),
        }
    }
}

#[derive(Tabled)]
struct StatsRow {
    #[tabled(rename = "NAMESPACE")]
    namespace: String,
    #[tabled(rename = "NODE")]
    node: String,
    #[tabled(rename = "POD")]
    pod: String,
    #[tabled(rename = "CONTAINER")]
    container: String,
    #[tabled(rename = "CPU")]
    cpu: String,
    #[tabled(rename = "MEMORY")]
    memory: String,
}

impl From<&Stats> for StatsRow {
    fn from(stats: &Stats) -> Self {
        Self {
            namespace: stats.namespace.clone(),
            node: stats.node_name.clone(),
            pod: stats.pod_name.clone(),
            container: stats.container_name.clone(),
            cpu: colorize(cpu_text(stats), stats.cpu_usage_percent),
            memory: colorize(memory_text(stats), stats.memory_usage_percent),
        }
    }
}

/// Full-screen table redrawn every tick
pub struct TableSink {
    out: FrameWriter,
}

impl StatsSink for TableSink {
    fn publish(&self, stats: Vec<Stats>) {
        self.out.write(&render_table(&stats));
    }
}

/// One JSON array per tick on stdout
pub struct JsonSink {
    out: FrameWriter,
}

impl StatsSink for JsonSink {
    fn publish(&self, stats: Vec<Stats>) {
        if let Some(line) = render_json(&stats) {
            self.out.write(&line);
        }
    }
}

fn render_table(stats: &[Stats]) -> String {
    let mut out = String::from(CLEAR_SCREEN);
    out.push_str(&summary_line(stats));
    out.push('\n');

    if stats.is_empty() {
        out.push_str(&format!("{}\n", "Waiting for container metrics...".yellow()));
        return out;
    }

    let rows: Vec<StatsRow> = stats.iter().map(StatsRow::from).collect();
    out.push_str(&Table::new(rows).with(Style::rounded()).to_string());
    out.push('\n');
    out
}

fn render_json(stats: &[Stats]) -> Option<String> {
    match serde_json::to_string(stats) {
        Ok(json) => Some(json + "\n"),
        Err(e) => {
            warn!(error = %e, "Failed to serialize stats");
            None
        }
    }
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Header with container count and cluster totals
fn summary_line(stats: &[Stats]) -> String {
    let total_cpu: f64 = stats.iter().map(|s| s.cpu_usage_milli.max(0.0)).sum();
    let total_memory: u64 = stats.iter().map(|s| s.memory_bytes).sum();

    format!(
        "{}  {} containers  cpu {}  memory {}  updated {}",
        "kubetop".bold(),
        stats.len(),
        format_cpu(total_cpu.round() as u64),
        format_bytes(total_memory),
        Local::now().format("%H:%M:%S"),
    )
}

/// CPU cell: `used/limit mCPU (pct%)`, or just usage without a limit
fn cpu_text(stats: &Stats) -> String {
    if stats.cpu_usage_milli <= 0.0 {
        return PENDING_GLYPH.to_string();
    }
    if stats.cpu_limit_milli == 0 {
        return format!("{:.0}mCPU", stats.cpu_usage_milli);
    }
    format!(
        "{:.0}/{}mCPU ({:.1}%)",
        stats.cpu_usage_milli, stats.cpu_limit_milli, stats.cpu_usage_percent
    )
}

/// Memory cell: `used/limit MiB (pct%)`, or just usage without a limit
fn memory_text(stats: &Stats) -> String {
    if stats.memory_bytes == 0 {
        return PENDING_GLYPH.to_string();
    }
    let used = stats.memory_bytes as f64 / MIB;
    if stats.memory_limit_bytes == 0 {
        return format!("{:.0}MiB", used);
    }
    format!(
        "{:.0}/{:.0}MiB ({:.1}%)",
        used,
        stats.memory_limit_bytes as f64 / MIB,
        stats.memory_usage_percent
    )
}

/// Color for a percent-of-limit value
fn threshold_color(percent: f64) -> Option<Color> {
    if percent > 90.0 {
        Some(Color::Red)
    } else if percent > 80.0 {
        Some(Color::Yellow)
    } else {
        None
    }
}

fn colorize(text: String, percent: f64) -> String {
    match threshold_color(percent) {
        Some(color) => text.color(color).to_string(),
        None => text,
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2}Gi", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2}Mi", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2}Ki", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

/// Format millicores as human-readable string
pub fn format_cpu(millicores: u64) -> String {
    if millicores >= 1000 {
        format!("{:.1}", millicores as f64 / 1000.0)
    } else {
        format!("{}m", millicores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> Stats {
        Stats {
            namespace: "shop".to_string(),
            node_name: "worker-1".to_string(),
            pod_name: "api-0".to_string(),
            container_name: "api".to_string(),
            cpu_usage_milli: 150.4,
            cpu_usage_percent: 75.2,
            cpu_limit_milli: 200,
            memory_bytes: 96 * 1024 * 1024,
            memory_usage_percent: 37.5,
            memory_limit_bytes: 256 * 1024 * 1024,
            ..Default::default()
        }
    }

    #[test]
    fn test_cpu_text() {
        assert_eq!(cpu_text(&stats()), "150/200mCPU (75.2%)");

        let mut no_limit = stats();
        no_limit.cpu_limit_milli = 0;
        assert_eq!(cpu_text(&no_limit), "150mCPU");

        let mut pending = stats();
        pending.cpu_usage_milli = 0.0;
        assert_eq!(cpu_text(&pending), PENDING_GLYPH);
    }

    #[test]
    fn test_memory_text() {
        assert_eq!(memory_text(&stats()), "96/256MiB (37.5%)");

        let mut no_limit = stats();
        no_limit.memory_limit_bytes = 0;
        assert_eq!(memory_text(&no_limit), "96MiB");

        let mut pending = stats();
        pending.memory_bytes = 0;
        assert_eq!(memory_text(&pending), PENDING_GLYPH);
    }

    #[test]
    fn test_threshold_color() {
        assert_eq!(threshold_color(95.0), Some(Color::Red));
        assert_eq!(threshold_color(85.0), Some(Color::Yellow));
        assert_eq!(threshold_color(80.0), None);
        assert_eq!(threshold_color(0.0), None);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512B");
        assert_eq!(format_bytes(1536), "1.50Ki");
        assert_eq!(format_bytes(128 * 1024 * 1024), "128.00Mi");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00Gi");
    }

    #[test]
    fn test_format_cpu() {
        assert_eq!(format_cpu(250), "250m");
        assert_eq!(format_cpu(1500), "1.5");
    }

    #[test]
    fn test_render_lists_every_container() {
        let mut other = stats();
        other.pod_name = "api-1".to_string();

        let frame = render_table(&[stats(), other]);
        assert!(frame.starts_with(CLEAR_SCREEN));
        assert!(frame.contains("NAMESPACE"));
        assert!(frame.contains("api-0"));
        assert!(frame.contains("api-1"));
        assert!(frame.contains("2 containers"));
    }

    #[test]
    fn test_render_empty_snapshot() {
        let frame = render_table(&[]);
        assert!(frame.contains("Waiting for container metrics"));
    }

    #[test]
    fn test_render_json_is_one_line() {
        let line = render_json(&[stats()]).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);

        let parsed: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(parsed[0]["pod_name"], "api-0");
    }

    /// Writer whose every write fails with `kind`
    struct FailingWriter {
        kind: ErrorKind,
    }

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(self.kind.into())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(self.kind.into())
        }
    }

    #[test]
    fn test_closed_output_stops_dashboard() {
        let (tx, mut rx) = broadcast::channel(1);
        let out = FrameWriter::new(tx);
        let line = render_json(&[stats()]).unwrap();

        out.write_to(&mut FailingWriter { kind: ErrorKind::BrokenPipe }, &line);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_other_write_errors_keep_running() {
        let (tx, mut rx) = broadcast::channel(1);
        let out = FrameWriter::new(tx);

        out.write_to(
            &mut FailingWriter { kind: ErrorKind::Other },
            &render_table(&[stats()]),
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_frame_written_whole() {
        let (tx, mut rx) = broadcast::channel(1);
        let out = FrameWriter::new(tx);
        let mut buf = Vec::new();
        let line = render_json(&[]).unwrap();

        out.write_to(&mut buf, &line);
        assert_eq!(String::from_utf8(buf).unwrap(), "[]\n");
        assert!(rx.try_recv().is_err());
    }
}
