use crate::check::{ProbeMode, ProbeProgress};
use crate::config::Config;
use crate::ui::format::{format_latency, format_speed};
use indicatif::{ProgressBar, ProgressStyle};

/// 探测进度条，`print_progress` 关闭时所有方法都是空操作
#[derive(Clone)]
pub struct ProgressTracker {
    progress: Option<ProgressBar>,
    mode: ProbeMode,
}

impl ProgressTracker {
    pub fn new(config: &Config, mode: ProbeMode) -> Self {
        if !config.print_progress {
            return Self {
                progress: None,
                mode,
            };
        }

        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .map(|s| s.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());

        let progress = ProgressBar::new(0);
        progress.set_style(style);

        Self {
            progress: Some(progress),
            mode,
        }
    }

    pub fn set_total_nodes(&self, total: u64) {
        if let Some(pb) = &self.progress {
            pb.set_length(total);
            pb.set_position(0);
        }
    }

    /// 每完成一个节点调用一次
    pub fn record(&self, progress: &ProbeProgress<'_>) {
        let Some(pb) = &self.progress else {
            return;
        };

        let result = progress.result;
        let value = match self.mode {
            ProbeMode::Tcp => format_latency(result.tcp_latency_ms),
            ProbeMode::Http => format_latency(result.http_latency_ms),
            ProbeMode::Download => format_speed(result.download_speed_kbps),
        };
        let mark = if result.success { "✅" } else { "❌" };

        pb.set_position(progress.completed as u64);
        pb.set_message(format!("{} {} {}", mark, progress.node.name, value));
    }

    pub fn finalize(&self) {
        if let Some(pb) = &self.progress {
            pb.finish_with_message("检测完成");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.progress.is_some()
    }
}
