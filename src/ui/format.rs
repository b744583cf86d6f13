//! 探测结果的展示格式

/// 延迟等级
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingLevel {
    Good,
    Avg,
    Bad,
    Unknown,
}

/// < 200ms 为好，< 500ms 一般，其余（含失败）为差
pub fn ping_level(latency_ms: Option<i64>) -> PingLevel {
    match latency_ms {
        None => PingLevel::Unknown,
        Some(ms) if ms < 0 => PingLevel::Bad,
        Some(ms) if ms < 200 => PingLevel::Good,
        Some(ms) if ms < 500 => PingLevel::Avg,
        Some(_) => PingLevel::Bad,
    }
}

pub fn format_latency(latency_ms: Option<i64>) -> String {
    match latency_ms {
        None => "-".to_string(),
        Some(ms) if ms < 0 => "Timeout".to_string(),
        Some(ms) => format!("{}ms", ms),
    }
}

pub fn format_speed(speed_kbps: Option<f64>) -> String {
    match speed_kbps {
        None => "-".to_string(),
        Some(speed) if speed < 0.0 => "Error".to_string(),
        Some(speed) if speed < 1024.0 => format!("{:.1} KB/s", speed),
        Some(speed) => format!("{:.2} MB/s", speed / 1024.0),
    }
}
