//! 节点探测
//!
//! `ProbeEngine` 用固定数量的 worker 从共享队列取节点，每个 worker 一次只探测一个节点；
//! 单个节点失败或超时只记录在它自己的结果里，不会中断整批探测。

mod remote;
mod tcp;

pub use remote::RemoteCheckBackend;
pub use tcp::TcpConnectBackend;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::proxy::{NodeId, ProxyNode};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// 取不到边缘区域时的占位
pub const UNKNOWN_REGION: &str = "Unknown";

/// 探测模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMode {
    /// TCP 建连耗时
    Tcp,
    /// 完整 HTTP 响应耗时
    Http,
    /// 下载速度
    Download,
}

impl ProbeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeMode::Tcp => "tcp",
            ProbeMode::Http => "http",
            ProbeMode::Download => "download",
        }
    }
}

impl fmt::Display for ProbeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "tcp" => Ok(ProbeMode::Tcp),
            "http" => Ok(ProbeMode::Http),
            "download" => Ok(ProbeMode::Download),
            other => Err(Error::Unsupported(other.to_string())),
        }
    }
}

/// 各模式的硬超时，TCP 最短、下载最长
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeTimeouts {
    pub tcp: Duration,
    pub http: Duration,
    pub download: Duration,
}

impl Default for ProbeTimeouts {
    fn default() -> Self {
        Self {
            tcp: Duration::from_millis(10_000),
            http: Duration::from_millis(15_000),
            download: Duration::from_millis(30_000),
        }
    }
}

impl ProbeTimeouts {
    pub fn for_mode(&self, mode: ProbeMode) -> Duration {
        match mode {
            ProbeMode::Tcp => self.tcp,
            ProbeMode::Http => self.http,
            ProbeMode::Download => self.download,
        }
    }
}

/// 一次探测的结果快照
///
/// 数值字段为 `None` 表示未测量或该模式不适用；失败时本模式测量的字段为 `-1`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub tcp_latency_ms: Option<i64>,
    pub http_latency_ms: Option<i64>,
    #[serde(rename = "downloadSpeedKBps")]
    pub download_speed_kbps: Option<f64>,
    pub edge_region: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeResult {
    /// 失败标记
    pub const FAILED: i64 = -1;

    pub fn succeeded(measurement: Measurement) -> Self {
        Self {
            tcp_latency_ms: measurement.tcp_latency_ms,
            http_latency_ms: measurement.http_latency_ms,
            download_speed_kbps: measurement.download_speed_kbps,
            edge_region: measurement
                .edge_region
                .unwrap_or_else(|| UNKNOWN_REGION.to_string()),
            timestamp: Utc::now(),
            success: true,
            error: None,
        }
    }

    pub fn failed(mode: ProbeMode, edge_region: Option<&str>, error: impl Into<String>) -> Self {
        let mut result = Self {
            tcp_latency_ms: None,
            http_latency_ms: None,
            download_speed_kbps: None,
            edge_region: edge_region.unwrap_or(UNKNOWN_REGION).to_string(),
            timestamp: Utc::now(),
            success: false,
            error: Some(error.into()),
        };
        match mode {
            ProbeMode::Tcp => result.tcp_latency_ms = Some(Self::FAILED),
            ProbeMode::Http => result.http_latency_ms = Some(Self::FAILED),
            ProbeMode::Download => result.download_speed_kbps = Some(Self::FAILED as f64),
        }
        result
    }
}

/// 后端返回的原始测量值
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Measurement {
    pub tcp_latency_ms: Option<i64>,
    pub http_latency_ms: Option<i64>,
    pub download_speed_kbps: Option<f64>,
    pub edge_region: Option<String>,
}

/// 下载速度 = 大小(KB) / 耗时(ms) * 1000，保留一位小数
pub fn download_speed_kbps(size_kb: f64, elapsed_ms: f64) -> Option<f64> {
    if elapsed_ms <= 0.0 || size_kb < 0.0 {
        return None;
    }
    Some((size_kb / elapsed_ms * 1000.0 * 10.0).round() / 10.0)
}

/// 探测后端：对单个节点做一次测量
#[async_trait]
pub trait ProbeBackend: Send + Sync {
    async fn probe(&self, node: &ProxyNode, mode: ProbeMode) -> Result<Measurement>;
}

/// 探测统计
#[derive(Debug, Default)]
pub struct ProbeStats {
    pub total: AtomicU64,
    pub completed: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
}

impl ProbeStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
        self.succeeded.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
    }

    fn record(&self, success: bool) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if success {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn get_success_rate(&self) -> f64 {
        let total = self.total.load(Ordering::Relaxed);
        let succeeded = self.succeeded.load(Ordering::Relaxed);

        if total > 0 {
            (succeeded as f64 / total as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// 进度回调参数
///
/// 回调触发时本节点的结果已经写入 `results`。
pub struct ProbeProgress<'a> {
    pub node: &'a ProxyNode,
    pub result: &'a ProbeResult,
    pub completed: usize,
    pub total: usize,
    pub results: &'a HashMap<NodeId, ProbeResult>,
}

struct BatchState<'a, F> {
    queue: VecDeque<&'a ProxyNode>,
    results: HashMap<NodeId, ProbeResult>,
    completed: usize,
    on_progress: F,
}

pub struct ProbeEngine {
    backend: Arc<dyn ProbeBackend>,
    concurrency: usize,
    timeouts: ProbeTimeouts,
    stats: Arc<ProbeStats>,
}

impl ProbeEngine {
    pub fn new(
        backend: Arc<dyn ProbeBackend>,
        concurrency: usize,
        timeouts: ProbeTimeouts,
    ) -> Self {
        Self {
            backend,
            concurrency: concurrency.max(1),
            timeouts,
            stats: Arc::new(ProbeStats::new()),
        }
    }

    pub fn from_config(backend: Arc<dyn ProbeBackend>, config: &Config) -> Self {
        Self::new(backend, config.concurrent, config.probe_timeouts())
    }

    pub fn get_stats(&self) -> Arc<ProbeStats> {
        self.stats.clone()
    }

    /// 只有地址完整且可见的节点参与探测，其余静默跳过
    pub fn eligible(node: &ProxyNode) -> bool {
        node.is_probeable() && node.visible
    }

    pub async fn run_batch(
        &self,
        nodes: &[ProxyNode],
        mode: ProbeMode,
    ) -> HashMap<NodeId, ProbeResult> {
        self.run_batch_with_progress(nodes, mode, |_| {}).await
    }

    /// 批量探测，返回 节点 id → 结果
    ///
    /// worker 数量为 min(并发上限, 可探测节点数)。`on_progress` 按完成顺序对每个节点调用一次，
    /// `completed` 从 1 递增到 `total`。
    pub async fn run_batch_with_progress<F>(
        &self,
        nodes: &[ProxyNode],
        mode: ProbeMode,
        on_progress: F,
    ) -> HashMap<NodeId, ProbeResult>
    where
        F: FnMut(ProbeProgress<'_>) + Send,
    {
        let queue: VecDeque<&ProxyNode> = nodes.iter().filter(|n| Self::eligible(n)).collect();
        let total = queue.len();
        self.stats.reset(total as u64);
        if total == 0 {
            return HashMap::new();
        }

        let workers = self.concurrency.min(total);
        info!("开始 {} 探测: {} 个节点, {} 个并发", mode, total, workers);

        let state = Mutex::new(BatchState {
            queue,
            results: HashMap::with_capacity(total),
            completed: 0,
            on_progress,
        });
        join_all((0..workers).map(|_| self.worker(&state, mode, total))).await;

        let results = state.into_inner().results;
        info!(
            "{} 探测完成: 成功 {}, 失败 {}",
            mode,
            self.stats.succeeded.load(Ordering::Relaxed),
            self.stats.failed.load(Ordering::Relaxed)
        );
        results
    }

    async fn worker<'a, F>(&self, state: &Mutex<BatchState<'a, F>>, mode: ProbeMode, total: usize)
    where
        F: FnMut(ProbeProgress<'_>) + Send,
    {
        loop {
            // 取节点和写结果各自短暂持锁，探测期间不持锁
            let node = match state.lock().await.queue.pop_front() {
                Some(node) => node,
                None => break,
            };

            let result = self.probe_one(node, mode).await;
            self.stats.record(result.success);

            let mut guard = state.lock().await;
            let BatchState {
                results,
                completed,
                on_progress,
                ..
            } = &mut *guard;
            results.insert(node.id.clone(), result);
            *completed += 1;
            if let Some(result) = results.get(&node.id) {
                on_progress(ProbeProgress {
                    node,
                    result,
                    completed: *completed,
                    total,
                    results: &*results,
                });
            }
        }
    }

    async fn probe_one(&self, node: &ProxyNode, mode: ProbeMode) -> ProbeResult {
        let limit = self.timeouts.for_mode(mode);
        match tokio::time::timeout(limit, self.backend.probe(node, mode)).await {
            Ok(Ok(measurement)) => ProbeResult::succeeded(measurement),
            Ok(Err(e)) => {
                debug!("{} 探测失败: {}", node.name, e);
                ProbeResult::failed(mode, e.edge_region(), e.to_string())
            }
            Err(_) => {
                debug!("{} 探测超时", node.name);
                let e = Error::Timeout(limit.as_millis() as u64);
                ProbeResult::failed(mode, None, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::Protocol;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicUsize;

    /// 按服务器地址决定延迟和成败的假后端，同时记录并发峰值
    #[derive(Default)]
    struct FakeBackend {
        delays: HashMap<String, Duration>,
        failing: HashSet<String>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        probed: StdMutex<Vec<String>>,
    }

    struct InFlight<'a>(&'a AtomicUsize);

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl ProbeBackend for FakeBackend {
        async fn probe(&self, node: &ProxyNode, _mode: ProbeMode) -> Result<Measurement> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            // 超时会直接丢弃这个 future，计数要在 drop 时归还
            let _guard = InFlight(&self.in_flight);
            self.probed.lock().unwrap().push(node.server.clone());

            let delay = self
                .delays
                .get(&node.server)
                .copied()
                .unwrap_or(Duration::from_millis(5));
            tokio::time::sleep(delay).await;

            if self.failing.contains(&node.server) {
                return Err(Error::ProbeStatus {
                    status: 502,
                    region: "NRT".to_string(),
                });
            }
            Ok(Measurement {
                tcp_latency_ms: Some(delay.as_millis() as i64),
                edge_region: Some("HKG".to_string()),
                ..Default::default()
            })
        }
    }

    fn node(i: usize) -> ProxyNode {
        ProxyNode::new(
            NodeId::next("test"),
            format!("node-{}", i),
            Protocol::Trojan,
            format!("10.0.0.{}", i),
            443,
            format!("trojan://pw@10.0.0.{}:443#node-{}", i, i),
        )
    }

    fn short_timeouts() -> ProbeTimeouts {
        ProbeTimeouts {
            tcp: Duration::from_millis(100),
            http: Duration::from_millis(200),
            download: Duration::from_millis(300),
        }
    }

    #[tokio::test]
    async fn test_batch_with_timeouts() {
        let nodes: Vec<ProxyNode> = (0..12).map(node).collect();
        let mut backend = FakeBackend::default();
        for i in [2, 7, 11] {
            backend
                .delays
                .insert(format!("10.0.0.{}", i), Duration::from_secs(5));
        }
        let backend = Arc::new(backend);
        let engine = ProbeEngine::new(backend.clone(), 5, short_timeouts());

        let mut seen = Vec::new();
        let results = engine
            .run_batch_with_progress(&nodes, ProbeMode::Tcp, |p| {
                assert!(p.results.contains_key(&p.node.id));
                assert_eq!(p.results.len(), p.completed);
                assert_eq!(p.total, 12);
                seen.push(p.completed);
            })
            .await;

        assert_eq!(results.len(), 12);
        let failed: Vec<&ProbeResult> = results.values().filter(|r| !r.success).collect();
        assert_eq!(failed.len(), 3);
        assert!(failed.iter().all(|r| r.tcp_latency_ms == Some(ProbeResult::FAILED)));
        assert!(failed.iter().all(|r| r.http_latency_ms.is_none()));
        assert!(failed.iter().all(|r| r.edge_region == UNKNOWN_REGION));
        assert_eq!(seen, (1..=12).collect::<Vec<_>>());

        assert!(backend.peak.load(Ordering::SeqCst) <= 5);
        let probed = backend.probed.lock().unwrap().clone();
        let unique: HashSet<&String> = probed.iter().collect();
        assert_eq!(probed.len(), 12);
        assert_eq!(unique.len(), 12);

        let stats = engine.get_stats();
        assert_eq!(stats.total.load(Ordering::Relaxed), 12);
        assert_eq!(stats.failed.load(Ordering::Relaxed), 3);
        assert_eq!(stats.succeeded.load(Ordering::Relaxed), 9);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let nodes: Vec<ProxyNode> = (0..4).map(node).collect();
        let mut backend = FakeBackend::default();
        backend.failing.insert("10.0.0.1".to_string());
        let engine = ProbeEngine::new(Arc::new(backend), 2, short_timeouts());

        let results = engine.run_batch(&nodes, ProbeMode::Http).await;
        assert_eq!(results.len(), 4);

        let bad = &results[&nodes[1].id];
        assert!(!bad.success);
        assert_eq!(bad.http_latency_ms, Some(-1));
        assert_eq!(bad.tcp_latency_ms, None);
        assert_eq!(bad.edge_region, "NRT");
        assert!(bad.error.as_deref().unwrap_or_default().contains("502"));

        let good = &results[&nodes[0].id];
        assert!(good.success);
        assert_eq!(good.edge_region, "HKG");
    }

    #[tokio::test]
    async fn test_ineligible_nodes_are_skipped() {
        let mut hidden = node(1);
        hidden.visible = false;
        let mut no_port = node(2);
        no_port.port = 0;
        let nodes = vec![node(0), hidden, no_port, ProxyNode::unknown("garbage")];

        let backend = Arc::new(FakeBackend::default());
        let engine = ProbeEngine::new(backend.clone(), 5, short_timeouts());
        let mut calls = 0;
        let results = engine
            .run_batch_with_progress(&nodes, ProbeMode::Tcp, |_| calls += 1)
            .await;

        assert_eq!(results.len(), 1);
        assert!(results.contains_key(&nodes[0].id));
        assert_eq!(calls, 1);
        assert_eq!(backend.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let engine = ProbeEngine::new(Arc::new(FakeBackend::default()), 0, short_timeouts());
        let results = engine.run_batch(&[], ProbeMode::Download).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_download_timeout_sentinel() {
        let mut backend = FakeBackend::default();
        backend
            .delays
            .insert("10.0.0.0".to_string(), Duration::from_secs(5));
        let engine = ProbeEngine::new(Arc::new(backend), 1, short_timeouts());
        let nodes = vec![node(0)];

        let results = engine.run_batch(&nodes, ProbeMode::Download).await;
        let r = &results[&nodes[0].id];
        assert!(!r.success);
        assert_eq!(r.download_speed_kbps, Some(-1.0));
        assert_eq!(r.tcp_latency_ms, None);
        assert!(r.error.as_deref().unwrap_or_default().contains("300"));
    }

    #[test]
    fn test_download_speed_formula() {
        assert_eq!(download_speed_kbps(512.0, 1000.0), Some(512.0));
        assert_eq!(download_speed_kbps(100.0, 3000.0), Some(33.3));
        assert_eq!(download_speed_kbps(1.0, 0.0), None);
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("TCP".parse::<ProbeMode>().unwrap(), ProbeMode::Tcp);
        assert_eq!("download".parse::<ProbeMode>().unwrap(), ProbeMode::Download);
        assert!("icmp".parse::<ProbeMode>().is_err());
    }

    #[test]
    fn test_result_serialises_camel_case() {
        let r = ProbeResult::failed(ProbeMode::Tcp, None, "x");
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["tcpLatencyMs"], -1);
        assert!(json["httpLatencyMs"].is_null());
        assert!(json["downloadSpeedKBps"].is_null());
        assert_eq!(json["edgeRegion"], "Unknown");
        assert_eq!(json["success"], false);
    }
}
