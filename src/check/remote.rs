//! 通过远端 `/check` 端点探测

use super::{Measurement, ProbeBackend, ProbeMode, UNKNOWN_REGION, download_speed_kbps};
use crate::error::{Error, Result};
use crate::proxy::ProxyNode;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use std::time::Instant;

/// 下载模式返回的 JSON，0 视为缺失
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadReport {
    tcp_latency: Option<f64>,
    http_latency: Option<f64>,
    download_speed: Option<f64>,
    #[serde(rename = "sizeKB")]
    size_kb: Option<f64>,
}

fn non_zero(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v != 0.0)
}

/// 从 `cf-ray`（形如 `8a1b2c3d4e5f-HKG`）取出边缘节点代码
fn edge_region(headers: &HeaderMap) -> String {
    headers
        .get("cf-ray")
        .and_then(|v| v.to_str().ok())
        .and_then(|ray| ray.split('-').nth(1))
        .filter(|region| !region.is_empty())
        .unwrap_or(UNKNOWN_REGION)
        .to_string()
}

fn header_latency(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|v| *v > 0)
}

pub struct RemoteCheckBackend {
    client: Client,
    api_base: String,
}

impl RemoteCheckBackend {
    pub fn new(api_base: &str, user_agent: &str) -> Result<Self> {
        let client = Client::builder().user_agent(user_agent).build()?;
        Ok(Self::with_client(client, api_base))
    }

    pub fn with_client(client: Client, api_base: &str) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ProbeBackend for RemoteCheckBackend {
    async fn probe(&self, node: &ProxyNode, mode: ProbeMode) -> Result<Measurement> {
        let endpoint = format!("{}/check", self.api_base);
        let start = Instant::now();

        let response = self
            .client
            .get(&endpoint)
            .query(&[
                ("ip", node.server.clone()),
                ("port", node.port.to_string()),
                ("mode", mode.as_str().to_string()),
            ])
            .send()
            .await?;
        let elapsed = start.elapsed().as_millis() as i64;

        let region = edge_region(response.headers());
        let status = response.status();
        if !status.is_success() {
            return Err(Error::ProbeStatus {
                status: status.as_u16(),
                region,
            });
        }

        let measurement = match mode {
            ProbeMode::Tcp => Measurement {
                tcp_latency_ms: Some(elapsed),
                ..Default::default()
            },
            ProbeMode::Http => Measurement {
                tcp_latency_ms: header_latency(response.headers(), "x-tcp-latency"),
                http_latency_ms: Some(elapsed),
                ..Default::default()
            },
            ProbeMode::Download => {
                let report: DownloadReport = response.json().await?;
                let http_latency = non_zero(report.http_latency);
                let speed = non_zero(report.download_speed).or_else(|| {
                    match (non_zero(report.size_kb), http_latency) {
                        (Some(size), Some(ms)) => download_speed_kbps(size, ms),
                        _ => None,
                    }
                });
                Measurement {
                    tcp_latency_ms: non_zero(report.tcp_latency).map(|v| v.round() as i64),
                    http_latency_ms: http_latency.map(|v| v.round() as i64),
                    download_speed_kbps: speed,
                    ..Default::default()
                }
            }
        };

        Ok(Measurement {
            edge_region: Some(region),
            ..measurement
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::{ProbeEngine, ProbeTimeouts};
    use crate::proxy::{NodeId, Protocol};
    use mockito::Matcher;
    use std::sync::Arc;

    fn node() -> ProxyNode {
        ProxyNode::new(
            NodeId::next("test"),
            "n".to_string(),
            Protocol::Vless,
            "1.2.3.4".to_string(),
            8443,
            "vless://u@1.2.3.4:8443#n".to_string(),
        )
    }

    fn check_query(mode: &str) -> Matcher {
        Matcher::AllOf(vec![
            Matcher::UrlEncoded("ip".into(), "1.2.3.4".into()),
            Matcher::UrlEncoded("port".into(), "8443".into()),
            Matcher::UrlEncoded("mode".into(), mode.into()),
        ])
    }

    #[tokio::test]
    async fn test_tcp_mode_uses_elapsed_and_cf_ray() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/check")
            .match_query(check_query("tcp"))
            .with_status(200)
            .with_header("cf-ray", "8a1b2c3d4e5f-HKG")
            .with_body("OK")
            .create_async()
            .await;

        let api_base = format!("{}/api/", server.url());
        let backend = RemoteCheckBackend::with_client(Client::new(), &api_base);
        let m = backend.probe(&node(), ProbeMode::Tcp).await.unwrap();
        assert!(m.tcp_latency_ms.is_some());
        assert_eq!(m.http_latency_ms, None);
        assert_eq!(m.edge_region.as_deref(), Some("HKG"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_mode_reads_tcp_header() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/check")
            .match_query(check_query("http"))
            .with_status(200)
            .with_header("x-tcp-latency", "42")
            .with_body("{}")
            .create_async()
            .await;

        let backend = RemoteCheckBackend::new(&server.url(), "test-agent").unwrap();
        let m = backend.probe(&node(), ProbeMode::Http).await.unwrap();
        assert_eq!(m.tcp_latency_ms, Some(42));
        assert!(m.http_latency_ms.is_some());
        assert_eq!(m.edge_region.as_deref(), Some(UNKNOWN_REGION));
    }

    #[tokio::test]
    async fn test_download_mode_parses_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/check")
            .match_query(check_query("download"))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success":true,"httpLatency":2000,"sizeKB":1024,"tcpLatency":0}"#)
            .create_async()
            .await;

        let backend = RemoteCheckBackend::with_client(Client::new(), &server.url());
        let m = backend.probe(&node(), ProbeMode::Download).await.unwrap();
        assert_eq!(m.tcp_latency_ms, None);
        assert_eq!(m.http_latency_ms, Some(2000));
        assert_eq!(m.download_speed_kbps, Some(512.0));
    }

    #[tokio::test]
    async fn test_non_2xx_becomes_failed_result() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/check")
            .match_query(Matcher::Any)
            .with_status(504)
            .with_header("cf-ray", "abc-SJC")
            .with_body(r#"{"error":"Speed test failed"}"#)
            .create_async()
            .await;

        let backend = Arc::new(RemoteCheckBackend::with_client(Client::new(), &server.url()));
        let err = backend.probe(&node(), ProbeMode::Http).await.unwrap_err();
        assert_eq!(err.edge_region(), Some("SJC"));

        let engine = ProbeEngine::new(backend, 3, ProbeTimeouts::default());
        let nodes = vec![node()];
        let results = engine.run_batch(&nodes, ProbeMode::Http).await;
        let r = &results[&nodes[0].id];
        assert!(!r.success);
        assert_eq!(r.http_latency_ms, Some(-1));
        assert_eq!(r.edge_region, "SJC");
    }
}
