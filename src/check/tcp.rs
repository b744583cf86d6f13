//! 本机直连 TCP 探测，不依赖远端端点

use super::{Measurement, ProbeBackend, ProbeMode};
use crate::error::{Error, Result};
use crate::proxy::ProxyNode;
use async_trait::async_trait;
use std::time::Instant;
use tokio::net::TcpStream;

/// 本机探测的区域标识
pub const LOCAL_REGION: &str = "Local";

/// 只支持 `tcp` 模式：测量本机到节点的建连耗时
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnectBackend;

#[async_trait]
impl ProbeBackend for TcpConnectBackend {
    async fn probe(&self, node: &ProxyNode, mode: ProbeMode) -> Result<Measurement> {
        if mode != ProbeMode::Tcp {
            return Err(Error::Unsupported(format!("直连后端不支持 {} 模式", mode)));
        }

        let start = Instant::now();
        let stream = TcpStream::connect((node.server.as_str(), node.port)).await?;
        let elapsed = start.elapsed().as_millis() as i64;
        drop(stream);

        Ok(Measurement {
            tcp_latency_ms: Some(elapsed),
            edge_region: Some(LOCAL_REGION.to_string()),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{NodeId, Protocol};
    use tokio::net::TcpListener;

    fn node(port: u16) -> ProxyNode {
        ProxyNode::new(
            NodeId::next("test"),
            "local".to_string(),
            Protocol::Socks5,
            "127.0.0.1".to_string(),
            port,
            format!("socks5://127.0.0.1:{}#local", port),
        )
    }

    #[tokio::test]
    async fn test_connects_to_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let m = TcpConnectBackend.probe(&node(port), ProbeMode::Tcp).await.unwrap();
        assert!(m.tcp_latency_ms.unwrap() >= 0);
        assert_eq!(m.edge_region.as_deref(), Some(LOCAL_REGION));
    }

    #[tokio::test]
    async fn test_refused_connection_is_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(TcpConnectBackend.probe(&node(port), ProbeMode::Tcp).await.is_err());
    }

    #[tokio::test]
    async fn test_other_modes_unsupported() {
        let err = TcpConnectBackend
            .probe(&node(1), ProbeMode::Download)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }
}
