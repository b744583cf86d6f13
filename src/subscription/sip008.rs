//! SIP008 JSON 订阅

use crate::error::FormatError;
use crate::link;
use crate::proxy::{NodeExtra, NodeId, Protocol, ProtocolParams, ProxyNode, ShadowsocksParams};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Sip008Document {
    servers: Vec<Sip008Server>,
}

#[derive(Debug, Deserialize)]
struct Sip008Server {
    server: String,
    server_port: u16,
    method: String,
    password: String,
    #[serde(default)]
    remarks: Option<String>,
    #[serde(default)]
    plugin: Option<String>,
    #[serde(default)]
    plugin_opts: Option<String>,
}

impl Sip008Server {
    fn plugin(&self) -> Option<String> {
        let plugin = self.plugin.as_deref().filter(|p| !p.is_empty())?;
        match self.plugin_opts.as_deref().filter(|o| !o.is_empty()) {
            Some(opts) => Some(format!("{};{}", plugin, opts)),
            None => Some(plugin.to_string()),
        }
    }
}

pub(super) fn decode(payload: &str) -> Result<Vec<ProxyNode>, FormatError> {
    let document: Sip008Document = serde_json::from_str(payload)
        .map_err(|e| FormatError::new(format!("SIP008 配置格式错误: {}", e)))?;

    let nodes = document
        .servers
        .iter()
        .enumerate()
        .map(|(index, server)| {
            let name = server
                .remarks
                .clone()
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| format!("SS-{}", index));
            let params = ShadowsocksParams {
                method: server.method.clone(),
                password: server.password.clone(),
                plugin: server.plugin(),
            };
            let mut node = ProxyNode::new(
                NodeId::next("sip008"),
                name,
                Protocol::Ss,
                server.server.clone(),
                server.server_port,
                String::new(),
            )
            .with_extra(NodeExtra::new(ProtocolParams::Shadowsocks(params)));
            node.raw = link::to_link(&node);
            node
        })
        .collect();
    Ok(nodes)
}
