//! 各协议特有参数
//!
//! 已知参数放在带标签的 [`ProtocolParams`] 中，其余参数原样保存在
//! [`NodeExtra::unknown`] 里，重建链接时一并写回。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// VMess 参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmessParams {
    pub uuid: String,
    pub alter_id: u32,
    pub cipher: String,
    pub network: String,
    pub tls: bool,
    pub host: Option<String>,
    pub path: Option<String>,
    pub sni: Option<String>,
}

/// VLESS 参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VlessParams {
    pub uuid: String,
    pub encryption: String,
    pub flow: Option<String>,
    pub security: String,
    pub network: String,
    pub host: Option<String>,
    pub path: Option<String>,
    pub sni: Option<String>,
    pub fingerprint: Option<String>,
    pub public_key: Option<String>,
    pub short_id: Option<String>,
}

/// Trojan 参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrojanParams {
    pub password: String,
    pub sni: String,
    pub allow_insecure: bool,
    pub network: String,
    pub host: Option<String>,
    pub path: Option<String>,
}

/// Shadowsocks 参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShadowsocksParams {
    pub method: String,
    pub password: String,
    pub plugin: Option<String>,
}

/// ShadowsocksR 参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShadowsocksRParams {
    pub method: String,
    pub password: String,
    pub protocol: String,
    pub obfs: String,
    pub protocol_param: Option<String>,
    pub obfs_param: Option<String>,
    pub group: Option<String>,
}

/// Hysteria (v1) 参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HysteriaParams {
    pub auth: Option<String>,
    pub peer: Option<String>,
    pub insecure: bool,
    pub up_mbps: Option<String>,
    pub down_mbps: Option<String>,
    pub obfs: Option<String>,
}

/// Hysteria2 参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hysteria2Params {
    pub auth: String,
    pub sni: Option<String>,
    pub insecure: bool,
    pub obfs: Option<String>,
    pub obfs_password: Option<String>,
}

/// TUIC 参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TuicParams {
    pub uuid: String,
    pub password: String,
    pub congestion_control: String,
    pub alpn: Option<String>,
    pub sni: Option<String>,
    pub udp_relay_mode: Option<String>,
}

/// HTTP / SOCKS5 的认证参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasicParams {
    pub username: Option<String>,
    pub password: Option<String>,
    pub tls: bool,
}

/// 已知协议参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProtocolParams {
    Vmess(VmessParams),
    Vless(VlessParams),
    Trojan(TrojanParams),
    Shadowsocks(ShadowsocksParams),
    ShadowsocksR(ShadowsocksRParams),
    Hysteria(HysteriaParams),
    Hysteria2(Hysteria2Params),
    Tuic(TuicParams),
    Basic(BasicParams),
    #[default]
    None,
}

/// 节点的协议参数包
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeExtra {
    pub params: ProtocolParams,
    /// 未识别的参数，原样保留
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unknown: BTreeMap<String, String>,
}

fn flag(value: bool) -> Option<String> {
    Some(value.to_string())
}

impl NodeExtra {
    pub fn new(params: ProtocolParams) -> Self {
        Self {
            params,
            unknown: BTreeMap::new(),
        }
    }

    pub fn with_unknown(mut self, unknown: BTreeMap<String, String>) -> Self {
        self.unknown = unknown;
        self
    }

    /// 按文档中的键名读取参数，先查已知参数再查未知参数
    pub fn get(&self, key: &str) -> Option<String> {
        self.params.get(key).or_else(|| self.unknown.get(key).cloned())
    }
}

impl ProtocolParams {
    pub fn get(&self, key: &str) -> Option<String> {
        match self {
            ProtocolParams::Vmess(p) => match key {
                "uuid" => Some(p.uuid.clone()),
                "alterId" => Some(p.alter_id.to_string()),
                "cipher" => Some(p.cipher.clone()),
                "network" => Some(p.network.clone()),
                "tls" => flag(p.tls),
                "host" => p.host.clone(),
                "path" => p.path.clone(),
                "sni" => p.sni.clone(),
                _ => None,
            },
            ProtocolParams::Vless(p) => match key {
                "uuid" => Some(p.uuid.clone()),
                "encryption" => Some(p.encryption.clone()),
                "flow" => p.flow.clone(),
                "security" => Some(p.security.clone()),
                "type" => Some(p.network.clone()),
                "host" => p.host.clone(),
                "path" => p.path.clone(),
                "sni" => p.sni.clone(),
                "fp" => p.fingerprint.clone(),
                "pbk" => p.public_key.clone(),
                "sid" => p.short_id.clone(),
                _ => None,
            },
            ProtocolParams::Trojan(p) => match key {
                "password" => Some(p.password.clone()),
                "sni" => Some(p.sni.clone()),
                "allowInsecure" => flag(p.allow_insecure),
                "type" => Some(p.network.clone()),
                "host" => p.host.clone(),
                "path" => p.path.clone(),
                _ => None,
            },
            ProtocolParams::Shadowsocks(p) => match key {
                "method" => Some(p.method.clone()),
                "password" => Some(p.password.clone()),
                "plugin" => p.plugin.clone(),
                _ => None,
            },
            ProtocolParams::ShadowsocksR(p) => match key {
                "method" => Some(p.method.clone()),
                "password" => Some(p.password.clone()),
                "protocol" => Some(p.protocol.clone()),
                "obfs" => Some(p.obfs.clone()),
                "protoparam" => p.protocol_param.clone(),
                "obfsparam" => p.obfs_param.clone(),
                "group" => p.group.clone(),
                _ => None,
            },
            ProtocolParams::Hysteria(p) => match key {
                "auth" => p.auth.clone(),
                "peer" => p.peer.clone(),
                "insecure" => flag(p.insecure),
                "upmbps" => p.up_mbps.clone(),
                "downmbps" => p.down_mbps.clone(),
                "obfs" => p.obfs.clone(),
                _ => None,
            },
            ProtocolParams::Hysteria2(p) => match key {
                "auth" => Some(p.auth.clone()),
                "sni" => p.sni.clone(),
                "insecure" => flag(p.insecure),
                "obfs" => p.obfs.clone(),
                "obfs-password" => p.obfs_password.clone(),
                _ => None,
            },
            ProtocolParams::Tuic(p) => match key {
                "uuid" => Some(p.uuid.clone()),
                "password" => Some(p.password.clone()),
                "congestion_control" => Some(p.congestion_control.clone()),
                "alpn" => p.alpn.clone(),
                "sni" => p.sni.clone(),
                "udp_relay_mode" => p.udp_relay_mode.clone(),
                _ => None,
            },
            ProtocolParams::Basic(p) => match key {
                "username" => p.username.clone(),
                "password" => p.password.clone(),
                "tls" => flag(p.tls),
                _ => None,
            },
            ProtocolParams::None => None,
        }
    }
}
