//! Shadowsocks / ShadowsocksR 链接
//!
//! ss 支持两种写法：
//! - SIP002: `ss://Base64(method:password)@host:port?plugin=..#name`
//! - 旧版:   `ss://Base64(method:password@host:port)#name`
//!
//! 旧版按固定正则拆分，method/password 中含 `:` 或 `@` 时无法区分，属已知限制。

use super::encoding;
use super::uri::{percent_decode, split_host_port};
use crate::error::{Error, Result};
use crate::proxy::{
    NodeExtra, NodeId, Protocol, ProtocolParams, ProxyNode, ShadowsocksParams, ShadowsocksRParams,
};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;
use url::form_urlencoded;

lazy_static! {
    static ref LEGACY_SS: Regex = Regex::new(r"^(.+?):(.+?)@(.+?):(\d+)$").unwrap();
}

struct SsParts {
    method: String,
    password: String,
    server: String,
    port: u16,
}

fn split_fragment_and_query(body: &str) -> (&str, Option<String>, BTreeMap<String, String>) {
    let (body, fragment) = match body.split_once('#') {
        Some((body, fragment)) => (body, Some(percent_decode(fragment))),
        None => (body, None),
    };
    let (body, query) = match body.split_once('?') {
        Some((body, query)) => (body, Some(query)),
        None => (body, None),
    };

    let mut params = BTreeMap::new();
    if let Some(query) = query {
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            params
                .entry(key.into_owned())
                .or_insert_with(|| value.into_owned());
        }
    }
    (body.trim_end_matches('/'), fragment.filter(|f| !f.is_empty()), params)
}

/// SIP002 的用户信息：通常是 Base64，AEAD-2022 等场景也可能是百分号编码的明文
fn decode_credentials(userinfo: &str) -> Option<(String, String)> {
    if let Ok(decoded) = encoding::decode(userinfo) {
        if let Some((method, password)) = decoded.split_once(':') {
            return Some((method.to_string(), password.to_string()));
        }
    }
    let plain = percent_decode(userinfo);
    plain
        .split_once(':')
        .map(|(method, password)| (method.to_string(), password.to_string()))
}

fn parse_sip002(body: &str) -> Option<SsParts> {
    let (userinfo, hostport) = body.rsplit_once('@')?;
    let (server, port) = split_host_port(hostport);
    let port = port?;
    if server.is_empty() {
        return None;
    }
    let (method, password) = decode_credentials(userinfo)?;
    Some(SsParts {
        method,
        password,
        server,
        port,
    })
}

fn parse_legacy(body: &str) -> Result<SsParts> {
    let decoded = encoding::decode(body)?;
    let caps = LEGACY_SS
        .captures(decoded.trim())
        .ok_or_else(|| Error::Link(format!("无法识别的旧版 SS 格式: {}", decoded)))?;
    let port = caps[4]
        .parse::<u16>()
        .map_err(|e| Error::Link(format!("SS 端口无效: {}", e)))?;

    Ok(SsParts {
        method: caps[1].to_string(),
        password: caps[2].to_string(),
        server: caps[3].to_string(),
        port,
    })
}

pub(crate) fn parse(link: &str) -> Result<ProxyNode> {
    let body = link
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or_default();
    let (body, fragment, mut query) = split_fragment_and_query(body);

    // 有 authority 时先按 SIP002，取不到地址再回落到旧版
    let parts = match parse_sip002(body) {
        Some(parts) => parts,
        None => parse_legacy(body)?,
    };

    let params = ShadowsocksParams {
        method: parts.method,
        password: parts.password,
        plugin: query.remove("plugin").filter(|p| !p.is_empty()),
    };
    let name = fragment.unwrap_or_else(|| format!("SS-{}", parts.server));

    Ok(ProxyNode::new(
        NodeId::next("link"),
        name,
        Protocol::Ss,
        parts.server,
        parts.port,
        link.to_string(),
    )
    .with_extra(NodeExtra::new(ProtocolParams::Shadowsocks(params)).with_unknown(query)))
}

pub(crate) fn to_link(node: &ProxyNode, p: &ShadowsocksParams) -> String {
    let userinfo = encoding::encode_url_safe(&format!("{}:{}", p.method, p.password));
    let host = if node.server.contains(':') {
        format!("[{}]", node.server)
    } else {
        node.server.clone()
    };

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    if let Some(plugin) = &p.plugin {
        serializer.append_pair("plugin", plugin);
    }
    for (key, value) in &node.extra.unknown {
        serializer.append_pair(key, value);
    }
    let query = serializer.finish();

    let mut link = format!("ss://{}@{}:{}", userinfo, host, node.port);
    if !query.is_empty() {
        link.push('?');
        link.push_str(&query);
    }
    link.push('#');
    link.push_str(&urlencoding::encode(&node.name));
    link
}

/// SSR 参数值本身也是 URL 安全 Base64
fn decode_param(value: &str) -> String {
    encoding::decode(value).unwrap_or_else(|_| value.to_string())
}

pub(crate) fn parse_ssr(link: &str) -> Result<ProxyNode> {
    let payload = link
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or_default();
    let decoded = encoding::decode(payload)?;

    let (main, query) = match decoded.split_once("/?") {
        Some((main, query)) => (main, Some(query)),
        None => match decoded.split_once('?') {
            Some((main, query)) => (main, Some(query)),
            None => (decoded.as_str(), None),
        },
    };

    // server 可能是 IPv6，从右往左切
    let fields: Vec<&str> = main.trim().rsplitn(6, ':').collect();
    if fields.len() != 6 {
        return Err(Error::Link(format!("SSR 字段数量不正确: {}", main)));
    }
    let (password_b64, obfs, method, protocol, port, server) =
        (fields[0], fields[1], fields[2], fields[3], fields[4], fields[5]);
    let port = port
        .parse::<u16>()
        .map_err(|e| Error::Link(format!("SSR 端口无效: {}", e)))?;
    let server = server.trim_start_matches('[').trim_end_matches(']').to_string();

    let mut params: BTreeMap<String, String> = BTreeMap::new();
    if let Some(query) = query {
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            params.insert(key.into_owned(), value.into_owned());
        }
    }
    let mut take = |key: &str| {
        params
            .remove(key)
            .filter(|v| !v.is_empty())
            .map(|v| decode_param(&v))
    };

    let name = take("remarks").unwrap_or_else(|| format!("SSR-{}", server));
    let ssr = ShadowsocksRParams {
        method: method.to_string(),
        password: encoding::decode(password_b64)?,
        protocol: protocol.to_string(),
        obfs: obfs.to_string(),
        protocol_param: take("protoparam"),
        obfs_param: take("obfsparam"),
        group: take("group"),
    };

    Ok(ProxyNode::new(
        NodeId::next("link"),
        name,
        Protocol::Ssr,
        server,
        port,
        link.to_string(),
    )
    .with_extra(NodeExtra::new(ProtocolParams::ShadowsocksR(ssr)).with_unknown(params)))
}

pub(crate) fn ssr_link(node: &ProxyNode, p: &ShadowsocksRParams) -> String {
    let mut main = format!(
        "{}:{}:{}:{}:{}:{}",
        node.server,
        node.port,
        p.protocol,
        p.method,
        p.obfs,
        encoding::encode_url_safe(&p.password)
    );

    let mut pairs: Vec<(String, String)> = Vec::new();
    if let Some(v) = &p.obfs_param {
        pairs.push(("obfsparam".to_string(), encoding::encode_url_safe(v)));
    }
    if let Some(v) = &p.protocol_param {
        pairs.push(("protoparam".to_string(), encoding::encode_url_safe(v)));
    }
    pairs.push(("remarks".to_string(), encoding::encode_url_safe(&node.name)));
    if let Some(v) = &p.group {
        pairs.push(("group".to_string(), encoding::encode_url_safe(v)));
    }
    for (key, value) in &node.extra.unknown {
        pairs.push((key.clone(), value.clone()));
    }

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in &pairs {
        serializer.append_pair(key, value);
    }
    main.push_str("/?");
    main.push_str(&serializer.finish());

    format!("ssr://{}", encoding::encode_url_safe(&main))
}
