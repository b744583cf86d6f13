//! `scheme://userinfo@host:port?query#fragment` 形式的链接
//!
//! 手工拆分而不是交给 URL 解析器：端口非数字时要回落到默认端口，
//! 而不是整条链接解析失败。

use crate::error::{Error, Result};
use crate::proxy::{
    BasicParams, Hysteria2Params, HysteriaParams, NodeExtra, NodeId, Protocol, ProtocolParams,
    ProxyNode, TrojanParams, TuicParams, VlessParams,
};
use std::collections::BTreeMap;
use url::form_urlencoded;

/// 拆分后的链接各部分
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct UriParts {
    pub scheme: String,
    /// 百分号编码的原始用户信息
    pub userinfo: Option<String>,
    pub host: String,
    /// 缺失、非数字或为 0 时为 `None`
    pub port: Option<u16>,
    pub query: BTreeMap<String, String>,
    /// 已解码的片段
    pub fragment: Option<String>,
}

impl UriParts {
    /// 取出查询参数，空值视为缺失；剩下的即为未知参数
    pub fn take(&mut self, key: &str) -> Option<String> {
        self.query.remove(key).filter(|v| !v.is_empty())
    }

    pub fn take_flag(&mut self, key: &str) -> bool {
        matches!(self.take(key).as_deref(), Some("1") | Some("true"))
    }

    pub fn userinfo_decoded(&self) -> String {
        self.userinfo.as_deref().map(percent_decode).unwrap_or_default()
    }

    /// `user:pass` 形式的用户信息，两部分分别解码
    pub fn credentials(&self) -> (Option<String>, Option<String>) {
        match self.userinfo.as_deref() {
            None | Some("") => (None, None),
            Some(info) => match info.split_once(':') {
                Some((user, pass)) => (Some(percent_decode(user)), Some(percent_decode(pass))),
                None => (Some(percent_decode(info)), None),
            },
        }
    }

    pub fn name_or(&self, protocol: &Protocol) -> String {
        match &self.fragment {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("{}-{}", protocol.display_prefix(), self.host),
        }
    }
}

pub(crate) fn percent_decode(input: &str) -> String {
    urlencoding::decode(input)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| input.to_string())
}

/// 拆分 `host:port`，支持 `[ipv6]:port`
pub(crate) fn split_host_port(input: &str) -> (String, Option<u16>) {
    let parse_port = |p: &str| p.parse::<u16>().ok().filter(|p| *p != 0);

    if let Some(rest) = input.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail.strip_prefix(':').and_then(parse_port);
            return (host.to_string(), port);
        }
    }

    match input.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), parse_port(port)),
        None => (input.to_string(), None),
    }
}

pub(crate) fn split_uri(link: &str) -> Result<UriParts> {
    let (scheme, rest) = link
        .split_once("://")
        .ok_or_else(|| Error::Link(format!("缺少协议头: {}", link)))?;

    let (rest, fragment) = match rest.split_once('#') {
        Some((rest, fragment)) => (rest, Some(percent_decode(fragment))),
        None => (rest, None),
    };

    let (rest, query) = match rest.split_once('?') {
        Some((rest, query)) => (rest, Some(query)),
        None => (rest, None),
    };

    // 用户信息中可能出现 '/'（Base64），所以先按最后一个 '@' 切分
    let (userinfo, hostport) = match rest.rsplit_once('@') {
        Some((userinfo, hostport)) => (Some(userinfo.to_string()), hostport),
        None => (None, rest),
    };
    let hostport = hostport.split('/').next().unwrap_or_default();
    let (host, port) = split_host_port(hostport);

    let mut params = BTreeMap::new();
    if let Some(query) = query {
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            params
                .entry(key.into_owned())
                .or_insert_with(|| value.into_owned());
        }
    }

    Ok(UriParts {
        scheme: scheme.to_lowercase(),
        userinfo,
        host,
        port,
        query: params,
        fragment,
    })
}

/// 拼装 URI 形式链接，`userinfo` 需已编码
pub(crate) fn build_uri(
    scheme: &str,
    userinfo: Option<String>,
    host: &str,
    port: u16,
    query: Vec<(&str, String)>,
    unknown: &BTreeMap<String, String>,
    name: &str,
) -> String {
    let mut link = format!("{}://", scheme);
    if let Some(info) = userinfo {
        link.push_str(&info);
        link.push('@');
    }
    if host.contains(':') {
        link.push_str(&format!("[{}]:{}", host, port));
    } else {
        link.push_str(&format!("{}:{}", host, port));
    }

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in &query {
        serializer.append_pair(key, value);
    }
    for (key, value) in unknown {
        serializer.append_pair(key, value);
    }
    let encoded = serializer.finish();
    if !encoded.is_empty() {
        link.push('?');
        link.push_str(&encoded);
    }

    link.push('#');
    link.push_str(&urlencoding::encode(name));
    link
}

fn push_opt<'a>(query: &mut Vec<(&'a str, String)>, key: &'a str, value: &Option<String>) {
    if let Some(value) = value {
        query.push((key, value.clone()));
    }
}

fn require_host(parts: &UriParts, link: &str) -> Result<()> {
    if parts.host.is_empty() {
        return Err(Error::Link(format!("缺少服务器地址: {}", link)));
    }
    Ok(())
}

fn finish(
    parts: UriParts,
    protocol: Protocol,
    default_port: u16,
    params: ProtocolParams,
    link: &str,
) -> ProxyNode {
    let name = parts.name_or(&protocol);
    let port = parts.port.unwrap_or(default_port);
    ProxyNode::new(
        NodeId::next("link"),
        name,
        protocol,
        parts.host,
        port,
        link.to_string(),
    )
    .with_extra(NodeExtra::new(params).with_unknown(parts.query))
}

pub(crate) fn parse_vless(link: &str) -> Result<ProxyNode> {
    let mut parts = split_uri(link)?;
    require_host(&parts, link)?;

    let params = VlessParams {
        uuid: parts.userinfo_decoded(),
        encryption: parts.take("encryption").unwrap_or_else(|| "none".to_string()),
        flow: parts.take("flow"),
        security: parts.take("security").unwrap_or_else(|| "none".to_string()),
        network: parts.take("type").unwrap_or_else(|| "tcp".to_string()),
        host: parts.take("host"),
        path: parts.take("path"),
        sni: parts.take("sni"),
        fingerprint: parts.take("fp"),
        public_key: parts.take("pbk"),
        short_id: parts.take("sid"),
    };
    Ok(finish(parts, Protocol::Vless, 443, ProtocolParams::Vless(params), link))
}

pub(crate) fn parse_trojan(link: &str) -> Result<ProxyNode> {
    let mut parts = split_uri(link)?;
    require_host(&parts, link)?;

    let host = parts.host.clone();
    let params = TrojanParams {
        password: parts.userinfo_decoded(),
        sni: parts.take("sni").unwrap_or(host),
        allow_insecure: parts.take_flag("allowInsecure"),
        network: parts.take("type").unwrap_or_else(|| "tcp".to_string()),
        host: parts.take("host"),
        path: parts.take("path"),
    };
    Ok(finish(parts, Protocol::Trojan, 443, ProtocolParams::Trojan(params), link))
}

pub(crate) fn parse_hysteria2(link: &str) -> Result<ProxyNode> {
    let mut parts = split_uri(link)?;
    require_host(&parts, link)?;

    let protocol = if parts.scheme == "hy2" {
        Protocol::Hy2
    } else {
        Protocol::Hysteria2
    };
    let params = Hysteria2Params {
        auth: parts.userinfo_decoded(),
        sni: parts.take("sni"),
        insecure: parts.take_flag("insecure"),
        obfs: parts.take("obfs"),
        obfs_password: parts.take("obfs-password"),
    };
    Ok(finish(parts, protocol, 443, ProtocolParams::Hysteria2(params), link))
}

pub(crate) fn parse_tuic(link: &str) -> Result<ProxyNode> {
    let mut parts = split_uri(link)?;
    require_host(&parts, link)?;

    let (uuid, password) = parts.credentials();
    let params = TuicParams {
        uuid: uuid.unwrap_or_default(),
        password: password.unwrap_or_default(),
        congestion_control: parts
            .take("congestion_control")
            .unwrap_or_else(|| "bbr".to_string()),
        alpn: parts.take("alpn"),
        sni: parts.take("sni"),
        udp_relay_mode: parts.take("udp_relay_mode"),
    };
    Ok(finish(parts, Protocol::Tuic, 443, ProtocolParams::Tuic(params), link))
}

pub(crate) fn parse_hysteria(link: &str) -> Result<ProxyNode> {
    let mut parts = split_uri(link)?;
    require_host(&parts, link)?;

    let userinfo = Some(parts.userinfo_decoded()).filter(|s| !s.is_empty());
    let params = HysteriaParams {
        auth: parts.take("auth").or(userinfo),
        peer: parts.take("peer"),
        insecure: parts.take_flag("insecure"),
        up_mbps: parts.take("upmbps"),
        down_mbps: parts.take("downmbps"),
        obfs: parts.take("obfs"),
    };
    Ok(finish(parts, Protocol::Hysteria, 443, ProtocolParams::Hysteria(params), link))
}

/// `http://` / `https://` / `socks5://` / `socks://`
pub(crate) fn parse_basic(link: &str, protocol: Protocol) -> Result<ProxyNode> {
    let parts = split_uri(link)?;
    require_host(&parts, link)?;

    let tls = parts.scheme == "https";
    let default_port = match (&protocol, tls) {
        (Protocol::Socks5, _) => 1080,
        (_, true) => 443,
        _ => 80,
    };
    let (username, password) = parts.credentials();
    let params = BasicParams {
        username,
        password,
        tls,
    };
    Ok(finish(parts, protocol, default_port, ProtocolParams::Basic(params), link))
}

fn encode_userinfo(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

pub(crate) fn vless_link(node: &ProxyNode, p: &VlessParams) -> String {
    let mut query = vec![
        ("encryption", p.encryption.clone()),
        ("security", p.security.clone()),
        ("type", p.network.clone()),
    ];
    push_opt(&mut query, "flow", &p.flow);
    push_opt(&mut query, "host", &p.host);
    push_opt(&mut query, "path", &p.path);
    push_opt(&mut query, "sni", &p.sni);
    push_opt(&mut query, "fp", &p.fingerprint);
    push_opt(&mut query, "pbk", &p.public_key);
    push_opt(&mut query, "sid", &p.short_id);
    build_uri(
        "vless",
        Some(encode_userinfo(&p.uuid)),
        &node.server,
        node.port,
        query,
        &node.extra.unknown,
        &node.name,
    )
}

pub(crate) fn trojan_link(node: &ProxyNode, p: &TrojanParams) -> String {
    let mut query = vec![("sni", p.sni.clone()), ("type", p.network.clone())];
    if p.allow_insecure {
        query.push(("allowInsecure", "1".to_string()));
    }
    push_opt(&mut query, "host", &p.host);
    push_opt(&mut query, "path", &p.path);
    build_uri(
        "trojan",
        Some(encode_userinfo(&p.password)),
        &node.server,
        node.port,
        query,
        &node.extra.unknown,
        &node.name,
    )
}

pub(crate) fn hysteria2_link(node: &ProxyNode, p: &Hysteria2Params) -> String {
    let scheme = if node.protocol == Protocol::Hysteria2 {
        "hysteria2"
    } else {
        "hy2"
    };
    let mut query = Vec::new();
    push_opt(&mut query, "sni", &p.sni);
    if p.insecure {
        query.push(("insecure", "1".to_string()));
    }
    push_opt(&mut query, "obfs", &p.obfs);
    push_opt(&mut query, "obfs-password", &p.obfs_password);
    build_uri(
        scheme,
        Some(encode_userinfo(&p.auth)),
        &node.server,
        node.port,
        query,
        &node.extra.unknown,
        &node.name,
    )
}

pub(crate) fn tuic_link(node: &ProxyNode, p: &TuicParams) -> String {
    let userinfo = format!("{}:{}", encode_userinfo(&p.uuid), encode_userinfo(&p.password));
    let mut query = vec![("congestion_control", p.congestion_control.clone())];
    push_opt(&mut query, "alpn", &p.alpn);
    push_opt(&mut query, "sni", &p.sni);
    push_opt(&mut query, "udp_relay_mode", &p.udp_relay_mode);
    build_uri(
        "tuic",
        Some(userinfo),
        &node.server,
        node.port,
        query,
        &node.extra.unknown,
        &node.name,
    )
}

pub(crate) fn hysteria_link(node: &ProxyNode, p: &HysteriaParams) -> String {
    let mut query = Vec::new();
    push_opt(&mut query, "auth", &p.auth);
    push_opt(&mut query, "peer", &p.peer);
    if p.insecure {
        query.push(("insecure", "1".to_string()));
    }
    push_opt(&mut query, "upmbps", &p.up_mbps);
    push_opt(&mut query, "downmbps", &p.down_mbps);
    push_opt(&mut query, "obfs", &p.obfs);
    build_uri(
        "hysteria",
        None,
        &node.server,
        node.port,
        query,
        &node.extra.unknown,
        &node.name,
    )
}

pub(crate) fn basic_link(node: &ProxyNode, p: &BasicParams) -> String {
    let scheme = match (&node.protocol, p.tls) {
        (Protocol::Socks5, _) => "socks5",
        (_, true) => "https",
        _ => "http",
    };
    let userinfo = match (&p.username, &p.password) {
        (Some(user), Some(pass)) => Some(format!(
            "{}:{}",
            encode_userinfo(user),
            encode_userinfo(pass)
        )),
        (Some(user), None) => Some(encode_userinfo(user)),
        _ => None,
    };
    build_uri(
        scheme,
        userinfo,
        &node.server,
        node.port,
        Vec::new(),
        &node.extra.unknown,
        &node.name,
    )
}
