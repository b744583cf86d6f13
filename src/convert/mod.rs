//! 订阅转换请求
//!
//! 转换后端本身是黑盒：这里只负责把已勾选节点的链接和目标客户端拼成请求地址。

use crate::config::Config;
use crate::error::{Error, Result};
use crate::proxy::{Protocol, ProxyNode};
use log::info;
use reqwest::Client;
use url::Url;

/// 目标客户端：(取值, 说明)
pub const TARGET_CLIENTS: [(&str, &str); 6] = [
    ("clash&new_name=true", "Clash Meta / Verge"),
    ("clash", "Clash 标准版"),
    ("singbox", "Sing-box"),
    ("shadowrocket", "Shadowrocket"),
    ("surge&ver=4", "Surge 4+"),
    ("mixed", "Mixed (Base64)"),
];

/// 需要 Clash Meta 才能使用的协议
fn needs_meta(protocol: &Protocol) -> bool {
    matches!(
        protocol,
        Protocol::Vless | Protocol::Hysteria | Protocol::Hysteria2 | Protocol::Hy2 | Protocol::Tuic
    )
}

/// 选了标准版 Clash 但节点里有新协议时，改用 Clash Meta
pub fn suggest_target(current: &str, nodes: &[ProxyNode]) -> String {
    if current == "clash" && nodes.iter().any(|n| needs_meta(&n.protocol)) {
        return "clash&new_name=true".to_string();
    }
    current.to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConvertRequest {
    pub api_base: String,
    /// 目标客户端，`&` 之后的部分作为附加参数
    pub target: String,
    pub backend: String,
    /// 只输出节点列表
    pub list_only: bool,
    /// 以文件形式下载时的文件名
    pub filename: Option<String>,
}

impl ConvertRequest {
    pub fn new(api_base: &str, target: &str, backend: &str) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            target: target.to_string(),
            backend: backend.to_string(),
            list_only: false,
            filename: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.api_base, &config.target_client, &config.backend)
    }

    pub fn with_list_only(mut self, list_only: bool) -> Self {
        self.list_only = list_only;
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// 拼出 `{api_base}/sub?...`，没有勾选任何节点时报错
    pub fn build_url(&self, nodes: &[ProxyNode]) -> Result<String> {
        let selected: Vec<&str> = nodes
            .iter()
            .filter(|n| n.checked)
            .map(|n| n.raw.as_str())
            .collect();
        if selected.is_empty() {
            return Err(Error::Convert("请选择至少一个节点".to_string()));
        }

        let mut url = Url::parse(&format!("{}/sub", self.api_base))
            .map_err(|e| Error::Convert(format!("无效的接口地址 {}: {}", self.api_base, e)))?;
        {
            let mut query = url.query_pairs_mut();
            let mut target = self.target.split('&');
            query.append_pair("target", target.next().unwrap_or_default());
            for extra in target {
                match extra.split_once('=') {
                    Some((key, value)) => query.append_pair(key, value),
                    None => query.append_pair(extra, ""),
                };
            }
            query.append_pair("url", &selected.join("|"));
            query.append_pair("backend", &self.backend);
            if self.list_only {
                query.append_pair("list", "true");
            }
            query.append_pair("udp", "true");
            query.append_pair("scv", "true");
            if let Some(filename) = &self.filename {
                query.append_pair("download", "true");
                query.append_pair("filename", filename);
            }
        }
        Ok(url.to_string())
    }

    /// 请求转换后端，返回生成的配置文本
    pub async fn fetch(&self, client: &Client, nodes: &[ProxyNode]) -> Result<String> {
        let url = self.build_url(nodes)?;
        info!("请求订阅转换: target={}", self.target);

        let response = client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Convert(format!("HTTP {}", status.as_u16())));
        }
        Ok(response.text().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::parse_link;

    fn nodes() -> Vec<ProxyNode> {
        vec![
            parse_link("trojan://pw@t.example.com:443#T").unwrap(),
            parse_link("vless://u@v.example.com:443#V").unwrap(),
        ]
    }

    fn query(url: &str) -> Vec<(String, String)> {
        Url::parse(url)
            .unwrap()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn test_build_url() {
        let request = ConvertRequest::new(
            "https://edge.example.com/api/",
            "clash&new_name=true",
            "https://api.v1.mk",
        );
        let url = request.build_url(&nodes()).unwrap();
        assert!(url.starts_with("https://edge.example.com/api/sub?"));

        let pairs = query(&url);
        let get = |k: &str| pairs.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());
        assert_eq!(get("target"), Some("clash"));
        assert_eq!(get("new_name"), Some("true"));
        assert_eq!(
            get("url"),
            Some("trojan://pw@t.example.com:443#T|vless://u@v.example.com:443#V")
        );
        assert_eq!(get("backend"), Some("https://api.v1.mk"));
        assert_eq!(get("udp"), Some("true"));
        assert_eq!(get("scv"), Some("true"));
        assert_eq!(get("list"), None);
        assert_eq!(get("download"), None);
    }

    #[test]
    fn test_list_and_download_flags() {
        let mut all = nodes();
        all[1].checked = false;
        let request = ConvertRequest::from_config(&Config::default())
            .with_list_only(true)
            .with_filename("my config");
        let pairs = query(&request.build_url(&all).unwrap());
        let url = "trojan://pw@t.example.com:443#T".to_string();
        assert!(pairs.contains(&("url".to_string(), url)));
        assert!(pairs.contains(&("list".to_string(), "true".to_string())));
        assert!(pairs.contains(&("download".to_string(), "true".to_string())));
        assert!(pairs.contains(&("filename".to_string(), "my config".to_string())));
    }

    #[test]
    fn test_empty_selection_is_error() {
        let mut all = nodes();
        all.iter_mut().for_each(|n| n.checked = false);
        let request = ConvertRequest::from_config(&Config::default());
        assert!(matches!(request.build_url(&all), Err(Error::Convert(_))));
    }

    #[test]
    fn test_suggest_target() {
        assert_eq!(suggest_target("clash", &nodes()), "clash&new_name=true");
        assert_eq!(suggest_target("singbox", &nodes()), "singbox");
        assert_eq!(suggest_target("clash", &nodes()[..1]), "clash");
    }
}
