//! 通过转发端点获取订阅内容

use crate::error::{Error, Result};
use log::{debug, info};
use reqwest::Client;
use serde::Deserialize;

/// 转发端点出错时返回的 JSON
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<String>,
    message: Option<String>,
}

/// `GET {api_base}/fetch?url=<url>`，成功时返回订阅原文
pub async fn fetch_subscription(client: &Client, api_base: &str, url: &str) -> Result<String> {
    let endpoint = format!("{}/fetch", api_base.trim_end_matches('/'));
    info!("获取订阅: {}", url);

    let response = client.get(&endpoint).query(&[("url", url)]).send().await?;
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        let reason = serde_json::from_str::<ErrorEnvelope>(&body)
            .ok()
            .and_then(|e| e.message.or(e.error))
            .unwrap_or_else(|| "请检查链接是否正确".to_string());
        return Err(Error::Fetch(format!("HTTP {}: {}", status.as_u16(), reason)));
    }

    debug!("订阅内容长度: {} 字节", body.len());
    Ok(body)
}
