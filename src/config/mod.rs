use crate::check::ProbeTimeouts;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // 进度显示
    pub print_progress: bool,

    // 探测参数
    pub concurrent: usize,
    pub tcp_timeout: u64,
    pub http_timeout: u64,
    pub download_timeout: u64,

    // 远端接口（/check、/fetch 所在的前缀）
    pub api_base: String,
    pub user_agent: String,

    // 订阅转换
    pub backend: String,
    pub target_client: String,

    // 日志配置
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            print_progress: true,
            concurrent: 5,
            tcp_timeout: 10_000,
            http_timeout: 15_000,
            download_timeout: 30_000,
            api_base: "http://127.0.0.1:8788/api".to_string(),
            user_agent: format!("subs-convert/{}", env!("CARGO_PKG_VERSION")),
            backend: "https://api.v1.mk".to_string(),
            target_client: "clash".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn probe_timeouts(&self) -> ProbeTimeouts {
        ProbeTimeouts {
            tcp: Duration::from_millis(self.tcp_timeout),
            http: Duration::from_millis(self.http_timeout),
            download: Duration::from_millis(self.download_timeout),
        }
    }
}
