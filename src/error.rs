//! 错误类型定义

use std::io;

/// 订阅级别的格式错误：结构解析失败或结构不符合预期
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct FormatError {
    message: String,
}

impl FormatError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// 库内统一错误类型
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 订阅格式错误
    #[error("订阅格式错误: {0}")]
    Format(#[from] FormatError),
    /// 单条链接解析失败
    #[error("链接解析失败: {0}")]
    Link(String),
    /// Base64 解码错误
    #[error("Base64 解码失败: {0}")]
    Base64(String),
    /// HTTP 请求错误
    #[error("请求失败: {0}")]
    Request(String),
    /// 探测超时
    #[error("探测超时 ({0}ms)")]
    Timeout(u64),
    /// 探测端点返回非 2xx 状态
    #[error("探测失败: HTTP {status}")]
    ProbeStatus { status: u16, region: String },
    /// 获取订阅失败
    #[error("获取订阅失败: {0}")]
    Fetch(String),
    /// 订阅转换请求错误
    #[error("订阅转换失败: {0}")]
    Convert(String),
    /// 当前后端不支持的探测模式
    #[error("不支持的探测模式: {0}")]
    Unsupported(String),
    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] io::Error),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),
}

impl Error {
    /// 出错时能拿到的边缘区域标识（仅非 2xx 响应携带）
    pub fn edge_region(&self) -> Option<&str> {
        match self {
            Error::ProbeStatus { region, .. } => Some(region),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Request(err.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::Base64(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
