//! 代理节点链接与订阅格式互转，以及并发受限的节点探测

pub mod check;
pub mod config;
pub mod convert;
pub mod error;
pub mod link;
pub mod nodeset;
pub mod proxy;
pub mod subscription;
pub mod ui;

pub use check::{ProbeBackend, ProbeEngine, ProbeMode, ProbeProgress, ProbeResult, ProbeTimeouts};
pub use config::Config;
pub use error::{Error, FormatError, Result};
pub use link::{detect_protocol, parse_link, parse_links, to_link};
pub use proxy::{NodeId, Protocol, ProxyNode};
pub use subscription::{Format, decode, decode_subscription, detect};
