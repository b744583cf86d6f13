use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use subs_convert_rust::check::{
    ProbeBackend, ProbeEngine, ProbeMode, RemoteCheckBackend, TcpConnectBackend,
};
use subs_convert_rust::config::Config;
use subs_convert_rust::convert::{ConvertRequest, suggest_target};
use subs_convert_rust::proxy::ProxyNode;
use subs_convert_rust::ui::format::{format_latency, format_speed};
use subs_convert_rust::ui::progress::ProgressTracker;
use subs_convert_rust::{link, nodeset, subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SortKey {
    Latency,
    Name,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ExportFormat {
    Text,
    Base64,
    Json,
}

/// 代理节点链接 / 订阅转换与测速工具
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 输入文件，省略或为 "-" 时读取标准输入
    input: Option<PathBuf>,

    /// 配置文件路径
    #[arg(short = 'f', long, default_value = "config/config.yaml")]
    config: String,

    /// 订阅地址（通过 /fetch 接口获取）
    #[arg(short = 'u', long)]
    url: Option<String>,

    /// 输入是节点链接列表，不做订阅格式识别
    #[arg(long)]
    links: bool,

    /// 按 (协议, 地址, 端口) 去重
    #[arg(long)]
    dedupe: bool,

    /// 只保留名称包含关键字的节点
    #[arg(long)]
    search: Option<String>,

    /// 探测模式：tcp, http, download
    #[arg(long)]
    probe: Option<ProbeMode>,

    /// 本机直连 TCP 探测，不经过远端接口
    #[arg(long)]
    direct: bool,

    /// 排序方式
    #[arg(long, value_enum)]
    sort: Option<SortKey>,

    /// 导出已勾选节点
    #[arg(long, value_enum)]
    export: Option<ExportFormat>,

    /// 生成订阅转换地址
    #[arg(long)]
    convert: bool,

    /// 目标客户端
    #[arg(long)]
    target: Option<String>,

    /// 转换结果只包含节点列表
    #[arg(long)]
    list_only: bool,

    /// 接口前缀
    #[arg(long)]
    api_base: Option<String>,

    /// 并发数
    #[arg(long)]
    concurrent: Option<usize>,

    /// 是否显示进度条
    #[arg(long)]
    progress: Option<bool>,

    /// 日志级别
    #[arg(long)]
    log_level: Option<String>,

    /// 详细输出
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(path: &str) -> Config {
    if !Path::new(path).exists() {
        return Config::default();
    }
    match Config::load_from_file(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("⚠️  配置文件加载失败: {}，使用默认配置", e);
            Config::default()
        }
    }
}

fn read_input(input: Option<&Path>) -> Result<String> {
    match input {
        Some(path) if path != Path::new("-") => Ok(std::fs::read_to_string(path)?),
        _ => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}

fn print_nodes(nodes: &[ProxyNode]) {
    println!("\n节点列表:");
    println!("{:=<80}", "");

    for (i, node) in nodes.iter().filter(|n| n.visible).enumerate() {
        println!(
            "{}. [{}] {} {}",
            i + 1,
            node.protocol.display_prefix(),
            node.name,
            if node.checked { "" } else { "(未选)" }
        );
        if !node.server.is_empty() {
            println!("   地址: {}", node.get_address());
        }
        if let Some(result) = &node.probe_result {
            println!(
                "   TCP: {}  HTTP: {}  下载: {}  区域: {}",
                format_latency(result.tcp_latency_ms),
                format_latency(result.http_latency_ms),
                format_speed(result.download_speed_kbps),
                result.edge_region
            );
            if let Some(error) = &result.error {
                println!("   错误: {}", error);
            }
        }
    }
    println!("{:-<80}", "");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = load_config(&args.config);

    // 命令行参数优先
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    if let Some(concurrent) = args.concurrent {
        config.concurrent = concurrent;
    }
    if let Some(api_base) = &args.api_base {
        config.api_base = api_base.clone();
    }
    if let Some(progress) = args.progress {
        config.print_progress = progress;
    }
    if let Some(target) = &args.target {
        config.target_client = target.clone();
    }

    let level = if args.verbose {
        "debug"
    } else {
        config.log_level.as_str()
    };
    env_logger::Builder::new().parse_filters(level).init();

    let client = reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .build()?;

    let payload = match &args.url {
        Some(url) => subscription::fetch_subscription(&client, &config.api_base, url).await?,
        None => read_input(args.input.as_deref())?,
    };

    let mut nodes = if args.links {
        link::parse_links(&payload)
    } else {
        subscription::decode_subscription(&payload)?
    };
    if nodes.is_empty() {
        bail!("未能解析出有效节点");
    }
    info!("成功解析 {} 个节点", nodes.len());

    if args.dedupe {
        let before = nodes.len();
        nodes = nodeset::dedupe(&nodes);
        info!("去重后剩余 {} 个节点（移除 {} 个）", nodes.len(), before - nodes.len());
    }
    if let Some(keyword) = &args.search {
        nodeset::filter_by_keyword(&mut nodes, keyword);
    }

    if let Some(mode) = args.probe {
        let backend: Arc<dyn ProbeBackend> = if args.direct {
            if mode != ProbeMode::Tcp {
                warn!("直连探测只支持 tcp 模式，{} 模式的节点都会记为失败", mode);
            }
            Arc::new(TcpConnectBackend)
        } else {
            Arc::new(RemoteCheckBackend::with_client(client.clone(), &config.api_base))
        };
        let engine = ProbeEngine::from_config(backend, &config);

        let tracker = ProgressTracker::new(&config, mode);
        let eligible = nodes.iter().filter(|n| ProbeEngine::eligible(n)).count();
        tracker.set_total_nodes(eligible as u64);

        let results = engine
            .run_batch_with_progress(&nodes, mode, |p| tracker.record(&p))
            .await;
        tracker.finalize();
        nodeset::apply_probe_results(&mut nodes, &results);

        let stats = engine.get_stats();
        eprintln!("\n检测统计:");
        eprintln!("  总节点数: {}", stats.total.load(Ordering::Relaxed));
        eprintln!("  成功节点: {}", stats.succeeded.load(Ordering::Relaxed));
        eprintln!("  失败节点: {}", stats.failed.load(Ordering::Relaxed));
        eprintln!("  成功率: {:.2}%", stats.get_success_rate());
    }

    match args.sort {
        Some(SortKey::Latency) => nodes = nodeset::sort_by_latency(&nodes),
        Some(SortKey::Name) => nodes = nodeset::sort_by_name(&nodes),
        None => {}
    }

    // 只导出当前可见的节点
    let visible: Vec<ProxyNode> = nodes.iter().filter(|n| n.visible).cloned().collect();

    match args.export {
        Some(ExportFormat::Text) => println!("{}", nodeset::export_text(&visible)),
        Some(ExportFormat::Base64) => println!("{}", nodeset::export_base64(&visible)),
        Some(ExportFormat::Json) => println!("{}", serde_json::to_string_pretty(&visible)?),
        None if !args.convert => print_nodes(&nodes),
        None => {}
    }

    if args.convert {
        let target = suggest_target(&config.target_client, &visible);
        if target != config.target_client {
            info!("检测到新协议，已切换到 {}", target);
        }
        let request = ConvertRequest::new(&config.api_base, &target, &config.backend)
            .with_list_only(args.list_only);
        println!("{}", request.build_url(&visible)?);
    }

    Ok(())
}
