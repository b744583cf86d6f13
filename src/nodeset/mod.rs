//! 节点集合操作
//!
//! 去重、排序、导出都返回新集合，不修改输入；
//! 搜索、勾选、写回探测结果只改动节点的 `visible` / `checked` / `probe_result`。

use crate::check::ProbeResult;
use crate::link::encoding;
use crate::proxy::{NodeId, Protocol, ProxyNode};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

#[derive(Debug, PartialEq, Eq, Hash)]
enum DedupeKey {
    Endpoint(Protocol, String, u16),
    Raw(String),
}

fn dedupe_key(node: &ProxyNode) -> DedupeKey {
    if node.server.is_empty() {
        DedupeKey::Raw(node.raw.clone())
    } else {
        DedupeKey::Endpoint(node.protocol.clone(), node.server.clone(), node.port)
    }
}

/// 按 (协议, 地址, 端口) 去重，地址为空的按 `raw` 去重；保留第一次出现的节点
pub fn dedupe(nodes: &[ProxyNode]) -> Vec<ProxyNode> {
    let mut seen = HashSet::new();
    nodes
        .iter()
        .filter(|node| seen.insert(dedupe_key(node)))
        .cloned()
        .collect()
}

fn is_failed(node: &ProxyNode) -> bool {
    node.probe_result.as_ref().is_some_and(|r| !r.success)
}

/// 未测量记为正无穷
fn tcp_latency(node: &ProxyNode) -> Option<i64> {
    node.probe_result.as_ref().and_then(|r| r.tcp_latency_ms)
}

fn compare_latency(a: &ProxyNode, b: &ProxyNode) -> Ordering {
    is_failed(a).cmp(&is_failed(b)).then_with(|| {
        match (tcp_latency(a), tcp_latency(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    })
}

/// 按 TCP 延迟升序
///
/// 探测失败是第一排序键：失败节点一律排在所有成功节点之后，不看它残留的数值。
pub fn sort_by_latency(nodes: &[ProxyNode]) -> Vec<ProxyNode> {
    let mut sorted = nodes.to_vec();
    sorted.sort_by(compare_latency);
    sorted
}

/// 按名称升序，先忽略大小写比较，再按原文区分
///
/// 不做本地化排序规则：中日韩等非拉丁名称按码位排序，不按拼音或笔画。
pub fn sort_by_name(nodes: &[ProxyNode]) -> Vec<ProxyNode> {
    let mut sorted = nodes.to_vec();
    sorted.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name))
    });
    sorted
}

/// 名称包含关键字（忽略大小写）的节点可见，空关键字全部可见
pub fn filter_by_keyword(nodes: &mut [ProxyNode], keyword: &str) {
    let keyword = keyword.trim().to_lowercase();
    for node in nodes.iter_mut() {
        node.visible = keyword.is_empty() || node.name.to_lowercase().contains(&keyword);
    }
}

/// 切换单个节点的勾选状态，找不到返回 false
pub fn toggle(nodes: &mut [ProxyNode], id: &NodeId) -> bool {
    match nodes.iter_mut().find(|n| &n.id == id) {
        Some(node) => {
            node.checked = !node.checked;
            true
        }
        None => false,
    }
}

/// 对可见节点全选/全不选：可见节点已全部勾选时取消，否则全部勾选
pub fn toggle_all(nodes: &mut [ProxyNode]) {
    let all_checked = nodes.iter().filter(|n| n.visible).all(|n| n.checked);
    for node in nodes.iter_mut().filter(|n| n.visible) {
        node.checked = !all_checked;
    }
}

pub fn selected_count(nodes: &[ProxyNode]) -> usize {
    nodes.iter().filter(|n| n.checked).count()
}

/// 写回一轮探测结果，整体替换而不是合并
pub fn apply_probe_results(nodes: &mut [ProxyNode], results: &HashMap<NodeId, ProbeResult>) {
    for node in nodes.iter_mut() {
        if let Some(result) = results.get(&node.id) {
            node.probe_result = Some(result.clone());
        }
    }
}

/// 已勾选节点的链接，每行一个
pub fn export_text(nodes: &[ProxyNode]) -> String {
    nodes
        .iter()
        .filter(|n| n.checked)
        .map(|n| n.raw.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn export_base64(nodes: &[ProxyNode]) -> String {
    encoding::encode(&export_text(nodes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::parse_link;
    use chrono::Utc;

    fn node(name: &str, server: &str, port: u16) -> ProxyNode {
        ProxyNode::new(
            NodeId::next("test"),
            name.to_string(),
            Protocol::Trojan,
            server.to_string(),
            port,
            format!("trojan://pw@{}:{}#{}", server, port, name),
        )
    }

    fn result(tcp: Option<i64>, success: bool) -> ProbeResult {
        ProbeResult {
            tcp_latency_ms: tcp,
            http_latency_ms: None,
            download_speed_kbps: None,
            edge_region: "HKG".to_string(),
            timestamp: Utc::now(),
            success,
            error: None,
        }
    }

    fn with_result(mut n: ProxyNode, tcp: Option<i64>, success: bool) -> ProxyNode {
        n.probe_result = Some(result(tcp, success));
        n
    }

    fn names(nodes: &[ProxyNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.name.as_str()).collect()
    }

    #[test]
    fn test_dedupe_keeps_first_occurrence() {
        let a = parse_link("vless://u@1.2.3.4:443#First").unwrap();
        let b = parse_link("vless://other@1.2.3.4:443?type=ws#Second").unwrap();
        let deduped = dedupe(&[a.clone(), b]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].name, "First");
        assert_eq!(deduped[0].id, a.id);
    }

    #[test]
    fn test_dedupe_unknown_nodes_by_raw() {
        let nodes = vec![
            ProxyNode::unknown("foo://x"),
            ProxyNode::unknown("foo://y"),
            ProxyNode::unknown("foo://x"),
        ];
        assert_eq!(dedupe(&nodes).len(), 2);
    }

    #[test]
    fn test_dedupe_distinguishes_protocol_and_port() {
        let mut ss = node("ss", "h", 443);
        ss.protocol = Protocol::Ss;
        let nodes = vec![node("a", "h", 443), ss, node("b", "h", 444), node("c", "h", 443)];
        assert_eq!(names(&dedupe(&nodes)), vec!["a", "ss", "b"]);
    }

    #[test]
    fn test_dedupe_is_idempotent() {
        let nodes = vec![
            node("a", "h1", 1),
            node("b", "h1", 1),
            ProxyNode::unknown("zzz"),
            node("c", "h2", 1),
            ProxyNode::unknown("zzz"),
        ];
        let once = dedupe(&nodes);
        let twice = dedupe(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_sort_by_latency_failed_last() {
        let nodes = vec![
            with_result(node("failed-fast", "a", 1), Some(1), false),
            node("unmeasured", "b", 1),
            with_result(node("slow", "c", 1), Some(300), true),
            with_result(node("timeout", "d", 1), Some(-1), false),
            with_result(node("fast", "e", 1), Some(20), true),
            with_result(node("no-tcp", "f", 1), None, true),
        ];
        let sorted = sort_by_latency(&nodes);
        assert_eq!(
            names(&sorted),
            vec!["fast", "slow", "unmeasured", "no-tcp", "timeout", "failed-fast"]
        );
        // 输入不被修改
        assert_eq!(nodes[0].name, "failed-fast");
    }

    #[test]
    fn test_sort_by_name() {
        let nodes = vec![
            node("beta", "a", 1),
            node("Alpha", "b", 1),
            node("alpha", "c", 1),
            node("香港", "d", 1),
        ];
        assert_eq!(names(&sort_by_name(&nodes)), vec!["Alpha", "alpha", "beta", "香港"]);
    }

    #[test]
    fn test_filter_and_toggle_all() {
        let mut nodes = vec![node("HK 01", "a", 1), node("JP 01", "b", 1), node("hk 02", "c", 1)];
        filter_by_keyword(&mut nodes, "hk");
        assert_eq!(nodes.iter().filter(|n| n.visible).count(), 2);

        toggle_all(&mut nodes);
        assert!(!nodes[0].checked);
        assert!(nodes[1].checked);
        assert!(!nodes[2].checked);
        assert_eq!(selected_count(&nodes), 1);

        toggle_all(&mut nodes);
        assert_eq!(selected_count(&nodes), 3);

        filter_by_keyword(&mut nodes, "  ");
        assert!(nodes.iter().all(|n| n.visible));
    }

    #[test]
    fn test_toggle_single() {
        let mut nodes = vec![node("a", "a", 1)];
        let id = nodes[0].id.clone();
        assert!(toggle(&mut nodes, &id));
        assert!(!nodes[0].checked);
        assert!(!toggle(&mut nodes, &NodeId::next("missing")));
    }

    #[test]
    fn test_apply_probe_results_replaces() {
        let mut nodes = vec![
            with_result(node("a", "a", 1), Some(10), true),
            with_result(node("b", "b", 1), Some(20), true),
        ];
        let mut results = HashMap::new();
        results.insert(nodes[0].id.clone(), result(Some(-1), false));
        apply_probe_results(&mut nodes, &results);

        let first = nodes[0].probe_result.as_ref().unwrap();
        assert!(!first.success);
        assert_eq!(first.tcp_latency_ms, Some(-1));
        assert_eq!(nodes[1].probe_result.as_ref().unwrap().tcp_latency_ms, Some(20));
    }

    #[test]
    fn test_export_only_checked() {
        let mut nodes = vec![node("a", "h1", 1), node("b", "h2", 2)];
        nodes[1].checked = false;
        assert_eq!(export_text(&nodes), "trojan://pw@h1:1#a");
        assert_eq!(
            encoding::decode(&export_base64(&nodes)).unwrap(),
            "trojan://pw@h1:1#a"
        );
    }
}
