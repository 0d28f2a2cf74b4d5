//! 历史清洗器：尾部窗口截取 + 工具调用 / 工具结果配对修复
//!
//! 输入为完整（未截断）的对话历史，输出为交给推理引擎的有界窗口：
//! - 取最后 window_size 条消息（纯位置截取）；
//! - 带工具调用的 assistant 消息，若其后没有对应的工具结果，改写为纯文本（新 id）；
//! - 窗口首条为工具结果时丢弃（其请求已落在窗口左侧之外）；
//! - 其它消息原样保留。
//!
//! 工具结果是唯一会被整条丢弃的消息类型，其余消息只保留或改写。

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::memory::{Message, Role};

/// 中途的工具调用没有紧随其后的结果
pub const DROPPED_MARKER: &str = "[Tool Call Dropped due to Error]";
/// 窗口末尾的工具调用尚未执行
pub const INTERRUPTED_MARKER: &str = "[Tool Call Interrupted]";

pub const DEFAULT_WINDOW_SIZE: usize = 10;

/// 窗口末尾挂起的工具调用如何处理
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SanitizeMode {
    /// 窗口直接交给推理引擎：末尾挂起的请求被改写
    ForReasoning,
    /// 窗口即将被执行：末尾挂起的请求原样保留
    ForExecution,
}

/// 工具结果与请求的配对校验方式
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrphanPolicy {
    /// 按 tool_call_id 校验：请求必须被紧随其后的连续结果全部应答，无法关联的结果一律丢弃
    #[default]
    Strict,
    /// 仅按角色相邻判断，只丢弃窗口首条的工具结果
    Leading,
}

/// 单次清洗的统计
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SanitizeReport {
    pub window_len: usize,
    pub rewritten: usize,
    pub dropped: usize,
}

impl SanitizeReport {
    pub fn is_clean(&self) -> bool {
        self.rewritten == 0 && self.dropped == 0
    }
}

#[derive(Clone, Debug)]
pub struct HistorySanitizer {
    window_size: usize,
    orphan_policy: OrphanPolicy,
}

impl Default for HistorySanitizer {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

impl HistorySanitizer {
    /// 窗口至少保留 1 条消息
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            orphan_policy: OrphanPolicy::default(),
        }
    }

    pub fn with_orphan_policy(mut self, policy: OrphanPolicy) -> Self {
        self.orphan_policy = policy;
        self
    }

    pub fn sanitize(&self, history: &[Message], mode: SanitizeMode) -> Vec<Message> {
        self.sanitize_with_report(history, mode).0
    }

    /// 清洗并返回统计；对任何输入都不会 panic
    pub fn sanitize_with_report(
        &self,
        history: &[Message],
        mode: SanitizeMode,
    ) -> (Vec<Message>, SanitizeReport) {
        let start = history.len().saturating_sub(self.window_size);
        let window = &history[start..];
        let mut report = SanitizeReport {
            window_len: window.len(),
            ..Default::default()
        };
        let mut out = Vec::with_capacity(window.len());
        // 最近一条被保留的 assistant 中尚未应答的请求 id
        let mut open: HashSet<&str> = HashSet::new();

        for (idx, msg) in window.iter().enumerate() {
            match msg.role {
                Role::Assistant if msg.has_tool_calls() => {
                    open.clear();
                    let rest = &window[idx + 1..];
                    if rest.is_empty() {
                        match mode {
                            SanitizeMode::ForExecution => {
                                open.extend(msg.tool_calls.iter().map(|c| c.id.as_str()));
                                out.push(msg.clone());
                            }
                            SanitizeMode::ForReasoning => {
                                tracing::debug!(id = %msg.id, "stripping pending tool call at window tail");
                                report.rewritten += 1;
                                out.push(msg.without_tool_calls(INTERRUPTED_MARKER));
                            }
                        }
                    } else if self.is_answered(msg, rest) {
                        open.extend(msg.tool_calls.iter().map(|c| c.id.as_str()));
                        out.push(msg.clone());
                    } else {
                        tracing::debug!(id = %msg.id, "stripping tool call without matching result");
                        report.rewritten += 1;
                        out.push(msg.without_tool_calls(DROPPED_MARKER));
                    }
                }
                Role::Tool => {
                    if idx == 0 {
                        tracing::debug!(id = %msg.id, "dropping orphan tool result at window head");
                        report.dropped += 1;
                        continue;
                    }
                    let keep = match self.orphan_policy {
                        OrphanPolicy::Leading => true,
                        OrphanPolicy::Strict => msg
                            .tool_call_id
                            .as_deref()
                            .map(|id| open.remove(id))
                            .unwrap_or(false),
                    };
                    if keep {
                        out.push(msg.clone());
                    } else {
                        tracing::debug!(id = %msg.id, "dropping uncorrelated tool result");
                        report.dropped += 1;
                    }
                }
                _ => {
                    open.clear();
                    out.push(msg.clone());
                }
            }
        }

        (out, report)
    }

    /// 判断 assistant 的工具调用是否被紧随其后的消息应答
    fn is_answered(&self, msg: &Message, rest: &[Message]) -> bool {
        match self.orphan_policy {
            OrphanPolicy::Leading => rest.first().map(Message::is_tool_result).unwrap_or(false),
            OrphanPolicy::Strict => {
                let answered: HashSet<&str> = rest
                    .iter()
                    .take_while(|m| m.is_tool_result())
                    .filter_map(|m| m.tool_call_id.as_deref())
                    .collect();
                msg.tool_calls.iter().all(|c| answered.contains(c.id.as_str()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ToolCall;
    use serde_json::json;

    fn call(id: &str) -> ToolCall {
        ToolCall::new(id, "check_settlement_policy", json!({"debt_amount": 12000}))
    }

    fn request(ids: &[&str]) -> Message {
        Message::assistant_with_tool_calls("", ids.iter().map(|id| call(id)).collect())
    }

    fn ids(msgs: &[Message]) -> Vec<String> {
        msgs.iter().map(|m| m.id.clone()).collect()
    }

    #[test]
    fn test_pair_inside_window_is_preserved() {
        let history = vec![
            Message::user("I owe 12000"),
            request(&["c1"]),
            Message::tool_result("c1", "max 20%"),
            Message::assistant("We can offer 20%."),
        ];
        for size in [3, 4, 10] {
            let out = HistorySanitizer::new(size).sanitize(&history, SanitizeMode::ForReasoning);
            let start = history.len() - size.min(history.len());
            assert_eq!(out, history[start..].to_vec(), "window {size}");
        }
    }

    #[test]
    fn test_window_head_result_is_dropped_and_nothing_else() {
        let history = vec![
            Message::user("hi"),
            request(&["c1"]),
            Message::tool_result("c1", "ok"),
            Message::assistant("done"),
            Message::user("thanks"),
        ];
        let (out, report) = HistorySanitizer::new(3).sanitize_with_report(&history, SanitizeMode::ForReasoning);
        assert_eq!(ids(&out), ids(&history[3..]));
        assert_eq!(report.dropped, 1);
        assert_eq!(report.rewritten, 0);
    }

    #[test]
    fn test_trailing_request_depends_on_mode() {
        let history = vec![Message::user("emi?"), request(&["c1"])];
        let sanitizer = HistorySanitizer::default();

        let exec = sanitizer.sanitize(&history, SanitizeMode::ForExecution);
        assert_eq!(exec, history);

        let reasoning = sanitizer.sanitize(&history, SanitizeMode::ForReasoning);
        assert_eq!(reasoning.len(), 2);
        assert!(!reasoning[1].has_tool_calls());
        assert!(reasoning[1].content.contains(INTERRUPTED_MARKER));
        assert_ne!(reasoning[1].id, history[1].id);
    }

    #[test]
    fn test_request_followed_by_user_is_rewritten() {
        let history = vec![request(&["c1"]), Message::user("never mind")];
        let out = HistorySanitizer::default().sanitize(&history, SanitizeMode::ForReasoning);
        assert_eq!(out.len(), 2);
        assert!(!out[0].has_tool_calls());
        assert!(out[0].content.contains(DROPPED_MARKER));
        assert_eq!(out[1], history[1]);
    }

    #[test]
    fn test_strict_rejects_mismatched_correlation() {
        let history = vec![
            Message::user("q"),
            request(&["c1"]),
            Message::tool_result("other", "stale"),
            Message::user("again"),
        ];
        let (out, report) =
            HistorySanitizer::default().sanitize_with_report(&history, SanitizeMode::ForReasoning);
        assert_eq!(out.len(), 3);
        assert!(!out[1].has_tool_calls());
        assert!(out.iter().all(|m| !m.is_tool_result()));
        assert_eq!(report.rewritten, 1);
        assert_eq!(report.dropped, 1);
    }

    #[test]
    fn test_leading_policy_only_checks_adjacency() {
        let history = vec![
            Message::user("q"),
            request(&["c1"]),
            Message::tool_result("other", "stale"),
        ];
        let out = HistorySanitizer::default()
            .with_orphan_policy(OrphanPolicy::Leading)
            .sanitize(&history, SanitizeMode::ForReasoning);
        assert_eq!(out, history);
    }

    #[test]
    fn test_parallel_calls_need_every_result() {
        let complete = vec![
            Message::user("q"),
            request(&["a", "b"]),
            Message::tool_result("b", "2"),
            Message::tool_result("a", "1"),
        ];
        let out = HistorySanitizer::default().sanitize(&complete, SanitizeMode::ForReasoning);
        assert_eq!(out, complete);

        let partial = vec![
            Message::user("q"),
            request(&["a", "b"]),
            Message::tool_result("a", "1"),
            Message::assistant("partial"),
        ];
        let out = HistorySanitizer::default().sanitize(&partial, SanitizeMode::ForReasoning);
        assert_eq!(out.len(), 3);
        assert!(!out[1].has_tool_calls());
        assert!(out.iter().all(|m| !m.is_tool_result()));
    }

    #[test]
    fn test_leading_run_of_results_is_removed() {
        let history = vec![
            request(&["a", "b"]),
            Message::tool_result("a", "1"),
            Message::tool_result("b", "2"),
            Message::assistant("answer"),
        ];
        let out = HistorySanitizer::new(3).sanitize(&history, SanitizeMode::ForReasoning);
        assert_eq!(out, vec![history[3].clone()]);
    }

    #[test]
    fn test_reasoning_mode_is_idempotent() {
        let history = vec![
            Message::system("persona"),
            Message::tool_result("lost", "orphan"),
            Message::user("q1"),
            request(&["c1"]),
            Message::tool_result("c1", "r1"),
            request(&["c2"]),
            Message::user("interrupt"),
            request(&["c3", "c4"]),
            Message::tool_result("c3", "r3"),
            Message::tool_result("c4", "r4"),
            Message::assistant("final"),
            request(&["c5"]),
        ];
        for size in [1, 2, 5, 10, 12, 20] {
            let sanitizer = HistorySanitizer::new(size);
            let once = sanitizer.sanitize(&history, SanitizeMode::ForReasoning);
            let twice = sanitizer.sanitize(&once, SanitizeMode::ForReasoning);
            assert_eq!(once, twice, "window {size}");
            assert!(once.len() <= size);
        }
    }

    #[test]
    fn test_output_never_holds_unanswered_requests() {
        let history = vec![
            Message::user("q"),
            request(&["c1"]),
            Message::assistant("oops"),
            request(&["c2"]),
            Message::tool_result("c2", "ok"),
            request(&["c3"]),
        ];
        let out = HistorySanitizer::default().sanitize(&history, SanitizeMode::ForReasoning);
        for (i, m) in out.iter().enumerate() {
            if m.has_tool_calls() {
                let next = out.get(i + 1).expect("request must be followed");
                assert!(next.is_tool_result());
            }
        }
        assert_eq!(out.len(), history.len());
    }

    #[test]
    fn test_empty_history() {
        assert!(HistorySanitizer::new(0).sanitize(&[], SanitizeMode::ForReasoning).is_empty());
        assert!(HistorySanitizer::default().sanitize(&[], SanitizeMode::ForReasoning).is_empty());
    }

    #[test]
    fn test_zero_window_keeps_latest_message() {
        let history = vec![Message::user("old"), Message::user("latest")];
        let out = HistorySanitizer::new(0).sanitize(&history, SanitizeMode::ForReasoning);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].content, "latest");
    }
}
