//! 消息模型：单条对话消息（角色 + 文本 + 可选的工具调用请求 / 工具结果关联）
//!
//! 所有来源（存储、推理引擎、工具桥）在边界处统一转换为 Message；
//! Message 创建后不可变，修复时通过 `rewritten` 生成带新 id 的副本。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// 消息角色（与 OpenAI 兼容 API 一致，Tool 即「工具结果」）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    /// 宽松解析角色名，兼容常见别名（human / ai / action-result / function）
    pub fn parse_lenient(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Some(Role::System),
            "user" | "human" => Some(Role::User),
            "assistant" | "ai" => Some(Role::Assistant),
            "tool" | "action-result" | "action_result" | "function" => Some(Role::Tool),
            _ => None,
        }
    }
}

/// 推理引擎发出的单个工具调用请求
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// 关联 id，对应工具结果消息的 tool_call_id
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    /// id 为空时生成新 id
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        let id = id.into();
        let id = if id.trim().is_empty() {
            new_call_id()
        } else {
            id
        };
        Self {
            id,
            name: name.into(),
            arguments,
        }
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    /// 仅 assistant 消息携带
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// 仅 tool 消息携带，指向发起请求的 ToolCall.id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: new_message_id(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// 携带工具调用请求的 assistant 消息
    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, content)
        }
    }

    /// 工具结果消息，关联到 call_id
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::new(Role::Tool, content)
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn is_tool_result(&self) -> bool {
        self.role == Role::Tool
    }

    /// 生成副本：保留 role / created_at，替换 content 与 tool_calls，分配新 id；原消息不变
    pub fn rewritten(&self, content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            id: new_message_id(),
            role: self.role,
            content: content.into(),
            tool_calls,
            tool_call_id: self.tool_call_id.clone(),
            created_at: self.created_at,
        }
    }

    /// 去掉全部工具调用请求，并在正文末尾追加标记
    pub fn without_tool_calls(&self, marker: &str) -> Self {
        let content = if self.content.trim().is_empty() {
            marker.to_string()
        } else {
            format!("{} {}", self.content, marker)
        };
        self.rewritten(content, Vec::new())
    }
}

fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}

fn new_call_id() -> String {
    format!("call_{}", Uuid::new_v4().simple())
}

/// 边界处的历史规范化：把任意形状的 JSON 转成 Message 序列
///
/// 接受 `{"messages": [...]}`、裸数组或单条消息对象；无法解释的条目跳过并记录警告，
/// 本函数从不失败。
pub fn normalize_history(raw: &Value) -> Vec<Message> {
    let items: Vec<&Value> = match raw {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => match map.get("messages") {
            Some(Value::Array(items)) => items.iter().collect(),
            _ => vec![raw],
        },
        Value::Null => Vec::new(),
        other => vec![other],
    };
    items
        .into_iter()
        .enumerate()
        .filter_map(|(idx, item)| {
            let msg = normalize_message(item);
            if msg.is_none() {
                tracing::warn!(index = idx, "skipping uninterpretable history entry");
            }
            msg
        })
        .collect()
}

/// 单条消息规范化；仅在条目既不是对象也不是字符串时返回 None
pub fn normalize_message(raw: &Value) -> Option<Message> {
    let obj = match raw {
        Value::String(s) => return Some(Message::user(s.clone())),
        Value::Object(obj) => obj,
        _ => return None,
    };

    let tool_calls = obj
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| calls.iter().filter_map(normalize_tool_call).collect::<Vec<_>>())
        .unwrap_or_default();
    let tool_call_id = obj
        .get("tool_call_id")
        .or_else(|| obj.get("correlation_id"))
        .and_then(Value::as_str)
        .map(String::from);

    let role = obj
        .get("role")
        .or_else(|| obj.get("type"))
        .and_then(Value::as_str)
        .and_then(Role::parse_lenient)
        .unwrap_or(if tool_call_id.is_some() {
            Role::Tool
        } else if !tool_calls.is_empty() {
            Role::Assistant
        } else {
            Role::User
        });

    let mut msg = Message::new(role, content_text(obj.get("content")));
    if let Some(id) = obj.get("id").and_then(Value::as_str) {
        if !id.is_empty() {
            msg.id = id.to_string();
        }
    }
    if let Some(ts) = obj
        .get("created_at")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    {
        msg.created_at = ts.with_timezone(&Utc);
    }
    if role == Role::Assistant {
        msg.tool_calls = tool_calls;
    }
    if role == Role::Tool {
        msg.tool_call_id = tool_call_id;
    }
    Some(msg)
}

/// content 可能是字符串、文本块数组或其它值
fn content_text(content: Option<&Value>) -> String {
    match content {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|b| match b {
                Value::String(s) => Some(s.clone()),
                Value::Object(o) => o.get("text").and_then(Value::as_str).map(String::from),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
    }
}

/// 兼容扁平 `{id, name, arguments}` 与 OpenAI `{id, function: {name, arguments}}` 两种形状
fn normalize_tool_call(raw: &Value) -> Option<ToolCall> {
    let obj = raw.as_object()?;
    let function = obj.get("function").and_then(Value::as_object);
    let name = function
        .and_then(|f| f.get("name"))
        .or_else(|| obj.get("name"))
        .and_then(Value::as_str)?;
    let arguments = function
        .and_then(|f| f.get("arguments"))
        .or_else(|| obj.get("arguments"))
        .or_else(|| obj.get("args"))
        .map(parse_arguments)
        .unwrap_or_else(|| Value::Object(Default::default()));
    let id = obj.get("id").and_then(Value::as_str).unwrap_or_default();
    Some(ToolCall::new(id, name, arguments))
}

/// 参数可能是 JSON 字符串；解析失败时保留原字符串
pub(crate) fn parse_arguments(raw: &Value) -> Value {
    match raw {
        Value::String(s) if s.trim().is_empty() => Value::Object(Default::default()),
        Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone())),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rewritten_keeps_original_untouched() {
        let call = ToolCall::new("c1", "calculate_emi", json!({"principal": 5000}));
        let original = Message::assistant_with_tool_calls("let me check", vec![call]);
        let copy = original.without_tool_calls("[dropped]");

        assert!(original.has_tool_calls());
        assert!(!copy.has_tool_calls());
        assert_ne!(copy.id, original.id);
        assert_eq!(copy.created_at, original.created_at);
        assert_eq!(copy.role, Role::Assistant);
        assert_eq!(copy.content, "let me check [dropped]");
    }

    #[test]
    fn test_without_tool_calls_on_empty_content() {
        let call = ToolCall::new("c1", "echo", json!({}));
        let msg = Message::assistant_with_tool_calls("", vec![call]);
        assert_eq!(msg.without_tool_calls("[x]").content, "[x]");
    }

    #[test]
    fn test_tool_call_gets_generated_id() {
        let call = ToolCall::new("", "echo", json!({}));
        assert!(call.id.starts_with("call_"));
    }

    #[test]
    fn test_normalize_mapping_with_messages() {
        let raw = json!({
            "messages": [
                {"type": "human", "content": "hi"},
                {"type": "ai", "content": "", "tool_calls": [
                    {"id": "c1", "function": {"name": "check_settlement_policy", "arguments": "{\"debt_amount\": 12000}"}}
                ]},
                {"role": "tool", "tool_call_id": "c1", "content": [{"type": "text", "text": "20%"}]},
                42
            ]
        });
        let msgs = normalize_history(&raw);
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].role, Role::User);
        assert_eq!(msgs[1].tool_calls[0].name, "check_settlement_policy");
        assert_eq!(msgs[1].tool_calls[0].arguments["debt_amount"], 12000);
        assert_eq!(msgs[2].role, Role::Tool);
        assert_eq!(msgs[2].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(msgs[2].content, "20%");
    }

    #[test]
    fn test_normalize_infers_role_from_fields() {
        let msgs = normalize_history(&json!([
            {"content": "plain"},
            {"tool_call_id": "c9", "content": "ok"},
            {"tool_calls": [{"name": "echo", "arguments": {}}]},
            "bare string"
        ]));
        let roles: Vec<Role> = msgs.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Tool, Role::Assistant, Role::User]);
    }

    #[test]
    fn test_normalize_single_object_and_garbage() {
        assert_eq!(normalize_history(&json!({"role": "system", "content": "s"})).len(), 1);
        assert!(normalize_history(&json!(null)).is_empty());
        assert!(normalize_history(&json!(3.5)).is_empty());
    }

    #[test]
    fn test_serde_roundtrip_preserves_identity() {
        let msg = Message::tool_result("c1", "done");
        let raw = serde_json::to_value(&msg).unwrap();
        let back = normalize_message(&raw).unwrap();
        assert_eq!(back, msg);
    }
}
