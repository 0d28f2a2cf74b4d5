//! 单轮对话编排器
//!
//! 加载会话历史 -> 追加用户消息 -> 清洗窗口 -> 推理 -> 执行工具 -> 循环 -> 持久化完整（未清洗）历史。
//! 推理失败与工具失败都被吸收为可见文本；只有读写存储的错误返回给调用方。
//! 同一编排器内，同一 thread_id 的多轮按顺序执行。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::core::state::TurnMachine;
use crate::core::{AgentError, TurnEvent, TurnState};
use crate::llm::LlmClient;
use crate::memory::{HistorySanitizer, Message, SanitizeMode, ThreadStore};
use crate::tools::ToolExecutor;

/// 推理引擎调用失败时的回复
pub const REASONING_FAILED_REPLY: &str =
    "I apologize, but I encountered an error connecting to my brain. Please try again.";
/// 超出循环上限时的回复
pub const ITERATION_LIMIT_REPLY: &str =
    "I'm sorry, I couldn't finish working on that request. Could you rephrase it or try again?";
/// 推理引擎返回空文本时的回复
pub const EMPTY_REPLY: &str = "I'm thinking...";

/// 默认推理调用次数上限
pub const DEFAULT_MAX_ITERATIONS: usize = 6;

/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 本轮以兜底回复结束的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    ReasoningFailed(String),
    IterationLimit,
}

/// 单轮结果
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub thread_id: String,
    pub reply: String,
    pub final_state: TurnState,
    /// 推理调用次数
    pub iterations: usize,
    /// 本轮执行的工具调用数
    pub tool_calls: usize,
    pub fallback: Option<FallbackReason>,
    /// 持久化后的历史长度
    pub history_len: usize,
}

/// 单轮请求：thread_id + 用户输入，可选系统提示词与事件通道
pub struct TurnRequest<'a> {
    pub thread_id: &'a str,
    pub input: &'a str,
    pub system_prompt: Option<&'a str>,
    pub event_tx: Option<&'a mpsc::UnboundedSender<TurnEvent>>,
}

impl<'a> TurnRequest<'a> {
    pub fn new(thread_id: &'a str, input: &'a str) -> Self {
        Self {
            thread_id,
            input,
            system_prompt: None,
            event_tx: None,
        }
    }

    /// 覆盖编排器默认的系统提示词（每次推理前注入，不持久化）
    pub fn with_system_prompt(mut self, prompt: &'a str) -> Self {
        self.system_prompt = Some(prompt);
        self
    }

    /// 设置事件推送通道
    pub fn with_event_tx(mut self, tx: &'a mpsc::UnboundedSender<TurnEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }
}

fn send_event(tx: Option<&mpsc::UnboundedSender<TurnEvent>>, ev: TurnEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}

fn preview(s: &str) -> String {
    if s.chars().count() > OBSERVATION_PREVIEW_CHARS {
        format!("{}...", s.chars().take(OBSERVATION_PREVIEW_CHARS).collect::<String>())
    } else {
        s.to_string()
    }
}

/// 对话编排器：共享推理客户端、工具执行器与存储，可被多个会话并发使用
pub struct TurnOrchestrator {
    llm: Arc<dyn LlmClient>,
    executor: Arc<ToolExecutor>,
    store: Arc<dyn ThreadStore>,
    sanitizer: HistorySanitizer,
    max_iterations: usize,
    system_prompt: Option<String>,
    thread_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TurnOrchestrator {
    pub fn new(llm: Arc<dyn LlmClient>, executor: Arc<ToolExecutor>, store: Arc<dyn ThreadStore>) -> Self {
        Self {
            llm,
            executor,
            store,
            sanitizer: HistorySanitizer::default(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            system_prompt: None,
            thread_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_sanitizer(mut self, sanitizer: HistorySanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    /// 推理调用次数上限（至少为 1）
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn executor(&self) -> &Arc<ToolExecutor> {
        &self.executor
    }

    /// 推理客户端累计 token 用量 (prompt, completion, total)
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 简便入口：无事件通道、使用默认系统提示词
    pub async fn run_turn(&self, thread_id: &str, input: &str) -> Result<TurnOutcome, AgentError> {
        self.run(TurnRequest::new(thread_id, input)).await
    }

    /// 读取会话历史（未清洗）
    pub async fn history(&self, thread_id: &str) -> Result<Vec<Message>, AgentError> {
        Ok(self.store.load(thread_id).await?)
    }

    /// 清空会话
    pub async fn reset(&self, thread_id: &str) -> Result<(), AgentError> {
        let lock = self.thread_lock(thread_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.store.delete(thread_id).await
        };
        self.release_thread_lock(thread_id, lock).await;
        result?;
        tracing::info!(thread_id, "thread reset");
        Ok(())
    }

    async fn thread_lock(&self, thread_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.thread_locks.lock().await;
        locks
            .entry(thread_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// 无其他持有者时移除会话锁，避免锁表随会话数无限增长
    async fn release_thread_lock(&self, thread_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.thread_locks.lock().await;
        drop(lock);
        if locks.get(thread_id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(thread_id);
        }
    }

    /// 执行一轮对话
    pub async fn run(&self, req: TurnRequest<'_>) -> Result<TurnOutcome, AgentError> {
        let thread_id = req.thread_id;
        let lock = self.thread_lock(thread_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.run_locked(req).await
        };
        self.release_thread_lock(thread_id, lock).await;
        result
    }

    async fn run_locked(&self, req: TurnRequest<'_>) -> Result<TurnOutcome, AgentError> {
        let tx = req.event_tx;
        let system_prompt = req.system_prompt.or(self.system_prompt.as_deref());
        let tools = self.executor.specs();
        let mut machine = TurnMachine::new();

        let mut history = self.store.load(req.thread_id).await.map_err(|e| {
            tracing::error!(thread_id = %req.thread_id, error = %e, "failed to load thread history");
            AgentError::from(e)
        })?;
        tracing::info!(
            thread_id = %req.thread_id,
            history_len = history.len(),
            backend = self.store.backend_name(),
            "turn started"
        );
        history.push(Message::user(req.input));

        let mut iterations = 0;
        let mut tool_calls = 0;
        let mut reply: Option<String> = None;
        let mut fallback = None;

        while iterations < self.max_iterations {
            iterations += 1;
            send_event(tx, TurnEvent::State {
                state: machine.advance(TurnState::ReasoningCall),
                iteration: iterations,
            });

            let (window, report) = self
                .sanitizer
                .sanitize_with_report(&history, SanitizeMode::ForReasoning);
            if !report.is_clean() {
                tracing::info!(
                    window_len = report.window_len,
                    rewritten = report.rewritten,
                    dropped = report.dropped,
                    "history window repaired"
                );
                send_event(tx, TurnEvent::Sanitized {
                    window_len: report.window_len,
                    rewritten: report.rewritten,
                    dropped: report.dropped,
                });
            }

            let mut context = Vec::with_capacity(window.len() + 1);
            if let Some(prompt) = system_prompt {
                context.push(Message::system(prompt));
            }
            context.extend(window);

            let assistant = match self.llm.complete(&context, &tools).await {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(iteration = iterations, error = %e, "reasoning call failed");
                    send_event(tx, TurnEvent::Error { text: e.to_string() });
                    history.push(Message::assistant(REASONING_FAILED_REPLY));
                    reply = Some(REASONING_FAILED_REPLY.to_string());
                    fallback = Some(FallbackReason::ReasoningFailed(e.to_string()));
                    break;
                }
            };

            if !assistant.has_tool_calls() {
                let text = if assistant.content.trim().is_empty() {
                    EMPTY_REPLY.to_string()
                } else {
                    assistant.content.clone()
                };
                history.push(assistant);
                reply = Some(text);
                break;
            }

            send_event(tx, TurnEvent::State {
                state: machine.advance(TurnState::ActionRequested),
                iteration: iterations,
            });
            let pending = assistant.tool_calls.clone();
            history.push(assistant);

            send_event(tx, TurnEvent::State {
                state: machine.advance(TurnState::ToolExecution),
                iteration: iterations,
            });
            for call in &pending {
                tracing::info!(tool = %call.name, call_id = %call.id, "tool call");
                send_event(tx, TurnEvent::ToolCall {
                    tool: call.name.clone(),
                    args: call.arguments.clone(),
                });
            }
            let results = self.executor.invoke_all(&pending).await;
            for (call, result) in pending.iter().zip(&results) {
                send_event(tx, TurnEvent::Observation {
                    tool: call.name.clone(),
                    preview: preview(&result.content),
                });
            }
            tool_calls += results.len();
            history.extend(results);
        }

        let reply = match reply {
            Some(r) => r,
            None => {
                tracing::warn!(
                    thread_id = %req.thread_id,
                    max_iterations = self.max_iterations,
                    "iteration limit reached"
                );
                send_event(tx, TurnEvent::Error {
                    text: format!("iteration limit ({}) reached", self.max_iterations),
                });
                history.push(Message::assistant(ITERATION_LIMIT_REPLY));
                fallback = Some(FallbackReason::IterationLimit);
                ITERATION_LIMIT_REPLY.to_string()
            }
        };

        machine.advance(TurnState::FinalAnswer);
        send_event(tx, TurnEvent::State {
            state: TurnState::FinalAnswer,
            iteration: iterations,
        });
        send_event(tx, TurnEvent::Reply { text: reply.clone() });

        self.store.save(req.thread_id, &history).await.map_err(|e| {
            tracing::error!(thread_id = %req.thread_id, error = %e, "failed to persist thread history");
            AgentError::from(e)
        })?;
        let final_state = machine.advance(TurnState::Persisted);
        send_event(tx, TurnEvent::State {
            state: final_state,
            iteration: iterations,
        });
        tracing::info!(
            thread_id = %req.thread_id,
            iterations,
            tool_calls,
            history_len = history.len(),
            fallback = fallback.is_some(),
            "turn completed"
        );

        Ok(TurnOutcome {
            thread_id: req.thread_id.to_string(),
            reply,
            final_state,
            iterations,
            tool_calls,
            fallback,
            history_len: history.len(),
        })
    }
}
