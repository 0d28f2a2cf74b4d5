//! 单轮对话状态机
//!
//! AwaitingInput -> ReasoningCall -> { ActionRequested -> ToolExecution -> ReasoningCall | FinalAnswer -> Persisted }

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    AwaitingInput,
    ReasoningCall,
    ActionRequested,
    ToolExecution,
    FinalAnswer,
    Persisted,
}

impl TurnState {
    /// 是否为合法迁移
    pub fn can_transition_to(self, next: TurnState) -> bool {
        use TurnState::*;
        matches!(
            (self, next),
            (AwaitingInput, ReasoningCall)
                | (ReasoningCall, ActionRequested)
                | (ReasoningCall, FinalAnswer)
                | (ActionRequested, ToolExecution)
                | (ToolExecution, ReasoningCall)
                | (ToolExecution, FinalAnswer)
                | (FinalAnswer, Persisted)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == TurnState::Persisted
    }
}

/// 记录当前状态并校验迁移；非法迁移只记日志，不中断对话
#[derive(Debug)]
pub(crate) struct TurnMachine {
    state: TurnState,
}

impl TurnMachine {
    pub(crate) fn new() -> Self {
        Self {
            state: TurnState::AwaitingInput,
        }
    }

    pub(crate) fn state(&self) -> TurnState {
        self.state
    }

    pub(crate) fn advance(&mut self, next: TurnState) -> TurnState {
        if !self.state.can_transition_to(next) {
            tracing::warn!(from = ?self.state, to = ?next, "unexpected turn state transition");
        }
        tracing::debug!(from = ?self.state, to = ?next, "turn state");
        self.state = next;
        next
    }
}
