use crate::orchestration::error::RoutingError;
use crate::shared::ids::{FlowKey, NodeId};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_INTERRUPTION_DEPTH: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    InjectedFlow,
    Detour,
    InjectedNodes,
}

/// Where to resume once an injected flow or inline chain finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterruptionFrame {
    pub flow_key: FlowKey,
    pub step_id: NodeId,
    pub saved_at: i64,
    pub reason: String,
    pub kind: FrameKind,
    /// Inline stations still pending at the suspended position, restored on return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_chain: Option<Vec<NodeId>>,
}

/// Bounded LIFO of suspended positions. A rejected push leaves the stack untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterruptionStack {
    max_depth: usize,
    frames: Vec<InterruptionFrame>,
}

impl Default for InterruptionStack {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_INTERRUPTION_DEPTH)
    }
}

impl InterruptionStack {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            frames: Vec::new(),
        }
    }

    pub fn from_frames(max_depth: usize, frames: Vec<InterruptionFrame>) -> Self {
        Self { max_depth, frames }
    }

    pub fn push(&mut self, frame: InterruptionFrame) -> Result<(), RoutingError> {
        if self.frames.len() >= self.max_depth {
            return Err(RoutingError::StackOverflow {
                max_depth: self.max_depth,
            });
        }
        self.frames.push(frame);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<InterruptionFrame, RoutingError> {
        self.frames.pop().ok_or(RoutingError::EmptyStack)
    }

    pub fn peek(&self) -> Option<&InterruptionFrame> {
        self.frames.last()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[InterruptionFrame] {
        &self.frames
    }

    pub fn into_frames(self) -> Vec<InterruptionFrame> {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(step: &str) -> InterruptionFrame {
        InterruptionFrame {
            flow_key: FlowKey::parse("build").expect("flow key"),
            step_id: NodeId::parse(step).expect("node id"),
            saved_at: 10,
            reason: "test".to_string(),
            kind: FrameKind::InjectedFlow,
            resume_chain: None,
        }
    }

    #[test]
    fn push_and_pop_are_last_in_first_out() {
        let mut stack = InterruptionStack::new(3);
        stack.push(frame("a")).expect("push a");
        stack.push(frame("b")).expect("push b");
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.peek().map(|f| f.step_id.as_str()), Some("b"));
        assert_eq!(stack.pop().expect("pop").step_id.as_str(), "b");
        assert_eq!(stack.pop().expect("pop").step_id.as_str(), "a");
        assert!(stack.is_empty());
    }

    #[test]
    fn push_beyond_max_depth_fails_without_mutating() {
        let mut stack = InterruptionStack::default();
        for step in ["a", "b", "c", "d"] {
            stack.push(frame(step)).expect("push within bound");
        }
        let before = stack.clone();
        let err = stack.push(frame("e")).expect_err("fifth push overflows");
        assert!(matches!(err, RoutingError::StackOverflow { max_depth: 4 }));
        assert_eq!(stack, before);
    }

    #[test]
    fn pop_on_empty_stack_is_an_error() {
        let mut stack = InterruptionStack::new(2);
        assert!(matches!(stack.pop(), Err(RoutingError::EmptyStack)));
        assert!(stack.peek().is_none());
    }
}
