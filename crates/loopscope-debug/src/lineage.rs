use crate::sync::lock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// One entry on a session's call stack.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFrame {
    pub func_name: String,
    pub lineage_id: String,
}

/// Identifies a pushed frame so its owner pops exactly that frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameId(u64);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineageDecision {
    pub lineage_id: String,
    pub is_root: bool,
    pub is_context_switch: bool,
}

pub fn new_lineage_id() -> String {
    Uuid::new_v4().to_string()
}

/// LIFO stack of the frames currently executing in one session.
#[derive(Clone, Debug, Default)]
pub struct CallStack {
    frames: Vec<(FrameId, CallFrame)>,
    next_frame_id: u64,
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lineage for a call to `func_name` made from the current top of stack.
    ///
    /// Root calls take `initial_lineage_id` (or a fresh id when none was
    /// given), a different function than the top frame starts a fresh
    /// lineage, and direct self-recursion inherits the caller's lineage.
    pub fn decide(&self, func_name: &str, initial_lineage_id: Option<&str>) -> LineageDecision {
        let Some(top) = self.top() else {
            return LineageDecision {
                lineage_id: initial_lineage_id
                    .map(str::to_string)
                    .unwrap_or_else(new_lineage_id),
                is_root: true,
                is_context_switch: false,
            };
        };

        if top.func_name != func_name {
            return LineageDecision {
                lineage_id: new_lineage_id(),
                is_root: false,
                is_context_switch: true,
            };
        }

        LineageDecision {
            lineage_id: top.lineage_id.clone(),
            is_root: false,
            is_context_switch: false,
        }
    }

    /// Decides the lineage for `func_name` and pushes its frame.
    pub fn enter(
        &mut self,
        func_name: &str,
        initial_lineage_id: Option<&str>,
    ) -> (FrameId, LineageDecision) {
        let decision = self.decide(func_name, initial_lineage_id);
        let id = self.push(CallFrame {
            func_name: func_name.to_string(),
            lineage_id: decision.lineage_id.clone(),
        });
        (id, decision)
    }

    pub fn push(&mut self, frame: CallFrame) -> FrameId {
        self.next_frame_id += 1;
        let id = FrameId(self.next_frame_id);
        self.frames.push((id, frame));
        id
    }

    /// Pops the top frame; a no-op on an empty stack.
    pub fn pop(&mut self) -> Option<CallFrame> {
        self.frames.pop().map(|(_, frame)| frame)
    }

    /// Removes the frame pushed as `id`, if it is still on the stack.
    pub fn remove(&mut self, id: FrameId) -> Option<CallFrame> {
        let index = self
            .frames
            .iter()
            .rposition(|(frame_id, _)| *frame_id == id)?;
        Some(self.frames.remove(index).1)
    }

    /// Empties the stack, returning the frames top-first.
    pub fn clear(&mut self) -> Vec<CallFrame> {
        self.frames
            .drain(..)
            .rev()
            .map(|(_, frame)| frame)
            .collect()
    }

    pub fn top(&self) -> Option<&CallFrame> {
        self.frames.last().map(|(_, frame)| frame)
    }

    pub fn frames(&self) -> Vec<CallFrame> {
        self.frames.iter().map(|(_, frame)| frame.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Append-only record of the lineages minted for each function by context
/// switches, for the lifetime of the runtime.
#[derive(Clone, Debug, Default)]
pub struct LineageRegistry {
    inner: Arc<Mutex<HashMap<String, Vec<String>>>>,
}

impl LineageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, func_name: &str, lineage_id: &str) {
        lock(&self.inner)
            .entry(func_name.to_string())
            .or_default()
            .push(lineage_id.to_string());
    }

    pub fn lineage_ids(&self, func_name: &str) -> Vec<String> {
        lock(&self.inner)
            .get(func_name)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_call_expected_initial_lineage() {
        let mut stack = CallStack::new();
        let (_, decision) = stack.enter("a", Some("L1"));

        assert!(decision.is_root);
        assert!(!decision.is_context_switch);
        assert_eq!(decision.lineage_id, "L1");
    }

    #[test]
    fn root_call_without_hint_expected_fresh_lineage() {
        let stack = CallStack::new();
        let decision = stack.decide("a", None);
        assert!(decision.is_root);
        assert!(!decision.lineage_id.is_empty());
    }

    #[test]
    fn self_recursion_expected_shared_lineage() {
        let mut stack = CallStack::new();
        stack.enter("a", Some("L1"));
        let (_, second) = stack.enter("a", Some("ignored"));
        let (_, third) = stack.enter("a", None);

        assert_eq!(second.lineage_id, "L1");
        assert_eq!(third.lineage_id, "L1");
        assert!(stack.frames().iter().all(|frame| frame.lineage_id == "L1"));
    }

    #[test]
    fn delegation_and_reentry_expected_fresh_lineages() {
        let mut stack = CallStack::new();
        stack.enter("a", Some("L1"));
        let (_, delegated) = stack.enter("b", Some("L1"));
        let (_, reentered) = stack.enter("a", Some("L1"));

        assert!(delegated.is_context_switch);
        assert!(reentered.is_context_switch);
        assert_ne!(delegated.lineage_id, "L1");
        assert_ne!(reentered.lineage_id, "L1");
        assert_ne!(reentered.lineage_id, delegated.lineage_id);
    }

    #[test]
    fn pop_on_empty_stack_expected_noop() {
        let mut stack = CallStack::new();
        assert_eq!(stack.pop(), None);
        assert!(stack.is_empty());
    }

    #[test]
    fn remove_after_clear_expected_none_and_stack_untouched() {
        let mut stack = CallStack::new();
        let (stale, _) = stack.enter("a", Some("L1"));
        let cleared = stack.clear();
        assert_eq!(cleared.len(), 1);

        stack.enter("b", Some("L9"));
        assert_eq!(stack.remove(stale), None);
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn clear_expected_frames_top_first() {
        let mut stack = CallStack::new();
        stack.enter("a", Some("L1"));
        stack.enter("b", None);
        let cleared = stack.clear();

        assert_eq!(cleared[0].func_name, "b");
        assert_eq!(cleared[1].func_name, "a");
        assert!(stack.is_empty());
    }

    #[test]
    fn lineage_registry_expected_append_order_per_function() {
        let registry = LineageRegistry::new();
        registry.record("b", "L2");
        registry.record("b", "L3");
        registry.record("c", "L4");

        assert_eq!(registry.lineage_ids("b"), vec!["L2", "L3"]);
        assert_eq!(registry.lineage_ids("c"), vec!["L4"]);
        assert!(registry.lineage_ids("a").is_empty());
    }
}
