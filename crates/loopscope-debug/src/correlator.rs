use crate::sync::lock;
use loopscope_state::{Message, Role};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// A tool call requested by the model that targets a registered function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestedCall {
    pub func_name: String,
    pub tool_call_id: String,
}

/// A tool-call id matched to the lineage its function execution produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorrelationPair {
    pub func_name: String,
    pub tool_call_id: String,
    pub lineage_id: String,
}

/// Scans the most recent assistant message carrying tool calls and returns the
/// calls whose target, with `prefix` stripped, is a registered function.
pub fn extract_tool_calls<F>(messages: &[Message], is_registered: F, prefix: &str) -> Vec<RequestedCall>
where
    F: Fn(&str) -> bool,
{
    let Some(last) = messages
        .iter()
        .rev()
        .find(|message| message.role == Role::Assistant && message.has_tool_calls())
    else {
        return Vec::new();
    };

    last.tool_call_requests()
        .iter()
        .filter_map(|tool_call| {
            let name = tool_call.name();
            let func_name = name.strip_prefix(prefix).unwrap_or(name);
            is_registered(func_name).then(|| RequestedCall {
                func_name: func_name.to_string(),
                tool_call_id: tool_call.id.clone(),
            })
        })
        .collect()
}

#[derive(Clone, Debug, Default)]
struct CorrelationQueues {
    tool_call_ids: VecDeque<String>,
    lineage_ids: VecDeque<String>,
    seen_tool_calls: HashSet<String>,
}

impl CorrelationQueues {
    /// Pops every matched pair off the front of both queues.
    fn take_pairs(&mut self, func_name: &str) -> Vec<CorrelationPair> {
        let matched = self.tool_call_ids.len().min(self.lineage_ids.len());
        self.tool_call_ids
            .drain(..matched)
            .zip(self.lineage_ids.drain(..matched))
            .map(|(tool_call_id, lineage_id)| CorrelationPair {
                func_name: func_name.to_string(),
                tool_call_id,
                lineage_id,
            })
            .collect()
    }
}

/// Pairs tool-call ids with lineages in FIFO order, per session and function.
///
/// Matched pairs are removed when drained, so each pair is handed out once.
/// Tool-call ids stay remembered per key so a re-scanned history does not
/// queue them again.
#[derive(Clone, Debug, Default)]
pub struct ToolCallCorrelator {
    inner: Arc<Mutex<BTreeMap<(String, String), CorrelationQueues>>>,
}

impl ToolCallCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a tool-call id. Ids already seen for the same function are ignored.
    pub fn record_tool_call(&self, session_id: &str, func_name: &str, tool_call_id: &str) -> bool {
        let mut inner = lock(&self.inner);
        let queues = inner
            .entry((session_id.to_string(), func_name.to_string()))
            .or_default();
        if !queues.seen_tool_calls.insert(tool_call_id.to_string()) {
            return false;
        }
        queues.tool_call_ids.push_back(tool_call_id.to_string());
        true
    }

    pub fn record_lineage(&self, session_id: &str, func_name: &str, lineage_id: &str) {
        lock(&self.inner)
            .entry((session_id.to_string(), func_name.to_string()))
            .or_default()
            .lineage_ids
            .push_back(lineage_id.to_string());
    }

    /// Removes and returns the matched pairs of a session, ordered by function
    /// name then FIFO.
    pub fn drain_pairs(&self, session_id: &str) -> Vec<CorrelationPair> {
        let mut inner = lock(&self.inner);
        inner
            .iter_mut()
            .filter(|((owner, _), _)| owner == session_id)
            .flat_map(|((_, func_name), queues)| queues.take_pairs(func_name))
            .collect()
    }

    /// Tool-call ids still waiting for a lineage.
    pub fn tool_call_ids(&self, session_id: &str, func_name: &str) -> Vec<String> {
        lock(&self.inner)
            .get(&(session_id.to_string(), func_name.to_string()))
            .map(|queues| queues.tool_call_ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Lineages still waiting for a tool-call id.
    pub fn lineage_ids(&self, session_id: &str, func_name: &str) -> Vec<String> {
        lock(&self.inner)
            .get(&(session_id.to_string(), func_name.to_string()))
            .map(|queues| queues.lineage_ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drops every queue owned by a session.
    pub fn forget_session(&self, session_id: &str) {
        lock(&self.inner).retain(|(owner, _), _| owner != session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopscope_state::ToolCallRequest;

    fn registered(name: &str) -> bool {
        matches!(name, "support_agent" | "billing_agent")
    }

    #[test]
    fn extract_tool_calls_expected_last_assistant_message_only_and_prefix_stripped() {
        let messages = vec![
            Message::system("route requests"),
            Message::assistant_with_tool_calls(
                None,
                vec![ToolCallRequest::new("tc_old", "call_billing_agent", "{}")],
            ),
            Message::tool_result("tc_old", "paid"),
            Message::assistant_with_tool_calls(
                None,
                vec![
                    ToolCallRequest::new("tc_1", "call_support_agent", "{}"),
                    ToolCallRequest::new("tc_2", "get_weather", "{}"),
                    ToolCallRequest::new("tc_3", "billing_agent", "{}"),
                ],
            ),
            Message::tool_result("tc_1", "ok"),
        ];

        let calls = extract_tool_calls(&messages, registered, "call_");
        assert_eq!(
            calls,
            vec![
                RequestedCall {
                    func_name: "support_agent".to_string(),
                    tool_call_id: "tc_1".to_string(),
                },
                RequestedCall {
                    func_name: "billing_agent".to_string(),
                    tool_call_id: "tc_3".to_string(),
                },
            ]
        );
    }

    #[test]
    fn extract_tool_calls_no_assistant_requests_expected_empty() {
        let messages = vec![Message::user("hi"), Message::assistant("hello")];
        assert!(extract_tool_calls(&messages, registered, "call_").is_empty());
    }

    #[test]
    fn drain_pairs_expected_fifo_and_single_delivery() {
        let correlator = ToolCallCorrelator::new();
        correlator.record_lineage("s1", "support_agent", "L2");
        assert!(correlator.drain_pairs("s1").is_empty());

        assert!(correlator.record_tool_call("s1", "support_agent", "tc_1"));
        correlator.record_tool_call("s1", "support_agent", "tc_2");
        let first = correlator.drain_pairs("s1");
        assert_eq!(
            first,
            vec![CorrelationPair {
                func_name: "support_agent".to_string(),
                tool_call_id: "tc_1".to_string(),
                lineage_id: "L2".to_string(),
            }]
        );
        assert!(correlator.drain_pairs("s1").is_empty());
        assert_eq!(correlator.tool_call_ids("s1", "support_agent"), vec!["tc_2"]);
        assert!(correlator.lineage_ids("s1", "support_agent").is_empty());

        correlator.record_lineage("s1", "support_agent", "L3");
        let second = correlator.drain_pairs("s1");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].tool_call_id, "tc_2");
        assert_eq!(second[0].lineage_id, "L3");
        assert!(correlator.tool_call_ids("s1", "support_agent").is_empty());
    }

    #[test]
    fn record_tool_call_after_pair_consumed_expected_still_deduplicated() {
        let correlator = ToolCallCorrelator::new();
        correlator.record_tool_call("s1", "support_agent", "tc_1");
        correlator.record_lineage("s1", "support_agent", "L2");
        assert_eq!(correlator.drain_pairs("s1").len(), 1);

        assert!(!correlator.record_tool_call("s1", "support_agent", "tc_1"));
        correlator.record_lineage("s1", "support_agent", "L3");
        assert!(correlator.drain_pairs("s1").is_empty());
        assert_eq!(correlator.lineage_ids("s1", "support_agent"), vec!["L3"]);
    }

    #[test]
    fn record_tool_call_duplicate_id_expected_ignored() {
        let correlator = ToolCallCorrelator::new();
        assert!(correlator.record_tool_call("s1", "support_agent", "tc_1"));
        assert!(!correlator.record_tool_call("s1", "support_agent", "tc_1"));
        assert_eq!(correlator.tool_call_ids("s1", "support_agent"), vec!["tc_1"]);
    }

    #[test]
    fn sessions_expected_isolated_queues() {
        let correlator = ToolCallCorrelator::new();
        correlator.record_tool_call("s1", "support_agent", "tc_1");
        correlator.record_lineage("s2", "support_agent", "L-other");

        assert!(correlator.drain_pairs("s1").is_empty());
        assert!(correlator.drain_pairs("s2").is_empty());

        correlator.forget_session("s1");
        assert!(correlator.tool_call_ids("s1", "support_agent").is_empty());
        assert_eq!(
            correlator.lineage_ids("s2", "support_agent"),
            vec!["L-other"]
        );
    }
}
