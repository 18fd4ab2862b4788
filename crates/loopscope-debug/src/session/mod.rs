//! Per-connection debug sessions and the registry that lets them survive
//! reconnects.

mod registry;

pub use registry::{ConnectOutcome, SessionRegistry};

use crate::sync::lock;
use crate::{
    CallFrame, CallStack, CorrelationPair, DebugError, FrameId, LineageDecision, PushChannel,
    PushEvent, SwappableChannel,
};
use loopscope_state::{State, normalize};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// State owned by one observer session: its call stack, running root calls,
/// interrupt flag, canvas chats and the channel events are pushed through.
pub struct Session {
    id: String,
    connection_id: Mutex<String>,
    restored: AtomicBool,
    call_stack: Mutex<CallStack>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    interrupt: AtomicBool,
    initial_lineage_id: Mutex<Option<String>>,
    chats: Mutex<HashMap<String, State>>,
    channel: SwappableChannel,
    teardown: CancellationToken,
}

impl Session {
    pub fn new(connection_id: impl Into<String>, channel: Arc<dyn PushChannel>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            connection_id: Mutex::new(connection_id.into()),
            restored: AtomicBool::new(false),
            call_stack: Mutex::new(CallStack::new()),
            tasks: Mutex::new(Vec::new()),
            interrupt: AtomicBool::new(false),
            initial_lineage_id: Mutex::new(None),
            chats: Mutex::new(HashMap::new()),
            channel: SwappableChannel::new(channel),
            teardown: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn connection_id(&self) -> String {
        lock(&self.connection_id).clone()
    }

    pub fn is_restored(&self) -> bool {
        self.restored.load(Ordering::SeqCst)
    }

    /// Moves the session onto a new connection. Running calls keep their
    /// frames and start pushing through `channel`.
    pub(crate) fn attach(&self, connection_id: &str, channel: Arc<dyn PushChannel>) {
        *lock(&self.connection_id) = connection_id.to_string();
        self.channel.swap(channel);
        self.restored.store(true, Ordering::SeqCst);
    }

    pub fn channel(&self) -> &SwappableChannel {
        &self.channel
    }

    pub fn set_interrupt(&self, enabled: bool) {
        self.interrupt.store(enabled, Ordering::SeqCst);
    }

    pub fn interrupt(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    pub fn set_initial_lineage_id(&self, lineage_id: Option<String>) {
        *lock(&self.initial_lineage_id) = lineage_id;
    }

    pub fn initial_lineage_id(&self) -> Option<String> {
        lock(&self.initial_lineage_id).clone()
    }

    /// Decides the lineage for a call to `func_name` and pushes its frame.
    pub fn enter_frame(&self, func_name: &str) -> (FrameId, LineageDecision) {
        let initial = self.initial_lineage_id();
        lock(&self.call_stack).enter(func_name, initial.as_deref())
    }

    /// Pops the frame pushed as `id`. Returns `None` when a stop already
    /// cleared it.
    pub fn exit_frame(&self, id: FrameId) -> Option<CallFrame> {
        lock(&self.call_stack).remove(id)
    }

    /// Frames bottom-first.
    pub fn frames(&self) -> Vec<CallFrame> {
        lock(&self.call_stack).frames()
    }

    pub fn top_frame(&self) -> Option<CallFrame> {
        lock(&self.call_stack).top().cloned()
    }

    pub fn stack_depth(&self) -> usize {
        lock(&self.call_stack).len()
    }

    pub fn reset_call_stack(&self) -> Vec<CallFrame> {
        lock(&self.call_stack).clear()
    }

    pub fn track_task(&self, handle: JoinHandle<()>) {
        let mut tasks = lock(&self.tasks);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    pub fn running_tasks(&self) -> usize {
        let mut tasks = lock(&self.tasks);
        tasks.retain(|task| !task.is_finished());
        tasks.len()
    }

    /// Clears the call stack, emits `end` for every cleared frame (top first)
    /// and cancels the running root calls.
    pub async fn stop(&self) {
        let cleared = self.reset_call_stack();
        for frame in &cleared {
            if let Err(error) = self.end(&frame.func_name) {
                tracing::warn!(session_id = %self.id, %error, "failed to emit end on stop");
            }
        }
        let handles: Vec<_> = lock(&self.tasks).drain(..).collect();
        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            let _ = handle.await;
        }
        tracing::info!(session_id = %self.id, frames = cleared.len(), "session stopped");
    }

    /// Cancels pending interrupts and aborts running calls without emitting
    /// events. Used when the session is deleted.
    pub(crate) fn teardown(&self) {
        self.teardown.cancel();
        for handle in lock(&self.tasks).drain(..) {
            handle.abort();
        }
    }

    pub fn is_torn_down(&self) -> bool {
        self.teardown.is_cancelled()
    }

    pub fn chat(&self, chat_id: &str) -> Option<State> {
        lock(&self.chats).get(chat_id).cloned()
    }

    pub fn set_chat(&self, chat_id: &str, state: State) {
        lock(&self.chats).insert(chat_id.to_string(), state);
    }

    pub fn take_chat(&self, chat_id: &str) -> Option<State> {
        lock(&self.chats).remove(chat_id)
    }

    pub fn chat_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = lock(&self.chats).keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn emit(&self, event: PushEvent) -> Result<(), DebugError> {
        self.channel.emit(event)
    }

    pub fn start(&self, func_name: &str) -> Result<(), DebugError> {
        self.emit(PushEvent::Start {
            name: func_name.to_string(),
        })
    }

    pub fn end(&self, func_name: &str) -> Result<(), DebugError> {
        self.emit(PushEvent::End {
            name: func_name.to_string(),
        })
    }

    pub fn send_error(&self, lineage_id: &str, error: impl Into<String>) -> Result<(), DebugError> {
        self.emit(PushEvent::Error {
            lineage_id: lineage_id.to_string(),
            error: error.into(),
        })
    }

    /// Pauses until the observer acknowledges the interrupt.
    ///
    /// Resolves with `Cancelled` when the session is torn down, and with a
    /// channel error when `timeout` elapses first.
    pub async fn send_interrupt(
        &self,
        func_name: &str,
        timeout: Option<Duration>,
    ) -> Result<Value, DebugError> {
        let call = self.channel.call(PushEvent::Interrupt {
            func_name: func_name.to_string(),
        });
        let bounded = async {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => result,
                    Err(_) => Err(DebugError::Channel(format!(
                        "interrupt for '{func_name}' not acknowledged within {}ms",
                        limit.as_millis()
                    ))),
                },
                None => call.await,
            }
        };
        tokio::select! {
            _ = self.teardown.cancelled() => Err(DebugError::Cancelled),
            result = bounded => result,
        }
    }

    pub fn send_stateful_funcs(&self, catalog: BTreeMap<String, Value>) -> Result<(), DebugError> {
        self.emit(PushEvent::StatefulFuncs(catalog))
    }

    pub fn send_output_state(
        &self,
        func_name: &str,
        lineage_id: &str,
        state: &State,
    ) -> Result<(), DebugError> {
        self.emit(PushEvent::OutputState {
            func_name: func_name.to_string(),
            lineage_id: lineage_id.to_string(),
            state: state.to_value(),
        })
    }

    pub fn send_map_tc_to_lid(&self, tool_call_id: &str, lineage_id: &str) -> Result<(), DebugError> {
        self.emit(PushEvent::MapTcToLid {
            tc: tool_call_id.to_string(),
            lid: lineage_id.to_string(),
        })
    }

    /// Emits one `map_tc_to_lid` per pair, in order. A failed emit is logged
    /// and the remaining pairs are still sent; the first failure is returned.
    pub fn sync_tool_calls(&self, pairs: &[CorrelationPair]) -> Result<(), DebugError> {
        let mut first_error = None;
        for pair in pairs {
            if let Err(error) = self.send_map_tc_to_lid(&pair.tool_call_id, &pair.lineage_id) {
                tracing::warn!(
                    session_id = %self.id,
                    tool_call_id = %pair.tool_call_id,
                    %error,
                    "failed to push tool-call mapping"
                );
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn canvas_agent_start(&self) -> Result<(), DebugError> {
        self.emit(PushEvent::CanvasAgentStart {})
    }

    pub fn canvas_agent_end<T: Serialize + ?Sized>(
        &self,
        response: Option<&T>,
        error: Option<String>,
    ) -> Result<(), DebugError> {
        self.emit(PushEvent::CanvasAgentEnd {
            response: response.map(normalize),
            error,
        })
    }

    pub fn send_state_edit(&self, old_str: &str, new_str: &str) -> Result<(), DebugError> {
        self.emit(PushEvent::StateEdit {
            old_str: old_str.to_string(),
            new_str: new_str.to_string(),
        })
    }

    pub fn send_code_change(&self, target: &str) -> Result<(), DebugError> {
        self.emit(PushEvent::CodeChange {
            target: target.to_string(),
        })
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("connection_id", &self.connection_id())
            .field("restored", &self.is_restored())
            .field("stack_depth", &self.stack_depth())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BufferedPushChannel, push_channel};
    use loopscope_state::Message;
    use serde_json::json;

    fn buffered_session() -> (Session, BufferedPushChannel) {
        let channel = BufferedPushChannel::default();
        (Session::new("conn-1", Arc::new(channel.clone())), channel)
    }

    #[tokio::test(flavor = "current_thread")]
    async fn stop_expected_end_per_frame_top_first_and_empty_stack() {
        let (session, channel) = buffered_session();
        session.enter_frame("router_agent");
        session.enter_frame("support_agent");

        session.stop().await;

        assert_eq!(session.stack_depth(), 0);
        assert_eq!(
            channel.snapshot(),
            vec![
                PushEvent::End {
                    name: "support_agent".to_string()
                },
                PushEvent::End {
                    name: "router_agent".to_string()
                },
            ]
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn stop_expected_running_tasks_cancelled() {
        let (session, _channel) = buffered_session();
        session.track_task(tokio::spawn(std::future::pending::<()>()));
        assert_eq!(session.running_tasks(), 1);

        session.stop().await;
        assert_eq!(session.running_tasks(), 0);
    }

    #[test]
    fn exit_frame_after_reset_expected_none() {
        let (session, _channel) = buffered_session();
        let (frame, _) = session.enter_frame("a");
        session.reset_call_stack();
        assert_eq!(session.exit_frame(frame), None);
    }

    #[test]
    fn enter_frame_root_expected_initial_lineage() {
        let (session, _channel) = buffered_session();
        session.set_initial_lineage_id(Some("L1".to_string()));
        let (_, decision) = session.enter_frame("a");
        assert_eq!(decision.lineage_id, "L1");
        assert!(decision.is_root);
    }

    #[test]
    fn push_helpers_expected_wire_shapes() {
        let (session, channel) = buffered_session();
        let mut state = State::with_messages(vec![Message::user("hi")]);
        state.metadata_mut().func_name = Some("a".to_string());

        session
            .send_output_state("a", "L1", &state)
            .expect("emit should succeed");
        session
            .sync_tool_calls(&[CorrelationPair {
                func_name: "b".to_string(),
                tool_call_id: "tc_1".to_string(),
                lineage_id: "L2".to_string(),
            }])
            .expect("emit should succeed");
        session
            .canvas_agent_end(Some(&json!({"role": "assistant"})), None)
            .expect("emit should succeed");
        session
            .send_code_change("demo")
            .expect("emit should succeed");

        let events = channel.snapshot();
        let PushEvent::OutputState { state: encoded, .. } = &events[0] else {
            panic!("expected output_state, got {:?}", events[0]);
        };
        assert_eq!(encoded["messages"][0]["role"], "user");
        assert_eq!(encoded["metadata"]["func_name"], "a");
        assert_eq!(
            events[1],
            PushEvent::MapTcToLid {
                tc: "tc_1".to_string(),
                lid: "L2".to_string()
            }
        );
        assert_eq!(
            events[2],
            PushEvent::CanvasAgentEnd {
                response: Some(json!({"role": "assistant"})),
                error: None
            }
        );
        assert_eq!(
            events[3],
            PushEvent::CodeChange {
                target: "demo".to_string()
            }
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn send_interrupt_teardown_expected_cancelled() {
        let (channel, _rx) = push_channel();
        let session = Arc::new(Session::new("conn-1", channel));
        let waiter = session.clone();
        let pending = tokio::spawn(async move { waiter.send_interrupt("b", None).await });

        tokio::task::yield_now().await;
        assert_eq!(session.channel().pending_calls(), 1);
        session.teardown();

        let result = pending.await.expect("interrupt task should join");
        assert!(matches!(result, Err(DebugError::Cancelled)));
        assert_eq!(session.channel().pending_calls(), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn send_interrupt_timeout_expected_channel_error() {
        let (channel, _rx) = push_channel();
        let session = Session::new("conn-1", channel);
        let result = session
            .send_interrupt("b", Some(Duration::from_millis(10)))
            .await;
        assert!(matches!(result, Err(DebugError::Channel(_))));
        assert_eq!(session.channel().pending_calls(), 0);
    }

    /// Fails the first emit, records the rest.
    #[derive(Default)]
    struct FlakyPushChannel {
        failed_once: AtomicBool,
        delivered: Mutex<Vec<PushEvent>>,
    }

    impl PushChannel for FlakyPushChannel {
        fn emit(&self, event: PushEvent) -> Result<(), DebugError> {
            if !self.failed_once.swap(true, Ordering::SeqCst) {
                return Err(DebugError::Channel("connection reset".to_string()));
            }
            lock(&self.delivered).push(event);
            Ok(())
        }
    }

    #[test]
    fn sync_tool_calls_failed_emit_expected_remaining_pairs_sent() {
        let channel = Arc::new(FlakyPushChannel::default());
        let session = Session::new("conn-1", channel.clone());
        let pairs: Vec<_> = ["tc_1", "tc_2", "tc_3"]
            .iter()
            .zip(["L1", "L2", "L3"])
            .map(|(tool_call_id, lineage_id)| CorrelationPair {
                func_name: "b".to_string(),
                tool_call_id: tool_call_id.to_string(),
                lineage_id: lineage_id.to_string(),
            })
            .collect();

        let error = session
            .sync_tool_calls(&pairs)
            .expect_err("the failed emit should be returned");

        assert!(matches!(error, DebugError::Channel(_)));
        assert_eq!(
            *lock(&channel.delivered),
            vec![
                PushEvent::MapTcToLid {
                    tc: "tc_2".to_string(),
                    lid: "L2".to_string()
                },
                PushEvent::MapTcToLid {
                    tc: "tc_3".to_string(),
                    lid: "L3".to_string()
                },
            ]
        );
    }

    #[test]
    fn chats_expected_stored_per_id() {
        let (session, _channel) = buffered_session();
        session.set_chat("c1", State::new());
        assert!(session.chat("c1").is_some());
        assert_eq!(session.chat_ids(), vec!["c1"]);
        assert!(session.take_chat("c1").is_some());
        assert!(session.chat("c1").is_none());
    }
}
