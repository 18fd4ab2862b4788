use crate::DebugError;
use crate::sync::{lock, read, write};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Server-to-observer event. Encoded as `{"event": <name>, "data": {...}}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum PushEvent {
    StatefulFuncs(BTreeMap<String, Value>),
    Start {
        name: String,
    },
    End {
        name: String,
    },
    OutputState {
        func_name: String,
        lineage_id: String,
        state: Value,
    },
    Error {
        lineage_id: String,
        error: String,
    },
    Interrupt {
        func_name: String,
    },
    MapTcToLid {
        tc: String,
        lid: String,
    },
    CanvasAgentStart {},
    CanvasAgentEnd {
        response: Option<Value>,
        error: Option<String>,
    },
    StateEdit {
        old_str: String,
        new_str: String,
    },
    CodeChange {
        target: String,
    },
}

impl PushEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StatefulFuncs(_) => "stateful_funcs",
            Self::Start { .. } => "start",
            Self::End { .. } => "end",
            Self::OutputState { .. } => "output_state",
            Self::Error { .. } => "error",
            Self::Interrupt { .. } => "interrupt",
            Self::MapTcToLid { .. } => "map_tc_to_lid",
            Self::CanvasAgentStart {} => "canvas_agent_start",
            Self::CanvasAgentEnd { .. } => "canvas_agent_end",
            Self::StateEdit { .. } => "state_edit",
            Self::CodeChange { .. } => "code_change",
        }
    }
}

/// Outbound half of one observer connection.
///
/// Both methods are synchronous and must not block: `emit` also runs from
/// drop guards, and `request` runs while the session's channel slot is locked.
pub trait PushChannel: Send + Sync {
    fn emit(&self, event: PushEvent) -> Result<(), DebugError>;

    /// Sends a request the observer answers with an ack echoing `call_id`.
    /// Channels without an observer to wait on return the answer directly.
    fn request(&self, _call_id: &str, event: PushEvent) -> Result<Option<Value>, DebugError> {
        self.emit(event).map(|()| Some(Value::Null))
    }
}

#[derive(Default)]
pub struct NoopPushChannel;

impl PushChannel for NoopPushChannel {
    fn emit(&self, _event: PushEvent) -> Result<(), DebugError> {
        Ok(())
    }
}

/// Records every event; calls are acknowledged immediately.
#[derive(Clone, Default)]
pub struct BufferedPushChannel {
    inner: Arc<Mutex<Vec<PushEvent>>>,
}

impl BufferedPushChannel {
    pub fn snapshot(&self) -> Vec<PushEvent> {
        lock(&self.inner).clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        lock(&self.inner).iter().map(PushEvent::name).collect()
    }

    pub fn clear(&self) {
        lock(&self.inner).clear();
    }
}

impl PushChannel for BufferedPushChannel {
    fn emit(&self, event: PushEvent) -> Result<(), DebugError> {
        lock(&self.inner).push(event);
        Ok(())
    }
}

/// One outbound frame on a streamed connection. Calls carry a `call_id` the
/// observer echoes back in its ack.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundFrame {
    pub call_id: Option<String>,
    pub event: PushEvent,
}

impl OutboundFrame {
    pub fn to_json(&self) -> Result<Value, DebugError> {
        let mut value = serde_json::to_value(&self.event)?;
        if let (Some(call_id), Value::Object(map)) = (self.call_id.as_ref(), &mut value) {
            map.insert("call_id".to_string(), Value::String(call_id.clone()));
        }
        Ok(value)
    }
}

pub type OutboundSender = mpsc::UnboundedSender<OutboundFrame>;
pub type OutboundReceiver = mpsc::UnboundedReceiver<OutboundFrame>;

/// Streams frames into an unbounded channel drained by a transport writer.
pub struct StreamPushChannel {
    sender: OutboundSender,
}

pub fn push_channel() -> (Arc<StreamPushChannel>, OutboundReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Arc::new(StreamPushChannel { sender }), receiver)
}

impl StreamPushChannel {
    fn send(&self, frame: OutboundFrame) -> Result<(), DebugError> {
        self.sender
            .send(frame)
            .map_err(|_| DebugError::Channel("observer connection closed".to_string()))
    }
}

impl PushChannel for StreamPushChannel {
    fn emit(&self, event: PushEvent) -> Result<(), DebugError> {
        self.send(OutboundFrame {
            call_id: None,
            event,
        })
    }

    fn request(&self, call_id: &str, event: PushEvent) -> Result<Option<Value>, DebugError> {
        self.send(OutboundFrame {
            call_id: Some(call_id.to_string()),
            event,
        })?;
        Ok(None)
    }
}

struct PendingCall {
    event: PushEvent,
    reply: oneshot::Sender<Value>,
}

type PendingCalls = Arc<Mutex<HashMap<String, PendingCall>>>;

struct PendingCallGuard {
    pending: PendingCalls,
    call_id: String,
}

impl Drop for PendingCallGuard {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.call_id);
    }
}

/// A session's channel slot. Swapping re-points subsequent events at a new
/// connection; tasks holding the slot keep running undisturbed.
///
/// Requests waiting for an ack live in the slot, not in the connection, so an
/// ack arriving on whichever connection is current resolves them. Every swap
/// re-sends the open requests on the new connection under their original ids.
#[derive(Clone)]
pub struct SwappableChannel {
    current: Arc<RwLock<Arc<dyn PushChannel>>>,
    pending: PendingCalls,
}

impl SwappableChannel {
    pub fn new(channel: Arc<dyn PushChannel>) -> Self {
        Self {
            current: Arc::new(RwLock::new(channel)),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn current(&self) -> Arc<dyn PushChannel> {
        read(&self.current).clone()
    }

    pub fn emit(&self, event: PushEvent) -> Result<(), DebugError> {
        self.current().emit(event)
    }

    /// Sends `event` as a request and resolves with the observer's ack payload.
    pub async fn call(&self, event: PushEvent) -> Result<Value, DebugError> {
        let call_id = Uuid::new_v4().to_string();
        let (reply, answer) = oneshot::channel();
        let _guard = PendingCallGuard {
            pending: self.pending.clone(),
            call_id: call_id.clone(),
        };
        let sent = {
            let current = read(&self.current);
            lock(&self.pending).insert(
                call_id.clone(),
                PendingCall {
                    event: event.clone(),
                    reply,
                },
            );
            current.request(&call_id, event)
        };
        if let Some(payload) = sent? {
            return Ok(payload);
        }
        answer
            .await
            .map_err(|_| DebugError::Channel("call dropped before acknowledgement".to_string()))
    }

    /// Resolves a pending `call`. Returns false when no call is waiting on `call_id`.
    pub fn acknowledge(&self, call_id: &str, payload: Value) -> bool {
        let Some(call) = lock(&self.pending).remove(call_id) else {
            return false;
        };
        call.reply.send(payload).is_ok()
    }

    pub fn pending_calls(&self) -> usize {
        lock(&self.pending).len()
    }

    /// Installs `channel`, re-sends the open requests on it and returns the
    /// previous channel.
    pub fn swap(&self, channel: Arc<dyn PushChannel>) -> Arc<dyn PushChannel> {
        let mut current = write(&self.current);
        let open: Vec<(String, PushEvent)> = lock(&self.pending)
            .iter()
            .map(|(call_id, call)| (call_id.clone(), call.event.clone()))
            .collect();
        for (call_id, event) in open {
            match channel.request(&call_id, event) {
                Ok(Some(payload)) => {
                    self.acknowledge(&call_id, payload);
                }
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(call_id = %call_id, %error, "failed to re-send pending request");
                }
            }
        }
        std::mem::replace(&mut *current, channel)
    }
}
