//! Inbound control messages and their dispatch onto sessions.

use crate::{CanvasAgent, CanvasRequest, ConnectOutcome, DebugError, DebugRuntime, PushChannel};
use loopscope_state::State;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Payload of `call_stateful_func`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    pub func_name: String,
    #[serde(default)]
    pub lineage_id: Option<String>,
    #[serde(default)]
    pub state: Value,
}

/// Payload of `ack`: resolves a blocking push call such as `interrupt`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AckPayload {
    pub call_id: String,
    #[serde(default)]
    pub payload: Value,
}

/// Observer-to-server message. Encoded as `{"event": <name>, "data": ...}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ControlMessage {
    ConnectionSuccessful,
    SetInterrupt(bool),
    Stop,
    CallStatefulFunc(CallRequest),
    CallCanvasAgent(CanvasRequest),
    Ack(AckPayload),
}

impl ControlMessage {
    pub fn parse(line: &str) -> Result<Self, DebugError> {
        serde_json::from_str(line)
            .map_err(|error| DebugError::Protocol(format!("invalid control message: {error}")))
    }
}

/// Routes control messages from a connection to its session.
#[derive(Clone)]
pub struct ProtocolHandler {
    runtime: DebugRuntime,
    canvas: Option<Arc<CanvasAgent>>,
}

impl ProtocolHandler {
    pub fn new(runtime: DebugRuntime) -> Self {
        Self {
            runtime,
            canvas: None,
        }
    }

    pub fn with_canvas(mut self, canvas: Arc<CanvasAgent>) -> Self {
        self.canvas = Some(canvas);
        self
    }

    pub fn runtime(&self) -> &DebugRuntime {
        &self.runtime
    }

    /// Binds a new connection, restoring the session named by `session_hint`
    /// when it is known.
    pub fn connect(
        &self,
        connection_id: &str,
        session_hint: Option<&str>,
        channel: Arc<dyn PushChannel>,
    ) -> ConnectOutcome {
        self.runtime
            .sessions()
            .connect(connection_id, session_hint, channel)
    }

    pub async fn handle(&self, connection_id: &str, message: ControlMessage) -> Result<(), DebugError> {
        match message {
            ControlMessage::ConnectionSuccessful => {
                let session = self.runtime.sessions().require(connection_id)?;
                if session.is_restored() {
                    return Ok(());
                }
                session.send_stateful_funcs(self.runtime.functions().catalog())
            }
            ControlMessage::SetInterrupt(enabled) => {
                let session = self.runtime.sessions().require(connection_id)?;
                session.set_interrupt(enabled);
                tracing::debug!(session_id = %session.id(), enabled, "interrupt flag set");
                Ok(())
            }
            ControlMessage::Stop => {
                if let Some(session) = self.runtime.sessions().get(connection_id) {
                    session.stop().await;
                }
                Ok(())
            }
            ControlMessage::CallStatefulFunc(request) => {
                let session = self.runtime.sessions().require(connection_id)?;
                if !self.runtime.functions().contains(&request.func_name) {
                    tracing::warn!(func_name = %request.func_name, "could not find stateful function");
                    return Ok(());
                }
                let state = match request.state {
                    Value::Null => State::new(),
                    value => State::from_value(value)?,
                };
                self.runtime
                    .spawn_root(&session, &request.func_name, request.lineage_id, state)?;
                Ok(())
            }
            ControlMessage::CallCanvasAgent(request) => {
                let session = self.runtime.sessions().require(connection_id)?;
                let Some(canvas) = self.canvas.clone() else {
                    tracing::warn!("canvas agent is not configured");
                    return session.canvas_agent_end::<Value>(
                        None,
                        Some("canvas agent is not configured".to_string()),
                    );
                };
                let task_session = session.clone();
                session.track_task(tokio::spawn(async move {
                    canvas.handle(&task_session, request).await;
                }));
                Ok(())
            }
            ControlMessage::Ack(ack) => {
                let session = self.runtime.sessions().require(connection_id)?;
                if !session.channel().acknowledge(&ack.call_id, ack.payload) {
                    tracing::debug!(call_id = %ack.call_id, "ack for unknown call");
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_envelopes_expected_variants() {
        assert_eq!(
            ControlMessage::parse(r#"{"event":"connection_successful"}"#)
                .expect("message should parse"),
            ControlMessage::ConnectionSuccessful
        );
        assert_eq!(
            ControlMessage::parse(r#"{"event":"set_interrupt","data":true}"#)
                .expect("message should parse"),
            ControlMessage::SetInterrupt(true)
        );
        assert_eq!(
            ControlMessage::parse(
                r#"{"event":"call_stateful_func","data":{"func_name":"file_agent","lineage_id":"L1","state":{"messages":[]}}}"#
            )
            .expect("message should parse"),
            ControlMessage::CallStatefulFunc(CallRequest {
                func_name: "file_agent".to_string(),
                lineage_id: Some("L1".to_string()),
                state: json!({"messages": []}),
            })
        );
        assert_eq!(
            ControlMessage::parse(r#"{"event":"ack","data":{"call_id":"c-1"}}"#)
                .expect("message should parse"),
            ControlMessage::Ack(AckPayload {
                call_id: "c-1".to_string(),
                payload: Value::Null,
            })
        );
    }

    #[test]
    fn parse_unknown_event_expected_protocol_error() {
        let error = ControlMessage::parse(r#"{"event":"reboot"}"#)
            .expect_err("unknown event should be rejected");
        assert!(matches!(error, DebugError::Protocol(_)));
    }
}
