//! Instrumented execution of registered stateful functions.

mod context;
mod registry;

pub use context::{CallContext, needs_another_turn, run_until_settled};
pub use registry::{StatefulDef, StatefulFn, StatefulFuture, StatefulRegistry};

use crate::{
    DebugConfig, DebugError, FrameId, LineageDecision, LineageRegistry, Session, SessionRegistry,
    ToolCallCorrelator, extract_tool_calls,
};
use chrono::{SecondsFormat, Utc};
use futures::future::BoxFuture;
use loopscope_state::State;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;

struct RuntimeInner {
    config: DebugConfig,
    functions: StatefulRegistry,
    sessions: SessionRegistry,
    lineages: LineageRegistry,
    correlator: ToolCallCorrelator,
}

/// Process-lifetime context shared by every session: configuration, the
/// function catalog, sessions and the lineage/tool-call registries.
#[derive(Clone)]
pub struct DebugRuntime {
    inner: Arc<RuntimeInner>,
}

impl DebugRuntime {
    pub fn new(config: DebugConfig, functions: StatefulRegistry) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                config,
                functions,
                sessions: SessionRegistry::new(),
                lineages: LineageRegistry::new(),
                correlator: ToolCallCorrelator::new(),
            }),
        }
    }

    pub fn config(&self) -> &DebugConfig {
        &self.inner.config
    }

    pub fn functions(&self) -> &StatefulRegistry {
        &self.inner.functions
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.inner.sessions
    }

    pub fn lineages(&self) -> &LineageRegistry {
        &self.inner.lineages
    }

    pub fn correlator(&self) -> &ToolCallCorrelator {
        &self.inner.correlator
    }

    /// Removes a session, releases its pending interrupts and aborts its
    /// calls, and drops its tool-call correlation queues.
    pub fn delete_session(&self, session_id: &str) -> Option<Arc<Session>> {
        let session = self.inner.sessions.delete(session_id)?;
        self.inner.correlator.forget_session(session_id);
        Some(session)
    }

    /// Context for calling into the runtime from outside any tracked call.
    pub fn context(&self, session: Arc<Session>) -> CallContext {
        CallContext::new(self.clone(), session, "", None)
    }

    /// Runs a registered function with tracking. Unknown names are a no-op.
    pub fn invoke(
        &self,
        session: Arc<Session>,
        func_name: String,
        state: State,
    ) -> BoxFuture<'static, Option<State>> {
        let Some(def) = self.inner.functions.get(&func_name) else {
            tracing::warn!(func_name = %func_name, "stateful function is not registered");
            return Box::pin(async { None });
        };
        self.invoke_fn(session, func_name, def.func.clone(), state)
    }

    /// Runs `func` as a tracked call named `func_name`.
    ///
    /// Failures are reported to the session and logged, never returned: a
    /// `None` result means the call failed or was cancelled.
    pub fn invoke_fn(
        &self,
        session: Arc<Session>,
        func_name: String,
        func: StatefulFn,
        state: State,
    ) -> BoxFuture<'static, Option<State>> {
        let runtime = self.clone();
        if !runtime.inner.config.enabled {
            return Box::pin(async move {
                let ctx = CallContext::new(runtime, session, func_name.clone(), None);
                match func(ctx, state).await {
                    Ok(result) => Some(result),
                    Err(error) => {
                        tracing::error!(func_name = %func_name, %error, "stateful function failed");
                        None
                    }
                }
            });
        }
        Box::pin(async move { runtime.run_tracked(session, func_name, func, state).await })
    }

    async fn run_tracked(
        self,
        session: Arc<Session>,
        func_name: String,
        func: StatefulFn,
        state: State,
    ) -> Option<State> {
        let (frame_id, decision) = session.enter_frame(&func_name);
        let mut guard = FrameGuard {
            session: session.clone(),
            frame_id,
            started: false,
        };
        if decision.is_context_switch {
            self.inner.lineages.record(&func_name, &decision.lineage_id);
            self.inner
                .correlator
                .record_lineage(session.id(), &func_name, &decision.lineage_id);
        }
        let LineageDecision {
            lineage_id,
            is_root,
            ..
        } = decision;

        if !is_root {
            report(session.send_output_state(&func_name, &lineage_id, &state));
            if session.interrupt() {
                match session
                    .send_interrupt(&func_name, self.inner.config.interrupt_timeout)
                    .await
                {
                    Ok(_) => {}
                    Err(DebugError::Cancelled) => {
                        tracing::debug!(func_name = %func_name, lineage_id = %lineage_id, "interrupt cancelled");
                        return None;
                    }
                    Err(error) => {
                        tracing::warn!(func_name = %func_name, %error, "interrupt not acknowledged; resuming");
                    }
                }
            }
        }

        report(session.start(&func_name));
        guard.started = true;
        self.correlate(&session, &state);

        let frame = crate::CallFrame {
            func_name: func_name.clone(),
            lineage_id: lineage_id.clone(),
        };
        let ctx = CallContext::new(self.clone(), session.clone(), func_name.clone(), Some(frame));
        let started_at = Utc::now();
        let started = Instant::now();
        let result = func(ctx, state).await;

        let outcome = match result {
            Ok(mut output) => {
                let metadata = output.metadata_mut();
                metadata.func_name = Some(func_name.clone());
                metadata.start_time = Some(started_at.to_rfc3339_opts(SecondsFormat::Micros, true));
                metadata.end_time = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true));
                metadata.duration_ms = Some(started.elapsed().as_secs_f64() * 1000.0);
                metadata.session_id = Some(session.id().to_string());
                report(session.send_output_state(&func_name, &lineage_id, &output));
                Some(output)
            }
            Err(error) if DebugError::is_reported(&error) => {
                tracing::debug!(func_name = %func_name, lineage_id = %lineage_id, %error, "stateful function stopped");
                None
            }
            Err(error) => {
                tracing::error!(
                    func_name = %func_name,
                    lineage_id = %lineage_id,
                    %error,
                    "stateful function failed"
                );
                report(session.send_error(&lineage_id, error.to_string()));
                None
            }
        };
        drop(guard);
        outcome
    }

    /// Queues tool calls from the input's last tool-call message and flushes
    /// every newly matched pair.
    fn correlate(&self, session: &Session, state: &State) {
        let functions = &self.inner.functions;
        let requested = extract_tool_calls(
            &state.messages,
            |name| functions.contains(name),
            &self.inner.config.call_prefix,
        );
        for call in requested {
            self.inner
                .correlator
                .record_tool_call(session.id(), &call.func_name, &call.tool_call_id);
        }
        let pairs = self.inner.correlator.drain_pairs(session.id());
        report(session.sync_tool_calls(&pairs));
    }

    /// Starts a top-level call on its own task, tracked by the session so
    /// `stop` can cancel it.
    pub fn spawn_root(
        &self,
        session: &Arc<Session>,
        func_name: &str,
        lineage_id: Option<String>,
        state: State,
    ) -> Result<RootCall, DebugError> {
        if !self.inner.functions.contains(func_name) {
            return Err(DebugError::UnknownFunction(func_name.to_string()));
        }
        session.set_initial_lineage_id(lineage_id);
        session.reset_call_stack();

        let (tx, rx) = oneshot::channel();
        let call = self.invoke(session.clone(), func_name.to_string(), state);
        let handle = tokio::spawn(async move {
            let _ = tx.send(call.await);
        });
        session.track_task(handle);
        tracing::info!(session_id = %session.id(), func_name, "root call started");
        Ok(RootCall { outcome: rx })
    }
}

impl std::fmt::Debug for DebugRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugRuntime")
            .field("config", &self.inner.config)
            .field("functions", &self.inner.functions.names())
            .field("sessions", &self.inner.sessions.len())
            .finish()
    }
}

/// Completion handle of a spawned top-level call.
#[derive(Debug)]
pub struct RootCall {
    outcome: oneshot::Receiver<Option<State>>,
}

impl RootCall {
    /// Resulting state; `None` when the call failed or was stopped.
    pub async fn outcome(self) -> Option<State> {
        self.outcome.await.ok().flatten()
    }
}

/// Pops its frame on every exit path, including task abort, and emits `end`
/// once `start` has gone out.
struct FrameGuard {
    session: Arc<Session>,
    frame_id: FrameId,
    started: bool,
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        let Some(frame) = self.session.exit_frame(self.frame_id) else {
            return;
        };
        if self.started {
            report(self.session.end(&frame.func_name));
        }
    }
}

fn report(result: Result<(), DebugError>) {
    if let Err(error) = result {
        tracing::warn!(%error, "failed to push debug event");
    }
}
