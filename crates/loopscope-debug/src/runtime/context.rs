use super::{DebugRuntime, StatefulFn, StatefulFuture};
use crate::{CallFrame, DebugError, FunctionError, Session};
use loopscope_state::{Role, State};
use std::future::Future;
use std::sync::Arc;

/// Handle passed into every stateful function call. Nested calls made through
/// it are tracked on the same session.
#[derive(Clone)]
pub struct CallContext {
    runtime: DebugRuntime,
    session: Arc<Session>,
    func_name: String,
    frame: Option<CallFrame>,
}

impl CallContext {
    pub(crate) fn new(
        runtime: DebugRuntime,
        session: Arc<Session>,
        func_name: impl Into<String>,
        frame: Option<CallFrame>,
    ) -> Self {
        Self {
            runtime,
            session,
            func_name: func_name.into(),
            frame,
        }
    }

    pub fn runtime(&self) -> &DebugRuntime {
        &self.runtime
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn func_name(&self) -> &str {
        &self.func_name
    }

    /// Frame of the running call. Untracked calls (debugging disabled) have none.
    pub fn current_frame(&self) -> Result<&CallFrame, DebugError> {
        self.frame.as_ref().ok_or(DebugError::ContextNotFound)
    }

    pub fn lineage_id(&self) -> Result<&str, DebugError> {
        self.current_frame().map(|frame| frame.lineage_id.as_str())
    }

    /// Instrumented call to another registered function. `None` means the call
    /// failed or was cancelled; failures have already been reported.
    pub async fn call(&self, func_name: &str, state: State) -> Option<State> {
        self.runtime
            .invoke(self.session.clone(), func_name.to_string(), state)
            .await
    }

    /// Instrumented call back into the running function.
    pub async fn recurse(&self, state: State) -> Option<State> {
        self.call(&self.func_name, state).await
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("session_id", &self.session.id())
            .field("func_name", &self.func_name)
            .field("frame", &self.frame)
            .finish()
    }
}

/// True while the conversation still has tool calls to answer or tool
/// results for the model to read.
pub fn needs_another_turn(state: &State) -> bool {
    state
        .last_message()
        .is_some_and(|message| message.role == Role::Tool || message.has_tool_calls())
}

/// Runs `step` as a sequence of instrumented turns of the calling function.
///
/// Each turn is tracked as a self-call, so every turn shares the caller's
/// lineage and gets its own input/output snapshots, but the call stack never
/// grows past one extra frame. The loop ends when the last message needs no
/// further turn or after `max_turns` turns. A failed turn has already been
/// reported, so the loop stops with [`DebugError::Halted`].
pub async fn run_until_settled<F, Fut>(
    ctx: &CallContext,
    mut state: State,
    max_turns: Option<usize>,
    step: F,
) -> Result<State, FunctionError>
where
    F: Fn(CallContext, State) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<State, FunctionError>> + Send + 'static,
{
    let step: StatefulFn = Arc::new(move |ctx: CallContext, state: State| -> StatefulFuture {
        Box::pin(step(ctx, state))
    });

    let mut turns = 0usize;
    loop {
        if max_turns.is_some_and(|limit| turns >= limit) {
            tracing::warn!(func_name = %ctx.func_name, turns, "turn limit reached");
            return Ok(state);
        }
        turns += 1;

        let Some(next) = ctx
            .runtime
            .invoke_fn(ctx.session.clone(), ctx.func_name.clone(), step.clone(), state)
            .await
        else {
            return Err(DebugError::Halted {
                func_name: ctx.func_name.clone(),
                lineage_id: ctx.lineage_id().unwrap_or_default().to_string(),
            }
            .into());
        };
        state = next;

        if !needs_another_turn(&state) {
            return Ok(state);
        }
    }
}
