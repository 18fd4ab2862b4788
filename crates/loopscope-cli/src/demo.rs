//! Scripted stateful functions served by the CLI. The "model" is a fixed
//! script so sessions are reproducible without a provider.

use loopscope_debug::{CallContext, FunctionError, StatefulRegistry, run_until_settled};
use loopscope_state::{Message, Role, State, ToolCallRequest, ToolDescriptor};
use serde_json::{Value, json};

pub const FILE_AGENT: &str = "file_agent";
pub const ROUTER_AGENT: &str = "router_agent";
pub const SUPPORT_AGENT: &str = "support_agent";
pub const FAILING_AGENT: &str = "failing_agent";

const MAX_TURNS: usize = 8;

pub fn registry() -> StatefulRegistry {
    let mut registry = StatefulRegistry::new();
    registry
        .register(FILE_AGENT, file_agent_state(), |ctx, state| async move {
            run_until_settled(&ctx, state, Some(MAX_TURNS), file_agent_turn).await
        })
        .register(ROUTER_AGENT, router_agent_state(), |ctx, state| async move {
            run_until_settled(&ctx, state, Some(MAX_TURNS), router_agent_turn).await
        })
        .register_sync(SUPPORT_AGENT, support_agent_state(), support_agent)
        .register_sync(FAILING_AGENT, State::new(), |_ctx, _state| {
            Err("failing_agent always fails".into())
        });
    registry
}

fn file_agent_state() -> State {
    State::with_messages(vec![Message::system(
        "You are a helpful virtual assistant focused on data analysis and file management. Be direct and informative in your responses.",
    )])
    .tools(vec![
        ToolDescriptor::with_string_params(
            "file_search",
            "Searches for files matching pattern in given directory. Returns list of matching file paths",
            &["directory", "pattern"],
        ),
        ToolDescriptor::with_string_params(
            "analyze_csv",
            "Reads CSV file and performs statistical analysis",
            &["filepath"],
        ),
    ])
}

fn router_agent_state() -> State {
    State::with_messages(vec![Message::system("Router Agent system prompt.")]).tools(vec![
        ToolDescriptor::with_string_params("get_weather", "Get the weather for a given city", &["city"]),
        ToolDescriptor::with_string_params(
            "call_support_agent",
            "Redirect to the Customer Support Agent",
            &["query"],
        ),
    ])
}

fn support_agent_state() -> State {
    State::with_messages(vec![Message::system(
        "You are a customer support agent. Answer briefly.",
    )])
}

fn tool_call_id(state: &State) -> String {
    format!("call_{}", state.messages.len())
}

fn tool_outputs(state: &State) -> usize {
    state
        .messages
        .iter()
        .filter(|message| message.role == Role::Tool)
        .count()
}

fn last_user_text(state: &State) -> String {
    state
        .messages
        .iter()
        .rev()
        .find(|message| message.role == Role::User)
        .and_then(Message::text)
        .unwrap_or_default()
        .to_string()
}

fn request_tool(state: &mut State, name: &str, arguments: Value) -> ToolCallRequest {
    let request = ToolCallRequest::new(tool_call_id(state), name, arguments.to_string());
    state.append_message(Message::assistant_with_tool_calls(None, vec![request.clone()]));
    request
}

async fn file_agent_turn(_ctx: CallContext, mut state: State) -> Result<State, FunctionError> {
    match tool_outputs(&state) {
        0 => {
            let request = request_tool(
                &mut state,
                "file_search",
                json!({"directory": ".", "pattern": "*.csv"}),
            );
            state.append_message(Message::tool_result(request.id, json!(["sales_data.csv"]).to_string()));
        }
        1 => {
            let request = request_tool(&mut state, "analyze_csv", json!({"filepath": "sales_data.csv"}));
            let analysis = json!({"revenue": {"mean": 0.5, "min": 0, "max": 1, "sum": 2}});
            state.append_message(Message::tool_result(request.id, analysis.to_string()));
        }
        _ => state.append_message(Message::assistant(
            "sales_data.csv has a total revenue of 2 with a mean of 0.5.",
        )),
    }
    Ok(state)
}

async fn router_agent_turn(ctx: CallContext, mut state: State) -> Result<State, FunctionError> {
    if let Some(answer) = state
        .messages
        .last()
        .filter(|message| message.role == Role::Tool)
        .and_then(Message::text)
        .map(str::to_string)
    {
        let reply = format!("Here is what I found: {answer}");
        state.append_message(Message::assistant(reply));
        return Ok(state);
    }

    let query = last_user_text(&state);
    if query.to_lowercase().contains("weather") {
        let request = request_tool(&mut state, "get_weather", json!({"city": "Paris"}));
        state.append_message(Message::tool_result(request.id, "10 degrees celsius"));
        return Ok(state);
    }

    let request = request_tool(&mut state, "call_support_agent", json!({"query": query}));
    let mut support = support_agent_state();
    support.append_message(Message::user(query));
    let answer = ctx
        .call(SUPPORT_AGENT, support)
        .await
        .and_then(|result| result.last_message().and_then(Message::text).map(str::to_string))
        .unwrap_or_else(|| "The support agent is unavailable.".to_string());
    state.append_message(Message::tool_result(request.id, answer));
    Ok(state)
}

fn support_agent(_ctx: CallContext, mut state: State) -> Result<State, FunctionError> {
    let question = last_user_text(&state);
    if question.trim().is_empty() {
        return Err("support_agent needs a user question".into());
    }
    state.append_message(Message::assistant(format!(
        "For \"{question}\": please restart the device and try again."
    )));
    Ok(state)
}
