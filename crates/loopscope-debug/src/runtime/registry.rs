use super::CallContext;
use crate::FunctionError;
use futures::future::BoxFuture;
use loopscope_state::State;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

pub type StatefulFuture = BoxFuture<'static, Result<State, FunctionError>>;
pub type StatefulFn = Arc<dyn Fn(CallContext, State) -> StatefulFuture + Send + Sync>;

/// A registered stateful function and the state observers start it from.
#[derive(Clone)]
pub struct StatefulDef {
    pub name: String,
    pub func: StatefulFn,
    pub init_state: State,
}

impl std::fmt::Debug for StatefulDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatefulDef")
            .field("name", &self.name)
            .field("init_state", &self.init_state.id)
            .finish()
    }
}

#[derive(Clone, Debug, Default)]
pub struct StatefulRegistry {
    functions: BTreeMap<String, StatefulDef>,
}

impl StatefulRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&mut self, name: impl Into<String>, init_state: State, func: F) -> &mut Self
    where
        F: Fn(CallContext, State) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<State, FunctionError>> + Send + 'static,
    {
        let func: StatefulFn = Arc::new(move |ctx: CallContext, state: State| -> StatefulFuture {
            Box::pin(func(ctx, state))
        });
        self.insert(name.into(), init_state, func)
    }

    /// Registers a function that does not await. It still runs inside the
    /// instrumented call, so it gets the same events as async functions.
    pub fn register_sync<F>(&mut self, name: impl Into<String>, init_state: State, func: F) -> &mut Self
    where
        F: Fn(CallContext, State) -> Result<State, FunctionError> + Send + Sync + 'static,
    {
        let func = Arc::new(func);
        let wrapped: StatefulFn = Arc::new(move |ctx: CallContext, state: State| -> StatefulFuture {
            let func = func.clone();
            Box::pin(async move { func(ctx, state) })
        });
        self.insert(name.into(), init_state, wrapped)
    }

    fn insert(&mut self, name: String, init_state: State, func: StatefulFn) -> &mut Self {
        if self.functions.contains_key(&name) {
            tracing::warn!(func_name = %name, "replacing registered stateful function");
        }
        self.functions.insert(
            name.clone(),
            StatefulDef {
                name,
                func,
                init_state,
            },
        );
        self
    }

    pub fn get(&self, name: &str) -> Option<&StatefulDef> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }

    /// Function name to normalized initial state, as pushed in `stateful_funcs`.
    pub fn catalog(&self) -> BTreeMap<String, Value> {
        self.functions
            .iter()
            .map(|(name, def)| (name.clone(), def.init_state.to_value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loopscope_state::Message;

    #[test]
    fn catalog_expected_sorted_names_and_normalized_initial_states() {
        let mut registry = StatefulRegistry::new();
        registry
            .register_sync(
                "support_agent",
                State::with_messages(vec![Message::system("help customers")]),
                |_ctx, state| Ok(state),
            )
            .register("file_agent", State::new(), |_ctx, state| async move { Ok(state) });

        assert_eq!(registry.names(), vec!["file_agent", "support_agent"]);
        assert!(registry.contains("file_agent"));
        assert!(!registry.contains("missing"));

        let catalog = registry.catalog();
        assert_eq!(catalog.len(), 2);
        assert_eq!(
            catalog["support_agent"]["messages"][0]["content"],
            "help customers"
        );
        assert_eq!(catalog["file_agent"]["messages"], serde_json::json!([]));
    }

    #[test]
    fn register_same_name_twice_expected_latest_wins() {
        let mut registry = StatefulRegistry::new();
        let first = State::new();
        let second = State::new();
        let second_id = second.id.clone();
        registry.register_sync("a", first, |_ctx, state| Ok(state));
        registry.register_sync("a", second, |_ctx, state| Ok(state));

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.get("a").expect("a should be registered").init_state.id,
            second_id
        );
    }
}
