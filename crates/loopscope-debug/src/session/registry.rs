use super::Session;
use crate::sync::lock;
use crate::{DebugError, PushChannel};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Result of attaching a connection to a session.
#[derive(Clone, Debug)]
pub struct ConnectOutcome {
    pub session: Arc<Session>,
    pub restored: bool,
}

#[derive(Default)]
struct RegistryState {
    by_id: HashMap<String, Arc<Session>>,
    by_connection: HashMap<String, Arc<Session>>,
}

/// Sessions indexed by durable session id and by transient connection id.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<RegistryState>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, connection_id: &str, channel: Arc<dyn PushChannel>) -> Arc<Session> {
        let session = Arc::new(Session::new(connection_id, channel));
        let mut inner = lock(&self.inner);
        inner
            .by_id
            .insert(session.id().to_string(), session.clone());
        inner
            .by_connection
            .insert(connection_id.to_string(), session.clone());
        tracing::info!(session_id = %session.id(), connection_id, "session created");
        session
    }

    /// Restores the session named by `session_hint` when it exists, otherwise
    /// creates a fresh one.
    pub fn connect(
        &self,
        connection_id: &str,
        session_hint: Option<&str>,
        channel: Arc<dyn PushChannel>,
    ) -> ConnectOutcome {
        if let Some(session_id) = session_hint.filter(|id| !id.is_empty()) {
            if let Some(session) = self.restore(session_id, connection_id, channel.clone()) {
                return ConnectOutcome {
                    session,
                    restored: true,
                };
            }
            tracing::debug!(session_id, "unknown session id on connect; creating a new session");
        }
        ConnectOutcome {
            session: self.create(connection_id, channel),
            restored: false,
        }
    }

    /// Re-attaches an existing session to a new connection. The old
    /// connection entry is dropped; call stack, chats and tasks are kept.
    pub fn restore(
        &self,
        session_id: &str,
        connection_id: &str,
        channel: Arc<dyn PushChannel>,
    ) -> Option<Arc<Session>> {
        let mut inner = lock(&self.inner);
        let session = inner.by_id.get(session_id)?.clone();
        let previous = session.connection_id();
        inner.by_connection.remove(&previous);
        session.attach(connection_id, channel);
        inner
            .by_connection
            .insert(connection_id.to_string(), session.clone());
        tracing::info!(
            session_id,
            previous_connection = %previous,
            connection_id,
            "session restored"
        );
        Some(session)
    }

    /// Session bound to a connection id.
    pub fn get(&self, connection_id: &str) -> Option<Arc<Session>> {
        lock(&self.inner).by_connection.get(connection_id).cloned()
    }

    pub fn get_by_id(&self, session_id: &str) -> Option<Arc<Session>> {
        lock(&self.inner).by_id.get(session_id).cloned()
    }

    pub fn require(&self, connection_id: &str) -> Result<Arc<Session>, DebugError> {
        self.get(connection_id)
            .ok_or_else(|| DebugError::SessionNotFound(connection_id.to_string()))
    }

    /// Removes a session from both indexes and tears it down.
    pub fn delete(&self, session_id: &str) -> Option<Arc<Session>> {
        let session = {
            let mut inner = lock(&self.inner);
            let session = inner.by_id.remove(session_id)?;
            let connection_id = session.connection_id();
            if inner
                .by_connection
                .get(&connection_id)
                .is_some_and(|bound| Arc::ptr_eq(bound, &session))
            {
                inner.by_connection.remove(&connection_id);
            }
            session
        };
        session.teardown();
        tracing::info!(session_id, "session deleted");
        Some(session)
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
