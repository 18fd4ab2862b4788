#![allow(dead_code)]

use loopscope_debug::{
    BufferedPushChannel, DebugConfig, DebugRuntime, PushEvent, Session, StatefulRegistry,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn enabled_runtime(registry: StatefulRegistry) -> DebugRuntime {
    DebugRuntime::new(DebugConfig::enabled(), registry)
}

pub fn buffered_session(runtime: &DebugRuntime) -> (Arc<Session>, BufferedPushChannel) {
    let channel = BufferedPushChannel::default();
    let session = runtime
        .sessions()
        .create("conn-1", Arc::new(channel.clone()));
    (session, channel)
}

/// Shared log written from inside stateful functions.
#[derive(Clone, Default)]
pub struct Recorder {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn push(&self, entry: impl Into<String>) {
        self.entries
            .lock()
            .expect("recorder lock should not be poisoned")
            .push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .expect("recorder lock should not be poisoned")
            .clone()
    }
}

/// Yields to spawned tasks until `condition` holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition was not reached in time");
}

pub fn output_states<'a>(events: &'a [PushEvent], func_name: &str) -> Vec<&'a PushEvent> {
    events
        .iter()
        .filter(|event| {
            matches!(event, PushEvent::OutputState { func_name: name, .. } if name == func_name)
        })
        .collect()
}
