//! Live-debug runtime for stateful functions.
//!
//! Every instrumented call is tracked on its session's call stack, assigned a
//! lineage, and reported to the connected observer through a push channel.
//! Observers drive sessions through [`protocol::ControlMessage`]s: invoke a
//! registered function, pause nested calls, stop running work, or ask the
//! canvas assistant for prompt edits.

pub mod canvas;
pub mod config;
pub mod correlator;
pub mod errors;
pub mod events;
pub mod lineage;
pub mod protocol;
pub mod runtime;
pub mod session;
mod sync;

pub use canvas::*;
pub use config::*;
pub use correlator::*;
pub use errors::*;
pub use events::*;
pub use lineage::*;
pub use protocol::*;
pub use runtime::*;
pub use session::*;

pub use loopscope_state::{Message, Role, State, StateMetadata, ToolCallRequest, ToolDescriptor};
