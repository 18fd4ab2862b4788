//! State container carried between stateful function calls.
//!
//! A [`State`] holds an OpenAI-shaped conversation (`messages`), optional tool
//! descriptors and call metadata stamped by the instrumentation layer. The
//! [`normalize`] helpers turn any serializable value into the plain JSON shape
//! pushed to observers.

pub mod errors;
pub mod message;
pub mod normalize;
pub mod state;
pub mod tool;

pub use errors::*;
pub use message::*;
pub use normalize::*;
pub use state::*;
pub use tool::*;
