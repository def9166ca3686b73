//! These models represent the objects passed around by the runtime
//!
//! The message shape is the common denominator of the chat-completion
//! vendors: a role-tagged variant where only assistant messages carry tool
//! calls and only tool messages carry a `tool_call_id`. Backend adapters
//! convert these into their vendor wire format; the engine never does.
pub mod message;
pub mod tool;
pub mod usage;

pub use message::{Message, ToolCall};
pub use tool::{Tool, ToolSpec};
pub use usage::Usage;
