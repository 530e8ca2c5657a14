//! Agent execution loop and its collaborators.

mod core;
pub mod prompt;

pub use self::core::{Agent, AgentEvent, ChatOutcome, Modification};
