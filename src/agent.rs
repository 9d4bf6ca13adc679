//! Agent lifecycle: subprocess supervision, per-agent input scheduling,
//! and bounded conversation history.

mod history;
mod process;
mod queue;
mod session;

pub use history::HistoryStore;
pub use process::{AgentProcess, AgentProcessSpec};
pub use queue::InputQueue;
pub use session::{stamp, AgentSession, SessionCommand, SessionEvent, SessionTimeouts, StopMode};
