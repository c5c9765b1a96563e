//! The agent loop: reason, call tools, observe, repeat.
//!
//! 1. **Prepare** the conversation from the protocol layer's request context
//! 2. **Ask the model**, offering the tool catalog (native) or a tool listing
//!    embedded in the prompt (prompt convention)
//! 3. **If tool calls**: execute them in order, append the results, loop back
//! 4. **If plain text**: that text is the answer
//!
//! The loop stops at the first tool-free response or after
//! `max_tool_iterations + 1` model calls, whichever comes first.

pub mod progress;
pub mod prompt;
pub mod react;
pub mod runtime;

#[cfg(test)]
mod test_helpers;

pub use progress::ProgressEvent;
pub use react::{EXHAUSTED_ANSWER, LoopOutcome, ModelSettings, ReactLoop, ReactResult};
pub use runtime::{AgentRuntime, ConversationInput, EchoAgent, LlmAgent, McpAgent, RuntimeDeps, build_runtime};
