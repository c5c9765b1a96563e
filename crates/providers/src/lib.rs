//! Model client implementations for agentmux.
//!
//! All providers implement the `agentmux_core::Provider` trait.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;
