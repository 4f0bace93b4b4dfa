//! MoePeek - Streaming Translation Orchestrator
//!
//! Detects the language of a piece of text, decides which language to
//! translate it into, streams the translation from a remote OpenAI-compatible
//! API or a local Ollama server, and falls back to the remote service when
//! the first attempt fails.

pub mod cli;
pub mod config;
pub mod credentials;
pub mod detect;
pub mod error;
pub mod languages;
pub mod orchestrator;
pub mod providers;
pub mod render;
pub mod resolve;
pub mod translate;
