//! Model adapters used by agents.
//!
//! Providers implement [`traits::ChatModel`]. Those without native function
//! calling inherit the textual protocol in [`fallback`].

#![warn(missing_docs, clippy::pedantic)]

pub mod echo;
pub mod fallback;
pub mod traits;
