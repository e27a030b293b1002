//! Scripted rule engines
//!
//! Implementations of [`crate::rules::RuleEngine`] backed by an embedded,
//! sandboxed scripting language. Script failures are logged and swallowed so a
//! broken rule can never take down a listener.

pub mod rhai_engine;
