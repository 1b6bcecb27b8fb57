//! Chat assistant for the patient portal.
//!
//! This crate builds the instruction prompt sent to the language model, defines the
//! Gemini `generateContent` wire format, and exposes the [`Assistant`] trait that the
//! core library calls. A blocking HTTP backend is available behind the `gemini` feature.

pub mod client;
pub mod gemini;
pub mod prompts;

pub use client::*;
pub use gemini::*;
pub use prompts::*;
