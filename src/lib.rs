//! GraphGullible: a chatbot that misreads misleading charts and is
//! corrected by the learner, step by step.

pub mod api;
pub mod config;
pub mod conversation;
pub mod error;
pub mod llm;
pub mod scenario;
pub mod store;
pub mod study;
