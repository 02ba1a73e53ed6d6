//! Outreach: turn a one-line request into a reviewed, sendable campaign.

pub mod api;
pub mod campaign;
pub mod channels;
pub mod config;
pub mod conversation;
pub mod discovery;
pub mod error;
pub mod followup;
pub mod generator;
pub mod intent;
pub mod llm;
pub mod pipeline;
pub mod store;
