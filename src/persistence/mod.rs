//! Persistence hooks for agent state

pub mod store;

pub use store::{AgentStore, InMemoryAgentStore};
