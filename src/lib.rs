pub mod adapters;
pub mod broadcast;
pub mod chain;
pub mod cli;
pub mod config;
pub mod connectors;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod registry;
pub mod runtime;
pub mod scheduler;
pub mod strategy;

pub use broadcast::{EventBroadcaster, Subscription};
pub use chain::{ChainCoordinator, ChainOutcome};
pub use config::AppConfig;
pub use error::{Result, RunereumError};
pub use persistence::{AgentStore, InMemoryAgentStore};
pub use registry::{AgentRegistry, AgentSnapshot};
pub use runtime::{AgentRuntime, RuntimeBuilder};
pub use scheduler::{Scheduler, SchedulerHandle};
