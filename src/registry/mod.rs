//! Agent Registry & State Machine
//!
//! The only structure mutated by more than one component. Other components
//! reference agents by id and read [`AgentSnapshot`] copies.

mod agent_registry;
mod record;

pub use agent_registry::{AgentRegistry, CycleTicket, ScheduleView, DEFAULT_TX_HISTORY};
pub use record::{AgentCounters, AgentSnapshot, LastTrade};
