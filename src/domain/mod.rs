pub mod agent;
pub mod event;
pub mod market;
pub mod state;
pub mod strategy;
pub mod trade;
pub mod transaction;

pub use agent::*;
pub use event::*;
pub use market::*;
pub use state::*;
pub use strategy::*;
pub use trade::*;
pub use transaction::*;
