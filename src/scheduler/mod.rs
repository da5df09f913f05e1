pub mod cycle;
pub mod service;
pub mod trigger;

pub use cycle::{CycleReport, CycleRunner};
pub use service::{Scheduler, SchedulerHandle};
