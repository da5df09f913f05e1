//! Chain operation coordination: profiles, duplicate detection and the
//! submit/confirm loop

pub mod coordinator;
pub mod dedup;
pub mod profile;

pub use coordinator::{ChainCoordinator, ChainOutcome};
pub use dedup::{fingerprint, DedupPolicy};
pub use profile::{ChainProfile, ChainProfiles};
