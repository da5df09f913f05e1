//! When is an agent due for its next cycle

use std::time::Duration;
use tokio::time::Instant;

use crate::domain::StrategyConfig;
use crate::registry::ScheduleView;

/// Timer-driven trigger check.
///
/// DCA runs immediately after attachment, then once per interval measured
/// from the previous trigger. Rebalance is re-checked at most once per
/// `min_recheck`; whether the check leads to an evaluation is decided by the
/// snapshot it fetches.
pub fn is_due(view: &ScheduleView<'_>, now: Instant, min_recheck: Duration) -> bool {
    match view.strategy {
        StrategyConfig::Dca(dca) => elapsed(view.last_run, now, dca.interval()),
        StrategyConfig::Rebalance(_) => elapsed(view.last_check, now, min_recheck),
    }
}

/// Whether a pushed snapshot may start a rebalance check now
pub fn accepts_push(view: &ScheduleView<'_>, now: Instant, min_recheck: Duration) -> bool {
    matches!(view.strategy, StrategyConfig::Rebalance(_))
        && elapsed(view.last_check, now, min_recheck)
}

fn elapsed(last: Option<Instant>, now: Instant, period: Duration) -> bool {
    match last {
        None => true,
        Some(last) => now.saturating_duration_since(last) >= period,
    }
}
