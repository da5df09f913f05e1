use serde::{Deserialize, Serialize};
use std::fmt;

/// Agent lifecycle state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// Registered, no strategy yet
    Created,
    /// Strategy being validated and attached
    Configuring,
    /// Eligible for scheduling
    Active,
    /// Scheduling suspended, strategy retained
    Paused,
    /// Terminal; no further mutation accepted
    Terminated,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Created => "CREATED",
            LifecycleState::Configuring => "CONFIGURING",
            LifecycleState::Active => "ACTIVE",
            LifecycleState::Paused => "PAUSED",
            LifecycleState::Terminated => "TERMINATED",
        }
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: LifecycleState) -> bool {
        use LifecycleState::*;

        match (self, target) {
            // Strategy attachment
            (Created, Configuring) => true,
            (Active, Configuring) => true,
            (Paused, Configuring) => true,
            (Configuring, Configuring) => true,

            // Validation passed
            (Configuring, Active) => true,

            // Pause / resume
            (Active, Paused) => true,
            (Paused, Active) => true,

            // Terminate from anywhere but terminated
            (Terminated, Terminated) => false,
            (_, Terminated) => true,

            _ => false,
        }
    }

    /// Get valid next states from current state
    pub fn valid_transitions(&self) -> Vec<LifecycleState> {
        use LifecycleState::*;

        match self {
            Created => vec![Configuring, Terminated],
            Configuring => vec![Configuring, Active, Terminated],
            Active => vec![Configuring, Paused, Terminated],
            Paused => vec![Configuring, Active, Terminated],
            Terminated => vec![],
        }
    }

    /// States from which a strategy may be attached
    pub fn accepts_strategy(&self) -> bool {
        self.can_transition_to(LifecycleState::Configuring)
    }

    /// Only active agents are picked up by the scheduler
    pub fn is_schedulable(&self) -> bool {
        matches!(self, LifecycleState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Terminated)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for LifecycleState {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.to_uppercase().as_str() {
            "CREATED" => Ok(LifecycleState::Created),
            "CONFIGURING" => Ok(LifecycleState::Configuring),
            "ACTIVE" => Ok(LifecycleState::Active),
            "PAUSED" => Ok(LifecycleState::Paused),
            "TERMINATED" => Ok(LifecycleState::Terminated),
            _ => Err(format!("Unknown state: {}", s)),
        }
    }
}

/// State transition record (for events and logging)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub reason: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl StateTransition {
    pub fn new(from: LifecycleState, to: LifecycleState, reason: impl Into<String>) -> Self {
        Self {
            from,
            to,
            reason: reason.into(),
            timestamp: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        use LifecycleState::*;

        assert!(Created.can_transition_to(Configuring));
        assert!(Configuring.can_transition_to(Active));
        assert!(Active.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Active));
        assert!(Paused.can_transition_to(Configuring));
        assert!(Created.can_transition_to(Terminated));
        assert!(Active.can_transition_to(Terminated));

        assert!(!Created.can_transition_to(Active));
        assert!(!Created.can_transition_to(Paused));
        assert!(!Configuring.can_transition_to(Paused));
        assert!(!Terminated.can_transition_to(Active));
        assert!(!Terminated.can_transition_to(Terminated));
    }

    #[test]
    fn test_valid_transitions_agree_with_predicate() {
        use LifecycleState::*;

        for from in [Created, Configuring, Active, Paused, Terminated] {
            for to in from.valid_transitions() {
                assert!(from.can_transition_to(to), "{} -> {}", from, to);
            }
        }
    }

    #[test]
    fn test_state_from_str() {
        assert_eq!(
            LifecycleState::try_from("active").unwrap(),
            LifecycleState::Active
        );
        assert!(LifecycleState::try_from("RUNNING").is_err());
    }

    #[test]
    fn test_schedulable() {
        assert!(LifecycleState::Active.is_schedulable());
        assert!(!LifecycleState::Paused.is_schedulable());
        assert!(!LifecycleState::Configuring.is_schedulable());
    }
}
