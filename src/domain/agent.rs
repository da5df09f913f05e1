use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, RunereumError};

/// Capability an agent may have enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Trading,
    SocialMedia,
    ContentCreation,
    CommunityManagement,
    PortfolioManagement,
    DexOperations,
    NftManagement,
    TokenDeployment,
}

impl Capability {
    pub const ALL: [Capability; 8] = [
        Capability::Trading,
        Capability::SocialMedia,
        Capability::ContentCreation,
        Capability::CommunityManagement,
        Capability::PortfolioManagement,
        Capability::DexOperations,
        Capability::NftManagement,
        Capability::TokenDeployment,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Trading => "trading",
            Capability::SocialMedia => "social_media",
            Capability::ContentCreation => "content_creation",
            Capability::CommunityManagement => "community_management",
            Capability::PortfolioManagement => "portfolio_management",
            Capability::DexOperations => "dex_operations",
            Capability::NftManagement => "nft_management",
            Capability::TokenDeployment => "token_deployment",
        }
    }

    /// Capabilities that need a chain wallet
    pub fn is_chain(&self) -> bool {
        matches!(
            self,
            Capability::Trading
                | Capability::PortfolioManagement
                | Capability::DexOperations
                | Capability::NftManagement
                | Capability::TokenDeployment
        )
    }

    /// Capabilities served by social connectors
    pub fn is_social(&self) -> bool {
        matches!(
            self,
            Capability::SocialMedia | Capability::ContentCreation | Capability::CommunityManagement
        )
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Capability {
    type Err = RunereumError;

    fn from_str(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace('-', "_");
        Capability::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| {
                RunereumError::InvalidConfiguration(format!("unknown capability '{}'", raw))
            })
    }
}

/// Tagged set of enabled capabilities, checked at operation entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.0.insert(capability);
        self
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn has_chain_capabilities(&self) -> bool {
        self.0.iter().any(Capability::is_chain)
    }

    pub fn has_social_capabilities(&self) -> bool {
        self.0.iter().any(Capability::is_social)
    }

    /// Strategies need either trading or portfolio management
    pub fn can_run_strategies(&self) -> bool {
        self.contains(Capability::Trading) || self.contains(Capability::PortfolioManagement)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Behavioral pattern; shapes strategy risk sizing, never scheduler mechanics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Behavior {
    Conservative,
    #[default]
    Moderate,
    Aggressive,
    Experimental,
    CommunityFocused,
    Analytical,
}

impl Behavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            Behavior::Conservative => "conservative",
            Behavior::Moderate => "moderate",
            Behavior::Aggressive => "aggressive",
            Behavior::Experimental => "experimental",
            Behavior::CommunityFocused => "community_focused",
            Behavior::Analytical => "analytical",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Behavior::Conservative => "Prioritize safety and risk management, focus on stable growth",
            Behavior::Moderate => "Balance between growth and risk management",
            Behavior::Aggressive => "Seek high growth opportunities, accept higher risk",
            Behavior::Experimental => "Test new strategies and opportunities, pioneer new approaches",
            Behavior::CommunityFocused => "Prioritize community engagement and social presence",
            Behavior::Analytical => "Focus on data-driven decisions and market analysis",
        }
    }

    /// Multiplier applied to per-interval DCA amounts
    pub fn position_multiplier(&self) -> Decimal {
        match self {
            Behavior::Conservative => Decimal::new(5, 1),
            Behavior::CommunityFocused => Decimal::new(75, 2),
            Behavior::Moderate | Behavior::Analytical => Decimal::ONE,
            Behavior::Experimental => Decimal::new(125, 2),
            Behavior::Aggressive => Decimal::new(15, 1),
        }
    }
}

impl fmt::Display for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Behavior {
    type Err = RunereumError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "conservative" => Ok(Behavior::Conservative),
            "moderate" => Ok(Behavior::Moderate),
            "aggressive" => Ok(Behavior::Aggressive),
            "experimental" => Ok(Behavior::Experimental),
            "community_focused" => Ok(Behavior::CommunityFocused),
            "analytical" => Ok(Behavior::Analytical),
            _ => Err(RunereumError::InvalidConfiguration(format!(
                "unknown behavior '{}'",
                raw
            ))),
        }
    }
}

/// Social and web presence links
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialPresence {
    #[serde(default)]
    pub twitter_link: Option<String>,
    #[serde(default)]
    pub telegram_link: Option<String>,
    #[serde(default)]
    pub youtube_link: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
}

impl SocialPresence {
    fn links(&self) -> impl Iterator<Item = (&'static str, &String)> {
        [
            ("twitter_link", self.twitter_link.as_ref()),
            ("telegram_link", self.telegram_link.as_ref()),
            ("youtube_link", self.youtube_link.as_ref()),
            ("website", self.website.as_ref()),
        ]
        .into_iter()
        .filter_map(|(name, link)| link.map(|l| (name, l)))
    }

    pub fn validate(&self) -> Result<()> {
        for (name, link) in self.links() {
            if !(link.starts_with("https://") || link.starts_with("http://")) {
                return Err(RunereumError::InvalidConfiguration(format!(
                    "{} must be an http(s) URL, got '{}'",
                    name, link
                )));
            }
        }
        Ok(())
    }
}

/// Identity and behavior of an agent, fixed at creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    pub name: String,
    pub ticker: String,
    pub chain: String,
    #[serde(default)]
    pub behavior: Behavior,
    #[serde(default)]
    pub capabilities: CapabilitySet,
    #[serde(default)]
    pub social_presence: Option<SocialPresence>,
}

impl AgentProfile {
    pub fn new(name: impl Into<String>, ticker: impl Into<String>, chain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ticker: ticker.into(),
            chain: chain.into(),
            behavior: Behavior::default(),
            capabilities: CapabilitySet::new(),
            social_presence: None,
        }
    }

    pub fn with_behavior(mut self, behavior: Behavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities = self.capabilities.with(capability);
        self
    }

    pub fn with_social_presence(mut self, presence: SocialPresence) -> Self {
        self.social_presence = Some(presence);
        self
    }

    pub fn validate(&self) -> Result<()> {
        let name_len = self.name.trim().chars().count();
        if !(3..=50).contains(&name_len) {
            return Err(RunereumError::InvalidConfiguration(format!(
                "name must be 3-50 characters, got {}",
                name_len
            )));
        }

        let ticker_len = self.ticker.trim().chars().count();
        if !(1..=10).contains(&ticker_len) {
            return Err(RunereumError::InvalidConfiguration(format!(
                "ticker must be 1-10 characters, got {}",
                ticker_len
            )));
        }

        if self.chain.trim().is_empty() {
            return Err(RunereumError::InvalidConfiguration(
                "chain must not be empty".to_string(),
            ));
        }

        if let Some(presence) = &self.social_presence {
            presence.validate()?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_parse() {
        assert_eq!(
            "dex-operations".parse::<Capability>().unwrap(),
            Capability::DexOperations
        );
        assert_eq!(
            "social_media".parse::<Capability>().unwrap(),
            Capability::SocialMedia
        );
        assert!("teleport".parse::<Capability>().is_err());
    }

    #[test]
    fn test_capability_groups() {
        let set: CapabilitySet = [Capability::SocialMedia].into_iter().collect();
        assert!(set.has_social_capabilities());
        assert!(!set.has_chain_capabilities());
        assert!(!set.can_run_strategies());

        let set = set.with(Capability::PortfolioManagement);
        assert!(set.has_chain_capabilities());
        assert!(set.can_run_strategies());
    }

    #[test]
    fn test_profile_validation() {
        let profile = AgentProfile::new("Runekeeper", "RUNE", "base-sepolia");
        assert!(profile.validate().is_ok());

        let short = AgentProfile::new("Ru", "RUNE", "base-sepolia");
        assert!(short.validate().is_err());

        let long_ticker = AgentProfile::new("Runekeeper", "RUNEKEEPERS", "base-sepolia");
        assert!(long_ticker.validate().is_err());

        let bad_link = profile.with_social_presence(SocialPresence {
            website: Some("runekeeper.io".into()),
            ..Default::default()
        });
        assert!(bad_link.validate().is_err());
    }

    #[test]
    fn test_behavior_multiplier() {
        assert_eq!(Behavior::Moderate.position_multiplier(), Decimal::ONE);
        assert!(Behavior::Conservative.position_multiplier() < Decimal::ONE);
        assert!(Behavior::Aggressive.position_multiplier() > Decimal::ONE);
        assert_eq!("community-focused".parse::<Behavior>().unwrap(), Behavior::CommunityFocused);
    }
}
