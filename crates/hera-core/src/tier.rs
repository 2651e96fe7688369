//! The four-level severity scale.
//!
//! The same scale classifies guardrail rules, error categories, and admission
//! (DDoS) outcomes, so it is exposed under three names.

use serde::{Deserialize, Serialize};
use std::fmt;

/// LOW / MEDIUM / HIGH / CRITICAL classification.
///
/// Variants are ordered, so `max()` over a set of tiers yields the most
/// severe one.
///
/// # Example
///
/// ```
/// use hera_core::SecurityTier;
///
/// let worst = [SecurityTier::Low, SecurityTier::High, SecurityTier::Medium]
///     .into_iter()
///     .max();
/// assert_eq!(worst, Some(SecurityTier::High));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityTier {
    /// Informational or performance-related.
    Low,
    /// Structural problems.
    Medium,
    /// Data integrity problems.
    High,
    /// Tenant isolation or identity problems.
    Critical,
}

/// Severity of an error category.
pub type Severity = SecurityTier;

/// Risk level attached to admission filter outcomes.
pub type RiskLevel = SecurityTier;

impl SecurityTier {
    /// Returns the canonical upper-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    /// Returns all tiers from most to least severe.
    #[must_use]
    pub const fn descending() -> [Self; 4] {
        [Self::Critical, Self::High, Self::Medium, Self::Low]
    }

    /// Returns `true` for tiers that should be tagged for alerting.
    #[must_use]
    pub const fn is_alerting(&self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

impl fmt::Display for SecurityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(SecurityTier::Critical > SecurityTier::High);
        assert!(SecurityTier::High > SecurityTier::Medium);
        assert!(SecurityTier::Medium > SecurityTier::Low);
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&SecurityTier::Critical).unwrap();
        assert_eq!(json, "\"CRITICAL\"");
        let tier: SecurityTier = serde_json::from_str("\"MEDIUM\"").unwrap();
        assert_eq!(tier, SecurityTier::Medium);
    }

    #[test]
    fn test_alerting() {
        assert!(SecurityTier::Critical.is_alerting());
        assert!(SecurityTier::High.is_alerting());
        assert!(!SecurityTier::Medium.is_alerting());
    }
}
