//! Operation classes.

use http::Method;
use serde::{Deserialize, Serialize};

/// Path fragments that mark ledger, posting, and approval endpoints.
const FINANCE_MARKERS: &[&str] = &[
    "/transactions",
    "/ledger",
    "/journal",
    "/postings",
    "/approvals",
    "/approve",
    "/payments",
];

/// Path fragments that mark mutations reachable through any method.
const WRITE_MARKERS: &[&str] = &["create", "update", "delete", "upsert"];

/// Classification used to select rate-limit budgets and idempotency
/// participation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationClass {
    /// Side-effect free operations.
    Read,
    /// Create, update, delete, and upsert operations.
    Write,
    /// Ledger posting, transaction, and approval operations.
    Finance,
}

impl OperationClass {
    /// Returns the canonical upper-case name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::Finance => "FINANCE",
        }
    }

    /// Returns `true` for classes whose requests mutate state.
    #[must_use]
    pub const fn is_mutating(&self) -> bool {
        matches!(self, Self::Write | Self::Finance)
    }

    /// Classifies a request from its method and path.
    ///
    /// # Example
    ///
    /// ```
    /// use hera_core::OperationClass;
    /// use http::Method;
    ///
    /// assert_eq!(OperationClass::classify(&Method::POST, "/api/v2/transactions"), OperationClass::Finance);
    /// assert_eq!(OperationClass::classify(&Method::POST, "/api/v2/entities"), OperationClass::Write);
    /// assert_eq!(OperationClass::classify(&Method::GET, "/api/v2/entities"), OperationClass::Read);
    /// ```
    #[must_use]
    pub fn classify(method: &Method, path: &str) -> Self {
        let lower = path.to_ascii_lowercase();
        let mutating_method = matches!(
            *method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        );
        if mutating_method && FINANCE_MARKERS.iter().any(|m| lower.contains(m)) {
            return Self::Finance;
        }
        if mutating_method || WRITE_MARKERS.iter().any(|m| lower.contains(m)) {
            return Self::Write;
        }
        Self::Read
    }
}

impl std::fmt::Display for OperationClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finance_paths() {
        for path in [
            "/api/v2/transactions",
            "/api/v2/ledger/post",
            "/api/v2/approvals/123",
            "/api/v2/transactions/abc/approve",
        ] {
            assert_eq!(
                OperationClass::classify(&Method::POST, path),
                OperationClass::Finance,
                "{path}"
            );
        }
    }

    #[test]
    fn test_reads_of_finance_paths_are_reads() {
        assert_eq!(
            OperationClass::classify(&Method::GET, "/api/v2/transactions"),
            OperationClass::Read
        );
    }

    #[test]
    fn test_write_markers() {
        assert_eq!(
            OperationClass::classify(&Method::GET, "/api/v2/entities/upsert"),
            OperationClass::Write
        );
        assert_eq!(
            OperationClass::classify(&Method::DELETE, "/api/v2/entities/1"),
            OperationClass::Write
        );
    }

    #[test]
    fn test_mutating() {
        assert!(OperationClass::Finance.is_mutating());
        assert!(OperationClass::Write.is_mutating());
        assert!(!OperationClass::Read.is_mutating());
    }
}
