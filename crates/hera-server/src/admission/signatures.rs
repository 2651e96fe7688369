//! Injection signatures scanned in request bodies and query strings.

use regex::{RegexSet, RegexSetBuilder};

/// Family of an injection signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureFamily {
    /// SQL keywords next to `FROM`/`WHERE` and tautologies.
    Sql,
    /// Script tags, handlers, and `javascript:` URLs.
    Script,
    /// `../` style directory escapes, raw or encoded.
    PathTraversal,
    /// Shell metacharacters chained to commands.
    Shell,
}

impl SignatureFamily {
    /// Returns the family name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sql => "sql_injection",
            Self::Script => "script_injection",
            Self::PathTraversal => "path_traversal",
            Self::Shell => "shell_injection",
        }
    }
}

const SIGNATURES: &[(SignatureFamily, &str)] = &[
    (SignatureFamily::Sql, r"\bunion\b[\s\S]{0,40}\bselect\b"),
    (SignatureFamily::Sql, r"\bselect\s+(\*|[\w\s,.()]+?)\s+from\s+\w"),
    (SignatureFamily::Sql, r"\bdelete\s+from\b[\s\S]{0,100}\bwhere\b"),
    (SignatureFamily::Sql, r"\bupdate\s+\w+\s+set\b[\s\S]{0,100}\bwhere\b"),
    (SignatureFamily::Sql, r"\bdrop\s+(table|database)\b"),
    (SignatureFamily::Sql, r"\binsert\s+into\b[\s\S]{0,100}\bvalues\b"),
    (SignatureFamily::Sql, r#"['"]\s*or\s+['"]?\d+['"]?\s*=\s*['"]?\d+"#),
    (SignatureFamily::Sql, r"'\s*(--|;)"),
    (SignatureFamily::Script, r"<\s*script\b"),
    (SignatureFamily::Script, r"javascript\s*:"),
    (SignatureFamily::Script, r"<[^>]+\bon[a-z]+\s*="),
    (SignatureFamily::Script, r"<\s*(iframe|object|embed)\b"),
    (SignatureFamily::PathTraversal, r"\.\./|\.\.\\"),
    (SignatureFamily::PathTraversal, r"%2e%2e(%2f|%5c|/|\\)"),
    (SignatureFamily::Shell, r";\s*(rm|curl|wget|bash|sh|nc|cat|chmod)\b"),
    (SignatureFamily::Shell, r"\$\([^)]*\)"),
    (SignatureFamily::Shell, r"`[^`]*\b(rm|curl|wget|cat|nc|bash|sh)\b[^`]*`"),
    (SignatureFamily::Shell, r"\|\s*(sh|bash|nc)\b"),
    (SignatureFamily::Shell, r"&&\s*(rm|curl|wget|bash|sh|nc)\b"),
];

/// Compiled signature set, built once at startup.
///
/// Matching is case-insensitive and multi-line.
///
/// # Example
///
/// ```
/// use hera_server::admission::{SignatureFamily, SignatureSet};
///
/// let signatures = SignatureSet::default_set();
/// assert_eq!(
///     signatures.first_match("name=x' OR '1'='1"),
///     Some(SignatureFamily::Sql)
/// );
/// assert_eq!(signatures.first_match(r#"{"entity_name":"Acme Select"}"#), None);
/// ```
#[derive(Debug, Clone)]
pub struct SignatureSet {
    set: RegexSet,
    families: Vec<SignatureFamily>,
}

impl SignatureSet {
    /// Compiles the built-in signatures.
    #[must_use]
    pub fn default_set() -> Self {
        let set = RegexSetBuilder::new(SIGNATURES.iter().map(|(_, pattern)| *pattern))
            .case_insensitive(true)
            .multi_line(true)
            .build()
            .unwrap_or_else(|_| RegexSet::empty());
        Self {
            set,
            families: SIGNATURES.iter().map(|(family, _)| *family).collect(),
        }
    }

    /// Returns the family of the first signature that matches `text`.
    #[must_use]
    pub fn first_match(&self, text: &str) -> Option<SignatureFamily> {
        self.set
            .matches(text)
            .iter()
            .next()
            .map(|index| self.families[index])
    }

    /// Returns the number of compiled signatures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.set.len()
    }

    /// Returns `true` if no signature compiled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

impl Default for SignatureSet {
    fn default() -> Self {
        Self::default_set()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_signatures_compile() {
        let signatures = SignatureSet::default_set();
        assert_eq!(signatures.len(), SIGNATURES.len());
    }

    #[test]
    fn test_sql_signatures() {
        let s = SignatureSet::default_set();
        for text in [
            "1 UNION SELECT password FROM users",
            "select * from accounts",
            "DELETE FROM core_entities WHERE 1=1",
            "'; DROP TABLE users",
            "insert into t (a) values (1)",
            "admin' or '1'='1",
        ] {
            assert_eq!(s.first_match(text), Some(SignatureFamily::Sql), "{text}");
        }
    }

    #[test]
    fn test_script_signatures() {
        let s = SignatureSet::default_set();
        for text in [
            "<script>alert(1)</script>",
            "<a href=\"javascript:alert(1)\">",
            "<img src=x onerror=alert(1)>",
            "<iframe src=//evil>",
        ] {
            assert_eq!(s.first_match(text), Some(SignatureFamily::Script), "{text}");
        }
    }

    #[test]
    fn test_traversal_and_shell_signatures() {
        let s = SignatureSet::default_set();
        assert_eq!(s.first_match("../../etc/passwd"), Some(SignatureFamily::PathTraversal));
        assert_eq!(s.first_match("%2e%2e%2fetc"), Some(SignatureFamily::PathTraversal));
        assert_eq!(s.first_match("x; rm -rf /"), Some(SignatureFamily::Shell));
        assert_eq!(s.first_match("$(curl evil)"), Some(SignatureFamily::Shell));
        assert_eq!(s.first_match("a | sh"), Some(SignatureFamily::Shell));
    }

    #[test]
    fn test_business_payloads_pass() {
        let s = SignatureSet::default_set();
        for text in [
            r#"{"organization_id":"org-A","entity_data":{"entity_type":"CUSTOMER","smart_code":"HERA.CRM.CUSTOMER.ENTITY.PROFILE.v1"}}"#,
            r#"{"entity_name":"Select Foods Ltd","description":"from the north office"}"#,
            r#"{"lines":[{"side":"DR","amount":100,"currency":"USD"}]}"#,
            "page=2&sort=created_at",
        ] {
            assert_eq!(s.first_match(text), None, "{text}");
        }
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn identifier_text_never_matches(text in "[A-Za-z0-9_.-]{0,64}") {
                prop_assert_eq!(SignatureSet::default_set().first_match(&text), None);
            }

            #[test]
            fn union_select_is_found_anywhere(prefix in "[a-z0-9 ]{0,32}", suffix in "[a-z0-9 ]{0,32}") {
                let text = format!("{prefix} UNION SELECT {suffix}");
                prop_assert_eq!(
                    SignatureSet::default_set().first_match(&text),
                    Some(SignatureFamily::Sql)
                );
            }
        }
    }
}
