//! Compilation of `:name` patterns to anchored regular expressions.

use crate::error::RegistryError;
use crate::params::Params;
use regex::Regex;

/// A parameterized pattern compiled at registration time.
#[derive(Debug, Clone)]
pub(crate) struct CompiledPattern {
    regex: Regex,
    names: Vec<String>,
    /// Index of the owning route in the registry table.
    pub(crate) index: usize,
}

impl CompiledPattern {
    /// Compiles `pattern`, turning each `:name` segment into a capture group
    /// that matches one non-empty segment.
    pub(crate) fn compile(pattern: &str, index: usize) -> Result<Self, RegistryError> {
        let mut source = String::from("^");
        let mut names = Vec::new();
        for segment in normalize(pattern).split('/').filter(|s| !s.is_empty()) {
            source.push('/');
            if let Some(name) = segment.strip_prefix(':') {
                if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    return Err(RegistryError::invalid_pattern(
                        pattern,
                        format!("bad parameter name '{name}'"),
                    ));
                }
                if names.iter().any(|n| n == name) {
                    return Err(RegistryError::invalid_pattern(
                        pattern,
                        format!("duplicate parameter '{name}'"),
                    ));
                }
                source.push_str("([^/]+)");
                names.push(name.to_string());
            } else {
                source.push_str(&regex::escape(segment));
            }
        }
        if names.is_empty() {
            return Err(RegistryError::invalid_pattern(pattern, "no parameters"));
        }
        source.push('$');
        let regex = Regex::new(&source)
            .map_err(|e| RegistryError::invalid_pattern(pattern, e.to_string()))?;
        Ok(Self {
            regex,
            names,
            index,
        })
    }

    /// Returns the captured parameters if `path` matches.
    pub(crate) fn captures(&self, path: &str) -> Option<Params> {
        let caps = self.regex.captures(path)?;
        Some(
            self.names
                .iter()
                .enumerate()
                .filter_map(|(i, name)| {
                    caps.get(i + 1)
                        .map(|m| (name.clone(), m.as_str().to_string()))
                })
                .collect(),
        )
    }
}

/// Strips a trailing slash (except on `/`).
pub(crate) fn normalize(path: &str) -> &str {
    if path.len() > 1 {
        path.strip_suffix('/').unwrap_or(path)
    } else {
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_and_capture() {
        let p = CompiledPattern::compile("/api/v2/entities/:id/fields/:field", 0).unwrap();
        let params = p.captures("/api/v2/entities/e1/fields/credit_limit").unwrap();
        assert_eq!(params.get("id"), Some("e1"));
        assert_eq!(params.get("field"), Some("credit_limit"));
    }

    #[test]
    fn test_anchored() {
        let p = CompiledPattern::compile("/entities/:id", 0).unwrap();
        assert!(p.captures("/entities/1").is_some());
        assert!(p.captures("/entities/1/extra").is_none());
        assert!(p.captures("/x/entities/1").is_none());
        assert!(p.captures("/entities/").is_none());
    }

    #[test]
    fn test_literal_segments_are_escaped() {
        let p = CompiledPattern::compile("/v2.0/items/:id", 0).unwrap();
        assert!(p.captures("/v2.0/items/1").is_some());
        assert!(p.captures("/v2x0/items/1").is_none());
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(CompiledPattern::compile("/a/:", 0).is_err());
        assert!(CompiledPattern::compile("/a/:id/:id", 0).is_err());
        assert!(CompiledPattern::compile("/a/:x-y", 0).is_err());
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize("/a/"), "/a");
        assert_eq!(normalize("/a"), "/a");
    }
}
