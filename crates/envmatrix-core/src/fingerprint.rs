//! Deterministic instance identity.
//!
//! The fingerprint is a sha256 digest over the canonical string forms of
//! (name, interpreter, merged package string). The package string is built
//! in declaration/insertion order; reordering keys in the spec file changes
//! the fingerprint, which is the original, externally-observed behavior the
//! on-disk cache depends on.

use sha2::{Digest, Sha256};

/// Characters stripped from dependency strings when building filesystem
/// friendly prefix names.
const IDENT_STRIP_CHARS: &str = "<=>.,:+@/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    long: String,
}

impl Fingerprint {
    pub fn compute(name: Option<&str>, interpreter: Option<&str>, pkg_str: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format!("{name:?}").as_bytes());
        hasher.update(format!("{interpreter:?}").as_bytes());
        hasher.update(pkg_str.as_bytes());
        Self {
            long: hex::encode(hasher.finalize()),
        }
    }

    /// Full hex digest.
    pub fn long(&self) -> &str {
        &self.long
    }

    /// First 7 hex characters; used for on-disk lockfile names and short
    /// listings.
    pub fn short(&self) -> &str {
        &self.long[..7]
    }
}

/// Pip-style install string: `'pytest==6.1.2' 'attrs'`. Packages with a
/// `None` constraint are omitted entirely (a child spec uses `null` to
/// cancel an inherited package).
pub fn pip_deps(pkgs: &[(String, Option<String>)]) -> String {
    pkgs.iter()
        .filter_map(|(name, version)| {
            version
                .as_ref()
                .map(|version| format!("'{name}{version}'"))
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Filesystem-friendly identifier for a dependency string: quotes dropped,
/// comparison operators and punctuation stripped, tokens joined with `_`.
///
/// `'pytest==6.1.2' 'attrs'` -> `pytest612_attrs`
pub fn sanitize_ident(pkg_str: &str) -> String {
    pkg_str
        .replace('\'', "")
        .split_whitespace()
        .map(|token| {
            token
                .chars()
                .filter(|c| !IDENT_STRIP_CHARS.contains(*c))
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("_")
}

/// How an instance is addressed on the command line: zero-based ordinal
/// (`#2`) or a prefix of the long fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Ordinal(usize),
    HashPrefix(String),
}

impl Selector {
    /// Parse an identifier argument. `#N` is an ordinal; anything else is
    /// treated as a fingerprint prefix.
    pub fn parse(ident: &str) -> Option<Selector> {
        if let Some(ordinal) = ident.strip_prefix('#') {
            return ordinal.parse().ok().map(Selector::Ordinal);
        }
        if ident.is_empty() {
            return None;
        }
        Some(Selector::HashPrefix(ident.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_pure() {
        let a = Fingerprint::compute(Some("test"), Some("Interpreter('3.8')"), "'pytest==5.4.3'");
        let b = Fingerprint::compute(Some("test"), Some("Interpreter('3.8')"), "'pytest==5.4.3'");
        assert_eq!(a, b);
        assert_eq!(a.short(), &a.long()[..7]);
        assert_eq!(a.long().len(), 64);
    }

    #[test]
    fn test_fingerprint_changes_with_any_input()
    {
        let base = Fingerprint::compute(Some("test"), Some("Interpreter('3.8')"), "'pytest==5.4.3'");
        let name = Fingerprint::compute(Some("lint"), Some("Interpreter('3.8')"), "'pytest==5.4.3'");
        let py = Fingerprint::compute(Some("test"), Some("Interpreter('3.9')"), "'pytest==5.4.3'");
        let pkgs = Fingerprint::compute(Some("test"), Some("Interpreter('3.8')"), "'pytest==6.1.2'");
        assert_ne!(base, name);
        assert_ne!(base, py);
        assert_ne!(base, pkgs);
        // Absent name is distinct from any present name.
        let anon = Fingerprint::compute(None, Some("Interpreter('3.8')"), "'pytest==5.4.3'");
        assert_ne!(base, anon);
    }

    #[test]
    fn test_pip_deps() {
        let pkgs = vec![
            ("pytest".to_string(), Some("==6.1.2".to_string())),
            ("attrs".to_string(), Some(String::new())),
            ("dropped".to_string(), None),
        ];
        assert_eq!(pip_deps(&pkgs), "'pytest==6.1.2' 'attrs'");
        assert_eq!(pip_deps(&[]), "");
    }

    #[test]
    fn test_sanitize_ident() {
        assert_eq!(sanitize_ident("'pytest==6.1.2' 'attrs'"), "pytest612_attrs");
        assert_eq!(sanitize_ident("'pkg>=2.0,<3'"), "pkg203");
        assert_eq!(sanitize_ident(""), "");
    }

    #[test]
    fn test_selector_parse() {
        assert_eq!(Selector::parse("#2"), Some(Selector::Ordinal(2)));
        assert_eq!(
            Selector::parse("1f9a0cd"),
            Some(Selector::HashPrefix("1f9a0cd".to_string()))
        );
        assert_eq!(Selector::parse(""), None);
        assert_eq!(Selector::parse("#x"), None);
    }
}
