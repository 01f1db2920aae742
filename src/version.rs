//! Framework version declarations.
//!
//! Declarations come straight out of `composer.json` and are free-form
//! (`"^11.7.21"`, `"~10.0"`, `"10.*|11.*"`). Only the major component is
//! modelled: `^11.0` and `11.7.21` compare equal. This is a known loss of
//! precision and the branch scanner depends on it, so a full semver
//! comparison must not be swapped in here.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A declaration reduced to its major version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParsedVersion {
    major: u64,
}

impl ParsedVersion {
    pub fn new(major: u64) -> Self {
        Self { major }
    }

    pub fn major(&self) -> u64 {
        self.major
    }
}

impl fmt::Display for ParsedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.0", self.major)
    }
}

/// Parse a version declaration.
///
/// The first run of ASCII digits is the major version. Alternatives separated
/// by `|` (or `||`) resolve to the lowest alternative that parses, i.e. the
/// lowest version the declaration guarantees. Returns `None` when nothing
/// parses.
pub fn parse(declaration: &str) -> Option<ParsedVersion> {
    if declaration.contains('|') {
        return declaration.split('|').filter_map(parse).min();
    }

    leading_major(declaration).map(ParsedVersion::new)
}

/// Extract the first run of digits.
fn leading_major(declaration: &str) -> Option<u64> {
    let start = declaration.find(|c: char| c.is_ascii_digit())?;
    let digits: String = declaration[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();

    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_major_only_equality() {
        assert_eq!(parse("11.7.21"), parse("^11.0"));
        assert_eq!(parse("~11.2"), parse("v11"));
        assert_eq!(parse("^11.7.21"), Some(ParsedVersion::new(11)));
    }

    #[test]
    fn test_trailing_text_is_ignored() {
        assert_eq!(parse("10.x-dev"), parse("10.48.2 as 10.0"));
        assert_eq!(parse(">=9.0 <10"), Some(ParsedVersion::new(9)));
    }

    #[test]
    fn test_alternatives_take_minimum() {
        assert_eq!(parse("10.*|11.*"), parse("10.*"));
        assert_eq!(parse("^12.0 || ^11.0"), Some(ParsedVersion::new(11)));
        assert_eq!(parse("dev-main|^9.0"), Some(ParsedVersion::new(9)));
    }

    #[test]
    fn test_no_digits_is_absent() {
        assert_eq!(parse(""), None);
        assert_eq!(parse("no-digits-here"), None);
        assert_eq!(parse("dev-main|dev-develop"), None);
    }

    #[test]
    fn test_ordering() {
        let ten = parse("^10.0").unwrap();
        let eleven = parse("11.*").unwrap();
        assert!(ten < eleven);
        assert_eq!(eleven.to_string(), "11.0");
    }

    #[test]
    fn test_overflowing_major_is_absent() {
        assert_eq!(parse("99999999999999999999999.0"), None);
    }

    #[test]
    fn test_overflowing_alternative_is_skipped() {
        assert_eq!(parse("99999999999999999999|^9.0"), Some(ParsedVersion::new(9)));
        assert_eq!(parse("^10.0|99999999999999999999"), Some(ParsedVersion::new(10)));
    }
}
