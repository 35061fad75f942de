//! Interval version ranges over `semver::Version`.
//!
//! Module requirements constrain providers with bracket-notation ranges
//! (`[1.0,2.0)`, `(1.2,1.4]`, or a bare `1.0` meaning "at least"). This is
//! interval containment, not semver's caret/tilde matching, so it gets its
//! own type.

use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error parsing a version range from its bracket notation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeParseError {
    #[error("empty version range")]
    Empty,

    #[error("invalid version `{0}` in range")]
    InvalidVersion(String),

    #[error("malformed range `{0}`: expected `[min,max)` notation or a bare version")]
    Malformed(String),
}

/// An interval constraint on versions, with inclusive or exclusive bounds.
///
/// The upper bound is optional: a bare version (`1.0`) means "that version
/// or anything newer".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionRange {
    /// Lower bound.
    pub min: Version,
    /// Whether the lower bound itself is included.
    pub min_inclusive: bool,
    /// Upper bound, if any.
    pub max: Option<Version>,
    /// Whether the upper bound itself is included.
    pub max_inclusive: bool,
}

impl VersionRange {
    /// Range accepting every version.
    pub fn any() -> Self {
        Self {
            min: Version::new(0, 0, 0),
            min_inclusive: true,
            max: None,
            max_inclusive: false,
        }
    }

    /// Range accepting `min` or anything newer.
    pub fn at_least(min: Version) -> Self {
        Self {
            min,
            min_inclusive: true,
            max: None,
            max_inclusive: false,
        }
    }

    /// Range accepting exactly one version (`[v,v]`).
    pub fn exact(version: Version) -> Self {
        Self {
            min: version.clone(),
            min_inclusive: true,
            max: Some(version),
            max_inclusive: true,
        }
    }

    /// Whether `version` falls inside this range.
    pub fn contains(&self, version: &Version) -> bool {
        let above_min = if self.min_inclusive {
            *version >= self.min
        } else {
            *version > self.min
        };
        if !above_min {
            return false;
        }
        match &self.max {
            None => true,
            Some(max) => {
                if self.max_inclusive {
                    version <= max
                } else {
                    version < max
                }
            }
        }
    }
}

impl Default for VersionRange {
    fn default() -> Self {
        Self::any()
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.max {
            None => write!(f, "{}", self.min),
            Some(max) => write!(
                f,
                "{}{},{}{}",
                if self.min_inclusive { '[' } else { '(' },
                self.min,
                max,
                if self.max_inclusive { ']' } else { ')' },
            ),
        }
    }
}

impl FromStr for VersionRange {
    type Err = RangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(RangeParseError::Empty);
        }

        let first = s.chars().next().unwrap_or(' ');
        if first != '[' && first != '(' {
            // Bare version: at-least semantics.
            return Ok(Self::at_least(parse_lenient(s)?));
        }

        let last = s.chars().last().unwrap_or(' ');
        if last != ']' && last != ')' {
            return Err(RangeParseError::Malformed(s.to_string()));
        }

        let body = &s[1..s.len() - 1];
        let (lo, hi) = body
            .split_once(',')
            .ok_or_else(|| RangeParseError::Malformed(s.to_string()))?;

        Ok(Self {
            min: parse_lenient(lo.trim())?,
            min_inclusive: first == '[',
            max: Some(parse_lenient(hi.trim())?),
            max_inclusive: last == ']',
        })
    }
}

impl TryFrom<String> for VersionRange {
    type Error = RangeParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VersionRange> for String {
    fn from(range: VersionRange) -> Self {
        range.to_string()
    }
}

/// Parse a version, tolerating missing minor/patch segments (`1` and `1.0`
/// are both accepted as `1.0.0`).
pub fn parse_lenient(s: &str) -> Result<Version, RangeParseError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(RangeParseError::Empty);
    }
    if let Ok(v) = Version::parse(s) {
        return Ok(v);
    }
    let dots = s.chars().filter(|c| *c == '.').count();
    let padded = match dots {
        0 => format!("{s}.0.0"),
        1 => format!("{s}.0"),
        _ => s.to_string(),
    };
    Version::parse(&padded).map_err(|_| RangeParseError::InvalidVersion(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        parse_lenient(s).unwrap()
    }

    #[test]
    fn test_parse_bracket_notation() {
        let range: VersionRange = "[1.0,2.0)".parse().unwrap();
        assert_eq!(range.min, v("1.0"));
        assert!(range.min_inclusive);
        assert_eq!(range.max, Some(v("2.0")));
        assert!(!range.max_inclusive);
    }

    #[test]
    fn test_parse_bare_version_is_at_least() {
        let range: VersionRange = "1.5".parse().unwrap();
        assert!(range.contains(&v("1.5")));
        assert!(range.contains(&v("99.0")));
        assert!(!range.contains(&v("1.4.9")));
    }

    #[test]
    fn test_contains_respects_bounds() {
        let range: VersionRange = "[1.0,2.0)".parse().unwrap();
        assert!(range.contains(&v("1.0")));
        assert!(range.contains(&v("1.9.9")));
        assert!(!range.contains(&v("2.0")));
        assert!(!range.contains(&v("0.9")));

        let open: VersionRange = "(1.0,2.0]".parse().unwrap();
        assert!(!open.contains(&v("1.0")));
        assert!(open.contains(&v("2.0")));
    }

    #[test]
    fn test_exact_range() {
        let range = VersionRange::exact(v("1.0"));
        assert!(range.contains(&v("1.0")));
        assert!(!range.contains(&v("1.0.1")));
        assert_eq!(range.to_string(), "[1.0.0,1.0.0]");
    }

    #[test]
    fn test_display_round_trip() {
        for s in ["[1.0.0,2.0.0)", "(1.2.0,1.4.0]", "1.0.0"] {
            let range: VersionRange = s.parse().unwrap();
            assert_eq!(range.to_string(), s);
        }
    }

    #[test]
    fn test_malformed_rejected() {
        assert!("[1.0".parse::<VersionRange>().is_err());
        assert!("[a,b]".parse::<VersionRange>().is_err());
        assert!("".parse::<VersionRange>().is_err());
    }
}
