//! Hand-rolled semantic versions and range expressions.
//!
//! Release versions are strict `MAJOR.MINOR.PATCH`. Ranges are the expression
//! language used by `affectedVersions` in compatibility manifests:
//! `||`-separated alternatives of whitespace-separated comparators, e.g.
//! `>=0.7.0 <0.8.0` or `0.5.1 || ^0.6.0`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Version {
            major,
            minor,
            patch,
        }
    }

    /// Strict `MAJOR.MINOR.PATCH`; no `v` prefix, no pre-release or build tags.
    pub fn parse(s: &str) -> Option<Version> {
        let mut parts = s.trim().split('.');
        let major = parse_component(parts.next()?)?;
        let minor = parse_component(parts.next()?)?;
        let patch = parse_component(parts.next()?)?;
        if parts.next().is_some() {
            return None;
        }
        Some(Version {
            major,
            minor,
            patch,
        })
    }
}

fn parse_component(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if s.len() > 1 && s.starts_with('0') {
        return None;
    }
    s.parse().ok()
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone, Copy)]
struct Comparator {
    op: Op,
    version: Version,
}

impl Comparator {
    fn matches(&self, v: Version) -> bool {
        match self.op {
            Op::Eq => v == self.version,
            Op::Gt => v > self.version,
            Op::Gte => v >= self.version,
            Op::Lt => v < self.version,
            Op::Lte => v <= self.version,
        }
    }
}

/// A parsed range expression: alternatives are OR'd, comparators within one
/// alternative are AND'd. `*` matches every version.
#[derive(Debug, Clone)]
pub struct Range {
    alternatives: Vec<Vec<Comparator>>,
}

impl Range {
    pub fn parse(input: &str) -> Option<Range> {
        let mut alternatives = Vec::new();
        for alt in input.split("||") {
            let alt = alt.trim();
            if alt.is_empty() {
                return None;
            }
            let mut comparators = Vec::new();
            for token in alt.split_whitespace() {
                if token == "*" {
                    continue;
                }
                comparators.extend(parse_comparator(token)?);
            }
            alternatives.push(comparators);
        }
        if alternatives.is_empty() {
            return None;
        }
        Some(Range {
            alternatives,
        })
    }

    pub fn matches(&self, v: Version) -> bool {
        self.alternatives
            .iter()
            .any(|comparators| comparators.iter().all(|c| c.matches(v)))
    }
}

fn parse_comparator(token: &str) -> Option<Vec<Comparator>> {
    if let Some(rest) = token.strip_prefix(">=") {
        return Some(vec![Comparator {
            op: Op::Gte,
            version: Version::parse(rest)?,
        }]);
    }
    if let Some(rest) = token.strip_prefix("<=") {
        return Some(vec![Comparator {
            op: Op::Lte,
            version: Version::parse(rest)?,
        }]);
    }
    if let Some(rest) = token.strip_prefix('>') {
        return Some(vec![Comparator {
            op: Op::Gt,
            version: Version::parse(rest)?,
        }]);
    }
    if let Some(rest) = token.strip_prefix('<') {
        return Some(vec![Comparator {
            op: Op::Lt,
            version: Version::parse(rest)?,
        }]);
    }
    if let Some(rest) = token.strip_prefix('=') {
        return Some(vec![Comparator {
            op: Op::Eq,
            version: Version::parse(rest)?,
        }]);
    }
    if let Some(rest) = token.strip_prefix('^') {
        let v = Version::parse(rest)?;
        let upper = if v.major > 0 {
            Version::new(v.major + 1, 0, 0)
        } else if v.minor > 0 {
            Version::new(0, v.minor + 1, 0)
        } else {
            Version::new(0, 0, v.patch + 1)
        };
        return Some(vec![
            Comparator {
                op: Op::Gte,
                version: v,
            },
            Comparator {
                op: Op::Lt,
                version: upper,
            },
        ]);
    }
    if let Some(rest) = token.strip_prefix('~') {
        let v = Version::parse(rest)?;
        return Some(vec![
            Comparator {
                op: Op::Gte,
                version: v,
            },
            Comparator {
                op: Op::Lt,
                version: Version::new(v.major, v.minor + 1, 0),
            },
        ]);
    }
    Some(vec![Comparator {
        op: Op::Eq,
        version: Version::parse(token)?,
    }])
}
