use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use parasel_core::error::{ParaselError, Result};

/// A `major[.minor[.patch]][-pre]` version.
///
/// Missing components count as zero, so `1.2` and `1.2.0` compare equal.
/// A pre-release sorts before its release; pre-release identifiers compare
/// numerically when both are numbers, otherwise as text, with numbers first.
#[derive(Debug, Clone)]
pub struct Version {
    major: u64,
    minor: u64,
    patch: u64,
    pre: Vec<PreId>,
    raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum PreId {
    Numeric(u64),
    Alpha(String),
}

impl Version {
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| ParaselError::InvalidVersion {
            version: input.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty version"));
        }
        let (core, pre) = match trimmed.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (trimmed, None),
        };

        let mut numbers = [0u64; 3];
        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() > 3 {
            return Err(invalid("more than three numeric components"));
        }
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid("components must be non-negative integers"));
            }
            *slot = part
                .parse()
                .map_err(|_| invalid("numeric component out of range"))?;
        }

        let pre = match pre {
            None => Vec::new(),
            Some(pre) => pre
                .split('.')
                .map(|id| {
                    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_alphanumeric()) {
                        return Err(invalid("pre-release identifiers must be alphanumeric"));
                    }
                    Ok(match id.parse::<u64>() {
                        Ok(n) => PreId::Numeric(n),
                        Err(_) => PreId::Alpha(id.to_string()),
                    })
                })
                .collect::<Result<Vec<_>>>()?,
        };

        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
            pre,
            raw: trimmed.to_string(),
        })
    }

    pub fn major(&self) -> u64 {
        self.major
    }

    pub fn minor(&self) -> u64 {
        self.minor
    }

    pub fn patch(&self) -> u64 {
        self.patch
    }

    pub fn is_prerelease(&self) -> bool {
        !self.pre.is_empty()
    }

    /// The version as it was written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (self.pre.is_empty(), other.pre.is_empty()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self.pre.cmp(&other.pre),
            })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Version {
    type Err = ParaselError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Which registered version of a task to use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum VersionSelector {
    /// Highest registered version.
    #[default]
    Latest,
    /// The version marked stable.
    Stable,
    Exact(Version),
}

impl FromStr for VersionSelector {
    type Err = ParaselError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" | "latest" => Ok(VersionSelector::Latest),
            "stable" => Ok(VersionSelector::Stable),
            other => Ok(VersionSelector::Exact(Version::parse(other)?)),
        }
    }
}

impl fmt::Display for VersionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSelector::Latest => f.write_str("latest"),
            VersionSelector::Stable => f.write_str("stable"),
            VersionSelector::Exact(v) => write!(f, "{}", v),
        }
    }
}
