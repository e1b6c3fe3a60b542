// Target Domain Model

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Target identifier (unique within an inventory)
pub type TargetId = String;

/// A managed machine as seen at resolution time.
///
/// Immutable snapshot: the resolver produces it, the dispatch owns it for
/// the lifetime of one fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub platform: Option<String>,
    pub managed: bool,
}

impl Target {
    pub fn new(id: impl Into<String>, managed: bool) -> Self {
        Self {
            id: id.into(),
            tags: BTreeMap::new(),
            platform: None,
            managed,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = Some(platform.into());
        self
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

/// Target selection predicate.
///
/// Leaves match on exact tag values, the managed flag or the platform name;
/// `And`/`Or`/`Not` compose them. An empty `And` matches everything, an
/// empty `Or` matches nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TargetFilter {
    #[default]
    All,
    Tag {
        key: String,
        value: String,
    },
    Managed {
        managed: bool,
    },
    Platform {
        name: String,
    },
    And {
        filters: Vec<TargetFilter>,
    },
    Or {
        filters: Vec<TargetFilter>,
    },
    Not {
        filter: Box<TargetFilter>,
    },
}

impl TargetFilter {
    pub fn tag(key: impl Into<String>, value: impl Into<String>) -> Self {
        TargetFilter::Tag {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn managed(managed: bool) -> Self {
        TargetFilter::Managed { managed }
    }

    pub fn platform(name: impl Into<String>) -> Self {
        TargetFilter::Platform { name: name.into() }
    }

    /// Conjunction; flattens nested `And`s and drops `All`
    pub fn and(self, other: TargetFilter) -> Self {
        let mut filters = match self {
            TargetFilter::All => return other,
            TargetFilter::And { filters } => filters,
            f => vec![f],
        };
        match other {
            TargetFilter::All => {}
            TargetFilter::And { filters: rest } => filters.extend(rest),
            f => filters.push(f),
        }
        TargetFilter::And { filters }
    }

    pub fn or(self, other: TargetFilter) -> Self {
        let mut filters = match self {
            TargetFilter::Or { filters } => filters,
            f => vec![f],
        };
        match other {
            TargetFilter::Or { filters: rest } => filters.extend(rest),
            f => filters.push(f),
        }
        TargetFilter::Or { filters }
    }

    pub fn negate(self) -> Self {
        TargetFilter::Not {
            filter: Box::new(self),
        }
    }

    /// Shorthand for `self AND managed=true`
    pub fn managed_only(self) -> Self {
        self.and(TargetFilter::managed(true))
    }

    /// Evaluate the predicate against a target
    pub fn matches(&self, target: &Target) -> bool {
        match self {
            TargetFilter::All => true,
            TargetFilter::Tag { key, value } => target.tag(key) == Some(value.as_str()),
            TargetFilter::Managed { managed } => target.managed == *managed,
            TargetFilter::Platform { name } => target.platform.as_deref() == Some(name.as_str()),
            TargetFilter::And { filters } => filters.iter().all(|f| f.matches(target)),
            TargetFilter::Or { filters } => filters.iter().any(|f| f.matches(target)),
            TargetFilter::Not { filter } => !filter.matches(target),
        }
    }
}

impl fmt::Display for TargetFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, filters: &[TargetFilter], sep: &str) -> fmt::Result {
            write!(f, "(")?;
            for (i, filter) in filters.iter().enumerate() {
                if i > 0 {
                    write!(f, " {} ", sep)?;
                }
                write!(f, "{}", filter)?;
            }
            write!(f, ")")
        }

        match self {
            TargetFilter::All => write!(f, "*"),
            TargetFilter::Tag { key, value } => write!(f, "{}={}", key, value),
            TargetFilter::Managed { managed } => write!(f, "managed={}", managed),
            TargetFilter::Platform { name } => write!(f, "platform={}", name),
            TargetFilter::And { filters } => join(f, filters, "AND"),
            TargetFilter::Or { filters } => join(f, filters, "OR"),
            TargetFilter::Not { filter } => write!(f, "NOT {}", filter),
        }
    }
}
