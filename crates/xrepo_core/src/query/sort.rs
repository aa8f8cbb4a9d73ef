//! Runtime sort specifications such as `"Name desc,Number asc"`.
//!
//! # Responsibility
//! - Parse a comma-separated order string into ordered `SortField`s.
//!
//! # Invariants
//! - Field order from the input is preserved; index 0 is the primary key.
//! - Parsing never fails. Unknown or empty names are rejected later, when
//!   the sort is resolved against an entity type.
//! - A segment ending in ` desc` (any case) is descending. Otherwise every
//!   ` asc` occurrence (any case) is removed from the segment, not only a
//!   trailing one, and the field is ascending.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

static DESC_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i) desc$").expect("valid desc suffix regex"));
static ASC_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i) asc").expect("valid asc marker regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

impl Display for SortDirection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ascending => write!(f, "asc"),
            Self::Descending => write!(f, "desc"),
        }
    }
}

/// One parsed `name direction` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    pub name: String,
    pub direction: SortDirection,
}

impl SortField {
    pub fn new(name: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            name: name.into(),
            direction,
        }
    }

    pub fn asc(name: impl Into<String>) -> Self {
        Self::new(name, SortDirection::Ascending)
    }

    pub fn desc(name: impl Into<String>) -> Self {
        Self::new(name, SortDirection::Descending)
    }
}

/// Ordered multi-key sort specification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    fields: Vec<SortField>,
}

impl SortSpec {
    /// Parses a comma-separated order string.
    ///
    /// Empty or whitespace-only input yields an empty spec, which applies no
    /// ordering.
    pub fn parse(spec: &str) -> Self {
        if spec.trim().is_empty() {
            return Self::default();
        }

        let fields = spec.split(',').map(parse_segment).collect();
        Self { fields }
    }

    pub fn fields(&self) -> &[SortField] {
        &self.fields
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }
}

impl From<Vec<SortField>> for SortSpec {
    fn from(fields: Vec<SortField>) -> Self {
        Self { fields }
    }
}

impl Display for SortSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (index, field) in self.fields.iter().enumerate() {
            if index > 0 {
                write!(f, ",")?;
            }
            write!(f, "{} {}", field.name, field.direction)?;
        }
        Ok(())
    }
}

fn parse_segment(segment: &str) -> SortField {
    let current = segment.trim();
    if DESC_SUFFIX_RE.is_match(current) {
        let name = DESC_SUFFIX_RE.replace(current, "");
        return SortField::desc(name.trim());
    }

    let name = ASC_MARKER_RE.replace_all(current, "");
    SortField::asc(name.trim())
}
