use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::contracts::error::StoreError;

/// Maximum length of a group name in bytes (matches the key column width).
pub const MAX_GROUP_NAME_LEN: usize = 255;

/// Half-open range `[begin, end)` of identifiers assigned to a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdRange {
    pub begin: u64,
    pub end: u64,
}

impl IdRange {
    pub fn new(begin: u64, end: u64) -> Self {
        Self { begin, end }
    }

    /// Number of identifiers in the range. Zero for empty or inverted ranges.
    pub fn width(&self) -> u64 {
        self.end.saturating_sub(self.begin)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.begin
    }

    pub fn contains(&self, id: u64) -> bool {
        self.begin <= id && id < self.end
    }

    /// Returns true if both ranges share at least one identifier.
    pub fn overlaps(&self, other: &IdRange) -> bool {
        !self.is_empty() && !other.is_empty() && self.begin < other.end && other.begin < self.end
    }
}

impl fmt::Display for IdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.begin, self.end)
    }
}

/// Persisted segment state of one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub name: String,
    /// Starting value supplied at creation. Immutable.
    pub start: u64,
    /// Width added to the segment boundary on each advance. Immutable.
    pub step: u32,
    /// Number of successful advances.
    pub count: u64,
    pub range: IdRange,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

impl GroupInfo {
    /// Computes the segment that follows the current one.
    pub fn next_range(&self, formula: AdvanceFormula) -> Result<IdRange, StoreError> {
        formula.next(&self.name, self.range, self.step)
    }
}

/// How the next segment is derived from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdvanceFormula {
    /// `begin = end`, `end = end + step`. Segments are contiguous.
    #[default]
    Contiguous,
    /// `begin = begin + end`, `end = end + step`.
    ///
    /// Kept for groups whose rows were written by deployments using this
    /// arithmetic. Begin grows faster than end, so ranges eventually invert.
    Legacy,
}

impl AdvanceFormula {
    /// Applies the formula to `range`. Overflow of either bound is an error.
    pub fn next(self, group: &str, range: IdRange, step: u32) -> Result<IdRange, StoreError> {
        let overflow = |detail: String| StoreError::Overflow {
            group: group.to_string(),
            detail,
        };

        let end = range
            .end
            .checked_add(u64::from(step))
            .ok_or_else(|| overflow(format!("end {} + step {}", range.end, step)))?;

        let begin = match self {
            AdvanceFormula::Contiguous => range.end,
            AdvanceFormula::Legacy => range
                .begin
                .checked_add(range.end)
                .ok_or_else(|| overflow(format!("begin {} + end {}", range.begin, range.end)))?,
        };

        Ok(IdRange { begin, end })
    }
}

impl FromStr for AdvanceFormula {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "contiguous" => Ok(AdvanceFormula::Contiguous),
            "legacy" => Ok(AdvanceFormula::Legacy),
            other => Err(format!("unknown advance formula '{}'", other)),
        }
    }
}

impl fmt::Display for AdvanceFormula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdvanceFormula::Contiguous => f.write_str("contiguous"),
            AdvanceFormula::Legacy => f.write_str("legacy"),
        }
    }
}

/// Checks that `group` is usable as a row key.
///
/// Rejects empty names, names longer than [`MAX_GROUP_NAME_LEN`] bytes and
/// names containing control characters.
pub fn validate_group_name(group: &str) -> Result<(), StoreError> {
    if group.is_empty() {
        return Err(StoreError::InvalidInput(
            "The group name is empty".to_string(),
        ));
    }
    if group.len() > MAX_GROUP_NAME_LEN {
        return Err(StoreError::InvalidInput(format!(
            "The group name is {} bytes long (max {})",
            group.len(),
            MAX_GROUP_NAME_LEN
        )));
    }
    if group.chars().any(char::is_control) {
        return Err(StoreError::InvalidInput(format!(
            "The group name {:?} contains control characters",
            group
        )));
    }
    Ok(())
}
