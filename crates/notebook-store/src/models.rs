//! Domain model structs persisted in the notebook database.
//!
//! Every struct derives `Serialize` / `Deserialize` so the HTTP layer can
//! hand them to clients as JSON without an intermediate DTO.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

// ---------------------------------------------------------------------------
// Note
// ---------------------------------------------------------------------------

/// A contact record.
///
/// Empty strings in `id`, `name`, `phone` and `mail` mean "unset"; missing
/// JSON keys deserialize to the empty string.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Note {
    /// Unique identifier. Generated on create when left empty.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub mail: String,
    #[serde(default, rename = "birthdate", skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    /// Key of an image blob. Not checked for existence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
}

impl Note {
    /// Check that every mandatory field is set.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("name", &self.name),
            ("phone", &self.phone),
            ("mail", &self.mail),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(field, _)| field)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Validation(format!(
                "missing mandatory field(s): {}",
                missing.join(", ")
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// NotePatch
// ---------------------------------------------------------------------------

/// A partial update for a [`Note`].
///
/// `None` leaves the stored value untouched. For `id`, `name`, `phone` and
/// `mail` an empty string counts as `None` too. For the optional attributes
/// any `Some` value replaces the stored one.
///
/// A non-empty `id` renames the record in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotePatch {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub mail: Option<String>,
    #[serde(default, rename = "birthdate")]
    pub birth_date: Option<String>,
    #[serde(default)]
    pub image_id: Option<String>,
}

impl NotePatch {
    /// The new id requested by this patch, if any.
    pub fn new_id(&self) -> Option<&str> {
        non_empty(&self.id)
    }

    /// `(column, value)` pairs for every field this patch provides, in
    /// schema order.
    pub(crate) fn assignments(&self) -> Vec<(&'static str, &str)> {
        let candidates = [
            ("id", non_empty(&self.id)),
            ("name", non_empty(&self.name)),
            ("company", self.company.as_deref()),
            ("phone", non_empty(&self.phone)),
            ("mail", non_empty(&self.mail)),
            ("birth_date", self.birth_date.as_deref()),
            ("image_id", self.image_id.as_deref()),
        ];

        candidates
            .into_iter()
            .filter_map(|(column, value)| value.map(|v| (column, v)))
            .collect()
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Page
// ---------------------------------------------------------------------------

/// Offset/limit window for listing notes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    /// Number of notes to skip.
    pub offset: u32,
    /// Maximum number of notes to return; `None` returns all of them.
    pub limit: Option<u32>,
}

impl Page {
    pub fn new(offset: u32, limit: Option<u32>) -> Self {
        Self { offset, limit }
    }

    /// Build a page from raw query-string values.
    ///
    /// Absent, negative or unparsable values silently fall back to the
    /// defaults (offset 0, no limit).
    pub fn parse(offset: Option<&str>, limit: Option<&str>) -> Self {
        Self {
            offset: offset.and_then(parse_count).unwrap_or(0),
            limit: limit.and_then(parse_count),
        }
    }
}

fn parse_count(raw: &str) -> Option<u32> {
    raw.trim().parse::<i64>().ok().and_then(|n| u32::try_from(n).ok())
}
