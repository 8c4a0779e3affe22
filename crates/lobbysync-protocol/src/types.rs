//! Identity types and lobby settings.
//!
//! Everything here travels on the wire, so every type derives serde and
//! keeps a stable JSON shape.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Identifier of a lobby, as issued by the lobby store.
///
/// The hub treats it as opaque: it is only compared and hashed, never
/// parsed. `#[serde(transparent)]` keeps it a plain JSON string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LobbyId(pub String);

impl LobbyId {
    /// Creates a lobby id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LobbyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one live connection to a lobby.
///
/// Allocated by the hub, unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

/// An authenticated user identity (the username the auth service vouched
/// for).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Creates a user id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// LobbySettings
// ---------------------------------------------------------------------------

/// Upper bound for both concept counts.
pub const MAX_CONCEPTS: i64 = 100;

/// The analysis settings a lobby creator can tune.
///
/// Field names are camelCase on the wire because that is what the
/// lobby store and the browser clients already use.
///
/// Concept counts are signed so that a negative value reaches
/// [`validate`](Self::validate) and is reported as a validation failure
/// instead of a decode failure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbySettings {
    /// How many concepts to extract per student.
    pub num_concepts_student: i64,
    /// How many concepts to extract for the whole class.
    pub num_concepts_class: i64,
    /// Similarity above which a concept counts as updated.
    pub similarity_threshold_update: f64,
    /// Similarity above which two concepts are merged during analysis.
    pub similarity_threshold_analyze: f64,
}

impl Default for LobbySettings {
    fn default() -> Self {
        Self {
            num_concepts_student: 10,
            num_concepts_class: 15,
            similarity_threshold_update: 0.75,
            similarity_threshold_analyze: 0.8,
        }
    }
}

impl LobbySettings {
    /// Checks every field against its allowed range.
    ///
    /// Returns a human-readable reason for the first field that is out
    /// of range.
    pub fn validate(&self) -> Result<(), String> {
        check_count("numConceptsStudent", self.num_concepts_student)?;
        check_count("numConceptsClass", self.num_concepts_class)?;
        check_threshold(
            "similarityThresholdUpdate",
            self.similarity_threshold_update,
        )?;
        check_threshold(
            "similarityThresholdAnalyze",
            self.similarity_threshold_analyze,
        )?;
        Ok(())
    }
}

fn check_count(field: &str, value: i64) -> Result<(), String> {
    if (1..=MAX_CONCEPTS).contains(&value) {
        Ok(())
    } else {
        Err(format!("{field} must be between 1 and {MAX_CONCEPTS}, got {value}"))
    }
}

fn check_threshold(field: &str, value: f64) -> Result<(), String> {
    // `contains` is false for NaN, so non-finite values are rejected too.
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(format!("{field} must be between 0 and 1, got {value}"))
    }
}
