//! Workout records and media references

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single logged workout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkoutRecord {
    /// Stable identity, unique within a collection
    pub id: String,
    /// Display name
    pub name: String,
    /// Creation time (epoch ms)
    pub date_created: i64,
    /// Last modification time (epoch ms)
    pub date_modified: i64,
    /// When the workout was performed (epoch ms)
    pub date_performed: i64,
    /// Free-form quantity, e.g. weight or reps
    pub quantity: String,
    /// Free-form duration
    pub duration: String,
    /// Heart rate in beats per minute
    pub heart_rate: i64,
    /// Workout category
    pub workout_type: String,
    /// Notes
    pub notes: String,
    /// Local handle, Pod-relative path or absolute URL of an attached image
    pub media_uri: String,
}

impl WorkoutRecord {
    /// Create a record with a fresh UUID identity and the given timestamps
    pub fn new(name: impl Into<String>, now_ms: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            date_created: now_ms,
            date_modified: now_ms,
            date_performed: now_ms,
            quantity: String::new(),
            duration: String::new(),
            heart_rate: 0,
            workout_type: String::new(),
            notes: String::new(),
            media_uri: String::new(),
        }
    }

    /// Classification of the attached media reference
    pub fn media(&self) -> MediaReference<'_> {
        MediaReference::classify(&self.media_uri)
    }
}

/// Where a record's media currently lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaReference<'a> {
    /// No media attached
    Blank,
    /// Absolute `http(s)` URL
    Remote(&'a str),
    /// Path under the user's storage root
    PodRelative(&'a str),
    /// Platform handle (`content:` or `file:`) not yet uploaded
    LocalHandle(&'a str),
}

impl<'a> MediaReference<'a> {
    /// Classify a raw media reference
    pub fn classify(raw: &'a str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return MediaReference::Blank;
        }

        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            MediaReference::Remote(trimmed)
        } else if lower.starts_with("content:") || lower.starts_with("file:") {
            MediaReference::LocalHandle(trimmed)
        } else {
            MediaReference::PodRelative(trimmed)
        }
    }

    /// Whether the reference still needs uploading
    pub fn is_local(&self) -> bool {
        matches!(self, MediaReference::LocalHandle(_))
    }
}

/// Sort newest first, for display
pub fn sort_for_display(records: &mut [WorkoutRecord]) {
    records.sort_by(|a, b| b.date_created.cmp(&a.date_created));
}
