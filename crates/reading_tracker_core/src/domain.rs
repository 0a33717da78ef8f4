//! crates/reading_tracker_core/src/domain.rs
//!
//! Defines the core data structures for the reading tracker.
//! Records are stored as camelCase documents, so the serde attributes here
//! describe the document shape shared by the remote store, the local cache
//! and the legacy storage.

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Stars given to books that were never rated.
pub const DEFAULT_RATING: u8 = 5;

/// Spine color given to books that never picked one.
pub const DEFAULT_SPINE_COLOR: &str = "charcoal";

/// Palette of spine color tokens offered by the book form.
pub const SPINE_COLORS: [&str; 10] = [
    "charcoal", "burgundy", "navy", "forest", "violet", "ochre", "teal", "plum", "ink", "amber",
];

/// Title snapshot used when a session is logged against a book that is no longer published.
pub const FALLBACK_BOOK_TITLE: &str = "Book";

//=========================================================================================
// Identity and Collections
//=========================================================================================

/// The identity produced by the authentication provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserIdentity {
    pub user_id: String,
    pub display_name: Option<String>,
}

/// The two per-user document collections kept in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionKind {
    Books,
    Sessions,
}

impl CollectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionKind::Books => "books",
            CollectionKind::Sessions => "sessions",
        }
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//=========================================================================================
// Records
//=========================================================================================

/// A book on the user's shelf.
///
/// Decoding is lenient: stored documents come from every client version that
/// ever wrote them, and a field in an unexpected shape falls back to its
/// default instead of hiding the whole record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    #[serde(deserialize_with = "id_text")]
    pub id: String,
    #[serde(default, deserialize_with = "text_or_default")]
    pub title: String,
    #[serde(default, deserialize_with = "text_or_default")]
    pub author: String,
    #[serde(default, deserialize_with = "text_or_default")]
    pub genre: String,
    #[serde(default = "default_rating", deserialize_with = "rating_or_default")]
    pub rating: u8,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "non_blank_text")]
    pub cover_url: Option<String>,
    #[serde(default, deserialize_with = "flag_or_default")]
    pub is_favorite: bool,
    #[serde(default = "default_spine_color", deserialize_with = "spine_color_or_default")]
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "positive_count")]
    pub page_count: Option<u32>,
    #[serde(default, deserialize_with = "order_or_default")]
    pub order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "date_or_none")]
    pub date_added: Option<NaiveDate>,
}

/// A single logged reading session.
///
/// Sessions keep a snapshot of the book title taken when they were logged, so
/// later edits or deletes of the book never rewrite the reading history.
/// Only `id` and `date` are required; a duration that is blank or not a number
/// reads as zero minutes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingSession {
    #[serde(deserialize_with = "id_text")]
    pub id: String,
    #[serde(default, deserialize_with = "text_or_default")]
    pub book_id: String,
    #[serde(default, deserialize_with = "text_or_default")]
    pub book_title: String,
    pub date: NaiveDate,
    #[serde(rename = "duration", default, deserialize_with = "minutes_or_zero")]
    pub duration_minutes: u32,
    #[serde(default, deserialize_with = "text_or_default")]
    pub note: String,
    #[serde(
        rename = "timestamp",
        default,
        serialize_with = "chrono::serde::ts_milliseconds::serialize",
        deserialize_with = "millis_or_epoch"
    )]
    pub created_at: DateTime<Utc>,
}

/// Streak state derived from the set of session dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreakStatus {
    /// No streak, or the streak has lapsed.
    #[default]
    None,
    /// The user has read today.
    Active,
    /// The user read yesterday but not yet today.
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Streak {
    pub status: StreakStatus,
    pub count: u32,
}

impl Streak {
    pub const NONE: Streak = Streak {
        status: StreakStatus::None,
        count: 0,
    };
}

//=========================================================================================
// Mutation Inputs
//=========================================================================================

/// The fields of the book form.
///
/// Every field is optional. Creating a book fills what was left out with the
/// defaults; updating a book only touches the fields that were sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_favorite: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
}

impl BookDraft {
    /// A draft carrying only a title.
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// True when the draft would change nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Fills the fields the user left blank from a metadata lookup result.
    pub fn enrich_from(&mut self, suggestion: &BookSuggestion) {
        if self.cover_url.is_none() {
            self.cover_url = suggestion.cover_url.clone();
        }
        if is_blank(&self.author) {
            if let Some(author) = &suggestion.author {
                self.author = Some(author.clone());
            }
        }
        if is_blank(&self.genre) {
            if let Some(genre) = &suggestion.genre {
                self.genre = Some(genre.clone());
            }
        }
        if self.page_count.is_none() {
            self.page_count = suggestion.page_count;
        }
    }
}

fn is_blank(field: &Option<String>) -> bool {
    field.as_deref().map_or(true, |text| text.trim().is_empty())
}

/// The fields of the session form. The duration is kept as typed so it can be
/// validated at the gateway.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDraft {
    #[serde(default)]
    pub book_id: Option<String>,
    pub duration: String,
    #[serde(default)]
    pub note: String,
}

/// Login credentials handed to the authentication provider.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// A candidate returned by the book metadata lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookSuggestion {
    pub id: String,
    pub title: String,
    pub author: Option<String>,
    pub cover_url: Option<String>,
    pub genre: Option<String>,
    pub page_count: Option<u32>,
}

//=========================================================================================
// Serde Helpers
//=========================================================================================

fn default_rating() -> u8 {
    DEFAULT_RATING
}

fn default_spine_color() -> String {
    DEFAULT_SPINE_COLOR.to_string()
}

/// A scalar in whatever shape an older client stored it.
#[derive(Deserialize)]
#[serde(untagged)]
enum Loose {
    Flag(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Other(IgnoredAny),
}

impl Loose {
    fn number(&self) -> Option<f64> {
        let number = match self {
            Loose::Int(n) => *n as f64,
            Loose::Float(f) => *f,
            Loose::Text(text) => text.trim().parse::<f64>().ok()?,
            Loose::Flag(_) | Loose::Other(_) => return None,
        };
        number.is_finite().then_some(number)
    }

    fn text(self) -> Option<String> {
        match self {
            Loose::Text(text) => Some(text),
            Loose::Int(n) => Some(n.to_string()),
            Loose::Float(f) => Some(f.to_string()),
            Loose::Flag(_) | Loose::Other(_) => None,
        }
    }
}

fn id_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Loose::deserialize(deserializer)?
        .text()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| serde::de::Error::custom("record id must be a string or a number"))
}

fn text_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Loose::deserialize(deserializer)?.text().unwrap_or_default())
}

fn non_blank_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Loose::deserialize(deserializer)?
        .text()
        .filter(|text| !text.trim().is_empty()))
}

fn spine_color_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(non_blank_text(deserializer)?.unwrap_or_else(default_spine_color))
}

fn flag_or_default<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Loose::deserialize(deserializer)? {
        Loose::Flag(flag) => flag,
        Loose::Int(n) => n != 0,
        Loose::Text(text) => text.trim() == "true",
        Loose::Float(_) | Loose::Other(_) => false,
    })
}

/// Stars are whole numbers from 1 to 5; anything unreadable shows all five.
fn rating_or_default<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Loose::deserialize(deserializer)?
        .number()
        .map(|n| n.round().clamp(1.0, 5.0) as u8)
        .unwrap_or_else(default_rating))
}

fn order_or_default<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Loose::deserialize(deserializer)? {
        Loose::Int(n) => n,
        other => other.number().map(|n| n.round() as i64).unwrap_or_default(),
    })
}

fn positive_count<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Loose::deserialize(deserializer)?
        .number()
        .map(f64::round)
        .filter(|n| *n >= 1.0)
        .map(|n| n.min(u32::MAX as f64) as u32))
}

fn date_or_none<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Loose::deserialize(deserializer)?
        .text()
        .and_then(|text| NaiveDate::parse_from_str(text.get(..10).unwrap_or(&text), "%Y-%m-%d").ok()))
}

/// Older clients stored the duration as whatever the text field held.
fn minutes_or_zero<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Loose::deserialize(deserializer)?
        .number()
        .filter(|n| *n >= 0.0)
        .map(|n| n.round().min(u32::MAX as f64) as u32)
        .unwrap_or_default())
}

fn millis_or_epoch<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Loose::deserialize(deserializer)?
        .number()
        .and_then(|ms| DateTime::from_timestamp_millis(ms as i64))
        .unwrap_or_default())
}

/// Parses a duration typed by the user into whole minutes.
///
/// Returns `None` for blank, non-numeric, or zero input.
pub fn parse_minutes(text: &str) -> Option<u32> {
    let trimmed = text.trim();
    if let Ok(minutes) = trimmed.parse::<u32>() {
        return (minutes > 0).then_some(minutes);
    }
    let minutes = trimmed.parse::<f64>().ok()?;
    if minutes.is_finite() && minutes >= 0.5 && minutes <= u32::MAX as f64 {
        Some(minutes.round() as u32)
    } else {
        None
    }
}
