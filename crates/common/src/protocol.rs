//! Request and response types for the public JSON API.
//!
//! Sensitive values appear here only as plaintext; ciphertext and blind
//! indexes never leave the service.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// Request body for `POST /users`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

/// Response body for any create.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedResponse {
    pub id: i64,
}

/// Request body for `PUT /users/:id`. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

/// Query string for `GET /users/lookup`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailQuery {
    pub email: String,
}

/// A decrypted user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    pub id: i64,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Goals
// ---------------------------------------------------------------------------

/// Request body for `PUT /users/:id/goal`.
///
/// A date that is absent is left unchanged; an explicit `null` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateGoalRequest {
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub start_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "present")]
    pub end_date: Option<Option<NaiveDate>>,
}

/// A decrypted goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalResponse {
    pub goal: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

/// Request body for `PUT /users/:id/journal`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntryRequest {
    pub local_date: NaiveDate,
    pub topics: String,
    pub alignment_rating: i32,
    pub contentment_rating: i32,
}

/// Response body for a journal upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalUpsertResponse {
    pub local_date: NaiveDate,
    /// `true` if an entry for this date already existed and was replaced.
    pub is_update: bool,
}

/// Query string for `GET /users/:id/journal`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JournalRangeQuery {
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

/// A decrypted journal entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntryResponse {
    pub local_date: NaiveDate,
    pub topics: String,
    pub alignment_rating: i32,
    pub contentment_rating: i32,
    pub karma: f32,
}

/// Response body for `GET /users/:id/journal`, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalListResponse {
    pub entries: Vec<JournalEntryResponse>,
    /// Entries left out because they could not be decrypted.
    pub skipped: usize,
}

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

/// Profile part of an import. Fields follow the same rules as their
/// standalone endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportProfile {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub goal: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub start_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "present")]
    pub end_date: Option<Option<NaiveDate>>,
}

/// Request body for `POST /users/:id/import`: journal history and profile
/// data written in one transaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportRequest {
    #[serde(default)]
    pub entries: Vec<JournalEntryRequest>,
    #[serde(default)]
    pub profile: Option<ImportProfile>,
}

/// Response body for an import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResponse {
    /// Journal entries inserted or replaced.
    pub entries: usize,
    pub profile_updated: bool,
}

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

/// Standard error response body returned on any non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short machine-readable error code (e.g. `"bad_request"`).
    pub code: String,
    /// Human-readable description safe to expose to callers.
    pub message: String,
}

impl ErrorResponse {
    /// Construct an [`ErrorResponse`] from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Response body for `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall service status: `"ok"` or `"degraded"`.
    pub status: String,
    /// Whether the database answered a ping.
    pub database: bool,
}

/// Distinguishes an explicit `null` from an absent field.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
