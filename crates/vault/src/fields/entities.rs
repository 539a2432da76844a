//! Entities that carry sensitive fields, and their explicit update structs.

use chrono::{DateTime, NaiveDate, Utc};

use super::policy::EntityKind;

/// An entity whose sensitive fields are addressed through the policy table.
///
/// Implementations map policy field names onto struct fields by hand; there
/// is no reflection.
pub trait SensitiveEntity {
    /// Which policy table applies.
    fn kind(&self) -> EntityKind;

    /// Primary key, used in logs and failure reports.
    fn id(&self) -> i64;

    /// Mutable access to a sensitive field. `None` if this entity has no such field.
    fn sensitive_mut(&mut self, field: &str) -> Option<&mut String>;

    /// Mutable access to a blind-index column. `None` if this entity has no such column.
    fn index_mut(&mut self, index_field: &str) -> Option<&mut Option<String>>;
}

/// A row of `users`.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    /// Ciphertext at rest, plaintext after decryption.
    pub email: String,
    pub email_blind_index: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SensitiveEntity for User {
    fn kind(&self) -> EntityKind {
        EntityKind::User
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn sensitive_mut(&mut self, field: &str) -> Option<&mut String> {
        match field {
            "email" => Some(&mut self.email),
            _ => None,
        }
    }

    fn index_mut(&mut self, index_field: &str) -> Option<&mut Option<String>> {
        match index_field {
            "email_blind_index" => Some(&mut self.email_blind_index),
            _ => None,
        }
    }
}

/// A row of `goals` (at most one per user).
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Goal {
    pub id: i64,
    pub user_id: i64,
    /// Ciphertext at rest, plaintext after decryption.
    pub goal: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl SensitiveEntity for Goal {
    fn kind(&self) -> EntityKind {
        EntityKind::Goal
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn sensitive_mut(&mut self, field: &str) -> Option<&mut String> {
        match field {
            "goal" => Some(&mut self.goal),
            _ => None,
        }
    }

    fn index_mut(&mut self, _index_field: &str) -> Option<&mut Option<String>> {
        None
    }
}

/// A row of `journal_entries` (at most one per user and local date).
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct JournalEntry {
    pub id: i64,
    pub user_id: i64,
    pub local_date: NaiveDate,
    /// Ciphertext at rest, plaintext after decryption.
    pub topics: String,
    pub alignment_rating: i32,
    pub contentment_rating: i32,
    pub karma: f32,
}

impl JournalEntry {
    /// Normalised day score in `0.0..=1.0` from two 1..=10 ratings.
    pub fn karma_for(alignment_rating: i32, contentment_rating: i32) -> f32 {
        (alignment_rating + contentment_rating - 2) as f32 / 18.0
    }
}

impl SensitiveEntity for JournalEntry {
    fn kind(&self) -> EntityKind {
        EntityKind::JournalEntry
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn sensitive_mut(&mut self, field: &str) -> Option<&mut String> {
        match field {
            "topics" => Some(&mut self.topics),
            _ => None,
        }
    }

    fn index_mut(&mut self, _index_field: &str) -> Option<&mut Option<String>> {
        None
    }
}

/// Partial update of a user. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl UserUpdate {
    /// Returns `true` if no field is set.
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.first_name.is_none() && self.last_name.is_none()
    }
}

/// Partial update of a goal. `Some(None)` on a date clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoalUpdate {
    pub goal: Option<String>,
    pub start_date: Option<Option<NaiveDate>>,
    pub end_date: Option<Option<NaiveDate>>,
}

impl GoalUpdate {
    /// Returns `true` if no field is set.
    pub fn is_empty(&self) -> bool {
        self.goal.is_none() && self.start_date.is_none() && self.end_date.is_none()
    }
}

/// Ciphertext for an indexed field plus its blind index, always written together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedCiphertext {
    pub ciphertext: String,
    /// `None` when the plaintext was empty.
    pub blind_index: Option<String>,
}

/// A [`UserUpdate`] with its sensitive fields sealed, ready to persist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SealedUserUpdate {
    pub email: Option<IndexedCiphertext>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// A [`GoalUpdate`] with its sensitive fields sealed, ready to persist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SealedGoalUpdate {
    pub goal: Option<String>,
    pub start_date: Option<Option<NaiveDate>>,
    pub end_date: Option<Option<NaiveDate>>,
}
