//! Static policy table: entity kind → field → treatment.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// How a field is stored at rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Treatment {
    /// Stored as-is.
    Plain,
    /// Stored as ciphertext only.
    EncryptOnly,
    /// Stored as ciphertext, with a sibling blind-index column written in the
    /// same statement.
    EncryptAndIndex {
        /// Column holding the blind index.
        index_field: &'static str,
    },
}

impl Treatment {
    /// Returns `true` for treatments that store ciphertext.
    pub fn is_sensitive(self) -> bool {
        !matches!(self, Treatment::Plain)
    }
}

/// Canonical form a plaintext is brought into before it is sealed or
/// indexed, so equal values written by different paths share an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalize {
    /// Stored exactly as given.
    Verbatim,
    /// Trimmed and lower-cased.
    Email,
}

impl Normalize {
    pub fn apply(self, value: &str) -> Cow<'_, str> {
        match self {
            Normalize::Verbatim => Cow::Borrowed(value),
            Normalize::Email => {
                let trimmed = value.trim();
                if trimmed.len() == value.len() && !trimmed.chars().any(char::is_uppercase) {
                    Cow::Borrowed(value)
                } else {
                    Cow::Owned(trimmed.to_lowercase())
                }
            }
        }
    }
}

/// One row of the policy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldPolicy {
    /// Column / field name.
    pub field: &'static str,
    /// Storage treatment.
    pub treatment: Treatment,
    /// Applied to the plaintext on every seal and lookup.
    pub normalize: Normalize,
}

const USER_POLICY: &[FieldPolicy] = &[
    FieldPolicy {
        field: "email",
        treatment: Treatment::EncryptAndIndex {
            index_field: "email_blind_index",
        },
        normalize: Normalize::Email,
    },
    FieldPolicy {
        field: "first_name",
        treatment: Treatment::Plain,
        normalize: Normalize::Verbatim,
    },
    FieldPolicy {
        field: "last_name",
        treatment: Treatment::Plain,
        normalize: Normalize::Verbatim,
    },
];

const GOAL_POLICY: &[FieldPolicy] = &[
    FieldPolicy {
        field: "goal",
        treatment: Treatment::EncryptOnly,
        normalize: Normalize::Verbatim,
    },
    FieldPolicy {
        field: "start_date",
        treatment: Treatment::Plain,
        normalize: Normalize::Verbatim,
    },
    FieldPolicy {
        field: "end_date",
        treatment: Treatment::Plain,
        normalize: Normalize::Verbatim,
    },
];

const JOURNAL_ENTRY_POLICY: &[FieldPolicy] = &[
    FieldPolicy {
        field: "topics",
        treatment: Treatment::EncryptOnly,
        normalize: Normalize::Verbatim,
    },
    FieldPolicy {
        field: "local_date",
        treatment: Treatment::Plain,
        normalize: Normalize::Verbatim,
    },
    FieldPolicy {
        field: "alignment_rating",
        treatment: Treatment::Plain,
        normalize: Normalize::Verbatim,
    },
    FieldPolicy {
        field: "contentment_rating",
        treatment: Treatment::Plain,
        normalize: Normalize::Verbatim,
    },
];

/// Kinds of entity that carry sensitive fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A row of `users`.
    User,
    /// A row of `goals`.
    Goal,
    /// A row of `journal_entries`.
    JournalEntry,
}

impl EntityKind {
    /// All kinds, in backfill order.
    pub const ALL: [EntityKind; 3] = [EntityKind::User, EntityKind::Goal, EntityKind::JournalEntry];

    /// The full policy table for this kind.
    pub fn policy(self) -> &'static [FieldPolicy] {
        match self {
            EntityKind::User => USER_POLICY,
            EntityKind::Goal => GOAL_POLICY,
            EntityKind::JournalEntry => JOURNAL_ENTRY_POLICY,
        }
    }

    /// Backing table name.
    pub fn table(self) -> &'static str {
        match self {
            EntityKind::User => "users",
            EntityKind::Goal => "goals",
            EntityKind::JournalEntry => "journal_entries",
        }
    }

    /// Policy rows that store ciphertext.
    pub fn sensitive_fields(self) -> impl Iterator<Item = &'static FieldPolicy> {
        self.policy().iter().filter(|p| p.treatment.is_sensitive())
    }

    /// `(field, index_field)` pairs for every indexed field.
    pub fn indexed_fields(self) -> impl Iterator<Item = (&'static str, &'static str)> {
        self.policy().iter().filter_map(|p| match p.treatment {
            Treatment::EncryptAndIndex { index_field } => Some((p.field, index_field)),
            _ => None,
        })
    }

    /// Look up a single field's policy.
    pub fn field(self, name: &str) -> Option<&'static FieldPolicy> {
        self.policy().iter().find(|p| p.field == name)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_the_only_indexed_field() {
        let indexed: Vec<_> = EntityKind::ALL
            .iter()
            .flat_map(|k| k.indexed_fields())
            .collect();
        assert_eq!(indexed, vec![("email", "email_blind_index")]);
    }

    #[test]
    fn sensitive_fields_per_kind() {
        let names = |k: EntityKind| k.sensitive_fields().map(|p| p.field).collect::<Vec<_>>();
        assert_eq!(names(EntityKind::User), vec!["email"]);
        assert_eq!(names(EntityKind::Goal), vec!["goal"]);
        assert_eq!(names(EntityKind::JournalEntry), vec!["topics"]);
    }

    #[test]
    fn plain_fields_are_not_sensitive() {
        let first_name = EntityKind::User.field("first_name").unwrap();
        assert!(!first_name.treatment.is_sensitive());
        assert!(EntityKind::User.field("password_hash").is_none());
    }

    #[test]
    fn email_is_trimmed_and_lowercased() {
        let email = EntityKind::User.field("email").unwrap();
        assert_eq!(email.normalize.apply("  Bob@X.com "), "bob@x.com");
        assert!(matches!(email.normalize.apply("bob@x.com"), Cow::Borrowed(_)));

        let topics = EntityKind::JournalEntry.field("topics").unwrap();
        assert_eq!(topics.normalize.apply(" Work "), " Work ");
    }

    #[test]
    fn display_is_table_name() {
        assert_eq!(EntityKind::JournalEntry.to_string(), "journal_entries");
    }
}
