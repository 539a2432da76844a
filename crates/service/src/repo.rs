//! Persistence for users, goals, and journal entries.
//!
//! The repository only ever sees sealed values: callers encrypt before
//! writing and decrypt after reading. Lookups by email go through the blind
//! index.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{PgExecutor, PgPool};
use thiserror::Error;
use vault::fields::{Goal, JournalEntry, SealedGoalUpdate, SealedUserUpdate, User};

#[cfg(test)]
use mockall::automock;

/// Errors from the repository.
#[derive(Debug, Error)]
pub enum RepoError {
    /// A unique constraint rejected the write.
    #[error("a row with this value already exists")]
    Conflict,

    /// The referenced user does not exist.
    #[error("referenced row does not exist")]
    MissingParent,

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl From<sqlx::Error> for RepoError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                return RepoError::Conflict;
            }
            if db.is_foreign_key_violation() {
                return RepoError::MissingParent;
            }
        }
        RepoError::Database(e)
    }
}

/// Everything one import writes. Values are already sealed and validated.
#[derive(Debug, Clone, Default)]
pub struct ImportBatch {
    pub profile: Option<SealedUserUpdate>,
    pub goal: Option<SealedGoalUpdate>,
    pub entries: Vec<JournalEntry>,
}

/// Storage operations used by the HTTP handlers.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Repository: Send + Sync {
    /// Round-trip to the database.
    async fn ping(&self) -> Result<(), RepoError>;

    /// Insert a sealed user, returning its id.
    async fn insert_user(&self, user: &User) -> Result<i64, RepoError>;

    async fn find_user(&self, id: i64) -> Result<Option<User>, RepoError>;

    async fn find_user_by_email_index(&self, index: &str) -> Result<Option<User>, RepoError>;

    /// Apply a sealed partial update. `false` if the user does not exist.
    async fn update_user(&self, id: i64, update: &SealedUserUpdate) -> Result<bool, RepoError>;

    async fn find_goal(&self, user_id: i64) -> Result<Option<Goal>, RepoError>;

    /// Insert or partially update the user's single goal.
    async fn upsert_goal(&self, user_id: i64, update: &SealedGoalUpdate) -> Result<(), RepoError>;

    /// Insert or replace the entry for `(user_id, local_date)`. Returns `true`
    /// if an entry was replaced.
    async fn upsert_journal_entry(&self, entry: &JournalEntry) -> Result<bool, RepoError>;

    /// Entries within the optional date range, newest first.
    async fn list_journal_entries(
        &self,
        user_id: i64,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        limit: i64,
    ) -> Result<Vec<JournalEntry>, RepoError>;

    /// `false` if no entry existed for that date.
    async fn delete_journal_entry(&self, user_id: i64, local_date: NaiveDate) -> Result<bool, RepoError>;

    /// Apply a whole [`ImportBatch`] in one transaction. Nothing is written
    /// unless every statement succeeds.
    async fn import(&self, user_id: i64, batch: &ImportBatch) -> Result<(), RepoError>;
}

const USER_COLUMNS: &str =
    "id::BIGINT AS id, email, email_blind_index, first_name, last_name, created_at";
const GOAL_COLUMNS: &str =
    "id::BIGINT AS id, user_id::BIGINT AS user_id, goal, start_date, end_date";
const JOURNAL_COLUMNS: &str = "id::BIGINT AS id, user_id::BIGINT AS user_id, local_date, topics, \
     alignment_rating, contentment_rating, karma";

/// [`Repository`] over a PostgreSQL pool.
#[derive(Clone, Debug)]
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn ping(&self) -> Result<(), RepoError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_user(&self, user: &User) -> Result<i64, RepoError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO users (email, email_blind_index, first_name, last_name) \
             VALUES ($1, $2, $3, $4) RETURNING id::BIGINT",
        )
        .bind(&user.email)
        .bind(&user.email_blind_index)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn find_user(&self, id: i64) -> Result<Option<User>, RepoError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn find_user_by_email_index(&self, index: &str) -> Result<Option<User>, RepoError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email_blind_index = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(index)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn update_user(&self, id: i64, update: &SealedUserUpdate) -> Result<bool, RepoError> {
        Ok(write_user_update(&self.pool, id, update).await?)
    }

    async fn find_goal(&self, user_id: i64) -> Result<Option<Goal>, RepoError> {
        let sql = format!("SELECT {GOAL_COLUMNS} FROM goals WHERE user_id = $1");
        let goal = sqlx::query_as::<_, Goal>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(goal)
    }

    async fn upsert_goal(&self, user_id: i64, update: &SealedGoalUpdate) -> Result<(), RepoError> {
        Ok(write_goal(&self.pool, user_id, update).await?)
    }

    async fn upsert_journal_entry(&self, entry: &JournalEntry) -> Result<bool, RepoError> {
        Ok(write_journal_entry(&self.pool, entry).await?)
    }

    async fn list_journal_entries(
        &self,
        user_id: i64,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        limit: i64,
    ) -> Result<Vec<JournalEntry>, RepoError> {
        let sql = format!(
            "SELECT {JOURNAL_COLUMNS} FROM journal_entries \
             WHERE user_id = $1 \
               AND ($2::DATE IS NULL OR local_date >= $2) \
               AND ($3::DATE IS NULL OR local_date <= $3) \
             ORDER BY local_date DESC LIMIT $4"
        );
        let entries = sqlx::query_as::<_, JournalEntry>(&sql)
            .bind(user_id)
            .bind(start)
            .bind(end)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(entries)
    }

    async fn delete_journal_entry(&self, user_id: i64, local_date: NaiveDate) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM journal_entries WHERE user_id = $1 AND local_date = $2")
            .bind(user_id)
            .bind(local_date)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn import(&self, user_id: i64, batch: &ImportBatch) -> Result<(), RepoError> {
        // Dropping the transaction on an early return rolls it back.
        let mut tx = self.pool.begin().await?;
        if let Some(profile) = &batch.profile {
            if !write_user_update(&mut *tx, user_id, profile).await? {
                return Err(RepoError::MissingParent);
            }
        }
        if let Some(goal) = &batch.goal {
            write_goal(&mut *tx, user_id, goal).await?;
        }
        for entry in &batch.entries {
            write_journal_entry(&mut *tx, entry).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

async fn write_user_update(
    conn: impl PgExecutor<'_>,
    id: i64,
    update: &SealedUserUpdate,
) -> Result<bool, sqlx::Error> {
    let (email, index) = match &update.email {
        Some(sealed) => (Some(sealed.ciphertext.as_str()), sealed.blind_index.as_deref()),
        None => (None, None),
    };
    // The index is rewritten whenever the email is, so the pair never diverges.
    let result = sqlx::query(
        "UPDATE users SET \
            email = COALESCE($2::TEXT, email), \
            email_blind_index = CASE WHEN $2::TEXT IS NULL THEN email_blind_index ELSE $3::TEXT END, \
            first_name = COALESCE($4::TEXT, first_name), \
            last_name = COALESCE($5::TEXT, last_name) \
         WHERE id = $1",
    )
    .bind(id)
    .bind(email)
    .bind(index)
    .bind(&update.first_name)
    .bind(&update.last_name)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

async fn write_goal(
    conn: impl PgExecutor<'_>,
    user_id: i64,
    update: &SealedGoalUpdate,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO goals (user_id, goal, start_date, end_date) \
         VALUES ($1, $2::TEXT, $3::DATE, $4::DATE) \
         ON CONFLICT (user_id) DO UPDATE SET \
            goal = COALESCE($2::TEXT, goals.goal), \
            start_date = CASE WHEN $5 THEN EXCLUDED.start_date ELSE goals.start_date END, \
            end_date = CASE WHEN $6 THEN EXCLUDED.end_date ELSE goals.end_date END, \
            updated_at = NOW()",
    )
    .bind(user_id)
    .bind(&update.goal)
    .bind(update.start_date.flatten())
    .bind(update.end_date.flatten())
    .bind(update.start_date.is_some())
    .bind(update.end_date.is_some())
    .execute(conn)
    .await?;
    Ok(())
}

/// Returns `true` if an existing entry was replaced.
async fn write_journal_entry(conn: impl PgExecutor<'_>, entry: &JournalEntry) -> Result<bool, sqlx::Error> {
    let inserted = sqlx::query_scalar::<_, bool>(
        "INSERT INTO journal_entries \
            (user_id, local_date, topics, alignment_rating, contentment_rating, karma) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (user_id, local_date) DO UPDATE SET \
            topics = EXCLUDED.topics, \
            alignment_rating = EXCLUDED.alignment_rating, \
            contentment_rating = EXCLUDED.contentment_rating, \
            karma = EXCLUDED.karma, \
            updated_at = NOW() \
         RETURNING (xmax = 0)",
    )
    .bind(entry.user_id)
    .bind(entry.local_date)
    .bind(&entry.topics)
    .bind(entry.alignment_rating)
    .bind(entry.contentment_rating)
    .bind(entry.karma)
    .fetch_one(conn)
    .await?;
    Ok(!inserted)
}
