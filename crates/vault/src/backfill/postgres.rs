//! PostgreSQL [`BackfillStore`].
//!
//! Statements are assembled from the static policy table, so every table and
//! column name interpolated into SQL is a compile-time constant. Values are
//! always bound.

use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};

use super::store::{BackfillStore, RawRow, RowTransaction, StoreError};
use crate::fields::EntityKind;

/// Backfill storage over a connection pool.
#[derive(Clone, Debug)]
pub struct PgBackfillStore {
    pool: PgPool,
}

impl PgBackfillStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BackfillStore for PgBackfillStore {
    async fn scan(&self, kind: EntityKind, after: i64, limit: u32) -> Result<Vec<RawRow>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id > $1 AND ({}) ORDER BY id LIMIT $2",
            select_list(kind),
            kind.table(),
            unmigrated_predicate(kind),
        );
        let rows = sqlx::query(&sql)
            .bind(after)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|r| decode_row(kind, r)).collect()
    }

    async fn begin(&self) -> Result<Box<dyn RowTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgRowTransaction { tx }))
    }

    async fn sample_migrated(&self, kind: EntityKind, limit: u32) -> Result<Vec<RawRow>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE {} ORDER BY random() LIMIT $1",
            select_list(kind),
            kind.table(),
            migrated_predicate(kind),
        );
        let rows = sqlx::query(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|r| decode_row(kind, r)).collect()
    }
}

/// A single-row transaction holding a `FOR UPDATE` lock once
/// [`RowTransaction::lock_row`] has run.
pub struct PgRowTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RowTransaction for PgRowTransaction {
    async fn lock_row(&mut self, kind: EntityKind, id: i64) -> Result<Option<RawRow>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = $1 FOR UPDATE",
            select_list(kind),
            kind.table(),
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(|r| decode_row(kind, &r)).transpose()
    }

    async fn write_row(&mut self, row: &RawRow) -> Result<(), StoreError> {
        let mut assignments = Vec::new();
        for (n, column) in row.fields.keys().chain(row.indexes.keys()).enumerate() {
            assignments.push(format!("{column} = ${}", n + 1));
        }
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ${}",
            row.kind.table(),
            assignments.join(", "),
            assignments.len() + 1,
        );

        let mut query = sqlx::query(&sql);
        for value in row.fields.values() {
            query = query.bind(value.as_str());
        }
        for value in row.indexes.values() {
            query = query.bind(value.as_deref());
        }
        let result = query.bind(row.id).execute(&mut *self.tx).await?;

        if result.rows_affected() != 1 {
            return Err(StoreError::Backend(format!(
                "expected to update 1 row, updated {}",
                result.rows_affected()
            )));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn select_list(kind: EntityKind) -> String {
    let mut columns = vec!["id::BIGINT AS id".to_owned()];
    columns.extend(
        kind.sensitive_fields()
            .map(|p| format!("COALESCE({0}, '') AS {0}", p.field)),
    );
    columns.extend(kind.indexed_fields().map(|(_, index)| index.to_owned()));
    columns.join(", ")
}

fn unmigrated_predicate(kind: EntityKind) -> String {
    let indexed: Vec<_> = kind
        .indexed_fields()
        .map(|(_, index)| format!("{index} IS NULL OR {index} = ''"))
        .collect();
    if !indexed.is_empty() {
        return indexed.join(" OR ");
    }
    non_empty_predicate(kind)
}

fn migrated_predicate(kind: EntityKind) -> String {
    let indexed: Vec<_> = kind
        .indexed_fields()
        .map(|(_, index)| format!("({index} IS NOT NULL AND {index} <> '')"))
        .collect();
    if !indexed.is_empty() {
        return indexed.join(" AND ");
    }
    non_empty_predicate(kind)
}

fn non_empty_predicate(kind: EntityKind) -> String {
    kind.sensitive_fields()
        .map(|p| format!("({0} IS NOT NULL AND {0} <> '')", p.field))
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn decode_row(kind: EntityKind, row: &PgRow) -> Result<RawRow, StoreError> {
    let mut raw = RawRow::empty(kind, row.try_get("id")?);
    for policy in kind.sensitive_fields() {
        let value: String = row.try_get(policy.field)?;
        raw.fields.insert(policy.field, value);
    }
    for (_, index) in kind.indexed_fields() {
        let value: Option<String> = row.try_get(index)?;
        raw.indexes.insert(index, value);
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_statements() {
        assert_eq!(
            select_list(EntityKind::User),
            "id::BIGINT AS id, COALESCE(email, '') AS email, email_blind_index"
        );
        assert_eq!(
            unmigrated_predicate(EntityKind::User),
            "email_blind_index IS NULL OR email_blind_index = ''"
        );
        assert_eq!(
            migrated_predicate(EntityKind::User),
            "(email_blind_index IS NOT NULL AND email_blind_index <> '')"
        );
    }

    #[test]
    fn unindexed_kinds_select_non_empty_values() {
        assert_eq!(
            select_list(EntityKind::Goal),
            "id::BIGINT AS id, COALESCE(goal, '') AS goal"
        );
        assert_eq!(
            unmigrated_predicate(EntityKind::JournalEntry),
            "(topics IS NOT NULL AND topics <> '')"
        );
        assert_eq!(
            unmigrated_predicate(EntityKind::Goal),
            migrated_predicate(EntityKind::Goal)
        );
    }
}
