//! In-memory [`BackfillStore`] with fault injection, for migrator tests.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::store::{BackfillStore, RawRow, RowTransaction, StoreError};
use crate::fields::EntityKind;

#[derive(Default)]
struct State {
    rows: BTreeMap<(EntityKind, i64), RawRow>,
    failing_writes: HashSet<(EntityKind, i64)>,
    vanish_on_lock: HashSet<(EntityKind, i64)>,
    cancel_on_scan: Option<(usize, CancellationToken)>,
    scans: usize,
    commits: usize,
    rollbacks: usize,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn insert(&self, row: RawRow) {
        self.state.lock().unwrap().rows.insert((row.kind, row.id), row);
    }

    pub fn get(&self, kind: EntityKind, id: i64) -> Option<RawRow> {
        self.state.lock().unwrap().rows.get(&(kind, id)).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<(EntityKind, i64), RawRow> {
        self.state.lock().unwrap().rows.clone()
    }

    /// Make every write to this row fail.
    pub fn fail_writes_to(&self, kind: EntityKind, id: i64) {
        self.state.lock().unwrap().failing_writes.insert((kind, id));
    }

    /// Let writes to this row succeed again.
    pub fn heal_writes_to(&self, kind: EntityKind, id: i64) {
        self.state.lock().unwrap().failing_writes.remove(&(kind, id));
    }

    /// Delete this row as soon as a transaction tries to lock it.
    pub fn vanish_on_lock(&self, kind: EntityKind, id: i64) {
        self.state.lock().unwrap().vanish_on_lock.insert((kind, id));
    }

    /// Cancel `token` when the `nth` scan (1-based) is served.
    pub fn cancel_on_scan(&self, nth: usize, token: CancellationToken) {
        self.state.lock().unwrap().cancel_on_scan = Some((nth, token));
    }

    pub fn commits(&self) -> usize {
        self.state.lock().unwrap().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.state.lock().unwrap().rollbacks
    }
}

fn unmigrated(row: &RawRow) -> bool {
    if row.kind.indexed_fields().next().is_some() {
        !row.has_index()
    } else {
        row.fields.values().any(|v| !v.is_empty())
    }
}

fn migrated(row: &RawRow) -> bool {
    if row.kind.indexed_fields().next().is_some() {
        row.has_index()
    } else {
        row.fields.values().any(|v| !v.is_empty())
    }
}

#[async_trait]
impl BackfillStore for MemoryStore {
    async fn scan(&self, kind: EntityKind, after: i64, limit: u32) -> Result<Vec<RawRow>, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.scans += 1;
        if let Some((nth, token)) = &state.cancel_on_scan {
            if *nth == state.scans {
                token.cancel();
            }
        }
        Ok(state
            .rows
            .range((kind, after + 1)..=(kind, i64::MAX))
            .map(|(_, row)| row)
            .filter(|row| unmigrated(row))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn begin(&self) -> Result<Box<dyn RowTransaction>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            store: self.clone(),
            pending: None,
        }))
    }

    async fn sample_migrated(&self, kind: EntityKind, limit: u32) -> Result<Vec<RawRow>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .rows
            .values()
            .filter(|row| row.kind == kind && migrated(row))
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

struct MemoryTransaction {
    store: MemoryStore,
    pending: Option<RawRow>,
}

#[async_trait]
impl RowTransaction for MemoryTransaction {
    async fn lock_row(&mut self, kind: EntityKind, id: i64) -> Result<Option<RawRow>, StoreError> {
        let mut state = self.store.state.lock().unwrap();
        if state.vanish_on_lock.contains(&(kind, id)) {
            state.rows.remove(&(kind, id));
        }
        Ok(state.rows.get(&(kind, id)).cloned())
    }

    async fn write_row(&mut self, row: &RawRow) -> Result<(), StoreError> {
        let state = self.store.state.lock().unwrap();
        if state.failing_writes.contains(&(row.kind, row.id)) {
            return Err(StoreError::Backend("injected write failure".into()));
        }
        drop(state);
        self.pending = Some(row.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let this = *self;
        let mut state = this.store.state.lock().unwrap();
        if let Some(row) = this.pending {
            state.rows.insert((row.kind, row.id), row);
        }
        state.commits += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.store.state.lock().unwrap().rollbacks += 1;
        Ok(())
    }
}
