//! Change tracking for entities attached to a session.
//!
//! # Responsibility
//! - Hold one tracked copy per `(entity type, key)` with its state.
//! - Order pending changes by the time they were last staged.
//! - Flush or reload one entry against the store.
//!
//! # Invariants
//! - Detached entities are never stored; detaching removes the entry.
//! - `flush` only accepts Added/Modified/Deleted entries and `reload` only
//!   Modified/Deleted ones; anything else is `InvalidTrackedState`.

use crate::model::entity::Entity;
use crate::model::value::FieldValue;
use crate::repo::error::{RepoError, RepoResult};
use crate::session::sql;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

/// Tracked state of one entity relative to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    Unchanged,
    Added,
    Modified,
    Deleted,
    Detached,
}

impl Display for EntityState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unchanged => "unchanged",
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Detached => "detached",
        };
        write!(f, "{name}")
    }
}

/// Read-only view of one tracked entry.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedEntry {
    pub entity: &'static str,
    pub key: FieldValue,
    pub state: EntityState,
}

/// Type-erased tracked entity.
pub(crate) trait TrackedRecord {
    fn entity_name(&self) -> &'static str;
    fn entity_type(&self) -> TypeId;
    fn key(&self) -> &FieldValue;
    fn state(&self) -> EntityState;
    fn set_state(&mut self, state: EntityState);
    fn sequence(&self) -> u64;
    fn set_sequence(&mut self, sequence: u64);
    fn flush(&self, conn: &Connection) -> RepoResult<()>;
    /// Replaces the tracked values with the stored row. Returns `false`
    /// when the row no longer exists.
    fn reload(&mut self, conn: &Connection) -> RepoResult<bool>;
    fn clone_box(&self) -> Box<dyn TrackedRecord>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

pub(crate) struct Tracked<T: Entity> {
    pub(crate) entity: T,
    key: FieldValue,
    state: EntityState,
    sequence: u64,
}

impl<T: Entity> Tracked<T> {
    fn invalid(&self, operation: &'static str) -> RepoError {
        RepoError::InvalidTrackedState {
            entity: T::NAME,
            state: self.state,
            operation,
        }
    }

    fn not_found(&self) -> RepoError {
        RepoError::NotFound {
            entity: T::NAME,
            key: self.key.to_string(),
        }
    }
}

impl<T: Entity> TrackedRecord for Tracked<T> {
    fn entity_name(&self) -> &'static str {
        T::NAME
    }

    fn entity_type(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn key(&self) -> &FieldValue {
        &self.key
    }

    fn state(&self) -> EntityState {
        self.state
    }

    fn set_state(&mut self, state: EntityState) {
        self.state = state;
    }

    fn sequence(&self) -> u64 {
        self.sequence
    }

    fn set_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    fn flush(&self, conn: &Connection) -> RepoResult<()> {
        match self.state {
            EntityState::Added => {
                sql::insert(conn, &self.entity)?;
            }
            EntityState::Modified => {
                if sql::update(conn, &self.entity)? == 0 {
                    return Err(self.not_found());
                }
            }
            EntityState::Deleted => {
                if sql::delete_by_key::<T>(conn, &self.key)? == 0 {
                    return Err(self.not_found());
                }
            }
            EntityState::Unchanged | EntityState::Detached => return Err(self.invalid("flush")),
        }
        Ok(())
    }

    fn reload(&mut self, conn: &Connection) -> RepoResult<bool> {
        if !matches!(self.state, EntityState::Modified | EntityState::Deleted) {
            return Err(self.invalid("reload"));
        }
        match sql::fetch_by_key::<T>(conn, &self.key)? {
            Some(stored) => {
                self.entity = stored;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn clone_box(&self) -> Box<dyn TrackedRecord> {
        Box::new(Self {
            entity: self.entity.clone(),
            key: self.key.clone(),
            state: self.state,
            sequence: self.sequence,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

type IndexKey = (TypeId, FieldValue);

/// Identity map of tracked entities.
#[derive(Default)]
pub(crate) struct ChangeTracker {
    entries: Vec<Box<dyn TrackedRecord>>,
    index: HashMap<IndexKey, usize>,
    next_sequence: u64,
}

impl Clone for ChangeTracker {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.iter().map(|entry| entry.clone_box()).collect(),
            index: self.index.clone(),
            next_sequence: self.next_sequence,
        }
    }
}

impl ChangeTracker {
    pub(crate) fn state_of<T: Entity>(&self, key: &FieldValue) -> EntityState {
        self.position::<T>(key)
            .map_or(EntityState::Detached, |index| self.entries[index].state())
    }

    pub(crate) fn get<T: Entity>(&self, key: &FieldValue) -> Option<&Tracked<T>> {
        let index = self.position::<T>(key)?;
        self.entries[index].as_any().downcast_ref::<Tracked<T>>()
    }

    /// Starts tracking `entity` in `state`.
    ///
    /// # Errors
    /// - `AlreadyTracked` when the key is tracked already.
    pub(crate) fn track<T: Entity>(&mut self, entity: T, state: EntityState) -> RepoResult<()> {
        let key = entity.key();
        if self.position::<T>(&key).is_some() {
            return Err(RepoError::AlreadyTracked {
                entity: T::NAME,
                key: key.to_string(),
            });
        }
        let sequence = self.bump();
        self.index
            .insert((TypeId::of::<T>(), key.clone()), self.entries.len());
        self.entries.push(Box::new(Tracked {
            entity,
            key,
            state,
            sequence,
        }));
        Ok(())
    }

    /// Replaces the tracked values and state of an existing entry and moves
    /// it to the end of the pending order. Returns `false` when untracked.
    pub(crate) fn restage<T: Entity>(&mut self, entity: T, state: EntityState) -> bool {
        let Some(index) = self.position::<T>(&entity.key()) else {
            return false;
        };
        let sequence = self.bump();
        let record = &mut self.entries[index];
        record.set_state(state);
        record.set_sequence(sequence);
        if let Some(tracked) = record.as_any_mut().downcast_mut::<Tracked<T>>() {
            tracked.entity = entity;
        }
        true
    }

    /// Changes only the state, keeping tracked values.
    pub(crate) fn set_state<T: Entity>(&mut self, key: &FieldValue, state: EntityState) -> bool {
        let Some(index) = self.position::<T>(key) else {
            return false;
        };
        let sequence = self.bump();
        self.entries[index].set_state(state);
        self.entries[index].set_sequence(sequence);
        true
    }

    pub(crate) fn detach<T: Entity>(&mut self, key: &FieldValue) {
        if let Some(index) = self.position::<T>(key) {
            self.remove_where(|position, _| position == index);
        }
    }

    pub(crate) fn entries(&self) -> Vec<TrackedEntry> {
        self.entries
            .iter()
            .map(|record| TrackedEntry {
                entity: record.entity_name(),
                key: record.key().clone(),
                state: record.state(),
            })
            .collect()
    }

    /// Indices of entries with pending changes, oldest staging first.
    pub(crate) fn pending_in_order(&self) -> Vec<usize> {
        let mut pending: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, record)| {
                matches!(
                    record.state(),
                    EntityState::Added | EntityState::Modified | EntityState::Deleted
                )
            })
            .map(|(index, _)| index)
            .collect();
        pending.sort_by_key(|index| self.entries[*index].sequence());
        pending
    }

    pub(crate) fn record(&self, index: usize) -> &dyn TrackedRecord {
        self.entries[index].as_ref()
    }

    pub(crate) fn record_mut(&mut self, index: usize) -> &mut dyn TrackedRecord {
        self.entries[index].as_mut()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Marks flushed changes as persisted: Added/Modified become Unchanged,
    /// Deleted entries are dropped.
    pub(crate) fn accept_all(&mut self) {
        for record in &mut self.entries {
            if matches!(record.state(), EntityState::Added | EntityState::Modified) {
                record.set_state(EntityState::Unchanged);
            }
        }
        self.remove_where(|_, record| record.state() == EntityState::Deleted);
    }

    /// Drops every entry matching `predicate` and rebuilds the index.
    pub(crate) fn remove_where(&mut self, predicate: impl Fn(usize, &dyn TrackedRecord) -> bool) {
        let entries = std::mem::take(&mut self.entries);
        self.entries = entries
            .into_iter()
            .enumerate()
            .filter(|(position, record)| !predicate(*position, record.as_ref()))
            .map(|(_, record)| record)
            .collect();
        self.index = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, record)| ((record.entity_type(), record.key().clone()), position))
            .collect();
    }

    fn position<T: Entity>(&self, key: &FieldValue) -> Option<usize> {
        self.index.get(&(TypeId::of::<T>(), key.clone())).copied()
    }

    fn bump(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }
}

#[cfg(test)]
mod tests {
    use super::{ChangeTracker, EntityState};
    use crate::model::entity::{Entity, Field};
    use crate::model::value::FieldValue;
    use crate::repo::error::RepoError;
    use rusqlite::Row;

    #[derive(Debug, Clone, PartialEq)]
    struct Doc {
        id: i64,
        body: String,
    }

    static DOC_FIELDS: &[Field<Doc>] = &[
        Field::new("Id", "id", |d| FieldValue::from(d.id)),
        Field::new("Body", "body", |d| FieldValue::from(&d.body)),
    ];

    impl Entity for Doc {
        const NAME: &'static str = "Doc";
        const TABLE: &'static str = "docs";
        const KEY_COLUMN: &'static str = "id";

        fn fields() -> &'static [Field<Self>] {
            DOC_FIELDS
        }

        fn key(&self) -> FieldValue {
            FieldValue::from(self.id)
        }

        fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
            Ok(Self {
                id: row.get("id")?,
                body: row.get("body")?,
            })
        }
    }

    fn doc(id: i64, body: &str) -> Doc {
        Doc {
            id,
            body: body.to_string(),
        }
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let mut tracker = ChangeTracker::default();
        tracker.track(doc(1, "a"), EntityState::Added).unwrap();
        let err = tracker.track(doc(1, "b"), EntityState::Added).unwrap_err();
        assert!(matches!(err, RepoError::AlreadyTracked { entity: "Doc", .. }));
    }

    #[test]
    fn pending_order_follows_last_staging() {
        let mut tracker = ChangeTracker::default();
        tracker.track(doc(1, "a"), EntityState::Added).unwrap();
        tracker.track(doc(2, "b"), EntityState::Unchanged).unwrap();
        tracker.track(doc(3, "c"), EntityState::Added).unwrap();
        assert!(tracker.restage(doc(1, "a2"), EntityState::Added));
        assert!(tracker.set_state::<Doc>(&FieldValue::from(2_i64), EntityState::Deleted));

        let keys: Vec<FieldValue> = tracker
            .pending_in_order()
            .into_iter()
            .map(|index| tracker.record(index).key().clone())
            .collect();
        assert_eq!(
            keys,
            vec![
                FieldValue::from(3_i64),
                FieldValue::from(1_i64),
                FieldValue::from(2_i64)
            ]
        );
        assert_eq!(
            tracker.get::<Doc>(&FieldValue::from(1_i64)).unwrap().entity.body,
            "a2"
        );
    }

    #[test]
    fn accept_all_settles_states_and_drops_deleted() {
        let mut tracker = ChangeTracker::default();
        tracker.track(doc(1, "a"), EntityState::Added).unwrap();
        tracker.track(doc(2, "b"), EntityState::Deleted).unwrap();
        tracker.track(doc(3, "c"), EntityState::Modified).unwrap();

        tracker.accept_all();

        assert_eq!(tracker.len(), 2);
        assert_eq!(
            tracker.state_of::<Doc>(&FieldValue::from(1_i64)),
            EntityState::Unchanged
        );
        assert_eq!(
            tracker.state_of::<Doc>(&FieldValue::from(2_i64)),
            EntityState::Detached
        );
        assert_eq!(
            tracker.state_of::<Doc>(&FieldValue::from(3_i64)),
            EntityState::Unchanged
        );
    }

    #[test]
    fn clone_is_an_independent_snapshot() {
        let mut tracker = ChangeTracker::default();
        tracker.track(doc(1, "a"), EntityState::Added).unwrap();
        let snapshot = tracker.clone();

        tracker.detach::<Doc>(&FieldValue::from(1_i64));
        assert_eq!(tracker.len(), 0);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(
            snapshot.state_of::<Doc>(&FieldValue::from(1_i64)),
            EntityState::Added
        );
    }

    #[test]
    fn flush_guard_rejects_unchanged_entries() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let mut tracker = ChangeTracker::default();
        tracker.track(doc(1, "a"), EntityState::Unchanged).unwrap();
        let err = tracker.record(0).flush(&conn).unwrap_err();
        assert!(matches!(
            err,
            RepoError::InvalidTrackedState {
                state: EntityState::Unchanged,
                operation: "flush",
                ..
            }
        ));
    }
}
