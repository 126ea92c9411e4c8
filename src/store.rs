// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Append-only ledger storage.
//!
//! [`LedgerStore`] has no update or delete operation. The only way to
//! change state is [`LedgerStore::append`], which commits a new entry
//! together with its lot bookkeeping as one unit.
//!
//! # Optimistic append
//!
//! A [`Commit`] carries the id of the entry the writer saw last and the
//! running balance it computed from it. The store rejects the commit with
//! [`LedgerError::ConcurrencyConflict`] if either no longer matches, so an
//! interleaved writer can never produce a broken balance chain.

use crate::base::{DimensionKey, EntryId, TenantId};
use crate::entry::{Direction, EntryDraft, LedgerEntry, TransactionType};
use crate::error::LedgerError;
use crate::journal::EntryJournal;
use crate::lot::{Consumption, LotBook};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

/// One entry to append plus what the writer expects the ledger to look like.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub draft: EntryDraft,
    /// Last entry id the writer read for the key.
    pub expected_last: Option<EntryId>,
    /// Balance after this entry, computed by the writer.
    pub running_balance: Decimal,
    /// Lot draws for a decrease. Increases open their own lot.
    pub consumption: Option<Consumption>,
}

/// Consistent view of one key: its last entry and its lots.
#[derive(Debug, Clone)]
pub struct KeySnapshot {
    pub last: Option<Arc<LedgerEntry>>,
    pub lots: LotBook,
}

impl KeySnapshot {
    pub fn balance(&self) -> Decimal {
        self.last
            .as_ref()
            .map_or(Decimal::ZERO, |entry| entry.running_balance())
    }

    pub fn last_id(&self) -> Option<EntryId> {
        self.last.as_ref().map(|entry| entry.id())
    }
}

/// An entry with the lot draws committed alongside it.
#[derive(Debug, Clone)]
pub struct Posted {
    pub entry: Arc<LedgerEntry>,
    pub consumption: Option<Arc<Consumption>>,
}

pub trait LedgerStore: Send + Sync {
    /// Appends an entry and its lot bookkeeping atomically.
    fn append(&self, commit: Commit) -> Result<Arc<LedgerEntry>, LedgerError>;

    fn entry(&self, id: EntryId) -> Option<Arc<LedgerEntry>>;

    fn last_entry(&self, key: &DimensionKey) -> Option<Arc<LedgerEntry>>;

    /// Entries for `key` in append order, optionally bounded by
    /// `created_at` (both ends inclusive).
    fn scan(
        &self,
        key: &DimensionKey,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Vec<Arc<LedgerEntry>>;

    fn entries_since(&self, key: &DimensionKey, since: DateTime<Utc>) -> Vec<Arc<LedgerEntry>> {
        self.scan(key, Some(since), None)
    }

    /// Latest entry with `created_at <= at`.
    fn last_entry_at(&self, key: &DimensionKey, at: DateTime<Utc>) -> Option<Arc<LedgerEntry>> {
        self.scan(key, None, Some(at)).pop()
    }

    fn snapshot(&self, key: &DimensionKey) -> KeySnapshot;

    /// Entries up to `until` with their recorded consumptions.
    fn history(&self, key: &DimensionKey, until: DateTime<Utc>) -> Vec<Posted>;

    /// At most `limit` entries of [`history`](Self::history) that come
    /// after the entry `after`.
    fn history_page(
        &self,
        key: &DimensionKey,
        until: DateTime<Utc>,
        after: Option<EntryId>,
        limit: usize,
    ) -> Vec<Posted> {
        self.history(key, until)
            .into_iter()
            .filter(|posted| after.is_none_or(|after| posted.entry.id() > after))
            .take(limit)
            .collect()
    }

    fn consumption(&self, id: EntryId) -> Option<Arc<Consumption>>;

    /// Id of the entry that reversed `id`, if any.
    fn reversal_of(&self, id: EntryId) -> Option<EntryId>;

    /// All keys of a tenant that have at least one entry.
    fn keys(&self, tenant_id: TenantId) -> Vec<DimensionKey>;
}

#[derive(Debug)]
struct Partition {
    entries: Vec<Arc<LedgerEntry>>,
    lots: LotBook,
    consumptions: HashMap<EntryId, Arc<Consumption>>,
    reversals: HashMap<EntryId, EntryId>,
}

impl Partition {
    fn new(key: DimensionKey) -> Self {
        Self {
            entries: Vec::new(),
            lots: LotBook::new(key),
            consumptions: HashMap::new(),
            reversals: HashMap::new(),
        }
    }

    fn assert_invariants(&self) {
        let n = self.entries.len();
        if n >= 2 {
            let (prev, last) = (&self.entries[n - 2], &self.entries[n - 1]);
            debug_assert_eq!(
                prev.running_balance() + last.quantity(),
                last.running_balance(),
                "Invariant violated: running balance chain broken at entry {}",
                last.id()
            );
            debug_assert!(prev.created_at() <= last.created_at());
        }
        debug_assert!(
            self.lots.lots().iter().all(|lot| {
                lot.remaining_quantity >= Decimal::ZERO
                    && lot.remaining_quantity <= lot.original_quantity
            }),
            "Invariant violated: lot remaining quantity out of range"
        );
    }

    /// Index of the entry with `id`, if this partition holds it.
    fn position(&self, id: EntryId) -> Option<usize> {
        self.entries.binary_search_by_key(&id, |entry| entry.id()).ok()
    }

    /// Index range of entries with `from <= created_at <= to`.
    fn range(&self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> (usize, usize) {
        let start = from.map_or(0, |from| {
            self.entries.partition_point(|entry| entry.created_at() < from)
        });
        let end = to.map_or(self.entries.len(), |to| {
            self.entries.partition_point(|entry| entry.created_at() <= to)
        });
        (start, end.max(start))
    }
}

/// In-process [`LedgerStore`].
///
/// Each key owns a partition behind its own `RwLock`; appends to different
/// keys never contend. Readers take the read lock only long enough to clone
/// `Arc`s, so they never see an entry without its lot update.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    partitions: DashMap<DimensionKey, Arc<RwLock<Partition>>>,
    journal: EntryJournal,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn partition(&self, key: &DimensionKey) -> Option<Arc<RwLock<Partition>>> {
        // Clone the Arc so the DashMap shard lock is released before the
        // partition lock is taken.
        self.partitions.get(key).map(|p| Arc::clone(p.value()))
    }

    /// Indexes a sealed entry without appending it to its key.
    #[cfg(test)]
    pub(crate) fn register_detached(&self, draft: EntryDraft) -> Arc<LedgerEntry> {
        let entry = Arc::new(LedgerEntry::seal(self.journal.next_id(), draft.quantity, draft));
        self.journal
            .push(Arc::clone(&entry))
            .expect("fresh ids are never registered");
        entry
    }

    fn partition_or_create(&self, key: &DimensionKey) -> Arc<RwLock<Partition>> {
        Arc::clone(
            self.partitions
                .entry(*key)
                .or_insert_with(|| Arc::new(RwLock::new(Partition::new(*key))))
                .value(),
        )
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn append(&self, commit: Commit) -> Result<Arc<LedgerEntry>, LedgerError> {
        let Commit {
            mut draft,
            expected_last,
            running_balance,
            consumption,
        } = commit;

        if draft.quantity.is_zero() {
            return Err(LedgerError::validation("quantity must not be zero"));
        }
        let key = draft.key;
        let increase = draft.quantity > Decimal::ZERO;
        if let Some(direction) = draft.transaction_type.direction() {
            if direction != Direction::of(draft.quantity) {
                return Err(LedgerError::validation(format!(
                    "{} entries must be {}",
                    draft.transaction_type,
                    match direction {
                        Direction::Increase => "increases",
                        Direction::Decrease => "decreases",
                    }
                )));
            }
        }
        match (&consumption, increase) {
            (Some(_), true) => {
                return Err(LedgerError::validation(
                    "increase entries open a lot and cannot consume one",
                ));
            }
            (None, false) => {
                return Err(LedgerError::validation(
                    "decrease entries must carry their lot consumption",
                ));
            }
            (Some(c), false) if c.quantity != draft.quantity.abs() => {
                return Err(LedgerError::validation(format!(
                    "consumption covers {} but entry moves {}",
                    c.quantity,
                    draft.quantity.abs()
                )));
            }
            _ => {}
        }

        let partition = self.partition_or_create(&key);
        let mut partition = partition.write();

        let last = partition.entries.last().cloned();
        let actual = last.as_ref().map(|entry| entry.id());
        let prior = last
            .as_ref()
            .map_or(Decimal::ZERO, |entry| entry.running_balance());
        if actual != expected_last || prior + draft.quantity != running_balance {
            tracing::warn!(%key, ?expected_last, ?actual, "stale append rejected");
            return Err(LedgerError::ConcurrencyConflict {
                key,
                expected: expected_last,
                actual,
                attempts: 1,
            });
        }

        if let TransactionType::ReversalOf(original) = draft.transaction_type {
            let Some(target) = self.journal.get(original) else {
                return Err(LedgerError::not_found(
                    key.tenant_id,
                    crate::error::Resource::Entry,
                    original.0,
                ));
            };
            if *target.key() != key {
                return Err(LedgerError::validation(format!(
                    "reversal of entry {original} must be posted at {}",
                    target.key()
                )));
            }
            if partition.position(original).is_none() {
                return Err(LedgerError::not_found(
                    key.tenant_id,
                    crate::error::Resource::Entry,
                    original.0,
                ));
            }
            if target.direction() == Direction::of(draft.quantity) {
                return Err(LedgerError::validation(format!(
                    "reversal of entry {original} must move stock the other way"
                )));
            }
            if partition.reversals.contains_key(&original) {
                return Err(LedgerError::validation(format!(
                    "entry {original} is already reversed"
                )));
            }
        }
        if let Some(c) = &consumption {
            partition.lots.check(c)?;
        }

        // Entries for one key never go back in time.
        if let Some(last) = &last {
            draft.created_at = draft.created_at.max(last.created_at());
        }
        let reversed = draft.transaction_type.reversed_entry();
        let id = self.journal.next_id();
        let entry = Arc::new(LedgerEntry::seal(id, running_balance, draft));
        self.journal.push(Arc::clone(&entry))?;

        partition.lots.post(&entry, consumption.as_ref(), prior)?;
        if let Some(c) = consumption {
            partition.consumptions.insert(id, Arc::new(c));
        }
        if let Some(original) = reversed {
            partition.reversals.insert(original, id);
        }
        partition.entries.push(Arc::clone(&entry));
        partition.assert_invariants();

        Ok(entry)
    }

    fn entry(&self, id: EntryId) -> Option<Arc<LedgerEntry>> {
        self.journal.get(id)
    }

    fn last_entry(&self, key: &DimensionKey) -> Option<Arc<LedgerEntry>> {
        self.partition(key)?.read().entries.last().cloned()
    }

    fn scan(
        &self,
        key: &DimensionKey,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Vec<Arc<LedgerEntry>> {
        let Some(partition) = self.partition(key) else {
            return Vec::new();
        };
        let partition = partition.read();
        let (start, end) = partition.range(from, to);
        partition.entries[start..end].to_vec()
    }

    fn last_entry_at(&self, key: &DimensionKey, at: DateTime<Utc>) -> Option<Arc<LedgerEntry>> {
        let partition = self.partition(key)?;
        let partition = partition.read();
        let (_, end) = partition.range(None, Some(at));
        end.checked_sub(1).map(|i| Arc::clone(&partition.entries[i]))
    }

    fn snapshot(&self, key: &DimensionKey) -> KeySnapshot {
        match self.partition(key) {
            Some(partition) => {
                let partition = partition.read();
                KeySnapshot {
                    last: partition.entries.last().cloned(),
                    lots: partition.lots.clone(),
                }
            }
            None => KeySnapshot {
                last: None,
                lots: LotBook::new(*key),
            },
        }
    }

    fn history(&self, key: &DimensionKey, until: DateTime<Utc>) -> Vec<Posted> {
        let Some(partition) = self.partition(key) else {
            return Vec::new();
        };
        let partition = partition.read();
        let (start, end) = partition.range(None, Some(until));
        partition.entries[start..end]
            .iter()
            .map(|entry| Posted {
                entry: Arc::clone(entry),
                consumption: partition.consumptions.get(&entry.id()).cloned(),
            })
            .collect()
    }

    fn history_page(
        &self,
        key: &DimensionKey,
        until: DateTime<Utc>,
        after: Option<EntryId>,
        limit: usize,
    ) -> Vec<Posted> {
        let Some(partition) = self.partition(key) else {
            return Vec::new();
        };
        let partition = partition.read();
        let (_, end) = partition.range(None, Some(until));
        let start = after.map_or(0, |after| {
            partition.entries.partition_point(|entry| entry.id() <= after)
        });
        partition.entries[start.min(end)..end]
            .iter()
            .take(limit)
            .map(|entry| Posted {
                entry: Arc::clone(entry),
                consumption: partition.consumptions.get(&entry.id()).cloned(),
            })
            .collect()
    }

    fn consumption(&self, id: EntryId) -> Option<Arc<Consumption>> {
        let entry = self.journal.get(id)?;
        let partition = self.partition(entry.key())?;
        let partition = partition.read();
        partition.consumptions.get(&id).cloned()
    }

    fn reversal_of(&self, id: EntryId) -> Option<EntryId> {
        let entry = self.journal.get(id)?;
        let partition = self.partition(entry.key())?;
        let partition = partition.read();
        partition.reversals.get(&id).copied()
    }

    fn keys(&self, tenant_id: TenantId) -> Vec<DimensionKey> {
        let mut keys: Vec<DimensionKey> = self
            .partitions
            .iter()
            .filter(|p| p.key().tenant_id == tenant_id && !p.value().read().entries.is_empty())
            .map(|p| *p.key())
            .collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::ProductId;
    use crate::entry::Metadata;
    use crate::lot::Allocation;
    use crate::valuation::ValuationMethod;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn key() -> DimensionKey {
        DimensionKey::product(TenantId(1), ProductId(1))
    }

    fn draft(quantity: Decimal, at: DateTime<Utc>) -> EntryDraft {
        let increase = quantity > Decimal::ZERO;
        EntryDraft {
            key: key(),
            transaction_type: if increase {
                TransactionType::Purchase
            } else {
                TransactionType::Sale
            },
            quantity,
            unit_cost: increase.then_some(dec!(2)),
            total_cost: increase.then(|| quantity * dec!(2)),
            batch_number: None,
            serial_number: None,
            lot_number: None,
            expiry_date: None,
            reference: None,
            created_at: at,
            created_by: None,
            metadata: Metadata::new(),
        }
    }

    fn receive(store: &InMemoryLedgerStore, quantity: Decimal, at: DateTime<Utc>) -> Arc<LedgerEntry> {
        let snapshot = store.snapshot(&key());
        store
            .append(Commit {
                draft: draft(quantity, at),
                expected_last: snapshot.last_id(),
                running_balance: snapshot.balance() + quantity,
                consumption: None,
            })
            .unwrap()
    }

    #[test]
    fn append_extends_balance_chain_and_opens_lot() {
        let store = InMemoryLedgerStore::new();
        let now = Utc::now();
        receive(&store, dec!(10), now);
        let second = receive(&store, dec!(5), now);

        assert_eq!(second.running_balance(), dec!(15));
        assert_eq!(store.last_entry(&key()).unwrap().id(), second.id());
        assert_eq!(store.snapshot(&key()).lots.remaining(), dec!(15));
    }

    #[test]
    fn stale_expected_last_is_a_conflict() {
        let store = InMemoryLedgerStore::new();
        let first = receive(&store, dec!(10), Utc::now());
        receive(&store, dec!(1), Utc::now());

        let result = store.append(Commit {
            draft: draft(dec!(3), Utc::now()),
            expected_last: Some(first.id()),
            running_balance: dec!(13),
            consumption: None,
        });
        assert!(matches!(result, Err(LedgerError::ConcurrencyConflict { .. })));
        assert_eq!(store.scan(&key(), None, None).len(), 2);
    }

    #[test]
    fn decrease_must_match_its_consumption() {
        let store = InMemoryLedgerStore::new();
        let lot = receive(&store, dec!(10), Utc::now());
        let result = store.append(Commit {
            draft: draft(dec!(-4), Utc::now()),
            expected_last: Some(lot.id()),
            running_balance: dec!(6),
            consumption: Some(Consumption {
                method: Some(ValuationMethod::Fifo),
                quantity: dec!(3),
                consumed_cost: dec!(6),
                allocations: vec![Allocation {
                    lot_id: lot.id(),
                    quantity: dec!(3),
                    unit_cost: dec!(2),
                }],
                uncovered: Decimal::ZERO,
            }),
        });
        assert!(matches!(result, Err(LedgerError::Validation(_))));
        assert_eq!(store.snapshot(&key()).lots.remaining(), dec!(10));
    }

    fn drawn_from(id: EntryId, quantity: Decimal) -> Consumption {
        Consumption {
            method: None,
            quantity,
            consumed_cost: quantity * dec!(2),
            allocations: vec![Allocation {
                lot_id: id,
                quantity,
                unit_cost: dec!(2),
            }],
            uncovered: Decimal::ZERO,
        }
    }

    #[test]
    fn stored_entries_cannot_be_registered_twice() {
        let store = InMemoryLedgerStore::new();
        let entry = receive(&store, dec!(10), Utc::now());
        let before = store.scan(&key(), None, None);

        let result = store.journal.push(Arc::clone(&entry));
        assert_eq!(
            result,
            Err(LedgerError::ImmutabilityViolation { entry_id: entry.id() })
        );
        assert_eq!(store.scan(&key(), None, None), before);
    }

    #[test]
    fn reversal_target_must_live_in_the_partition() {
        let store = InMemoryLedgerStore::new();
        let receipt = receive(&store, dec!(10), Utc::now());

        let stray_id = store.register_detached(draft(dec!(5), Utc::now())).id();

        let mut reversal = draft(dec!(-5), Utc::now());
        reversal.transaction_type = TransactionType::ReversalOf(stray_id);
        let result = store.append(Commit {
            draft: reversal,
            expected_last: Some(receipt.id()),
            running_balance: dec!(5),
            consumption: Some(drawn_from(stray_id, dec!(5))),
        });
        assert!(matches!(result, Err(LedgerError::NotFound { .. })));
        assert_eq!(store.scan(&key(), None, None).len(), 1);
        assert_eq!(store.snapshot(&key()).balance(), dec!(10));
    }

    #[test]
    fn quantity_sign_must_match_transaction_type() {
        let store = InMemoryLedgerStore::new();
        let receipt = receive(&store, dec!(10), Utc::now());

        let mut sale = draft(dec!(3), Utc::now());
        sale.transaction_type = TransactionType::Sale;
        let result = store.append(Commit {
            draft: sale,
            expected_last: Some(receipt.id()),
            running_balance: dec!(13),
            consumption: None,
        });
        assert!(matches!(result, Err(LedgerError::Validation(_))));
        assert_eq!(store.snapshot(&key()).balance(), dec!(10));
    }

    #[test]
    fn reversal_must_move_stock_the_other_way() {
        let store = InMemoryLedgerStore::new();
        let receipt = receive(&store, dec!(10), Utc::now());

        let mut reversal = draft(dec!(10), Utc::now());
        reversal.transaction_type = TransactionType::ReversalOf(receipt.id());
        let result = store.append(Commit {
            draft: reversal,
            expected_last: Some(receipt.id()),
            running_balance: dec!(20),
            consumption: None,
        });
        assert!(matches!(result, Err(LedgerError::Validation(_))));
        assert!(store.reversal_of(receipt.id()).is_none());
    }

    #[test]
    fn created_at_never_goes_backwards() {
        let store = InMemoryLedgerStore::new();
        let now = Utc::now();
        receive(&store, dec!(1), now);
        let earlier = receive(&store, dec!(1), now - Duration::hours(1));
        assert_eq!(earlier.created_at(), now);
    }

    #[test]
    fn scan_bounds_are_inclusive() {
        let store = InMemoryLedgerStore::new();
        let start = Utc::now();
        for i in 0..5 {
            receive(&store, dec!(1), start + Duration::minutes(i));
        }
        let window = store.scan(
            &key(),
            Some(start + Duration::minutes(1)),
            Some(start + Duration::minutes(3)),
        );
        assert_eq!(window.len(), 3);
        assert_eq!(store.entries_since(&key(), start + Duration::minutes(4)).len(), 1);
        assert_eq!(store.history(&key(), start).len(), 1);
    }

    #[test]
    fn history_pages_resume_after_the_last_entry() {
        let store = InMemoryLedgerStore::new();
        let start = Utc::now();
        let ids: Vec<EntryId> = (0..5)
            .map(|i| receive(&store, dec!(1), start + Duration::minutes(i)).id())
            .collect();
        let until = start + Duration::minutes(3);

        let first = store.history_page(&key(), until, None, 3);
        assert_eq!(first.len(), 3);
        assert_eq!(first[0].entry.id(), ids[0]);
        let rest = store.history_page(&key(), until, Some(ids[2]), 3);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].entry.id(), ids[3]);
        assert!(store.history_page(&key(), until, Some(ids[3]), 3).is_empty());
        assert!(store.history_page(&key(), until, None, 0).is_empty());
    }

    #[test]
    fn unknown_key_reads_as_empty() {
        let store = InMemoryLedgerStore::new();
        assert!(store.last_entry(&key()).is_none());
        assert!(store.scan(&key(), None, None).is_empty());
        assert_eq!(store.snapshot(&key()).balance(), Decimal::ZERO);
        assert!(store.keys(TenantId(1)).is_empty());
    }
}
