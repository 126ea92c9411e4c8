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

//! Global entry index.
//!
//! Every appended entry is registered here under its id. An id can be
//! registered exactly once; a second registration is an attempt to
//! overwrite history and is refused.

use crate::base::EntryId;
use crate::entry::LedgerEntry;
use crate::error::LedgerError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe id sequence plus id -> entry index.
///
/// Uses a [`DashMap`] entry for atomic check-and-insert, so two writers can
/// never both claim the same id.
#[derive(Debug)]
pub(crate) struct EntryJournal {
    entries: DashMap<EntryId, Arc<LedgerEntry>>,
    sequence: AtomicU64,
}

impl EntryJournal {
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Reserves the next entry id. Ids start at 1 and never repeat.
    pub(crate) fn next_id(&self) -> EntryId {
        EntryId(self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Registers an entry.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::ImmutabilityViolation`] if an entry with the
    /// same id already exists; the stored entry is left untouched.
    pub(crate) fn push(&self, entry: Arc<LedgerEntry>) -> Result<(), LedgerError> {
        let entry_id = entry.id();
        match self.entries.entry(entry_id) {
            Entry::Occupied(_) => Err(LedgerError::ImmutabilityViolation { entry_id }),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    pub(crate) fn get(&self, id: EntryId) -> Option<Arc<LedgerEntry>> {
        self.entries.get(&id).map(|entry| Arc::clone(entry.value()))
    }
}

impl Default for EntryJournal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{DimensionKey, ProductId, TenantId};
    use crate::entry::{EntryDraft, Metadata, TransactionType};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn entry(id: EntryId, quantity: rust_decimal::Decimal) -> Arc<LedgerEntry> {
        let draft = EntryDraft {
            key: DimensionKey::product(TenantId(1), ProductId(1)),
            transaction_type: TransactionType::Purchase,
            quantity,
            unit_cost: Some(dec!(1)),
            total_cost: Some(quantity),
            batch_number: None,
            serial_number: None,
            lot_number: None,
            expiry_date: None,
            reference: None,
            created_at: Utc::now(),
            created_by: None,
            metadata: Metadata::new(),
        };
        Arc::new(LedgerEntry::seal(id, quantity, draft))
    }

    #[test]
    fn ids_are_monotonic() {
        let journal = EntryJournal::new();
        let first = journal.next_id();
        let second = journal.next_id();
        assert_eq!(first, EntryId(1));
        assert!(second > first);
    }

    #[test]
    fn re_registering_an_id_is_an_immutability_violation() {
        let journal = EntryJournal::new();
        let id = journal.next_id();
        journal.push(entry(id, dec!(5))).unwrap();

        let result = journal.push(entry(id, dec!(500)));
        assert_eq!(result, Err(LedgerError::ImmutabilityViolation { entry_id: id }));
        assert_eq!(journal.get(id).unwrap().quantity(), dec!(5));
    }
}
