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

//! Expiry queries over open lots.

use crate::base::{BranchId, LocationId, ProductId, TenantId};
use crate::clock::Clock;
use crate::error::LedgerError;
use crate::lot::Lot;
use crate::store::{InMemoryLedgerStore, LedgerStore};
use chrono::Days;
use std::sync::Arc;

/// Narrows an expiry query. Empty fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryFilter {
    pub product_id: Option<ProductId>,
    pub branch_id: Option<BranchId>,
    pub location_id: Option<LocationId>,
}

impl ExpiryFilter {
    pub fn branch(branch_id: BranchId) -> Self {
        Self {
            branch_id: Some(branch_id),
            ..Self::default()
        }
    }

    pub fn location(location_id: LocationId) -> Self {
        Self {
            location_id: Some(location_id),
            ..Self::default()
        }
    }

    fn matches(&self, lot: &Lot) -> bool {
        self.product_id.is_none_or(|id| lot.key.product_id == id)
            && self.branch_id.is_none_or(|id| lot.key.branch_id == Some(id))
            && self.location_id.is_none_or(|id| lot.key.location_id == Some(id))
    }
}

pub struct ExpiryTracker<S: LedgerStore = InMemoryLedgerStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: LedgerStore> ExpiryTracker<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Open lots expiring between today and today + `threshold_days`,
    /// inclusive, ordered by expiry date then lot id.
    ///
    /// Lots already past their expiry are not reported.
    pub fn expiring_lots(
        &self,
        tenant_id: TenantId,
        threshold_days: u32,
        filter: ExpiryFilter,
    ) -> Result<Vec<Lot>, LedgerError> {
        let today = self.clock.now().date_naive();
        let horizon = today
            .checked_add_days(Days::new(u64::from(threshold_days)))
            .ok_or_else(|| {
                LedgerError::validation(format!("threshold of {threshold_days} days is out of range"))
            })?;

        let mut lots: Vec<Lot> = self
            .store
            .keys(tenant_id)
            .iter()
            .flat_map(|key| {
                self.store
                    .snapshot(key)
                    .lots
                    .open_lots()
                    .filter(|lot| filter.matches(lot))
                    .filter(|lot| {
                        lot.expiry_date
                            .is_some_and(|expiry| today <= expiry && expiry <= horizon)
                    })
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        lots.sort_by_key(|lot| (lot.expiry_date, lot.id));
        Ok(lots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{DimensionKey, EntryId};
    use crate::clock::ManualClock;
    use crate::entry::{EntryDraft, Metadata, TransactionType};
    use crate::store::Commit;
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn receive(store: &InMemoryLedgerStore, location: u64, expiry: Option<NaiveDate>) -> EntryId {
        let key = DimensionKey::product(TenantId(1), ProductId(1)).with_location(LocationId(location));
        let snapshot = store.snapshot(&key);
        store
            .append(Commit {
                draft: EntryDraft {
                    key,
                    transaction_type: TransactionType::Purchase,
                    quantity: dec!(5),
                    unit_cost: Some(dec!(1)),
                    total_cost: Some(dec!(5)),
                    batch_number: None,
                    serial_number: None,
                    lot_number: None,
                    expiry_date: expiry,
                    reference: None,
                    created_at: Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap(),
                    created_by: None,
                    metadata: Metadata::new(),
                },
                expected_last: snapshot.last_id(),
                running_balance: snapshot.balance() + dec!(5),
                consumption: None,
            })
            .unwrap()
            .id()
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, day).unwrap()
    }

    #[test]
    fn window_is_inclusive_and_sorted() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 10, 15, 0, 0).unwrap(),
        ));
        let late = receive(&store, 1, Some(date(20)));
        let today = receive(&store, 2, Some(date(10)));
        receive(&store, 1, Some(date(9)));
        receive(&store, 1, Some(date(21)));
        receive(&store, 1, None);

        let tracker = ExpiryTracker::new(store, clock);
        let lots = tracker
            .expiring_lots(TenantId(1), 10, ExpiryFilter::default())
            .unwrap();
        let ids: Vec<EntryId> = lots.iter().map(|lot| lot.id).collect();
        assert_eq!(ids, vec![today, late]);
        assert!(lots.iter().all(|lot| lot.remaining_quantity > Decimal::ZERO));

        let filtered = tracker
            .expiring_lots(TenantId(1), 10, ExpiryFilter::location(LocationId(2)))
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, today);
    }

    #[test]
    fn other_tenants_are_invisible() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap(),
        ));
        receive(&store, 1, Some(date(2)));
        let tracker = ExpiryTracker::new(store, clock);
        assert!(
            tracker
                .expiring_lots(TenantId(2), 30, ExpiryFilter::default())
                .unwrap()
                .is_empty()
        );
    }
}
