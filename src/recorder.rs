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

//! Movement recording.
//!
//! The [`MovementRecorder`] is the only writer of ledger entries. For each
//! movement it:
//!
//! 1. validates the request (no side effects on failure),
//! 2. takes the dimension key's writer lock,
//! 3. reads the key's last entry and lot book,
//! 4. computes the new running balance and, for decreases, the lot draws,
//! 5. appends entry and lot draws as one commit,
//! 6. publishes a [`StockMovementRecorded`] fact.
//!
//! # Thread Safety
//!
//! Writers to the same key are serialized by a per-key mutex; writers to
//! different keys share nothing. The store's optimistic check backs this up
//! against writers that bypass the lock (another recorder over the same
//! store): a stale read becomes a `ConcurrencyConflict`, retried with
//! jittered exponential backoff up to `max_append_retries` times.

use crate::base::{DimensionKey, EntryId, LotId, TenantId, UserId};
use crate::catalog::Catalog;
use crate::clock::Clock;
use crate::config::LedgerConfig;
use crate::entry::{EntryDraft, LedgerEntry, Metadata, Reference, ReferenceType, TransactionType};
use crate::error::{LedgerError, Resource};
use crate::events::{EventOutbox, StockMovementRecorded};
use crate::lot::Consumption;
use crate::movement::{MovementType, StockMovementRequest};
use crate::store::{Commit, InMemoryLedgerStore, LedgerStore};
use crate::valuation::{ValuationEngine, ValuationMethod};
use chrono::NaiveDate;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Where a decrease takes its lots from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Draw {
    ByMethod(ValuationMethod),
    FromLot(LotId),
}

/// A fully resolved movement ready to append.
#[derive(Debug, Clone)]
pub(crate) struct Posting {
    pub key: DimensionKey,
    pub transaction_type: TransactionType,
    /// Signed, never zero.
    pub quantity: Decimal,
    /// Increases only; `None` means "current weighted average".
    pub unit_cost: Option<Decimal>,
    pub batch_number: Option<String>,
    pub serial_number: Option<String>,
    pub lot_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub reference: Option<Reference>,
    pub created_by: Option<UserId>,
    pub metadata: Metadata,
    pub draw: Draw,
}

impl Posting {
    pub fn new(
        key: DimensionKey,
        transaction_type: TransactionType,
        quantity: Decimal,
        method: ValuationMethod,
    ) -> Self {
        Self {
            key,
            transaction_type,
            quantity,
            unit_cost: None,
            batch_number: None,
            serial_number: None,
            lot_number: None,
            expiry_date: None,
            reference: None,
            created_by: None,
            metadata: Metadata::new(),
            draw: Draw::ByMethod(method),
        }
    }
}

/// A committed entry and, for decreases, the lots it drew.
#[derive(Debug, Clone)]
pub struct MovementOutcome {
    pub entry: Arc<LedgerEntry>,
    pub consumption: Option<Consumption>,
}

impl MovementOutcome {
    pub fn balance(&self) -> Decimal {
        self.entry.running_balance()
    }

    /// Cost of goods taken out; zero for increases.
    pub fn consumed_cost(&self) -> Decimal {
        self.consumption
            .as_ref()
            .map_or(Decimal::ZERO, |consumption| consumption.consumed_cost)
    }
}

pub struct MovementRecorder<S: LedgerStore = InMemoryLedgerStore> {
    store: Arc<S>,
    catalog: Arc<Catalog>,
    clock: Arc<dyn Clock>,
    outbox: Arc<EventOutbox>,
    valuation: ValuationEngine<S>,
    config: LedgerConfig,
    /// Writer lock per dimension key.
    locks: DashMap<DimensionKey, Arc<Mutex<()>>>,
}

impl<S: LedgerStore> MovementRecorder<S> {
    pub fn new(
        store: Arc<S>,
        catalog: Arc<Catalog>,
        clock: Arc<dyn Clock>,
        outbox: Arc<EventOutbox>,
        config: LedgerConfig,
    ) -> Self {
        let valuation = ValuationEngine::new(Arc::clone(&store), config.cancellation_check_interval);
        Self {
            store,
            catalog,
            clock,
            outbox,
            valuation,
            config,
            locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub(crate) fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Validates and records an `in`, `out` or `adjustment` movement.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Validation`] - malformed request or a `transfer`.
    /// - [`LedgerError::NotFound`] - unknown product, variant or location.
    /// - [`LedgerError::InsufficientStock`] - decrease below zero without backorders.
    /// - [`LedgerError::ConcurrencyConflict`] - retries exhausted.
    pub fn record_movement(
        &self,
        request: StockMovementRequest,
    ) -> Result<MovementOutcome, LedgerError> {
        request.validate()?;
        if request.movement_type == MovementType::Transfer {
            return Err(LedgerError::validation(
                "transfers are recorded through the transfer coordinator",
            ));
        }
        let (transaction_type, quantity) = request.resolve()?;
        let key = request.key();
        self.catalog.ensure_key(&key)?;

        let method = request
            .valuation_method
            .unwrap_or(self.config.default_valuation);
        let mut posting = Posting::new(key, transaction_type, quantity, method);
        posting.unit_cost = request.unit_cost;
        posting.batch_number = request.batch_number;
        posting.serial_number = request.serial_number;
        posting.lot_number = request.lot_number;
        posting.expiry_date = request.expiry_date;
        posting.reference = request.reference;
        posting.created_by = request.created_by;
        posting.metadata = request.metadata;

        self.post(posting)
    }

    /// Appends a `ReversalOf(entry_id)` entry that undoes `entry_id`.
    ///
    /// Reversing an increase draws from the lot that increase opened;
    /// reversing a decrease reopens stock at the cost it left with.
    pub fn reverse(
        &self,
        tenant_id: TenantId,
        entry_id: EntryId,
        created_by: Option<UserId>,
    ) -> Result<MovementOutcome, LedgerError> {
        let reference = Reference::new(ReferenceType::Reversal, entry_id.to_string());
        self.reverse_entry(tenant_id, entry_id, created_by, reference, false)
    }

    pub(crate) fn reverse_entry(
        &self,
        tenant_id: TenantId,
        entry_id: EntryId,
        created_by: Option<UserId>,
        reference: Reference,
        allow_transfer_leg: bool,
    ) -> Result<MovementOutcome, LedgerError> {
        let original = self
            .store
            .entry(entry_id)
            .filter(|entry| entry.key().tenant_id == tenant_id)
            .ok_or(LedgerError::not_found(tenant_id, Resource::Entry, entry_id.0))?;
        // The entry must be part of its key's chain, not just indexed.
        let at = original.created_at();
        if !self
            .store
            .scan(original.key(), Some(at), Some(at))
            .iter()
            .any(|entry| entry.id() == entry_id)
        {
            return Err(LedgerError::not_found(tenant_id, Resource::Entry, entry_id.0));
        }
        let transaction_type = original.transaction_type();
        if transaction_type.reversed_entry().is_some() {
            return Err(LedgerError::validation(format!(
                "entry {entry_id} is itself a reversal"
            )));
        }
        if transaction_type.is_transfer_leg() && !allow_transfer_leg {
            return Err(LedgerError::validation(format!(
                "entry {entry_id} is a transfer leg; transfers are compensated by their coordinator"
            )));
        }
        if let Some(reversal) = self.store.reversal_of(entry_id) {
            return Err(LedgerError::validation(format!(
                "entry {entry_id} is already reversed by entry {reversal}"
            )));
        }

        let mut posting = Posting::new(
            *original.key(),
            TransactionType::ReversalOf(entry_id),
            -original.quantity(),
            self.config.default_valuation,
        );
        posting.reference = Some(reference);
        posting.created_by = created_by;
        if original.is_increase() {
            posting.draw = Draw::FromLot(entry_id);
        } else if let Some(consumption) = self.store.consumption(entry_id) {
            let provenance = self.store.snapshot(original.key()).lots.provenance(&consumption);
            posting.unit_cost = Some(consumption.unit_cost());
            posting.expiry_date = provenance.expiry_date;
            posting.batch_number = provenance.batch_number;
            posting.lot_number = provenance.lot_number;
        }

        self.post(posting)
    }

    fn key_lock(&self, key: &DimensionKey) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(*key).or_default().value())
    }

    /// Appends a resolved posting under the key's writer lock, retrying
    /// stale reads.
    pub(crate) fn post(&self, posting: Posting) -> Result<MovementOutcome, LedgerError> {
        let lock = self.key_lock(&posting.key);
        let _guard = lock.lock();

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.try_post(&posting) {
                Err(LedgerError::ConcurrencyConflict {
                    key,
                    expected,
                    actual,
                    ..
                }) => {
                    if attempts > self.config.max_append_retries {
                        tracing::warn!(%key, attempts, "append retries exhausted");
                        return Err(LedgerError::ConcurrencyConflict {
                            key,
                            expected,
                            actual,
                            attempts,
                        });
                    }
                    let delay = self.backoff(attempts);
                    tracing::warn!(%key, attempts, ?delay, "append conflict, retrying");
                    thread::sleep(delay);
                }
                Err(error) => {
                    tracing::debug!(key = %posting.key, %error, "movement rejected");
                    return Err(error);
                }
                Ok(outcome) => return Ok(outcome),
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0..=self.config.retry_base_delay_ms);
        self.config.retry_delay(attempt) + Duration::from_millis(jitter)
    }

    fn try_post(&self, posting: &Posting) -> Result<MovementOutcome, LedgerError> {
        let key = posting.key;
        let snapshot = self.store.snapshot(&key);
        let prior = snapshot.balance();
        let balance = prior + posting.quantity;

        let (unit_cost, total_cost, consumption) = if posting.quantity > Decimal::ZERO {
            let unit_cost = posting
                .unit_cost
                .unwrap_or_else(|| snapshot.lots.average().unit_cost());
            (Some(unit_cost), Some(unit_cost * posting.quantity), None)
        } else {
            let quantity = posting.quantity.abs();
            let consumption = match posting.draw {
                Draw::FromLot(lot_id) => snapshot.lots.draw_from(lot_id, quantity)?,
                Draw::ByMethod(method) => {
                    if balance < Decimal::ZERO && !self.config.allow_backorders {
                        return Err(LedgerError::InsufficientStock {
                            key,
                            requested: quantity,
                            available: prior.max(Decimal::ZERO),
                        });
                    }
                    self.valuation.consume(
                        &snapshot.lots,
                        quantity,
                        method,
                        self.config.allow_backorders,
                    )?
                }
            };
            (None, None, Some(consumption))
        };

        let draft = EntryDraft {
            key,
            transaction_type: posting.transaction_type,
            quantity: posting.quantity,
            unit_cost,
            total_cost,
            batch_number: posting.batch_number.clone(),
            serial_number: posting.serial_number.clone(),
            lot_number: posting.lot_number.clone(),
            expiry_date: posting.expiry_date,
            reference: posting.reference.clone(),
            created_at: self.clock.now(),
            created_by: posting.created_by,
            metadata: posting.metadata.clone(),
        };

        let entry = self.store.append(Commit {
            draft,
            expected_last: snapshot.last_id(),
            running_balance: balance,
            consumption: consumption.clone(),
        })?;

        tracing::info!(
            %key,
            entry_id = %entry.id(),
            transaction_type = %entry.transaction_type(),
            quantity = %entry.quantity(),
            balance = %entry.running_balance(),
            "stock movement recorded"
        );
        self.outbox.publish(StockMovementRecorded::from(entry.as_ref()));

        Ok(MovementOutcome { entry, consumption })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{LocationId, ProductId};
    use crate::clock::SystemClock;
    use rust_decimal_macros::dec;

    fn recorder(config: LedgerConfig) -> MovementRecorder {
        let catalog = Arc::new(Catalog::new());
        catalog.register_product(TenantId(1), ProductId(1));
        catalog.register_location(TenantId(1), LocationId(1), None);
        MovementRecorder::new(
            Arc::new(InMemoryLedgerStore::new()),
            catalog,
            Arc::new(SystemClock),
            Arc::new(EventOutbox::new()),
            config,
        )
    }

    fn stock_in(quantity: Decimal, cost: Decimal) -> StockMovementRequest {
        StockMovementRequest::stock_in(TenantId(1), ProductId(1), quantity)
            .at_location(LocationId(1))
            .with_unit_cost(cost)
    }

    fn stock_out(quantity: Decimal) -> StockMovementRequest {
        StockMovementRequest::stock_out(TenantId(1), ProductId(1), quantity)
            .at_location(LocationId(1))
    }

    #[test]
    fn increase_without_cost_uses_weighted_average() {
        let recorder = recorder(LedgerConfig::default());
        recorder.record_movement(stock_in(dec!(10), dec!(4))).unwrap();
        let request = StockMovementRequest::stock_in(TenantId(1), ProductId(1), dec!(10))
            .at_location(LocationId(1));
        let outcome = recorder.record_movement(request).unwrap();
        assert_eq!(outcome.entry.unit_cost(), Some(dec!(4)));
        assert_eq!(outcome.entry.total_cost(), Some(dec!(40)));
    }

    #[test]
    fn decrease_entry_fields_are_not_touched_by_lot_bookkeeping() {
        let recorder = recorder(LedgerConfig::default());
        recorder.record_movement(stock_in(dec!(10), dec!(4))).unwrap();
        let outcome = recorder.record_movement(stock_out(dec!(3))).unwrap();
        assert_eq!(outcome.entry.quantity(), dec!(-3));
        assert_eq!(outcome.entry.unit_cost(), None);
        assert_eq!(outcome.consumed_cost(), dec!(12));
    }

    #[test]
    fn backorders_allow_negative_balance_and_settle_on_next_receipt() {
        let recorder = recorder(LedgerConfig::default().with_backorders(true));
        recorder.record_movement(stock_in(dec!(2), dec!(5))).unwrap();
        let outcome = recorder.record_movement(stock_out(dec!(5))).unwrap();
        assert_eq!(outcome.balance(), dec!(-3));
        let consumption = outcome.consumption.unwrap();
        assert_eq!(consumption.uncovered, dec!(3));
        assert_eq!(consumption.consumed_cost, dec!(25));

        let receipt = recorder.record_movement(stock_in(dec!(10), dec!(6))).unwrap();
        assert_eq!(receipt.balance(), dec!(7));
        let lots = recorder.store.snapshot(receipt.entry.key()).lots;
        assert_eq!(lots.remaining(), dec!(7));
    }

    #[test]
    fn transfer_movements_are_refused() {
        let recorder = recorder(LedgerConfig::default());
        let request = StockMovementRequest::transfer(
            TenantId(1),
            ProductId(1),
            LocationId(1),
            LocationId(2),
            dec!(1),
        );
        assert!(matches!(
            recorder.record_movement(request),
            Err(LedgerError::Validation(_))
        ));
    }

    #[test]
    fn entries_outside_their_key_chain_cannot_be_reversed() {
        let recorder = recorder(LedgerConfig::default());
        recorder.record_movement(stock_in(dec!(10), dec!(4))).unwrap();
        let key = DimensionKey::product(TenantId(1), ProductId(1)).with_location(LocationId(1));
        let stray = recorder.store.register_detached(EntryDraft {
            key,
            transaction_type: TransactionType::Purchase,
            quantity: dec!(500),
            unit_cost: Some(dec!(4)),
            total_cost: Some(dec!(2000)),
            batch_number: None,
            serial_number: None,
            lot_number: None,
            expiry_date: None,
            reference: None,
            created_at: chrono::Utc::now(),
            created_by: None,
            metadata: Metadata::new(),
        });

        let result = recorder.reverse(TenantId(1), stray.id(), None);
        assert!(matches!(result, Err(LedgerError::NotFound { .. })));
        assert!(recorder.store.reversal_of(stray.id()).is_none());
        assert_eq!(recorder.store.snapshot(&key).balance(), dec!(10));
    }
}
