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

//! Inventory engine.
//!
//! The [`InventoryEngine`] is the application-facing entry point. It wires
//! the store, catalog, clock and event outbox into the recorder and query
//! services and exposes the inventory operations:
//!
//! - **Movements**: `stock_in`, `stock_out`, `stock_adjustment` and
//!   `stock_transfer`, plus `reverse_entry` for corrections.
//! - **Balances**: current and point-in-time balance, movement history.
//! - **Valuation**: current value per product, historical value per key.
//! - **Expiry and low stock** reports.
//!
//! # Thread Safety
//!
//! The engine is `Sync`; share it behind an `Arc`. Movements on different
//! dimension keys run fully in parallel. Movements on the same key are
//! linearized by the recorder.

use crate::balance::{BalanceQueryService, LowStock};
use crate::base::{
    BranchId, DimensionKey, EntryId, LocationId, ProductId, TenantId, TransferId, UserId,
    VariantId,
};
use crate::catalog::Catalog;
use crate::clock::{Clock, SystemClock};
use crate::config::LedgerConfig;
use crate::entry::LedgerEntry;
use crate::error::LedgerError;
use crate::events::EventOutbox;
use crate::expiry::{ExpiryFilter, ExpiryTracker};
use crate::lot::Lot;
use crate::movement::{MovementType, StockMovementRequest, TransferRequest};
use crate::recorder::{MovementOutcome, MovementRecorder};
use crate::store::{InMemoryLedgerStore, LedgerStore};
use crate::transfer::{TransferCoordinator, TransferRecord};
use crate::valuation::{Cancellation, ValuationEngine, ValuationMethod};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;

/// What [`InventoryEngine::record`] produced.
#[derive(Debug, Clone)]
pub enum Recorded {
    Movement(MovementOutcome),
    Transfer(TransferRecord),
}

/// Aggregate value of a product across its dimension keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProductValuation {
    pub method: ValuationMethod,
    pub quantity: Decimal,
    pub value: Decimal,
}

pub struct InventoryEngine<S: LedgerStore = InMemoryLedgerStore> {
    store: Arc<S>,
    catalog: Arc<Catalog>,
    outbox: Arc<EventOutbox>,
    config: LedgerConfig,
    recorder: Arc<MovementRecorder<S>>,
    balances: BalanceQueryService<S>,
    valuation: ValuationEngine<S>,
    expiry: ExpiryTracker<S>,
    transfers: TransferCoordinator<S>,
}

impl InventoryEngine {
    /// Creates an engine over a fresh in-memory store and an empty catalog.
    pub fn new(config: LedgerConfig) -> Self {
        Self::with_parts(
            Arc::new(InMemoryLedgerStore::new()),
            Arc::new(Catalog::new()),
            Arc::new(SystemClock),
            config,
        )
    }
}

impl Default for InventoryEngine {
    fn default() -> Self {
        Self::new(LedgerConfig::default())
    }
}

impl<S: LedgerStore> InventoryEngine<S> {
    pub fn with_parts(
        store: Arc<S>,
        catalog: Arc<Catalog>,
        clock: Arc<dyn Clock>,
        config: LedgerConfig,
    ) -> Self {
        let outbox = Arc::new(EventOutbox::new());
        let recorder = Arc::new(MovementRecorder::new(
            Arc::clone(&store),
            Arc::clone(&catalog),
            Arc::clone(&clock),
            Arc::clone(&outbox),
            config.clone(),
        ));
        let balances = BalanceQueryService::new(Arc::clone(&store), Arc::clone(&catalog));
        let valuation =
            ValuationEngine::new(Arc::clone(&store), config.cancellation_check_interval);
        let expiry = ExpiryTracker::new(Arc::clone(&store), Arc::clone(&clock));
        let transfers = TransferCoordinator::new(
            Arc::clone(&recorder),
            balances.clone(),
            Arc::clone(&catalog),
            clock,
        );
        Self {
            store,
            catalog,
            outbox,
            config,
            recorder,
            balances,
            valuation,
            expiry,
            transfers,
        }
    }

    pub fn stock_in(&self, request: StockMovementRequest) -> Result<MovementOutcome, LedgerError> {
        self.recorder.record_movement(StockMovementRequest {
            movement_type: MovementType::In,
            ..request
        })
    }

    pub fn stock_out(&self, request: StockMovementRequest) -> Result<MovementOutcome, LedgerError> {
        self.recorder.record_movement(StockMovementRequest {
            movement_type: MovementType::Out,
            ..request
        })
    }

    /// Records a signed adjustment: positive adds stock, negative removes it.
    pub fn stock_adjustment(
        &self,
        request: StockMovementRequest,
    ) -> Result<MovementOutcome, LedgerError> {
        self.recorder.record_movement(StockMovementRequest {
            movement_type: MovementType::Adjustment,
            ..request
        })
    }

    /// Moves stock between two locations. See [`TransferCoordinator::initiate`].
    pub fn stock_transfer(&self, request: TransferRequest) -> Result<TransferRecord, LedgerError> {
        self.transfers.initiate(request)
    }

    /// Dispatches a request on its movement type.
    pub fn record(&self, request: StockMovementRequest) -> Result<Recorded, LedgerError> {
        match request.movement_type {
            MovementType::Transfer => {
                let transfer = TransferRequest::try_from(request)?;
                self.stock_transfer(transfer).map(Recorded::Transfer)
            }
            MovementType::In | MovementType::Out | MovementType::Adjustment => self
                .recorder
                .record_movement(request)
                .map(Recorded::Movement),
        }
    }

    /// Appends an entry undoing `entry_id`.
    pub fn reverse_entry(
        &self,
        tenant_id: TenantId,
        entry_id: EntryId,
        created_by: Option<UserId>,
    ) -> Result<MovementOutcome, LedgerError> {
        self.recorder.reverse(tenant_id, entry_id, created_by)
    }

    /// Balance of exactly the key built from the given dimensions.
    pub fn get_current_balance(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        branch_id: Option<BranchId>,
        location_id: Option<LocationId>,
        variant_id: Option<VariantId>,
    ) -> Decimal {
        let key = DimensionKey {
            tenant_id,
            product_id,
            variant_id,
            branch_id,
            location_id,
        };
        self.balances.current_balance(&key)
    }

    pub fn balance_as_of(&self, key: &DimensionKey, at: DateTime<Utc>) -> Decimal {
        self.balances.balance_as_of(key, at)
    }

    pub fn get_movements(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        branch_id: Option<BranchId>,
    ) -> Result<Vec<Arc<LedgerEntry>>, LedgerError> {
        self.balances
            .product_movements(tenant_id, product_id, branch_id, start, end)
    }

    pub fn get_expiring_items(
        &self,
        tenant_id: TenantId,
        days_threshold: u32,
        branch_id: Option<BranchId>,
    ) -> Result<Vec<Lot>, LedgerError> {
        let filter = ExpiryFilter {
            branch_id,
            ..ExpiryFilter::default()
        };
        self.expiry.expiring_lots(tenant_id, days_threshold, filter)
    }

    /// Current quantity and value of a product, summed over its keys.
    pub fn calculate_valuation(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        method: ValuationMethod,
        branch_id: Option<BranchId>,
    ) -> ProductValuation {
        self.balances
            .product_keys(tenant_id, product_id, branch_id)
            .iter()
            .fold(
                ProductValuation {
                    method,
                    quantity: Decimal::ZERO,
                    value: Decimal::ZERO,
                },
                |mut total, key| {
                    total.quantity += self.balances.current_balance(key);
                    total.value += self.valuation.current_value(key, method);
                    total
                },
            )
    }

    /// Value of one key as of `as_of`, replayed from history.
    pub fn valuation_as_of(
        &self,
        key: &DimensionKey,
        method: ValuationMethod,
        as_of: DateTime<Utc>,
        cancel: &Cancellation,
    ) -> Result<Decimal, LedgerError> {
        self.valuation.valuation_as_of(key, method, as_of, cancel)
    }

    pub fn low_stock(&self, tenant_id: TenantId) -> Vec<LowStock> {
        self.balances.low_stock(tenant_id)
    }

    pub fn transfer_status(
        &self,
        tenant_id: TenantId,
        transfer_id: TransferId,
    ) -> Result<TransferRecord, LedgerError> {
        self.transfers.status(tenant_id, transfer_id)
    }

    pub fn resume_transfer_compensation(
        &self,
        tenant_id: TenantId,
        transfer_id: TransferId,
    ) -> Result<TransferRecord, LedgerError> {
        self.transfers.resume_compensation(tenant_id, transfer_id)
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Facts published by committed movements, awaiting delivery.
    pub fn events(&self) -> &EventOutbox {
        &self.outbox
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn balances(&self) -> &BalanceQueryService<S> {
        &self.balances
    }

    pub fn valuation(&self) -> &ValuationEngine<S> {
        &self.valuation
    }

    pub fn transfers(&self) -> &TransferCoordinator<S> {
        &self.transfers
    }
}
