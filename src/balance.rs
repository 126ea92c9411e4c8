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

//! Balance and movement-history queries.
//!
//! Reads never take a writer lock. Each call sees a committed prefix of the
//! key's ledger, possibly missing an append that is in flight.

use crate::base::{BranchId, DimensionKey, ProductId, TenantId};
use crate::catalog::Catalog;
use crate::entry::LedgerEntry;
use crate::error::LedgerError;
use crate::store::{InMemoryLedgerStore, LedgerStore};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;

/// A key at or below its product's reorder level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LowStock {
    pub key: DimensionKey,
    pub balance: Decimal,
    pub reorder_level: Decimal,
}

pub struct BalanceQueryService<S: LedgerStore = InMemoryLedgerStore> {
    store: Arc<S>,
    catalog: Arc<Catalog>,
}

impl<S: LedgerStore> Clone for BalanceQueryService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            catalog: Arc::clone(&self.catalog),
        }
    }
}

impl<S: LedgerStore> BalanceQueryService<S> {
    pub fn new(store: Arc<S>, catalog: Arc<Catalog>) -> Self {
        Self { store, catalog }
    }

    /// Running balance of the key's last entry, or zero.
    pub fn current_balance(&self, key: &DimensionKey) -> Decimal {
        self.store
            .last_entry(key)
            .map_or(Decimal::ZERO, |entry| entry.running_balance())
    }

    /// Running balance of the latest entry created at or before `at`.
    pub fn balance_as_of(&self, key: &DimensionKey, at: DateTime<Utc>) -> Decimal {
        self.store
            .last_entry_at(key, at)
            .map_or(Decimal::ZERO, |entry| entry.running_balance())
    }

    /// Entries of one key with `from <= created_at <= to`, in append order.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Validation`] if `from` is after `to`.
    pub fn movements(
        &self,
        key: &DimensionKey,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Arc<LedgerEntry>>, LedgerError> {
        check_range(from, to)?;
        Ok(self.store.scan(key, Some(from), Some(to)))
    }

    /// Every key of a product, narrowed to one branch when given.
    pub fn product_keys(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        branch_id: Option<BranchId>,
    ) -> Vec<DimensionKey> {
        self.store
            .keys(tenant_id)
            .into_iter()
            .filter(|key| key.product_id == product_id)
            .filter(|key| branch_id.is_none() || key.branch_id == branch_id)
            .collect()
    }

    /// Movements of all of a product's keys, merged in entry-id order.
    pub fn product_movements(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        branch_id: Option<BranchId>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Arc<LedgerEntry>>, LedgerError> {
        check_range(from, to)?;
        let mut entries: Vec<Arc<LedgerEntry>> = self
            .product_keys(tenant_id, product_id, branch_id)
            .iter()
            .flat_map(|key| self.store.scan(key, Some(from), Some(to)))
            .collect();
        entries.sort_by_key(|entry| entry.id());
        Ok(entries)
    }

    /// Keys whose balance is at or below the product's reorder level.
    ///
    /// Products without a reorder level are never reported.
    pub fn low_stock(&self, tenant_id: TenantId) -> Vec<LowStock> {
        self.store
            .keys(tenant_id)
            .into_iter()
            .filter_map(|key| {
                let reorder_level = self.catalog.reorder_level(tenant_id, key.product_id)?;
                let balance = self.current_balance(&key);
                (balance <= reorder_level).then_some(LowStock {
                    key,
                    balance,
                    reorder_level,
                })
            })
            .collect()
    }
}

fn check_range(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<(), LedgerError> {
    if from > to {
        return Err(LedgerError::validation(format!(
            "range start {from} is after range end {to}"
        )));
    }
    Ok(())
}
