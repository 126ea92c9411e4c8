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

//! Facts emitted for the outside world.
//!
//! The ledger only produces [`StockMovementRecorded`] facts; delivering
//! them (notifications, analytics) belongs to whoever drains the
//! [`EventOutbox`].

use crate::base::{BranchId, EntryId, LocationId, ProductId, TenantId, UserId, VariantId};
use crate::entry::{LedgerEntry, TransactionType};
use crate::movement::MovementType;
use chrono::{DateTime, Utc};
use crossbeam::queue::SegQueue;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Emitted once per committed ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovementRecorded {
    pub entry_id: EntryId,
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub branch_id: Option<BranchId>,
    pub location_id: Option<LocationId>,
    pub movement_type: MovementType,
    pub transaction_type: TransactionType,
    pub quantity: Decimal,
    pub balance_after: Decimal,
    pub user_id: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

impl From<&LedgerEntry> for StockMovementRecorded {
    fn from(entry: &LedgerEntry) -> Self {
        let key = entry.key();
        Self {
            entry_id: entry.id(),
            tenant_id: key.tenant_id,
            product_id: key.product_id,
            variant_id: key.variant_id,
            branch_id: key.branch_id,
            location_id: key.location_id,
            movement_type: MovementType::of(entry.transaction_type(), entry.quantity()),
            transaction_type: entry.transaction_type(),
            quantity: entry.quantity(),
            balance_after: entry.running_balance(),
            user_id: entry.created_by(),
            occurred_at: entry.created_at(),
        }
    }
}

/// Lock-free queue of facts waiting to be delivered.
#[derive(Debug, Default)]
pub struct EventOutbox {
    events: SegQueue<StockMovementRecorded>,
}

impl EventOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, event: StockMovementRecorded) {
        self.events.push(event);
    }

    /// Removes and returns everything queued so far, oldest first.
    pub fn drain(&self) -> Vec<StockMovementRecorded> {
        std::iter::from_fn(|| self.events.pop()).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
