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

//! Lot tracking.
//!
//! Every increase entry opens a [`Lot`]: a remaining-quantity cursor that
//! later decreases draw down. Lots live beside the ledger, never inside it;
//! drawing from a lot never touches the entry it came from.
//!
//! Lot lifecycle:
//!
//! ```text
//! increase entry ──open──► Lot (remaining = quantity) ──draw──► ... ──draw──► Lot (remaining = 0, closed)
//! ```
//!
//! A [`LotBook`] holds all lots of one dimension key together with the
//! running weighted-average accumulators.

use crate::base::{DimensionKey, LotId};
use crate::entry::{LedgerEntry, TransactionType};
use crate::error::LedgerError;
use crate::valuation::ValuationMethod;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

/// Snapshot of one lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lot {
    pub id: LotId,
    pub key: DimensionKey,
    pub unit_cost: Decimal,
    pub original_quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub created_at: DateTime<Utc>,
    pub expiry_date: Option<NaiveDate>,
    pub batch_number: Option<String>,
    pub serial_number: Option<String>,
    pub lot_number: Option<String>,
}

impl Lot {
    /// Opens a full lot for an increase entry.
    pub fn from_entry(entry: &LedgerEntry) -> Self {
        debug_assert!(entry.is_increase(), "lots are only opened by increases");
        let quantity = entry.quantity().abs();
        Self {
            id: entry.id(),
            key: *entry.key(),
            unit_cost: entry.unit_cost().unwrap_or(Decimal::ZERO),
            original_quantity: quantity,
            remaining_quantity: quantity,
            created_at: entry.created_at(),
            expiry_date: entry.expiry_date(),
            batch_number: entry.batch_number().map(str::to_owned),
            serial_number: entry.serial_number().map(str::to_owned),
            lot_number: entry.lot_number().map(str::to_owned),
        }
    }

    pub fn is_open(&self) -> bool {
        self.remaining_quantity > Decimal::ZERO
    }

    /// Value of the remaining quantity at the lot's cost.
    pub fn value(&self) -> Decimal {
        self.remaining_quantity * self.unit_cost
    }
}

/// Running weighted-average accumulators.
///
/// Updated once per increase and once per reversal of an increase; the
/// average is never recomputed by scanning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AverageCost {
    pub total_cost: Decimal,
    pub total_quantity: Decimal,
}

impl AverageCost {
    pub fn record(&mut self, quantity: Decimal, unit_cost: Decimal) {
        self.total_cost += quantity * unit_cost;
        self.total_quantity += quantity;
    }

    /// Takes a reversed increase back out of the totals.
    pub fn retract(&mut self, quantity: Decimal, cost: Decimal) {
        self.total_quantity -= quantity;
        self.total_cost -= cost;
        if self.total_quantity <= Decimal::ZERO {
            *self = Self::default();
        }
    }

    /// `total_cost / total_quantity`, or zero before the first increase.
    pub fn unit_cost(&self) -> Decimal {
        if self.total_quantity.is_zero() {
            Decimal::ZERO
        } else {
            self.total_cost / self.total_quantity
        }
    }
}

/// Quantity taken from one lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Allocation {
    pub lot_id: LotId,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
}

impl Allocation {
    pub fn cost(&self) -> Decimal {
        self.quantity * self.unit_cost
    }
}

/// Result of matching a decrease against lots.
///
/// Produced without touching the book; applied together with the ledger
/// append so both become visible at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Consumption {
    /// `None` when a specific lot was drawn (reversal of an increase).
    pub method: Option<ValuationMethod>,
    pub quantity: Decimal,
    pub consumed_cost: Decimal,
    pub allocations: Vec<Allocation>,
    /// Quantity not covered by any lot (backorder).
    pub uncovered: Decimal,
}

impl Consumption {
    /// Cost per unit of the consumed quantity.
    pub fn unit_cost(&self) -> Decimal {
        if self.quantity.is_zero() {
            Decimal::ZERO
        } else {
            self.consumed_cost / self.quantity
        }
    }
}

/// Traceability attributes carried over when stock re-enters a key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Provenance {
    pub expiry_date: Option<NaiveDate>,
    pub batch_number: Option<String>,
    pub lot_number: Option<String>,
}

/// All lots of one dimension key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LotBook {
    key: DimensionKey,
    /// In opening order.
    lots: Vec<Lot>,
    index: HashMap<LotId, usize>,
    average: AverageCost,
}

impl LotBook {
    pub fn new(key: DimensionKey) -> Self {
        Self {
            key,
            lots: Vec::new(),
            index: HashMap::new(),
            average: AverageCost::default(),
        }
    }

    pub fn key(&self) -> &DimensionKey {
        &self.key
    }

    pub fn lots(&self) -> &[Lot] {
        &self.lots
    }

    pub fn open_lots(&self) -> impl Iterator<Item = &Lot> {
        self.lots.iter().filter(|lot| lot.is_open())
    }

    pub fn lot(&self, id: LotId) -> Option<&Lot> {
        self.index.get(&id).map(|&i| &self.lots[i])
    }

    pub fn average(&self) -> &AverageCost {
        &self.average
    }

    /// Sum of remaining quantity over all lots.
    pub fn remaining(&self) -> Decimal {
        self.lots.iter().map(|lot| lot.remaining_quantity).sum()
    }

    /// Value of all open lots at their own cost.
    pub fn open_value(&self) -> Decimal {
        self.open_lots().map(Lot::value).sum()
    }

    /// Adds a lot and folds its cost into the weighted average.
    ///
    /// `settled` is the part of the quantity that immediately covers an
    /// outstanding backorder and so never becomes available.
    pub fn open(&mut self, lot: Lot, settled: Decimal) {
        self.average.record(lot.original_quantity, lot.unit_cost);
        self.insert(lot, settled);
    }

    /// Adds a lot that restores stock already counted in the average.
    pub fn reopen(&mut self, lot: Lot, settled: Decimal) {
        self.insert(lot, settled);
    }

    fn insert(&mut self, mut lot: Lot, settled: Decimal) {
        debug_assert!(self.lots.last().is_none_or(|last| last.id < lot.id));
        let settled = settled.max(Decimal::ZERO).min(lot.original_quantity);
        lot.remaining_quantity = lot.original_quantity - settled;
        self.index.insert(lot.id, self.lots.len());
        self.lots.push(lot);
    }

    /// Folds one posted entry into the book.
    ///
    /// `prior` is the key's balance before the entry. Reversing a decrease
    /// reopens stock without touching the average; reversing an increase
    /// takes the drawn cost back out of it.
    pub fn post(
        &mut self,
        entry: &LedgerEntry,
        consumption: Option<&Consumption>,
        prior: Decimal,
    ) -> Result<(), LedgerError> {
        let reversed = match entry.transaction_type() {
            TransactionType::ReversalOf(original) => Some(original),
            _ => None,
        };
        if entry.is_increase() {
            let settled = (-prior).max(Decimal::ZERO);
            let lot = Lot::from_entry(entry);
            match reversed {
                Some(_) => self.reopen(lot, settled),
                None => self.open(lot, settled),
            }
            return Ok(());
        }
        let Some(consumption) = consumption else {
            return Err(LedgerError::validation(format!(
                "decrease entry {} has no lot consumption",
                entry.id()
            )));
        };
        self.apply(consumption)?;
        if let Some(original) = reversed {
            if self.lot(original).is_some() {
                self.average
                    .retract(consumption.quantity, consumption.consumed_cost);
            }
        }
        Ok(())
    }

    /// Attributes of the lots a consumption drew from.
    ///
    /// The earliest expiry wins; batch and lot numbers are kept only when
    /// every drawn lot agrees on them.
    pub fn provenance(&self, consumption: &Consumption) -> Provenance {
        let drawn: Vec<&Lot> = consumption
            .allocations
            .iter()
            .filter_map(|allocation| self.lot(allocation.lot_id))
            .collect();
        fn common(mut values: impl Iterator<Item = Option<String>>) -> Option<String> {
            let first = values.next()??;
            values.all(|v| v.as_deref() == Some(first.as_str())).then_some(first)
        }
        Provenance {
            expiry_date: drawn.iter().filter_map(|lot| lot.expiry_date).min(),
            batch_number: common(drawn.iter().map(|lot| lot.batch_number.clone())),
            lot_number: common(drawn.iter().map(|lot| lot.lot_number.clone())),
        }
    }

    /// Plans drawing `quantity` from one specific lot.
    pub fn draw_from(&self, lot_id: LotId, quantity: Decimal) -> Result<Consumption, LedgerError> {
        let lot = self.lot(lot_id).ok_or(LedgerError::InsufficientStock {
            key: self.key,
            requested: quantity,
            available: Decimal::ZERO,
        })?;
        if lot.remaining_quantity < quantity {
            return Err(LedgerError::InsufficientStock {
                key: self.key,
                requested: quantity,
                available: lot.remaining_quantity,
            });
        }
        let allocation = Allocation {
            lot_id,
            quantity,
            unit_cost: lot.unit_cost,
        };
        Ok(Consumption {
            method: None,
            quantity,
            consumed_cost: allocation.cost(),
            allocations: vec![allocation],
            uncovered: Decimal::ZERO,
        })
    }

    /// Verifies every allocation fits the current remaining quantities.
    pub fn check(&self, consumption: &Consumption) -> Result<(), LedgerError> {
        let mut wanted: HashMap<LotId, Decimal> = HashMap::new();
        for allocation in &consumption.allocations {
            if allocation.quantity <= Decimal::ZERO {
                return Err(LedgerError::validation(format!(
                    "allocation against lot {} must be positive",
                    allocation.lot_id
                )));
            }
            *wanted.entry(allocation.lot_id).or_default() += allocation.quantity;
        }
        for (lot_id, quantity) in wanted {
            let available = self.lot(lot_id).map_or(Decimal::ZERO, |lot| lot.remaining_quantity);
            if available < quantity {
                return Err(LedgerError::InsufficientStock {
                    key: self.key,
                    requested: quantity,
                    available,
                });
            }
        }
        Ok(())
    }

    /// Draws the planned allocations. All or nothing.
    pub fn apply(&mut self, consumption: &Consumption) -> Result<(), LedgerError> {
        self.check(consumption)?;
        for allocation in &consumption.allocations {
            let i = self.index[&allocation.lot_id];
            self.lots[i].remaining_quantity -= allocation.quantity;
            debug_assert!(self.lots[i].remaining_quantity >= Decimal::ZERO);
        }
        Ok(())
    }
}
