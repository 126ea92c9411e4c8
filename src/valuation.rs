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

//! Cost valuation.
//!
//! Each [`ValuationMethod`] dispatches to a [`ValuationStrategy`] with the
//! same two operations: plan a consumption against a [`LotBook`] and value
//! what the book still holds.
//!
//! | Method | Lot order on consumption | Consumed cost |
//! |--------|--------------------------|---------------|
//! | FIFO | `created_at` ascending | sum of drawn lots |
//! | LIFO | `created_at` descending | sum of drawn lots |
//! | Average | `created_at` ascending (quantity only) | quantity x weighted average |
//!
//! Lots do not belong to a method. Switching methods only changes how
//! future consumptions are costed; recorded consumptions are never redone.

use crate::base::DimensionKey;
use crate::error::LedgerError;
use crate::lot::{Allocation, Consumption, Lot, LotBook};
use crate::store::{InMemoryLedgerStore, LedgerStore};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValuationMethod {
    /// First in, first out.
    #[default]
    Fifo,
    /// Last in, first out.
    Lifo,
    /// Weighted average cost.
    Average,
}

impl ValuationMethod {
    pub fn strategy(self) -> &'static dyn ValuationStrategy {
        match self {
            Self::Fifo => &Fifo,
            Self::Lifo => &Lifo,
            Self::Average => &WeightedAverage,
        }
    }
}

impl FromStr for ValuationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fifo" => Ok(Self::Fifo),
            "lifo" => Ok(Self::Lifo),
            "average" | "avg" | "weighted_average" => Ok(Self::Average),
            _ => Err(format!("unknown valuation method: {s}")),
        }
    }
}

impl fmt::Display for ValuationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fifo => f.write_str("fifo"),
            Self::Lifo => f.write_str("lifo"),
            Self::Average => f.write_str("average"),
        }
    }
}

pub trait ValuationStrategy: Send + Sync {
    fn method(&self) -> ValuationMethod;

    /// Plans taking `quantity` out of `book` without mutating it.
    ///
    /// With `allow_shortfall` the lots are drained and the rest is reported
    /// as `uncovered` (costed at the weighted average); otherwise a
    /// shortfall is [`LedgerError::InsufficientStock`].
    fn consume(
        &self,
        book: &LotBook,
        quantity: Decimal,
        allow_shortfall: bool,
    ) -> Result<Consumption, LedgerError>;

    /// Value of the stock `book` still holds, given the key's balance.
    fn value(&self, book: &LotBook, balance: Decimal) -> Decimal;
}

/// Walks `lots` in the given order taking as much as needed.
fn draw_in_order<'a>(
    book: &LotBook,
    lots: impl Iterator<Item = &'a Lot>,
    quantity: Decimal,
    allow_shortfall: bool,
) -> Result<(Vec<Allocation>, Decimal), LedgerError> {
    let mut outstanding = quantity;
    let mut allocations = Vec::new();
    for lot in lots {
        if outstanding.is_zero() {
            break;
        }
        let take = lot.remaining_quantity.min(outstanding);
        allocations.push(Allocation {
            lot_id: lot.id,
            quantity: take,
            unit_cost: lot.unit_cost,
        });
        outstanding -= take;
    }
    if outstanding > Decimal::ZERO && !allow_shortfall {
        return Err(LedgerError::InsufficientStock {
            key: *book.key(),
            requested: quantity,
            available: quantity - outstanding,
        });
    }
    Ok((allocations, outstanding))
}

fn oldest_first(book: &LotBook) -> Vec<&Lot> {
    let mut lots: Vec<&Lot> = book.open_lots().collect();
    lots.sort_by_key(|lot| (lot.created_at, lot.id));
    lots
}

fn lot_costed(
    method: ValuationMethod,
    book: &LotBook,
    lots: Vec<&Lot>,
    quantity: Decimal,
    allow_shortfall: bool,
) -> Result<Consumption, LedgerError> {
    let (allocations, uncovered) =
        draw_in_order(book, lots.into_iter(), quantity, allow_shortfall)?;
    let drawn: Decimal = allocations.iter().map(Allocation::cost).sum();
    Ok(Consumption {
        method: Some(method),
        quantity,
        consumed_cost: drawn + uncovered * book.average().unit_cost(),
        allocations,
        uncovered,
    })
}

pub struct Fifo;

impl ValuationStrategy for Fifo {
    fn method(&self) -> ValuationMethod {
        ValuationMethod::Fifo
    }

    fn consume(
        &self,
        book: &LotBook,
        quantity: Decimal,
        allow_shortfall: bool,
    ) -> Result<Consumption, LedgerError> {
        lot_costed(self.method(), book, oldest_first(book), quantity, allow_shortfall)
    }

    fn value(&self, book: &LotBook, _balance: Decimal) -> Decimal {
        book.open_value()
    }
}

pub struct Lifo;

impl ValuationStrategy for Lifo {
    fn method(&self) -> ValuationMethod {
        ValuationMethod::Lifo
    }

    fn consume(
        &self,
        book: &LotBook,
        quantity: Decimal,
        allow_shortfall: bool,
    ) -> Result<Consumption, LedgerError> {
        let mut lots = oldest_first(book);
        lots.reverse();
        lot_costed(self.method(), book, lots, quantity, allow_shortfall)
    }

    fn value(&self, book: &LotBook, _balance: Decimal) -> Decimal {
        book.open_value()
    }
}

pub struct WeightedAverage;

impl ValuationStrategy for WeightedAverage {
    fn method(&self) -> ValuationMethod {
        ValuationMethod::Average
    }

    fn consume(
        &self,
        book: &LotBook,
        quantity: Decimal,
        allow_shortfall: bool,
    ) -> Result<Consumption, LedgerError> {
        // Lots still track physical quantity (oldest first) so expiry and
        // later FIFO/LIFO consumptions stay accurate; cost ignores them.
        let (allocations, uncovered) =
            draw_in_order(book, oldest_first(book).into_iter(), quantity, allow_shortfall)?;
        Ok(Consumption {
            method: Some(ValuationMethod::Average),
            quantity,
            consumed_cost: quantity * book.average().unit_cost(),
            allocations,
            uncovered,
        })
    }

    fn value(&self, book: &LotBook, balance: Decimal) -> Decimal {
        balance.max(Decimal::ZERO) * book.average().unit_cost()
    }
}

/// Cooperative cancellation for long read-only scans.
///
/// Clones share the same flag, so one handle can cancel a scan running on
/// another thread.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::default(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// Valuation queries over a [`LedgerStore`].
pub struct ValuationEngine<S: LedgerStore = InMemoryLedgerStore> {
    store: Arc<S>,
    check_interval: usize,
}

impl<S: LedgerStore> Clone for ValuationEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            check_interval: self.check_interval,
        }
    }
}

impl<S: LedgerStore> ValuationEngine<S> {
    pub fn new(store: Arc<S>, check_interval: usize) -> Self {
        Self {
            store,
            check_interval: check_interval.max(1),
        }
    }

    /// Plans a consumption with the given method's lot-selection rule.
    pub fn consume(
        &self,
        book: &LotBook,
        quantity: Decimal,
        method: ValuationMethod,
        allow_shortfall: bool,
    ) -> Result<Consumption, LedgerError> {
        method.strategy().consume(book, quantity, allow_shortfall)
    }

    /// Prices a hypothetical consumption against the key's current lots.
    pub fn quote(
        &self,
        key: &DimensionKey,
        quantity: Decimal,
        method: ValuationMethod,
    ) -> Result<Consumption, LedgerError> {
        if quantity <= Decimal::ZERO {
            return Err(LedgerError::validation("quoted quantity must be positive"));
        }
        let snapshot = self.store.snapshot(key);
        self.consume(&snapshot.lots, quantity, method, false)
    }

    pub fn weighted_average(&self, key: &DimensionKey) -> Decimal {
        self.store.snapshot(key).lots.average().unit_cost()
    }

    /// Value of the key's stock right now, read from the live lot book.
    pub fn current_value(&self, key: &DimensionKey, method: ValuationMethod) -> Decimal {
        let snapshot = self.store.snapshot(key);
        method.strategy().value(&snapshot.lots, snapshot.balance())
    }

    /// Value of the key's stock as of `as_of`.
    ///
    /// Replays entries up to `as_of` into a scratch lot book using the
    /// allocations recorded at the time, so the live book is never touched.
    /// History is read in pages of `check_interval` entries and `cancel` is
    /// polled before each page.
    pub fn valuation_as_of(
        &self,
        key: &DimensionKey,
        method: ValuationMethod,
        as_of: DateTime<Utc>,
        cancel: &Cancellation,
    ) -> Result<Decimal, LedgerError> {
        let mut book = LotBook::new(*key);
        let mut balance = Decimal::ZERO;
        let mut after = None;
        let mut replayed = 0usize;

        loop {
            if cancel.is_cancelled() {
                tracing::debug!(%key, replayed, "valuation scan cancelled");
                return Err(LedgerError::Cancelled { key: *key });
            }
            let page = self.store.history_page(key, as_of, after, self.check_interval);
            for posted in &page {
                let entry = &posted.entry;
                book.post(entry, posted.consumption.as_deref(), balance)?;
                balance = entry.running_balance();
            }
            replayed += page.len();
            match page.last() {
                Some(last) if page.len() == self.check_interval => after = Some(last.entry.id()),
                _ => break,
            }
        }

        Ok(method.strategy().value(&book, balance))
    }
}
