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

//! # Stock Ledger
//!
//! This library provides an append-only inventory stock ledger with running
//! balances, lot tracking and FIFO, LIFO and weighted-average valuation.
//!
//! ## Core Components
//!
//! - [`InventoryEngine`]: Application entry point for movements and queries
//! - [`LedgerStore`]: Append-only entry storage keyed by [`DimensionKey`]
//! - [`MovementRecorder`]: Validates movements and appends them under a per-key lock
//! - [`ValuationEngine`]: Lot consumption and valuation strategies
//! - [`TransferCoordinator`]: Two-leg transfers with compensation
//! - [`LedgerError`]: Error types for rejected operations
//!
//! ## Example
//!
//! ```
//! use stock_ledger_rs::{
//!     InventoryEngine, LedgerConfig, LocationId, ProductId, StockMovementRequest, TenantId,
//!     ValuationMethod,
//! };
//! use rust_decimal_macros::dec;
//!
//! let engine = InventoryEngine::new(LedgerConfig::default());
//! engine.catalog().register_product(TenantId(1), ProductId(7));
//! engine.catalog().register_location(TenantId(1), LocationId(1), None);
//!
//! let receipt = StockMovementRequest::stock_in(TenantId(1), ProductId(7), dec!(100))
//!     .at_location(LocationId(1))
//!     .with_unit_cost(dec!(10));
//! engine.stock_in(receipt).unwrap();
//!
//! let issue = StockMovementRequest::stock_out(TenantId(1), ProductId(7), dec!(30))
//!     .at_location(LocationId(1));
//! let outcome = engine.stock_out(issue).unwrap();
//! assert_eq!(outcome.consumed_cost(), dec!(300));
//!
//! let balance =
//!     engine.get_current_balance(TenantId(1), ProductId(7), None, Some(LocationId(1)), None);
//! assert_eq!(balance, dec!(70));
//!
//! let valuation =
//!     engine.calculate_valuation(TenantId(1), ProductId(7), ValuationMethod::Fifo, None);
//! assert_eq!(valuation.value, dec!(700));
//! ```
//!
//! ## Thread Safety
//!
//! Movements on the same dimension key are linearized; movements on
//! different keys proceed in parallel with no shared lock.

pub mod balance;
mod base;
pub mod catalog;
pub mod clock;
pub mod config;
mod engine;
pub mod entry;
pub mod error;
pub mod events;
pub mod expiry;
mod journal;
pub mod lot;
pub mod movement;
pub mod recorder;
pub mod store;
pub mod telemetry;
pub mod transfer;
pub mod valuation;

pub use balance::{BalanceQueryService, LowStock};
pub use base::{
    BranchId, DimensionKey, EntryId, LocationId, LotId, ProductId, TenantId, TransferId, UserId,
    VariantId,
};
pub use catalog::Catalog;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::LedgerConfig;
pub use engine::{InventoryEngine, ProductValuation, Recorded};
pub use entry::{Direction, EntryDraft, LedgerEntry, Metadata, Reference, ReferenceType, TransactionType};
pub use error::{LedgerError, Resource};
pub use events::{EventOutbox, StockMovementRecorded};
pub use expiry::{ExpiryFilter, ExpiryTracker};
pub use lot::{Allocation, AverageCost, Consumption, Lot, LotBook, Provenance};
pub use movement::{MovementType, StockMovementRequest, TransferRequest};
pub use recorder::{MovementOutcome, MovementRecorder};
pub use store::{Commit, InMemoryLedgerStore, KeySnapshot, LedgerStore, Posted};
pub use transfer::{TransferCoordinator, TransferRecord, TransferState};
pub use valuation::{Cancellation, ValuationEngine, ValuationMethod, ValuationStrategy};
