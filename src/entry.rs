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

//! Immutable ledger entries.
//!
//! A [`LedgerEntry`] has no setters and is only ever handed out behind an
//! `Arc`; once the store has assigned its id and running balance it cannot
//! change. Corrections are new entries of type [`TransactionType::ReversalOf`].

use crate::base::{DimensionKey, EntryId, UserId};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque key/value annotations carried by an entry.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Whether a movement adds to or removes from the balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Increase,
    Decrease,
}

impl Direction {
    /// Applies this direction's sign to the absolute value of `quantity`.
    pub fn signed(self, quantity: Decimal) -> Decimal {
        match self {
            Self::Increase => quantity.abs(),
            Self::Decrease => -quantity.abs(),
        }
    }

    pub fn of(quantity: Decimal) -> Self {
        if quantity.is_sign_negative() {
            Self::Decrease
        } else {
            Self::Increase
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Purchase,
    Sale,
    AdjustmentIncrease,
    AdjustmentDecrease,
    Production,
    Consumption,
    TransferOut,
    TransferIn,
    ReturnInbound,
    ReturnOutbound,
    /// Compensates the referenced entry with the opposite sign.
    ReversalOf(EntryId),
}

impl TransactionType {
    /// Sign of the quantity for this type.
    ///
    /// Reversals take the opposite sign of the entry they reverse, which is
    /// only known from that entry, so they return `None`.
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Self::Purchase
            | Self::AdjustmentIncrease
            | Self::Production
            | Self::TransferIn
            | Self::ReturnInbound => Some(Direction::Increase),
            Self::Sale
            | Self::AdjustmentDecrease
            | Self::Consumption
            | Self::TransferOut
            | Self::ReturnOutbound => Some(Direction::Decrease),
            Self::ReversalOf(_) => None,
        }
    }

    pub fn is_transfer_leg(&self) -> bool {
        matches!(self, Self::TransferOut | Self::TransferIn)
    }

    pub fn reversed_entry(&self) -> Option<EntryId> {
        match self {
            Self::ReversalOf(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Sale => "sale",
            Self::AdjustmentIncrease => "adjustment_increase",
            Self::AdjustmentDecrease => "adjustment_decrease",
            Self::Production => "production",
            Self::Consumption => "consumption",
            Self::TransferOut => "transfer_out",
            Self::TransferIn => "transfer_in",
            Self::ReturnInbound => "return_inbound",
            Self::ReturnOutbound => "return_outbound",
            Self::ReversalOf(_) => "reversal",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReversalOf(id) => write!(f, "reversal_of({id})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Kind of business document a movement originates from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    PurchaseOrder,
    SalesOrder,
    Transfer,
    Adjustment,
    ProductionOrder,
    Return,
    Reversal,
    Other(String),
}

/// Link from an entry to its originating business document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub kind: ReferenceType,
    pub id: String,
    pub number: Option<String>,
}

impl Reference {
    pub fn new(kind: ReferenceType, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            number: None,
        }
    }

    pub fn with_number(mut self, number: impl Into<String>) -> Self {
        self.number = Some(number.into());
        self
    }
}

/// Everything about an entry except what the store assigns on append.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryDraft {
    pub key: DimensionKey,
    pub transaction_type: TransactionType,
    /// Signed quantity; never zero.
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
    pub total_cost: Option<Decimal>,
    pub batch_number: Option<String>,
    pub serial_number: Option<String>,
    pub lot_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub reference: Option<Reference>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<UserId>,
    pub metadata: Metadata,
}

/// One immutable stock movement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    id: EntryId,
    key: DimensionKey,
    transaction_type: TransactionType,
    quantity: Decimal,
    running_balance: Decimal,
    unit_cost: Option<Decimal>,
    total_cost: Option<Decimal>,
    batch_number: Option<String>,
    serial_number: Option<String>,
    lot_number: Option<String>,
    expiry_date: Option<NaiveDate>,
    reference: Option<Reference>,
    created_at: DateTime<Utc>,
    created_by: Option<UserId>,
    metadata: Metadata,
}

impl LedgerEntry {
    /// Seals a draft. Only the store calls this, once per entry.
    pub(crate) fn seal(id: EntryId, running_balance: Decimal, draft: EntryDraft) -> Self {
        Self {
            id,
            key: draft.key,
            transaction_type: draft.transaction_type,
            quantity: draft.quantity,
            running_balance,
            unit_cost: draft.unit_cost,
            total_cost: draft.total_cost,
            batch_number: draft.batch_number,
            serial_number: draft.serial_number,
            lot_number: draft.lot_number,
            expiry_date: draft.expiry_date,
            reference: draft.reference,
            created_at: draft.created_at,
            created_by: draft.created_by,
            metadata: draft.metadata,
        }
    }

    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn key(&self) -> &DimensionKey {
        &self.key
    }

    pub fn transaction_type(&self) -> TransactionType {
        self.transaction_type
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn running_balance(&self) -> Decimal {
        self.running_balance
    }

    pub fn unit_cost(&self) -> Option<Decimal> {
        self.unit_cost
    }

    pub fn total_cost(&self) -> Option<Decimal> {
        self.total_cost
    }

    pub fn batch_number(&self) -> Option<&str> {
        self.batch_number.as_deref()
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.serial_number.as_deref()
    }

    pub fn lot_number(&self) -> Option<&str> {
        self.lot_number.as_deref()
    }

    pub fn expiry_date(&self) -> Option<NaiveDate> {
        self.expiry_date
    }

    pub fn reference(&self) -> Option<&Reference> {
        self.reference.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn created_by(&self) -> Option<UserId> {
        self.created_by
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn direction(&self) -> Direction {
        Direction::of(self.quantity)
    }

    pub fn is_increase(&self) -> bool {
        self.direction() == Direction::Increase
    }
}
