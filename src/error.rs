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

//! Error types for ledger operations.
//!
//! Every rejection names the dimension key (or entry / transfer) and the
//! state that caused it, so the caller can decide between retry and abort.

use crate::base::{DimensionKey, EntryId, TenantId, TransferId};
use rust_decimal::Decimal;
use std::fmt;
use thiserror::Error;

/// Kind of reference data a [`LedgerError::NotFound`] is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Product,
    Variant,
    Location,
    Entry,
    Transfer,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Product => "product",
            Self::Variant => "variant",
            Self::Location => "location",
            Self::Entry => "entry",
            Self::Transfer => "transfer",
        };
        f.write_str(name)
    }
}

/// Ledger processing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Malformed or out-of-range input. Raised before any side effect.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown product, variant, location, entry or transfer.
    #[error("{resource} {id} not found for tenant {tenant_id}")]
    NotFound {
        tenant_id: TenantId,
        resource: Resource,
        id: u64,
    },

    /// A decrease would drive the balance or a lot below zero.
    #[error("insufficient stock at {key}: requested {requested}, available {available}")]
    InsufficientStock {
        key: DimensionKey,
        requested: Decimal,
        available: Decimal,
    },

    /// The last entry for the key moved between read and append.
    #[error(
        "concurrent append on {key}: expected last entry {expected:?}, found {actual:?} after {attempts} attempt(s)"
    )]
    ConcurrencyConflict {
        key: DimensionKey,
        expected: Option<EntryId>,
        actual: Option<EntryId>,
        attempts: u32,
    },

    /// Attempt to overwrite an already persisted entry.
    #[error("entry {entry_id} is immutable")]
    ImmutabilityViolation { entry_id: EntryId },

    /// Transfer legs could not be brought back to a consistent state.
    #[error("transfer {transfer_id} integrity error (out-leg {out_entry:?}): {reason}")]
    TransferIntegrity {
        transfer_id: TransferId,
        out_entry: Option<EntryId>,
        reason: String,
    },

    /// The destination leg failed and the source leg was compensated.
    #[error("transfer {transfer_id} reversed: {cause}")]
    TransferCompensated {
        transfer_id: TransferId,
        cause: Box<LedgerError>,
    },

    /// A read-only scan was cancelled or ran past its deadline.
    #[error("scan of {key} cancelled")]
    Cancelled { key: DimensionKey },
}

impl LedgerError {
    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    pub(crate) fn not_found(tenant_id: TenantId, resource: Resource, id: u64) -> Self {
        Self::NotFound {
            tenant_id,
            resource,
            id,
        }
    }

    /// Whether repeating the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}
