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

//! Two-leg stock transfers.
//!
//! A transfer touches two dimension keys, so its legs cannot commit as one
//! unit. The [`TransferCoordinator`] runs them as a saga:
//!
//! ```text
//! Pending ──> OutLegApplied ──> Completed
//!    │              │
//!    v              v
//!  Failed       Reversing ──> Reversed
//! ```
//!
//! The out-leg is applied first. If the in-leg then fails, the out-leg is
//! compensated by a `ReversalOf(out)` entry at the source; nothing is ever
//! deleted. A transfer whose compensation also failed stays in `Reversing`
//! until [`TransferCoordinator::resume_compensation`] finishes it.

use crate::balance::BalanceQueryService;
use crate::base::{EntryId, TenantId, TransferId};
use crate::catalog::Catalog;
use crate::clock::Clock;
use crate::entry::{Reference, ReferenceType, TransactionType};
use crate::error::{LedgerError, Resource};
use crate::movement::TransferRequest;
use crate::recorder::{MovementRecorder, Posting};
use crate::store::{InMemoryLedgerStore, LedgerStore};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Pending,
    OutLegApplied,
    Completed,
    Reversing,
    Reversed,
    Failed,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Reversed | Self::Failed)
    }

    fn can_become(self, next: Self) -> bool {
        use TransferState::*;
        matches!(
            (self, next),
            (Pending, OutLegApplied)
                | (Pending, Failed)
                | (OutLegApplied, Completed)
                | (OutLegApplied, Reversing)
                | (Reversing, Reversed)
        )
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::OutLegApplied => "out_leg_applied",
            Self::Completed => "completed",
            Self::Reversing => "reversing",
            Self::Reversed => "reversed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Saga state of one transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRecord {
    pub id: TransferId,
    pub request: TransferRequest,
    pub state: TransferState,
    /// Shared by both legs and the compensation.
    pub reference: Reference,
    pub out_entry: Option<EntryId>,
    pub in_entry: Option<EntryId>,
    pub reversal_entry: Option<EntryId>,
    /// Why the transfer did not complete.
    pub failure: Option<LedgerError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct TransferCoordinator<S: LedgerStore = InMemoryLedgerStore> {
    recorder: Arc<MovementRecorder<S>>,
    balances: BalanceQueryService<S>,
    catalog: Arc<Catalog>,
    clock: Arc<dyn Clock>,
    records: DashMap<TransferId, TransferRecord>,
    sequence: AtomicU64,
}

impl<S: LedgerStore> TransferCoordinator<S> {
    pub fn new(
        recorder: Arc<MovementRecorder<S>>,
        balances: BalanceQueryService<S>,
        catalog: Arc<Catalog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            recorder,
            balances,
            catalog,
            clock,
            records: DashMap::new(),
            sequence: AtomicU64::new(1),
        }
    }

    /// Runs a transfer to a terminal state, or to `Reversing` if the
    /// compensation could not be written.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Validation`] / [`LedgerError::NotFound`] - rejected
    ///   before a record exists.
    /// - [`LedgerError::InsufficientStock`] and other out-leg failures -
    ///   the record is `Failed` and the ledger is untouched.
    /// - [`LedgerError::TransferCompensated`] - the in-leg failed and the
    ///   out-leg was reversed.
    /// - [`LedgerError::TransferIntegrity`] - the in-leg failed and so did
    ///   the compensation; the record stays `Reversing`.
    pub fn initiate(&self, mut request: TransferRequest) -> Result<TransferRecord, LedgerError> {
        request.validate()?;
        // A branch-scoped transfer lands in the branch owning the destination.
        if request.branch_id.is_some() && request.to_branch_id.is_none() {
            request.to_branch_id = self
                .catalog
                .location_branch(request.tenant_id, request.to_location);
        }
        let source = request.source();
        let destination = request.destination();
        self.catalog.ensure_key(&source)?;
        self.catalog.ensure_key(&destination)?;

        let id = TransferId(self.sequence.fetch_add(1, Ordering::Relaxed));
        let reference = request
            .reference
            .clone()
            .filter(|reference| reference.kind == ReferenceType::Transfer)
            .unwrap_or_else(|| Reference::new(ReferenceType::Transfer, id.to_string()));
        let now = self.clock.now();
        self.records.insert(
            id,
            TransferRecord {
                id,
                request: request.clone(),
                state: TransferState::Pending,
                reference: reference.clone(),
                out_entry: None,
                in_entry: None,
                reversal_entry: None,
                failure: None,
                created_at: now,
                updated_at: now,
            },
        );
        tracing::info!(transfer_id = %id, from = %source, to = %destination, quantity = %request.quantity, "transfer pending");

        let available = self.balances.current_balance(&source);
        if available < request.quantity {
            let error = LedgerError::InsufficientStock {
                key: source,
                requested: request.quantity,
                available: available.max(Decimal::ZERO),
            };
            self.fail(id, &error);
            return Err(error);
        }

        let method = request
            .valuation_method
            .unwrap_or(self.recorder.config().default_valuation);
        let mut out_leg = Posting::new(source, TransactionType::TransferOut, -request.quantity, method);
        out_leg.reference = Some(reference.clone());
        out_leg.created_by = request.created_by;
        out_leg.metadata = request.metadata.clone();
        out_leg
            .metadata
            .insert("transfer_id".into(), serde_json::Value::from(id.0));

        let outcome = match self.recorder.post(out_leg) {
            Ok(outcome) => outcome,
            Err(error) => {
                self.fail(id, &error);
                return Err(error);
            }
        };
        let out_entry = outcome.entry.id();
        self.transition(id, TransferState::OutLegApplied, |record| {
            record.out_entry = Some(out_entry);
        });

        // Cost and provenance follow the goods to the destination.
        let mut in_leg = Posting::new(destination, TransactionType::TransferIn, request.quantity, method);
        if let Some(consumption) = &outcome.consumption {
            let provenance = self
                .recorder
                .store()
                .snapshot(&source)
                .lots
                .provenance(consumption);
            in_leg.unit_cost = Some(consumption.unit_cost());
            in_leg.expiry_date = provenance.expiry_date;
            in_leg.batch_number = provenance.batch_number;
            in_leg.lot_number = provenance.lot_number;
        }
        in_leg.reference = Some(reference);
        in_leg.created_by = request.created_by;
        in_leg.metadata = request.metadata;
        in_leg
            .metadata
            .insert("transfer_id".into(), serde_json::Value::from(id.0));

        match self.recorder.post(in_leg) {
            Ok(incoming) => {
                let in_entry = incoming.entry.id();
                let record = self.transition(id, TransferState::Completed, |record| {
                    record.in_entry = Some(in_entry);
                });
                record.ok_or(LedgerError::not_found(request.tenant_id, Resource::Transfer, id.0))
            }
            Err(cause) => {
                tracing::warn!(transfer_id = %id, error = %cause, "in-leg failed, compensating out-leg");
                self.transition(id, TransferState::Reversing, |record| {
                    record.failure = Some(cause.clone());
                });
                match self.compensate(id, request.tenant_id, out_entry) {
                    Ok(_) => Err(LedgerError::TransferCompensated {
                        transfer_id: id,
                        cause: Box::new(cause),
                    }),
                    Err(error) => Err(error),
                }
            }
        }
    }

    /// Retries the compensation of a transfer left in `Reversing`.
    pub fn resume_compensation(
        &self,
        tenant_id: TenantId,
        id: TransferId,
    ) -> Result<TransferRecord, LedgerError> {
        let record = self.status(tenant_id, id)?;
        match (record.state, record.out_entry) {
            (TransferState::Reversed, _) => Ok(record),
            (TransferState::Reversing, Some(out_entry)) => {
                self.compensate(id, tenant_id, out_entry)
            }
            (state, _) => Err(LedgerError::validation(format!(
                "transfer {id} is {state}, not awaiting compensation"
            ))),
        }
    }

    pub fn status(&self, tenant_id: TenantId, id: TransferId) -> Result<TransferRecord, LedgerError> {
        self.records
            .get(&id)
            .map(|record| record.value().clone())
            .filter(|record| record.request.tenant_id == tenant_id)
            .ok_or(LedgerError::not_found(tenant_id, Resource::Transfer, id.0))
    }

    /// Transfers of a tenant, oldest first.
    pub fn transfers(&self, tenant_id: TenantId) -> Vec<TransferRecord> {
        let mut records: Vec<TransferRecord> = self
            .records
            .iter()
            .filter(|record| record.request.tenant_id == tenant_id)
            .map(|record| record.value().clone())
            .collect();
        records.sort_by_key(|record| record.id);
        records
    }

    fn compensate(
        &self,
        id: TransferId,
        tenant_id: TenantId,
        out_entry: EntryId,
    ) -> Result<TransferRecord, LedgerError> {
        let reference = self
            .records
            .get(&id)
            .map(|record| record.reference.clone())
            .ok_or(LedgerError::not_found(tenant_id, Resource::Transfer, id.0))?;
        let created_by = self
            .records
            .get(&id)
            .and_then(|record| record.request.created_by);

        let reversal = match self.recorder.store().reversal_of(out_entry) {
            // An earlier attempt committed but did not report back.
            Some(existing) => Ok(existing),
            None => self
                .recorder
                .reverse_entry(tenant_id, out_entry, created_by, reference, true)
                .map(|outcome| outcome.entry.id())
                .or_else(|error| self.recorder.store().reversal_of(out_entry).ok_or(error)),
        };

        match reversal {
            Ok(reversal_entry) => self
                .transition(id, TransferState::Reversed, |record| {
                    record.reversal_entry = Some(reversal_entry);
                })
                .ok_or(LedgerError::not_found(tenant_id, Resource::Transfer, id.0)),
            Err(error) => {
                tracing::error!(transfer_id = %id, %out_entry, %error, "transfer compensation failed");
                Err(LedgerError::TransferIntegrity {
                    transfer_id: id,
                    out_entry: Some(out_entry),
                    reason: format!("compensation of out-leg failed: {error}"),
                })
            }
        }
    }

    fn fail(&self, id: TransferId, error: &LedgerError) {
        tracing::warn!(transfer_id = %id, %error, "transfer failed");
        self.transition(id, TransferState::Failed, |record| {
            record.failure = Some(error.clone());
        });
    }

    /// Moves a record to `next` and returns the updated copy.
    fn transition(
        &self,
        id: TransferId,
        next: TransferState,
        update: impl FnOnce(&mut TransferRecord),
    ) -> Option<TransferRecord> {
        let mut record = self.records.get_mut(&id)?;
        if !record.state.can_become(next) {
            tracing::warn!(transfer_id = %id, from = %record.state, to = %next, "transfer transition ignored");
            return Some(record.value().clone());
        }
        update(record.value_mut());
        record.state = next;
        record.updated_at = self.clock.now();
        tracing::info!(transfer_id = %id, state = %next, "transfer state changed");
        Some(record.value().clone())
    }
}
