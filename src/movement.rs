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

//! Movement requests as submitted by callers.
//!
//! A [`StockMovementRequest`] is validated in full before anything is read
//! or written. Generic movement types resolve to a concrete
//! [`TransactionType`]:
//!
//! | Movement | Accepted transaction types | Default |
//! |----------|----------------------------|---------|
//! | `in` | purchase, production, return_inbound, adjustment_increase | purchase |
//! | `out` | sale, consumption, return_outbound, adjustment_decrease | sale |
//! | `adjustment` | by sign of the quantity | - |
//! | `transfer` | handled by the transfer coordinator | - |

use crate::base::{BranchId, DimensionKey, LocationId, ProductId, TenantId, UserId, VariantId};
use crate::entry::{Direction, Metadata, Reference, TransactionType};
use crate::error::LedgerError;
use crate::valuation::ValuationMethod;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementType {
    In,
    Out,
    Adjustment,
    Transfer,
}

impl MovementType {
    /// Generic movement type of a committed entry.
    pub fn of(transaction_type: TransactionType, quantity: Decimal) -> Self {
        match transaction_type {
            TransactionType::TransferIn | TransactionType::TransferOut => Self::Transfer,
            TransactionType::AdjustmentIncrease | TransactionType::AdjustmentDecrease => {
                Self::Adjustment
            }
            _ => match Direction::of(quantity) {
                Direction::Increase => Self::In,
                Direction::Decrease => Self::Out,
            },
        }
    }
}

impl FromStr for MovementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "in" => Ok(Self::In),
            "out" => Ok(Self::Out),
            "adjustment" => Ok(Self::Adjustment),
            "transfer" => Ok(Self::Transfer),
            _ => Err(format!("unknown movement type: {s}")),
        }
    }
}

impl fmt::Display for MovementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::In => "in",
            Self::Out => "out",
            Self::Adjustment => "adjustment",
            Self::Transfer => "transfer",
        };
        f.write_str(name)
    }
}

/// A request to move stock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockMovementRequest {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub branch_id: Option<BranchId>,
    pub location_id: Option<LocationId>,
    pub movement_type: MovementType,
    pub quantity: Decimal,
    /// Narrows `movement_type` to a specific transaction type.
    pub transaction_type: Option<TransactionType>,
    pub unit_cost: Option<Decimal>,
    pub batch_number: Option<String>,
    pub serial_number: Option<String>,
    pub lot_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub reference: Option<Reference>,
    pub from_location: Option<LocationId>,
    pub to_location: Option<LocationId>,
    pub created_by: Option<UserId>,
    pub valuation_method: Option<ValuationMethod>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl StockMovementRequest {
    pub fn new(
        tenant_id: TenantId,
        product_id: ProductId,
        movement_type: MovementType,
        quantity: Decimal,
    ) -> Self {
        Self {
            tenant_id,
            product_id,
            variant_id: None,
            branch_id: None,
            location_id: None,
            movement_type,
            quantity,
            transaction_type: None,
            unit_cost: None,
            batch_number: None,
            serial_number: None,
            lot_number: None,
            expiry_date: None,
            reference: None,
            from_location: None,
            to_location: None,
            created_by: None,
            valuation_method: None,
            metadata: Metadata::new(),
        }
    }

    pub fn stock_in(tenant_id: TenantId, product_id: ProductId, quantity: Decimal) -> Self {
        Self::new(tenant_id, product_id, MovementType::In, quantity)
    }

    pub fn stock_out(tenant_id: TenantId, product_id: ProductId, quantity: Decimal) -> Self {
        Self::new(tenant_id, product_id, MovementType::Out, quantity)
    }

    pub fn adjustment(tenant_id: TenantId, product_id: ProductId, quantity: Decimal) -> Self {
        Self::new(tenant_id, product_id, MovementType::Adjustment, quantity)
    }

    pub fn transfer(
        tenant_id: TenantId,
        product_id: ProductId,
        from: LocationId,
        to: LocationId,
        quantity: Decimal,
    ) -> Self {
        let mut request = Self::new(tenant_id, product_id, MovementType::Transfer, quantity);
        request.from_location = Some(from);
        request.to_location = Some(to);
        request
    }

    pub fn at_location(mut self, location_id: LocationId) -> Self {
        self.location_id = Some(location_id);
        self
    }

    pub fn in_branch(mut self, branch_id: BranchId) -> Self {
        self.branch_id = Some(branch_id);
        self
    }

    pub fn for_variant(mut self, variant_id: VariantId) -> Self {
        self.variant_id = Some(variant_id);
        self
    }

    pub fn with_unit_cost(mut self, unit_cost: Decimal) -> Self {
        self.unit_cost = Some(unit_cost);
        self
    }

    pub fn with_transaction_type(mut self, transaction_type: TransactionType) -> Self {
        self.transaction_type = Some(transaction_type);
        self
    }

    pub fn with_expiry(mut self, expiry_date: NaiveDate) -> Self {
        self.expiry_date = Some(expiry_date);
        self
    }

    pub fn with_batch(mut self, batch_number: impl Into<String>) -> Self {
        self.batch_number = Some(batch_number.into());
        self
    }

    pub fn with_serial(mut self, serial_number: impl Into<String>) -> Self {
        self.serial_number = Some(serial_number.into());
        self
    }

    pub fn with_lot_number(mut self, lot_number: impl Into<String>) -> Self {
        self.lot_number = Some(lot_number.into());
        self
    }

    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_valuation(mut self, method: ValuationMethod) -> Self {
        self.valuation_method = Some(method);
        self
    }

    pub fn by(mut self, user_id: UserId) -> Self {
        self.created_by = Some(user_id);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn key(&self) -> DimensionKey {
        DimensionKey {
            tenant_id: self.tenant_id,
            product_id: self.product_id,
            variant_id: self.variant_id,
            branch_id: self.branch_id,
            location_id: self.location_id,
        }
    }

    /// Checks the request in isolation.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.tenant_id.0 == 0 {
            return Err(LedgerError::validation("tenant_id must be positive"));
        }
        if self.product_id.0 == 0 {
            return Err(LedgerError::validation("product_id must be positive"));
        }
        if self.quantity.is_zero() {
            return Err(LedgerError::validation("quantity must not be zero"));
        }
        if self.unit_cost.is_some_and(|cost| cost < Decimal::ZERO) {
            return Err(LedgerError::validation("unit_cost must not be negative"));
        }
        if self.movement_type == MovementType::Transfer {
            match (self.from_location, self.to_location) {
                (Some(from), Some(to)) if from == to => {
                    return Err(LedgerError::validation(
                        "transfer source and destination must differ",
                    ));
                }
                (Some(_), Some(_)) => {}
                _ => {
                    return Err(LedgerError::validation(
                        "transfer requires both from_location and to_location",
                    ));
                }
            }
        }
        Ok(())
    }

    /// Resolves the concrete transaction type and signed quantity.
    pub fn resolve(&self) -> Result<(TransactionType, Decimal), LedgerError> {
        let (transaction_type, direction) = match self.movement_type {
            MovementType::In => {
                let tt = self.transaction_type.unwrap_or(TransactionType::Purchase);
                match tt {
                    TransactionType::Purchase
                    | TransactionType::Production
                    | TransactionType::ReturnInbound
                    | TransactionType::AdjustmentIncrease => (tt, Direction::Increase),
                    other => return Err(mismatch(other, self.movement_type)),
                }
            }
            MovementType::Out => {
                let tt = self.transaction_type.unwrap_or(TransactionType::Sale);
                match tt {
                    TransactionType::Sale
                    | TransactionType::Consumption
                    | TransactionType::ReturnOutbound
                    | TransactionType::AdjustmentDecrease => (tt, Direction::Decrease),
                    other => return Err(mismatch(other, self.movement_type)),
                }
            }
            MovementType::Adjustment => {
                let direction = Direction::of(self.quantity);
                let tt = match direction {
                    Direction::Increase => TransactionType::AdjustmentIncrease,
                    Direction::Decrease => TransactionType::AdjustmentDecrease,
                };
                if let Some(requested) = self.transaction_type.filter(|requested| *requested != tt) {
                    return Err(mismatch(requested, self.movement_type));
                }
                (tt, direction)
            }
            MovementType::Transfer => {
                return Err(LedgerError::validation(
                    "transfers are recorded through the transfer coordinator",
                ));
            }
        };
        Ok((transaction_type, direction.signed(self.quantity)))
    }
}

fn mismatch(transaction_type: TransactionType, movement_type: MovementType) -> LedgerError {
    LedgerError::validation(format!(
        "transaction type {transaction_type} is not valid for an '{movement_type}' movement"
    ))
}

/// A request to move stock between two locations of the same product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub branch_id: Option<BranchId>,
    /// Branch of the destination key. Falls back to `branch_id`.
    #[serde(default)]
    pub to_branch_id: Option<BranchId>,
    pub from_location: LocationId,
    pub to_location: LocationId,
    /// Absolute quantity to move.
    pub quantity: Decimal,
    pub reference: Option<Reference>,
    pub created_by: Option<UserId>,
    pub valuation_method: Option<ValuationMethod>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl TransferRequest {
    pub fn new(
        tenant_id: TenantId,
        product_id: ProductId,
        from_location: LocationId,
        to_location: LocationId,
        quantity: Decimal,
    ) -> Self {
        Self {
            tenant_id,
            product_id,
            variant_id: None,
            branch_id: None,
            to_branch_id: None,
            from_location,
            to_location,
            quantity,
            reference: None,
            created_by: None,
            valuation_method: None,
            metadata: Metadata::new(),
        }
    }

    pub fn in_branch(mut self, branch_id: BranchId) -> Self {
        self.branch_id = Some(branch_id);
        self
    }

    pub fn to_branch(mut self, branch_id: BranchId) -> Self {
        self.to_branch_id = Some(branch_id);
        self
    }

    fn key(&self, branch_id: Option<BranchId>, location_id: LocationId) -> DimensionKey {
        DimensionKey {
            tenant_id: self.tenant_id,
            product_id: self.product_id,
            variant_id: self.variant_id,
            branch_id,
            location_id: Some(location_id),
        }
    }

    pub fn source(&self) -> DimensionKey {
        self.key(self.branch_id, self.from_location)
    }

    pub fn destination(&self) -> DimensionKey {
        self.key(self.to_branch_id.or(self.branch_id), self.to_location)
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.tenant_id.0 == 0 {
            return Err(LedgerError::validation("tenant_id must be positive"));
        }
        if self.product_id.0 == 0 {
            return Err(LedgerError::validation("product_id must be positive"));
        }
        if self.quantity <= Decimal::ZERO {
            return Err(LedgerError::validation("transfer quantity must be positive"));
        }
        if self.from_location == self.to_location {
            return Err(LedgerError::validation(
                "transfer source and destination must differ",
            ));
        }
        Ok(())
    }
}

impl TryFrom<StockMovementRequest> for TransferRequest {
    type Error = LedgerError;

    fn try_from(request: StockMovementRequest) -> Result<Self, Self::Error> {
        if request.movement_type != MovementType::Transfer {
            return Err(LedgerError::validation(format!(
                "expected a transfer movement, got '{}'",
                request.movement_type
            )));
        }
        request.validate()?;
        let (Some(from_location), Some(to_location)) = (request.from_location, request.to_location)
        else {
            return Err(LedgerError::validation(
                "transfer requires both from_location and to_location",
            ));
        };
        Ok(Self {
            tenant_id: request.tenant_id,
            product_id: request.product_id,
            variant_id: request.variant_id,
            branch_id: request.branch_id,
            to_branch_id: None,
            from_location,
            to_location,
            quantity: request.quantity.abs(),
            reference: request.reference,
            created_by: request.created_by,
            valuation_method: request.valuation_method,
            metadata: request.metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn in_and_out_ignore_the_sign_of_quantity() {
        let request = StockMovementRequest::stock_in(TenantId(1), ProductId(1), dec!(-5));
        assert_eq!(request.resolve(), Ok((TransactionType::Purchase, dec!(5))));

        let request = StockMovementRequest::stock_out(TenantId(1), ProductId(1), dec!(5));
        assert_eq!(request.resolve(), Ok((TransactionType::Sale, dec!(-5))));
    }

    #[test]
    fn adjustment_keeps_the_given_sign() {
        let request = StockMovementRequest::adjustment(TenantId(1), ProductId(1), dec!(-3));
        assert_eq!(
            request.resolve(),
            Ok((TransactionType::AdjustmentDecrease, dec!(-3)))
        );
    }

    #[test]
    fn transaction_type_must_fit_the_movement() {
        let request = StockMovementRequest::stock_in(TenantId(1), ProductId(1), dec!(5))
            .with_transaction_type(TransactionType::Sale);
        assert!(matches!(request.resolve(), Err(LedgerError::Validation(_))));

        let request = StockMovementRequest::stock_in(TenantId(1), ProductId(1), dec!(5))
            .with_transaction_type(TransactionType::TransferIn);
        assert!(matches!(request.resolve(), Err(LedgerError::Validation(_))));

        let request = StockMovementRequest::stock_out(TenantId(1), ProductId(1), dec!(5))
            .with_transaction_type(TransactionType::Consumption);
        assert_eq!(request.resolve(), Ok((TransactionType::Consumption, dec!(-5))));
    }

    #[test]
    fn validation_rejects_bad_input() {
        let zero = StockMovementRequest::stock_in(TenantId(1), ProductId(1), dec!(0));
        assert!(zero.validate().is_err());

        let no_tenant = StockMovementRequest::stock_in(TenantId(0), ProductId(1), dec!(1));
        assert!(no_tenant.validate().is_err());

        let negative_cost = StockMovementRequest::stock_in(TenantId(1), ProductId(1), dec!(1))
            .with_unit_cost(dec!(-0.01));
        assert!(negative_cost.validate().is_err());

        let free = StockMovementRequest::stock_in(TenantId(1), ProductId(1), dec!(1))
            .with_unit_cost(dec!(0));
        assert!(free.validate().is_ok());

        let same = StockMovementRequest::transfer(
            TenantId(1),
            ProductId(1),
            LocationId(1),
            LocationId(1),
            dec!(1),
        );
        assert!(same.validate().is_err());

        let mut missing = same.clone();
        missing.to_location = None;
        assert!(missing.validate().is_err());
    }

    #[test]
    fn transfer_request_from_movement() {
        let request = StockMovementRequest::transfer(
            TenantId(1),
            ProductId(2),
            LocationId(3),
            LocationId(4),
            dec!(-7),
        );
        let transfer = TransferRequest::try_from(request).unwrap();
        assert_eq!(transfer.quantity, dec!(7));
        assert_eq!(transfer.source().location_id, Some(LocationId(3)));
        assert_eq!(transfer.destination().location_id, Some(LocationId(4)));
    }

    #[test]
    fn destination_branch_falls_back_to_source_branch() {
        let transfer = TransferRequest::new(TenantId(1), ProductId(2), LocationId(3), LocationId(4), dec!(1))
            .in_branch(BranchId(1));
        assert_eq!(transfer.source().branch_id, Some(BranchId(1)));
        assert_eq!(transfer.destination().branch_id, Some(BranchId(1)));

        let transfer = transfer.to_branch(BranchId(2));
        assert_eq!(transfer.source().branch_id, Some(BranchId(1)));
        assert_eq!(transfer.destination().branch_id, Some(BranchId(2)));
    }
}
