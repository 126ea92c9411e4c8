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

//! Reference data the ledger validates against.
//!
//! Products, variants and locations are owned by other parts of the ERP;
//! the catalog is the ledger's local view of them, scoped per tenant.

use crate::base::{BranchId, DimensionKey, LocationId, ProductId, TenantId, VariantId};
use crate::error::{LedgerError, Resource};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashSet;

#[derive(Debug, Clone, Default)]
struct ProductRecord {
    variants: HashSet<VariantId>,
    reorder_level: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, Default)]
struct LocationRecord {
    branch_id: Option<BranchId>,
}

#[derive(Debug, Default)]
pub struct Catalog {
    products: DashMap<(TenantId, ProductId), ProductRecord>,
    locations: DashMap<(TenantId, LocationId), LocationRecord>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_product(&self, tenant_id: TenantId, product_id: ProductId) {
        self.products.entry((tenant_id, product_id)).or_default();
    }

    pub fn register_variant(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        variant_id: VariantId,
    ) -> Result<(), LedgerError> {
        let mut product = self
            .products
            .get_mut(&(tenant_id, product_id))
            .ok_or(LedgerError::not_found(tenant_id, Resource::Product, product_id.0))?;
        product.variants.insert(variant_id);
        Ok(())
    }

    pub fn set_reorder_level(
        &self,
        tenant_id: TenantId,
        product_id: ProductId,
        level: Decimal,
    ) -> Result<(), LedgerError> {
        if level < Decimal::ZERO {
            return Err(LedgerError::validation("reorder level must not be negative"));
        }
        let mut product = self
            .products
            .get_mut(&(tenant_id, product_id))
            .ok_or(LedgerError::not_found(tenant_id, Resource::Product, product_id.0))?;
        product.reorder_level = Some(level);
        Ok(())
    }

    pub fn reorder_level(&self, tenant_id: TenantId, product_id: ProductId) -> Option<Decimal> {
        self.products
            .get(&(tenant_id, product_id))
            .and_then(|product| product.reorder_level)
    }

    pub fn register_location(
        &self,
        tenant_id: TenantId,
        location_id: LocationId,
        branch_id: Option<BranchId>,
    ) {
        self.locations
            .insert((tenant_id, location_id), LocationRecord { branch_id });
    }

    /// Branch a registered location belongs to.
    pub fn location_branch(&self, tenant_id: TenantId, location_id: LocationId) -> Option<BranchId> {
        self.locations
            .get(&(tenant_id, location_id))
            .and_then(|location| location.branch_id)
    }

    pub fn ensure_location(
        &self,
        tenant_id: TenantId,
        location_id: LocationId,
        branch_id: Option<BranchId>,
    ) -> Result<(), LedgerError> {
        let location = self
            .locations
            .get(&(tenant_id, location_id))
            .ok_or(LedgerError::not_found(tenant_id, Resource::Location, location_id.0))?;
        if let (Some(owner), Some(requested)) = (location.branch_id, branch_id) {
            if owner != requested {
                return Err(LedgerError::validation(format!(
                    "location {location_id} belongs to branch {owner}, not {requested}"
                )));
            }
        }
        Ok(())
    }

    /// Fails with `NotFound` for the first unknown component of `key`.
    pub fn ensure_key(&self, key: &DimensionKey) -> Result<(), LedgerError> {
        let tenant_id = key.tenant_id;
        {
            let product = self
                .products
                .get(&(tenant_id, key.product_id))
                .ok_or(LedgerError::not_found(tenant_id, Resource::Product, key.product_id.0))?;
            if let Some(variant_id) = key.variant_id {
                if !product.variants.contains(&variant_id) {
                    return Err(LedgerError::not_found(tenant_id, Resource::Variant, variant_id.0));
                }
            }
        }
        if let Some(location_id) = key.location_id {
            self.ensure_location(tenant_id, location_id, key.branch_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn unknown_references_are_not_found() {
        let catalog = Catalog::new();
        let key = DimensionKey::product(TenantId(1), ProductId(1)).with_location(LocationId(2));
        assert_eq!(
            catalog.ensure_key(&key),
            Err(LedgerError::not_found(TenantId(1), Resource::Product, 1))
        );

        catalog.register_product(TenantId(1), ProductId(1));
        assert_eq!(
            catalog.ensure_key(&key),
            Err(LedgerError::not_found(TenantId(1), Resource::Location, 2))
        );

        catalog.register_location(TenantId(1), LocationId(2), None);
        assert_eq!(catalog.ensure_key(&key), Ok(()));

        let variant = key.with_variant(VariantId(5));
        assert_eq!(
            catalog.ensure_key(&variant),
            Err(LedgerError::not_found(TenantId(1), Resource::Variant, 5))
        );
    }

    #[test]
    fn tenants_do_not_share_products() {
        let catalog = Catalog::new();
        catalog.register_product(TenantId(1), ProductId(1));
        let other = DimensionKey::product(TenantId(2), ProductId(1));
        assert!(catalog.ensure_key(&other).is_err());
    }

    #[test]
    fn location_branch_must_match() {
        let catalog = Catalog::new();
        catalog.register_location(TenantId(1), LocationId(1), Some(BranchId(10)));
        assert!(catalog.ensure_location(TenantId(1), LocationId(1), Some(BranchId(10))).is_ok());
        assert!(catalog.ensure_location(TenantId(1), LocationId(1), None).is_ok());
        assert!(matches!(
            catalog.ensure_location(TenantId(1), LocationId(1), Some(BranchId(11))),
            Err(LedgerError::Validation(_))
        ));
        assert_eq!(catalog.location_branch(TenantId(1), LocationId(1)), Some(BranchId(10)));
        assert_eq!(catalog.location_branch(TenantId(1), LocationId(2)), None);
    }

    #[test]
    fn reorder_level_requires_product() {
        let catalog = Catalog::new();
        assert!(catalog.set_reorder_level(TenantId(1), ProductId(1), dec!(5)).is_err());
        catalog.register_product(TenantId(1), ProductId(1));
        catalog.set_reorder_level(TenantId(1), ProductId(1), dec!(5)).unwrap();
        assert_eq!(catalog.reorder_level(TenantId(1), ProductId(1)), Some(dec!(5)));
    }
}
