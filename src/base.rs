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

//! Core identifier types and the dimension key a running balance is kept for.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Isolated customer organization. Data of one tenant is never visible to another.
    TenantId
);
id_type!(
    /// Catalog product.
    ProductId
);
id_type!(
    /// Product variant (size, colour, ...).
    VariantId
);
id_type!(
    /// Branch grouping one or more locations.
    BranchId
);
id_type!(
    /// Physical stock location (warehouse, bin, shelf).
    LocationId
);
id_type!(
    /// User who performed a movement.
    UserId
);
id_type!(
    /// Ledger entry identifier.
    ///
    /// Assigned by the store from a single monotonic sequence, so for one
    /// dimension key a higher id always means a later entry.
    EntryId
);
id_type!(
    /// Transfer saga identifier.
    TransferId
);

/// Lots are identified by the increase entry they were opened from.
pub type LotId = EntryId;

/// The tuple a running balance is computed against.
///
/// Two keys that differ in any component (including `None` vs `Some`) are
/// independent balances and may be written fully in parallel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct DimensionKey {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub variant_id: Option<VariantId>,
    pub branch_id: Option<BranchId>,
    pub location_id: Option<LocationId>,
}

impl DimensionKey {
    /// Key for a product with no variant, branch or location.
    pub fn product(tenant_id: TenantId, product_id: ProductId) -> Self {
        Self {
            tenant_id,
            product_id,
            variant_id: None,
            branch_id: None,
            location_id: None,
        }
    }

    pub fn with_variant(mut self, variant_id: VariantId) -> Self {
        self.variant_id = Some(variant_id);
        self
    }

    pub fn with_branch(mut self, branch_id: BranchId) -> Self {
        self.branch_id = Some(branch_id);
        self
    }

    pub fn with_location(mut self, location_id: LocationId) -> Self {
        self.location_id = Some(location_id);
        self
    }
}

impl fmt::Display for DimensionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn opt<T: fmt::Display>(value: &Option<T>) -> String {
            value
                .as_ref()
                .map_or_else(|| "-".to_string(), ToString::to_string)
        }

        write!(
            f,
            "tenant={} product={} variant={} branch={} location={}",
            self.tenant_id,
            self.product_id,
            opt(&self.variant_id),
            opt(&self.branch_id),
            opt(&self.location_id)
        )
    }
}
