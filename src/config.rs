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

//! Engine configuration.

use crate::valuation::ValuationMethod;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the recorder and the valuation engine.
///
/// Deserializes from partial documents; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Let decreases drive a balance below zero.
    pub allow_backorders: bool,
    /// Lot-selection rule for decreases that do not name one.
    pub default_valuation: ValuationMethod,
    /// Extra attempts after a `ConcurrencyConflict` before giving up.
    pub max_append_retries: u32,
    /// Base of the exponential retry backoff.
    pub retry_base_delay_ms: u64,
    /// How many entries a valuation replay processes between cancellation checks.
    pub cancellation_check_interval: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            allow_backorders: false,
            default_valuation: ValuationMethod::Fifo,
            max_append_retries: 3,
            retry_base_delay_ms: 2,
            cancellation_check_interval: 1024,
        }
    }
}

impl LedgerConfig {
    pub fn with_backorders(mut self, allow: bool) -> Self {
        self.allow_backorders = allow;
        self
    }

    pub fn with_valuation(mut self, method: ValuationMethod) -> Self {
        self.default_valuation = method;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_append_retries = retries;
        self
    }

    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(10);
        Duration::from_millis(self.retry_base_delay_ms.saturating_mul(factor))
    }
}
