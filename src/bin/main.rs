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

use chrono::NaiveDate;
use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use stock_ledger_rs::{
    InventoryEngine, LedgerConfig, LedgerStore, LocationId, MovementType, ProductId,
    StockMovementRequest, TenantId, ValuationMethod, telemetry,
};

/// Stock Ledger - Replay a movement CSV
///
/// Reads stock movements from a CSV file and writes the resulting balance
/// and value of every dimension key to stdout.
#[derive(Parser, Debug)]
#[command(name = "stock-ledger")]
#[command(about = "Replays stock movement CSVs through the inventory ledger", long_about = None)]
struct Args {
    /// Path to CSV file with movements
    ///
    /// Expected format: type,tenant,product,location,quantity,unit_cost,to_location,expiry
    /// Example: cargo run -- movements.csv > balances.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Lot selection for decreases and the reported value (fifo, lifo, average)
    #[arg(long, default_value = "fifo")]
    valuation: ValuationMethod,

    /// Let decreases drive balances below zero
    #[arg(long)]
    allow_backorders: bool,

    /// Retries of a conflicting append before giving up
    #[arg(long, default_value_t = 3)]
    max_retries: u32,
}

fn main() {
    let args = Args::parse();
    telemetry::init();

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let config = LedgerConfig::default()
        .with_valuation(args.valuation)
        .with_backorders(args.allow_backorders)
        .with_max_retries(args.max_retries);

    let replay = match process_movements(BufReader::new(file), config) {
        Ok(replay) => replay,
        Err(e) => {
            eprintln!("Error processing movements: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = write_balances(&replay, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(rename = "type")]
    movement_type: MovementType,
    tenant: u64,
    product: u64,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    location: Option<u64>,
    quantity: Decimal,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    unit_cost: Option<Decimal>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    to_location: Option<u64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    expiry: Option<NaiveDate>,
}

impl CsvRecord {
    fn into_request(self) -> StockMovementRequest {
        let tenant_id = TenantId(self.tenant);
        let product_id = ProductId(self.product);
        let mut request = match (self.movement_type, self.location, self.to_location) {
            (MovementType::Transfer, Some(from), Some(to)) => StockMovementRequest::transfer(
                tenant_id,
                product_id,
                LocationId(from),
                LocationId(to),
                self.quantity,
            ),
            (movement_type, location, _) => {
                let mut request =
                    StockMovementRequest::new(tenant_id, product_id, movement_type, self.quantity);
                request.location_id = location.map(LocationId);
                request
            }
        };
        request.unit_cost = self.unit_cost;
        request.expiry_date = self.expiry;
        request
    }
}

/// Engine state after a replay, with the tenants it saw.
pub struct Replay {
    pub engine: InventoryEngine,
    pub tenants: BTreeSet<TenantId>,
}

/// Applies every movement of a CSV reader to a fresh engine.
///
/// Products and locations are registered as they first appear. Rows that
/// fail to parse or are rejected by the ledger are logged and skipped.
///
/// # CSV Format
///
/// Expected columns: `type, tenant, product, location, quantity, unit_cost, to_location, expiry`
/// - `type`: Movement type (in, out, adjustment, transfer)
/// - `location`: Location of the movement, or the source of a transfer
/// - `quantity`: Decimal; the sign is only significant for adjustments
/// - `unit_cost`, `to_location`, `expiry`: Optional
///
/// # Example
///
/// ```csv
/// type,tenant,product,location,quantity,unit_cost,to_location,expiry
/// in,1,1,1,100,10.00,,2025-12-31
/// out,1,1,1,30,,,
/// transfer,1,1,1,20,,2,
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
pub fn process_movements<R: Read>(reader: R, config: LedgerConfig) -> Result<Replay, csv::Error> {
    let engine = InventoryEngine::new(config);
    let mut tenants = BTreeSet::new();

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for (line, result) in rdr.deserialize::<CsvRecord>().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(line = line + 2, error = %e, "skipping malformed row");
                continue;
            }
        };

        let tenant_id = TenantId(record.tenant);
        let catalog = engine.catalog();
        catalog.register_product(tenant_id, ProductId(record.product));
        for location in [record.location, record.to_location].into_iter().flatten() {
            catalog.register_location(tenant_id, LocationId(location), None);
        }
        tenants.insert(tenant_id);

        if let Err(e) = engine.record(record.into_request()) {
            tracing::warn!(line = line + 2, error = %e, "skipping rejected movement");
        }
    }

    Ok(Replay { engine, tenants })
}

/// One output row.
#[derive(Debug, Serialize)]
struct BalanceRow {
    tenant: u64,
    product: u64,
    location: Option<u64>,
    balance: Decimal,
    value: Decimal,
}

fn fixed(value: Decimal) -> Decimal {
    let mut value = value.round_dp(4);
    value.rescale(4);
    value
}

/// Writes the balance and value of every key, grouped by tenant.
///
/// # CSV Format
///
/// Columns: `tenant, product, location, balance, value`, with 4 decimal places.
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_balances<W: Write>(replay: &Replay, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    let engine = &replay.engine;
    let method = engine.config().default_valuation;

    for tenant_id in &replay.tenants {
        for key in engine.store().keys(*tenant_id) {
            wtr.serialize(BalanceRow {
                tenant: key.tenant_id.0,
                product: key.product_id.0,
                location: key.location_id.map(|location| location.0),
                balance: fixed(engine.balances().current_balance(&key)),
                value: fixed(engine.valuation().current_value(&key, method)),
            })?;
        }
    }

    wtr.flush()?;
    Ok(())
}
