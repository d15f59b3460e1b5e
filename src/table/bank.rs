//! Table decoder for a bank ledger key space.
//!
//! Key layout:
//! - `0x00 | denom`                 supply amount (decimal string)
//! - `0x01 | denom`                 denomination metadata (MessagePack)
//! - `0x02 | len | address | denom` account balance (MessagePack coin)
//! - `SendEnabled`                  per-denom send flags (JSON list)
//! - `DefaultSendEnabled`           default send flag (JSON bool)

use super::{
    KeyLayout, KeyMatch, KeyPart, PrefixRouter, TableDecoder, TableInfo, TableSchema,
    TableUpdate,
};
use crate::error::{Result, TapError};
use serde::{Deserialize, Serialize};

pub const SUPPLY_PREFIX: &[u8] = &[0x00];
pub const DENOM_METADATA_PREFIX: &[u8] = &[0x01];
pub const BALANCES_PREFIX: &[u8] = &[0x02];
pub const SEND_ENABLED_KEY: &[u8] = b"SendEnabled";
pub const DEFAULT_SEND_ENABLED_KEY: &[u8] = b"DefaultSendEnabled";

pub const BALANCE_TABLE: TableInfo = TableInfo {
    name: "Balance",
    row_type: "BalanceRow",
    primary_key_fields: &["address", "denom"],
};

pub const SUPPLY_TABLE: TableInfo = TableInfo {
    name: "Supply",
    row_type: "SupplyRow",
    primary_key_fields: &["denom"],
};

pub const METADATA_TABLE: TableInfo = TableInfo {
    name: "Metadata",
    row_type: "MetadataRow",
    primary_key_fields: &["denom"],
};

pub const ENABLED_TABLE: TableInfo = TableInfo {
    name: "Enabled",
    row_type: "EnabledRow",
    primary_key_fields: &["denom"],
};

/// An amount of one denomination.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    pub amount: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenomUnit {
    pub denom: String,
    pub exponent: u32,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Display metadata for a denomination.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub description: String,
    pub denom_units: Vec<DenomUnit>,
    pub base: String,
    pub display: String,
    pub name: String,
    pub symbol: String,
}

/// Send flag for one denomination.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendEnabled {
    pub denom: String,
    pub enabled: bool,
}

#[derive(Serialize)]
struct BalanceRow {
    address: String,
    denom: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    balance: Option<Coin>,
}

#[derive(Serialize)]
struct SupplyRow {
    denom: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    amount: Option<String>,
}

#[derive(Serialize)]
struct MetadataRow {
    denom: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<Metadata>,
}

#[derive(Serialize)]
struct EnabledRow {
    denom: String,
    enabled: bool,
}

fn supply_layout() -> KeyLayout {
    KeyLayout::new(
        SUPPLY_TABLE.name,
        SUPPLY_PREFIX,
        vec![KeyPart::Rest { name: "denom" }],
    )
}

fn metadata_layout() -> KeyLayout {
    KeyLayout::new(
        METADATA_TABLE.name,
        DENOM_METADATA_PREFIX,
        vec![KeyPart::Rest { name: "denom" }],
    )
}

fn balance_layout() -> KeyLayout {
    KeyLayout::new(
        BALANCE_TABLE.name,
        BALANCES_PREFIX,
        vec![
            KeyPart::LengthPrefixed { name: "address" },
            KeyPart::Rest { name: "denom" },
        ],
    )
}

/// Store key of a denomination's supply.
pub fn supply_key(denom: &str) -> Vec<u8> {
    [SUPPLY_PREFIX, denom.as_bytes()].concat()
}

/// Store key of a denomination's metadata.
pub fn metadata_key(denom: &str) -> Vec<u8> {
    [DENOM_METADATA_PREFIX, denom.as_bytes()].concat()
}

/// Store key of an account balance.
pub fn balance_key(address: &[u8], denom: &str) -> Result<Vec<u8>> {
    balance_layout().build(&[address, denom.as_bytes()])
}

fn utf8(table: &str, field: &str, bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| TapError::decode(table, format!("{} is not valid UTF-8", field)))
}

fn row(value: &impl Serialize) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}

fn decode_supply(layout: &KeyLayout, key: &[u8], value: Option<&[u8]>) -> Result<Vec<TableUpdate>> {
    let table = SUPPLY_TABLE.name;
    let parts = layout.split(key)?;
    let denom = utf8(table, "denom", parts[0])?;

    let Some(value) = value else {
        let key_fields = row(&SupplyRow { denom, amount: None })?;
        return Ok(vec![TableUpdate::patch(
            table,
            Some(key_fields),
            vec!["amount".to_string()],
        )]);
    };

    let amount = utf8(table, "amount", value)?;
    let digits = amount.strip_prefix('-').unwrap_or(&amount);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TapError::decode(
            table,
            format!("amount {:?} is not an integer", amount),
        ));
    }

    Ok(vec![TableUpdate::replace(
        table,
        row(&SupplyRow {
            denom,
            amount: Some(amount),
        })?,
    )])
}

fn decode_balance(layout: &KeyLayout, key: &[u8], value: Option<&[u8]>) -> Result<Vec<TableUpdate>> {
    let table = BALANCE_TABLE.name;
    let parts = layout.split(key)?;
    let address = hex::encode(parts[0]);
    let denom = utf8(table, "denom", parts[1])?;

    let Some(value) = value else {
        let key_fields = row(&BalanceRow {
            address,
            denom,
            balance: None,
        })?;
        return Ok(vec![TableUpdate::patch(
            table,
            Some(key_fields),
            vec!["balance".to_string()],
        )]);
    };

    let balance: Coin = rmp_serde::from_slice(value)
        .map_err(|e| TapError::decode(table, format!("unable to unmarshal coin: {}", e)))?;

    Ok(vec![TableUpdate::replace(
        table,
        row(&BalanceRow {
            address,
            denom,
            balance: Some(balance),
        })?,
    )])
}

fn decode_metadata(layout: &KeyLayout, key: &[u8], value: Option<&[u8]>) -> Result<Vec<TableUpdate>> {
    let table = METADATA_TABLE.name;
    let parts = layout.split(key)?;
    let denom = utf8(table, "denom", parts[0])?;

    let Some(value) = value else {
        let key_fields = row(&MetadataRow {
            denom,
            metadata: None,
        })?;
        return Ok(vec![TableUpdate::patch(
            table,
            Some(key_fields),
            vec!["metadata".to_string()],
        )]);
    };

    let metadata: Metadata = rmp_serde::from_slice(value)
        .map_err(|e| TapError::decode(table, format!("unable to unmarshal metadata: {}", e)))?;

    Ok(vec![TableUpdate::replace(
        table,
        row(&MetadataRow {
            denom,
            metadata: Some(metadata),
        })?,
    )])
}

/// The send-enabled list aggregates many rows, so each row is patched.
fn decode_send_enabled(value: Option<&[u8]>) -> Result<Vec<TableUpdate>> {
    let table = ENABLED_TABLE.name;
    let Some(value) = value else {
        return Ok(vec![TableUpdate::patch(
            table,
            None,
            vec!["enabled".to_string()],
        )]);
    };

    let flags: Vec<SendEnabled> = serde_json::from_slice(value)
        .map_err(|e| TapError::decode(table, format!("unable to unmarshal send enabled: {}", e)))?;

    flags
        .into_iter()
        .map(|flag| {
            let updated = row(&EnabledRow {
                denom: flag.denom,
                enabled: flag.enabled,
            })?;
            Ok(TableUpdate::patch(table, Some(updated), Vec::new()))
        })
        .collect()
}

fn decode_default_send_enabled(value: Option<&[u8]>) -> Result<Vec<TableUpdate>> {
    let table = ENABLED_TABLE.name;
    let Some(value) = value else {
        return Ok(vec![TableUpdate::patch(
            table,
            None,
            vec!["enabled".to_string()],
        )]);
    };

    let enabled: bool = serde_json::from_slice(value).map_err(|e| {
        TapError::decode(table, format!("unable to unmarshal default send enabled: {}", e))
    })?;

    Ok(vec![TableUpdate::patch(
        table,
        Some(row(&EnabledRow {
            denom: String::new(),
            enabled,
        })?),
        Vec::new(),
    )])
}

/// Decodes bank ledger entries into `Balance`, `Supply`, `Metadata` and
/// `Enabled` table updates.
pub struct BankTableDecoder {
    router: PrefixRouter,
}

impl BankTableDecoder {
    pub fn new() -> Self {
        let supply = supply_layout();
        let balances = balance_layout();
        let metadata = metadata_layout();

        let router = PrefixRouter::new()
            .route(KeyMatch::Exact(SEND_ENABLED_KEY.to_vec()), |_, value| {
                decode_send_enabled(value)
            })
            .route(KeyMatch::Exact(DEFAULT_SEND_ENABLED_KEY.to_vec()), |_, value| {
                decode_default_send_enabled(value)
            })
            .route(KeyMatch::Prefix(SUPPLY_PREFIX.to_vec()), move |key, value| {
                decode_supply(&supply, key, value)
            })
            .route(KeyMatch::Prefix(BALANCES_PREFIX.to_vec()), move |key, value| {
                decode_balance(&balances, key, value)
            })
            .route(
                KeyMatch::Prefix(DENOM_METADATA_PREFIX.to_vec()),
                move |key, value| decode_metadata(&metadata, key, value),
            );

        Self { router }
    }
}

impl Default for BankTableDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl TableDecoder for BankTableDecoder {
    fn schema(&self) -> TableSchema {
        TableSchema {
            tables: vec![BALANCE_TABLE, SUPPLY_TABLE, METADATA_TABLE, ENABLED_TABLE],
        }
    }

    fn decode(&self, key: &[u8], value: Option<&[u8]>) -> Result<Vec<TableUpdate>> {
        self.router.decode(key, value)
    }
}
