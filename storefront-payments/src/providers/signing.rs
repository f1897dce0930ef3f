//! Helpers shared by the gateway signing schemes.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

use super::GatewayError;

/// Flat parameter set; `BTreeMap` keeps keys in the byte order gateways sort by.
pub type Params = BTreeMap<String, String>;

/// Build the `k1=v1&k2=v2` string both wallet gateways sign.
///
/// Keys are sorted ascending, empty values are skipped and `excluded` keys
/// (the signature fields themselves) are left out. Values are not URL-encoded.
pub fn canonical_string(params: &Params, excluded: &[&str]) -> String {
    params
        .iter()
        .filter(|(key, value)| !value.is_empty() && !excluded.contains(&key.as_str()))
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join("&")
}

/// Major units with two decimals, as the wallet gateways expect (`"99.90"`).
pub fn format_major_units(amount: Decimal) -> String {
    format!("{:.2}", amount.round_dp(2))
}

/// Convert to the smallest currency unit (cents/fen).
pub fn to_minor_units(amount: Decimal) -> Result<i64, GatewayError> {
    (amount * Decimal::ONE_HUNDRED)
        .round()
        .to_i64()
        .filter(|units| *units > 0)
        .ok_or_else(|| GatewayError::Configuration(format!("Unsupported amount: {}", amount)))
}

pub fn from_minor_units(units: i64) -> Decimal {
    Decimal::new(units, 2)
}

/// Random 32-char token for nonces.
pub fn nonce() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Accept either PEM or the bare base64 body gateways hand out in consoles.
pub fn normalize_pem(key: &str, label: &str) -> String {
    let trimmed = key.trim();
    if trimmed.starts_with("-----BEGIN") {
        return trimmed.to_string();
    }

    let body: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    let mut pem = format!("-----BEGIN {}-----\n", label);
    for chunk in body.as_bytes().chunks(64) {
        pem.push_str(&String::from_utf8_lossy(chunk));
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {}-----\n", label));
    pem
}
