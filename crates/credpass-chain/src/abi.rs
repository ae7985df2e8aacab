//! Minimal ABI encoding for the read-only contract calls credpass makes.
//!
//! Only 32-byte static words are supported: address arguments and
//! `uint256`/`int256` return values that fit in 128 bits.

use credpass_core::types::Address;
use thiserror::Error;

/// `latestAnswer()`
pub const SELECTOR_LATEST_ANSWER: [u8; 4] = [0x50, 0xd2, 0x5b, 0xdc];
/// `decimals()`
pub const SELECTOR_DECIMALS: [u8; 4] = [0x31, 0x3c, 0xe5, 0x67];
/// `balanceOf(address)`
pub const SELECTOR_BALANCE_OF: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AbiError {
    #[error("expected a 32-byte word, got {0} bytes")] WordLength(usize),
    #[error("value does not fit in 128 bits")] Overflow,
    #[error("invalid hex quantity: {0}")] Quantity(String),
}

/// Left-pad an address into an ABI word.
pub fn address_word(a: &Address) -> [u8; 32] {
    let mut w = [0u8; 32];
    w[12..].copy_from_slice(a.as_bytes());
    w
}

/// Calldata for `selector(args...)`.
pub fn encode_call(selector: [u8; 4], args: &[[u8; 32]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 32 * args.len());
    out.extend_from_slice(&selector);
    for a in args {
        out.extend_from_slice(a);
    }
    out
}

fn first_word(data: &[u8]) -> Result<&[u8], AbiError> {
    if data.len() < 32 {
        return Err(AbiError::WordLength(data.len()));
    }
    Ok(&data[..32])
}

/// Decode a `uint256` that must fit in a `u128`.
pub fn decode_u128(data: &[u8]) -> Result<u128, AbiError> {
    let w = first_word(data)?;
    if w[..16].iter().any(|b| *b != 0) {
        return Err(AbiError::Overflow);
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&w[16..]);
    Ok(u128::from_be_bytes(low))
}

/// Decode an `int256` that must fit in an `i128`.
pub fn decode_i128(data: &[u8]) -> Result<i128, AbiError> {
    let w = first_word(data)?;
    let mut low = [0u8; 16];
    low.copy_from_slice(&w[16..]);
    let v = i128::from_be_bytes(low);
    let fill = if v < 0 { 0xff } else { 0x00 };
    if w[..16].iter().any(|b| *b != fill) {
        return Err(AbiError::Overflow);
    }
    Ok(v)
}

/// Parse a JSON-RPC hex quantity such as `"0x1b4"`.
pub fn parse_quantity(s: &str) -> Result<u64, AbiError> {
    let body = s
        .strip_prefix("0x")
        .ok_or_else(|| AbiError::Quantity(s.to_string()))?;
    if body.is_empty() {
        return Err(AbiError::Quantity(s.to_string()));
    }
    u64::from_str_radix(body, 16).map_err(|_| AbiError::Quantity(s.to_string()))
}

/// Convert a decimal base-unit string into whole units.
///
/// Returns `None` for strings that are not unsigned integers.
pub fn units_to_f64(base_units: &str, decimals: u8) -> Option<f64> {
    let v: u128 = base_units.trim().parse().ok()?;
    Some(v as f64 / 10f64.powi(i32::from(decimals)))
}
