//! Decode/encode primitives shared by the JSON codecs.
//!
//! Tick values and wall-clock times are carried as decimal strings so
//! arbitrary precision survives JSON's 53-bit number range; ±infinity is
//! spelled `"plusinfinity"` / `"minusinfinity"` where a schema allows it.

use num_bigint::BigInt;
use serde_json::{Map, Value};

use crate::error::{WireError, WireResult};

/// Decode a JSON string holding a decimal integer (possibly negative, no
/// leading zeroes) into a big integer.
pub fn decode_int_string(value: &Value, context: &'static str) -> WireResult<BigInt> {
    let s = value
        .as_str()
        .ok_or_else(|| WireError::malformed(context, "expected a string-encoded integer"))?;
    if !is_canonical_int(s) {
        return Err(WireError::malformed(
            context,
            format!("not a decimal integer: {s:?}"),
        ));
    }
    s.parse::<BigInt>()
        .map_err(|e| WireError::malformed(context, e.to_string()))
}

/// Encode a big integer as its JSON string form.
pub fn encode_int_string(value: &BigInt) -> Value {
    Value::String(value.to_string())
}

/// `0`, or an optional minus sign, a non-zero leading digit and digits.
fn is_canonical_int(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    match digits.as_bytes() {
        [] => false,
        [b'0'] => s == "0",
        [first, rest @ ..] => {
            first.is_ascii_digit() && *first != b'0' && rest.iter().all(u8::is_ascii_digit)
        }
    }
}

/// Decode a URI string. Validation is deliberately permissive (any
/// non-empty string without whitespace), mirroring the generic RFC 3986
/// pattern the protocols require.
pub fn decode_uri(value: &Value, context: &'static str) -> WireResult<String> {
    let s = value
        .as_str()
        .ok_or_else(|| WireError::malformed(context, "expected a URI string"))?;
    if s.is_empty() || s.contains(char::is_whitespace) {
        return Err(WireError::malformed(
            context,
            format!("not a valid URI: {s:?}"),
        ));
    }
    Ok(s.to_string())
}

/// Decode a string that must be one of an allowed set of tokens.
pub fn decode_one_of(
    value: &Value,
    allowed: &[&str],
    context: &'static str,
) -> WireResult<String> {
    let s = value
        .as_str()
        .ok_or_else(|| WireError::malformed(context, "expected a string"))?;
    if allowed.contains(&s) {
        Ok(s.to_string())
    } else {
        Err(WireError::malformed(
            context,
            format!("{s:?} is not one of {allowed:?}"),
        ))
    }
}

/// Decode a JSON array element-wise.
pub fn decode_list_of<T>(
    value: &Value,
    context: &'static str,
    decode: impl Fn(&Value) -> WireResult<T>,
) -> WireResult<Vec<T>> {
    value
        .as_array()
        .ok_or_else(|| WireError::malformed(context, "expected a list"))?
        .iter()
        .map(decode)
        .collect()
}

/// Decode private data: a list of objects, each carrying at least a `type`
/// key whose value is a URI.
pub fn decode_private(value: &Value, context: &'static str) -> WireResult<Vec<Map<String, Value>>> {
    decode_list_of(value, context, |item| {
        let object = item
            .as_object()
            .ok_or_else(|| WireError::malformed(context, "private entry is not an object"))?;
        let type_field = object
            .get("type")
            .ok_or_else(|| WireError::malformed(context, "private entry has no type"))?;
        decode_uri(type_field, context)?;
        Ok(object.clone())
    })
}

/// Encode private data back to its JSON form.
pub fn encode_private(private: &[Map<String, Value>]) -> Value {
    Value::Array(private.iter().cloned().map(Value::Object).collect())
}
