//! Decoding of XDR `ScVal` payloads carried by contract events.
//!
//! Event topics and values arrive as base64 XDR. They are turned into plain JSON so the event
//! model can read fields by name without depending on the XDR types.

use base64::{Engine, engine::general_purpose::STANDARD};
use serde_json::{Map, Value};
use stellar_xdr::curr::{Limits, ReadXdr, ScVal};

use super::RpcError;

/// Decode one base64 XDR `ScVal` into JSON.
pub fn decode_scval(encoded: &str) -> Result<Value, RpcError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| RpcError::XdrError(format!("invalid base64: {}", e)))?;
    let val = ScVal::from_xdr(&bytes, Limits::none())
        .map_err(|e| RpcError::XdrError(format!("invalid ScVal: {}", e)))?;
    Ok(scval_to_json(&val))
}

/// Convert an `ScVal` into JSON. Integers beyond the `i64` range become decimal strings;
/// values with no natural JSON shape become `null`.
pub fn scval_to_json(val: &ScVal) -> Value {
    match val {
        ScVal::Bool(b) => Value::Bool(*b),
        ScVal::Void => Value::Null,
        ScVal::U32(n) => Value::from(*n),
        ScVal::I32(n) => Value::from(*n),
        ScVal::U64(n) => Value::from(*n),
        ScVal::I64(n) => Value::from(*n),
        ScVal::Timepoint(t) => Value::from(t.0),
        ScVal::Duration(d) => Value::from(d.0),
        ScVal::U128(parts) => {
            let n = ((parts.hi as u128) << 64) | parts.lo as u128;
            match i64::try_from(n) {
                Ok(small) => Value::from(small),
                Err(_) => Value::String(n.to_string()),
            }
        }
        ScVal::I128(parts) => {
            let n = ((parts.hi as i128) << 64) | parts.lo as i128;
            match i64::try_from(n) {
                Ok(small) => Value::from(small),
                Err(_) => Value::String(n.to_string()),
            }
        }
        ScVal::Bytes(bytes) => Value::String(hex::encode(bytes.0.as_slice())),
        ScVal::String(s) => Value::String(s.0.to_utf8_string_lossy()),
        ScVal::Symbol(s) => Value::String(s.0.to_utf8_string_lossy()),
        ScVal::Address(address) => Value::String(address.to_string()),
        ScVal::Vec(Some(items)) => Value::Array(items.0.iter().map(scval_to_json).collect()),
        ScVal::Vec(None) => Value::Array(Vec::new()),
        ScVal::Map(Some(entries)) => {
            let mut map = Map::new();
            for entry in entries.0.iter() {
                map.insert(map_key(&entry.key), scval_to_json(&entry.val));
            }
            Value::Object(map)
        }
        ScVal::Map(None) => Value::Object(Map::new()),
        _ => Value::Null,
    }
}

fn map_key(key: &ScVal) -> String {
    match scval_to_json(key) {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stellar_xdr::curr::{
        Int128Parts, ScMap, ScMapEntry, ScString, ScSymbol, StringM, VecM, WriteXdr,
    };

    fn symbol(s: &str) -> ScVal {
        ScVal::Symbol(ScSymbol(StringM::try_from(s).unwrap()))
    }

    fn encode(val: &ScVal) -> String {
        STANDARD.encode(val.to_xdr(Limits::none()).unwrap())
    }

    #[test]
    fn test_decode_symbol_topic() {
        let decoded = decode_scval(&encode(&symbol("booking_created"))).unwrap();
        assert_eq!(decoded, json!("booking_created"));
    }

    #[test]
    fn test_decode_booking_payload() {
        let entries = vec![
            ScMapEntry {
                key: symbol("escrow_id"),
                val: ScVal::String(ScString(StringM::try_from("escrow-1").unwrap())),
            },
            ScMapEntry {
                key: symbol("start_date"),
                val: ScVal::U64(1_700_000_000),
            },
            ScMapEntry {
                key: symbol("status"),
                val: symbol("Confirmed"),
            },
            ScMapEntry {
                key: symbol("total_price"),
                val: ScVal::I128(Int128Parts { hi: 0, lo: 2_500 }),
            },
        ];
        let val = ScVal::Map(Some(ScMap(VecM::try_from(entries).unwrap())));

        let decoded = decode_scval(&encode(&val)).unwrap();
        assert_eq!(
            decoded,
            json!({
                "escrow_id": "escrow-1",
                "start_date": 1_700_000_000u64,
                "status": "Confirmed",
                "total_price": 2500
            })
        );
    }

    #[test]
    fn test_large_i128_becomes_string() {
        let val = ScVal::I128(Int128Parts { hi: 1, lo: 0 });
        assert_eq!(scval_to_json(&val), json!("18446744073709551616"));
    }

    #[test]
    fn test_invalid_payloads() {
        assert!(matches!(decode_scval("%%%"), Err(RpcError::XdrError(_))));
        assert!(matches!(
            decode_scval(&STANDARD.encode([0xff, 0xff])),
            Err(RpcError::XdrError(_))
        ));
    }
}
