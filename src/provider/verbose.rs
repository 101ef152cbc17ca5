//! Parsing of verbose (JSON) transaction descriptions.
//!
//! Both backends ultimately hand out the same JSON shape (the Electrum
//! protocol returns it directly, the light-client protocol embeds it inside
//! a raw-transaction blob), so the defensive field-walking lives here once.

use serde_json::Value;

use crate::provider::{ChainTransaction, TransactionInput, TransactionOutput};

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum VerboseParseError {
    /// Response shape is wrong; treat the server as misbehaving.
    Shape,
    /// Well-formed but missing output addresses, which downstream balance
    /// accounting requires; the server should be quarantined.
    MissingAddresses,
}

pub(crate) fn parse_verbose_transaction(
    tx_hash: &str,
    transaction: &Value,
) -> Result<ChainTransaction, VerboseParseError> {
    let object = transaction.as_object().ok_or(VerboseParseError::Shape)?;

    let size = object
        .get("size")
        .and_then(Value::as_u64)
        .ok_or(VerboseParseError::Shape)? as u32;
    let locktime = object
        .get("locktime")
        .and_then(Value::as_u64)
        .ok_or(VerboseParseError::Shape)? as u32;

    // Absent for unconfirmed transactions.
    let timestamp = object
        .get("time")
        .and_then(Value::as_u64)
        .map(|time| time as u32);

    let raw_inputs = object
        .get("vin")
        .and_then(Value::as_array)
        .ok_or(VerboseParseError::Shape)?;
    let mut inputs = Vec::with_capacity(raw_inputs.len());
    for input in raw_inputs {
        let script_sig = input
            .get("scriptSig")
            .and_then(|script_sig| script_sig.get("hex"))
            .and_then(Value::as_str)
            .ok_or(VerboseParseError::Shape)?;
        let sequence = input
            .get("sequence")
            .and_then(Value::as_u64)
            .ok_or(VerboseParseError::Shape)? as u32;
        let output_tx_hash = input
            .get("txid")
            .and_then(Value::as_str)
            .ok_or(VerboseParseError::Shape)?;
        let output_vout = input
            .get("vout")
            .and_then(Value::as_u64)
            .ok_or(VerboseParseError::Shape)? as u32;

        inputs.push(TransactionInput {
            script_sig: script_sig.to_string(),
            sequence,
            output_tx_hash: output_tx_hash.to_string(),
            output_vout,
        });
    }

    let raw_outputs = object
        .get("vout")
        .and_then(Value::as_array)
        .ok_or(VerboseParseError::Shape)?;
    let mut outputs = Vec::with_capacity(raw_outputs.len());
    for output in raw_outputs {
        let script = output.get("scriptPubKey").ok_or(VerboseParseError::Shape)?;

        let script_pub_key = script
            .get("hex")
            .and_then(Value::as_str)
            .ok_or(VerboseParseError::Shape)?;

        let value_btc = output
            .get("value")
            .and_then(Value::as_f64)
            .ok_or(VerboseParseError::Shape)?;
        let value = bitcoin::Amount::from_btc(value_btc)
            .map_err(|_| VerboseParseError::Shape)?
            .to_sat();

        // Addresses arrive as an "addresses" array or, from some servers, a
        // single "address" string.
        let mut addresses = Vec::new();
        if let Some(list) = script.get("addresses").and_then(Value::as_array) {
            for address in list {
                if let Some(address) = address.as_str() {
                    addresses.push(address.to_string());
                }
            }
        }
        if let Some(address) = script.get("address").and_then(Value::as_str) {
            addresses.push(address.to_string());
        }

        if addresses.is_empty() {
            return Err(VerboseParseError::MissingAddresses);
        }

        outputs.push(TransactionOutput {
            script_pub_key: script_pub_key.to_string(),
            value,
            addresses,
        });
    }

    Ok(ChainTransaction {
        tx_hash: tx_hash.to_string(),
        size,
        locktime,
        timestamp,
        height: 0,
        inputs,
        outputs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn full_transaction_parses() {
        let raw = json!({
            "size": 223,
            "locktime": 0,
            "time": 1_650_000_000u32,
            "vin": [{
                "txid": "aa".repeat(32),
                "vout": 1,
                "scriptSig": {"hex": "0011"},
                "sequence": 4_294_967_294u32,
            }],
            "vout": [{
                "value": 0.5,
                "scriptPubKey": {
                    "hex": "76a914000000000000000000000000000000000000000088ac",
                    "addresses": ["1AddressForTests"],
                },
            }],
        });

        let transaction = parse_verbose_transaction(&"bb".repeat(32), &raw).unwrap();
        assert_eq!(transaction.size, 223);
        assert_eq!(transaction.timestamp, Some(1_650_000_000));
        assert_eq!(transaction.inputs[0].output_vout, 1);
        assert_eq!(transaction.inputs[0].sequence, 0xffff_fffe);
        assert_eq!(transaction.outputs[0].value, 50_000_000);
        assert_eq!(transaction.outputs[0].addresses, vec!["1AddressForTests"]);
    }

    #[test]
    fn single_address_key_is_accepted() {
        let raw = json!({
            "size": 100,
            "locktime": 0,
            "vin": [],
            "vout": [{
                "value": 0.1,
                "scriptPubKey": {"hex": "51", "address": "1AddressForTests"},
            }],
        });

        let transaction = parse_verbose_transaction(&"cc".repeat(32), &raw).unwrap();
        assert_eq!(transaction.outputs[0].addresses, vec!["1AddressForTests"]);
        assert_eq!(transaction.timestamp, None);
    }

    #[test]
    fn missing_addresses_are_distinguished_from_bad_shape() {
        let no_addresses = json!({
            "size": 100,
            "locktime": 0,
            "vin": [],
            "vout": [{"value": 0.1, "scriptPubKey": {"hex": "51"}}],
        });
        assert_eq!(
            parse_verbose_transaction("00", &no_addresses),
            Err(VerboseParseError::MissingAddresses)
        );

        let bad_shape = json!({"size": 100});
        assert_eq!(
            parse_verbose_transaction("00", &bad_shape),
            Err(VerboseParseError::Shape)
        );
    }
}
