use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::CoreError;
use crate::types::{AccountState, BlockInfo, NodeStatus, TxState, TxStatus};

pub(super) fn required_str<'a>(raw: &'a Value, field: &str) -> Result<&'a str, CoreError> {
    raw.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CoreError::InvalidResponse(format!("missing {field}")))
}

pub(super) fn optional_str(raw: &Value, field: &str) -> Option<String> {
    raw.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

pub(super) fn required_u64(raw: &Value, field: &str) -> Result<u64, CoreError> {
    raw.get(field)
        .and_then(Value::as_u64)
        .ok_or_else(|| CoreError::InvalidResponse(format!("missing {field}")))
}

pub(super) fn optional_u64(raw: &Value, field: &str) -> Option<u64> {
    raw.get(field).and_then(Value::as_u64)
}

/// `sendrawtransaction` returns the txid as a bare string.
pub(super) fn parse_submitted_txid(raw: Value) -> Result<String, CoreError> {
    match raw {
        Value::String(txid) if !txid.trim().is_empty() => Ok(txid),
        Value::String(_) | Value::Null => Err(CoreError::InvalidResponse(
            "sendrawtransaction returned an empty transaction id".to_owned(),
        )),
        other => Err(CoreError::InvalidResponse(format!(
            "sendrawtransaction returned a non-string transaction id: {other}"
        ))),
    }
}

/// Map a verbose `getrawtransaction` result onto a status. The block
/// height is left unset; it needs a separate lookup by block hash.
pub(super) fn parse_tx_status(requested_txid: &str, raw: &Value) -> Result<TxStatus, CoreError> {
    if !raw.is_object() {
        return Err(CoreError::InvalidResponse(format!(
            "getrawtransaction returned no transaction for {requested_txid}"
        )));
    }

    let txid = optional_str(raw, "txid").unwrap_or_else(|| requested_txid.to_owned());
    let confirmations = optional_u64(raw, "confirmations").unwrap_or(0);

    Ok(TxStatus {
        txid,
        state: TxState::from_confirmations(confirmations),
        confirmations,
        block_hash: optional_str(raw, "blockhash"),
        block_height: None,
        block_time: optional_u64(raw, "blocktime"),
    })
}

pub(super) fn parse_block_info(raw: &Value) -> Result<BlockInfo, CoreError> {
    let tx_count = raw
        .get("tx")
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or(0);

    Ok(BlockInfo {
        hash: required_str(raw, "hash")?.to_owned(),
        height: required_u64(raw, "height")?,
        time: optional_u64(raw, "time").unwrap_or(0),
        confirmations: optional_u64(raw, "confirmations").unwrap_or(0),
        previous_hash: optional_str(raw, "previousblockhash"),
        miner: optional_str(raw, "miner"),
        tx_count,
    })
}

/// Flatten `getaddressbalances` output: the entry without an asset name is
/// the native currency, every named entry is kept under its name.
pub(super) fn parse_account_state(address: &str, raw: &Value) -> Result<AccountState, CoreError> {
    let entries = raw.as_array().ok_or_else(|| {
        CoreError::InvalidResponse(format!(
            "getaddressbalances returned a non-array result for {address}"
        ))
    })?;

    let mut balance = 0.0;
    let mut assets = BTreeMap::new();
    for entry in entries {
        let qty = entry
            .get("qty")
            .and_then(Value::as_f64)
            .ok_or_else(|| CoreError::InvalidResponse("missing qty in balance entry".into()))?;
        match entry.get("name").and_then(Value::as_str) {
            None | Some("") => balance += qty,
            Some(name) => {
                *assets.entry(name.to_owned()).or_insert(0.0) += qty;
            }
        }
    }

    Ok(AccountState {
        address: address.to_owned(),
        balance,
        assets,
    })
}

pub(super) fn parse_node_status(raw: &Value) -> Result<NodeStatus, CoreError> {
    Ok(NodeStatus {
        chain_name: required_str(raw, "chainname")?.to_owned(),
        version: optional_str(raw, "version").unwrap_or_default(),
        protocol_version: optional_u64(raw, "protocolversion").unwrap_or(0),
        blocks: required_u64(raw, "blocks")?,
        connections: optional_u64(raw, "connections").unwrap_or(0),
        node_address: optional_str(raw, "nodeaddress"),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn submitted_txid_must_be_non_empty() {
        assert_eq!(parse_submitted_txid(json!("ab12")).unwrap(), "ab12");
        assert!(parse_submitted_txid(json!("")).is_err());
        assert!(parse_submitted_txid(json!(null)).is_err());
        assert!(parse_submitted_txid(json!({"txid": "ab"})).is_err());
    }

    #[test]
    fn tx_status_pending_without_block() {
        let status = parse_tx_status("ab", &json!({"txid": "ab", "confirmations": 0})).unwrap();
        assert_eq!(status.state, TxState::Pending);
        assert_eq!(status.block_hash, None);
    }

    #[test]
    fn tx_status_confirmed_with_block_hash() {
        let status = parse_tx_status(
            "ab",
            &json!({"txid": "ab", "confirmations": 6, "blockhash": "00ff", "blocktime": 1700000000}),
        )
        .unwrap();
        assert_eq!(status.state, TxState::Confirmed);
        assert_eq!(status.confirmations, 6);
        assert_eq!(status.block_hash.as_deref(), Some("00ff"));
        assert_eq!(status.block_time, Some(1_700_000_000));
        assert_eq!(status.block_height, None);
    }

    #[test]
    fn tx_status_rejects_null_result() {
        assert!(parse_tx_status("ab", &Value::Null).is_err());
    }

    #[test]
    fn account_state_flattens_named_balances() {
        let state = parse_account_state(
            "A1",
            &json!([
                {"name": "", "assetref": "", "qty": 100.5},
                {"name": "USD", "assetref": "6-266-60835", "qty": 25.0},
                {"name": "GOLD", "assetref": "7-300-1", "qty": 3.0}
            ]),
        )
        .unwrap();

        assert_eq!(state.address, "A1");
        assert_eq!(state.balance, 100.5);
        assert_eq!(state.assets.len(), 2);
        assert_eq!(state.assets["USD"], 25.0);
        assert_eq!(state.assets["GOLD"], 3.0);
    }

    #[test]
    fn account_state_empty_list_is_zero_balance() {
        let state = parse_account_state("A1", &json!([])).unwrap();
        assert_eq!(state.balance, 0.0);
        assert!(state.assets.is_empty());
    }

    #[test]
    fn account_state_requires_array() {
        assert!(parse_account_state("A1", &json!({"qty": 1})).is_err());
    }

    #[test]
    fn block_info_requires_hash_and_height() {
        let block = parse_block_info(&json!({
            "hash": "00aa", "height": 12, "time": 5, "confirmations": 2,
            "previousblockhash": "0099", "miner": "1Miner", "tx": ["t1", "t2"]
        }))
        .unwrap();
        assert_eq!(block.height, 12);
        assert_eq!(block.tx_count, 2);
        assert_eq!(block.previous_hash.as_deref(), Some("0099"));

        let err = parse_block_info(&json!({"height": 12})).unwrap_err();
        assert_eq!(err, CoreError::InvalidResponse("missing hash".into()));
    }

    #[test]
    fn node_status_from_getinfo() {
        let status = parse_node_status(&json!({
            "version": "2.3.3", "nodeversion": 20303901, "protocolversion": 20013,
            "chainname": "chain1", "description": "MultiChain chain1",
            "nodeaddress": "chain1@10.0.0.5:7447", "blocks": 1024, "connections": 3
        }))
        .unwrap();
        assert_eq!(status.chain_name, "chain1");
        assert_eq!(status.blocks, 1024);
        assert_eq!(status.connections, 3);
        assert_eq!(status.node_address.as_deref(), Some("chain1@10.0.0.5:7447"));
    }
}
