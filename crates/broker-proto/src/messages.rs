//! JSON payload types carried inside Intercom2 frames.
//!
//! The wallet peer speaks camelCase JSON; the serde renames below are part
//! of the wire contract.

use serde::{Deserialize, Serialize};

/// One address/amount pair inside a NOTIFY payload. `balance` is an
/// integer string in the coin's smallest unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBalance {
    pub address: String,
    pub balance: String,
}

/// Asynchronous transaction observation pushed by the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notify {
    pub txid: String,
    pub coin: String,
    pub confirmations: i64,
    #[serde(default)]
    pub blockhash: Option<String>,
    #[serde(default)]
    pub balances: Vec<AddressBalance>,
}

/// Periodic wallet health snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub coin: String,
    pub online: bool,
    pub synced: bool,
    pub crawling: bool,
    pub blockheight: i64,
    #[serde(rename = "bestBlockHash")]
    pub best_block_hash: String,
    pub blocktime: i64,
}

/// Withdrawal request serialized into a SEND_FUNDS payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub coin: String,
    #[serde(rename = "toAddress")]
    pub to_address: String,
    /// Integer string in the coin's smallest unit.
    pub amount: String,
}

/// Structured command reply from the wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandReply {
    #[serde(rename = "isError")]
    pub is_error: bool,
    /// A string for simple commands, an object or list for data commands.
    pub message: serde_json::Value,
}

impl CommandReply {
    /// Successful reply carrying a plain string message.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            is_error: false,
            message: serde_json::Value::String(message.into()),
        }
    }

    /// Error reply carrying a plain string message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            is_error: true,
            message: serde_json::Value::String(message.into()),
        }
    }
}

/// Outcome of decoding a reply payload.
///
/// Replies that do not parse as [`CommandReply`] are delivered verbatim —
/// some wallet builds answer control commands with free-form text.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyPayload {
    Structured(CommandReply),
    Raw(Vec<u8>),
}

/// Uniform reply decode rule applied to every command reply.
pub fn decode_reply(bytes: &[u8]) -> ReplyPayload {
    match serde_json::from_slice::<CommandReply>(bytes) {
        Ok(reply) => ReplyPayload::Structured(reply),
        Err(_) => ReplyPayload::Raw(bytes.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_decodes_wallet_json() {
        let json = r#"{
            "txid": "T1",
            "coin": "X",
            "confirmations": 3,
            "blockhash": "000000abc",
            "balances": [{"address": "A1", "balance": "150000000"}]
        }"#;
        let notify: Notify = serde_json::from_str(json).unwrap();
        assert_eq!(notify.txid, "T1");
        assert_eq!(notify.confirmations, 3);
        assert_eq!(notify.balances.len(), 1);
        assert_eq!(notify.balances[0].balance, "150000000");
    }

    #[test]
    fn notify_tolerates_missing_optionals() {
        let json = r#"{"txid": "T2", "coin": "X", "confirmations": 0}"#;
        let notify: Notify = serde_json::from_str(json).unwrap();
        assert!(notify.blockhash.is_none());
        assert!(notify.balances.is_empty());
    }

    #[test]
    fn heartbeat_uses_camel_case_block_hash() {
        let json = r#"{
            "coin": "X", "online": true, "synced": true, "crawling": false,
            "blockheight": 900, "bestBlockHash": "H", "blocktime": 1700000000
        }"#;
        let hb: Heartbeat = serde_json::from_str(json).unwrap();
        assert_eq!(hb.best_block_hash, "H");
        let out = serde_json::to_value(&hb).unwrap();
        assert!(out.get("bestBlockHash").is_some());
    }

    #[test]
    fn reply_parse_structured() {
        let bytes = br#"{"isError": false, "message": "addr123"}"#;
        match decode_reply(bytes) {
            ReplyPayload::Structured(reply) => {
                assert!(!reply.is_error);
                assert_eq!(reply.message, serde_json::json!("addr123"));
            }
            other => panic!("expected structured reply, got {other:?}"),
        }
    }

    #[test]
    fn reply_parse_falls_back_to_raw() {
        let bytes = b"wallet v0.9.1 running";
        match decode_reply(bytes) {
            ReplyPayload::Raw(raw) => assert_eq!(raw, bytes),
            other => panic!("expected raw reply, got {other:?}"),
        }
    }

    #[test]
    fn transaction_request_wire_names() {
        let req = TransactionRequest {
            user_id: "U1".into(),
            coin: "X".into(),
            to_address: "A9".into(),
            amount: "250000000".into(),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert!(value.get("userId").is_some());
        assert!(value.get("toAddress").is_some());
    }
}
