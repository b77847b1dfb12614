//! Relay RPC actions
//!
//! Payloads carried inside encrypted relay envelopes are a closed set of
//! tagged actions. Anything with an unknown tag fails deserialization at
//! this boundary; the relay transport itself lives outside this crate.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::amount::Amount;

/// Action carried by a relay RPC envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RpcAction {
    /// Request to sign an event
    Sign {
        /// Event to sign
        event: Value,
    },
    /// Response carrying a signed event
    Signed {
        /// Signed event
        event: Value,
    },
    /// Balance query
    WalletBalance,
    /// Mint request
    WalletMint {
        /// Amount to mint
        amount: Amount,
    },
    /// Send request
    WalletSend {
        /// Amount to send
        amount: Amount,
        /// Recipient pubkey to lock the token to
        #[serde(skip_serializing_if = "Option::is_none")]
        recipient: Option<String>,
    },
    /// Receive request
    WalletReceive {
        /// Encoded token
        token: String,
    },
    /// Melt request
    WalletMelt {
        /// Invoice to pay
        invoice: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_action_round_trip() {
        let action = RpcAction::WalletSend {
            amount: Amount::from(21),
            recipient: None,
        };
        let json = serde_json::to_string(&action).unwrap();
        assert!(json.contains("\"action\":\"wallet_send\""));
        let back: RpcAction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, action);
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let result: Result<RpcAction, _> =
            serde_json::from_str(r#"{"action":"drain_wallet","amount":21}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_tag_rejected() {
        let result: Result<RpcAction, _> = serde_json::from_str(r#"{"amount":21}"#);
        assert!(result.is_err());
    }
}
