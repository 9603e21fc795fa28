//! Gasless-stablecoin HTTP payment protocol (§4.3): quote -> verify EIP-712/3009
//! authorization -> on-chain settlement -> post-upload fraud finalization.

pub mod facilitator;
pub mod flow;
pub mod postgres;
pub mod requirements;
pub mod state_machine;
pub mod store;
pub mod types;
mod verify;

pub use facilitator::{Facilitator, FacilitatorError, FakeFacilitator, HttpFacilitator};
pub use flow::{finalize, verify_and_settle};
pub use requirements::{ChainConfig, PaymentRequirements};
pub use state_machine::GaslessStatus;
pub use store::{GaslessPaymentStore, InMemoryGaslessPaymentStore};
pub use types::{
    Authorization, GaslessMode, GaslessPaymentError, GaslessPaymentRecord, GaslessPaymentStatus,
    PaymentHeaderPayload,
};

use base64::{engine::general_purpose::STANDARD, Engine};

/// Decodes the base64-JSON `X-PAYMENT` header (§4.3, §6).
pub fn decode_payment_header(header_value: &str) -> Result<PaymentHeaderPayload, GaslessPaymentError> {
    let bytes = STANDARD
        .decode(header_value.trim())
        .map_err(|e| GaslessPaymentError::Malformed(format!("X-PAYMENT is not valid base64: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| GaslessPaymentError::Malformed(format!("X-PAYMENT is not valid JSON: {e}")))
}

/// Encodes a settled payment's receipt as the base64-JSON `X-Payment-Response` header.
pub fn encode_payment_response(record: &GaslessPaymentRecord) -> String {
    let body = serde_json::json!({
        "success": true,
        "transactionHash": record.chain_tx_hash,
        "payer": record.payer,
    });
    STANDARD.encode(serde_json::to_vec(&body).expect("payment response serializes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_header_round_trips() {
        let payload = PaymentHeaderPayload {
            scheme: "exact".into(),
            network: "base-sepolia".into(),
            authorization: Authorization {
                from: "0xfrom".into(),
                to: "0xto".into(),
                value: "100".into(),
                valid_after: 0,
                valid_before: 1,
                nonce: "0xaa".into(),
                signature: "0xbb".into(),
            },
            asset: "0xusdc".into(),
        };
        let json = serde_json::to_vec(&payload).unwrap();
        let header = STANDARD.encode(json);
        let decoded = decode_payment_header(&header).unwrap();
        assert_eq!(decoded.network, "base-sepolia");
    }

    #[test]
    fn rejects_non_base64_header() {
        assert!(decode_payment_header("not-base64!!!").is_err());
    }
}
