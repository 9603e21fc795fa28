//! EIP-712/ERC-3009 authorization verification (§4.3 "Verification contract").
//!
//! Grounded on `other_examples/.../x402-rs-x402-rs__src-facilitator_local.rs.rs`'s
//! `assert_signature`/`assert_domain`/`assert_time`: construct the `TransferWithAuthorization`
//! EIP-712 struct hash under the stablecoin's typed-data domain, recover the signer,
//! and check it against `authorization.from`. Unlike that reference this crate has no
//! on-chain provider — the domain's `name`/`version` come from configuration
//! ([`super::requirements::ChainConfig`]), not a live `contract.version()` call.

use alloy_primitives::{Address, Signature, B256, U256};
use alloy_sol_types::{eip712_domain, sol, SolStruct};
use chrono::Utc;

use super::requirements::ChainConfig;
use super::types::{Authorization, GaslessPaymentError};

sol! {
    pub struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
}

/// 6-second grace window on expiry checks, matching the reference facilitator's
/// buffer for request latency between quote and verify.
const EXPIRY_GRACE_SECONDS: u64 = 6;

fn parse_address(s: &str, what: &str) -> Result<Address, GaslessPaymentError> {
    s.parse::<Address>()
        .map_err(|e| GaslessPaymentError::Malformed(format!("{what} {s:?}: {e}")))
}

fn parse_nonce(s: &str) -> Result<B256, GaslessPaymentError> {
    let hex = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(hex).map_err(|e| GaslessPaymentError::Malformed(format!("nonce: {e}")))?;
    if bytes.len() != 32 {
        return Err(GaslessPaymentError::Malformed("nonce must be 32 bytes".into()));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(B256::from(out))
}

fn parse_signature(s: &str) -> Result<Signature, GaslessPaymentError> {
    let hex = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(hex).map_err(|e| GaslessPaymentError::Malformed(format!("signature: {e}")))?;
    Signature::from_raw(&bytes).map_err(|e| GaslessPaymentError::InvalidSignature(e.to_string()))
}

/// Outcome of a successful [`verify`]: the recovered payer address and the
/// authorization's atomic-unit value, both already validated against `chain`
/// and `required_payee`/`required_amount`.
pub struct VerifiedAuthorization {
    pub payer: Address,
    pub value: u128,
}

/// §4.3 "Verification contract": signature recovers to `from`; `to` matches the
/// configured payee; `value >= required`; `now` within the validity window;
/// chain-id/network mismatch rejected regardless of what the contract would do.
pub fn verify(
    authorization: &Authorization,
    declared_network: &str,
    chain: &ChainConfig,
    required_payee: &str,
    required_amount: u128,
) -> Result<VerifiedAuthorization, GaslessPaymentError> {
    if declared_network != chain.network {
        return Err(GaslessPaymentError::NetworkMismatch {
            declared: declared_network.to_string(),
            configured: chain.chain_id,
        });
    }

    let from = parse_address(&authorization.from, "authorization.from")?;
    let to = parse_address(&authorization.to, "authorization.to")?;
    let required_payee_addr = parse_address(required_payee, "configured payee")?;
    if to != required_payee_addr {
        return Err(GaslessPaymentError::WrongPayee);
    }

    let value: u128 = authorization
        .value
        .parse()
        .map_err(|_| GaslessPaymentError::Malformed("authorization.value is not a valid integer".into()))?;
    if value < required_amount {
        return Err(GaslessPaymentError::ValueTooLow { value, required: required_amount });
    }

    let now = Utc::now().timestamp() as u64;
    if authorization.valid_before < now + EXPIRY_GRACE_SECONDS {
        return Err(GaslessPaymentError::OutsideValidityWindow);
    }
    if authorization.valid_after > now {
        return Err(GaslessPaymentError::OutsideValidityWindow);
    }

    let nonce = parse_nonce(&authorization.nonce)?;
    let signature = parse_signature(&authorization.signature)?;

    let stablecoin_address = parse_address(&chain.stablecoin_address, "stablecoin address")?;
    let domain = eip712_domain! {
        name: chain.eip712_name.clone(),
        version: chain.eip712_version.clone(),
        chain_id: chain.chain_id,
        verifying_contract: stablecoin_address,
    };

    let transfer = TransferWithAuthorization {
        from,
        to,
        value: U256::from(value),
        validAfter: U256::from(authorization.valid_after),
        validBefore: U256::from(authorization.valid_before),
        nonce,
    };
    let digest = transfer.eip712_signing_hash(&domain);

    let recovered = signature
        .recover_address_from_prehash(&digest)
        .map_err(|e| GaslessPaymentError::InvalidSignature(e.to_string()))?;
    if recovered != from {
        return Err(GaslessPaymentError::InvalidSignature(format!(
            "recovered {recovered}, expected {from}"
        )));
    }

    Ok(VerifiedAuthorization { payer: from, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;

    fn test_chain() -> ChainConfig {
        ChainConfig {
            network: "base-sepolia".into(),
            chain_id: 84532,
            stablecoin_address: "0x0000000000000000000000000000000000dEaD".into(),
            eip712_name: "USDC".into(),
            eip712_version: "2".into(),
        }
    }

    fn sign_authorization(signer: &PrivateKeySigner, chain: &ChainConfig, auth: &mut Authorization) {
        let from: Address = signer.address();
        auth.from = from.to_string();
        let stablecoin_address: Address = chain.stablecoin_address.parse().unwrap();
        let domain = eip712_domain! {
            name: chain.eip712_name.clone(),
            version: chain.eip712_version.clone(),
            chain_id: chain.chain_id,
            verifying_contract: stablecoin_address,
        };
        let nonce = parse_nonce(&auth.nonce).unwrap();
        let transfer = TransferWithAuthorization {
            from,
            to: auth.to.parse().unwrap(),
            value: U256::from(auth.value.parse::<u128>().unwrap()),
            validAfter: U256::from(auth.valid_after),
            validBefore: U256::from(auth.valid_before),
            nonce,
        };
        let digest = transfer.eip712_signing_hash(&domain);
        let signature = signer.sign_hash_sync(&digest).unwrap();
        auth.signature = format!("0x{}", hex::encode(signature.as_bytes()));
    }

    fn base_authorization(payee: &str) -> Authorization {
        let now = Utc::now().timestamp() as u64;
        Authorization {
            from: String::new(),
            to: payee.to_string(),
            value: "2000".to_string(),
            valid_after: now - 10,
            valid_before: now + 300,
            nonce: format!("0x{}", hex::encode([7u8; 32])),
            signature: String::new(),
        }
    }

    #[test]
    fn accepts_a_correctly_signed_authorization() {
        let chain = test_chain();
        let signer = PrivateKeySigner::random();
        let payee = "0x000000000000000000000000000000000000Aa";
        let mut auth = base_authorization(payee);
        sign_authorization(&signer, &chain, &mut auth);

        let verified = verify(&auth, &chain.network, &chain, payee, 1500).unwrap();
        assert_eq!(verified.payer, signer.address());
        assert_eq!(verified.value, 2000);
    }

    #[test]
    fn rejects_network_mismatch() {
        let chain = test_chain();
        let signer = PrivateKeySigner::random();
        let payee = "0x000000000000000000000000000000000000Aa";
        let mut auth = base_authorization(payee);
        sign_authorization(&signer, &chain, &mut auth);

        let err = verify(&auth, "base", &chain, payee, 1500).unwrap_err();
        assert!(matches!(err, GaslessPaymentError::NetworkMismatch { .. }));
    }

    #[test]
    fn rejects_tampered_value() {
        let chain = test_chain();
        let signer = PrivateKeySigner::random();
        let payee = "0x000000000000000000000000000000000000Aa";
        let mut auth = base_authorization(payee);
        sign_authorization(&signer, &chain, &mut auth);
        auth.value = "999999".to_string();

        let err = verify(&auth, &chain.network, &chain, payee, 1500).unwrap_err();
        assert!(matches!(err, GaslessPaymentError::InvalidSignature(_)));
    }

    #[test]
    fn rejects_expired_authorization() {
        let chain = test_chain();
        let signer = PrivateKeySigner::random();
        let payee = "0x000000000000000000000000000000000000Aa";
        let mut auth = base_authorization(payee);
        auth.valid_before = Utc::now().timestamp() as u64 - 100;
        sign_authorization(&signer, &chain, &mut auth);

        let err = verify(&auth, &chain.network, &chain, payee, 1500).unwrap_err();
        assert!(matches!(err, GaslessPaymentError::OutsideValidityWindow));
    }

    #[test]
    fn rejects_value_below_required() {
        let chain = test_chain();
        let signer = PrivateKeySigner::random();
        let payee = "0x000000000000000000000000000000000000Aa";
        let mut auth = base_authorization(payee);
        sign_authorization(&signer, &chain, &mut auth);

        let err = verify(&auth, &chain.network, &chain, payee, 50_000).unwrap_err();
        assert!(matches!(err, GaslessPaymentError::ValueTooLow { .. }));
    }
}
