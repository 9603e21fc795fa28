//! Payment-requirements object (§4.3): "one entry per enabled chain".

use gateway_common::money::AtomicUnits;
use serde::{Deserialize, Serialize};

/// A configured stablecoin deployment the gateway is willing to accept payment on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub network: String,
    pub chain_id: u64,
    pub stablecoin_address: String,
    pub eip712_name: String,
    pub eip712_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirementsEntry {
    pub scheme: String,
    pub network: String,
    pub asset: String,
    pub pay_to: String,
    pub max_amount_required: AtomicUnits,
    pub valid_for_seconds: u64,
    pub extra: Eip712Extra,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Eip712Extra {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PaymentRequirements {
    pub accepts: Vec<PaymentRequirementsEntry>,
}

impl PaymentRequirements {
    pub fn for_chains(chains: &[ChainConfig], pay_to: &str, amount: AtomicUnits, valid_for_seconds: u64) -> Self {
        Self {
            accepts: chains
                .iter()
                .map(|chain| PaymentRequirementsEntry {
                    scheme: "exact".to_string(),
                    network: chain.network.clone(),
                    asset: chain.stablecoin_address.clone(),
                    pay_to: pay_to.to_string(),
                    max_amount_required: amount,
                    valid_for_seconds,
                    extra: Eip712Extra { name: chain.eip712_name.clone(), version: chain.eip712_version.clone() },
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surfaces_one_entry_per_chain() {
        let chains = vec![
            ChainConfig {
                network: "base".into(),
                chain_id: 8453,
                stablecoin_address: "0x00000000000000000000000000000000000001".into(),
                eip712_name: "USDC".into(),
                eip712_version: "2".into(),
            },
            ChainConfig {
                network: "base-sepolia".into(),
                chain_id: 84532,
                stablecoin_address: "0x00000000000000000000000000000000000002".into(),
                eip712_name: "USDC".into(),
                eip712_version: "2".into(),
            },
        ];
        let requirements = PaymentRequirements::for_chains(&chains, "0xpayee", AtomicUnits(1_000_000), 300);
        assert_eq!(requirements.accepts.len(), 2);
        assert_eq!(requirements.accepts[0].network, "base");
    }
}
