//! Supported network identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Networks the coordinator is able to finalize polls on.
///
/// The chain partitions the registry key space: the same contract address and
/// poll id may exist independently on two networks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupportedChain {
    Ethereum,
    Optimism,
    Polygon,
    Base,
    ArbitrumOne,
    EthereumSepolia,
    BaseSepolia,
    ArbitrumSepolia,
    OptimismSepolia,
    Localhost,
}

impl SupportedChain {
    /// Map a raw EVM chain id onto a supported network.
    ///
    /// Returns `None` for networks the coordinator does not operate on; the
    /// ingestion layer turns that into an `UnsupportedChain` error.
    pub fn from_chain_id(chain_id: u64) -> Option<Self> {
        match chain_id {
            1 => Some(Self::Ethereum),
            10 => Some(Self::Optimism),
            137 => Some(Self::Polygon),
            8453 => Some(Self::Base),
            42161 => Some(Self::ArbitrumOne),
            11155111 => Some(Self::EthereumSepolia),
            84532 => Some(Self::BaseSepolia),
            421614 => Some(Self::ArbitrumSepolia),
            11155420 => Some(Self::OptimismSepolia),
            1337 => Some(Self::Localhost),
            _ => None,
        }
    }

    /// Stable slug used in registry keys and subgraph URLs.
    pub fn as_slug(&self) -> &'static str {
        match self {
            Self::Ethereum => "ethereum",
            Self::Optimism => "optimism",
            Self::Polygon => "polygon",
            Self::Base => "base",
            Self::ArbitrumOne => "arbitrum_one",
            Self::EthereumSepolia => "ethereum_sepolia",
            Self::BaseSepolia => "base_sepolia",
            Self::ArbitrumSepolia => "arbitrum_sepolia",
            Self::OptimismSepolia => "optimism_sepolia",
            Self::Localhost => "localhost",
        }
    }

    /// Parse the slug form produced by [`SupportedChain::as_slug`].
    pub fn from_slug(slug: &str) -> Option<Self> {
        match slug {
            "ethereum" => Some(Self::Ethereum),
            "optimism" => Some(Self::Optimism),
            "polygon" => Some(Self::Polygon),
            "base" => Some(Self::Base),
            "arbitrum_one" => Some(Self::ArbitrumOne),
            "ethereum_sepolia" => Some(Self::EthereumSepolia),
            "base_sepolia" => Some(Self::BaseSepolia),
            "arbitrum_sepolia" => Some(Self::ArbitrumSepolia),
            "optimism_sepolia" => Some(Self::OptimismSepolia),
            "localhost" => Some(Self::Localhost),
            _ => None,
        }
    }
}

impl fmt::Display for SupportedChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_slug())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_id_mapping_round_trips_known_networks() {
        assert_eq!(
            SupportedChain::from_chain_id(10),
            Some(SupportedChain::Optimism)
        );
        assert_eq!(
            SupportedChain::from_chain_id(11155420),
            Some(SupportedChain::OptimismSepolia)
        );
        assert_eq!(SupportedChain::from_chain_id(31337), None);
    }

    #[test]
    fn slug_round_trip() {
        for chain in [
            SupportedChain::Ethereum,
            SupportedChain::ArbitrumOne,
            SupportedChain::BaseSepolia,
            SupportedChain::Localhost,
        ] {
            assert_eq!(SupportedChain::from_slug(chain.as_slug()), Some(chain));
        }
    }
}
