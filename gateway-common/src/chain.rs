use serde::{Deserialize, Serialize};
use std::fmt;

/// The enabled chain ids (§6). `Busd` denotes BUSD on BSC and is tracked
/// as its own chain id because its confirmation/fee surface is identical
/// to `Bsc` but the token differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Ethereum,
    Bsc,
    Polygon,
    Solana,
    Tron,
    Busd,
}

impl Chain {
    pub const ALL: [Chain; 6] = [
        Chain::Ethereum,
        Chain::Bsc,
        Chain::Polygon,
        Chain::Solana,
        Chain::Tron,
        Chain::Busd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Bsc => "bsc",
            Chain::Polygon => "polygon",
            Chain::Solana => "solana",
            Chain::Tron => "tron",
            Chain::Busd => "busd",
        }
    }

    /// The token this chain id implies for deposits (USDT everywhere except
    /// the Busd chain id, which always means BUSD on the BSC network).
    pub fn default_token(&self) -> Token {
        match self {
            Chain::Busd => Token::Busd,
            _ => Token::Usdt,
        }
    }

    /// Whether the chain adapter for this chain can scan transfer events
    /// directly, versus falling back to the weaker balance-delta detector (§9).
    pub fn supports_event_scan(&self) -> bool {
        !matches!(self, Chain::Tron)
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ethereum" => Ok(Chain::Ethereum),
            "bsc" => Ok(Chain::Bsc),
            "polygon" => Ok(Chain::Polygon),
            "solana" => Ok(Chain::Solana),
            "tron" => Ok(Chain::Tron),
            "busd" => Ok(Chain::Busd),
            other => Err(format!("unknown chain id: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Token {
    Usdt,
    Busd,
}

impl Token {
    pub fn as_str(&self) -> &'static str {
        match self {
            Token::Usdt => "USDT",
            Token::Busd => "BUSD",
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical token decimals per §6: 6 everywhere except BSC, which is 18
/// for both USDT and BUSD.
pub fn token_decimals(chain: Chain, token: Token) -> u32 {
    match (chain, token) {
        (Chain::Bsc, _) | (Chain::Busd, _) => 18,
        _ => 6,
    }
}

/// Per-chain network configuration resolved at startup; the chain registry
/// (§4.1) uses one of these per enabled chain to construct its adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain: Chain,
    pub rpc_url: String,
    pub native_token_symbol: String,
    /// ERC20 contract address / SPL mint / TRC20 contract, depending on chain.
    pub token_contract: String,
    pub token_decimals: u32,
    /// Custody address that confirmed deposits are eventually swept to.
    pub custody_address: String,
    /// Dedicated gas-fee wallet address funding sweep transactions (§4.5).
    pub gas_fee_wallet_address: String,
}
