use serde::{Deserialize, Serialize};

/// The closed set of gateways this service integrates with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Redirect wallet, RSA-signed form parameters.
    WalletA,
    /// QR wallet, MD5-signed XML.
    WalletB,
    /// Card network payment intents.
    Card,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WalletA => "wallet_a",
            Self::WalletB => "wallet_b",
            Self::Card => "card",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wallet_a" => Ok(Self::WalletA),
            "wallet_b" => Ok(Self::WalletB),
            "card" => Ok(Self::Card),
            _ => Err(format!("Unknown payment provider: {}", s)),
        }
    }
}

/// An enabled payment channel, administered outside this service.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PaymentMethod {
    #[serde(rename = "_id")]
    pub id: String,
    /// Stable provider key, e.g. `wallet_a`.
    pub name: String,
    pub display_name: String,
    pub is_active: bool,
    pub sort_order: i32,
}
