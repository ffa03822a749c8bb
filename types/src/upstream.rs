use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ParseUpstreamError;

/// Address, authentication token, and protocol version tag for one
/// configured upstream. Parsed once at startup from a `token:url` CLI flag;
/// the address string is the upstream's identity key everywhere else in
/// the system (selector maps, coordinator catch-up set, cache namespace).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub address: Url,
    pub token: String,
    pub version: String,
}

impl UpstreamConfig {
    pub fn new(address: Url, token: String, version: impl Into<String>) -> Self {
        Self {
            address,
            token,
            version: version.into(),
        }
    }

    /// The identity key used throughout the selector and coordinator.
    pub fn key(&self) -> String {
        self.address.to_string()
    }
}

impl FromStr for UpstreamConfig {
    type Err = ParseUpstreamError;

    /// Parses the CLI's `token:url` shorthand. The token itself never
    /// contains a colon in practice (it's a bearer JWT), so splitting on
    /// the first colon is sufficient and avoids rejecting URLs that embed
    /// their own `://`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (token, url) = raw
            .split_once(':')
            .ok_or_else(|| ParseUpstreamError::MissingSeparator(raw.to_string()))?;
        let address = Url::parse(url)
            .map_err(|e| ParseUpstreamError::InvalidUrl(raw.to_string(), e))?;
        Ok(Self::new(address, token.to_string(), "v1"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_token_and_url() {
        let cfg: UpstreamConfig = "secret:https://node-a.example/rpc/v1".parse().unwrap();
        assert_eq!(cfg.token, "secret");
        assert_eq!(cfg.address.as_str(), "https://node-a.example/rpc/v1");
    }

    #[test]
    fn rejects_missing_separator() {
        let err = "https://node-a.example".parse::<UpstreamConfig>();
        assert!(matches!(err, Err(ParseUpstreamError::MissingSeparator(_))));
    }
}
