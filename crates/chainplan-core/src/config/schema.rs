//! Configuration schema for chainplan.toml

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::params::SecretSource;

/// Name of the profile available without any configuration.
pub const BUILTIN_NETWORK: &str = "hardhat";

/// Root configuration structure for chainplan.toml
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainplanConfig {
    /// Network profiles keyed by name
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkProfile>,
}

impl ChainplanConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate every profile
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, profile) in &self.networks {
            profile.validate(name)?;
        }
        Ok(())
    }

    /// Look up a profile, falling back to the built-in hardhat profile
    pub fn network(&self, name: &str) -> Option<NetworkProfile> {
        self.networks.get(name).cloned().or_else(|| {
            if name == BUILTIN_NETWORK {
                Some(builtin_hardhat_profile())
            } else {
                None
            }
        })
    }

    /// Overlay another layer; profiles in `layer` replace same-named ones
    pub fn merge(&mut self, layer: ChainplanConfig) {
        for (name, profile) in layer.networks {
            self.networks.insert(name, profile);
        }
    }
}

/// How a network is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    /// In-process simulated chain
    Simulated,
    /// JSON-RPC endpoint reached through an external transport
    Http,
}

/// Literal value or a configuration variable resolved by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Literal(String),
    Variable { env: String },
}

impl ConfigValue {
    /// Resolve through `source`; literals resolve to themselves
    pub fn resolve(&self, source: &dyn SecretSource) -> anyhow::Result<String> {
        match self {
            ConfigValue::Literal(value) => Ok(value.clone()),
            ConfigValue::Variable { env } => source
                .lookup(env)
                .ok_or_else(|| anyhow::anyhow!("Configuration variable '{}' is not set", env)),
        }
    }
}

/// A `[networks.<name>]` profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkProfile {
    #[serde(rename = "type")]
    pub kind: NetworkKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<ConfigValue>,

    /// Signing keys, in account index order
    #[serde(default)]
    pub accounts: Vec<ConfigValue>,
}

impl NetworkProfile {
    fn validate(&self, name: &str) -> anyhow::Result<()> {
        if self.kind == NetworkKind::Http && self.url.is_none() {
            anyhow::bail!("Network '{}' has type 'http' but no 'url'", name);
        }
        if let Some(ConfigValue::Literal(raw)) = &self.url {
            Url::parse(raw)
                .map_err(|e| anyhow::anyhow!("Network '{}' has an invalid url: {}", name, e))?;
        }
        Ok(())
    }

    /// Resolve configuration variables. Only the selected profile is
    /// resolved, so variables of other profiles may stay unset.
    pub fn resolve(&self, name: &str, source: &dyn SecretSource) -> anyhow::Result<ResolvedNetwork> {
        let url = match &self.url {
            Some(value) => {
                let raw = value.resolve(source)?;
                Some(Url::parse(&raw).map_err(|e| {
                    anyhow::anyhow!("Network '{}' resolved an invalid url: {}", name, e)
                })?)
            }
            None => None,
        };
        let accounts = self
            .accounts
            .iter()
            .map(|account| account.resolve(source))
            .collect::<anyhow::Result<Vec<_>>>()?;
        if accounts.is_empty() {
            anyhow::bail!("Network '{}' has no accounts configured", name);
        }
        Ok(ResolvedNetwork {
            name: name.to_string(),
            kind: self.kind,
            chain_id: self.chain_id,
            url,
            accounts,
        })
    }
}

/// Profile with every configuration variable resolved
#[derive(Clone, PartialEq)]
pub struct ResolvedNetwork {
    pub name: String,
    pub kind: NetworkKind,
    pub chain_id: Option<u64>,
    pub url: Option<Url>,
    /// Opaque signing keys
    pub accounts: Vec<String>,
}

impl std::fmt::Debug for ResolvedNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedNetwork")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("chain_id", &self.chain_id)
            .field("url", &self.url)
            .field("accounts", &format_args!("<{} redacted>", self.accounts.len()))
            .finish()
    }
}

/// Local simulated network with the two well-known development keys
pub fn builtin_hardhat_profile() -> NetworkProfile {
    NetworkProfile {
        kind: NetworkKind::Simulated,
        chain_id: Some(31337),
        url: None,
        accounts: vec![
            ConfigValue::Literal(
                "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80".to_string(),
            ),
            ConfigValue::Literal(
                "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d".to_string(),
            ),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::StaticSource;

    #[test]
    fn builtin_profile_is_available_without_config() {
        let config = ChainplanConfig::new();
        let profile = config.network(BUILTIN_NETWORK).unwrap();
        assert_eq!(profile.kind, NetworkKind::Simulated);
        assert!(config.network("sepolia").is_none());
    }

    #[test]
    fn variables_resolve_through_source() {
        let profile = NetworkProfile {
            kind: NetworkKind::Http,
            chain_id: Some(11155111),
            url: Some(ConfigValue::Variable {
                env: "RPC_URL".into(),
            }),
            accounts: vec![ConfigValue::Variable { env: "KEY".into() }],
        };
        let source = StaticSource::new()
            .with("RPC_URL", "https://rpc.example.org")
            .with("KEY", "0xabc");
        let resolved = profile.resolve("sepolia", &source).unwrap();
        assert_eq!(resolved.url.unwrap().as_str(), "https://rpc.example.org/");
        assert_eq!(resolved.accounts, vec!["0xabc".to_string()]);
    }

    #[test]
    fn missing_variable_fails_resolution() {
        let profile = NetworkProfile {
            kind: NetworkKind::Simulated,
            chain_id: None,
            url: None,
            accounts: vec![ConfigValue::Variable { env: "KEY".into() }],
        };
        let err = profile.resolve("local", &StaticSource::new()).unwrap_err();
        assert!(err.to_string().contains("KEY"));
    }

    #[test]
    fn debug_output_redacts_keys() {
        let resolved = builtin_hardhat_profile()
            .resolve(BUILTIN_NETWORK, &StaticSource::new())
            .unwrap();
        let rendered = format!("{resolved:?}");
        assert!(!rendered.contains("ac0974"));
    }
}
