//! Account resolution for the signing boundary.

use crate::future::Sender;
use crate::types::Address;

/// Maps opaque signing keys to account addresses.
pub trait Signer: Send + Sync {
    fn address(&self, key: &str) -> Result<Address, String>;
}

/// Derives addresses by hashing the key; pairs with [`super::SimulatedChain`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedSigner;

impl Signer for SimulatedSigner {
    fn address(&self, key: &str) -> Result<Address, String> {
        if key.trim().is_empty() {
            return Err("empty signing key".to_string());
        }
        let digest = blake3::hash(key.trim().as_bytes());
        Ok(Address::from_digest(digest.as_bytes()))
    }
}

/// Accounts of the selected network, in profile order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accounts {
    addresses: Vec<Address>,
}

impl Accounts {
    pub fn new(addresses: Vec<Address>) -> Self {
        Self { addresses }
    }

    pub fn from_keys(keys: &[String], signer: &dyn Signer) -> Result<Self, String> {
        let addresses = keys
            .iter()
            .enumerate()
            .map(|(index, key)| {
                signer
                    .address(key)
                    .map_err(|e| format!("account {index}: {e}"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { addresses })
    }

    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    /// Address a future sends from.
    pub fn resolve(&self, sender: Sender) -> Result<Address, String> {
        match sender {
            Sender::Default => self
                .addresses
                .first()
                .copied()
                .ok_or_else(|| "no accounts configured".to_string()),
            Sender::Account(index) => self.addresses.get(index).copied().ok_or_else(|| {
                format!(
                    "account index {index} out of range ({} configured)",
                    self.addresses.len()
                )
            }),
            Sender::Address(address) => {
                if self.addresses.contains(&address) {
                    Ok(address)
                } else {
                    Err(format!("{address} is not a configured account"))
                }
            }
        }
    }
}
