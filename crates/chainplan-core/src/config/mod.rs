//! Network profile configuration (`chainplan.toml`).
//!
//! Profiles come from the project file, then the user config directory,
//! with a built-in `hardhat` simulated profile as the fallback.

pub mod parser;
pub mod schema;
pub mod store;

pub use schema::{
    ChainplanConfig, ConfigValue, NetworkKind, NetworkProfile, ResolvedNetwork,
    builtin_hardhat_profile,
};
pub use store::{CONFIG_FILE_NAME, ConfigStore};
