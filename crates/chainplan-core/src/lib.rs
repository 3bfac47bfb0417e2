//! Chainplan Core Library
//!
//! Declarative smart-contract deployments: modules declare futures, the
//! composer flattens them into a dependency graph, and the scheduler
//! executes that graph against a chain, journaling every step so that an
//! interrupted run can resume without re-sending anything.

pub mod chain;
pub mod config;
pub mod deploy;
pub mod error;
pub mod execute;
pub mod fingerprint;
pub mod future;
pub mod graph;
pub mod journal;
pub mod module;
pub mod params;
pub mod types;

/// Re-exports of commonly used types
pub mod prelude {
    // Values
    pub use crate::types::{Address, FutureId, ParamKind, Value};

    // Modules and futures
    pub use crate::future::{Argument, FutureKind, FutureRef, ParamSpec, Sender};
    pub use crate::module::{
        Composition, Exports, FutureOptions, Module, ModuleBuilder, ModuleManifest, compose,
        load_manifest,
    };

    // Parameters
    pub use crate::params::{ParameterOverrides, ParameterStore, SecretSource};

    // Execution
    pub use crate::chain::{Accounts, ChainClient, SimulatedChain, SimulatedSigner};
    pub use crate::deploy::{Deployer, DeploymentPlan};
    pub use crate::execute::{AbortSignal, FutureOutcome, RunOptions, RunReport};
    pub use crate::journal::{FileJournalStore, Journal, MemoryJournalStore};

    // Configuration
    pub use crate::config::{ChainplanConfig, ConfigStore};

    // Errors
    pub use crate::error::{BuildError, DeployError, ExecutionError, JournalError};
}
