//! Parameter resolution.
//!
//! Resolves module parameters from run-time overrides, caller-supplied
//! values, an external configuration source and module defaults.

pub mod file;
pub mod source;
pub mod store;

pub use file::{ParameterOverrides, load_parameters_file};
pub use source::{EnvSource, SecretSource, StaticSource};
pub use store::{ParamOrigin, ParameterStore};
