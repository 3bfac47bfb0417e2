//! Future registry: every declared deployment action keyed by id.

pub mod registry;
pub mod types;

pub use registry::FutureRegistry;
pub use types::{
    Argument, Future, FutureKind, FutureRef, ParamBinding, ParamSpec, Payload, Sender,
};
