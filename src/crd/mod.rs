//! Custom Resource Definitions (CRDs) read by emqx-operator.
//!
//! - `EMQX`: broker cluster, including the broker's own view of its member nodes
//! - `hocon`: just enough HOCON to read settings out of the broker configuration

mod emqx;
pub mod hocon;

pub use emqx::*;
pub use hocon::ConfigError;
