//! Client module for the broker management API.
//!
//! ## Architecture
//!
//! - `requester`: credentials, per-node URL building and the HTTP transport
//!
//! ## Example
//!
//! ```rust,ignore
//! use emqx_operator::client::{Credentials, HttpTransport, Requester};
//!
//! let transport = HttpTransport::new(Duration::from_secs(5))?;
//! let requester = Requester::new("10.0.0.7:18083", Credentials::new("admin", "public"));
//! let status = requester.get(&transport, "api/v5/load_rebalance/availability_check").await?;
//! ```

pub mod requester;

pub use requester::{
    BOOTSTRAP_USER_KEY, Credentials, HttpTransport, ManagementTransport, Requester,
    RequesterError,
};
