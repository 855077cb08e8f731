// #![deny(warnings)]

#![warn(unused_extern_crates)]
// Enable some groups of clippy lints.
#![deny(clippy::suspicious)]
#![deny(clippy::perf)]
// Specific lints to enforce.
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]
#![deny(clippy::disallowed_types)]
#![deny(clippy::manual_let_else)]
#![allow(clippy::unreachable)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod ccache;
pub mod client;
pub mod config;
pub mod constants;
pub(crate) mod crypto;
pub mod error;
pub mod keystore;
pub mod proto;
pub mod server;
pub mod transport;

pub use crate::client::ClientAgent;
pub use crate::config::{KeySize, ProtocolConfig};
pub use crate::error::KrbError;
