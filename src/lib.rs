//! Desktop sign-in and streaming core
//!
//! The heavy lifting lives in the workspace crates: [`sl_auth`] runs the
//! loopback OAuth flow and [`sl_stream`] drives the native streaming engine.
//! This crate ties them together behind the [`Bridge`] the UI talks to.

pub mod bridge;

pub use bridge::{Bridge, BridgeError, BridgeResult};
pub use sl_auth;
pub use sl_stream;
