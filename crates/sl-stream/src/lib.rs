//! Session controller for the native streaming engine
//!
//! [`StreamingController`] validates a [`StreamConfig`], starts the injected
//! [`StreamEngine`], polls its stats while the session is connected and stops
//! it again. The state machine never waits on a misbehaving engine: engine
//! calls run on the blocking pool under a deadline, and `stop_stream` always
//! returns the controller to [`StreamStatus::Idle`].

pub mod config;
pub mod controller;
pub mod engine;
pub mod errors;

pub use config::{ControllerSettings, StreamConfig};
pub use controller::{StreamEvent, StreamSession, StreamStatus, StreamingController};
pub use engine::{Stats, StreamEngine};
pub use errors::{Result, StreamError};
