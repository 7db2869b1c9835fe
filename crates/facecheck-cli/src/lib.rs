//! facecheck-cli: the request dispatcher behind the `facecheck` binary.
//!
//! A [`Request`] is built from an operation tag and its operands, handed to a
//! [`Dispatcher`], and always answered with a [`Response`] whose JSON goes to
//! stdout.

pub mod config;
pub mod dispatch;
pub mod response;

pub use config::{Config, ConfigError};
pub use dispatch::{DispatchError, Dispatcher, ErrorKind, Operation, Request};
pub use response::{Response, Status};
