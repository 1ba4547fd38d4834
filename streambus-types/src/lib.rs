//! # StreamBus Types
//!
//! This crate defines the traits and types for the StreamBus API, but does not provide any implementation.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_debug_implementations)]

mod error;
mod message;
mod stream;
mod subscriber;

pub use error::*;
pub use message::*;
pub use stream::*;
pub use subscriber::*;

pub mod export;
