//! monoxide: an asynchronous MongoDB client.
//!
//! Two subsystems make up the core. The [`bson`] module is a from-scratch
//! codec: zero-copy views, lazily validated iteration, and an in-place
//! splice mutator over contiguously stored documents. The [`exec`] module
//! is a cold-start, type-erased async composition layer (emitters,
//! handlers, operations, stop tokens and combinators) that the OP_MSG wire
//! pipeline in [`connection`] is built from. [`reactor`] binds the
//! abstract event-loop interface to tokio, and [`client`] /
//! [`collection`] / [`cursor`] provide the user-facing command surface on
//! top.
//!
//! ```no_run
//! use monoxide::client::{Client, ClientOptions};
//! use monoxide::reactor::TokioReactor;
//! use std::sync::Arc;
//!
//! # async fn demo() -> monoxide::Result<()> {
//! let reactor = Arc::new(TokioReactor::new());
//! let client = Client::connect(reactor, ClientOptions::default()).await?;
//! client.ping().await?;
//! # Ok(())
//! # }
//! ```

pub mod bson;
pub mod client;
pub mod collection;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod error;
pub mod exec;
pub mod reactor;
pub mod status;
pub mod wire;

pub use error::{Error, Result};
pub use status::Status;
