//! Crate-level error type.

use crate::bson::{DocBuf, MutateError, RawError, ViewError};
use crate::status::Status;
use crate::wire::WireError;

use std::result::Result as StdResult;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid document: {0}")]
    View(#[from] ViewError),

    #[error("malformed document element: {0}")]
    Raw(#[from] RawError),

    #[error("document mutation failed: {0}")]
    Mutate(#[from] MutateError),

    #[error("wire protocol error: {0}")]
    Wire(#[from] WireError),

    /// An operation completed with an error status.
    #[error("{0}")]
    Status(Status),

    /// The server replied with `ok: 0`.
    #[error("server error {}: {message}", .status.code())]
    Server {
        status: Status,
        message: String,
        reply: DocBuf,
    },

    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// The categorized status behind this error, when there is one.
    pub fn status(&self) -> Option<Status> {
        match self {
            Error::Status(status) => Some(*status),
            Error::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether this error represents a timeout, under either the local or
    /// the server taxonomy.
    pub fn is_timeout(&self) -> bool {
        self.status().is_some_and(|st| st.is_timeout())
    }
}

pub type Result<T> = StdResult<T, Error>;
