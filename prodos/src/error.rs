use std::io;
use thiserror::Error;

/// Errors surfaced across the whole `prodos` crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("format error: {0}")]
    Format(String),

    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("ambiguous path: {0}")]
    Ambiguous(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("capacity exceeded: {0}")]
    Capacity(String),
}

pub type Result<T> = std::result::Result<T, Error>;
