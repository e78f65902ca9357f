// Copyright (c) Contributors to the polyfs project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/polyfs-rs/polyfs

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("'{0}' does not exist")]
    NotExist(String),
    #[error("'{0}' already exists")]
    Exists(String),
    #[error("invalid path '{0}'")]
    InvalidPath(String),
    #[error("{0}")]
    Invalid(String),
    #[error("{op} not implemented")]
    NotImplemented { op: &'static str },
    #[error("vfs '{0}' not configured")]
    NotConfigured(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("{0} timed out")]
    Timeout(String),
    #[error("archive cache full, all archives locked while opening '{0}'")]
    ArchiveCacheFull(String),
    #[error("malformed archive: {0}")]
    Archive(String),
    #[error("{0}")]
    Crypto(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    IO(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error(transparent)]
    Ssh(#[from] russh::Error),
    #[error(transparent)]
    Sftp(#[from] russh_sftp::client::error::Error),
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error("{0}")]
    String(String),
    #[error("{}", format_compound(.0))]
    Compound(Vec<Error>),
}

impl Error {
    pub fn new<S: Into<String>>(message: S) -> Error {
        Error::String(message.into())
    }

    /// Wrap an io error with the path/operation that produced it.
    pub fn io<S: Into<String>>(context: S, source: io::Error) -> Error {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    pub fn is_not_exist(&self) -> bool {
        match self {
            Error::NotExist(_) => true,
            Error::IO(err) => err.kind() == io::ErrorKind::NotFound,
            Error::Io { source, .. } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Combine a list of errors into a single error, if any.
    pub fn combine(mut errs: Vec<Error>) -> Option<Error> {
        match errs.len() {
            0 => None,
            1 => Some(errs.remove(0)),
            _ => Some(Error::Compound(errs)),
        }
    }
}

impl From<String> for Error {
    fn from(message: String) -> Self {
        Error::String(message)
    }
}

impl From<&str> for Error {
    fn from(message: &str) -> Self {
        Error::String(message.to_owned())
    }
}

fn format_compound(errs: &[Error]) -> String {
    errs.iter()
        .map(|err| err.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Collects errors across a multi-step close so that every step is
/// attempted even after earlier ones fail.
#[derive(Debug, Default)]
pub struct ErrorList(Vec<Error>);

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.0.push(err);
                None
            }
        }
    }

    pub fn push(&mut self, err: Error) {
        self.0.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn finish(self) -> Result<()> {
        match Error::combine(self.0) {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
