// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! General types used throughout the pipeline manager.

use std::convert;

use common::profile::{DevId, PipeId};
use common::table::{TableError, TableHandle};
use dal::DalError;

/// Identifies a session slot
pub type SessionHandle = u32;

/// Identifies a profile within a device
pub type ProfileId = u32;

pub type PipeResult<T> = Result<T, PipeError>;

#[derive(Debug, thiserror::Error)]
pub enum PipeError {
    #[error("I/O error: {0:?}")]
    Io(std::io::Error),
    #[error("Backend error: {0}")]
    Dal(DalError),
    #[error("Resource already exists: {0}")]
    Exists(String),
    #[error("Resource is missing: {0}")]
    Missing(String),
    #[error("Resource is in use: {0}")]
    InUse(String),
    #[error("Invalid argument: {0}")]
    Invalid(String),
    #[error("Table full: {0}")]
    TableFull(String),
    #[error("Operation not supported: {0}")]
    NotSupported(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("No such table: {0:#x}")]
    NoSuchTable(TableHandle),
    #[error("No such session: {0}")]
    NoSuchSession(SessionHandle),
    #[error("No such device: {0}")]
    NoSuchDevice(DevId),
    #[error("Pipe {pipe_id} is not in use on device {dev_id}")]
    NoSuchPipe { dev_id: DevId, pipe_id: PipeId },
    #[error("No free sessions")]
    NoFreeSessions,
    #[error("Unexpected error: {0}")]
    Unexpected(String),
    #[error("Unwind: initial: {initial}, unwind: {unwind}")]
    Unwind {
        initial: Box<PipeError>,
        unwind: Box<PipeError>,
    },
}

/// The coarse classification of every error, independent of which component
/// raised it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    InUse,
    ResourceExhausted,
    NotSupported,
    Unexpected,
}

impl PipeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipeError::Invalid(_)
            | PipeError::NoSuchPipe { .. }
            | PipeError::Config(_) => ErrorKind::InvalidArgument,
            PipeError::Missing(_)
            | PipeError::NoSuchTable(_)
            | PipeError::NoSuchSession(_)
            | PipeError::NoSuchDevice(_) => ErrorKind::NotFound,
            PipeError::Exists(_) => ErrorKind::AlreadyExists,
            PipeError::InUse(_) => ErrorKind::InUse,
            PipeError::TableFull(_) | PipeError::NoFreeSessions => {
                ErrorKind::ResourceExhausted
            }
            PipeError::NotSupported(_) => ErrorKind::NotSupported,
            PipeError::Dal(e) => match e {
                DalError::InvalidArg(_) => ErrorKind::InvalidArgument,
                DalError::Exists => ErrorKind::AlreadyExists,
                DalError::Missing(_) => ErrorKind::NotFound,
                DalError::NoSpace(_) => ErrorKind::ResourceExhausted,
                DalError::OperationUnsupported => ErrorKind::NotSupported,
                _ => ErrorKind::Unexpected,
            },
            PipeError::Io(_)
            | PipeError::Unexpected(_)
            | PipeError::Unwind { .. } => ErrorKind::Unexpected,
        }
    }
}

impl convert::From<std::io::Error> for PipeError {
    fn from(err: std::io::Error) -> Self {
        PipeError::Io(err)
    }
}

impl convert::From<DalError> for PipeError {
    fn from(err: DalError) -> Self {
        PipeError::Dal(err)
    }
}

impl convert::From<TableError> for PipeError {
    fn from(err: TableError) -> Self {
        match err {
            TableError::Io(e) => PipeError::Io(e),
            e => PipeError::Config(e.to_string()),
        }
    }
}

impl convert::From<toml::de::Error> for PipeError {
    fn from(err: toml::de::Error) -> Self {
        PipeError::Config(err.to_string())
    }
}

// A lock is poisoned when its holder panicked.
impl<T> convert::From<std::sync::PoisonError<T>> for PipeError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        PipeError::Unexpected("lock poisoned".into())
    }
}
