//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use tracing::{warn, warn_span};

use crate::election::ElectionId;
use crate::session::SessionId;
use crate::table::EntryKey;
use crate::{DeviceId, RoleId};

// Canonical status codes surfaced to P4Runtime clients.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Code {
    Ok,
    InvalidArgument,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    Unimplemented,
}

// Engine errors.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    // Stream arbitration
    DeviceNotFound(DeviceId),
    SessionTerminated(SessionId),
    ZeroElectionId,
    DeviceIdMismatch(DeviceId, DeviceId),
    RoleIdMismatch(RoleId, RoleId),
    RoleConfigMismatch(Option<ElectionId>),
    DuplicateElectionId(ElectionId),
    StreamLimitReached(usize),
    SessionLimitReached(DeviceId, usize),
    // Write authorization
    NoPrimary(DeviceId, RoleId),
    NotPrimary(DeviceId, RoleId, Option<ElectionId>),
    // Forwarding pipeline configuration
    MissingConfig,
    InvalidConfig(ConfigError),
    NoPendingConfig(DeviceId),
    UnspecifiedAction,
    PipelineNotConfigured(DeviceId),
    // Entity updates
    UnknownTable(u32),
    EmptyMatchKey(u32),
    EntryExists(EntryKey),
    EntryNotFound(EntryKey),
    UnspecifiedUpdate,
    TableFull(u32, u32),
    UpdateAborted,
}

// Reasons a forwarding pipeline config can't be realized.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConfigError {
    MissingP4Info,
    NoTables,
    InvalidTableId(String),
    DuplicateTableId(u32),
    MissingTableName(u32),
    DuplicateTableName(String),
    InvalidTableSize(u32),
}

// ===== impl Code =====

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Code::Ok => "OK",
            Code::InvalidArgument => "INVALID_ARGUMENT",
            Code::NotFound => "NOT_FOUND",
            Code::AlreadyExists => "ALREADY_EXISTS",
            Code::PermissionDenied => "PERMISSION_DENIED",
            Code::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Code::FailedPrecondition => "FAILED_PRECONDITION",
            Code::Aborted => "ABORTED",
            Code::Unimplemented => "UNIMPLEMENTED",
        };
        write!(f, "{name}")
    }
}

// ===== impl Error =====

impl Error {
    pub fn log(&self) {
        match self {
            Error::DeviceNotFound(device_id) => {
                warn!(%device_id, "{}", self);
            }
            Error::SessionTerminated(session_id) => {
                warn_span!("session", id = %session_id).in_scope(|| {
                    warn!("{}", self);
                });
            }
            Error::ZeroElectionId
            | Error::MissingConfig
            | Error::UnspecifiedAction
            | Error::UnspecifiedUpdate
            | Error::UpdateAborted => {
                warn!("{}", self);
            }
            Error::DeviceIdMismatch(expected, received) => {
                warn!(%expected, %received, "{}", self);
            }
            Error::RoleIdMismatch(expected, received) => {
                warn!(%expected, %received, "{}", self);
            }
            Error::RoleConfigMismatch(election_id) => {
                warn!(?election_id, "{}", self);
            }
            Error::DuplicateElectionId(election_id) => {
                warn!(%election_id, "{}", self);
            }
            Error::StreamLimitReached(limit) => {
                warn!(%limit, "{}", self);
            }
            Error::SessionLimitReached(device_id, limit) => {
                warn!(%device_id, %limit, "{}", self);
            }
            Error::NoPrimary(device_id, role_id) => {
                warn_span!("group", %device_id, %role_id).in_scope(|| {
                    warn!("{}", self);
                });
            }
            Error::NotPrimary(device_id, role_id, election_id) => {
                warn_span!("group", %device_id, %role_id).in_scope(|| {
                    warn!(?election_id, "{}", self);
                });
            }
            Error::InvalidConfig(error) => {
                warn!(%error, "{}", self);
            }
            Error::NoPendingConfig(device_id)
            | Error::PipelineNotConfigured(device_id) => {
                warn!(%device_id, "{}", self);
            }
            Error::UnknownTable(table_id) | Error::EmptyMatchKey(table_id) => {
                warn!(%table_id, "{}", self);
            }
            Error::EntryExists(key) | Error::EntryNotFound(key) => {
                warn!(?key, "{}", self);
            }
            Error::TableFull(table_id, size) => {
                warn!(%table_id, %size, "{}", self);
            }
        }
    }

    /// Returns the status code reported to the client.
    pub fn code(&self) -> Code {
        match self {
            Error::DeviceNotFound(..)
            | Error::EntryNotFound(..) => Code::NotFound,
            Error::ZeroElectionId
            | Error::RoleConfigMismatch(..)
            | Error::DuplicateElectionId(..)
            | Error::MissingConfig
            | Error::InvalidConfig(..)
            | Error::NoPendingConfig(..)
            | Error::UnspecifiedAction
            | Error::UnknownTable(..)
            | Error::EmptyMatchKey(..) => Code::InvalidArgument,
            Error::SessionTerminated(..)
            | Error::DeviceIdMismatch(..)
            | Error::RoleIdMismatch(..)
            | Error::PipelineNotConfigured(..) => Code::FailedPrecondition,
            Error::StreamLimitReached(..)
            | Error::SessionLimitReached(..)
            | Error::TableFull(..) => Code::ResourceExhausted,
            Error::NoPrimary(..) | Error::NotPrimary(..) => {
                Code::PermissionDenied
            }
            Error::EntryExists(..) => Code::AlreadyExists,
            Error::UnspecifiedUpdate => Code::Unimplemented,
            Error::UpdateAborted => Code::Aborted,
        }
    }

    /// Returns whether the error terminates the stream that triggered it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::DeviceNotFound(..)
                | Error::SessionTerminated(..)
                | Error::ZeroElectionId
                | Error::DeviceIdMismatch(..)
                | Error::RoleIdMismatch(..)
                | Error::DuplicateElectionId(..)
                | Error::StreamLimitReached(..)
                | Error::SessionLimitReached(..)
        )
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::DeviceNotFound(..) => {
                write!(f, "device ID not found")
            }
            Error::SessionTerminated(..) => {
                write!(f, "session already terminated")
            }
            Error::ZeroElectionId => {
                write!(f, "election ID must not be zero")
            }
            Error::DeviceIdMismatch(..) => {
                write!(f, "device ID doesn't match the established one")
            }
            Error::RoleIdMismatch(..) => {
                write!(f, "role doesn't match the established one")
            }
            Error::RoleConfigMismatch(..) => {
                write!(f, "role config changed without a new election ID")
            }
            Error::DuplicateElectionId(..) => {
                write!(f, "election ID already in use by the primary")
            }
            Error::StreamLimitReached(..) => {
                write!(f, "maximum number of open streams reached")
            }
            Error::SessionLimitReached(..) => {
                write!(f, "maximum number of sessions for device reached")
            }
            Error::NoPrimary(..) => {
                write!(f, "no primary controller for role")
            }
            Error::NotPrimary(..) => {
                write!(f, "election ID doesn't belong to the primary")
            }
            Error::MissingConfig => {
                write!(f, "missing forwarding pipeline config")
            }
            Error::InvalidConfig(error) => error.fmt(f),
            Error::NoPendingConfig(..) => {
                write!(f, "no saved forwarding pipeline config to commit")
            }
            Error::UnspecifiedAction => {
                write!(f, "unspecified forwarding pipeline action")
            }
            Error::PipelineNotConfigured(..) => {
                write!(f, "forwarding pipeline not configured")
            }
            Error::UnknownTable(..) => {
                write!(f, "table ID not found in p4info")
            }
            Error::EmptyMatchKey(..) => {
                write!(f, "table entry has an empty match key")
            }
            Error::EntryExists(..) => {
                write!(f, "table entry already exists")
            }
            Error::EntryNotFound(..) => {
                write!(f, "table entry not found")
            }
            Error::UnspecifiedUpdate => {
                write!(f, "unspecified update type")
            }
            Error::TableFull(..) => {
                write!(f, "table is full")
            }
            Error::UpdateAborted => {
                write!(f, "update rolled back")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::InvalidConfig(error) => Some(error),
            _ => None,
        }
    }
}

impl From<ConfigError> for Error {
    fn from(error: ConfigError) -> Error {
        Error::InvalidConfig(error)
    }
}

// ===== impl ConfigError =====

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingP4Info => {
                write!(f, "missing p4info")
            }
            ConfigError::NoTables => {
                write!(f, "p4info doesn't define any table")
            }
            ConfigError::InvalidTableId(name) => {
                write!(f, "invalid table ID for table {name}")
            }
            ConfigError::DuplicateTableId(id) => {
                write!(f, "duplicate table ID {id}")
            }
            ConfigError::MissingTableName(id) => {
                write!(f, "missing name for table {id}")
            }
            ConfigError::DuplicateTableName(name) => {
                write!(f, "duplicate table name {name}")
            }
            ConfigError::InvalidTableSize(id) => {
                write!(f, "invalid size for table {id}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
