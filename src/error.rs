// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy

use crate::{constants::TpmRc, handle::Handle};
use std::io::Error as IoError;
use thiserror::Error;

/// Why a resource context was rejected for a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextFault {
    #[error("nil value")]
    Nil,
    #[error("resource has been closed")]
    Closed,
    #[error("resource belongs to another connection")]
    Foreign,
    #[error("resource is already registered")]
    AlreadyOwned,
    #[error("not a session")]
    NotASession,
    #[error("not a policy session")]
    NotAPolicySession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportPhase {
    Send,
    Receive,
}

impl std::fmt::Display for TransportPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Send => f.write_str("send"),
            Self::Receive => f.write_str("receive"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TpmError {
    #[error("Authorization: {0}")]
    Authorization(TpmRc),

    #[error("Crypto: {0}")]
    Crypto(String),

    #[error("Handle in use: {0}")]
    HandleInUse(Handle),

    #[error("Integrity: {0}")]
    Integrity(String),

    #[error("Algorithm: {0}")]
    InvalidAlgorithm(String),

    #[error("invalid resource context for {param}: {fault}")]
    InvalidContext {
        param: String,
        fault: ContextFault,
    },

    #[error("Name: {0}")]
    InvalidName(String),

    #[error("Parameter: {0}")]
    InvalidParameter(String),

    #[error("I/O: {0}")]
    Io(#[from] IoError),

    #[error("Malformed: {0}")]
    Malformed(String),

    #[error("policy assertion failed: {0}")]
    PolicyFail(String),

    #[error("response HMAC check failed")]
    ResponseAuthorization,

    #[error("session state is unavailable")]
    SessionUnavailable,

    #[error("{0}")]
    TpmRc(TpmRc),

    #[error("Transport ({phase}): {source}")]
    Transport {
        phase: TransportPhase,
        #[source]
        source: IoError,
    },

    #[error("TPM unexpected: {0}")]
    UnexpectedResponse(String),

    #[error("Handle: unsupported handle type {0}")]
    UnsupportedHandle(Handle),
}

impl TpmError {
    pub(crate) fn context(param: &str, fault: ContextFault) -> Self {
        Self::InvalidContext {
            param: param.to_string(),
            fault,
        }
    }

    /// The context fault, when this is an `InvalidContext` error.
    #[must_use]
    pub fn context_fault(&self) -> Option<ContextFault> {
        match self {
            Self::InvalidContext { fault, .. } => Some(*fault),
            _ => None,
        }
    }

    /// The device response code carried by this error, if any.
    #[must_use]
    pub fn rc(&self) -> Option<TpmRc> {
        match self {
            Self::Authorization(rc) | Self::TpmRc(rc) => Some(*rc),
            _ => None,
        }
    }
}

impl From<TpmRc> for TpmError {
    fn from(rc: TpmRc) -> Self {
        if rc.is_auth_failure() {
            Self::Authorization(rc)
        } else {
            Self::TpmRc(rc)
        }
    }
}
