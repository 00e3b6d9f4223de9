// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy
// Copyright (c) 2024-2025 Jarkko Sakkinen

//! Handles, their classification and entity names.

use crate::{constants::TpmAlgId, error::TpmError};
use std::fmt;

/// `TPM_HANDLE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Handle(pub u32);

impl Handle {
    pub const OWNER: Self = Self(0x4000_0001);
    pub const NULL: Self = Self(0x4000_0007);
    pub const PW: Self = Self(0x4000_0009);
    pub const LOCKOUT: Self = Self(0x4000_000A);
    pub const ENDORSEMENT: Self = Self(0x4000_000B);
    pub const PLATFORM: Self = Self(0x4000_000C);

    /// Classifies the handle by its most significant byte.
    #[must_use]
    pub fn handle_type(self) -> Option<HandleType> {
        HandleType::from_top_byte(self.0.to_be_bytes()[0])
    }

    /// Returns the handle-form name of this handle.
    #[must_use]
    pub fn name(self) -> Name {
        Name(self.0.to_be_bytes().to_vec())
    }
}

impl From<u32> for Handle {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Handle> for u32 {
    fn from(handle: Handle) -> Self {
        handle.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// `TPM_HT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleType {
    Pcr,
    NvIndex,
    HmacSession,
    PolicySession,
    Permanent,
    Transient,
    Persistent,
}

impl HandleType {
    #[must_use]
    pub fn from_top_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Pcr),
            0x01 => Some(Self::NvIndex),
            0x02 => Some(Self::HmacSession),
            0x03 => Some(Self::PolicySession),
            0x40 => Some(Self::Permanent),
            0x80 => Some(Self::Transient),
            0x81 => Some(Self::Persistent),
            _ => None,
        }
    }
}

impl fmt::Display for HandleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pcr => "pcr",
            Self::NvIndex => "nv-index",
            Self::HmacSession => "hmac-session",
            Self::PolicySession => "policy-session",
            Self::Permanent => "permanent",
            Self::Transient => "transient",
            Self::Persistent => "persistent",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    Invalid,
    Handle,
    Digest,
}

/// `TPM2B_NAME` payload: either a 4-byte handle or an algorithm-prefixed
/// digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Name(Vec<u8>);

impl Name {
    /// Wraps raw bytes without checking them. Use [`Name::kind`] to classify.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Builds a digest-form name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName` if `alg` is not a hash algorithm or the digest
    /// length does not match it.
    pub fn from_digest(alg: TpmAlgId, digest: &[u8]) -> Result<Self, TpmError> {
        match alg.digest_size() {
            Some(size) if size == digest.len() => {
                let mut bytes = Vec::with_capacity(2 + size);
                bytes.extend_from_slice(&u16::from(alg).to_be_bytes());
                bytes.extend_from_slice(digest);
                Ok(Self(bytes))
            }
            _ => Err(TpmError::InvalidName(format!(
                "{} byte digest for {alg}",
                digest.len()
            ))),
        }
    }

    #[must_use]
    pub fn kind(&self) -> NameKind {
        if self.0.len() == 4 {
            return NameKind::Handle;
        }
        if self.0.len() < 2 {
            return NameKind::Invalid;
        }
        let id = u16::from_be_bytes([self.0[0], self.0[1]]);
        match TpmAlgId::try_from(id).ok().and_then(TpmAlgId::digest_size) {
            Some(size) if size == self.0.len() - 2 => NameKind::Digest,
            _ => NameKind::Invalid,
        }
    }

    /// # Errors
    ///
    /// Returns `InvalidName` unless this is a handle-form name.
    pub fn handle(&self) -> Result<Handle, TpmError> {
        match self.0.as_slice() {
            [a, b, c, d] => Ok(Handle(u32::from_be_bytes([*a, *b, *c, *d]))),
            _ => Err(TpmError::InvalidName(format!("{self} is not a handle"))),
        }
    }

    /// # Errors
    ///
    /// Returns `InvalidName` unless this is a digest-form name.
    pub fn algorithm(&self) -> Result<TpmAlgId, TpmError> {
        if self.kind() != NameKind::Digest {
            return Err(TpmError::InvalidName(format!("{self} is not a digest")));
        }
        TpmAlgId::try_from(u16::from_be_bytes([self.0[0], self.0[1]]))
    }

    /// # Errors
    ///
    /// Returns `InvalidName` unless this is a digest-form name.
    pub fn digest(&self) -> Result<&[u8], TpmError> {
        if self.kind() != NameKind::Digest {
            return Err(TpmError::InvalidName(format!("{self} is not a digest")));
        }
        Ok(&self.0[2..])
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for Name {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}
