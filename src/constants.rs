// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy
// Copyright (c) 2024-2025 Jarkko Sakkinen

//! TPM 2.0 wire constants: algorithm identifiers, command codes, session
//! types, structure tags and response codes.

use crate::error::TpmError;
use std::{fmt, str::FromStr};

/// `TPM_ALG_ID`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum TpmAlgId {
    Rsa = 0x0001,
    Sha1 = 0x0004,
    Hmac = 0x0005,
    Aes = 0x0006,
    KeyedHash = 0x0008,
    Xor = 0x000A,
    Sha256 = 0x000B,
    Sha384 = 0x000C,
    Sha512 = 0x000D,
    Null = 0x0010,
    RsaSsa = 0x0014,
    RsaPss = 0x0016,
    Oaep = 0x0017,
    EcDsa = 0x0018,
    Ecdh = 0x0019,
    Kdf1Sp800_108 = 0x0022,
    Ecc = 0x0023,
    SymCipher = 0x0025,
    Cfb = 0x0043,
}

impl TpmAlgId {
    /// Returns the digest size in bytes for a hash algorithm, and `None` for
    /// everything else.
    #[must_use]
    pub fn digest_size(self) -> Option<usize> {
        match self {
            Self::Sha1 => Some(20),
            Self::Sha256 => Some(32),
            Self::Sha384 => Some(48),
            Self::Sha512 => Some(64),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_hash(self) -> bool {
        self.digest_size().is_some()
    }
}

impl TryFrom<u16> for TpmAlgId {
    type Error = TpmError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        let alg = match value {
            0x0001 => Self::Rsa,
            0x0004 => Self::Sha1,
            0x0005 => Self::Hmac,
            0x0006 => Self::Aes,
            0x0008 => Self::KeyedHash,
            0x000A => Self::Xor,
            0x000B => Self::Sha256,
            0x000C => Self::Sha384,
            0x000D => Self::Sha512,
            0x0010 => Self::Null,
            0x0014 => Self::RsaSsa,
            0x0016 => Self::RsaPss,
            0x0017 => Self::Oaep,
            0x0018 => Self::EcDsa,
            0x0019 => Self::Ecdh,
            0x0022 => Self::Kdf1Sp800_108,
            0x0023 => Self::Ecc,
            0x0025 => Self::SymCipher,
            0x0043 => Self::Cfb,
            _ => return Err(TpmError::Malformed(format!("unknown algorithm {value:#06x}"))),
        };
        Ok(alg)
    }
}

impl From<TpmAlgId> for u16 {
    fn from(alg: TpmAlgId) -> Self {
        alg as u16
    }
}

impl fmt::Display for TpmAlgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Rsa => "rsa",
            Self::Sha1 => "sha1",
            Self::Hmac => "hmac",
            Self::Aes => "aes",
            Self::KeyedHash => "keyedhash",
            Self::Xor => "xor",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
            Self::Null => "null",
            Self::RsaSsa => "rsassa",
            Self::RsaPss => "rsapss",
            Self::Oaep => "oaep",
            Self::EcDsa => "ecdsa",
            Self::Ecdh => "ecdh",
            Self::Kdf1Sp800_108 => "kdf1_sp800_108",
            Self::Ecc => "ecc",
            Self::SymCipher => "symcipher",
            Self::Cfb => "cfb",
        };
        f.write_str(s)
    }
}

impl FromStr for TpmAlgId {
    type Err = TpmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rsa" => Ok(Self::Rsa),
            "sha1" => Ok(Self::Sha1),
            "hmac" => Ok(Self::Hmac),
            "aes" => Ok(Self::Aes),
            "keyedhash" => Ok(Self::KeyedHash),
            "xor" => Ok(Self::Xor),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            "null" => Ok(Self::Null),
            "ecc" => Ok(Self::Ecc),
            "symcipher" => Ok(Self::SymCipher),
            "cfb" => Ok(Self::Cfb),
            _ => Err(TpmError::InvalidParameter(format!(
                "unknown algorithm name: '{s}'"
            ))),
        }
    }
}

/// `TPM_CC`, restricted to the commands that touch session or resource state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TpmCc {
    StirRandom = 0x0000_0146,
    PolicySecret = 0x0000_0151,
    FlushContext = 0x0000_0165,
    NvReadPublic = 0x0000_0169,
    PolicyAuthValue = 0x0000_016B,
    PolicyOr = 0x0000_0171,
    ReadPublic = 0x0000_0173,
    StartAuthSession = 0x0000_0176,
    GetRandom = 0x0000_017B,
    PcrRead = 0x0000_017E,
    PolicyPcr = 0x0000_017F,
    PolicyGetDigest = 0x0000_0189,
    PolicyPassword = 0x0000_018C,
}

impl From<TpmCc> for u32 {
    fn from(cc: TpmCc) -> Self {
        cc as u32
    }
}

/// `TPM_SE`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SessionType {
    #[default]
    Hmac = 0x00,
    Policy = 0x01,
    Trial = 0x03,
}

impl SessionType {
    /// Policy and trial sessions both carry a policy digest.
    #[must_use]
    pub fn is_policy(self) -> bool {
        matches!(self, Self::Policy | Self::Trial)
    }
}

impl FromStr for SessionType {
    type Err = TpmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hmac" => Ok(Self::Hmac),
            "policy" => Ok(Self::Policy),
            "trial" => Ok(Self::Trial),
            _ => Err(TpmError::InvalidParameter(format!(
                "invalid session type: '{s}'"
            ))),
        }
    }
}

/// `TPM_ST`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TpmSt {
    AuthSecret = 0x8023,
    AuthSigned = 0x8025,
}

impl From<TpmSt> for u16 {
    fn from(tag: TpmSt) -> Self {
        tag as u16
    }
}

const RC_FMT1: u32 = 0x080;
const RC_VER1: u32 = 0x100;
const RC_WARN: u32 = 0x900;
const RC_PARAMETER: u32 = 0x040;
const RC_SESSION: u32 = 0x800;

/// `TPM_RC`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TpmRc(pub u32);

impl TpmRc {
    pub const SUCCESS: Self = Self(0x000);
    pub const FAILURE: Self = Self(RC_VER1 + 0x001);
    pub const AUTH_TYPE: Self = Self(RC_VER1 + 0x024);
    pub const AUTH_MISSING: Self = Self(RC_VER1 + 0x025);
    pub const POLICY: Self = Self(RC_VER1 + 0x026);
    pub const COMMAND_CODE: Self = Self(RC_VER1 + 0x043);
    pub const VALUE: Self = Self(RC_FMT1 + 0x004);
    pub const HANDLE: Self = Self(RC_FMT1 + 0x00B);
    pub const AUTH_FAIL: Self = Self(RC_FMT1 + 0x00E);
    pub const SIZE: Self = Self(RC_FMT1 + 0x015);
    pub const POLICY_FAIL: Self = Self(RC_FMT1 + 0x01D);
    pub const BAD_AUTH: Self = Self(RC_FMT1 + 0x022);
    pub const EXPIRED: Self = Self(RC_FMT1 + 0x023);
    pub const REFERENCE_H0: Self = Self(RC_WARN + 0x010);
    pub const REFERENCE_S0: Self = Self(RC_WARN + 0x018);

    /// Attaches a handle number (1..=7) to a format-one code.
    #[must_use]
    pub fn with_handle(self, n: u32) -> Self {
        Self(self.0 | ((n & 0x7) << 8))
    }

    /// Attaches a parameter number (1..=15) to a format-one code.
    #[must_use]
    pub fn with_parameter(self, n: u32) -> Self {
        Self(self.0 | RC_PARAMETER | ((n & 0xF) << 8))
    }

    /// Attaches a session number (1..=7) to a format-one code.
    #[must_use]
    pub fn with_session(self, n: u32) -> Self {
        Self(self.0 | RC_SESSION | ((n & 0x7) << 8))
    }

    /// Strips handle, parameter and session numbers from a format-one code.
    #[must_use]
    pub fn base(self) -> Self {
        if self.0 & RC_FMT1 == 0 {
            self
        } else {
            Self(self.0 & (RC_FMT1 | 0x3F))
        }
    }

    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    /// Response codes that mean the presented authorization was rejected.
    #[must_use]
    pub fn is_auth_failure(self) -> bool {
        matches!(
            self.base(),
            Self::AUTH_FAIL
                | Self::BAD_AUTH
                | Self::POLICY_FAIL
                | Self::EXPIRED
                | Self::AUTH_MISSING
                | Self::AUTH_TYPE
        )
    }

    fn base_name(self) -> Option<&'static str> {
        let name = match self.base() {
            Self::SUCCESS => "TPM_RC_SUCCESS",
            Self::FAILURE => "TPM_RC_FAILURE",
            Self::AUTH_TYPE => "TPM_RC_AUTH_TYPE",
            Self::AUTH_MISSING => "TPM_RC_AUTH_MISSING",
            Self::POLICY => "TPM_RC_POLICY",
            Self::COMMAND_CODE => "TPM_RC_COMMAND_CODE",
            Self::VALUE => "TPM_RC_VALUE",
            Self::HANDLE => "TPM_RC_HANDLE",
            Self::AUTH_FAIL => "TPM_RC_AUTH_FAIL",
            Self::SIZE => "TPM_RC_SIZE",
            Self::POLICY_FAIL => "TPM_RC_POLICY_FAIL",
            Self::BAD_AUTH => "TPM_RC_BAD_AUTH",
            Self::EXPIRED => "TPM_RC_EXPIRED",
            Self::REFERENCE_H0 => "TPM_RC_REFERENCE_H0",
            Self::REFERENCE_S0 => "TPM_RC_REFERENCE_S0",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for TpmRc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.base_name() {
            Some(name) => write!(f, "{name} ({:#x})", self.0),
            None => write!(f, "{:#x}", self.0),
        }
    }
}
