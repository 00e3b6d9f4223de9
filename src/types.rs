// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy
// Copyright (c) 2024-2025 Jarkko Sakkinen

//! Value types exchanged with the device and hashed into names and
//! authorizations.

use crate::{
    constants::{TpmAlgId, TpmSt},
    error::TpmError,
    handle::{Handle, Name},
    marshal::{build_to_vec, parse_tpm2b, parse_u16, TpmBuild, TpmParse, TpmWriter},
};
use bitflags::bitflags;
use std::fmt;
use zeroize::Zeroizing;

bitflags! {
    /// `TPMA_OBJECT`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ObjectAttributes: u32 {
        const FIXED_TPM = 0x0000_0002;
        const ST_CLEAR = 0x0000_0004;
        const FIXED_PARENT = 0x0000_0010;
        const SENSITIVE_DATA_ORIGIN = 0x0000_0020;
        const USER_WITH_AUTH = 0x0000_0040;
        const ADMIN_WITH_POLICY = 0x0000_0080;
        const NO_DA = 0x0000_0400;
        const ENCRYPTED_DUPLICATION = 0x0000_0800;
        const RESTRICTED = 0x0001_0000;
        const DECRYPT = 0x0002_0000;
        const SIGN_ENCRYPT = 0x0004_0000;
    }
}

bitflags! {
    /// `TPMA_NV`, only the bits the engine looks at.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NvAttributes: u32 {
        const PPWRITE = 0x0000_0001;
        const OWNERWRITE = 0x0000_0002;
        const AUTHWRITE = 0x0000_0004;
        const POLICYWRITE = 0x0000_0008;
        const PPREAD = 0x0001_0000;
        const OWNERREAD = 0x0002_0000;
        const AUTHREAD = 0x0004_0000;
        const POLICYREAD = 0x0008_0000;
        const NO_DA = 0x0200_0000;
        const WRITTEN = 0x2000_0000;
    }
}

bitflags! {
    /// `TPMA_SESSION`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SessionAttributes: u8 {
        const CONTINUE_SESSION = 0x01;
        const AUDIT_EXCLUSIVE = 0x02;
        const AUDIT_RESET = 0x04;
        const DECRYPT = 0x20;
        const ENCRYPT = 0x40;
        const AUDIT = 0x80;
    }
}

/// `TPMT_SYM_DEF_OBJECT`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymDefObject {
    pub algorithm: TpmAlgId,
    pub key_bits: u16,
    pub mode: TpmAlgId,
}

impl SymDefObject {
    #[must_use]
    pub fn null() -> Self {
        Self {
            algorithm: TpmAlgId::Null,
            key_bits: 0,
            mode: TpmAlgId::Null,
        }
    }

    #[must_use]
    pub fn aes_cfb(key_bits: u16) -> Self {
        Self {
            algorithm: TpmAlgId::Aes,
            key_bits,
            mode: TpmAlgId::Cfb,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.algorithm == TpmAlgId::Null
    }
}

impl Default for SymDefObject {
    fn default() -> Self {
        Self::null()
    }
}

impl TpmBuild for SymDefObject {
    fn build(&self, writer: &mut TpmWriter) -> Result<(), TpmError> {
        writer.write_u16(self.algorithm.into());
        if !self.is_null() {
            writer.write_u16(self.key_bits);
            writer.write_u16(self.mode.into());
        }
        Ok(())
    }
}

/// An algorithm selector with an optional hash, the shape shared by
/// `TPMT_KEYEDHASH_SCHEME`, `TPMT_RSA_SCHEME`, `TPMT_ECC_SCHEME` and
/// `TPMT_KDF_SCHEME`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scheme {
    pub scheme: TpmAlgId,
    pub hash_alg: TpmAlgId,
}

impl Scheme {
    #[must_use]
    pub fn null() -> Self {
        Self {
            scheme: TpmAlgId::Null,
            hash_alg: TpmAlgId::Null,
        }
    }
}

impl Default for Scheme {
    fn default() -> Self {
        Self::null()
    }
}

impl TpmBuild for Scheme {
    fn build(&self, writer: &mut TpmWriter) -> Result<(), TpmError> {
        writer.write_u16(self.scheme.into());
        if self.scheme != TpmAlgId::Null {
            writer.write_u16(self.hash_alg.into());
        }
        Ok(())
    }
}

/// `TPMU_PUBLIC_PARMS`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicParms {
    KeyedHash {
        scheme: Scheme,
    },
    SymCipher {
        symmetric: SymDefObject,
    },
    Rsa {
        symmetric: SymDefObject,
        scheme: Scheme,
        key_bits: u16,
        exponent: u32,
    },
    Ecc {
        symmetric: SymDefObject,
        scheme: Scheme,
        curve_id: u16,
        kdf: Scheme,
    },
}

/// `TPMU_PUBLIC_ID`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicId {
    Digest(Vec<u8>),
    Rsa(Vec<u8>),
    Ecc { x: Vec<u8>, y: Vec<u8> },
}

/// `TPMT_PUBLIC`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Public {
    pub object_type: TpmAlgId,
    pub name_alg: TpmAlgId,
    pub object_attributes: ObjectAttributes,
    pub auth_policy: Vec<u8>,
    pub parameters: PublicParms,
    pub unique: PublicId,
}

impl Public {
    /// A sealed data object with the given unique field.
    #[must_use]
    pub fn keyed_hash(name_alg: TpmAlgId, attributes: ObjectAttributes, unique: &[u8]) -> Self {
        Self {
            object_type: TpmAlgId::KeyedHash,
            name_alg,
            object_attributes: attributes,
            auth_policy: Vec::new(),
            parameters: PublicParms::KeyedHash {
                scheme: Scheme::null(),
            },
            unique: PublicId::Digest(unique.to_vec()),
        }
    }

    /// A restricted decryption RSA key, the usual shape of a storage parent.
    #[must_use]
    pub fn rsa_storage(name_alg: TpmAlgId, modulus: &[u8]) -> Self {
        let key_bits = u16::try_from(modulus.len() * 8).unwrap_or(u16::MAX);
        Self {
            object_type: TpmAlgId::Rsa,
            name_alg,
            object_attributes: ObjectAttributes::FIXED_TPM
                | ObjectAttributes::FIXED_PARENT
                | ObjectAttributes::SENSITIVE_DATA_ORIGIN
                | ObjectAttributes::USER_WITH_AUTH
                | ObjectAttributes::RESTRICTED
                | ObjectAttributes::DECRYPT,
            auth_policy: Vec::new(),
            parameters: PublicParms::Rsa {
                symmetric: SymDefObject::aes_cfb(128),
                scheme: Scheme::null(),
                key_bits,
                exponent: 0,
            },
            unique: PublicId::Rsa(modulus.to_vec()),
        }
    }

    #[must_use]
    pub fn with_auth_policy(mut self, policy: &[u8]) -> Self {
        self.auth_policy = policy.to_vec();
        self
    }

    /// The symmetric definition used for protecting children, if the object
    /// type has one.
    #[must_use]
    pub fn symmetric(&self) -> Option<&SymDefObject> {
        match &self.parameters {
            PublicParms::KeyedHash { .. } => None,
            PublicParms::SymCipher { symmetric }
            | PublicParms::Rsa { symmetric, .. }
            | PublicParms::Ecc { symmetric, .. } => Some(symmetric),
        }
    }

    /// # Errors
    ///
    /// Returns `InvalidAlgorithm` if the name algorithm is not a hash.
    pub fn name(&self) -> Result<Name, TpmError> {
        crate::crypto::crypto_make_name(self.name_alg, &build_to_vec(self)?)
    }
}

impl TpmBuild for Public {
    fn build(&self, writer: &mut TpmWriter) -> Result<(), TpmError> {
        writer.write_u16(self.object_type.into());
        writer.write_u16(self.name_alg.into());
        writer.write_u32(self.object_attributes.bits());
        writer.write_tpm2b(&self.auth_policy)?;
        match &self.parameters {
            PublicParms::KeyedHash { scheme } => scheme.build(writer)?,
            PublicParms::SymCipher { symmetric } => symmetric.build(writer)?,
            PublicParms::Rsa {
                symmetric,
                scheme,
                key_bits,
                exponent,
            } => {
                symmetric.build(writer)?;
                scheme.build(writer)?;
                writer.write_u16(*key_bits);
                writer.write_u32(*exponent);
            }
            PublicParms::Ecc {
                symmetric,
                scheme,
                curve_id,
                kdf,
            } => {
                symmetric.build(writer)?;
                scheme.build(writer)?;
                writer.write_u16(*curve_id);
                kdf.build(writer)?;
            }
        }
        match &self.unique {
            PublicId::Digest(bytes) | PublicId::Rsa(bytes) => writer.write_tpm2b(bytes),
            PublicId::Ecc { x, y } => {
                writer.write_tpm2b(x)?;
                writer.write_tpm2b(y)
            }
        }
    }
}

/// `TPMS_NV_PUBLIC`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NvPublic {
    pub nv_index: Handle,
    pub name_alg: TpmAlgId,
    pub attributes: NvAttributes,
    pub auth_policy: Vec<u8>,
    pub data_size: u16,
}

impl NvPublic {
    /// # Errors
    ///
    /// Returns `InvalidAlgorithm` if the name algorithm is not a hash.
    pub fn name(&self) -> Result<Name, TpmError> {
        crate::crypto::crypto_make_name(self.name_alg, &build_to_vec(self)?)
    }
}

impl TpmBuild for NvPublic {
    fn build(&self, writer: &mut TpmWriter) -> Result<(), TpmError> {
        writer.write_u32(self.nv_index.0);
        writer.write_u16(self.name_alg.into());
        writer.write_u32(self.attributes.bits());
        writer.write_tpm2b(&self.auth_policy)?;
        writer.write_u16(self.data_size);
        Ok(())
    }
}

/// `TPMT_SENSITIVE`
#[derive(Clone, PartialEq, Eq)]
pub struct Sensitive {
    pub sensitive_type: TpmAlgId,
    pub auth_value: Zeroizing<Vec<u8>>,
    pub seed_value: Zeroizing<Vec<u8>>,
    pub sensitive: Zeroizing<Vec<u8>>,
}

impl Sensitive {
    /// Sealed data for a keyed-hash object.
    #[must_use]
    pub fn sealed(auth_value: &[u8], seed_value: &[u8], data: &[u8]) -> Self {
        Self {
            sensitive_type: TpmAlgId::KeyedHash,
            auth_value: Zeroizing::new(auth_value.to_vec()),
            seed_value: Zeroizing::new(seed_value.to_vec()),
            sensitive: Zeroizing::new(data.to_vec()),
        }
    }

    /// Marshals the structure as `TPM2B_SENSITIVE`.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` if a field exceeds its 16-bit size.
    pub fn to_tpm2b(&self) -> Result<Zeroizing<Vec<u8>>, TpmError> {
        let inner = Zeroizing::new(build_to_vec(self)?);
        let mut writer = TpmWriter::new();
        writer.write_tpm2b(&inner)?;
        Ok(Zeroizing::new(writer.into_inner()))
    }

    /// Parses a `TPM2B_SENSITIVE` that must span all of `buf`.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` on a size mismatch or trailing bytes.
    pub fn from_tpm2b(buf: &[u8]) -> Result<Self, TpmError> {
        let (inner, rest) = parse_tpm2b(buf)?;
        if !rest.is_empty() {
            return Err(TpmError::Malformed(format!(
                "{} trailing bytes after TPM2B_SENSITIVE",
                rest.len()
            )));
        }
        let (sensitive, rest) = Self::parse(inner)?;
        if !rest.is_empty() {
            return Err(TpmError::Malformed(
                "TPMT_SENSITIVE shorter than its size field".to_string(),
            ));
        }
        Ok(sensitive)
    }
}

impl fmt::Debug for Sensitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sensitive")
            .field("sensitive_type", &self.sensitive_type)
            .field("auth_value", &"<redacted>")
            .field("seed_value", &"<redacted>")
            .field("sensitive", &"<redacted>")
            .finish()
    }
}

impl TpmBuild for Sensitive {
    fn build(&self, writer: &mut TpmWriter) -> Result<(), TpmError> {
        writer.write_u16(self.sensitive_type.into());
        writer.write_tpm2b(&self.auth_value)?;
        writer.write_tpm2b(&self.seed_value)?;
        writer.write_tpm2b(&self.sensitive)
    }
}

impl TpmParse for Sensitive {
    fn parse(buf: &[u8]) -> Result<(Self, &[u8]), TpmError> {
        let (sensitive_type, buf) = parse_u16(buf)?;
        let (auth_value, buf) = parse_tpm2b(buf)?;
        let (seed_value, buf) = parse_tpm2b(buf)?;
        let (sensitive, buf) = parse_tpm2b(buf)?;
        Ok((
            Self {
                sensitive_type: TpmAlgId::try_from(sensitive_type)?,
                auth_value: Zeroizing::new(auth_value.to_vec()),
                seed_value: Zeroizing::new(seed_value.to_vec()),
                sensitive: Zeroizing::new(sensitive.to_vec()),
            },
            buf,
        ))
    }
}

const PCR_SELECT_MIN: usize = 3;

/// `TPMS_PCR_SELECTION`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PcrSelection {
    pub hash: TpmAlgId,
    pub pcrs: Vec<u32>,
}

impl PcrSelection {
    /// Selects `pcrs` from the `hash` bank. Indices are sorted and
    /// deduplicated.
    #[must_use]
    pub fn new(hash: TpmAlgId, pcrs: &[u32]) -> Self {
        let mut pcrs = pcrs.to_vec();
        pcrs.sort_unstable();
        pcrs.dedup();
        Self { hash, pcrs }
    }

    fn bitmap(&self) -> Result<Vec<u8>, TpmError> {
        let needed = self
            .pcrs
            .last()
            .map_or(0, |&max| (max as usize) / 8 + 1);
        if needed > usize::from(u8::MAX) {
            return Err(TpmError::Malformed(format!("PCR select of {needed} bytes")));
        }
        let mut bitmap = vec![0u8; needed.max(PCR_SELECT_MIN)];
        for &pcr in &self.pcrs {
            bitmap[(pcr / 8) as usize] |= 1 << (pcr % 8);
        }
        Ok(bitmap)
    }
}

impl TpmBuild for PcrSelection {
    fn build(&self, writer: &mut TpmWriter) -> Result<(), TpmError> {
        let bitmap = self.bitmap()?;
        let size = u8::try_from(bitmap.len())
            .map_err(|_| TpmError::Malformed(format!("PCR select of {} bytes", bitmap.len())))?;
        writer.write_u16(self.hash.into());
        writer.write_u8(size);
        writer.write_bytes(&bitmap);
        Ok(())
    }
}

/// `TPML_PCR_SELECTION`
impl TpmBuild for [PcrSelection] {
    fn build(&self, writer: &mut TpmWriter) -> Result<(), TpmError> {
        let count = u32::try_from(self.len())
            .map_err(|_| TpmError::Malformed("too many PCR selections".to_string()))?;
        writer.write_u32(count);
        for selection in self {
            selection.build(writer)?;
        }
        Ok(())
    }
}

/// `TPMT_TK_AUTH`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TkAuth {
    pub tag: TpmSt,
    pub hierarchy: Handle,
    pub digest: Vec<u8>,
}

impl TkAuth {
    /// The empty ticket returned when no ticket was requested.
    #[must_use]
    pub fn null() -> Self {
        Self {
            tag: TpmSt::AuthSecret,
            hierarchy: Handle::NULL,
            digest: Vec::new(),
        }
    }
}

impl TpmBuild for TkAuth {
    fn build(&self, writer: &mut TpmWriter) -> Result<(), TpmError> {
        writer.write_u16(self.tag.into());
        writer.write_u32(self.hierarchy.0);
        writer.write_tpm2b(&self.digest)
    }
}

/// `TPMS_AUTH_COMMAND`
#[derive(Clone, PartialEq, Eq)]
pub struct AuthCommand {
    pub session_handle: Handle,
    pub nonce: Vec<u8>,
    pub attributes: SessionAttributes,
    pub hmac: Zeroizing<Vec<u8>>,
}

impl AuthCommand {
    /// A password authorization carrying `auth_value` in the clear.
    #[must_use]
    pub fn password(auth_value: &[u8]) -> Self {
        Self {
            session_handle: Handle::PW,
            nonce: Vec::new(),
            attributes: SessionAttributes::empty(),
            hmac: Zeroizing::new(auth_value.to_vec()),
        }
    }
}

impl fmt::Debug for AuthCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthCommand")
            .field("session_handle", &self.session_handle)
            .field("nonce", &hex::encode(&self.nonce))
            .field("attributes", &self.attributes)
            .field("hmac", &"<redacted>")
            .finish()
    }
}

/// `TPMS_AUTH_RESPONSE`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthResponse {
    pub nonce: Vec<u8>,
    pub attributes: SessionAttributes,
    pub hmac: Vec<u8>,
}

/// `TPM2_PolicySecret` command parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySecretParams {
    pub nonce_tpm: Vec<u8>,
    pub cp_hash_a: Vec<u8>,
    pub policy_ref: Vec<u8>,
    pub expiration: i32,
}

impl TpmBuild for PolicySecretParams {
    fn build(&self, writer: &mut TpmWriter) -> Result<(), TpmError> {
        writer.write_tpm2b(&self.nonce_tpm)?;
        writer.write_tpm2b(&self.cp_hash_a)?;
        writer.write_tpm2b(&self.policy_ref)?;
        writer.write_i32(self.expiration);
        Ok(())
    }
}

/// `TPM2_PolicySecret` response parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicySecretResponse {
    pub timeout: Vec<u8>,
    pub ticket: TkAuth,
}

impl TpmBuild for PolicySecretResponse {
    fn build(&self, writer: &mut TpmWriter) -> Result<(), TpmError> {
        writer.write_tpm2b(&self.timeout)?;
        self.ticket.build(writer)
    }
}
