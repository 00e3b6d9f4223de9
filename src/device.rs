// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy
// Copyright (c) 2024-2025 Jarkko Sakkinen

//! The command surface the engine drives. An implementation owns command
//! marshaling and the transport; it returns the decoded response or the
//! device response code as a [`TpmError`].

use crate::{
    constants::{SessionType, TpmAlgId},
    error::TpmError,
    handle::{Handle, Name},
    types::{
        AuthCommand, AuthResponse, NvPublic, PcrSelection, PolicySecretParams,
        PolicySecretResponse, Public, SymDefObject,
    },
};

/// `TPM2_StartAuthSession` command parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartAuthSession {
    pub tpm_key: Handle,
    pub bind: Handle,
    pub nonce_caller: Vec<u8>,
    pub encrypted_salt: Vec<u8>,
    pub session_type: SessionType,
    pub symmetric: SymDefObject,
    pub auth_hash: TpmAlgId,
}

pub trait Device {
    /// `TPM2_ReadPublic`: the public area and the name the device reports.
    ///
    /// # Errors
    ///
    /// Returns the device response code or a transport failure.
    fn read_public(&mut self, handle: Handle) -> Result<(Public, Name), TpmError>;

    /// `TPM2_NV_ReadPublic`
    ///
    /// # Errors
    ///
    /// Returns the device response code or a transport failure.
    fn nv_read_public(&mut self, handle: Handle) -> Result<(NvPublic, Name), TpmError>;

    /// `TPM2_StartAuthSession`: the session handle and the first `nonceTPM`.
    ///
    /// # Errors
    ///
    /// Returns the device response code or a transport failure.
    fn start_auth_session(
        &mut self,
        request: &StartAuthSession,
    ) -> Result<(Handle, Vec<u8>), TpmError>;

    /// `TPM2_FlushContext`
    ///
    /// # Errors
    ///
    /// Returns the device response code or a transport failure.
    fn flush_context(&mut self, handle: Handle) -> Result<(), TpmError>;

    /// `TPM2_PCR_Read`: the selected values in selection order.
    ///
    /// # Errors
    ///
    /// Returns the device response code or a transport failure.
    fn pcr_read(&mut self, pcrs: &[PcrSelection]) -> Result<Vec<Vec<u8>>, TpmError>;

    /// `TPM2_PolicyPCR`
    ///
    /// # Errors
    ///
    /// Returns the device response code or a transport failure.
    fn policy_pcr(
        &mut self,
        session: Handle,
        pcr_digest: &[u8],
        pcrs: &[PcrSelection],
    ) -> Result<(), TpmError>;

    /// `TPM2_PolicyOR`
    ///
    /// # Errors
    ///
    /// Returns the device response code or a transport failure.
    fn policy_or(&mut self, session: Handle, digests: &[Vec<u8>]) -> Result<(), TpmError>;

    /// `TPM2_PolicySecret`, authorized by `auth` for `auth_handle`.
    ///
    /// # Errors
    ///
    /// Returns the device response code or a transport failure.
    fn policy_secret(
        &mut self,
        auth_handle: Handle,
        session: Handle,
        params: &PolicySecretParams,
        auth: &AuthCommand,
    ) -> Result<(PolicySecretResponse, AuthResponse), TpmError>;

    /// `TPM2_PolicyAuthValue`
    ///
    /// # Errors
    ///
    /// Returns the device response code or a transport failure.
    fn policy_auth_value(&mut self, session: Handle) -> Result<(), TpmError>;

    /// `TPM2_PolicyPassword`
    ///
    /// # Errors
    ///
    /// Returns the device response code or a transport failure.
    fn policy_password(&mut self, session: Handle) -> Result<(), TpmError>;

    /// `TPM2_PolicyGetDigest`
    ///
    /// # Errors
    ///
    /// Returns the device response code or a transport failure.
    fn policy_get_digest(&mut self, session: Handle) -> Result<Vec<u8>, TpmError>;

    /// `TPM2_GetRandom`. The device may return fewer bytes than requested.
    ///
    /// # Errors
    ///
    /// Returns the device response code or a transport failure.
    fn get_random(&mut self, bytes_requested: u16) -> Result<Vec<u8>, TpmError>;

    /// `TPM2_StirRandom`
    ///
    /// # Errors
    ///
    /// Returns the device response code or a transport failure.
    fn stir_random(&mut self, in_data: &[u8]) -> Result<(), TpmError>;
}
