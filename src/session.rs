// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy
// Copyright (c) 2024-2025 Jarkko Sakkinen

//! Authorization sessions: session start, command HMACs, nonce rolling and
//! response verification.

use crate::{
    constants::{SessionType, TpmAlgId, TpmCc, TpmRc},
    context::TpmContext,
    crypto::{
        crypto_digest, crypto_digest_size, crypto_hmac, crypto_hmac_verify, crypto_kdfa,
        crypto_random, KDF_LABEL_ATH,
    },
    device::{Device, StartAuthSession},
    error::{ContextFault, TpmError},
    handle::{Handle, HandleType, Name},
    policy::{PolicyAuthMethod, PolicyState},
    resource::ResourceContext,
    types::{AuthCommand, AuthResponse, SessionAttributes, SymDefObject},
};
use log::{debug, trace};
use zeroize::Zeroizing;

/// An entity together with the auth value that authorizes it.
#[derive(Clone, Copy)]
pub struct AuthorizedResource<'a> {
    pub context: &'a ResourceContext,
    pub auth_value: &'a [u8],
}

impl<'a> AuthorizedResource<'a> {
    #[must_use]
    pub fn new(context: &'a ResourceContext, auth_value: &'a [u8]) -> Self {
        Self {
            context,
            auth_value,
        }
    }
}

/// How a command's authorization area is filled for one entity.
#[derive(Debug, Clone, Copy)]
pub enum Authorization<'a> {
    Password,
    Session(&'a ResourceContext),
}

/// A salt secret and its encryption to the salting key.
#[derive(Clone, Copy)]
pub struct SessionSalt<'a> {
    pub tpm_key: &'a ResourceContext,
    pub salt: &'a [u8],
    pub encrypted_salt: &'a [u8],
}

/// Parameters for [`TpmContext::start_auth_session`].
#[derive(Clone, Copy)]
pub struct SessionParams<'a> {
    pub session_type: SessionType,
    pub auth_hash: TpmAlgId,
    pub symmetric: SymDefObject,
    pub salt: Option<SessionSalt<'a>>,
    pub bind: Option<AuthorizedResource<'a>>,
}

impl<'a> SessionParams<'a> {
    /// An unsalted, unbound session without parameter encryption.
    #[must_use]
    pub fn new(session_type: SessionType, auth_hash: TpmAlgId) -> Self {
        Self {
            session_type,
            auth_hash,
            symmetric: SymDefObject::null(),
            salt: None,
            bind: None,
        }
    }

    #[must_use]
    pub fn with_symmetric(mut self, symmetric: SymDefObject) -> Self {
        self.symmetric = symmetric;
        self
    }

    #[must_use]
    pub fn with_salt(mut self, salt: SessionSalt<'a>) -> Self {
        self.salt = Some(salt);
        self
    }

    #[must_use]
    pub fn with_bind(mut self, bind: AuthorizedResource<'a>) -> Self {
        self.bind = Some(bind);
        self
    }
}

/// Client-side state of a started session.
pub struct SessionState {
    pub(crate) session_type: SessionType,
    pub(crate) hash_alg: TpmAlgId,
    pub(crate) symmetric: SymDefObject,
    pub(crate) bound: Option<Name>,
    pub(crate) session_key: Zeroizing<Vec<u8>>,
    pub(crate) nonce_caller: Vec<u8>,
    pub(crate) nonce_tpm: Vec<u8>,
    pub(crate) attributes: SessionAttributes,
    pub(crate) policy: Option<PolicyState>,
}

impl SessionState {
    pub(crate) fn policy(&self) -> Result<&PolicyState, TpmError> {
        self.policy
            .as_ref()
            .ok_or_else(|| TpmError::context("policy_session", ContextFault::NotAPolicySession))
    }

    pub(crate) fn policy_mut(&mut self) -> Result<&mut PolicyState, TpmError> {
        self.policy
            .as_mut()
            .ok_or_else(|| TpmError::context("policy_session", ContextFault::NotAPolicySession))
    }

    fn auth_method(&self) -> Option<PolicyAuthMethod> {
        self.policy.as_ref().map(PolicyState::auth_method)
    }

    fn next_nonce_caller(&mut self) {
        loop {
            let nonce = crypto_random(self.nonce_caller.len());
            if nonce != self.nonce_caller {
                self.nonce_caller = nonce;
                return;
            }
        }
    }

    fn hmac_key(&self, entity: Option<&AuthorizedResource<'_>>) -> Zeroizing<Vec<u8>> {
        let mut key = Zeroizing::new(self.session_key.to_vec());
        let Some(entity) = entity else {
            return key;
        };
        let include_auth = match self.auth_method() {
            Some(method) => method == PolicyAuthMethod::AuthValue,
            None => self.bound.as_ref() != Some(&entity.context.name()),
        };
        if include_auth {
            key.extend_from_slice(trim_auth_value(entity.auth_value));
        }
        key
    }

    /// Policy sessions with neither an auth value nor a session key carry an
    /// empty HMAC.
    fn hmac_is_empty(&self, key: &[u8]) -> bool {
        self.auth_method() == Some(PolicyAuthMethod::Unset) && key.is_empty()
    }

    fn command_auth(
        &mut self,
        handle: Handle,
        cp_hash: &[u8],
        attributes: SessionAttributes,
        entity: Option<&AuthorizedResource<'_>>,
    ) -> Result<AuthCommand, TpmError> {
        self.attributes = attributes;
        self.next_nonce_caller();

        let hmac = if self.auth_method() == Some(PolicyAuthMethod::Password) {
            Zeroizing::new(entity.map(|e| e.auth_value.to_vec()).unwrap_or_default())
        } else {
            let key = self.hmac_key(entity);
            if self.hmac_is_empty(&key) {
                Zeroizing::new(Vec::new())
            } else {
                Zeroizing::new(crypto_hmac(
                    self.hash_alg,
                    &key,
                    &[
                        cp_hash,
                        &self.nonce_tpm,
                        &self.nonce_caller,
                        &[attributes.bits()],
                    ],
                )?)
            }
        };

        trace!(
            target: "tpm2ctx::session",
            "{handle}: nonce_caller={} nonce_tpm={}",
            hex::encode(&self.nonce_caller),
            hex::encode(&self.nonce_tpm)
        );

        Ok(AuthCommand {
            session_handle: handle,
            nonce: self.nonce_caller.clone(),
            attributes,
            hmac,
        })
    }

    fn verify_response(
        &mut self,
        rp_hash: &[u8],
        response: &AuthResponse,
        entity: Option<&AuthorizedResource<'_>>,
    ) -> Result<(), TpmError> {
        self.nonce_tpm.clone_from(&response.nonce);

        if self.auth_method() == Some(PolicyAuthMethod::Password) {
            return Ok(());
        }
        let key = self.hmac_key(entity);
        let valid = if self.hmac_is_empty(&key) {
            response.hmac.is_empty()
        } else {
            crypto_hmac_verify(
                self.hash_alg,
                &key,
                &[
                    rp_hash,
                    &self.nonce_tpm,
                    &self.nonce_caller,
                    &[response.attributes.bits()],
                ],
                &response.hmac,
            )?
        };
        if valid {
            Ok(())
        } else {
            Err(TpmError::ResponseAuthorization)
        }
    }
}

/// Strips trailing zero bytes, which do not take part in HMAC keys.
#[must_use]
pub fn trim_auth_value(auth_value: &[u8]) -> &[u8] {
    let len = auth_value
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |pos| pos + 1);
    &auth_value[..len]
}

/// `cpHash = H(commandCode || names || parameters)`
///
/// # Errors
///
/// Returns `InvalidAlgorithm` if `alg` is not a hash algorithm.
pub fn cp_hash(
    alg: TpmAlgId,
    command_code: TpmCc,
    names: &[Name],
    parameters: &[u8],
) -> Result<Vec<u8>, TpmError> {
    let cc = u32::from(command_code).to_be_bytes();
    let mut chunks: Vec<&[u8]> = Vec::with_capacity(names.len() + 2);
    chunks.push(&cc);
    chunks.extend(names.iter().map(Name::as_bytes));
    chunks.push(parameters);
    crypto_digest(alg, &chunks)
}

/// `rpHash = H(responseCode || commandCode || parameters)`
///
/// # Errors
///
/// Returns `InvalidAlgorithm` if `alg` is not a hash algorithm.
pub fn rp_hash(
    alg: TpmAlgId,
    response_code: TpmRc,
    command_code: TpmCc,
    parameters: &[u8],
) -> Result<Vec<u8>, TpmError> {
    crypto_digest(
        alg,
        &[
            &response_code.0.to_be_bytes(),
            &u32::from(command_code).to_be_bytes(),
            parameters,
        ],
    )
}

/// `sessionKey = KDFa(hash, bindAuth || salt, "ATH", nonceTPM, nonceCaller,
/// digestBits)`, or empty for an unbound and unsalted session.
///
/// # Errors
///
/// Returns `InvalidAlgorithm` if `alg` is not a hash algorithm.
pub fn session_key(
    alg: TpmAlgId,
    bind_auth: &[u8],
    salt: &[u8],
    nonce_tpm: &[u8],
    nonce_caller: &[u8],
) -> Result<Zeroizing<Vec<u8>>, TpmError> {
    let digest_size = crypto_digest_size(alg)?;
    let mut material = Zeroizing::new(trim_auth_value(bind_auth).to_vec());
    material.extend_from_slice(salt);
    if material.is_empty() {
        return Ok(Zeroizing::new(Vec::new()));
    }
    let bits = u16::try_from(digest_size * 8)
        .map_err(|_| TpmError::InvalidAlgorithm(format!("{alg} digest is too large")))?;
    crypto_kdfa(alg, &material, KDF_LABEL_ATH, nonce_tpm, nonce_caller, bits)
}

impl<D: Device> TpmContext<D> {
    /// Starts an authorization session and registers it with this connection.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAlgorithm` for a non-hash `auth_hash`,
    /// `InvalidContext` if the salt key or bind entity is not usable here, and
    /// any device error.
    pub fn start_auth_session(
        &mut self,
        params: &SessionParams<'_>,
    ) -> Result<ResourceContext, TpmError> {
        let digest_size = crypto_digest_size(params.auth_hash)?;
        if let Some(salt) = &params.salt {
            self.store.validate(Some(salt.tpm_key), "tpm_key")?;
        }
        if let Some(bind) = &params.bind {
            self.store.validate(Some(bind.context), "bind")?;
        }

        let request = StartAuthSession {
            tpm_key: params.salt.map_or(Handle::NULL, |s| s.tpm_key.handle()),
            bind: params.bind.map_or(Handle::NULL, |b| b.context.handle()),
            nonce_caller: crypto_random(digest_size),
            encrypted_salt: params
                .salt
                .map(|s| s.encrypted_salt.to_vec())
                .unwrap_or_default(),
            session_type: params.session_type,
            symmetric: params.symmetric,
            auth_hash: params.auth_hash,
        };
        let (handle, nonce_tpm) = self.device.start_auth_session(&request)?;

        let expected = if params.session_type.is_policy() {
            HandleType::PolicySession
        } else {
            HandleType::HmacSession
        };
        if handle.handle_type() != Some(expected) {
            return Err(TpmError::UnexpectedResponse(format!(
                "{handle} is not a {expected} handle"
            )));
        }

        let key = session_key(
            params.auth_hash,
            params.bind.map(|b| b.auth_value).unwrap_or_default(),
            params.salt.map(|s| s.salt).unwrap_or_default(),
            &nonce_tpm,
            &request.nonce_caller,
        )?;

        let state = SessionState {
            session_type: params.session_type,
            hash_alg: params.auth_hash,
            symmetric: params.symmetric,
            bound: params.bind.map(|b| b.context.name()),
            session_key: key,
            nonce_caller: request.nonce_caller,
            nonce_tpm,
            attributes: SessionAttributes::CONTINUE_SESSION,
            policy: match params.session_type {
                SessionType::Policy => Some(PolicyState::new(params.auth_hash)?),
                SessionType::Trial => Some(PolicyState::trial(params.auth_hash)?),
                SessionType::Hmac => None,
            },
        };

        let context = ResourceContext::new_session(handle, state);
        self.store.add(&context)?;
        debug!(
            target: "tpm2ctx::session",
            "start {handle}: type={:?} hash={} salted={} bound={}",
            params.session_type,
            params.auth_hash,
            params.salt.is_some(),
            params.bind.is_some()
        );
        Ok(context)
    }

    /// Builds the authorization for one command in `session`. A fresh caller
    /// nonce is generated and stored.
    ///
    /// # Errors
    ///
    /// Returns `InvalidContext` if `session` is not a session owned by this
    /// connection, `SessionUnavailable` if its state has been scrubbed, and
    /// `InvalidAlgorithm` for an unsupported session hash.
    pub fn compute_auth_value(
        &mut self,
        session: &ResourceContext,
        cp_hash: &[u8],
        attributes: SessionAttributes,
        entity: Option<&AuthorizedResource<'_>>,
    ) -> Result<AuthCommand, TpmError> {
        self.store.validate(Some(session), "session")?;
        if let Some(entity) = entity {
            self.store.validate(Some(entity.context), "entity")?;
        }
        let handle = session.handle();
        session.with_session(|s| s.command_auth(handle, cp_hash, attributes, entity))
    }

    /// Replaces the stored `nonceTPM` of `session`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidContext` if `session` is not a session owned by this
    /// connection and `SessionUnavailable` if its state has been scrubbed.
    pub fn roll_nonce(&mut self, session: &ResourceContext, nonce_tpm: &[u8]) -> Result<(), TpmError> {
        self.store.validate(Some(session), "session")?;
        session.with_session(|s| {
            s.nonce_tpm = nonce_tpm.to_vec();
            Ok(())
        })
    }

    /// Rolls the nonce from `response` and checks its HMAC. The nonce is
    /// rolled even when the check fails.
    ///
    /// # Errors
    ///
    /// Returns `ResponseAuthorization` on an HMAC mismatch, plus the same
    /// context errors as [`TpmContext::compute_auth_value`].
    pub fn verify_response_auth(
        &mut self,
        session: &ResourceContext,
        rp_hash: &[u8],
        response: &AuthResponse,
        entity: Option<&AuthorizedResource<'_>>,
    ) -> Result<(), TpmError> {
        self.store.validate(Some(session), "session")?;
        session.with_session(|s| s.verify_response(rp_hash, response, entity))
    }

    pub(crate) fn authorize(
        &mut self,
        authorization: Authorization<'_>,
        entity: &AuthorizedResource<'_>,
        command_code: TpmCc,
        names: &[Name],
        parameters: &[u8],
    ) -> Result<AuthCommand, TpmError> {
        match authorization {
            Authorization::Password => Ok(AuthCommand::password(entity.auth_value)),
            Authorization::Session(session) => {
                self.store.validate(Some(session), "session")?;
                let alg = session.session_hash_alg()?;
                let cp_hash = cp_hash(alg, command_code, names, parameters)?;
                let attributes = session.session_attributes()?;
                self.compute_auth_value(session, &cp_hash, attributes, Some(entity))
            }
        }
    }

    /// Verifies the response authorization and evicts a session the device
    /// has consumed.
    pub(crate) fn complete(
        &mut self,
        authorization: Authorization<'_>,
        entity: &AuthorizedResource<'_>,
        command_code: TpmCc,
        parameters: &[u8],
        response: &AuthResponse,
    ) -> Result<(), TpmError> {
        let Authorization::Session(session) = authorization else {
            return Ok(());
        };
        let alg = session.session_hash_alg()?;
        let rp_hash = rp_hash(alg, TpmRc::SUCCESS, command_code, parameters)?;
        let result = self.verify_response_auth(session, &rp_hash, response, Some(entity));
        if !response
            .attributes
            .contains(SessionAttributes::CONTINUE_SESSION)
        {
            debug!(target: "tpm2ctx::session", "{} consumed", session.handle());
            self.store.evict(session)?;
        }
        result
    }
}
