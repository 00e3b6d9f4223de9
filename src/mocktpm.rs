// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy
// Copyright (c) 2024-2025 Jarkko Sakkinen

//! In-process device model.
//!
//! Keeps objects, NV indices, hierarchy auth values, PCR banks and sessions,
//! and checks command authorizations the way a TPM does. The salt of a
//! salted session is taken from `encrypted_salt` as is, since the model has
//! no asymmetric keys.

use crate::{
    constants::{SessionType, TpmAlgId, TpmCc, TpmRc, TpmSt},
    crypto::{crypto_digest, crypto_hmac, crypto_hmac_verify, crypto_random},
    device::{Device, StartAuthSession},
    error::{TpmError, TransportPhase},
    handle::{Handle, HandleType, Name},
    marshal::build_to_vec,
    policy::PolicyAuthMethod,
    session::{cp_hash, rp_hash, session_key, trim_auth_value},
    types::{
        AuthCommand, AuthResponse, NvPublic, PcrSelection, PolicySecretParams,
        PolicySecretResponse, Public, SessionAttributes, TkAuth,
    },
};
use log::{debug, trace};
use std::{collections::HashMap, io};
use zeroize::Zeroizing;

const PCR_COUNT: usize = 24;
const MIN_NONCE_SIZE: usize = 16;
const MAX_RANDOM_BYTES: u16 = 64;
const MAX_STIR_BYTES: usize = 128;

#[derive(Debug, Clone)]
struct MockTpmKey {
    public: Public,
    auth_value: Vec<u8>,
}

#[derive(Debug, Clone)]
struct MockNvIndex {
    public: NvPublic,
    auth_value: Vec<u8>,
}

struct MockSession {
    session_type: SessionType,
    hash_alg: TpmAlgId,
    session_key: Zeroizing<Vec<u8>>,
    bound: Option<Name>,
    nonce_tpm: Vec<u8>,
    nonce_caller: Vec<u8>,
    policy_digest: Vec<u8>,
    auth_method: PolicyAuthMethod,
}

/// The parts of an entity that take part in authorization.
struct MockEntity {
    name: Name,
    auth_value: Vec<u8>,
    auth_policy: Vec<u8>,
}

/// Outcome of a successful authorization check, needed for the response.
struct MockGrant {
    session: Option<Handle>,
    key: Zeroizing<Vec<u8>>,
    empty_hmac: bool,
    attributes: SessionAttributes,
}

pub struct MockTpm {
    objects: HashMap<Handle, MockTpmKey>,
    nv_indices: HashMap<Handle, MockNvIndex>,
    hierarchies: HashMap<Handle, Vec<u8>>,
    sessions: HashMap<Handle, MockSession>,
    pcrs: HashMap<TpmAlgId, Vec<Vec<u8>>>,
    reported_names: HashMap<Handle, Name>,
    next_transient_handle: u32,
    next_session_index: u32,
    proof: Vec<u8>,
    pending_fault: Option<TransportPhase>,
    command_count: usize,
}

impl Default for MockTpm {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTpm {
    #[must_use]
    pub fn new() -> Self {
        let mut pcrs = HashMap::new();
        pcrs.insert(TpmAlgId::Sha256, vec![vec![0; 32]; PCR_COUNT]);
        pcrs.insert(TpmAlgId::Sha1, vec![vec![0; 20]; PCR_COUNT]);

        let hierarchies = [
            Handle::OWNER,
            Handle::ENDORSEMENT,
            Handle::PLATFORM,
            Handle::LOCKOUT,
        ]
        .into_iter()
        .map(|h| (h, Vec::new()))
        .collect();

        Self {
            objects: HashMap::new(),
            nv_indices: HashMap::new(),
            hierarchies,
            sessions: HashMap::new(),
            pcrs,
            reported_names: HashMap::new(),
            next_transient_handle: 0x8000_0000,
            next_session_index: 0,
            proof: crypto_random(32),
            pending_fault: None,
            command_count: 0,
        }
    }

    /// Loads an object at the next free transient handle.
    pub fn load_object(&mut self, public: Public, auth_value: &[u8]) -> Handle {
        let handle = Handle(self.next_transient_handle);
        self.next_transient_handle += 1;
        self.objects.insert(
            handle,
            MockTpmKey {
                public,
                auth_value: auth_value.to_vec(),
            },
        );
        handle
    }

    /// # Errors
    ///
    /// Returns `UnsupportedHandle` unless `handle` is in the persistent range.
    pub fn insert_persistent(
        &mut self,
        handle: Handle,
        public: Public,
        auth_value: &[u8],
    ) -> Result<(), TpmError> {
        if handle.handle_type() != Some(HandleType::Persistent) {
            return Err(TpmError::UnsupportedHandle(handle));
        }
        self.objects.insert(
            handle,
            MockTpmKey {
                public,
                auth_value: auth_value.to_vec(),
            },
        );
        Ok(())
    }

    pub fn define_nv_index(&mut self, public: NvPublic, auth_value: &[u8]) {
        self.nv_indices.insert(
            public.nv_index,
            MockNvIndex {
                public,
                auth_value: auth_value.to_vec(),
            },
        );
    }

    pub fn set_hierarchy_auth(&mut self, hierarchy: Handle, auth_value: &[u8]) {
        self.hierarchies.insert(hierarchy, auth_value.to_vec());
    }

    /// Makes `ReadPublic` and `NV_ReadPublic` report `name` for `handle`.
    pub fn set_reported_name(&mut self, handle: Handle, name: Name) {
        self.reported_names.insert(handle, name);
    }

    /// `new = H(old || data)` in the `alg` bank.
    ///
    /// # Errors
    ///
    /// Returns `TpmRc` for a missing bank or an index out of range.
    pub fn pcr_extend(&mut self, alg: TpmAlgId, index: usize, data: &[u8]) -> Result<(), TpmError> {
        let bank = self.pcrs.get_mut(&alg).ok_or(TpmRc::VALUE)?;
        let pcr = bank.get_mut(index).ok_or(TpmRc::VALUE)?;
        let next = crypto_digest(alg, &[pcr.as_slice(), data])?;
        *pcr = next;
        Ok(())
    }

    /// Fails the next command with a transport error.
    pub fn inject_transport_failure(&mut self, phase: TransportPhase) {
        self.pending_fault = Some(phase);
    }

    #[must_use]
    pub fn command_count(&self) -> usize {
        self.command_count
    }

    #[must_use]
    pub fn has_session(&self, handle: Handle) -> bool {
        self.sessions.contains_key(&handle)
    }

    #[must_use]
    pub fn has_object(&self, handle: Handle) -> bool {
        self.objects.contains_key(&handle)
    }

    #[must_use]
    pub fn session_nonce_tpm(&self, handle: Handle) -> Option<&[u8]> {
        self.sessions.get(&handle).map(|s| s.nonce_tpm.as_slice())
    }

    #[must_use]
    pub fn session_policy_digest(&self, handle: Handle) -> Option<&[u8]> {
        self.sessions.get(&handle).map(|s| s.policy_digest.as_slice())
    }

    fn begin(&mut self, cc: TpmCc) -> Result<(), TpmError> {
        self.command_count += 1;
        trace!(target: "tpm2ctx::mocktpm", "{cc:?}");
        match self.pending_fault.take() {
            Some(phase) => Err(TpmError::Transport {
                phase,
                source: io::Error::new(io::ErrorKind::BrokenPipe, "injected fault"),
            }),
            None => Ok(()),
        }
    }

    fn reported_name(&self, handle: Handle, computed: Name) -> Name {
        self.reported_names.get(&handle).cloned().unwrap_or(computed)
    }

    fn entity(&self, handle: Handle) -> Result<MockEntity, TpmError> {
        let missing = || TpmError::from(TpmRc::HANDLE.with_handle(1));
        match handle.handle_type() {
            Some(HandleType::Permanent) => {
                let auth_value = self.hierarchies.get(&handle).ok_or_else(missing)?;
                Ok(MockEntity {
                    name: handle.name(),
                    auth_value: auth_value.clone(),
                    auth_policy: Vec::new(),
                })
            }
            Some(HandleType::NvIndex) => {
                let nv = self.nv_indices.get(&handle).ok_or_else(missing)?;
                Ok(MockEntity {
                    name: nv.public.name()?,
                    auth_value: nv.auth_value.clone(),
                    auth_policy: nv.public.auth_policy.clone(),
                })
            }
            Some(HandleType::Transient | HandleType::Persistent) => {
                let key = self.objects.get(&handle).ok_or_else(missing)?;
                Ok(MockEntity {
                    name: key.public.name()?,
                    auth_value: key.auth_value.clone(),
                    auth_policy: key.public.auth_policy.clone(),
                })
            }
            _ => Err(missing()),
        }
    }

    fn policy_session_mut(&mut self, handle: Handle, n: u32) -> Result<&mut MockSession, TpmError> {
        match self.sessions.get_mut(&handle) {
            Some(session) if session.session_type.is_policy() => Ok(session),
            _ => Err(TpmRc::HANDLE.with_handle(n).into()),
        }
    }

    fn read_pcrs(&self, pcrs: &[PcrSelection]) -> Result<Vec<Vec<u8>>, TpmError> {
        let mut values = Vec::new();
        for selection in pcrs {
            let bank = self
                .pcrs
                .get(&selection.hash)
                .ok_or(TpmRc::VALUE.with_parameter(1))?;
            for &index in &selection.pcrs {
                let value = bank
                    .get(index as usize)
                    .ok_or(TpmRc::VALUE.with_parameter(1))?;
                values.push(value.clone());
            }
        }
        Ok(values)
    }

    fn mocktpm_check_auth(
        &mut self,
        auth: &AuthCommand,
        entity: &MockEntity,
        cc: TpmCc,
        names: &[Name],
        parameters: &[u8],
    ) -> Result<MockGrant, TpmError> {
        if auth.session_handle == Handle::PW {
            if trim_auth_value(&auth.hmac) != trim_auth_value(&entity.auth_value) {
                return Err(TpmRc::AUTH_FAIL.with_session(1).into());
            }
            return Ok(MockGrant {
                session: None,
                key: Zeroizing::new(Vec::new()),
                empty_hmac: true,
                attributes: SessionAttributes::CONTINUE_SESSION,
            });
        }

        let session = self
            .sessions
            .get_mut(&auth.session_handle)
            .ok_or(TpmRc::REFERENCE_S0)?;

        let include_auth = match session.session_type {
            SessionType::Trial => return Err(TpmRc::AUTH_TYPE.into()),
            SessionType::Policy => {
                if session.policy_digest != entity.auth_policy {
                    return Err(TpmRc::POLICY_FAIL.with_session(1).into());
                }
                session.auth_method == PolicyAuthMethod::AuthValue
            }
            SessionType::Hmac => session.bound.as_ref() != Some(&entity.name),
        };

        if session.auth_method == PolicyAuthMethod::Password
            && session.session_type == SessionType::Policy
        {
            if trim_auth_value(&auth.hmac) != trim_auth_value(&entity.auth_value) {
                return Err(TpmRc::AUTH_FAIL.with_session(1).into());
            }
            session.nonce_caller.clone_from(&auth.nonce);
            return Ok(MockGrant {
                session: Some(auth.session_handle),
                key: Zeroizing::new(Vec::new()),
                empty_hmac: true,
                attributes: auth.attributes,
            });
        }

        let mut key = Zeroizing::new(session.session_key.to_vec());
        if include_auth {
            key.extend_from_slice(trim_auth_value(&entity.auth_value));
        }
        let empty_hmac = session.session_type == SessionType::Policy
            && session.auth_method == PolicyAuthMethod::Unset
            && key.is_empty();

        let valid = if empty_hmac {
            auth.hmac.is_empty()
        } else {
            let cp_hash = cp_hash(session.hash_alg, cc, names, parameters)?;
            crypto_hmac_verify(
                session.hash_alg,
                &key,
                &[
                    &cp_hash,
                    &session.nonce_tpm,
                    &auth.nonce,
                    &[auth.attributes.bits()],
                ],
                &auth.hmac,
            )?
        };
        if !valid {
            debug!(target: "tpm2ctx::mocktpm", "{}: HMAC mismatch", auth.session_handle);
            return Err(TpmRc::AUTH_FAIL.with_session(1).into());
        }

        session.nonce_caller.clone_from(&auth.nonce);
        Ok(MockGrant {
            session: Some(auth.session_handle),
            key,
            empty_hmac,
            attributes: auth.attributes,
        })
    }

    fn mocktpm_respond_auth(
        &mut self,
        grant: MockGrant,
        cc: TpmCc,
        parameters: &[u8],
    ) -> Result<AuthResponse, TpmError> {
        let Some(handle) = grant.session else {
            return Ok(AuthResponse {
                nonce: Vec::new(),
                attributes: grant.attributes,
                hmac: Vec::new(),
            });
        };
        let session = self.sessions.get_mut(&handle).ok_or(TpmRc::REFERENCE_S0)?;
        session.nonce_tpm = crypto_random(session.nonce_caller.len().max(MIN_NONCE_SIZE));

        let hmac = if grant.empty_hmac {
            Vec::new()
        } else {
            let rp_hash = rp_hash(session.hash_alg, TpmRc::SUCCESS, cc, parameters)?;
            crypto_hmac(
                session.hash_alg,
                &grant.key,
                &[
                    &rp_hash,
                    &session.nonce_tpm,
                    &session.nonce_caller,
                    &[grant.attributes.bits()],
                ],
            )?
        };
        let response = AuthResponse {
            nonce: session.nonce_tpm.clone(),
            attributes: grant.attributes,
            hmac,
        };

        if !grant
            .attributes
            .contains(SessionAttributes::CONTINUE_SESSION)
        {
            self.sessions.remove(&handle);
            debug!(target: "tpm2ctx::mocktpm", "{handle}: session closed");
        }
        Ok(response)
    }

    fn mocktpm_ticket(
        &self,
        entity: &MockEntity,
        params: &PolicySecretParams,
    ) -> Result<(Vec<u8>, TkAuth), TpmError> {
        if params.expiration >= 0 {
            return Ok((Vec::new(), TkAuth::null()));
        }
        let timeout = u64::from(params.expiration.unsigned_abs())
            .to_be_bytes()
            .to_vec();
        let digest = crypto_hmac(
            TpmAlgId::Sha256,
            &self.proof,
            &[
                &timeout,
                &params.cp_hash_a,
                &params.policy_ref,
                entity.name.as_bytes(),
            ],
        )?;
        Ok((
            timeout,
            TkAuth {
                tag: TpmSt::AuthSecret,
                hierarchy: Handle::OWNER,
                digest,
            },
        ))
    }
}

impl Device for MockTpm {
    fn read_public(&mut self, handle: Handle) -> Result<(Public, Name), TpmError> {
        self.begin(TpmCc::ReadPublic)?;
        let key = self
            .objects
            .get(&handle)
            .ok_or(TpmRc::HANDLE.with_handle(1))?;
        let public = key.public.clone();
        let name = self.reported_name(handle, public.name()?);
        Ok((public, name))
    }

    fn nv_read_public(&mut self, handle: Handle) -> Result<(NvPublic, Name), TpmError> {
        self.begin(TpmCc::NvReadPublic)?;
        let nv = self
            .nv_indices
            .get(&handle)
            .ok_or(TpmRc::HANDLE.with_handle(1))?;
        let public = nv.public.clone();
        let name = self.reported_name(handle, public.name()?);
        Ok((public, name))
    }

    fn start_auth_session(
        &mut self,
        request: &StartAuthSession,
    ) -> Result<(Handle, Vec<u8>), TpmError> {
        self.begin(TpmCc::StartAuthSession)?;
        let digest_size = request
            .auth_hash
            .digest_size()
            .ok_or(TpmRc::VALUE.with_parameter(5))?;
        if request.nonce_caller.len() < MIN_NONCE_SIZE {
            return Err(TpmRc::SIZE.with_parameter(1).into());
        }

        let salt = if request.tpm_key == Handle::NULL {
            Vec::new()
        } else {
            if !self.objects.contains_key(&request.tpm_key) {
                return Err(TpmRc::HANDLE.with_handle(1).into());
            }
            request.encrypted_salt.clone()
        };
        let (bound, bind_auth) = if request.bind == Handle::NULL {
            (None, Vec::new())
        } else {
            let entity = self.entity(request.bind).map_err(|_| {
                TpmError::from(TpmRc::HANDLE.with_handle(2))
            })?;
            (Some(entity.name), entity.auth_value)
        };

        let nonce_tpm = crypto_random(digest_size);
        let key = session_key(
            request.auth_hash,
            &bind_auth,
            &salt,
            &nonce_tpm,
            &request.nonce_caller,
        )?;

        let base = if request.session_type.is_policy() {
            0x0300_0000
        } else {
            0x0200_0000
        };
        let handle = Handle(base | self.next_session_index);
        self.next_session_index += 1;

        self.sessions.insert(
            handle,
            MockSession {
                session_type: request.session_type,
                hash_alg: request.auth_hash,
                session_key: key,
                bound: if request.session_type == SessionType::Hmac {
                    bound
                } else {
                    None
                },
                nonce_tpm: nonce_tpm.clone(),
                nonce_caller: request.nonce_caller.clone(),
                policy_digest: vec![0; digest_size],
                auth_method: PolicyAuthMethod::Unset,
            },
        );
        debug!(target: "tpm2ctx::mocktpm", "{handle}: session started");
        Ok((handle, nonce_tpm))
    }

    fn flush_context(&mut self, handle: Handle) -> Result<(), TpmError> {
        self.begin(TpmCc::FlushContext)?;
        let removed = match handle.handle_type() {
            Some(HandleType::HmacSession | HandleType::PolicySession) => {
                self.sessions.remove(&handle).is_some()
            }
            Some(HandleType::Transient) => self.objects.remove(&handle).is_some(),
            _ => false,
        };
        if removed {
            Ok(())
        } else {
            Err(TpmRc::HANDLE.with_parameter(1).into())
        }
    }

    fn pcr_read(&mut self, pcrs: &[PcrSelection]) -> Result<Vec<Vec<u8>>, TpmError> {
        self.begin(TpmCc::PcrRead)?;
        self.read_pcrs(pcrs)
    }

    fn policy_pcr(
        &mut self,
        session: Handle,
        pcr_digest: &[u8],
        pcrs: &[PcrSelection],
    ) -> Result<(), TpmError> {
        self.begin(TpmCc::PolicyPcr)?;
        let values = self.read_pcrs(pcrs)?;
        let selection = build_to_vec(pcrs)?;
        let state = self.policy_session_mut(session, 1)?;

        let chunks: Vec<&[u8]> = values.iter().map(Vec::as_slice).collect();
        let composite = crypto_digest(state.hash_alg, &chunks)?;
        if state.session_type == SessionType::Policy
            && !pcr_digest.is_empty()
            && pcr_digest != composite.as_slice()
        {
            return Err(TpmRc::VALUE.with_parameter(1).into());
        }
        let used: &[u8] = if pcr_digest.is_empty() {
            &composite
        } else {
            pcr_digest
        };
        state.policy_digest = crypto_digest(
            state.hash_alg,
            &[
                &state.policy_digest,
                &u32::from(TpmCc::PolicyPcr).to_be_bytes(),
                &selection,
                used,
            ],
        )?;
        Ok(())
    }

    fn policy_or(&mut self, session: Handle, digests: &[Vec<u8>]) -> Result<(), TpmError> {
        self.begin(TpmCc::PolicyOr)?;
        let state = self.policy_session_mut(session, 1)?;
        if !(2..=8).contains(&digests.len()) {
            return Err(TpmRc::SIZE.with_parameter(1).into());
        }
        if state.session_type == SessionType::Policy && !digests.contains(&state.policy_digest) {
            return Err(TpmRc::VALUE.with_parameter(1).into());
        }
        let zeros = vec![0u8; state.policy_digest.len()];
        let cc = u32::from(TpmCc::PolicyOr).to_be_bytes();
        let mut chunks: Vec<&[u8]> = Vec::with_capacity(digests.len() + 2);
        chunks.push(&zeros);
        chunks.push(&cc);
        chunks.extend(digests.iter().map(Vec::as_slice));
        state.policy_digest = crypto_digest(state.hash_alg, &chunks)?;
        Ok(())
    }

    fn policy_secret(
        &mut self,
        auth_handle: Handle,
        session: Handle,
        params: &PolicySecretParams,
        auth: &AuthCommand,
    ) -> Result<(PolicySecretResponse, AuthResponse), TpmError> {
        self.begin(TpmCc::PolicySecret)?;
        let entity = self.entity(auth_handle)?;
        {
            let state = self.policy_session_mut(session, 2)?;
            if !params.nonce_tpm.is_empty() && params.nonce_tpm != state.nonce_tpm {
                return Err(TpmRc::VALUE.with_parameter(1).into());
            }
        }

        let names = [entity.name.clone(), session.name()];
        let grant = self.mocktpm_check_auth(
            auth,
            &entity,
            TpmCc::PolicySecret,
            &names,
            &build_to_vec(params)?,
        )?;

        let state = self.policy_session_mut(session, 2)?;
        let inner = crypto_digest(
            state.hash_alg,
            &[
                &state.policy_digest,
                &u32::from(TpmCc::PolicySecret).to_be_bytes(),
                entity.name.as_bytes(),
            ],
        )?;
        state.policy_digest = crypto_digest(state.hash_alg, &[&inner, &params.policy_ref])?;

        let (timeout, ticket) = self.mocktpm_ticket(&entity, params)?;
        let response = PolicySecretResponse { timeout, ticket };
        let auth_response =
            self.mocktpm_respond_auth(grant, TpmCc::PolicySecret, &build_to_vec(&response)?)?;
        Ok((response, auth_response))
    }

    fn policy_auth_value(&mut self, session: Handle) -> Result<(), TpmError> {
        self.begin(TpmCc::PolicyAuthValue)?;
        self.policy_session_mut(session, 1)?.auth_method = PolicyAuthMethod::AuthValue;
        Ok(())
    }

    fn policy_password(&mut self, session: Handle) -> Result<(), TpmError> {
        self.begin(TpmCc::PolicyPassword)?;
        self.policy_session_mut(session, 1)?.auth_method = PolicyAuthMethod::Password;
        Ok(())
    }

    fn policy_get_digest(&mut self, session: Handle) -> Result<Vec<u8>, TpmError> {
        self.begin(TpmCc::PolicyGetDigest)?;
        Ok(self.policy_session_mut(session, 1)?.policy_digest.clone())
    }

    fn get_random(&mut self, bytes_requested: u16) -> Result<Vec<u8>, TpmError> {
        self.begin(TpmCc::GetRandom)?;
        Ok(crypto_random(usize::from(
            bytes_requested.min(MAX_RANDOM_BYTES),
        )))
    }

    fn stir_random(&mut self, in_data: &[u8]) -> Result<(), TpmError> {
        self.begin(TpmCc::StirRandom)?;
        if in_data.len() > MAX_STIR_BYTES {
            return Err(TpmRc::SIZE.with_parameter(1).into());
        }
        Ok(())
    }
}
