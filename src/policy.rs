// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy
// Copyright (c) 2024-2025 Jarkko Sakkinen

//! Policy assertions and the client-side policy digest.
//!
//! [`PolicyState`] can be driven without a device to compute a policy
//! offline; the same state is kept per policy session and updated after
//! every successful assertion.

use crate::{
    constants::{TpmAlgId, TpmCc},
    context::TpmContext,
    crypto::{crypto_digest, crypto_digest_size},
    device::Device,
    error::TpmError,
    handle::Name,
    marshal::build_to_vec,
    resource::ResourceContext,
    session::{Authorization, AuthorizedResource},
    types::{PcrSelection, PolicySecretParams, TkAuth},
};
use log::{debug, trace, warn};

const POLICY_OR_MIN: usize = 2;
const POLICY_OR_MAX: usize = 8;

/// How a satisfied policy session proves knowledge of the entity's auth value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolicyAuthMethod {
    #[default]
    Unset,
    AuthValue,
    Password,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyState {
    hash_alg: TpmAlgId,
    digest: Vec<u8>,
    auth_method: PolicyAuthMethod,
    trial: bool,
}

impl PolicyState {
    /// Starts from an all-zero digest of the session hash size.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAlgorithm` if `hash_alg` is not a hash algorithm.
    pub fn new(hash_alg: TpmAlgId) -> Result<Self, TpmError> {
        Ok(Self {
            hash_alg,
            digest: vec![0; crypto_digest_size(hash_alg)?],
            auth_method: PolicyAuthMethod::Unset,
            trial: false,
        })
    }

    /// Like [`PolicyState::new`], but assertions are not checked against the
    /// current state, as on a trial session.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAlgorithm` if `hash_alg` is not a hash algorithm.
    pub fn trial(hash_alg: TpmAlgId) -> Result<Self, TpmError> {
        Ok(Self {
            trial: true,
            ..Self::new(hash_alg)?
        })
    }

    #[must_use]
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    #[must_use]
    pub fn hash_alg(&self) -> TpmAlgId {
        self.hash_alg
    }

    #[must_use]
    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    #[must_use]
    pub fn auth_method(&self) -> PolicyAuthMethod {
        self.auth_method
    }

    /// `H(old || TPM_CC_PolicyPCR || pcrs || composite)`
    ///
    /// # Errors
    ///
    /// Returns `Malformed` if the selection cannot be encoded.
    pub fn policy_pcr(&mut self, pcrs: &[PcrSelection], composite: &[u8]) -> Result<(), TpmError> {
        let selection = build_to_vec(pcrs)?;
        self.digest = crypto_digest(
            self.hash_alg,
            &[
                &self.digest,
                &u32::from(TpmCc::PolicyPcr).to_be_bytes(),
                &selection,
                composite,
            ],
        )?;
        Ok(())
    }

    /// Replaces the digest with `H(zeros || TPM_CC_PolicyOR || digests)` if the
    /// current digest is one of `digests`. A trial state skips the membership
    /// check. Nothing changes on failure.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for a list outside 2..=8 entries or with an
    /// entry of the wrong size, and `PolicyFail` when the current digest is
    /// not in the list.
    pub fn policy_or(&mut self, digests: &[Vec<u8>]) -> Result<(), TpmError> {
        if !(POLICY_OR_MIN..=POLICY_OR_MAX).contains(&digests.len()) {
            return Err(TpmError::InvalidParameter(format!(
                "PolicyOR takes {POLICY_OR_MIN} to {POLICY_OR_MAX} digests, got {}",
                digests.len()
            )));
        }
        if let Some(bad) = digests.iter().find(|d| d.len() != self.digest.len()) {
            return Err(TpmError::InvalidParameter(format!(
                "PolicyOR digest of {} bytes, expected {}",
                bad.len(),
                self.digest.len()
            )));
        }
        if !self.trial && !digests.iter().any(|d| *d == self.digest) {
            return Err(TpmError::PolicyFail(
                "current policy digest is not in the PolicyOR list".to_string(),
            ));
        }

        let zeros = vec![0u8; self.digest.len()];
        let cc = u32::from(TpmCc::PolicyOr).to_be_bytes();
        let mut chunks: Vec<&[u8]> = Vec::with_capacity(digests.len() + 2);
        chunks.push(&zeros);
        chunks.push(&cc);
        chunks.extend(digests.iter().map(Vec::as_slice));
        self.digest = crypto_digest(self.hash_alg, &chunks)?;
        Ok(())
    }

    /// `H(H(old || TPM_CC_PolicySecret || entityName) || policyRef)`
    ///
    /// # Errors
    ///
    /// Returns `InvalidAlgorithm` if the hash algorithm is unsupported.
    pub fn policy_secret(&mut self, entity_name: &Name, policy_ref: &[u8]) -> Result<(), TpmError> {
        let inner = crypto_digest(
            self.hash_alg,
            &[
                &self.digest,
                &u32::from(TpmCc::PolicySecret).to_be_bytes(),
                entity_name.as_bytes(),
            ],
        )?;
        self.digest = crypto_digest(self.hash_alg, &[&inner, policy_ref])?;
        Ok(())
    }

    /// Requires an HMAC keyed with the entity's auth value. The digest is
    /// left as is.
    pub fn policy_auth_value(&mut self) {
        self.auth_method = PolicyAuthMethod::AuthValue;
    }

    /// Requires the entity's auth value in the clear. The digest is left as
    /// is.
    pub fn policy_password(&mut self) {
        self.auth_method = PolicyAuthMethod::Password;
    }
}

/// Hash of the concatenated PCR values, in selection order.
///
/// # Errors
///
/// Returns `InvalidAlgorithm` if `alg` is not a hash algorithm.
pub fn pcr_composite_digest(alg: TpmAlgId, values: &[Vec<u8>]) -> Result<Vec<u8>, TpmError> {
    let chunks: Vec<&[u8]> = values.iter().map(Vec::as_slice).collect();
    crypto_digest(alg, &chunks)
}

impl<D: Device> TpmContext<D> {
    fn check_policy_session(&self, session: &ResourceContext) -> Result<(), TpmError> {
        self.store.validate(Some(session), "policy_session")?;
        session.with_session(|s| s.policy().map(|_| ()))
    }

    fn update_policy(
        session: &ResourceContext,
        f: impl FnOnce(&mut PolicyState) -> Result<(), TpmError>,
    ) -> Result<(), TpmError> {
        session.with_session(|s| {
            let policy = s.policy_mut()?;
            f(policy)?;
            trace!(
                target: "tpm2ctx::policy",
                "{}: digest={}",
                s.hash_alg,
                hex::encode(s.policy()?.digest())
            );
            Ok(())
        })
    }

    /// Binds the policy to PCR values. With an empty `pcr_digest` the values
    /// are read from the device and the composite is computed here.
    ///
    /// # Errors
    ///
    /// Returns `InvalidContext` unless `session` is a policy or trial session
    /// owned by this connection, and any device error.
    pub fn policy_pcr(
        &mut self,
        session: &ResourceContext,
        pcr_digest: &[u8],
        pcrs: &[PcrSelection],
    ) -> Result<(), TpmError> {
        self.check_policy_session(session)?;
        let alg = session.session_hash_alg()?;
        let composite = if pcr_digest.is_empty() {
            let values = self.device.pcr_read(pcrs)?;
            pcr_composite_digest(alg, &values)?
        } else {
            pcr_digest.to_vec()
        };
        self.device.policy_pcr(session.handle(), pcr_digest, pcrs)?;
        Self::update_policy(session, |p| p.policy_pcr(pcrs, &composite))?;
        debug!(target: "tpm2ctx::policy", "{}: PolicyPCR", session.handle());
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `PolicyFail` without contacting the device if the current
    /// digest of a policy session is not in `digests`, `InvalidParameter` for
    /// a malformed list, and any device error.
    pub fn policy_or(
        &mut self,
        session: &ResourceContext,
        digests: &[Vec<u8>],
    ) -> Result<(), TpmError> {
        self.check_policy_session(session)?;
        let mut next = session.with_session(|s| Ok(s.policy()?.clone()))?;
        next.policy_or(digests)?;
        self.device.policy_or(session.handle(), digests)?;
        Self::update_policy(session, |p| {
            *p = next;
            Ok(())
        })?;
        debug!(target: "tpm2ctx::policy", "{}: PolicyOR", session.handle());
        Ok(())
    }

    /// Proves knowledge of `entity`'s auth value to the policy session. The
    /// policy session's current `nonceTPM` is sent so that the assertion is
    /// bound to it.
    ///
    /// Returns the timeout and ticket produced by the device.
    ///
    /// # Errors
    ///
    /// Returns `Authorization` when the device rejects the authorization,
    /// `ResponseAuthorization` when its response HMAC does not verify, and
    /// `InvalidContext` for unusable contexts.
    pub fn policy_secret(
        &mut self,
        entity: &AuthorizedResource<'_>,
        session: &ResourceContext,
        cp_hash_a: &[u8],
        policy_ref: &[u8],
        expiration: i32,
        authorization: Authorization<'_>,
    ) -> Result<(Vec<u8>, TkAuth), TpmError> {
        self.store.validate(Some(entity.context), "auth_handle")?;
        self.check_policy_session(session)?;

        let params = PolicySecretParams {
            nonce_tpm: session.nonce_tpm()?,
            cp_hash_a: cp_hash_a.to_vec(),
            policy_ref: policy_ref.to_vec(),
            expiration,
        };
        let names = [entity.context.name(), session.name()];
        let auth = self.authorize(
            authorization,
            entity,
            TpmCc::PolicySecret,
            &names,
            &build_to_vec(&params)?,
        )?;

        let (response, auth_response) = match self.device.policy_secret(
            entity.context.handle(),
            session.handle(),
            &params,
            &auth,
        ) {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    target: "tpm2ctx::policy",
                    "{}: PolicySecret for {}: {err}",
                    session.handle(),
                    entity.context.handle()
                );
                return Err(err);
            }
        };

        self.complete(
            authorization,
            entity,
            TpmCc::PolicySecret,
            &build_to_vec(&response)?,
            &auth_response,
        )?;
        let entity_name = entity.context.name();
        Self::update_policy(session, |p| p.policy_secret(&entity_name, policy_ref))?;
        debug!(
            target: "tpm2ctx::policy",
            "{}: PolicySecret {}",
            session.handle(),
            entity.context.handle()
        );
        Ok((response.timeout, response.ticket))
    }

    /// # Errors
    ///
    /// Returns `InvalidContext` unless `session` is a policy or trial session
    /// owned by this connection, and any device error.
    pub fn policy_auth_value(&mut self, session: &ResourceContext) -> Result<(), TpmError> {
        self.check_policy_session(session)?;
        self.device.policy_auth_value(session.handle())?;
        Self::update_policy(session, |p| {
            p.policy_auth_value();
            Ok(())
        })
    }

    /// # Errors
    ///
    /// Returns `InvalidContext` unless `session` is a policy or trial session
    /// owned by this connection, and any device error.
    pub fn policy_password(&mut self, session: &ResourceContext) -> Result<(), TpmError> {
        self.check_policy_session(session)?;
        self.device.policy_password(session.handle())?;
        Self::update_policy(session, |p| {
            p.policy_password();
            Ok(())
        })
    }

    /// Reads the policy digest from the device.
    ///
    /// # Errors
    ///
    /// Returns `InvalidContext` unless `session` is a policy or trial session
    /// owned by this connection, and any device error.
    pub fn policy_get_digest(&mut self, session: &ResourceContext) -> Result<Vec<u8>, TpmError> {
        self.check_policy_session(session)?;
        let digest = self.device.policy_get_digest(session.handle())?;
        if session.policy_digest()? != digest {
            warn!(
                target: "tpm2ctx::policy",
                "{}: device digest differs from the local one",
                session.handle()
            );
        }
        Ok(digest)
    }
}
