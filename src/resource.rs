// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy
// Copyright (c) 2024-2025 Jarkko Sakkinen

//! Resource contexts and the per-connection store that owns them.
//!
//! A [`ResourceContext`] is a cheap handle to shared state. It can be cloned
//! freely, but at most one [`ContextStore`] owns it at a time, and only the
//! owning store accepts it for authorization or as a command parameter.

use crate::{
    constants::{SessionType, TpmAlgId},
    error::{ContextFault, TpmError},
    handle::{Handle, HandleType, Name},
    policy::PolicyAuthMethod,
    session::SessionState,
    types::{NvPublic, Public, SessionAttributes, SymDefObject},
};
use log::{debug, trace};
use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

const NO_OWNER: u64 = 0;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of one connection's context store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn mint() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    Permanent,
    Object,
    NvIndex,
    Session,
}

enum ContextVariant {
    Permanent,
    Object { public: Box<Public>, name: Name },
    NvIndex { public: NvPublic, name: Name },
    Session(Mutex<Option<SessionState>>),
}

struct ContextInner {
    handle: Handle,
    owner: AtomicU64,
    variant: ContextVariant,
}

/// A TPM entity known to the client: a permanent hierarchy, a loaded or
/// persistent object, an NV index or an authorization session.
#[derive(Clone)]
pub struct ResourceContext(Arc<ContextInner>);

impl ResourceContext {
    fn from_variant(handle: Handle, variant: ContextVariant) -> Self {
        Self(Arc::new(ContextInner {
            handle,
            owner: AtomicU64::new(NO_OWNER),
            variant,
        }))
    }

    /// # Errors
    ///
    /// Returns `UnsupportedHandle` unless `handle` is in the permanent range.
    pub fn new_permanent(handle: Handle) -> Result<Self, TpmError> {
        if handle.handle_type() != Some(HandleType::Permanent) {
            return Err(TpmError::UnsupportedHandle(handle));
        }
        Ok(Self::from_variant(handle, ContextVariant::Permanent))
    }

    /// Creates an object context, computing its name from `public`.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedHandle` unless `handle` is transient or persistent,
    /// and `InvalidAlgorithm` if the name algorithm is not a hash.
    pub fn new_object(handle: Handle, public: Public) -> Result<Self, TpmError> {
        if !matches!(
            handle.handle_type(),
            Some(HandleType::Transient | HandleType::Persistent)
        ) {
            return Err(TpmError::UnsupportedHandle(handle));
        }
        let name = public.name()?;
        Ok(Self::from_variant(
            handle,
            ContextVariant::Object {
                public: Box::new(public),
                name,
            },
        ))
    }

    /// Creates an NV index context for `public.nv_index`.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedHandle` unless the index handle is in the NV range,
    /// and `InvalidAlgorithm` if the name algorithm is not a hash.
    pub fn new_nv_index(public: NvPublic) -> Result<Self, TpmError> {
        let handle = public.nv_index;
        if handle.handle_type() != Some(HandleType::NvIndex) {
            return Err(TpmError::UnsupportedHandle(handle));
        }
        let name = public.name()?;
        Ok(Self::from_variant(
            handle,
            ContextVariant::NvIndex { public, name },
        ))
    }

    pub(crate) fn new_session(handle: Handle, state: SessionState) -> Self {
        Self::from_variant(handle, ContextVariant::Session(Mutex::new(Some(state))))
    }

    #[must_use]
    pub fn handle(&self) -> Handle {
        self.0.handle
    }

    #[must_use]
    pub fn name(&self) -> Name {
        match &self.0.variant {
            ContextVariant::Object { name, .. } | ContextVariant::NvIndex { name, .. } => {
                name.clone()
            }
            ContextVariant::Permanent | ContextVariant::Session(_) => self.0.handle.name(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ContextKind {
        match &self.0.variant {
            ContextVariant::Permanent => ContextKind::Permanent,
            ContextVariant::Object { .. } => ContextKind::Object,
            ContextVariant::NvIndex { .. } => ContextKind::NvIndex,
            ContextVariant::Session(_) => ContextKind::Session,
        }
    }

    #[must_use]
    pub fn public(&self) -> Option<&Public> {
        match &self.0.variant {
            ContextVariant::Object { public, .. } => Some(public.as_ref()),
            _ => None,
        }
    }

    #[must_use]
    pub fn nv_public(&self) -> Option<&NvPublic> {
        match &self.0.variant {
            ContextVariant::NvIndex { public, .. } => Some(public),
            _ => None,
        }
    }

    /// True if both values refer to the same context instance.
    #[must_use]
    pub fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// True while some connection has this context registered.
    #[must_use]
    pub fn is_owned(&self) -> bool {
        self.owner().is_some()
    }

    fn owner(&self) -> Option<ConnectionId> {
        match self.0.owner.load(Ordering::Acquire) {
            NO_OWNER => None,
            id => Some(ConnectionId(id)),
        }
    }

    fn claim(&self, id: ConnectionId) -> Result<(), u64> {
        self.0
            .owner
            .compare_exchange(NO_OWNER, id.0, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
    }

    fn release(&self, id: ConnectionId) -> bool {
        self.0
            .owner
            .compare_exchange(id.0, NO_OWNER, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn session_slot(&self) -> Result<MutexGuard<'_, Option<SessionState>>, TpmError> {
        match &self.0.variant {
            ContextVariant::Session(slot) => {
                Ok(slot.lock().unwrap_or_else(PoisonError::into_inner))
            }
            _ => Err(TpmError::context("session", ContextFault::NotASession)),
        }
    }

    /// Runs `f` against the live session state.
    pub(crate) fn with_session<R>(
        &self,
        f: impl FnOnce(&mut SessionState) -> Result<R, TpmError>,
    ) -> Result<R, TpmError> {
        let mut slot = self.session_slot()?;
        let state = slot.as_mut().ok_or(TpmError::SessionUnavailable)?;
        f(state)
    }

    fn scrub(&self) {
        if let ContextVariant::Session(slot) = &self.0.variant {
            let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
            *slot = None;
        }
    }

    /// # Errors
    ///
    /// Returns `InvalidContext` if this is not a session and
    /// `SessionUnavailable` once it has been evicted.
    pub fn session_type(&self) -> Result<SessionType, TpmError> {
        self.with_session(|s| Ok(s.session_type))
    }

    /// # Errors
    ///
    /// Returns `InvalidContext` if this is not a session and
    /// `SessionUnavailable` once it has been evicted.
    pub fn session_hash_alg(&self) -> Result<TpmAlgId, TpmError> {
        self.with_session(|s| Ok(s.hash_alg))
    }

    /// # Errors
    ///
    /// Returns `InvalidContext` if this is not a session and
    /// `SessionUnavailable` once it has been evicted.
    pub fn session_symmetric(&self) -> Result<SymDefObject, TpmError> {
        self.with_session(|s| Ok(s.symmetric))
    }

    /// # Errors
    ///
    /// Returns `InvalidContext` if this is not a session and
    /// `SessionUnavailable` once it has been evicted.
    pub fn session_attributes(&self) -> Result<SessionAttributes, TpmError> {
        self.with_session(|s| Ok(s.attributes))
    }

    /// Sets the attributes used by the next authorization in this session.
    ///
    /// # Errors
    ///
    /// Returns `InvalidContext` if this is not a session and
    /// `SessionUnavailable` once it has been evicted.
    pub fn set_session_attributes(&self, attributes: SessionAttributes) -> Result<(), TpmError> {
        self.with_session(|s| {
            s.attributes = attributes;
            Ok(())
        })
    }

    /// # Errors
    ///
    /// Returns `InvalidContext` if this is not a session and
    /// `SessionUnavailable` once it has been evicted.
    pub fn nonce_tpm(&self) -> Result<Vec<u8>, TpmError> {
        self.with_session(|s| Ok(s.nonce_tpm.clone()))
    }

    /// # Errors
    ///
    /// Returns `InvalidContext` if this is not a session and
    /// `SessionUnavailable` once it has been evicted.
    pub fn nonce_caller(&self) -> Result<Vec<u8>, TpmError> {
        self.with_session(|s| Ok(s.nonce_caller.clone()))
    }

    /// The client-side copy of the policy digest.
    ///
    /// # Errors
    ///
    /// Returns `InvalidContext` unless this is a policy or trial session, and
    /// `SessionUnavailable` once it has been evicted.
    pub fn policy_digest(&self) -> Result<Vec<u8>, TpmError> {
        self.with_session(|s| Ok(s.policy()?.digest().to_vec()))
    }

    /// # Errors
    ///
    /// Returns `InvalidContext` unless this is a policy or trial session, and
    /// `SessionUnavailable` once it has been evicted.
    pub fn policy_auth_method(&self) -> Result<PolicyAuthMethod, TpmError> {
        self.with_session(|s| Ok(s.policy()?.auth_method()))
    }
}

impl fmt::Debug for ResourceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceContext")
            .field("handle", &self.0.handle)
            .field("kind", &self.kind())
            .field("owner", &self.owner())
            .finish_non_exhaustive()
    }
}

/// Map from handle to the contexts registered with one connection.
pub struct ContextStore {
    id: ConnectionId,
    resources: HashMap<Handle, ResourceContext>,
}

impl ContextStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: ConnectionId::mint(),
            resources: HashMap::new(),
        }
    }

    #[must_use]
    pub fn connection(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub fn get(&self, handle: Handle) -> Option<&ResourceContext> {
        self.resources.get(&handle)
    }

    #[must_use]
    pub fn contains(&self, context: &ResourceContext) -> bool {
        context.owner() == Some(self.id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Registers `context` with this connection.
    ///
    /// # Errors
    ///
    /// Returns `InvalidContext` if the context already has an owner, and
    /// `HandleInUse` if another context holds the same handle.
    pub fn add(&mut self, context: &ResourceContext) -> Result<(), TpmError> {
        let handle = context.handle();
        if context.is_owned() {
            return Err(TpmError::context("context", ContextFault::AlreadyOwned));
        }
        if self.resources.contains_key(&handle) {
            return Err(TpmError::HandleInUse(handle));
        }
        context
            .claim(self.id)
            .map_err(|_| TpmError::context("context", ContextFault::AlreadyOwned))?;
        self.resources.insert(handle, context.clone());
        debug!(target: "tpm2ctx::resource", "add {handle} ({:?})", context.kind());
        Ok(())
    }

    /// Removes `context` from this connection and scrubs any session secrets.
    /// Does nothing for a context that has no owner.
    ///
    /// # Errors
    ///
    /// Returns `InvalidContext` if another connection owns the context.
    pub fn evict(&mut self, context: &ResourceContext) -> Result<(), TpmError> {
        match context.owner() {
            None => return Ok(()),
            Some(id) if id != self.id => {
                return Err(TpmError::context("context", ContextFault::Foreign));
            }
            Some(_) => {}
        }
        let handle = context.handle();
        if self
            .resources
            .get(&handle)
            .is_some_and(|registered| registered.same(context))
        {
            self.resources.remove(&handle);
        }
        context.release(self.id);
        context.scrub();
        debug!(target: "tpm2ctx::resource", "evict {handle}");
        Ok(())
    }

    /// Checks that `context` may be used as `param` on this connection.
    ///
    /// # Errors
    ///
    /// Returns `InvalidContext` for a missing context, one that has been
    /// evicted, or one that belongs to another connection.
    pub fn validate(&self, context: Option<&ResourceContext>, param: &str) -> Result<(), TpmError> {
        let context = context.ok_or_else(|| TpmError::context(param, ContextFault::Nil))?;
        match context.owner() {
            None => Err(TpmError::context(param, ContextFault::Closed)),
            Some(id) if id != self.id => Err(TpmError::context(param, ContextFault::Foreign)),
            Some(_) => {
                trace!(target: "tpm2ctx::resource", "{param}: {}", context.handle());
                Ok(())
            }
        }
    }
}

impl Default for ContextStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ContextStore {
    fn drop(&mut self) {
        for (_, context) in self.resources.drain() {
            context.release(self.id);
            context.scrub();
        }
    }
}
