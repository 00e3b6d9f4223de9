// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy
// Copyright (c) 2024-2025 Jarkko Sakkinen

use crate::{
    device::Device,
    error::TpmError,
    handle::{Handle, HandleType, Name},
    resource::{ContextKind, ContextStore, ResourceContext},
};
use log::{debug, warn};

/// One connection to a device together with the contexts registered on it.
///
/// Every method that talks to the device takes `&mut self`, so a connection
/// has at most one command in flight.
pub struct TpmContext<D: Device> {
    pub(crate) device: D,
    pub(crate) store: ContextStore,
}

impl<D: Device> TpmContext<D> {
    #[must_use]
    pub fn new(device: D) -> Self {
        Self {
            device,
            store: ContextStore::new(),
        }
    }

    pub fn device(&mut self) -> &mut D {
        &mut self.device
    }

    #[must_use]
    pub fn store(&self) -> &ContextStore {
        &self.store
    }

    /// Returns the context for `handle`, reading its public area from the
    /// device on first use.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedHandle` for PCR, session and unclassified handles,
    /// `Integrity` when the device reports a name that does not match the
    /// public area, and any device error from the read.
    pub fn wrap_handle(&mut self, handle: Handle) -> Result<ResourceContext, TpmError> {
        if let Some(context) = self.store.get(handle) {
            return Ok(context.clone());
        }

        let context = match handle.handle_type() {
            Some(HandleType::Permanent) => ResourceContext::new_permanent(handle)?,
            Some(HandleType::NvIndex) => {
                let (public, name) = self.device.nv_read_public(handle)?;
                if public.nv_index != handle {
                    return Err(TpmError::UnexpectedResponse(format!(
                        "NV_ReadPublic for {handle} returned index {}",
                        public.nv_index
                    )));
                }
                let context = ResourceContext::new_nv_index(public)?;
                check_name(&context, &name)?;
                context
            }
            Some(HandleType::Transient | HandleType::Persistent) => {
                let (public, name) = self.device.read_public(handle)?;
                let context = ResourceContext::new_object(handle, public)?;
                check_name(&context, &name)?;
                context
            }
            _ => return Err(TpmError::UnsupportedHandle(handle)),
        };

        self.store.add(&context)?;
        debug!(target: "tpm2ctx::resource", "wrap {handle}: name={}", context.name());
        Ok(context)
    }

    /// # Errors
    ///
    /// See [`ContextStore::add`].
    pub fn add(&mut self, context: &ResourceContext) -> Result<(), TpmError> {
        self.store.add(context)
    }

    /// # Errors
    ///
    /// See [`ContextStore::evict`].
    pub fn evict(&mut self, context: &ResourceContext) -> Result<(), TpmError> {
        self.store.evict(context)
    }

    /// # Errors
    ///
    /// See [`ContextStore::validate`].
    pub fn validate(&self, context: Option<&ResourceContext>, param: &str) -> Result<(), TpmError> {
        self.store.validate(context, param)
    }

    /// Flushes a transient object or a session from the device and evicts it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidContext` if the context is not usable here,
    /// `InvalidParameter` for contexts that cannot be flushed, and any device
    /// error.
    pub fn flush_context(&mut self, context: &ResourceContext) -> Result<(), TpmError> {
        self.store.validate(Some(context), "flush_handle")?;
        let handle = context.handle();
        let flushable = match context.kind() {
            ContextKind::Session => true,
            ContextKind::Object => handle.handle_type() == Some(HandleType::Transient),
            ContextKind::Permanent | ContextKind::NvIndex => false,
        };
        if !flushable {
            return Err(TpmError::InvalidParameter(format!(
                "{handle} cannot be flushed"
            )));
        }
        self.device.flush_context(handle)?;
        self.store.evict(context)
    }

    /// Reads random bytes from the device.
    ///
    /// # Errors
    ///
    /// Returns any device error.
    pub fn get_random(&mut self, bytes_requested: u16) -> Result<Vec<u8>, TpmError> {
        self.device.get_random(bytes_requested)
    }

    /// Mixes `in_data` into the device RNG state.
    ///
    /// # Errors
    ///
    /// Returns any device error.
    pub fn stir_random(&mut self, in_data: &[u8]) -> Result<(), TpmError> {
        self.device.stir_random(in_data)
    }
}

fn check_name(context: &ResourceContext, reported: &Name) -> Result<(), TpmError> {
    let computed = context.name();
    if &computed != reported {
        warn!(
            target: "tpm2ctx::resource",
            "{}: device name {reported} does not match public area name {computed}",
            context.handle()
        );
        return Err(TpmError::Integrity(format!(
            "name of {} does not match its public area",
            context.handle()
        )));
    }
    Ok(())
}
