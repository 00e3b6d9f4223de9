// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy
// Copyright (c) 2024-2025 Jarkko Sakkinen

pub mod duplicate;
pub mod handle;
pub mod name;
pub mod policy;
pub mod unwrap;

use crate::{
    cli::{Commands, WrapArgs},
    duplication::{InnerWrap, OuterWrap},
    error::TpmError,
    types::SymDefObject,
    Command,
};
use std::io::Write;

impl Command for Commands {
    fn run<W: Write>(&self, writer: &mut W) -> Result<(), TpmError> {
        match self {
            Self::Handle(args) => args.run(writer),
            Self::Name(args) => args.run(writer),
            Self::Policy(args) => args.run(writer),
            Self::Duplicate(args) => args.run(writer),
            Self::Unwrap(args) => args.run(writer),
        }
    }
}

impl WrapArgs {
    fn outer(&self) -> Option<OuterWrap<'_>> {
        self.seed.as_deref().map(|seed| OuterWrap {
            name_alg: self.parent_name_alg,
            symmetric: SymDefObject::aes_cfb(self.parent_sym_bits),
            seed,
        })
    }

    /// An inner wrap is applied when either its key size or its key is given.
    /// The key size follows the key when only the key is given.
    fn inner(&self) -> Result<Option<InnerWrap<'_>>, TpmError> {
        let key = self.inner_key.as_deref();
        let bits = match (self.inner_bits, key) {
            (Some(bits), _) => bits,
            (None, Some(key)) => u16::try_from(key.len() * 8).map_err(|_| {
                TpmError::InvalidParameter(format!("{} byte inner key", key.len()))
            })?,
            (None, None) => return Ok(None),
        };
        Ok(Some(InnerWrap {
            symmetric: SymDefObject::aes_cfb(bits),
            key,
        }))
    }
}
