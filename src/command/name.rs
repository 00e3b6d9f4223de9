// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy
// Copyright (c) 2024-2025 Jarkko Sakkinen

use crate::{
    cli::ObjectName,
    error::TpmError,
    types::{ObjectAttributes, Public},
    Command,
};
use std::io::Write;

impl Command for ObjectName {
    fn run<W: Write>(&self, writer: &mut W) -> Result<(), TpmError> {
        let mut public = Public::keyed_hash(
            self.name_alg,
            ObjectAttributes::USER_WITH_AUTH,
            &self.unique,
        );
        if let Some(policy) = &self.auth_policy {
            public = public.with_auth_policy(policy);
        }
        writeln!(writer, "{}", public.name()?)?;
        Ok(())
    }
}
