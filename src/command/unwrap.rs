// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy
// Copyright (c) 2024-2025 Jarkko Sakkinen

use crate::{
    cli::Unwrap, duplication::unwrap_duplication_object, error::TpmError, Command,
};
use std::io::Write;

impl Command for Unwrap {
    fn run<W: Write>(&self, writer: &mut W) -> Result<(), TpmError> {
        let outer = self.wrap.outer();
        let inner = self.wrap.inner()?;
        let sensitive =
            unwrap_duplication_object(&self.blob, &self.name, outer.as_ref(), inner.as_ref())?;

        writeln!(writer, "type: {}", sensitive.sensitive_type)?;
        writeln!(writer, "auth: {}", hex::encode(&*sensitive.auth_value))?;
        writeln!(writer, "seed: {}", hex::encode(&*sensitive.seed_value))?;
        writeln!(writer, "data: {}", hex::encode(&*sensitive.sensitive))?;
        Ok(())
    }
}
