// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy
// Copyright (c) 2024-2025 Jarkko Sakkinen

use crate::{
    cli::Duplicate, duplication::create_duplication_object, error::TpmError, types::Sensitive,
    Command,
};
use std::io::Write;

impl Command for Duplicate {
    fn run<W: Write>(&self, writer: &mut W) -> Result<(), TpmError> {
        let sensitive = Sensitive::sealed(&self.auth, &self.seed_value, &self.secret);
        let outer = self.wrap.outer();
        let inner = self.wrap.inner()?;

        let (inner_key, blob) =
            create_duplication_object(&sensitive, &self.name, outer.as_ref(), inner.as_ref())?;

        if let Some(key) = inner_key {
            writeln!(writer, "inner-key: {}", hex::encode(&*key))?;
        }
        writeln!(writer, "blob: {}", hex::encode(blob))?;
        Ok(())
    }
}
