// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy
// Copyright (c) 2024-2025 Jarkko Sakkinen

use crate::{cli::HandleInfo, error::TpmError, Command};
use std::io::Write;

impl Command for HandleInfo {
    fn run<W: Write>(&self, writer: &mut W) -> Result<(), TpmError> {
        let handle = self.handle;
        let Some(handle_type) = handle.handle_type() else {
            return Err(TpmError::UnsupportedHandle(handle));
        };
        writeln!(writer, "handle: {handle}")?;
        writeln!(writer, "type: {handle_type}")?;
        writeln!(writer, "name: {}", handle.name())?;
        Ok(())
    }
}
