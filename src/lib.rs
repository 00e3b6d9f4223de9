// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy
// Copyright (c) 2024-2025 Jarkko Sakkinen

#![deny(clippy::all)]
#![deny(clippy::pedantic)]

pub mod cli;
pub mod command;
pub mod constants;
pub mod context;
pub mod crypto;
pub mod device;
pub mod duplication;
pub mod error;
pub mod handle;
pub mod marshal;
pub mod mocktpm;
pub mod policy;
pub mod resource;
pub mod session;
pub mod types;

pub use constants::{SessionType, TpmAlgId, TpmCc, TpmRc};
pub use context::TpmContext;
pub use device::Device;
pub use error::{ContextFault, TpmError, TransportPhase};
pub use handle::{Handle, HandleType, Name, NameKind};
pub use resource::{ContextStore, ResourceContext};
pub use session::{Authorization, AuthorizedResource, SessionParams, SessionSalt};

use crate::cli::Cli;
use clap::{CommandFactory, Parser};
use std::io::{self, Write};

/// A trait for executing subcommands.
pub trait Command {
    /// Runs a command.
    ///
    /// # Errors
    ///
    /// Returns a `TpmError` if the execution fails
    fn run<W: Write>(&self, writer: &mut W) -> Result<(), TpmError>;
}

/// Parses command-line arguments and executes the corresponding command.
///
/// # Errors
///
/// Returns a `TpmError` if executing the command fails.
pub fn execute_cli() -> Result<(), TpmError> {
    let cli = Cli::parse();

    if let Some(command) = &cli.command {
        command.run(&mut io::stdout())
    } else {
        Cli::command()
            .help_template(cli::USAGE_TEMPLATE)
            .print_help()?;
        Ok(())
    }
}
