// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy
// Copyright (c) 2024-2025 Jarkko Sakkinen

use crate::{
    constants::TpmAlgId,
    error::TpmError,
    handle::{Handle, Name, NameKind},
    types::PcrSelection,
};
use clap::{
    builder::styling::{AnsiColor, Color, Style, Styles},
    Args, Parser, Subcommand,
};
use std::str::FromStr;

const STYLES: Styles = Styles::styled()
    .header(Style::new().bold())
    .usage(Style::new().bold())
    .literal(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Green))))
    .placeholder(Style::new().fg_color(Some(Color::Ansi(AnsiColor::Yellow))));

pub(crate) const USAGE_TEMPLATE: &str = "
{about-with-newline}
{usage-heading} {usage}

{options-heading}
{options}
";

const HELP_TEMPLATE: &str = "
{about-with-newline}
{usage-heading} {usage}

{subcommands-heading}
{subcommands}

{options-heading}
{options}
";

/// Byte string argument given in hex. The alias keeps clap from treating it
/// as a list of values.
pub type HexBytes = Vec<u8>;

/// TPM 2.0 resource context and session toolkit
#[derive(Parser, Debug, Default)]
#[command(version, about, styles = STYLES, help_template = HELP_TEMPLATE)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Handle(HandleInfo),
    Name(ObjectName),
    Policy(Policy),
    Duplicate(Duplicate),
    Unwrap(Unwrap),
}

/// Classifies a handle and prints its name
#[derive(Args, Debug)]
pub struct HandleInfo {
    #[arg(value_parser = parse_handle, help = "TPM handle (e.g., '0x81000001')")]
    pub handle: Handle,
}

/// Computes the name of a keyed-hash object
#[derive(Args, Debug)]
pub struct ObjectName {
    #[arg(long, default_value = "sha256", help = "Name algorithm")]
    pub name_alg: TpmAlgId,
    #[arg(long, value_parser = parse_hex, help = "Unique field (hex)")]
    pub unique: HexBytes,
    #[arg(long, value_parser = parse_hex, help = "Authorization policy digest (hex)")]
    pub auth_policy: Option<HexBytes>,
}

/// Computes a policy digest offline
#[derive(Args, Debug)]
pub struct Policy {
    #[arg(long, default_value = "sha256", help = "Policy hash algorithm")]
    pub hash: TpmAlgId,
    #[arg(
        required = true,
        help = "Assertions in order (e.g., 'secret:<name>', 'pcr:sha256:0,7:<digest>', 'or:<d1>,<d2>', 'auth-value', 'password')"
    )]
    pub assertions: Vec<PolicyAssertion>,
}

/// Wraps a sealed object for import under a new parent
#[derive(Args, Debug)]
pub struct Duplicate {
    #[arg(long, value_parser = parse_name, help = "Name of the duplicated object (hex)")]
    pub name: Name,
    #[arg(long, value_parser = parse_hex, help = "Sealed data (hex)")]
    pub secret: HexBytes,
    #[arg(long, value_parser = parse_hex, default_value = "", help = "Object auth value (hex)")]
    pub auth: HexBytes,
    #[arg(long, value_parser = parse_hex, default_value = "", help = "Object seed value (hex)")]
    pub seed_value: HexBytes,
    #[command(flatten)]
    pub wrap: WrapArgs,
}

/// Removes the wraps from a duplication blob
#[derive(Args, Debug)]
pub struct Unwrap {
    #[arg(long, value_parser = parse_name, help = "Name of the duplicated object (hex)")]
    pub name: Name,
    #[arg(long, value_parser = parse_hex, help = "Duplication blob (hex)")]
    pub blob: HexBytes,
    #[command(flatten)]
    pub wrap: WrapArgs,
}

#[derive(Args, Debug)]
pub struct WrapArgs {
    #[arg(long, value_parser = parse_hex, help = "Outer wrap seed (hex), omit for no outer wrap")]
    pub seed: Option<HexBytes>,
    #[arg(long, default_value = "sha256", help = "New parent name algorithm")]
    pub parent_name_alg: TpmAlgId,
    #[arg(long, default_value_t = 128, help = "New parent AES key size")]
    pub parent_sym_bits: u16,
    #[arg(long, help = "Inner wrap AES key size, omit for no inner wrap")]
    pub inner_bits: Option<u16>,
    #[arg(long, value_parser = parse_hex, help = "Inner wrap key (hex)")]
    pub inner_key: Option<HexBytes>,
}

/// One step of an offline policy computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyAssertion {
    Secret { name: Name, policy_ref: Vec<u8> },
    Pcr { selection: PcrSelection, digest: Vec<u8> },
    Or(Vec<Vec<u8>>),
    AuthValue,
    Password,
}

impl FromStr for PolicyAssertion {
    type Err = TpmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TpmError::InvalidParameter(format!("invalid policy assertion '{s}'"));
        let mut parts = s.split(':');
        let head = parts.next().ok_or_else(invalid)?;
        let rest: Vec<&str> = parts.collect();

        match (head, rest.as_slice()) {
            ("auth-value", []) => Ok(Self::AuthValue),
            ("password", []) => Ok(Self::Password),
            ("secret", [name]) => Ok(Self::Secret {
                name: parse_name(name)?,
                policy_ref: Vec::new(),
            }),
            ("secret", [name, policy_ref]) => Ok(Self::Secret {
                name: parse_name(name)?,
                policy_ref: parse_hex(policy_ref)?,
            }),
            ("pcr", [alg, indices, digest]) => {
                let pcrs = indices
                    .split(',')
                    .map(|i| i.parse::<u32>().map_err(|_| invalid()))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::Pcr {
                    selection: PcrSelection::new(alg.parse()?, &pcrs),
                    digest: parse_hex(digest)?,
                })
            }
            ("or", [digests]) => Ok(Self::Or(
                digests
                    .split(',')
                    .map(parse_hex)
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            _ => Err(invalid()),
        }
    }
}

/// Parses a hex string, with or without a `0x` prefix.
///
/// # Errors
///
/// Returns `InvalidParameter` for a string that is not valid hex.
pub fn parse_hex(s: &str) -> Result<Vec<u8>, TpmError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).map_err(|e| TpmError::InvalidParameter(format!("'{s}': {e}")))
}

/// # Errors
///
/// Returns `InvalidParameter` for a string that is not a hex `u32`.
pub fn parse_handle(s: &str) -> Result<Handle, TpmError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u32::from_str_radix(digits, 16)
        .map(Handle)
        .map_err(|e| TpmError::InvalidParameter(format!("'{s}': {e}")))
}

/// # Errors
///
/// Returns `InvalidParameter` for invalid hex and `InvalidName` for bytes
/// that are neither handle-form nor digest-form.
pub fn parse_name(s: &str) -> Result<Name, TpmError> {
    let name = Name::from_bytes(parse_hex(s)?);
    match name.kind() {
        NameKind::Invalid => Err(TpmError::InvalidName(format!("'{s}'"))),
        _ => Ok(name),
    }
}
