// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy
// Copyright (c) 2024-2025 Jarkko Sakkinen

use clap::Parser;
use rstest::rstest;
use std::str::FromStr;
use tpm2ctx::{
    cli::{Cli, PolicyAssertion},
    Command, Handle, TpmAlgId,
};

const EK_POLICY: &str = "837197674484b3f81a90cc8d46a5d724fd52d76e06520b64f2a1da1b331469aa";

fn run(args: &[&str]) -> Result<String, String> {
    let cli = Cli::try_parse_from(args).map_err(|e| e.to_string())?;
    let command = cli.command.ok_or("no command")?;
    let mut out = Vec::new();
    command.run(&mut out).map_err(|e| e.to_string())?;
    Ok(String::from_utf8(out).unwrap())
}

fn field<'a>(output: &'a str, key: &str) -> &'a str {
    output
        .lines()
        .find_map(|line| line.strip_prefix(key)?.strip_prefix(": "))
        .unwrap_or_else(|| panic!("no '{key}' in {output}"))
}

#[rstest]
#[case("auth-value", PolicyAssertion::AuthValue)]
#[case("password", PolicyAssertion::Password)]
#[case(
    "secret:4000000b",
    PolicyAssertion::Secret { name: Handle::ENDORSEMENT.name(), policy_ref: vec![] }
)]
#[case(
    "secret:40000001:beef",
    PolicyAssertion::Secret { name: Handle::OWNER.name(), policy_ref: vec![0xbe, 0xef] }
)]
#[case("or:00,11", PolicyAssertion::Or(vec![vec![0x00], vec![0x11]]))]
fn test_policy_assertion_parser(#[case] input: &str, #[case] expected: PolicyAssertion) {
    assert_eq!(PolicyAssertion::from_str(input).unwrap(), expected);
}

#[rstest]
#[case("pcr:sha256:0,7:00")]
fn test_policy_assertion_pcr(#[case] input: &str) {
    let PolicyAssertion::Pcr { selection, digest } = PolicyAssertion::from_str(input).unwrap()
    else {
        panic!("not a pcr assertion");
    };
    assert_eq!(selection.hash, TpmAlgId::Sha256);
    assert_eq!(selection.pcrs, vec![0, 7]);
    assert_eq!(digest, vec![0x00]);
}

#[rstest]
#[case("")]
#[case("secret")]
#[case("secret:zz")]
#[case("secret:0102")]
#[case("pcr:sha256:x:00")]
#[case("pcr:md5:0:00")]
#[case("auth-value:1")]
#[case("signed:40000001")]
fn test_policy_assertion_parser_invalid(#[case] input: &str) {
    assert!(
        PolicyAssertion::from_str(input).is_err(),
        "parsing should fail for: {input}"
    );
}

#[rstest]
fn test_handle_command() {
    let output = run(&["tpm2ctx", "handle", "0x81000001"]).unwrap();
    assert_eq!(field(&output, "type"), "persistent");
    assert_eq!(field(&output, "name"), "81000001");

    assert!(run(&["tpm2ctx", "handle", "0x04000000"]).is_err());
}

#[rstest]
fn test_policy_command() {
    let output = run(&["tpm2ctx", "policy", "secret:4000000b"]).unwrap();
    assert_eq!(output.trim(), EK_POLICY);

    let output = run(&["tpm2ctx", "policy", "secret:4000000b", "auth-value"]).unwrap();
    assert_eq!(output.trim(), EK_POLICY);
}

#[rstest]
fn test_duplicate_then_unwrap() {
    let name = format!("000b{}", "11".repeat(32));
    let seed = "22".repeat(32);
    let output = run(&[
        "tpm2ctx",
        "duplicate",
        "--name",
        &name,
        "--secret",
        "deadbeef",
        "--auth",
        "aabb",
        "--seed",
        &seed,
        "--inner-bits",
        "128",
    ])
    .unwrap();
    let inner_key = field(&output, "inner-key").to_string();
    let blob = field(&output, "blob").to_string();

    let output = run(&[
        "tpm2ctx",
        "unwrap",
        "--name",
        &name,
        "--blob",
        &blob,
        "--seed",
        &seed,
        "--inner-key",
        &inner_key,
    ])
    .unwrap();
    assert_eq!(field(&output, "type"), "keyedhash");
    assert_eq!(field(&output, "auth"), "aabb");
    assert_eq!(field(&output, "data"), "deadbeef");
}
