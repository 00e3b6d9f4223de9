// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy
// Copyright (c) 2024-2025 Jarkko Sakkinen

use crate::{
    cli::{Policy, PolicyAssertion},
    error::TpmError,
    policy::PolicyState,
    Command,
};
use log::debug;
use std::io::Write;

impl Command for Policy {
    fn run<W: Write>(&self, writer: &mut W) -> Result<(), TpmError> {
        let mut state = PolicyState::trial(self.hash)?;
        for assertion in &self.assertions {
            match assertion {
                PolicyAssertion::Secret { name, policy_ref } => {
                    state.policy_secret(name, policy_ref)?;
                }
                PolicyAssertion::Pcr { selection, digest } => {
                    state.policy_pcr(std::slice::from_ref(selection), digest)?;
                }
                PolicyAssertion::Or(digests) => state.policy_or(digests)?,
                PolicyAssertion::AuthValue => state.policy_auth_value(),
                PolicyAssertion::Password => state.policy_password(),
            }
            debug!("{assertion:?}: {}", hex::encode(state.digest()));
        }
        writeln!(writer, "{}", hex::encode(state.digest()))?;
        Ok(())
    }
}
