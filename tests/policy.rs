// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy
// Copyright (c) 2024-2025 Jarkko Sakkinen

use rstest::{fixture, rstest};
use tpm2ctx::{
    constants::TpmSt,
    mocktpm::MockTpm,
    policy::{pcr_composite_digest, PolicyAuthMethod, PolicyState},
    types::{ObjectAttributes, PcrSelection, Public},
    Authorization, AuthorizedResource, ContextFault, Device, Handle, ResourceContext, SessionParams,
    SessionType, TpmAlgId, TpmContext, TpmError, TpmRc,
};

const OWNER_AUTH: &[u8] = b"owner";
const OBJECT_AUTH: &[u8] = b"object";
const EK_POLICY: &str = "837197674484b3f81a90cc8d46a5d724fd52d76e06520b64f2a1da1b331469aa";

#[fixture]
fn ctx() -> TpmContext<MockTpm> {
    let mut tpm = MockTpm::new();
    tpm.set_hierarchy_auth(Handle::OWNER, OWNER_AUTH);
    tpm.pcr_extend(TpmAlgId::Sha256, 7, b"secure boot").unwrap();
    TpmContext::new(tpm)
}

fn start(ctx: &mut TpmContext<MockTpm>, session_type: SessionType) -> ResourceContext {
    ctx.start_auth_session(&SessionParams::new(session_type, TpmAlgId::Sha256))
        .unwrap()
}

fn assert_mirrors_device(ctx: &mut TpmContext<MockTpm>, session: &ResourceContext) {
    let device = ctx.policy_get_digest(session).unwrap();
    assert_eq!(session.policy_digest().unwrap(), device);
}

fn owner_secret(ctx: &mut TpmContext<MockTpm>, session: &ResourceContext) {
    let owner = ctx.wrap_handle(Handle::OWNER).unwrap();
    let entity = AuthorizedResource::new(&owner, OWNER_AUTH);
    ctx.policy_secret(&entity, session, &[], &[], 0, Authorization::Password)
        .unwrap();
}

#[rstest]
fn test_policy_secret_known_answer() {
    let mut state = PolicyState::new(TpmAlgId::Sha256).unwrap();
    state.policy_secret(&Handle::ENDORSEMENT.name(), &[]).unwrap();
    assert_eq!(hex::encode(state.digest()), EK_POLICY);
}

#[rstest]
fn test_policy_session_starts_at_zero(mut ctx: TpmContext<MockTpm>) {
    let session = start(&mut ctx, SessionType::Policy);
    assert_eq!(session.policy_digest().unwrap(), vec![0; 32]);
    assert_eq!(
        session.policy_auth_method().unwrap(),
        PolicyAuthMethod::Unset
    );
    assert_mirrors_device(&mut ctx, &session);
}

#[rstest]
#[case(SessionType::Policy)]
#[case(SessionType::Trial)]
fn test_policy_secret_mirrors_device(
    mut ctx: TpmContext<MockTpm>,
    #[case] session_type: SessionType,
) {
    let session = start(&mut ctx, session_type);
    let owner = ctx.wrap_handle(Handle::OWNER).unwrap();
    let entity = AuthorizedResource::new(&owner, OWNER_AUTH);
    ctx.policy_secret(&entity, &session, &[], b"ref", 0, Authorization::Password)
        .unwrap();
    assert_mirrors_device(&mut ctx, &session);

    let mut offline = PolicyState::new(TpmAlgId::Sha256).unwrap();
    offline.policy_secret(&owner.name(), b"ref").unwrap();
    assert_eq!(session.policy_digest().unwrap(), offline.digest());
}

#[rstest]
fn test_policy_secret_ticket(mut ctx: TpmContext<MockTpm>) {
    let session = start(&mut ctx, SessionType::Policy);
    let owner = ctx.wrap_handle(Handle::OWNER).unwrap();
    let entity = AuthorizedResource::new(&owner, OWNER_AUTH);

    let (timeout, ticket) = ctx
        .policy_secret(&entity, &session, &[], &[], 0, Authorization::Password)
        .unwrap();
    assert!(timeout.is_empty());
    assert!(ticket.digest.is_empty());

    let (timeout, ticket) = ctx
        .policy_secret(&entity, &session, &[], &[], -60, Authorization::Password)
        .unwrap();
    assert!(!timeout.is_empty());
    assert_eq!(ticket.tag, TpmSt::AuthSecret);
    assert_eq!(ticket.digest.len(), 32);
}

#[rstest]
fn test_policy_secret_bad_auth_leaves_digest(mut ctx: TpmContext<MockTpm>) {
    let session = start(&mut ctx, SessionType::Policy);
    let owner = ctx.wrap_handle(Handle::OWNER).unwrap();
    let entity = AuthorizedResource::new(&owner, b"wrong");

    let err = ctx
        .policy_secret(&entity, &session, &[], &[], 0, Authorization::Password)
        .unwrap_err();
    assert!(matches!(err, TpmError::Authorization(_)));
    assert_eq!(session.policy_digest().unwrap(), vec![0; 32]);
    assert_mirrors_device(&mut ctx, &session);
}

#[rstest]
#[case(vec![])]
#[case(vec![7])]
#[case(vec![0, 7, 16])]
fn test_policy_pcr_mirrors_device(mut ctx: TpmContext<MockTpm>, #[case] pcrs: Vec<u32>) {
    let selection = [PcrSelection::new(TpmAlgId::Sha256, &pcrs)];
    let session = start(&mut ctx, SessionType::Policy);
    ctx.policy_pcr(&session, &[], &selection).unwrap();
    assert_mirrors_device(&mut ctx, &session);
}

#[rstest]
fn test_policy_pcr_with_explicit_digest(mut ctx: TpmContext<MockTpm>) {
    let selection = [PcrSelection::new(TpmAlgId::Sha256, &[7])];
    let values = ctx.device().pcr_read(&selection).unwrap();
    let composite = pcr_composite_digest(TpmAlgId::Sha256, &values).unwrap();

    let session = start(&mut ctx, SessionType::Policy);
    ctx.policy_pcr(&session, &composite, &selection).unwrap();
    assert_mirrors_device(&mut ctx, &session);

    let mut offline = PolicyState::new(TpmAlgId::Sha256).unwrap();
    offline.policy_pcr(&selection, &composite).unwrap();
    assert_eq!(session.policy_digest().unwrap(), offline.digest());
}

#[rstest]
fn test_policy_pcr_mismatch(mut ctx: TpmContext<MockTpm>) {
    let selection = [PcrSelection::new(TpmAlgId::Sha256, &[7])];
    let stale = vec![0xAB; 32];

    let session = start(&mut ctx, SessionType::Policy);
    let err = ctx.policy_pcr(&session, &stale, &selection).unwrap_err();
    assert_eq!(err.rc().map(TpmRc::base), Some(TpmRc::VALUE));
    assert_eq!(session.policy_digest().unwrap(), vec![0; 32]);

    // A trial session takes the digest as given.
    let trial = start(&mut ctx, SessionType::Trial);
    ctx.policy_pcr(&trial, &stale, &selection).unwrap();
    assert_mirrors_device(&mut ctx, &trial);
}

#[rstest]
fn test_policy_or_mirrors_device(mut ctx: TpmContext<MockTpm>) {
    let session = start(&mut ctx, SessionType::Policy);
    owner_secret(&mut ctx, &session);
    let current = session.policy_digest().unwrap();

    ctx.policy_or(&session, &[vec![0x11; 32], current]).unwrap();
    assert_mirrors_device(&mut ctx, &session);
}

#[rstest]
fn test_policy_or_non_member_does_not_mutate(mut ctx: TpmContext<MockTpm>) {
    let session = start(&mut ctx, SessionType::Policy);
    owner_secret(&mut ctx, &session);
    let before = session.policy_digest().unwrap();
    let commands = ctx.device().command_count();

    let err = ctx
        .policy_or(&session, &[vec![0x11; 32], vec![0x22; 32]])
        .unwrap_err();
    assert!(matches!(err, TpmError::PolicyFail(_)), "{err:?}");
    assert_eq!(session.policy_digest().unwrap(), before);
    assert_eq!(ctx.device().command_count(), commands);
    assert_mirrors_device(&mut ctx, &session);
}

#[rstest]
fn test_trial_policy_or_skips_membership(mut ctx: TpmContext<MockTpm>) {
    let branches = [vec![0x11; 32], vec![0x22; 32]];
    let trial = start(&mut ctx, SessionType::Trial);
    owner_secret(&mut ctx, &trial);

    ctx.policy_or(&trial, &branches).unwrap();
    assert_mirrors_device(&mut ctx, &trial);

    let mut offline = PolicyState::trial(TpmAlgId::Sha256).unwrap();
    assert!(offline.is_trial());
    offline.policy_or(&branches).unwrap();
    assert_eq!(trial.policy_digest().unwrap(), offline.digest());

    let mut strict = PolicyState::new(TpmAlgId::Sha256).unwrap();
    let err = strict.policy_or(&branches).unwrap_err();
    assert!(matches!(err, TpmError::PolicyFail(_)), "{err:?}");
}

#[rstest]
#[case(2047)]
#[case(u32::MAX)]
fn test_policy_pcr_rejects_oversized_selection(#[case] pcr: u32) {
    let mut state = PolicyState::new(TpmAlgId::Sha256).unwrap();
    let selection = [PcrSelection::new(TpmAlgId::Sha256, &[pcr])];
    let err = state.policy_pcr(&selection, &[0; 32]).unwrap_err();
    assert!(matches!(err, TpmError::Malformed(_)), "{err:?}");
    assert_eq!(state.digest(), vec![0; 32]);
}

#[rstest]
#[case(vec![vec![0; 32]])]
#[case(vec![vec![0; 32]; 9])]
#[case(vec![vec![0; 32], vec![0; 20]])]
fn test_policy_or_rejects_bad_list(mut ctx: TpmContext<MockTpm>, #[case] digests: Vec<Vec<u8>>) {
    let session = start(&mut ctx, SessionType::Policy);
    let err = ctx.policy_or(&session, &digests).unwrap_err();
    assert!(matches!(err, TpmError::InvalidParameter(_)), "{err:?}");
}

#[rstest]
fn test_policy_digest_is_deterministic(mut ctx: TpmContext<MockTpm>) {
    let selection = [PcrSelection::new(TpmAlgId::Sha256, &[0, 7])];
    let mut digests = Vec::new();
    for _ in 0..2 {
        let session = start(&mut ctx, SessionType::Trial);
        owner_secret(&mut ctx, &session);
        ctx.policy_pcr(&session, &[], &selection).unwrap();
        digests.push(session.policy_digest().unwrap());
        ctx.flush_context(&session).unwrap();
    }
    assert_eq!(digests[0], digests[1]);
}

#[rstest]
fn test_auth_value_then_password(mut ctx: TpmContext<MockTpm>) {
    let session = start(&mut ctx, SessionType::Policy);
    owner_secret(&mut ctx, &session);
    let digest = session.policy_digest().unwrap();

    ctx.policy_auth_value(&session).unwrap();
    assert_eq!(session.policy_digest().unwrap(), digest);
    assert_eq!(
        session.policy_auth_method().unwrap(),
        PolicyAuthMethod::AuthValue
    );

    ctx.policy_password(&session).unwrap();
    assert_eq!(session.policy_digest().unwrap(), digest);
    assert_eq!(
        session.policy_auth_method().unwrap(),
        PolicyAuthMethod::Password
    );
    assert_mirrors_device(&mut ctx, &session);
}

#[rstest]
fn test_policy_on_hmac_session(mut ctx: TpmContext<MockTpm>) {
    let hmac = start(&mut ctx, SessionType::Hmac);
    let err = ctx.policy_auth_value(&hmac).unwrap_err();
    assert_eq!(err.context_fault(), Some(ContextFault::NotAPolicySession));
    let err = hmac.policy_digest().unwrap_err();
    assert_eq!(err.context_fault(), Some(ContextFault::NotAPolicySession));
}

#[rstest]
#[case(None)]
#[case(Some(PolicyAuthMethod::AuthValue))]
#[case(Some(PolicyAuthMethod::Password))]
fn test_policy_session_authorizes_object(
    mut ctx: TpmContext<MockTpm>,
    #[case] method: Option<PolicyAuthMethod>,
) {
    let mut policy = PolicyState::new(TpmAlgId::Sha256).unwrap();
    policy
        .policy_secret(&Handle::OWNER.name(), &[])
        .unwrap();

    let public = Public::keyed_hash(
        TpmAlgId::Sha256,
        ObjectAttributes::ADMIN_WITH_POLICY,
        &[0x33; 32],
    )
    .with_auth_policy(policy.digest());
    let handle = ctx.device().load_object(public, OBJECT_AUTH);
    let object = ctx.wrap_handle(handle).unwrap();

    let auth = start(&mut ctx, SessionType::Policy);
    owner_secret(&mut ctx, &auth);
    match method {
        Some(PolicyAuthMethod::AuthValue) => ctx.policy_auth_value(&auth).unwrap(),
        Some(PolicyAuthMethod::Password) => ctx.policy_password(&auth).unwrap(),
        _ => {}
    }

    let target = start(&mut ctx, SessionType::Policy);
    let entity = AuthorizedResource::new(&object, OBJECT_AUTH);
    ctx.policy_secret(&entity, &target, &[], &[], 0, Authorization::Session(&auth))
        .unwrap();
    assert_mirrors_device(&mut ctx, &target);

    let mut expected = PolicyState::new(TpmAlgId::Sha256).unwrap();
    expected.policy_secret(&object.name(), &[]).unwrap();
    assert_eq!(target.policy_digest().unwrap(), expected.digest());
}

#[rstest]
fn test_policy_session_with_wrong_digest_is_rejected(mut ctx: TpmContext<MockTpm>) {
    let public = Public::keyed_hash(
        TpmAlgId::Sha256,
        ObjectAttributes::ADMIN_WITH_POLICY,
        &[0x44; 32],
    )
    .with_auth_policy(&[0x55; 32]);
    let handle = ctx.device().load_object(public, OBJECT_AUTH);
    let object = ctx.wrap_handle(handle).unwrap();

    let auth = start(&mut ctx, SessionType::Policy);
    owner_secret(&mut ctx, &auth);

    let target = start(&mut ctx, SessionType::Policy);
    let entity = AuthorizedResource::new(&object, OBJECT_AUTH);
    let err = ctx
        .policy_secret(&entity, &target, &[], &[], 0, Authorization::Session(&auth))
        .unwrap_err();
    assert!(matches!(err, TpmError::Authorization(rc) if rc.base() == TpmRc::POLICY_FAIL));
    assert_eq!(target.policy_digest().unwrap(), vec![0; 32]);
}

#[rstest]
fn test_trial_session_cannot_authorize(mut ctx: TpmContext<MockTpm>) {
    let owner = ctx.wrap_handle(Handle::OWNER).unwrap();
    let trial = start(&mut ctx, SessionType::Trial);
    let target = start(&mut ctx, SessionType::Policy);
    let entity = AuthorizedResource::new(&owner, OWNER_AUTH);

    let err = ctx
        .policy_secret(&entity, &target, &[], &[], 0, Authorization::Session(&trial))
        .unwrap_err();
    assert!(matches!(err, TpmError::Authorization(rc) if rc.base() == TpmRc::AUTH_TYPE));
}
