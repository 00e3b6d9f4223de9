// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy
// Copyright (c) 2024-2025 Jarkko Sakkinen

use rstest::{fixture, rstest};
use tpm2ctx::{
    mocktpm::MockTpm,
    session::{cp_hash, rp_hash},
    types::{AuthResponse, Public, SessionAttributes, SymDefObject},
    Authorization, AuthorizedResource, ContextFault, Handle, HandleType, ResourceContext,
    SessionParams, SessionSalt, SessionType, TpmAlgId, TpmCc, TpmContext, TpmError, TpmRc,
    TransportPhase,
};

const OWNER_AUTH: &[u8] = b"owner-secret";
const ENDORSEMENT_AUTH: &[u8] = b"endorsement-secret";

#[fixture]
fn ctx() -> TpmContext<MockTpm> {
    let mut tpm = MockTpm::new();
    tpm.set_hierarchy_auth(Handle::OWNER, OWNER_AUTH);
    tpm.set_hierarchy_auth(Handle::ENDORSEMENT, ENDORSEMENT_AUTH);
    TpmContext::new(tpm)
}

fn start(ctx: &mut TpmContext<MockTpm>, session_type: SessionType) -> ResourceContext {
    ctx.start_auth_session(&SessionParams::new(session_type, TpmAlgId::Sha256))
        .unwrap()
}

/// Runs PolicySecret against a scratch policy session, authorized through
/// `authorization`.
fn policy_secret(
    ctx: &mut TpmContext<MockTpm>,
    entity: &ResourceContext,
    auth_value: &[u8],
    authorization: Authorization<'_>,
) -> Result<(), TpmError> {
    let target = start(ctx, SessionType::Policy);
    let entity = AuthorizedResource::new(entity, auth_value);
    ctx.policy_secret(&entity, &target, &[], &[], 0, authorization)
        .map(|_| ())
}

#[rstest]
#[case(SessionType::Hmac, HandleType::HmacSession)]
#[case(SessionType::Policy, HandleType::PolicySession)]
#[case(SessionType::Trial, HandleType::PolicySession)]
fn test_start_auth_session(
    mut ctx: TpmContext<MockTpm>,
    #[case] session_type: SessionType,
    #[case] expected: HandleType,
) {
    let session = start(&mut ctx, session_type);
    assert_eq!(session.handle().handle_type(), Some(expected));
    assert_eq!(session.session_type().unwrap(), session_type);
    assert_eq!(session.nonce_caller().unwrap().len(), 32);
    assert_eq!(
        session.nonce_tpm().unwrap(),
        ctx.device().session_nonce_tpm(session.handle()).unwrap()
    );
    assert_eq!(
        session.session_attributes().unwrap(),
        SessionAttributes::CONTINUE_SESSION
    );
    assert!(ctx.store().contains(&session));
}

#[rstest]
fn test_start_auth_session_keeps_symmetric(mut ctx: TpmContext<MockTpm>) {
    let params = SessionParams::new(SessionType::Hmac, TpmAlgId::Sha1)
        .with_symmetric(SymDefObject::aes_cfb(128));
    let session = ctx.start_auth_session(&params).unwrap();
    assert_eq!(session.session_symmetric().unwrap(), SymDefObject::aes_cfb(128));
    assert_eq!(session.nonce_caller().unwrap().len(), 20);
}

#[rstest]
fn test_start_auth_session_rejects_non_hash(mut ctx: TpmContext<MockTpm>) {
    let err = ctx
        .start_auth_session(&SessionParams::new(SessionType::Hmac, TpmAlgId::Aes))
        .unwrap_err();
    assert!(matches!(err, TpmError::InvalidAlgorithm(_)));
    assert_eq!(ctx.device().command_count(), 0);
}

#[rstest]
fn test_hmac_session_rolls_nonces(mut ctx: TpmContext<MockTpm>) {
    let owner = ctx.wrap_handle(Handle::OWNER).unwrap();
    let hmac = start(&mut ctx, SessionType::Hmac);

    let mut seen_caller = vec![hmac.nonce_caller().unwrap()];
    let mut seen_tpm = vec![hmac.nonce_tpm().unwrap()];
    for _ in 0..3 {
        policy_secret(&mut ctx, &owner, OWNER_AUTH, Authorization::Session(&hmac)).unwrap();

        let nonce_tpm = hmac.nonce_tpm().unwrap();
        assert_eq!(
            nonce_tpm,
            ctx.device().session_nonce_tpm(hmac.handle()).unwrap()
        );
        let nonce_caller = hmac.nonce_caller().unwrap();
        assert!(!seen_caller.contains(&nonce_caller));
        assert!(!seen_tpm.contains(&nonce_tpm));
        seen_caller.push(nonce_caller);
        seen_tpm.push(nonce_tpm);
    }
}

#[rstest]
fn test_password_authorization(mut ctx: TpmContext<MockTpm>) {
    let owner = ctx.wrap_handle(Handle::OWNER).unwrap();
    policy_secret(&mut ctx, &owner, OWNER_AUTH, Authorization::Password).unwrap();
    policy_secret(&mut ctx, &owner, b"owner-secret\0\0", Authorization::Password).unwrap();

    let err = policy_secret(&mut ctx, &owner, b"wrong", Authorization::Password).unwrap_err();
    assert!(matches!(err, TpmError::Authorization(rc) if rc.base() == TpmRc::AUTH_FAIL));
}

#[rstest]
fn test_hmac_bad_auth_is_authorization_error(mut ctx: TpmContext<MockTpm>) {
    let owner = ctx.wrap_handle(Handle::OWNER).unwrap();
    let hmac = start(&mut ctx, SessionType::Hmac);

    let err =
        policy_secret(&mut ctx, &owner, b"wrong", Authorization::Session(&hmac)).unwrap_err();
    assert!(matches!(err, TpmError::Authorization(rc) if rc.base() == TpmRc::AUTH_FAIL));

    // The device did not answer, so the session is still in step with it.
    policy_secret(&mut ctx, &owner, OWNER_AUTH, Authorization::Session(&hmac)).unwrap();
}

#[rstest]
fn test_bound_session(mut ctx: TpmContext<MockTpm>) {
    let owner = ctx.wrap_handle(Handle::OWNER).unwrap();
    let endorsement = ctx.wrap_handle(Handle::ENDORSEMENT).unwrap();
    let params = SessionParams::new(SessionType::Hmac, TpmAlgId::Sha256)
        .with_bind(AuthorizedResource::new(&owner, OWNER_AUTH));
    let bound = ctx.start_auth_session(&params).unwrap();

    // The bind entity is authorized by the session key alone.
    policy_secret(&mut ctx, &owner, b"", Authorization::Session(&bound)).unwrap();
    // Any other entity needs its own auth value in the key.
    policy_secret(
        &mut ctx,
        &endorsement,
        ENDORSEMENT_AUTH,
        Authorization::Session(&bound),
    )
    .unwrap();
    let err = policy_secret(&mut ctx, &endorsement, b"", Authorization::Session(&bound))
        .unwrap_err();
    assert!(matches!(err, TpmError::Authorization(_)));
}

#[rstest]
fn test_salted_session(mut ctx: TpmContext<MockTpm>) {
    let owner = ctx.wrap_handle(Handle::OWNER).unwrap();
    let key_handle = ctx
        .device()
        .load_object(Public::rsa_storage(TpmAlgId::Sha256, &[0xA5; 256]), b"");
    let key = ctx.wrap_handle(key_handle).unwrap();

    let salt = SessionSalt {
        tpm_key: &key,
        salt: b"0123456789abcdef",
        encrypted_salt: b"0123456789abcdef",
    };
    let params = SessionParams::new(SessionType::Hmac, TpmAlgId::Sha256).with_salt(salt);
    let salted = ctx.start_auth_session(&params).unwrap();

    policy_secret(&mut ctx, &owner, OWNER_AUTH, Authorization::Session(&salted)).unwrap();
}

#[rstest]
fn test_salt_key_must_be_registered(mut ctx: TpmContext<MockTpm>) {
    let loose = ResourceContext::new_object(
        Handle(0x8000_0010),
        Public::rsa_storage(TpmAlgId::Sha256, &[0xA5; 256]),
    )
    .unwrap();
    let salt = SessionSalt {
        tpm_key: &loose,
        salt: b"salt",
        encrypted_salt: b"salt",
    };
    let params = SessionParams::new(SessionType::Hmac, TpmAlgId::Sha256).with_salt(salt);
    let err = ctx.start_auth_session(&params).unwrap_err();
    assert_eq!(err.context_fault(), Some(ContextFault::Closed));
}

#[rstest]
fn test_consumed_session_is_evicted(mut ctx: TpmContext<MockTpm>) {
    let owner = ctx.wrap_handle(Handle::OWNER).unwrap();
    let hmac = start(&mut ctx, SessionType::Hmac);
    let handle = hmac.handle();
    hmac.set_session_attributes(SessionAttributes::empty())
        .unwrap();

    policy_secret(&mut ctx, &owner, OWNER_AUTH, Authorization::Session(&hmac)).unwrap();

    assert!(!hmac.is_owned());
    assert!(!ctx.device().has_session(handle));
    assert!(ctx.store().get(handle).is_none());
    let err = policy_secret(&mut ctx, &owner, OWNER_AUTH, Authorization::Session(&hmac))
        .unwrap_err();
    assert_eq!(err.context_fault(), Some(ContextFault::Closed));
}

#[rstest]
fn test_foreign_session_is_rejected(mut ctx: TpmContext<MockTpm>) {
    let mut other = TpmContext::new(MockTpm::new());
    let foreign = start(&mut other, SessionType::Hmac);
    let owner = ctx.wrap_handle(Handle::OWNER).unwrap();

    let err = policy_secret(&mut ctx, &owner, OWNER_AUTH, Authorization::Session(&foreign))
        .unwrap_err();
    assert_eq!(err.context_fault(), Some(ContextFault::Foreign));
}

#[rstest]
fn test_compute_auth_value_requires_session(mut ctx: TpmContext<MockTpm>) {
    let owner = ctx.wrap_handle(Handle::OWNER).unwrap();
    let err = ctx
        .compute_auth_value(&owner, &[0; 32], SessionAttributes::empty(), None)
        .unwrap_err();
    assert_eq!(err.context_fault(), Some(ContextFault::NotASession));
}

#[rstest]
fn test_response_verification(mut ctx: TpmContext<MockTpm>) {
    let owner = ctx.wrap_handle(Handle::OWNER).unwrap();
    let hmac = start(&mut ctx, SessionType::Hmac);
    let entity = AuthorizedResource::new(&owner, OWNER_AUTH);

    let cp = cp_hash(TpmAlgId::Sha256, TpmCc::PolicySecret, &[owner.name()], &[]).unwrap();
    let command = ctx
        .compute_auth_value(
            &hmac,
            &cp,
            SessionAttributes::CONTINUE_SESSION,
            Some(&entity),
        )
        .unwrap();
    assert_eq!(command.session_handle, hmac.handle());
    assert_eq!(command.nonce, hmac.nonce_caller().unwrap());

    let rp = rp_hash(TpmAlgId::Sha256, TpmRc::SUCCESS, TpmCc::PolicySecret, &[]).unwrap();
    let forged = AuthResponse {
        nonce: vec![0x42; 32],
        attributes: SessionAttributes::CONTINUE_SESSION,
        hmac: vec![0; 32],
    };
    let err = ctx
        .verify_response_auth(&hmac, &rp, &forged, Some(&entity))
        .unwrap_err();
    assert!(matches!(err, TpmError::ResponseAuthorization));
    // The nonce is rolled even though the check failed.
    assert_eq!(hmac.nonce_tpm().unwrap(), vec![0x42; 32]);
}

#[rstest]
fn test_roll_nonce(mut ctx: TpmContext<MockTpm>) {
    let hmac = start(&mut ctx, SessionType::Hmac);
    ctx.roll_nonce(&hmac, &[7; 32]).unwrap();
    assert_eq!(hmac.nonce_tpm().unwrap(), vec![7; 32]);
}

#[rstest]
#[case(TransportPhase::Send)]
#[case(TransportPhase::Receive)]
fn test_transport_error_passthrough(mut ctx: TpmContext<MockTpm>, #[case] phase: TransportPhase) {
    ctx.device().inject_transport_failure(phase);
    let err = ctx
        .start_auth_session(&SessionParams::new(SessionType::Hmac, TpmAlgId::Sha256))
        .unwrap_err();
    assert!(matches!(err, TpmError::Transport { phase: p, .. } if p == phase));
    assert!(ctx.store().is_empty());
}
