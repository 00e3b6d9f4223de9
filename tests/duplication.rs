// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy
// Copyright (c) 2024-2025 Jarkko Sakkinen

use rstest::{fixture, rstest};
use sha2::{Digest, Sha256};
use tpm2ctx::{
    duplication::{
        create_duplication_object, produce_inner_wrap, produce_outer_wrap, remove_inner_wrap,
        remove_outer_wrap, unwrap_duplication_object, InnerWrap, OuterWrap,
    },
    types::{ObjectAttributes, Public, Sensitive, SymDefObject},
    Name, TpmAlgId, TpmError,
};

const SEED: [u8; 32] = [0x5E; 32];
const INNER_KEY: [u8; 16] = [0x1F; 16];

#[fixture]
fn name() -> Name {
    let public = Public::keyed_hash(
        TpmAlgId::Sha256,
        ObjectAttributes::USER_WITH_AUTH,
        &[0x42; 32],
    );
    public.name().unwrap()
}

#[fixture]
fn sensitive() -> Sensitive {
    Sensitive::sealed(b"object-auth", &[0x07; 32], b"sealed secret bytes")
}

fn outer() -> OuterWrap<'static> {
    OuterWrap {
        name_alg: TpmAlgId::Sha256,
        symmetric: SymDefObject::aes_cfb(128),
        seed: &SEED,
    }
}

fn inner() -> InnerWrap<'static> {
    InnerWrap {
        symmetric: SymDefObject::aes_cfb(128),
        key: Some(&INNER_KEY),
    }
}

#[rstest]
fn test_outer_wrap_zero_seed_scenario() {
    let seed = [0u8; 32];
    let name = Name::from_digest(TpmAlgId::Sha256, &Sha256::digest([0u8; 32])).unwrap();
    let plaintext = *b"sixteen byte msg";
    let sym = SymDefObject::aes_cfb(128);

    let blob = produce_outer_wrap(TpmAlgId::Sha256, &sym, &name, &seed, &plaintext).unwrap();
    assert_eq!(blob.len(), 2 + 32 + plaintext.len());
    assert_eq!(&blob[..2], &[0x00, 0x20]);
    assert_ne!(&blob[34..], &plaintext);

    let recovered = remove_outer_wrap(TpmAlgId::Sha256, &sym, &name, &seed, &blob).unwrap();
    assert_eq!(&*recovered, &plaintext);
}

#[rstest]
#[case(false, false)]
#[case(true, false)]
#[case(false, true)]
#[case(true, true)]
fn test_duplication_round_trip(
    name: Name,
    sensitive: Sensitive,
    #[case] with_outer: bool,
    #[case] with_inner: bool,
) {
    let outer = with_outer.then(outer);
    let inner = with_inner.then(inner);

    let (inner_key, blob) =
        create_duplication_object(&sensitive, &name, outer.as_ref(), inner.as_ref()).unwrap();
    assert_eq!(inner_key.is_some(), with_inner);

    let restored =
        unwrap_duplication_object(&blob, &name, outer.as_ref(), inner.as_ref()).unwrap();
    assert_eq!(restored, sensitive);
}

#[rstest]
fn test_passthrough_is_tpm2b_sensitive(name: Name, sensitive: Sensitive) {
    let (inner_key, blob) = create_duplication_object(&sensitive, &name, None, None).unwrap();
    assert!(inner_key.is_none());
    assert_eq!(blob, sensitive.to_tpm2b().unwrap().to_vec());
}

#[rstest]
fn test_null_inner_wrap_is_skipped(name: Name, sensitive: Sensitive) {
    let null = InnerWrap {
        symmetric: SymDefObject::null(),
        key: None,
    };
    let (inner_key, blob) =
        create_duplication_object(&sensitive, &name, Some(&outer()), Some(&null)).unwrap();
    assert!(inner_key.is_none());

    let (_, outer_only) =
        create_duplication_object(&sensitive, &name, Some(&outer()), None).unwrap();
    assert_eq!(blob, outer_only);

    let restored = unwrap_duplication_object(&blob, &name, Some(&outer()), Some(&null)).unwrap();
    assert_eq!(restored, sensitive);
}

#[rstest]
fn test_generated_inner_key(name: Name, sensitive: Sensitive) {
    let wrap = InnerWrap {
        symmetric: SymDefObject::aes_cfb(256),
        key: None,
    };
    let (key, blob) = create_duplication_object(&sensitive, &name, None, Some(&wrap)).unwrap();
    let key = key.unwrap();
    assert_eq!(key.len(), 32);

    let unwrap = InnerWrap {
        symmetric: wrap.symmetric,
        key: Some(&key),
    };
    let restored = unwrap_duplication_object(&blob, &name, None, Some(&unwrap)).unwrap();
    assert_eq!(restored, sensitive);
}

#[rstest]
fn test_outer_wrap_for_parent(name: Name, sensitive: Sensitive) {
    let parent = Public::rsa_storage(TpmAlgId::Sha256, &[0xC3; 256]);
    let outer = OuterWrap::for_parent(&parent, &SEED).unwrap();
    assert_eq!(outer.symmetric, SymDefObject::aes_cfb(128));

    let (_, blob) = create_duplication_object(&sensitive, &name, Some(&outer), None).unwrap();
    let restored = unwrap_duplication_object(&blob, &name, Some(&outer), None).unwrap();
    assert_eq!(restored, sensitive);

    let sealed_parent = Public::keyed_hash(TpmAlgId::Sha256, ObjectAttributes::empty(), &[]);
    let Err(err) = OuterWrap::for_parent(&sealed_parent, &SEED) else {
        panic!("keyed-hash parent accepted");
    };
    assert!(matches!(err, TpmError::InvalidParameter(_)), "{err:?}");
}

#[rstest]
#[case(0)]
#[case(1)]
#[case(33)]
#[case(40)]
fn test_outer_tamper_is_detected(name: Name, sensitive: Sensitive, #[case] offset: usize) {
    let (_, mut blob) =
        create_duplication_object(&sensitive, &name, Some(&outer()), None).unwrap();
    blob[offset] ^= 0x01;
    let err = unwrap_duplication_object(&blob, &name, Some(&outer()), None).unwrap_err();
    assert!(
        matches!(err, TpmError::Integrity(_) | TpmError::Malformed(_)),
        "{err:?}"
    );
}

#[rstest]
fn test_outer_wrong_name_is_detected(name: Name, sensitive: Sensitive) {
    let (_, blob) = create_duplication_object(&sensitive, &name, Some(&outer()), None).unwrap();
    let other = Name::from_digest(TpmAlgId::Sha256, &[0x99; 32]).unwrap();
    let err = unwrap_duplication_object(&blob, &other, Some(&outer()), None).unwrap_err();
    assert!(matches!(err, TpmError::Integrity(_)), "{err:?}");
}

#[rstest]
#[case(0)]
#[case(5)]
#[case(50)]
fn test_inner_tamper_is_detected(name: Name, sensitive: Sensitive, #[case] offset: usize) {
    let (_, mut blob) =
        create_duplication_object(&sensitive, &name, None, Some(&inner())).unwrap();
    blob[offset] ^= 0x80;
    let err = unwrap_duplication_object(&blob, &name, None, Some(&inner())).unwrap_err();
    assert!(matches!(err, TpmError::Integrity(_)), "{err:?}");
}

#[rstest]
fn test_inner_wrong_key_is_detected(name: Name) {
    let sym = SymDefObject::aes_cfb(128);
    let (_, blob) = produce_inner_wrap(&name, &sym, Some(&INNER_KEY), b"payload").unwrap();
    let err = remove_inner_wrap(&name, &sym, &[0x2F; 16], &blob).unwrap_err();
    assert!(matches!(err, TpmError::Integrity(_)), "{err:?}");
}

#[rstest]
#[case(vec![])]
#[case(vec![0x00])]
#[case(vec![0x00, 0x20, 0xAA])]
fn test_truncated_outer_blob(name: Name, #[case] blob: Vec<u8>) {
    let sym = SymDefObject::aes_cfb(128);
    let err = remove_outer_wrap(TpmAlgId::Sha256, &sym, &name, &SEED, &blob).unwrap_err();
    assert!(matches!(err, TpmError::Malformed(_)), "{err:?}");
}

#[rstest]
fn test_outer_wrap_requires_seed(name: Name) {
    let sym = SymDefObject::aes_cfb(128);
    let err = produce_outer_wrap(TpmAlgId::Sha256, &sym, &name, &[], b"payload").unwrap_err();
    assert!(matches!(err, TpmError::InvalidParameter(_)));
}

#[rstest]
fn test_inner_unwrap_requires_key(name: Name, sensitive: Sensitive) {
    let (_, blob) = create_duplication_object(&sensitive, &name, None, Some(&inner())).unwrap();
    let keyless = InnerWrap {
        symmetric: SymDefObject::aes_cfb(128),
        key: None,
    };
    let err = unwrap_duplication_object(&blob, &name, None, Some(&keyless)).unwrap_err();
    assert!(matches!(err, TpmError::InvalidParameter(_)));
}

#[rstest]
fn test_inner_wrap_requires_digest_name(sensitive: Sensitive) {
    let name = tpm2ctx::Handle::OWNER.name();
    let err = create_duplication_object(&sensitive, &name, None, Some(&inner())).unwrap_err();
    assert!(matches!(err, TpmError::InvalidName(_)));
}
