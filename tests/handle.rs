// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy
// Copyright (c) 2024-2025 Jarkko Sakkinen

use rstest::rstest;
use tpm2ctx::{Handle, HandleType, Name, NameKind, TpmAlgId, TpmError};

#[rstest]
#[case(0x0000_0007, Some(HandleType::Pcr))]
#[case(0x0100_0001, Some(HandleType::NvIndex))]
#[case(0x0200_0000, Some(HandleType::HmacSession))]
#[case(0x0300_0001, Some(HandleType::PolicySession))]
#[case(0x4000_0001, Some(HandleType::Permanent))]
#[case(0x8000_0000, Some(HandleType::Transient))]
#[case(0x8100_0001, Some(HandleType::Persistent))]
#[case(0x0400_0000, None)]
#[case(0xFF00_0000, None)]
fn test_handle_classification(#[case] raw: u32, #[case] expected: Option<HandleType>) {
    assert_eq!(Handle(raw).handle_type(), expected);
}

#[rstest]
#[case(Handle::OWNER, "40000001")]
#[case(Handle::ENDORSEMENT, "4000000b")]
#[case(Handle(0x8100_0001), "81000001")]
fn test_handle_name_is_big_endian_handle(#[case] handle: Handle, #[case] expected: &str) {
    let name = handle.name();
    assert_eq!(name.kind(), NameKind::Handle);
    assert_eq!(name.to_string(), expected);
    assert_eq!(name.handle().unwrap(), handle);
}

#[rstest]
#[case(vec![], NameKind::Invalid)]
#[case(vec![0x00], NameKind::Invalid)]
#[case(vec![0x40, 0x00, 0x00, 0x01], NameKind::Handle)]
#[case([vec![0x00, 0x0b], vec![0xAA; 32]].concat(), NameKind::Digest)]
#[case([vec![0x00, 0x04], vec![0xAA; 20]].concat(), NameKind::Digest)]
#[case([vec![0x00, 0x0b], vec![0xAA; 20]].concat(), NameKind::Invalid)]
#[case([vec![0x12, 0x34], vec![0xAA; 32]].concat(), NameKind::Invalid)]
fn test_name_kind(#[case] bytes: Vec<u8>, #[case] expected: NameKind) {
    assert_eq!(Name::from_bytes(bytes).kind(), expected);
}

#[rstest]
fn test_name_from_digest() {
    let name = Name::from_digest(TpmAlgId::Sha256, &[0x11; 32]).unwrap();
    assert_eq!(name.kind(), NameKind::Digest);
    assert_eq!(name.algorithm().unwrap(), TpmAlgId::Sha256);
    assert_eq!(name.digest().unwrap(), &[0x11; 32]);
    assert_eq!(&name.as_bytes()[..2], &[0x00, 0x0b]);
}

#[rstest]
#[case(TpmAlgId::Sha256, 20)]
#[case(TpmAlgId::Sha1, 32)]
#[case(TpmAlgId::Aes, 16)]
fn test_name_from_digest_rejects_size_mismatch(#[case] alg: TpmAlgId, #[case] len: usize) {
    let err = Name::from_digest(alg, &vec![0; len]).unwrap_err();
    assert!(matches!(err, TpmError::InvalidName(_)), "{err:?}");
}

#[rstest]
fn test_name_accessors_reject_wrong_kind() {
    let handle_name = Handle::OWNER.name();
    assert!(matches!(
        handle_name.algorithm(),
        Err(TpmError::InvalidName(_))
    ));
    assert!(matches!(handle_name.digest(), Err(TpmError::InvalidName(_))));

    let digest_name = Name::from_digest(TpmAlgId::Sha1, &[0; 20]).unwrap();
    assert!(matches!(digest_name.handle(), Err(TpmError::InvalidName(_))));
}
