// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy
// Copyright (c) 2024-2025 Jarkko Sakkinen

//! Duplication blob wrapping.
//!
//! The outer wrap is encrypt-then-MAC under keys derived from the parent
//! seed. The inner wrap is MAC-then-encrypt under a symmetric key shared out
//! of band. Wrapping applies inner then outer; unwrapping reverses the order.

use crate::{
    constants::TpmAlgId,
    crypto::{
        crypto_cfb_decrypt, crypto_cfb_encrypt, crypto_digest, crypto_digest_size,
        crypto_hmac, crypto_hmac_verify, crypto_kdfa, crypto_random, crypto_sym_key_len,
        KDF_LABEL_INTEGRITY, KDF_LABEL_STORAGE,
    },
    error::TpmError,
    handle::Name,
    marshal::{parse_tpm2b, TpmWriter},
    types::{Public, Sensitive, SymDefObject},
};
use log::{debug, warn};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// The new parent's side of the outer wrap.
#[derive(Clone, Copy)]
pub struct OuterWrap<'a> {
    pub name_alg: TpmAlgId,
    pub symmetric: SymDefObject,
    pub seed: &'a [u8],
}

impl<'a> OuterWrap<'a> {
    /// Takes the name algorithm and symmetric definition of the new parent.
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` if `parent` has no symmetric definition, as
    /// is the case for keyed-hash objects.
    pub fn for_parent(parent: &Public, seed: &'a [u8]) -> Result<Self, TpmError> {
        let symmetric = parent.symmetric().copied().ok_or_else(|| {
            TpmError::InvalidParameter(format!(
                "{} parent cannot protect children",
                parent.object_type
            ))
        })?;
        Ok(Self {
            name_alg: parent.name_alg,
            symmetric,
            seed,
        })
    }
}

/// The inner wrap definition. Without a key, wrapping generates one. A null
/// symmetric algorithm leaves the inner layer out.
#[derive(Clone, Copy)]
pub struct InnerWrap<'a> {
    pub symmetric: SymDefObject,
    pub key: Option<&'a [u8]>,
}

impl InnerWrap<'_> {
    fn enabled<'r, 'a>(inner: Option<&'r InnerWrap<'a>>) -> Option<&'r InnerWrap<'a>> {
        inner.filter(|inner| !inner.symmetric.is_null())
    }
}

fn bits_of(len: usize) -> Result<u16, TpmError> {
    u16::try_from(len * 8)
        .map_err(|_| TpmError::InvalidParameter(format!("{len} byte key is too large")))
}

fn outer_keys(
    name_alg: TpmAlgId,
    symmetric: &SymDefObject,
    name: &Name,
    seed: &[u8],
) -> Result<(Zeroizing<Vec<u8>>, Zeroizing<Vec<u8>>), TpmError> {
    if seed.is_empty() {
        return Err(TpmError::InvalidParameter(
            "outer wrap requires a seed".to_string(),
        ));
    }
    let sym_bits = bits_of(crypto_sym_key_len(symmetric)?)?;
    let hmac_bits = bits_of(crypto_digest_size(name_alg)?)?;
    let sym_key = crypto_kdfa(
        name_alg,
        seed,
        KDF_LABEL_STORAGE,
        name.as_bytes(),
        &[],
        sym_bits,
    )?;
    let hmac_key = crypto_kdfa(name_alg, seed, KDF_LABEL_INTEGRITY, &[], &[], hmac_bits)?;
    Ok((sym_key, hmac_key))
}

/// Encrypts `payload` and prefixes an HMAC over the ciphertext and `name`.
///
/// # Errors
///
/// Returns `InvalidAlgorithm` for an unsupported hash or symmetric
/// definition and `InvalidParameter` for an empty seed.
pub fn produce_outer_wrap(
    name_alg: TpmAlgId,
    symmetric: &SymDefObject,
    name: &Name,
    seed: &[u8],
    payload: &[u8],
) -> Result<Vec<u8>, TpmError> {
    let (sym_key, hmac_key) = outer_keys(name_alg, symmetric, name, seed)?;

    let mut ciphertext = payload.to_vec();
    crypto_cfb_encrypt(symmetric, &sym_key, &mut ciphertext)?;
    let integrity = crypto_hmac(name_alg, &hmac_key, &[&ciphertext, name.as_bytes()])?;

    let mut writer = TpmWriter::new();
    writer.write_tpm2b(&integrity)?;
    writer.write_bytes(&ciphertext);
    Ok(writer.into_inner())
}

/// Checks the outer HMAC and decrypts the payload.
///
/// # Errors
///
/// Returns `Malformed` if the HMAC prefix cannot be split off and
/// `Integrity` if it does not verify.
pub fn remove_outer_wrap(
    name_alg: TpmAlgId,
    symmetric: &SymDefObject,
    name: &Name,
    seed: &[u8],
    blob: &[u8],
) -> Result<Zeroizing<Vec<u8>>, TpmError> {
    let (sym_key, hmac_key) = outer_keys(name_alg, symmetric, name, seed)?;
    let (integrity, ciphertext) = parse_tpm2b(blob)?;

    if !crypto_hmac_verify(
        name_alg,
        &hmac_key,
        &[ciphertext, name.as_bytes()],
        integrity,
    )? {
        warn!(target: "tpm2ctx::duplication", "outer HMAC mismatch for {name}");
        return Err(TpmError::Integrity("outer HMAC mismatch".to_string()));
    }

    let mut plaintext = Zeroizing::new(ciphertext.to_vec());
    crypto_cfb_decrypt(symmetric, &sym_key, &mut plaintext)?;
    Ok(plaintext)
}

/// Prefixes `H_nameAlg(plaintext || name)` and encrypts the result. Returns
/// the key that was used, generated when `key` is `None`.
///
/// # Errors
///
/// Returns `InvalidName` if `name` is not digest-form, and
/// `InvalidAlgorithm` or `InvalidParameter` for a bad symmetric definition
/// or key.
pub fn produce_inner_wrap(
    name: &Name,
    symmetric: &SymDefObject,
    key: Option<&[u8]>,
    plaintext: &[u8],
) -> Result<(Zeroizing<Vec<u8>>, Vec<u8>), TpmError> {
    let name_alg = name.algorithm()?;
    let key = match key {
        Some(key) => Zeroizing::new(key.to_vec()),
        None => Zeroizing::new(crypto_random(crypto_sym_key_len(symmetric)?)),
    };

    let integrity = crypto_digest(name_alg, &[plaintext, name.as_bytes()])?;
    let mut writer = TpmWriter::new();
    writer.write_tpm2b(&integrity)?;
    writer.write_bytes(plaintext);
    let mut buf = writer.into_inner();
    crypto_cfb_encrypt(symmetric, &key, &mut buf)?;
    Ok((key, buf))
}

/// Decrypts and checks the inner integrity value.
///
/// # Errors
///
/// Returns `Integrity` if the decrypted integrity prefix is corrupt or does
/// not match, and `InvalidName` if `name` is not digest-form.
pub fn remove_inner_wrap(
    name: &Name,
    symmetric: &SymDefObject,
    key: &[u8],
    blob: &[u8],
) -> Result<Zeroizing<Vec<u8>>, TpmError> {
    let name_alg = name.algorithm()?;
    let mut decrypted = Zeroizing::new(blob.to_vec());
    crypto_cfb_decrypt(symmetric, key, &mut decrypted)?;

    let (integrity, plaintext) = parse_tpm2b(&decrypted)
        .map_err(|_| TpmError::Integrity("corrupt inner integrity size".to_string()))?;
    let expected = crypto_digest(name_alg, &[plaintext, name.as_bytes()])?;
    if !bool::from(integrity.ct_eq(&expected)) {
        warn!(target: "tpm2ctx::duplication", "inner integrity mismatch for {name}");
        return Err(TpmError::Integrity("inner integrity mismatch".to_string()));
    }
    Ok(Zeroizing::new(plaintext.to_vec()))
}

/// Wraps `sensitive` for import under a new parent.
///
/// Returns the inner wrap key (when an inner wrap was applied) and the
/// duplication blob. With neither wrap, the blob is the marshaled
/// `TPM2B_SENSITIVE`.
///
/// # Errors
///
/// Returns the errors of the individual wrap steps.
pub fn create_duplication_object(
    sensitive: &Sensitive,
    name: &Name,
    outer: Option<&OuterWrap<'_>>,
    inner: Option<&InnerWrap<'_>>,
) -> Result<(Option<Zeroizing<Vec<u8>>>, Vec<u8>), TpmError> {
    let plaintext = sensitive.to_tpm2b()?;
    let inner = InnerWrap::enabled(inner);

    let (inner_key, payload) = match inner {
        Some(inner) => {
            let (key, wrapped) = produce_inner_wrap(name, &inner.symmetric, inner.key, &plaintext)?;
            (Some(key), wrapped)
        }
        None => (None, plaintext.to_vec()),
    };

    let blob = match outer {
        Some(outer) => {
            produce_outer_wrap(outer.name_alg, &outer.symmetric, name, outer.seed, &payload)?
        }
        None => payload,
    };

    debug!(
        target: "tpm2ctx::duplication",
        "wrap {name}: inner={} outer={} blob={} bytes",
        inner.is_some(),
        outer.is_some(),
        blob.len()
    );
    Ok((inner_key, blob))
}

/// Reverses [`create_duplication_object`].
///
/// # Errors
///
/// Returns `Integrity` when either wrap fails verification, `Malformed` for
/// a truncated blob, and `InvalidParameter` if an inner wrap is requested
/// without its key.
pub fn unwrap_duplication_object(
    blob: &[u8],
    name: &Name,
    outer: Option<&OuterWrap<'_>>,
    inner: Option<&InnerWrap<'_>>,
) -> Result<Sensitive, TpmError> {
    let payload = match outer {
        Some(outer) => remove_outer_wrap(outer.name_alg, &outer.symmetric, name, outer.seed, blob)?,
        None => Zeroizing::new(blob.to_vec()),
    };

    let plaintext = match InnerWrap::enabled(inner) {
        Some(inner) => {
            let key = inner.key.ok_or_else(|| {
                TpmError::InvalidParameter("inner wrap requires a key".to_string())
            })?;
            remove_inner_wrap(name, &inner.symmetric, key, &payload)?
        }
        None => payload,
    };

    let sensitive = Sensitive::from_tpm2b(&plaintext)?;
    debug!(target: "tpm2ctx::duplication", "unwrap {name}: {}", sensitive.sensitive_type);
    Ok(sensitive)
}
