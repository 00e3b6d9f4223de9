// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy
// Copyright (c) 2024-2025 Jarkko Sakkinen

use crate::{constants::TpmAlgId, error::TpmError, handle::Name, types::SymDefObject};
use aes::{Aes128, Aes192, Aes256};
use cfb_mode::{Decryptor, Encryptor};
use cipher::{AsyncStreamCipher, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use zeroize::Zeroizing;

pub const KDF_LABEL_ATH: &str = "ATH";
pub const KDF_LABEL_INTEGRITY: &str = "INTEGRITY";
pub const KDF_LABEL_STORAGE: &str = "STORAGE";

const AES_BLOCK_SIZE: usize = 16;

fn unsupported_hash(alg: TpmAlgId) -> TpmError {
    TpmError::InvalidAlgorithm(format!("{alg} is not a supported hash"))
}

/// Returns the digest size of `alg` in bytes.
///
/// # Errors
///
/// Returns `InvalidAlgorithm` if `alg` is not a hash algorithm.
pub fn crypto_digest_size(alg: TpmAlgId) -> Result<usize, TpmError> {
    alg.digest_size().ok_or_else(|| unsupported_hash(alg))
}

/// Hashes the concatenation of `data_chunks`.
///
/// # Errors
///
/// Returns `InvalidAlgorithm` if `alg` is not a hash algorithm.
pub fn crypto_digest(alg: TpmAlgId, data_chunks: &[&[u8]]) -> Result<Vec<u8>, TpmError> {
    macro_rules! do_digest {
        ($digest:ty) => {{
            let mut hasher = <$digest as Digest>::new();
            for chunk in data_chunks {
                hasher.update(chunk);
            }
            Ok(hasher.finalize().to_vec())
        }};
    }

    match alg {
        TpmAlgId::Sha1 => do_digest!(Sha1),
        TpmAlgId::Sha256 => do_digest!(Sha256),
        TpmAlgId::Sha384 => do_digest!(Sha384),
        TpmAlgId::Sha512 => do_digest!(Sha512),
        _ => Err(unsupported_hash(alg)),
    }
}

/// Computes an HMAC over the concatenation of `data_chunks`.
///
/// # Errors
///
/// Returns `InvalidAlgorithm` if `alg` is not a hash algorithm.
pub fn crypto_hmac(alg: TpmAlgId, key: &[u8], data_chunks: &[&[u8]]) -> Result<Vec<u8>, TpmError> {
    macro_rules! do_hmac {
        ($digest:ty) => {{
            let mut mac = <Hmac<$digest> as Mac>::new_from_slice(key)
                .map_err(|e| TpmError::Crypto(format!("HMAC init error: {e}")))?;
            for chunk in data_chunks {
                mac.update(chunk);
            }
            Ok(mac.finalize().into_bytes().to_vec())
        }};
    }

    match alg {
        TpmAlgId::Sha1 => do_hmac!(Sha1),
        TpmAlgId::Sha256 => do_hmac!(Sha256),
        TpmAlgId::Sha384 => do_hmac!(Sha384),
        TpmAlgId::Sha512 => do_hmac!(Sha512),
        _ => Err(unsupported_hash(alg)),
    }
}

/// Verifies an HMAC in constant time.
///
/// # Errors
///
/// Returns `InvalidAlgorithm` if `alg` is not a hash algorithm.
pub fn crypto_hmac_verify(
    alg: TpmAlgId,
    key: &[u8],
    data_chunks: &[&[u8]],
    expected: &[u8],
) -> Result<bool, TpmError> {
    macro_rules! do_verify {
        ($digest:ty) => {{
            let mut mac = <Hmac<$digest> as Mac>::new_from_slice(key)
                .map_err(|e| TpmError::Crypto(format!("HMAC init error: {e}")))?;
            for chunk in data_chunks {
                mac.update(chunk);
            }
            Ok(mac.verify_slice(expected).is_ok())
        }};
    }

    match alg {
        TpmAlgId::Sha1 => do_verify!(Sha1),
        TpmAlgId::Sha256 => do_verify!(Sha256),
        TpmAlgId::Sha384 => do_verify!(Sha384),
        TpmAlgId::Sha512 => do_verify!(Sha512),
        _ => Err(unsupported_hash(alg)),
    }
}

/// SP 800-108 counter-mode KDF with HMAC, as profiled by TPM 2.0 Part 1
/// section 11.4.10.2.
///
/// # Errors
///
/// Returns `InvalidAlgorithm` if `alg` is not a hash algorithm, and
/// `InvalidParameter` if `bits` is zero.
pub fn crypto_kdfa(
    alg: TpmAlgId,
    key: &[u8],
    label: &str,
    context_u: &[u8],
    context_v: &[u8],
    bits: u16,
) -> Result<Zeroizing<Vec<u8>>, TpmError> {
    if bits == 0 {
        return Err(TpmError::InvalidParameter("KDFa of zero bits".to_string()));
    }
    let digest_size = crypto_digest_size(alg)?;
    let out_len = usize::from(bits).div_ceil(8);
    let bits_be = u32::from(bits).to_be_bytes();

    let mut out = Zeroizing::new(Vec::with_capacity(out_len + digest_size));
    let mut counter: u32 = 1;
    while out.len() < out_len {
        let block = Zeroizing::new(crypto_hmac(
            alg,
            key,
            &[
                &counter.to_be_bytes(),
                label.as_bytes(),
                &[0],
                context_u,
                context_v,
                &bits_be,
            ],
        )?);
        out.extend_from_slice(&block);
        counter += 1;
    }
    out.truncate(out_len);

    let rem = bits % 8;
    if rem != 0 {
        out[0] &= (1u8 << rem) - 1;
    }
    Ok(out)
}

/// Builds a digest-form name from a marshaled public area.
///
/// # Errors
///
/// Returns `InvalidAlgorithm` if `name_alg` is not a hash algorithm.
pub fn crypto_make_name(name_alg: TpmAlgId, public_bytes: &[u8]) -> Result<Name, TpmError> {
    let digest = crypto_digest(name_alg, &[public_bytes])?;
    Name::from_digest(name_alg, &digest)
}

/// Returns the symmetric key length in bytes for an AES-CFB definition.
///
/// # Errors
///
/// Returns `InvalidAlgorithm` for anything other than AES-128/192/256 in CFB
/// mode.
pub fn crypto_sym_key_len(sym: &SymDefObject) -> Result<usize, TpmError> {
    if sym.algorithm != TpmAlgId::Aes || sym.mode != TpmAlgId::Cfb {
        return Err(TpmError::InvalidAlgorithm(format!(
            "unsupported symmetric definition {}-{}",
            sym.algorithm, sym.mode
        )));
    }
    match sym.key_bits {
        128 | 192 | 256 => Ok(usize::from(sym.key_bits / 8)),
        bits => Err(TpmError::InvalidAlgorithm(format!(
            "unsupported AES key size {bits}"
        ))),
    }
}

macro_rules! cfb_apply {
    ($mode:ident, $op:ident, $sym:expr, $key:expr, $data:expr) => {{
        let iv = [0u8; AES_BLOCK_SIZE];
        let key_len = crypto_sym_key_len($sym)?;
        if $key.len() != key_len {
            return Err(TpmError::InvalidParameter(format!(
                "symmetric key is {} bytes, expected {key_len}",
                $key.len()
            )));
        }
        let invalid = |e| TpmError::Crypto(format!("AES-CFB init error: {e}"));
        match key_len {
            16 => $mode::<Aes128>::new_from_slices($key, &iv)
                .map_err(invalid)?
                .$op($data),
            24 => $mode::<Aes192>::new_from_slices($key, &iv)
                .map_err(invalid)?
                .$op($data),
            _ => $mode::<Aes256>::new_from_slices($key, &iv)
                .map_err(invalid)?
                .$op($data),
        }
        Ok(())
    }};
}

/// Encrypts `data` in place with AES-CFB and a zero IV.
///
/// # Errors
///
/// Returns `InvalidAlgorithm` for an unsupported definition and
/// `InvalidParameter` for a key of the wrong length.
pub fn crypto_cfb_encrypt(sym: &SymDefObject, key: &[u8], data: &mut [u8]) -> Result<(), TpmError> {
    cfb_apply!(Encryptor, encrypt, sym, key, data)
}

/// Decrypts `data` in place with AES-CFB and a zero IV.
///
/// # Errors
///
/// Returns `InvalidAlgorithm` for an unsupported definition and
/// `InvalidParameter` for a key of the wrong length.
pub fn crypto_cfb_decrypt(sym: &SymDefObject, key: &[u8], data: &mut [u8]) -> Result<(), TpmError> {
    cfb_apply!(Decryptor, decrypt, sym, key, data)
}

/// Fills a fresh buffer of `len` bytes from the thread RNG.
#[must_use]
pub fn crypto_random(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}
