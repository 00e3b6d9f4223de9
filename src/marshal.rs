// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2025 Opinsys Oy
// Copyright (c) 2024-2025 Jarkko Sakkinen

//! Big-endian structure encoding for the handful of TPM structures that feed
//! names, command parameter hashes and duplication blobs.

use crate::error::TpmError;

#[derive(Debug, Default)]
pub struct TpmWriter {
    buf: Vec<u8>,
}

impl TpmWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Writes a sized buffer: a `u16` length followed by the bytes.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` if `bytes` does not fit a 16-bit length.
    pub fn write_tpm2b(&mut self, bytes: &[u8]) -> Result<(), TpmError> {
        let len = u16::try_from(bytes.len())
            .map_err(|_| TpmError::Malformed(format!("TPM2B of {} bytes", bytes.len())))?;
        self.write_u16(len);
        self.write_bytes(bytes);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

pub trait TpmBuild {
    /// # Errors
    ///
    /// Returns `Malformed` when a field does not fit its wire encoding.
    fn build(&self, writer: &mut TpmWriter) -> Result<(), TpmError>;
}

pub trait TpmParse: Sized {
    /// Parses `Self` from the front of `buf` and returns the remainder.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` on truncated or inconsistent input.
    fn parse(buf: &[u8]) -> Result<(Self, &[u8]), TpmError>;
}

/// Marshals `obj` into a fresh buffer.
///
/// # Errors
///
/// Returns `Malformed` when a field does not fit its wire encoding.
pub fn build_to_vec<T: TpmBuild + ?Sized>(obj: &T) -> Result<Vec<u8>, TpmError> {
    let mut writer = TpmWriter::new();
    obj.build(&mut writer)?;
    Ok(writer.into_inner())
}

fn split<'a>(
    buf: &'a [u8],
    len: usize,
    what: &str,
) -> Result<(&'a [u8], &'a [u8]), TpmError> {
    if buf.len() < len {
        return Err(TpmError::Malformed(format!(
            "{what}: need {len} bytes, have {}",
            buf.len()
        )));
    }
    Ok(buf.split_at(len))
}

/// # Errors
///
/// Returns `Malformed` if fewer than two bytes are available.
pub fn parse_u16(buf: &[u8]) -> Result<(u16, &[u8]), TpmError> {
    let (head, rest) = split(buf, 2, "u16")?;
    Ok((u16::from_be_bytes([head[0], head[1]]), rest))
}

/// # Errors
///
/// Returns `Malformed` if fewer than four bytes are available.
pub fn parse_u32(buf: &[u8]) -> Result<(u32, &[u8]), TpmError> {
    let (head, rest) = split(buf, 4, "u32")?;
    Ok((u32::from_be_bytes([head[0], head[1], head[2], head[3]]), rest))
}

/// Splits a sized buffer off the front of `buf`.
///
/// # Errors
///
/// Returns `Malformed` if the length prefix or the payload is truncated.
pub fn parse_tpm2b(buf: &[u8]) -> Result<(&[u8], &[u8]), TpmError> {
    let (len, rest) = parse_u16(buf)?;
    split(rest, usize::from(len), "TPM2B")
}
