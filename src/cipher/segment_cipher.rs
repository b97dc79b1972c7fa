use std::io::Write;

use cipher::block_padding::Pkcs7;
use cipher::BlockEncryptMut;

use super::{new_encryptor, Aes128CbcEnc};
use crate::error::{HlsError, Result};

/// Wraps a [`Write`] sink, buffering plaintext into 16-byte blocks and
/// encrypting each full block with AES-128-CBC as it arrives. `close` applies
/// PKCS#7 padding to whatever partial block remains, so every segment is a
/// self-contained cipher stream.
pub struct Aes128Sink<W: Write> {
    inner: W,
    enc: Aes128CbcEnc,
    pending: Vec<u8>,
    ciphertext_len: u64,
}

impl<W: Write> Aes128Sink<W> {
    pub fn new(inner: W, key: &[u8; 16], iv: &[u8; 16]) -> Self {
        Self {
            inner,
            enc: new_encryptor(key, iv),
            pending: Vec::with_capacity(16),
            ciphertext_len: 0,
        }
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.pending.extend_from_slice(data);
        let mut offset = 0;
        while self.pending.len() - offset >= 16 {
            let mut block = [0u8; 16];
            block.copy_from_slice(&self.pending[offset..offset + 16]);
            let ga = cipher::generic_array::GenericArray::from_mut_slice(&mut block);
            self.enc.encrypt_block_mut(ga);
            self.inner.write_all(&block)?;
            self.ciphertext_len += 16;
            offset += 16;
        }
        self.pending.drain(0..offset);
        Ok(())
    }

    /// Total ciphertext bytes emitted so far, for byte-range bookkeeping.
    pub fn size(&self) -> u64 {
        self.ciphertext_len
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush().map_err(HlsError::IoFailure)
    }

    /// Pads and encrypts the trailing partial block (always present, even if
    /// empty, since PKCS#7 requires a full block of padding in that case) and
    /// closes the inner sink.
    pub fn close(mut self) -> Result<W> {
        let mut buf = [0u8; 32];
        let pending_len = self.pending.len();
        buf[..pending_len].copy_from_slice(&self.pending);
        let ct = self
            .enc
            .encrypt_padded_mut::<Pkcs7>(&mut buf, pending_len)
            .map_err(|e| HlsError::CipherFailure(format!("pkcs7 padding failed: {e}")))?;
        self.inner.write_all(ct)?;
        self.ciphertext_len += ct.len() as u64;
        self.inner.flush()?;
        Ok(self.inner)
    }
}
