//! AES-128 primitives used by both the full-segment sink ([`segment_cipher`])
//! and the HLS SAMPLE-AES bitstream geometry ([`sample_aes`]).

pub mod sample_aes;
pub mod segment_cipher;

pub use sample_aes::SampleEncryptor;
pub use segment_cipher::Aes128Sink;

use aes::Aes128;
use cipher::{BlockEncryptMut, KeyIvInit};

pub(crate) type Aes128CbcEnc = cbc::Encryptor<Aes128>;

pub(crate) fn new_encryptor(key: &[u8; 16], iv: &[u8; 16]) -> Aes128CbcEnc {
    Aes128CbcEnc::new(key.into(), iv.into())
}

pub(crate) fn encrypt_block_in_place(enc: &mut Aes128CbcEnc, block: &mut [u8]) {
    debug_assert_eq!(block.len(), 16);
    let ga = cipher::generic_array::GenericArray::from_mut_slice(block);
    enc.encrypt_block_mut(ga);
}

// Only the round-trip tests in this module's siblings need the inverse
// direction; the pipeline itself never decrypts.
#[cfg(test)]
pub(crate) type Aes128CbcDec = cbc::Decryptor<Aes128>;

#[cfg(test)]
pub(crate) fn new_decryptor(key: &[u8; 16], iv: &[u8; 16]) -> Aes128CbcDec {
    Aes128CbcDec::new(key.into(), iv.into())
}

#[cfg(test)]
pub(crate) fn decrypt_block_in_place(dec: &mut Aes128CbcDec, block: &mut [u8]) {
    use cipher::BlockDecryptMut;
    debug_assert_eq!(block.len(), 16);
    let ga = cipher::generic_array::GenericArray::from_mut_slice(block);
    dec.decrypt_block_mut(ga);
}
