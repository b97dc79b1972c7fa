//! HLS SAMPLE-AES bitstream geometry. AES-128-CBC with a fixed key and
//! a per-segment IV; the cipher is reset to that IV at the start of every
//! sample, and — for video — at the start of every individually protected
//! 16-byte block. Nothing is ever chained across samples.

use super::{encrypt_block_in_place, new_encryptor};

#[cfg(test)]
use super::{decrypt_block_in_place, new_decryptor};

pub struct SampleEncryptor {
    key: [u8; 16],
    iv: [u8; 16],
}

impl SampleEncryptor {
    pub fn new(key: [u8; 16], iv: [u8; 16]) -> Self {
        Self { key, iv }
    }

    /// AAC: leave the first 16 bytes (ADTS leader) and the 0-15 trailing bytes
    /// untouched; CBC-encrypt in place the largest intervening multiple of 16.
    pub fn encrypt_audio(&self, payload: &mut [u8]) {
        let len = payload.len();
        if len <= 16 {
            return;
        }
        let span = ((len - 16) / 16) * 16;
        if span == 0 {
            return;
        }
        let mut enc = new_encryptor(&self.key, &self.iv);
        let mut offset = 16;
        while offset < 16 + span {
            encrypt_block_in_place(&mut enc, &mut payload[offset..offset + 16]);
            offset += 16;
        }
    }

    /// AVC: walk length-prefixed NAL units, selectively 1-in-10 encrypt slice
    /// NALs larger than 48 bytes, and apply start-code emulation prevention to
    /// every NAL that was touched. Returns a new payload buffer since
    /// emulation-prevention escaping can grow it.
    pub fn encrypt_video(&self, payload: &[u8], nalu_length_size: u8) -> Vec<u8> {
        let len_size = nalu_length_size as usize;
        let mut out = Vec::with_capacity(payload.len());
        let mut pos = 0usize;

        while pos + len_size <= payload.len() {
            let n = read_be_len(&payload[pos..pos + len_size]);
            if len_size + n > payload.len() - pos {
                break;
            }
            let nal_start = pos + len_size;
            let nal = &payload[nal_start..nal_start + n];
            let nalu_type = nal[0] & 0x1F;

            if n > 48 && (nalu_type == 1 || nalu_type == 5) {
                let mut body = nal.to_vec();
                let mut encrypted_span = 16 * ((n - 32) / 16);
                if n % 16 == 0 {
                    encrypted_span -= 16;
                }

                let mut block_offset = 0usize;
                while block_offset < encrypted_span {
                    let start = 32 + block_offset;
                    let mut enc = new_encryptor(&self.key, &self.iv);
                    encrypt_block_in_place(&mut enc, &mut body[start..start + 16]);
                    block_offset += 160;
                }

                let escaped = prevent_start_code_emulation(&body);
                write_be_len(&mut out, escaped.len(), len_size);
                out.extend_from_slice(&escaped);
            } else {
                write_be_len(&mut out, n, len_size);
                out.extend_from_slice(nal);
            }

            pos = nal_start + n;
        }

        out
    }
}

fn read_be_len(bytes: &[u8]) -> usize {
    bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize)
}

fn write_be_len(out: &mut Vec<u8>, value: usize, len_size: usize) {
    for i in (0..len_size).rev() {
        out.push(((value >> (8 * i)) & 0xFF) as u8);
    }
}

/// Inserts `0x03` whenever two consecutive `0x00` bytes are followed by a byte
/// in `{0x00, 0x01, 0x02, 0x03}`, resetting the run counter on insertion.
fn prevent_start_code_emulation(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 32);
    let mut zero_run = 0u8;
    for &b in data {
        if zero_run >= 2 && b <= 0x03 {
            out.push(0x03);
            zero_run = 0;
        }
        out.push(b);
        zero_run = if b == 0 { zero_run + 1 } else { 0 };
    }
    out
}
