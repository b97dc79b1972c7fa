//! PMT elementary-stream descriptors. Plain AVC/AAC/AC-3 streams
//! carry no extra descriptor. HLS SAMPLE-AES streams carry a private MPEG-2
//! registration_descriptor (tag 0x05) identifying the bitstream format, and
//! for audio, embedding the raw `AudioSpecificConfig` a decoder needs once
//! ADTS framing may be partially encrypted.

use crate::config::EncryptionMode;
use crate::error::{HlsError, Result};
use crate::source::{AudioCodec, VideoCodec};
use crate::ts::{
    STREAM_TYPE_AAC_ADTS, STREAM_TYPE_AAC_SAMPLE_AES, STREAM_TYPE_AC3, STREAM_TYPE_AC3_SAMPLE_AES,
    STREAM_TYPE_AVC, STREAM_TYPE_AVC_SAMPLE_AES,
};

const TAG_REGISTRATION: u8 = 0x05;

fn registration_descriptor(format_identifier: &[u8; 4], additional: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + 4 + additional.len());
    out.push(TAG_REGISTRATION);
    out.push((4 + additional.len()) as u8);
    out.extend_from_slice(format_identifier);
    out.extend_from_slice(additional);
    out
}

pub fn stream_type_audio(codec: AudioCodec, mode: EncryptionMode) -> u8 {
    match (codec, mode) {
        (AudioCodec::Aac, EncryptionMode::SampleAes) => STREAM_TYPE_AAC_SAMPLE_AES,
        (AudioCodec::Aac, _) => STREAM_TYPE_AAC_ADTS,
        (AudioCodec::Ac3, EncryptionMode::SampleAes) => STREAM_TYPE_AC3_SAMPLE_AES,
        (AudioCodec::Ac3, _) => STREAM_TYPE_AC3,
    }
}

pub fn stream_type_video(_codec: VideoCodec, mode: EncryptionMode) -> u8 {
    match mode {
        EncryptionMode::SampleAes => STREAM_TYPE_AVC_SAMPLE_AES,
        _ => STREAM_TYPE_AVC,
    }
}

/// `zavc` registration descriptor for SAMPLE-AES video; empty otherwise.
pub fn video_descriptor(codec: VideoCodec, mode: EncryptionMode) -> Result<Vec<u8>> {
    match (codec, mode) {
        (VideoCodec::Avc, EncryptionMode::SampleAes) => Ok(registration_descriptor(b"zavc", &[])),
        _ => Ok(Vec::new()),
    }
}

/// `zaac` registration descriptor for SAMPLE-AES AAC audio, carrying a
/// priming/version/setup_data block so the decoder can recover the
/// `AudioSpecificConfig` bytes. AC-3 + SAMPLE-AES is an explicit error —
/// "not fully implemented" in the source tool, kept as a hard failure here
/// rather than guessed at.
pub fn audio_descriptor(codec: AudioCodec, mode: EncryptionMode, decoder_config: &[u8]) -> Result<Vec<u8>> {
    match (codec, mode) {
        (AudioCodec::Aac, EncryptionMode::SampleAes) => {
            if decoder_config.len() > 0xFF {
                return Err(HlsError::DecoderConfigParseFailure(
                    "AudioSpecificConfig too large to embed in a registration descriptor".into(),
                ));
            }
            let mut additional = Vec::with_capacity(4 + decoder_config.len());
            additional.extend_from_slice(&0u16.to_be_bytes()); // priming
            additional.push(0x01); // version
            additional.push(decoder_config.len() as u8); // setup_data_length
            additional.extend_from_slice(decoder_config);
            Ok(registration_descriptor(b"zaac", &additional))
        }
        (AudioCodec::Ac3, EncryptionMode::SampleAes) => Err(HlsError::UnsupportedCombination(
            "SAMPLE-AES with AC-3 audio is not implemented".into(),
        )),
        _ => Ok(Vec::new()),
    }
}
