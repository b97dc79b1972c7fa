//! Converts a single-audio/single-video ISO-BMFF (MP4) input into an HLS
//! Variant Playlist of MPEG-2 TS segments, optionally encrypted with AES-128
//! or HLS SAMPLE-AES. The binary entry point lives in
//! `src/bin/hlsvod.rs`; this crate is the pipeline itself so it can be
//! exercised directly from tests.

pub mod cipher;
pub mod config;
pub mod error;
pub mod playlist;
pub mod sample;
pub mod segment;
pub mod segmenter;
pub mod sink;
pub mod source;
pub mod ts;

use config::{EncryptionMode, RunConfig};
use error::{HlsError, Result};
use segment::SegmentRecord;
use source::{AudioCodec, Mp4TrackSource, SampleSource};

/// Runs the whole pipeline end to end for one input: opens it, drives C1-C4
/// through the [`segmenter::Segmenter`], and writes the playlist only after
/// every sample has been consumed successfully — a failed run leaves no
/// `.m3u8`.
pub fn run(config: &RunConfig) -> Result<Vec<SegmentRecord>> {
    std::fs::create_dir_all(&config.output_dir).map_err(HlsError::IoFailure)?;

    let audio = Mp4TrackSource::open_audio(&config.input)?;
    let video = Mp4TrackSource::open_video(&config.input)?;

    if audio.is_none() && video.is_none() {
        return Err(HlsError::InvalidInput(
            "input has no audio or video track".into(),
        ));
    }

    if config.encryption.mode == EncryptionMode::SampleAes {
        if let Some((_, codec)) = &audio {
            if *codec != AudioCodec::Aac {
                return Err(HlsError::UnsupportedCombination(
                    "SAMPLE-AES requires AAC audio".into(),
                ));
            }
        }
    }

    let audio_decoder_config = match &audio {
        Some((_, AudioCodec::Aac)) if config.encryption.mode == EncryptionMode::SampleAes => {
            Some(source::audio_decoder_config_bytes(&config.input)?)
        }
        _ => None,
    };

    let audio: Option<(Box<dyn SampleSource>, AudioCodec)> =
        audio.map(|(source, codec)| (Box::new(source) as Box<dyn SampleSource>, codec));
    let video: Option<(Box<dyn SampleSource>, source::VideoCodec)> =
        video.map(|(source, codec)| (Box::new(source) as Box<dyn SampleSource>, codec));

    let segmenter = segmenter::Segmenter::new(config, audio, video, audio_decoder_config)?;
    let records = segmenter.run()?;

    playlist::write_playlist(&config.index_path, config, &records)?;

    tracing::info!(
        segments = records.len(),
        index = %config.index_path.display(),
        "wrote hls playlist"
    );

    Ok(records)
}
