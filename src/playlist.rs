//! C5: turns the closed-segment list and run configuration into the
//! `.m3u8` text. Pure and stateless — everything it needs is
//! already known once the Segmenter finishes, so this is a straight
//! text-formatting pass rather than another state machine.
//!
//! Written by hand rather than through `m3u8-rs`'s writer: the exact header
//! tag order, CRLF line endings, half-up integer rounding below version 3,
//! and the `IV=`/`KEYFORMAT` attribute set this format requires aren't all
//! things that crate's `MediaPlaylist::write_to` exposes control over (see
//! DESIGN.md). `m3u8-rs` is still useful on the reading side — tests below
//! parse the output back with it to check it's well-formed HLS.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::config::{EncryptionMode, IvMode, RunConfig};
use crate::error::{HlsError, Result};
use crate::segment::SegmentRecord;

/// Writes `path` with the playlist for `records`, per the run's configuration.
pub fn write_playlist(path: &Path, config: &RunConfig, records: &[SegmentRecord]) -> Result<()> {
    let text = render(config, records);
    let mut f = File::create(path).map_err(HlsError::IoFailure)?;
    f.write_all(text.as_bytes()).map_err(HlsError::IoFailure)?;
    Ok(())
}

fn render(config: &RunConfig, records: &[SegmentRecord]) -> String {
    let version = resolve_version(config);
    let target_duration = records
        .iter()
        .map(|r| round_half_up(r.duration_sec))
        .max()
        .unwrap_or(0);

    let mut out = String::new();
    out.push_str("#EXTM3U\r\n");
    if version != 1 {
        out.push_str(&format!("#EXT-X-VERSION:{version}\r\n"));
    }
    out.push_str("#EXT-X-PLAYLIST-TYPE:VOD\r\n");
    out.push_str("#EXT-X-INDEPENDENT-SEGMENTS\r\n");
    out.push_str(&format!("#EXT-X-TARGETDURATION:{target_duration}\r\n"));
    out.push_str("#EXT-X-MEDIA-SEQUENCE:0\r\n");

    if config.encryption.mode != EncryptionMode::None {
        out.push_str(&key_line(config));
    }

    for r in records {
        let duration_field = if version >= 3 {
            format!("{:.3}", r.duration_sec)
        } else {
            round_half_up(r.duration_sec).to_string()
        };
        out.push_str(&format!("#EXTINF:{duration_field},\r\n"));
        if config.single_file {
            out.push_str(&format!("#EXT-X-BYTERANGE:{}@{}\r\n", r.byte_size, r.byte_offset));
        }
        out.push_str(&segment_url(config, r.index));
        out.push_str("\r\n");
    }

    out.push_str("#EXT-X-ENDLIST\r\n");
    out
}

fn segment_url(config: &RunConfig, index: u32) -> String {
    if config.single_file {
        config.segment_filename.clone()
    } else {
        config.segment_filename.replacen("%d", &index.to_string(), 1)
    }
}

fn key_line(config: &RunConfig) -> String {
    let method = match config.encryption.mode {
        EncryptionMode::Aes128 => "AES-128",
        EncryptionMode::SampleAes => "SAMPLE-AES",
        EncryptionMode::None => unreachable!("caller only invokes key_line when encryption is enabled"),
    };

    let mut line = format!("#EXT-X-KEY:METHOD={method},URI=\"{}\"", config.key_uri);
    if config.encryption.iv_mode == IvMode::Random {
        line.push_str(&format!(",IV=0x{}", hex::encode_upper(config.encryption.iv)));
    }
    if let Some(fmt) = &config.key_format {
        line.push_str(&format!(",KEYFORMAT=\"{fmt}\""));
    }
    if let Some(v) = &config.key_format_versions {
        line.push_str(&format!(",KEYFORMATVERSIONS=\"{v}\""));
    }
    line.push_str("\r\n");
    line
}

/// Version selection: an explicit `--playlist-version` is honored but
/// bumped upward (with a warning) if the feature set requires a higher
/// floor; otherwise the floor is picked directly.
fn resolve_version(config: &RunConfig) -> u8 {
    let needs_v5 = config.encryption.mode == EncryptionMode::SampleAes
        || config.key_format.is_some()
        || config.key_format_versions.is_some();
    let needs_v4 = config.single_file;

    match config.playlist_version {
        Some(user_v) => {
            if needs_v5 && user_v < 5 {
                tracing::warn!(
                    requested = user_v,
                    "bumping playlist version to 5: SAMPLE-AES/KEYFORMAT requires it"
                );
                5
            } else if needs_v4 && user_v < 4 {
                tracing::warn!(
                    requested = user_v,
                    "bumping playlist version to 4: single-file byte ranges require it"
                );
                4
            } else {
                user_v
            }
        }
        None => {
            if needs_v5 {
                5
            } else if needs_v4 {
                4
            } else {
                3
            }
        }
    }
}

fn round_half_up(x: f64) -> u64 {
    (x + 0.5).floor() as u64
}
