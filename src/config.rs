use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::error::{HlsError, Result};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum EncryptionModeArg {
    None,
    Aes128,
    SampleAes,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum IvModeArg {
    Sequence,
    Random,
    Fps,
}

/// Converts an MP4 file into an HLS variant playlist with MPEG-2 TS segments,
/// optionally encrypted with AES-128 or HLS SAMPLE-AES.
#[derive(Parser, Debug)]
#[command(name = "hlsvod", version, about)]
pub struct Args {
    /// Path to the input MP4 file
    #[arg(long)]
    pub input: PathBuf,

    /// Directory segments and the playlist are written into
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Segment filename pattern. Multi-file mode requires exactly one `%d`; single-file mode must be a literal name.
    #[arg(long, default_value = "segment-%d.ts")]
    pub segment_filename: String,

    /// Playlist filename, written inside `output_dir`
    #[arg(long, default_value = "stream.m3u8")]
    pub index_filename: String,

    /// Target segment duration in whole seconds
    #[arg(long, default_value_t = 10)]
    pub target_duration: u32,

    /// Minimum-duration threshold, in milliseconds, below which a cut point is deferred
    #[arg(long, default_value_t = 50)]
    pub threshold_ms: u32,

    /// Concatenate all segments into a single `.ts` file addressed by byte range
    #[arg(long, default_value_t = false)]
    pub single_file: bool,

    /// Width in bytes of the video sample's NAL-unit length prefix
    #[arg(long, default_value_t = 4)]
    pub nalu_length_size: u8,

    #[arg(long, value_enum, default_value_t = EncryptionModeArg::None)]
    pub encryption_mode: EncryptionModeArg,

    #[arg(long, value_enum, default_value_t = IvModeArg::Sequence)]
    pub iv_mode: IvModeArg,

    /// Key material as hex. 32 hex chars (16 bytes) for sequence/random IV mode,
    /// 64 hex chars (32 bytes: key || iv) for fps mode. Required iff encryption is enabled.
    #[arg(long)]
    pub key_hex: Option<String>,

    /// URI written into `#EXT-X-KEY`
    #[arg(long, default_value = "key.bin")]
    pub key_uri: String,

    #[arg(long)]
    pub key_format: Option<String>,

    #[arg(long)]
    pub key_format_versions: Option<String>,

    #[arg(long, default_value_t = 0x1000)]
    pub pmt_pid: u16,

    #[arg(long, default_value_t = 0x101)]
    pub audio_pid: u16,

    #[arg(long, default_value_t = 0x100)]
    pub video_pid: u16,

    /// Explicit HLS playlist version; otherwise computed per the version-selection rules
    #[arg(long)]
    pub playlist_version: Option<u8>,

    /// Increase log verbosity (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EncryptionMode {
    None,
    Aes128,
    SampleAes,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IvMode {
    Sequence,
    Random,
    Fps,
}

/// Key and IV-derivation policy for the whole run. `iv` holds the run-start IV used
/// directly by `Random` mode and as the FPS-derived IV; `Sequence` mode ignores it
/// and recomputes the IV at every segment boundary instead.
#[derive(Clone, Debug)]
pub struct EncryptionState {
    pub mode: EncryptionMode,
    pub iv_mode: IvMode,
    pub key: [u8; 16],
    pub iv: [u8; 16],
}

impl EncryptionState {
    pub fn from_args(mode: EncryptionModeArg, iv_mode: IvModeArg, key_hex: Option<&str>) -> Result<Self> {
        let mode = match mode {
            EncryptionModeArg::None => EncryptionMode::None,
            EncryptionModeArg::Aes128 => EncryptionMode::Aes128,
            EncryptionModeArg::SampleAes => EncryptionMode::SampleAes,
        };
        let iv_mode = match iv_mode {
            IvModeArg::Sequence => IvMode::Sequence,
            IvModeArg::Random => IvMode::Random,
            IvModeArg::Fps => IvMode::Fps,
        };

        if mode == EncryptionMode::None {
            return Ok(Self {
                mode,
                iv_mode,
                key: [0u8; 16],
                iv: [0u8; 16],
            });
        }

        let key_hex = key_hex.ok_or_else(|| {
            HlsError::InvalidInput("--key-hex is required when encryption is enabled".into())
        })?;
        let raw = hex::decode(key_hex)
            .map_err(|e| HlsError::InvalidInput(format!("malformed hex key: {e}")))?;

        let (key, iv) = match iv_mode {
            IvMode::Fps => {
                if raw.len() != 32 {
                    return Err(HlsError::InvalidInput(
                        "fps iv-mode requires a 64 hex char (32 byte) key||iv value".into(),
                    ));
                }
                let mut key = [0u8; 16];
                let mut iv = [0u8; 16];
                key.copy_from_slice(&raw[0..16]);
                iv.copy_from_slice(&raw[16..32]);
                (key, iv)
            }
            IvMode::Sequence | IvMode::Random => {
                if raw.len() != 16 {
                    return Err(HlsError::InvalidInput(
                        "sequence/random iv-mode requires a 32 hex char (16 byte) key".into(),
                    ));
                }
                let mut key = [0u8; 16];
                key.copy_from_slice(&raw);
                let iv = if iv_mode == IvMode::Random {
                    rand::random()
                } else {
                    [0u8; 16]
                };
                (key, iv)
            }
        };

        Ok(Self { mode, iv_mode, key, iv })
    }

    /// The IV for `segment_index`, per `iv_mode`. `Sequence` re-derives it every
    /// segment; `Random` and `Fps` reuse the run-start IV for every segment.
    pub fn iv_for_segment(&self, segment_index: u32) -> [u8; 16] {
        match self.iv_mode {
            IvMode::Sequence => {
                let mut iv = [0u8; 16];
                iv[12..16].copy_from_slice(&segment_index.to_be_bytes());
                iv
            }
            IvMode::Random | IvMode::Fps => self.iv,
        }
    }
}

/// Fully validated, immutable configuration for one run. Built once by the CLI
/// front-end and passed by shared reference into the [`Segmenter`](crate::segmenter::Segmenter).
pub struct RunConfig {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub segment_filename: String,
    pub index_path: PathBuf,
    pub target_duration: u32,
    pub threshold_ms: u32,
    pub single_file: bool,
    pub nalu_length_size: u8,
    pub encryption: EncryptionState,
    pub key_uri: String,
    pub key_format: Option<String>,
    pub key_format_versions: Option<String>,
    pub pmt_pid: u16,
    pub audio_pid: u16,
    pub video_pid: u16,
    pub playlist_version: Option<u8>,
}

impl RunConfig {
    pub fn from_args(args: Args) -> Result<Self> {
        if args.nalu_length_size != 1 && args.nalu_length_size != 2 && args.nalu_length_size != 4 {
            return Err(HlsError::InvalidInput(
                "--nalu-length-size must be 1, 2 or 4".into(),
            ));
        }

        let has_pct_d = args.segment_filename.contains("%d");
        if args.single_file && has_pct_d {
            return Err(HlsError::InvalidInput(
                "single-file segment filename must be a literal name, not a %d pattern".into(),
            ));
        }
        if !args.single_file && !has_pct_d {
            return Err(HlsError::InvalidInput(
                "multi-file segment filename pattern must contain exactly one %d".into(),
            ));
        }

        let encryption =
            EncryptionState::from_args(args.encryption_mode, args.iv_mode, args.key_hex.as_deref())?;

        // Whether this combination is actually supported depends on the input's
        // codecs, which aren't known until the mp4 is opened (see lib::run).

        Ok(Self {
            input: args.input,
            output_dir: args.output_dir.clone(),
            segment_filename: args.segment_filename,
            index_path: args.output_dir.join(args.index_filename),
            target_duration: args.target_duration,
            threshold_ms: args.threshold_ms,
            single_file: args.single_file,
            nalu_length_size: args.nalu_length_size,
            encryption,
            key_uri: args.key_uri,
            key_format: args.key_format,
            key_format_versions: args.key_format_versions,
            pmt_pid: args.pmt_pid,
            audio_pid: args.audio_pid,
            video_pid: args.video_pid,
            playlist_version: args.playlist_version,
        })
    }

    pub fn duration_threshold_secs(&self) -> f64 {
        self.threshold_ms as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args {
            input: PathBuf::from("in.mp4"),
            output_dir: PathBuf::from("."),
            segment_filename: "segment-%d.ts".to_string(),
            index_filename: "stream.m3u8".to_string(),
            target_duration: 10,
            threshold_ms: 50,
            single_file: false,
            nalu_length_size: 4,
            encryption_mode: EncryptionModeArg::None,
            iv_mode: IvModeArg::Sequence,
            key_hex: None,
            key_uri: "key.bin".to_string(),
            key_format: None,
            key_format_versions: None,
            pmt_pid: 0x1000,
            audio_pid: 0x101,
            video_pid: 0x100,
            playlist_version: None,
            verbose: 0,
        }
    }

    #[test]
    fn rejects_bad_nalu_length_size() {
        let mut args = base_args();
        args.nalu_length_size = 3;
        assert!(RunConfig::from_args(args).is_err());
    }

    #[test]
    fn rejects_multi_file_pattern_without_pct_d() {
        let mut args = base_args();
        args.segment_filename = "segment.ts".to_string();
        assert!(RunConfig::from_args(args).is_err());
    }

    #[test]
    fn rejects_single_file_pattern_with_pct_d() {
        let mut args = base_args();
        args.single_file = true;
        args.segment_filename = "segment-%d.ts".to_string();
        assert!(RunConfig::from_args(args).is_err());
    }

    #[test]
    fn accepts_single_file_literal_name() {
        let mut args = base_args();
        args.single_file = true;
        args.segment_filename = "stream.ts".to_string();
        assert!(RunConfig::from_args(args).is_ok());
    }

    #[test]
    fn index_path_joins_output_dir_and_index_filename() {
        let mut args = base_args();
        args.output_dir = PathBuf::from("/tmp/out");
        args.index_filename = "index.m3u8".to_string();
        let config = RunConfig::from_args(args).unwrap();
        assert_eq!(config.index_path, PathBuf::from("/tmp/out/index.m3u8"));
    }

    #[test]
    fn encryption_enabled_requires_key_hex() {
        let mut args = base_args();
        args.encryption_mode = EncryptionModeArg::Aes128;
        assert!(RunConfig::from_args(args).is_err());
    }

    #[test]
    fn aes128_sequence_mode_accepts_32_hex_char_key() {
        let mut args = base_args();
        args.encryption_mode = EncryptionModeArg::Aes128;
        args.key_hex = Some("00112233445566778899aabbccddeeff".chars().take(32).collect());
        let config = RunConfig::from_args(args).unwrap();
        assert_eq!(config.encryption.iv, [0u8; 16]);
    }

    #[test]
    fn fps_mode_rejects_16_byte_key() {
        let mut args = base_args();
        args.encryption_mode = EncryptionModeArg::Aes128;
        args.iv_mode = IvModeArg::Fps;
        args.key_hex = Some("00".repeat(16));
        assert!(RunConfig::from_args(args).is_err());
    }

    #[test]
    fn fps_mode_splits_64_hex_chars_into_key_and_iv() {
        let mut args = base_args();
        args.encryption_mode = EncryptionModeArg::Aes128;
        args.iv_mode = IvModeArg::Fps;
        args.key_hex = Some(format!("{}{}", "11".repeat(16), "22".repeat(16)));
        let config = RunConfig::from_args(args).unwrap();
        assert_eq!(config.encryption.key, [0x11u8; 16]);
        assert_eq!(config.encryption.iv, [0x22u8; 16]);
    }

    #[test]
    fn sequence_iv_mode_derives_iv_from_segment_index() {
        let state = EncryptionState {
            mode: EncryptionMode::Aes128,
            iv_mode: IvMode::Sequence,
            key: [0u8; 16],
            iv: [0u8; 16],
        };
        let iv = state.iv_for_segment(7);
        assert_eq!(&iv[12..16], &7u32.to_be_bytes());
        assert_eq!(&iv[0..12], &[0u8; 12]);
    }

    #[test]
    fn random_iv_mode_reuses_run_start_iv_across_segments() {
        let state = EncryptionState {
            mode: EncryptionMode::Aes128,
            iv_mode: IvMode::Random,
            key: [0u8; 16],
            iv: [0x42u8; 16],
        };
        assert_eq!(state.iv_for_segment(0), [0x42u8; 16]);
        assert_eq!(state.iv_for_segment(5), [0x42u8; 16]);
    }
}
