//! C4: one open TS segment. Owns a fresh [`TsMuxer`] — continuity counters
//! restart at every segment, matching independently addressable HLS segment
//! files — paired with the byte sink it writes through, optionally wrapped in
//! AES-128-CBC.

use std::fs::File;
use std::io::{self, Seek, Write};

use crate::cipher::Aes128Sink;
use crate::error::{HlsError, Result};
use crate::ts::TsMuxer;

enum CipherWriter {
    Plain(File),
    Cbc(Aes128Sink<File>),
}

impl Write for CipherWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            CipherWriter::Plain(f) => f.write(buf),
            CipherWriter::Cbc(s) => {
                s.write(buf)
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
                Ok(buf.len())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            CipherWriter::Plain(f) => f.flush(),
            CipherWriter::Cbc(s) => s
                .flush()
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string())),
        }
    }
}

pub struct SegmentSink {
    muxer: TsMuxer,
    writer: CipherWriter,
}

impl SegmentSink {
    pub fn new_plain(pmt_pid: u16, file: File) -> Self {
        Self {
            muxer: TsMuxer::new(pmt_pid),
            writer: CipherWriter::Plain(file),
        }
    }

    pub fn new_encrypted(pmt_pid: u16, file: File, key: &[u8; 16], iv: &[u8; 16]) -> Self {
        Self {
            muxer: TsMuxer::new(pmt_pid),
            writer: CipherWriter::Cbc(Aes128Sink::new(file, key, iv)),
        }
    }

    pub fn set_audio_stream(&mut self, stream_type: u8, pid: u16, extra_descriptor: Vec<u8>) {
        self.muxer.set_audio_stream(stream_type, pid, extra_descriptor);
    }

    pub fn set_video_stream(&mut self, stream_type: u8, pid: u16, extra_descriptor: Vec<u8>) {
        self.muxer.set_video_stream(stream_type, pid, extra_descriptor);
    }

    pub fn write_pat(&mut self) -> Result<()> {
        self.muxer.write_pat(&mut self.writer)
    }

    pub fn write_pmt(&mut self) -> Result<()> {
        self.muxer.write_pmt(&mut self.writer)
    }

    pub fn write_audio_sample(
        &mut self,
        payload: &[u8],
        pts: i64,
        dts: i64,
        timescale: u32,
        with_pcr: bool,
    ) -> Result<()> {
        self.muxer
            .write_audio_sample(payload, pts, dts, timescale, with_pcr, &mut self.writer)
    }

    pub fn write_video_sample(
        &mut self,
        payload: &[u8],
        pts: i64,
        dts: i64,
        timescale: u32,
        with_pcr: bool,
    ) -> Result<()> {
        self.muxer
            .write_video_sample(payload, pts, dts, timescale, with_pcr, &mut self.writer)
    }

    /// Flushes pending writes — padding the trailing cipher block for
    /// AES-128 — and returns the underlying file handle (reused across
    /// segments in single-file mode) plus the byte count written by this
    /// sink instance: ciphertext length for AES-128, raw file position
    /// otherwise.
    pub fn close(self) -> Result<(File, u64)> {
        match self.writer {
            CipherWriter::Plain(mut f) => {
                f.flush().map_err(HlsError::IoFailure)?;
                let pos = f.stream_position().map_err(HlsError::IoFailure)?;
                Ok((f, pos))
            }
            CipherWriter::Cbc(s) => {
                let size = s.size();
                let f = s.close()?;
                Ok((f, size))
            }
        }
    }
}
