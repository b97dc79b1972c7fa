//! The pull-iterator side of the pipeline. `Mp4TrackSource` adapts the
//! `mp4` crate's track/sample API to the [`Sample`] record the Segmenter
//! drives. The `mp4` crate's reader resolves a fragmented input's moof/traf
//! sample table into the same per-track, by-index sample accessor it uses for
//! a plain `moov`-only file, so one adapter realizes both the fragmented and
//! non-fragmented reader variants rather than duplicating the same walk twice.

mod mp4_track;

pub use mp4_track::Mp4TrackSource;

use crate::error::Result;
use crate::sample::Sample;

/// A thin pull iterator over one enabled track's samples in decode order.
pub trait SampleSource {
    fn next(&mut self) -> Result<Option<Sample>>;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AudioCodec {
    Aac,
    Ac3,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VideoCodec {
    Avc,
}
