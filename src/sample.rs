/// One decode-order audio or video access unit pulled from a [`SampleSource`](crate::source::SampleSource).
///
/// Immutable for the lifetime of the pipeline's handling of it: produced on demand
/// by C1, consumed and discarded by C4 once written (or dropped on error).
#[derive(Clone, Debug)]
pub struct Sample {
    pub dts: i64,
    pub pts: i64,
    pub timescale: u32,
    /// Always `true` for audio. For video, whether this is an IDR/sync sample.
    pub is_sync: bool,
    pub description_index: u32,
    pub payload: Vec<u8>,
}

impl Sample {
    /// Presentation/decode time expressed in seconds, using `dts` as the merge-loop clock.
    pub fn dts_secs(&self) -> f64 {
        self.dts as f64 / self.timescale as f64
    }
}
