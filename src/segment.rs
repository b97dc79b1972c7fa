/// Closed-segment bookkeeping accumulated by the Segmenter and consumed by the
/// playlist writer once the run finishes.
#[derive(Clone, Debug)]
pub struct SegmentRecord {
    pub index: u32,
    pub duration_sec: f64,
    pub byte_size: u64,
    pub byte_offset: u64,
}
