//! Internal MPEG-2 Transport Stream writer: PAT/PMT/PES packetization,
//! continuity counters, and PCR insertion. No published crate in the corpus
//! exposes a write-side API that can express the private SAMPLE-AES stream
//! types and descriptor byte strings this tool needs (see DESIGN.md), so it
//! is grounded directly on the MPEG-2 systems layer instead of on a muxing
//! crate, serialized with `byteorder`.

mod crc;
pub mod descriptor;
mod pes;

use std::io::Write;

use byteorder::{BigEndian, WriteBytesExt};

use crate::error::Result;

pub const TS_PACKET_SIZE: usize = 188;
const SYNC_BYTE: u8 = 0x47;
const PAT_PID: u16 = 0x0000;

pub const STREAM_TYPE_AVC: u8 = 0x1B;
pub const STREAM_TYPE_AAC_ADTS: u8 = 0x0F;
pub const STREAM_TYPE_AC3: u8 = 0x81;
pub const STREAM_TYPE_AVC_SAMPLE_AES: u8 = 0xDB;
pub const STREAM_TYPE_AAC_SAMPLE_AES: u8 = 0xCF;
pub const STREAM_TYPE_AC3_SAMPLE_AES: u8 = 0xC1;

const STREAM_ID_VIDEO: u8 = 0xE0;
const STREAM_ID_AUDIO: u8 = 0xC0;

#[derive(Clone)]
pub struct EsStream {
    pub pid: u16,
    pub stream_type: u8,
    pub stream_id: u8,
    pub descriptor: Vec<u8>,
}

/// Writes one program's PAT/PMT and PES-packetized samples for a single audio
/// and/or video elementary stream. Continuity counters are tracked per PID for
/// the lifetime of the writer, matching one open TS segment.
pub struct TsMuxer {
    pmt_pid: u16,
    audio: Option<EsStream>,
    video: Option<EsStream>,
    cc: std::collections::HashMap<u16, u8>,
}

impl TsMuxer {
    pub fn new(pmt_pid: u16) -> Self {
        Self {
            pmt_pid,
            audio: None,
            video: None,
            cc: std::collections::HashMap::new(),
        }
    }

    pub fn set_audio_stream(&mut self, stream_type: u8, pid: u16, extra_descriptor: Vec<u8>) {
        self.audio = Some(EsStream {
            pid,
            stream_type,
            stream_id: STREAM_ID_AUDIO,
            descriptor: extra_descriptor,
        });
    }

    pub fn set_video_stream(&mut self, stream_type: u8, pid: u16, extra_descriptor: Vec<u8>) {
        self.video = Some(EsStream {
            pid,
            stream_type,
            stream_id: STREAM_ID_VIDEO,
            descriptor: extra_descriptor,
        });
    }

    fn pcr_pid(&self) -> u16 {
        self.video
            .as_ref()
            .or(self.audio.as_ref())
            .map(|s| s.pid)
            .unwrap_or(PAT_PID)
    }

    pub fn write_pat<W: Write>(&mut self, sink: &mut W) -> Result<()> {
        let mut section = Vec::new();
        section.write_u16::<BigEndian>(1)?; // transport_stream_id
        section.push(0xC1); // reserved(2) + version_number(5)=0 + current_next_indicator(1)=1
        section.push(0x00); // section_number
        section.push(0x00); // last_section_number
        section.write_u16::<BigEndian>(1)?; // program_number
        section.write_u16::<BigEndian>(0xE000 | self.pmt_pid)?; // reserved(3) + program_map_PID

        let table = build_psi_section(0x00, &section);
        self.write_psi_packet(PAT_PID, &table, sink)
    }

    pub fn write_pmt<W: Write>(&mut self, sink: &mut W) -> Result<()> {
        let mut section = Vec::new();
        section.write_u16::<BigEndian>(1)?; // program_number
        section.push(0xC1); // reserved + version + current_next
        section.push(0x00); // section_number
        section.push(0x00); // last_section_number
        section.write_u16::<BigEndian>(0xE000 | self.pcr_pid())?; // reserved(3) + PCR_PID
        section.write_u16::<BigEndian>(0xF000)?; // reserved(4) + program_info_length(0)

        for stream in [&self.video, &self.audio].into_iter().flatten() {
            section.push(stream.stream_type);
            section.write_u16::<BigEndian>(0xE000 | stream.pid)?;
            let es_info_len = stream.descriptor.len() as u16;
            section.write_u16::<BigEndian>(0xF000 | es_info_len)?;
            section.extend_from_slice(&stream.descriptor);
        }

        let table = build_psi_section(0x02, &section);
        self.write_psi_packet(self.pmt_pid, &table, sink)
    }

    fn write_psi_packet<W: Write>(&mut self, pid: u16, section: &[u8], sink: &mut W) -> Result<()> {
        let mut payload = Vec::with_capacity(section.len() + 1);
        payload.push(0x00); // pointer_field
        payload.extend_from_slice(section);
        write_pes_like_payload(pid, &mut self.cc, true, None, &payload, sink)
    }

    pub fn write_audio_sample<W: Write>(
        &mut self,
        payload: &[u8],
        pts: i64,
        dts: i64,
        timescale: u32,
        with_pcr: bool,
        sink: &mut W,
    ) -> Result<()> {
        let stream = self.audio.clone().expect("audio stream not configured");
        self.write_es_sample(&stream, payload, pts, dts, timescale, with_pcr, sink)
    }

    pub fn write_video_sample<W: Write>(
        &mut self,
        payload: &[u8],
        pts: i64,
        dts: i64,
        timescale: u32,
        with_pcr: bool,
        sink: &mut W,
    ) -> Result<()> {
        let stream = self.video.clone().expect("video stream not configured");
        self.write_es_sample(&stream, payload, pts, dts, timescale, with_pcr, sink)
    }

    fn write_es_sample<W: Write>(
        &mut self,
        stream: &EsStream,
        payload: &[u8],
        pts: i64,
        dts: i64,
        timescale: u32,
        with_pcr: bool,
        sink: &mut W,
    ) -> Result<()> {
        let pes = pes::build_pes_packet(stream.stream_id, pts, dts, timescale, payload);
        let pcr = with_pcr.then(|| pcr_from_dts(dts, timescale));
        write_pes_like_payload(stream.pid, &mut self.cc, true, pcr, &pes, sink)
    }
}

fn pcr_from_dts(dts: i64, timescale: u32) -> u64 {
    let ts_90k = (dts as i128 * 90_000 / timescale as i128) as u64;
    ts_90k * 300
}

fn build_psi_section(table_id: u8, body_after_length: &[u8]) -> Vec<u8> {
    // body_after_length excludes table_id/section_length but includes everything
    // up to (not including) the CRC, which we compute and append here.
    let section_length = body_after_length.len() as u16 + 4; // + CRC32
    let mut section = Vec::with_capacity(3 + body_after_length.len() + 4);
    section.push(table_id);
    section.push(0xB0 | ((section_length >> 8) as u8 & 0x0F)); // section_syntax_indicator=1, reserved
    section.push((section_length & 0xFF) as u8);
    section.extend_from_slice(body_after_length);
    let crc = crc::crc32_mpeg2(&section);
    section
        .write_u32::<BigEndian>(crc)
        .expect("writing to a Vec<u8> cannot fail");
    section
}

/// Splits `payload` (a PSI section prefixed with pointer_field, or a PES
/// packet) into 188-byte TS packets on `pid`, setting `payload_unit_start`,
/// adaptation-field stuffing, and an optional PCR on the first packet.
fn write_pes_like_payload<W: Write>(
    pid: u16,
    cc_table: &mut std::collections::HashMap<u16, u8>,
    pusi: bool,
    pcr: Option<u64>,
    payload: &[u8],
    sink: &mut W,
) -> Result<()> {
    let mut offset = 0usize;
    let mut first = true;

    while offset < payload.len() || first {
        let cc = cc_table.entry(pid).or_insert(0);
        let mut packet = Vec::with_capacity(TS_PACKET_SIZE);
        packet.push(SYNC_BYTE);

        let pusi_bit = if first && pusi { 0x40 } else { 0x00 };
        packet.push(pusi_bit | ((pid >> 8) as u8 & 0x1F));
        packet.push((pid & 0xFF) as u8);

        let want_pcr = first && pcr.is_some();
        let remaining = payload.len() - offset;
        let header_room = if want_pcr { 188 - 4 - 8 } else { 188 - 4 };
        let payload_room = header_room.min(remaining);
        let needs_stuffing = payload_room < header_room;

        let afc: u8 = if want_pcr || needs_stuffing { 0x30 } else { 0x10 };
        packet.push(afc | *cc);
        *cc = (*cc + 1) & 0x0F;

        if want_pcr || needs_stuffing {
            let adaptation_len_pos = packet.len();
            packet.push(0); // placeholder, patched below
            let flags_byte = if want_pcr { 0x10 } else { 0x00 };
            packet.push(flags_byte);
            let mut af_len = 1u8; // the flags byte itself

            if let Some(pcr_val) = pcr.filter(|_| want_pcr) {
                let base = pcr_val / 300;
                let ext = (pcr_val % 300) as u16;
                packet.write_u32::<BigEndian>((base >> 1) as u32)?;
                let last_base_bit = ((base & 1) as u8) << 7;
                packet.push(last_base_bit | 0x7E | ((ext >> 8) as u8 & 0x01));
                packet.push((ext & 0xFF) as u8);
                af_len += 6;
            }

            let used_so_far = 4 + 1 + (af_len as usize);
            let stuffing = TS_PACKET_SIZE.saturating_sub(used_so_far + payload_room);
            for _ in 0..stuffing {
                packet.push(0xFF);
            }
            af_len += stuffing as u8;
            packet[adaptation_len_pos] = af_len;
        }

        packet.extend_from_slice(&payload[offset..offset + payload_room]);
        offset += payload_room;

        debug_assert_eq!(packet.len(), TS_PACKET_SIZE);
        sink.write_all(&packet)?;
        first = false;
    }

    Ok(())
}
