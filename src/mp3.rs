/*
    himd-rs
    https://github.com/himd-rs/himd

    Copyright 2026 The himd-rs contributors

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------
*/

//! MP3 ingest: scan a complete MP3 buffer frame by frame, pack the frames
//! into `SMPA` buckets and derive the aggregated codec descriptor.
//!
//! Field values in [`Mp3Frame`] are the raw MPEG header bit patterns
//! (version 3 is MPEG-1, layer 1 is Layer III), because those same patterns
//! are what the track descriptor stores.

use bitflags::bitflags;

use crate::block::{AudioBlock, BlockType};
use crate::codecinfo::{self, Codec};
use crate::{HimdError, HIMD_AUDIO_SIZE};

/// Base sample rates addressed by the header rate index, before the version
/// divider.
const BASE_RATES: [u32; 3] = [44100, 48000, 32000];

bitflags! {
    /// Variability flag byte of an MPEG codec descriptor. The high bit marks
    /// the descriptor valid; the rest record parameters that changed between
    /// frames.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct Mp3Flags: u8 {
        const VALID                 = 0b1000_0000;
        const VARIABLE_VERSION      = 0b0100_0000;
        const VARIABLE_LAYER        = 0b0010_0000;
        const VARIABLE_BITRATE      = 0b0001_0000;
        const VARIABLE_SAMPLE_RATE  = 0b0000_1000;
        const VARIABLE_CHANNEL_MODE = 0b0000_0100;
        const VARIABLE_PREEMPHASIS  = 0b0000_0010;
    }
}

/// One parsed MPEG audio frame.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Mp3Frame {
    pub offset: usize,
    pub byte_length: usize,
    pub sample_length: u32,
    pub version: u8,
    pub layer: u8,
    pub bitrate_index: u8,
    pub sample_rate_index: u8,
    pub channel_mode: u8,
    pub preemphasis: u8,
}

/// Parse the 4-byte MPEG frame header at `offset`, if one is there.
fn parse_frame_header(data: &[u8], offset: usize) -> Option<Mp3Frame> {
    let header = data.get(offset..offset + 4)?;
    if header[0] != 0xFF || header[1] & 0xE0 != 0xE0 {
        return None;
    }
    let version = (header[1] >> 3) & 0x3;
    let layer = (header[1] >> 1) & 0x3;
    let bitrate_index = header[2] >> 4;
    let sample_rate_index = (header[2] >> 2) & 0x3;
    let padding = (header[2] >> 1) & 0x1;
    let channel_mode = header[3] >> 6;
    let preemphasis = header[3] & 0x3;
    if version == 1 || layer == 0 || bitrate_index == 0 || bitrate_index == 15 {
        // Reserved version or layer, free-format or reserved bitrate.
        return None;
    }
    if sample_rate_index as usize >= BASE_RATES.len() {
        return None;
    }

    let info3 = (version << 6) | (layer << 4) | bitrate_index;
    let probe = [3, 0, 0, info3, sample_rate_index << 6];
    let kbps = codecinfo::mpeg_kbps(&probe);
    let sample_rate = codecinfo::sample_rate(Codec::Mpeg, &probe);
    if kbps == 0 || sample_rate == 0 {
        return None;
    }

    let sample_length: u32 = match (version, layer) {
        (_, 3) => 384,
        (3, _) => 1152,
        (_, 2) => 1152,
        (_, _) => 576,
    };
    let pad_bytes = padding as u32 * if layer == 3 { 4 } else { 1 };
    let byte_length = (sample_length / 8 * kbps * 1000 / sample_rate + pad_bytes) as usize;
    if byte_length < 4 {
        return None;
    }

    Some(Mp3Frame {
        offset,
        byte_length,
        sample_length,
        version,
        layer,
        bitrate_index,
        sample_rate_index,
        channel_mode,
        preemphasis,
    })
}

/// Iterator over the MPEG frames of a buffer. Leading ID3v2 tags are skipped
/// and sync is re-acquired across junk spans.
pub struct FrameScanner<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> FrameScanner<'a> {
    pub fn new(data: &'a [u8]) -> FrameScanner<'a> {
        let mut pos = 0;
        if data.len() >= 10 && &data[..3] == b"ID3" {
            let size = ((data[6] as usize & 0x7F) << 21)
                | ((data[7] as usize & 0x7F) << 14)
                | ((data[8] as usize & 0x7F) << 7)
                | (data[9] as usize & 0x7F);
            pos = 10 + size;
            log::debug!("FrameScanner: skipping {} byte ID3v2 tag", pos);
        }
        FrameScanner { data, pos }
    }
}

impl Iterator for FrameScanner<'_> {
    type Item = Mp3Frame;

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos + 4 <= self.data.len() {
            if let Some(frame) = parse_frame_header(self.data, self.pos) {
                self.pos = frame.offset + frame.byte_length;
                return Some(frame);
            }
            self.pos += 1;
        }
        None
    }
}

/// The result of scanning one MP3 file: unobfuscated `SMPA` blocks plus the
/// aggregated descriptor. The caller patches in the content id and applies
/// the XOR key before the blocks reach the disc.
pub struct Mp3Ingest {
    pub blocks: Vec<AudioBlock>,
    pub codec_info: [u8; 5],
    pub frame_count: u32,
    pub duration_seconds: u32,
    pub total_bytes: usize,
}

/// Effective frequency of a rate index; index 1 (48 kHz) ranks highest.
fn base_rate(index: u8) -> u32 {
    BASE_RATES[index as usize]
}

/// Accumulates frames into blocks below the payload capacity.
#[derive(Default)]
struct Bucketizer {
    blocks: Vec<AudioBlock>,
    bucket: Vec<u8>,
    bucket_frames: u16,
    serial: u32,
    total_bytes: usize,
}

impl Bucketizer {
    fn push(&mut self, raw: &[u8]) -> Result<(), HimdError> {
        if self.bucket.len() + raw.len() >= HIMD_AUDIO_SIZE {
            self.flush()?;
        }
        self.bucket.extend_from_slice(raw);
        self.bucket_frames += 1;
        self.total_bytes += raw.len();
        Ok(())
    }

    fn flush(&mut self) -> Result<(), HimdError> {
        if self.bucket.is_empty() {
            return Ok(());
        }
        self.serial += 1;
        let block = AudioBlock::new(
            BlockType::Smpa,
            self.bucket_frames,
            self.bucket.len() as u16,
            self.serial,
            [0; 8],
            [0; 8],
            &self.bucket,
            0,
        )?;
        self.blocks.push(block);
        self.bucket.clear();
        self.bucket_frames = 0;
        Ok(())
    }
}

pub fn ingest(data: &[u8]) -> Result<Mp3Ingest, HimdError> {
    let mut scanner = FrameScanner::new(data);
    let first = scanner
        .next()
        .ok_or_else(|| HimdError::IoError("no MPEG audio frames found in input".into()))?;

    let mut flags = Mp3Flags::VALID;
    // The aggregate starts from the first frame and widens: version and
    // layer take the minimum raw value, the bitrate index the maximum, and
    // the sample rate the index of the lowest frequency seen.
    let mut agg = first;
    let mut total_samples: u64 = first.sample_length as u64;
    let mut frame_count: u32 = 1;

    let mut buckets = Bucketizer::default();
    let frame_bytes = |frame: &Mp3Frame| -> Result<&[u8], HimdError> {
        data.get(frame.offset..frame.offset + frame.byte_length)
            .ok_or(HimdError::FrameOutOfRange)
    };
    buckets.push(frame_bytes(&first)?)?;

    for frame in scanner {
        if frame.version != first.version {
            flags |= Mp3Flags::VARIABLE_VERSION;
            agg.version = agg.version.min(frame.version);
        }
        if frame.layer != first.layer {
            flags |= Mp3Flags::VARIABLE_LAYER;
            agg.layer = agg.layer.min(frame.layer);
        }
        if frame.bitrate_index != first.bitrate_index {
            flags |= Mp3Flags::VARIABLE_BITRATE;
            agg.bitrate_index = agg.bitrate_index.max(frame.bitrate_index);
        }
        if frame.sample_rate_index != first.sample_rate_index {
            flags |= Mp3Flags::VARIABLE_SAMPLE_RATE;
            if base_rate(frame.sample_rate_index) < base_rate(agg.sample_rate_index) {
                agg.sample_rate_index = frame.sample_rate_index;
            }
        }
        if frame.channel_mode != first.channel_mode {
            flags |= Mp3Flags::VARIABLE_CHANNEL_MODE;
        }
        if frame.preemphasis != first.preemphasis {
            flags |= Mp3Flags::VARIABLE_PREEMPHASIS;
        }
        total_samples += frame.sample_length as u64;
        frame_count += 1;
        buckets.push(frame_bytes(&frame)?)?;
    }
    buckets.flush()?;

    let codec_info = [
        3,
        0,
        flags.bits(),
        (agg.version << 6) | (agg.layer << 4) | agg.bitrate_index,
        (agg.sample_rate_index << 6) | (agg.channel_mode << 4) | (agg.preemphasis << 2),
    ];
    let duration_seconds =
        ((total_samples + base_rate(agg.sample_rate_index) as u64 / 2)
            / base_rate(agg.sample_rate_index) as u64) as u32;

    Ok(Mp3Ingest {
        blocks: buckets.blocks,
        codec_info,
        frame_count,
        duration_seconds,
        total_bytes: buckets.total_bytes,
    })
}
