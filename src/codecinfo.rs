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

//! Codec descriptor math.
//!
//! A track stores a one-byte codec id and a five-byte `codec_info` tuple.
//! Codec id 1 is overloaded: it means ATRAC3+ unless the low two bits of
//! `codec_info[0]` are both set, in which case the track is MPEG audio. All
//! seeking, duration and block-sizing math derives from these six bytes.

use crate::{HimdError, HIMD_AUDIO_SIZE};

pub const CODEC_ATRAC3: u8 = 0x00;
pub const CODEC_ATRAC3PLUS_OR_MPEG: u8 = 0x01;
pub const CODEC_LPCM: u8 = 0x80;

/// Sample rates addressed by the ATRAC descriptor's rate index.
const ATRAC_RATES: [u32; 5] = [32000, 44100, 48000, 88200, 96000];
/// Base sample rates addressed by the MPEG descriptor's rate index.
const MPEG_RATES: [u32; 3] = [44100, 48000, 32000];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Codec {
    Atrac3,
    Atrac3Plus,
    Mpeg,
    Lpcm,
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Codec::Atrac3 => write!(f, "ATRAC3"),
            Codec::Atrac3Plus => write!(f, "ATRAC3+"),
            Codec::Mpeg => write!(f, "MPEG"),
            Codec::Lpcm => write!(f, "LPCM"),
        }
    }
}

/// Codec id 1 carries MPEG audio when the low two bits of the first
/// descriptor byte are both set.
pub fn is_mpeg(codec_info: &[u8; 5]) -> bool {
    codec_info[0] & 0b11 == 0b11
}

/// Resolve the stored codec id / descriptor pair.
pub fn codec_from_raw(codec_id: u8, codec_info: &[u8; 5]) -> Result<Codec, HimdError> {
    match codec_id {
        CODEC_ATRAC3 => Ok(Codec::Atrac3),
        CODEC_ATRAC3PLUS_OR_MPEG => {
            if is_mpeg(codec_info) {
                Ok(Codec::Mpeg)
            } else {
                Ok(Codec::Atrac3Plus)
            }
        }
        CODEC_LPCM => Ok(Codec::Lpcm),
        other => {
            log::warn!("codec_from_raw(): unknown codec id {:#04x}", other);
            Err(HimdError::InvalidTrackIndex)
        }
    }
}

pub fn bytes_per_frame(codec: Codec, codec_info: &[u8; 5]) -> usize {
    match codec {
        Codec::Lpcm => 64,
        Codec::Atrac3 => codec_info[2] as usize * 8,
        Codec::Atrac3Plus => {
            let word = u16::from_be_bytes([codec_info[1], codec_info[2]]);
            ((word as usize & 0x3FF) + 1) * 8
        }
        Codec::Mpeg => {
            let samples = samples_per_frame(codec, codec_info) as usize;
            let rate = sample_rate(codec, codec_info) as usize;
            if rate == 0 {
                return 0;
            }
            // MPEG-1 frames are padded to four-byte alignment.
            let mask: usize = if codec_info[3] & 0xC0 == 0xC0 { !3 } else { !0 };
            (samples * 125 * mpeg_kbps(codec_info) as usize / rate) & mask
        }
    }
}

pub fn samples_per_frame(codec: Codec, codec_info: &[u8; 5]) -> u32 {
    match codec {
        Codec::Lpcm => 16,
        Codec::Atrac3 => 1024,
        Codec::Atrac3Plus => 2048,
        Codec::Mpeg => {
            // Raw header layer bits: 3 is Layer I, 2 and 1 are II and III.
            if (codec_info[3] >> 4) & 0x3 == 3 {
                384
            } else {
                1152
            }
        }
    }
}

pub fn sample_rate(codec: Codec, codec_info: &[u8; 5]) -> u32 {
    match codec {
        Codec::Lpcm => 44100,
        Codec::Atrac3 | Codec::Atrac3Plus => {
            let idx = (codec_info[1] >> 5) as usize;
            if idx >= ATRAC_RATES.len() {
                log::warn!("sample_rate(): reserved ATRAC rate index {}", idx);
                return 0;
            }
            ATRAC_RATES[idx]
        }
        Codec::Mpeg => {
            let idx = (codec_info[4] >> 6) as usize;
            if idx >= MPEG_RATES.len() {
                log::warn!("sample_rate(): reserved MPEG rate index {}", idx);
                return 0;
            }
            let divider = 4 - (codec_info[3] >> 6) as u32;
            MPEG_RATES[idx] / divider
        }
    }
}

/// MPEG bitrate in kbit/s from the stored version, layer and bitrate index.
/// Reserved table entries yield 0.
pub fn mpeg_kbps(codec_info: &[u8; 5]) -> u32 {
    const V1_L1: [u32; 16] = [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448, 0];
    const V1_L2: [u32; 16] = [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384, 0];
    const V1_L3: [u32; 16] = [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 0];
    const V2_L1: [u32; 16] = [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256, 0];
    const V2_L23: [u32; 16] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160, 0];

    let version = codec_info[3] >> 6;
    let layer = (codec_info[3] >> 4) & 0x3;
    let index = (codec_info[3] & 0xF) as usize;
    let table = match (version, layer) {
        (3, 3) => &V1_L1,
        (3, 2) => &V1_L2,
        (3, 1) => &V1_L3,
        (_, 3) => &V2_L1,
        (_, _) => &V2_L23,
    };
    table[index]
}

/// Frames carried by one full audio block; 0 signals a variable-rate MPEG
/// track where block headers are authoritative.
pub fn frames_per_block(codec: Codec, codec_info: &[u8; 5]) -> usize {
    match codec {
        Codec::Mpeg => 0,
        Codec::Lpcm => HIMD_AUDIO_SIZE / 64,
        _ => {
            let bpf = bytes_per_frame(codec, codec_info);
            if bpf == 0 {
                0
            } else {
                (HIMD_AUDIO_SIZE - 1) / bpf
            }
        }
    }
}

/// Build a descriptor for a freshly uploaded ATRAC3, ATRAC3+ or LPCM track.
/// MPEG descriptors are produced by the ingest scanner instead.
pub fn generate_codec_info(
    codec: Codec,
    frame_size: usize,
    channels: u8,
    sample_rate: u32,
) -> Result<(u8, [u8; 5]), HimdError> {
    if !(1..=2).contains(&channels) {
        return Err(HimdError::UnsupportedOperation);
    }
    let rate_index = ATRAC_RATES
        .iter()
        .position(|&r| r == sample_rate)
        .ok_or(HimdError::UnsupportedOperation)?;

    match codec {
        Codec::Atrac3 => {
            if frame_size % 8 != 0 || frame_size / 8 > 0xFF {
                return Err(HimdError::UnsupportedOperation);
            }
            let info = [0, (rate_index as u8) << 5, (frame_size / 8) as u8, 0, 0];
            Ok((CODEC_ATRAC3, info))
        }
        Codec::Atrac3Plus => {
            if frame_size % 8 != 0 || frame_size / 8 == 0 || frame_size / 8 - 1 > 0x3FF {
                return Err(HimdError::UnsupportedOperation);
            }
            let word = (frame_size / 8 - 1) as u16;
            let info = [
                0,
                ((rate_index as u8) << 5) | (word >> 8) as u8,
                word as u8,
                0,
                0,
            ];
            Ok((CODEC_ATRAC3PLUS_OR_MPEG, info))
        }
        Codec::Lpcm => {
            if sample_rate != 44100 || frame_size != 64 || channels != 2 {
                return Err(HimdError::UnsupportedOperation);
            }
            Ok((CODEC_LPCM, [0; 5]))
        }
        Codec::Mpeg => Err(HimdError::UnsupportedOperation),
    }
}
