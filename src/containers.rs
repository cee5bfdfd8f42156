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

//! Headers and tags of the emitted container formats: `.oma` for ATRAC
//! dumps, `.wav` for LPCM dumps, ID3v2 for `.mp3` dumps.

use crate::io::Write;
use crate::HimdError;

pub const EA3_HEADER_SIZE: usize = 96;
pub const WAV_HEADER_SIZE: usize = 44;

/// The 96-byte EA3 header of an OpenMG `.oma` file. Bytes 32..36 carry the
/// codec id and the first three descriptor bytes.
pub fn ea3_header(codec_id: u8, codec_info: &[u8; 5]) -> [u8; EA3_HEADER_SIZE] {
    let mut header = [0u8; EA3_HEADER_SIZE];
    header[..8].copy_from_slice(&[0x45, 0x41, 0x33, 0x01, 0x00, 0x60, 0xFF, 0xFF]);
    header[32] = codec_id;
    header[33..36].copy_from_slice(&codec_info[..3]);
    header
}

/// The canonical 44-byte RIFF header for a 16-bit stereo 44.1 kHz PCM dump.
pub fn wav_header(data_len: u32) -> [u8; WAV_HEADER_SIZE] {
    const CHANNELS: u16 = 2;
    const SAMPLE_RATE: u32 = 44100;
    const BITS: u16 = 16;
    const BLOCK_ALIGN: u16 = CHANNELS * BITS / 8;
    const BYTE_RATE: u32 = SAMPLE_RATE * BLOCK_ALIGN as u32;

    let mut header = [0u8; WAV_HEADER_SIZE];
    header[..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&(36 + data_len).to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes());
    header[22..24].copy_from_slice(&CHANNELS.to_le_bytes());
    header[24..28].copy_from_slice(&SAMPLE_RATE.to_le_bytes());
    header[28..32].copy_from_slice(&BYTE_RATE.to_le_bytes());
    header[32..34].copy_from_slice(&BLOCK_ALIGN.to_le_bytes());
    header[34..36].copy_from_slice(&BITS.to_le_bytes());
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_len.to_le_bytes());
    header
}

/// Swap big-endian 16-bit PCM samples to the little-endian order WAV wants.
pub fn swap_pcm_samples(data: &mut [u8]) {
    for pair in data.chunks_exact_mut(2) {
        pair.swap(0, 1);
    }
}

/// Write an ID3v2.3 tag carrying the track strings.
pub fn write_id3_tag(
    out: &mut dyn Write,
    title: Option<&str>,
    artist: Option<&str>,
    album: Option<&str>,
) -> Result<(), HimdError> {
    use id3::TagLike;

    let mut tag = id3::Tag::new();
    if let Some(title) = title {
        tag.set_title(title);
    }
    if let Some(artist) = artist {
        tag.set_artist(artist);
    }
    if let Some(album) = album {
        tag.set_album(album);
    }
    tag.write_to(out, id3::Version::Id3v23)
        .map_err(|e| HimdError::IoError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ea3_header_carries_the_descriptor() {
        let header = ea3_header(0x01, &[0x20, 0x30, 0x40, 0x50, 0x60]);
        assert_eq!(&header[..4], &[0x45, 0x41, 0x33, 0x01]);
        assert_eq!(&header[32..36], &[0x01, 0x20, 0x30, 0x40]);
        assert_eq!(header.len(), 96);
    }

    #[test]
    fn wav_header_sizes_are_consistent() {
        let header = wav_header(1000);
        assert_eq!(&header[..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(header[4..8].try_into().unwrap()), 1036);
        assert_eq!(u32::from_le_bytes(header[40..44].try_into().unwrap()), 1000);
    }

    #[test]
    fn pcm_swap_is_an_involution() {
        let mut data = [1, 2, 3, 4];
        swap_pcm_samples(&mut data);
        assert_eq!(data, [2, 1, 4, 3]);
        swap_pcm_samples(&mut data);
        assert_eq!(data, [1, 2, 3, 4]);
    }
}
