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

//! The 16 KiB audio block: the unit of the `ATDATA` container.
//!
//! A block carries a 32-byte header, up to `HIMD_AUDIO_SIZE` payload bytes,
//! and a backup trailer repeating the type tag, mode code and serial so a
//! player can resynchronize after a torn write.

use binrw::{binrw, BinRead, BinWrite};

use crate::io::Cursor;
use crate::{HimdError, HIMD_AUDIO_SIZE, HIMD_BLOCK_SIZE};

/// Container type tag stamped at the head and tail of each block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlockType {
    /// MP3 payload, XOR-obfuscated.
    Smpa,
    /// ATRAC3 payload, DES-CBC encrypted.
    Atrac3,
    /// ATRAC3+ payload, DES-CBC encrypted.
    Atrac3Plus,
    /// Linear PCM payload, DES-CBC encrypted.
    Lpcm,
}

impl BlockType {
    pub fn tag(self) -> [u8; 4] {
        match self {
            BlockType::Smpa => *b"SMPA",
            BlockType::Atrac3 => *b"A3D ",
            BlockType::Atrac3Plus => *b"ATX ",
            BlockType::Lpcm => *b"LPCM",
        }
    }

    pub fn from_tag(tag: &[u8; 4]) -> Option<BlockType> {
        match tag {
            b"SMPA" => Some(BlockType::Smpa),
            b"A3D " => Some(BlockType::Atrac3),
            b"ATX " => Some(BlockType::Atrac3Plus),
            b"LPCM" => Some(BlockType::Lpcm),
            _ => None,
        }
    }

    /// Mode code stored alongside the type: LPCM blocks carry `0x0124`,
    /// everything else `3`.
    pub fn m_code(self) -> u16 {
        match self {
            BlockType::Lpcm => 0x0124,
            _ => 3,
        }
    }
}

impl std::fmt::Display for BlockType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockType::Smpa => write!(f, "SMPA"),
            BlockType::Atrac3 => write!(f, "A3D"),
            BlockType::Atrac3Plus => write!(f, "ATX"),
            BlockType::Lpcm => write!(f, "LPCM"),
        }
    }
}

/// One deserialized `ATDATA` block.
#[binrw]
#[brw(big)]
#[derive(Clone, Debug)]
pub struct AudioBlock {
    pub block_type: [u8; 4],
    pub n_frames: u16,
    pub m_code: u16,
    pub len_data: u16,
    reserved: u16,
    pub serial: u32,
    pub key: [u8; 8],
    pub iv: [u8; 8],
    #[br(count = HIMD_AUDIO_SIZE)]
    pub audio: Vec<u8>,
    unused: [u8; 16],
    pub backup_type: [u8; 4],
    backup_reserved: u16,
    pub backup_m_code: u16,
    pub content_id_lo: u32,
    pub backup_serial: u32,
}

impl AudioBlock {
    /// Assemble a block with the backup trailer mirroring the header. The
    /// payload is placed at the front of the audio area; the remainder stays
    /// zero.
    pub fn new(
        block_type: BlockType,
        n_frames: u16,
        len_data: u16,
        serial: u32,
        key: [u8; 8],
        iv: [u8; 8],
        payload: &[u8],
        content_id_lo: u32,
    ) -> Result<AudioBlock, HimdError> {
        if payload.len() > HIMD_AUDIO_SIZE {
            return Err(HimdError::BlockDataTooLarge);
        }
        let mut audio = vec![0u8; HIMD_AUDIO_SIZE];
        audio[..payload.len()].copy_from_slice(payload);
        let tag = block_type.tag();
        Ok(AudioBlock {
            block_type: tag,
            n_frames,
            m_code: block_type.m_code(),
            len_data,
            reserved: 0,
            serial,
            key,
            iv,
            audio,
            unused: [0; 16],
            backup_type: tag,
            backup_reserved: 0,
            backup_m_code: block_type.m_code(),
            content_id_lo,
            backup_serial: serial,
        })
    }

    pub fn block_type(&self) -> Option<BlockType> {
        BlockType::from_tag(&self.block_type)
    }

    pub fn parse(raw: &[u8]) -> Result<AudioBlock, HimdError> {
        if raw.len() != HIMD_BLOCK_SIZE {
            return Err(HimdError::BlockDataTooLarge);
        }
        let mut cursor = Cursor::new(raw);
        let block = AudioBlock::read(&mut cursor)?;
        if block.len_data as usize > HIMD_AUDIO_SIZE {
            return Err(HimdError::BlockDataTooLarge);
        }
        Ok(block)
    }

    pub fn serialize(&self) -> Result<Vec<u8>, HimdError> {
        let mut cursor = Cursor::new(Vec::with_capacity(HIMD_BLOCK_SIZE));
        self.write(&mut cursor)?;
        let out = cursor.into_inner();
        debug_assert_eq!(out.len(), HIMD_BLOCK_SIZE);
        Ok(out)
    }
}

/// XOR the obfuscated span of an MP3 payload in place. Only whole 8-byte
/// groups are covered; a trailing partial group stays clear.
pub fn mp3_obfuscate(payload: &mut [u8], key: &[u8; 4], len_data: usize) {
    let span = len_data.min(payload.len()) & !7;
    for (i, byte) in payload[..span].iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}
