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

//! Fragment-chain streaming over the `ATDATA` container.
//!
//! Reads are pull-based: [`BlockReader`] walks a track's fragments lazily and
//! yields one block per step together with the frame window that belongs to
//! the track. [`TrackReader`] and [`Mp3TrackReader`] sit on top and undo the
//! payload protection. Writes append through [`BlockWriter`];
//! [`EncryptStream`] turns a raw buffer into ready-to-write encrypted blocks
//! one at a time, which is all the back-pressure a pull model needs.

use crate::block::{mp3_obfuscate, AudioBlock, BlockType};
use crate::crypto::CryptoProvider;
use crate::io::{Read, Seek, SeekFrom, Write};
use crate::tif::{Fragment, TrackIndex, MAX_CHAIN_HOPS};
use crate::vfs::FileHandle;
use crate::{HimdError, HIMD_AUDIO_SIZE, HIMD_BLOCK_SIZE};

/// Collect a track's fragments in chain order.
pub fn walk_fragments(
    tif: &TrackIndex,
    first_fragment: u16,
) -> Result<Vec<(u16, Fragment)>, HimdError> {
    let mut chain = Vec::new();
    let mut index = first_fragment;
    while index != 0 {
        if chain.len() >= MAX_CHAIN_HOPS {
            return Err(HimdError::FragmentChainBroken);
        }
        let fragment = tif.get_fragment(index)?;
        let next = fragment.next_fragment;
        chain.push((index, fragment));
        index = next;
    }
    Ok(chain)
}

/// One step of a block read: the parsed block plus the frame window and the
/// fragment key it decrypts under.
pub struct BlockRead {
    pub block: AudioBlock,
    pub fragment_key: [u8; 8],
    pub first_frame: u32,
    pub last_frame: u32,
}

/// Lazily walks the blocks of a fragment list in chain order.
pub struct BlockReader<'a> {
    atdata: &'a mut dyn FileHandle,
    fragments: std::vec::IntoIter<Fragment>,
    current: Option<(Fragment, u16)>,
    frames_per_block: u32,
    mpeg: bool,
}

impl<'a> BlockReader<'a> {
    pub fn new(
        atdata: &'a mut dyn FileHandle,
        fragments: Vec<Fragment>,
        frames_per_block: usize,
        mpeg: bool,
    ) -> BlockReader<'a> {
        BlockReader {
            atdata,
            fragments: fragments.into_iter(),
            current: None,
            frames_per_block: frames_per_block as u32,
            mpeg,
        }
    }

    fn step(&mut self) -> Result<Option<BlockRead>, HimdError> {
        let (fragment, block_no) = match self.current.take() {
            Some(state) => state,
            None => {
                let fragment = match self.fragments.next() {
                    Some(f) => f,
                    None => return Ok(None),
                };
                let first = fragment.first_block;
                self.atdata
                    .seek(SeekFrom::Start(first as u64 * HIMD_BLOCK_SIZE as u64))?;
                (fragment, first)
            }
        };

        let mut raw = vec![0u8; HIMD_BLOCK_SIZE];
        self.atdata.read_exact(&mut raw)?;
        let block = AudioBlock::parse(&raw)?;

        let first_frame = if block_no == fragment.first_block {
            fragment.first_frame as u32
        } else {
            0
        };

        let last_frame = if block_no == fragment.last_block {
            // MPEG fragments store last frame + 1.
            let stored = fragment.last_frame as u32;
            if self.mpeg {
                stored
                    .checked_sub(1)
                    .ok_or(HimdError::LastFrameBeforeFirstFrame)?
            } else {
                stored
            }
        } else if self.mpeg {
            (block.n_frames as u32)
                .checked_sub(1)
                .ok_or(HimdError::FrameOutOfRange)?
        } else {
            self.frames_per_block - 1
        };

        if last_frame < first_frame {
            return Err(HimdError::LastFrameBeforeFirstFrame);
        }

        let fragment_key = fragment.key;
        if block_no == fragment.last_block {
            self.current = None;
        } else {
            self.current = Some((fragment, block_no + 1));
        }

        Ok(Some(BlockRead {
            block,
            fragment_key,
            first_frame,
            last_frame,
        }))
    }
}

impl Iterator for BlockReader<'_> {
    type Item = Result<BlockRead, HimdError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.step().transpose()
    }
}

/// Decrypting reader for ATRAC and LPCM tracks: yields the decrypted frame
/// run of one block per step.
pub struct TrackReader<'a, 'p> {
    blocks: BlockReader<'a>,
    provider: &'p dyn CryptoProvider,
    track_key: [u8; 8],
    bytes_per_frame: usize,
}

impl<'a, 'p> TrackReader<'a, 'p> {
    pub fn new(
        blocks: BlockReader<'a>,
        provider: &'p dyn CryptoProvider,
        track_key: [u8; 8],
        bytes_per_frame: usize,
    ) -> TrackReader<'a, 'p> {
        TrackReader {
            blocks,
            provider,
            track_key,
            bytes_per_frame,
        }
    }

    fn decrypt(&mut self, read: BlockRead) -> Result<Vec<u8>, HimdError> {
        let BlockRead {
            mut block,
            fragment_key,
            first_frame,
            last_frame,
        } = read;
        let start = first_frame as usize * self.bytes_per_frame;
        let end = (last_frame as usize + 1) * self.bytes_per_frame;
        if end > HIMD_AUDIO_SIZE {
            return Err(HimdError::FrameOutOfRange);
        }
        self.provider.decrypt(
            &self.track_key,
            &fragment_key,
            &block.key,
            &block.iv,
            &mut block.audio,
        )?;
        Ok(block.audio[start..end].to_vec())
    }
}

impl Iterator for TrackReader<'_, '_> {
    type Item = Result<Vec<u8>, HimdError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.blocks.next()? {
            Ok(read) => Some(self.decrypt(read)),
            Err(e) => Some(Err(e)),
        }
    }
}

/// De-obfuscating reader for MP3 tracks: yields the raw frame bytes of one
/// block per step.
pub struct Mp3TrackReader<'a> {
    blocks: BlockReader<'a>,
    key: [u8; 4],
}

impl<'a> Mp3TrackReader<'a> {
    pub fn new(blocks: BlockReader<'a>, key: [u8; 4]) -> Mp3TrackReader<'a> {
        Mp3TrackReader { blocks, key }
    }

    fn deobfuscate(&mut self, read: BlockRead) -> Result<Vec<u8>, HimdError> {
        let BlockRead {
            mut block,
            last_frame,
            ..
        } = read;
        if block.block_type() != Some(BlockType::Smpa) {
            log::warn!(
                "deobfuscate(): expected an SMPA block, found {:02x?}",
                block.block_type
            );
            return Err(HimdError::InvalidTrackIndex);
        }
        if last_frame >= block.n_frames as u32 {
            return Err(HimdError::FrameOutOfRange);
        }
        let len = block.len_data as usize;
        if len > HIMD_AUDIO_SIZE {
            return Err(HimdError::BlockDataTooLarge);
        }
        mp3_obfuscate(&mut block.audio, &self.key, len);
        block.audio.truncate(len);
        Ok(block.audio)
    }
}

impl Iterator for Mp3TrackReader<'_> {
    type Item = Result<Vec<u8>, HimdError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.blocks.next()? {
            Ok(read) => Some(self.deobfuscate(read)),
            Err(e) => Some(Err(e)),
        }
    }
}

/// Appends blocks at the tail of `ATDATA`, tracking the block span for the
/// fragment record.
pub struct BlockWriter<'a> {
    atdata: &'a mut dyn FileHandle,
    first_block: u16,
    blocks_written: u16,
}

impl<'a> BlockWriter<'a> {
    /// Position at the container tail, rounded up to the next 2-block FAT
    /// cluster; region freeing after deletion relies on tracks never sharing
    /// a cluster.
    pub fn new(atdata: &'a mut dyn FileHandle) -> Result<BlockWriter<'a>, HimdError> {
        let length = atdata.length()?;
        let blocks = length.div_ceil(HIMD_BLOCK_SIZE as u64);
        let first_block = (blocks + (blocks & 1)) as u16;
        atdata.seek(SeekFrom::Start(first_block as u64 * HIMD_BLOCK_SIZE as u64))?;
        Ok(BlockWriter {
            atdata,
            first_block,
            blocks_written: 0,
        })
    }

    pub fn write_block(&mut self, block: &AudioBlock) -> Result<(), HimdError> {
        let raw = block.serialize()?;
        self.atdata.write_all(&raw)?;
        self.blocks_written += 1;
        Ok(())
    }

    /// Encrypt the block's payload under the derived key, then append it.
    pub fn write_and_encrypt_block(
        &mut self,
        provider: &dyn CryptoProvider,
        track_key: &[u8; 8],
        fragment_key: &[u8; 8],
        block: &mut AudioBlock,
    ) -> Result<(), HimdError> {
        provider.encrypt(track_key, fragment_key, &block.key, &block.iv, &mut block.audio)?;
        self.write_block(block)
    }

    /// Finish, returning the inclusive block span written.
    pub fn close(self) -> Result<(u16, u16), HimdError> {
        if self.blocks_written == 0 {
            return Err(HimdError::BlockDataTooLarge);
        }
        Ok((self.first_block, self.first_block + self.blocks_written - 1))
    }
}

/// Turns a raw ATRAC/LPCM buffer into encrypted blocks, one per pull. Block
/// keys and IVs are drawn fresh for every block.
pub struct EncryptStream<'a, 'p> {
    provider: &'p dyn CryptoProvider,
    track_key: [u8; 8],
    fragment_key: [u8; 8],
    block_type: BlockType,
    bytes_per_frame: usize,
    frames_per_block: usize,
    content_id_lo: u32,
    data: &'a [u8],
    pos: usize,
    serial: u32,
}

impl<'a, 'p> EncryptStream<'a, 'p> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: &'p dyn CryptoProvider,
        track_key: [u8; 8],
        fragment_key: [u8; 8],
        block_type: BlockType,
        bytes_per_frame: usize,
        frames_per_block: usize,
        content_id_lo: u32,
        data: &'a [u8],
    ) -> Result<EncryptStream<'a, 'p>, HimdError> {
        if bytes_per_frame == 0
            || frames_per_block == 0
            || data.is_empty()
            || data.len() % bytes_per_frame != 0
        {
            return Err(HimdError::BlockDataTooLarge);
        }
        Ok(EncryptStream {
            provider,
            track_key,
            fragment_key,
            block_type,
            bytes_per_frame,
            frames_per_block,
            content_id_lo,
            data,
            pos: 0,
            serial: 1,
        })
    }

    /// Frames the final block will carry; the fragment's last frame index.
    pub fn frames_in_last_block(&self) -> usize {
        let frames = self.data.len() / self.bytes_per_frame;
        match frames % self.frames_per_block {
            0 => self.frames_per_block,
            partial => partial,
        }
    }

    fn emit(&mut self) -> Result<AudioBlock, HimdError> {
        let chunk_len = (self.frames_per_block * self.bytes_per_frame)
            .min(self.data.len() - self.pos);
        let chunk = &self.data[self.pos..self.pos + chunk_len];
        let key: [u8; 8] = rand::random();
        let iv: [u8; 8] = rand::random();
        let mut block = AudioBlock::new(
            self.block_type,
            (chunk_len / self.bytes_per_frame) as u16,
            chunk_len as u16,
            self.serial,
            key,
            iv,
            chunk,
            self.content_id_lo,
        )?;
        self.provider.encrypt(
            &self.track_key,
            &self.fragment_key,
            &key,
            &iv,
            &mut block.audio,
        )?;
        self.pos += chunk_len;
        self.serial += 1;
        Ok(block)
    }
}

impl Iterator for EncryptStream<'_, '_> {
    type Item = Result<AudioBlock, HimdError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }
        Some(self.emit())
    }
}
