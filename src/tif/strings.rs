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

//! Variable-length strings: 0x10-byte chunks at image offset 0x40000.
//!
//! A string is a chain of chunks of 14 content bytes each. The root chunk
//! carries the string's type nibble (0x8 and up) and opens with the encoding
//! discriminator byte; continuation chunks carry type 0x1. Free chunks have
//! type 0x0 and thread through the link bits from chunk 0.

use super::{TrackIndex, MAX_CHAIN_HOPS, OFS_STRINGS, STRING_CHUNK_COUNT, STRING_CHUNK_SIZE};
use crate::text::{self, StringEncoding};
use crate::util::{be16, put_be16};
use crate::HimdError;

const CONTENT_BYTES: usize = 14;

/// Type nibble of a string chunk.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum StringType {
    Unused = 0x0,
    Continuation = 0x1,
    Title = 0x8,
    Artist = 0x9,
    Album = 0xA,
    Group = 0xB,
}

impl StringType {
    pub fn is_root(raw: u8) -> bool {
        raw >= 0x8
    }
}

/// One string chunk, unpacked.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StringChunk {
    pub content: [u8; CONTENT_BYTES],
    /// Raw type nibble; see [`StringType`].
    pub chunk_type: u8,
    /// Low 12 bits of the link word; 0 terminates the chain.
    pub link: u16,
}

impl StringChunk {
    pub fn from_bytes(raw: &[u8]) -> StringChunk {
        debug_assert_eq!(raw.len(), STRING_CHUNK_SIZE);
        let link = be16(&raw[0x0E..]);
        StringChunk {
            content: raw[..CONTENT_BYTES].try_into().expect("content is 14 bytes"),
            chunk_type: (link >> 12) as u8,
            link: link & 0x0FFF,
        }
    }

    pub fn to_bytes(&self) -> [u8; STRING_CHUNK_SIZE] {
        let mut raw = [0u8; STRING_CHUNK_SIZE];
        raw[..CONTENT_BYTES].copy_from_slice(&self.content);
        put_be16(
            &mut raw[0x0E..],
            ((self.chunk_type as u16) << 12) | (self.link & 0x0FFF),
        );
        raw
    }
}

impl TrackIndex {
    fn string_offset(index: u16) -> Result<usize, HimdError> {
        if index as usize >= STRING_CHUNK_COUNT {
            return Err(HimdError::InvalidTrackIndex);
        }
        Ok(OFS_STRINGS + index as usize * STRING_CHUNK_SIZE)
    }

    pub fn get_string_chunk(&self, index: u16) -> Result<StringChunk, HimdError> {
        let offset = Self::string_offset(index)?;
        Ok(StringChunk::from_bytes(self.slice(offset, STRING_CHUNK_SIZE)))
    }

    pub fn write_string_chunk(&mut self, index: u16, chunk: &StringChunk) -> Result<(), HimdError> {
        let offset = Self::string_offset(index)?;
        self.slice_mut(offset, STRING_CHUNK_SIZE)
            .copy_from_slice(&chunk.to_bytes());
        Ok(())
    }

    /// Collect the chunk indices of the chain rooted at `root`.
    fn string_chain(&self, root: u16) -> Result<Vec<u16>, HimdError> {
        let mut chain = Vec::new();
        let mut index = root;
        loop {
            if index == 0 || chain.len() >= MAX_CHAIN_HOPS {
                if index != 0 {
                    return Err(HimdError::InvalidTrackIndex);
                }
                break;
            }
            chain.push(index);
            index = self.get_string_chunk(index)?.link;
        }
        Ok(chain)
    }

    /// Decode the string rooted at `root`, returning the text and its
    /// encoding.
    pub fn get_string(&self, root: u16) -> Result<(String, StringEncoding), HimdError> {
        let chain = self.string_chain(root)?;
        let first = chain.first().ok_or(HimdError::InvalidTrackIndex)?;
        if !StringType::is_root(self.get_string_chunk(*first)?.chunk_type) {
            return Err(HimdError::InvalidTrackIndex);
        }
        let mut bytes = Vec::with_capacity(chain.len() * CONTENT_BYTES);
        for index in &chain {
            bytes.extend_from_slice(&self.get_string_chunk(*index)?.content);
        }
        let encoding = bytes
            .first()
            .and_then(|b| StringEncoding::from_byte(*b))
            .ok_or(HimdError::InvalidEncoding)?;
        let mut payload = bytes.split_off(1);
        // Trailing padding of the last chunk is not part of the string. A
        // UTF-16BE unit may itself end in 0x00, so restore parity after the
        // strip.
        while payload.last() == Some(&0) {
            payload.pop();
        }
        if encoding == StringEncoding::Utf16Be && payload.len() % 2 == 1 {
            payload.push(0);
        }
        let text = text::decode(&payload, encoding)?;
        Ok((text, encoding))
    }

    /// Store a string, picking the first encoding that round-trips. Returns
    /// the root chunk index.
    pub fn add_string(&mut self, s: &str, string_type: StringType) -> Result<u16, HimdError> {
        let (encoding, encoded) = text::pick_encoding(s)?;
        let mut data = Vec::with_capacity(encoded.len() + 1);
        data.push(encoding.to_byte());
        data.extend_from_slice(&encoded);

        let needed = data.len().div_ceil(CONTENT_BYTES);
        // Gather the free chunks up front; allocation is all-or-nothing.
        let mut free = Vec::with_capacity(needed);
        let mut index = self.get_string_chunk(0)?.link;
        while free.len() < needed {
            if index == 0 {
                return Err(HimdError::NotEnoughStringSlots);
            }
            free.push(index);
            index = self.get_string_chunk(index)?.link;
        }

        for (i, &chunk_index) in free.iter().enumerate() {
            let mut content = [0u8; CONTENT_BYTES];
            let span = &data[i * CONTENT_BYTES..data.len().min((i + 1) * CONTENT_BYTES)];
            content[..span.len()].copy_from_slice(span);
            let chunk = StringChunk {
                content,
                chunk_type: if i == 0 {
                    string_type as u8
                } else {
                    StringType::Continuation as u8
                },
                link: *free.get(i + 1).unwrap_or(&0),
            };
            self.write_string_chunk(chunk_index, &chunk)?;
        }

        // The freelist head skips everything just consumed.
        let mut head = self.get_string_chunk(0)?;
        head.link = index;
        self.write_string_chunk(0, &head)?;
        Ok(free[0])
    }

    /// Release a string chain: zero the content, mark every chunk unused and
    /// splice the whole chain onto the freelist head. Returns the number of
    /// chunks released.
    pub fn remove_string(&mut self, root: u16) -> Result<usize, HimdError> {
        let chain = self.string_chain(root)?;
        if chain.is_empty() {
            return Ok(0);
        }
        let head_link = self.get_string_chunk(0)?.link;
        for (i, &index) in chain.iter().enumerate() {
            let chunk = StringChunk {
                content: [0; CONTENT_BYTES],
                chunk_type: StringType::Unused as u8,
                link: *chain.get(i + 1).unwrap_or(&head_link),
            };
            self.write_string_chunk(index, &chunk)?;
        }
        let mut head = self.get_string_chunk(0)?;
        head.link = root;
        self.write_string_chunk(0, &head)?;
        Ok(chain.len())
    }

    pub fn string_freelist_len(&self) -> Result<usize, HimdError> {
        let mut count = 0;
        let mut index = self.get_string_chunk(0)?.link;
        while index != 0 {
            count += 1;
            if count > STRING_CHUNK_COUNT {
                return Err(HimdError::InvalidTrackIndex);
            }
            index = self.get_string_chunk(index)?.link;
        }
        Ok(count)
    }
}
