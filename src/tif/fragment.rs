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

//! Fragment slots: 0x10-byte records at image offset 0x30000.
//!
//! A fragment names a contiguous run of `ATDATA` blocks belonging to one
//! track. The last word of a slot packs a 4-bit type nibble over a 12-bit
//! link to the next fragment; slot 0 heads the freelist through the same
//! link bits.

use super::{TrackIndex, FRAGMENT_COUNT, FRAGMENT_SIZE, OFS_FRAGMENTS};
use crate::util::{be16, put_be16};
use crate::HimdError;

/// Type nibble of a live audio fragment.
pub const FRAGMENT_TYPE_AUDIO: u8 = 0x1;

/// One fragment slot, unpacked.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Fragment {
    /// Per-fragment key mixed into every block key of the run.
    pub key: [u8; 8],
    pub first_block: u16,
    pub last_block: u16,
    pub first_frame: u8,
    /// Inclusive for ATRAC and LPCM runs; MPEG runs store last frame + 1.
    pub last_frame: u8,
    /// High nibble of the link word.
    pub fragment_type: u8,
    /// Low 12 bits of the link word; 0 terminates the chain.
    pub next_fragment: u16,
}

impl Fragment {
    pub fn from_bytes(raw: &[u8]) -> Fragment {
        debug_assert_eq!(raw.len(), FRAGMENT_SIZE);
        let link = be16(&raw[0x0E..]);
        Fragment {
            key: raw[..8].try_into().expect("key field is 8 bytes"),
            first_block: be16(&raw[0x08..]),
            last_block: be16(&raw[0x0A..]),
            first_frame: raw[0x0C],
            last_frame: raw[0x0D],
            fragment_type: (link >> 12) as u8,
            next_fragment: link & 0x0FFF,
        }
    }

    pub fn to_bytes(&self) -> [u8; FRAGMENT_SIZE] {
        let mut raw = [0u8; FRAGMENT_SIZE];
        raw[..8].copy_from_slice(&self.key);
        put_be16(&mut raw[0x08..], self.first_block);
        put_be16(&mut raw[0x0A..], self.last_block);
        raw[0x0C] = self.first_frame;
        raw[0x0D] = self.last_frame;
        put_be16(
            &mut raw[0x0E..],
            ((self.fragment_type as u16) << 12) | (self.next_fragment & 0x0FFF),
        );
        raw
    }

    /// Blocks covered by this fragment, inclusive of both ends.
    pub fn block_span(&self) -> u16 {
        self.last_block - self.first_block + 1
    }
}

impl TrackIndex {
    fn fragment_offset(index: u16) -> Result<usize, HimdError> {
        if index as usize >= FRAGMENT_COUNT {
            return Err(HimdError::FragmentChainBroken);
        }
        Ok(OFS_FRAGMENTS + index as usize * FRAGMENT_SIZE)
    }

    pub fn get_fragment(&self, index: u16) -> Result<Fragment, HimdError> {
        let offset = Self::fragment_offset(index)?;
        Ok(Fragment::from_bytes(self.slice(offset, FRAGMENT_SIZE)))
    }

    pub fn write_fragment(&mut self, index: u16, fragment: &Fragment) -> Result<(), HimdError> {
        let offset = Self::fragment_offset(index)?;
        self.slice_mut(offset, FRAGMENT_SIZE)
            .copy_from_slice(&fragment.to_bytes());
        Ok(())
    }

    /// Allocate a fragment slot from the freelist and store the record.
    pub fn add_fragment(&mut self, fragment: &Fragment) -> Result<u16, HimdError> {
        let mut head = self.get_fragment(0)?;
        let index = head.next_fragment;
        if index == 0 {
            return Err(HimdError::IndexFull);
        }
        head.next_fragment = self.get_fragment(index)?.next_fragment;
        self.write_fragment(0, &head)?;
        self.write_fragment(index, fragment)?;
        Ok(index)
    }

    /// Zero a fragment slot and prepend it to the freelist.
    pub fn remove_fragment(&mut self, index: u16) -> Result<(), HimdError> {
        if index == 0 {
            return Err(HimdError::FragmentChainBroken);
        }
        let mut head = self.get_fragment(0)?;
        let mut freed = Fragment::default();
        freed.next_fragment = head.next_fragment;
        self.write_fragment(index, &freed)?;
        head.next_fragment = index;
        self.write_fragment(0, &head)?;
        Ok(())
    }

    pub fn fragment_freelist_len(&self) -> Result<usize, HimdError> {
        let mut count = 0;
        let mut index = self.get_fragment(0)?.next_fragment;
        while index != 0 {
            count += 1;
            if count > FRAGMENT_COUNT {
                return Err(HimdError::FragmentChainBroken);
            }
            index = self.get_fragment(index)?.next_fragment;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_word_packs_type_over_link() {
        let frag = Fragment {
            key: [0xAA; 8],
            first_block: 10,
            last_block: 12,
            first_frame: 1,
            last_frame: 9,
            fragment_type: FRAGMENT_TYPE_AUDIO,
            next_fragment: 0x123,
        };
        let raw = frag.to_bytes();
        assert_eq!(be16(&raw[0x0E..]), 0x1123);
        assert_eq!(Fragment::from_bytes(&raw), frag);
    }

    #[test]
    fn freelist_allocation_cycles() {
        let mut tif = TrackIndex::blank();
        let free_before = tif.fragment_freelist_len().unwrap();
        let frag = Fragment {
            first_block: 2,
            last_block: 3,
            fragment_type: FRAGMENT_TYPE_AUDIO,
            ..Default::default()
        };
        let a = tif.add_fragment(&frag).unwrap();
        let b = tif.add_fragment(&frag).unwrap();
        assert_ne!(a, b);
        assert_eq!(tif.fragment_freelist_len().unwrap(), free_before - 2);
        tif.remove_fragment(a).unwrap();
        tif.remove_fragment(b).unwrap();
        assert_eq!(tif.fragment_freelist_len().unwrap(), free_before);
        // Freed slots hold nothing but the freelist link.
        assert_eq!(tif.get_fragment(b).unwrap().key, [0; 8]);
    }
}
