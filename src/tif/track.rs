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

//! Track slots: 0x50-byte records at image offset 0x8000.
//!
//! Slot 0 is never a track; its `track_number` field heads the freelist. A
//! live track has a non-zero `first_fragment` and a `track_number` equal to
//! its own slot index. Free slots chain to the next free slot through
//! `track_number`.

use binrw::{binrw, BinRead, BinWrite};

use super::{TrackIndex, OFS_TRACKS, TRACK_SLOT_COUNT, TRACK_SLOT_SIZE};
use crate::io::Cursor;
use crate::HimdError;

/// Byte range of a serialized slot covered by the track MAC.
pub(crate) const TRACK_SIGNED_REGION: std::ops::Range<usize> = 0x28..0x50;

/// One 0x50-byte track slot, as stored.
#[binrw]
#[brw(big)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawTrack {
    /// DOS-packed recording timestamp.
    pub recording_time: u32,
    pub ekb_number: u32,
    pub title_index: u16,
    pub artist_index: u16,
    pub album_index: u16,
    pub track_in_album: u8,
    reserved0: u8,
    /// Track key, wrapped under the EKB root (the kek).
    pub key: [u8; 8],
    pub mac: [u8; 8],
    pub codec_id: u8,
    codec_info_lo: [u8; 3],
    pub first_fragment: u16,
    pub track_number: u16,
    pub seconds: u16,
    pub lt: u8,
    pub dest: u8,
    codec_info_hi: [u8; 2],
    pub xcc: u8,
    pub ct: u8,
    pub cc: u8,
    pub cn: u8,
    pub content_id: [u8; 20],
    pub license_start: u32,
    pub license_end: u32,
    reserved1: u16,
}

impl RawTrack {
    pub fn codec_info(&self) -> [u8; 5] {
        [
            self.codec_info_lo[0],
            self.codec_info_lo[1],
            self.codec_info_lo[2],
            self.codec_info_hi[0],
            self.codec_info_hi[1],
        ]
    }

    pub fn set_codec_info(&mut self, info: &[u8; 5]) {
        self.codec_info_lo.copy_from_slice(&info[..3]);
        self.codec_info_hi.copy_from_slice(&info[3..]);
    }

    /// A live slot records its own index; anything else is freelist state.
    pub fn is_live(&self, slot: u16) -> bool {
        self.first_fragment != 0 && self.track_number == slot
    }

    pub fn to_bytes(&self) -> [u8; TRACK_SLOT_SIZE] {
        let mut cursor = Cursor::new(Vec::with_capacity(TRACK_SLOT_SIZE));
        self.write(&mut cursor).expect("slot serialization is infallible");
        let buf = cursor.into_inner();
        debug_assert_eq!(buf.len(), TRACK_SLOT_SIZE);
        buf.try_into().expect("slot is exactly 0x50 bytes")
    }

    /// The MAC-protected tail of the serialized slot: duration, licence
    /// fields, codec info high bytes and content id.
    pub fn signed_region(&self) -> [u8; 0x28] {
        self.to_bytes()[TRACK_SIGNED_REGION]
            .try_into()
            .expect("signed region is 0x28 bytes")
    }
}

impl TrackIndex {
    fn track_offset(slot: u16) -> Result<usize, HimdError> {
        if slot as usize >= TRACK_SLOT_COUNT {
            return Err(HimdError::InvalidTrackIndex);
        }
        Ok(OFS_TRACKS + slot as usize * TRACK_SLOT_SIZE)
    }

    pub fn get_track(&self, slot: u16) -> Result<RawTrack, HimdError> {
        let offset = Self::track_offset(slot)?;
        let mut cursor = Cursor::new(self.slice(offset, TRACK_SLOT_SIZE));
        Ok(RawTrack::read(&mut cursor)?)
    }

    pub fn write_track(&mut self, slot: u16, track: &RawTrack) -> Result<(), HimdError> {
        let offset = Self::track_offset(slot)?;
        self.slice_mut(offset, TRACK_SLOT_SIZE)
            .copy_from_slice(&track.to_bytes());
        Ok(())
    }

    /// Allocate a slot from the freelist, stamp the track's own number into
    /// it and store the record. Returns the new slot index.
    pub fn add_track(&mut self, track: &RawTrack) -> Result<u16, HimdError> {
        let mut head = self.get_track(0)?;
        let slot = head.track_number;
        if slot == 0 {
            return Err(HimdError::IndexFull);
        }
        let next_free = self.get_track(slot)?.track_number;
        head.track_number = next_free;
        self.write_track(0, &head)?;

        let mut stored = track.clone();
        stored.track_number = slot;
        self.write_track(slot, &stored)?;
        Ok(slot)
    }

    /// Release a slot back to the freelist. The slot is zeroed apart from the
    /// freelist link; players have been observed to crash with `CAN'T PLAY`
    /// over residual bytes. Returns the removed track's `first_fragment` so
    /// the caller can release the chain.
    pub fn remove_track(&mut self, slot: u16) -> Result<u16, HimdError> {
        if slot == 0 {
            return Err(HimdError::InvalidTrackIndex);
        }
        let first_fragment = self.get_track(slot)?.first_fragment;
        let mut head = self.get_track(0)?;
        let mut freed = RawTrack::default();
        freed.track_number = head.track_number;
        self.write_track(slot, &freed)?;
        head.track_number = slot;
        self.write_track(0, &head)?;
        Ok(first_fragment)
    }

    /// Walk the track freelist and count the free slots.
    pub fn track_freelist_len(&self) -> Result<usize, HimdError> {
        let mut count = 0;
        let mut slot = self.get_track(0)?.track_number;
        while slot != 0 {
            count += 1;
            if count > TRACK_SLOT_COUNT {
                return Err(HimdError::InvalidTrackIndex);
            }
            slot = self.get_track(slot)?.track_number;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_layout_is_eighty_bytes() {
        let bytes = RawTrack::default().to_bytes();
        assert_eq!(bytes.len(), 0x50);
    }

    #[test]
    fn codec_info_is_split_across_the_slot() {
        let mut t = RawTrack::default();
        t.set_codec_info(&[1, 2, 3, 4, 5]);
        let bytes = t.to_bytes();
        assert_eq!(&bytes[0x21..0x24], &[1, 2, 3]);
        assert_eq!(&bytes[0x2C..0x2E], &[4, 5]);
        assert_eq!(t.codec_info(), [1, 2, 3, 4, 5]);
    }

    #[test]
    fn add_and_remove_maintain_the_freelist() {
        let mut tif = TrackIndex::blank();
        let free_before = tif.track_freelist_len().unwrap();

        let mut track = RawTrack::default();
        track.first_fragment = 7;
        let slot = tif.add_track(&track).unwrap();
        assert_eq!(slot, 1);
        assert_eq!(tif.track_freelist_len().unwrap(), free_before - 1);
        let stored = tif.get_track(slot).unwrap();
        assert!(stored.is_live(slot));

        let first_fragment = tif.remove_track(slot).unwrap();
        assert_eq!(first_fragment, 7);
        assert_eq!(tif.track_freelist_len().unwrap(), free_before);
        // The freed slot is zeroed apart from the freelist link.
        let freed = tif.get_track(slot).unwrap();
        assert_eq!(freed.first_fragment, 0);
        assert_eq!(freed.key, [0; 8]);
    }

    #[test]
    fn signed_region_covers_duration_and_content_id() {
        let mut t = RawTrack::default();
        t.seconds = 0x1234;
        t.content_id = [9; 20];
        let region = t.signed_region();
        assert_eq!(&region[..2], &[0x12, 0x34]);
        assert_eq!(&region[10..30], &[9; 20]);
    }
}
