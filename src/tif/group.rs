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

//! Group records: 8-byte entries at image offset 0x2100.
//!
//! Record 0 is the disc-title group; records 1..N are user groups over
//! contiguous, non-overlapping ranges of the track ordering; an all-zero
//! record terminates the list. The stored start is the range start plus one,
//! the stored end is exclusive.

use binrw::{binrw, BinRead, BinWrite};

use super::{TrackIndex, GROUP_COUNT, GROUP_SIZE, OFS_GROUPS};
use crate::io::Cursor;
use crate::HimdError;

pub const GROUP_FLAG_LIVE: u8 = 0x10;

/// One group record, as stored.
#[binrw]
#[brw(big)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawGroup {
    /// Range start in the ordering, stored off by one.
    pub start: u16,
    /// Exclusive range end in the ordering.
    pub end: u16,
    pub title_index: u16,
    pub flags: u8,
    reserved: u8,
}

impl RawGroup {
    pub fn is_live(&self) -> bool {
        self.flags & GROUP_FLAG_LIVE != 0
    }

    pub fn is_terminator(&self) -> bool {
        *self == RawGroup::default()
    }
}

/// A user group in range form.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Group {
    /// First ordering index covered.
    pub start_track: usize,
    /// One past the last ordering index covered.
    pub end_track: usize,
    pub title_index: u16,
}

impl Group {
    pub fn from_raw(raw: &RawGroup) -> Group {
        Group {
            start_track: (raw.start as usize).saturating_sub(1),
            end_track: raw.end as usize,
            title_index: raw.title_index,
        }
    }

    pub fn to_raw(self) -> RawGroup {
        RawGroup {
            start: self.start_track as u16 + 1,
            end: self.end_track as u16,
            title_index: self.title_index,
            flags: GROUP_FLAG_LIVE,
            reserved: 0,
        }
    }
}

impl TrackIndex {
    fn group_offset(index: usize) -> Result<usize, HimdError> {
        if index >= GROUP_COUNT {
            return Err(HimdError::InvalidTrackIndex);
        }
        Ok(OFS_GROUPS + index * GROUP_SIZE)
    }

    pub fn get_group(&self, index: usize) -> Result<RawGroup, HimdError> {
        let offset = Self::group_offset(index)?;
        let mut cursor = Cursor::new(self.slice(offset, GROUP_SIZE));
        Ok(RawGroup::read(&mut cursor)?)
    }

    pub fn write_group(&mut self, index: usize, group: &RawGroup) -> Result<(), HimdError> {
        let offset = Self::group_offset(index)?;
        let mut cursor = Cursor::new(Vec::with_capacity(GROUP_SIZE));
        group.write(&mut cursor)?;
        self.slice_mut(offset, GROUP_SIZE)
            .copy_from_slice(&cursor.into_inner());
        Ok(())
    }

    /// Number of user groups (record 0, the disc title, not counted).
    pub fn group_count(&self) -> Result<usize, HimdError> {
        for index in 1..GROUP_COUNT {
            if self.get_group(index)?.is_terminator() {
                return Ok(index - 1);
            }
        }
        Ok(GROUP_COUNT - 1)
    }

    /// Title string of the disc, held by group record 0.
    pub fn disc_title_index(&self) -> Result<u16, HimdError> {
        Ok(self.get_group(0)?.title_index)
    }

    pub fn set_disc_title_index(&mut self, title_index: u16) -> Result<(), HimdError> {
        let group = if title_index == 0 {
            RawGroup::default()
        } else {
            RawGroup {
                start: 0,
                end: 0,
                title_index,
                flags: GROUP_FLAG_LIVE,
                reserved: 0,
            }
        };
        self.write_group(0, &group)
    }

    /// Append a user group covering `[start_track, end_track)` of the
    /// ordering. The range must be within the ordering and must not overlap
    /// any existing group.
    pub fn add_group(&mut self, group: Group) -> Result<usize, HimdError> {
        if group.start_track >= group.end_track || group.end_track > self.track_count() {
            return Err(HimdError::InvalidTrackIndex);
        }
        let count = self.group_count()?;
        for index in 1..=count {
            let existing = Group::from_raw(&self.get_group(index)?);
            if group.start_track < existing.end_track && existing.start_track < group.end_track {
                return Err(HimdError::InvalidTrackIndex);
            }
        }
        self.write_group(count + 1, &group.to_raw())?;
        Ok(count + 1)
    }

    /// Remove user group `index`, shifting later records down over it.
    pub fn remove_group(&mut self, index: usize) -> Result<RawGroup, HimdError> {
        let count = self.group_count()?;
        if index == 0 || index > count {
            return Err(HimdError::InvalidTrackIndex);
        }
        let removed = self.get_group(index)?;
        for i in index..count {
            let next = self.get_group(i + 1)?;
            self.write_group(i, &next)?;
        }
        self.write_group(count, &RawGroup::default())?;
        Ok(removed)
    }
}
