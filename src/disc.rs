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

//! The disc handle: high-level operations composed from the object store,
//! the streams, the codec math and the secure session.

use regex::Regex;

use crate::block::{mp3_obfuscate, BlockType};
use crate::codecinfo::{self, Codec};
use crate::containers;
use crate::crypto::{create_track_key, mp3_encryption_key, CryptoProvider};
use crate::io::{Read, Seek, SeekFrom, Write};
use crate::mp3;
use crate::secure::SecureSession;
use crate::stream::{walk_fragments, BlockReader, BlockWriter, EncryptStream, Mp3TrackReader, TrackReader};
use crate::text::StringEncoding;
use crate::tif::{Fragment, RawTrack, StringType, TrackIndex, FRAGMENT_TYPE_AUDIO};
use crate::util::{be32, DosDateTime};
use crate::vfs::{DiscFilesystem, FileHandle, FileRegion, OpenMode};
use crate::{
    HimdError, ProgressCallback, ProgressStatus, HIMD_BLOCK_SIZE, HIMD_ROOT, HIMD_TIF_SIZE,
};

/// Decoded per-track metadata.
#[derive(Clone, Debug)]
pub struct TrackMetadata {
    /// Position in the track ordering.
    pub index: usize,
    /// Physical slot in the track table.
    pub slot: u16,
    pub title: Option<String>,
    pub title_encoding: Option<StringEncoding>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub codec: Codec,
    pub duration_seconds: u32,
}

/// An open Hi-MD disc.
pub struct Himd {
    fs: Box<dyn DiscFilesystem>,
    tif: TrackIndex,
    datanum: u8,
    disc_id: [u8; 16],
}

fn generation_path(name: &str, datanum: u8) -> String {
    format!("{}/{}{:02X}.HMA", HIMD_ROOT, name, datanum)
}

impl Himd {
    /// Open the live generation of a disc: locate `atdata<NN>.hma`, load and
    /// verify the track index, and read the disc id from the MAC list.
    pub fn open(mut fs: Box<dyn DiscFilesystem>) -> Result<Himd, HimdError> {
        let listing = fs.list(HIMD_ROOT).map_err(|_| HimdError::NoTrackIndex)?;
        let atdata_rex =
            Regex::new(r"(?i)^atdata([0-9a-f]{2})\.hma$").expect("pattern is well-formed");
        let mut datanums: Vec<u8> = listing
            .iter()
            .filter_map(|name| atdata_rex.captures(name))
            .filter_map(|caps| u8::from_str_radix(&caps[1], 16).ok())
            .collect();
        datanums.sort_unstable();
        let datanum = match datanums.as_slice() {
            [] => return Err(HimdError::NoTrackIndex),
            [only] => *only,
            [.., last] => {
                log::warn!(
                    "open(): {} atdata generations present, selecting {:02X}",
                    datanums.len(),
                    last
                );
                *last
            }
        };

        let mut tif_file = fs
            .open(&generation_path("TRKIDX", datanum), OpenMode::Read)
            .map_err(|_| HimdError::NoTrackIndex)?;
        let image = tif_file.read_fully()?;
        if image.len() != HIMD_TIF_SIZE {
            return Err(HimdError::InvalidTrackIndex);
        }
        let tif = TrackIndex::from_bytes(image)?;

        let mut mclist = fs.open(&generation_path("MCLIST", datanum), OpenMode::Read)?;
        mclist.seek(SeekFrom::Start(0x40))?;
        let mut disc_id = [0u8; 16];
        mclist.read_exact(&mut disc_id)?;

        log::debug!(
            "open(): generation {:02X}, {} tracks",
            datanum,
            tif.track_count()
        );
        Ok(Himd {
            fs,
            tif,
            datanum,
            disc_id,
        })
    }

    pub fn disc_id(&self) -> &[u8; 16] {
        &self.disc_id
    }

    pub fn generation(&self) -> u8 {
        self.datanum
    }

    pub fn track_index(&self) -> &TrackIndex {
        &self.tif
    }

    pub fn track_index_mut(&mut self) -> &mut TrackIndex {
        &mut self.tif
    }

    pub fn track_count(&self) -> usize {
        self.tif.track_count()
    }

    pub fn total_space(&mut self) -> Result<u64, HimdError> {
        self.fs.total_space()
    }

    /// Bytes currently occupied by the audio container.
    pub fn atdata_size(&mut self) -> Result<u64, HimdError> {
        let path = self.atdata_path();
        self.fs.get_size(&path)
    }

    fn atdata_path(&self) -> String {
        generation_path("ATDATA", self.datanum)
    }

    fn trkidx_path(&self) -> String {
        generation_path("TRKIDX", self.datanum)
    }

    fn mclist_path(&self) -> String {
        generation_path("MCLIST", self.datanum)
    }

    // -----------------------------------------------------------------------
    // Metadata
    // -----------------------------------------------------------------------

    fn string_or_none(&self, index: u16) -> Option<(String, StringEncoding)> {
        if index == 0 {
            return None;
        }
        match self.tif.get_string(index) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                log::warn!("string_or_none(): dropping undecodable string {}: {}", index, e);
                None
            }
        }
    }

    pub fn track_metadata(&self, index: usize) -> Result<TrackMetadata, HimdError> {
        let slot = self.tif.track_index_to_slot(index)?;
        let track = self.tif.get_track(slot)?;
        let codec = codecinfo::codec_from_raw(track.codec_id, &track.codec_info())?;
        let title = self.string_or_none(track.title_index);
        Ok(TrackMetadata {
            index,
            slot,
            title_encoding: title.as_ref().map(|(_, e)| *e),
            title: title.map(|(s, _)| s),
            artist: self.string_or_none(track.artist_index).map(|(s, _)| s),
            album: self.string_or_none(track.album_index).map(|(s, _)| s),
            codec,
            duration_seconds: track.seconds as u32,
        })
    }

    pub fn all_tracks(&self) -> Result<Vec<TrackMetadata>, HimdError> {
        (0..self.track_count()).map(|i| self.track_metadata(i)).collect()
    }

    pub fn disc_title(&self) -> Result<Option<String>, HimdError> {
        let index = self.tif.disc_title_index()?;
        Ok(self.string_or_none(index).map(|(s, _)| s))
    }

    /// Set or clear the disc title. Clearing releases the string chain.
    pub fn rename_disc(&mut self, title: Option<&str>) -> Result<(), HimdError> {
        let old = self.tif.disc_title_index()?;
        if old != 0 {
            self.tif.remove_string(old)?;
            self.tif.set_disc_title_index(0)?;
        }
        if let Some(title) = title {
            let root = self.tif.add_string(title, StringType::Group)?;
            self.tif.set_disc_title_index(root)?;
        }
        Ok(())
    }

    fn replace_track_string(
        &mut self,
        old_index: u16,
        value: Option<&str>,
        string_type: StringType,
    ) -> Result<u16, HimdError> {
        if old_index != 0 {
            self.tif.remove_string(old_index)?;
        }
        match value {
            Some(s) => self.tif.add_string(s, string_type),
            None => Ok(0),
        }
    }

    /// Replace the title of the track at ordering position `index`.
    pub fn rename_track(&mut self, index: usize, title: Option<&str>) -> Result<(), HimdError> {
        let slot = self.tif.track_index_to_slot(index)?;
        let mut track = self.tif.get_track(slot)?;
        track.title_index = self.replace_track_string(track.title_index, title, StringType::Title)?;
        self.tif.write_track(slot, &track)
    }

    pub fn set_track_artist(&mut self, index: usize, artist: Option<&str>) -> Result<(), HimdError> {
        let slot = self.tif.track_index_to_slot(index)?;
        let mut track = self.tif.get_track(slot)?;
        track.artist_index =
            self.replace_track_string(track.artist_index, artist, StringType::Artist)?;
        self.tif.write_track(slot, &track)
    }

    pub fn set_track_album(&mut self, index: usize, album: Option<&str>) -> Result<(), HimdError> {
        let slot = self.tif.track_index_to_slot(index)?;
        let mut track = self.tif.get_track(slot)?;
        track.album_index = self.replace_track_string(track.album_index, album, StringType::Album)?;
        self.tif.write_track(slot, &track)
    }

    // -----------------------------------------------------------------------
    // Flush and generation rotation
    // -----------------------------------------------------------------------

    /// Rewrite the track index if it changed.
    pub fn flush(&mut self) -> Result<(), HimdError> {
        if !self.tif.is_dirty() {
            return Ok(());
        }
        let path = self.trkidx_path();
        let mut file = self.fs.open(&path, OpenMode::ReadWrite)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(self.tif.as_bytes())?;
        self.tif.mark_clean();
        log::debug!("flush(): rewrote {}", path);
        Ok(())
    }

    /// Erase every file on the volume, resetting the in-memory index. Fails
    /// with `UnsupportedOperation` on drivers that cannot wipe.
    pub fn wipe_disc(&mut self) -> Result<(), HimdError> {
        self.fs.wipe_disc()?;
        self.tif = TrackIndex::blank();
        Ok(())
    }

    /// Next numeric `.HJS` basename, one past the highest present.
    fn next_hjs_number(&mut self) -> Result<u32, HimdError> {
        let hjs_rex = Regex::new(r"(?i)^([0-9]{8})\.hjs$").expect("pattern is well-formed");
        let mut next = 0;
        for name in self.fs.list(HIMD_ROOT)? {
            if let Some(caps) = hjs_rex.captures(&name) {
                if let Ok(n) = caps[1].parse::<u32>() {
                    next = next.max(n + 1);
                }
            }
        }
        Ok(next)
    }

    /// Rotate the three generation files to `new_gen % 16`, evicting any
    /// colliding files to fresh `.HJS` names first.
    pub fn advance_generation(&mut self, new_gen: u32) -> Result<(), HimdError> {
        let new_datanum = (new_gen % 16) as u8;
        if new_datanum == self.datanum {
            log::warn!("advance_generation(): generation {:#x} maps to the live datanum", new_gen);
            return Ok(());
        }
        let mut hjs = self.next_hjs_number()?;
        for name in ["ATDATA", "MCLIST", "TRKIDX"] {
            let target = generation_path(name, new_datanum);
            if self.fs.get_size(&target).is_ok() {
                let evicted = format!("{}/{:08}.HJS", HIMD_ROOT, hjs);
                log::debug!("advance_generation(): evicting {} to {}", target, evicted);
                self.fs.rename(&target, &evicted)?;
                hjs += 1;
            }
            self.fs.rename(&generation_path(name, self.datanum), &target)?;
        }
        self.datanum = new_datanum;
        Ok(())
    }

    /// Start a secure session over this disc: authenticate when a recorder
    /// is attached, then load the MAC list (always).
    pub fn open_session(
        &mut self,
        device: Option<Box<dyn crate::device::SecureDevice>>,
    ) -> Result<SecureSession, HimdError> {
        let mut session = SecureSession::new(device);
        if session.has_device() {
            session.authenticate(&self.disc_id)?;
        }
        let path = self.mclist_path();
        let mut file = self.fs.open(&path, OpenMode::Read)?;
        let raw = file.read_fully()?;
        session.load_maclist(&raw, &self.disc_id)?;
        Ok(session)
    }

    /// Finish a secure session: recompute the ICV, rotate the generation and
    /// persist the MAC list, pushing the ICV to the recorder when one is
    /// attached. All signing must already have happened.
    pub fn finalize_session(&mut self, session: &mut SecureSession) -> Result<(), HimdError> {
        session.compute_icv()?;
        self.flush()?;
        self.advance_generation(session.new_generation())?;

        let path = self.mclist_path();
        let mut file = self.fs.open(&path, OpenMode::ReadWrite)?;
        let mut raw = file.read_fully()?;
        session.patch_maclist(&mut raw)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&raw)?;
        drop(file);

        session.push_icv()
    }

    // -----------------------------------------------------------------------
    // Uploads
    // -----------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn build_track_entry(
        &mut self,
        codec_id: u8,
        codec_info: &[u8; 5],
        seconds: u32,
        title: Option<&str>,
        artist: Option<&str>,
        album: Option<&str>,
    ) -> Result<RawTrack, HimdError> {
        let mut track = RawTrack::default();
        track.codec_id = codec_id;
        track.set_codec_info(codec_info);
        track.seconds = seconds.min(u16::MAX as u32) as u16;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        track.recording_time = DosDateTime::from_unix(now).pack();
        track.lt = 1;
        track.xcc = 1;
        if let Some(title) = title {
            track.title_index = self.tif.add_string(title, StringType::Title)?;
        }
        if let Some(artist) = artist {
            track.artist_index = self.tif.add_string(artist, StringType::Artist)?;
        }
        if let Some(album) = album {
            track.album_index = self.tif.add_string(album, StringType::Album)?;
        }
        Ok(track)
    }

    fn report(progress: Option<&ProgressCallback>, status: ProgressStatus) {
        if let Some(cb) = progress {
            cb(status);
        }
    }

    /// Upload an MP3 buffer as a new track at the end of the ordering.
    /// Returns the new track's ordering index. The session needs no device,
    /// but it must have its MAC list loaded; the upload ends by finalizing
    /// the session.
    pub fn upload_mp3(
        &mut self,
        session: &mut SecureSession,
        data: &[u8],
        title: Option<&str>,
        artist: Option<&str>,
        album: Option<&str>,
        progress: Option<&ProgressCallback>,
    ) -> Result<usize, HimdError> {
        let ingest = mp3::ingest(data)?;
        let track = self.build_track_entry(
            codecinfo::CODEC_ATRAC3PLUS_OR_MPEG,
            &ingest.codec_info,
            ingest.duration_seconds,
            title,
            artist,
            album,
        )?;
        let slot = self.tif.add_track(&track)?;
        session.create_and_sign_new_track(&mut self.tif, slot)?;

        let signed = self.tif.get_track(slot)?;
        let content_id_lo = be32(&signed.content_id[16..]);
        let xor_key = mp3_encryption_key(&self.disc_id, signed.track_number);

        let frames_in_last = ingest
            .blocks
            .last()
            .map(|b| b.n_frames)
            .ok_or(HimdError::BlockDataTooLarge)?;
        let block_count = ingest.blocks.len();

        let atdata_path = self.atdata_path();
        let mut atdata = self.fs.open(&atdata_path, OpenMode::ReadWrite)?;
        let mut writer = BlockWriter::new(atdata.as_mut())?;
        for (i, mut block) in ingest.blocks.into_iter().enumerate() {
            block.content_id_lo = content_id_lo;
            mp3_obfuscate(&mut block.audio, &xor_key, block.len_data as usize);
            writer.write_block(&block)?;
            Self::report(
                progress,
                ProgressStatus::Progress((i + 1) as f64 / block_count as f64),
            );
        }
        let (first_block, last_block) = writer.close()?;
        drop(atdata);

        // MPEG fragments store last frame + 1; the final block's frame count
        // is exactly that.
        let fragment = Fragment {
            key: [0; 8],
            first_block,
            last_block,
            first_frame: 0,
            last_frame: frames_in_last.min(u8::MAX as u16) as u8,
            fragment_type: FRAGMENT_TYPE_AUDIO,
            next_fragment: 0,
        };
        let fragment_index = self.tif.add_fragment(&fragment)?;
        let mut entry = self.tif.get_track(slot)?;
        entry.first_fragment = fragment_index;
        self.tif.write_track(slot, &entry)?;

        let index = self.tif.append_track_ordering(slot)?;
        self.finalize_session(session)?;
        Self::report(progress, ProgressStatus::Complete);
        Ok(index)
    }

    /// Upload raw ATRAC3 / ATRAC3+ / LPCM frames as a new track. `data` must
    /// be a whole number of `frame_size`-byte frames.
    #[allow(clippy::too_many_arguments)]
    pub fn upload_audio(
        &mut self,
        session: &mut SecureSession,
        provider: &dyn CryptoProvider,
        codec: Codec,
        frame_size: usize,
        channels: u8,
        sample_rate: u32,
        data: &[u8],
        title: Option<&str>,
        artist: Option<&str>,
        album: Option<&str>,
        progress: Option<&ProgressCallback>,
    ) -> Result<usize, HimdError> {
        let (codec_id, codec_info) =
            codecinfo::generate_codec_info(codec, frame_size, channels, sample_rate)?;
        let frames_per_block = codecinfo::frames_per_block(codec, &codec_info);
        if frame_size == 0 || data.is_empty() || data.len() % frame_size != 0 {
            return Err(HimdError::BlockDataTooLarge);
        }
        let frames = data.len() / frame_size;
        let seconds =
            (frames as u64 * codecinfo::samples_per_frame(codec, &codec_info) as u64
                / sample_rate as u64) as u32;

        let track = self.build_track_entry(codec_id, &codec_info, seconds, title, artist, album)?;
        let slot = self.tif.add_track(&track)?;
        let track_key = session.create_and_sign_new_track(&mut self.tif, slot)?;

        let signed = self.tif.get_track(slot)?;
        let content_id_lo = be32(&signed.content_id[16..]);
        let fragment_key: [u8; 8] = rand::random();
        let block_type = match codec {
            Codec::Atrac3 => BlockType::Atrac3,
            Codec::Atrac3Plus => BlockType::Atrac3Plus,
            Codec::Lpcm => BlockType::Lpcm,
            Codec::Mpeg => return Err(HimdError::UnsupportedOperation),
        };

        let stream = EncryptStream::new(
            provider,
            track_key,
            fragment_key,
            block_type,
            frame_size,
            frames_per_block,
            content_id_lo,
            data,
        )?;
        let frames_in_last = stream.frames_in_last_block();
        let block_count = frames.div_ceil(frames_per_block);

        let atdata_path = self.atdata_path();
        let mut atdata = self.fs.open(&atdata_path, OpenMode::ReadWrite)?;
        let mut writer = BlockWriter::new(atdata.as_mut())?;
        for (i, block) in stream.enumerate() {
            writer.write_block(&block?)?;
            Self::report(
                progress,
                ProgressStatus::Progress((i + 1) as f64 / block_count as f64),
            );
        }
        let (first_block, last_block) = writer.close()?;
        drop(atdata);

        let fragment = Fragment {
            key: fragment_key,
            first_block,
            last_block,
            first_frame: 0,
            last_frame: (frames_in_last - 1) as u8,
            fragment_type: FRAGMENT_TYPE_AUDIO,
            next_fragment: 0,
        };
        let fragment_index = self.tif.add_fragment(&fragment)?;
        let mut entry = self.tif.get_track(slot)?;
        entry.first_fragment = fragment_index;
        self.tif.write_track(slot, &entry)?;

        let index = self.tif.append_track_ordering(slot)?;
        self.finalize_session(session)?;
        Self::report(progress, ProgressStatus::Complete);
        Ok(index)
    }

    // -----------------------------------------------------------------------
    // Dumps
    // -----------------------------------------------------------------------

    /// Dump a track into `out` in its natural container: EA3 for ATRAC,
    /// RIFF/WAV for LPCM, ID3v2 plus raw frames for MP3. Returns the codec
    /// so the caller can pick a file extension.
    pub fn dump_track(
        &mut self,
        provider: &dyn CryptoProvider,
        index: usize,
        out: &mut dyn Write,
    ) -> Result<Codec, HimdError> {
        let meta = self.track_metadata(index)?;
        let track = self.tif.get_track(meta.slot)?;
        let codec_info = track.codec_info();
        let fragments: Vec<Fragment> = walk_fragments(&self.tif, track.first_fragment)?
            .into_iter()
            .map(|(_, f)| f)
            .collect();
        let frames_per_block = codecinfo::frames_per_block(meta.codec, &codec_info);

        let atdata_path = self.atdata_path();
        let mut atdata = self.fs.open(&atdata_path, OpenMode::Read)?;
        let reader = BlockReader::new(
            atdata.as_mut(),
            fragments,
            frames_per_block,
            meta.codec == Codec::Mpeg,
        );

        match meta.codec {
            Codec::Mpeg => {
                containers::write_id3_tag(
                    out,
                    meta.title.as_deref(),
                    meta.artist.as_deref(),
                    meta.album.as_deref(),
                )?;
                let xor_key = mp3_encryption_key(&self.disc_id, track.track_number);
                for chunk in Mp3TrackReader::new(reader, xor_key) {
                    out.write_all(&chunk?)?;
                }
            }
            Codec::Lpcm => {
                let track_key = create_track_key(track.ekb_number, &track.key)?;
                let mut pcm = Vec::new();
                for chunk in TrackReader::new(reader, provider, track_key, 64) {
                    pcm.extend_from_slice(&chunk?);
                }
                containers::swap_pcm_samples(&mut pcm);
                out.write_all(&containers::wav_header(pcm.len() as u32))?;
                out.write_all(&pcm)?;
            }
            Codec::Atrac3 | Codec::Atrac3Plus => {
                let track_key = create_track_key(track.ekb_number, &track.key)?;
                let bytes_per_frame = codecinfo::bytes_per_frame(meta.codec, &codec_info);
                out.write_all(&containers::ea3_header(track.codec_id, &codec_info))?;
                for chunk in TrackReader::new(reader, provider, track_key, bytes_per_frame) {
                    out.write_all(&chunk?)?;
                }
            }
        }
        Ok(meta.codec)
    }

    // -----------------------------------------------------------------------
    // Deletion
    // -----------------------------------------------------------------------

    /// Delete the tracks at the given ordering positions, free their blocks,
    /// renumber the surviving fragments and re-sign the MAC list.
    pub fn delete_tracks(
        &mut self,
        session: &mut SecureSession,
        indices: &[usize],
    ) -> Result<(), HimdError> {
        let mut sorted = indices.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        // (first block, length in blocks), rounded out to 2-block clusters.
        let mut freed: Vec<(u16, u16)> = Vec::new();
        for &index in sorted.iter().rev() {
            let slot = self.tif.track_index_to_slot(index)?;
            let track = self.tif.get_track(slot)?;
            let chain = walk_fragments(&self.tif, track.first_fragment)?;
            for (fragment_index, fragment) in &chain {
                let start = fragment.first_block & !1;
                let span = fragment.last_block - start + 1;
                freed.push((start, (span + 1) & !1));
                self.tif.remove_fragment(*fragment_index)?;
            }
            for string_index in [track.title_index, track.album_index, track.artist_index] {
                if string_index != 0 {
                    self.tif.remove_string(string_index)?;
                }
            }
            session.clear_track_mac(track.track_number)?;
            self.tif.remove_track(slot)?;
            self.tif.remove_track_ordering(index)?;
            log::debug!("delete_tracks(): removed track {} (slot {})", index, slot);
        }

        // Shift every surviving fragment past a freed region down over it,
        // highest region first so earlier shifts cannot disturb later tests.
        let mut regions = freed.clone();
        regions.sort_by(|a, b| b.0.cmp(&a.0));
        for (region_start, region_len) in &regions {
            for index in 0..self.tif.track_count() {
                let slot = self.tif.track_index_to_slot(index)?;
                let track = self.tif.get_track(slot)?;
                for (fragment_index, mut fragment) in
                    walk_fragments(&self.tif, track.first_fragment)?
                {
                    if fragment.first_block > *region_start {
                        fragment.first_block -= region_len;
                        fragment.last_block -= region_len;
                        self.tif.write_fragment(fragment_index, &fragment)?;
                    }
                }
            }
        }

        let file_regions: Vec<FileRegion> = freed
            .iter()
            .map(|(start, len)| FileRegion {
                offset: *start as u64 * HIMD_BLOCK_SIZE as u64,
                length: *len as u64 * HIMD_BLOCK_SIZE as u64,
            })
            .collect();
        let atdata_path = self.atdata_path();
        match self.fs.free_file_regions(&atdata_path, &file_regions) {
            Ok(()) => {}
            Err(HimdError::UnsupportedOperation) => {
                log::debug!("delete_tracks(): driver does not free regions; blocks leak until rewrite");
            }
            Err(e) => return Err(e),
        }

        self.finalize_session(session)
    }
}
