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

//! The secure session: authentication with an attached recorder, the MAC
//! list, per-track signing and ICV finalization.
//!
//! A session can run without a device: the MAC list is always loaded and
//! re-signed in software, which is enough for MP3 uploads and deletions on a
//! disc that will only meet the recorder through the filesystem. With a
//! device attached, the handshake of opcodes 0x30 to 0x34 binds the new ICV
//! to the recorder's internal state as well.

use crate::crypto::{
    create_icv_mac, create_track_mac, decrypt_maclist_key, encrypt_track_key, retail_mac, MAIN_KEY,
};
use crate::device::SecureDevice;
use crate::tif::TrackIndex;
use crate::util::{be32, put_be32};
use crate::{HimdError, HIMD_EKB_VERSION};

/// Leaf id the host presents in stage 1.
pub const HOST_LEAF_ID: [u8; 8] = [0x02, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];

/// Fixed fields of a well-formed stage-2 response.
const EXPECTED_KEY_TYPE: u32 = 0x0000_0001;
const EXPECTED_KEY_LEVEL: u32 = 0x0000_0009;
const EXPECTED_EKB_KEY: [u8; 16] = [
    0x6A, 0x7A, 0x4C, 0x7D, 0x5F, 0x3F, 0x86, 0x84, 0x28, 0x6D, 0x1A, 0x12, 0x32, 0x98, 0x22,
    0x13,
];

/// Leading bytes of every content id this library mints.
const CONTENT_ID_HEADER: [u8; 8] = [0x01, 0x0F, 0x50, 0x00, 0x00, 0x04, 0x00, 0x00];

/// The MAC list holds one 8-byte MAC per track for 4000 tracks.
pub const MACLIST_MAC_BYTES: usize = 32_000;

/// MCLIST file offsets.
pub mod mclist {
    pub const OFS_HEAD_KEY: usize = 0x10;
    pub const OFS_GENERATION: usize = 0x20;
    pub const OFS_EKB_ID: usize = 0x38;
    pub const OFS_DISC_ID: usize = 0x40;
    pub const OFS_BODY_KEY: usize = 0x60;
    pub const OFS_MACS: usize = 0x70;
    pub const FILE_SIZE: usize = OFS_MACS + super::MACLIST_MAC_BYTES;
}

pub struct SecureSession {
    device: Option<Box<dyn SecureDevice>>,
    host_nonce: [u8; 8],
    disc_id: [u8; 16],
    session_key: Option<[u8; 8]>,
    icv_header: [u8; 8],
    icv: [u8; 16],
    device_icv_mac: Option<[u8; 8]>,
    new_generation: u32,
    head_key: [u8; 16],
    body_key: [u8; 16],
    all_macs: Vec<u8>,
    maclist_loaded: bool,
}

impl std::fmt::Debug for SecureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureSession")
            .field("device", &self.device.is_some())
            .field("host_nonce", &self.host_nonce)
            .field("disc_id", &self.disc_id)
            .field("session_key", &self.session_key)
            .field("icv_header", &self.icv_header)
            .field("icv", &self.icv)
            .field("device_icv_mac", &self.device_icv_mac)
            .field("new_generation", &self.new_generation)
            .field("head_key", &self.head_key)
            .field("body_key", &self.body_key)
            .field("all_macs", &self.all_macs)
            .field("maclist_loaded", &self.maclist_loaded)
            .finish()
    }
}

impl SecureSession {
    pub fn new(device: Option<Box<dyn SecureDevice>>) -> SecureSession {
        SecureSession {
            device,
            host_nonce: rand::random(),
            disc_id: [0; 16],
            session_key: None,
            icv_header: [0; 8],
            icv: [0; 16],
            device_icv_mac: None,
            new_generation: 0,
            head_key: [0; 16],
            body_key: [0; 16],
            all_macs: Vec::new(),
            maclist_loaded: false,
        }
    }

    pub fn has_device(&self) -> bool {
        self.device.is_some()
    }

    pub fn new_generation(&self) -> u32 {
        self.new_generation
    }

    pub fn all_macs(&self) -> &[u8] {
        &self.all_macs
    }

    /// Run the four-step handshake against the attached recorder.
    pub fn authenticate(&mut self, disc_id: &[u8; 16]) -> Result<(), HimdError> {
        let device = self
            .device
            .as_mut()
            .ok_or(HimdError::UnsupportedOperation)?;

        device.write_host_leaf_id(&HOST_LEAF_ID, &self.host_nonce)?;

        let info = device.get_authentication_stage2_info()?;
        if info.key_type != EXPECTED_KEY_TYPE
            || info.key_level != EXPECTED_KEY_LEVEL
            || info.ekb_id != HIMD_EKB_VERSION
            || info.key != EXPECTED_EKB_KEY
        {
            log::warn!(
                "authenticate(): stage 2 fixed fields mismatch (type {:#x}, level {:#x}, ekb {:#x})",
                info.key_type,
                info.key_level,
                info.ekb_id
            );
            return Err(HimdError::EkbMismatch);
        }
        if info.disc_id != *disc_id {
            log::warn!("authenticate(): device disc id differs from MCLIST disc id");
        }

        let mut message = Vec::with_capacity(32);
        message.extend_from_slice(&info.disc_id);
        message.extend_from_slice(&self.host_nonce);
        message.extend_from_slice(&info.device_nonce);
        if retail_mac(&message, &MAIN_KEY) != info.mac {
            return Err(HimdError::DeviceMacMismatch);
        }

        let mut message = Vec::with_capacity(32);
        message.extend_from_slice(&info.disc_id);
        message.extend_from_slice(&info.device_nonce);
        message.extend_from_slice(&self.host_nonce);
        let host_mac = retail_mac(&message, &MAIN_KEY);
        device.write_authentication_stage3_info(&host_mac)?;

        let icv_info = device.read_icv()?;
        self.icv_header = icv_info.header;
        self.icv = icv_info.icv;
        self.device_icv_mac = Some(icv_info.mac);

        self.new_generation = be32(&icv_info.header[4..]) + 1;
        self.icv_header[1] = 0x20;
        put_be32(&mut self.icv_header[4..], self.new_generation);

        let mut message = Vec::with_capacity(32);
        message.extend_from_slice(&info.disc_id);
        message.extend_from_slice(&info.mac);
        message.extend_from_slice(&host_mac);
        self.session_key = Some(retail_mac(&message, &MAIN_KEY));
        self.disc_id = info.disc_id;

        // The reference implementation does not insist on this check; real
        // recorders have been seen failing it without consequence.
        if let Err(e) = self.verify_icv_mac() {
            log::warn!("authenticate(): ICV MAC did not verify: {}", e);
        }
        Ok(())
    }

    /// Check the device-reported ICV MAC against the session key.
    pub fn verify_icv_mac(&self) -> Result<(), HimdError> {
        let (session_key, device_mac) = match (self.session_key, self.device_icv_mac) {
            (Some(k), Some(m)) => (k, m),
            _ => return Err(HimdError::IcvMacMismatch),
        };
        let mut message = Vec::with_capacity(24);
        message.extend_from_slice(&self.icv_header);
        message.extend_from_slice(&self.icv);
        if create_icv_mac(&message, &session_key) != device_mac {
            return Err(HimdError::IcvMacMismatch);
        }
        Ok(())
    }

    /// Load the MAC list from the raw MCLIST bytes. Always possible, device
    /// or not; without a prior `authenticate` the generation is taken from
    /// the file and a fresh ICV header is synthesized.
    pub fn load_maclist(&mut self, raw: &[u8], disc_id: &[u8; 16]) -> Result<(), HimdError> {
        if raw.len() < mclist::FILE_SIZE {
            return Err(HimdError::IoError("MCLIST file is truncated".into()));
        }
        if be32(&raw[mclist::OFS_EKB_ID..]) != HIMD_EKB_VERSION {
            return Err(HimdError::EkbMismatch);
        }
        let head_cipher: [u8; 16] = raw[mclist::OFS_HEAD_KEY..mclist::OFS_HEAD_KEY + 16]
            .try_into()
            .expect("head key cipher is 16 bytes");
        let body_cipher: [u8; 16] = raw[mclist::OFS_BODY_KEY..mclist::OFS_BODY_KEY + 16]
            .try_into()
            .expect("body key cipher is 16 bytes");
        self.head_key = decrypt_maclist_key(&head_cipher);
        self.body_key = decrypt_maclist_key(&body_cipher);
        self.all_macs = raw[mclist::OFS_MACS..mclist::OFS_MACS + MACLIST_MAC_BYTES].to_vec();
        self.disc_id = *disc_id;

        if self.session_key.is_none() {
            self.new_generation = be32(&raw[mclist::OFS_GENERATION..]) + 1;
            self.icv_header = [0x01, 0x20, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
            put_be32(&mut self.icv_header[4..], self.new_generation);
        }
        self.maclist_loaded = true;
        Ok(())
    }

    /// Generate key material and a content id for the track at `slot`, sign
    /// its entry, and record the MAC in the list. Returns the plain track
    /// key for the upload's block encryption.
    pub fn create_and_sign_new_track(
        &mut self,
        tif: &mut TrackIndex,
        slot: u16,
    ) -> Result<[u8; 8], HimdError> {
        if !self.maclist_loaded {
            return Err(HimdError::UnsupportedOperation);
        }
        let mut track = tif.get_track(slot)?;
        let track_key: [u8; 8] = rand::random();
        track.key = encrypt_track_key(&track_key);
        track.ekb_number = HIMD_EKB_VERSION;

        let mut content_id = [0u8; 20];
        content_id[..8].copy_from_slice(&CONTENT_ID_HEADER);
        let tail: [u8; 8] = rand::random();
        content_id[12..].copy_from_slice(&tail);
        track.content_id = content_id;

        let mac = create_track_mac(&track_key, &track.signed_region());
        track.mac = mac;
        tif.write_track(slot, &track)?;
        self.store_track_mac(track.track_number, &mac)?;
        Ok(track_key)
    }

    /// Re-sign an already keyed track after its signed fields changed.
    pub fn resign_track(&mut self, tif: &mut TrackIndex, slot: u16) -> Result<(), HimdError> {
        let mut track = tif.get_track(slot)?;
        let track_key = crate::crypto::create_track_key(track.ekb_number, &track.key)?;
        let mac = create_track_mac(&track_key, &track.signed_region());
        track.mac = mac;
        tif.write_track(slot, &track)?;
        self.store_track_mac(track.track_number, &mac)
    }

    fn store_track_mac(&mut self, track_number: u16, mac: &[u8; 8]) -> Result<(), HimdError> {
        let offset = self.mac_offset(track_number)?;
        self.all_macs[offset..offset + 8].copy_from_slice(mac);
        Ok(())
    }

    /// Clear the MAC entry of a deleted track.
    pub fn clear_track_mac(&mut self, track_number: u16) -> Result<(), HimdError> {
        let offset = self.mac_offset(track_number)?;
        self.all_macs[offset..offset + 8].fill(0);
        Ok(())
    }

    fn mac_offset(&self, track_number: u16) -> Result<usize, HimdError> {
        if !self.maclist_loaded {
            return Err(HimdError::UnsupportedOperation);
        }
        let offset = (track_number as usize)
            .checked_sub(1)
            .ok_or(HimdError::InvalidTrackIndex)?
            * 8;
        if offset + 8 > self.all_macs.len() {
            return Err(HimdError::InvalidTrackIndex);
        }
        Ok(offset)
    }

    /// Recompute the disc ICV over the current MAC table.
    pub fn compute_icv(&mut self) -> Result<(), HimdError> {
        if !self.maclist_loaded {
            return Err(HimdError::UnsupportedOperation);
        }
        let head_half = retail_mac(&self.icv_header, &self.head_key);
        let body_half = retail_mac(&self.all_macs, &self.body_key);
        self.icv[..8].copy_from_slice(&head_half);
        self.icv[8..].copy_from_slice(&body_half);
        Ok(())
    }

    /// Write the new generation, disc id and MAC table into an MCLIST image.
    pub fn patch_maclist(&self, raw: &mut [u8]) -> Result<(), HimdError> {
        if raw.len() < mclist::FILE_SIZE || !self.maclist_loaded {
            return Err(HimdError::IoError("MCLIST file is truncated".into()));
        }
        put_be32(&mut raw[mclist::OFS_GENERATION..], self.new_generation);
        raw[mclist::OFS_DISC_ID..mclist::OFS_DISC_ID + 16].copy_from_slice(&self.disc_id);
        raw[mclist::OFS_MACS..mclist::OFS_MACS + MACLIST_MAC_BYTES]
            .copy_from_slice(&self.all_macs);
        Ok(())
    }

    /// Send the recomputed ICV to the recorder, bound to the session key.
    /// A session without a device has nothing to push.
    pub fn push_icv(&mut self) -> Result<(), HimdError> {
        let session_key = match self.session_key {
            Some(k) => k,
            None => return Ok(()),
        };
        let device = match self.device.as_mut() {
            Some(d) => d,
            None => return Ok(()),
        };
        let mut message = Vec::with_capacity(24);
        message.extend_from_slice(&self.icv_header);
        message.extend_from_slice(&self.icv);
        let mac = create_icv_mac(&message, &session_key);
        device.write_icv(&self.icv_header, &self.icv, &mac)
    }

    pub fn icv(&self) -> &[u8; 16] {
        &self.icv
    }

    pub fn icv_header(&self) -> &[u8; 8] {
        &self.icv_header
    }

    pub fn head_key(&self) -> &[u8; 16] {
        &self.head_key
    }

    pub fn body_key(&self) -> &[u8; 16] {
        &self.body_key
    }
}
