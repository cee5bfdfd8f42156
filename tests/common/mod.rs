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

    tests/common/mod.rs

    Fixture discs and a mock recorder for the integration tests.
*/

use std::sync::{Arc, Mutex};

use himd::crypto::{self, create_icv_mac, retail_mac, MAIN_KEY};
use himd::device::{IcvInfo, SecureDevice, Stage2Info};
use himd::secure::{mclist, HOST_LEAF_ID};
use himd::tif::{StringChunk, StringType, TrackIndex};
use himd::{Himd, HimdError, RamFilesystem, HIMD_EKB_VERSION};

#[allow(dead_code)]
pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub const DISC_ID: [u8; 16] = [
    0xD1, 0x5C, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x1B, 0x2C, 0x3D,
    0x4E,
];
pub const HEAD_KEY: [u8; 16] = [0x11; 16];
pub const BODY_KEY: [u8; 16] = [0x22; 16];

/// The EKB key block a stage-2 response must carry.
#[allow(dead_code)]
pub const SESSION_EKB_KEY: [u8; 16] = [
    0x6A, 0x7A, 0x4C, 0x7D, 0x5F, 0x3F, 0x86, 0x84, 0x28, 0x6D, 0x1A, 0x12, 0x32, 0x98, 0x22,
    0x13,
];

pub fn generation_file(name: &str, datanum: u8) -> String {
    format!("HMDHIFI/{}{:02X}.HMA", name, datanum)
}

fn wrap_maclist_key(plain: &[u8; 16]) -> [u8; 16] {
    let mut cipher = *plain;
    crypto::triple_des_ecb_encrypt(
        crypto::ekb_root(HIMD_EKB_VERSION).expect("retail EKB is known"),
        &mut cipher,
    );
    cipher
}

/// An MCLIST image with the fixture disc id, signing keys and generation 1.
pub fn blank_mclist() -> Vec<u8> {
    let mut raw = vec![0u8; mclist::FILE_SIZE];
    raw[mclist::OFS_EKB_ID..mclist::OFS_EKB_ID + 4]
        .copy_from_slice(&HIMD_EKB_VERSION.to_be_bytes());
    raw[mclist::OFS_GENERATION..mclist::OFS_GENERATION + 4].copy_from_slice(&1u32.to_be_bytes());
    raw[mclist::OFS_DISC_ID..mclist::OFS_DISC_ID + 16].copy_from_slice(&DISC_ID);
    raw[mclist::OFS_HEAD_KEY..mclist::OFS_HEAD_KEY + 16]
        .copy_from_slice(&wrap_maclist_key(&HEAD_KEY));
    raw[mclist::OFS_BODY_KEY..mclist::OFS_BODY_KEY + 16]
        .copy_from_slice(&wrap_maclist_key(&BODY_KEY));
    raw
}

/// An empty disc at generation `datanum`, ready for `Himd::open`.
pub fn blank_disc(datanum: u8) -> RamFilesystem {
    let fs = RamFilesystem::new();
    fs.put(&generation_file("ATDATA", datanum), Vec::new());
    fs.put(
        &generation_file("TRKIDX", datanum),
        TrackIndex::blank().as_bytes().to_vec(),
    );
    fs.put(&generation_file("MCLIST", datanum), blank_mclist());
    fs
}

/// A disc built from a prepared track index.
#[allow(dead_code)]
pub fn disc_with_tif(datanum: u8, tif: &TrackIndex) -> RamFilesystem {
    let fs = blank_disc(datanum);
    fs.put(&generation_file("TRKIDX", datanum), tif.as_bytes().to_vec());
    fs
}

pub fn open_disc(fs: &RamFilesystem) -> Himd {
    Himd::open(Box::new(fs.clone())).expect("fixture disc opens")
}

/// Store a string forced into UTF-16BE regardless of what the encoding
/// picker would choose, by rewriting the chunks of a placeholder chain.
#[allow(dead_code)]
pub fn add_string_forced_utf16(tif: &mut TrackIndex, s: &str, string_type: StringType) -> u16 {
    let mut data = vec![0x84u8];
    data.extend(s.encode_utf16().flat_map(|unit| unit.to_be_bytes()));
    let chunks = data.len().div_ceil(14);
    let placeholder = "x".repeat(chunks * 14 - 1);
    let root = tif
        .add_string(&placeholder, string_type)
        .expect("placeholder string fits");

    data.resize(chunks * 14, 0);
    let mut index = root;
    for span in data.chunks_exact(14) {
        let old = tif.get_string_chunk(index).expect("chain chunk exists");
        let mut content = [0u8; 14];
        content.copy_from_slice(span);
        tif.write_string_chunk(
            index,
            &StringChunk {
                content,
                chunk_type: old.chunk_type,
                link: old.link,
            },
        )
        .expect("chain chunk rewrites");
        index = old.link;
    }
    root
}

/// A syntactically valid MPEG-1 Layer III 128 kbit/s 44.1 kHz stereo frame,
/// 417 bytes, no padding.
#[allow(dead_code)]
pub fn mp3_frame() -> Vec<u8> {
    let mut frame: Vec<u8> = (0..417u32).map(|i| (i % 251) as u8).collect();
    frame[0] = 0xFF;
    frame[1] = 0xFB;
    frame[2] = 0x90;
    frame[3] = 0x00;
    frame
}

// ---------------------------------------------------------------------------
// Mock recorder
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockDeviceState {
    pub host_nonce: Option<[u8; 8]>,
    pub host_mac: Option<[u8; 8]>,
    pub device_mac: Option<[u8; 8]>,
    pub written_icv: Option<([u8; 8], [u8; 16], [u8; 8])>,
}

/// A recorder double that follows the handshake honestly. Clones share
/// state, so tests keep one handle while the session owns the other.
#[derive(Clone)]
pub struct MockDevice {
    pub state: Arc<Mutex<MockDeviceState>>,
    device_nonce: [u8; 8],
    generation: u32,
    /// When set, stage 2 reports a corrupted MAC.
    pub tamper_mac: bool,
}

impl MockDevice {
    #[allow(dead_code)]
    pub fn new(generation: u32) -> MockDevice {
        MockDevice {
            state: Arc::new(Mutex::new(MockDeviceState::default())),
            device_nonce: [0xD0, 0xD1, 0xD2, 0xD3, 0xD4, 0xD5, 0xD6, 0xD7],
            generation,
            tamper_mac: false,
        }
    }
}

impl SecureDevice for MockDevice {
    fn write_host_leaf_id(
        &mut self,
        leaf_id: &[u8; 8],
        host_nonce: &[u8; 8],
    ) -> Result<(), HimdError> {
        assert_eq!(leaf_id, &HOST_LEAF_ID);
        self.state.lock().unwrap().host_nonce = Some(*host_nonce);
        Ok(())
    }

    fn get_authentication_stage2_info(&mut self) -> Result<Stage2Info, HimdError> {
        let mut state = self.state.lock().unwrap();
        let host_nonce = state.host_nonce.expect("stage 1 ran first");
        let mut message = Vec::new();
        message.extend_from_slice(&DISC_ID);
        message.extend_from_slice(&host_nonce);
        message.extend_from_slice(&self.device_nonce);
        let mut mac = retail_mac(&message, &MAIN_KEY);
        if self.tamper_mac {
            mac[0] ^= 0xFF;
        }
        state.device_mac = Some(mac);
        Ok(Stage2Info {
            disc_id: DISC_ID,
            mac,
            device_leaf_id: [0x01, 0x00, 0x00, 0x00, 0x00, 0x42, 0x42, 0x42],
            device_nonce: self.device_nonce,
            key_type: 0x0000_0001,
            key_level: 0x0000_0009,
            ekb_id: HIMD_EKB_VERSION,
            key: SESSION_EKB_KEY,
        })
    }

    fn write_authentication_stage3_info(&mut self, host_mac: &[u8; 8]) -> Result<(), HimdError> {
        let mut state = self.state.lock().unwrap();
        let host_nonce = state.host_nonce.expect("stage 1 ran first");
        let mut message = Vec::new();
        message.extend_from_slice(&DISC_ID);
        message.extend_from_slice(&self.device_nonce);
        message.extend_from_slice(&host_nonce);
        if retail_mac(&message, &MAIN_KEY) != *host_mac {
            return Err(HimdError::DeviceMacMismatch);
        }
        state.host_mac = Some(*host_mac);
        Ok(())
    }

    fn read_icv(&mut self) -> Result<IcvInfo, HimdError> {
        let state = self.state.lock().unwrap();
        let mut header = [0u8; 8];
        header[0] = 0x01;
        header[4..].copy_from_slice(&self.generation.to_be_bytes());
        let icv = [0u8; 16];

        // Report the MAC over what the host will hold after patching the
        // header, under the session key both sides can now derive.
        let device_mac = state.device_mac.expect("stage 2 ran first");
        let host_mac = state.host_mac.expect("stage 3 ran first");
        let mut message = Vec::new();
        message.extend_from_slice(&DISC_ID);
        message.extend_from_slice(&device_mac);
        message.extend_from_slice(&host_mac);
        let session_key = retail_mac(&message, &MAIN_KEY);

        let mut patched = header;
        patched[1] = 0x20;
        patched[4..].copy_from_slice(&(self.generation + 1).to_be_bytes());
        let mut bound = Vec::new();
        bound.extend_from_slice(&patched);
        bound.extend_from_slice(&icv);
        let mac = create_icv_mac(&bound, &session_key);

        Ok(IcvInfo { header, icv, mac })
    }

    fn write_icv(
        &mut self,
        header: &[u8; 8],
        icv: &[u8; 16],
        mac: &[u8; 8],
    ) -> Result<(), HimdError> {
        self.state.lock().unwrap().written_icv = Some((*header, *icv, *mac));
        Ok(())
    }
}
