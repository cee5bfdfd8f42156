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

//! # himd
//!
//! himd is a Rust library for reading and writing Sony Hi-MD discs, the
//! MiniDisc-successor storage format. A Hi-MD disc is a FAT volume carrying a
//! fixed set of files under `/HMDHIFI/`: an audio container of 16 KiB blocks
//! (`ATDATA`), a track-index database (`TRKIDX`) and a per-track MAC list
//! (`MCLIST`), tied together by a two-hex-digit generation suffix and secured
//! by Sony's DRM scheme.
//!
//! The library covers the on-disc object model (tracks, fragments, strings,
//! groups and their freelists), the block-level audio framing for ATRAC3,
//! ATRAC3+, LPCM and MP3, the key/MAC pipeline, and the secure authentication
//! session spoken with a physically attached recorder. Audio is never decoded;
//! raw encoded bytes are read and written.
//!
//! The main interface is the [`Himd`] handle, opened over a
//! [`vfs::DiscFilesystem`] implementation that exposes the mounted FAT volume.

pub mod block;
pub mod codecinfo;
pub mod containers;
pub mod crypto;
pub mod device;
pub mod disc;
mod io;
pub mod mp3;
pub mod secure;
pub mod stream;
pub mod text;
pub mod tif;
mod util;
pub mod vfs;

use thiserror::Error;

/// Directory on the FAT volume holding all Hi-MD files.
pub const HIMD_ROOT: &str = "HMDHIFI";
/// Size of one audio container block.
pub const HIMD_BLOCK_SIZE: usize = 0x4000;
/// Bytes of audio payload carried by one block.
pub const HIMD_AUDIO_SIZE: usize = 0x3FC0;
/// Size of the track index image.
pub const HIMD_TIF_SIZE: usize = 0x50000;
/// The only EKB version this library understands.
pub const HIMD_EKB_VERSION: u32 = 0x0001_0012;

pub enum ProgressStatus {
    Progress(f64),
    Complete,
}

/// Best-effort progress reporting for long operations. Callbacks never affect
/// control flow.
pub type ProgressCallback = Box<dyn Fn(ProgressStatus) + Send + 'static>;

#[derive(Debug, Error)]
pub enum HimdError {
    #[error("An IO error occurred reading or writing the disc")]
    IoError(String),
    #[error("No track index file was found under /HMDHIFI")]
    NoTrackIndex,
    #[error("The track index file is missing, truncated or has a bad magic")]
    InvalidTrackIndex,
    #[error("EKB number {0:#010x} is not in the root key table")]
    UnknownEkb(u32),
    #[error("A stored string does not decode with its declared encoding")]
    InvalidEncoding,
    #[error("The string cannot be represented in any supported encoding")]
    Unencodable,
    #[error("The string freelist has too few chunks left")]
    NotEnoughStringSlots,
    #[error("No free slots remain in the track or fragment table")]
    IndexFull,
    #[error("A fragment chain does not terminate or links out of range")]
    FragmentChainBroken,
    #[error("A fragment's last frame precedes its first frame")]
    LastFrameBeforeFirstFrame,
    #[error("A block declares more payload than a block can carry")]
    BlockDataTooLarge,
    #[error("A frame index lies outside its block")]
    FrameOutOfRange,
    #[error("Attempted to write through a read-only file handle")]
    ReadOnlyFile,
    #[error("The path names a directory where a file was expected")]
    DirectoryAsFile,
    #[error("The device MAC did not verify against the host nonce")]
    DeviceMacMismatch,
    #[error("The ICV MAC did not verify against the session key")]
    IcvMacMismatch,
    #[error("The MAC list was signed under a different EKB")]
    EkbMismatch,
    #[error("The crypto provider is already in use")]
    ProviderBusy,
    #[error("The driver does not support the requested operation")]
    UnsupportedOperation,
}

// Manually implement `From<io::Error>` for `HimdError`
impl From<std::io::Error> for HimdError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => HimdError::ReadOnlyFile,
            _ => HimdError::IoError(err.to_string()),
        }
    }
}

// Manually implement `From<binrw::Error>` for `HimdError`
impl From<binrw::Error> for HimdError {
    fn from(err: binrw::Error) -> Self {
        HimdError::IoError(err.to_string())
    }
}

pub use crate::block::{AudioBlock, BlockType};
pub use crate::codecinfo::Codec;
pub use crate::disc::{Himd, TrackMetadata};
pub use crate::secure::SecureSession;
pub use crate::tif::{Fragment, RawTrack, TrackIndex};
pub use crate::vfs::{DiscFilesystem, HostFilesystem, OpenMode, RamFilesystem};
