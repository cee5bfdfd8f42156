mod common;

use common::*;
use himd::crypto::mp3_encryption_key;
use himd::{Codec, HimdError, HIMD_BLOCK_SIZE};

fn be16(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[0], buf[1]])
}

#[test]
fn single_frame_mp3_upload() {
    init();
    let fs = blank_disc(1);
    let mut disc = open_disc(&fs);
    let mut session = disc.open_session(None).unwrap();

    let frame = mp3_frame();
    let index = disc
        .upload_mp3(
            &mut session,
            &frame,
            Some("Single frame"),
            Some("Nobody"),
            None,
            None,
        )
        .unwrap();
    assert_eq!(index, 0);
    assert_eq!(disc.track_count(), 1);

    // The upload finalized the session and rotated generation 1 to 2.
    assert_eq!(disc.generation(), 2);
    assert!(fs.contains(&generation_file("ATDATA", 2)));
    assert!(fs.contains(&generation_file("TRKIDX", 2)));
    assert!(fs.contains(&generation_file("MCLIST", 2)));
    assert!(!fs.contains(&generation_file("ATDATA", 1)));

    let meta = disc.track_metadata(0).unwrap();
    assert_eq!(meta.codec, Codec::Mpeg);
    assert_eq!(meta.title.as_deref(), Some("Single frame"));
    // 1152 samples at 44.1 kHz is well under one second.
    assert_eq!(meta.duration_seconds, 0);

    let track = disc.track_index().get_track(meta.slot).unwrap();
    let info = track.codec_info();
    assert_eq!(info[0], 3);
    assert_eq!(info[2], 0x80);
    assert_eq!(info[3], (3 << 6) | (1 << 4) | 9);

    // One fragment covering one block; MPEG stores last frame + 1.
    let fragment = disc.track_index().get_fragment(track.first_fragment).unwrap();
    assert_eq!(fragment.first_block, 0);
    assert_eq!(fragment.last_block, 0);
    assert_eq!(fragment.first_frame, 0);
    assert_eq!(fragment.last_frame, 1);
    assert_eq!(fragment.next_fragment, 0);
}

#[test]
fn mp3_blocks_are_obfuscated_on_disc() {
    init();
    let fs = blank_disc(1);
    let mut disc = open_disc(&fs);
    let mut session = disc.open_session(None).unwrap();

    let frame = mp3_frame();
    disc.upload_mp3(&mut session, &frame, None, None, None, None)
        .unwrap();

    let atdata = fs.snapshot(&generation_file("ATDATA", 2)).unwrap();
    assert_eq!(atdata.len(), HIMD_BLOCK_SIZE);
    assert_eq!(&atdata[0..4], b"SMPA");
    assert_eq!(be16(&atdata[4..]), 1);
    assert_eq!(be16(&atdata[8..]), 417);

    let track = disc
        .track_index()
        .get_track(disc.track_index().track_index_to_slot(0).unwrap())
        .unwrap();
    let key = mp3_encryption_key(disc.disc_id(), track.track_number);

    // The payload is XORed over whole 8-byte groups; the 417th byte is clear.
    let payload = &atdata[0x20..0x20 + 417];
    for (i, byte) in payload.iter().enumerate() {
        if i < (417 & !7) {
            assert_eq!(*byte, frame[i] ^ key[i % 4], "obfuscated byte {}", i);
        } else {
            assert_eq!(*byte, frame[i], "clear tail byte {}", i);
        }
    }

    // The low 32 bits of the content id ride in the block trailer.
    assert_eq!(
        &atdata[16376..16380],
        &track.content_id[16..20],
        "content id tail mismatch"
    );
}

#[test]
fn mp3_dump_round_trips_the_frames() {
    init();
    let fs = blank_disc(1);
    let mut disc = open_disc(&fs);
    let mut session = disc.open_session(None).unwrap();

    let mut data = Vec::new();
    for _ in 0..3 {
        data.extend_from_slice(&mp3_frame());
    }
    disc.upload_mp3(&mut session, &data, Some("Dump me"), None, None, None)
        .unwrap();

    let provider = himd::crypto::SoftwareCrypto::new();
    let mut out = Vec::new();
    let codec = disc.dump_track(&provider, 0, &mut out).unwrap();
    assert_eq!(codec, Codec::Mpeg);
    assert_eq!(&out[..3], b"ID3");
    // The de-obfuscated frames form the tail of the dump, after the tag.
    assert!(out.len() > data.len());
    assert_eq!(&out[out.len() - data.len()..], &data[..]);
}

#[test]
fn garbage_input_is_rejected_before_any_mutation() {
    init();
    let fs = blank_disc(1);
    let mut disc = open_disc(&fs);
    let mut session = disc.open_session(None).unwrap();

    let junk = vec![0u8; 2048];
    let err = disc
        .upload_mp3(&mut session, &junk, None, None, None, None)
        .unwrap_err();
    assert!(matches!(err, HimdError::IoError(_)));
    assert_eq!(disc.track_count(), 0);
    assert_eq!(disc.generation(), 1);
    assert_eq!(
        fs.snapshot(&generation_file("ATDATA", 1)).unwrap().len(),
        0
    );
}
