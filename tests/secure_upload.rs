mod common;

use common::*;
use himd::crypto::{
    create_icv_mac, create_track_key, create_track_mac, retail_mac, SoftwareCrypto, MAIN_KEY,
};
use himd::secure::mclist;
use himd::{Codec, HIMD_BLOCK_SIZE};

#[test]
fn atrac3_upload_under_a_device_session() {
    init();
    let fs = blank_disc(1);
    let mut disc = open_disc(&fs);
    let device = MockDevice::new(1);
    let mut session = disc.open_session(Some(Box::new(device.clone()))).unwrap();
    let provider = SoftwareCrypto::new();

    // Two 192-byte ATRAC3 frames: exactly one block.
    let data: Vec<u8> = (0..2 * 192u32).map(|i| (i % 241) as u8).collect();
    let index = disc
        .upload_audio(
            &mut session,
            &provider,
            Codec::Atrac3,
            192,
            2,
            44100,
            &data,
            Some("LP2 test"),
            None,
            None,
            None,
        )
        .unwrap();
    assert_eq!(index, 0);
    assert_eq!(disc.generation(), 2);

    let atdata = fs.snapshot(&generation_file("ATDATA", 2)).unwrap();
    assert_eq!(atdata.len(), HIMD_BLOCK_SIZE);
    assert_eq!(&atdata[0..4], b"A3D ");
    assert_eq!(u16::from_be_bytes([atdata[4], atdata[5]]), 2);
    assert_eq!(u16::from_be_bytes([atdata[8], atdata[9]]), 384);
    // The payload is ciphertext, not the raw frames.
    assert_ne!(&atdata[0x20..0x20 + 384], &data[..]);

    let slot = disc.track_index().track_index_to_slot(0).unwrap();
    let track = disc.track_index().get_track(slot).unwrap();
    let fragment = disc.track_index().get_fragment(track.first_fragment).unwrap();
    assert_eq!(fragment.first_block, 0);
    assert_eq!(fragment.last_block, 0);
    assert_eq!(fragment.first_frame, 0);
    // Non-MPEG fragments store the inclusive last frame index.
    assert_eq!(fragment.last_frame, 1);
    assert_ne!(fragment.key, [0; 8]);

    // The track MAC is stored on the slot and in the rotated MAC list.
    let track_key = create_track_key(track.ekb_number, &track.key).unwrap();
    let expected_mac = create_track_mac(&track_key, &track.signed_region());
    assert_eq!(track.mac, expected_mac);
    let raw = fs.snapshot(&generation_file("MCLIST", 2)).unwrap();
    let offset = mclist::OFS_MACS + (track.track_number as usize - 1) * 8;
    assert_eq!(&raw[offset..offset + 8], &expected_mac);

    // The recorder received the recomputed ICV, bound to the session key.
    let state = device.state.lock().unwrap();
    let (header, icv, icv_mac) = state.written_icv.expect("ICV was pushed");
    assert_eq!(header[1], 0x20);
    assert_eq!(&header[4..], &2u32.to_be_bytes());
    let macs = &raw[mclist::OFS_MACS..mclist::OFS_MACS + himd::secure::MACLIST_MAC_BYTES];
    assert_eq!(&icv[..8], &retail_mac(&header, &HEAD_KEY));
    assert_eq!(&icv[8..], &retail_mac(macs, &BODY_KEY));

    let mut bound = Vec::new();
    bound.extend_from_slice(&DISC_ID);
    bound.extend_from_slice(&state.device_mac.unwrap());
    bound.extend_from_slice(&state.host_mac.unwrap());
    let session_key = retail_mac(&bound, &MAIN_KEY);
    let mut signed = Vec::new();
    signed.extend_from_slice(&header);
    signed.extend_from_slice(&icv);
    assert_eq!(icv_mac, create_icv_mac(&signed, &session_key));
}

#[test]
fn atrac3_dump_round_trips_the_payload() {
    init();
    let fs = blank_disc(1);
    let mut disc = open_disc(&fs);
    let mut session = disc.open_session(None).unwrap();
    let provider = SoftwareCrypto::new();

    // Five frames: still one block at 84 frames per block.
    let data: Vec<u8> = (0..5 * 192u32).map(|i| (i % 199) as u8).collect();
    disc.upload_audio(
        &mut session,
        &provider,
        Codec::Atrac3,
        192,
        2,
        44100,
        &data,
        None,
        None,
        None,
        None,
    )
    .unwrap();

    let mut out = Vec::new();
    let codec = disc.dump_track(&provider, 0, &mut out).unwrap();
    assert_eq!(codec, Codec::Atrac3);
    assert_eq!(out.len(), 96 + data.len());
    assert_eq!(&out[..4], &[0x45, 0x41, 0x33, 0x01]);
    // Bytes 32..36 of the EA3 header: codec id plus descriptor head.
    assert_eq!(out[32], 0x00);
    assert_eq!(&out[96..], &data[..]);
}

#[test]
fn lpcm_upload_and_wav_dump() {
    init();
    let fs = blank_disc(1);
    let mut disc = open_disc(&fs);
    let mut session = disc.open_session(None).unwrap();
    let provider = SoftwareCrypto::new();

    // Three LPCM frames of 64 bytes, big-endian samples.
    let data: Vec<u8> = (0..3 * 64u32).map(|i| (i % 97) as u8).collect();
    disc.upload_audio(
        &mut session,
        &provider,
        Codec::Lpcm,
        64,
        2,
        44100,
        &data,
        Some("PCM"),
        None,
        None,
        None,
    )
    .unwrap();

    let atdata = fs.snapshot(&generation_file("ATDATA", 2)).unwrap();
    assert_eq!(&atdata[0..4], b"LPCM");
    // LPCM blocks carry mode code 0x0124.
    assert_eq!(u16::from_be_bytes([atdata[6], atdata[7]]), 0x0124);

    let mut out = Vec::new();
    let codec = disc.dump_track(&provider, 0, &mut out).unwrap();
    assert_eq!(codec, Codec::Lpcm);
    assert_eq!(&out[..4], b"RIFF");
    assert_eq!(out.len(), 44 + data.len());
    // Samples come back byte-swapped for the little-endian container.
    let body = &out[44..];
    for (i, pair) in data.chunks_exact(2).enumerate() {
        assert_eq!(body[i * 2], pair[1]);
        assert_eq!(body[i * 2 + 1], pair[0]);
    }
}

#[test]
fn multi_block_upload_chains_serials() {
    init();
    let fs = blank_disc(1);
    let mut disc = open_disc(&fs);
    let mut session = disc.open_session(None).unwrap();
    let provider = SoftwareCrypto::new();

    // 100 frames of 192 bytes at 84 frames per block: two blocks.
    let data: Vec<u8> = (0..100 * 192u32).map(|i| (i % 223) as u8).collect();
    disc.upload_audio(
        &mut session,
        &provider,
        Codec::Atrac3,
        192,
        2,
        44100,
        &data,
        None,
        None,
        None,
        None,
    )
    .unwrap();

    let atdata = fs.snapshot(&generation_file("ATDATA", 2)).unwrap();
    assert_eq!(atdata.len(), 2 * HIMD_BLOCK_SIZE);
    let first = &atdata[..HIMD_BLOCK_SIZE];
    let second = &atdata[HIMD_BLOCK_SIZE..];
    assert_eq!(u32::from_be_bytes(first[12..16].try_into().unwrap()), 1);
    assert_eq!(u32::from_be_bytes(second[12..16].try_into().unwrap()), 2);
    assert_eq!(u16::from_be_bytes([first[4], first[5]]), 84);
    assert_eq!(u16::from_be_bytes([second[4], second[5]]), 16);

    let slot = disc.track_index().track_index_to_slot(0).unwrap();
    let track = disc.track_index().get_track(slot).unwrap();
    let fragment = disc.track_index().get_fragment(track.first_fragment).unwrap();
    assert_eq!(fragment.first_block, 0);
    assert_eq!(fragment.last_block, 1);
    assert_eq!(fragment.last_frame, 15);

    // And the whole payload survives a decrypting dump.
    let mut out = Vec::new();
    disc.dump_track(&provider, 0, &mut out).unwrap();
    assert_eq!(&out[96..], &data[..]);
}
