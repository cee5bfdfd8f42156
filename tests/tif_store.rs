mod common;

use common::*;
use himd::text::StringEncoding;
use himd::tif::{Fragment, RawTrack, StringType, TrackIndex, FRAGMENT_TYPE_AUDIO};
use himd::Codec;

fn add_fixture_track(tif: &mut TrackIndex, title_index: u16, block: u16) -> u16 {
    let fragment = Fragment {
        key: [0; 8],
        first_block: block,
        last_block: block,
        first_frame: 0,
        last_frame: 10,
        fragment_type: FRAGMENT_TYPE_AUDIO,
        next_fragment: 0,
    };
    let fragment_index = tif.add_fragment(&fragment).unwrap();
    let mut track = RawTrack::default();
    track.title_index = title_index;
    track.first_fragment = fragment_index;
    track.seconds = 60;
    let slot = tif.add_track(&track).unwrap();
    tif.append_track_ordering(slot).unwrap();
    slot
}

#[test]
fn read_known_track_listing() {
    init();
    let mut tif = TrackIndex::blank();
    let latin = tif.add_string("A", StringType::Title).unwrap();
    let sjis = tif.add_string("日本", StringType::Title).unwrap();
    let utf16 = add_string_forced_utf16(&mut tif, "Schrödinger", StringType::Title);
    add_fixture_track(&mut tif, latin, 0);
    add_fixture_track(&mut tif, sjis, 2);
    add_fixture_track(&mut tif, utf16, 4);

    let fs = disc_with_tif(1, &tif);
    let disc = open_disc(&fs);
    let tracks = disc.all_tracks().unwrap();
    assert_eq!(tracks.len(), 3);

    assert_eq!(tracks[0].title.as_deref(), Some("A"));
    assert_eq!(tracks[0].title_encoding, Some(StringEncoding::Latin1));
    assert_eq!(tracks[1].title.as_deref(), Some("日本"));
    assert_eq!(tracks[1].title_encoding, Some(StringEncoding::ShiftJis));
    assert_eq!(tracks[2].title.as_deref(), Some("Schrödinger"));
    assert_eq!(tracks[2].title_encoding, Some(StringEncoding::Utf16Be));
    assert!(tracks.iter().all(|t| t.codec == Codec::Atrac3));
}

#[test]
fn untouched_disc_flushes_byte_identical() {
    init();
    let fs = blank_disc(1);
    let before = fs.snapshot(&generation_file("TRKIDX", 1)).unwrap();
    let mut disc = open_disc(&fs);
    disc.flush().unwrap();
    let after = fs.snapshot(&generation_file("TRKIDX", 1)).unwrap();
    assert_eq!(before, after);
}

#[test]
fn disc_rename_allocates_and_frees_the_title_chain() {
    init();
    let fs = blank_disc(1);
    let mut disc = open_disc(&fs);
    assert_eq!(disc.disc_title().unwrap(), None);
    let free_before = disc.track_index().string_freelist_len().unwrap();

    // "Example disc!" plus the encoding byte is exactly one 14-byte chunk.
    disc.rename_disc(Some("Example disc!")).unwrap();
    disc.flush().unwrap();
    assert_eq!(
        disc.track_index().string_freelist_len().unwrap(),
        free_before - 1
    );

    let reopened = open_disc(&fs);
    assert_eq!(reopened.disc_title().unwrap().as_deref(), Some("Example disc!"));
    let title_index = reopened.track_index().disc_title_index().unwrap();
    assert_ne!(title_index, 0);
    let (text, encoding) = reopened.track_index().get_string(title_index).unwrap();
    assert_eq!(text, "Example disc!");
    assert_eq!(encoding, StringEncoding::Latin1);

    // Clearing the title returns the chunk to the freelist.
    disc.rename_disc(None).unwrap();
    disc.flush().unwrap();
    assert_eq!(
        disc.track_index().string_freelist_len().unwrap(),
        free_before
    );
    let reopened = open_disc(&fs);
    assert_eq!(reopened.disc_title().unwrap(), None);
}

#[test]
fn track_rename_replaces_the_string_in_place() {
    init();
    let mut tif = TrackIndex::blank();
    let title = tif.add_string("Old title", StringType::Title).unwrap();
    add_fixture_track(&mut tif, title, 0);
    let fs = disc_with_tif(1, &tif);
    let mut disc = open_disc(&fs);

    disc.rename_track(0, Some("New title")).unwrap();
    disc.set_track_artist(0, Some("Somebody")).unwrap();
    disc.flush().unwrap();

    let reopened = open_disc(&fs);
    let meta = reopened.track_metadata(0).unwrap();
    assert_eq!(meta.title.as_deref(), Some("New title"));
    assert_eq!(meta.artist.as_deref(), Some("Somebody"));
    assert_eq!(meta.album, None);
}

#[test]
fn live_tracks_satisfy_the_slot_invariants() {
    init();
    let mut tif = TrackIndex::blank();
    let a = tif.add_string("a", StringType::Title).unwrap();
    let b = tif.add_string("b", StringType::Title).unwrap();
    add_fixture_track(&mut tif, a, 0);
    add_fixture_track(&mut tif, b, 2);

    for index in 0..tif.track_count() {
        let slot = tif.track_index_to_slot(index).unwrap();
        let track = tif.get_track(slot).unwrap();
        assert!(track.is_live(slot));
        assert_ne!(track.first_fragment, 0);
    }
}
