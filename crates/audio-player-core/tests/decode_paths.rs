mod common;

use std::sync::atomic::Ordering;

use audio_player_core::{AudioPlayer, MemorySource, PcmFormat, PlayerEvent, PlayerState};
use common::*;

const MP3_FORMAT: PcmFormat = PcmFormat {
    sample_rate: 22_050,
    channels: 1,
    bits_per_sample: 16,
};

fn mp3_source(label: &str, data: Vec<u8>) -> Box<MemorySource> {
    Box::new(MemorySource::with_label(label, data))
}

#[test]
fn mp3_plays_to_natural_end() {
    let sink = RecordingSink::new();
    let log = sink.log();
    let player = AudioPlayer::with_sink(test_config(), sink).unwrap();
    let events = collect_events(&player);

    let (src, closes) = CountingSource::new("tone.mp3", MP3.to_vec());
    player.play(Box::new(src)).unwrap();
    expect_events(&events, &[PlayerEvent::Playing, PlayerEvent::Idle]);

    let status = player.status();
    assert_eq!(status.state, PlayerState::Idle);
    assert_eq!(status.frames_written, MP3_FRAMES as u64 * MP3_SAMPLES_PER_FRAME);
    assert_eq!(status.output_format, Some(MP3_FORMAT));
    assert_eq!(status.resync_bytes, 0);
    assert_eq!(status.sources_completed, 1);
    assert_eq!(status.sources_failed, 0);
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    let log = log.lock().unwrap();
    assert_eq!(log.formats, vec![MP3_FORMAT]);
    assert_eq!(log.data.len() as u64, status.frames_written * 2);
}

#[test]
fn junk_around_frames_is_skipped_and_counted() {
    let offsets = mp3_frame_offsets();
    let mut data = mp3_with_junk(&[(offsets[0], 5), (offsets[1], 6)]);
    // Trailing garbage with no sync word: 6 bytes go as an even run, the last one alone.
    data.extend_from_slice(&[0u8; 7]);

    let player = AudioPlayer::with_sink(test_config(), RecordingSink::new()).unwrap();
    let events = collect_events(&player);

    player.play(mp3_source("junky.mp3", data)).unwrap();
    expect_events(&events, &[PlayerEvent::Playing, PlayerEvent::Idle]);

    let status = player.status();
    assert_eq!(status.resync_bytes, 5 + 6 + 7);
    assert_eq!(status.frames_written, MP3_FRAMES as u64 * MP3_SAMPLES_PER_FRAME);
    assert_eq!(status.sources_failed, 0);
}

#[test]
fn undecodable_first_frame_is_skipped() {
    let player = AudioPlayer::with_sink(test_config(), RecordingSink::new()).unwrap();
    let events = collect_events(&player);

    player.play(mp3_source("cut.mp3", mp3_with_bad_frame(0))).unwrap();
    expect_events(&events, &[PlayerEvent::Playing, PlayerEvent::Idle]);

    let status = player.status();
    assert!(status.frames_written > 0);
    assert!(status.frames_written <= (MP3_FRAMES as u64 - 1) * MP3_SAMPLES_PER_FRAME);
    assert_eq!(status.sources_completed, 1);
    assert_eq!(status.sources_failed, 0);
}

#[test]
fn corrupt_frame_mid_stream_is_unknown_then_recovers() {
    let player = AudioPlayer::with_sink(test_config(), RecordingSink::new()).unwrap();
    let events = collect_events(&player);

    let (src, closes) = CountingSource::new("broken.mp3", mp3_with_bad_frame(10));
    player.play(Box::new(src)).unwrap();
    expect_events(
        &events,
        &[PlayerEvent::Playing, PlayerEvent::Unknown, PlayerEvent::Idle],
    );
    let status = player.status();
    assert_eq!(status.frames_written, 10 * MP3_SAMPLES_PER_FRAME);
    assert_eq!(status.sources_failed, 1);
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    player.play(mp3_source("tone.mp3", MP3.to_vec())).unwrap();
    expect_events(&events, &[PlayerEvent::Playing, PlayerEvent::Idle]);
    assert_eq!(player.status().sources_completed, 1);
}

#[test]
fn source_read_error_is_unknown_then_recovers() {
    let sink = RecordingSink::new();
    let log = sink.log();
    let player = AudioPlayer::with_sink(test_config(), sink).unwrap();
    let events = collect_events(&player);

    // The first refill fits before the failure point; a later one hits it.
    let src = FailingSource::new(wav_bytes(20_000, 8_000), 10_000);
    player.play(Box::new(src)).unwrap();
    expect_events(
        &events,
        &[PlayerEvent::Playing, PlayerEvent::Unknown, PlayerEvent::Idle],
    );
    let status = player.status();
    assert!(status.frames_written > 0);
    assert!(status.frames_written < 5_000);
    assert_eq!(status.sources_failed, 1);

    let written = log.lock().unwrap().data.len();
    player.play(wav_source("b.wav", 256)).unwrap();
    expect_events(&events, &[PlayerEvent::Playing, PlayerEvent::Idle]);
    assert_eq!(log.lock().unwrap().data[written..], pcm_bytes(256)[..]);
}

#[test]
fn fatal_sink_write_is_unknown_then_recovers() {
    let sink = RecordingSink::new().with_fatal_writes(1);
    let log = sink.log();
    let player = AudioPlayer::with_sink(test_config(), sink).unwrap();
    let events = collect_events(&player);

    let (src, closes) = CountingSource::new("a.mp3", MP3.to_vec());
    player.play(Box::new(src)).unwrap();
    expect_events(
        &events,
        &[PlayerEvent::Playing, PlayerEvent::Unknown, PlayerEvent::Idle],
    );
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(player.status().frames_written, 0);
    assert_eq!(log.lock().unwrap().drains, 0);

    player.play(wav_source("b.wav", 128)).unwrap();
    expect_events(&events, &[PlayerEvent::Playing, PlayerEvent::Idle]);
    let status = player.status();
    assert_eq!(status.frames_written, 128);
    assert_eq!(status.sources_failed, 1);
    assert_eq!(status.sources_completed, 1);
    assert_eq!(log.lock().unwrap().data, pcm_bytes(128));
}
