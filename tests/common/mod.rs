// Shared fixtures: synthetic MIDI files and engine setup

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use midly::num::{u15, u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};

use tunematch_lib::catalog::CacheKeyStrategy;
use tunematch_lib::config::Config;

pub const TICKS_PER_BEAT: u16 = 480;
pub const DRUM_CHANNEL: u8 = 9;

#[derive(Debug, Clone, Copy)]
pub struct Note {
    pub pitch: u8,
    pub start: u32,
    pub duration: u32,
}

#[derive(Debug, Clone)]
pub struct Track {
    pub channel: u8,
    pub notes: Vec<Note>,
}

impl Track {
    pub fn melody(notes: Vec<Note>) -> Self {
        Self { channel: 0, notes }
    }

    pub fn drums(notes: Vec<Note>) -> Self {
        Self { channel: DRUM_CHANNEL, notes }
    }
}

/// One note per beat, each lasting 90% of the beat.
pub fn beat_notes(pitches: &[u8]) -> Vec<Note> {
    let beat = TICKS_PER_BEAT as u32;
    pitches
        .iter()
        .enumerate()
        .map(|(i, &pitch)| Note {
            pitch,
            start: i as u32 * beat,
            duration: beat * 9 / 10,
        })
        .collect()
}

pub const C_MAJOR_UP: [u8; 8] = [60, 62, 64, 65, 67, 69, 71, 72];
pub const C_MAJOR_DOWN: [u8; 8] = [72, 71, 69, 67, 65, 64, 62, 60];

pub fn transpose(pitches: &[u8], semitones: i16) -> Vec<u8> {
    pitches.iter().map(|&p| (p as i16 + semitones) as u8).collect()
}

/// Write a format-1 file: a conductor track with an optional tempo, then
/// one track per `Track`.
pub fn write_midi(path: &Path, tracks: &[Track], tempo_usec_per_beat: Option<u32>) {
    let mut smf = Smf::new(Header::new(Format::Parallel, Timing::Metrical(u15::new(TICKS_PER_BEAT))));

    let mut conductor = Vec::new();
    if let Some(tempo) = tempo_usec_per_beat {
        conductor.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(tempo))),
        });
    }
    conductor.push(end_of_track(0));
    smf.tracks.push(conductor);

    for track in tracks {
        // (tick, note-offs before note-ons at the same tick, event)
        let mut timeline: Vec<(u32, u8, MidiMessage)> = Vec::new();
        for note in &track.notes {
            timeline.push((
                note.start,
                1,
                MidiMessage::NoteOn { key: u7::new(note.pitch), vel: u7::new(100) },
            ));
            timeline.push((
                note.start + note.duration,
                0,
                MidiMessage::NoteOff { key: u7::new(note.pitch), vel: u7::new(0) },
            ));
        }
        timeline.sort_by_key(|(tick, order, _)| (*tick, *order));

        let mut events = Vec::new();
        let mut last = 0u32;
        for (tick, _, message) in timeline {
            events.push(TrackEvent {
                delta: u28::new(tick - last),
                kind: TrackEventKind::Midi { channel: u4::new(track.channel), message },
            });
            last = tick;
        }
        events.push(end_of_track(0));
        smf.tracks.push(events);
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    smf.save(path).unwrap();
}

fn end_of_track(delta: u32) -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::new(delta),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    }
}

/// Single-track melody at 120 BPM.
pub fn write_melody(path: &Path, pitches: &[u8]) -> PathBuf {
    write_midi(path, &[Track::melody(beat_notes(pitches))], Some(500_000));
    path.to_path_buf()
}

/// Engine config for a dataset, caching under `cache_dir` with an explicit key.
pub fn test_config(dataset: &Path, cache_dir: &Path, key: &str) -> Config {
    let mut config = Config::new(
        dataset.to_path_buf(),
        CacheKeyStrategy::Explicit { key: key.to_string() },
    );
    config.cache_dir = cache_dir.to_path_buf();
    config.scan_threads = 2;
    config
}
