// MIDI file parser: note events in declaration order plus a tempo map

use std::collections::HashMap;
use std::path::Path;

/// MIDI channel 10, reserved for percussion by General MIDI.
pub const PERCUSSION_CHANNEL: u8 = 9;

const DEFAULT_USEC_PER_BEAT: u32 = 500_000; // 120 BPM

#[derive(Debug, Clone, PartialEq)]
pub struct NoteEvent {
    pub pitch: u8,
    pub velocity: u8,
    pub start_tick: u64,
    pub end_tick: u64,
    pub channel: u8,
}

impl NoteEvent {
    pub fn is_percussion(&self) -> bool {
        self.channel == PERCUSSION_CHANNEL
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TempoEvent {
    pub tick: u64,
    pub microseconds_per_beat: u32,
}

impl TempoEvent {
    pub fn bpm(&self) -> f64 {
        60_000_000.0 / self.microseconds_per_beat as f64
    }
}

/// How ticks map to wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickTiming {
    /// Ticks per quarter note; seconds depend on the tempo map.
    Metrical { ticks_per_beat: u16 },
    /// SMPTE timecode: a fixed number of ticks per second.
    Timecode { ticks_per_second: f64 },
}

pub struct MidiParseResult {
    /// Notes in the order the file declares them: track by track, each track
    /// in the order its notes are closed.
    pub notes: Vec<NoteEvent>,
    pub timing: TickTiming,
    /// Explicit tempo changes, sorted by tick, one per tick. Empty when the
    /// file carries no tempo meta events.
    pub tempo_map: Vec<TempoEvent>,
}

impl MidiParseResult {
    pub fn tick_to_seconds(&self, tick: u64) -> f64 {
        match self.timing {
            TickTiming::Metrical { ticks_per_beat } => {
                tick_to_seconds(tick, ticks_per_beat, &self.tempo_map)
            }
            TickTiming::Timecode { ticks_per_second } => tick as f64 / ticks_per_second,
        }
    }

    /// First explicit tempo change in the file, if any.
    pub fn first_tempo_bpm(&self) -> Option<f64> {
        self.tempo_map.first().map(TempoEvent::bpm)
    }
}

/// Convert a tick position to seconds using the tempo map.
pub fn tick_to_seconds(tick: u64, ticks_per_beat: u16, tempo_map: &[TempoEvent]) -> f64 {
    let tpb = ticks_per_beat.max(1) as f64;
    let mut seconds = 0.0;
    let mut last_tick = 0u64;
    let mut usec_per_beat = DEFAULT_USEC_PER_BEAT as f64;

    for te in tempo_map {
        if te.tick >= tick {
            break;
        }
        let delta_ticks = te.tick - last_tick;
        seconds += (delta_ticks as f64 / tpb) * (usec_per_beat / 1_000_000.0);
        last_tick = te.tick;
        usec_per_beat = te.microseconds_per_beat as f64;
    }

    let delta_ticks = tick - last_tick;
    seconds += (delta_ticks as f64 / tpb) * (usec_per_beat / 1_000_000.0);
    seconds
}

/// Read and parse a MIDI file from disk.
pub fn parse_midi(path: &Path) -> anyhow::Result<MidiParseResult> {
    let data = std::fs::read(path)?;
    parse_midi_bytes(&data)
}

/// Parse an in-memory Standard MIDI File.
pub fn parse_midi_bytes(data: &[u8]) -> anyhow::Result<MidiParseResult> {
    let smf = midly::Smf::parse(data)?;

    let timing = match smf.header.timing {
        midly::Timing::Metrical(tpb) => TickTiming::Metrical { ticks_per_beat: tpb.as_int().max(1) },
        midly::Timing::Timecode(fps, subframes) => TickTiming::Timecode {
            ticks_per_second: (fps.as_f32() as f64 * subframes as f64).max(1.0),
        },
    };

    let mut notes: Vec<NoteEvent> = Vec::new();
    let mut tempo_map: Vec<TempoEvent> = Vec::new();

    for track in smf.tracks.iter() {
        let mut current_tick: u64 = 0;
        // Sounding notes: (pitch, channel) -> (velocity, start_tick)
        let mut active_notes: HashMap<(u8, u8), (u8, u64)> = HashMap::new();

        for event in track {
            current_tick += event.delta.as_int() as u64;

            match event.kind {
                midly::TrackEventKind::Meta(midly::MetaMessage::Tempo(t)) => {
                    tempo_map.push(TempoEvent {
                        tick: current_tick,
                        microseconds_per_beat: t.as_int().max(1),
                    });
                }
                midly::TrackEventKind::Midi { channel, message } => {
                    let ch = channel.as_int();
                    match message {
                        midly::MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            let pitch = key.as_int();
                            // Re-strike closes the sounding note first
                            if let Some((old_vel, old_start)) = active_notes.remove(&(pitch, ch)) {
                                notes.push(NoteEvent {
                                    pitch,
                                    velocity: old_vel,
                                    start_tick: old_start,
                                    end_tick: current_tick,
                                    channel: ch,
                                });
                            }
                            active_notes.insert((pitch, ch), (vel.as_int(), current_tick));
                        }
                        // NoteOn with velocity 0 is a note off
                        midly::MidiMessage::NoteOn { key, .. } | midly::MidiMessage::NoteOff { key, .. } => {
                            let pitch = key.as_int();
                            if let Some((vel, start)) = active_notes.remove(&(pitch, ch)) {
                                notes.push(NoteEvent {
                                    pitch,
                                    velocity: vel,
                                    start_tick: start,
                                    end_tick: current_tick,
                                    channel: ch,
                                });
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        // Close anything still sounding at the last tick, oldest first so the
        // order does not depend on hash iteration.
        let mut dangling: Vec<((u8, u8), (u8, u64))> = active_notes.into_iter().collect();
        dangling.sort_by_key(|&((pitch, ch), (_, start))| (start, ch, pitch));
        for ((pitch, ch), (vel, start)) in dangling {
            notes.push(NoteEvent {
                pitch,
                velocity: vel,
                start_tick: start,
                end_tick: current_tick,
                channel: ch,
            });
        }
    }

    // Later events win when two tracks set the tempo on the same tick
    tempo_map.sort_by_key(|t| t.tick);
    tempo_map.reverse();
    tempo_map.dedup_by_key(|t| t.tick);
    tempo_map.reverse();

    Ok(MidiParseResult { notes, timing, tempo_map })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_to_seconds_uses_default_tempo_without_map() {
        assert!((tick_to_seconds(480, 480, &[]) - 0.5).abs() < 1e-12);
        assert!((tick_to_seconds(1920, 480, &[]) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn tick_to_seconds_follows_tempo_changes() {
        // 120 BPM for the first beat, then 60 BPM
        let map = vec![
            TempoEvent { tick: 0, microseconds_per_beat: 500_000 },
            TempoEvent { tick: 480, microseconds_per_beat: 1_000_000 },
        ];
        assert!((tick_to_seconds(480, 480, &map) - 0.5).abs() < 1e-12);
        assert!((tick_to_seconds(960, 480, &map) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn tempo_event_bpm() {
        let te = TempoEvent { tick: 0, microseconds_per_beat: 600_000 };
        assert!((te.bpm() - 100.0).abs() < 1e-9);
    }

    fn encode(events: Vec<(u32, midly::TrackEventKind<'static>)>) -> Vec<u8> {
        encode_timed(midly::Timing::Metrical(midly::num::u15::new(480)), events)
    }

    fn encode_timed(timing: midly::Timing, events: Vec<(u32, midly::TrackEventKind<'static>)>) -> Vec<u8> {
        use midly::num::u28;
        let mut smf = midly::Smf::new(midly::Header::new(midly::Format::SingleTrack, timing));
        let mut track: Vec<midly::TrackEvent> = events
            .into_iter()
            .map(|(delta, kind)| midly::TrackEvent { delta: u28::new(delta), kind })
            .collect();
        track.push(midly::TrackEvent {
            delta: u28::new(0),
            kind: midly::TrackEventKind::Meta(midly::MetaMessage::EndOfTrack),
        });
        smf.tracks.push(track);
        let mut buf = Vec::new();
        smf.write_std(&mut buf).unwrap();
        buf
    }

    fn note_on(channel: u8, key: u8, vel: u8) -> midly::TrackEventKind<'static> {
        use midly::num::{u4, u7};
        midly::TrackEventKind::Midi {
            channel: u4::new(channel),
            message: midly::MidiMessage::NoteOn { key: u7::new(key), vel: u7::new(vel) },
        }
    }

    #[test]
    fn zero_velocity_restrike_and_dangling_notes() {
        let data = encode(vec![
            (0, note_on(0, 60, 90)),
            (480, note_on(0, 60, 0)),
            // 62 is struck twice; the second strike closes the first
            (0, note_on(0, 62, 80)),
            (240, note_on(0, 62, 70)),
            (240, note_on(PERCUSSION_CHANNEL, 36, 100)),
            // Nothing releases 62 or 36
            (480, note_on(0, 64, 100)),
            (240, note_on(0, 64, 0)),
        ]);
        let parsed = parse_midi_bytes(&data).unwrap();
        let spans: Vec<(u8, u64, u64)> = parsed
            .notes
            .iter()
            .map(|n| (n.pitch, n.start_tick, n.end_tick))
            .collect();
        assert_eq!(
            spans,
            vec![
                (60, 0, 480),
                (62, 480, 720),
                (64, 1440, 1680),
                (62, 720, 1680),
                (36, 960, 1680),
            ]
        );
        assert_eq!(parsed.notes[1].velocity, 80);
        assert!(parsed.notes[4].is_percussion());
        assert!(parsed.tempo_map.is_empty());
        assert_eq!(parsed.first_tempo_bpm(), None);
    }

    #[test]
    fn timecode_files_ignore_tempo() {
        // 25 fps x 40 subframes = 1000 ticks per second
        let data = encode_timed(
            midly::Timing::Timecode(midly::Fps::Fps25, 40),
            vec![
                (0, midly::TrackEventKind::Meta(midly::MetaMessage::Tempo(midly::num::u24::new(1_000_000)))),
                (500, note_on(0, 60, 100)),
                (1000, note_on(0, 60, 0)),
                (250, note_on(0, 67, 100)),
                (250, note_on(0, 67, 0)),
            ],
        );
        let parsed = parse_midi_bytes(&data).unwrap();
        assert_eq!(parsed.timing, TickTiming::Timecode { ticks_per_second: 1000.0 });

        let times: Vec<(f64, f64)> = parsed
            .notes
            .iter()
            .map(|n| (parsed.tick_to_seconds(n.start_tick), parsed.tick_to_seconds(n.end_tick)))
            .collect();
        assert_eq!(times.len(), 2);
        assert!((times[0].0 - 0.5).abs() < 1e-12 && (times[0].1 - 1.5).abs() < 1e-12);
        assert!((times[1].0 - 1.75).abs() < 1e-12 && (times[1].1 - 2.0).abs() < 1e-12);
        assert_eq!(parsed.first_tempo_bpm(), Some(60.0));
    }

    #[test]
    fn garbage_bytes_fail_to_parse() {
        assert!(parse_midi_bytes(b"definitely not a midi file").is_err());
    }
}
