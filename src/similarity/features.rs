// MIDI feature extraction for similarity search

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::midi_parser::{self, MidiParseResult};
use super::tempo::estimate_tempo;

pub const FEATURE_COUNT: usize = 10;

/// One dimension of a [`FeatureVector`]. The discriminant is the column index
/// used everywhere a vector, weight or matrix column is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    PitchMean = 0,
    PitchStd = 1,
    DurationMean = 2,
    DurationStd = 3,
    IoiMean = 4,
    IoiStd = 5,
    SyncopationRatio = 6,
    Tempo = 7,
    IntervalStd = 8,
    ContourSlope = 9,
}

impl Feature {
    pub const ALL: [Feature; FEATURE_COUNT] = [
        Feature::PitchMean,
        Feature::PitchStd,
        Feature::DurationMean,
        Feature::DurationStd,
        Feature::IoiMean,
        Feature::IoiStd,
        Feature::SyncopationRatio,
        Feature::Tempo,
        Feature::IntervalStd,
        Feature::ContourSlope,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Feature::PitchMean => "pitch_mean",
            Feature::PitchStd => "pitch_std",
            Feature::DurationMean => "duration_mean",
            Feature::DurationStd => "duration_std",
            Feature::IoiMean => "ioi_mean",
            Feature::IoiStd => "ioi_std",
            Feature::SyncopationRatio => "syncopation_ratio",
            Feature::Tempo => "tempo",
            Feature::IntervalStd => "interval_std",
            Feature::ContourSlope => "contour_slope",
        }
    }

    pub fn from_name(name: &str) -> Option<Feature> {
        Feature::ALL.iter().copied().find(|f| f.name() == name)
    }

    /// Dimension names in column order.
    pub fn names() -> Vec<String> {
        Feature::ALL.iter().map(|f| f.name().to_string()).collect()
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Fixed-length descriptor of one MIDI file, in [`Feature::ALL`] order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(pub [f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn get(&self, feature: Feature) -> f64 {
        self.0[feature.index()]
    }

    pub fn values(&self) -> &[f64; FEATURE_COUNT] {
        &self.0
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    /// (name, value) pairs in column order.
    pub fn named(&self) -> Vec<(&'static str, f64)> {
        Feature::ALL.iter().map(|f| (f.name(), self.get(*f))).collect()
    }
}

/// Tunables for feature extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSettings {
    /// Files with fewer non-percussion notes are rejected
    pub min_notes: usize,
    /// Seconds an onset may sit from a beat boundary and still count as on the beat
    pub syncopation_tolerance: f64,
    /// Tempo used when neither estimation nor tempo events give one
    pub default_tempo_bpm: f64,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            min_notes: 2,
            syncopation_tolerance: 0.05,
            default_tempo_bpm: 120.0,
        }
    }
}

/// Why a file produced no features. Every variant means "skip this file".
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("failed to load MIDI file: {0}")]
    Load(#[from] anyhow::Error),

    #[error("too few notes: found {found}, need at least {required}")]
    TooFewNotes { found: usize, required: usize },

    #[error("feature computation produced a non-finite value")]
    NonFinite,
}

/// A note with times resolved to seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimedNote {
    pub pitch: u8,
    pub start: f64,
    pub end: f64,
}

/// Load a MIDI file and compute its feature vector.
pub fn extract_features(path: &Path, settings: &ExtractionSettings) -> Result<FeatureVector, ExtractError> {
    let parsed = midi_parser::parse_midi(path)?;
    features_from_parsed(&parsed, settings)
}

/// Compute a feature vector from an already parsed file.
pub fn features_from_parsed(parsed: &MidiParseResult, settings: &ExtractionSettings) -> Result<FeatureVector, ExtractError> {
    let notes: Vec<TimedNote> = parsed
        .notes
        .iter()
        .filter(|n| !n.is_percussion())
        .map(|n| TimedNote {
            pitch: n.pitch,
            start: parsed.tick_to_seconds(n.start_tick),
            end: parsed.tick_to_seconds(n.end_tick),
        })
        .collect();

    if notes.len() < settings.min_notes.max(1) {
        return Err(ExtractError::TooFewNotes {
            found: notes.len(),
            required: settings.min_notes.max(1),
        });
    }

    let onsets: Vec<f64> = notes.iter().map(|n| n.start).collect();
    let tempo = estimate_tempo(&onsets)
        .or_else(|| parsed.first_tempo_bpm())
        .filter(|bpm| bpm.is_finite() && *bpm > 0.0)
        .unwrap_or(settings.default_tempo_bpm);

    let vector = compute_features(&notes, tempo, settings.syncopation_tolerance);
    if !vector.is_finite() {
        return Err(ExtractError::NonFinite);
    }
    Ok(vector)
}

/// Compute every dimension from notes in extraction order and a resolved tempo.
pub fn compute_features(notes: &[TimedNote], tempo_bpm: f64, syncopation_tolerance: f64) -> FeatureVector {
    let pitches: Vec<f64> = notes.iter().map(|n| n.pitch as f64).collect();
    let durations: Vec<f64> = notes.iter().map(|n| n.end - n.start).collect();

    let mut onsets: Vec<f64> = notes.iter().map(|n| n.start).collect();
    onsets.sort_by(|a, b| a.total_cmp(b));
    let iois: Vec<f64> = onsets.windows(2).map(|w| w[1] - w[0]).collect();

    // Melodic statistics follow extraction order, not onset order
    let steps: Vec<i32> = notes
        .windows(2)
        .map(|w| w[1].pitch as i32 - w[0].pitch as i32)
        .collect();
    let abs_intervals: Vec<f64> = steps.iter().map(|s| s.abs() as f64).collect();

    let mut v = [0.0f64; FEATURE_COUNT];
    v[Feature::PitchMean.index()] = mean(&pitches);
    v[Feature::PitchStd.index()] = std_dev(&pitches);
    v[Feature::DurationMean.index()] = mean(&durations);
    v[Feature::DurationStd.index()] = std_dev(&durations);
    v[Feature::IoiMean.index()] = mean(&iois);
    v[Feature::IoiStd.index()] = std_dev(&iois);
    v[Feature::SyncopationRatio.index()] = syncopation_ratio(&onsets, tempo_bpm, syncopation_tolerance);
    v[Feature::Tempo.index()] = tempo_bpm;
    v[Feature::IntervalStd.index()] = std_dev(&abs_intervals);
    v[Feature::ContourSlope.index()] = contour_slope(&steps, notes.len());
    FeatureVector(v)
}

/// Fraction of onsets farther than `tolerance` seconds from every beat of a
/// 4/4 bar at `tempo_bpm`.
pub fn syncopation_ratio(onsets: &[f64], tempo_bpm: f64, tolerance: f64) -> f64 {
    if onsets.is_empty() || !(tempo_bpm > 0.0) {
        return 0.0;
    }
    let beat = 60.0 / tempo_bpm;
    let bar = beat * 4.0;

    let off_beat = onsets
        .iter()
        .filter(|&&onset| {
            let in_bar = onset.rem_euclid(bar);
            let in_beat = in_bar.rem_euclid(beat);
            // Distance to the nearest beat boundary, including the next bar line
            in_beat.min(beat - in_beat) > tolerance
        })
        .count();

    off_beat as f64 / onsets.len() as f64
}

/// (ascending steps - descending steps) / note count.
pub fn contour_slope(steps: &[i32], note_count: usize) -> f64 {
    if note_count == 0 {
        return 0.0;
    }
    let up = steps.iter().filter(|&&s| s > 0).count() as f64;
    let down = steps.iter().filter(|&&s| s < 0).count() as f64;
    (up - down) / note_count as f64
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}
