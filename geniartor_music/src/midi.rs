// MIDI output from finished pieces.
//
// Converts a Piece into a Standard MIDI File (SMF Format 1): a tempo track
// followed by one track per voice, lowest voice first. Piece ticks are eighth
// notes; the tempo is chosen so that one measure lasts
// `measure_in_seconds`. Optional silence is added before the first note and
// after the last one.
//
// Uses the `midly` crate for MIDI writing.

use crate::error::ConfigError;
use crate::piece::Piece;
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Ticks per quarter note in MIDI output.
const TICKS_PER_QUARTER: u16 = 480;

/// MIDI ticks per piece tick (an eighth note).
const TICKS_PER_EIGHTH: u32 = TICKS_PER_QUARTER as u32 / 2;

/// Channel 10 (index 9) is reserved for percussion in General MIDI.
const PERCUSSION_CHANNEL: u8 = 9;

/// How finished pieces are rendered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderingConfig {
    /// Directory receiving output files.
    pub dir: PathBuf,
    pub measure_in_seconds: f64,
    /// General MIDI program per voice (lowest first); reused cyclically.
    pub programs: Vec<u8>,
    pub velocity: u8,
    pub opening_silence_in_seconds: f64,
    pub trailing_silence_in_seconds: f64,
    /// Also write the piece as JSON next to the MIDI file.
    pub write_json: bool,
}

impl Default for RenderingConfig {
    fn default() -> Self {
        RenderingConfig {
            dir: PathBuf::from("output"),
            measure_in_seconds: 2.0,
            programs: vec![0],
            velocity: 80,
            opening_silence_in_seconds: 1.0,
            trailing_silence_in_seconds: 1.0,
            write_json: false,
        }
    }
}

impl RenderingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::InvalidRendering(msg));
        if !(self.measure_in_seconds.is_finite() && self.measure_in_seconds > 0.0) {
            return invalid(format!("measure_in_seconds must be positive, got {}", self.measure_in_seconds));
        }
        for silence in [self.opening_silence_in_seconds, self.trailing_silence_in_seconds] {
            if !(silence.is_finite() && silence >= 0.0) {
                return invalid(format!("silence must be non-negative, got {}", silence));
            }
        }
        if self.velocity > 127 {
            return invalid(format!("velocity {} exceeds 127", self.velocity));
        }
        if let Some(&program) = self.programs.iter().find(|&&p| p > 127) {
            return invalid(format!("program {} exceeds 127", program));
        }
        Ok(())
    }

    fn seconds_to_ticks(&self, seconds: f64, ticks_per_measure: u32) -> u32 {
        let ticks_per_second = (ticks_per_measure * TICKS_PER_EIGHTH) as f64 / self.measure_in_seconds;
        (seconds * ticks_per_second).round() as u32
    }
}

/// Convert a piece to MIDI and write it to a file.
pub fn write_midi(
    piece: &Piece,
    settings: &RenderingConfig,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    settings.validate()?;
    let names: Vec<String> = (0..piece.voices.len()).map(|i| format!("Voice {}", i)).collect();
    let smf = piece_to_smf(piece, settings, &names);
    let mut buf = Vec::new();
    smf.write(&mut buf)?;
    std::fs::write(path, &buf)?;
    log::info!("wrote {} ({} bytes)", path.display(), buf.len());
    Ok(())
}

fn channel_for(voice: usize) -> u4 {
    let channel = (voice % 15) as u8;
    u4::new(if channel >= PERCUSSION_CHANNEL { channel + 1 } else { channel })
}

/// Convert a piece to an in-memory SMF. `names` holds one track name per
/// voice.
fn piece_to_smf<'a>(piece: &Piece, settings: &RenderingConfig, names: &'a [String]) -> Smf<'a> {
    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
    ));
    let tpm = piece.meter.ticks_per_measure();
    let opening = settings.seconds_to_ticks(settings.opening_silence_in_seconds, tpm);
    let trailing = settings.seconds_to_ticks(settings.trailing_silence_in_seconds, tpm);
    let end = opening + piece.length() * TICKS_PER_EIGHTH + trailing;

    // Track 0: tempo track, also carrying the total length.
    let quarters_per_measure = tpm as f64 / 2.0;
    let tempo_microseconds = (settings.measure_in_seconds * 1_000_000.0 / quarters_per_measure).round() as u32;
    let tempo_track: Track<'a> = vec![
        TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(tempo_microseconds))),
        },
        TrackEvent {
            delta: u28::new(end),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        },
    ];
    smf.tracks.push(tempo_track);

    let velocity = u7::new(settings.velocity.min(127));
    for (vi, voice) in piece.voices.iter().enumerate() {
        let channel = channel_for(vi);
        let program = match settings.programs.as_slice() {
            [] => 0,
            programs => programs[vi % programs.len()].min(127),
        };
        let mut track: Track<'a> = Vec::new();
        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::TrackName(
                names.get(vi).map_or(&b"Voice"[..], |n| n.as_bytes()),
            )),
        });
        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Midi {
                channel,
                message: MidiMessage::ProgramChange {
                    program: u7::new(program),
                },
            },
        });

        let mut last_event_tick = 0;
        for note in &voice.notes {
            let key = u7::new(note.pitch.min(127));
            let on_tick = opening + note.onset * TICKS_PER_EIGHTH;
            let off_tick = opening + note.offset() * TICKS_PER_EIGHTH;
            track.push(TrackEvent {
                delta: u28::new(on_tick - last_event_tick),
                kind: TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::NoteOn { key, vel: velocity },
                },
            });
            track.push(TrackEvent {
                delta: u28::new(off_tick - on_tick),
                kind: TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::NoteOff {
                        key,
                        vel: u7::new(0),
                    },
                },
            });
            last_event_tick = off_tick;
        }

        track.push(TrackEvent {
            delta: u28::new(end.saturating_sub(last_event_tick)),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });
        smf.tracks.push(track);
    }

    smf
}
