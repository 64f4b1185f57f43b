use crate::model::song::*;
use crate::reader::{ByteReader, ReadError, ReadResult};
use crate::util::tempo_to_bpm;
use log::{debug, trace, warn};
use thiserror::Error;

const MIDI_FILE_HEADER: u32 = 0x4D54_6864; // "MThd"
const MIDI_CHUNK_HEADER: u32 = 0x4D54_726B; // "MTrk"
const HEADER_LENGTH: u32 = 6;

/// Only the first two chunks are scanned; later chunks would be appended after the
/// first track's notes instead of playing alongside them.
const MAX_TRACKS: u16 = 2;

const AFTER_TOUCH: u8 = 0xA0;
const CONTROL_CHANGE: u8 = 0xB0;
const PROGRAM_CHANGE: u8 = 0xC0;
const CHANNEL_PRESSURE: u8 = 0xD0;
const PITCH_BEND: u8 = 0xE0;
const SYSTEM: u8 = 0xF0;

const META_EVENT: u8 = 0xFF;
const SYSEX_BEGIN: u8 = 0xF0;
const SYSEX_END: u8 = 0xF7;

mod meta {
    pub const SEQUENCE_NUMBER: u8 = 0x00;
    pub const TEXT: u8 = 0x01;
    pub const COPYRIGHT: u8 = 0x02;
    pub const TRACK_NAME: u8 = 0x03;
    pub const INSTRUMENT_NAME: u8 = 0x04;
    pub const LYRICS: u8 = 0x05;
    pub const MARKER: u8 = 0x06;
    pub const CUE_POINT: u8 = 0x07;
    pub const CHANNEL_PREFIX: u8 = 0x20;
    pub const END_OF_TRACK: u8 = 0x2F;
    pub const SET_TEMPO: u8 = 0x51;
    pub const SMPTE_OFFSET: u8 = 0x54;
    pub const TIME_SIGNATURE: u8 = 0x58;
    pub const KEY_SIGNATURE: u8 = 0x59;
    pub const SEQUENCER_SPECIFIC: u8 = 0x7F;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// The file header was recognised. The table may still be empty.
    Done,

    /// The buffer does not start with an SMF header.
    NoFile,
}

/// Soft failures met while decoding. None of them stop the decoder.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseIssue {
    #[error("Midi file header length shall be 6 bytes, not {0}..!")]
    MalformedHeader(u32),

    #[error("No track chunk found for track {track} (tag {tag:#010x}), skipping it..!")]
    MissingChunkTag { track: u16, tag: u32 },

    #[error("Unrecognised status byte {status:#04x} in track {track}..!")]
    UnknownStatus { track: u16, status: u8 },

    #[error("Unrecognised meta event {kind:#04x} in track {track}..!")]
    UnknownMeta { track: u16, kind: u8 },

    #[error("Meta event {kind:#04x} in track {track} has a {length} byte payload, ignoring it..!")]
    MalformedMeta { track: u16, kind: u8, length: usize },

    #[error("Track {track} was cut short: {source}")]
    TruncatedTrack { track: u16, source: ReadError },

    #[error("Midi file was cut short: {0}")]
    TruncatedFile(#[from] ReadError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeReport {
    pub status: ParseStatus,
    pub issues: Vec<ParseIssue>,
}

impl DecodeReport {
    fn no_file() -> Self {
        Self {
            status: ParseStatus::NoFile,
            issues: Vec::new(),
        }
    }
}

/// Decodes an SMF into a fresh table and metadata.
pub fn decode(buffer: &[u8]) -> (TrackMetadata, SongTable, ParseStatus) {
    let mut song = SongTable::new();
    let mut metadata = TrackMetadata::default();
    let report = parse_midi(buffer, &mut song, &mut metadata);

    (metadata, song, report.status)
}

/// Decodes `buffer` into caller-owned storage, keeping only Note-On and Note-Off events.
///
/// When the SMF header is missing, `song` and `metadata` are left untouched and
/// [`ParseStatus::NoFile`] is returned. Otherwise both are reset and filled from the
/// first two track chunks. Everything short of a missing header is logged and absorbed;
/// the returned report lists what was met.
pub fn parse_midi(
    buffer: &[u8],
    song: &mut SongTable,
    metadata: &mut TrackMetadata,
) -> DecodeReport {
    let mut reader = ByteReader::new(buffer);
    debug!("Accessing a {} byte buffer..!", buffer.len());

    match reader.read_u32() {
        Ok(MIDI_FILE_HEADER) => debug!("Midi file detected..!"),
        Ok(tag) => {
            debug!("No midi file detected: {:#010x}..!", tag);
            return DecodeReport::no_file();
        }
        Err(why) => {
            debug!("No midi file detected: {}", why);
            return DecodeReport::no_file();
        }
    }

    song.clear();
    *metadata = TrackMetadata::default();

    let mut parser = Parser {
        song,
        metadata,
        issues: Vec::new(),
        overflowed: false,
    };

    if let Err(why) = parser.parse_file(&mut reader) {
        parser.report(ParseIssue::TruncatedFile(why));
    }

    DecodeReport {
        status: ParseStatus::Done,
        issues: parser.issues,
    }
}

struct Parser<'a> {
    song: &'a mut SongTable,
    metadata: &'a mut TrackMetadata,
    issues: Vec<ParseIssue>,
    overflowed: bool,
}

impl Parser<'_> {
    fn report(&mut self, issue: ParseIssue) {
        warn!("{}", issue);
        self.issues.push(issue);
    }

    fn parse_file(&mut self, reader: &mut ByteReader) -> ReadResult<()> {
        let header_length = reader.read_u32()?;
        if header_length != HEADER_LENGTH {
            self.report(ParseIssue::MalformedHeader(header_length));
        }

        let format = reader.read_u16()?;
        let tracks = reader.read_u16()?;
        let division = reader.read_u16()?;
        if header_length > HEADER_LENGTH {
            reader.skip((header_length - HEADER_LENGTH) as usize)?;
        }

        debug!(
            "Format {}, {} tracks at {} ticks per beat..!",
            format, tracks, division
        );
        self.metadata.ticks_per_beat = division;

        for n_chunk in 0..tracks.min(MAX_TRACKS) {
            let tag = reader.read_u32()?;
            let track_length = reader.read_u32()? as usize;
            let mut chunk = reader.take(track_length);

            if tag != MIDI_CHUNK_HEADER {
                self.report(ParseIssue::MissingChunkTag {
                    track: n_chunk,
                    tag,
                });
                continue;
            }

            debug!(
                "======== Track {} ({} bytes) ========",
                n_chunk, track_length
            );
            if let Err(source) = self.parse_track(&mut chunk, n_chunk) {
                self.report(ParseIssue::TruncatedTrack {
                    track: n_chunk,
                    source,
                });
            }
        }

        if tracks > MAX_TRACKS {
            debug!("Ignoring {} track(s) past the second..!", tracks - MAX_TRACKS);
        }

        Ok(())
    }

    /// Scans one chunk body until `EndOfTrack` or the end of its declared length.
    fn parse_track(&mut self, chunk: &mut ByteReader, track: u16) -> ReadResult<()> {
        let mut previous_status: u8 = 0;
        // Non-note events are not stored, so their deltas roll into the next note's.
        // A tempo or controller event at a nonzero delta therefore shifts that delta onto
        // the following note; only delta-0 meta events leave note deltas as written.
        let mut pending_delta: u32 = 0;

        while !chunk.is_empty() {
            let delta = chunk.read_var_len()?;
            pending_delta = pending_delta.saturating_add(delta);

            let raw = chunk.read_u8()?;
            trace!("Delta = {}, status = {:#04x}", delta, raw);

            let status = if raw < 0x80 {
                // running status: this byte is the first data byte
                chunk.back_up();
                previous_status
            } else {
                raw
            };

            match status & 0xF0 {
                NOTE_OFF | NOTE_ON => {
                    previous_status = status;
                    let note = chunk.read_u8()? & 0x7F;
                    let velocity = chunk.read_u8()? & 0x7F;

                    trace!(
                        "Note {}, channel {}, note {}, velocity {}",
                        if status & 0xF0 == NOTE_ON { "ON" } else { "OFF" },
                        status & 0x0F,
                        note,
                        velocity
                    );
                    self.store(NoteEvent {
                        delta: pending_delta,
                        status,
                        note,
                        velocity,
                    });
                    pending_delta = 0;
                }
                AFTER_TOUCH | CONTROL_CHANGE | PITCH_BEND => {
                    previous_status = status;
                    let data = chunk.read_bytes(2)?;
                    trace!(
                        "Channel event {:#04x}, channel {}, data {:?}",
                        status & 0xF0,
                        status & 0x0F,
                        data
                    );
                }
                PROGRAM_CHANGE | CHANNEL_PRESSURE => {
                    previous_status = status;
                    let data = chunk.read_u8()?;
                    trace!(
                        "Channel event {:#04x}, channel {}, data {}",
                        status & 0xF0,
                        status & 0x0F,
                        data
                    );
                }
                SYSTEM => {
                    previous_status = 0;
                    match status {
                        META_EVENT => {
                            if self.parse_meta(chunk, track)? {
                                break;
                            }
                        }
                        SYSEX_BEGIN | SYSEX_END => {
                            let length = chunk.read_var_len()? as usize;
                            chunk.skip(length)?;
                            trace!("SysEx {:#04x} ({} bytes) skipped", status, length);
                        }
                        _ => self.report(ParseIssue::UnknownStatus { track, status }),
                    }
                }
                _ => self.report(ParseIssue::UnknownStatus { track, status: raw }),
            }
        }

        Ok(())
    }

    /// Reads one meta event after its `0xFF` prefix. Returns `true` on `EndOfTrack`.
    fn parse_meta(&mut self, chunk: &mut ByteReader, track: u16) -> ReadResult<bool> {
        let kind = chunk.read_u8()?;
        let length = chunk.read_var_len()? as usize;
        let payload = chunk.read_bytes(length)?;
        trace!("Meta type = {:#04x}, length = {}", kind, length);

        match kind {
            meta::TRACK_NAME => {
                let name = ByteReader::new(payload).read_string(length, MAX_TRACK_NAME)?;
                debug!("Track name: {}", name);

                if track == 0 {
                    self.metadata.track_name = name;
                }
            }
            meta::SET_TEMPO => match ByteReader::new(payload).read_u24() {
                Ok(tempo) if self.metadata.tempo == 0 => {
                    debug!(
                        "Tempo: {} us/qn ({} bpm)..!",
                        tempo,
                        tempo_to_bpm(tempo).unwrap_or(0)
                    );
                    self.metadata.tempo = tempo;
                }
                Ok(tempo) => trace!("Tempo {} found (not first one)", tempo),
                Err(_) => self.report(ParseIssue::MalformedMeta {
                    track,
                    kind,
                    length,
                }),
            },
            meta::END_OF_TRACK => {
                trace!("End of track");
                return Ok(true);
            }
            meta::SEQUENCE_NUMBER
            | meta::TEXT
            | meta::COPYRIGHT
            | meta::INSTRUMENT_NAME
            | meta::LYRICS
            | meta::MARKER
            | meta::CUE_POINT
            | meta::CHANNEL_PREFIX
            | meta::SMPTE_OFFSET
            | meta::TIME_SIGNATURE
            | meta::KEY_SIGNATURE
            | meta::SEQUENCER_SPECIFIC => {
                trace!("Meta {:#04x}: {:?}", kind, String::from_utf8_lossy(payload));
            }
            _ => self.report(ParseIssue::UnknownMeta { track, kind }),
        }

        Ok(false)
    }

    fn store(&mut self, event: NoteEvent) {
        if !self.song.is_full() {
            self.song.push(event);
        } else if !self.overflowed {
            self.overflowed = true;
            debug!(
                "Song table is full at {} events, dropping the rest..!",
                MAX_EVENTS
            );
        }
    }
}
