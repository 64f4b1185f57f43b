use serde::{Deserialize, Serialize};

/// Maximum number of note events a [`SongTable`] holds.
pub const MAX_EVENTS: usize = 2000;

/// Visible bytes kept from a track name (one more byte is the terminator on the device).
pub const MAX_TRACK_NAME: usize = 99;

pub const NOTE_OFF: u8 = 0x80;
pub const NOTE_ON: u8 = 0x90;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteCommand {
    NoteOff = 0x80,
    NoteOn = 0x90,
}

impl NoteCommand {
    /// Command nibble of a stored status byte, channel bits ignored.
    pub fn from_status(status: u8) -> Option<Self> {
        match status & 0xF0 {
            NOTE_OFF => Some(NoteCommand::NoteOff),
            NOTE_ON => Some(NoteCommand::NoteOn),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// One decoded Note-On or Note-Off.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteEvent {
    /// Ticks since the previous stored event.
    pub delta: u32,
    pub status: u8,
    pub note: u8,
    pub velocity: u8,
}

impl NoteEvent {
    pub fn channel(&self) -> u8 {
        self.status & 0x0F
    }

    pub fn command(&self) -> Option<NoteCommand> {
        NoteCommand::from_status(self.status)
    }
}

/// Fixed-capacity, insertion-ordered table of note events.
///
/// Storage for [`MAX_EVENTS`] entries is reserved up front and never grows; pushes past
/// capacity are dropped.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SongTable {
    events: Vec<NoteEvent>,
}

impl Default for SongTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SongTable {
    pub fn new() -> Self {
        Self {
            events: Vec::with_capacity(MAX_EVENTS),
        }
    }

    /// Appends `event`, returning `false` when the table is already full.
    pub fn push(&mut self, event: NoteEvent) -> bool {
        if self.events.len() >= MAX_EVENTS {
            return false;
        }

        self.events.push(event);
        true
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Number of valid entries, the append cursor.
    pub fn index(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.events.len() >= MAX_EVENTS
    }

    pub fn get(&self, i: usize) -> Option<&NoteEvent> {
        self.events.get(i)
    }

    pub fn events(&self) -> &[NoteEvent] {
        &self.events
    }

    /// Sum of every delta in the table.
    pub fn song_length(&self) -> u64 {
        self.events.iter().map(|e| e.delta as u64).sum()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackMetadata {
    pub track_name: String,
    pub ticks_per_beat: u16,
    /// Microseconds per quarter note, 0 until a `SetTempo` meta-event is found.
    pub tempo: u32,
}
