use crate::engine::NoteSink;
use crate::model::song::{NoteCommand, SongTable, TrackMetadata};
use log::{debug, trace, warn};
use serde::Serialize;

/// SMF default of 120 bpm, used when the file never sets a tempo.
pub const DEFAULT_MPQN: u32 = 500_000;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Playing,
}

/// What the timer service should do after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Nothing to schedule: stopped, or the table is exhausted.
    Idle,

    /// Arm the one-shot timer for this many microseconds, then step again.
    Wait(u64),
}

/// Playback cursor over a decoded [`SongTable`].
///
/// The sequencer never sleeps. Each [`Sequencer::step`] plays every event that is due
/// (the current one plus any zero-delta followers) and tells the caller how long to wait
/// before stepping again.
#[derive(Debug, Clone)]
pub struct Sequencer {
    song: SongTable,
    metadata: TrackMetadata,
    cursor: usize,
    cumulative_length: u64,
    song_length: u64,
    running: bool,
}

impl Sequencer {
    pub fn new(song: SongTable, metadata: TrackMetadata) -> Self {
        let song_length = song.song_length();
        debug!(
            "Sequencer loaded {} events spanning {} ticks..!",
            song.index(),
            song_length
        );

        if metadata.tempo == 0 {
            warn!(
                "No tempo in the song, playing at {} us per quarter note..!",
                DEFAULT_MPQN
            );
        }

        Self {
            song,
            metadata,
            cursor: 0,
            cumulative_length: 0,
            song_length,
            running: false,
        }
    }

    pub fn metadata(&self) -> &TrackMetadata {
        &self.metadata
    }

    pub fn song(&self) -> &SongTable {
        &self.song
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn cumulative_length(&self) -> u64 {
        self.cumulative_length
    }

    pub fn song_length(&self) -> u64 {
        self.song_length
    }

    pub fn state(&self) -> TransportState {
        if self.running {
            TransportState::Playing
        } else {
            TransportState::Stopped
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// `true` once every event in the table has been emitted.
    pub fn is_finished(&self) -> bool {
        self.cursor >= self.song.index()
    }

    /// Fraction of the song's ticks played so far, in `0.0..=1.0`.
    pub fn progress(&self) -> f32 {
        if self.song_length == 0 {
            return 0.0;
        }

        (self.cumulative_length as f64 / self.song_length as f64) as f32
    }

    /// Flips between `Stopped` and `Playing`. Returns `true` when the caller must post a
    /// step, which is the case whenever playback was just started.
    pub fn toggle(&mut self) -> bool {
        self.running = !self.running;
        debug!("Transport is now {:?}..!", self.state());
        self.running
    }

    /// Rewinds to the first event. Returns `true` when the caller must post a step.
    pub fn restart(&mut self) -> bool {
        self.cursor = 0;
        self.cumulative_length = 0;
        debug!("Rewound to the start of the song..!");
        self.running
    }

    /// Microseconds spanned by `delta` ticks at the song's tempo.
    pub fn delta_to_micros(&self, delta: u32) -> u64 {
        let tempo = if self.metadata.tempo == 0 {
            DEFAULT_MPQN
        } else {
            self.metadata.tempo
        };

        (tempo as u64 * delta as u64)
            .checked_div(self.metadata.ticks_per_beat as u64)
            .unwrap_or(0)
    }

    /// Plays the event under the cursor and every zero-delta event after it.
    ///
    /// A step taken while stopped or past the end of the table does nothing; the
    /// transport stays as it is.
    pub fn step<S: NoteSink + ?Sized>(&mut self, sink: &mut S) -> Step {
        loop {
            if !self.running {
                trace!("Step while stopped, ignoring..!");
                return Step::Idle;
            }

            let Some(event) = self.song.get(self.cursor).copied() else {
                return Step::Idle;
            };

            self.cumulative_length += event.delta as u64;

            match event.command() {
                Some(command) => sink.emit(command, event.channel(), event.note, event.velocity),
                None => warn!("Skipping non-note status {:#04x}..!", event.status),
            }
            trace!(
                "Midi event: status {:#04x} note {} velocity {} ({:.1}%)",
                event.status,
                event.note,
                event.velocity,
                self.progress() * 100.0
            );

            self.cursor += 1;

            let Some(next) = self.song.get(self.cursor) else {
                debug!("Reached the end of the song..!");
                return Step::Idle;
            };

            if next.delta != 0 {
                return Step::Wait(self.delta_to_micros(next.delta));
            }
        }
    }
}

/// Whole-table summaries.
impl Sequencer {
    /// Wall-clock length of the whole table in microseconds.
    pub fn duration_micros(&self) -> u64 {
        self.song
            .events()
            .iter()
            .map(|e| self.delta_to_micros(e.delta))
            .sum()
    }

    pub fn command_counts(&self) -> (usize, usize) {
        self.song
            .events()
            .iter()
            .fold((0, 0), |(on, off), e| match e.command() {
                Some(NoteCommand::NoteOn) => (on + 1, off),
                Some(NoteCommand::NoteOff) => (on, off + 1),
                None => (on, off),
            })
    }
}
