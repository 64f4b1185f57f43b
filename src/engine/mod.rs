use crate::model::song::NoteCommand;
use log::info;

pub mod ble;

/// Where played notes go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkKind {
    /// Log each note.
    #[default]
    Log,

    /// Print BLE-MIDI notification packets on stdout.
    Ble,
}

/// Receiver of every note the sequencer plays.
///
/// Emission is fire-and-forget: sinks absorb their own failures.
pub trait NoteSink: Send {
    fn emit(&mut self, command: NoteCommand, channel: u8, note: u8, velocity: u8);

    /// Called when playback stops so a sink can release anything it holds.
    fn silence(&mut self) {}
}

/// Logs each note instead of sending it anywhere.
#[derive(Debug, Clone, Default)]
pub struct LogSink;

impl NoteSink for LogSink {
    fn emit(&mut self, command: NoteCommand, channel: u8, note: u8, velocity: u8) {
        info!(
            "{:?} | channel: {:>2} | note: {:>3} | velocity: {:>3}",
            command, channel, note, velocity
        );
    }
}

impl<S: NoteSink + ?Sized> NoteSink for Box<S> {
    fn emit(&mut self, command: NoteCommand, channel: u8, note: u8, velocity: u8) {
        (**self).emit(command, channel, note, velocity)
    }

    fn silence(&mut self) {
        (**self).silence()
    }
}
