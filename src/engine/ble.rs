use crate::engine::NoteSink;
use crate::model::song::NoteCommand;
use log::{debug, warn};
use std::collections::BTreeSet;
use std::io::Write;
use std::time::Instant;

/// BLE-MIDI carries a 13-bit millisecond timestamp.
const TIMESTAMP_MASK: u128 = 0x1FFF;

pub type BlePacket = [u8; 5];

/// Builds a single-message BLE-MIDI notification.
///
/// The header byte carries the top 6 timestamp bits and the timestamp byte the low 7,
/// both with the high bit set. Data bytes are masked to 7 bits.
pub fn encode_packet(
    timestamp_ms: u16,
    command: NoteCommand,
    channel: u8,
    note: u8,
    velocity: u8,
) -> BlePacket {
    [
        0x80 | ((timestamp_ms >> 7) & 0x3F) as u8,
        0x80 | (timestamp_ms & 0x7F) as u8,
        command.as_byte() | (channel & 0x0F),
        note & 0x7F,
        velocity & 0x7F,
    ]
}

/// Writes each note as a BLE-MIDI notification, one hex line per packet.
#[derive(Debug)]
pub struct BleMidiSink<W: Write + Send> {
    out: W,
    origin: Instant,
    /// Notes currently sounding, as (channel, note).
    held: BTreeSet<(u8, u8)>,
}

impl<W: Write + Send> BleMidiSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            origin: Instant::now(),
            held: BTreeSet::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn timestamp_ms(&self) -> u16 {
        (self.origin.elapsed().as_millis() & TIMESTAMP_MASK) as u16
    }

    fn notify(&mut self, packet: BlePacket) {
        let line = packet
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ");

        if let Err(why) = writeln!(self.out, "{}", line).and_then(|_| self.out.flush()) {
            warn!("Failed to send BLE-MIDI notification [{}]: {}", line, why);
        }
    }
}

impl<W: Write + Send> NoteSink for BleMidiSink<W> {
    fn emit(&mut self, command: NoteCommand, channel: u8, note: u8, velocity: u8) {
        match command {
            NoteCommand::NoteOn => self.held.insert((channel, note)),
            NoteCommand::NoteOff => self.held.remove(&(channel, note)),
        };

        let packet = encode_packet(self.timestamp_ms(), command, channel, note, velocity);
        self.notify(packet);
    }

    fn silence(&mut self) {
        if self.held.is_empty() {
            return;
        }

        debug!("Releasing {} held note(s)..!", self.held.len());
        let timestamp = self.timestamp_ms();
        for (channel, note) in std::mem::take(&mut self.held) {
            self.notify(encode_packet(timestamp, NoteCommand::NoteOff, channel, note, 0));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn packet_layout() {
        assert_eq!(
            encode_packet(0, NoteCommand::NoteOn, 0, 60, 127),
            [0x80, 0x80, 0x90, 60, 127]
        );
        assert_eq!(
            encode_packet(0x1FFF, NoteCommand::NoteOff, 0x0A, 0xBC, 0xFF),
            [0xBF, 0xFF, 0x8A, 0x3C, 0x7F]
        );
        assert_eq!(
            encode_packet(129, NoteCommand::NoteOn, 3, 1, 2),
            [0x81, 0x81, 0x93, 1, 2]
        );
    }

    #[test]
    fn writes_hex_lines_and_releases_held_notes() {
        let mut sink = BleMidiSink::new(Vec::new());
        sink.emit(NoteCommand::NoteOn, 1, 60, 100);
        sink.emit(NoteCommand::NoteOn, 1, 64, 100);
        sink.emit(NoteCommand::NoteOff, 1, 60, 0);
        sink.silence();
        sink.silence();

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);

        // skip the two timestamp bytes
        let bodies: Vec<&str> = lines.iter().map(|l| &l[6..]).collect();
        assert_eq!(bodies, vec!["91 3C 64", "91 40 64", "81 3C 00", "81 40 00"]);
    }
}
