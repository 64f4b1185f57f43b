use crate::engine::SinkKind;
use crate::player::TransportCommand;
use log::info;

const MICROSECONDS_PER_MINUTE: u32 = 60_000_000;

pub fn parse_sink(input: &str) -> SinkKind {
    match input.to_lowercase().as_str() {
        "l" | "log" => SinkKind::Log,
        "b" | "ble" | "bluetooth" => SinkKind::Ble,
        other => {
            info!("Unknown sink '{}', defaulting to `log`..!", other);
            SinkKind::Log
        }
    }
}

/// Maps a line typed on the console to a transport request.
pub fn parse_transport(input: &str) -> Option<TransportCommand> {
    match input.trim().to_lowercase().as_str() {
        "" | "p" | "play" | "pause" => Some(TransportCommand::Toggle),
        "r" | "restart" => Some(TransportCommand::Restart),
        "q" | "quit" | "exit" => Some(TransportCommand::Quit),
        _ => None,
    }
}

pub fn tempo_to_bpm(tempo: u32) -> Option<u32> {
    MICROSECONDS_PER_MINUTE.checked_div(tempo)
}

/// Renders `[====    ]`, `width` characters including the brackets.
pub fn progress_bar(fraction: f32, width: usize) -> String {
    let inner = width.saturating_sub(2);
    let progress = (fraction.clamp(0.0, 1.0) * 100.0) as u8 as f32;

    let mut bar = String::with_capacity(inner + 2);
    bar.push('[');
    for i in 1..=inner {
        let threshold = (i - 1) as f32 / inner as f32 * 100.0;
        bar.push(if progress > threshold { '=' } else { ' ' });
    }
    bar.push(']');
    bar
}

/// Track names made only of blanks or control bytes are not worth showing.
pub fn display_track_name(name: &str) -> &str {
    if name.bytes().any(|b| b > 32 && b < 127) {
        name
    } else {
        "No track name"
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn progress_bar_fill() {
        assert_eq!(progress_bar(0.0, 18), format!("[{}]", " ".repeat(16)));
        assert_eq!(progress_bar(1.0, 18), format!("[{}]", "=".repeat(16)));
        assert_eq!(progress_bar(0.5, 6), "[==  ]");
        assert_eq!(progress_bar(0.01, 6), "[=   ]");
        assert_eq!(progress_bar(f32::NAN, 4), "[  ]");
        assert_eq!(progress_bar(0.3, 1), "[]");
    }

    #[test]
    fn track_name_display() {
        assert_eq!(display_track_name("Lullaby"), "Lullaby");
        assert_eq!(display_track_name("   \t"), "No track name");
        assert_eq!(display_track_name(""), "No track name");
    }

    #[test]
    fn bpm_from_tempo() {
        assert_eq!(tempo_to_bpm(500_000), Some(120));
        assert_eq!(tempo_to_bpm(0), None);
    }

    #[test]
    fn console_commands() {
        assert_eq!(parse_transport("\n"), Some(TransportCommand::Toggle));
        assert_eq!(parse_transport(" R "), Some(TransportCommand::Restart));
        assert_eq!(parse_transport("quit"), Some(TransportCommand::Quit));
        assert_eq!(parse_transport("louder"), None);
        assert_eq!(parse_sink("BLE"), SinkKind::Ble);
        assert_eq!(parse_sink("speaker"), SinkKind::Log);
    }
}
