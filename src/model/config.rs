use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "smf_sequencer",
    about = "Decode a MIDI file and play its notes in time!"
)]
pub struct Args {
    /// Path to the target MIDI file.
    pub midi: PathBuf,

    /// Dry run (print first dry_run_max events and exit).
    #[arg(short, long, default_value_t = false)]
    pub dry_run: bool,

    /// Maximum events to print in dry run.
    #[arg(long, default_value_t = 80)]
    pub dry_run_max: usize,

    /// Where notes are sent: log|ble.
    #[arg(short, long, default_value = "log")]
    pub sink: String,

    /// Start playing right away instead of waiting for the play command.
    #[arg(short, long, default_value_t = false)]
    pub autoplay: bool,

    /// Exit once the last event has been played.
    #[arg(long, default_value_t = false)]
    pub exit_at_end: bool,

    /// Timer resolution in microseconds. Waits are rounded down to whole ticks.
    #[arg(long = "timer-tick-us", default_value_t = 1)]
    pub timer_tick_us: u64,

    /// Prints extra information to the terminal.
    #[arg(short, long)]
    pub verbose: bool,
}
