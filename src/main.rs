use smf_sequencer::{
    Args, BleMidiSink, LogSink, NoteSink, ParseStatus, Player, PlayerOptions, Sequencer,
    SinkKind, SongTable, TrackMetadata, TransportCommand, display_track_name, parse_midi,
    parse_sink, parse_transport, tempo_to_bpm,
};
use anyhow::{Result, anyhow};
use clap::Parser;
use log::{debug, info, warn};
use std::fs;
use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread;

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    info!("Parsing MIDI file: '{}'...", args.midi.display());
    let bytes = fs::read(&args.midi).map_err(|e| {
        anyhow!(
            "Failed to read MIDI file {}: {}",
            args.midi.display(),
            e
        )
    })?;

    let mut song = SongTable::new();
    let mut metadata = TrackMetadata::default();
    let report = parse_midi(&bytes, &mut song, &mut metadata);

    if report.status == ParseStatus::NoFile {
        warn!("No midi file found in '{}'..!", args.midi.display());
        return Ok(());
    }

    if !report.issues.is_empty() {
        warn!(
            "Decoded with {} issue(s), playback may be incomplete..!",
            report.issues.len()
        );
    }

    info!(
        "{} | {} events | {} ticks per beat | {} bpm",
        display_track_name(&metadata.track_name),
        song.index(),
        metadata.ticks_per_beat,
        tempo_to_bpm(metadata.tempo)
            .map(|bpm| bpm.to_string())
            .unwrap_or_else(|| "<unknown>".into())
    );

    let sequencer = Sequencer::new(song, metadata);

    if args.dry_run {
        dry_run(&sequencer, args.dry_run_max);
        return Ok(());
    }

    match parse_sink(&args.sink) {
        SinkKind::Log => play(LogSink, sequencer, &args),
        SinkKind::Ble => play(BleMidiSink::new(io::stdout()), sequencer, &args),
    }
}

fn dry_run(sequencer: &Sequencer, max: usize) {
    let (on, off) = sequencer.command_counts();
    info!(
        "Previewing at most {} of {} events ({} on / {} off, {:.3}s)..!",
        max,
        sequencer.song().index(),
        on,
        off,
        sequencer.duration_micros() as f64 / 1_000_000.0
    );

    let mut time_us: u64 = 0;
    for (i, ev) in sequencer.song().events().iter().enumerate().take(max) {
        time_us += sequencer.delta_to_micros(ev.delta);
        info!(
            "Event {}: delta={} status={:#04x} note={} velocity={} time_ms={:.3}",
            i,
            ev.delta,
            ev.status,
            ev.note,
            ev.velocity,
            time_us as f64 / 1000.0
        );
    }
}

fn play<S: NoteSink + 'static>(sink: S, sequencer: Sequencer, args: &Args) -> Result<()> {
    let player = Player::new(
        sink,
        PlayerOptions {
            verbose: args.verbose,
            exit_at_end: args.exit_at_end,
            timer_tick_us: args.timer_tick_us,
        },
    );

    player.load_song(sequencer)?;
    player.start()?;

    let player = Arc::new(player);
    let player_for_handler = Arc::clone(&player);
    ctrlc::set_handler(move || {
        warn!("Ctrl-C received, stopping playback..!");
        let _ = player_for_handler.stop();
    })
    .expect("Error setting Ctrl-C handler..!");

    if args.autoplay {
        player.toggle()?;
    }

    info!("Controls: [enter]/p = play/pause | r = restart | q = quit");
    let player_for_input = Arc::clone(&player);
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };

            let Some(command) = parse_transport(&line) else {
                warn!("Unknown command '{}'..!", line.trim());
                continue;
            };

            if let Err(why) = player_for_input.command(command) {
                debug!("Console input stopped: {:?}", why);
                break;
            }

            if command == TransportCommand::Quit {
                break;
            }
        }
    });

    let (sequencer, _sink) = player.join()?;
    info!(
        "Playback finished at {:.1}% of '{}', exiting..!",
        sequencer.progress() * 100.0,
        display_track_name(&sequencer.metadata().track_name)
    );

    Ok(())
}
