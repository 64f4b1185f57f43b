use crate::engine::NoteSink;
use crate::sequencer::{Sequencer, Step};
use crate::util::progress_bar;
use anyhow::{anyhow, bail};
use log::{debug, info, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::{Mutex, mpsc};
use std::thread;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const MAX_SLEEP_CHUNK: Duration = Duration::from_millis(10);
const PROGRESS_BAR_WIDTH: usize = 18;

/// Transport requests accepted from outside the playback thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportCommand {
    Toggle,
    Restart,
    Quit,
}

enum ControlMsg {
    Toggle,
    Restart,
    Stop,
}

#[derive(Debug, Clone, Copy)]
pub struct PlayerOptions {
    /// Log every step with a progress bar.
    pub verbose: bool,
    /// Leave the playback thread once the last event has been played.
    pub exit_at_end: bool,
    /// Resolution of the one-shot timer; waits are truncated to whole ticks.
    pub timer_tick_us: u64,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            verbose: false,
            exit_at_end: false,
            timer_tick_us: 1,
        }
    }
}

/// Drives a [`Sequencer`] from a dedicated thread.
///
/// That thread is the only place the sequencer, the sink and the single pending timer
/// live. Transport requests reach it over a channel and timer expiry is observed on the
/// same thread, so playback state is never touched from two places.
#[derive(Debug)]
pub struct Player<S: NoteSink> {
    options: PlayerOptions,
    sink: Mutex<Option<S>>,
    sequencer: Mutex<Option<Sequencer>>,
    control_tx: Mutex<Option<Sender<ControlMsg>>>,
    worker_handle: Mutex<Option<JoinHandle<(Sequencer, S)>>>,
}

impl<S: NoteSink + 'static> Player<S> {
    pub fn new(sink: S, options: PlayerOptions) -> Self {
        Self {
            options,
            sink: Mutex::new(Some(sink)),
            sequencer: Mutex::new(None),
            control_tx: Mutex::new(None),
            worker_handle: Mutex::new(None),
        }
    }

    pub fn load_song(&self, sequencer: Sequencer) -> anyhow::Result<()> {
        let Ok(mut slot) = self.sequencer.lock() else {
            bail!("Failed to lock the sequencer..!");
        };

        info!(
            "Loaded song: '{}' with {} scheduled events..!",
            sequencer.metadata().track_name,
            sequencer.song().index()
        );
        *slot = Some(sequencer);

        Ok(())
    }

    /// Spawns the playback thread. Playback itself starts `Stopped`.
    pub fn start(&self) -> anyhow::Result<()> {
        let Ok(mut handle_slot) = self.worker_handle.lock() else {
            bail!("Failed to lock worker handle..!")
        };

        if handle_slot.is_some() {
            bail!("Playback already running..!")
        }

        let sequencer = {
            let Ok(mut slot) = self.sequencer.lock() else {
                bail!("Failed to lock the sequencer..!")
            };
            slot.take()
        };
        let Some(sequencer) = sequencer else {
            bail!("No song loaded..!")
        };

        let sink = {
            let Ok(mut slot) = self.sink.lock() else {
                bail!("Failed to lock the note sink..!")
            };
            slot.take()
        };
        let Some(sink) = sink else {
            bail!("Note sink was already handed to a finished playback..!")
        };

        let (tx, rx) = mpsc::channel::<ControlMsg>();
        {
            let Ok(mut ctl) = self.control_tx.lock() else {
                bail!("Failed to lock control_tx..!")
            };

            *ctl = Some(tx);
        }

        let options = self.options;
        *handle_slot = Some(thread::spawn(move || {
            run_playback(sequencer, sink, rx, options)
        }));
        debug!("Playback thread spawned..!");

        Ok(())
    }

    pub fn toggle(&self) -> anyhow::Result<()> {
        self.send(ControlMsg::Toggle)
    }

    pub fn restart(&self) -> anyhow::Result<()> {
        self.send(ControlMsg::Restart)
    }

    pub fn command(&self, command: TransportCommand) -> anyhow::Result<()> {
        match command {
            TransportCommand::Toggle => self.toggle(),
            TransportCommand::Restart => self.restart(),
            TransportCommand::Quit => self.stop(),
        }
    }

    /// Asks the playback thread to finish. Use [`Player::join`] to wait for it.
    pub fn stop(&self) -> anyhow::Result<()> {
        let tx = {
            let Ok(mut lock) = self.control_tx.lock() else {
                bail!("Failed to lock control_tx..!")
            };
            lock.take()
        };

        if let Some(tx) = tx {
            let _ = tx.send(ControlMsg::Stop);
        } else {
            bail!("No worker is running playback..!")
        }

        Ok(())
    }

    /// Waits for the playback thread and hands back the sequencer and sink it owned.
    pub fn join(&self) -> anyhow::Result<(Sequencer, S)> {
        let handle = {
            let Ok(mut lock) = self.worker_handle.lock() else {
                bail!("Failed to lock worker_handle..!")
            };
            lock.take()
        };

        let Some(handle) = handle else {
            bail!("No worker is running playback..!")
        };

        let finished = handle
            .join()
            .map_err(|_| anyhow!("Playback thread panicked..!"))?;
        debug!("Playback thread joined..!");

        if let Ok(mut ctl) = self.control_tx.lock() {
            ctl.take();
        }

        Ok(finished)
    }

    fn send(&self, msg: ControlMsg) -> anyhow::Result<()> {
        let Ok(lock) = self.control_tx.lock() else {
            bail!("Failed to lock control_tx..!")
        };

        let Some(tx) = lock.as_ref() else {
            bail!("No worker is running playback..!")
        };

        tx.send(msg)
            .map_err(|_| anyhow!("Playback thread is no longer listening..!"))
    }
}

/// Truncates a wait to whole timer ticks.
pub fn to_timer_ticks(micros: u64, tick_us: u64) -> Duration {
    let tick = tick_us.max(1);
    Duration::from_micros(micros / tick * tick)
}

fn run_playback<S: NoteSink>(
    mut sequencer: Sequencer,
    mut sink: S,
    ctrl_rx: Receiver<ControlMsg>,
    options: PlayerOptions,
) -> (Sequencer, S) {
    let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
    // The one outstanding one-shot timer. Re-arming replaces it.
    let mut timer: Option<Instant> = None;

    loop {
        let msg = match timer {
            Some(deadline) => wait_until(&sleeper, &ctrl_rx, deadline),
            None => Some(ctrl_rx.recv().unwrap_or(ControlMsg::Stop)),
        };

        match msg {
            Some(ControlMsg::Toggle) => {
                if sequencer.toggle() {
                    info!("Playing..!");
                    timer = Some(Instant::now());
                } else {
                    info!("Paused..!");
                    sink.silence();
                }
            }
            Some(ControlMsg::Restart) => {
                if sequencer.restart() {
                    sink.silence();
                    timer = Some(Instant::now());
                }
                info!("Restarted from the beginning..!");
            }
            Some(ControlMsg::Stop) => {
                sink.silence();
                warn!(
                    "Playback stopped via control message at event {}/{}..!",
                    sequencer.cursor(),
                    sequencer.song().index()
                );
                break;
            }
            None => {
                let Some(fired) = timer.take() else {
                    continue;
                };

                match sequencer.step(&mut sink) {
                    Step::Wait(micros) => {
                        // chain from the intended fire time so overhead does not add up
                        timer = Some(fired + to_timer_ticks(micros, options.timer_tick_us));
                    }
                    Step::Idle => {
                        if options.exit_at_end && sequencer.is_running() && sequencer.is_finished()
                        {
                            sink.silence();
                            info!("Playback thread finished all events..!");
                            break;
                        }
                    }
                }

                if options.verbose && sequencer.is_running() {
                    let progress = sequencer.progress();
                    info!(
                        "{} {:>5.1}% | event {:>4}/{}",
                        progress_bar(progress, PROGRESS_BAR_WIDTH),
                        progress * 100.0,
                        sequencer.cursor(),
                        sequencer.song().index()
                    );
                }
            }
        }
    }

    (sequencer, sink)
}

/// Sleeps until `deadline` in short chunks. Returns early with any control message that
/// arrives; `None` means the timer expired.
fn wait_until(
    sleeper: &SpinSleeper,
    ctrl_rx: &Receiver<ControlMsg>,
    deadline: Instant,
) -> Option<ControlMsg> {
    loop {
        match ctrl_rx.try_recv() {
            Ok(msg) => return Some(msg),
            Err(TryRecvError::Disconnected) => return Some(ControlMsg::Stop),
            Err(TryRecvError::Empty) => {}
        }

        let now = Instant::now();
        if now >= deadline {
            return None;
        }

        sleeper.sleep((deadline - now).min(MAX_SLEEP_CHUNK));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::song::{NoteCommand, NoteEvent, SongTable, TrackMetadata};

    #[derive(Default)]
    struct RecordingSink {
        notes: Vec<(NoteCommand, u8, u8, u8)>,
        silenced: usize,
    }

    impl NoteSink for RecordingSink {
        fn emit(&mut self, command: NoteCommand, channel: u8, note: u8, velocity: u8) {
            self.notes.push((command, channel, note, velocity));
        }

        fn silence(&mut self) {
            self.silenced += 1;
        }
    }

    fn sequencer(deltas: &[u32], tempo: u32, ticks_per_beat: u16) -> Sequencer {
        let mut song = SongTable::new();
        for (i, &delta) in deltas.iter().enumerate() {
            song.push(NoteEvent {
                delta,
                status: 0x90,
                note: 40 + i as u8,
                velocity: 64,
            });
        }

        Sequencer::new(
            song,
            TrackMetadata {
                track_name: "player test".into(),
                ticks_per_beat,
                tempo,
            },
        )
    }

    #[test]
    fn plays_whole_song_then_exits() {
        env_logger::try_init().unwrap_or(());

        let options = PlayerOptions {
            verbose: true,
            exit_at_end: true,
            timer_tick_us: 100,
        };
        let player = Player::new(RecordingSink::default(), options);

        assert!(player.load_song(sequencer(&[0, 10, 0, 10, 0], 1_000, 10)).is_ok());
        assert!(player.start().is_ok());
        assert!(player.toggle().is_ok());

        let (sequencer, sink) = player.join().unwrap();
        assert!(sequencer.is_finished());
        assert_eq!(sequencer.progress(), 1.0);

        let notes: Vec<u8> = sink.notes.iter().map(|n| n.2).collect();
        assert_eq!(notes, vec![40, 41, 42, 43, 44]);
        assert_eq!(sink.silenced, 1);
    }

    #[test]
    fn stop_during_wait() {
        env_logger::try_init().unwrap_or(());

        let player = Player::new(RecordingSink::default(), PlayerOptions::default());
        assert!(player.load_song(sequencer(&[0, 96], 5_000_000, 96)).is_ok());
        assert!(player.start().is_ok());
        assert!(player.start().is_err());

        assert!(player.toggle().is_ok());
        thread::sleep(Duration::from_millis(100));
        assert!(player.command(TransportCommand::Quit).is_ok());

        let (sequencer, sink) = player.join().unwrap();
        assert_eq!(sequencer.cursor(), 1);
        assert_eq!(sink.notes.len(), 1);
        assert!(player.toggle().is_err());
    }

    #[test]
    fn stopped_player_ignores_its_pending_timer() {
        env_logger::try_init().unwrap_or(());

        let player = Player::new(RecordingSink::default(), PlayerOptions::default());
        assert!(player.load_song(sequencer(&[0, 96, 96], 300_000, 96)).is_ok());
        assert!(player.start().is_ok());

        assert!(player.toggle().is_ok());
        thread::sleep(Duration::from_millis(30));
        assert!(player.toggle().is_ok());
        // the 300ms timer armed while playing expires while stopped
        thread::sleep(Duration::from_millis(500));
        assert!(player.stop().is_ok());

        let (sequencer, sink) = player.join().unwrap();
        assert!(!sequencer.is_running());
        assert_eq!(sequencer.cursor(), 1);
        assert_eq!(sink.notes.len(), 1);
    }

    #[test]
    fn restart_while_playing_replays_first_note_at_once() {
        env_logger::try_init().unwrap_or(());

        let player = Player::new(RecordingSink::default(), PlayerOptions::default());
        assert!(player.load_song(sequencer(&[0, 96, 96], 2_000_000, 96)).is_ok());
        assert!(player.start().is_ok());

        assert!(player.toggle().is_ok());
        thread::sleep(Duration::from_millis(100));
        assert!(player.restart().is_ok());
        // well inside the 2s wait that was pending before the restart
        thread::sleep(Duration::from_millis(100));
        assert!(player.stop().is_ok());

        let (sequencer, sink) = player.join().unwrap();
        let notes: Vec<u8> = sink.notes.iter().map(|n| n.2).collect();
        assert_eq!(notes, vec![40, 40]);
        assert_eq!(sequencer.cursor(), 1);
        assert_eq!(sequencer.cumulative_length(), 0);
        // once for the restart, once for the stop
        assert_eq!(sink.silenced, 2);
    }

    #[test]
    fn restart_while_stopped_only_rewinds() {
        env_logger::try_init().unwrap_or(());

        let player = Player::new(RecordingSink::default(), PlayerOptions::default());
        assert!(player.load_song(sequencer(&[0, 96, 96], 300_000, 96)).is_ok());
        assert!(player.start().is_ok());

        assert!(player.toggle().is_ok());
        thread::sleep(Duration::from_millis(30));
        assert!(player.toggle().is_ok());
        assert!(player.restart().is_ok());
        // the timer armed while playing still fires, and must do nothing
        thread::sleep(Duration::from_millis(500));
        assert!(player.stop().is_ok());

        let (sequencer, sink) = player.join().unwrap();
        assert!(!sequencer.is_running());
        assert_eq!(sequencer.cursor(), 0);
        assert_eq!(sequencer.progress(), 0.0);
        assert_eq!(sink.notes.len(), 1);
        // once for the pause, once for the stop
        assert_eq!(sink.silenced, 2);
    }

    #[test]
    fn requires_song_and_worker() {
        let player = Player::new(RecordingSink::default(), PlayerOptions::default());

        assert!(player.toggle().is_err());
        assert!(player.stop().is_err());
        assert!(player.start().is_err());
        assert!(player.join().is_err());
    }

    #[test]
    fn waits_are_truncated_to_timer_ticks() {
        assert_eq!(to_timer_ticks(1_234, 1), Duration::from_micros(1_234));
        assert_eq!(to_timer_ticks(1_234, 488), Duration::from_micros(976));
        assert_eq!(to_timer_ticks(100, 488), Duration::ZERO);
        assert_eq!(to_timer_ticks(5, 0), Duration::from_micros(5));
    }
}
