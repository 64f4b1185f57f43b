mod engine;
mod midi_parser;
mod model;
mod player;
mod reader;
mod sequencer;
mod util;

pub use engine::ble::*;
pub use engine::*;
pub use midi_parser::*;
pub use model::config::*;
pub use model::song::*;
pub use player::*;
pub use reader::*;
pub use sequencer::*;
pub use util::*;
