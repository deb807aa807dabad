// MIDI similarity analysis

pub mod midi_parser;
pub mod tempo;
pub mod features;
pub mod weights;
pub mod normalizer;
pub mod index;

pub use features::*;
pub use weights::*;
pub use normalizer::*;
pub use index::*;
