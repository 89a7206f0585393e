//! gptab - Guitar Pro tablature file decoder
//!
//! This library decodes Guitar Pro 3 and 4 (.gp3, .gp4) files into a
//! typed song model: tracks, measures, voices, beats and notes together
//! with their playing effects.
//!
//! Decoding is a single forward pass over an in-memory buffer; it either
//! produces a complete [`Song`], reports that the version is not
//! supported, or fails with a typed [`TabError`].
//!
//! # Example
//!
//! ```no_run
//! use gptab::parse_gp_data;
//!
//! let file_data = std::fs::read("song.gp4").unwrap();
//! match parse_gp_data(&file_data).unwrap() {
//!     Some(song) => println!("{} tracks", song.tracks.len()),
//!     None => println!("unsupported version"),
//! }
//! ```

pub mod error;
pub mod parser;

// Re-export main types for convenience
pub use error::TabError;
pub use parser::song_parser::{
    parse_gp_data, Beat, BeatEffect, Duration, GpGeneration, GpVersion, Measure, MeasureHeader,
    MidiChannel, Note, NoteEffect, NoteType, RepeatGroup, Song, Track, Voice, QUARTER_TIME,
};
