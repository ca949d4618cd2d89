pub mod timed_text;

pub use timed_text::{parse_timed_text, resolve_end_times, TimedTextEntries, TimedTextEntry};
