use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::str::Lines;

static TIMESTAMP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[(\d+(?::\d+){0,2}(?:\.\d+)?)\]").unwrap());

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[([^\d:\[\]][^:\[\]]*):([^\]]*)\]$").unwrap());

/// One item of a line-oriented timed-text (LRC style) document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimedTextEntry {
    Cue {
        start: f64,
        end: Option<f64>,
        text: String,
    },
    Tag {
        name: String,
        value: String,
    },
    Malformed(String),
}

impl TimedTextEntry {
    fn cue(start: f64, text: &str) -> Self {
        TimedTextEntry::Cue {
            start,
            end: None,
            text: text.to_string(),
        }
    }

    fn tag(name: &str, value: &str) -> Self {
        TimedTextEntry::Tag {
            name: name.trim().to_string(),
            value: value.trim().to_string(),
        }
    }

    pub fn start(&self) -> Option<f64> {
        match self {
            TimedTextEntry::Cue { start, .. } => Some(*start),
            _ => None,
        }
    }
}

/// Parse `text` lazily, one physical line at a time.
///
/// Each call starts from the beginning of `text`, so parsing the same input
/// twice yields the same sequence.
pub fn parse_timed_text(text: &str) -> TimedTextEntries<'_> {
    TimedTextEntries {
        lines: text.lines(),
        pending: VecDeque::new(),
    }
}

pub struct TimedTextEntries<'a> {
    lines: Lines<'a>,
    pending: VecDeque<TimedTextEntry>,
}

impl Iterator for TimedTextEntries<'_> {
    type Item = TimedTextEntry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.pending.pop_front() {
                return Some(entry);
            }
            let line = self.lines.next()?;
            parse_line(line, &mut self.pending);
        }
    }
}

fn parse_line(line: &str, out: &mut VecDeque<TimedTextEntry>) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let mut rest = line;
    let mut starts = Vec::new();
    while let Some(captures) = TIMESTAMP_RE.captures(rest) {
        let Some(start) = parse_timestamp(&captures[1]) else {
            break;
        };
        starts.push(start);
        rest = &rest[captures[0].len()..];
    }

    if !starts.is_empty() {
        let text = rest.trim();
        out.extend(starts.into_iter().map(|start| TimedTextEntry::cue(start, text)));
    } else if let Some(captures) = TAG_RE.captures(line) {
        out.push_back(TimedTextEntry::tag(&captures[1], &captures[2]));
    } else {
        out.push_back(TimedTextEntry::Malformed(line.to_string()));
    }
}

/// `h:m:s.frac` to seconds; hours and minutes are optional.
fn parse_timestamp(stamp: &str) -> Option<f64> {
    stamp
        .rsplit(':')
        .enumerate()
        .try_fold(0.0, |total, (position, component)| {
            let value: f64 = component.parse().ok()?;
            Some(total + value * 60f64.powi(position as i32))
        })
}

/// Keep only the cues, ordered by start time (stable), with each cue ending
/// where the next begins. The last cue has no end.
pub fn resolve_end_times(entries: impl IntoIterator<Item = TimedTextEntry>) -> Vec<TimedTextEntry> {
    let mut cues: Vec<TimedTextEntry> = entries
        .into_iter()
        .filter(|entry| matches!(entry, TimedTextEntry::Cue { .. }))
        .collect();
    cues.sort_by(|a, b| {
        let a = a.start().unwrap_or_default();
        let b = b.start().unwrap_or_default();
        a.total_cmp(&b)
    });

    let next_starts: Vec<Option<f64>> = cues
        .iter()
        .skip(1)
        .map(TimedTextEntry::start)
        .chain(std::iter::once(None))
        .collect();
    for (cue, next_start) in cues.iter_mut().zip(next_starts) {
        if let TimedTextEntry::Cue { end, .. } = cue {
            *end = next_start;
        }
    }
    cues
}
