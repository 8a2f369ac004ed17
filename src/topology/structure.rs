//! Run-length structure strings (`S2P5`, ...) sent to the firmware
use serde::{Deserialize, Serialize};

use super::{Mode, PlacedComponent};

/// One maximal run of same-mode components
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunToken {
    pub mode: Mode,
    pub count: usize,
}

impl std::fmt::Display for RunToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.mode.letter(), self.count)
    }
}

/// Encode a component sequence into its structure string
pub fn encode(components: &[PlacedComponent]) -> String {
    encode_modes(components.iter().map(|c| c.mode))
}

/// Encode a bare mode sequence into its structure string
pub fn encode_modes<I>(modes: I) -> String
where
    I: IntoIterator<Item = Mode>,
{
    let mut runs: Vec<RunToken> = Vec::new();

    for mode in modes {
        match runs.last_mut() {
            Some(run) if run.mode == mode => run.count += 1,
            _ => runs.push(RunToken { mode, count: 1 }),
        }
    }

    runs.iter().map(RunToken::to_string).collect()
}

/// Parse the run tokens out of a structure string.
///
/// Anything that is not a letter `S`/`P` directly followed by digits is
/// skipped, as are zero-length and overflowing runs.
pub fn parse_runs(structure: &str) -> Vec<RunToken> {
    let bytes = structure.as_bytes();
    let mut runs = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let mode = match Mode::from_letter(bytes[i] as char) {
            Some(mode) => mode,
            None => {
                i += 1;
                continue;
            }
        };

        let digits_start = i + 1;
        let mut digits_end = digits_start;
        while digits_end < bytes.len() && bytes[digits_end].is_ascii_digit() {
            digits_end += 1;
        }

        if digits_end == digits_start {
            i += 1;
            continue;
        }

        // Digits are ASCII so the slice is valid UTF-8
        match structure[digits_start..digits_end].parse::<usize>() {
            Ok(count) if count > 0 => runs.push(RunToken { mode, count }),
            Ok(_) => {}
            Err(_) => log::debug!("Skipping oversized run token in structure {:?}", structure),
        }
        i = digits_end;
    }

    runs
}

/// Expand a structure string back into one mode per component
pub fn expand(structure: &str) -> Vec<Mode> {
    parse_runs(structure)
        .into_iter()
        .flat_map(|run| std::iter::repeat(run.mode).take(run.count))
        .collect()
}
