pub mod placement;
pub mod structure;

pub use placement::{plan_placements, plan_placements_with, IcPlacement, RemainderPolicy};
pub use structure::{encode, encode_modes, expand, parse_runs, RunToken};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a component was inserted relative to its predecessor
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Mode {
    Series,
    Parallel,
}

impl Mode {
    /// Letter used for this mode in a structure string
    pub fn letter(self) -> char {
        match self {
            Mode::Series => 'S',
            Mode::Parallel => 'P',
        }
    }

    pub fn from_letter(letter: char) -> Option<Self> {
        match letter {
            'S' => Some(Mode::Series),
            'P' => Some(Mode::Parallel),
            _ => None,
        }
    }
}

/// One user-placed part. `kind` and `value` are carried as opaque payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlacedComponent {
    pub id: String,
    pub kind: String,
    pub value: String,
    pub mode: Mode,
}

impl PlacedComponent {
    /// Create a component with a freshly generated id
    pub fn new(kind: impl Into<String>, value: impl Into<String>, mode: Mode) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: kind.into(),
            value: value.into(),
            mode,
        }
    }

    pub fn with_id(id: impl Into<String>, kind: impl Into<String>, value: impl Into<String>, mode: Mode) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            value: value.into(),
            mode,
        }
    }
}
