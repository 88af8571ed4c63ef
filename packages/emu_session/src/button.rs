use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SessionError;

/// A joypad button a viewer can press.
///
/// The numeric ids are the ones viewer pages send over the wire.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Button {
    Right = 0,
    Left = 1,
    Up = 2,
    Down = 3,
    A = 4,
    B = 5,
    Select = 6,
    Start = 7,
}

impl Button {
    pub const ALL: [Button; 8] = [
        Button::Right,
        Button::Left,
        Button::Up,
        Button::Down,
        Button::A,
        Button::B,
        Button::Select,
        Button::Start,
    ];

    /// Wire id of the button
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(usize::from(id)).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Button::Right => "RIGHT",
            Button::Left => "LEFT",
            Button::Up => "UP",
            Button::Down => "DOWN",
            Button::A => "A",
            Button::B => "B",
            Button::Select => "SELECT",
            Button::Start => "START",
        }
    }
}

impl fmt::Display for Button {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Accepts either the wire id (`"4"`) or the button name (`"a"`, `"START"`).
impl FromStr for Button {
    type Err = SessionError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let token = raw.trim();

        if let Ok(id) = token.parse::<u8>() {
            return Self::from_id(id).ok_or_else(|| SessionError::InvalidInput(raw.to_string()));
        }

        Self::ALL
            .into_iter()
            .find(|b| b.name().eq_ignore_ascii_case(token))
            .ok_or_else(|| SessionError::InvalidInput(raw.to_string()))
    }
}
