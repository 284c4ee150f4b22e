use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Address of an RF plug as understood by the remote's encoder chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlugCode {
    All,
    One,
    Two,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{0} is not a valid plug id")]
pub struct PlugCodeError(pub u8);

impl PlugCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "ALL",
            Self::One => "ONE",
            Self::Two => "TWO",
        }
    }

    pub fn id(self) -> u8 {
        match self {
            Self::All => 0,
            Self::One => 1,
            Self::Two => 2,
        }
    }

    /// Levels of the (d2, d1, d0) encoder lines selecting this plug.
    pub fn pattern(self) -> [Level; 3] {
        use Level::{High, Low};
        match self {
            Self::All => [Low, High, High],
            Self::One => [High, High, High],
            Self::Two => [High, High, Low],
        }
    }
}

impl TryFrom<u8> for PlugCode {
    type Error = PlugCodeError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        match id {
            0 => Ok(Self::All),
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            other => Err(PlugCodeError(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::High => "high",
        }
    }

    pub fn is_high(self) -> bool {
        matches!(self, Self::High)
    }
}

impl From<bool> for Level {
    fn from(on: bool) -> Self {
        if on {
            Self::High
        } else {
            Self::Low
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patterns_match_remote_wiring() {
        use Level::{High, Low};

        assert_eq!(PlugCode::All.pattern(), [Low, High, High]);
        assert_eq!(PlugCode::One.pattern(), [High, High, High]);
        assert_eq!(PlugCode::Two.pattern(), [High, High, Low]);
    }

    #[test]
    fn numeric_ids_round_trip() {
        for code in [PlugCode::All, PlugCode::One, PlugCode::Two] {
            assert_eq!(PlugCode::try_from(code.id()), Ok(code));
        }
    }

    #[test]
    fn unknown_ids_are_rejected() {
        for id in [3, 7, u8::MAX] {
            let err = PlugCode::try_from(id).unwrap_err();
            assert_eq!(err, PlugCodeError(id));
            assert_eq!(err.to_string(), format!("{id} is not a valid plug id"));
        }
    }

    #[test]
    fn deserializes_uppercase_names() {
        let code: PlugCode = serde_json::from_str("\"TWO\"").unwrap();
        assert_eq!(code, PlugCode::Two);
    }
}
