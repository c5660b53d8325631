use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Interview language. Fixed for the lifetime of a session once started;
/// carried on every exchange request to select prompt phrasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageMode {
    English,
    Japanese,
}

impl LanguageMode {
    /// Two-letter tag used on the wire (STT session config, exchange requests).
    pub fn tag(&self) -> &'static str {
        match self {
            LanguageMode::English => "en",
            LanguageMode::Japanese => "ja",
        }
    }
}

impl fmt::Display for LanguageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for LanguageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "en" | "english" => Ok(LanguageMode::English),
            "ja" | "japanese" => Ok(LanguageMode::Japanese),
            other => Err(format!("unsupported language: {other} (expected en or ja)")),
        }
    }
}
