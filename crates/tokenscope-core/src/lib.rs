use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

pub mod board;
pub mod dispatch;
pub mod events;
pub mod stream_protocol;
pub mod view;

pub use board::{DropReason, MergeOutcome, ReplacePolicy, TokenBoard};
pub use dispatch::{DispatchCounters, DispatchOutcome, EventDispatcher, RejectedEvent};
pub use events::{DispatchError, EventKind, TokenEvent};
pub use view::{BoardStats, BoardView};

/// Canonical state for one tracked token, keyed by its mint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenRecord {
    pub mint: String,
    #[serde(flatten)]
    pub fields: TokenFields,
    #[serde(rename = "analysisStatus")]
    pub analysis_status: AnalysisStatus,
    #[serde(rename = "analysisProgress")]
    pub analysis_progress: u8,
    #[serde(rename = "analysisResult")]
    pub analysis_result: Option<Value>,
}

impl TokenRecord {
    pub fn new(mint: impl Into<String>, fields: TokenFields) -> Self {
        Self {
            mint: mint.into(),
            fields,
            analysis_status: AnalysisStatus::Pending,
            analysis_progress: 0,
            analysis_result: None,
        }
    }
}

/// Static fields set at creation. Every field is optional because terminal
/// payloads only carry a subset of them.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_total_supply: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_sol_reserves: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_token_reserves: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub real_token_reserves: Option<u64>,
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

impl TokenFields {
    /// Overwrites every field `fresh` supplies, keeping the rest.
    pub fn overlay(&mut self, fresh: TokenFields) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }
        take(&mut self.name, fresh.name);
        take(&mut self.symbol, fresh.symbol);
        take(&mut self.uri, fresh.uri);
        take(&mut self.created_at, fresh.created_at);
        take(&mut self.token_total_supply, fresh.token_total_supply);
        take(&mut self.virtual_sol_reserves, fresh.virtual_sol_reserves);
        take(&mut self.virtual_token_reserves, fresh.virtual_token_reserves);
        take(&mut self.real_token_reserves, fresh.real_token_reserves);
        self.extra.extend(fresh.extra);
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStatus {
    Pending,
    Analyzing,
    Completed,
    CompletedFull,
    Failed,
}

impl Default for AnalysisStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "PENDING",
            AnalysisStatus::Analyzing => "ANALYZING",
            AnalysisStatus::Completed => "COMPLETED",
            AnalysisStatus::CompletedFull => "COMPLETED_FULL",
            AnalysisStatus::Failed => "FAILED",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AnalysisStatus::Completed | AnalysisStatus::CompletedFull)
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "pending" => Ok(AnalysisStatus::Pending),
            "analyzing" | "analysing" | "in_progress" => Ok(AnalysisStatus::Analyzing),
            "completed" | "complete" => Ok(AnalysisStatus::Completed),
            "completed_full" | "completedfull" => Ok(AnalysisStatus::CompletedFull),
            "failed" | "error" => Ok(AnalysisStatus::Failed),
            other => Err(format!("Unknown analysis status: {other}")),
        }
    }
}

/// Transport state as shown to consumers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parse_accepts_wire_and_display_spellings() {
        assert_eq!("ANALYZING".parse::<AnalysisStatus>(), Ok(AnalysisStatus::Analyzing));
        assert_eq!("Analyzing".parse::<AnalysisStatus>(), Ok(AnalysisStatus::Analyzing));
        assert_eq!("completed-full".parse::<AnalysisStatus>(), Ok(AnalysisStatus::CompletedFull));
        assert_eq!(" COMPLETED_FULL ".parse::<AnalysisStatus>(), Ok(AnalysisStatus::CompletedFull));
        assert_eq!("FAILED".parse::<AnalysisStatus>(), Ok(AnalysisStatus::Failed));
        assert!("done-ish".parse::<AnalysisStatus>().is_err());
    }

    #[test]
    fn overlay_keeps_fields_the_fresh_side_lacks() {
        let mut base = TokenFields {
            name: Some("Foo".to_string()),
            symbol: Some("FOO".to_string()),
            token_total_supply: Some(1_000_000),
            virtual_sol_reserves: Some(30),
            ..TokenFields::default()
        };
        base.extra
            .insert("creator".to_string(), Value::String("abc".to_string()));

        base.overlay(TokenFields {
            name: Some("Foo Coin".to_string()),
            virtual_sol_reserves: Some(42),
            ..TokenFields::default()
        });

        assert_eq!(base.name.as_deref(), Some("Foo Coin"));
        assert_eq!(base.symbol.as_deref(), Some("FOO"));
        assert_eq!(base.token_total_supply, Some(1_000_000));
        assert_eq!(base.virtual_sol_reserves, Some(42));
        assert_eq!(base.extra.get("creator"), Some(&Value::String("abc".to_string())));
    }

    #[test]
    fn record_serializes_analysis_fields_in_camel_case() {
        let record = TokenRecord::new(
            "abc",
            TokenFields {
                symbol: Some("FOO".to_string()),
                ..TokenFields::default()
            },
        );
        let json = serde_json::to_value(&record).expect("serialize");
        assert_eq!(json["mint"], "abc");
        assert_eq!(json["symbol"], "FOO");
        assert_eq!(json["analysisStatus"], "PENDING");
        assert_eq!(json["analysisProgress"], 0);
        assert!(json["analysisResult"].is_null());
    }
}
