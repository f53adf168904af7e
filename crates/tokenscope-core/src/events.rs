use crate::{AnalysisStatus, TokenFields};
use serde_json::{Map, Value};
use thiserror::Error;

/// Wire kind -> variant. Anything not listed here is an unknown kind.
pub const EVENT_KINDS: &[(&str, EventKind)] = &[
    ("new_token", EventKind::NewToken),
    ("analysis_update", EventKind::AnalysisUpdate),
    ("analysis_complete", EventKind::AnalysisComplete),
    ("analysis_complete_full", EventKind::AnalysisCompleteFull),
    ("analysis_failed", EventKind::AnalysisFailed),
];

const STATIC_AMOUNT_KEYS: [&str; 4] = [
    "token_total_supply",
    "virtual_sol_reserves",
    "virtual_token_reserves",
    "real_token_reserves",
];

/// Keys the record itself serializes next to the flattened `extra` map.
const RECORD_KEYS: [&str; 4] = ["mint", "analysisStatus", "analysisProgress", "analysisResult"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    NewToken,
    AnalysisUpdate,
    AnalysisComplete,
    AnalysisCompleteFull,
    AnalysisFailed,
}

impl EventKind {
    pub fn from_wire(kind: &str) -> Option<Self> {
        EVENT_KINDS
            .iter()
            .find(|(name, _)| *name == kind)
            .map(|(_, kind)| *kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::NewToken => "new_token",
            EventKind::AnalysisUpdate => "analysis_update",
            EventKind::AnalysisComplete => "analysis_complete",
            EventKind::AnalysisCompleteFull => "analysis_complete_full",
            EventKind::AnalysisFailed => "analysis_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("unknown event kind: {0}")]
    UnknownKind(String),
    #[error("{kind} payload is not an object")]
    NotAnObject { kind: &'static str },
    #[error("{kind} payload is missing {field}")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
    #[error("{kind} payload has invalid {field}: {reason}")]
    InvalidField {
        kind: &'static str,
        field: &'static str,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewToken {
    pub mint: String,
    pub fields: TokenFields,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisUpdate {
    pub token_mint: String,
    pub status: AnalysisStatus,
    pub progress: u8,
    pub result: Value,
}

/// Terminal payload whose shape differs from the live record: its static
/// fields arrive under `token_*` names and are remapped here.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisComplete {
    pub token_mint: String,
    pub fields: TokenFields,
    pub completed_at: Option<String>,
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TerminalResult {
    pub token_mint: String,
    pub result: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenEvent {
    NewToken(NewToken),
    AnalysisUpdate(AnalysisUpdate),
    AnalysisComplete(AnalysisComplete),
    AnalysisCompleteFull(TerminalResult),
    AnalysisFailed(TerminalResult),
}

impl TokenEvent {
    pub fn parse(kind: EventKind, data: &Value) -> Result<Self, DispatchError> {
        let name = kind.as_str();
        let Value::Object(map) = data else {
            return Err(DispatchError::NotAnObject { kind: name });
        };
        let event = match kind {
            EventKind::NewToken => TokenEvent::NewToken(parse_new_token(name, map)?),
            EventKind::AnalysisUpdate => TokenEvent::AnalysisUpdate(AnalysisUpdate {
                token_mint: required_id(name, map, "token_mint")?,
                status: required_status(name, map)?,
                progress: required_progress(name, map)?,
                result: data.clone(),
            }),
            EventKind::AnalysisComplete => {
                TokenEvent::AnalysisComplete(parse_analysis_complete(name, map, data)?)
            }
            EventKind::AnalysisCompleteFull => TokenEvent::AnalysisCompleteFull(TerminalResult {
                token_mint: required_id(name, map, "token_mint")?,
                result: data.clone(),
            }),
            EventKind::AnalysisFailed => TokenEvent::AnalysisFailed(TerminalResult {
                token_mint: required_id(name, map, "token_mint")?,
                result: data.clone(),
            }),
        };
        Ok(event)
    }

    pub fn kind(&self) -> EventKind {
        match self {
            TokenEvent::NewToken(_) => EventKind::NewToken,
            TokenEvent::AnalysisUpdate(_) => EventKind::AnalysisUpdate,
            TokenEvent::AnalysisComplete(_) => EventKind::AnalysisComplete,
            TokenEvent::AnalysisCompleteFull(_) => EventKind::AnalysisCompleteFull,
            TokenEvent::AnalysisFailed(_) => EventKind::AnalysisFailed,
        }
    }

    pub fn mint(&self) -> &str {
        match self {
            TokenEvent::NewToken(event) => &event.mint,
            TokenEvent::AnalysisUpdate(event) => &event.token_mint,
            TokenEvent::AnalysisComplete(event) => &event.token_mint,
            TokenEvent::AnalysisCompleteFull(event) | TokenEvent::AnalysisFailed(event) => {
                &event.token_mint
            }
        }
    }
}

fn parse_new_token(kind: &'static str, map: &Map<String, Value>) -> Result<NewToken, DispatchError> {
    let mint = required_id(kind, map, "mint")?;
    let created_at = optional_string(map, "created_at").or_else(|| {
        map.get("timestamp")
            .and_then(|value| value.as_i64())
            .map(|secs| secs.to_string())
    });
    let mut fields = TokenFields {
        name: optional_string(map, "name"),
        symbol: optional_string(map, "symbol"),
        uri: optional_string(map, "uri"),
        created_at,
        ..TokenFields::default()
    };
    read_amounts(map, &mut fields);
    for (key, value) in map {
        if matches!(
            key.as_str(),
            "name" | "symbol" | "uri" | "created_at"
        ) || STATIC_AMOUNT_KEYS.contains(&key.as_str())
            || RECORD_KEYS.contains(&key.as_str())
        {
            continue;
        }
        fields.extra.insert(key.clone(), value.clone());
    }
    Ok(NewToken { mint, fields })
}

fn parse_analysis_complete(
    kind: &'static str,
    map: &Map<String, Value>,
    data: &Value,
) -> Result<AnalysisComplete, DispatchError> {
    let mut fields = TokenFields {
        name: optional_string(map, "token_name"),
        symbol: optional_string(map, "token_symbol"),
        uri: optional_string(map, "uri"),
        ..TokenFields::default()
    };
    read_amounts(map, &mut fields);
    Ok(AnalysisComplete {
        token_mint: required_id(kind, map, "token_mint")?,
        fields,
        completed_at: optional_string(map, "analysis_completed_at"),
        result: data.clone(),
    })
}

fn read_amounts(map: &Map<String, Value>, fields: &mut TokenFields) {
    fields.token_total_supply = map.get("token_total_supply").and_then(amount_from_value);
    fields.virtual_sol_reserves = map.get("virtual_sol_reserves").and_then(amount_from_value);
    fields.virtual_token_reserves = map
        .get("virtual_token_reserves")
        .and_then(amount_from_value);
    fields.real_token_reserves = map.get("real_token_reserves").and_then(amount_from_value);
}

fn required_id(
    kind: &'static str,
    map: &Map<String, Value>,
    field: &'static str,
) -> Result<String, DispatchError> {
    match map.get(field) {
        Some(Value::String(value)) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        Some(Value::Number(value)) => Ok(value.to_string()),
        Some(Value::String(_)) => Err(DispatchError::InvalidField {
            kind,
            field,
            reason: "empty".to_string(),
        }),
        Some(Value::Null) | None => Err(DispatchError::MissingField { kind, field }),
        Some(other) => Err(DispatchError::InvalidField {
            kind,
            field,
            reason: format!("expected string or number, got {other}"),
        }),
    }
}

fn required_status(
    kind: &'static str,
    map: &Map<String, Value>,
) -> Result<AnalysisStatus, DispatchError> {
    let raw = map
        .get("status")
        .and_then(Value::as_str)
        .ok_or(DispatchError::MissingField {
            kind,
            field: "status",
        })?;
    raw.parse::<AnalysisStatus>().map_err(|reason| DispatchError::InvalidField {
        kind,
        field: "status",
        reason,
    })
}

fn required_progress(kind: &'static str, map: &Map<String, Value>) -> Result<u8, DispatchError> {
    let value = match map.get("progress") {
        Some(Value::Null) | None => {
            return Err(DispatchError::MissingField {
                kind,
                field: "progress",
            })
        }
        Some(value) => value,
    };
    let number = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    match number {
        Some(number) if number.is_finite() => Ok(number.round().clamp(0.0, 100.0) as u8),
        _ => Err(DispatchError::InvalidField {
            kind,
            field: "progress",
            reason: format!("expected a number, got {value}"),
        }),
    }
}

fn optional_string(map: &Map<String, Value>, field: &str) -> Option<String> {
    map.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Accepts integers, non-negative floats and numeric strings; anything else
/// counts as absent.
fn amount_from_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64().or_else(|| {
            number
                .as_f64()
                .filter(|float| float.is_finite() && *float >= 0.0)
                .map(|float| float as u64)
        }),
        Value::String(text) => {
            let text = text.trim();
            text.parse::<u64>().ok().or_else(|| {
                text.parse::<f64>()
                    .ok()
                    .filter(|float| float.is_finite() && *float >= 0.0)
                    .map(|float| float as u64)
            })
        }
        _ => None,
    }
}
