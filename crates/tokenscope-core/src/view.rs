use crate::board::TokenBoard;
use crate::{AnalysisStatus, TokenRecord};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Epoch values at or above this are read as milliseconds.
const EPOCH_MILLIS_THRESHOLD: u64 = 100_000_000_000;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BoardStats {
    pub total_tokens: usize,
    pub pending_count: usize,
    pub analyzing_count: usize,
    pub completed_count: usize,
    pub completed_full_count: usize,
    pub failed_count: usize,
}

impl BoardStats {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a TokenRecord>) -> Self {
        let mut stats = BoardStats::default();
        for record in records {
            stats.total_tokens += 1;
            match record.analysis_status {
                AnalysisStatus::Pending => stats.pending_count += 1,
                AnalysisStatus::Analyzing => stats.analyzing_count += 1,
                AnalysisStatus::Completed => stats.completed_count += 1,
                AnalysisStatus::CompletedFull => stats.completed_full_count += 1,
                AnalysisStatus::Failed => stats.failed_count += 1,
            }
        }
        stats
    }
}

/// Read-only projection of the board, newest token first.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BoardView {
    pub stats: BoardStats,
    pub tokens: Vec<TokenRecord>,
}

impl BoardView {
    pub fn project(board: &TokenBoard) -> Self {
        let stats = BoardStats::from_records(board.records());
        let mut keyed: Vec<(Option<DateTime<Utc>>, &TokenRecord)> = board
            .records()
            .map(|record| {
                let parsed = record
                    .fields
                    .created_at
                    .as_deref()
                    .and_then(parse_created_at);
                (parsed, record)
            })
            .collect();
        keyed.sort_by(compare_entries);
        Self {
            stats,
            tokens: keyed.into_iter().map(|(_, record)| record.clone()).collect(),
        }
    }
}

fn compare_entries(
    (left_at, left): &(Option<DateTime<Utc>>, &TokenRecord),
    (right_at, right): &(Option<DateTime<Utc>>, &TokenRecord),
) -> Ordering {
    let by_time = match (left_at, right_at) {
        (Some(l), Some(r)) => r.cmp(l),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => right.fields.created_at.cmp(&left.fields.created_at),
    };
    by_time.then_with(|| left.mint.cmp(&right.mint))
}

/// RFC 3339, naive ISO-8601 (read as UTC) or integer epoch seconds/millis.
pub fn parse_created_at(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    let epoch = raw.parse::<i64>().ok()?;
    if epoch.unsigned_abs() >= EPOCH_MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(epoch).single()
    } else {
        Utc.timestamp_opt(epoch, 0).single()
    }
}
