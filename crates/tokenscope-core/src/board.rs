use crate::events::{AnalysisComplete, AnalysisUpdate, NewToken, TerminalResult, TokenEvent};
use crate::{AnalysisStatus, TokenRecord};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// How `analysis_complete` reconciles with a record that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacePolicy {
    /// Keep prior static fields the terminal payload does not supply.
    PreserveStatic,
    /// Rebuild the record from the terminal payload alone.
    Wholesale,
}

impl Default for ReplacePolicy {
    fn default() -> Self {
        Self::PreserveStatic
    }
}

impl ReplacePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplacePolicy::PreserveStatic => "preserve",
            ReplacePolicy::Wholesale => "wholesale",
        }
    }
}

impl fmt::Display for ReplacePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplacePolicy {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "preserve" | "preserve_static" | "preserve-static" => Ok(ReplacePolicy::PreserveStatic),
            "wholesale" | "replace" => Ok(ReplacePolicy::Wholesale),
            other => Err(format!("Unknown replace policy: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    UnknownToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Replaced,
    Updated,
    Dropped(DropReason),
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        !matches!(self, MergeOutcome::Dropped(_))
    }
}

/// The canonical mint -> record mapping. `apply` is its only mutator.
#[derive(Debug, Default)]
pub struct TokenBoard {
    tokens: HashMap<String, TokenRecord>,
    replace_policy: ReplacePolicy,
}

impl TokenBoard {
    pub fn new(replace_policy: ReplacePolicy) -> Self {
        Self {
            tokens: HashMap::new(),
            replace_policy,
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn get(&self, mint: &str) -> Option<&TokenRecord> {
        self.tokens.get(mint)
    }

    pub fn records(&self) -> impl Iterator<Item = &TokenRecord> {
        self.tokens.values()
    }

    pub fn apply(&mut self, event: TokenEvent) -> MergeOutcome {
        match event {
            TokenEvent::NewToken(event) => self.create(event),
            TokenEvent::AnalysisUpdate(event) => self.progress(event),
            TokenEvent::AnalysisComplete(event) => self.replace(event),
            TokenEvent::AnalysisCompleteFull(event) => {
                self.terminal_merge(event, AnalysisStatus::CompletedFull)
            }
            TokenEvent::AnalysisFailed(event) => {
                self.terminal_merge(event, AnalysisStatus::Failed)
            }
        }
    }

    fn create(&mut self, event: NewToken) -> MergeOutcome {
        let record = TokenRecord::new(event.mint.clone(), event.fields);
        match self.tokens.insert(event.mint, record) {
            Some(_) => MergeOutcome::Replaced,
            None => MergeOutcome::Inserted,
        }
    }

    fn progress(&mut self, event: AnalysisUpdate) -> MergeOutcome {
        let Some(record) = self.tokens.get_mut(&event.token_mint) else {
            return MergeOutcome::Dropped(DropReason::UnknownToken);
        };
        record.analysis_status = event.status;
        record.analysis_progress = event.progress;
        record.analysis_result = Some(event.result);
        MergeOutcome::Updated
    }

    fn replace(&mut self, event: AnalysisComplete) -> MergeOutcome {
        let AnalysisComplete {
            token_mint,
            mut fields,
            completed_at,
            result,
        } = event;
        let prior = self.tokens.remove(&token_mint);
        let existed = prior.is_some();

        let fields = match (prior, self.replace_policy) {
            (Some(prior), ReplacePolicy::PreserveStatic) => {
                let mut merged = prior.fields;
                merged.overlay(fields);
                merged
            }
            _ => {
                fields.created_at = completed_at;
                fields
            }
        };

        let record = TokenRecord {
            mint: token_mint.clone(),
            fields,
            analysis_status: AnalysisStatus::Completed,
            analysis_progress: 100,
            analysis_result: Some(result),
        };
        self.tokens.insert(token_mint, record);
        if existed {
            MergeOutcome::Replaced
        } else {
            MergeOutcome::Inserted
        }
    }

    fn terminal_merge(&mut self, event: TerminalResult, status: AnalysisStatus) -> MergeOutcome {
        let Some(record) = self.tokens.get_mut(&event.token_mint) else {
            return MergeOutcome::Dropped(DropReason::UnknownToken);
        };
        record.analysis_status = status;
        if status.is_success() {
            record.analysis_progress = 100;
        }
        record.analysis_result = Some(event.result);
        MergeOutcome::Updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use serde_json::{json, Value};

    fn event(kind: EventKind, data: Value) -> TokenEvent {
        TokenEvent::parse(kind, &data).expect("parse")
    }

    fn seeded(policy: ReplacePolicy) -> TokenBoard {
        let mut board = TokenBoard::new(policy);
        board.apply(event(
            EventKind::NewToken,
            json!({
                "mint": "abc",
                "symbol": "FOO",
                "created_at": "t1",
                "token_total_supply": 1_000_000_000u64,
                "virtual_sol_reserves": 30
            }),
        ));
        board
    }

    #[test]
    fn scenario_create_then_update_then_complete() {
        let mut board = seeded(ReplacePolicy::default());
        let record = board.get("abc").expect("record");
        assert_eq!(board.len(), 1);
        assert_eq!(record.analysis_status, AnalysisStatus::Pending);
        assert_eq!(record.analysis_progress, 0);
        assert_eq!(record.analysis_result, None);

        let outcome = board.apply(event(
            EventKind::AnalysisUpdate,
            json!({"token_mint": "abc", "status": "Analyzing", "progress": 55}),
        ));
        assert_eq!(outcome, MergeOutcome::Updated);
        let record = board.get("abc").expect("record");
        assert_eq!(record.analysis_status, AnalysisStatus::Analyzing);
        assert_eq!(record.analysis_progress, 55);
        assert_eq!(record.fields.symbol.as_deref(), Some("FOO"));

        let outcome = board.apply(event(
            EventKind::AnalysisComplete,
            json!({
                "token_mint": "abc",
                "token_symbol": "FOO",
                "token_name": "Foo Coin",
                "analysis_completed_at": "t2"
            }),
        ));
        assert_eq!(outcome, MergeOutcome::Replaced);
        let record = board.get("abc").expect("record");
        assert_eq!(record.analysis_status, AnalysisStatus::Completed);
        assert_eq!(record.analysis_progress, 100);
        assert_eq!(record.fields.name.as_deref(), Some("Foo Coin"));
    }

    #[test]
    fn update_for_unknown_token_is_dropped() {
        let mut board = TokenBoard::default();
        let outcome = board.apply(event(
            EventKind::AnalysisUpdate,
            json!({"token_mint": "zzz", "status": "ANALYZING", "progress": 10}),
        ));
        assert_eq!(outcome, MergeOutcome::Dropped(DropReason::UnknownToken));
        assert!(!outcome.changed());
        assert!(board.is_empty());
    }

    #[test]
    fn terminal_merge_for_unknown_token_is_dropped() {
        let mut board = seeded(ReplacePolicy::default());
        let before = board.get("abc").cloned();
        for kind in [EventKind::AnalysisCompleteFull, EventKind::AnalysisFailed] {
            let outcome = board.apply(event(kind, json!({"token_mint": "zzz"})));
            assert_eq!(outcome, MergeOutcome::Dropped(DropReason::UnknownToken));
        }
        assert_eq!(board.len(), 1);
        assert_eq!(board.get("abc").cloned(), before);
    }

    #[test]
    fn second_creation_overwrites_instead_of_merging() {
        let mut board = TokenBoard::default();
        board.apply(event(
            EventKind::NewToken,
            json!({"mint": "abc", "symbol": "OLD", "creator": "C1", "uri": "ipfs://a"}),
        ));
        board.apply(event(
            EventKind::AnalysisUpdate,
            json!({"token_mint": "abc", "status": "ANALYZING", "progress": 30}),
        ));
        let second = json!({"mint": "abc", "symbol": "NEW"});
        let outcome = board.apply(event(EventKind::NewToken, second.clone()));
        assert_eq!(outcome, MergeOutcome::Replaced);

        let mut fresh = TokenBoard::default();
        fresh.apply(event(EventKind::NewToken, second));
        assert_eq!(board.get("abc"), fresh.get("abc"));
        let record = board.get("abc").expect("record");
        assert!(record.fields.extra.is_empty());
        assert_eq!(record.fields.uri, None);
        assert_eq!(record.analysis_progress, 0);
    }

    #[test]
    fn progress_update_keeps_static_fields() {
        let mut board = seeded(ReplacePolicy::default());
        board.apply(event(
            EventKind::AnalysisUpdate,
            json!({"token_mint": "abc", "status": "Analyzing", "progress": 40, "risk": "low"}),
        ));
        let record = board.get("abc").expect("record");
        assert_eq!(record.fields.symbol.as_deref(), Some("FOO"));
        assert_eq!(record.fields.created_at.as_deref(), Some("t1"));
        assert_eq!(record.analysis_status, AnalysisStatus::Analyzing);
        assert_eq!(record.analysis_progress, 40);
        assert_eq!(
            record.analysis_result.as_ref().and_then(|r| r.get("risk")),
            Some(&json!("low"))
        );
    }

    #[test]
    fn preserve_policy_keeps_prior_static_fields_on_replace() {
        let mut board = seeded(ReplacePolicy::PreserveStatic);
        board.apply(event(
            EventKind::AnalysisComplete,
            json!({
                "token_mint": "abc",
                "token_name": "Foo Coin",
                "analysis_completed_at": "t2",
                "summary": "fine"
            }),
        ));
        let record = board.get("abc").expect("record");
        assert_eq!(record.fields.symbol.as_deref(), Some("FOO"));
        assert_eq!(record.fields.name.as_deref(), Some("Foo Coin"));
        assert_eq!(record.fields.created_at.as_deref(), Some("t1"));
        assert_eq!(record.fields.token_total_supply, Some(1_000_000_000));
        assert_eq!(record.fields.virtual_sol_reserves, Some(30));
        assert_eq!(
            record.analysis_result.as_ref().and_then(|r| r.get("summary")),
            Some(&json!("fine"))
        );
    }

    #[test]
    fn wholesale_policy_drops_absent_static_fields() {
        let mut board = seeded(ReplacePolicy::Wholesale);
        board.apply(event(
            EventKind::AnalysisComplete,
            json!({
                "token_mint": "abc",
                "token_symbol": "FOO",
                "analysis_completed_at": "t2"
            }),
        ));
        let record = board.get("abc").expect("record");
        assert_eq!(record.fields.symbol.as_deref(), Some("FOO"));
        assert_eq!(record.fields.created_at.as_deref(), Some("t2"));
        assert_eq!(record.fields.token_total_supply, None);
        assert_eq!(record.fields.virtual_sol_reserves, None);
    }

    #[test]
    fn replace_without_prior_record_materializes_one() {
        for policy in [ReplacePolicy::PreserveStatic, ReplacePolicy::Wholesale] {
            let mut board = TokenBoard::new(policy);
            let outcome = board.apply(event(
                EventKind::AnalysisComplete,
                json!({"token_mint": "new", "token_symbol": "NEW", "analysis_completed_at": "t9"}),
            ));
            assert_eq!(outcome, MergeOutcome::Inserted);
            let record = board.get("new").expect("record");
            assert_eq!(record.fields.created_at.as_deref(), Some("t9"));
            assert_eq!(record.analysis_status, AnalysisStatus::Completed);
        }
    }

    #[test]
    fn terminal_merge_sets_variant_and_progress_for_success_only() {
        let mut board = seeded(ReplacePolicy::default());
        board.apply(event(
            EventKind::AnalysisUpdate,
            json!({"token_mint": "abc", "status": "ANALYZING", "progress": 60}),
        ));
        board.apply(event(
            EventKind::AnalysisFailed,
            json!({"token_mint": "abc", "error": "timeout"}),
        ));
        let record = board.get("abc").expect("record");
        assert_eq!(record.analysis_status, AnalysisStatus::Failed);
        assert_eq!(record.analysis_progress, 60);

        board.apply(event(
            EventKind::AnalysisCompleteFull,
            json!({"token_mint": "abc", "full_report": {"score": 7}}),
        ));
        let record = board.get("abc").expect("record");
        assert_eq!(record.analysis_status, AnalysisStatus::CompletedFull);
        assert_eq!(record.analysis_progress, 100);
        assert_eq!(record.fields.symbol.as_deref(), Some("FOO"));
        assert_eq!(
            record.analysis_result,
            Some(json!({"token_mint": "abc", "full_report": {"score": 7}}))
        );
    }

    #[test]
    fn replace_policy_parses_flag_values() {
        assert_eq!("preserve".parse::<ReplacePolicy>(), Ok(ReplacePolicy::PreserveStatic));
        assert_eq!("Wholesale".parse::<ReplacePolicy>(), Ok(ReplacePolicy::Wholesale));
        assert!("merge".parse::<ReplacePolicy>().is_err());
    }
}
