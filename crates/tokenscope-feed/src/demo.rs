use crate::FeedState;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, info};

const BASE58_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const MINT_LEN: usize = 44;

#[derive(Debug, Clone, Copy)]
pub struct DemoToken {
    pub symbol: &'static str,
    pub name: &'static str,
    pub uri: &'static str,
}

pub const DEMO_TOKENS: &[DemoToken] = &[
    DemoToken {
        symbol: "DOGEK",
        name: "Doge King",
        uri: "https://example.invalid/meta/dogek.json",
    },
    DemoToken {
        symbol: "AIBOT",
        name: "AI Trading Bot",
        uri: "https://example.invalid/meta/aibot.json",
    },
    DemoToken {
        symbol: "MGAME",
        name: "Meta Game",
        uri: "https://example.invalid/meta/mgame.json",
    },
    DemoToken {
        symbol: "GREEN",
        name: "Green Energy",
        uri: "https://example.invalid/meta/green.json",
    },
    DemoToken {
        symbol: "PEPE2",
        name: "Pepe Classic",
        uri: "https://example.invalid/meta/pepe2.json",
    },
];

/// Deterministic base58 id for the `counter`-th demo token.
pub fn demo_mint(counter: u64) -> String {
    let mut digest = Vec::with_capacity(64);
    for block in 0u8..2 {
        let mut hasher = Sha256::new();
        hasher.update(b"tokenscope-demo-mint");
        hasher.update(counter.to_le_bytes());
        hasher.update([block]);
        digest.extend_from_slice(&hasher.finalize());
    }
    digest
        .iter()
        .take(MINT_LEN)
        .map(|byte| char::from(BASE58_ALPHABET[usize::from(*byte) % BASE58_ALPHABET.len()]))
        .collect()
}

/// The full event sequence for one demo token: creation, three progress
/// updates, then one terminal event whose kind rotates with `counter`.
pub fn demo_steps(counter: u64, now: DateTime<Utc>) -> Vec<(&'static str, Value)> {
    let token = DEMO_TOKENS[(counter % DEMO_TOKENS.len() as u64) as usize];
    let mint = demo_mint(counter);
    let created_at = now.to_rfc3339();

    let mut steps = vec![(
        "new_token",
        json!({
            "mint": mint,
            "name": token.name,
            "symbol": token.symbol,
            "uri": token.uri,
            "created_at": created_at,
            "timestamp": now.timestamp(),
            "creator": demo_mint(counter.wrapping_add(1 << 32)),
            "token_total_supply": 1_000_000_000_000_000u64,
            "virtual_sol_reserves": 30_000_000_000u64,
            "virtual_token_reserves": 1_073_000_000_000_000u64,
            "real_token_reserves": 793_100_000_000_000u64
        }),
    )];
    for (progress, stage) in [(25, "metadata"), (50, "holders"), (75, "sentiment")] {
        steps.push((
            "analysis_update",
            json!({
                "token_mint": mint,
                "token_symbol": token.symbol,
                "status": "ANALYZING",
                "progress": progress,
                "stage": stage
            }),
        ));
    }

    let terminal = match counter % 4 {
        3 => (
            "analysis_failed",
            json!({
                "token_mint": mint,
                "token_symbol": token.symbol,
                "error": "analysis backend timed out"
            }),
        ),
        n if n % 2 == 0 => (
            "analysis_complete",
            json!({
                "token_mint": mint,
                "token_symbol": token.symbol,
                "token_name": token.name,
                "analysis_completed_at": created_at,
                "risk_level": "medium",
                "summary": format!("{} shows early holder concentration", token.symbol)
            }),
        ),
        _ => (
            "analysis_complete_full",
            json!({
                "token_mint": mint,
                "token_symbol": token.symbol,
                "full_report": {
                    "risk_level": "low",
                    "holder_count": 120 + counter,
                    "narrative": format!("{} liquidity looks organic", token.name)
                }
            }),
        ),
    };
    steps.push(terminal);
    steps
}

/// Publishes demo tokens forever, one step every `step_interval`.
pub async fn run_demo(state: FeedState, step_interval: Duration) {
    info!(event = "feed_demo_start", step_ms = step_interval.as_millis() as u64);
    let mut counter: u64 = 0;
    loop {
        for (kind, data) in demo_steps(counter, Utc::now()) {
            let delivered = state.publish(kind, data);
            debug!(event = "feed_demo_publish", kind, counter, delivered);
            tokio::time::sleep(step_interval).await;
        }
        counter = counter.wrapping_add(1);
    }
}
