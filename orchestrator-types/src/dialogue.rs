//! Dialogue Engine value types (spec §3, §4.6).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminationReason {
    MaxTurnsReached,
    ConcessionDetected,
    StalemateRepetition,
    StalemateDisengagement,
}

/// One speaker's utterance in a debate transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogueTurn {
    pub turn_number: u32,
    pub speaker_id: String,
    pub persona: String,
    pub content: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub tokens_used: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogueResult {
    pub turns: Vec<DialogueTurn>,
    pub synthesis: String,
    pub termination_reason: TerminationReason,
    pub total_tokens: u32,
    pub total_time_ms: u64,
    pub moderator_interjection_count: u32,
}
