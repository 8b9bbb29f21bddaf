//! Dialogue Engine: adversarial debate between two models (spec §4.6).
//!
//! Termination-detection constants are pinned against
//! `original_source/dialogue_engine.py::_check_termination` /
//! `_detect_repetition`.

use async_trait::async_trait;
use orchestrator_types::{DialogueResult, DialogueTurn, TerminationReason};
use std::collections::HashSet;

const CONCESSION_KEYWORDS: [&str; 7] = [
    "you're right",
    "i agree",
    "fair point",
    "i concede",
    "you've convinced me",
    "i accept your argument",
    "you make a valid point",
];

const JACCARD_STALEMATE_THRESHOLD: f64 = 0.6;
const DISENGAGEMENT_TOKEN_THRESHOLD: usize = 20;
const MIN_TRANSCRIPT_LEN_FOR_TERMINATION_CHECK: usize = 4;

/// Decouples the debate loop from a concrete inference backend.
#[async_trait]
pub trait DebateModelCaller: Send + Sync {
    async fn call(
        &self,
        model_id: &str,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> crate::error::OrchestratorResult<String>;
}

#[derive(Debug, Clone)]
pub struct ModeratorOptions {
    pub enabled: bool,
    pub frequency: u32,
    pub max_interjections: u32,
    pub moderator_model: String,
}

#[derive(Debug, Clone)]
pub struct DebateRequest<'a> {
    pub participants: [&'a str; 2],
    pub query: &'a str,
    pub personas: [&'a str; 2],
    pub context: Option<&'a str>,
    pub max_turns: u32,
    pub dynamic_termination: bool,
    pub temperature: f32,
    pub per_turn_max_tokens: u32,
    pub moderator: Option<ModeratorOptions>,
}

pub struct DialogueEngine<'a> {
    caller: &'a dyn DebateModelCaller,
}

impl<'a> DialogueEngine<'a> {
    pub fn new(caller: &'a dyn DebateModelCaller) -> Self {
        Self { caller }
    }

    pub async fn run_debate(&self, request: DebateRequest<'a>) -> DialogueResult {
        let started = std::time::Instant::now();
        let mut transcript: Vec<DialogueTurn> = Vec::new();
        let mut total_tokens = 0u32;
        let mut interjections = 0u32;
        let mut termination_reason = TerminationReason::MaxTurnsReached;

        for turn_number in 1..=request.max_turns {
            let position = (turn_number as usize - 1) % 2;
            let speaker_id = request.participants[position];
            let persona = request.personas[position];
            let opponent_label = if position == 0 { "CON" } else { "PRO" };

            let prompt = build_turn_prompt(
                request.query,
                persona,
                opponent_label,
                request.context,
                &transcript,
            );

            let content = match self
                .caller
                .call(speaker_id, &prompt, request.per_turn_max_tokens, request.temperature)
                .await
            {
                Ok(text) => text,
                Err(_) => format!("[Error: model {speaker_id} failed to respond]"),
            };

            let tokens_used = crate::inference_client::estimate_tokens(&content) as u32;
            total_tokens += tokens_used;
            transcript.push(DialogueTurn {
                turn_number,
                speaker_id: speaker_id.to_string(),
                persona: persona.to_string(),
                content,
                timestamp: chrono::Utc::now(),
                tokens_used,
            });

            if let Some(moderator) = &request.moderator {
                if moderator.enabled
                    && moderator.frequency > 0
                    && turn_number % moderator.frequency == 0
                    && interjections < moderator.max_interjections
                {
                    let window = 2 * moderator.frequency as usize;
                    let recent: Vec<&DialogueTurn> =
                        transcript.iter().rev().take(window).rev().collect();
                    let review_prompt = build_moderator_prompt(request.query, &recent);
                    if let Ok(guidance) = self
                        .caller
                        .call(&moderator.moderator_model, &review_prompt, request.per_turn_max_tokens, request.temperature)
                        .await
                    {
                        let trimmed = guidance.trim();
                        if !trimmed.is_empty() && !trimmed.eq_ignore_ascii_case("silent") {
                            interjections += 1;
                            transcript.push(DialogueTurn {
                                turn_number,
                                speaker_id: "MODERATOR".to_string(),
                                persona: "moderator".to_string(),
                                content: trimmed.to_string(),
                                timestamp: chrono::Utc::now(),
                                tokens_used: 0,
                            });
                        }
                    }
                }
            }

            if request.dynamic_termination && transcript.len() >= MIN_TRANSCRIPT_LEN_FOR_TERMINATION_CHECK {
                if let Some(reason) = check_termination(&transcript) {
                    termination_reason = reason;
                    break;
                }
            }
        }

        let synthesis = self
            .synthesize(request.participants[0], request.query, &transcript, request.temperature)
            .await;

        DialogueResult {
            turns: transcript,
            synthesis,
            termination_reason,
            total_tokens,
            total_time_ms: started.elapsed().as_millis() as u64,
            moderator_interjection_count: interjections,
        }
    }

    async fn synthesize(
        &self,
        synthesizer_id: &str,
        query: &str,
        transcript: &[DialogueTurn],
        temperature: f32,
    ) -> String {
        let prompt = build_synthesis_prompt(query, transcript);
        self.caller
            .call(synthesizer_id, &prompt, 1024, temperature)
            .await
            .unwrap_or_else(|_| "[Error: synthesis unavailable]".to_string())
    }
}

fn build_turn_prompt(
    query: &str,
    persona: &str,
    opponent_label: &str,
    context: Option<&str>,
    transcript: &[DialogueTurn],
) -> String {
    let mut prompt = format!("Topic: {query}\nYour persona: {persona}\nOpponent position: {opponent_label}\n");
    if let Some(context) = context {
        prompt.push_str("Context:\n");
        prompt.push_str(context);
        prompt.push('\n');
    }
    if transcript.is_empty() {
        prompt.push_str("Instruction: open the debate.\n");
    } else {
        prompt.push_str("Transcript so far:\n");
        for turn in transcript {
            prompt.push_str(&format!("[{}] {}\n", turn.speaker_id, turn.content));
        }
        prompt.push_str("Instruction: address your opponent's last points.\n");
    }
    prompt
}

fn build_moderator_prompt(query: &str, recent: &[&DialogueTurn]) -> String {
    let mut prompt = format!(
        "You are moderating a debate on: {query}\nReview the recent turns below. Reply with the single word SILENT if no guidance is needed, otherwise provide brief guidance.\n"
    );
    for turn in recent {
        prompt.push_str(&format!("[{}] {}\n", turn.speaker_id, turn.content));
    }
    prompt
}

fn build_synthesis_prompt(query: &str, transcript: &[DialogueTurn]) -> String {
    let mut prompt = format!(
        "Topic: {query}\nProduce a neutral summary of the debate below. Identify the strongest arguments, points of agreement, points of disagreement, and any shifts in position.\n"
    );
    for turn in transcript {
        prompt.push_str(&format!("[{}] {}\n", turn.speaker_id, turn.content));
    }
    prompt
}

fn check_termination(transcript: &[DialogueTurn]) -> Option<TerminationReason> {
    let last_four: Vec<&DialogueTurn> = transcript.iter().rev().take(4).rev().collect();

    if let Some(last) = last_four.last() {
        let lowered = last.content.to_lowercase();
        if CONCESSION_KEYWORDS.iter().any(|kw| lowered.contains(kw)) {
            return Some(TerminationReason::ConcessionDetected);
        }
    }

    if last_four.len() == 4 {
        let overlap = average_pairwise_jaccard(&last_four);
        if overlap > JACCARD_STALEMATE_THRESHOLD {
            return Some(TerminationReason::StalemateRepetition);
        }
    }

    if transcript.len() >= 2 {
        let last_two = &transcript[transcript.len() - 2..];
        if last_two
            .iter()
            .all(|t| t.content.split_whitespace().count() < DISENGAGEMENT_TOKEN_THRESHOLD)
        {
            return Some(TerminationReason::StalemateDisengagement);
        }
    }

    None
}

fn keyword_set(content: &str) -> HashSet<String> {
    content
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| w.len() > 4)
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

fn average_pairwise_jaccard(turns: &[&DialogueTurn]) -> f64 {
    let sets: Vec<HashSet<String>> = turns.iter().map(|t| keyword_set(&t.content)).collect();
    let mut total = 0.0;
    let mut pairs = 0;
    for i in 0..sets.len() {
        for j in (i + 1)..sets.len() {
            total += jaccard(&sets[i], &sets[j]);
            pairs += 1;
        }
    }
    if pairs == 0 {
        0.0
    } else {
        total / pairs as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn turn(speaker: &str, content: &str) -> DialogueTurn {
        DialogueTurn {
            turn_number: 1,
            speaker_id: speaker.to_string(),
            persona: "p".to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
            tokens_used: 0,
        }
    }

    #[test]
    fn concession_keyword_triggers_termination() {
        let transcript = vec![
            turn("pro", "argument one about economics policy"),
            turn("con", "argument two about economics policy"),
            turn("pro", "argument three about economics policy"),
            turn("con", "Fair point, I agree with your reasoning."),
        ];
        assert_eq!(check_termination(&transcript), Some(TerminationReason::ConcessionDetected));
    }

    #[test]
    fn short_final_turns_trigger_disengagement() {
        let transcript = vec![
            turn("pro", "a long detailed argument about policy implications here"),
            turn("con", "a long detailed argument about policy implications here"),
            turn("pro", "sure okay"),
            turn("con", "fine whatever"),
        ];
        assert_eq!(check_termination(&transcript), Some(TerminationReason::StalemateDisengagement));
    }

    #[test]
    fn repeated_vocabulary_triggers_stalemate_repetition() {
        let transcript = vec![
            turn("pro", "economics policy framework regulation taxation"),
            turn("con", "economics policy framework regulation taxation"),
            turn("pro", "economics policy framework regulation taxation"),
            turn("con", "economics policy framework regulation taxation"),
        ];
        assert_eq!(check_termination(&transcript), Some(TerminationReason::StalemateRepetition));
    }

    #[test]
    fn distinct_civil_turns_do_not_terminate() {
        let transcript = vec![
            turn("pro", "taxation policy should favor growth incentives broadly"),
            turn("con", "regulation oversight matters more than growth incentives"),
            turn("pro", "infrastructure spending creates durable employment opportunities"),
            turn("con", "deficit concerns outweigh infrastructure spending benefits"),
        ];
        assert_eq!(check_termination(&transcript), None);
    }
}
