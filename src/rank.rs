//! Similarity ranking of prior records against a new message.
//!
//! The ranker shows the model a numbered listing of candidate records and
//! asks for the indices of the ones similar to the query. Index positions
//! are local to the truncated candidate list handed in — the listing the
//! model sees and the list index-resolution reads from are the same
//! truncated, order-preserved sequence.
//!
//! The model's reply must match a strict indices-or-NONE grammar; anything
//! else (prose, partial numbers inside sentences) fails closed to the empty
//! match set. An unavailable or absent capability is also a valid "no
//! match" outcome, not an error.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::llm::LanguageModel;
use crate::models::{ChatTurn, Record, SamplingParams};

const RANKER_INSTRUCTION: &str = "You compare a new email against a numbered list of prior emails. \
    Reply with only the comma-separated index numbers of prior emails that ask about the same \
    thing as the new email, or NONE if none of them do. No other text.";

pub struct SimilarityRanker {
    model: Arc<dyn LanguageModel>,
    max_candidates: usize,
    entry_chars: usize,
    query_chars: usize,
}

impl SimilarityRanker {
    pub fn new(model: Arc<dyn LanguageModel>, retrieval: &RetrievalConfig) -> Self {
        Self {
            model,
            max_candidates: retrieval.max_candidates,
            entry_chars: retrieval.entry_chars,
            query_chars: retrieval.query_chars,
        }
    }

    /// Return the candidates the model judges similar to `query`, in
    /// ascending index order with duplicates removed. Empty when nothing
    /// matches or the capability is not ready.
    pub async fn rank(&self, query: &str, candidates: &[Record]) -> Vec<Record> {
        // Truncate before indexing; indices below are positions in this list.
        let candidates = &candidates[..candidates.len().min(self.max_candidates)];
        if candidates.is_empty() {
            return Vec::new();
        }

        if !self.model.availability().await.is_ready() {
            return Vec::new();
        }

        let seed = [ChatTurn::system(RANKER_INSTRUCTION)];
        let params = SamplingParams {
            temperature: 0.1,
            top_k: 40,
        };

        let session = match self.model.open_session(&seed, params).await {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };

        let prompt = format!(
            "New email:\n{}\n\nPrior emails:\n{}",
            cap_chars(&normalize_whitespace(query), self.query_chars),
            render_listing(candidates, self.entry_chars),
        );

        let reply = match session.prompt(&prompt).await {
            Ok(r) => r,
            Err(_) => return Vec::new(),
        };

        match parse_indices(&reply, candidates.len()) {
            Some(indices) => indices.iter().map(|&i| candidates[i].clone()).collect(),
            None => Vec::new(),
        }
    }
}

/// Numbered, whitespace-normalized, length-capped listing of candidates.
fn render_listing(candidates: &[Record], entry_chars: usize) -> String {
    candidates
        .iter()
        .enumerate()
        .map(|(i, record)| {
            format!(
                "{}. {}",
                i,
                cap_chars(&normalize_whitespace(&record.input), entry_chars)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn cap_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Parse a ranking reply under the strict indices-or-NONE grammar.
///
/// `Some(vec![])` for NONE (any case); `Some(indices)` (ascending,
/// deduplicated, out-of-range entries dropped) for a pure index list;
/// `None` for anything else.
fn parse_indices(reply: &str, candidate_count: usize) -> Option<Vec<usize>> {
    let reply = reply.trim();
    if reply.eq_ignore_ascii_case("none") {
        return Some(Vec::new());
    }

    let tokens: Vec<&str> = reply
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .collect();

    if tokens.is_empty() {
        return None;
    }

    let mut indices = BTreeSet::new();
    for token in tokens {
        let index: usize = token.parse().ok()?;
        if index < candidate_count {
            indices.insert(index);
        }
    }

    Some(indices.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Availability, ModelSession};
    use anyhow::Result;
    use async_trait::async_trait;

    fn record(input: &str) -> Record {
        Record {
            id: input.to_string(),
            input: input.to_string(),
            output: format!("answer to {}", input),
            raw_input: None,
            raw_output: None,
            timestamp: None,
        }
    }

    /// Model stub replying with a canned ranking answer.
    struct RankStub {
        reply: &'static str,
        availability: Availability,
    }

    impl RankStub {
        fn ready(reply: &'static str) -> Arc<Self> {
            Arc::new(Self {
                reply,
                availability: Availability::Ready,
            })
        }
    }

    #[async_trait]
    impl LanguageModel for RankStub {
        async fn availability(&self) -> Availability {
            self.availability
        }

        async fn open_session(
            &self,
            _seed: &[ChatTurn],
            _params: SamplingParams,
        ) -> Result<Box<dyn ModelSession>> {
            Ok(Box::new(RankStubSession { reply: self.reply }))
        }
    }

    struct RankStubSession {
        reply: &'static str,
    }

    #[async_trait]
    impl ModelSession for RankStubSession {
        async fn prompt(&self, _text: &str) -> Result<String> {
            Ok(self.reply.to_string())
        }
    }

    fn ranker(reply: &'static str) -> SimilarityRanker {
        SimilarityRanker::new(RankStub::ready(reply), &RetrievalConfig::default())
    }

    fn pie_candidates() -> Vec<Record> {
        vec![record("apple pie"), record("car repair"), record("apple sauce")]
    }

    #[tokio::test]
    async fn returns_records_at_the_replied_indices_in_order() {
        let matches = ranker("0,2").rank("apple crumble", &pie_candidates()).await;
        let inputs: Vec<&str> = matches.iter().map(|r| r.input.as_str()).collect();
        assert_eq!(inputs, vec!["apple pie", "apple sauce"]);
    }

    #[tokio::test]
    async fn duplicate_indices_collapse() {
        let matches = ranker("0,0,2").rank("apple crumble", &pie_candidates()).await;
        let inputs: Vec<&str> = matches.iter().map(|r| r.input.as_str()).collect();
        assert_eq!(inputs, vec!["apple pie", "apple sauce"]);
    }

    #[tokio::test]
    async fn none_reply_means_no_matches_any_case() {
        assert!(ranker("NONE").rank("q", &pie_candidates()).await.is_empty());
        assert!(ranker("none").rank("q", &pie_candidates()).await.is_empty());
        assert!(ranker("  None  ").rank("q", &pie_candidates()).await.is_empty());
    }

    #[tokio::test]
    async fn unavailable_capability_means_no_matches() {
        let model = Arc::new(RankStub {
            reply: "0",
            availability: Availability::Unavailable,
        });
        let ranker = SimilarityRanker::new(model, &RetrievalConfig::default());
        assert!(ranker.rank("q", &pie_candidates()).await.is_empty());
    }

    #[tokio::test]
    async fn prose_replies_fail_closed() {
        let matches = ranker("I think 0 and 2 look similar")
            .rank("q", &pie_candidates())
            .await;
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn out_of_range_indices_are_dropped() {
        let matches = ranker("0, 9").rank("q", &pie_candidates()).await;
        let inputs: Vec<&str> = matches.iter().map(|r| r.input.as_str()).collect();
        assert_eq!(inputs, vec!["apple pie"]);
    }

    #[tokio::test]
    async fn candidates_are_truncated_before_indexing() {
        let retrieval = RetrievalConfig {
            max_candidates: 2,
            ..Default::default()
        };
        let ranker = SimilarityRanker::new(RankStub::ready("0,1,2"), &retrieval);

        // Index 2 falls outside the truncated list and must be dropped.
        let matches = ranker.rank("q", &pie_candidates()).await;
        let inputs: Vec<&str> = matches.iter().map(|r| r.input.as_str()).collect();
        assert_eq!(inputs, vec!["apple pie", "car repair"]);
    }

    #[test]
    fn listing_is_numbered_normalized_and_capped() {
        let candidates = vec![record("several\n\n  spaced   words here")];
        let listing = render_listing(&candidates, 18);
        assert_eq!(listing, "0. several spaced wor");
    }

    #[test]
    fn empty_reply_fails_closed() {
        assert_eq!(parse_indices("", 3), None);
        assert_eq!(parse_indices("   ", 3), None);
    }

    #[test]
    fn whitespace_separated_indices_are_accepted() {
        assert_eq!(parse_indices("2 0", 3), Some(vec![0, 2]));
    }
}
