//! Lexical ranking of memory records against a question.
//!
//! Scoring model (weights sum to 1.0):
//! ```text
//! score = tags(0.45) + content(0.35) + enhancement(0.20)
//! ```
//! Each component is the fraction of query terms found in that field.  No
//! embedding model is involved, so ranking is deterministic and offline.

use std::collections::BTreeSet;

use tracing::trace;

use crate::schema::MemoryRecord;

/// A ranked record with its computed score and human-readable rationale.
#[derive(Debug, Clone)]
pub struct RankedRecord {
    pub record: MemoryRecord,
    pub score: f32,
    pub rationale: String,
}

/// Rank `records` against `query`, dropping records with no overlap at all.
/// Best first; ties keep the input order.
pub fn rank_records(records: &[MemoryRecord], query: &str, limit: usize) -> Vec<RankedRecord> {
    let query_terms = tokenize(query);
    if query_terms.is_empty() {
        return Vec::new();
    }

    let mut ranked: Vec<(&MemoryRecord, f32, String)> = records
        .iter()
        .filter_map(|record| {
            let (score, rationale) = score_record(record, &query_terms);
            (score > 0.0).then_some((record, score, rationale))
        })
        .collect();

    ranked.sort_by(|(_, ls, _), (_, rs, _)| rs.total_cmp(ls));

    ranked
        .into_iter()
        .take(limit)
        .map(|(record, score, rationale)| RankedRecord {
            record: record.clone(),
            score,
            rationale,
        })
        .collect()
}

pub fn score_record(record: &MemoryRecord, query_terms: &BTreeSet<String>) -> (f32, String) {
    let tag_terms: BTreeSet<String> = record
        .tags
        .iter()
        .flat_map(|tag| tokenize(tag))
        .chain(tokenize(record.kind.label()))
        .collect();
    let tags = overlap(query_terms, &tag_terms);
    let content = lexical_relevance_score(&record.content, query_terms);
    let enhancement = record
        .enhancement
        .as_ref()
        .map(|e| lexical_relevance_score(&e.render(), query_terms))
        .unwrap_or(0.0);

    let score = (tags * 0.45) + (content * 0.35) + (enhancement * 0.20);
    let rationale = format!("tags={tags:.2}; content={content:.2}; enhancement={enhancement:.2}");
    trace!(id = record.id_short(), score, %rationale, "scored memory record");
    (score, rationale)
}

/// Fraction of `query_terms` present in `text`.
pub fn lexical_relevance_score(text: &str, query_terms: &BTreeSet<String>) -> f32 {
    overlap(query_terms, &tokenize(text))
}

fn overlap(query_terms: &BTreeSet<String>, terms: &BTreeSet<String>) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    query_terms.intersection(terms).count() as f32 / query_terms.len() as f32
}

/// Common English stop words, question words and contraction fragments
/// excluded from the term set.  There is no length floor, so short tags like
/// `db` or `ci` still match.
const STOP_WORDS: &[&str] = &[
    "a", "i", "s", "t", "d", "m", "ll", "re", "ve",
    "am", "an", "as", "at", "be", "by", "do", "if", "in", "is", "it",
    "me", "my", "no", "of", "on", "or", "so", "to", "up", "us", "we",
    "the", "and", "for", "was", "has", "are", "not", "this", "that",
    "with", "from", "have", "you", "can", "its", "will", "but", "they",
    "all", "been", "also", "into", "more", "than", "when", "who", "what",
    "how", "out", "our", "new", "now", "why", "use", "used", "uses",
    "does", "did", "which", "where", "there", "their", "about",
];

pub fn tokenize(text: &str) -> BTreeSet<String> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}
