//! Commit significance scoring.
//!
//! Scoring model (clamped to 1.0):
//! ```text
//! score = keyword(0.60) + breadth(0.30) + magnitude(0.20 × saturation) + rename(0.20)
//! ```
//! A keyword hit alone clears the default threshold of 0.5; breadth or size
//! alone does not.  Pure and local: no I/O, no provider calls.

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use gitsmart_config::CaptureConfig;
use gitsmart_core::{CommitInfo, DiffSummary};

const KEYWORD_WEIGHT: f32 = 0.60;
const BREADTH_WEIGHT: f32 = 0.30;
const MAGNITUDE_WEIGHT: f32 = 0.20;
const RENAME_WEIGHT: f32 = 0.20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignificanceLevel {
    Routine,
    Notable,
    Architectural,
}

impl SignificanceLevel {
    pub fn label(self) -> &'static str {
        match self {
            Self::Routine => "routine",
            Self::Notable => "notable",
            Self::Architectural => "architectural",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignificanceScore {
    pub score: f32,
    pub level: SignificanceLevel,
    pub is_significant: bool,
    /// One entry per signal that fired, in evaluation order.
    pub reasons: Vec<String>,
}

impl SignificanceScore {
    pub fn rationale(&self) -> String {
        if self.reasons.is_empty() {
            "no architectural signals".to_string()
        } else {
            self.reasons.join("; ")
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignificanceDetector {
    keywords: Vec<(String, Regex)>,
    replace_with: Option<Regex>,
    threshold: f32,
    min_components: usize,
    magnitude_lines: usize,
    max_files: usize,
}

impl SignificanceDetector {
    pub fn new(config: &CaptureConfig) -> Self {
        let keywords = config
            .architectural_keywords
            .iter()
            .filter(|k| !k.trim().is_empty())
            .filter_map(|keyword| {
                let words: Vec<String> = keyword.split_whitespace().map(regex::escape).collect();
                let pattern = format!(r"(?i)\b{}(?:s|d|ed|ing)?\b", words.join(r"\s+"));
                match Regex::new(&pattern) {
                    Ok(re) => Some((keyword.trim().to_lowercase(), re)),
                    Err(err) => {
                        warn!(keyword, error = %err, "significance: unusable keyword");
                        None
                    }
                }
            })
            .collect();

        Self {
            keywords,
            replace_with: Regex::new(r"(?i)\breplac(?:e|ed|es|ing)\b.+?\bwith\b").ok(),
            threshold: config.significance_threshold,
            min_components: config.min_components.max(1),
            magnitude_lines: config.magnitude_lines.max(1),
            max_files: config.max_files.max(1),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Deterministic judgment of one commit.
    pub fn score(&self, commit: &CommitInfo, diff: &DiffSummary) -> SignificanceScore {
        let mut score = 0.0f32;
        let mut reasons = Vec::new();

        let message = commit.message.as_str();
        if self.replace_with.as_ref().is_some_and(|re| re.is_match(message)) {
            score += KEYWORD_WEIGHT;
            reasons.push("commit message matches architectural keyword 'replace … with'".to_string());
        } else if let Some((keyword, _)) = self.keywords.iter().find(|(_, re)| re.is_match(message)) {
            score += KEYWORD_WEIGHT;
            reasons.push(format!("commit message matches architectural keyword '{keyword}'"));
        }

        let components = diff.top_level_components();
        if components.len() >= self.min_components {
            score += BREADTH_WEIGHT;
            let names: Vec<&str> = components.iter().map(String::as_str).collect();
            reasons.push(format!(
                "touched {} top-level components ({})",
                components.len(),
                names.join(", ")
            ));
        }

        let line_ratio = diff.total_lines() as f32 / self.magnitude_lines as f32;
        let file_ratio = diff.changed_paths.len() as f32 / self.max_files as f32;
        let saturation = line_ratio.max(file_ratio).min(1.0);
        score += MAGNITUDE_WEIGHT * saturation;
        if saturation >= 1.0 {
            reasons.push(format!(
                "large change ({} files, +{}/-{})",
                diff.changed_paths.len(),
                diff.insertions,
                diff.deletions
            ));
        }

        if let Some(rename) = diff.renames.first() {
            score += RENAME_WEIGHT;
            let extra = diff.renames.len() - 1;
            reasons.push(if extra == 0 {
                format!("renamed {} → {}", rename.from, rename.to)
            } else {
                format!("renamed {} → {} (+{extra} more)", rename.from, rename.to)
            });
        }

        let score = score.min(1.0);
        let is_significant = score >= self.threshold;
        let level = if !is_significant {
            SignificanceLevel::Routine
        } else if score >= 0.8 {
            SignificanceLevel::Architectural
        } else {
            SignificanceLevel::Notable
        };

        debug!(commit = commit.short_id(), score, level = level.label(), "significance: scored");
        SignificanceScore {
            score,
            level,
            is_significant,
            reasons,
        }
    }
}
