//! Rule-driven text splitter.
//!
//! Splits raw document text into segment contents that respect a
//! configurable size limit. Splitting occurs on separator boundaries
//! (paragraph breaks by default) to preserve semantic coherence within
//! each segment; oversized paragraphs are hard-split at word boundaries.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Segmentation rule resolved from a dataset's process rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitRule {
    #[serde(default = "default_separator")]
    pub separator: String,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
}

impl Default for SplitRule {
    fn default() -> Self {
        Self {
            separator: default_separator(),
            max_chars: default_max_chars(),
        }
    }
}

fn default_separator() -> String {
    "\n\n".to_string()
}
fn default_max_chars() -> usize {
    2000
}

/// Persisted processing rule referenced by ingestion requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRule {
    pub id: String,
    pub rule: SplitRule,
}

/// SHA-256 hex digest of segment content; keys the embedding cache.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Split text on separator boundaries, respecting `max_chars`.
/// Empty pieces are dropped; a blank input yields no segments.
pub fn split_text(rule: &SplitRule, text: &str) -> Vec<String> {
    let max_chars = rule.max_chars.max(1);

    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut segments = Vec::new();
    let mut current_buf = String::new();

    for piece in text.split(rule.separator.as_str()) {
        let trimmed = piece.trim();
        if trimmed.is_empty() {
            continue;
        }

        // If adding this piece would exceed max, flush the current buffer
        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + rule.separator.len() + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            segments.push(std::mem::take(&mut current_buf));
        }

        // A single piece over the limit is hard-split at word boundaries
        if trimmed.len() > max_chars {
            if !current_buf.is_empty() {
                segments.push(std::mem::take(&mut current_buf));
            }
            let mut remaining = trimmed;
            while !remaining.is_empty() {
                let split_at = floor_char_boundary(remaining, remaining.len().min(max_chars));
                let actual_split = if split_at < remaining.len() {
                    remaining[..split_at]
                        .rfind('\n')
                        .or_else(|| remaining[..split_at].rfind(' '))
                        .map(|pos| pos + 1)
                        .unwrap_or(split_at)
                } else {
                    split_at
                };
                let piece = remaining[..actual_split].trim();
                if !piece.is_empty() {
                    segments.push(piece.to_string());
                }
                remaining = &remaining[actual_split..];
            }
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str(&rule.separator);
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        segments.push(current_buf);
    }

    segments
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_segment() {
        let segments = split_text(&SplitRule::default(), "Hello, world!");
        assert_eq!(segments, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_blank_text_yields_nothing() {
        assert!(split_text(&SplitRule::default(), "").is_empty());
        assert!(split_text(&SplitRule::default(), "  \n\n  ").is_empty());
    }

    #[test]
    fn test_multiple_paragraphs_under_limit_merge() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let segments = split_text(&SplitRule::default(), text);
        assert_eq!(segments.len(), 1);
        assert!(segments[0].contains("First paragraph."));
        assert!(segments[0].contains("Third paragraph."));
    }

    #[test]
    fn test_paragraphs_over_limit_split() {
        let rule = SplitRule {
            max_chars: 20,
            ..Default::default()
        };
        let text = "This is paragraph one.\n\nThis is paragraph two.\n\nThis is paragraph three.";
        let segments = split_text(&rule, text);
        assert!(segments.len() > 1);
        for segment in &segments {
            assert!(!segment.is_empty());
        }
    }

    #[test]
    fn test_oversized_paragraph_hard_splits_on_words() {
        let rule = SplitRule {
            max_chars: 16,
            ..Default::default()
        };
        let text = "alpha beta gamma delta epsilon zeta";
        let segments = split_text(&rule, text);
        assert!(segments.len() > 1);
        for segment in &segments {
            assert!(segment.len() <= 16, "segment too long: {:?}", segment);
            assert!(!segment.starts_with(' '));
        }
    }

    #[test]
    fn test_custom_separator() {
        let rule = SplitRule {
            separator: "---".to_string(),
            max_chars: 5,
        };
        let segments = split_text(&rule, "one---two---three");
        assert_eq!(
            segments,
            vec!["one".to_string(), "two".to_string(), "three".to_string()]
        );
    }

    #[test]
    fn test_deterministic() {
        let rule = SplitRule {
            max_chars: 12,
            ..Default::default()
        };
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let first = split_text(&rule, text);
        let second = split_text(&rule, text);
        assert_eq!(first, second);
    }

    #[test]
    fn test_content_hash_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("abc").len(), 64);
    }
}
