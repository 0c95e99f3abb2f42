use crate::error::IngestError;
use crate::models::{Chunk, NormalizedDocument};
use regex::Regex;
use std::path::Path;
use tokenizers::Tokenizer;

const SENTENCE_BOUNDARY: &str = r"[.!?]\s+";

pub trait TokenCount: Send + Sync {
    fn count(&self, text: &str) -> Result<usize, IngestError>;
}

/// Counts tokens with the same tokenizer the embedding model uses. Loaded
/// once per process and passed by reference into the chunking stage.
pub struct TokenCounter {
    tokenizer: Tokenizer,
}

impl TokenCounter {
    pub fn from_file(path: &Path) -> Result<Self, IngestError> {
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|error| IngestError::Tokenizer(error.to_string()))?;
        Ok(Self { tokenizer })
    }
}

impl TokenCount for TokenCounter {
    fn count(&self, text: &str) -> Result<usize, IngestError> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|error| IngestError::Tokenizer(error.to_string()))?;
        Ok(encoding.get_ids().len())
    }
}

pub fn chunk_document(
    document: &NormalizedDocument,
    counter: &dyn TokenCount,
    max_tokens: usize,
) -> Result<Vec<Chunk>, IngestError> {
    if max_tokens == 0 {
        return Err(IngestError::Config("max_tokens must be at least 1".to_string()));
    }

    let boundary = Regex::new(SENTENCE_BOUNDARY)?;

    let mut fragments = Vec::new();
    for block in split_blocks(&document.markdown) {
        let tokens = counter.count(&block)?;
        if tokens <= max_tokens {
            fragments.push((block, tokens));
        } else {
            split_oversized(&block, &boundary, counter, max_tokens, &mut fragments)?;
        }
    }

    let merged = merge_peers(fragments, counter, max_tokens)?;

    Ok(merged
        .into_iter()
        .enumerate()
        .map(|(position, (text, token_count))| Chunk {
            source: document.source.clone(),
            index: position as u32,
            text,
            token_count,
        })
        .collect())
}

/// Blank-line separated blocks, with structural comment markers dropped.
fn split_blocks(markdown: &str) -> Vec<String> {
    markdown
        .split("\n\n")
        .map(str::trim)
        .filter(|block| !block.is_empty())
        .filter(|block| !is_structural_marker(block))
        .map(|block| block.to_string())
        .collect()
}

fn is_structural_marker(block: &str) -> bool {
    block.starts_with("<!--") && block.ends_with("-->")
}

fn split_oversized(
    block: &str,
    boundary: &Regex,
    counter: &dyn TokenCount,
    max_tokens: usize,
    fragments: &mut Vec<(String, usize)>,
) -> Result<(), IngestError> {
    let mut current = String::new();
    for sentence in split_sentences(block, boundary) {
        let candidate = if current.is_empty() {
            sentence.clone()
        } else {
            format!("{current} {sentence}")
        };

        if counter.count(&candidate)? <= max_tokens {
            current = candidate;
            continue;
        }

        if !current.is_empty() {
            let tokens = counter.count(&current)?;
            fragments.push((current.clone(), tokens));
            current.clear();
        }

        let tokens = counter.count(&sentence)?;
        if tokens <= max_tokens {
            current = sentence;
        } else {
            hard_split(&sentence, counter, max_tokens, fragments)?;
        }
    }

    if !current.is_empty() {
        let tokens = counter.count(&current)?;
        fragments.push((current, tokens));
    }

    Ok(())
}

fn split_sentences(block: &str, boundary: &Regex) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for found in boundary.find_iter(block) {
        let sentence = block[start..found.end()].trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_string());
        }
        start = found.end();
    }

    let tail = block[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }

    sentences
}

/// Last resort for a single sentence over budget: accumulate words.
fn hard_split(
    sentence: &str,
    counter: &dyn TokenCount,
    max_tokens: usize,
    fragments: &mut Vec<(String, usize)>,
) -> Result<(), IngestError> {
    let mut current = String::new();
    for word in sentence.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{current} {word}")
        };

        if counter.count(&candidate)? <= max_tokens {
            current = candidate;
        } else {
            if !current.is_empty() {
                let tokens = counter.count(&current)?;
                fragments.push((current, tokens));
            }
            current = word.to_string();
        }
    }

    if !current.is_empty() {
        let tokens = counter.count(&current)?;
        fragments.push((current, tokens));
    }

    Ok(())
}

/// Peer merging: adjacent small fragments are combined while the joined text
/// stays inside the token budget.
fn merge_peers(
    fragments: Vec<(String, usize)>,
    counter: &dyn TokenCount,
    max_tokens: usize,
) -> Result<Vec<(String, usize)>, IngestError> {
    let mut merged: Vec<(String, usize)> = Vec::new();

    for (text, tokens) in fragments {
        if let Some((last_text, last_tokens)) = merged.last_mut() {
            if *last_tokens + tokens <= max_tokens {
                let candidate = format!("{last_text}\n\n{text}");
                let candidate_tokens = counter.count(&candidate)?;
                if candidate_tokens <= max_tokens {
                    *last_text = candidate;
                    *last_tokens = candidate_tokens;
                    continue;
                }
            }
        }
        merged.push((text, tokens));
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Whitespace token counting stands in for the real tokenizer.
    struct WordCounter;

    impl TokenCount for WordCounter {
        fn count(&self, text: &str) -> Result<usize, IngestError> {
            Ok(text.split_whitespace().count())
        }
    }

    fn document(markdown: &str) -> NormalizedDocument {
        NormalizedDocument {
            source: "report.pdf".to_string(),
            markdown: markdown.to_string(),
            pages: Vec::new(),
        }
    }

    #[test]
    fn indices_increase_from_zero_and_budget_holds() {
        let markdown = "one two three four five\n\nsix seven\n\neight nine ten eleven twelve";
        let chunks = chunk_document(&document(markdown), &WordCounter, 6).unwrap();

        assert!(!chunks.is_empty());
        for (position, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, position as u32);
            assert!(chunk.token_count <= 6, "chunk over budget: {chunk:?}");
        }
    }

    #[test]
    fn small_neighbours_are_merged() {
        let markdown = "alpha beta\n\ngamma delta\n\nepsilon zeta";
        let chunks = chunk_document(&document(markdown), &WordCounter, 10).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert!(chunks[0].text.contains("alpha"));
        assert!(chunks[0].text.contains("zeta"));
    }

    #[test]
    fn oversized_blocks_split_at_sentence_boundaries() {
        let markdown = "First sentence here. Second sentence follows now. Third one closes it.";
        let chunks = chunk_document(&document(markdown), &WordCounter, 4).unwrap();

        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.token_count <= 4);
        }
    }

    #[test]
    fn decimals_do_not_split_sentences() {
        let markdown = "Receita de 1.5 milhões no mês. Meta batida.";
        let chunks = chunk_document(&document(markdown), &WordCounter, 6).unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "Receita de 1.5 milhões no mês.");
        assert_eq!(chunks[1].text, "Meta batida.");
    }

    #[test]
    fn single_giant_sentence_is_hard_split() {
        let words: Vec<String> = (0..40).map(|n| format!("word{n}")).collect();
        let markdown = words.join(" ");
        let chunks = chunk_document(&document(&markdown), &WordCounter, 8).unwrap();

        assert_eq!(chunks.len(), 5);
        for chunk in &chunks {
            assert!(chunk.token_count <= 8);
        }
    }

    #[test]
    fn page_markers_never_become_chunks() {
        let markdown = "<!-- page 1 -->\n\nreal content lives here\n\n<!-- page 2 -->";
        let chunks = chunk_document(&document(markdown), &WordCounter, 10).unwrap();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "real content lives here");
    }

    #[test]
    fn empty_document_yields_no_chunks() {
        let chunks = chunk_document(&document("   \n\n  "), &WordCounter, 10).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn zero_budget_is_a_config_error() {
        let error = chunk_document(&document("text"), &WordCounter, 0).unwrap_err();
        assert!(matches!(error, IngestError::Config(_)));
    }

    #[test]
    fn document_order_is_preserved() {
        let markdown = "first part of the report body text\n\nsecond part of the report body text";
        let chunks = chunk_document(&document(markdown), &WordCounter, 7).unwrap();

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.starts_with("first"));
        assert!(chunks[1].text.starts_with("second"));
    }
}
