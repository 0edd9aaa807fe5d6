//! Paragraph-aligned chunking under a size budget.
//!
//! Paragraphs (separated by a blank line) are accumulated greedily into the
//! current chunk while the joined text still fits the budget. The size of a
//! chunk is whatever the injected [`UnitCounter`] says it is, so the same
//! policy works for words, characters or model tokens.

use tracing::warn;

/// Separator between paragraphs, both when splitting and when joining.
pub const PARAGRAPH_SEPARATOR: &str = "\n\n";

/// Monotone length function used to measure a chunk against its budget.
pub trait UnitCounter: Send + Sync {
    fn count_units(&self, text: &str) -> usize;
}

/// Counts whitespace-separated words.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordCounter;

impl UnitCounter for WordCounter {
    fn count_units(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

/// Counts Unicode scalar values.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharCounter;

impl UnitCounter for CharCounter {
    fn count_units(&self, text: &str) -> usize {
        text.chars().count()
    }
}

impl<F> UnitCounter for F
where
    F: Fn(&str) -> usize + Send + Sync,
{
    fn count_units(&self, text: &str) -> usize {
        self(text)
    }
}

/// Split `text` into ordered chunks of at most `max_units` each.
///
/// Blank paragraphs are skipped. A paragraph that is larger than the budget
/// on its own is emitted as a single oversized chunk; it is never split
/// further and never dropped.
pub fn split_into_units(text: &str, max_units: usize, counter: &dyn UnitCounter) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    // Runs of three or more newlines leave line breaks on paragraph edges.
    for paragraph in text
        .split(PARAGRAPH_SEPARATOR)
        .map(|p| p.trim_matches(|c: char| c == '\n' || c == '\r'))
        .filter(|p| !p.trim().is_empty())
    {
        let candidate = if current.is_empty() {
            paragraph.to_string()
        } else {
            format!("{current}{PARAGRAPH_SEPARATOR}{paragraph}")
        };

        if counter.count_units(&candidate) <= max_units {
            current = candidate;
            continue;
        }

        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }

        let size = counter.count_units(paragraph);
        if size > max_units {
            warn!(size, max_units, "paragraph exceeds unit budget; emitting oversized chunk");
        }
        current = paragraph.to_string();
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn paragraphs_of(chunks: &[String]) -> Vec<String> {
        chunks
            .iter()
            .flat_map(|c| c.split(PARAGRAPH_SEPARATOR))
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn packs_paragraphs_until_budget() {
        let text = "one two\n\nthree four\n\nfive six seven";
        let chunks = split_into_units(text, 4, &WordCounter);
        assert_eq!(chunks, vec!["one two\n\nthree four", "five six seven"]);
    }

    #[test]
    fn oversized_paragraph_stands_alone() {
        let text = "a\n\nb c d e f\n\ng";
        let chunks = split_into_units(text, 2, &WordCounter);
        assert_eq!(chunks, vec!["a", "b c d e f", "g"]);
    }

    #[test]
    fn blank_paragraphs_are_skipped() {
        let text = "\n\nfirst\n\n   \n\n\n\nsecond\n\n";
        let chunks = split_into_units(text, 100, &WordCounter);
        assert_eq!(chunks, vec!["first\n\nsecond"]);
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(split_into_units("", 10, &CharCounter).is_empty());
        assert!(split_into_units("\n\n\n\n", 10, &CharCounter).is_empty());
    }

    #[test]
    fn separator_counts_towards_budget() {
        // "ab\n\ncd" is 6 chars; with a budget of 5 it must not be packed.
        let chunks = split_into_units("ab\n\ncd", 5, &CharCounter);
        assert_eq!(chunks, vec!["ab", "cd"]);
    }

    #[test]
    fn extra_blank_lines_do_not_leak_into_paragraphs() {
        let text = "one\n\n\ntwo\n\n\n\n\nthree\n\n\n\nfour\n\n\n";
        let chunks = split_into_units(text, 100, &WordCounter);
        assert_eq!(chunks, vec!["one\n\ntwo\n\nthree\n\nfour"]);

        let chunks = split_into_units(text, 1, &WordCounter);
        assert_eq!(chunks, vec!["one", "two", "three", "four"]);
    }

    #[test]
    fn closures_work_as_counters() {
        let lines = |t: &str| t.lines().count();
        let chunks = split_into_units("a\n\nb\n\nc", 3, &lines);
        assert_eq!(chunks, vec!["a\n\nb", "c"]);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Chunks reproduce the paragraph sequence and respect the budget,
        /// except for paragraphs that exceed it on their own.
        #[test]
        fn chunks_preserve_paragraphs_and_budget(
            paragraphs in prop::collection::vec("[a-z]{1,8}( [a-z]{1,8}){0,10}", 0..30),
            separators in prop::collection::vec("\n{2,5}", 30),
            budget in 1usize..25,
        ) {
            let mut text = String::new();
            for (i, paragraph) in paragraphs.iter().enumerate() {
                if i > 0 {
                    text.push_str(&separators[i]);
                }
                text.push_str(paragraph);
            }
            let chunks = split_into_units(&text, budget, &WordCounter);

            prop_assert_eq!(paragraphs_of(&chunks), paragraphs.clone());

            for chunk in &chunks {
                let size = WordCounter.count_units(chunk);
                let single_paragraph = !chunk.contains(PARAGRAPH_SEPARATOR);
                prop_assert!(size <= budget || single_paragraph);
            }
        }
    }
}
