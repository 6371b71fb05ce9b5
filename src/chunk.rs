//! Overlapping text splitter for retrieval passages.
//!
//! Splits page text into windows of at most `chunk_size` characters, each
//! starting up to `chunk_overlap` characters before the previous window ended.
//! Window ends prefer a paragraph break, then a line break, then a space, as
//! long as the break falls in the second half of the window; otherwise the
//! window is cut hard at `chunk_size`.
//!
//! Offsets are character (not byte) positions within the page, so a passage
//! can always be located again in the extracted text.

use crate::extract::PageText;
use crate::models::Passage;

const SEPARATORS: &[&str] = &["\n\n", "\n", " "];

/// Splits every page into passages, preserving page numbers and offsets.
pub fn split_pages(pages: &[PageText], source: &str, size: usize, overlap: usize) -> Vec<Passage> {
    pages
        .iter()
        .flat_map(|page| {
            split_text(&page.text, size, overlap)
                .into_iter()
                .map(move |(start_offset, text)| Passage {
                    text,
                    source: source.to_string(),
                    start_offset,
                    page: page.page,
                })
        })
        .collect()
}

/// Splits text into `(char_offset, text)` windows.
///
/// Returns nothing for whitespace-only input. Callers guarantee
/// `overlap < size`.
pub fn split_text(text: &str, size: usize, overlap: usize) -> Vec<(usize, String)> {
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    let size = size.max(1);
    let mut out = Vec::new();

    let mut start = skip_whitespace(&chars, 0);
    while start < n {
        let mut end = (start + size).min(n);
        if end < n {
            end = find_break(&chars, start, end, size);
        }

        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim_end();
        if !piece.is_empty() {
            out.push((start, piece.to_string()));
        }
        if end >= n {
            break;
        }

        // Step back by the overlap, then forward to the start of a word.
        // A hard cut through unbroken text keeps the raw overlap.
        let raw = end.saturating_sub(overlap).max(start + 1);
        let mut next = raw;
        while next < end && !chars[next - 1].is_whitespace() {
            next += 1;
        }
        if next >= end && !chars[end - 1].is_whitespace() {
            next = raw;
        }
        start = skip_whitespace(&chars, next);
    }

    out
}

fn skip_whitespace(chars: &[char], mut pos: usize) -> usize {
    while pos < chars.len() && chars[pos].is_whitespace() {
        pos += 1;
    }
    pos
}

/// Best window end in `(start + size/2, end]`, just after a separator.
fn find_break(chars: &[char], start: usize, end: usize, size: usize) -> usize {
    let floor = start + size / 2;
    for sep in SEPARATORS {
        let sep: Vec<char> = sep.chars().collect();
        let mut p = end.saturating_sub(sep.len());
        while p > floor {
            if chars[p..p + sep.len()] == sep[..] {
                return p + sep.len();
            }
            p -= 1;
        }
    }
    end
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(n: usize) -> String {
        (0..n)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn small_text_single_passage() {
        let parts = split_text("Hello, world!", 1000, 200);
        assert_eq!(parts, vec![(0, "Hello, world!".to_string())]);
    }

    #[test]
    fn whitespace_only_yields_nothing() {
        assert!(split_text("  \n\n  ", 1000, 200).is_empty());
    }

    #[test]
    fn windows_respect_size_and_overlap() {
        let text = words(800);
        let parts = split_text(&text, 1000, 200);
        assert!(parts.len() > 1);
        let chars: Vec<char> = text.chars().collect();
        for (i, (offset, piece)) in parts.iter().enumerate() {
            let len = piece.chars().count();
            assert!(len <= 1000, "passage {} has {} chars", i, len);
            let located: String = chars[*offset..*offset + len].iter().collect();
            assert_eq!(&located, piece, "offset mismatch at passage {}", i);
            if i > 0 {
                let (prev_offset, prev) = &parts[i - 1];
                let prev_end = prev_offset + prev.chars().count();
                assert!(*offset < prev_end, "passage {} does not overlap", i);
                assert!(prev_end - offset <= 200);
            }
        }
        let (last_offset, last) = parts.last().unwrap();
        assert_eq!(last_offset + last.chars().count(), chars.len());
    }

    #[test]
    fn prefers_paragraph_breaks() {
        let para = "a".repeat(600);
        let text = format!("{}\n\n{}", para, para);
        let parts = split_text(&text, 1000, 200);
        assert_eq!(parts[0].1, para);
    }

    #[test]
    fn hard_splits_unbroken_text() {
        let text = "x".repeat(2500);
        let parts = split_text(&text, 1000, 200);
        assert_eq!(parts[0].0, 0);
        assert_eq!(parts[0].1.len(), 1000);
        assert_eq!(parts[1].0, 800);
    }

    #[test]
    fn multibyte_offsets_are_characters() {
        let text = format!("{} {}", "é".repeat(10), "ü".repeat(10));
        let parts = split_text(&text, 12, 2);
        assert_eq!(parts[0], (0, "é".repeat(10)));
        assert_eq!(parts[1].0, 11);
    }

    #[test]
    fn pages_keep_numbers() {
        let pages = vec![
            PageText {
                text: "first page".into(),
                page: Some(0),
            },
            PageText {
                text: "second page".into(),
                page: Some(1),
            },
        ];
        let passages = split_pages(&pages, "doc.pdf", 1000, 200);
        assert_eq!(passages.len(), 2);
        assert_eq!(passages[1].page, Some(1));
        assert_eq!(passages[1].source, "doc.pdf");
        assert_eq!(passages[1].start_offset, 0);
    }

    #[test]
    fn deterministic() {
        let text = words(500);
        assert_eq!(split_text(&text, 300, 50), split_text(&text, 300, 50));
    }
}
