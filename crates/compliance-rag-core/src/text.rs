//! Small lexical helpers shared by the embedder, synthesizer, and
//! extractive generator.

const STOPWORDS: &[&str] = &[
    "a", "about", "all", "an", "and", "any", "are", "as", "at", "be", "been", "being", "by", "can",
    "could", "did", "do", "does", "for", "from", "had", "has", "have", "how", "i", "if", "in",
    "into", "is", "it", "its", "me", "my", "of", "on", "or", "our", "should", "so", "than", "that",
    "the", "their", "them", "then", "there", "these", "they", "this", "those", "to", "us", "was",
    "we", "were", "what", "which", "who", "whom", "why", "will", "with", "would", "you", "your",
];

/// Lowercased content terms with stopwords removed and a light plural
/// strip (`reviews` → `review`).
pub fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .map(|w| stem(&w))
        .collect()
}

fn stem(word: &str) -> String {
    if word.len() > 3 && word.ends_with('s') && !word.ends_with("ss") {
        word[..word.len() - 1].to_string()
    } else {
        word.to_string()
    }
}

/// Byte spans of the sentences in `text`, trimmed of surrounding
/// whitespace. A sentence ends at `.`, `?`, `!` or `;` followed by
/// whitespace, or at a blank line.
pub fn sentences(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let end_here = match bytes[i] {
            b'.' | b'?' | b'!' | b';' => bytes.get(i + 1).map_or(true, |b| b.is_ascii_whitespace()),
            b'\n' => bytes.get(i + 1) == Some(&b'\n'),
            _ => false,
        };
        if end_here {
            push_trimmed(text, start, i + 1, &mut spans);
            start = i + 1;
        }
        i += 1;
    }
    push_trimmed(text, start, text.len(), &mut spans);
    spans
}

fn push_trimmed(text: &str, start: usize, end: usize, spans: &mut Vec<(usize, usize)>) {
    let slice = &text[start..end];
    let lead = slice.len() - slice.trim_start().len();
    let trimmed = slice.trim();
    if !trimmed.is_empty() {
        spans.push((start + lead, start + lead + trimmed.len()));
    }
}

/// Share of `wanted` terms present in `have`, in `[0, 1]`.
pub fn coverage(wanted: &[String], have: &[String]) -> f64 {
    if wanted.is_empty() {
        return 0.0;
    }
    let mut unique: Vec<&String> = wanted.iter().collect();
    unique.sort();
    unique.dedup();
    let hit = unique.iter().filter(|w| have.contains(w)).count();
    hit as f64 / unique.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terms_drop_stopwords_and_plurals() {
        assert_eq!(terms("When is the audit deadline?"), vec!["when", "audit", "deadline"]);
        assert_eq!(terms("Access reviews and process"), vec!["access", "review", "process"]);
    }

    #[test]
    fn test_sentences() {
        let text = "First one. Second one?\n\nHeading\n\nQ3 2024 is due. v1.2 stays";
        let spans: Vec<&str> = sentences(text).into_iter().map(|(s, e)| &text[s..e]).collect();
        assert_eq!(spans, vec!["First one.", "Second one?", "Heading", "Q3 2024 is due.", "v1.2 stays"]);
    }

    #[test]
    fn test_coverage() {
        let want = terms("audit deadline");
        assert_eq!(coverage(&want, &terms("The audit deadline is Q3 2024.")), 1.0);
        assert_eq!(coverage(&want, &terms("The audit is annual.")), 0.5);
        assert_eq!(coverage(&[], &want), 0.0);
    }
}
