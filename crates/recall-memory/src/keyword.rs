/// Lowercased, whitespace-separated query terms, de-duplicated in order.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in query.split_whitespace().map(str::to_lowercase) {
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

/// Total non-overlapping occurrences of every term in `text`, ignoring case.
///
/// Terms are matched as substrings, so `fox` also counts inside `foxes`.
pub fn count_occurrences(text: &str, terms: &[String]) -> usize {
    if terms.is_empty() {
        return 0;
    }
    let haystack = text.to_lowercase();
    terms
        .iter()
        .map(|term| haystack.matches(term.as_str()).count())
        .sum()
}

/// Occurrence-based keyword scorer.
///
/// Scores each document by how often the query terms occur in it, normalized
/// by the highest count in the corpus so the best match scores 1.0.
/// Documents without any occurrence are left out.
#[derive(Debug, Clone)]
pub struct KeywordScanner {
    terms: Vec<String>,
}

impl KeywordScanner {
    /// Scanner for the terms of `query`.
    pub fn new(query: &str) -> Self {
        Self {
            terms: query_terms(query),
        }
    }

    /// The terms being counted.
    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    /// `(key, score)` for every document with at least one occurrence, in
    /// input order. Scores are in (0, 1].
    pub fn score<K, I, T>(&self, documents: I) -> Vec<(K, f32)>
    where
        I: IntoIterator<Item = (K, T)>,
        T: AsRef<str>,
    {
        let counts: Vec<(K, usize)> = documents
            .into_iter()
            .map(|(key, text)| {
                let n = count_occurrences(text.as_ref(), &self.terms);
                (key, n)
            })
            .filter(|(_, n)| *n > 0)
            .collect();

        let Some(max) = counts.iter().map(|(_, n)| *n).max() else {
            return Vec::new();
        };
        counts
            .into_iter()
            .map(|(key, n)| (key, n as f32 / max as f32))
            .collect()
    }
}
