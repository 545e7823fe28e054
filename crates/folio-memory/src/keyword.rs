use std::collections::HashMap;
use uuid::Uuid;

/// BM25 parameters.
const K1: f32 = 1.2;
const B: f32 = 0.75;

/// Tokenize text into lowercase words, filtering tokens with length <= 1.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.len() > 1)
        .collect()
}

/// A BM25 inverted index over archived event contents.
///
/// Built per recall request from the events of one `(application, user)`
/// archive; it is never persisted.
#[derive(Debug, Clone, Default)]
pub struct KeywordIndex {
    /// term -> (event id -> term frequency)
    postings: HashMap<String, HashMap<Uuid, f32>>,
    /// event id -> token count
    lengths: HashMap<Uuid, f32>,
}

impl KeywordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an index from `(id, text)` pairs.
    pub fn from_documents<'a>(docs: impl IntoIterator<Item = (Uuid, &'a str)>) -> Self {
        let mut index = Self::new();
        for (id, text) in docs {
            index.add(id, text);
        }
        index
    }

    /// Adds one document. Re-adding an id replaces its previous length only,
    /// so callers index each event once.
    pub fn add(&mut self, id: Uuid, text: &str) {
        let tokens = tokenize(text);
        let mut tf: HashMap<String, f32> = HashMap::new();
        for token in &tokens {
            *tf.entry(token.clone()).or_insert(0.0) += 1.0;
        }
        for (term, freq) in tf {
            self.postings.entry(term).or_default().insert(id, freq);
        }
        self.lengths.insert(id, tokens.len() as f32);
    }

    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    /// Scores every document sharing a term with `query`, best first.
    ///
    /// ```text
    /// score = sum over query terms t of
    ///   ln((N - df + 0.5) / (df + 0.5) + 1) * tf * (k1 + 1) / (tf + k1 * (1 - b + b * dl / avgdl))
    /// ```
    pub fn search(&self, query: &str, top_k: usize) -> Vec<(Uuid, f32)> {
        if self.lengths.is_empty() {
            return Vec::new();
        }
        let terms = tokenize(query);
        if terms.is_empty() {
            return Vec::new();
        }

        let n = self.lengths.len() as f32;
        let total: f32 = self.lengths.values().sum();
        let avgdl = if total > 0.0 { total / n } else { 1.0 };

        let mut scores: HashMap<Uuid, f32> = HashMap::new();
        for term in &terms {
            let Some(docs) = self.postings.get(term) else {
                continue;
            };
            let df = docs.len() as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            for (&id, &tf) in docs {
                let dl = self.lengths.get(&id).copied().unwrap_or(0.0);
                let score = idf * tf * (K1 + 1.0) / (tf + K1 * (1.0 - B + B * dl / avgdl));
                *scores.entry(id).or_insert(0.0) += score;
            }
        }

        let mut ranked: Vec<(Uuid, f32)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(top_k);
        ranked
    }
}
