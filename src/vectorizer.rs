// 🔤 Text Vectorizer - Script-aware tokenization + deterministic TF-IDF
// The vocabulary is fixed when the model is fit over a corpus; query-time
// terms outside it are ignored, never grown into the space. Identical corpus
// and identical text always produce an identical vector.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use unicode_normalization::UnicodeNormalization;

use crate::error::MatchError;

// ============================================================================
// STOPWORDS
// ============================================================================

const ENGLISH_STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "was", "were", "been", "being", "have", "has",
    "had", "does", "did", "doing", "will", "would", "should", "could", "can",
    "may", "might", "must", "shall", "with", "from", "into", "onto", "over",
    "under", "about", "between", "through", "during", "before", "after",
    "above", "below", "again", "further", "then", "once", "here", "there",
    "when", "where", "why", "how", "all", "any", "both", "each", "few",
    "more", "most", "other", "some", "such", "not", "nor", "only", "own",
    "same", "than", "too", "very", "just", "also", "this", "that", "these",
    "those", "what", "which", "who", "whom", "its", "their", "our", "your",
];

// Multi-character terms; single CJK characters are dropped by the length
// filter before this list is consulted.
const JAPANESE_STOPWORDS: &[&str] = &[
    "こと", "もの", "ため", "よう", "さん", "それぞれ", "について", "により",
    "一方", "一部", "全体", "全部", "など", "ほか", "また", "ので", "して",
];

// ============================================================================
// SCRIPT-AWARE TOKENIZER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Script {
    Latin,
    Han,
    Hiragana,
    Katakana,
    Other,
}

fn script_of(c: char) -> Script {
    match c as u32 {
        0x3040..=0x309f => Script::Hiragana,
        0x30a0..=0x30ff | 0x31f0..=0x31ff => Script::Katakana,
        0x3400..=0x4dbf | 0x4e00..=0x9fff | 0xf900..=0xfaff => Script::Han,
        _ if c.is_ascii_alphanumeric() => Script::Latin,
        _ => Script::Other,
    }
}

/// Tokenize mixed-script text.
///
/// The text is NFKC-folded and lowercased, then cut into same-script runs:
/// a document mixing Latin and CJK never yields a token spanning both.
/// Latin runs keep alphabetic words of at least `min_token_len` chars,
/// stopword-filtered. Han runs emit character bigrams (the dictionary-free
/// stand-in for morphological segmentation), Katakana runs stay whole, and
/// pure-Hiragana runs are dropped as function words. Each script's tokens
/// are filtered against that language's stopword list.
pub fn tokenize(text: &str, min_token_len: usize) -> Vec<String> {
    let folded: String = text.nfkc().collect::<String>().to_lowercase();

    let mut runs: Vec<(Script, String)> = Vec::new();
    for c in folded.chars() {
        let script = script_of(c);
        let continues_run = matches!(runs.last(), Some((last, _)) if *last == script);
        if continues_run {
            if let Some((_, run)) = runs.last_mut() {
                run.push(c);
            }
        } else {
            runs.push((script, c.to_string()));
        }
    }

    let mut tokens = Vec::new();
    for (script, run) in runs {
        match script {
            Script::Latin => {
                if run.len() >= min_token_len
                    && !run.chars().all(|c| c.is_ascii_digit())
                    && !ENGLISH_STOPWORDS.contains(&run.as_str())
                {
                    tokens.push(run);
                }
            }
            Script::Han => {
                let chars: Vec<char> = run.chars().collect();
                if chars.len() == 1 {
                    continue;
                }
                if chars.len() == 2 {
                    push_cjk(&mut tokens, run);
                    continue;
                }
                for window in chars.windows(2) {
                    push_cjk(&mut tokens, window.iter().collect());
                }
            }
            Script::Katakana => {
                if run.chars().count() > 1 {
                    push_cjk(&mut tokens, run);
                }
            }
            Script::Hiragana | Script::Other => {}
        }
    }
    tokens
}

fn push_cjk(tokens: &mut Vec<String>, token: String) {
    if !JAPANESE_STOPWORDS.contains(&token.as_str()) {
        tokens.push(token);
    }
}

// ============================================================================
// DOCUMENT VECTOR
// ============================================================================

/// Sparse L2-normalized term-weight vector in the model's shared space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentVector {
    weights: BTreeMap<usize, f64>,
}

impl DocumentVector {
    pub fn zero() -> Self {
        DocumentVector {
            weights: BTreeMap::new(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn dot(&self, other: &DocumentVector) -> f64 {
        self.weights
            .iter()
            .filter_map(|(term, weight)| other.weights.get(term).map(|w| weight * w))
            .sum()
    }

    /// Term indices with non-zero weight in both vectors
    pub fn shared_terms(&self, other: &DocumentVector) -> Vec<usize> {
        self.weights
            .keys()
            .filter(|term| other.weights.contains_key(*term))
            .copied()
            .collect()
    }
}

// ============================================================================
// TF-IDF MODEL
// ============================================================================

pub struct TextVectorizer {
    min_token_len: usize,
}

impl TextVectorizer {
    pub fn new(min_token_len: usize) -> Self {
        TextVectorizer { min_token_len }
    }

    /// Fit a TF-IDF model over the supplied corpus. Smoothed document
    /// frequency: idf = ln((1+N)/(1+df)) + 1, so corpus-wide terms still
    /// carry weight and nothing divides by zero.
    pub fn fit(&self, corpus: &[&str]) -> TfidfModel {
        let tokenized: Vec<Vec<String>> = corpus
            .iter()
            .map(|doc| tokenize(doc, self.min_token_len))
            .collect();

        let mut document_frequency: BTreeMap<&str, usize> = BTreeMap::new();
        for tokens in &tokenized {
            let unique: BTreeSet<&str> = tokens.iter().map(String::as_str).collect();
            for term in unique {
                *document_frequency.entry(term).or_insert(0) += 1;
            }
        }

        let doc_count = corpus.len();
        let mut terms = Vec::with_capacity(document_frequency.len());
        let mut idf = Vec::with_capacity(document_frequency.len());
        let mut vocab = BTreeMap::new();
        for (term, df) in &document_frequency {
            let index = terms.len();
            terms.push(term.to_string());
            idf.push(((1.0 + doc_count as f64) / (1.0 + *df as f64)).ln() + 1.0);
            vocab.insert(term.to_string(), index);
        }

        TfidfModel {
            vocab,
            terms,
            idf,
            min_token_len: self.min_token_len,
        }
    }
}

pub struct TfidfModel {
    vocab: BTreeMap<String, usize>,
    terms: Vec<String>,
    idf: Vec<f64>,
    min_token_len: usize,
}

impl TfidfModel {
    pub fn vocabulary_size(&self) -> usize {
        self.terms.len()
    }

    pub fn term(&self, index: usize) -> Option<&str> {
        self.terms.get(index).map(String::as_str)
    }

    /// Vectorize one document against the fixed vocabulary.
    ///
    /// Terms absent from the training corpus are ignored. Text that yields
    /// no in-vocabulary token is a non-fatal Vectorization error; callers
    /// substitute `DocumentVector::zero()`.
    pub fn vectorize(&self, subject: &str, text: &str) -> Result<DocumentVector, MatchError> {
        let tokens = tokenize(text, self.min_token_len);
        if tokens.is_empty() {
            return Err(MatchError::Vectorization {
                subject: subject.to_string(),
                reason: "no usable tokens in text".to_string(),
            });
        }

        let mut counts: BTreeMap<usize, f64> = BTreeMap::new();
        for token in &tokens {
            if let Some(&index) = self.vocab.get(token) {
                *counts.entry(index).or_insert(0.0) += 1.0;
            }
        }
        if counts.is_empty() {
            return Err(MatchError::Vectorization {
                subject: subject.to_string(),
                reason: "no token in the model vocabulary".to_string(),
            });
        }

        let mut weights: BTreeMap<usize, f64> = counts
            .into_iter()
            .map(|(index, tf)| (index, tf * self.idf[index]))
            .collect();

        let norm = weights.values().map(|w| w * w).sum::<f64>().sqrt();
        if norm > 0.0 {
            for weight in weights.values_mut() {
                *weight /= norm;
            }
        }

        Ok(DocumentVector { weights })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latin_tokenization() {
        let tokens = tokenize("Python NLP engineer, 5+ years with the usual stack", 3);
        assert!(tokens.contains(&"python".to_string()));
        assert!(tokens.contains(&"nlp".to_string()));
        assert!(tokens.contains(&"engineer".to_string()));
        // Stopwords, short tokens, and bare numbers are gone
        assert!(!tokens.contains(&"the".to_string()));
        assert!(!tokens.contains(&"with".to_string()));
        assert!(!tokens.iter().any(|t| t.chars().all(|c| c.is_ascii_digit())));
    }

    #[test]
    fn test_mixed_script_runs_never_fuse() {
        let tokens = tokenize("Rustで形態素解析", 3);
        // "rust" must come out clean, not fused with the CJK that follows
        assert!(tokens.contains(&"rust".to_string()));
        for token in &tokens {
            let latin = token.chars().any(|c| c.is_ascii_alphanumeric());
            let cjk = token.chars().any(|c| !c.is_ascii());
            assert!(!(latin && cjk), "token '{}' spans scripts", token);
        }
    }

    #[test]
    fn test_han_bigrams_and_katakana_runs() {
        let tokens = tokenize("自然言語処理とトランスフォーマー", 3);
        // Bigrams over the Han run
        assert!(tokens.contains(&"自然".to_string()));
        assert!(tokens.contains(&"言語".to_string()));
        // Katakana loanword kept whole
        assert!(tokens.contains(&"トランスフォーマー".to_string()));
        // The hiragana particle と disappears
        assert!(!tokens.iter().any(|t| t.contains('と') && t.chars().count() == 1));
    }

    #[test]
    fn test_width_fold() {
        // Full-width "Ｐｙｔｈｏｎ" folds to the same token as "Python"
        assert_eq!(tokenize("Ｐｙｔｈｏｎ", 3), tokenize("Python", 3));
    }

    #[test]
    fn test_fit_and_vectorize_deterministic() {
        let corpus = ["python nlp transformers", "go kubernetes infrastructure"];
        let vectorizer = TextVectorizer::new(3);

        let model_a = vectorizer.fit(&corpus);
        let model_b = vectorizer.fit(&corpus);
        assert_eq!(model_a.vocabulary_size(), model_b.vocabulary_size());

        let va = model_a.vectorize("doc", "python nlp").unwrap();
        let vb = model_b.vectorize("doc", "python nlp").unwrap();
        assert_eq!(va, vb);
    }

    #[test]
    fn test_vectors_are_l2_normalized() {
        let corpus = ["python nlp transformers nltk", "go kubernetes"];
        let model = TextVectorizer::new(3).fit(&corpus);

        let vector = model.vectorize("doc", "python nlp nltk").unwrap();
        let norm: f64 = vector.weights.values().map(|w| w * w).sum();
        assert!((norm - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_query_terms_ignored() {
        let corpus = ["python nlp"];
        let model = TextVectorizer::new(3).fit(&corpus);

        // "haskell" is outside the trained vocabulary and contributes nothing
        let with_unknown = model.vectorize("doc", "python haskell").unwrap();
        let without = model.vectorize("doc", "python").unwrap();
        assert_eq!(with_unknown, without);
        // The vocabulary did not grow mid-query
        assert_eq!(model.vocabulary_size(), 2);
    }

    #[test]
    fn test_empty_text_is_nonfatal_error() {
        let model = TextVectorizer::new(3).fit(&["python nlp"]);
        let result = model.vectorize("doc", "   ");
        assert!(matches!(result, Err(MatchError::Vectorization { .. })));
        // The designated substitute
        assert!(DocumentVector::zero().is_zero());
    }
}
