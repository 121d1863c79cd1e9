use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HashEmbedderConfig {
    pub dimensions: usize,
    pub seed: u64,
}

impl Default for HashEmbedderConfig {
    fn default() -> Self {
        Self {
            dimensions: 384,
            seed: 1337,
        }
    }
}

/// Offline embedder: hashed bag of tokens, L2-normalized.
///
/// Latin-script text contributes lowercase words; CJK text contributes
/// single characters and adjacent character pairs, so short field labels
/// such as `姓名` match knowledge text without a tokenizer.
#[derive(Clone)]
pub struct HashEmbedder {
    config: HashEmbedderConfig,
}

impl HashEmbedder {
    pub fn new(config: HashEmbedderConfig) -> Self {
        Self { config }
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions.max(1)
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions()];
        for token in tokens(text) {
            let bucket = self.bucket_for(&token);
            vector[bucket] += 1.0;
        }
        l2_normalize(&mut vector);
        vector
    }

    pub fn embed_batch(&self, texts: &[String]) -> Vec<Vec<f32>> {
        texts.par_iter().map(|text| self.embed_text(text)).collect()
    }

    fn bucket_for(&self, token: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        hasher.write_u64(self.config.seed);
        token.hash(&mut hasher);
        (hasher.finish() as usize) % self.dimensions()
    }
}

fn tokens(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut word = String::new();
    let mut previous_cjk: Option<char> = None;
    for ch in text.chars() {
        if is_cjk(ch) {
            flush_word(&mut word, &mut out);
            out.push(ch.to_string());
            if let Some(prev) = previous_cjk {
                out.push(format!("{prev}{ch}"));
            }
            previous_cjk = Some(ch);
        } else if ch.is_alphanumeric() {
            previous_cjk = None;
            word.extend(ch.to_lowercase());
        } else {
            previous_cjk = None;
            flush_word(&mut word, &mut out);
        }
    }
    flush_word(&mut word, &mut out);
    out
}

fn flush_word(word: &mut String, out: &mut Vec<String>) {
    if !word.is_empty() {
        out.push(std::mem::take(word));
    }
}

fn is_cjk(ch: char) -> bool {
    matches!(
        ch as u32,
        0x3040..=0x30FF | 0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xAC00..=0xD7AF | 0xF900..=0xFAFF
    )
}

/// Scales `vector` to unit length; zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}
