//! Near-duplicate detection: word shingles, MinHash signatures, LSH banding.
//!
//! The [`LshIndex`] carries per-session bucket state, so callers construct a
//! fresh index for every dedup pass and never reuse one across calls. A
//! processed-ids set rejects double insertion of the same document id.

use std::collections::{HashMap, HashSet};

/// Number of hash functions in a MinHash signature
pub const NUM_HASHES: usize = 128;

/// LSH banding: 16 bands x 8 rows ~ 0.7 candidate threshold, tightened by
/// an exact signature comparison against the configured Jaccard threshold.
const BANDS: usize = 16;
const ROWS: usize = NUM_HASHES / BANDS;

/// Default Jaccard similarity above which two texts are near-duplicates
pub const DEFAULT_JACCARD_THRESHOLD: f64 = 0.85;

/// Word shingle width
const SHINGLE_K: usize = 3;

/// splitmix64 finalizer; cheap, well-distributed 64-bit mixing
fn mix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// Hash one shingle under hash function `i`
fn shingle_hash(shingle: &str, i: u64) -> u64 {
    let mut h = mix64(i.wrapping_mul(0x2545_f491_4f6c_dd1d));
    for b in shingle.as_bytes() {
        h = mix64(h ^ u64::from(*b));
    }
    h
}

/// Word k-shingles over lowercased, whitespace-normalized text
fn shingles(text: &str) -> Vec<String> {
    let words: Vec<String> = text
        .to_lowercase()
        .split_whitespace()
        .map(|w| {
            w.chars()
                .filter(|c| c.is_alphanumeric())
                .collect::<String>()
        })
        .filter(|w| !w.is_empty())
        .collect();

    if words.is_empty() {
        return Vec::new();
    }
    if words.len() < SHINGLE_K {
        return vec![words.join(" ")];
    }
    words
        .windows(SHINGLE_K)
        .map(|w| w.join(" "))
        .collect()
}

/// A MinHash signature over a text's shingle set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature(pub Vec<u64>);

impl Signature {
    /// Compute the signature of a text. Empty/whitespace text yields an
    /// all-MAX signature that matches nothing.
    pub fn of(text: &str) -> Self {
        let shingles = shingles(text);
        let mut mins = vec![u64::MAX; NUM_HASHES];
        for s in &shingles {
            for (i, min) in mins.iter_mut().enumerate() {
                let h = shingle_hash(s, i as u64);
                if h < *min {
                    *min = h;
                }
            }
        }
        Signature(mins)
    }

    /// Estimated Jaccard similarity between two signatures
    pub fn jaccard(&self, other: &Signature) -> f64 {
        let matching = self
            .0
            .iter()
            .zip(other.0.iter())
            .filter(|(a, b)| a == b && **a != u64::MAX)
            .count();
        matching as f64 / NUM_HASHES as f64
    }
}

/// One dedup session: banded LSH buckets plus the already-inserted id set.
///
/// Build, insert, query, drop. Never held across retrieval calls.
pub struct LshIndex {
    threshold: f64,
    buckets: HashMap<(usize, u64), Vec<usize>>,
    signatures: Vec<Signature>,
    processed: HashSet<usize>,
}

impl LshIndex {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            buckets: HashMap::new(),
            signatures: Vec::new(),
            processed: HashSet::new(),
        }
    }

    /// Insert a document; returns the ids of previously inserted documents
    /// whose estimated Jaccard similarity meets the threshold.
    ///
    /// Inserting the same `id` twice is a no-op returning no matches; the
    /// processed-ids guard keeps one retrieval from double-keying the index.
    pub fn insert_and_query(&mut self, id: usize, signature: Signature) -> Vec<usize> {
        if !self.processed.insert(id) {
            return Vec::new();
        }

        let mut candidates: HashSet<usize> = HashSet::new();
        for band in 0..BANDS {
            let rows = &signature.0[band * ROWS..(band + 1) * ROWS];
            let mut key = band as u64;
            for r in rows {
                key = mix64(key ^ r);
            }
            let bucket = self.buckets.entry((band, key)).or_default();
            candidates.extend(bucket.iter().copied());
            bucket.push(id);
        }

        while self.signatures.len() <= id {
            self.signatures.push(Signature(Vec::new()));
        }
        self.signatures[id] = signature;

        let sig = &self.signatures[id];
        let mut matches: Vec<usize> = candidates
            .into_iter()
            .filter(|c| {
                let other = &self.signatures[*c];
                !other.0.is_empty() && sig.jaccard(other) >= self.threshold
            })
            .collect();
        matches.sort_unstable();
        matches
    }
}

/// Convenience: whether two texts are near-duplicates at the threshold
pub fn is_near_duplicate(a: &str, b: &str, threshold: f64) -> bool {
    Signature::of(a).jaccard(&Signature::of(b)) >= threshold
}
