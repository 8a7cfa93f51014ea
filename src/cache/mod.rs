//! Approximate-match response cache
//!
//! Entries are keyed by the normalised query and compared by Jaccard
//! similarity of their token sets. Lookups scan every live entry, which is
//! fine for the per-plan capacities used here (tens to hundreds of entries);
//! a much larger cache would want a nearest-neighbour index instead.
//!
//! Age is measured from insertion. Hits never refresh it, so eviction is FIFO
//! by insertion time, not LRU.

pub mod similarity;

pub use similarity::{jaccard, normalize, tokenize};

use crate::config::{CacheCapacity, CacheConfig};
use crate::router::{Complexity, Plan};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

/// A cached provider response
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    normalized_key: String,
    tokens: HashSet<String>,
    response: String,
    inserted_at: Instant,
    hit_count: u32,
    complexity: Complexity,
    sequence: u64,
}

impl CacheEntry {
    pub fn normalized_key(&self) -> &str {
        &self.normalized_key
    }

    pub fn tokens(&self) -> &HashSet<String> {
        &self.tokens
    }

    pub fn response(&self) -> &str {
        &self.response
    }

    pub fn inserted_at(&self) -> Instant {
        self.inserted_at
    }

    pub fn hit_count(&self) -> u32 {
        self.hit_count
    }

    pub fn complexity(&self) -> Complexity {
        self.complexity
    }

    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.duration_since(self.inserted_at) > ttl
    }

    /// Insertion order, oldest first
    fn age_key(&self) -> (Instant, u64) {
        (self.inserted_at, self.sequence)
    }
}

/// Result of a similarity lookup
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarMatch {
    pub entry: CacheEntry,
    pub similarity: f64,
}

/// Cache counters for status reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// Similarity-matched response cache
#[derive(Debug)]
pub struct ResponseCache {
    entries: HashMap<String, CacheEntry>,
    capacities: CacheCapacity,
    capacity: usize,
    ttl: Duration,
    threshold: f64,
    hits: u64,
    misses: u64,
    next_sequence: u64,
}

impl ResponseCache {
    /// Create a cache sized for the configured plan
    pub fn new(config: &CacheConfig) -> Self {
        let capacity = config.capacity.for_plan(config.plan);
        tracing::debug!(
            ttl_seconds = config.ttl_seconds,
            plan = config.plan.as_str(),
            capacity = capacity,
            threshold = config.similarity_threshold,
            "Creating response cache"
        );
        Self {
            entries: HashMap::new(),
            capacities: config.capacity,
            capacity,
            ttl: Duration::from_secs(config.ttl_seconds),
            threshold: config.similarity_threshold,
            hits: 0,
            misses: 0,
            next_sequence: 0,
        }
    }

    /// Configured default similarity threshold
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Resize the cache for a subscription plan, evicting the oldest entries
    /// if it shrank
    pub fn set_tier(&mut self, plan: Plan) {
        self.capacity = self.capacities.for_plan(plan);
        while self.entries.len() > self.capacity {
            self.evict_oldest();
        }
        tracing::debug!(
            plan = plan.as_str(),
            capacity = self.capacity,
            "Cache capacity set for plan"
        );
    }

    /// Best live entry whose similarity to `query` is at least `threshold`
    ///
    /// An entry with the same normalised key always wins with similarity 1.0.
    /// Otherwise the highest score wins and equal scores go to the most
    /// recently inserted entry. Hits bump the entry's hit count but not its age.
    pub fn find_similar(&mut self, query: &str, threshold: f64) -> Option<SimilarMatch> {
        let key = normalize(query);
        let tokens = tokenize(&key);
        let now = Instant::now();
        let ttl = self.ttl;

        let exact = self
            .entries
            .get(&key)
            .filter(|e| !e.is_expired(now, ttl))
            .map(|e| (e.normalized_key.clone(), 1.0));

        let best = exact.or_else(|| {
            let mut best: Option<(&CacheEntry, f64)> = None;
            for entry in self.entries.values() {
                if entry.is_expired(now, ttl) {
                    continue;
                }
                let score = jaccard(&tokens, &entry.tokens);
                let better = match best {
                    None => true,
                    Some((current, current_score)) => {
                        score > current_score
                            || (score == current_score && entry.sequence > current.sequence)
                    }
                };
                if better {
                    best = Some((entry, score));
                }
            }
            best.map(|(e, score)| (e.normalized_key.clone(), score))
        });

        match best {
            Some((matched_key, similarity)) if similarity >= threshold => {
                let entry = self.entries.get_mut(&matched_key)?;
                entry.hit_count += 1;
                self.hits += 1;
                tracing::debug!(
                    similarity = similarity,
                    hit_count = entry.hit_count,
                    "Cache hit"
                );
                Some(SimilarMatch {
                    entry: entry.clone(),
                    similarity,
                })
            }
            _ => {
                self.misses += 1;
                tracing::debug!(
                    best_similarity = best.map(|(_, s)| s).unwrap_or(0.0),
                    threshold = threshold,
                    "Cache miss"
                );
                None
            }
        }
    }

    /// Live entry with exactly this normalised query
    pub fn get(&self, query: &str) -> Option<&CacheEntry> {
        let now = Instant::now();
        self.entries
            .get(&normalize(query))
            .filter(|e| !e.is_expired(now, self.ttl))
    }

    /// Store a response, evicting the oldest entry when full
    ///
    /// Queries that normalise to an empty string are not cached.
    pub fn set(&mut self, query: &str, response: impl Into<String>, complexity: Complexity) {
        let key = normalize(query);
        if key.is_empty() {
            return;
        }

        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_oldest();
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let entry = CacheEntry {
            tokens: tokenize(&key),
            normalized_key: key.clone(),
            response: response.into(),
            inserted_at: Instant::now(),
            hit_count: 0,
            complexity,
            sequence,
        };
        self.entries.insert(key, entry);
    }

    /// Remove every expired entry, returning how many were removed
    pub fn cleanup(&mut self) -> usize {
        let now = Instant::now();
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now, ttl));
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::info!(
                removed,
                remaining = self.entries.len(),
                "Cleaned up expired cache entries"
            );
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let lookups = self.hits + self.misses;
        CacheStats {
            size: self.entries.len(),
            capacity: self.capacity,
            hits: self.hits,
            misses: self.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                self.hits as f64 / lookups as f64
            },
        }
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .values()
            .min_by_key(|e| e.age_key())
            .map(|e| e.normalized_key.clone());
        if let Some(key) = oldest {
            tracing::debug!(key = %key, "Evicting oldest cache entry");
            self.entries.remove(&key);
        }
    }
}
