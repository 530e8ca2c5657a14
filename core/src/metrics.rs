//! Session-scoped token and prompt-cache accounting
//!
//! Accumulates the usage records the completion stream reports at the end
//! of each request. Read-only everywhere outside the aggregator; reset only
//! by process restart.

use serde::{Deserialize, Serialize};

/// Usage reported by one completion request.
///
/// Providers differ in how they report cache hits; the stream client
/// normalizes `prompt_tokens_details.cached_tokens` into
/// `prompt_cache_hit_tokens` before this record reaches the aggregator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageRecord {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub prompt_cache_hit_tokens: u64,
    #[serde(default)]
    pub prompt_cache_miss_tokens: u64,
}

impl UsageRecord {
    /// Cache hit tokens, deriving the miss side when the provider only
    /// reports hits and a prompt total.
    pub fn cache_hit(&self) -> u64 {
        self.prompt_cache_hit_tokens
    }

    pub fn cache_miss(&self) -> u64 {
        if self.prompt_cache_miss_tokens == 0 && self.prompt_tokens > self.prompt_cache_hit_tokens
        {
            self.prompt_tokens - self.prompt_cache_hit_tokens
        } else {
            self.prompt_cache_miss_tokens
        }
    }

    /// Per-request hit rate, `None` when the provider reported no cache data.
    pub fn hit_rate(&self) -> Option<f64> {
        let denom = self.cache_hit() + self.cache_miss();
        if denom == 0 {
            None
        } else {
            Some(self.cache_hit() as f64 / denom as f64)
        }
    }

    fn is_empty(&self) -> bool {
        self.prompt_tokens == 0
            && self.completion_tokens == 0
            && self.total_tokens == 0
            && self.prompt_cache_hit_tokens == 0
            && self.prompt_cache_miss_tokens == 0
    }
}

/// Running totals across every counted request in the session.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub prompt_cache_hit_tokens: u64,
    pub prompt_cache_miss_tokens: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub counted_requests: u64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one request's usage into the session totals.
    ///
    /// All-zero records (providers that omit usage entirely) are not counted.
    pub fn record(&mut self, usage: &UsageRecord) {
        if usage.is_empty() {
            return;
        }
        let hit = usage.cache_hit();
        let miss = usage.cache_miss();
        let prompt = if usage.prompt_tokens > 0 {
            usage.prompt_tokens
        } else {
            hit + miss
        };
        let total = if usage.total_tokens > 0 {
            usage.total_tokens
        } else {
            prompt + usage.completion_tokens
        };

        self.prompt_cache_hit_tokens += hit;
        self.prompt_cache_miss_tokens += miss;
        self.prompt_tokens += prompt;
        self.completion_tokens += usage.completion_tokens;
        self.total_tokens += total;
        self.counted_requests += 1;
    }

    /// Session hit rate `hit/(hit+miss)`, `None` with no cache data yet.
    pub fn session_hit_rate(&self) -> Option<f64> {
        let denom = self.prompt_cache_hit_tokens + self.prompt_cache_miss_tokens;
        if denom == 0 {
            None
        } else {
            Some(self.prompt_cache_hit_tokens as f64 / denom as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_totals_and_rate() {
        let mut stats = CacheStats::new();
        stats.record(&UsageRecord {
            prompt_tokens: 4,
            completion_tokens: 2,
            total_tokens: 6,
            prompt_cache_hit_tokens: 3,
            prompt_cache_miss_tokens: 1,
        });
        stats.record(&UsageRecord {
            prompt_tokens: 4,
            completion_tokens: 1,
            total_tokens: 5,
            prompt_cache_hit_tokens: 2,
            prompt_cache_miss_tokens: 2,
        });

        assert_eq!(stats.prompt_cache_hit_tokens, 5);
        assert_eq!(stats.prompt_cache_miss_tokens, 3);
        assert_eq!(stats.counted_requests, 2);
        assert_eq!(stats.session_hit_rate(), Some(5.0 / 8.0));
    }

    #[test]
    fn test_empty_usage_not_counted() {
        let mut stats = CacheStats::new();
        stats.record(&UsageRecord::default());
        assert_eq!(stats.counted_requests, 0);
        assert_eq!(stats.session_hit_rate(), None);
    }

    #[test]
    fn test_miss_derived_from_prompt_total() {
        let usage = UsageRecord {
            prompt_tokens: 10,
            prompt_cache_hit_tokens: 6,
            ..Default::default()
        };
        assert_eq!(usage.cache_miss(), 4);
        assert_eq!(usage.hit_rate(), Some(0.6));
    }

    #[test]
    fn test_totals_derived_when_unreported() {
        let mut stats = CacheStats::new();
        stats.record(&UsageRecord {
            prompt_cache_hit_tokens: 3,
            prompt_cache_miss_tokens: 1,
            completion_tokens: 2,
            ..Default::default()
        });
        assert_eq!(stats.prompt_tokens, 4);
        assert_eq!(stats.total_tokens, 6);
    }
}
