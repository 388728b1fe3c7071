//! Two-tier summary cache keyed by request fingerprint.
//!
//! A bounded in-memory tier answers hot repeats; the store-backed durable
//! tier survives restarts with a longer TTL. Invalidation is channel- or
//! guild-scoped and clears both tiers. The store is never touched while the
//! in-memory mutex is held.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use recap_core::types::Summary;
use recap_core::Result;
use recap_store::Store;

struct MemoryEntry {
    summary: Summary,
    cached_at: DateTime<Utc>,
}

pub struct SummaryCache {
    memory: Mutex<HashMap<String, MemoryEntry>>,
    store: Arc<Store>,
    memory_ttl: Duration,
    memory_max: usize,
    store_ttl_secs: i64,
}

impl SummaryCache {
    pub fn new(
        store: Arc<Store>,
        memory_ttl: Duration,
        memory_max: usize,
        store_ttl_secs: i64,
    ) -> Self {
        Self {
            memory: Mutex::new(HashMap::new()),
            store,
            memory_ttl,
            memory_max: memory_max.max(1),
            store_ttl_secs,
        }
    }

    /// Look up a fingerprint. Durable-tier hits are promoted to memory.
    pub fn get(&self, fingerprint: &str) -> Result<Option<Summary>> {
        {
            let mut memory = self.memory.lock().unwrap();
            match memory.get(fingerprint) {
                Some(entry) if Utc::now() - entry.cached_at <= self.memory_ttl => {
                    debug!(%fingerprint, "cache hit (memory)");
                    return Ok(Some(entry.summary.clone()));
                }
                Some(_) => {
                    memory.remove(fingerprint);
                }
                None => {}
            }
        }

        let durable = self.store.cache_get(fingerprint, self.store_ttl_secs)?;
        if let Some(ref summary) = durable {
            debug!(%fingerprint, "cache hit (durable), promoting");
            self.insert_memory(fingerprint, summary.clone());
        }
        Ok(durable)
    }

    /// Write both tiers. The summary must already be persisted (the durable
    /// tier references it by id).
    pub fn put(&self, fingerprint: &str, summary: &Summary) -> Result<()> {
        self.store.cache_put(fingerprint, &summary.id)?;
        self.insert_memory(fingerprint, summary.clone());
        Ok(())
    }

    pub fn invalidate_channel(&self, channel_id: &str) -> Result<()> {
        {
            let mut memory = self.memory.lock().unwrap();
            memory.retain(|_, e| e.summary.channel_id != channel_id);
        }
        let n = self.store.cache_invalidate_channel(channel_id)?;
        debug!(channel = %channel_id, durable_removed = n, "cache invalidated for channel");
        Ok(())
    }

    pub fn invalidate_guild(&self, guild_id: &str) -> Result<()> {
        {
            let mut memory = self.memory.lock().unwrap();
            memory.retain(|_, e| e.summary.guild_id != guild_id);
        }
        let n = self.store.cache_invalidate_guild(guild_id)?;
        debug!(guild = %guild_id, durable_removed = n, "cache invalidated for guild");
        Ok(())
    }

    fn insert_memory(&self, fingerprint: &str, summary: Summary) {
        let mut memory = self.memory.lock().unwrap();
        if memory.len() >= self.memory_max && !memory.contains_key(fingerprint) {
            // Evict the stalest entry to stay bounded.
            if let Some(oldest) = memory
                .iter()
                .min_by_key(|(_, e)| e.cached_at)
                .map(|(k, _)| k.clone())
            {
                memory.remove(&oldest);
            }
        }
        memory.insert(
            fingerprint.to_string(),
            MemoryEntry {
                summary,
                cached_at: Utc::now(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use recap_core::types::GenerationMetadata;

    fn store() -> (Arc<Store>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("recap.db");
        (
            Arc::new(Store::open(path.to_str().unwrap(), 2).unwrap()),
            dir,
        )
    }

    fn summary(id: &str, channel: &str, guild: &str) -> Summary {
        Summary {
            id: id.to_string(),
            channel_id: channel.to_string(),
            guild_id: guild.to_string(),
            start: Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 7, 2, 0, 0, 0).unwrap(),
            message_count: 10,
            body: "body".into(),
            key_points: Vec::new(),
            action_items: Vec::new(),
            technical_terms: Vec::new(),
            participants: Vec::new(),
            metadata: GenerationMetadata {
                model: "m".into(),
                prompt_tokens: 1,
                completion_tokens: 1,
                duration_ms: 1,
                cost_usd: 0.0,
            },
            created_at: Utc::now(),
            warnings: Vec::new(),
        }
    }

    #[test]
    fn put_then_get_hits_memory() {
        let (store, _dir) = store();
        let cache = SummaryCache::new(Arc::clone(&store), Duration::seconds(300), 10, 3600);
        let s = summary("s1", "c1", "g1");
        store.save_summary(&s).unwrap();
        cache.put("fp1", &s).unwrap();

        let hit = cache.get("fp1").unwrap().unwrap();
        assert_eq!(hit.id, "s1");
    }

    #[test]
    fn expired_memory_entry_falls_to_durable_tier() {
        let (store, _dir) = store();
        let cache = SummaryCache::new(Arc::clone(&store), Duration::zero(), 10, 3600);
        let s = summary("s1", "c1", "g1");
        store.save_summary(&s).unwrap();
        cache.put("fp1", &s).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        // Memory TTL of zero has expired; the durable tier still answers.
        let hit = cache.get("fp1").unwrap();
        assert_eq!(hit.unwrap().id, "s1");
    }

    #[test]
    fn memory_tier_stays_bounded() {
        let (store, _dir) = store();
        let cache = SummaryCache::new(Arc::clone(&store), Duration::seconds(300), 2, 3600);
        for i in 0..4 {
            let s = summary(&format!("s{i}"), "c1", "g1");
            store.save_summary(&s).unwrap();
            cache.put(&format!("fp{i}"), &s).unwrap();
        }
        let memory = cache.memory.lock().unwrap();
        assert!(memory.len() <= 2);
    }

    #[test]
    fn channel_invalidation_clears_both_tiers() {
        let (store, _dir) = store();
        let cache = SummaryCache::new(Arc::clone(&store), Duration::seconds(300), 10, 3600);
        let a = summary("s1", "c1", "g1");
        let b = summary("s2", "c2", "g1");
        store.save_summary(&a).unwrap();
        store.save_summary(&b).unwrap();
        cache.put("fp1", &a).unwrap();
        cache.put("fp2", &b).unwrap();

        cache.invalidate_channel("c1").unwrap();
        assert!(cache.get("fp1").unwrap().is_none());
        assert!(cache.get("fp2").unwrap().is_some());

        cache.invalidate_guild("g1").unwrap();
        assert!(cache.get("fp2").unwrap().is_none());
    }
}
