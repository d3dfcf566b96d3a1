use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites a tenant's WAL once enough appends have
/// piled up since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&engine, threshold).await;
    }
}

/// One compactor pass. Returns whether the log was rewritten. Idle
/// buckets left behind by failed operations are swept on every pass.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> bool {
    let buckets = engine.prune_idle_buckets();
    debug!(buckets, "idle buckets swept");
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        debug!(appends, threshold, "WAL below compaction threshold");
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!(appends, "WAL compacted");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineSettings;
    use crate::notify::NotifyHub;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("maitre_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(path, Arc::new(NotifyHub::new()), EngineSettings::default()).unwrap();

        let rid = Ulid::new();
        engine
            .create_restaurant(rid, "Bistro".into(), "bistro".into(), 60)
            .await
            .unwrap();
        for minutes in [30, 45, 60] {
            engine.set_slot_duration(rid, minutes).await.unwrap();
        }
        assert_eq!(engine.wal_appends_since_compact().await, 4);

        assert!(!compact_if_needed(&engine, 10).await);
        assert_eq!(engine.wal_appends_since_compact().await, 4);

        assert!(compact_if_needed(&engine, 4).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert_eq!(engine.list_restaurants().await[0].slot_duration_minutes, 60);
    }
}
