use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Rewrite the tenant's WAL once `threshold` appends have piled up since the
/// last compaction. Returns whether it compacted.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

/// Background task, one per tenant.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("studiobook_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(path.clone(), Default::default())
            .unwrap();
        let id = engine
            .register_studio(StudioFields {
                name: "Room A".into(),
                location: "Floor 1".into(),
                capacity: 3,
            })
            .await
            .unwrap();
        for capacity in 4..8 {
            let fields = StudioFields {
                name: "Room A".into(),
                location: "Floor 1".into(),
                capacity,
            };
            engine.update_studio(id, fields).await.unwrap();
        }

        assert!(!compact_if_due(&engine, 100).await);
        assert!(compact_if_due(&engine, 5).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert_eq!(crate::wal::Wal::replay(&path).unwrap().len(), 1);
        assert_eq!(engine.studio(id).await.unwrap().capacity, 7);
    }
}
