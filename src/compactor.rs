use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

/// Background task that snapshots a property's WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    run_compactor_every(engine, threshold, Duration::from_secs(30)).await
}

async fn run_compactor_every(engine: Arc<Engine>, threshold: u64, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        if compact_if_due(&engine, threshold).await {
            info!("compacted WAL after reaching {threshold} appends");
        }
    }
}

/// Compact when at least `threshold` appends landed since the last compaction.
/// Returns whether a compaction ran and succeeded.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.appends_since_compact().await;
    if appends < threshold.max(1) {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => true,
        Err(e) => {
            // Busy writers just push the snapshot to the next tick.
            tracing::warn!("compaction skipped after {appends} appends: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineSettings;
    use crate::model::RoomType;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("hotelier_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn churn(engine: &Engine, n: usize) {
        let rt = Ulid::new();
        engine
            .create_room_type(RoomType {
                id: rt,
                name: "Single".into(),
                price: 50,
                max_adults: 1,
                max_children: 0,
                quantity: 1,
            })
            .await
            .unwrap();
        let room = Ulid::new();
        engine.create_room(room, rt, "1".into(), true).await.unwrap();
        for i in 0..n {
            engine.set_room_active(room, i % 2 == 1).await.unwrap();
        }
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(path.clone(), EngineSettings::default()).unwrap();
        churn(&engine, 4).await;

        assert!(!compact_if_due(&engine, 100).await);
        assert_eq!(engine.appends_since_compact().await, 6);

        assert!(compact_if_due(&engine, 5).await);
        assert_eq!(engine.appends_since_compact().await, 0);

        // Snapshot holds the room type and the room at its final state.
        let replayed = crate::wal::Wal::replay(&path).unwrap();
        assert_eq!(replayed.len(), 2);
    }

    #[tokio::test]
    async fn background_loop_compacts() {
        let path = test_wal_path("loop.wal");
        let engine = Arc::new(Engine::new(path, EngineSettings::default()).unwrap());
        churn(&engine, 10).await;

        let task = tokio::spawn(run_compactor_every(
            engine.clone(),
            3,
            Duration::from_millis(10),
        ));
        for _ in 0..100 {
            if engine.appends_since_compact().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        task.abort();
        assert_eq!(engine.appends_since_compact().await, 0);
    }
}
