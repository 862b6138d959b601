use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

/// Background task that rewrites the journal once enough appends have piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        if compact_if_due(&engine, threshold).await {
            info!("journal compaction finished");
        }
    }
}

/// One compactor pass. Returns whether a compaction ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.journal_appends_since_compact().await;
    if appends < threshold {
        debug!(appends, threshold, "journal compaction not due");
        return false;
    }
    match engine.compact_journal().await {
        Ok(()) => true,
        Err(e) => {
            warn!("journal compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Schedule;
    use crate::model::*;
    use crate::notify::NotificationQueue;
    use std::path::PathBuf;

    fn test_journal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("hallbook_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_journal_path("threshold.journal");
        let (queue, _rx) = NotificationQueue::channel(16);
        let engine = Engine::new(path.clone(), Schedule::default(), queue).unwrap();

        let facility = engine
            .create_facility(NewFacility { name: "Main Hall".into(), ..Default::default() })
            .await
            .unwrap();
        for name in ["A", "B", "C"] {
            engine
                .update_facility(facility.id, FacilityPatch { name: Some(name.into()), ..Default::default() })
                .await
                .unwrap();
        }
        assert_eq!(engine.journal_appends_since_compact().await, 4);

        assert!(!compact_if_due(&engine, 10).await);
        assert!(compact_if_due(&engine, 4).await);
        assert_eq!(engine.journal_appends_since_compact().await, 0);

        // Only the final facility record survives.
        let events = crate::journal::Journal::replay(&path).unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::FacilityCreated { facility } if facility.name == "C"));
    }
}
