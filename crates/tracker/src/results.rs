//! Thread-safe single-slot cache for the newest detection snapshot.

use std::sync::Mutex;

use marker_core::ResultSnapshot;

/// Holds the most recent complete [`ResultSnapshot`].
///
/// Publication replaces the slot wholesale under the lock, so a reader can
/// never observe results from two different detection passes. Both sides
/// only copy while holding the lock; detection work never happens here.
#[derive(Default)]
pub struct ResultStore {
    slot: Mutex<Option<ResultSnapshot>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, snapshot: ResultSnapshot) {
        *self.slot.lock().expect("result slot lock") = Some(snapshot);
    }

    /// Defensive copy of the newest snapshot, if any pass has completed.
    pub fn latest(&self) -> Option<ResultSnapshot> {
        self.slot.lock().expect("result slot lock").clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(sequence: u64, ids: &[i32]) -> ResultSnapshot {
        let pose = marker_core::MarkerPose::default();
        ResultSnapshot {
            results: ids
                .iter()
                .map(|&id| marker_core::DetectionResult {
                    id,
                    corners: [marker_core::Point2f::new(0.0, 0.0); 4],
                    rotation: pose.rotation,
                    translation: pose.translation,
                })
                .collect(),
            sequence,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn empty_until_first_publish() {
        let store = ResultStore::new();
        assert!(store.latest().is_none());
    }

    #[test]
    fn publish_replaces_wholesale() {
        let store = ResultStore::new();
        store.publish(snapshot(1, &[4, 5]));
        store.publish(snapshot(2, &[9]));

        let latest = store.latest().unwrap();
        assert_eq!(latest.sequence, 2);
        assert_eq!(latest.results.len(), 1);
        assert_eq!(latest.results[0].id, 9);
    }

    #[test]
    fn readers_get_an_independent_copy() {
        let store = ResultStore::new();
        store.publish(snapshot(1, &[7]));
        let copy = store.latest().unwrap();
        store.publish(snapshot(2, &[]));
        assert_eq!(copy.results.len(), 1);
    }
}
