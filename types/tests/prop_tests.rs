//! Property tests for the persisted task codec.

use proptest::prelude::*;
use std::collections::BTreeMap;

use blockcast_types::{SinkKind, Task, TaskStatus};

fn arb_sink_kind() -> impl Strategy<Value = SinkKind> {
    prop::sample::select(SinkKind::ALL.to_vec())
}

fn arb_done_map() -> impl Strategy<Value = BTreeMap<SinkKind, bool>> {
    prop::collection::btree_map(arb_sink_kind(), any::<bool>(), 0..=4)
}

proptest! {
    #[test]
    fn codec_round_trips_any_task(
        height in 0u64..=u64::MAX / 2,
        done_map in arb_done_map(),
        updated_at in 0u64..=4_102_444_800, // through year 2100
    ) {
        let task = Task::from_parts(height, done_map, updated_at);
        let json = task.to_json().unwrap();
        let parsed = Task::from_json(&json).unwrap();
        prop_assert_eq!(parsed, task);
    }

    #[test]
    fn status_matches_done_map_contents(done_map in arb_done_map()) {
        let task = Task::from_parts(1, done_map.clone(), 0);
        let expected = if done_map.is_empty() || done_map.values().all(|d| !d) {
            TaskStatus::Fail
        } else if done_map.values().all(|d| *d) {
            TaskStatus::Success
        } else {
            TaskStatus::PartialSuccess
        };
        prop_assert_eq!(task.status(), expected);
    }

    #[test]
    fn mark_done_is_monotone(
        done_map in arb_done_map(),
        sink in arb_sink_kind(),
    ) {
        let mut task = Task::from_parts(1, done_map, 0);
        let before: Vec<SinkKind> = SinkKind::ALL
            .iter()
            .copied()
            .filter(|k| task.is_done(*k))
            .collect();
        task.mark_done(sink);
        // Every sink that was done stays done.
        for k in before {
            prop_assert!(task.is_done(k));
        }
    }
}
