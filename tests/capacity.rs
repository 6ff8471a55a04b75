//! Capacity invariants under arbitrary ingest interleavings.

use outage_buffer::{BufferConfig, BufferManager};
use proptest::prelude::*;
use std::collections::HashSet;
use std::time::Duration;

const SUBSCRIPTIONS: [&str; 4] = ["alpha", "beta", "gamma", "delta"];
const PER_SUB_CAP: usize = 5;
const TOTAL_CAP: usize = 20;

fn capped_manager() -> BufferManager {
    BufferManager::with_config(BufferConfig {
        buffer_duration: Duration::from_secs(30),
        cleanup_timeout: Duration::from_secs(35),
        max_updates_per_subscription: PER_SUB_CAP,
        max_total_updates: TOTAL_CAP,
    })
    .unwrap()
}

proptest! {
    /// No ingest interleaving can push any subscription past its cap or
    /// the session past the global cap, and whatever survives replays
    /// strictly in capture order without duplicates.
    #[test]
    fn caps_hold_for_any_ingest_interleaving(
        ops in proptest::collection::vec((0..SUBSCRIPTIONS.len(), any::<u8>()), 0..300)
    ) {
        let manager = capped_manager();
        manager.start_buffering(SUBSCRIPTIONS.iter().map(|s| s.to_string()).collect());

        for (sub, byte) in ops {
            manager.ingest(SUBSCRIPTIONS[sub], vec![byte]);
            prop_assert!(manager.stats().buffered_updates <= TOTAL_CAP);
        }

        let mut per_sub = Vec::new();
        manager.stop_and_replay(|id, updates| {
            per_sub.push((id.to_string(), updates));
            Ok(())
        });

        let mut seen = HashSet::new();
        for (_, updates) in &per_sub {
            prop_assert!(updates.len() <= PER_SUB_CAP);
            prop_assert!(updates.windows(2).all(|w| w[0].sequence < w[1].sequence));
            for update in updates {
                prop_assert!(seen.insert(update.sequence), "duplicate sequence {:?}", update.sequence);
            }
        }
    }

    /// Sequence numbering always restarts at 1 for a fresh session, no
    /// matter how the previous session ended.
    #[test]
    fn sequences_restart_after_any_session_end(
        first_ingests in 1..40usize,
        end_with_clear in any::<bool>(),
    ) {
        let manager = capped_manager();

        manager.start_buffering(vec!["alpha".to_string()]);
        for i in 0..first_ingests {
            manager.ingest("alpha", vec![i as u8]);
        }
        if end_with_clear {
            manager.clear();
        } else {
            manager.stop_and_replay(|_, _| Ok(()));
        }

        manager.start_buffering(vec!["alpha".to_string()]);
        manager.ingest("alpha", b"first".to_vec());

        let mut first_sequence = None;
        manager.stop_and_replay(|_, updates| {
            first_sequence = updates.first().map(|u| u.sequence.0);
            Ok(())
        });
        prop_assert_eq!(first_sequence, Some(1));
    }
}
