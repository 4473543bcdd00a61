//! Generation-run relay: adapts the pipeline's stage callbacks into ordered
//! wire events for one channel.
//!
//! Each run is an explicit state machine (`pending → streaming → terminal`)
//! rather than trusting the pipeline to invoke callbacks correctly: the first
//! terminal callback wins, later ones are swallowed. A channel holds at most
//! one non-terminal run at a time, enforced as a gate when the run is claimed,
//! not as a lock held for its duration.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::DuplicateGeneration;

use super::events::{EventPayload, SubStageKind};
use super::fanout::Fanout;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Pending,
    Streaming,
    Terminal,
}

/// Claims generation runs, one in flight per channel.
pub struct RunCoordinator {
    fanout: Arc<Fanout>,
    active: Arc<DashMap<String, ()>>,
}

impl RunCoordinator {
    pub fn new(fanout: Arc<Fanout>) -> Self {
        Self {
            fanout,
            active: Arc::new(DashMap::new()),
        }
    }

    /// Claim the run slot for a channel.
    ///
    /// Fails with [`DuplicateGeneration`] if the channel already has a
    /// non-terminal run; the existing run's stream is unaffected.
    pub fn begin(&self, channel_id: &str) -> Result<GenerationRun, DuplicateGeneration> {
        use dashmap::mapref::entry::Entry;

        match self.active.entry(channel_id.to_string()) {
            Entry::Occupied(_) => Err(DuplicateGeneration {
                channel_id: channel_id.to_string(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(());
                Ok(GenerationRun {
                    channel_id: channel_id.to_string(),
                    fanout: self.fanout.clone(),
                    active: self.active.clone(),
                    state: Mutex::new(RunState::Pending),
                })
            }
        }
    }

    pub fn is_active(&self, channel_id: &str) -> bool {
        self.active.contains_key(channel_id)
    }
}

/// One generation run for one channel: the callback surface the pipeline
/// drives.
///
/// Every callback synchronously builds the corresponding event and hands it
/// to the fanout — nothing is buffered or batched. The state lock is held
/// across the hand-off so events reach each member's queue in callback order.
pub struct GenerationRun {
    channel_id: String,
    fanout: Arc<Fanout>,
    active: Arc<DashMap<String, ()>>,
    state: Mutex<RunState>,
}

impl std::fmt::Debug for GenerationRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationRun")
            .field("channel_id", &self.channel_id)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl GenerationRun {
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn on_start(&self, model: &str) {
        let mut state = self.state.lock();
        match *state {
            RunState::Pending => *state = RunState::Streaming,
            RunState::Streaming => {
                tracing::debug!(channel_id = %self.channel_id, "duplicate start callback dropped");
                return;
            }
            RunState::Terminal => {
                tracing::debug!(channel_id = %self.channel_id, "start after terminal dropped");
                return;
            }
        }
        self.fanout.broadcast(
            &self.channel_id,
            EventPayload::GenerationStarted {
                model: model.to_string(),
            },
        );
    }

    pub fn on_token(&self, text: &str) {
        let state = self.state.lock();
        if *state == RunState::Terminal {
            tracing::debug!(channel_id = %self.channel_id, "token after terminal dropped");
            return;
        }
        self.fanout.broadcast(
            &self.channel_id,
            EventPayload::Token {
                text: text.to_string(),
            },
        );
    }

    pub fn on_end(&self, result: Value) {
        self.terminal(EventPayload::GenerationCompleted { result });
    }

    pub fn on_error(&self, reason: &str) {
        self.terminal(EventPayload::GenerationFailed {
            reason: reason.to_string(),
        });
    }

    pub fn on_substage_start(&self, kind: SubStageKind, query: Option<&str>) {
        let state = self.state.lock();
        if *state == RunState::Terminal {
            tracing::debug!(channel_id = %self.channel_id, "substage after terminal dropped");
            return;
        }
        self.fanout.broadcast(
            &self.channel_id,
            EventPayload::SubStageStarted {
                kind,
                query: query.map(str::to_string),
            },
        );
    }

    pub fn on_substage_end(&self, kind: SubStageKind, summary: &str) {
        let state = self.state.lock();
        if *state == RunState::Terminal {
            tracing::debug!(channel_id = %self.channel_id, "substage after terminal dropped");
            return;
        }
        self.fanout.broadcast(
            &self.channel_id,
            EventPayload::SubStageCompleted {
                kind,
                summary: summary.to_string(),
            },
        );
    }

    /// Apply a terminal transition. The first one wins and frees the
    /// channel's run slot; replays are swallowed at debug level.
    fn terminal(&self, event: EventPayload) {
        let mut state = self.state.lock();
        if *state == RunState::Terminal {
            tracing::debug!(channel_id = %self.channel_id, "terminal event replay dropped");
            return;
        }
        *state = RunState::Terminal;
        self.fanout.broadcast(&self.channel_id, event);
        self.active.remove(&self.channel_id);
    }
}

impl Drop for GenerationRun {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if *state != RunState::Terminal {
            tracing::warn!(
                channel_id = %self.channel_id,
                "generation run dropped without a terminal event"
            );
            self.active.remove(&self.channel_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::verifier::StaticVerifier;
    use crate::gateway::events::WireEvent;
    use crate::gateway::membership::ChannelMembership;
    use crate::gateway::registry::{ConnectionRegistry, Outbound};
    use tokio::sync::mpsc;

    struct Harness {
        coordinator: RunCoordinator,
        rx: mpsc::UnboundedReceiver<Outbound>,
    }

    fn harness(channel_id: &str) -> Harness {
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(StaticVerifier::new())));
        let membership = Arc::new(ChannelMembership::new());
        let fanout = Arc::new(Fanout::new(registry.clone(), membership.clone()));

        let (tx, rx) = mpsc::unbounded_channel();
        let connection_id = registry.connect(tx);
        membership.join(channel_id, &connection_id);

        Harness {
            coordinator: RunCoordinator::new(fanout),
            rx,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<WireEvent> {
        let mut events = Vec::new();
        while let Ok(Outbound::Event(event)) = rx.try_recv() {
            events.push(event.as_ref().clone());
        }
        events
    }

    #[tokio::test]
    async fn full_run_emits_events_in_callback_order() {
        let mut h = harness("ch_1");
        let run = h.coordinator.begin("ch_1").unwrap();

        run.on_start("gpt-4");
        run.on_substage_start(SubStageKind::Retrieval, Some("refund policy"));
        run.on_substage_end(SubStageKind::Retrieval, "3 documents");
        run.on_token("Hi");
        run.on_token(" there");
        run.on_token("!");
        run.on_end(serde_json::json!({ "text": "Hi there!" }));

        let events = drain(&mut h.rx);
        assert_eq!(events.len(), 7);
        assert!(matches!(events[0].event, EventPayload::GenerationStarted { .. }));
        assert!(matches!(events[1].event, EventPayload::SubStageStarted { .. }));
        assert!(matches!(events[2].event, EventPayload::SubStageCompleted { .. }));
        let texts: Vec<_> = events[3..6]
            .iter()
            .map(|e| match &e.event {
                EventPayload::Token { text } => text.as_str(),
                other => panic!("expected token, got {other:?}"),
            })
            .collect();
        assert_eq!(texts, vec!["Hi", " there", "!"]);
        assert!(matches!(events[6].event, EventPayload::GenerationCompleted { .. }));
    }

    #[tokio::test]
    async fn second_run_on_same_channel_is_rejected() {
        let mut h = harness("ch_1");
        let run = h.coordinator.begin("ch_1").unwrap();
        run.on_start("gpt-4");
        run.on_token("first");

        let err = h.coordinator.begin("ch_1").unwrap_err();
        assert_eq!(err.channel_id, "ch_1");

        // The first run's stream is unaffected.
        run.on_token("second");
        run.on_end(serde_json::json!({}));

        let events = drain(&mut h.rx);
        let texts: Vec<_> = events
            .iter()
            .filter_map(|e| match &e.event {
                EventPayload::Token { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(texts, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn runs_on_different_channels_are_independent() {
        let h = harness("ch_1");
        let _run_a = h.coordinator.begin("ch_1").unwrap();
        let _run_b = h.coordinator.begin("ch_2").unwrap();
        assert!(h.coordinator.is_active("ch_1"));
        assert!(h.coordinator.is_active("ch_2"));
    }

    #[tokio::test]
    async fn terminal_event_replay_is_swallowed() {
        let mut h = harness("ch_1");
        let run = h.coordinator.begin("ch_1").unwrap();

        run.on_start("gpt-4");
        run.on_end(serde_json::json!({ "text": "done" }));
        run.on_error("late failure");
        run.on_end(serde_json::json!({ "text": "again" }));
        run.on_token("late token");

        let events = drain(&mut h.rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1].event, EventPayload::GenerationCompleted { .. }));
    }

    #[tokio::test]
    async fn terminal_frees_the_channel_for_a_new_run() {
        let h = harness("ch_1");
        let run = h.coordinator.begin("ch_1").unwrap();
        run.on_start("gpt-4");
        assert!(h.coordinator.is_active("ch_1"));

        run.on_error("pipeline blew up");
        assert!(!h.coordinator.is_active("ch_1"));

        assert!(h.coordinator.begin("ch_1").is_ok());
    }

    #[tokio::test]
    async fn dropped_run_without_terminal_frees_the_channel() {
        let h = harness("ch_1");
        let run = h.coordinator.begin("ch_1").unwrap();
        run.on_start("gpt-4");
        drop(run);

        assert!(!h.coordinator.is_active("ch_1"));
        assert!(h.coordinator.begin("ch_1").is_ok());
    }

    #[tokio::test]
    async fn drop_after_terminal_does_not_free_a_successor_run() {
        let h = harness("ch_1");
        let run = h.coordinator.begin("ch_1").unwrap();
        run.on_end(serde_json::json!({}));

        // A successor claims the slot before the old handle is dropped.
        let successor = h.coordinator.begin("ch_1").unwrap();
        drop(run);
        assert!(h.coordinator.is_active("ch_1"));
        drop(successor);
    }

    #[tokio::test]
    async fn duplicate_start_is_dropped() {
        let mut h = harness("ch_1");
        let run = h.coordinator.begin("ch_1").unwrap();
        run.on_start("gpt-4");
        run.on_start("gpt-4");
        run.on_end(serde_json::json!({}));

        let events = drain(&mut h.rx);
        let starts = events
            .iter()
            .filter(|e| matches!(e.event, EventPayload::GenerationStarted { .. }))
            .count();
        assert_eq!(starts, 1);
    }
}
