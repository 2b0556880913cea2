//! Stack event observer.
//!
//! While a stack update is in flight the observer polls its event stream in
//! the background and logs each new event, so a long migration shows
//! progress instead of a silent wait.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::stack::{StackClient, StackEvent};

/// Background observer over one stack's event stream.
#[derive(Debug)]
pub struct StackEventObserver {
    handle: JoinHandle<()>,
}

impl StackEventObserver {
    /// Starts observing a stack's events in a background task.
    #[must_use]
    pub fn attach(
        client: Arc<dyn StackClient>,
        stack_name: &str,
        poll_interval_secs: u64,
    ) -> Self {
        let stack_name = stack_name.to_string();
        let interval = Duration::from_secs(poll_interval_secs.max(1));

        let handle = tokio::spawn(async move {
            let mut seen = HashSet::new();
            loop {
                match client.stack_events(&stack_name).await {
                    Ok(events) => {
                        // Events arrive newest-first; log them oldest-first.
                        for event in filter_new_events(&mut seen, events).into_iter().rev() {
                            info!(
                                "[{stack_name}] {} {}{}",
                                event.logical_resource_id,
                                event.resource_status,
                                event
                                    .reason
                                    .as_deref()
                                    .map(|r| format!(" ({r})"))
                                    .unwrap_or_default()
                            );
                        }
                    }
                    Err(e) => {
                        // Event polling is best-effort; the update itself is
                        // tracked elsewhere.
                        debug!("Event poll for {stack_name} failed: {e}");
                    }
                }
                tokio::time::sleep(interval).await;
            }
        });

        Self { handle }
    }

    /// Stops the observer.
    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for StackEventObserver {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Keeps only events not seen before, recording them as seen.
fn filter_new_events(seen: &mut HashSet<String>, events: Vec<StackEvent>) -> Vec<StackEvent> {
    events
        .into_iter()
        .filter(|event| seen.insert(event.event_id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str) -> StackEvent {
        StackEvent {
            event_id: id.to_string(),
            timestamp: None,
            logical_resource_id: String::from("TodoTable"),
            resource_status: String::from("UPDATE_IN_PROGRESS"),
            reason: None,
        }
    }

    #[test]
    fn test_events_are_deduplicated_across_polls() {
        let mut seen = HashSet::new();

        let first = filter_new_events(&mut seen, vec![event("a"), event("b")]);
        assert_eq!(first.len(), 2);

        // The second poll repeats old events and adds one new one.
        let second = filter_new_events(&mut seen, vec![event("c"), event("b"), event("a")]);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].event_id, "c");
    }
}
