//! Server-Sent Events stream and file watcher.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use notify::{Event as NotifyEvent, EventKind, PollWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::state::{AppState, ChangeEvent};

#[derive(Debug, Serialize)]
struct SsePayload {
    #[serde(rename = "type")]
    event_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
}

impl From<&ChangeEvent> for SsePayload {
    fn from(event: &ChangeEvent) -> Self {
        let (event_type, summary) = match event {
            ChangeEvent::ProgressChanged => ("progress_changed", None),
            ChangeEvent::PlanChanged => ("plan_changed", None),
            ChangeEvent::ConfigChanged => ("config_changed", None),
            ChangeEvent::CycleStarted => ("cycle_started", None),
            ChangeEvent::CycleFinished { summary } => ("cycle_finished", Some(summary.clone())),
        };
        SsePayload {
            event_type,
            summary,
        }
    }
}

/// SSE endpoint handler.
pub async fn events_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.event_tx.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("connected").data("{}"));

        loop {
            let change = match rx.recv().await {
                Ok(change) => change,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "SSE subscriber lagged; events dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let payload = SsePayload::from(&change);
            match Event::default().event(payload.event_type).json_data(&payload) {
                Ok(event) => yield Ok(event),
                Err(err) => warn!(error = %err, "could not encode change event"),
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

/// Start the file watcher in a background task.
pub fn start_file_watcher(state: AppState) {
    tokio::spawn(async move {
        if let Err(e) = run_file_watcher(state).await {
            warn!(error = %e, "file watcher failed");
        }
    });
}

async fn run_file_watcher(state: AppState) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::channel::<NotifyEvent>(100);

    let mut watcher = PollWatcher::new(
        move |res: Result<NotifyEvent, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.try_send(event);
            }
        },
        notify::Config::default().with_poll_interval(Duration::from_millis(250)),
    )?;

    let devloop_dir = &state.paths.devloop_dir;
    watcher.watch(devloop_dir, RecursiveMode::Recursive)?;
    info!(path = %devloop_dir.display(), "watching devloop directory");

    // Batch so a burst of writes (temp file then rename) yields one event.
    let mut pending_events: Vec<NotifyEvent> = Vec::new();
    let mut flush_tick = tokio::time::interval(Duration::from_millis(250));
    flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                pending_events.push(event);
            }
            _ = flush_tick.tick() => {
                if pending_events.is_empty() {
                    continue;
                }
                process_events(&state, &pending_events);
                pending_events.clear();
            }
        }
    }
}

fn process_events(state: &AppState, events: &[NotifyEvent]) {
    let mut progress_changed = false;
    let mut plan_changed = false;
    let mut config_changed = false;

    let paths = &state.paths;
    for event in events {
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            continue;
        }
        for path in &event.paths {
            if path == &paths.progress_path {
                progress_changed = true;
            } else if path == &paths.plan_path {
                plan_changed = true;
            } else if path == &paths.config_path {
                config_changed = true;
            }
        }
    }

    if progress_changed {
        debug!("broadcasting progress change");
        let _ = state.event_tx.send(ChangeEvent::ProgressChanged);
    }
    if plan_changed {
        debug!("broadcasting plan change");
        let _ = state.event_tx.send(ChangeEvent::PlanChanged);
    }
    if config_changed {
        debug!("broadcasting config change");
        let _ = state.event_tx.send(ChangeEvent::ConfigChanged);
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::state::testing::completed_project_state;

    fn event(kind: EventKind, path: PathBuf) -> NotifyEvent {
        NotifyEvent {
            kind,
            paths: vec![path],
            attrs: Default::default(),
        }
    }

    fn modify(path: PathBuf) -> NotifyEvent {
        event(EventKind::Modify(notify::event::ModifyKind::Any), path)
    }

    fn drain(rx: &mut broadcast::Receiver<ChangeEvent>) -> Vec<ChangeEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    #[test]
    fn repeated_progress_writes_collapse_to_one_event() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = completed_project_state(temp.path());
        let mut rx = state.event_tx.subscribe();
        let progress = state.paths.progress_path.clone();

        process_events(&state, &[modify(progress.clone()), modify(progress)]);

        assert_eq!(drain(&mut rx), vec![ChangeEvent::ProgressChanged]);
    }

    #[test]
    fn plan_and_config_changes_are_distinguished() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = completed_project_state(temp.path());
        let mut rx = state.event_tx.subscribe();

        process_events(
            &state,
            &[
                modify(state.paths.config_path.clone()),
                event(
                    EventKind::Create(notify::event::CreateKind::File),
                    state.paths.plan_path.clone(),
                ),
            ],
        );

        assert_eq!(
            drain(&mut rx),
            vec![ChangeEvent::PlanChanged, ChangeEvent::ConfigChanged]
        );
    }

    #[test]
    fn removals_and_unrelated_files_are_ignored() {
        let temp = tempfile::tempdir().expect("tempdir");
        let state = completed_project_state(temp.path());
        let mut rx = state.event_tx.subscribe();

        process_events(
            &state,
            &[
                event(
                    EventKind::Remove(notify::event::RemoveKind::File),
                    state.paths.progress_path.clone(),
                ),
                modify(state.paths.project_path.clone()),
            ],
        );

        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn cycle_finished_payload_carries_summary() {
        let payload = SsePayload::from(&ChangeEvent::CycleFinished {
            summary: "1 task(s)".to_string(),
        });
        let json = serde_json::to_string(&payload).expect("serialize");
        assert_eq!(json, r#"{"type":"cycle_finished","summary":"1 task(s)"}"#);

        let json = serde_json::to_string(&SsePayload::from(&ChangeEvent::CycleStarted))
            .expect("serialize");
        assert_eq!(json, r#"{"type":"cycle_started"}"#);
    }
}
