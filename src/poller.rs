use crate::metrics::TimeSeriesPoint;
use crate::source::StatsSource;
use crate::tracker::{AppendOutcome, PartialAppend, TrackerHandle};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Change pushed to stream subscribers after each poll.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SeriesUpdate {
    Frame(AppendOutcome),
    /// Points pushed by a frame that faulted part-way through.
    Partial { frame: AppendOutcome, error: String },
    Pause { marker: TimeSeriesPoint },
}

#[derive(Debug)]
pub enum PollOutcome {
    Appended(AppendOutcome),
    /// The frame was only partially applied.
    Faulted(PartialAppend),
    Paused(TimeSeriesPoint),
    Exhausted,
}

impl PollOutcome {
    pub fn update(&self) -> Option<SeriesUpdate> {
        match self {
            PollOutcome::Appended(outcome) => Some(SeriesUpdate::Frame(outcome.clone())),
            PollOutcome::Paused(marker) => Some(SeriesUpdate::Pause {
                marker: marker.clone(),
            }),
            PollOutcome::Faulted(fault) => Some(SeriesUpdate::Partial {
                frame: fault.partial.clone(),
                error: fault.source.to_string(),
            }),
            PollOutcome::Exhausted => None,
        }
    }
}

/// Fetches one frame and applies it; a failed fetch inserts a pause marker.
pub async fn poll_once<S: StatsSource>(tracker: &TrackerHandle, source: &mut S) -> PollOutcome {
    match source.next_frame().await {
        Ok(Some(frame)) => {
            let result = tracker.write().append(&frame);
            match result {
                Ok(outcome) => PollOutcome::Appended(outcome),
                Err(e) => {
                    warn!("{}", e);
                    PollOutcome::Faulted(e)
                }
            }
        }
        Ok(None) => PollOutcome::Exhausted,
        Err(e) => {
            warn!("Failed to fetch stats frame, marking gap: {}", e);
            let marker = tracker.write().pause();
            PollOutcome::Paused(marker)
        }
    }
}

pub async fn run_poller<S: StatsSource>(
    tracker: TrackerHandle,
    mut source: S,
    interval: Duration,
    updates: broadcast::Sender<SeriesUpdate>,
    cancel: CancellationToken,
) {
    let url = tracker.read().url();
    info!("Polling {} every {:?}", url, interval);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                break;
            }
            _ = ticker.tick() => {}
        }

        let outcome = poll_once(&tracker, &mut source).await;
        if let PollOutcome::Exhausted = outcome {
            info!("Stats source exhausted; polling stopped");
            break;
        }
        if let Some(update) = outcome.update() {
            if let Err(e) = updates.send(update) {
                // No subscribers; the tracker stays the source of truth.
                debug!("No stream subscribers for update: {}", e);
            }
        }
    }
}
