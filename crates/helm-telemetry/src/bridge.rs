//! Bridges consumer lifecycle events onto the metrics recorder.
//!
//! Subscribes to the consumer's broadcast channel and turns each event into
//! counter/gauge updates, keeping the engine free of any telemetry
//! dependency.

use std::sync::Arc;

use tokio::sync::broadcast;

use helm_core::ConsumerEvent;

use crate::metrics::MetricsRecorder;

pub struct MetricsBridge {
    recorder: Arc<MetricsRecorder>,
}

impl MetricsBridge {
    pub fn new(recorder: Arc<MetricsRecorder>) -> Self {
        Self { recorder }
    }

    /// Spawn a task draining `rx` into the recorder. The task ends when the
    /// sending side is dropped.
    pub fn start(&self, mut rx: broadcast::Receiver<ConsumerEvent>) -> tokio::task::JoinHandle<()> {
        let recorder = Arc::clone(&self.recorder);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => record(&recorder, &event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "metrics bridge lagged, dropped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

fn record(recorder: &MetricsRecorder, event: &ConsumerEvent) {
    match event {
        ConsumerEvent::CommandProcessed { success, .. } => {
            let status = if *success { "ok" } else { "failed" };
            recorder.counter_inc("commands.processed", &[("status", status)], 1);
        }
        ConsumerEvent::DuplicateDropped { .. } => {
            recorder.counter_inc("commands.duplicate", &[], 1);
        }
        ConsumerEvent::SequenceGap { .. } => {
            recorder.counter_inc("sequence.gaps", &[], 1);
        }
        ConsumerEvent::MessagesReclaimed { count, .. } => {
            recorder.counter_inc("messages.reclaimed", &[], *count as u64);
        }
        ConsumerEvent::ConsumerStarted { .. } => {
            recorder.gauge_add("consumers.active", &[], 1.0);
        }
        ConsumerEvent::ConsumerStopped { .. } => {
            recorder.gauge_add("consumers.active", &[], -1.0);
        }
    }
}
