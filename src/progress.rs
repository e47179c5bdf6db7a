//! Coarse progress surface shared by every pipeline stage.

use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Session,
    Extract,
    Merge,
    Timezone,
    PointQuery,
    Incidents,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Session => "session",
            Stage::Extract => "extract",
            Stage::Merge => "merge",
            Stage::Timezone => "timezone",
            Stage::PointQuery => "point-query",
            Stage::Incidents => "incidents",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub stage: Stage,
    pub percent: f32,
    pub status: String,
}

/// Receives progress notifications. Implementations must not block; the
/// pipeline calls `report` from worker threads.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Writes every event to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&self, event: ProgressEvent) {
        log::info!("[{}] {:>5.1}% {}", event.stage, event.percent, event.status);
    }
}

/// Forwards events to an async consumer (status bar, CLI renderer).
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    sender: UnboundedSender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new(sender: UnboundedSender<ProgressEvent>) -> Self {
        Self { sender }
    }
}

impl ProgressSink for ChannelProgress {
    fn report(&self, event: ProgressEvent) {
        // A closed receiver only means nobody is watching anymore.
        let _ = self.sender.send(event);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Percent bookkeeping for one stage with a known number of steps.
pub(crate) struct StageProgress<'a> {
    sink: &'a dyn ProgressSink,
    stage: Stage,
    total: usize,
}

impl<'a> StageProgress<'a> {
    pub(crate) fn new(sink: &'a dyn ProgressSink, stage: Stage, total: usize) -> Self {
        Self { sink, stage, total }
    }

    pub(crate) fn step(&self, done: usize, status: impl Into<String>) {
        let percent = if self.total == 0 {
            100.0
        } else {
            (done.min(self.total) as f32 / self.total as f32) * 100.0
        };
        self.sink.report(ProgressEvent {
            stage: self.stage,
            percent,
            status: status.into(),
        });
    }

    pub(crate) fn finish(&self, status: impl Into<String>) {
        self.step(self.total, status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ProgressEvent>>);

    impl ProgressSink for Recorder {
        fn report(&self, event: ProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[test]
    fn stage_progress_reports_percentages() {
        let recorder = Recorder::default();
        let progress = StageProgress::new(&recorder, Stage::Merge, 4);
        progress.step(1, "a.db");
        progress.finish("done");

        let events = recorder.0.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].percent, 25.0);
        assert_eq!(events[1].percent, 100.0);
        assert_eq!(events[1].stage, Stage::Merge);
    }

    #[test]
    fn empty_stage_is_complete() {
        let recorder = Recorder::default();
        StageProgress::new(&recorder, Stage::Extract, 0).step(0, "nothing to do");
        assert_eq!(recorder.0.lock().unwrap()[0].percent, 100.0);
    }
}
