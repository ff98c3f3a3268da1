//! Non-fatal diagnostics surfaced to the host.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// What a report is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    /// Harmless misuse, e.g. an event submitted to a final chart.
    Warning,
    /// A guard or data model expression failed.
    Expression,
    /// An action failed.
    Action,
}

/// A diagnostic produced while executing a chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ReportKind,

    /// State whose content (or transition) was executing, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    pub message: String,
}

/// Host hook receiving every report as it is produced.
pub trait ErrorReporter: Send {
    fn report(&mut self, report: &ErrorReport);
}

impl<F> ErrorReporter for F
where
    F: FnMut(&ErrorReport) + Send,
{
    fn report(&mut self, report: &ErrorReport) {
        self(report)
    }
}

/// Bounded per-executor report log.
pub struct Reports {
    log: VecDeque<ErrorReport>,
    max: usize,
    sink: Option<Box<dyn ErrorReporter>>,
}

impl Reports {
    pub(crate) fn new(max: usize) -> Self {
        Self {
            log: VecDeque::new(),
            max,
            sink: None,
        }
    }

    pub(crate) fn set_sink(&mut self, sink: Box<dyn ErrorReporter>) {
        self.sink = Some(sink);
    }

    pub(crate) fn set_max(&mut self, max: usize) {
        self.max = max;
        while self.log.len() > self.max {
            self.log.pop_front();
        }
    }

    /// Records a report, logging it and forwarding it to the host hook.
    pub fn push(&mut self, report: ErrorReport) {
        match report.kind {
            ReportKind::Warning => {
                tracing::warn!(state = ?report.state, "{}", report.message)
            }
            ReportKind::Expression | ReportKind::Action => {
                tracing::error!(state = ?report.state, kind = ?report.kind, "{}", report.message)
            }
        }

        if let Some(sink) = self.sink.as_mut() {
            sink.report(&report);
        }

        if self.max == 0 {
            return;
        }
        if self.log.len() == self.max {
            self.log.pop_front();
        }
        self.log.push_back(report);
    }

    /// Removes and returns all retained reports, oldest first.
    pub fn drain(&mut self) -> Vec<ErrorReport> {
        self.log.drain(..).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ErrorReport> {
        self.log.iter()
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }
}

impl std::fmt::Debug for Reports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reports")
            .field("log", &self.log)
            .field("max", &self.max)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn warning(n: usize) -> ErrorReport {
        ErrorReport {
            kind: ReportKind::Warning,
            state: None,
            message: format!("w{}", n),
        }
    }

    #[test]
    fn test_bounded_log() {
        let mut reports = Reports::new(2);
        for n in 0..3 {
            reports.push(warning(n));
        }

        let drained = reports.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].message, "w1");
        assert_eq!(drained[1].message, "w2");
        assert!(reports.is_empty());
    }

    #[test]
    fn test_sink_sees_everything() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();

        let mut reports = Reports::new(0);
        reports.set_sink(Box::new(move |r: &ErrorReport| {
            sink_seen.lock().unwrap().push(r.message.clone());
        }));
        reports.push(warning(1));
        reports.push(warning(2));

        assert!(reports.is_empty());
        assert_eq!(*seen.lock().unwrap(), vec!["w1", "w2"]);
    }
}
