//! Per-source lanes: single flight plus a bounded arrival-order queue

use super::CycleReport;
use crate::error::{Result, SignalError};
use crate::types::{Event, Severity, SourceId};
use dashmap::DashMap;
use std::collections::VecDeque;
use tokio::sync::oneshot;

/// An event waiting for its cycle, with the channel its report goes to
#[derive(Debug)]
pub(crate) struct Pending {
    pub(crate) event: Event,
    pub(crate) reply: oneshot::Sender<Result<CycleReport>>,
}

#[derive(Debug, Default)]
struct Lane {
    busy: bool,
    queue: VecDeque<Pending>,
}

/// How an event was admitted
#[derive(Debug)]
pub(crate) enum Admission {
    /// The lane was idle; the caller must start a worker with this event
    Start(Pending),
    /// Queued behind the in-flight cycle
    Queued {
        position: usize,
        evicted: Option<Pending>,
    },
}

/// Outcome of finishing a cycle
#[derive(Debug)]
pub(crate) enum Next {
    /// Run this event next
    Run(Pending),
    /// The lane is idle again
    Idle,
}

#[derive(Debug)]
pub(crate) struct Lanes {
    lanes: DashMap<SourceId, Lane>,
    capacity: usize,
}

impl Lanes {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            lanes: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Admit `pending` to its source's lane.
    ///
    /// When the queue is full the oldest queued non-CRITICAL event is evicted
    /// to make room. If every queued event is CRITICAL the incoming event is
    /// refused instead and handed back inside the error.
    pub(crate) fn admit(&self, pending: Pending) -> std::result::Result<Admission, (SignalError, Pending)> {
        let source = pending.event.source.clone();
        let mut lane = self.lanes.entry(source.clone()).or_default();

        if !lane.busy {
            lane.busy = true;
            return Ok(Admission::Start(pending));
        }

        let mut evicted = None;
        if lane.queue.len() >= self.capacity {
            match lane
                .queue
                .iter()
                .position(|p| p.event.severity < Severity::Critical)
            {
                Some(i) => evicted = lane.queue.remove(i),
                None => {
                    let err = SignalError::QueueOverflow {
                        source_id: source.to_string(),
                        reason: format!(
                            "{} CRITICAL events already queued, refusing {}",
                            lane.queue.len(),
                            pending.event.id
                        ),
                    };
                    return Err((err, pending));
                }
            }
        }

        lane.queue.push_back(pending);
        Ok(Admission::Queued {
            position: lane.queue.len(),
            evicted,
        })
    }

    /// Pop the next event for `source`, or mark the lane idle
    pub(crate) fn finish(&self, source: &SourceId) -> Next {
        match self.lanes.get_mut(source) {
            Some(mut lane) => match lane.queue.pop_front() {
                Some(next) => Next::Run(next),
                None => {
                    lane.busy = false;
                    Next::Idle
                }
            },
            None => Next::Idle,
        }
    }

    /// Events waiting behind the in-flight cycle for `source`
    pub(crate) fn queued(&self, source: &SourceId) -> usize {
        self.lanes.get(source).map(|lane| lane.queue.len()).unwrap_or(0)
    }

    /// Whether a cycle is in flight for `source`
    pub(crate) fn is_busy(&self, source: &SourceId) -> bool {
        self.lanes.get(source).map(|lane| lane.busy).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(id: &str, severity: Severity) -> (Pending, oneshot::Receiver<Result<CycleReport>>) {
        let (reply, rx) = oneshot::channel();
        let event = Event::new("lh-1", severity, "fault").with_id(id);
        (Pending { event, reply }, rx)
    }

    fn id_of(p: &Pending) -> &str {
        &p.event.id.0
    }

    #[test]
    fn test_first_event_starts_lane() {
        let lanes = Lanes::new(2);
        let (p, _rx) = pending("e1", Severity::Error);
        assert!(matches!(lanes.admit(p), Ok(Admission::Start(_))));
        assert!(lanes.is_busy(&SourceId::from("lh-1")));
    }

    #[test]
    fn test_queue_in_arrival_order() {
        let lanes = Lanes::new(4);
        let source = SourceId::from("lh-1");
        for id in ["e1", "e2", "e3"] {
            let (p, _rx) = pending(id, Severity::Error);
            lanes.admit(p).unwrap();
        }
        assert_eq!(lanes.queued(&source), 2);

        match lanes.finish(&source) {
            Next::Run(p) => assert_eq!(id_of(&p), "e2"),
            Next::Idle => panic!("expected e2"),
        }
        match lanes.finish(&source) {
            Next::Run(p) => assert_eq!(id_of(&p), "e3"),
            Next::Idle => panic!("expected e3"),
        }
        assert!(matches!(lanes.finish(&source), Next::Idle));
        assert!(!lanes.is_busy(&source));
    }

    #[test]
    fn test_overflow_evicts_oldest_non_critical() {
        let lanes = Lanes::new(2);
        let (p, _r0) = pending("running", Severity::Error);
        lanes.admit(p).unwrap();
        let (p, _r1) = pending("crit", Severity::Critical);
        lanes.admit(p).unwrap();
        let (p, _r2) = pending("warn", Severity::Warn);
        lanes.admit(p).unwrap();

        let (p, _r3) = pending("new", Severity::Error);
        match lanes.admit(p) {
            Ok(Admission::Queued { evicted: Some(evicted), position }) => {
                assert_eq!(id_of(&evicted), "warn");
                assert_eq!(position, 2);
            }
            other => panic!("unexpected admission: {:?}", other),
        }
    }

    #[test]
    fn test_overflow_all_critical_refuses_incoming() {
        let lanes = Lanes::new(1);
        let (p, _r0) = pending("running", Severity::Error);
        lanes.admit(p).unwrap();
        let (p, _r1) = pending("crit", Severity::Critical);
        lanes.admit(p).unwrap();

        let (p, _r2) = pending("late", Severity::Critical);
        match lanes.admit(p) {
            Err((SignalError::QueueOverflow { .. }, refused)) => assert_eq!(id_of(&refused), "late"),
            other => panic!("unexpected admission: {:?}", other),
        }
        assert_eq!(lanes.queued(&SourceId::from("lh-1")), 1);
    }
}
