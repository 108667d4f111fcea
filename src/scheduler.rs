//! Event scheduler
//!
//! An ordered queue of future in-CPU-cycle events driving the main run
//! loop: the frame interrupt, display-line updates, tape edges, disk
//! index pulses and command completions, and debugger time breakpoints.
//!
//! Events are kept sorted by target tstate with FIFO tie-break; the head's
//! tstate is cached so the hot loop compares a single integer. At end of
//! frame every entry (and the tstate counter itself) is rebased by one
//! frame length so the counters never wrap.

/// A large value meaning "no events due"
pub const NO_EVENTS: u32 = 0xFFFF_FFFF;

/// Kinds of scheduled event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// End of frame: fire the maskable interrupt and rebase counters
    Frame,
    /// Display scanline boundary
    Line,
    /// Next tape edge is due
    TapeEdge,
    /// Deliver a non-maskable interrupt
    Nmi,
    /// Floppy index pulse
    IndexPulse,
    /// Floppy controller command phase complete
    CmdDone,
    /// A time breakpoint matured
    DebuggerTime,
    /// A paging interface paged in (debugger event breakpoints)
    Page,
    /// A paging interface paged out
    Unpage,
    /// Cancelled entry, skipped on dispatch and pruned lazily
    Null,
}

/// A scheduled event
#[derive(Debug, Clone, Copy)]
pub struct Event {
    /// Target tstate within the current frame
    pub tstates: u32,
    pub kind: EventKind,
    /// Kind-specific payload (drive number, scanline, breakpoint id...)
    pub payload: u32,
}

/// The event queue
pub struct Scheduler {
    /// Sorted by tstate, ties in insertion order; index 0 is the head
    queue: Vec<Event>,
    /// Cached head tstate, NO_EVENTS when empty
    next_event: u32,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler {
            queue: Vec::new(),
            next_event: NO_EVENTS,
        }
    }

    /// The head's target tstate, for the hot-path comparison
    #[inline]
    pub fn next_event_tstates(&self) -> u32 {
        self.next_event
    }

    /// Insert an event at its sorted position. Inserting after every
    /// entry due no later keeps equal-tstate events in FIFO order.
    pub fn add(&mut self, tstates: u32, kind: EventKind, payload: u32) {
        let event = Event {
            tstates,
            kind,
            payload,
        };
        let pos = self.queue.partition_point(|e| e.tstates <= tstates);
        self.queue.insert(pos, event);
        self.next_event = self.queue[0].tstates;
    }

    /// Pop the head if it is due at or before `now`
    pub fn pop_due(&mut self, now: u32) -> Option<Event> {
        while self.next_event <= now {
            let event = self.queue.remove(0);
            self.next_event = self.queue.first().map_or(NO_EVENTS, |e| e.tstates);
            if event.kind != EventKind::Null {
                return Some(event);
            }
        }
        None
    }

    /// Cooperatively cancel all events of one kind
    pub fn cancel_kind(&mut self, kind: EventKind) {
        for event in &mut self.queue {
            if event.kind == kind {
                event.kind = EventKind::Null;
            }
        }
    }

    /// Subtract one frame length from every entry at end of frame
    pub fn rebase(&mut self, tstates_per_frame: u32) {
        for event in &mut self.queue {
            event.tstates = event.tstates.wrapping_sub(tstates_per_frame);
        }
        self.next_event = self.queue.first().map_or(NO_EVENTS, |e| e.tstates);
    }

    /// Drop everything (machine reset)
    pub fn clear(&mut self) {
        self.queue.clear();
        self.next_event = NO_EVENTS;
    }

    /// Whether any live entry of `kind` is queued
    pub fn has_kind(&self, kind: EventKind) -> bool {
        self.queue.iter().any(|e| e.kind == kind)
    }

    /// Live entries, for snapshotting and tests
    pub fn entries(&self) -> impl Iterator<Item = &Event> {
        self.queue.iter().filter(|e| e.kind != EventKind::Null)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_queue() {
        let mut sched = Scheduler::new();
        assert_eq!(sched.next_event_tstates(), NO_EVENTS);
        assert!(sched.pop_due(1_000_000).is_none());
    }

    #[test]
    fn test_ordering() {
        let mut sched = Scheduler::new();
        sched.add(300, EventKind::TapeEdge, 0);
        sched.add(100, EventKind::Frame, 0);
        sched.add(200, EventKind::Line, 5);

        assert_eq!(sched.next_event_tstates(), 100);
        assert_eq!(sched.pop_due(400).unwrap().kind, EventKind::Frame);
        assert_eq!(sched.pop_due(400).unwrap().kind, EventKind::Line);
        assert_eq!(sched.pop_due(400).unwrap().kind, EventKind::TapeEdge);
        assert!(sched.pop_due(400).is_none());
    }

    #[test]
    fn test_fifo_tie_break() {
        let mut sched = Scheduler::new();
        sched.add(100, EventKind::Line, 1);
        sched.add(100, EventKind::Line, 2);
        sched.add(100, EventKind::Line, 3);

        assert_eq!(sched.pop_due(100).unwrap().payload, 1);
        assert_eq!(sched.pop_due(100).unwrap().payload, 2);
        assert_eq!(sched.pop_due(100).unwrap().payload, 3);
    }

    #[test]
    fn test_not_due_yet() {
        let mut sched = Scheduler::new();
        sched.add(500, EventKind::Frame, 0);
        assert!(sched.pop_due(499).is_none());
        assert!(sched.pop_due(500).is_some());
    }

    #[test]
    fn test_cancel_kind_skipped() {
        let mut sched = Scheduler::new();
        sched.add(100, EventKind::TapeEdge, 0);
        sched.add(200, EventKind::Frame, 0);
        sched.cancel_kind(EventKind::TapeEdge);

        assert_eq!(sched.pop_due(300).unwrap().kind, EventKind::Frame);
        assert!(sched.pop_due(300).is_none());
    }

    #[test]
    fn test_rebase() {
        let mut sched = Scheduler::new();
        sched.add(70_000, EventKind::TapeEdge, 0);
        sched.rebase(69_888);
        assert_eq!(sched.next_event_tstates(), 112);
    }
}
