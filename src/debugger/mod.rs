//! Debugger core: breakpoints and run control
//!
//! The run loop consults [`Debugger::check`] on every M1 fetch while any
//! breakpoint exists; memory reads/writes and port I/O are checked from
//! the bus helpers, time breakpoints are scheduled as events each frame
//! and event breakpoints are fired from paging/tape/disk code by string
//! tag. A matching breakpoint moves the debugger to `Halted`, which
//! suspends the run loop until the host calls `run` or single-steps.

pub mod disasm;
pub mod expression;

use crate::cpu::Registers;
use crate::memory::{Memory, MemorySource};

use self::expression::Expr;

/// Types of breakpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointKind {
    Execute,
    Read,
    Write,
    PortRead,
    PortWrite,
    Time,
    Event,
}

/// Lifetime of a breakpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointLife {
    Permanent,
    OneShot,
}

/// Kind-specific target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointTarget {
    /// Address breakpoints can be page-qualified; `page: None` matches
    /// the address whatever is mapped there
    Address {
        page: Option<(MemorySource, u8)>,
        offset: u16,
    },
    /// Matches any port where `port & mask == value`
    Port { port: u16, mask: u16 },
    /// Matures when the frame tstate counter reaches this value
    Time { tstates: u32 },
    /// Paging/tape/disk events by string tag; `detail` of "*" matches
    /// every detail
    Event { kind: String, detail: String },
}

/// What the loop is checking against
#[derive(Debug, Clone, Copy)]
pub enum CheckValue<'a> {
    Address(u16),
    Port(u16),
    Time(u32),
    Event { kind: &'a str, detail: &'a str },
}

/// The breakpoint record
#[derive(Debug)]
pub struct Breakpoint {
    pub id: u32,
    pub kind: BreakpointKind,
    pub target: BreakpointTarget,
    /// Skip this many matches before triggering
    pub ignore: u32,
    pub life: BreakpointLife,
    pub condition: Option<Expr>,
    /// Semicolon-separated debugger script run when triggered
    pub commands: Option<String>,
}

/// The current activity state of the debugger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// No breakpoint set
    #[default]
    Inactive,
    /// Breakpoints set, emulation running
    Active,
    /// Execution suspended
    Halted,
}

pub struct Debugger {
    breakpoints: Vec<Breakpoint>,
    next_id: u32,
    mode: Mode,
    /// Register snapshot taken at the last instruction boundary, the
    /// context conditions evaluate against
    pub regs: Registers,
    /// Command scripts from triggered breakpoints, drained by the host
    pending_commands: Vec<String>,
    /// Evaluation errors, reported as strings without halting
    pub last_error: Option<String>,
}

impl Debugger {
    pub fn new() -> Self {
        Debugger {
            breakpoints: Vec::new(),
            next_id: 1,
            mode: Mode::Inactive,
            regs: Registers::default(),
            pending_commands: Vec::new(),
            last_error: None,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn breakpoints(&self) -> &[Breakpoint] {
        &self.breakpoints
    }

    /// Whether the run loop needs to consult the debugger at all
    #[inline]
    pub fn active(&self) -> bool {
        self.mode != Mode::Inactive
    }

    pub fn halted(&self) -> bool {
        self.mode == Mode::Halted
    }

    /// Add a breakpoint; IDs are monotonically assigned and never reused
    /// within a run
    pub fn add(
        &mut self,
        kind: BreakpointKind,
        target: BreakpointTarget,
        ignore: u32,
        life: BreakpointLife,
        condition: Option<Expr>,
        commands: Option<String>,
    ) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.breakpoints.push(Breakpoint {
            id,
            kind,
            target,
            ignore,
            life,
            condition,
            commands,
        });
        if self.mode == Mode::Inactive {
            self.mode = Mode::Active;
        }
        id
    }

    pub fn remove(&mut self, id: u32) -> bool {
        let before = self.breakpoints.len();
        self.breakpoints.retain(|bp| bp.id != id);
        let removed = self.breakpoints.len() != before;
        if self.mode == Mode::Active && self.breakpoints.is_empty() {
            self.mode = Mode::Inactive;
        }
        removed
    }

    /// Remove every execute/read/write breakpoint at `offset`
    pub fn clear_at(&mut self, offset: u16) -> usize {
        let before = self.breakpoints.len();
        self.breakpoints.retain(|bp| {
            !matches!(
                (&bp.kind, &bp.target),
                (
                    BreakpointKind::Execute | BreakpointKind::Read | BreakpointKind::Write,
                    BreakpointTarget::Address { offset: o, .. },
                ) if *o == offset
            )
        });
        let removed = before - self.breakpoints.len();
        if self.mode == Mode::Active && self.breakpoints.is_empty() {
            self.mode = Mode::Inactive;
        }
        removed
    }

    pub fn remove_all(&mut self) {
        self.breakpoints.clear();
        self.next_id = 1;
        if self.mode == Mode::Active {
            self.mode = Mode::Inactive;
        }
    }

    /// Set the ignore count of breakpoint `id`
    pub fn ignore(&mut self, id: u32, count: u32) -> bool {
        match self.breakpoints.iter_mut().find(|bp| bp.id == id) {
            Some(bp) => {
                bp.ignore = count;
                true
            }
            None => false,
        }
    }

    fn target_matches(
        target: &BreakpointTarget,
        value: &CheckValue<'_>,
        memory: &Memory,
    ) -> bool {
        match (target, value) {
            (BreakpointTarget::Address { page, offset }, CheckValue::Address(addr)) => {
                if offset != addr {
                    return false;
                }
                match page {
                    None => true,
                    Some((source, page_num)) => {
                        let view = memory.read_slot((*addr >> 13) as usize);
                        view.source == *source && view.page_num == *page_num
                    }
                }
            }
            (BreakpointTarget::Port { port, mask }, CheckValue::Port(value)) => {
                value & mask == *port
            }
            (BreakpointTarget::Time { tstates }, CheckValue::Time(now)) => now >= tstates,
            (
                BreakpointTarget::Event { kind, detail },
                CheckValue::Event {
                    kind: event_kind,
                    detail: event_detail,
                },
            ) => kind == event_kind && (detail == "*" || detail == event_detail),
            _ => false,
        }
    }

    /// Check whether the debugger should trigger at this point. Walks the
    /// breakpoint list; the first live match (ignore exhausted, condition
    /// true) halts the debugger, removes the record if it is one-shot,
    /// and queues its command script.
    pub fn check(&mut self, kind: BreakpointKind, value: CheckValue<'_>, memory: &Memory) -> bool {
        match self.mode {
            Mode::Inactive => return false,
            Mode::Halted => return true,
            Mode::Active => {}
        }

        let mut triggered: Option<usize> = None;
        for (index, bp) in self.breakpoints.iter_mut().enumerate() {
            if bp.kind != kind || !Self::target_matches(&bp.target, &value, memory) {
                continue;
            }
            if bp.ignore > 0 {
                bp.ignore -= 1;
                continue;
            }
            if let Some(condition) = &bp.condition {
                match condition.evaluate(&self.regs, memory) {
                    Ok(0) => continue,
                    Ok(_) => {}
                    Err(error) => {
                        self.last_error = Some(error.to_string());
                        continue;
                    }
                }
            }
            triggered = Some(index);
            break;
        }

        if let Some(index) = triggered {
            if let Some(commands) = &self.breakpoints[index].commands {
                self.pending_commands.push(commands.clone());
            }
            if self.breakpoints[index].life == BreakpointLife::OneShot {
                self.breakpoints.remove(index);
            }
            self.mode = Mode::Halted;
            true
        } else {
            false
        }
    }

    /// Resume: Active if breakpoints remain, Inactive otherwise
    pub fn run(&mut self) {
        self.mode = if self.breakpoints.is_empty() {
            Mode::Inactive
        } else {
            Mode::Active
        };
    }

    /// Hold in Halted (the host steps the machine manually)
    pub fn halt(&mut self) {
        self.mode = Mode::Halted;
    }

    /// Queued command scripts from triggered breakpoints
    pub fn take_commands(&mut self) -> Vec<String> {
        std::mem::take(&mut self.pending_commands)
    }

    /// Time breakpoints that mature inside a frame of this length,
    /// for scheduling as events at frame start
    pub fn time_breakpoints(&self, tstates_per_frame: u32) -> Vec<u32> {
        self.breakpoints
            .iter()
            .filter_map(|bp| match bp.target {
                BreakpointTarget::Time { tstates } if tstates < tstates_per_frame => {
                    Some(tstates)
                }
                _ => None,
            })
            .collect()
    }
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execute_bp(offset: u16) -> BreakpointTarget {
        BreakpointTarget::Address { page: None, offset }
    }

    #[test]
    fn test_inactive_without_breakpoints() {
        let mut debugger = Debugger::new();
        let memory = Memory::new();
        assert_eq!(debugger.mode(), Mode::Inactive);
        assert!(!debugger.check(BreakpointKind::Execute, CheckValue::Address(0x8000), &memory));
    }

    #[test]
    fn test_execute_breakpoint_halts() {
        let mut debugger = Debugger::new();
        let memory = Memory::new();
        let id = debugger.add(
            BreakpointKind::Execute,
            execute_bp(0x8000),
            0,
            BreakpointLife::Permanent,
            None,
            None,
        );
        assert_eq!(id, 1);
        assert_eq!(debugger.mode(), Mode::Active);

        assert!(!debugger.check(BreakpointKind::Execute, CheckValue::Address(0x7FFF), &memory));
        assert!(debugger.check(BreakpointKind::Execute, CheckValue::Address(0x8000), &memory));
        assert_eq!(debugger.mode(), Mode::Halted);

        debugger.run();
        assert_eq!(debugger.mode(), Mode::Active);
    }

    #[test]
    fn test_ignore_count() {
        let mut debugger = Debugger::new();
        let memory = Memory::new();
        debugger.add(
            BreakpointKind::Execute,
            execute_bp(0x1234),
            2,
            BreakpointLife::Permanent,
            None,
            None,
        );
        assert!(!debugger.check(BreakpointKind::Execute, CheckValue::Address(0x1234), &memory));
        assert!(!debugger.check(BreakpointKind::Execute, CheckValue::Address(0x1234), &memory));
        assert!(debugger.check(BreakpointKind::Execute, CheckValue::Address(0x1234), &memory));
    }

    #[test]
    fn test_oneshot_removed_on_fire() {
        let mut debugger = Debugger::new();
        let memory = Memory::new();
        debugger.add(
            BreakpointKind::Execute,
            execute_bp(0x4000),
            0,
            BreakpointLife::OneShot,
            None,
            None,
        );
        assert!(debugger.check(BreakpointKind::Execute, CheckValue::Address(0x4000), &memory));
        assert!(debugger.breakpoints().is_empty());

        debugger.run();
        assert_eq!(debugger.mode(), Mode::Inactive);
    }

    #[test]
    fn test_condition_false_skips() {
        let mut debugger = Debugger::new();
        let memory = Memory::new();
        debugger.add(
            BreakpointKind::Execute,
            execute_bp(0x2000),
            0,
            BreakpointLife::Permanent,
            Some(Expr::parse("a == 0x42").unwrap()),
            None,
        );
        debugger.regs.a = 0x00;
        assert!(!debugger.check(BreakpointKind::Execute, CheckValue::Address(0x2000), &memory));
        debugger.regs.a = 0x42;
        assert!(debugger.check(BreakpointKind::Execute, CheckValue::Address(0x2000), &memory));
    }

    #[test]
    fn test_port_mask_matching() {
        let mut debugger = Debugger::new();
        let memory = Memory::new();
        debugger.add(
            BreakpointKind::PortWrite,
            BreakpointTarget::Port {
                port: 0x00FE,
                mask: 0x00FF,
            },
            0,
            BreakpointLife::Permanent,
            None,
            None,
        );
        assert!(debugger.check(BreakpointKind::PortWrite, CheckValue::Port(0x1CFE), &memory));
        debugger.run();
        assert!(!debugger.check(BreakpointKind::PortWrite, CheckValue::Port(0x00FD), &memory));
    }

    #[test]
    fn test_event_breakpoint_wildcard() {
        let mut debugger = Debugger::new();
        let memory = Memory::new();
        debugger.add(
            BreakpointKind::Event,
            BreakpointTarget::Event {
                kind: "divide".into(),
                detail: "*".into(),
            },
            0,
            BreakpointLife::Permanent,
            None,
            None,
        );
        assert!(debugger.check(
            BreakpointKind::Event,
            CheckValue::Event {
                kind: "divide",
                detail: "page",
            },
            &memory,
        ));
    }

    #[test]
    fn test_commands_queued() {
        let mut debugger = Debugger::new();
        let memory = Memory::new();
        debugger.add(
            BreakpointKind::Execute,
            execute_bp(0x1000),
            0,
            BreakpointLife::Permanent,
            None,
            Some("show registers; continue".into()),
        );
        debugger.check(BreakpointKind::Execute, CheckValue::Address(0x1000), &memory);
        assert_eq!(debugger.take_commands(), vec!["show registers; continue"]);
        assert!(debugger.take_commands().is_empty());
    }

    #[test]
    fn test_ids_monotonic_never_reused() {
        let mut debugger = Debugger::new();
        let a = debugger.add(
            BreakpointKind::Execute,
            execute_bp(0x1000),
            0,
            BreakpointLife::Permanent,
            None,
            None,
        );
        let b = debugger.add(
            BreakpointKind::Execute,
            execute_bp(0x2000),
            0,
            BreakpointLife::Permanent,
            None,
            None,
        );
        debugger.remove(a);
        let c = debugger.add(
            BreakpointKind::Execute,
            execute_bp(0x3000),
            0,
            BreakpointLife::Permanent,
            None,
            None,
        );
        assert!(b > a);
        assert!(c > b);
    }
}
