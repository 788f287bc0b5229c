//! Type-safe wrappers for processes, channels and event types.
//!
//! Event types are the alphabet of every automaton in this crate. Each event
//! type belongs to exactly one process: local events to the process that
//! executes them, sends to the channel's source and receives to the
//! channel's destination.
use std::fmt;

/// A process identifier (0-indexed).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Pid(u32);

impl Pid {
    pub const fn new(id: u32) -> Self {
        Pid(id)
    }

    /// Returns the raw process index.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

impl From<usize> for Pid {
    fn from(index: usize) -> Self {
        Pid(index as u32)
    }
}

/// A directed FIFO channel between two processes.
///
/// # Invariants
///
/// - `index` is the position of the channel in the system's channel list,
///   and the position of its queue in every multi-channel state.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ChannelId {
    src: Pid,
    dst: Pid,
    index: usize,
}

impl ChannelId {
    pub fn new(src: Pid, dst: Pid, index: usize) -> Self {
        ChannelId { src, dst, index }
    }

    pub fn src(&self) -> Pid {
        self.src
    }
    pub fn dst(&self) -> Pid {
        self.dst
    }
    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}({}->{})", self.index, self.src, self.dst)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum EventKind {
    Local,
    Send(ChannelId),
    Recv(ChannelId),
}

/// An event type: the label of a transition in a GFSM or in a process FSM.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct EventType {
    pid: Pid,
    kind: EventKind,
    label: String,
}

impl EventType {
    pub fn local(pid: Pid, label: impl Into<String>) -> Self {
        EventType {
            pid,
            kind: EventKind::Local,
            label: label.into(),
        }
    }

    pub fn send(channel: ChannelId, label: impl Into<String>) -> Self {
        EventType {
            pid: channel.src(),
            kind: EventKind::Send(channel),
            label: label.into(),
        }
    }

    pub fn recv(channel: ChannelId, label: impl Into<String>) -> Self {
        EventType {
            pid: channel.dst(),
            kind: EventKind::Recv(channel),
            label: label.into(),
        }
    }

    /// The process that executes this event.
    pub fn pid(&self) -> Pid {
        self.pid
    }
    pub fn kind(&self) -> EventKind {
        self.kind
    }
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The channel touched by this event, if any.
    pub fn channel(&self) -> Option<ChannelId> {
        match self.kind {
            EventKind::Local => None,
            EventKind::Send(c) | EventKind::Recv(c) => Some(c),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self.kind, EventKind::Local)
    }
    pub fn is_send(&self) -> bool {
        matches!(self.kind, EventKind::Send(_))
    }
    pub fn is_recv(&self) -> bool {
        matches!(self.kind, EventKind::Recv(_))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            EventKind::Local => write!(f, "{}.{}", self.pid, self.label),
            EventKind::Send(c) => write!(f, "c{}!{}", c.index(), self.label),
            EventKind::Recv(c) => write!(f, "c{}?{}", c.index(), self.label),
        }
    }
}

/// Builds the channel list `[(src, dst)]` with indices assigned in order.
pub fn channel_ids(pairs: impl IntoIterator<Item = (u32, u32)>) -> Vec<ChannelId> {
    pairs
        .into_iter()
        .enumerate()
        .map(|(i, (src, dst))| ChannelId::new(Pid::new(src), Pid::new(dst), i))
        .collect()
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_event_owner() {
        let c = ChannelId::new(Pid::new(0), Pid::new(1), 0);
        let send = EventType::send(c, "m");
        let recv = EventType::recv(c, "m");
        let local = EventType::local(Pid::new(1), "work");

        assert_eq!(send.pid(), Pid::new(0));
        assert_eq!(recv.pid(), Pid::new(1));
        assert_eq!(local.pid(), Pid::new(1));
        assert_eq!(send.channel(), Some(c));
        assert_eq!(local.channel(), None);
        assert!(send.is_send() && recv.is_recv() && local.is_local());
    }

    #[test]
    fn test_event_display() {
        let c = ChannelId::new(Pid::new(0), Pid::new(1), 2);
        assert_eq!(EventType::send(c, "m").to_string(), "c2!m");
        assert_eq!(EventType::recv(c, "m").to_string(), "c2?m");
        assert_eq!(EventType::local(Pid::new(3), "x").to_string(), "p3.x");
        assert_eq!(c.to_string(), "c2(p0->p1)");
    }

    #[test]
    fn test_channel_ids() {
        let ids = channel_ids([(0, 1), (1, 0)]);
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[1].index(), 1);
        assert_eq!(ids[1].src(), Pid::new(1));
        assert_eq!(ids[1].dst(), Pid::new(0));
    }

    #[test]
    fn test_send_recv_differ() {
        let c = ChannelId::new(Pid::new(0), Pid::new(1), 0);
        assert_ne!(EventType::send(c, "m"), EventType::recv(c, "m"));
        assert!(EventType::send(c, "a") < EventType::send(c, "b"));
    }
}
