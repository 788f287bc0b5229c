//! Channel states and their canonicalizing store.
//!
//! A [`MultiChannelState`] is the content of every FIFO channel of the system
//! at one point of an execution. Multi-channel states are immutable once
//! created and are interned by a [`ChannelStore`]: structurally equal states
//! always resolve to the same [`ChRef`] handle, so comparing two handles is
//! the same as comparing the channel contents.
//!
//! The store belongs to one run. It is append-only (entries are never
//! evicted) and uses interior mutability without locking, so it is neither
//! `Sync` nor meant to be shared between concurrently running refinements.
//!
//! # Example
//!
//! ```
//! use cfsm_rs::channel::ChannelStore;
//! use cfsm_rs::types::{channel_ids, EventType};
//!
//! let store = ChannelStore::default();
//! let chans = channel_ids([(0, 1)]);
//! let empty = store.empty(&chans);
//!
//! let sent = store.apply(empty, &EventType::send(chans[0], "m")).unwrap();
//! assert_ne!(sent, empty);
//! let received = store.apply(sent, &EventType::recv(chans[0], "m")).unwrap();
//! assert_eq!(received, empty);
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use log::debug;

use crate::error::{CfsmError, Result};
use crate::reference::ChRef;
use crate::table::Table;
use crate::types::{ChannelId, EventType};

/// Pending message labels of one channel, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelState {
    channel: ChannelId,
    queue: VecDeque<String>,
}

impl ChannelState {
    pub fn new(channel: ChannelId) -> Self {
        ChannelState {
            channel,
            queue: VecDeque::new(),
        }
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Label at the head of the queue.
    pub fn peek(&self) -> Option<&str> {
        self.queue.front().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.queue.iter().map(String::as_str)
    }

    pub fn enqueue(&mut self, label: impl Into<String>) {
        self.queue.push_back(label.into());
    }

    /// Remove the head of the queue, which must be `expected`.
    pub fn dequeue(&mut self, expected: &str) -> Result<()> {
        match self.queue.front() {
            Some(head) if head == expected => {
                self.queue.pop_front();
                Ok(())
            }
            head => Err(CfsmError::ReplayInconsistency {
                channel: self.channel,
                expected: expected.to_string(),
                found: head.cloned(),
            }),
        }
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}:[", self.channel.index())?;
        for (i, label) in self.queue.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", label)?;
        }
        write!(f, "]")
    }
}

/// Ordered tuple of channel states, one per channel.
///
/// Unchanged channels are shared between successive states rather than copied.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MultiChannelState {
    channels: Vec<Rc<ChannelState>>,
}

impl MultiChannelState {
    pub fn new(channels: impl IntoIterator<Item = ChannelState>) -> Self {
        MultiChannelState {
            channels: channels.into_iter().map(Rc::new).collect(),
        }
    }

    /// All channels empty.
    pub fn empty(channel_ids: &[ChannelId]) -> Self {
        Self::new(channel_ids.iter().map(|&c| ChannelState::new(c)))
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, index: usize) -> &ChannelState {
        &self.channels[index]
    }

    pub fn channels(&self) -> impl Iterator<Item = &ChannelState> {
        self.channels.iter().map(|c| c.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.channels.iter().all(|c| c.is_empty())
    }

    /// Head label of every channel, in channel order.
    pub fn top_of_queues(&self) -> Vec<Option<String>> {
        self.channels.iter().map(|c| c.peek().map(str::to_string)).collect()
    }

    /// Shares the channel at `index` between `self` and `other`.
    pub fn shares_channel(&self, other: &MultiChannelState, index: usize) -> bool {
        Rc::ptr_eq(&self.channels[index], &other.channels[index])
    }
}

impl fmt::Display for MultiChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, c) in self.channels.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", c)?;
        }
        write!(f, ")")
    }
}

/// Interner for [`MultiChannelState`] values.
pub struct ChannelStore {
    table: RefCell<Table<MultiChannelState>>,
}

impl ChannelStore {
    /// Create a store with `2^bits` initial buckets.
    pub fn new(bits: usize) -> Self {
        Self {
            table: RefCell::new(Table::new(bits)),
        }
    }
}

impl Default for ChannelStore {
    fn default() -> Self {
        ChannelStore::new(10)
    }
}

impl fmt::Debug for ChannelStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table.borrow();
        f.debug_struct("ChannelStore")
            .field("size", &table.len())
            .field("buckets", &table.num_buckets())
            .finish()
    }
}

impl ChannelStore {
    /// Number of distinct states interned so far.
    pub fn len(&self) -> usize {
        self.table.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.borrow().is_empty()
    }

    /// Return the handle of the cached state equal to `state`, caching it if it is new.
    pub fn canonicalize(&self, state: MultiChannelState) -> ChRef {
        let index = self.table.borrow_mut().put(state);
        ChRef::new(index as u32)
    }

    /// The state where every channel is empty.
    pub fn empty(&self, channel_ids: &[ChannelId]) -> ChRef {
        self.canonicalize(MultiChannelState::empty(channel_ids))
    }

    /// A cheap copy of the state behind `state` (channels are shared).
    pub fn get(&self, state: ChRef) -> MultiChannelState {
        self.table.borrow()[state.index()].clone()
    }

    pub fn is_all_empty(&self, state: ChRef) -> bool {
        self.table.borrow()[state.index()].is_empty()
    }

    pub fn top_of_queues(&self, state: ChRef) -> Vec<Option<String>> {
        self.table.borrow()[state.index()].top_of_queues()
    }

    /// The channel state after executing `event` in `state`.
    ///
    /// Local events leave the state untouched and return the same handle.
    /// Sends append the event label to their channel. Receives remove the head
    /// of their channel, which must carry the event label, otherwise
    /// [`CfsmError::ReplayInconsistency`] is returned.
    pub fn apply(&self, state: ChRef, event: &EventType) -> Result<ChRef> {
        let Some(channel) = event.channel() else {
            return Ok(state);
        };

        let mut next = self.get(state);
        let index = channel.index();
        if index >= next.num_channels() || next.channels[index].channel() != channel {
            return Err(CfsmError::InvalidTrace(format!(
                "event {} uses channel {} unknown to the channel state {}",
                event, channel, next
            )));
        }

        // Only the touched channel is copied, the rest stay shared.
        let mut touched = next.channels[index].as_ref().clone();
        if event.is_send() {
            touched.enqueue(event.label());
        } else {
            touched.dequeue(event.label())?;
        }
        next.channels[index] = Rc::new(touched);

        let result = self.canonicalize(next);
        debug!("apply({}, {}) -> {}", state, event, result);
        Ok(result)
    }
}
