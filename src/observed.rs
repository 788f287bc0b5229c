//! Observed executions: per-trace DAGs of concrete global configurations.
//!
//! Log parsing is not part of this crate. Callers either assemble an
//! [`ObservedTrace`] directly, or hand a totally ordered event sequence to a
//! [`TraceBuilder`], which replays it through a [`ChannelStore`] to derive
//! every intermediate configuration.

use log::debug;

use crate::channel::ChannelStore;
use crate::error::{CfsmError, Result};
use crate::reference::ChRef;
use crate::types::{ChannelId, EventType, Pid};

/// A concrete global state observed in a trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedConfiguration {
    /// Local state index of every process (0 = the process has not executed anything yet).
    locals: Vec<u32>,
    /// Whether every process is in its last observed local state.
    terminal: Vec<bool>,
    channels: ChRef,
}

impl ObservedConfiguration {
    pub fn new(locals: Vec<u32>, terminal: Vec<bool>, channels: ChRef) -> Self {
        ObservedConfiguration {
            locals,
            terminal,
            channels,
        }
    }

    pub fn num_processes(&self) -> usize {
        self.locals.len()
    }

    pub fn local(&self, pid: Pid) -> u32 {
        self.locals[pid.index()]
    }

    pub fn channels(&self) -> ChRef {
        self.channels
    }

    pub fn is_init_for_pid(&self, pid: Pid) -> bool {
        self.locals[pid.index()] == 0
    }

    pub fn is_accept_for_pid(&self, pid: Pid) -> bool {
        self.terminal[pid.index()]
    }
}

/// One observed execution as a DAG of configurations.
#[derive(Debug, Clone)]
pub struct ObservedTrace {
    num_processes: usize,
    channel_ids: Vec<ChannelId>,
    configs: Vec<ObservedConfiguration>,
    succ: Vec<Vec<(EventType, usize)>>,
    initial: usize,
}

impl ObservedTrace {
    pub fn new(num_processes: usize, channel_ids: Vec<ChannelId>) -> Self {
        ObservedTrace {
            num_processes,
            channel_ids,
            configs: Vec::new(),
            succ: Vec::new(),
            initial: 0,
        }
    }

    pub fn num_processes(&self) -> usize {
        self.num_processes
    }
    pub fn channel_ids(&self) -> &[ChannelId] {
        &self.channel_ids
    }
    pub fn len(&self) -> usize {
        self.configs.len()
    }
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// Index of the initial configuration.
    pub fn initial(&self) -> usize {
        self.initial
    }
    pub fn set_initial(&mut self, index: usize) {
        self.initial = index;
    }

    pub fn configuration(&self, index: usize) -> &ObservedConfiguration {
        &self.configs[index]
    }

    pub fn successors(&self, index: usize) -> &[(EventType, usize)] {
        &self.succ[index]
    }

    /// Add a configuration and return its index within this trace.
    pub fn add_configuration(&mut self, config: ObservedConfiguration) -> usize {
        self.configs.push(config);
        self.succ.push(Vec::new());
        self.configs.len() - 1
    }

    pub fn add_transition(&mut self, from: usize, event: EventType, to: usize) -> Result<()> {
        if from >= self.configs.len() || to >= self.configs.len() {
            return Err(CfsmError::InvalidTrace(format!(
                "transition {} -> {} out of range (trace has {} configurations)",
                from,
                to,
                self.configs.len()
            )));
        }
        self.succ[from].push((event, to));
        Ok(())
    }

    /// Check structural well-formedness: shapes agree with the process count,
    /// events stay within the declared processes and channels, and the
    /// successor relation is acyclic.
    pub fn validate(&self) -> Result<()> {
        if self.configs.is_empty() {
            return Err(CfsmError::InvalidTrace("trace has no configurations".to_string()));
        }
        if self.initial >= self.configs.len() {
            return Err(CfsmError::InvalidTrace(format!("initial configuration {} out of range", self.initial)));
        }
        for (i, c) in self.configs.iter().enumerate() {
            if c.locals.len() != self.num_processes || c.terminal.len() != self.num_processes {
                return Err(CfsmError::InvalidTrace(format!(
                    "configuration {} describes {} processes, expected {}",
                    i,
                    c.locals.len(),
                    self.num_processes
                )));
            }
        }
        for (event, _) in self.succ.iter().flatten() {
            if event.pid().index() >= self.num_processes {
                return Err(CfsmError::InvalidTrace(format!("event {} belongs to unknown process", event)));
            }
            if let Some(c) = event.channel() {
                if !self.channel_ids.contains(&c) {
                    return Err(CfsmError::InvalidTrace(format!("event {} uses undeclared channel", event)));
                }
            }
        }

        // Kahn's algorithm: every configuration must eventually get in-degree zero.
        let mut in_degree = vec![0usize; self.configs.len()];
        for &(_, to) in self.succ.iter().flatten() {
            in_degree[to] += 1;
        }
        let mut queue: Vec<usize> = (0..self.configs.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut seen = 0;
        while let Some(i) = queue.pop() {
            seen += 1;
            for &(_, to) in &self.succ[i] {
                in_degree[to] -= 1;
                if in_degree[to] == 0 {
                    queue.push(to);
                }
            }
        }
        if seen != self.configs.len() {
            return Err(CfsmError::InvalidTrace("successor relation has a cycle".to_string()));
        }
        Ok(())
    }
}

/// Builds an [`ObservedTrace`] from a totally ordered sequence of events.
///
/// # Example
///
/// ```
/// use cfsm_rs::channel::ChannelStore;
/// use cfsm_rs::observed::TraceBuilder;
/// use cfsm_rs::types::{channel_ids, EventType};
///
/// let store = ChannelStore::default();
/// let chans = channel_ids([(0, 1)]);
/// let trace = TraceBuilder::new(2, chans.clone())
///     .event(EventType::send(chans[0], "m"))
///     .event(EventType::recv(chans[0], "m"))
///     .build(&store)
///     .unwrap();
/// assert_eq!(trace.len(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct TraceBuilder {
    num_processes: usize,
    channel_ids: Vec<ChannelId>,
    events: Vec<EventType>,
}

impl TraceBuilder {
    pub fn new(num_processes: usize, channel_ids: Vec<ChannelId>) -> Self {
        TraceBuilder {
            num_processes,
            channel_ids,
            events: Vec::new(),
        }
    }

    pub fn event(mut self, event: EventType) -> Self {
        self.events.push(event);
        self
    }

    pub fn events(mut self, events: impl IntoIterator<Item = EventType>) -> Self {
        self.events.extend(events);
        self
    }

    /// Replay the events from the all-initial, all-empty configuration.
    pub fn build(self, store: &ChannelStore) -> Result<ObservedTrace> {
        let n = self.num_processes;
        let mut totals = vec![0u32; n];
        for e in &self.events {
            let p = e.pid().index();
            if p >= n {
                return Err(CfsmError::InvalidTrace(format!("event {} belongs to unknown process", e)));
            }
            totals[p] += 1;
        }

        let mut trace = ObservedTrace::new(n, self.channel_ids.clone());
        let mut locals = vec![0u32; n];
        let terminal = |locals: &[u32]| locals.iter().zip(&totals).map(|(l, t)| l == t).collect::<Vec<_>>();

        let mut channels = store.empty(&self.channel_ids);
        let mut current = trace.add_configuration(ObservedConfiguration::new(locals.clone(), terminal(&locals), channels));
        trace.set_initial(current);

        for e in self.events {
            channels = store.apply(channels, &e)?;
            locals[e.pid().index()] += 1;
            let next = trace.add_configuration(ObservedConfiguration::new(locals.clone(), terminal(&locals), channels));
            trace.add_transition(current, e, next)?;
            current = next;
        }

        debug!("built trace with {} configurations", trace.len());
        Ok(trace)
    }
}
