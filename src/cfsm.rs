//! Communicating finite-state machines and their projection from a [`Gfsm`].
//!
//! A [`Cfsm`] holds one [`Fsm`] per process. Each FSM only carries the events
//! of its own process: local events, sends on channels it writes to, and
//! receives on channels it reads from. Channels are not part of the model
//! itself; their contents evolve when the FSMs are composed.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use log::debug;

use crate::error::{CfsmError, MissingStates, Result};
use crate::gfsm::Gfsm;
use crate::reference::PartId;
use crate::types::{ChannelId, EventType, Pid};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsmState {
    initial: bool,
    accept: bool,
    transitions: BTreeMap<EventType, BTreeSet<usize>>,
}

impl FsmState {
    pub fn new(initial: bool, accept: bool) -> Self {
        FsmState {
            initial,
            accept,
            transitions: BTreeMap::new(),
        }
    }

    pub fn is_initial(&self) -> bool {
        self.initial
    }

    pub fn is_accept(&self) -> bool {
        self.accept
    }

    pub fn transitions(&self) -> &BTreeMap<EventType, BTreeSet<usize>> {
        &self.transitions
    }

    pub fn next_states(&self, event: &EventType) -> impl Iterator<Item = usize> + '_ {
        self.transitions.get(event).into_iter().flatten().copied()
    }
}

/// The automaton of a single process. States are numbered from zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fsm {
    pid: Pid,
    states: Vec<FsmState>,
}

impl Fsm {
    pub fn new(pid: Pid) -> Self {
        Fsm {
            pid,
            states: Vec::new(),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    pub fn states(&self) -> &[FsmState] {
        &self.states
    }

    pub fn state(&self, index: usize) -> &FsmState {
        &self.states[index]
    }

    pub fn add_state(&mut self, initial: bool, accept: bool) -> usize {
        self.states.push(FsmState::new(initial, accept));
        self.states.len() - 1
    }

    /// Add a transition `from --event--> to`. The event must belong to this process.
    pub fn add_transition(&mut self, from: usize, event: EventType, to: usize) -> Result<()> {
        if event.pid() != self.pid {
            return Err(CfsmError::MalformedGfsm(format!(
                "event {} does not belong to {}",
                event, self.pid
            )));
        }
        if from >= self.states.len() || to >= self.states.len() {
            return Err(CfsmError::MalformedGfsm(format!(
                "transition S{} -> S{} out of range in FSM of {}",
                from, to, self.pid
            )));
        }
        self.states[from].transitions.entry(event).or_default().insert(to);
        Ok(())
    }

    pub fn init_states(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.states.len()).filter(|&i| self.states[i].initial)
    }

    pub fn accept_states(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.states.len()).filter(|&i| self.states[i].accept)
    }

    pub fn num_transitions(&self) -> usize {
        self.states
            .iter()
            .flat_map(|s| s.transitions.values())
            .map(|targets| targets.len())
            .sum()
    }

    pub fn alphabet(&self) -> BTreeSet<EventType> {
        self.states
            .iter()
            .flat_map(|s| s.transitions.keys().cloned())
            .collect()
    }

    /// Whether some run from an initial state reads `events` and ends in an accepting state.
    pub fn accepts(&self, events: &[EventType]) -> bool {
        let mut current: BTreeSet<usize> = self.init_states().collect();
        for event in events {
            current = current
                .iter()
                .flat_map(|&s| self.states[s].next_states(event))
                .collect();
            if current.is_empty() {
                return false;
            }
        }
        current.iter().any(|&s| self.states[s].accept)
    }

    /// At most one target per state and event, and a single initial state.
    pub fn is_deterministic(&self) -> bool {
        self.init_states().count() == 1
            && self
                .states
                .iter()
                .all(|s| s.transitions.values().all(|t| t.len() == 1))
    }
}

impl fmt::Display for Fsm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FSM {} [num-states={}]", self.pid, self.states.len())?;
        for (i, s) in self.states.iter().enumerate() {
            write!(f, "\n  S{}", i)?;
            if s.initial {
                write!(f, " init")?;
            }
            if s.accept {
                write!(f, " accept")?;
            }
            for (event, targets) in &s.transitions {
                for t in targets {
                    write!(f, "\n    {} -> S{}", event, t)?;
                }
            }
        }
        Ok(())
    }
}

/// A system of communicating FSMs, one per process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cfsm {
    channel_ids: Vec<ChannelId>,
    fsms: Vec<Fsm>,
}

impl Cfsm {
    /// Assemble a CFSM; `fsms[i]` must belong to process `i`.
    pub fn new(channel_ids: Vec<ChannelId>, fsms: Vec<Fsm>) -> Result<Self> {
        for (i, fsm) in fsms.iter().enumerate() {
            if fsm.pid().index() != i {
                return Err(CfsmError::MalformedGfsm(format!(
                    "FSM at position {} belongs to {}",
                    i,
                    fsm.pid()
                )));
            }
            for event in fsm.alphabet() {
                if let Some(c) = event.channel() {
                    if !channel_ids.contains(&c) {
                        return Err(CfsmError::MalformedGfsm(format!(
                            "event {} uses undeclared channel",
                            event
                        )));
                    }
                }
            }
        }
        Ok(Cfsm { channel_ids, fsms })
    }

    pub fn num_processes(&self) -> usize {
        self.fsms.len()
    }

    pub fn channel_ids(&self) -> &[ChannelId] {
        &self.channel_ids
    }

    pub fn fsm(&self, pid: Pid) -> &Fsm {
        &self.fsms[pid.index()]
    }

    pub fn fsms(&self) -> &[Fsm] {
        &self.fsms
    }

    pub fn alphabet(&self) -> BTreeSet<EventType> {
        self.fsms.iter().flat_map(|f| f.alphabet()).collect()
    }
}

impl fmt::Display for Cfsm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CFSM[num-processes={}]", self.fsms.len())?;
        for fsm in &self.fsms {
            write!(f, "\n{}", fsm)?;
        }
        Ok(())
    }
}

impl Gfsm {
    /// Project the GFSM onto every process.
    pub fn to_cfsm(&self) -> Result<Cfsm> {
        let fsms = self.pids().map(|pid| self.project(pid)).collect::<Result<Vec<_>>>()?;
        Cfsm::new(self.channel_ids().to_vec(), fsms)
    }

    /// Project the GFSM onto process `pid`.
    ///
    /// Partitions reachable from the initial partitions of `pid` that are
    /// connected by transitions of other processes are indistinguishable to
    /// `pid` and collapse into one FSM state. A transition of another process
    /// does not connect two partitions when the source also reaches the same
    /// target through an event of `pid`. Transitions on events of `pid` become
    /// the FSM transitions. States are numbered in discovery order.
    pub fn project(&self, pid: Pid) -> Result<Fsm> {
        // Partitions reachable from the initial ones, in breadth-first order.
        let mut order: Vec<PartId> = Vec::new();
        let mut seen: BTreeSet<PartId> = BTreeSet::new();
        let mut queue: VecDeque<PartId> = self.init_partitions_for_pid(pid).into_iter().collect();
        seen.extend(queue.iter().copied());
        while let Some(part) = queue.pop_front() {
            order.push(part);
            let summary = self.summary(part);
            for targets in summary.transitions().values() {
                for &t in targets {
                    if seen.insert(t) {
                        queue.push_back(t);
                    }
                }
            }
        }

        // Undirected adjacency through events of other processes.
        let mut glue: BTreeMap<PartId, BTreeSet<PartId>> = BTreeMap::new();
        for &part in &order {
            let summary = self.summary(part);
            let own: BTreeSet<PartId> = summary
                .transitions()
                .iter()
                .filter(|(e, _)| e.pid() == pid)
                .flat_map(|(_, t)| t.iter().copied())
                .collect();
            for (event, targets) in summary.transitions() {
                if event.pid() == pid {
                    continue;
                }
                for &t in targets.difference(&own) {
                    glue.entry(part).or_default().insert(t);
                    glue.entry(t).or_default().insert(part);
                }
            }
        }

        let mut fsm = Fsm::new(pid);
        let mut state_of: BTreeMap<PartId, usize> = BTreeMap::new();
        for &root in &order {
            if state_of.contains_key(&root) {
                continue;
            }
            let state = fsm.add_state(false, false);
            let mut worklist = vec![root];
            state_of.insert(root, state);
            while let Some(part) = worklist.pop() {
                let summary = self.summary(part);
                let s = &mut fsm.states[state];
                s.initial |= summary.is_init_for_pid(pid);
                s.accept |= summary.is_accept_for_pid(pid);
                for &next in glue.get(&part).into_iter().flatten() {
                    if !state_of.contains_key(&next) {
                        state_of.insert(next, state);
                        worklist.push(next);
                    }
                }
            }
        }

        for &part in &order {
            let from = state_of[&part];
            let summary = self.summary(part);
            for (event, targets) in summary.transitions() {
                if event.pid() != pid {
                    continue;
                }
                for t in targets {
                    fsm.add_transition(from, event.clone(), state_of[t])?;
                }
            }
        }

        if fsm.init_states().next().is_none() {
            return Err(CfsmError::EmptyProjection {
                pid,
                missing: MissingStates::Initial,
            });
        }
        if fsm.accept_states().next().is_none() {
            return Err(CfsmError::EmptyProjection {
                pid,
                missing: MissingStates::Accept,
            });
        }

        debug!(
            "project({}): {} partitions -> {} states, {} transitions",
            pid,
            order.len(),
            fsm.num_states(),
            fsm.num_transitions()
        );
        Ok(fsm)
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::channel::ChannelStore;
    use crate::gfsm::tests::send_recv_gfsm;
    use crate::observed::TraceBuilder;
    use crate::types::channel_ids;

    #[test]
    fn test_send_recv_projection() {
        let gfsm = send_recv_gfsm();
        let cfsm = gfsm.to_cfsm().unwrap();
        assert_eq!(cfsm.num_processes(), 2);

        let chans = channel_ids([(0, 1)]);
        let send = EventType::send(chans[0], "m");
        let recv = EventType::recv(chans[0], "m");

        for fsm in cfsm.fsms() {
            assert_eq!(fsm.init_states().count(), 1);
            assert_eq!(fsm.accept_states().count(), 1);
            assert_eq!(fsm.num_transitions(), 1);
            let init = fsm.init_states().next().unwrap();
            let accept = fsm.accept_states().next().unwrap();
            assert_ne!(init, accept);
            assert!(fsm.is_deterministic());
        }

        let p0 = cfsm.fsm(Pid::new(0));
        assert_eq!(p0.alphabet(), BTreeSet::from([send.clone()]));
        assert!(p0.accepts(&[send.clone()]));
        assert!(!p0.accepts(&[]));

        let p1 = cfsm.fsm(Pid::new(1));
        assert_eq!(p1.alphabet(), BTreeSet::from([recv.clone()]));
        assert!(p1.accepts(&[recv]));
        assert!(!p1.accepts(&[send]));
    }

    #[test]
    fn test_single_process_chain() {
        let store = ChannelStore::default();
        let p = Pid::new(0);
        let trace = TraceBuilder::new(1, Vec::new())
            .event(EventType::local(p, "a"))
            .event(EventType::local(p, "b"))
            .build(&store)
            .unwrap();
        let gfsm = Gfsm::new(&[trace], &store).unwrap();
        let fsm = gfsm.project(p).unwrap();

        // Both non-terminal configurations share a partition, so `a` loops.
        assert_eq!(fsm.num_states(), 2);
        let a = EventType::local(p, "a");
        let b = EventType::local(p, "b");
        assert!(fsm.accepts(&[a.clone(), b.clone()]));
        assert!(fsm.accepts(&[a.clone(), a.clone(), b.clone()]));
        assert!(fsm.accepts(&[b.clone()]));
        assert!(!fsm.accepts(&[a]));
    }

    #[test]
    fn test_projection_after_refine() {
        let store = ChannelStore::default();
        let p = Pid::new(0);
        let trace = TraceBuilder::new(1, Vec::new())
            .event(EventType::local(p, "a"))
            .event(EventType::local(p, "b"))
            .build(&store)
            .unwrap();
        let mut gfsm = Gfsm::new(&[trace], &store).unwrap();
        let part = gfsm.init_partitions()[0];
        let second: BTreeSet<_> = gfsm.observations(part).unwrap().iter().copied().skip(1).collect();
        gfsm.refine(part, &second).unwrap();

        let fsm = gfsm.project(p).unwrap();
        assert_eq!(fsm.num_states(), 3);
        let a = EventType::local(p, "a");
        let b = EventType::local(p, "b");
        assert!(fsm.accepts(&[a.clone(), b.clone()]));
        assert!(!fsm.accepts(&[a.clone(), a, b.clone()]));
        assert!(!fsm.accepts(&[b]));
    }

    #[test]
    fn test_empty_projection() {
        let mut gfsm = send_recv_gfsm();
        // Without the final configuration, p1 never accepts.
        let accept = gfsm.accept_partitions()[0];
        gfsm.remove_partition(accept).unwrap();
        let err = gfsm.to_cfsm().unwrap_err();
        assert!(matches!(
            err,
            CfsmError::EmptyProjection {
                missing: MissingStates::Accept,
                ..
            }
        ));
    }

    #[test]
    fn test_fsm_rejects_foreign_event() {
        let mut fsm = Fsm::new(Pid::new(0));
        let s = fsm.add_state(true, true);
        assert!(fsm.add_transition(s, EventType::local(Pid::new(1), "x"), s).is_err());
        assert!(fsm.add_transition(s, EventType::local(Pid::new(0), "x"), 5).is_err());
    }

    #[test]
    fn test_cfsm_order_checked() {
        let fsm = Fsm::new(Pid::new(1));
        assert!(Cfsm::new(Vec::new(), vec![fsm]).is_err());
    }

    #[test]
    fn test_display() {
        let cfsm = send_recv_gfsm().to_cfsm().unwrap();
        let s = cfsm.to_string();
        assert!(s.starts_with("CFSM[num-processes=2]"));
        assert!(s.contains("c0!m -> S1"));
    }
}
