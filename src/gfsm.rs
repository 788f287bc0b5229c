//! The GFSM: a mutable graph of partitions over observed global configurations.
//!
//! Every observed configuration of every trace belongs to exactly one
//! partition. A partition is an abstract global state: it has a transition on
//! event `e` to partition `Q` iff one of its observations has a successor on
//! `e` that belongs to `Q`. Refinement splits partitions and never merges
//! them, so the set of partitions only grows finer over a run.
//!
//! The GFSM owns all observations and partitions. Callers address them through
//! [`ObsId`] and [`PartId`] handles and query derived properties through the
//! GFSM, which computes per-partition summaries on demand and caches them
//! until the next mutation.
//!
//! # Example
//!
//! ```
//! use cfsm_rs::channel::ChannelStore;
//! use cfsm_rs::gfsm::Gfsm;
//! use cfsm_rs::observed::TraceBuilder;
//! use cfsm_rs::types::{channel_ids, EventType};
//!
//! let store = ChannelStore::default();
//! let chans = channel_ids([(0, 1)]);
//! let trace = TraceBuilder::new(2, chans.clone())
//!     .event(EventType::send(chans[0], "m"))
//!     .event(EventType::recv(chans[0], "m"))
//!     .build(&store)
//!     .unwrap();
//!
//! let gfsm = Gfsm::new(&[trace], &store).unwrap();
//! assert_eq!(gfsm.num_partitions(), 3);
//! assert_eq!(gfsm.init_partitions().len(), 1);
//! ```

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;

use log::debug;

use crate::assign::ObsAssigner;
use crate::channel::ChannelStore;
use crate::error::{CfsmError, Result};
use crate::observed::{ObservedConfiguration, ObservedTrace};
use crate::reference::{ObsId, PartId};
use crate::types::{ChannelId, EventType, Pid};

/// An observed configuration as stored in the GFSM.
#[derive(Debug, Clone)]
pub struct Observation {
    config: ObservedConfiguration,
    initial: bool,
    accept: bool,
    next: Vec<(EventType, ObsId)>,
}

impl Observation {
    pub fn config(&self) -> &ObservedConfiguration {
        &self.config
    }

    /// Every process is initial and every channel is empty.
    pub fn is_initial(&self) -> bool {
        self.initial
    }

    /// Every process is terminal and every channel is empty.
    pub fn is_accept(&self) -> bool {
        self.accept
    }

    pub fn successors(&self) -> &[(EventType, ObsId)] {
        &self.next
    }
}

/// Properties derived from the observations of one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSummary {
    initial: bool,
    accept: bool,
    init_for: Vec<bool>,
    accept_for: Vec<bool>,
    transitions: BTreeMap<EventType, BTreeSet<PartId>>,
}

impl PartitionSummary {
    pub fn is_initial(&self) -> bool {
        self.initial
    }
    pub fn is_accept(&self) -> bool {
        self.accept
    }
    pub fn is_init_for_pid(&self, pid: Pid) -> bool {
        self.init_for[pid.index()]
    }
    pub fn is_accept_for_pid(&self, pid: Pid) -> bool {
        self.accept_for[pid.index()]
    }

    /// Distinct events labelling an outgoing transition.
    pub fn transitioning_events(&self) -> impl Iterator<Item = &EventType> {
        self.transitions.keys()
    }

    pub fn has_transition(&self, event: &EventType) -> bool {
        self.transitions.contains_key(event)
    }

    /// Successor partitions on `event` (empty if there is no such transition).
    pub fn next_partitions(&self, event: &EventType) -> impl Iterator<Item = PartId> + '_ {
        self.transitions.get(event).into_iter().flatten().copied()
    }

    pub fn transitions(&self) -> &BTreeMap<EventType, BTreeSet<PartId>> {
        &self.transitions
    }
}

pub struct Gfsm {
    num_processes: usize,
    channel_ids: Vec<ChannelId>,
    observations: Vec<Observation>,
    /// Slots indexed by [`PartId`]; `None` once a partition has been removed.
    partitions: Vec<Option<BTreeSet<ObsId>>>,
    /// Partition currently holding each observation.
    owner: Vec<Option<PartId>>,
    alphabet: BTreeSet<EventType>,
    summaries: RefCell<HashMap<PartId, Rc<PartitionSummary>>>,
}

impl Gfsm {
    /// Build the initial partitioning of all configurations reachable in `traces`.
    ///
    /// Configurations are grouped by their signature: the label at the head of
    /// each channel together with the per-process terminal flags.
    pub fn new(traces: &[ObservedTrace], store: &ChannelStore) -> Result<Self> {
        let first = traces
            .first()
            .ok_or_else(|| CfsmError::InvalidTrace("no traces given".to_string()))?;
        let num_processes = first.num_processes();
        let channel_ids = first.channel_ids().to_vec();

        let mut gfsm = Gfsm {
            num_processes,
            channel_ids,
            observations: Vec::new(),
            partitions: Vec::new(),
            owner: Vec::new(),
            alphabet: BTreeSet::new(),
            summaries: RefCell::new(HashMap::new()),
        };

        type Signature = (Vec<Option<String>>, Vec<bool>);
        let mut groups: Vec<BTreeSet<ObsId>> = Vec::new();
        let mut group_of: HashMap<Signature, usize> = HashMap::new();

        for (t, trace) in traces.iter().enumerate() {
            if trace.num_processes() != num_processes || trace.channel_ids() != gfsm.channel_ids.as_slice() {
                return Err(CfsmError::InvalidTrace(format!(
                    "trace {} disagrees with trace 0 on processes or channels",
                    t
                )));
            }
            trace.validate()?;

            // Depth-first traversal from the initial configuration.
            let mut ids: Vec<Option<ObsId>> = vec![None; trace.len()];
            let mut stack = vec![trace.initial()];
            while let Some(i) = stack.pop() {
                if ids[i].is_some() {
                    continue;
                }
                let config = trace.configuration(i).clone();
                let pids = (0..num_processes).map(Pid::from);
                let empty = store.is_all_empty(config.channels());
                let initial = empty && pids.clone().all(|p| config.is_init_for_pid(p));
                let accept = empty && pids.clone().all(|p| config.is_accept_for_pid(p));
                let signature = (
                    store.top_of_queues(config.channels()),
                    pids.map(|p| config.is_accept_for_pid(p)).collect::<Vec<_>>(),
                );

                let obs = ObsId::new(gfsm.observations.len() as u32);
                gfsm.observations.push(Observation {
                    config,
                    initial,
                    accept,
                    next: Vec::new(),
                });
                ids[i] = Some(obs);

                let g = *group_of.entry(signature).or_insert_with(|| {
                    groups.push(BTreeSet::new());
                    groups.len() - 1
                });
                groups[g].insert(obs);

                for (_, to) in trace.successors(i).iter().rev() {
                    stack.push(*to);
                }
            }

            // Link successors now that every reachable configuration has an id.
            for (i, id) in ids.iter().enumerate() {
                let Some(obs) = id else { continue };
                let next = trace
                    .successors(i)
                    .iter()
                    .filter_map(|(e, to)| ids[*to].map(|o| (e.clone(), o)))
                    .collect();
                gfsm.observations[obs.index()].next = next;
            }
        }

        gfsm.owner = vec![None; gfsm.observations.len()];
        for group in groups {
            gfsm.insert_partition(group);
        }
        gfsm.recompute_alphabet();

        debug!(
            "Gfsm::new: {} observations in {} partitions",
            gfsm.observations.len(),
            gfsm.num_partitions()
        );
        Ok(gfsm)
    }
}

impl fmt::Debug for Gfsm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gfsm")
            .field("num_processes", &self.num_processes)
            .field("observations", &self.observations.len())
            .field("partitions", &self.num_partitions())
            .finish()
    }
}

impl Gfsm {
    pub fn num_processes(&self) -> usize {
        self.num_processes
    }
    pub fn channel_ids(&self) -> &[ChannelId] {
        &self.channel_ids
    }
    pub fn num_observations(&self) -> usize {
        self.observations.len()
    }
    pub fn num_partitions(&self) -> usize {
        self.partitions.iter().filter(|p| p.is_some()).count()
    }

    pub fn pids(&self) -> impl Iterator<Item = Pid> {
        (0..self.num_processes).map(Pid::from)
    }

    /// Live partitions in id order.
    pub fn partition_ids(&self) -> impl Iterator<Item = PartId> + '_ {
        self.partitions
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_some())
            .map(|(i, _)| PartId::new(i as u32))
    }

    pub fn contains(&self, part: PartId) -> bool {
        matches!(self.partitions.get(part.index()), Some(Some(_)))
    }

    pub fn observation(&self, obs: ObsId) -> &Observation {
        &self.observations[obs.index()]
    }

    /// Observations of a live partition.
    pub fn observations(&self, part: PartId) -> Result<&BTreeSet<ObsId>> {
        match self.partitions.get(part.index()) {
            Some(Some(set)) => Ok(set),
            _ => Err(CfsmError::InvalidSplit(format!("unknown partition {}", part))),
        }
    }

    pub fn partition_of(&self, obs: ObsId) -> Option<PartId> {
        self.owner.get(obs.index()).copied().flatten()
    }

    /// All events labelling some transition between partitions.
    pub fn alphabet(&self) -> &BTreeSet<EventType> {
        &self.alphabet
    }

    /// Derived properties of a live partition.
    pub fn try_summary(&self, part: PartId) -> Result<Rc<PartitionSummary>> {
        self.observations(part)?;
        Ok(self.summary(part))
    }

    /// Derived properties of `part`, computed on first use after each mutation.
    ///
    /// # Panics
    ///
    /// Panics if `part` is not a live partition.
    pub(crate) fn summary(&self, part: PartId) -> Rc<PartitionSummary> {
        if let Some(s) = self.summaries.borrow().get(&part) {
            return Rc::clone(s);
        }
        let summary = Rc::new(self.compute_summary(part));
        self.summaries.borrow_mut().insert(part, Rc::clone(&summary));
        summary
    }

    fn compute_summary(&self, part: PartId) -> PartitionSummary {
        let set = self.partitions[part.index()]
            .as_ref()
            .unwrap_or_else(|| panic!("partition {} was removed", part));

        let mut summary = PartitionSummary {
            initial: false,
            accept: false,
            init_for: vec![false; self.num_processes],
            accept_for: vec![false; self.num_processes],
            transitions: BTreeMap::new(),
        };
        for &obs in set {
            let o = &self.observations[obs.index()];
            summary.initial |= o.initial;
            summary.accept |= o.accept;
            for pid in self.pids() {
                summary.init_for[pid.index()] |= o.config.is_init_for_pid(pid);
                summary.accept_for[pid.index()] |= o.config.is_accept_for_pid(pid);
            }
            for (event, next) in &o.next {
                if let Some(target) = self.owner[next.index()] {
                    summary.transitions.entry(event.clone()).or_default().insert(target);
                }
            }
        }
        summary
    }

    // Removed partitions have no flags and no successors.
    pub fn is_initial(&self, part: PartId) -> bool {
        self.try_summary(part).is_ok_and(|s| s.is_initial())
    }
    pub fn is_accept(&self, part: PartId) -> bool {
        self.try_summary(part).is_ok_and(|s| s.is_accept())
    }
    pub fn is_init_for_pid(&self, part: PartId, pid: Pid) -> bool {
        self.try_summary(part).is_ok_and(|s| s.is_init_for_pid(pid))
    }
    pub fn is_accept_for_pid(&self, part: PartId, pid: Pid) -> bool {
        self.try_summary(part).is_ok_and(|s| s.is_accept_for_pid(pid))
    }

    pub fn next_partitions(&self, part: PartId, event: &EventType) -> Vec<PartId> {
        match self.try_summary(part) {
            Ok(s) => s.next_partitions(event).collect(),
            Err(_) => Vec::new(),
        }
    }

    fn collect_partitions(&self, pred: impl Fn(&PartitionSummary) -> bool) -> Vec<PartId> {
        self.partition_ids().filter(|&p| pred(&self.summary(p))).collect()
    }

    /// Partitions holding a globally initial observation.
    pub fn init_partitions(&self) -> Vec<PartId> {
        self.collect_partitions(|s| s.is_initial())
    }
    /// Partitions holding a globally accepting observation.
    pub fn accept_partitions(&self) -> Vec<PartId> {
        self.collect_partitions(|s| s.is_accept())
    }
    pub fn init_partitions_for_pid(&self, pid: Pid) -> Vec<PartId> {
        self.collect_partitions(|s| s.is_init_for_pid(pid))
    }
    pub fn accept_partitions_for_pid(&self, pid: Pid) -> Vec<PartId> {
        self.collect_partitions(|s| s.is_accept_for_pid(pid))
    }
}

impl Gfsm {
    fn invalidate(&self) {
        self.summaries.borrow_mut().clear();
    }

    fn recompute_alphabet(&mut self) {
        self.alphabet = self
            .observations
            .iter()
            .enumerate()
            .filter(|(i, _)| self.owner[*i].is_some())
            .flat_map(|(_, o)| o.next.iter())
            .filter(|(_, to)| self.owner[to.index()].is_some())
            .map(|(e, _)| e.clone())
            .collect();
    }

    /// Store a new partition without any checks.
    fn insert_partition(&mut self, set: BTreeSet<ObsId>) -> PartId {
        let part = PartId::new(self.partitions.len() as u32);
        for &obs in &set {
            self.owner[obs.index()] = Some(part);
        }
        debug!("new partition {} with {} observations", part, set.len());
        self.partitions.push(Some(set));
        part
    }

    /// Add partitions made of currently unassigned observations.
    pub fn add_partitions(&mut self, sets: impl IntoIterator<Item = BTreeSet<ObsId>>) -> Result<Vec<PartId>> {
        let sets: Vec<BTreeSet<ObsId>> = sets.into_iter().collect();
        let mut seen = BTreeSet::new();
        for set in &sets {
            if set.is_empty() {
                return Err(CfsmError::InvalidSplit("cannot add an empty partition".to_string()));
            }
            for &obs in set {
                if obs.index() >= self.observations.len() {
                    return Err(CfsmError::InvalidSplit(format!("unknown observation {}", obs)));
                }
                if let Some(owner) = self.owner[obs.index()] {
                    return Err(CfsmError::InvalidSplit(format!("observation {} already belongs to {}", obs, owner)));
                }
                if !seen.insert(obs) {
                    return Err(CfsmError::InvalidSplit(format!("observation {} given twice", obs)));
                }
            }
        }

        let parts = sets.into_iter().map(|set| self.insert_partition(set)).collect();
        self.invalidate();
        self.recompute_alphabet();
        Ok(parts)
    }

    /// Remove a partition and return its observations, which become unassigned.
    pub fn remove_partition(&mut self, part: PartId) -> Result<BTreeSet<ObsId>> {
        let set = self
            .partitions
            .get_mut(part.index())
            .and_then(Option::take)
            .ok_or_else(|| CfsmError::InvalidSplit(format!("unknown partition {}", part)))?;
        for &obs in &set {
            self.owner[obs.index()] = None;
        }
        debug!("removed partition {}", part);
        self.invalidate();
        self.recompute_alphabet();
        Ok(set)
    }

    /// Split `part` by extracting `subset` into a new partition, which is returned.
    ///
    /// `subset` must be a non-empty strict subset of the observations of `part`.
    pub fn refine(&mut self, part: PartId, subset: &BTreeSet<ObsId>) -> Result<PartId> {
        let set = self.observations(part)?;
        if subset.is_empty() {
            return Err(CfsmError::InvalidSplit(format!("empty subset of {}", part)));
        }
        if !subset.is_subset(set) {
            return Err(CfsmError::InvalidSplit(format!("subset is not contained in {}", part)));
        }
        if subset.len() == set.len() {
            return Err(CfsmError::InvalidSplit(format!("subset is all of {}", part)));
        }

        if let Some(Some(set)) = self.partitions.get_mut(part.index()) {
            set.retain(|obs| !subset.contains(obs));
        }
        let new_part = self.insert_partition(subset.clone());
        debug!("refine({}) -> {} + {}", part, part, new_part);
        self.invalidate();
        self.recompute_alphabet();
        Ok(new_part)
    }

    /// Split `part` into `left` (kept) and `right` (extracted into the returned partition).
    ///
    /// Observations of `part` in neither set are placed by `assigner`, in id order.
    pub fn refine_with_unclassified_assignment(
        &mut self,
        part: PartId,
        left: &BTreeSet<ObsId>,
        right: &BTreeSet<ObsId>,
        assigner: &mut dyn ObsAssigner,
    ) -> Result<PartId> {
        let set = self.observations(part)?;
        if !left.is_subset(set) || !right.is_subset(set) {
            return Err(CfsmError::InvalidSplit(format!("classified sets are not contained in {}", part)));
        }
        if !left.is_disjoint(right) {
            return Err(CfsmError::InvalidSplit("left and right sets overlap".to_string()));
        }

        let mut right = right.clone();
        let mut unclassified = 0;
        for &obs in set {
            if left.contains(&obs) || right.contains(&obs) {
                continue;
            }
            unclassified += 1;
            if !assigner.assign_left(obs) {
                right.insert(obs);
            }
        }
        debug!(
            "refine_with_unclassified_assignment({}): {} left, {} right, {} unclassified",
            part,
            left.len(),
            right.len(),
            unclassified
        );
        self.refine(part, &right)
    }

    /// Check that partitions form a set-partition of all observations.
    pub fn check_partitioning(&self) -> Result<()> {
        let mut count = vec![0usize; self.observations.len()];
        for part in self.partition_ids() {
            let set = self.observations(part)?;
            if set.is_empty() {
                return Err(CfsmError::MalformedGfsm(format!("partition {} is empty", part)));
            }
            for &obs in set {
                count[obs.index()] += 1;
                if self.owner[obs.index()] != Some(part) {
                    return Err(CfsmError::MalformedGfsm(format!("owner of {} is not {}", obs, part)));
                }
            }
        }
        if let Some(i) = count.iter().position(|&c| c != 1) {
            return Err(CfsmError::MalformedGfsm(format!(
                "observation o{} belongs to {} partitions",
                i, count[i]
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Gfsm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GFSM[num-partitions={}]", self.num_partitions())?;
        for part in self.partition_ids() {
            let s = self.summary(part);
            write!(f, "\n  {}", part)?;
            if s.is_initial() {
                write!(f, " init")?;
            }
            if s.is_accept() {
                write!(f, " accept")?;
            }
            if let Ok(set) = self.observations(part) {
                write!(f, " {{")?;
                for (i, obs) in set.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", obs)?;
                }
                write!(f, "}}")?;
            }
            for (event, targets) in s.transitions() {
                write!(f, "\n    {} ->", event)?;
                for t in targets {
                    write!(f, " {}", t)?;
                }
            }
        }
        Ok(())
    }
}
