//! Mapping counterexamples onto paths through the GFSM.
//!
//! The model checker answers with a sequence of events. The GFSM is a
//! nondeterministic automaton over partitions, so one event sequence can be
//! realized by several partition paths, or only partially by any of them.
//!
//! # Example
//!
//! ```
//! use cfsm_rs::channel::ChannelStore;
//! use cfsm_rs::gfsm::Gfsm;
//! use cfsm_rs::observed::TraceBuilder;
//! use cfsm_rs::paths::Counterexample;
//! use cfsm_rs::types::{channel_ids, EventType};
//!
//! let store = ChannelStore::default();
//! let chans = channel_ids([(0, 1)]);
//! let send = EventType::send(chans[0], "m");
//! let recv = EventType::recv(chans[0], "m");
//! let trace = TraceBuilder::new(2, chans.clone())
//!     .event(send.clone())
//!     .event(recv.clone())
//!     .build(&store)
//!     .unwrap();
//! let gfsm = Gfsm::new(&[trace], &store).unwrap();
//!
//! let cex = Counterexample::new(vec![send.clone(), recv]);
//! assert_eq!(gfsm.find_complete_paths(&cex).len(), 1);
//!
//! // Stops before the final receive, which is not an accepting end.
//! let cex = Counterexample::new(vec![send]);
//! assert!(gfsm.find_complete_paths(&cex).is_empty());
//! let partial = gfsm.find_longest_partial_path(&cex).unwrap();
//! assert_eq!(partial.len(), 2);
//! ```
//!
//! The number of paths can be exponential in the counterexample length.

use std::fmt;

use log::debug;

use crate::error::{CfsmError, Result};
use crate::gfsm::Gfsm;
use crate::reference::PartId;
use crate::types::EventType;

/// An event sequence returned by the model checker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counterexample {
    events: Vec<EventType>,
}

impl Counterexample {
    pub fn new(events: Vec<EventType>) -> Self {
        Counterexample { events }
    }

    pub fn events(&self) -> &[EventType] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl From<Vec<EventType>> for Counterexample {
    fn from(events: Vec<EventType>) -> Self {
        Counterexample::new(events)
    }
}

impl fmt::Display for Counterexample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, e) in self.events.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", e)?;
        }
        write!(f, "]")
    }
}

fn fmt_path(f: &mut fmt::Formatter<'_>, partitions: &[PartId], events: &[EventType]) -> fmt::Result {
    for (i, part) in partitions.iter().enumerate() {
        if i > 0 {
            write!(f, " --{}--> ", events[i - 1])?;
        }
        write!(f, "{}", part)?;
    }
    Ok(())
}

/// A path realizing a whole counterexample: `partitions[i] --events[i]--> partitions[i + 1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GfsmPath {
    partitions: Vec<PartId>,
    events: Vec<EventType>,
}

impl GfsmPath {
    pub fn partitions(&self) -> &[PartId] {
        &self.partitions
    }

    pub fn events(&self) -> &[EventType] {
        &self.events
    }

    /// Number of partitions on the path.
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn last(&self) -> Option<PartId> {
        self.partitions.last().copied()
    }
}

impl fmt::Display for GfsmPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_path(f, &self.partitions, &self.events)
    }
}

/// A path realizing a prefix of a counterexample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialGfsmPath {
    partitions: Vec<PartId>,
    events: Vec<EventType>,
    /// The counterexample event the last partition has no transition on
    /// (`None` if every event was consumed but the last partition does not accept).
    next_event: Option<EventType>,
}

impl PartialGfsmPath {
    pub fn partitions(&self) -> &[PartId] {
        &self.partitions
    }

    pub fn events(&self) -> &[EventType] {
        &self.events
    }

    pub fn next_event(&self) -> Option<&EventType> {
        self.next_event.as_ref()
    }

    /// Number of partitions on the path.
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn last(&self) -> Option<PartId> {
        self.partitions.last().copied()
    }
}

impl fmt::Display for PartialGfsmPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_path(f, &self.partitions, &self.events)?;
        match &self.next_event {
            Some(e) => write!(f, " -/-{}", e),
            None => write!(f, " (not accepting)"),
        }
    }
}

impl Gfsm {
    /// Iterate over the paths from an initial partition that consume all of
    /// `cex` and end on an accepting partition.
    pub fn counterexample_paths<'a>(&'a self, cex: &'a Counterexample) -> CexPaths<'a> {
        CexPaths::new(self, cex)
    }

    /// All paths realizing `cex` completely, in search order.
    pub fn find_complete_paths(&self, cex: &Counterexample) -> Vec<GfsmPath> {
        let paths: Vec<GfsmPath> = self.counterexample_paths(cex).collect();
        debug!("find_complete_paths({}): {} paths", cex, paths.len());
        paths
    }

    /// The path realizing the longest prefix of `cex`.
    ///
    /// Among equally long candidates the first one found wins. A path of a
    /// single partition did not match even the first event and is an error.
    pub fn find_longest_partial_path(&self, cex: &Counterexample) -> Result<PartialGfsmPath> {
        let mut search = self.counterexample_paths(cex);
        if search.roots.is_empty() {
            return Err(CfsmError::NoInitialPartition);
        }
        search.by_ref().for_each(drop);

        let partitions = search.longest;
        if partitions.len() <= 1 {
            return Err(CfsmError::PartialPathTooShort {
                length: partitions.len(),
            });
        }
        let consumed = partitions.len() - 1;
        let path = PartialGfsmPath {
            events: cex.events()[..consumed].to_vec(),
            next_event: cex.events().get(consumed).cloned(),
            partitions,
        };
        debug!("find_longest_partial_path({}): {}", cex, path);
        Ok(path)
    }
}

/// Frame on the exploration stack.
#[derive(Debug)]
struct StackFrame {
    part: PartId,
    /// Successors of `part` on the next counterexample event.
    targets: Vec<PartId>,
    /// Index of the next target to explore.
    next: usize,
}

/// An iterator over complete counterexample paths.
///
/// Created by [`Gfsm::counterexample_paths()`]. The search is depth-first and
/// keeps the current path on an explicit stack. The depth never exceeds the
/// counterexample length, so cycles in the GFSM do not prevent termination.
/// Along the way it remembers the longest prefix it has entered.
pub struct CexPaths<'a> {
    gfsm: &'a Gfsm,
    cex: &'a Counterexample,
    /// Initial partitions not yet explored, in reverse order.
    roots: Vec<PartId>,
    stack: Vec<StackFrame>,
    longest: Vec<PartId>,
}

impl<'a> CexPaths<'a> {
    pub fn new(gfsm: &'a Gfsm, cex: &'a Counterexample) -> Self {
        let mut roots = gfsm.init_partitions();
        roots.reverse();
        CexPaths {
            gfsm,
            cex,
            roots,
            stack: Vec::new(),
            longest: Vec::new(),
        }
    }

    fn current(&self) -> Vec<PartId> {
        self.stack.iter().map(|f| f.part).collect()
    }

    /// Push `part` onto the path; returns the path if it is now complete.
    fn enter(&mut self, part: PartId) -> Option<GfsmPath> {
        let depth = self.stack.len();
        let events = self.cex.events();
        let targets = match events.get(depth) {
            Some(e) => self.gfsm.next_partitions(part, e),
            None => Vec::new(),
        };
        self.stack.push(StackFrame { part, targets, next: 0 });

        if self.stack.len() > self.longest.len() {
            self.longest = self.current();
        }
        if depth == events.len() && self.gfsm.is_accept(part) {
            return Some(GfsmPath {
                partitions: self.current(),
                events: events.to_vec(),
            });
        }
        None
    }
}

impl Iterator for CexPaths<'_> {
    type Item = GfsmPath;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Some(frame) = self.stack.last_mut() else {
                let root = self.roots.pop()?;
                if let Some(path) = self.enter(root) {
                    return Some(path);
                }
                continue;
            };

            if frame.next < frame.targets.len() {
                let child = frame.targets[frame.next];
                frame.next += 1;
                if let Some(path) = self.enter(child) {
                    return Some(path);
                }
            } else {
                // Exhausted: backtrack
                self.stack.pop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use test_log::test;

    use super::*;
    use crate::channel::ChannelStore;
    use crate::gfsm::tests::send_recv_gfsm;
    use crate::observed::TraceBuilder;
    use crate::types::{channel_ids, Pid};

    fn events() -> (EventType, EventType) {
        let chans = channel_ids([(0, 1)]);
        (EventType::send(chans[0], "m"), EventType::recv(chans[0], "m"))
    }

    #[test]
    fn test_complete_path() {
        let gfsm = send_recv_gfsm();
        let (send, recv) = events();
        let cex = Counterexample::new(vec![send, recv]);

        let paths = gfsm.find_complete_paths(&cex);
        assert_eq!(paths.len(), 1);
        let path = &paths[0];
        assert_eq!(path.len(), 3);
        assert_eq!(path.events(), cex.events());
        assert!(gfsm.is_initial(path.partitions()[0]));
        assert!(gfsm.is_accept(path.last().unwrap()));
    }

    #[test]
    fn test_complete_paths_are_exact() {
        let store = ChannelStore::default();
        let p = Pid::new(0);
        let a = EventType::local(p, "a");
        let b = EventType::local(p, "b");
        let traces = [
            TraceBuilder::new(1, Vec::new()).events([a.clone(), a.clone(), b.clone()]).build(&store).unwrap(),
            TraceBuilder::new(1, Vec::new()).events([a.clone(), b.clone()]).build(&store).unwrap(),
        ];
        let gfsm = Gfsm::new(&traces, &store).unwrap();

        // The non-terminal partition loops on `a`, so any number of `a` works.
        for n in 0..4 {
            let mut events = vec![a.clone(); n];
            events.push(b.clone());
            let cex = Counterexample::new(events);
            for path in gfsm.find_complete_paths(&cex) {
                assert_eq!(path.events(), cex.events());
                assert_eq!(path.len(), cex.len() + 1);
                assert!(gfsm.is_accept(path.last().unwrap()));
                for (i, e) in path.events().iter().enumerate() {
                    let next = gfsm.next_partitions(path.partitions()[i], e);
                    assert!(next.contains(&path.partitions()[i + 1]));
                }
            }
            assert_eq!(gfsm.find_complete_paths(&cex).len(), 1);
        }

        // Does not end in an accepting partition.
        let cex = Counterexample::new(vec![a.clone()]);
        assert!(gfsm.find_complete_paths(&cex).is_empty());
    }

    #[test]
    fn test_multiple_paths() {
        let store = ChannelStore::default();
        let p = Pid::new(0);
        let a = EventType::local(p, "a");
        let b = EventType::local(p, "b");
        let trace = || TraceBuilder::new(1, Vec::new()).events([a.clone(), b.clone()]).build(&store).unwrap();
        let mut gfsm = Gfsm::new(&[trace(), trace()], &store).unwrap();

        // Observations o0 -a-> o1 -b-> o2 and o3 -a-> o4 -b-> o5.
        let n = gfsm.init_partitions()[0];
        let obs: Vec<_> = gfsm.observations(n).unwrap().iter().copied().collect();
        assert_eq!(obs.len(), 4);
        let x = gfsm.refine(n, &BTreeSet::from([obs[1], obs[2]])).unwrap();
        assert_eq!(gfsm.init_partitions(), vec![n, x]);

        // n -a-> x -b-> T and x -a-> n -b-> T.
        let cex = Counterexample::new(vec![a.clone(), b]);
        let paths = gfsm.find_complete_paths(&cex);
        assert_eq!(paths.len(), 2);
        assert_eq!(paths[0].partitions()[..2], [n, x]);
        assert_eq!(paths[1].partitions()[..2], [x, n]);

        // Looping on `a` never reaches an accepting partition.
        let cex = Counterexample::new(vec![a.clone(), a.clone(), a]);
        assert!(gfsm.find_complete_paths(&cex).is_empty());
        assert_eq!(gfsm.find_longest_partial_path(&cex).unwrap().len(), 4);
    }

    #[test]
    fn test_longest_partial_path() {
        let gfsm = send_recv_gfsm();
        let (send, recv) = events();

        // The second send has no transition.
        let cex = Counterexample::new(vec![send.clone(), send.clone(), recv.clone()]);
        assert!(gfsm.find_complete_paths(&cex).is_empty());
        let partial = gfsm.find_longest_partial_path(&cex).unwrap();
        assert_eq!(partial.len(), 2);
        assert_eq!(partial.events(), &[send.clone()]);
        assert_eq!(partial.next_event(), Some(&send));
        assert!(partial.to_string().contains("-/-"));
    }

    #[test]
    fn test_partial_path_all_events_consumed() {
        let gfsm = send_recv_gfsm();
        let (send, _) = events();
        let cex = Counterexample::new(vec![send]);
        let partial = gfsm.find_longest_partial_path(&cex).unwrap();
        assert_eq!(partial.len(), 2);
        assert_eq!(partial.next_event(), None);
    }

    #[test]
    fn test_partial_path_too_short() {
        let gfsm = send_recv_gfsm();
        let (_, recv) = events();
        let cex = Counterexample::new(vec![recv]);
        assert!(matches!(
            gfsm.find_longest_partial_path(&cex),
            Err(CfsmError::PartialPathTooShort { length: 1 })
        ));
        let empty = Counterexample::new(Vec::new());
        assert!(gfsm.find_longest_partial_path(&empty).is_err());
    }

    #[test]
    fn test_no_initial_partition() {
        let mut gfsm = send_recv_gfsm();
        let init = gfsm.init_partitions()[0];
        gfsm.remove_partition(init).unwrap();
        let (send, _) = events();
        let cex = Counterexample::new(vec![send]);
        assert!(gfsm.find_complete_paths(&cex).is_empty());
        assert!(matches!(
            gfsm.find_longest_partial_path(&cex),
            Err(CfsmError::NoInitialPartition)
        ));
    }

    #[test]
    fn test_display() {
        let gfsm = send_recv_gfsm();
        let (send, recv) = events();
        let cex = Counterexample::new(vec![send, recv]);
        assert_eq!(cex.to_string(), "[c0!m, c0?m]");
        let path = &gfsm.find_complete_paths(&cex)[0];
        assert_eq!(path.to_string().matches("-->").count(), 2);
    }
}
