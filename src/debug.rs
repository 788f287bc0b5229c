//! Debug utilities for inspecting a GFSM.
//!
//! These helpers dump partitions together with the concrete configurations
//! they hold, which the compact [`Display`][std::fmt::Display] of
//! [`Gfsm`] leaves out. They are mostly useful in tests and while tracing a
//! refinement run.

use std::fmt;

use crate::channel::ChannelStore;
use crate::error::Result;
use crate::gfsm::Gfsm;
use crate::reference::{ObsId, PartId};
use crate::types::{EventType, Pid};

/// One observed configuration, resolved against its channel store.
#[derive(Debug, Clone)]
pub struct ObservationInfo {
    pub obs: ObsId,
    /// Local state index of every process.
    pub locals: Vec<u32>,
    /// Rendered channel contents.
    pub channels: String,
    pub initial: bool,
    pub accept: bool,
}

impl fmt::Display for ObservationInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?} {}", self.obs, self.locals, self.channels)?;
        if self.initial {
            write!(f, " [init]")?;
        }
        if self.accept {
            write!(f, " [accept]")?;
        }
        Ok(())
    }
}

/// Detailed information about a single partition.
#[derive(Debug, Clone)]
pub struct PartitionInfo {
    pub part: PartId,
    pub initial: bool,
    pub accept: bool,
    /// Processes for which some member is in its initial local state.
    pub init_for: Vec<Pid>,
    /// Processes for which some member is in a terminal local state.
    pub accept_for: Vec<Pid>,
    pub observations: Vec<ObservationInfo>,
    pub transitions: Vec<(EventType, Vec<PartId>)>,
}

impl fmt::Display for PartitionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.part)?;
        if self.initial {
            write!(f, " (initial)")?;
        }
        if self.accept {
            write!(f, " (accept)")?;
        }
        write!(f, " init-for={:?} accept-for={:?}", pids(&self.init_for), pids(&self.accept_for))?;
        for o in &self.observations {
            write!(f, "\n    {}", o)?;
        }
        for (event, targets) in &self.transitions {
            write!(f, "\n    {} -> {:?}", event, parts(targets))?;
        }
        Ok(())
    }
}

fn pids(pids: &[Pid]) -> Vec<String> {
    pids.iter().map(Pid::to_string).collect()
}

fn parts(parts: &[PartId]) -> Vec<String> {
    parts.iter().map(PartId::to_string).collect()
}

/// Every live partition of a GFSM, in id order.
#[derive(Debug, Clone)]
pub struct GfsmDump {
    pub partitions: Vec<PartitionInfo>,
}

impl fmt::Display for GfsmDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GFSM dump ({} partitions):", self.partitions.len())?;
        for p in &self.partitions {
            write!(f, "\n  {}", p)?;
        }
        Ok(())
    }
}

impl Gfsm {
    /// Get detailed information about a single partition.
    ///
    /// `store` must be the store the traces were built with.
    pub fn partition_info(&self, part: PartId, store: &ChannelStore) -> Result<PartitionInfo> {
        let members = self.observations(part)?;
        let summary = self.summary(part);

        let observations = members
            .iter()
            .map(|&obs| {
                let o = self.observation(obs);
                let config = o.config();
                ObservationInfo {
                    obs,
                    locals: self.pids().map(|p| config.local(p)).collect(),
                    channels: store.get(config.channels()).to_string(),
                    initial: o.is_initial(),
                    accept: o.is_accept(),
                }
            })
            .collect();

        Ok(PartitionInfo {
            part,
            initial: summary.is_initial(),
            accept: summary.is_accept(),
            init_for: self.pids().filter(|&p| summary.is_init_for_pid(p)).collect(),
            accept_for: self.pids().filter(|&p| summary.is_accept_for_pid(p)).collect(),
            observations,
            transitions: summary
                .transitions()
                .iter()
                .map(|(e, targets)| (e.clone(), targets.iter().copied().collect()))
                .collect(),
        })
    }

    pub fn debug_dump(&self, store: &ChannelStore) -> Result<GfsmDump> {
        let partitions = self
            .partition_ids()
            .map(|part| self.partition_info(part, store))
            .collect::<Result<Vec<_>>>()?;
        Ok(GfsmDump { partitions })
    }

    /// Print every partition with its member configurations.
    pub fn debug_string(&self, store: &ChannelStore) -> Result<String> {
        self.debug_dump(store).map(|dump| dump.to_string())
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::observed::TraceBuilder;
    use crate::types::channel_ids;

    #[test]
    fn test_debug_string() {
        let store = ChannelStore::default();
        let chans = channel_ids([(0, 1)]);
        let trace = TraceBuilder::new(2, chans.clone())
            .event(EventType::send(chans[0], "m"))
            .event(EventType::recv(chans[0], "m"))
            .build(&store)
            .unwrap();
        let gfsm = Gfsm::new(&[trace], &store).unwrap();

        let dump = gfsm.debug_dump(&store).unwrap();
        assert_eq!(dump.partitions.len(), 3);

        let first = &dump.partitions[0];
        assert!(first.initial && !first.accept);
        assert_eq!(first.init_for, vec![Pid::new(0), Pid::new(1)]);
        assert_eq!(first.observations.len(), 1);
        assert_eq!(first.observations[0].locals, vec![0, 0]);
        assert_eq!(first.transitions.len(), 1);

        let text = gfsm.debug_string(&store).unwrap();
        assert!(text.starts_with("GFSM dump (3 partitions):"));
        assert!(text.contains("c0!m -> [\"P1\"]"));
        assert!(text.contains("[init]"));
        assert!(text.contains("[accept]"));
    }

    #[test]
    fn test_partition_info_of_removed_partition() {
        let store = ChannelStore::default();
        let trace = TraceBuilder::new(1, Vec::new())
            .event(EventType::local(Pid::new(0), "a"))
            .build(&store)
            .unwrap();
        let mut gfsm = Gfsm::new(&[trace], &store).unwrap();
        let part = gfsm.init_partitions()[0];
        gfsm.remove_partition(part).unwrap();
        assert!(gfsm.partition_info(part, &store).is_err());
    }
}
