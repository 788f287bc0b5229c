//! Counterexample-guided refinement of a [`Gfsm`].
//!
//! Each round projects the GFSM to a CFSM and asks the oracle about every
//! active invariant. The first violation found drives the round:
//!
//! - if the counterexample is realized completely by the GFSM, the model
//!   really exhibits it and the invariant is dropped as unsatisfiable;
//! - otherwise the longest partial realization is replayed on the concrete
//!   observations to find a partition that mixes observations which do and
//!   do not behave like the counterexample, and that partition is split.
//!
//! The run converges once a round sees no violation. Splits only ever make
//! partitions smaller, so there are at most as many splits as observations.

use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::assign::ObsAssigner;
use crate::cfsm::Cfsm;
use crate::error::{CfsmError, OracleError, Result};
use crate::gfsm::Gfsm;
use crate::invariant::Invariant;
use crate::oracle::{Oracle, OracleBound, Verdict};
use crate::paths::{Counterexample, PartialGfsmPath};
use crate::reference::{ObsId, PartId};
use crate::types::{EventType, Pid};

/// Budgets and oracle policy of a refinement run.
#[derive(Debug, Clone)]
pub struct RefineConfig {
    /// Maximum number of rounds (projection plus oracle checks).
    pub max_rounds: usize,
    /// Wall-clock budget, checked between rounds.
    pub time_budget: Option<Duration>,
    /// Bound for the first oracle call on each invariant.
    pub oracle_bound: OracleBound,
    /// How many times a timed-out oracle call is retried.
    pub max_oracle_retries: usize,
    /// Factor applied to the bound before each retry.
    pub bound_growth: u32,
}

impl Default for RefineConfig {
    fn default() -> Self {
        RefineConfig {
            max_rounds: 1000,
            time_budget: None,
            oracle_bound: OracleBound::default(),
            max_oracle_retries: 2,
            bound_growth: 2,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NonConvergence {
    IterationBudget,
    TimeBudget,
    /// No partition could be split for some violated invariant.
    Stuck,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RefinementStatus {
    Converged,
    NonConvergent(NonConvergence),
}

impl fmt::Display for RefinementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefinementStatus::Converged => write!(f, "converged"),
            RefinementStatus::NonConvergent(NonConvergence::IterationBudget) => {
                write!(f, "iteration budget exhausted")
            }
            RefinementStatus::NonConvergent(NonConvergence::TimeBudget) => write!(f, "time budget exhausted"),
            RefinementStatus::NonConvergent(NonConvergence::Stuck) => write!(f, "stuck"),
        }
    }
}

/// Outcome of [`Refiner::run`].
#[derive(Debug, Clone)]
pub struct RefinementReport {
    pub status: RefinementStatus,
    /// Projection of the GFSM as refined so far.
    pub cfsm: Cfsm,
    /// Invariants the final model satisfies (empty when a budget ran out).
    pub satisfied: Vec<Invariant>,
    /// Invariants violated by behaviors the GFSM itself realizes.
    pub unsatisfiable: Vec<Invariant>,
    /// Invariants whose status is open: still active when a budget ran out, or stuck.
    pub unsatisfied: Vec<Invariant>,
    pub rounds: usize,
    pub oracle_calls: usize,
}

impl RefinementReport {
    pub fn is_converged(&self) -> bool {
        self.status == RefinementStatus::Converged
    }
}

enum Step {
    /// Every active invariant holds.
    Clean,
    /// The invariant at this index of the active list was handled.
    Violation(usize, Handled),
}

enum Handled {
    Unsatisfiable,
    Refined(PartId),
    Stuck,
}

pub struct Refiner<O, A> {
    oracle: O,
    assigner: A,
    config: RefineConfig,
    oracle_calls: usize,
}

impl<O: Oracle, A: ObsAssigner> Refiner<O, A> {
    pub fn new(oracle: O, assigner: A) -> Self {
        Self::with_config(oracle, assigner, RefineConfig::default())
    }

    pub fn with_config(oracle: O, assigner: A, config: RefineConfig) -> Self {
        Refiner {
            oracle,
            assigner,
            config,
            oracle_calls: 0,
        }
    }

    pub fn config(&self) -> &RefineConfig {
        &self.config
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn into_oracle(self) -> O {
        self.oracle
    }

    /// Refine `gfsm` in place until every invariant is decided or a budget runs out.
    ///
    /// Partial progress is kept in `gfsm` whatever the outcome.
    pub fn run(&mut self, gfsm: &mut Gfsm, invariants: &[Invariant]) -> Result<RefinementReport> {
        let start = Instant::now();
        self.oracle_calls = 0;
        let mut active: Vec<Invariant> = invariants.to_vec();
        let mut unsatisfiable = Vec::new();
        let mut stuck = Vec::new();
        let mut rounds = 0;

        let status = loop {
            if rounds >= self.config.max_rounds {
                break RefinementStatus::NonConvergent(NonConvergence::IterationBudget);
            }
            if let Some(budget) = self.config.time_budget {
                if start.elapsed() >= budget {
                    break RefinementStatus::NonConvergent(NonConvergence::TimeBudget);
                }
            }
            rounds += 1;
            info!(
                "round {}: {} partitions, {} active invariants",
                rounds,
                gfsm.num_partitions(),
                active.len()
            );

            let cfsm = gfsm.to_cfsm()?;
            match self.round(gfsm, &cfsm, &active)? {
                Step::Clean if stuck.is_empty() => break RefinementStatus::Converged,
                Step::Clean => break RefinementStatus::NonConvergent(NonConvergence::Stuck),
                Step::Violation(i, Handled::Unsatisfiable) => {
                    info!("{} is unsatisfiable by the current model", active[i]);
                    unsatisfiable.push(active.remove(i));
                }
                Step::Violation(i, Handled::Stuck) => {
                    warn!("no split resolves the counterexample for {}", active[i]);
                    stuck.push(active.remove(i));
                }
                Step::Violation(i, Handled::Refined(part)) => {
                    debug!("split off {} for {}", part, active[i]);
                }
            }
        };

        let cfsm = gfsm.to_cfsm()?;
        // After a clean round the remaining active invariants are known to hold.
        let (satisfied, unsatisfied) = match status {
            RefinementStatus::Converged | RefinementStatus::NonConvergent(NonConvergence::Stuck) => (active, stuck),
            RefinementStatus::NonConvergent(_) => {
                stuck.extend(active);
                (Vec::new(), stuck)
            }
        };
        info!(
            "refinement {} after {} rounds and {} oracle calls: {} satisfied, {} unsatisfiable, {} open",
            status,
            rounds,
            self.oracle_calls,
            satisfied.len(),
            unsatisfiable.len(),
            unsatisfied.len()
        );
        Ok(RefinementReport {
            status,
            cfsm,
            satisfied,
            unsatisfiable,
            unsatisfied,
            rounds,
            oracle_calls: self.oracle_calls,
        })
    }

    fn round(&mut self, gfsm: &mut Gfsm, cfsm: &Cfsm, active: &[Invariant]) -> Result<Step> {
        for (i, inv) in active.iter().enumerate() {
            let cex = match self.check(cfsm, inv)? {
                Verdict::Satisfied => continue,
                Verdict::Violated(cex) => cex,
            };
            if !inv.violated(cex.events()) {
                return Err(OracleError::Protocol(format!("counterexample {} does not violate {}", cex, inv)).into());
            }
            debug!("{} violated by {}", inv, cex);

            if !gfsm.find_complete_paths(&cex).is_empty() {
                return Ok(Step::Violation(i, Handled::Unsatisfiable));
            }
            let partial = gfsm.find_longest_partial_path(&cex)?;
            let handled = match self.split_along(gfsm, &partial, inv, &cex)? {
                Some(part) => Handled::Refined(part),
                None => Handled::Stuck,
            };
            return Ok(Step::Violation(i, handled));
        }
        Ok(Step::Clean)
    }

    /// Ask the oracle, retrying with a larger bound on timeouts.
    fn check(&mut self, cfsm: &Cfsm, inv: &Invariant) -> Result<Verdict> {
        let mut bound = self.config.oracle_bound.clone();
        let mut attempt = 0;
        loop {
            self.oracle_calls += 1;
            match self.oracle.check(cfsm, inv, &bound) {
                Ok(verdict) => return Ok(verdict),
                Err(OracleError::Timeout { .. }) if attempt < self.config.max_oracle_retries => {
                    attempt += 1;
                    bound = bound.grown(self.config.bound_growth);
                    warn!(
                        "oracle timed out on {}, retry {} with timeout {:?}",
                        inv, attempt, bound.timeout
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Split a partition on `path` so that the GFSM no longer realizes it the same way.
    ///
    /// Returns the new partition, or `None` if every partition on the path is
    /// concretely consistent with it.
    fn split_along(
        &mut self,
        gfsm: &mut Gfsm,
        path: &PartialGfsmPath,
        inv: &Invariant,
        cex: &Counterexample,
    ) -> Result<Option<PartId>> {
        let parts = path.partitions();
        let reached = replay(gfsm, path)?;

        // The concrete observations stop short of the abstract path at `j`.
        if reached.len() < parts.len() {
            let j = reached.len();
            let (part, event, target) = (parts[j - 1], &path.events()[j - 1], parts[j]);
            let left = &reached[j - 1];
            let right: BTreeSet<ObsId> = gfsm
                .observations(part)?
                .iter()
                .copied()
                .filter(|&o| steps_into(gfsm, o, event, target))
                .collect();
            debug!("stitching split of {} on {}: {} reached, {} crossing", part, event, left.len(), right.len());
            let new = gfsm.refine_with_unclassified_assignment(part, left, &right, &mut self.assigner)?;
            return Ok(Some(new));
        }

        // The whole path is concrete: separate the reached observations of the
        // last partition from the ones that let the projection continue.
        let k = parts.len() - 1;
        let last = parts[k];
        let left = &reached[k];
        let all = gfsm.observations(last)?.clone();
        let rest: BTreeSet<ObsId> = all.difference(left).copied().collect();
        if !rest.is_empty() {
            let pid = path.next_event().map(EventType::pid);
            let glue: BTreeSet<ObsId> = rest.iter().copied().filter(|&o| glues(gfsm, o, pid)).collect();
            let new = if glue.is_empty() {
                gfsm.refine(last, &rest)?
            } else {
                gfsm.refine_with_unclassified_assignment(last, left, &glue, &mut self.assigner)?
            };
            debug!("terminal split of {}: {} reached, {} gluing", last, left.len(), glue.len());
            return Ok(Some(new));
        }

        // Walk back from where the violation starts to any partition with unreached observations.
        let anchor = inv.checker().anchor(cex.events()).unwrap_or(k).min(k);
        let order = (0..=anchor).rev().chain(anchor + 1..k);
        for i in order {
            let all = gfsm.observations(parts[i])?;
            if reached[i].len() < all.len() {
                let rest: BTreeSet<ObsId> = all.difference(&reached[i]).copied().collect();
                debug!("walk-back split of {} at step {}", parts[i], i);
                return gfsm.refine(parts[i], &rest).map(Some);
            }
        }
        Ok(None)
    }
}

/// Concrete observations reached along `path` from globally initial observations.
///
/// The result has one entry per step, and stops early at the first step that
/// reaches nothing.
fn replay(gfsm: &Gfsm, path: &PartialGfsmPath) -> Result<Vec<BTreeSet<ObsId>>> {
    let parts = path.partitions();
    let first: BTreeSet<ObsId> = gfsm
        .observations(parts[0])?
        .iter()
        .copied()
        .filter(|&o| gfsm.observation(o).is_initial())
        .collect();
    if first.is_empty() {
        return Err(CfsmError::MalformedGfsm(format!("{} has no initial observation", parts[0])));
    }

    let mut reached = vec![first];
    for (i, event) in path.events().iter().enumerate() {
        let next: BTreeSet<ObsId> = reached[i]
            .iter()
            .flat_map(|&o| gfsm.observation(o).successors())
            .filter(|(e, to)| e == event && gfsm.partition_of(*to) == Some(parts[i + 1]))
            .map(|(_, to)| *to)
            .collect();
        if next.is_empty() {
            break;
        }
        reached.push(next);
    }
    Ok(reached)
}

fn steps_into(gfsm: &Gfsm, obs: ObsId, event: &EventType, target: PartId) -> bool {
    gfsm.observation(obs)
        .successors()
        .iter()
        .any(|(e, to)| e == event && gfsm.partition_of(*to) == Some(target))
}

/// Whether `obs` has a transition on an event of a process other than `pid` (any event if `None`).
fn glues(gfsm: &Gfsm, obs: ObsId, pid: Option<Pid>) -> bool {
    gfsm.observation(obs)
        .successors()
        .iter()
        .any(|(e, _)| pid.map_or(true, |p| e.pid() != p))
}
