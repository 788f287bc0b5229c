//! End-to-end refinement runs on a request/acknowledge protocol.
//!
//! The oracle used here is a bounded breadth-first explorer of the CFSM
//! product. It only exists to drive the loop in tests.

use std::collections::{BTreeSet, HashSet, VecDeque};

use test_log::test;

use cfsm_rs::assign::{KeepLeft, RandomAssigner};
use cfsm_rs::cfsm::Cfsm;
use cfsm_rs::channel::ChannelStore;
use cfsm_rs::error::{CfsmError, OracleError};
use cfsm_rs::gfsm::Gfsm;
use cfsm_rs::invariant::Invariant;
use cfsm_rs::observed::TraceBuilder;
use cfsm_rs::oracle::{Oracle, OracleBound, Verdict};
use cfsm_rs::paths::Counterexample;
use cfsm_rs::refine::{RefineConfig, Refiner, RefinementStatus};
use cfsm_rs::scm::{to_scm, McScmOracle, ScmConfig};
use cfsm_rs::types::{channel_ids, ChannelId, EventKind, EventType};

/// Shortest accepting run violating the invariant, up to `max_depth` events.
struct Explorer {
    max_depth: usize,
    calls: usize,
}

impl Explorer {
    fn new(max_depth: usize) -> Self {
        Explorer { max_depth, calls: 0 }
    }
}

#[derive(Clone)]
struct Node {
    states: Vec<usize>,
    channels: Vec<VecDeque<String>>,
    trace: Vec<EventType>,
}

impl Oracle for Explorer {
    fn check(&mut self, cfsm: &Cfsm, inv: &Invariant, _: &OracleBound) -> Result<Verdict, OracleError> {
        self.calls += 1;
        let fsms = cfsm.fsms();

        let mut starts: Vec<Vec<usize>> = vec![Vec::new()];
        for fsm in fsms {
            starts = starts
                .into_iter()
                .flat_map(|prefix| {
                    fsm.init_states().map(move |s| {
                        let mut v = prefix.clone();
                        v.push(s);
                        v
                    })
                })
                .collect();
        }

        let mut queue: VecDeque<Node> = starts
            .into_iter()
            .map(|states| Node {
                states,
                channels: vec![VecDeque::new(); cfsm.channel_ids().len()],
                trace: Vec::new(),
            })
            .collect();
        let mut seen = HashSet::new();

        while let Some(node) = queue.pop_front() {
            // The verdict only depends on the tracked events seen so far.
            let tracked: Vec<EventType> = node.trace.iter().filter(|e| inv.tracks(e)).cloned().collect();
            if !seen.insert((node.states.clone(), node.channels.clone(), tracked)) {
                continue;
            }

            let accepting = node.states.iter().enumerate().all(|(p, &s)| fsms[p].state(s).is_accept())
                && node.channels.iter().all(VecDeque::is_empty);
            if accepting && inv.violated(&node.trace) {
                return Ok(Verdict::Violated(Counterexample::new(node.trace)));
            }
            if node.trace.len() == self.max_depth {
                continue;
            }

            for (p, fsm) in fsms.iter().enumerate() {
                for (event, targets) in fsm.state(node.states[p]).transitions() {
                    let Some(channels) = fire(&node.channels, event) else { continue };
                    for &t in targets {
                        let mut next = Node {
                            states: node.states.clone(),
                            channels: channels.clone(),
                            trace: node.trace.clone(),
                        };
                        next.states[p] = t;
                        next.trace.push(event.clone());
                        queue.push_back(next);
                    }
                }
            }
        }
        Ok(Verdict::Satisfied)
    }
}

fn fire(channels: &[VecDeque<String>], event: &EventType) -> Option<Vec<VecDeque<String>>> {
    let mut next = channels.to_vec();
    match event.kind() {
        EventKind::Send(c) => next[c.index()].push_back(event.label().to_string()),
        EventKind::Recv(c) => {
            if next[c.index()].front().map(String::as_str) != Some(event.label()) {
                return None;
            }
            next[c.index()].pop_front();
        }
        EventKind::Local => {}
    }
    Some(next)
}

/// Replies with the given counterexamples in order, then `Satisfied`.
struct Scripted(VecDeque<Counterexample>);

impl Oracle for Scripted {
    fn check(&mut self, _: &Cfsm, _: &Invariant, _: &OracleBound) -> Result<Verdict, OracleError> {
        Ok(self.0.pop_front().map_or(Verdict::Satisfied, Verdict::Violated))
    }
}

struct Protocol {
    chans: Vec<ChannelId>,
    req: EventType,
    got_req: EventType,
    ack: EventType,
    got_ack: EventType,
}

impl Protocol {
    fn new() -> Self {
        let chans = channel_ids([(0, 1), (1, 0)]);
        Protocol {
            req: EventType::send(chans[0], "req"),
            got_req: EventType::recv(chans[0], "req"),
            ack: EventType::send(chans[1], "ack"),
            got_ack: EventType::recv(chans[1], "ack"),
            chans,
        }
    }

    /// Client sends a request, server acknowledges it.
    fn gfsm(&self, store: &ChannelStore) -> Gfsm {
        let trace = TraceBuilder::new(2, self.chans.clone())
            .events([
                self.req.clone(),
                self.got_req.clone(),
                self.ack.clone(),
                self.got_ack.clone(),
            ])
            .build(store)
            .unwrap();
        Gfsm::new(&[trace], store).unwrap()
    }
}

fn displayed(cfsm: &Cfsm) -> Vec<String> {
    cfsm.fsms().iter().map(|fsm| fsm.to_string()).collect()
}

#[test]
fn test_explorer_decides_each_invariant() {
    let store = ChannelStore::default();
    let p = Protocol::new();
    let mut gfsm = p.gfsm(&store);
    assert_eq!(gfsm.num_partitions(), 4);

    let answered = Invariant::always_followed_by(p.req.clone(), p.got_ack.clone()).unwrap();
    let last = Invariant::never_followed_by(p.got_ack.clone(), p.req.clone()).unwrap();
    // The projected server may acknowledge before any request was sent.
    let ordered = Invariant::always_precedes(p.req.clone(), p.got_ack.clone()).unwrap();
    let invariants = vec![answered.clone(), last.clone(), ordered.clone()];

    let mut refiner = Refiner::new(Explorer::new(6), KeepLeft);
    let report = refiner.run(&mut gfsm, &invariants).unwrap();

    assert_eq!(report.status, RefinementStatus::Converged);
    assert_eq!(report.satisfied, vec![answered.clone(), last.clone()]);
    assert_eq!(report.unsatisfiable, vec![ordered]);
    assert!(report.unsatisfied.is_empty());
    assert_eq!(report.rounds, 2);
    assert_eq!(report.oracle_calls, 5);
    assert_eq!(refiner.oracle().calls, 5);
    assert_eq!(gfsm.num_partitions(), 4);

    let mut explorer = Explorer::new(6);
    for inv in &report.satisfied {
        let verdict = explorer.check(&report.cfsm, inv, &OracleBound::default()).unwrap();
        assert!(verdict.is_satisfied(), "{} should hold on the final model", inv);
    }
}

#[test]
fn test_spurious_counterexample_splits_initial_partition() {
    let store = ChannelStore::default();
    let p = Protocol::new();
    let mut gfsm = p.gfsm(&store);
    let observations = gfsm.num_observations();

    // The server acknowledges before it has received the request.
    let inv = Invariant::always_precedes(p.got_req.clone(), p.ack.clone()).unwrap();
    let cex = Counterexample::new(vec![p.req.clone(), p.ack.clone(), p.got_req.clone(), p.got_ack.clone()]);
    assert!(inv.violated(cex.events()));
    assert!(gfsm.find_complete_paths(&cex).is_empty());

    let oracle = Scripted(VecDeque::from([cex]));
    let mut refiner = Refiner::new(oracle, RandomAssigner::seeded(42));
    let report = refiner.run(&mut gfsm, &[inv.clone()]).unwrap();

    assert!(report.is_converged());
    assert_eq!(report.satisfied, vec![inv]);
    assert_eq!(report.rounds, 2);
    assert_eq!(gfsm.num_partitions(), 5);
    assert_eq!(gfsm.num_observations(), observations);
    gfsm.check_partitioning().unwrap();

    // The client now has to send before it can receive the acknowledgement.
    let client = report.cfsm.fsm(p.req.pid());
    assert!(client.accepts(&[p.req.clone(), p.got_ack.clone()]));
    assert!(!client.accepts(&[p.req.clone(), p.req.clone(), p.got_ack.clone()]));
    assert!(!client.accepts(&[p.got_ack.clone()]));
}

#[test]
fn test_seeded_runs_agree() {
    let p = Protocol::new();
    let inv = Invariant::always_precedes(p.got_req.clone(), p.ack.clone()).unwrap();
    let cex = Counterexample::new(vec![p.req.clone(), p.ack.clone(), p.got_req.clone(), p.got_ack.clone()]);

    let run = || {
        let store = ChannelStore::default();
        let mut gfsm = p.gfsm(&store);
        let oracle = Scripted(VecDeque::from([cex.clone()]));
        let mut refiner = Refiner::new(oracle, RandomAssigner::seeded(7));
        let report = refiner.run(&mut gfsm, &[inv.clone()]).unwrap();
        (gfsm.num_partitions(), displayed(&report.cfsm))
    };
    assert_eq!(run(), run());
}

#[test]
fn test_refined_model_serializes() {
    let store = ChannelStore::default();
    let p = Protocol::new();
    let gfsm = p.gfsm(&store);
    let cfsm = gfsm.to_cfsm().unwrap();

    let inv = Invariant::always_followed_by(p.req.clone(), p.got_ack.clone()).unwrap();
    let text = to_scm(&cfsm, &inv, &ScmConfig::default()).unwrap();
    assert!(text.contains("nb_channels = 4 ;"));
    assert!(text.contains("automaton p0 :"));
    assert!(text.contains("automaton p1 :"));
    assert!(text.contains("bad_states :"));

    let alphabet: BTreeSet<String> = cfsm.alphabet().iter().map(|e| e.label().to_string()).collect();
    assert_eq!(alphabet, BTreeSet::from(["ack".to_string(), "req".to_string()]));
}

#[test]
fn test_missing_verifier_aborts_run() {
    let store = ChannelStore::default();
    let p = Protocol::new();
    let mut gfsm = p.gfsm(&store);
    let inv = Invariant::always_followed_by(p.req.clone(), p.got_ack.clone()).unwrap();

    let oracle = McScmOracle::new("/nonexistent/verifier");
    let config = RefineConfig {
        max_oracle_retries: 0,
        ..RefineConfig::default()
    };
    let mut refiner = Refiner::with_config(oracle, KeepLeft, config);
    let result = refiner.run(&mut gfsm, &[inv]);
    assert!(matches!(result, Err(CfsmError::Oracle(OracleError::Unavailable(_)))));
    assert_eq!(gfsm.num_partitions(), 4);
}
