//! # cfsm-rs: inferring communicating state machines from traces
//!
//! **`cfsm-rs`** builds a model of a distributed system, as one finite-state
//! machine per process communicating over FIFO channels (a **CFSM**), from
//! observed executions of that system. The model is then refined against a
//! set of temporal invariants until a model checker confirms them, or until
//! refinement cannot make further progress.
//!
//! ## How it works
//!
//! Every observed global configuration (local state of each process plus the
//! content of each channel) is placed in a **partition**. The graph of
//! partitions, the [`Gfsm`][crate::gfsm::Gfsm], is an abstract global state
//! machine. Projecting it onto each process yields a CFSM. An external model
//! checker either confirms an invariant on the CFSM or returns a
//! counterexample, which is mapped back onto the partition graph to decide
//! which partition to split. This is counterexample-guided abstraction
//! refinement (CEGAR).
//!
//! ## Key Features
//!
//! - **Manager-Centric Architecture**: the [`Gfsm`][crate::gfsm::Gfsm] owns all observations and partitions, and the [`ChannelStore`][crate::channel::ChannelStore] owns all channel states. Both hand out lightweight `Copy` handles.
//! - **Canonical channel states**: structurally equal channel contents are interned once, so comparing handles compares contents.
//! - **Reproducible splitting**: observations a split criterion does not classify are placed by an injected [`ObsAssigner`][crate::assign::ObsAssigner], seedable for repeatable runs.
//! - **Pluggable oracle**: the refinement loop talks to an [`Oracle`][crate::oracle::Oracle]; [`McScmOracle`][crate::scm::McScmOracle] runs an external McScM-style verifier.
//!
//! ## Basic Usage
//!
//! ```rust
//! use cfsm_rs::channel::ChannelStore;
//! use cfsm_rs::gfsm::Gfsm;
//! use cfsm_rs::observed::TraceBuilder;
//! use cfsm_rs::types::{channel_ids, EventType, Pid};
//!
//! // 1. One store for all channel states of the run
//! let store = ChannelStore::default();
//!
//! // 2. Replay a trace: p0 sends `m` to p1, p1 receives it
//! let chans = channel_ids([(0, 1)]);
//! let trace = TraceBuilder::new(2, chans.clone())
//!     .event(EventType::send(chans[0], "m"))
//!     .event(EventType::recv(chans[0], "m"))
//!     .build(&store)
//!     .unwrap();
//!
//! // 3. Partition the observed configurations
//! let gfsm = Gfsm::new(&[trace], &store).unwrap();
//!
//! // 4. Project onto each process
//! let cfsm = gfsm.to_cfsm().unwrap();
//! let sender = cfsm.fsm(Pid::new(0));
//! assert!(sender.accepts(&[EventType::send(chans[0], "m")]));
//! ```
//!
//! ## Core Components
//!
//! - **[`channel`]**: channel states and their interning store.
//! - **[`observed`]**: traces as DAGs of concrete configurations.
//! - **[`gfsm`]**: the partition graph and its refinement operations.
//! - **[`cfsm`]**: per-process automata and the projection.
//! - **[`invariant`]**: invariant kinds, bad-behavior patterns and checkers.
//! - **[`paths`]**: mapping counterexamples onto the partition graph.
//! - **[`refine`]**: the CEGAR driver.
//! - **[`scm`]**: serialization for, and invocation of, the external verifier.
//! - **[`debug`]**: partition dumps for tracing a run.

pub mod assign;
pub mod cfsm;
pub mod channel;
pub mod debug;
pub mod error;
pub mod gfsm;
pub mod invariant;
pub mod observed;
pub mod oracle;
pub mod paths;
pub mod reference;
pub mod refine;
pub mod scm;
pub mod table;
pub mod types;
