//! The model-checking oracle seam.
//!
//! An [`Oracle`] decides whether a [`Cfsm`] can exhibit a behavior violating
//! an [`Invariant`], and produces a [`Counterexample`] if so. The refinement
//! loop only talks to this trait; [`crate::scm::McScmOracle`] is the
//! implementation backed by an external verifier.

use std::time::Duration;

use crate::cfsm::Cfsm;
use crate::error::OracleError;
use crate::invariant::Invariant;
use crate::paths::Counterexample;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// No reachable violation exists.
    Satisfied,
    Violated(Counterexample),
}

impl Verdict {
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Verdict::Satisfied)
    }
}

/// Resource bound for a single oracle call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleBound {
    /// Wall-clock limit for one call.
    pub timeout: Duration,
    /// Maximum channel length explored, if the oracle supports bounding it.
    pub queue_bound: Option<usize>,
}

impl Default for OracleBound {
    fn default() -> Self {
        OracleBound {
            timeout: Duration::from_secs(60),
            queue_bound: None,
        }
    }
}

impl OracleBound {
    /// The bound with every limit multiplied by `factor`.
    pub fn grown(&self, factor: u32) -> Self {
        OracleBound {
            timeout: self.timeout.saturating_mul(factor),
            queue_bound: self.queue_bound.map(|q| q.saturating_mul(factor as usize)),
        }
    }
}

pub trait Oracle {
    /// Check `invariant` on every behavior of `cfsm` that ends with all
    /// processes accepting and all channels empty.
    ///
    /// A timeout is an error, never a [`Verdict::Satisfied`].
    fn check(&mut self, cfsm: &Cfsm, invariant: &Invariant, bound: &OracleBound) -> Result<Verdict, OracleError>;
}

impl<O: Oracle + ?Sized> Oracle for &mut O {
    fn check(&mut self, cfsm: &Cfsm, invariant: &Invariant, bound: &OracleBound) -> Result<Verdict, OracleError> {
        (**self).check(cfsm, invariant, bound)
    }
}
