//! Temporal invariants over pairs of event types.
//!
//! Every invariant relates two events, `first` and `second`, and only looks
//! at those two: all other events of a sequence are ignored. Each kind comes
//! with three views of the same property:
//!
//! - [`Invariant::violated`], a direct check on a finite sequence,
//! - [`Invariant::bad_pattern`], a regular expression for exactly the
//!   violating sequences, handed to the model checker,
//! - [`Invariant::checker`], an incremental state machine used to locate the
//!   violation inside a counterexample.

use std::fmt;

use crate::error::{CfsmError, Result};
use crate::types::EventType;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InvariantKind {
    /// Every `first` is eventually followed by a `second`.
    AlwaysFollowedBy,
    /// No `second` ever occurs after a `first`.
    NeverFollowedBy,
    /// Every `second` is preceded by a `first`.
    AlwaysPrecedes,
    /// [`InvariantKind::AlwaysPrecedes`] mined over a relation other than time.
    AlwaysPrecedesBiRelation,
}

impl InvariantKind {
    pub fn short_name(self) -> &'static str {
        match self {
            InvariantKind::AlwaysFollowedBy => "AFby",
            InvariantKind::NeverFollowedBy => "NFby",
            InvariantKind::AlwaysPrecedes => "AP",
            InvariantKind::AlwaysPrecedesBiRelation => "APBi",
        }
    }

    /// `x NFby x` is meaningful (`x` occurs at most once), the other kinds are not.
    pub fn allows_equal_events(self) -> bool {
        matches!(self, InvariantKind::NeverFollowedBy)
    }
}

impl fmt::Display for InvariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Invariant {
    kind: InvariantKind,
    first: EventType,
    second: EventType,
    relation: String,
}

/// Relation name used for invariants mined over the time order.
pub const TIME_RELATION: &str = "t";

impl Invariant {
    pub fn new(kind: InvariantKind, first: EventType, second: EventType) -> Result<Self> {
        Self::with_relation(kind, first, second, TIME_RELATION)
    }

    pub fn with_relation(
        kind: InvariantKind,
        first: EventType,
        second: EventType,
        relation: impl Into<String>,
    ) -> Result<Self> {
        if first == second && !kind.allows_equal_events() {
            return Err(CfsmError::InvalidInvariant {
                kind: kind.short_name(),
                event: first.to_string(),
            });
        }
        Ok(Invariant {
            kind,
            first,
            second,
            relation: relation.into(),
        })
    }

    pub fn always_followed_by(first: EventType, second: EventType) -> Result<Self> {
        Self::new(InvariantKind::AlwaysFollowedBy, first, second)
    }

    pub fn never_followed_by(first: EventType, second: EventType) -> Result<Self> {
        Self::new(InvariantKind::NeverFollowedBy, first, second)
    }

    pub fn always_precedes(first: EventType, second: EventType) -> Result<Self> {
        Self::new(InvariantKind::AlwaysPrecedes, first, second)
    }

    pub fn kind(&self) -> InvariantKind {
        self.kind
    }
    pub fn first(&self) -> &EventType {
        &self.first
    }
    pub fn second(&self) -> &EventType {
        &self.second
    }
    pub fn relation(&self) -> &str {
        &self.relation
    }

    /// Whether `event` is one of the two events this invariant talks about.
    pub fn tracks(&self, event: &EventType) -> bool {
        *event == self.first || *event == self.second
    }

    /// Whether the finite sequence `events` violates the invariant.
    pub fn violated(&self, events: &[EventType]) -> bool {
        match self.kind {
            InvariantKind::AlwaysFollowedBy => {
                let mut pending = false;
                for e in events {
                    if *e == self.first {
                        pending = true;
                    } else if *e == self.second {
                        pending = false;
                    }
                }
                pending
            }
            InvariantKind::NeverFollowedBy => {
                let mut seen_first = false;
                for e in events {
                    if seen_first && *e == self.second {
                        return true;
                    }
                    if *e == self.first {
                        seen_first = true;
                    }
                }
                false
            }
            InvariantKind::AlwaysPrecedes | InvariantKind::AlwaysPrecedesBiRelation => {
                for e in events {
                    if *e == self.first {
                        return false;
                    }
                    if *e == self.second {
                        return true;
                    }
                }
                false
            }
        }
    }

    pub fn satisfies(&self, events: &[EventType]) -> bool {
        !self.violated(events)
    }

    /// Regular description of exactly the violating sequences.
    pub fn bad_pattern(&self) -> BadPattern {
        use Atom::*;
        use Repeat::*;
        let items = match self.kind {
            // Ends with a `first` that no `second` answers.
            InvariantKind::AlwaysFollowedBy => vec![(Either, Star), (First, Plus)],
            // Some `first`, later some `second`.
            InvariantKind::NeverFollowedBy => vec![
                (Either, Star),
                (First, Once),
                (Either, Star),
                (Second, Once),
                (Either, Star),
            ],
            // A `second` before any `first`.
            InvariantKind::AlwaysPrecedes | InvariantKind::AlwaysPrecedesBiRelation => {
                vec![(Second, Once), (Either, Star)]
            }
        };
        BadPattern {
            first: self.first.clone(),
            second: self.second.clone(),
            items,
        }
    }

    pub fn checker(&self) -> InvChecker<'_> {
        InvChecker::new(self)
    }

    /// The shortest prefix of a violating sequence that still violates the invariant.
    ///
    /// For [`InvariantKind::AlwaysFollowedBy`] a violation only shows at the end, so
    /// the whole sequence is returned. Non-violating sequences are returned unchanged.
    pub fn shorten(&self, events: &[EventType]) -> Vec<EventType> {
        match self.kind {
            InvariantKind::AlwaysFollowedBy => events.to_vec(),
            _ => match self.checker().first_violation(events) {
                Some(i) => events[..=i].to_vec(),
                None => events.to_vec(),
            },
        }
    }
}

impl fmt::Display for Invariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.first, self.kind, self.second)
    }
}

/// Symbol class of a [`BadPattern`] item.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Atom {
    First,
    Second,
    /// Either of the two tracked events.
    Either,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Repeat {
    Once,
    Star,
    Plus,
}

/// A concatenation of repeated atoms over the two tracked events of an invariant.
///
/// The pattern describes sequences after every untracked event has been
/// erased. Matching and rendering both work on that projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadPattern {
    first: EventType,
    second: EventType,
    items: Vec<(Atom, Repeat)>,
}

impl BadPattern {
    pub fn items(&self) -> &[(Atom, Repeat)] {
        &self.items
    }

    fn atom_matches(&self, atom: Atom, event: &EventType) -> bool {
        match atom {
            Atom::First => *event == self.first,
            Atom::Second => *event == self.second,
            Atom::Either => *event == self.first || *event == self.second,
        }
    }

    /// Whether the projection of `events` onto the tracked events is in the pattern language.
    pub fn matches(&self, events: &[EventType]) -> bool {
        let projected: Vec<&EventType> = events
            .iter()
            .filter(|e| **e == self.first || **e == self.second)
            .collect();
        self.match_from(0, &projected)
    }

    fn match_from(&self, item: usize, rest: &[&EventType]) -> bool {
        let Some(&(atom, repeat)) = self.items.get(item) else {
            return rest.is_empty();
        };
        // Length of the longest run of `atom` at the front.
        let run = rest.iter().take_while(|e| self.atom_matches(atom, e)).count();
        let (min, max) = match repeat {
            Repeat::Once => (1, 1),
            Repeat::Star => (0, run),
            Repeat::Plus => (1, run),
        };
        if run < min {
            return false;
        }
        (min..=max.min(run))
            .rev()
            .any(|taken| self.match_from(item + 1, &rest[taken..]))
    }

    /// Render as a McScM queue regular expression, naming the tracked events with `first` and `second`.
    pub fn render(&self, first: &str, second: &str) -> String {
        self.items
            .iter()
            .map(|&(atom, repeat)| {
                let symbol = match atom {
                    Atom::First => first.to_string(),
                    Atom::Second => second.to_string(),
                    Atom::Either => format!("({} | {})", first, second),
                };
                match repeat {
                    Repeat::Once => symbol,
                    Repeat::Star => format!("{}^*", symbol),
                    Repeat::Plus => format!("{}^+", symbol),
                }
            })
            .collect::<Vec<_>>()
            .join(" . ")
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum CheckerState {
    /// Nothing relevant pending.
    Idle,
    /// AFby: a `first` is waiting for its `second`. NFby: a `first` has occurred.
    Armed,
    /// AP: a `first` has occurred, nothing can go wrong any more.
    Safe,
    /// NFby or AP: violated for good.
    Failed,
}

/// Incremental checker that consumes one event at a time.
#[derive(Debug, Clone)]
pub struct InvChecker<'a> {
    inv: &'a Invariant,
    state: CheckerState,
}

impl<'a> InvChecker<'a> {
    pub fn new(inv: &'a Invariant) -> Self {
        InvChecker {
            inv,
            state: CheckerState::Idle,
        }
    }

    pub fn reset(&mut self) {
        self.state = CheckerState::Idle;
    }

    /// Consume one event and report whether the sequence seen so far violates the invariant.
    pub fn step(&mut self, event: &EventType) -> bool {
        use CheckerState::*;
        let is_first = *event == self.inv.first;
        let is_second = *event == self.inv.second;
        self.state = match (self.inv.kind, self.state) {
            (_, Failed) => Failed,
            (InvariantKind::AlwaysFollowedBy, _) if is_first => Armed,
            (InvariantKind::AlwaysFollowedBy, _) if is_second => Idle,
            (InvariantKind::NeverFollowedBy, Armed) if is_second => Failed,
            (InvariantKind::NeverFollowedBy, _) if is_first => Armed,
            (InvariantKind::AlwaysPrecedes | InvariantKind::AlwaysPrecedesBiRelation, Idle) if is_first => Safe,
            (InvariantKind::AlwaysPrecedes | InvariantKind::AlwaysPrecedesBiRelation, Idle) if is_second => Failed,
            (_, state) => state,
        };
        self.is_fail()
    }

    /// Whether the sequence consumed so far, taken as a complete sequence, violates the invariant.
    pub fn is_fail(&self) -> bool {
        match self.inv.kind {
            InvariantKind::AlwaysFollowedBy => self.state == CheckerState::Armed,
            _ => self.state == CheckerState::Failed,
        }
    }

    /// Index of the event that completes the violation, if `events` violates the invariant.
    ///
    /// For [`InvariantKind::AlwaysFollowedBy`] this is the earliest `first` that is
    /// never answered, since the violation only materializes at the end.
    pub fn first_violation(&mut self, events: &[EventType]) -> Option<usize> {
        self.reset();
        match self.inv.kind {
            InvariantKind::AlwaysFollowedBy => {
                let mut unanswered = None;
                for (i, e) in events.iter().enumerate() {
                    let was_armed = self.state == CheckerState::Armed;
                    if self.step(e) && !was_armed {
                        unanswered = Some(i);
                    }
                }
                if self.is_fail() {
                    unanswered
                } else {
                    None
                }
            }
            _ => events.iter().position(|e| self.step(e)),
        }
    }

    /// Index where the history relevant to a violation of `events` begins.
    ///
    /// Refinement searches backwards for a split from this position.
    pub fn anchor(&mut self, events: &[EventType]) -> Option<usize> {
        let violation = self.first_violation(events)?;
        match self.inv.kind {
            InvariantKind::AlwaysFollowedBy => Some(violation),
            InvariantKind::NeverFollowedBy => events.iter().position(|e| *e == self.inv.first),
            InvariantKind::AlwaysPrecedes | InvariantKind::AlwaysPrecedesBiRelation => Some(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::types::Pid;

    fn ev(label: &str) -> EventType {
        EventType::local(Pid::new(0), label)
    }

    fn seq(labels: &[&str]) -> Vec<EventType> {
        labels.iter().map(|l| ev(l)).collect()
    }

    fn all_kinds() -> [InvariantKind; 4] {
        [
            InvariantKind::AlwaysFollowedBy,
            InvariantKind::NeverFollowedBy,
            InvariantKind::AlwaysPrecedes,
            InvariantKind::AlwaysPrecedesBiRelation,
        ]
    }

    /// Every sequence over {a, b, x} up to length `n`.
    fn all_sequences(n: usize) -> Vec<Vec<EventType>> {
        let mut result = vec![Vec::new()];
        let mut frontier = vec![Vec::new()];
        for _ in 0..n {
            let mut next = Vec::new();
            for s in &frontier {
                for l in ["a", "b", "x"] {
                    let mut t: Vec<EventType> = s.clone();
                    t.push(ev(l));
                    next.push(t);
                }
            }
            result.extend(next.iter().cloned());
            frontier = next;
        }
        result
    }

    #[test]
    fn test_afby_violated() {
        let inv = Invariant::always_followed_by(ev("a"), ev("b")).unwrap();
        assert!(inv.violated(&seq(&["a", "b", "a"])));
        assert!(!inv.violated(&seq(&["a", "b"])));
        assert!(!inv.violated(&[]));
        assert!(!inv.violated(&seq(&["b", "x"])));
        assert!(inv.violated(&seq(&["a", "x"])));
    }

    #[test]
    fn test_nfby_violated() {
        let inv = Invariant::never_followed_by(ev("a"), ev("b")).unwrap();
        assert!(inv.violated(&seq(&["a", "b"])));
        assert!(!inv.violated(&seq(&["b", "a"])));
        assert!(!inv.violated(&seq(&["a"])));
        assert!(inv.violated(&seq(&["a", "x", "b"])));
    }

    #[test]
    fn test_nfby_same_event() {
        let inv = Invariant::never_followed_by(ev("a"), ev("a")).unwrap();
        assert!(!inv.violated(&seq(&["a", "x"])));
        assert!(inv.violated(&seq(&["a", "x", "a"])));
        assert!(inv.bad_pattern().matches(&seq(&["a", "a"])));
        assert!(!inv.bad_pattern().matches(&seq(&["a"])));
    }

    #[test]
    fn test_ap_violated() {
        let inv = Invariant::always_precedes(ev("a"), ev("b")).unwrap();
        assert!(inv.violated(&seq(&["b"])));
        assert!(inv.violated(&seq(&["x", "b", "a"])));
        assert!(!inv.violated(&seq(&["a", "b"])));
        assert!(!inv.violated(&[]));
    }

    #[test]
    fn test_equal_events_rejected() {
        for kind in all_kinds() {
            let result = Invariant::new(kind, ev("a"), ev("a"));
            assert_eq!(result.is_ok(), kind == InvariantKind::NeverFollowedBy, "{}", kind);
        }
        assert!(matches!(
            Invariant::always_followed_by(ev("a"), ev("a")),
            Err(CfsmError::InvalidInvariant { kind: "AFby", .. })
        ));
    }

    #[test]
    fn test_pattern_agrees_with_violated() {
        let sequences = all_sequences(5);
        for kind in all_kinds() {
            let inv = Invariant::new(kind, ev("a"), ev("b")).unwrap();
            let pattern = inv.bad_pattern();
            for s in &sequences {
                assert_eq!(pattern.matches(s), inv.violated(s), "{} on {:?}", inv, s);
            }
        }
    }

    #[test]
    fn test_checker_agrees_with_violated() {
        let sequences = all_sequences(5);
        for kind in all_kinds() {
            let inv = Invariant::new(kind, ev("a"), ev("b")).unwrap();
            for s in &sequences {
                let mut checker = inv.checker();
                for e in s {
                    checker.step(e);
                }
                assert_eq!(checker.is_fail(), inv.violated(s), "{} on {:?}", inv, s);
                assert_eq!(inv.checker().first_violation(s).is_some(), inv.violated(s));
            }
        }
    }

    #[test]
    fn test_first_violation_positions() {
        let afby = Invariant::always_followed_by(ev("a"), ev("b")).unwrap();
        assert_eq!(afby.checker().first_violation(&seq(&["a", "b", "a", "x", "a"])), Some(2));
        assert_eq!(afby.checker().first_violation(&seq(&["a", "b"])), None);

        let nfby = Invariant::never_followed_by(ev("a"), ev("b")).unwrap();
        let s = seq(&["x", "a", "x", "b", "b"]);
        assert_eq!(nfby.checker().first_violation(&s), Some(3));
        assert_eq!(nfby.checker().anchor(&s), Some(1));

        let ap = Invariant::always_precedes(ev("a"), ev("b")).unwrap();
        let s = seq(&["x", "b", "a"]);
        assert_eq!(ap.checker().first_violation(&s), Some(1));
        assert_eq!(ap.checker().anchor(&s), Some(0));
        assert_eq!(ap.checker().anchor(&seq(&["a", "b"])), None);
    }

    #[test]
    fn test_shorten() {
        let nfby = Invariant::never_followed_by(ev("a"), ev("b")).unwrap();
        assert_eq!(nfby.shorten(&seq(&["a", "b", "x", "b"])), seq(&["a", "b"]));

        let ap = Invariant::always_precedes(ev("a"), ev("b")).unwrap();
        assert_eq!(ap.shorten(&seq(&["x", "b", "x"])), seq(&["x", "b"]));

        let afby = Invariant::always_followed_by(ev("a"), ev("b")).unwrap();
        let s = seq(&["a", "x"]);
        assert_eq!(afby.shorten(&s), s);

        let s = seq(&["x", "a", "b", "a"]);
        for inv in [&nfby, &ap, &afby] {
            assert_eq!(inv.violated(&inv.shorten(&s)), inv.violated(&s));
        }
    }

    #[test]
    fn test_render() {
        let afby = Invariant::always_followed_by(ev("a"), ev("b")).unwrap();
        assert_eq!(afby.bad_pattern().render("A", "B"), "(A | B)^* . A^+");
        let ap = Invariant::always_precedes(ev("a"), ev("b")).unwrap();
        assert_eq!(ap.bad_pattern().render("A", "B"), "B . (A | B)^*");
    }

    #[test]
    fn test_display() {
        let inv = Invariant::never_followed_by(ev("a"), ev("b")).unwrap();
        assert_eq!(inv.to_string(), "p0.a NFby p0.b");
        assert_eq!(inv.relation(), TIME_RELATION);
    }
}
