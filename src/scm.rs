//! Serialization of a [`Cfsm`] plus an [`Invariant`] for the McScM verifier.
//!
//! The verifier only answers reachability questions about channel contents,
//! so the invariant is encoded into the system itself. Two extra channels are
//! appended after the real ones:
//!
//! - a *tracking* channel: every transition on one of the two invariant
//!   events is followed, through a fresh intermediate state, by a send of a
//!   synthetic message naming that event onto the tracking channel;
//! - a *local* channel: local events become sends of a synthetic message onto
//!   it, so that every transition has a channel action.
//!
//! The bad states then say: every process is in an accepting state, every
//! real channel is empty, and the tracking channel holds a word of the
//! invariant's bad-behavior pattern. The local channel is unconstrained.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;

use log::{debug, warn};
use wait_timeout::ChildExt;

use crate::cfsm::Cfsm;
use crate::error::{CfsmError, OracleError, Result};
use crate::invariant::Invariant;
use crate::oracle::{Oracle, OracleBound, Verdict};
use crate::paths::Counterexample;
use crate::types::{EventKind, EventType};

/// Options for the generated SCM text.
#[derive(Debug, Clone)]
pub struct ScmConfig {
    /// Name of the system in the `scm` header.
    pub name: String,
    /// Automaton `i` is named `{automaton_prefix}{i}`.
    pub automaton_prefix: String,
    /// Emit a comment block describing the channels.
    pub comments: bool,
}

impl Default for ScmConfig {
    fn default() -> Self {
        ScmConfig {
            name: "cfsm".to_string(),
            automaton_prefix: "p".to_string(),
            comments: true,
        }
    }
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Message name of a label on a real channel.
fn message_name(label: &str) -> String {
    let s = sanitize(label);
    if s.is_empty() || s.starts_with(|c: char| c.is_ascii_digit()) {
        format!("m_{}", s)
    } else {
        s
    }
}

/// Name that identifies an event among all events of the system.
fn event_symbol(event: &EventType) -> String {
    match event.kind() {
        EventKind::Local => format!("p{}_{}", event.pid().index(), sanitize(event.label())),
        EventKind::Send(c) => format!("c{}_s_{}", c.index(), sanitize(event.label())),
        EventKind::Recv(c) => format!("c{}_r_{}", c.index(), sanitize(event.label())),
    }
}

fn tracking_symbol(event: &EventType) -> String {
    format!("t_{}", event_symbol(event))
}

/// Channel indices of the synthetic channels for `cfsm`.
fn synthetic_channels(cfsm: &Cfsm) -> (usize, usize) {
    let n = cfsm.channel_ids().len();
    (n, n + 1)
}

/// The channel action performing `event`, as `(channel, op, message)`.
fn action(event: &EventType, local_channel: usize) -> (usize, char, String) {
    match event.kind() {
        EventKind::Local => (local_channel, '!', event_symbol(event)),
        EventKind::Send(c) => (c.index(), '!', message_name(event.label())),
        EventKind::Recv(c) => (c.index(), '?', message_name(event.label())),
    }
}

/// Check that distinct events get distinct channel actions and tracking messages.
///
/// Labels are sanitized into verifier identifiers, so `a-b` and `a.b` would
/// otherwise both become `a_b`.
fn check_symbols<'a>(events: impl IntoIterator<Item = &'a EventType>, local_channel: usize) -> Result<()> {
    let mut actions: HashMap<String, &EventType> = HashMap::new();
    let mut tracked: HashMap<String, &EventType> = HashMap::new();
    for event in events {
        let (ch, op, msg) = action(event, local_channel);
        let keys = [
            (&mut actions, format!("{} {} {}", ch, op, msg)),
            (&mut tracked, tracking_symbol(event)),
        ];
        for (seen, symbol) in keys {
            match seen.get(&symbol) {
                Some(&prev) if prev != event => {
                    return Err(CfsmError::SymbolClash {
                        first: prev.to_string(),
                        second: event.to_string(),
                        symbol,
                    });
                }
                Some(_) => {}
                None => {
                    seen.insert(symbol, event);
                }
            }
        }
    }
    Ok(())
}

/// Render `cfsm` with `invariant` encoded for the verifier.
///
/// Fails with [`CfsmError::SymbolClash`] if two events cannot be told apart
/// after their labels are sanitized.
pub fn to_scm(cfsm: &Cfsm, invariant: &Invariant, config: &ScmConfig) -> Result<String> {
    let (tracking, local) = synthetic_channels(cfsm);
    let alphabet = cfsm.alphabet();
    check_symbols(alphabet.iter().chain([invariant.first(), invariant.second()]), local)?;
    let mut out = String::new();

    writeln!(out, "scm {} :", config.name)?;
    writeln!(out)?;
    writeln!(out, "nb_channels = {} ;", local + 1)?;
    if config.comments {
        writeln!(out, "/*")?;
        for c in cfsm.channel_ids() {
            writeln!(out, "channel {} : {} -> {}", c.index(), c.src(), c.dst())?;
        }
        writeln!(out, "channel {} : tracking {}", tracking, invariant)?;
        writeln!(out, "channel {} : local events", local)?;
        writeln!(out, "*/")?;
    }
    writeln!(out)?;
    writeln!(out, "parameters :")?;

    for fsm in cfsm.fsms() {
        writeln!(out)?;
        writeln!(out, "automaton {}{} :", config.automaton_prefix, fsm.pid().index())?;
        writeln!(out)?;
        let init: Vec<String> = fsm.init_states().map(|s| s.to_string()).collect();
        writeln!(out, "initial : {}", init.join(" , "))?;

        // Intermediate states for tracked transitions are numbered after the real ones.
        let mut fresh = fsm.num_states();
        let mut intermediate: Vec<(usize, String, usize)> = Vec::new();
        for (i, state) in fsm.states().iter().enumerate() {
            writeln!(out)?;
            writeln!(out, "state {} :", i)?;
            for (event, targets) in state.transitions() {
                let (ch, op, msg) = action(event, local);
                for &target in targets {
                    if invariant.tracks(event) {
                        intermediate.push((fresh, tracking_symbol(event), target));
                        writeln!(out, "to {} : when true , {} {} {} ;", fresh, ch, op, msg)?;
                        fresh += 1;
                    } else {
                        writeln!(out, "to {} : when true , {} {} {} ;", target, ch, op, msg)?;
                    }
                }
            }
        }
        for (state, msg, target) in intermediate {
            writeln!(out)?;
            writeln!(out, "state {} :", state)?;
            writeln!(out, "to {} : when true , {} ! {} ;", target, tracking, msg)?;
        }
    }

    // One clause per combination of accepting states.
    let accepts: Vec<Vec<usize>> = cfsm.fsms().iter().map(|f| f.accept_states().collect()).collect();
    let pattern = invariant
        .bad_pattern()
        .render(&tracking_symbol(invariant.first()), &tracking_symbol(invariant.second()));
    let mut contents: Vec<String> = vec!["epsilon".to_string(); tracking];
    contents.push(pattern);
    contents.push("_^*".to_string());
    let contents = contents.join(" , ");

    writeln!(out)?;
    writeln!(out, "bad_states :")?;
    if accepts.iter().all(|a| !a.is_empty()) {
        let mut choice = vec![0usize; accepts.len()];
        'clauses: loop {
            write!(out, "(")?;
            for (i, &c) in choice.iter().enumerate() {
                if i > 0 {
                    writeln!(out)?;
                    write!(out, " ")?;
                }
                write!(out, "automaton {}{} : in {} : true", config.automaton_prefix, i, accepts[i][c])?;
            }
            writeln!(out)?;
            writeln!(out, " with {})", contents)?;

            // Odometer increment over the accepting-state choices.
            for i in (0..choice.len()).rev() {
                choice[i] += 1;
                if choice[i] < accepts[i].len() {
                    continue 'clauses;
                }
                choice[i] = 0;
            }
            break;
        }
    }

    debug!("to_scm: {} bytes for {}", out.len(), invariant);
    Ok(out)
}

/// Interpret the verifier output for a system produced by [`to_scm`] from `cfsm`.
///
/// The output must contain a `Result: Safe` or `Result: Unsafe` line. An unsafe
/// result is followed by the counterexample, whose actions are read as
/// `<channel> <op> <message>` token triples. Actions on the tracking channel
/// are dropped.
pub fn parse_verdict(output: &str, cfsm: &Cfsm) -> std::result::Result<Verdict, OracleError> {
    let (tracking, local) = synthetic_channels(cfsm);
    let mut lines = output.lines();

    let result = lines
        .by_ref()
        .find_map(|line| line.trim().strip_prefix("Result:").map(str::trim))
        .ok_or_else(|| OracleError::Protocol("missing `Result:` line".to_string()))?;
    match result {
        "Safe" => return Ok(Verdict::Satisfied),
        "Unsafe" => {}
        other => return Err(OracleError::Protocol(format!("unknown result `{}`", other))),
    }

    let alphabet = cfsm.alphabet();
    check_symbols(&alphabet, local).map_err(|e| OracleError::Protocol(e.to_string()))?;
    let decode: HashMap<(usize, char, String), EventType> =
        alphabet.into_iter().map(|event| (action(&event, local), event)).collect();

    let mut events = Vec::new();
    for line in lines {
        let tokens: Vec<&str> = line
            .split_whitespace()
            .map(|t| t.trim_end_matches([';', ',']))
            .collect();
        for w in tokens.windows(3) {
            let op = match w[1] {
                "!" => '!',
                "?" => '?',
                _ => continue,
            };
            let Ok(ch) = w[0].parse::<usize>() else {
                continue;
            };
            if ch == tracking {
                continue;
            }
            let key = (ch, op, w[2].to_string());
            match decode.get(&key) {
                Some(event) => events.push(event.clone()),
                None => {
                    return Err(OracleError::Protocol(format!(
                        "counterexample action `{} {} {}` matches no event",
                        ch, op, w[2]
                    )))
                }
            }
        }
    }

    Ok(Verdict::Violated(Counterexample::new(events)))
}

/// Runs an external McScM-compatible verifier on the generated SCM text.
///
/// The text is written to the verifier's standard input and its standard
/// output is parsed with [`parse_verdict`].
#[derive(Debug, Clone)]
pub struct McScmOracle {
    program: PathBuf,
    args: Vec<String>,
    bound_flag: Option<String>,
    config: ScmConfig,
}

impl McScmOracle {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        McScmOracle {
            program: program.into(),
            args: Vec::new(),
            bound_flag: None,
            config: ScmConfig::default(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Flag used to pass [`OracleBound::queue_bound`] to the verifier.
    pub fn bound_flag(mut self, flag: impl Into<String>) -> Self {
        self.bound_flag = Some(flag.into());
        self
    }

    pub fn config(mut self, config: ScmConfig) -> Self {
        self.config = config;
        self
    }

    fn run(&self, input: String, bound: &OracleBound) -> std::result::Result<String, OracleError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let (Some(flag), Some(q)) = (&self.bound_flag, bound.queue_bound) {
            cmd.arg(flag).arg(q.to_string());
        }
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| OracleError::Unavailable(format!("{}: {}", self.program.display(), e)))?;

        let (Some(mut stdin), Some(mut stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(OracleError::Unavailable("verifier pipes are not available".to_string()));
        };
        // The verifier may stop reading early, so write errors are not fatal.
        let writer = thread::spawn(move || stdin.write_all(input.as_bytes()));
        let reader = thread::spawn(move || {
            let mut s = String::new();
            stdout.read_to_string(&mut s).map(|_| s)
        });

        let status = match child.wait_timeout(bound.timeout) {
            Ok(Some(status)) => status,
            Ok(None) => {
                let _ = child.kill();
                let _ = child.wait();
                warn!("verifier {} timed out after {:?}", self.program.display(), bound.timeout);
                return Err(OracleError::Timeout { bound: bound.timeout });
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(OracleError::Unavailable(e.to_string()));
            }
        };

        let _ = writer.join();
        let output = reader
            .join()
            .map_err(|_| OracleError::Protocol("reading verifier output failed".to_string()))?
            .map_err(|e| OracleError::Protocol(e.to_string()))?;
        if !status.success() && output.trim().is_empty() {
            return Err(OracleError::Unavailable(format!("verifier exited with {}", status)));
        }
        Ok(output)
    }
}

impl Oracle for McScmOracle {
    fn check(&mut self, cfsm: &Cfsm, invariant: &Invariant, bound: &OracleBound) -> std::result::Result<Verdict, OracleError> {
        let text = to_scm(cfsm, invariant, &self.config).map_err(|e| OracleError::Protocol(e.to_string()))?;
        let output = self.run(text, bound)?;
        let verdict = parse_verdict(&output, cfsm)?;
        debug!("McScmOracle: {} -> {:?}", invariant, verdict.is_satisfied());
        Ok(verdict)
    }
}
