use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use cfsm_rs::assign::RandomAssigner;
use cfsm_rs::channel::ChannelStore;
use cfsm_rs::gfsm::Gfsm;
use cfsm_rs::invariant::Invariant;
use cfsm_rs::observed::TraceBuilder;
use cfsm_rs::oracle::OracleBound;
use cfsm_rs::refine::{RefineConfig, Refiner};
use cfsm_rs::scm::{to_scm, McScmOracle, ScmConfig};
use cfsm_rs::types::{channel_ids, EventType, Pid};

#[derive(Debug, Parser)]
#[command(author, version)]
struct Cli {
    /// McScM-compatible verifier. Without it, only the SCM input is printed.
    #[clap(long, value_name = "PATH")]
    verifier: Option<PathBuf>,

    /// Extra argument for the verifier (repeatable).
    #[clap(long = "verifier-arg", value_name = "ARG")]
    verifier_args: Vec<String>,

    /// Seed for assigning unclassified observations during splits.
    #[clap(long, value_name = "INT", default_value = "42")]
    seed: u64,

    /// Timeout of a single verifier call, in seconds.
    #[clap(long, value_name = "SECONDS", default_value = "60")]
    timeout: u64,

    /// Maximum number of refinement rounds.
    #[clap(long, value_name = "INT", default_value = "100")]
    rounds: usize,
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    simplelog::TermLogger::init(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let time_total = std::time::Instant::now();

    let args = Cli::parse();
    println!("args = {:?}", args);

    // Client p0 talks to server p1 over c0, the server answers over c1.
    let chans = channel_ids([(0, 1), (1, 0)]);
    let req = EventType::send(chans[0], "req");
    let got_req = EventType::recv(chans[0], "req");
    let ack = EventType::send(chans[1], "ack");
    let got_ack = EventType::recv(chans[1], "ack");
    let nack = EventType::send(chans[1], "nack");
    let got_nack = EventType::recv(chans[1], "nack");
    let give_up = EventType::local(Pid::new(0), "give_up");

    let store = ChannelStore::default();
    let traces = vec![
        // Accepted at once.
        TraceBuilder::new(2, chans.clone())
            .events([req.clone(), got_req.clone(), ack.clone(), got_ack.clone()])
            .build(&store)?,
        // Rejected, retried, accepted.
        TraceBuilder::new(2, chans.clone())
            .events([
                req.clone(),
                got_req.clone(),
                nack.clone(),
                got_nack.clone(),
                req.clone(),
                got_req.clone(),
                ack.clone(),
                got_ack.clone(),
            ])
            .build(&store)?,
        // Rejected, abandoned.
        TraceBuilder::new(2, chans.clone())
            .events([req.clone(), got_req.clone(), nack.clone(), got_nack.clone(), give_up.clone()])
            .build(&store)?,
    ];
    println!("channel states interned: {}", store.len());

    let invariants = vec![
        Invariant::always_precedes(req.clone(), got_ack.clone())?,
        Invariant::always_precedes(got_req.clone(), nack.clone())?,
        Invariant::never_followed_by(got_ack.clone(), req.clone())?,
        Invariant::never_followed_by(give_up.clone(), req.clone())?,
        Invariant::always_followed_by(got_nack.clone(), req.clone())?,
    ];

    let mut gfsm = Gfsm::new(&traces, &store)?;
    println!("gfsm = {}", gfsm);

    let cfsm = gfsm.to_cfsm()?;
    println!("{}", cfsm);

    let Some(verifier) = args.verifier else {
        let config = ScmConfig::default();
        for inv in &invariants {
            println!("// {}", inv);
            println!("{}", to_scm(&cfsm, inv, &config)?);
        }
        println!("No verifier given, stopping before refinement");
        println!("Total time: {:.2} s", time_total.elapsed().as_secs_f64());
        return Ok(());
    };

    let oracle = args
        .verifier_args
        .iter()
        .fold(McScmOracle::new(verifier), |oracle, arg| oracle.arg(arg.as_str()));
    let config = RefineConfig {
        max_rounds: args.rounds,
        oracle_bound: OracleBound {
            timeout: Duration::from_secs(args.timeout),
            queue_bound: None,
        },
        ..RefineConfig::default()
    };
    let mut refiner = Refiner::with_config(oracle, RandomAssigner::seeded(args.seed), config);
    let report = refiner.run(&mut gfsm, &invariants)?;

    println!(
        "refinement {} after {} rounds ({} verifier calls)",
        report.status, report.rounds, report.oracle_calls
    );
    println!("gfsm = {}", gfsm);
    for inv in &report.satisfied {
        println!("  satisfied:     {}", inv);
    }
    for inv in &report.unsatisfiable {
        println!("  unsatisfiable: {}", inv);
    }
    for inv in &report.unsatisfied {
        println!("  open:          {}", inv);
    }
    for fsm in report.cfsm.fsms() {
        println!("{}", fsm);
    }

    println!("Total time: {:.2} s", time_total.elapsed().as_secs_f64());
    Ok(())
}
