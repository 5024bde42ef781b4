#![forbid(unsafe_code)]

//! **rspace-cli** – Command-line demo surface for RSpace.
//!
//! Operates over a literal-integer channel/pattern/datum/continuation space
//! (`C = P = A = K = i64`, matched with [`rspace_engine::EqMatcher`]) so the
//! end-to-end scenarios in `spec.md` §8 can be driven from the shell.
//! `produce`/`consume`/`checkpoint` persist to a sled database so state
//! survives across separate invocations; `demo` runs a full scenario against
//! a fresh in-memory space in one process.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use rspace_engine::{EqMatcher, SpaceConfig};
use rspace_runtime::{build_memory_space, build_metrics, build_sled_space, init_tracing, MetricsConfig};
use rspace_store_core::SerdeCodec;

#[derive(Parser)]
#[command(name = "rspace")]
#[command(about = "RSpace matching engine - literal-integer demo CLI")]
#[command(version)]
struct Cli {
    /// Path to the sled database used by produce/consume/checkpoint.
    #[arg(long, global = true, default_value = "rspace.db")]
    db: PathBuf,

    /// RNG seed for the engine's candidate-extraction shuffling.
    #[arg(long, global = true, default_value_t = 0)]
    seed: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Publish a datum on a channel.
    Produce {
        /// Channel to publish on.
        channel: i64,
        /// Value to publish.
        data: i64,
        /// Keep the datum present after a successful match.
        #[arg(long)]
        persist: bool,
        /// Sequence number of this call.
        #[arg(long, default_value_t = 0)]
        seq: u64,
    },
    /// Await data on one or more channels.
    Consume {
        /// Channels to wait on, comma-separated (e.g. "1,2").
        #[arg(value_delimiter = ',')]
        channels: Vec<i64>,
        /// Patterns to match against, comma-separated, same arity as
        /// `channels`.
        #[arg(long, value_delimiter = ',')]
        patterns: Vec<i64>,
        /// Continuation value returned to the caller on a match.
        #[arg(long)]
        continuation: i64,
        /// Keep the continuation present after a successful match.
        #[arg(long)]
        persist: bool,
        /// Sequence number of this call.
        #[arg(long, default_value_t = 0)]
        seq: u64,
    },
    /// Drain the event log and print the checkpoint root.
    Checkpoint,
    /// Run one of the literal end-to-end scenarios from `spec.md` §8 against
    /// a fresh in-memory space.
    Demo {
        #[arg(value_enum)]
        scenario: Scenario,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Scenario {
    S1,
    S2,
    S3,
    S4,
    S5,
    S6,
}

type LiteralSpace = rspace_engine::Space<
    rspace_store_sled::SledStore<i64, i64, i64, i64>,
    i64,
    i64,
    i64,
    i64,
    i64,
    std::convert::Infallible,
>;

fn open_space(cli: &Cli) -> Result<LiteralSpace> {
    let space = build_sled_space::<i64, i64, i64, i64, i64, std::convert::Infallible>(
        &cli.db,
        Arc::new(EqMatcher),
        Arc::new(SerdeCodec),
        Arc::new(SerdeCodec),
        Arc::new(SerdeCodec),
        Arc::new(SerdeCodec),
        build_metrics(MetricsConfig::Noop),
        SpaceConfig { seed: cli.seed },
    )?;
    Ok(space)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match &cli.command {
        Command::Produce { channel, data, persist, seq } => {
            let space = open_space(&cli)?;
            let result = space.produce(*channel, *data, *persist, *seq).await?;
            print_outcome(result);
        }
        Command::Consume { channels, patterns, continuation, persist, seq } => {
            if channels.len() != patterns.len() {
                anyhow::bail!("channels and patterns must have the same length");
            }
            let space = open_space(&cli)?;
            let result =
                space.consume(channels.clone(), patterns.clone(), *continuation, *persist, *seq).await?;
            print_outcome(result);
        }
        Command::Checkpoint => {
            let space = open_space(&cli)?;
            let (root, events) = space.checkpoint().await?;
            println!("root: {}", hex_digest(&root));
            println!("events drained: {}", events.len());
            for event in &events {
                println!("  {:?}", event);
            }
        }
        Command::Demo { scenario } => run_demo(*scenario).await?,
    }

    Ok(())
}

fn print_outcome(
    result: Option<(rspace_types::ContResult<i64, i64, i64>, Vec<rspace_types::MatchedValue<i64>>)>,
) {
    match result {
        None => println!("no match; persisted"),
        Some((cont_result, matched)) => {
            println!(
                "matched: continuation={} seq={} channels={:?} patterns={:?}",
                cont_result.continuation, cont_result.sequence_number, cont_result.channels, cont_result.patterns
            );
            for m in matched {
                println!("  value={} persist={}", m.value, m.persist);
            }
        }
    }
}

fn hex_digest(digest: &[u8; 32]) -> String {
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

async fn run_demo(scenario: Scenario) -> Result<()> {
    let space = build_memory_space::<i64, i64, i64, i64, i64, std::convert::Infallible>(
        Arc::new(EqMatcher),
        Arc::new(SerdeCodec),
        Arc::new(SerdeCodec),
        Arc::new(SerdeCodec),
        Arc::new(SerdeCodec),
        build_metrics(MetricsConfig::Noop),
        SpaceConfig::default(),
    );

    info!("running scenario {:?}", scenario as u8);
    match scenario {
        Scenario::S1 => {
            println!("produce(c=1, a=10, persist=false, seq=0):");
            print_outcome(space.produce(1, 10, false, 0).await?);
            println!("consume([1], [10], k=99, persist=false, seq=0):");
            print_outcome(space.consume(vec![1], vec![10], 99, false, 0).await?);
        }
        Scenario::S2 => {
            println!("consume([1], [10], k=1, persist=false, seq=0):");
            print_outcome(space.consume(vec![1], vec![10], 1, false, 0).await?);
            println!("produce(c=1, a=10, persist=false, seq=0):");
            print_outcome(space.produce(1, 10, false, 0).await?);
        }
        Scenario::S3 => {
            println!("consume([1,2], [10,20], k=7, persist=false, seq=0):");
            print_outcome(space.consume(vec![1, 2], vec![10, 20], 7, false, 0).await?);
            println!("produce(c=1, a=10, persist=false, seq=0):");
            print_outcome(space.produce(1, 10, false, 0).await?);
            println!("produce(c=2, a=20, persist=false, seq=0):");
            print_outcome(space.produce(2, 20, false, 0).await?);
        }
        Scenario::S4 => {
            println!("produce(c=1, a=10, persist=true, seq=0):");
            print_outcome(space.produce(1, 10, true, 0).await?);
            println!("consume([1], [10], k=1, persist=false, seq=0):");
            print_outcome(space.consume(vec![1], vec![10], 1, false, 0).await?);
        }
        Scenario::S5 => {
            println!("consume([1], [10], k=1, persist=false, seq=0):");
            print_outcome(space.consume(vec![1], vec![10], 1, false, 0).await?);
            println!("produce(c=1, a=11, persist=false, seq=0):");
            print_outcome(space.produce(1, 11, false, 0).await?);
        }
        Scenario::S6 => {
            println!("consume([1,2], [10,20], k=7, persist=false, seq=0):");
            print_outcome(space.consume(vec![1, 2], vec![10, 20], 7, false, 0).await?);
            println!("produce(c=1, a=10, persist=false, seq=0):");
            print_outcome(space.produce(1, 10, false, 0).await?);
            println!("produce(c=2, a=20, persist=false, seq=0):");
            print_outcome(space.produce(2, 20, false, 0).await?);
            let (root, events) = space.checkpoint().await?;
            println!("checkpoint root: {}", hex_digest(&root));
            for event in &events {
                println!("  {:?}", event);
            }
        }
    }
    Ok(())
}
