//! Drover load test binary.
//!
//! Runs a scenario profile against the in-process broker or a Kafka
//! cluster and prints a summary. Exits with status 1 if any check failed or
//! any worker iteration errored.
//!
//! # Simulated run
//!
//! ```bash
//! drover --profile single-writer
//! ```
//!
//! # Kafka run (requires the `kafka` feature)
//!
//! ```bash
//! drover --mode kafka --profile batched-soak --brokers localhost:9091
//! ```
//!
//! # Custom profile
//!
//! ```bash
//! drover --profile-file soak.toml --iterations 10 --json
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use drover_workload::{
    list_profiles, load_profile, BrokerConnector, DeliveryPolicy, MemoryBroker, RunSummary,
    Runner, ScenarioProfile, SchemaType,
};

/// Where messages are sent.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum Mode {
    /// In-process broker.
    #[default]
    Memory,
    /// Kafka cluster via librdkafka.
    Kafka,
}

/// Broker produce/consume load tester.
#[derive(Parser, Debug)]
#[command(name = "drover")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Built-in profile to run.
    #[arg(long, default_value = "smoke")]
    profile: String,

    /// Load the profile from a TOML file instead.
    #[arg(long, conflicts_with = "profile")]
    profile_file: Option<PathBuf>,

    /// List built-in profiles and exit.
    #[arg(long)]
    list_profiles: bool,

    /// Print the resolved profile as TOML and exit.
    #[arg(long)]
    print_profile: bool,

    /// Broker backend.
    #[arg(long, value_enum, default_value = "memory")]
    mode: Mode,

    /// Bootstrap servers (comma separated).
    #[arg(long, value_delimiter = ',')]
    brokers: Vec<String>,

    /// Topic to write to and read from.
    #[arg(long)]
    topic: Option<String>,

    /// Consumer group id.
    #[arg(long)]
    group: Option<String>,

    /// Partitions per topic (memory mode only).
    #[arg(long, default_value = "1")]
    partitions: u16,

    /// Number of workers.
    #[arg(long)]
    workers: Option<u32>,

    /// Messages consumed across all workers per iteration.
    #[arg(long)]
    messages: Option<u64>,

    /// Messages per produce call.
    #[arg(long)]
    batch_size: Option<u32>,

    /// Iterations to run.
    #[arg(long)]
    iterations: Option<u32>,

    /// Run for this many seconds instead of a fixed iteration count.
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Consume timeout in milliseconds.
    #[arg(long)]
    consume_timeout_ms: Option<u64>,

    /// Value encoding.
    #[arg(long, value_enum)]
    schema: Option<SchemaType>,

    /// Severity of a short delivery.
    #[arg(long, value_enum)]
    policy: Option<DeliveryPolicy>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: Level,

    /// Print the summary as JSON.
    #[arg(long)]
    json: bool,
}

impl Args {
    /// Resolves the profile and applies command-line overrides.
    fn resolve_profile(&self) -> Result<ScenarioProfile, Box<dyn std::error::Error>> {
        let mut profile = match &self.profile_file {
            Some(path) => ScenarioProfile::from_file(path)?,
            None => load_profile(&self.profile)?,
        };

        if !self.brokers.is_empty() {
            profile.producer.brokers.clone_from(&self.brokers);
        }
        if let Some(topic) = &self.topic {
            profile.producer.topic.clone_from(topic);
        }
        if let Some(group) = &self.group {
            profile.consumer.group_id.clone_from(group);
        }
        if let Some(workers) = self.workers {
            profile.workload.workers = workers;
        }
        if let Some(messages) = self.messages {
            profile.workload.total_messages = messages;
        }
        if let Some(batch_size) = self.batch_size {
            profile.workload.batch_size = batch_size;
        }
        if let Some(iterations) = self.iterations {
            profile.execution.iterations = iterations;
            profile.execution.duration_secs = None;
        }
        if let Some(secs) = self.duration_secs {
            profile.execution.duration_secs = Some(secs);
        }
        if let Some(timeout) = self.consume_timeout_ms {
            profile.consumer.consume_timeout_ms = timeout;
        }
        if let Some(schema) = self.schema {
            profile.validation.schema = schema;
        }
        if let Some(policy) = self.policy {
            profile.validation.policy = policy;
        }
        Ok(profile)
    }
}

/// Runs the profile until done or interrupted. Returns `None` on Ctrl-C.
async fn execute<C: BrokerConnector + 'static>(
    profile: &ScenarioProfile,
    connector: C,
) -> Result<Option<RunSummary>, Box<dyn std::error::Error>> {
    let runner = Runner::from_profile(profile, connector)?;

    tokio::select! {
        summary = runner.run() => Ok(Some(summary)),
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, aborting run");
            Ok(None)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.list_profiles {
        for name in list_profiles() {
            let profile = load_profile(name)?;
            println!("{name:<16} {}", profile.description);
        }
        return Ok(());
    }

    // Logs go to stderr so the summary on stdout stays machine readable.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let profile = args.resolve_profile()?;
    if args.print_profile {
        print!("{}", profile.to_toml());
        return Ok(());
    }

    info!(
        profile = %profile.name,
        mode = ?args.mode,
        topic = %profile.producer.topic,
        workers = profile.workload.workers,
        total_messages = profile.workload.total_messages,
        "Starting drover"
    );

    let summary = match args.mode {
        Mode::Memory => {
            let broker = MemoryBroker::with_partitions(args.partitions)
                .with_group(profile.consumer.group_id.clone());
            execute(&profile, broker).await?
        }
        #[cfg(feature = "kafka")]
        Mode::Kafka => {
            let connector = drover_workload::KafkaConnector::new(profile.kafka_settings());
            execute(&profile, connector).await?
        }
        #[cfg(not(feature = "kafka"))]
        Mode::Kafka => return Err("drover was built without the `kafka` feature".into()),
    };

    let Some(summary) = summary else {
        std::process::exit(130);
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        summary.print_summary();
    }

    if !summary.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
