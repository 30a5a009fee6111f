//! Adaptation proxy binary.
//!
//! Stages one file, publishes an adaptation request over NATS JetStream and
//! waits for the correlated outcome. The outcome is the exit status:
//! `0` rebuilt, `1` unprocessed, `2` failed, `3` error.
//!
//! # Environment variables
//!
//! | Variable                      | Default               | Description                          |
//! |-------------------------------|-----------------------|--------------------------------------|
//! | `ADAPTATION_INPUT_FILE`       | —                     | File to submit (or `--input`)        |
//! | `ADAPTATION_OUTPUT_FILE`      | —                     | Rebuilt file destination (or `--output`) |
//! | `ADAPTATION_PREFIX`           | `adaptation`          | NATS subject prefix                  |
//! | `ADAPTATION_TIMEOUT_SECS`     | `60`                  | Seconds to wait for the outcome      |
//! | `ADAPTATION_NATS_CONNECT_TIMEOUT_SECS` | `10`         | Seconds to wait for the connection   |
//! | `ADAPTATION_STAGER`           | `local`               | `local` or `object-store`            |
//! | `ADAPTATION_SOURCE_DIR`       | `/var/source`         | Local stager input directory         |
//! | `ADAPTATION_TARGET_DIR`       | `/var/target`         | Local stager output directory        |
//! | `ADAPTATION_ORIGINAL_BUCKET`  | `adaptation-original` | Object store bucket for inputs       |
//! | `ADAPTATION_REBUILT_BUCKET`   | `adaptation-rebuilt`  | Object store bucket for results      |
//! | `NATS_URL`                    | `localhost:4222`      | NATS server address(es)              |
//! | `RUST_LOG`                    | `info`                | Log filter (tracing-subscriber)      |

mod signal;

use std::process::ExitCode;

use adaptation_proxy::config::{self, Args, Config, StagerKind};
use adaptation_proxy::{
    BrokerClient, BrokerConnector, FileStager, LocalFileStager, NatsConnector, ObjectStoreStager,
    Outcome, RequestOrchestrator,
};
use adaptation_std::{SystemEnv, SystemFs};
use clap::Parser;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match config::from_args(Args::parse(), &SystemEnv) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Outcome::Error.into();
        }
    };

    info!(
        input = %config.input().display(),
        output = %config.output().display(),
        prefix = config.prefix(),
        servers = ?config.nats().servers,
        "Adaptation proxy starting"
    );

    let outcome = tokio::select! {
        outcome = run(&config) => outcome,
        () = signal::shutdown_signal() => {
            warn!("Shutdown requested before an outcome arrived");
            Outcome::Error
        }
    };

    info!(outcome = %outcome, exit_code = outcome.exit_code(), "Adaptation proxy stopped");
    outcome.into()
}

async fn run(config: &Config) -> Outcome {
    let connector = NatsConnector::new(
        config.nats().clone(),
        config.prefix(),
        config.connect_timeout(),
    );
    let mut broker = BrokerClient::new(connector);
    if let Err(e) = broker.connect().await {
        error!(error = %e, "Failed to connect to broker");
        return Outcome::Error;
    }

    let outcome = match config.stager() {
        StagerKind::Local {
            source_dir,
            target_dir,
        } => {
            let stager = LocalFileStager::new(SystemFs, source_dir, target_dir);
            submit(&broker, &stager, config).await
        }
        StagerKind::ObjectStore {
            original_bucket,
            rebuilt_bucket,
        } => match open_object_store(&broker, original_bucket, rebuilt_bucket).await {
            Some(stager) => submit(&broker, &stager, config).await,
            None => Outcome::Error,
        },
    };

    broker.shutdown();
    outcome
}

async fn open_object_store(
    broker: &BrokerClient<NatsConnector>,
    original_bucket: &str,
    rebuilt_bucket: &str,
) -> Option<ObjectStoreStager> {
    let connection = match broker.connection() {
        Ok(connection) => connection,
        Err(e) => {
            error!(error = %e, "Broker connection unavailable");
            return None;
        }
    };
    match ObjectStoreStager::open(connection.jetstream(), original_bucket, rebuilt_bucket).await {
        Ok(stager) => Some(stager),
        Err(e) => {
            error!(error = %e, "Failed to open object store buckets");
            None
        }
    }
}

async fn submit<C: BrokerConnector, S: FileStager>(
    broker: &BrokerClient<C>,
    stager: &S,
    config: &Config,
) -> Outcome {
    RequestOrchestrator::new(broker, stager)
        .with_deadline(config.processing_timeout())
        .run(config.input(), config.output())
        .await
}
