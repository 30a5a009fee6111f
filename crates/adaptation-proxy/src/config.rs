//! Process configuration: clap arguments for the two paths, environment for the rest.

use std::path::PathBuf;
use std::time::Duration;

use adaptation_nats::NatsConfig;
use adaptation_std::ReadEnv;
use clap::Parser;
use tracing::warn;

use crate::orchestrator::DEFAULT_PROCESSING_TIMEOUT;
use crate::subjects::{InvalidPrefix, validate_prefix};

const MIN_TIMEOUT_SECS: u64 = 1;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const ENV_INPUT_FILE: &str = "ADAPTATION_INPUT_FILE";
const ENV_OUTPUT_FILE: &str = "ADAPTATION_OUTPUT_FILE";
const ENV_PREFIX: &str = "ADAPTATION_PREFIX";
const ENV_TIMEOUT_SECS: &str = "ADAPTATION_TIMEOUT_SECS";
const ENV_CONNECT_TIMEOUT_SECS: &str = "ADAPTATION_NATS_CONNECT_TIMEOUT_SECS";
const ENV_STAGER: &str = "ADAPTATION_STAGER";
const ENV_SOURCE_DIR: &str = "ADAPTATION_SOURCE_DIR";
const ENV_TARGET_DIR: &str = "ADAPTATION_TARGET_DIR";
const ENV_ORIGINAL_BUCKET: &str = "ADAPTATION_ORIGINAL_BUCKET";
const ENV_REBUILT_BUCKET: &str = "ADAPTATION_REBUILT_BUCKET";

const DEFAULT_PREFIX: &str = "adaptation";
const DEFAULT_SOURCE_DIR: &str = "/var/source";
const DEFAULT_TARGET_DIR: &str = "/var/target";
const DEFAULT_ORIGINAL_BUCKET: &str = "adaptation-original";
const DEFAULT_REBUILT_BUCKET: &str = "adaptation-rebuilt";

#[derive(Parser, Debug, Default)]
#[command(name = "adaptation-proxy")]
#[command(about = "Submit a file for adaptation over NATS and wait for the outcome", long_about = None)]
pub struct Args {
    /// File to submit. Falls back to ADAPTATION_INPUT_FILE.
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,
    /// Where a rebuilt file is written. Falls back to ADAPTATION_OUTPUT_FILE.
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
}

/// Which pairing moves file bytes to and from the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagerKind {
    Local {
        source_dir: PathBuf,
        target_dir: PathBuf,
    },
    ObjectStore {
        original_bucket: String,
        rebuilt_bucket: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting(s): {}", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("invalid ADAPTATION_PREFIX '{prefix}': {reason}")]
    InvalidPrefix {
        prefix: String,
        #[source]
        reason: InvalidPrefix,
    },
    #[error("unknown ADAPTATION_STAGER '{0}' (expected 'local' or 'object-store')")]
    UnknownStager(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    input: PathBuf,
    output: PathBuf,
    prefix: String,
    processing_timeout: Duration,
    connect_timeout: Duration,
    stager: StagerKind,
    nats: NatsConfig,
}

impl Config {
    pub fn input(&self) -> &PathBuf {
        &self.input
    }

    pub fn output(&self) -> &PathBuf {
        &self.output
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// How long to wait for the service's reply. Default: `60s`.
    pub fn processing_timeout(&self) -> Duration {
        self.processing_timeout
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn stager(&self) -> &StagerKind {
        &self.stager
    }

    pub fn nats(&self) -> &NatsConfig {
        &self.nats
    }
}

pub fn from_args<E: ReadEnv>(args: Args, env: &E) -> Result<Config, ConfigError> {
    let input = args
        .input
        .filter(|path| !path.as_os_str().is_empty())
        .or_else(|| env.non_empty_var(ENV_INPUT_FILE).map(PathBuf::from));
    let output = args
        .output
        .filter(|path| !path.as_os_str().is_empty())
        .or_else(|| env.non_empty_var(ENV_OUTPUT_FILE).map(PathBuf::from));

    let (input, output) = match (input, output) {
        (Some(input), Some(output)) => (input, output),
        (input, output) => {
            let mut missing = Vec::new();
            if input.is_none() {
                missing.push("input");
            }
            if output.is_none() {
                missing.push("output");
            }
            return Err(ConfigError::Missing(missing));
        }
    };

    let prefix = env
        .non_empty_var(ENV_PREFIX)
        .unwrap_or_else(|| DEFAULT_PREFIX.to_string());
    validate_prefix(&prefix).map_err(|reason| ConfigError::InvalidPrefix {
        prefix: prefix.clone(),
        reason,
    })?;

    Ok(Config {
        input,
        output,
        prefix,
        processing_timeout: timeout_from_env(env, ENV_TIMEOUT_SECS, DEFAULT_PROCESSING_TIMEOUT),
        connect_timeout: timeout_from_env(env, ENV_CONNECT_TIMEOUT_SECS, DEFAULT_CONNECT_TIMEOUT),
        stager: stager_from_env(env)?,
        nats: NatsConfig::from_env(env),
    })
}

fn stager_from_env<E: ReadEnv>(env: &E) -> Result<StagerKind, ConfigError> {
    let kind = env
        .non_empty_var(ENV_STAGER)
        .unwrap_or_else(|| "local".to_string());
    match kind.trim().to_ascii_lowercase().as_str() {
        "local" => Ok(StagerKind::Local {
            source_dir: env
                .non_empty_var(ENV_SOURCE_DIR)
                .map_or_else(|| PathBuf::from(DEFAULT_SOURCE_DIR), PathBuf::from),
            target_dir: env
                .non_empty_var(ENV_TARGET_DIR)
                .map_or_else(|| PathBuf::from(DEFAULT_TARGET_DIR), PathBuf::from),
        }),
        "object-store" => Ok(StagerKind::ObjectStore {
            original_bucket: env
                .non_empty_var(ENV_ORIGINAL_BUCKET)
                .unwrap_or_else(|| DEFAULT_ORIGINAL_BUCKET.to_string()),
            rebuilt_bucket: env
                .non_empty_var(ENV_REBUILT_BUCKET)
                .unwrap_or_else(|| DEFAULT_REBUILT_BUCKET.to_string()),
        }),
        _ => Err(ConfigError::UnknownStager(kind)),
    }
}

fn timeout_from_env<E: ReadEnv>(env: &E, key: &str, default: Duration) -> Duration {
    let Ok(raw) = env.var(key) else {
        return default;
    };
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs >= MIN_TIMEOUT_SECS => Duration::from_secs(secs),
        Ok(secs) => {
            warn!("{key}={secs} is below minimum ({MIN_TIMEOUT_SECS}), using default");
            default
        }
        Err(_) => {
            warn!("{key}={raw:?} is not a valid integer, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adaptation_nats::NatsAuth;
    use adaptation_std::env::InMemoryEnv;

    fn args(input: &str, output: &str) -> Args {
        Args {
            input: Some(PathBuf::from(input)),
            output: Some(PathBuf::from(output)),
        }
    }

    #[test]
    fn defaults() {
        let env = InMemoryEnv::new();
        let config = from_args(args("/in/a.pdf", "/out/a.pdf"), &env).unwrap();

        assert_eq!(config.input(), &PathBuf::from("/in/a.pdf"));
        assert_eq!(config.output(), &PathBuf::from("/out/a.pdf"));
        assert_eq!(config.prefix(), "adaptation");
        assert_eq!(config.processing_timeout(), Duration::from_secs(60));
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(
            config.stager(),
            &StagerKind::Local {
                source_dir: PathBuf::from("/var/source"),
                target_dir: PathBuf::from("/var/target"),
            }
        );
        assert_eq!(config.nats().servers, vec!["localhost:4222"]);
        assert!(matches!(config.nats().auth, NatsAuth::None));
    }

    #[test]
    fn paths_fall_back_to_env() {
        let env = InMemoryEnv::new();
        env.set(ENV_INPUT_FILE, "/env/in");
        env.set(ENV_OUTPUT_FILE, "/env/out");

        let config = from_args(Args::default(), &env).unwrap();
        assert_eq!(config.input(), &PathBuf::from("/env/in"));
        assert_eq!(config.output(), &PathBuf::from("/env/out"));
    }

    #[test]
    fn args_take_precedence_over_env() {
        let env = InMemoryEnv::new();
        env.set(ENV_INPUT_FILE, "/env/in");

        let config = from_args(args("/arg/in", "/arg/out"), &env).unwrap();
        assert_eq!(config.input(), &PathBuf::from("/arg/in"));
    }

    #[test]
    fn missing_paths_are_reported_together() {
        let env = InMemoryEnv::new();
        let err = from_args(Args::default(), &env).unwrap_err();

        assert!(matches!(&err, ConfigError::Missing(names) if names == &["input", "output"]));
        assert_eq!(err.to_string(), "missing required setting(s): input, output");
    }

    #[test]
    fn blank_paths_count_as_missing() {
        let env = InMemoryEnv::new();
        env.set(ENV_OUTPUT_FILE, "   ");

        let err = from_args(args("", "/out"), &env).unwrap_err();
        assert!(matches!(&err, ConfigError::Missing(names) if names == &["input"]));
    }

    #[test]
    fn timeout_from_env_is_used() {
        let env = InMemoryEnv::new();
        env.set(ENV_TIMEOUT_SECS, "5");
        let config = from_args(args("/a", "/b"), &env).unwrap();
        assert_eq!(config.processing_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn invalid_timeouts_fall_back_to_default() {
        for raw in ["0", "soon", "-3"] {
            let env = InMemoryEnv::new();
            env.set(ENV_TIMEOUT_SECS, raw);
            let config = from_args(args("/a", "/b"), &env).unwrap();
            assert_eq!(config.processing_timeout(), DEFAULT_PROCESSING_TIMEOUT, "{raw}");
        }
    }

    #[test]
    fn custom_prefix() {
        let env = InMemoryEnv::new();
        env.set(ENV_PREFIX, "acme.prod");
        let config = from_args(args("/a", "/b"), &env).unwrap();
        assert_eq!(config.prefix(), "acme.prod");
    }

    #[test]
    fn wildcard_prefix_is_rejected() {
        let env = InMemoryEnv::new();
        env.set(ENV_PREFIX, "acme.*");
        let err = from_args(args("/a", "/b"), &env).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidPrefix {
                reason: InvalidPrefix::InvalidCharacter('*'),
                ..
            }
        ));
    }

    #[test]
    fn object_store_stager() {
        let env = InMemoryEnv::new();
        env.set(ENV_STAGER, "Object-Store");
        env.set(ENV_REBUILT_BUCKET, "clean");

        let config = from_args(args("/a", "/b"), &env).unwrap();
        assert_eq!(
            config.stager(),
            &StagerKind::ObjectStore {
                original_bucket: "adaptation-original".to_string(),
                rebuilt_bucket: "clean".to_string(),
            }
        );
    }

    #[test]
    fn local_stager_directories_from_env() {
        let env = InMemoryEnv::new();
        env.set(ENV_SOURCE_DIR, "/tmp/src");
        env.set(ENV_TARGET_DIR, "/tmp/dst");

        let config = from_args(args("/a", "/b"), &env).unwrap();
        assert_eq!(
            config.stager(),
            &StagerKind::Local {
                source_dir: PathBuf::from("/tmp/src"),
                target_dir: PathBuf::from("/tmp/dst"),
            }
        );
    }

    #[test]
    fn unknown_stager_is_rejected() {
        let env = InMemoryEnv::new();
        env.set(ENV_STAGER, "s3");
        let err = from_args(args("/a", "/b"), &env).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownStager(kind) if kind == "s3"));
    }

    #[test]
    fn nats_settings_come_from_env() {
        let env = InMemoryEnv::new();
        env.set("NATS_URL", "nats://a:4222,nats://b:4222");
        env.set("NATS_TOKEN", "secret");

        let config = from_args(args("/a", "/b"), &env).unwrap();
        assert_eq!(config.nats().servers, vec!["nats://a:4222", "nats://b:4222"]);
        assert!(matches!(&config.nats().auth, NatsAuth::Token(t) if t == "secret"));
    }
}
