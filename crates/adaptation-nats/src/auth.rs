use std::path::PathBuf;

use adaptation_std::env::ReadEnv;

const ENV_NATS_URL: &str = "NATS_URL";
const ENV_NATS_CREDS: &str = "NATS_CREDS";
const ENV_NATS_NKEY: &str = "NATS_NKEY";
const ENV_NATS_USER: &str = "NATS_USER";
const ENV_NATS_PASSWORD: &str = "NATS_PASSWORD";
const ENV_NATS_TOKEN: &str = "NATS_TOKEN";

const DEFAULT_NATS_URL: &str = "localhost:4222";

/// How the proxy authenticates against the broker.
///
/// Resolved from the environment in this order: `NATS_CREDS`, `NATS_NKEY`,
/// `NATS_USER` + `NATS_PASSWORD`, `NATS_TOKEN`, then no auth.
#[derive(Clone)]
pub enum NatsAuth {
    Credentials(PathBuf),
    NKey(String),
    UserPassword { user: String, password: String },
    Token(String),
    None,
}

impl NatsAuth {
    pub fn description(&self) -> &'static str {
        match self {
            Self::Credentials(_) => "credentials file",
            Self::NKey(_) => "NKey",
            Self::UserPassword { .. } => "user/password",
            Self::Token(_) => "token",
            Self::None => "none",
        }
    }
}

// Secrets stay out of logs: only the method is printed.
impl std::fmt::Debug for NatsAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Credentials(path) => f.debug_tuple("Credentials").field(path).finish(),
            other => f.write_str(other.description()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NatsConfig {
    pub servers: Vec<String>,
    pub auth: NatsAuth,
}

impl NatsConfig {
    pub fn new(servers: Vec<String>, auth: NatsAuth) -> Self {
        Self { servers, auth }
    }

    pub fn from_url(url: impl Into<String>) -> Self {
        Self::new(vec![url.into()], NatsAuth::None)
    }

    /// `NATS_URL` is a comma-separated server list, default `localhost:4222`.
    pub fn from_env<E: ReadEnv>(env: &E) -> Self {
        Self::new(servers_from_env(env), auth_from_env(env))
    }
}

fn servers_from_env<E: ReadEnv>(env: &E) -> Vec<String> {
    let servers: Vec<String> = env
        .var(ENV_NATS_URL)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if servers.is_empty() {
        vec![DEFAULT_NATS_URL.to_string()]
    } else {
        servers
    }
}

fn auth_from_env<E: ReadEnv>(env: &E) -> NatsAuth {
    if let Some(path) = env.non_empty_var(ENV_NATS_CREDS) {
        return NatsAuth::Credentials(PathBuf::from(path));
    }
    if let Some(seed) = env.non_empty_var(ENV_NATS_NKEY) {
        return NatsAuth::NKey(seed);
    }
    if let (Some(user), Some(password)) = (
        env.non_empty_var(ENV_NATS_USER),
        env.non_empty_var(ENV_NATS_PASSWORD),
    ) {
        return NatsAuth::UserPassword { user, password };
    }
    if let Some(token) = env.non_empty_var(ENV_NATS_TOKEN) {
        return NatsAuth::Token(token);
    }
    NatsAuth::None
}

#[cfg(test)]
mod tests {
    use super::*;
    use adaptation_std::env::InMemoryEnv;

    #[test]
    fn defaults_to_localhost_without_auth() {
        let config = NatsConfig::from_env(&InMemoryEnv::new());

        assert_eq!(config.servers, vec!["localhost:4222"]);
        assert!(matches!(config.auth, NatsAuth::None));
    }

    #[test]
    fn splits_and_trims_server_list() {
        let env = InMemoryEnv::new();
        env.set("NATS_URL", " nats://a:4222 ,, nats://b:4222 ");

        assert_eq!(
            NatsConfig::from_env(&env).servers,
            vec!["nats://a:4222", "nats://b:4222"]
        );
    }

    #[test]
    fn blank_url_falls_back_to_default() {
        let env = InMemoryEnv::new();
        env.set("NATS_URL", " , ");

        assert_eq!(NatsConfig::from_env(&env).servers, vec!["localhost:4222"]);
    }

    #[test]
    fn credentials_win_over_everything() {
        let env = InMemoryEnv::new();
        env.set("NATS_CREDS", "/etc/nats/proxy.creds");
        env.set("NATS_NKEY", "SUAKEY");
        env.set("NATS_TOKEN", "tok");

        assert!(matches!(
            NatsConfig::from_env(&env).auth,
            NatsAuth::Credentials(p) if p == std::path::Path::new("/etc/nats/proxy.creds")
        ));
    }

    #[test]
    fn user_password_requires_both_halves() {
        let env = InMemoryEnv::new();
        env.set("NATS_USER", "proxy");
        assert!(matches!(NatsConfig::from_env(&env).auth, NatsAuth::None));

        env.set("NATS_PASSWORD", "secret");
        assert!(matches!(
            NatsConfig::from_env(&env).auth,
            NatsAuth::UserPassword { user, password } if user == "proxy" && password == "secret"
        ));
    }

    #[test]
    fn token_is_last_resort() {
        let env = InMemoryEnv::new();
        env.set("NATS_TOKEN", "tok");
        assert!(matches!(NatsConfig::from_env(&env).auth, NatsAuth::Token(t) if t == "tok"));
    }

    #[test]
    fn debug_does_not_leak_secrets() {
        let auth = NatsAuth::UserPassword {
            user: "proxy".into(),
            password: "hunter2".into(),
        };
        let rendered = format!("{:?}", auth);
        assert!(!rendered.contains("hunter2"));
        assert_eq!(rendered, "user/password");
        assert!(!format!("{:?}", NatsAuth::Token("abc".into())).contains("abc"));
    }
}
