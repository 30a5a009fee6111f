use std::sync::Arc;
use std::time::Duration;

use async_nats::{Client, ConnectOptions, Event};
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::auth::{NatsAuth, NatsConfig};

const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum ConnectError {
    InvalidCredentials(std::io::Error),
    ConnectionFailed {
        servers: Vec<String>,
        error: async_nats::ConnectError,
    },
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidCredentials(e) => write!(f, "Failed to load credentials file: {}", e),
            Self::ConnectionFailed { servers, error } => write!(
                f,
                "Failed to connect to NATS servers {:?}: {}",
                servers, error
            ),
        }
    }
}

impl std::error::Error for ConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidCredentials(e) => Some(e),
            Self::ConnectionFailed { error, .. } => Some(error),
        }
    }
}

/// Connection state as last reported by the client's event callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Closed,
}

impl ConnectionStatus {
    pub fn is_lost(self) -> bool {
        !matches!(self, Self::Connected)
    }
}

/// Cloneable view of the connection status.
///
/// Any disconnect counts as lost, even if the client later reconnects: replies
/// published while the link was down may never reach this process.
#[derive(Debug, Clone)]
pub struct ConnectionWatch {
    rx: watch::Receiver<ConnectionStatus>,
}

impl ConnectionWatch {
    /// Pair of a status publisher and its watch, starting at `Connected`.
    pub fn channel() -> (watch::Sender<ConnectionStatus>, Self) {
        let (tx, rx) = watch::channel(ConnectionStatus::Connected);
        (tx, Self { rx })
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.rx.borrow()
    }

    /// Resolves once the connection has been lost or the client is gone.
    pub async fn lost(&self) {
        let mut rx = self.rx.clone();
        // A dropped sender means the client and its callback are gone.
        let _ = rx.wait_for(|status| status.is_lost()).await;
    }
}

fn reconnect_delay(attempts: usize) -> Duration {
    let exp = u32::try_from(attempts).unwrap_or(u32::MAX);
    Duration::from_secs(2u64.saturating_pow(exp).min(MAX_RECONNECT_DELAY.as_secs()))
}

fn handle_event(event: Event, status: &watch::Sender<ConnectionStatus>) {
    match event {
        Event::Connected => {
            info!("NATS connected");
        }
        Event::Disconnected => {
            warn!("NATS disconnected");
            status.send_replace(ConnectionStatus::Disconnected);
        }
        Event::Closed => {
            info!("NATS connection closed");
            status.send_replace(ConnectionStatus::Closed);
        }
        Event::ServerError(err) => warn!(error = %err, "NATS server error"),
        Event::ClientError(err) => warn!(error = %err, "NATS client error"),
        Event::SlowConsumer(sid) => warn!(sid, "NATS slow consumer detected"),
        Event::LameDuckMode => warn!("NATS server entering lame duck mode"),
        Event::Draining => info!("NATS connection draining"),
    }
}

fn apply_options(
    opts: ConnectOptions,
    timeout: Duration,
    status: Arc<watch::Sender<ConnectionStatus>>,
) -> ConnectOptions {
    opts.connection_timeout(timeout)
        .reconnect_delay_callback(reconnect_delay)
        .event_callback(move |event| {
            let status = Arc::clone(&status);
            async move { handle_event(event, &status) }
        })
}

/// Connect to NATS and return the client together with a [`ConnectionWatch`].
///
/// Fails fast when no server is reachable within `timeout`; a one-shot caller
/// has nothing useful to do while retrying the initial connect.
#[instrument(name = "nats.connect", skip(config), fields(servers = ?config.servers, auth = %config.auth.description()))]
pub async fn connect(
    config: &NatsConfig,
    timeout: Duration,
) -> Result<(Client, ConnectionWatch), ConnectError> {
    let (tx, watch) = ConnectionWatch::channel();
    let tx = Arc::new(tx);

    let opts = match &config.auth {
        NatsAuth::Credentials(path) => ConnectOptions::with_credentials_file(path.clone())
            .await
            .map_err(|e| {
                warn!(error = %e, path = %path.display(), "Failed to load credentials file");
                ConnectError::InvalidCredentials(e)
            })?,
        NatsAuth::NKey(seed) => ConnectOptions::with_nkey(seed.clone()),
        NatsAuth::UserPassword { user, password } => {
            ConnectOptions::with_user_and_password(user.clone(), password.clone())
        }
        NatsAuth::Token(token) => ConnectOptions::with_token(token.clone()),
        NatsAuth::None => ConnectOptions::new(),
    };

    match apply_options(opts, timeout, tx).connect(&config.servers).await {
        Ok(client) => {
            info!("Connected to NATS");
            Ok((client, watch))
        }
        Err(error) => {
            warn!(error = %error, "Failed to connect to NATS");
            Err(ConnectError::ConnectionFailed {
                servers: config.servers.clone(),
                error,
            })
        }
    }
}
