//! Retrying delta push to a SPARQL update endpoint.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::{debug, info, warn};

use crate::config::{Credential, PushConfig};
use crate::models::{PushErrorKind, PushResult};

pub const SPARQL_UPDATE_CONTENT_TYPE: &str = "application/sparql-update";

/// Exponent cap for the backoff multiplier.
const MAX_BACKOFF_EXPONENT: u32 = 30;

/// Longest single wait between attempts.
pub const MAX_BACKOFF_DELAY: Duration = Duration::from_secs(3600);

/// One POST of an update statement.
#[derive(Debug)]
pub struct PushRequest<'a> {
    pub endpoint: &'a str,
    pub body: &'a str,
    pub credential: Option<Credential>,
    pub headers: &'a BTreeMap<String, String>,
    pub timeout: Duration,
}

/// What a single network attempt observed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportOutcome {
    Status(u16),
    ConnectionFailed(String),
    TimedOut,
    /// The request could not be built or sent as specified.
    Invalid(String),
}

/// Capability: send one request, bounded by `request.timeout`.
pub trait Transport: Send + Sync {
    fn post(&self, request: &PushRequest<'_>) -> TransportOutcome;
}

/// Capability: wait between attempts.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Blocking HTTP transport.
pub struct UreqTransport;

fn is_timeout(err: &ureq::Transport) -> bool {
    std::error::Error::source(err)
        .and_then(|s| s.downcast_ref::<std::io::Error>())
        .is_some_and(|io| {
            matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            )
        })
}

impl Transport for UreqTransport {
    fn post(&self, request: &PushRequest<'_>) -> TransportOutcome {
        let agent = ureq::AgentBuilder::new().timeout(request.timeout).build();
        let mut req = agent
            .post(request.endpoint)
            .set("Content-Type", SPARQL_UPDATE_CONTENT_TYPE);
        match &request.credential {
            Some(Credential::Bearer(token)) => {
                req = req.set("Authorization", &format!("Bearer {token}"));
            }
            Some(Credential::Basic { username, password }) => {
                let encoded = STANDARD.encode(format!("{username}:{password}"));
                req = req.set("Authorization", &format!("Basic {encoded}"));
            }
            None => {}
        }
        for (name, value) in request.headers {
            req = req.set(name, value);
        }

        match req.send_string(request.body) {
            Ok(response) => TransportOutcome::Status(response.status()),
            Err(ureq::Error::Status(code, _)) => TransportOutcome::Status(code),
            Err(ureq::Error::Transport(t)) => match t.kind() {
                ureq::ErrorKind::InvalidUrl
                | ureq::ErrorKind::UnknownScheme
                | ureq::ErrorKind::InvalidProxyUrl
                | ureq::ErrorKind::BadHeader
                | ureq::ErrorKind::InsecureRequestHttpsOnly => TransportOutcome::Invalid(t.to_string()),
                _ if is_timeout(&t) => TransportOutcome::TimedOut,
                _ => TransportOutcome::ConnectionFailed(t.to_string()),
            },
        }
    }
}

enum Verdict {
    Success(u16),
    Transient(Option<u16>, String),
    Fatal(PushErrorKind, Option<u16>, String),
}

fn classify(outcome: TransportOutcome) -> Verdict {
    match outcome {
        TransportOutcome::Status(code) if (200..300).contains(&code) => Verdict::Success(code),
        TransportOutcome::Status(code) if code >= 500 => {
            Verdict::Transient(Some(code), format!("endpoint returned HTTP {code}"))
        }
        TransportOutcome::Status(code) => Verdict::Fatal(
            PushErrorKind::ClientError,
            Some(code),
            format!("endpoint rejected the update with HTTP {code}"),
        ),
        TransportOutcome::ConnectionFailed(msg) => Verdict::Transient(None, msg),
        TransportOutcome::TimedOut => Verdict::Transient(None, "request timed out".to_string()),
        TransportOutcome::Invalid(msg) => Verdict::Fatal(PushErrorKind::InvalidRequest, None, msg),
    }
}

/// Seconds as a `Duration`, saturating at `cap`.
fn saturating_secs(seconds: f64, cap: Duration) -> Duration {
    Duration::try_from_secs_f64(seconds.max(0.0)).map_or(cap, |d| d.min(cap))
}

/// Delay before retry number `retry` (0 for the first retry), capped at
/// [`MAX_BACKOFF_DELAY`].
pub fn backoff_delay(base_seconds: f64, retry: u32) -> Duration {
    let factor = 2f64.powi(retry.min(MAX_BACKOFF_EXPONENT) as i32);
    saturating_secs(base_seconds * factor, MAX_BACKOFF_DELAY)
}

/// Sends update statements with exponential-backoff retries.
pub struct DeltaPusher {
    transport: Box<dyn Transport>,
    sleeper: Box<dyn Sleeper>,
}

impl Default for DeltaPusher {
    fn default() -> Self {
        Self::new(Box::new(UreqTransport), Box::new(ThreadSleeper))
    }
}

impl DeltaPusher {
    pub fn new(transport: Box<dyn Transport>, sleeper: Box<dyn Sleeper>) -> Self {
        Self { transport, sleeper }
    }

    /// Push `statement`. Returns `None` when no endpoint is configured.
    pub fn push(&self, statement: &str, config: &PushConfig) -> Option<PushResult> {
        let endpoint = config.endpoint()?;
        let started = Instant::now();

        if let Err(e) = config.validate() {
            return Some(PushResult {
                attempted: false,
                status_code: None,
                attempts: 0,
                duration_seconds: started.elapsed().as_secs_f64(),
                error: Some(PushErrorKind::InvalidRequest),
                message: Some(e.to_string()),
            });
        }

        let retries = config.retries();
        let request = PushRequest {
            endpoint,
            body: statement,
            credential: config.credential(),
            headers: &config.headers,
            timeout: saturating_secs(config.timeout_seconds(), Duration::MAX),
        };

        let mut attempts = 0u32;
        let mut last_status = None;
        let mut last_message = String::new();
        for retry in 0..=retries {
            attempts += 1;
            debug!(endpoint, attempt = attempts, "posting update");
            match classify(self.transport.post(&request)) {
                Verdict::Success(code) => {
                    info!(endpoint, status = code, attempts, "delta pushed");
                    return Some(PushResult {
                        attempted: true,
                        status_code: Some(code),
                        attempts,
                        duration_seconds: started.elapsed().as_secs_f64(),
                        error: None,
                        message: None,
                    });
                }
                Verdict::Fatal(kind, status, message) => {
                    warn!(endpoint, ?status, attempts, %message, "delta push rejected");
                    return Some(PushResult {
                        attempted: true,
                        status_code: status,
                        attempts,
                        duration_seconds: started.elapsed().as_secs_f64(),
                        error: Some(kind),
                        message: Some(message),
                    });
                }
                Verdict::Transient(status, message) => {
                    last_status = status;
                    last_message = message;
                    if retry < retries {
                        let delay = backoff_delay(config.backoff_seconds(), retry);
                        warn!(
                            endpoint,
                            attempt = attempts,
                            delay_seconds = delay.as_secs_f64(),
                            message = %last_message,
                            "transient push failure; retrying"
                        );
                        self.sleeper.sleep(delay);
                    }
                }
            }
        }

        warn!(endpoint, attempts, status = ?last_status, "delta push retries exhausted");
        Some(PushResult {
            attempted: true,
            status_code: last_status,
            attempts,
            duration_seconds: started.elapsed().as_secs_f64(),
            error: Some(PushErrorKind::RetriesExhausted),
            message: Some(last_message),
        })
    }
}
