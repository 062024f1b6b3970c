//! Readiness probes for freshly booted machines.
//!
//! Two primitives are provided:
//! - [`tcp_ready`]: a single connect-and-read check, with [`wait_for_tcp`]
//!   composing it into a bounded loop;
//! - [`wait_for_http`]: a bounded HTTP poll that escalates once, through a
//!   caller-supplied restart action, before giving up.

use crate::error::{Error, Result};
use std::io::Read;
use std::net::TcpStream;
use std::time::Duration;

/// How long a connected probe waits for the first byte.
const TCP_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for a single HTTP probe request.
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Bounded retry policy: `attempts` tries, `interval` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts.
    pub attempts: u32,
    /// Sleep between attempts.
    pub interval: Duration,
}

impl RetryPolicy {
    /// Daemon readiness policy: 24 attempts, 10 seconds apart.
    pub const DOCKER: RetryPolicy = RetryPolicy::new(24, Duration::from_secs(10));

    /// Create a policy.
    pub const fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// Run `check` until it returns true or attempts run out.
    ///
    /// Returns whether `check` succeeded. Does not sleep after the last
    /// attempt.
    pub fn poll<F>(&self, mut check: F) -> bool
    where
        F: FnMut(u32) -> bool,
    {
        for attempt in 1..=self.attempts {
            if check(attempt) {
                return true;
            }
            if attempt < self.attempts && !self.interval.is_zero() {
                std::thread::sleep(self.interval);
            }
        }
        false
    }
}

/// Check that `addr` accepts a connection and sends at least one byte.
///
/// A bare connect can succeed before the service speaks its protocol (NAT
/// port forwarding accepts immediately), so the first byte is awaited too.
pub fn tcp_ready(addr: &str) -> Result<()> {
    let mut stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(TCP_READ_TIMEOUT))?;

    let mut buf = [0u8; 1];
    match stream.read(&mut buf)? {
        0 => Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("{} closed the connection", addr),
        ))),
        _ => Ok(()),
    }
}

/// Retry [`tcp_ready`] under `policy`.
pub fn wait_for_tcp(addr: &str, policy: RetryPolicy) -> Result<()> {
    let ready = policy.poll(|attempt| match tcp_ready(addr) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(addr = %addr, attempt, error = %e, "tcp endpoint not ready");
            false
        }
    });

    if ready {
        Ok(())
    } else {
        Err(Error::NotReady {
            target: addr.to_string(),
            attempts: policy.attempts,
        })
    }
}

/// Failure of a single HTTP probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// The server answered with something that is not valid HTTP. The
    /// service is up but speaks another protocol (e.g. TLS).
    Malformed(String),
    /// No usable answer.
    Failed(String),
}

/// A single HTTP reachability check.
pub trait HttpProbe {
    /// Issue one request to `url`. Any HTTP response counts as success.
    fn check(&self, url: &str) -> std::result::Result<(), ProbeError>;
}

/// [`HttpProbe`] backed by a blocking reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestProbe {
    client: reqwest::blocking::Client,
}

impl ReqwestProbe {
    /// Create a probe with a short per-request timeout.
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl HttpProbe for ReqwestProbe {
    fn check(&self, url: &str) -> std::result::Result<(), ProbeError> {
        match self.client.get(url).send() {
            Ok(_) => Ok(()),
            Err(e) => {
                let chain = error_chain(&e);
                if is_malformed_response(&chain) {
                    Err(ProbeError::Malformed(chain))
                } else {
                    Err(ProbeError::Failed(chain))
                }
            }
        }
    }
}

/// Flatten an error and its sources into one message.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(e) = source {
        msg.push_str(": ");
        msg.push_str(&e.to_string());
        source = e.source();
    }
    msg
}

/// Whether an error message describes a response that failed to parse as
/// HTTP, as opposed to a connection failure.
fn is_malformed_response(msg: &str) -> bool {
    let msg = msg.to_ascii_lowercase();
    msg.contains("malformed http response")
        || msg.contains("invalid http version")
        || msg.contains("invalid http status")
        || msg.contains("received http/0.9")
}

/// Poll `url` once under `policy`. Success and malformed responses both count
/// as ready.
fn poll_http<P: HttpProbe + ?Sized>(probe: &P, url: &str, policy: RetryPolicy) -> bool {
    policy.poll(|attempt| match probe.check(url) {
        Ok(()) => true,
        Err(ProbeError::Malformed(msg)) => {
            tracing::debug!(
                url = %url,
                attempt,
                error = %msg,
                "malformed response, endpoint is up"
            );
            true
        }
        Err(ProbeError::Failed(msg)) => {
            tracing::debug!(url = %url, attempt, error = %msg, "http endpoint not ready");
            false
        }
    })
}

/// Wait for `url` to answer, escalating once.
///
/// Polls under `policy`; if the bound is exhausted, runs `restart` once and
/// polls again with the same bound. Returns [`Error::NotReady`] if the
/// endpoint is still unreachable after that.
pub fn wait_for_http<P, R>(probe: &P, url: &str, policy: RetryPolicy, mut restart: R) -> Result<()>
where
    P: HttpProbe + ?Sized,
    R: FnMut() -> Result<()>,
{
    if poll_http(probe, url, policy) {
        return Ok(());
    }

    tracing::warn!(
        url = %url,
        attempts = policy.attempts,
        "endpoint not ready, restarting service"
    );
    restart()?;

    if poll_http(probe, url, policy) {
        return Ok(());
    }

    Err(Error::NotReady {
        target: url.to_string(),
        attempts: policy.attempts * 2,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::io::Write;
    use std::net::TcpListener;

    /// Probe that fails `failures` times, then answers with `then`.
    struct ScriptedProbe {
        failures: u32,
        then: std::result::Result<(), ProbeError>,
        calls: Cell<u32>,
    }

    impl ScriptedProbe {
        fn new(failures: u32, then: std::result::Result<(), ProbeError>) -> Self {
            Self {
                failures,
                then,
                calls: Cell::new(0),
            }
        }
    }

    impl HttpProbe for ScriptedProbe {
        fn check(&self, _url: &str) -> std::result::Result<(), ProbeError> {
            let n = self.calls.get() + 1;
            self.calls.set(n);
            if n <= self.failures {
                Err(ProbeError::Failed("connection refused".into()))
            } else {
                self.then.clone()
            }
        }
    }

    const FAST: RetryPolicy = RetryPolicy::new(24, Duration::ZERO);

    #[test]
    fn test_http_ready_without_escalation() {
        let probe = ScriptedProbe::new(3, Ok(()));
        let mut restarts = 0;
        wait_for_http(&probe, "http://h:2375/_ping", FAST, || {
            restarts += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(probe.calls.get(), 4);
        assert_eq!(restarts, 0);
    }

    #[test]
    fn test_malformed_response_counts_as_ready() {
        let probe = ScriptedProbe::new(0, Err(ProbeError::Malformed("bad".into())));
        wait_for_http(&probe, "http://h:2375/_ping", FAST, || {
            panic!("restart must not be called")
        })
        .unwrap();
        assert_eq!(probe.calls.get(), 1);
    }

    #[test]
    fn test_escalation_restarts_exactly_once_then_fails() {
        let probe = ScriptedProbe::new(u32::MAX, Ok(()));
        let mut restarts = 0;
        let err = wait_for_http(&probe, "http://h:2375/_ping", FAST, || {
            restarts += 1;
            Ok(())
        })
        .unwrap_err();

        assert_eq!(restarts, 1);
        assert_eq!(probe.calls.get(), 48);
        assert!(matches!(err, Error::NotReady { attempts: 48, .. }));
    }

    #[test]
    fn test_escalation_recovers_after_restart() {
        let probe = ScriptedProbe::new(30, Ok(()));
        let mut restarts = 0;
        wait_for_http(&probe, "http://h:2375/_ping", FAST, || {
            restarts += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(restarts, 1);
        assert_eq!(probe.calls.get(), 31);
    }

    #[test]
    fn test_restart_failure_propagates() {
        let probe = ScriptedProbe::new(u32::MAX, Ok(()));
        let err = wait_for_http(&probe, "http://h:2375/_ping", FAST, || {
            Err(Error::command_failed("ssh", "connection reset"))
        })
        .unwrap_err();
        assert!(matches!(err, Error::CommandFailed { .. }));
        assert_eq!(probe.calls.get(), 24);
    }

    #[test]
    fn test_malformed_response_classification() {
        assert!(is_malformed_response(
            "error sending request: invalid HTTP version parsed"
        ));
        assert!(is_malformed_response("net/http: malformed HTTP response"));
        assert!(!is_malformed_response(
            "error sending request: tcp connect error: Connection refused"
        ));
    }

    #[test]
    fn test_tcp_ready_after_first_byte() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            conn.write_all(b"SSH-2.0-OpenSSH\r\n").unwrap();
        });

        tcp_ready(&addr).unwrap();
        server.join().unwrap();
    }

    #[test]
    fn test_tcp_not_ready_when_closed_without_data() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = std::thread::spawn(move || {
            let (conn, _) = listener.accept().unwrap();
            drop(conn);
        });

        assert!(tcp_ready(&addr).is_err());
        server.join().unwrap();
    }

    #[test]
    fn test_wait_for_tcp_gives_up() {
        // Bind then drop to get a port with nothing listening.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let err = wait_for_tcp(&addr, RetryPolicy::new(2, Duration::ZERO)).unwrap_err();
        assert!(matches!(err, Error::NotReady { attempts: 2, .. }));
    }
}
