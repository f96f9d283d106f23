// ABOUTME: Endpoint configuration for managed gRPC channels.
// ABOUTME: Keep-alive, TLS, connect timeout and diagnostics settings with builder methods.

use std::time::Duration;
use tonic::transport::{ClientTlsConfig, Endpoint};

use crate::diagnostics::ChannelOption;
use crate::error::ChannelError;

/// HTTP/2 keep-alive pings for a managed channel.
#[derive(Debug, Clone)]
pub struct KeepAliveConfig {
    /// Ping period.
    pub interval: Duration,
    /// How long an unanswered ping may wait before the connection is dropped.
    pub timeout: Duration,
    /// Keep pinging while no call is open.
    pub while_idle: bool,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(20),
            while_idle: true,
        }
    }
}

/// Everything a [`ChannelProvider`](crate::ChannelProvider) needs to build one channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Target URI, scheme included (`http://host:port` or `https://host:port`).
    pub address: String,
    /// `None` turns keep-alive pings off.
    pub keep_alive: Option<KeepAliveConfig>,
    /// Upper bound on establishing the TCP/TLS connection.
    pub connect_timeout: Option<Duration>,
    /// Whether the connection is TLS. Kept in step with the address scheme.
    pub use_tls: bool,
    /// Attach [`ChannelDiagnostics`](crate::ChannelDiagnostics) and meter call traffic.
    pub diagnostics: bool,
}

impl ChannelConfig {
    /// Defaults: keep-alive on, 30s connect timeout, no diagnostics.
    /// TLS follows the scheme; only `https://` (any case) turns it on.
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into().trim().to_string();
        let use_tls = scheme_of(&address).is_some_and(|s| s.eq_ignore_ascii_case("https"));
        Self {
            address,
            keep_alive: Some(KeepAliveConfig::default()),
            connect_timeout: Some(Duration::from_secs(30)),
            use_tls,
            diagnostics: false,
        }
    }

    pub fn without_keep_alive(mut self) -> Self {
        self.keep_alive = None;
        self
    }

    pub fn with_keep_alive(mut self, config: KeepAliveConfig) -> Self {
        self.keep_alive = Some(config);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Turn TLS on; an `http://` address becomes `https://`.
    pub fn with_tls(self) -> Self {
        self.tls(true)
    }

    /// Turn TLS off; an `https://` address becomes `http://`.
    pub fn without_tls(self) -> Self {
        self.tls(false)
    }

    /// Capture a creation backtrace and meter traffic on channels built from this config.
    pub fn with_diagnostics(mut self) -> Self {
        self.diagnostics = true;
        self
    }

    fn tls(mut self, enabled: bool) -> Self {
        self.use_tls = enabled;
        let wanted = if enabled { "https" } else { "http" };
        if let Some((scheme, rest)) = self.address.split_once("://") {
            let is_http =
                scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https");
            if is_http && !scheme.eq_ignore_ascii_case(wanted) {
                self.address = format!("{wanted}://{rest}");
            }
        }
        self
    }

    /// The tonic [`Endpoint`] for this config. Nothing connects yet.
    pub fn endpoint(&self) -> Result<Endpoint, ChannelError> {
        let mut endpoint = Endpoint::from_shared(self.address.clone())
            .map_err(|e| ChannelError::InvalidAddress(e.to_string()))?;

        if self.use_tls {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new())
                .map_err(|e| ChannelError::ConnectionFailed(format!("TLS config error: {}", e)))?;
        }

        if let Some(ka) = &self.keep_alive {
            endpoint = endpoint
                .http2_keep_alive_interval(ka.interval)
                .keep_alive_timeout(ka.timeout)
                .keep_alive_while_idle(ka.while_idle);
        }

        if let Some(timeout) = self.connect_timeout {
            endpoint = endpoint.connect_timeout(timeout);
        }

        Ok(endpoint)
    }

    /// Effective settings as name/value pairs, for diagnostics.
    pub fn options(&self) -> Vec<ChannelOption> {
        let mut options = vec![ChannelOption::new("tls", self.use_tls)];
        match &self.keep_alive {
            Some(ka) => {
                options.push(ChannelOption::new(
                    "keep_alive.interval_ms",
                    ka.interval.as_millis(),
                ));
                options.push(ChannelOption::new(
                    "keep_alive.timeout_ms",
                    ka.timeout.as_millis(),
                ));
                options.push(ChannelOption::new("keep_alive.while_idle", ka.while_idle));
            }
            None => options.push(ChannelOption::new("keep_alive", "disabled")),
        }
        if let Some(timeout) = self.connect_timeout {
            options.push(ChannelOption::new(
                "connect_timeout_ms",
                timeout.as_millis(),
            ));
        }
        options
    }
}

fn scheme_of(address: &str) -> Option<&str> {
    address.split_once("://").map(|(scheme, _)| scheme)
}
