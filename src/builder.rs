//! Builder for [`DrifterSender`].
//!
//! Exposes endpoint selection, TLS options, optional timeouts and the opt-in
//! reconnection backoff. Settings can also be read from an INI section:
//!
//! ```ini
//! [drifter]
//! capability = 02hAozGflu
//! hostname = localhost
//! path = /1/log
//! port = 4443
//! ```

use std::{path::Path, sync::Arc, time::Duration};

use ini::Ini;

use crate::{
    config::{BackoffPolicy, DEFAULT_PORT, Endpoint, SenderConfig, TlsOptions},
    error::BuildError,
    sender::DrifterSender,
    transport::Transport,
};

macro_rules! ensure_positive {
    ($value:expr, $field:expr) => {{
        if $value == 0 {
            Err(BuildError::InvalidConfig(format!(
                "{} must be greater than zero",
                $field
            )))
        } else {
            Ok($value)
        }
    }};
}

macro_rules! option_setter {
    ($(#[$meta:meta])* $fn_name:ident, $field:ident, $ty:ty) => {
        $(#[$meta])*
        pub fn $fn_name(mut self, value: $ty) -> Self {
            self.$field = Some(value);
            self
        }
    };
}

/// Overrides for the reconnection backoff. Supplying any set enables backoff.
#[derive(Clone, Debug, Default)]
pub struct BackoffOverrides {
    base_ms: Option<u64>,
    cap_ms: Option<u64>,
    deadline_ms: Option<u64>,
}

impl BackoffOverrides {
    /// Create overrides with no custom values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the base delay in milliseconds.
    pub fn with_base_ms(mut self, base_ms: u64) -> Self {
        self.base_ms = Some(base_ms);
        self
    }

    /// Override the cap in milliseconds.
    pub fn with_cap_ms(mut self, cap_ms: u64) -> Self {
        self.cap_ms = Some(cap_ms);
        self
    }

    /// Override the deadline in milliseconds.
    pub fn with_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.deadline_ms = Some(deadline_ms);
        self
    }

    fn build(&self) -> Result<BackoffPolicy, BuildError> {
        let mut policy = BackoffPolicy::default();
        if let Some(base) = self.base_ms {
            policy.base = Duration::from_millis(ensure_positive!(base, "backoff_base_ms")?);
        }
        if let Some(cap) = self.cap_ms {
            policy.cap = Duration::from_millis(ensure_positive!(cap, "backoff_cap_ms")?);
        }
        if let Some(deadline) = self.deadline_ms {
            policy.deadline =
                Duration::from_millis(ensure_positive!(deadline, "backoff_deadline_ms")?);
        }
        if policy.cap < policy.base {
            return Err(BuildError::InvalidConfig(
                "backoff_cap_ms must not be smaller than backoff_base_ms".into(),
            ));
        }
        Ok(policy)
    }
}

/// Builder for constructing [`DrifterSender`] instances.
#[derive(Clone, Debug, Default)]
pub struct SenderBuilder {
    capability: Option<String>,
    hostname: Option<String>,
    path: Option<String>,
    port: Option<u16>,
    tls_domain: Option<String>,
    accept_invalid_certs: bool,
    connect_timeout_ms: Option<u64>,
    write_timeout_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
    flush_timeout_ms: Option<u64>,
    event_capacity: Option<usize>,
    backoff: Option<BackoffOverrides>,
}

impl SenderBuilder {
    /// Create a new builder with no endpoint configured.
    pub fn new() -> Self {
        Self::default()
    }

    option_setter!(
        #[doc = "Set the capability token sent with every request."]
        with_capability,
        capability,
        String
    );
    option_setter!(
        #[doc = "Set the host to connect to."]
        with_hostname,
        hostname,
        String
    );
    option_setter!(
        #[doc = "Set the request path, e.g. `/1/log`."]
        with_path,
        path,
        String
    );
    option_setter!(
        #[doc = "Set the port. Defaults to 443."]
        with_port,
        port,
        u16
    );
    option_setter!(
        #[doc = "Override the TLS server name. Defaults to the hostname."]
        with_tls_domain,
        tls_domain,
        String
    );
    option_setter!(with_connect_timeout_ms, connect_timeout_ms, u64);
    option_setter!(with_write_timeout_ms, write_timeout_ms, u64);
    option_setter!(with_poll_interval_ms, poll_interval_ms, u64);
    option_setter!(with_flush_timeout_ms, flush_timeout_ms, u64);
    option_setter!(with_event_capacity, event_capacity, usize);

    /// Accept invalid certificates and hostnames. Only for tests against
    /// self-signed endpoints.
    pub fn danger_accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    /// Enable reconnection backoff with the provided overrides.
    pub fn with_backoff(mut self, overrides: BackoffOverrides) -> Self {
        self.backoff = Some(overrides);
        self
    }

    /// Read settings from `section` of an INI file.
    pub fn from_ini_file(path: impl AsRef<Path>, section: &str) -> Result<Self, BuildError> {
        let path = path.as_ref();
        let ini = Ini::load_from_file(path).map_err(|err| BuildError::ConfigFile {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Self::from_ini(&ini, section).map_err(|err| match err {
            BuildError::InvalidConfig(message) => BuildError::ConfigFile {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    /// Read settings from `section` of INI text.
    pub fn from_ini_str(text: &str, section: &str) -> Result<Self, BuildError> {
        let ini = Ini::load_from_str(text)
            .map_err(|err| BuildError::InvalidConfig(format!("malformed ini: {err}")))?;
        Self::from_ini(&ini, section)
    }

    fn from_ini(ini: &Ini, section: &str) -> Result<Self, BuildError> {
        let properties = ini
            .section(Some(section))
            .ok_or_else(|| BuildError::InvalidConfig(format!("section [{section}] not found")))?;
        properties
            .iter()
            .try_fold(Self::new(), |builder, (key, value)| {
                builder.apply_ini_entry(key, value.trim())
            })
    }

    fn apply_ini_entry(self, key: &str, value: &str) -> Result<Self, BuildError> {
        let builder = match key {
            "capability" => self.with_capability(value.to_owned()),
            "hostname" => self.with_hostname(value.to_owned()),
            "path" => self.with_path(value.to_owned()),
            "port" => self.with_port(parse_value(key, value)?),
            "tls_domain" => self.with_tls_domain(value.to_owned()),
            "accept_invalid_certs" => self.danger_accept_invalid_certs(parse_bool(key, value)?),
            "connect_timeout_ms" => self.with_connect_timeout_ms(parse_value(key, value)?),
            "write_timeout_ms" => self.with_write_timeout_ms(parse_value(key, value)?),
            "poll_interval_ms" => self.with_poll_interval_ms(parse_value(key, value)?),
            "flush_timeout_ms" => self.with_flush_timeout_ms(parse_value(key, value)?),
            "event_capacity" => self.with_event_capacity(parse_value(key, value)?),
            "backoff_base_ms" => {
                let ms = parse_value(key, value)?;
                self.update_backoff(|o| o.with_base_ms(ms))
            }
            "backoff_cap_ms" => {
                let ms = parse_value(key, value)?;
                self.update_backoff(|o| o.with_cap_ms(ms))
            }
            "backoff_deadline_ms" => {
                let ms = parse_value(key, value)?;
                self.update_backoff(|o| o.with_deadline_ms(ms))
            }
            other => {
                return Err(BuildError::InvalidConfig(format!(
                    "unknown configuration key `{other}`"
                )));
            }
        };
        Ok(builder)
    }

    fn update_backoff(mut self, f: impl FnOnce(BackoffOverrides) -> BackoffOverrides) -> Self {
        self.backoff = Some(f(self.backoff.take().unwrap_or_default()));
        self
    }

    /// Validate the settings and produce a [`SenderConfig`].
    pub fn build_config(&self) -> Result<SenderConfig, BuildError> {
        let endpoint = Endpoint::new(
            required(&self.hostname, "hostname")?,
            self.port.unwrap_or(DEFAULT_PORT),
            required(&self.path, "path")?,
            required(&self.capability, "capability")?,
        );
        let mut config = SenderConfig::new(endpoint);
        config.tls = TlsOptions {
            domain: self.tls_domain.clone(),
            accept_invalid_certs: self.accept_invalid_certs,
        };
        self.apply_optional_fields(&mut config)?;
        if let Some(overrides) = &self.backoff {
            config.backoff = Some(overrides.build()?);
        }
        validate_config(&config)?;
        Ok(config)
    }

    fn apply_optional_fields(&self, config: &mut SenderConfig) -> Result<(), BuildError> {
        if let Some(ms) = self.connect_timeout_ms {
            config.connect_timeout = Some(millis(ms, "connect_timeout_ms")?);
        }
        if let Some(ms) = self.write_timeout_ms {
            config.write_timeout = Some(millis(ms, "write_timeout_ms")?);
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval = millis(ms, "poll_interval_ms")?;
        }
        if let Some(ms) = self.flush_timeout_ms {
            config.flush_timeout = millis(ms, "flush_timeout_ms")?;
        }
        if let Some(capacity) = self.event_capacity {
            config.event_capacity = capacity;
        }
        Ok(())
    }

    /// Build a sender using the native TLS transport.
    pub fn build(&self) -> Result<DrifterSender, BuildError> {
        DrifterSender::with_config(self.build_config()?)
    }

    /// Build a sender over a caller supplied transport.
    pub fn build_with_transport(
        &self,
        transport: Arc<dyn Transport>,
    ) -> Result<DrifterSender, BuildError> {
        DrifterSender::with_transport(self.build_config()?, transport)
    }
}

/// Reject configurations that would produce malformed requests or a stalled worker.
pub(crate) fn validate_config(config: &SenderConfig) -> Result<(), BuildError> {
    let endpoint = &config.endpoint;
    ensure_request_safe(&endpoint.hostname, "hostname")?;
    ensure_request_safe(&endpoint.path, "path")?;
    ensure_request_safe(&endpoint.capability, "capability")?;
    if !endpoint.path.starts_with('/') {
        return Err(BuildError::InvalidConfig("path must start with '/'".into()));
    }
    ensure_positive!(endpoint.port, "port")?;
    ensure_positive!(config.event_capacity, "event_capacity")?;
    if config.poll_interval.is_zero() {
        return Err(BuildError::InvalidConfig(
            "poll_interval_ms must be greater than zero".into(),
        ));
    }
    Ok(())
}

fn ensure_request_safe(value: &str, field: &str) -> Result<(), BuildError> {
    if value.is_empty() {
        return Err(BuildError::InvalidConfig(format!("{field} must not be empty")));
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(BuildError::InvalidConfig(format!(
            "{field} must not contain whitespace or control characters"
        )));
    }
    Ok(())
}

fn required(value: &Option<String>, field: &str) -> Result<String, BuildError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| BuildError::InvalidConfig(format!("{field} is required")))
}

fn millis(ms: u64, field: &str) -> Result<Duration, BuildError> {
    Ok(Duration::from_millis(ensure_positive!(ms, field)?))
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, BuildError> {
    value.parse().map_err(|_| {
        BuildError::InvalidConfig(format!("`{key}` has an invalid value `{value}`"))
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, BuildError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(BuildError::InvalidConfig(format!(
            "`{key}` has an invalid value `{value}`"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn complete() -> SenderBuilder {
        SenderBuilder::new()
            .with_capability("02hAozGflu".into())
            .with_hostname("localhost".into())
            .with_path("/1/log".into())
    }

    #[rstest]
    fn port_defaults_to_443(complete: SenderBuilder) {
        let config = complete.build_config().expect("valid config");
        assert_eq!(config.endpoint.port, 443);
        assert_eq!(config.endpoint.capability, "02hAozGflu");
        assert!(config.backoff.is_none());
    }

    #[rstest]
    #[case(SenderBuilder::new().with_hostname("h".into()).with_path("/p".into()), "capability")]
    #[case(SenderBuilder::new().with_capability("c".into()).with_path("/p".into()), "hostname")]
    #[case(SenderBuilder::new().with_capability("c".into()).with_hostname("h".into()), "path")]
    fn missing_required_field_is_rejected(#[case] builder: SenderBuilder, #[case] field: &str) {
        let err = builder.build_config().expect_err("missing field must fail");
        assert!(matches!(err, BuildError::InvalidConfig(msg) if msg.contains(field)));
    }

    #[rstest]
    #[case("/1/log\r\nX-Injected: 1", "path")]
    #[case("/1 /log", "path")]
    #[case("1/log", "path")]
    fn request_breaking_path_is_rejected(
        complete: SenderBuilder,
        #[case] path: &str,
        #[case] field: &str,
    ) {
        let err = complete
            .with_path(path.into())
            .build_config()
            .expect_err("path must be rejected");
        assert!(matches!(err, BuildError::InvalidConfig(msg) if msg.contains(field)));
    }

    #[rstest]
    fn zero_timeouts_are_rejected(complete: SenderBuilder) {
        let err = complete
            .with_connect_timeout_ms(0)
            .build_config()
            .expect_err("zero timeout must fail");
        assert!(matches!(err, BuildError::InvalidConfig(msg) if msg.contains("connect_timeout_ms")));
    }

    #[rstest]
    fn zero_port_is_rejected(complete: SenderBuilder) {
        let err = complete.with_port(0).build_config().expect_err("port 0");
        assert!(matches!(err, BuildError::InvalidConfig(msg) if msg.contains("port")));
    }

    #[rstest]
    fn backoff_overrides_enable_policy(complete: SenderBuilder) {
        let config = complete
            .with_backoff(BackoffOverrides::new().with_base_ms(50).with_cap_ms(400))
            .build_config()
            .expect("valid config");
        let policy = config.backoff.expect("backoff enabled");
        assert_eq!(policy.base, Duration::from_millis(50));
        assert_eq!(policy.cap, Duration::from_millis(400));
        assert_eq!(policy.deadline, BackoffPolicy::default().deadline);
    }

    #[rstest]
    fn backoff_cap_below_base_is_rejected(complete: SenderBuilder) {
        let err = complete
            .with_backoff(BackoffOverrides::new().with_base_ms(500).with_cap_ms(100))
            .build_config()
            .expect_err("cap below base");
        assert!(matches!(err, BuildError::InvalidConfig(msg) if msg.contains("backoff_cap_ms")));
    }

    #[rstest]
    fn ini_section_populates_builder() {
        let text = "\
[drifter]
capability = 02hAozGflu
hostname = localhost
path = /1/log
port = 4443
accept_invalid_certs = yes
connect_timeout_ms = 1500
backoff_deadline_ms = 9000
";
        let config = SenderBuilder::from_ini_str(text, "drifter")
            .and_then(|b| b.build_config())
            .expect("valid ini");
        assert_eq!(config.endpoint.port, 4443);
        assert_eq!(config.endpoint.path, "/1/log");
        assert!(config.tls.accept_invalid_certs);
        assert_eq!(config.connect_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(
            config.backoff.map(|b| b.deadline),
            Some(Duration::from_millis(9000))
        );
    }

    #[rstest]
    #[case("[drifter]\nretries = 3\n", "unknown configuration key")]
    #[case("[drifter]\nport = https\n", "`port` has an invalid value")]
    #[case("[other]\nport = 1\n", "section [drifter] not found")]
    fn ini_errors_are_reported(#[case] text: &str, #[case] expected: &str) {
        let err = SenderBuilder::from_ini_str(text, "drifter").expect_err("ini must fail");
        assert!(matches!(err, BuildError::InvalidConfig(msg) if msg.contains(expected)));
    }
}
