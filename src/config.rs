//! Client configuration: API location, auth endpoint paths, session lifetime, idle policy, and
//! rate-limit budgets.
//!
//! Durations use milliseconds on the wire (`sessionLifetimeMs`, `maxIdleMs`, ...), so a config
//! file written for the web frontend can be loaded unchanged.

// self
use crate::{_prelude::*, rate_limit::RateLimitPolicy};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Configuration validation and construction errors.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Base URL must be absolute http(s).
	#[error("Base URL must use http or https: {url}.")]
	UnsupportedScheme {
		/// Offending base URL.
		url: String,
	},
	/// Endpoint path must be non-empty and start with `/`.
	#[error("The {name} path must start with `/`: {path:?}.")]
	InvalidPath {
		/// Which path failed validation.
		name: &'static str,
		/// Supplied value.
		path: String,
	},
	/// Durations must be strictly positive.
	#[error("The {name} duration must be positive.")]
	NonPositiveDuration {
		/// Which duration failed validation.
		name: &'static str,
	},
	/// Idle warning must fire before the idle limit is reached.
	#[error("Idle warning threshold must be shorter than the idle limit.")]
	WarningExceedsIdle,
	/// Rate-limit budgets need at least one attempt and a positive window.
	#[error("Rate limit for `{action}` needs a positive attempt budget and window.")]
	InvalidRateLimit {
		/// Action key of the offending policy.
		action: &'static str,
	},
	/// Joined endpoint URL cannot be parsed.
	#[error("Endpoint URL for {path:?} is invalid.")]
	InvalidEndpoint {
		/// Path that was joined onto the base URL.
		path: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Configuration document cannot be parsed.
	#[error("Configuration could not be parsed.")]
	Parse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
}

/// Idle-session policy for [`SessionMonitor`](crate::monitor::SessionMonitor).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IdleConfig {
	/// Inactivity after which the session expires.
	#[serde(rename = "maxIdleMs", with = "duration_ms")]
	pub max_idle: Duration,
	/// Remaining time at which warnings start.
	#[serde(rename = "warningThresholdMs", with = "duration_ms")]
	pub warning_threshold: Duration,
	/// Interval between idle evaluations.
	#[serde(rename = "checkIntervalMs", with = "duration_ms")]
	pub check_interval: Duration,
	/// Minimum spacing between two warnings.
	#[serde(rename = "warningCooldownMs", with = "duration_ms")]
	pub warning_cooldown: Duration,
}
impl IdleConfig {
	/// Checks durations and their ordering.
	pub fn validate(&self) -> Result<(), ConfigError> {
		ensure_positive("max_idle", self.max_idle)?;
		ensure_positive("warning_threshold", self.warning_threshold)?;
		ensure_positive("check_interval", self.check_interval)?;
		ensure_positive("warning_cooldown", self.warning_cooldown)?;

		if self.warning_threshold >= self.max_idle {
			return Err(ConfigError::WarningExceedsIdle);
		}

		Ok(())
	}
}
impl Default for IdleConfig {
	fn default() -> Self {
		Self {
			max_idle: Duration::minutes(30),
			warning_threshold: Duration::minutes(5),
			check_interval: Duration::seconds(30),
			warning_cooldown: Duration::seconds(60),
		}
	}
}

/// Attempt budgets for the rate-limited actions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RateLimitConfig {
	/// Budget for `login`.
	pub login: RateLimitPolicy,
	/// Budget for `password_reset`.
	pub password_reset: RateLimitPolicy,
}
impl RateLimitConfig {
	/// Checks that every policy allows at least one attempt over a positive window.
	pub fn validate(&self) -> Result<(), ConfigError> {
		for (action, policy) in [("login", &self.login), ("password_reset", &self.password_reset)] {
			if policy.max_attempts == 0 || !policy.window.is_positive() {
				return Err(ConfigError::InvalidRateLimit { action });
			}
		}

		Ok(())
	}
}
impl Default for RateLimitConfig {
	fn default() -> Self {
		Self {
			login: RateLimitPolicy::new(5, Duration::minutes(15)),
			password_reset: RateLimitPolicy::new(3, Duration::minutes(60)),
		}
	}
}

/// Validated client configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
	/// API root every path is joined onto.
	pub base_url: Url,
	/// Refresh endpoint path.
	#[serde(default = "default_refresh_path")]
	pub refresh_path: String,
	/// Login endpoint path.
	#[serde(default = "default_login_path")]
	pub login_path: String,
	/// Logout endpoint path.
	#[serde(default = "default_logout_path")]
	pub logout_path: String,
	/// Password reset endpoint path.
	#[serde(default = "default_password_reset_path")]
	pub password_reset_path: String,
	/// Session length applied when the server omits an expiry.
	#[serde(
		rename = "sessionLifetimeMs",
		with = "duration_ms",
		default = "default_session_lifetime"
	)]
	pub session_lifetime: Duration,
	/// Idle-session policy.
	#[serde(default)]
	pub idle: IdleConfig,
	/// Rate-limit budgets.
	#[serde(default)]
	pub limits: RateLimitConfig,
}
impl ClientConfig {
	/// Starts a builder with defaults for everything but the base URL.
	pub fn builder(base_url: Url) -> ClientConfigBuilder {
		ClientConfigBuilder::new(base_url)
	}

	/// Parses and validates a JSON configuration document.
	pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
		let mut de = serde_json::Deserializer::from_str(raw);
		let config: Self = serde_path_to_error::deserialize(&mut de)
			.map_err(|source| ConfigError::Parse { source })?;

		config.validate()?;

		Ok(config)
	}

	/// Checks every field.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if !matches!(self.base_url.scheme(), "http" | "https") {
			return Err(ConfigError::UnsupportedScheme { url: self.base_url.to_string() });
		}

		for (name, path) in [
			("refresh", &self.refresh_path),
			("login", &self.login_path),
			("logout", &self.logout_path),
			("password_reset", &self.password_reset_path),
		] {
			if !path.starts_with('/') {
				return Err(ConfigError::InvalidPath { name, path: path.clone() });
			}
		}

		ensure_positive("session_lifetime", self.session_lifetime)?;
		self.idle.validate()?;
		self.limits.validate()
	}

	/// Joins `path` onto the base URL as `<base>/<path>`, ignoring duplicate slashes.
	pub fn endpoint(&self, path: &str) -> Result<Url, ConfigError> {
		let joined = format!(
			"{}/{}",
			self.base_url.as_str().trim_end_matches('/'),
			path.trim_start_matches('/')
		);

		Url::parse(&joined)
			.map_err(|source| ConfigError::InvalidEndpoint { path: path.to_owned(), source })
	}

	/// Returns `true` when `url` points at the refresh endpoint.
	pub fn is_refresh_endpoint(&self, url: &Url) -> bool {
		self.endpoint(&self.refresh_path).is_ok_and(|refresh| refresh.path() == url.path())
	}
}

/// Builder for [`ClientConfig`].
#[derive(Clone, Debug)]
pub struct ClientConfigBuilder {
	config: ClientConfig,
}
impl ClientConfigBuilder {
	/// Creates a builder seeded with defaults.
	pub fn new(base_url: Url) -> Self {
		Self {
			config: ClientConfig {
				base_url,
				refresh_path: default_refresh_path(),
				login_path: default_login_path(),
				logout_path: default_logout_path(),
				password_reset_path: default_password_reset_path(),
				session_lifetime: default_session_lifetime(),
				idle: IdleConfig::default(),
				limits: RateLimitConfig::default(),
			},
		}
	}

	/// Overrides the refresh endpoint path.
	pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
		self.config.refresh_path = path.into();

		self
	}

	/// Overrides the login endpoint path.
	pub fn login_path(mut self, path: impl Into<String>) -> Self {
		self.config.login_path = path.into();

		self
	}

	/// Overrides the logout endpoint path.
	pub fn logout_path(mut self, path: impl Into<String>) -> Self {
		self.config.logout_path = path.into();

		self
	}

	/// Overrides the password reset endpoint path.
	pub fn password_reset_path(mut self, path: impl Into<String>) -> Self {
		self.config.password_reset_path = path.into();

		self
	}

	/// Overrides the fallback session lifetime.
	pub fn session_lifetime(mut self, lifetime: Duration) -> Self {
		self.config.session_lifetime = lifetime;

		self
	}

	/// Replaces the idle policy.
	pub fn idle(mut self, idle: IdleConfig) -> Self {
		self.config.idle = idle;

		self
	}

	/// Replaces the login budget.
	pub fn login_limit(mut self, policy: RateLimitPolicy) -> Self {
		self.config.limits.login = policy;

		self
	}

	/// Replaces the password reset budget.
	pub fn password_reset_limit(mut self, policy: RateLimitPolicy) -> Self {
		self.config.limits.password_reset = policy;

		self
	}

	/// Validates and returns the configuration.
	pub fn build(self) -> Result<ClientConfig, ConfigError> {
		self.config.validate()?;

		Ok(self.config)
	}
}

/// Serde adapter storing [`Duration`] values as integer milliseconds.
pub(crate) mod duration_ms {
	// crates.io
	use serde::{Deserializer, Serializer};
	// self
	use crate::_prelude::*;

	pub(crate) fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_i64(value.whole_milliseconds() as i64)
	}

	pub(crate) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		i64::deserialize(deserializer).map(Duration::milliseconds)
	}
}

fn ensure_positive(name: &'static str, value: Duration) -> Result<(), ConfigError> {
	if value.is_positive() { Ok(()) } else { Err(ConfigError::NonPositiveDuration { name }) }
}

fn default_refresh_path() -> String {
	"/auth/refresh".into()
}

fn default_login_path() -> String {
	"/auth/login".into()
}

fn default_logout_path() -> String {
	"/auth/logout".into()
}

fn default_password_reset_path() -> String {
	"/auth/forgot-password".into()
}

fn default_session_lifetime() -> Duration {
	Duration::hours(24)
}
