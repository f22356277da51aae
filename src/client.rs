//! Authenticated API client: the only component application code talks to.
//!
//! [`AuthClient::send`] attaches the stored bearer token, and on a 401 from any endpoint other
//! than the refresh endpoint hands control to the [`RefreshCoordinator`], then replays the
//! request exactly once with the recovered token. Login and password reset are rate limited and
//! screened before any network call.

// crates.io
use http::StatusCode;
// self
use crate::{
	_prelude::*,
	auth::{AuthSession, TokenSecret, UserRecord},
	config::ClientConfig,
	credentials::CredentialStore,
	http::{ApiRequest, ApiResponse, HttpTransport},
	monitor::{ActivitySource, MonitorHandle, SessionMonitor},
	obs::{self, OpKind, OpOutcome, OpSpan},
	rate_limit::{RateLimitDecision, RateLimiter, RetryDirective},
	refresh::{HttpRefreshExchange, RefreshCoordinator},
	signal::{LogoutReason, LogoutSignal},
	store::KeyValueStore,
	threat::{self, ScreenVerdict, ThreatKind},
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestTransport;

const LOGIN_KEY: &str = "login";
const PASSWORD_RESET_KEY: &str = "password_reset";

/// Client backed by [`ReqwestTransport`].
#[cfg(feature = "reqwest")]
pub type ReqwestAuthClient = AuthClient<ReqwestTransport>;

/// Email/password pair for [`AuthClient::login`].
#[derive(Clone, Debug)]
pub struct LoginCredentials {
	email: String,
	password: TokenSecret,
}
impl LoginCredentials {
	/// Validates that both fields are present.
	pub fn new(email: impl Into<String>, password: impl Into<String>) -> Result<Self> {
		let email = email.into().trim().to_owned();
		let password = TokenSecret::new(password);

		if email.is_empty() {
			return Err(Error::Validation { field: "email", reason: "must not be empty".into() });
		}
		if password.expose().is_empty() {
			return Err(Error::Validation {
				field: "password",
				reason: "must not be empty".into(),
			});
		}

		Ok(Self { email, password })
	}

	/// Trimmed email address.
	pub fn email(&self) -> &str {
		&self.email
	}
}

/// Result of [`AuthClient::login`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoginOutcome {
	/// Session stored; the signed-in user.
	Authenticated(UserRecord),
	/// Too many recent failures; nothing was sent.
	RateLimited(RetryDirective),
	/// The email failed the threat screen; nothing was sent.
	Rejected(Vec<ThreatKind>),
	/// The server refused the credentials (400, 401, or 403).
	InvalidCredentials,
}

/// Result of [`AuthClient::request_password_reset`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PasswordResetOutcome {
	/// The server accepted the request.
	Sent,
	/// Too many recent requests; nothing was sent.
	RateLimited(RetryDirective),
	/// The email failed the threat screen; nothing was sent.
	Rejected(Vec<ThreatKind>),
}

#[derive(Serialize)]
struct LoginRequestBody<'a> {
	email: &'a str,
	password: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponseBody {
	access_token: String,
	#[serde(default)]
	refresh_token: Option<String>,
	user: UserRecord,
	#[serde(default)]
	expires_in: Option<i64>,
	#[serde(default, with = "time::serde::rfc3339::option")]
	expires_at: Option<OffsetDateTime>,
}

#[derive(Serialize)]
struct PasswordResetBody<'a> {
	email: &'a str,
}

/// Bearer-token API client with transparent refresh.
pub struct AuthClient<T>
where
	T: ?Sized + HttpTransport,
{
	config: ClientConfig,
	transport: Arc<T>,
	credentials: CredentialStore,
	coordinator: Arc<RefreshCoordinator>,
	rate_limiter: RateLimiter,
	logout: LogoutSignal,
}
impl<T> AuthClient<T>
where
	T: ?Sized + HttpTransport,
{
	/// Builds a client that persists its session in `store`.
	pub fn new(
		config: ClientConfig,
		transport: Arc<T>,
		store: Arc<dyn KeyValueStore>,
	) -> Result<Self> {
		config.validate()?;

		let credentials = CredentialStore::new(store);
		let logout = LogoutSignal::default();
		let exchange =
			HttpRefreshExchange::new(transport.clone(), config.endpoint(&config.refresh_path)?);
		let coordinator = Arc::new(RefreshCoordinator::new(
			credentials.clone(),
			Arc::new(exchange),
			logout.clone(),
			config.session_lifetime,
		));

		Ok(Self {
			config,
			transport,
			credentials,
			coordinator,
			rate_limiter: RateLimiter::default(),
			logout,
		})
	}

	/// Installs the handler invoked once per forced logout (refresh failure or idle expiry).
	pub fn with_logout_handler(
		self,
		handler: impl Fn(LogoutReason) + Send + Sync + 'static,
	) -> Self {
		self.logout.set(handler);

		self
	}

	/// Client configuration.
	pub fn config(&self) -> &ClientConfig {
		&self.config
	}

	/// Persisted session.
	pub fn credentials(&self) -> &CredentialStore {
		&self.credentials
	}

	/// Refresh coordinator shared by every request.
	pub fn coordinator(&self) -> &RefreshCoordinator {
		&self.coordinator
	}

	/// Rate limiter guarding login and password reset.
	pub fn rate_limiter(&self) -> &RateLimiter {
		&self.rate_limiter
	}

	/// Logout signal shared with the coordinator and idle monitor.
	pub fn logout_signal(&self) -> &LogoutSignal {
		&self.logout
	}

	/// Sends `request`, refreshing the token and replaying once on a 401.
	///
	/// Responses other than an unrecovered 401 are returned as is, whatever their status.
	pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
		let span = OpSpan::new(OpKind::Request, "send");

		let result = span.instrument(self.send_with_recovery(request)).await;

		span.record(if result.is_ok() { OpOutcome::Success } else { OpOutcome::Failure });

		result
	}

	/// Signs in, storing the session on success.
	///
	/// Rate-limit and threat checks run before any network call; only rejected credentials count
	/// against the login budget, and a successful login resets it.
	pub async fn login(&self, credentials: &LoginCredentials) -> Result<LoginOutcome> {
		let span = OpSpan::new(OpKind::Login, "login");

		if let RateLimitDecision::Delay(directive) =
			self.rate_limiter.check(LOGIN_KEY, &self.config.limits.login)
		{
			span.record(OpOutcome::Blocked);

			return Ok(LoginOutcome::RateLimited(directive));
		}
		if let ScreenVerdict::Threats(threats) = threat::screen(credentials.email()) {
			span.record(OpOutcome::Blocked);

			return Ok(LoginOutcome::Rejected(threats));
		}

		let result = span.instrument(self.submit_login(credentials)).await;

		span.record(match &result {
			Ok(LoginOutcome::Authenticated(_)) => OpOutcome::Success,
			_ => OpOutcome::Failure,
		});

		result
	}

	/// Ends the session: notifies the server when possible, then always clears local state.
	///
	/// The logout signal is not fired; the caller initiated the logout.
	pub async fn logout(&self) -> Result<()> {
		let span = OpSpan::new(OpKind::Logout, "logout");

		let token = self.credentials.bearer_token().ok().flatten();
		let request = ApiRequest::post(&self.config.logout_path);
		let server_ack = span
			.instrument(self.dispatch(&request, token.as_ref()))
			.await
			.is_ok_and(|response| response.is_success());

		if !server_ack {
			obs::obs_event!(info, "Server logout did not succeed; clearing local session anyway.");
		}

		self.credentials.clear()?;
		span.record(OpOutcome::Success);

		Ok(())
	}

	/// Requests a password reset email; every attempt that passes the checks counts against the
	/// password reset budget.
	pub async fn request_password_reset(&self, email: &str) -> Result<PasswordResetOutcome> {
		let span = OpSpan::new(OpKind::PasswordReset, "request_password_reset");
		let email = email.trim();

		if email.is_empty() {
			span.record(OpOutcome::Failure);

			return Err(Error::Validation { field: "email", reason: "must not be empty".into() });
		}
		if let RateLimitDecision::Delay(directive) =
			self.rate_limiter.check(PASSWORD_RESET_KEY, &self.config.limits.password_reset)
		{
			span.record(OpOutcome::Blocked);

			return Ok(PasswordResetOutcome::RateLimited(directive));
		}
		if let ScreenVerdict::Threats(threats) = threat::screen(email) {
			span.record(OpOutcome::Blocked);

			return Ok(PasswordResetOutcome::Rejected(threats));
		}

		self.rate_limiter.record_attempt(PASSWORD_RESET_KEY);

		let result = span.instrument(self.submit_password_reset(email)).await;

		span.record(if result.is_ok() { OpOutcome::Success } else { OpOutcome::Failure });

		result
	}

	/// Starts the idle monitor for this session.
	///
	/// On expiry the session is cleared and the logout signal fires with
	/// [`LogoutReason::IdleTimeout`]. Must be called within a tokio runtime.
	pub fn monitor_idle(
		&self,
		source: Arc<dyn ActivitySource>,
		on_warning: impl Fn(Duration) + Send + 'static,
	) -> MonitorHandle {
		let monitor =
			SessionMonitor::new(self.config.idle).with_credentials(self.credentials.clone());
		let credentials = self.credentials.clone();
		let logout = self.logout.clone();

		monitor.start(
			source,
			move || {
				if credentials.clear().is_err() {
					obs::obs_event!(error, "Failed to clear credentials after idle expiry.");
				}

				logout.fire(LogoutReason::IdleTimeout);
			},
			on_warning,
		)
	}

	async fn send_with_recovery(&self, mut request: ApiRequest) -> Result<ApiResponse> {
		let used_token = self.credentials.bearer_token()?;
		let response = self.dispatch(&request, used_token.as_ref()).await?;

		if response.status != StatusCode::UNAUTHORIZED
			|| request.is_retried()
			|| self.is_refresh_request(&request)?
		{
			return Ok(response);
		}

		request.mark_retried();

		let token = self.coordinator.recover(used_token.as_ref()).await?;

		obs::obs_event!(debug, path = request.path(), "Replaying request after token refresh.");

		let replayed = self.dispatch(&request, Some(&token)).await?;

		if replayed.status == StatusCode::UNAUTHORIZED {
			return Err(Error::AuthExpired);
		}

		Ok(replayed)
	}

	async fn submit_login(&self, credentials: &LoginCredentials) -> Result<LoginOutcome> {
		let request = ApiRequest::post(&self.config.login_path).json(&LoginRequestBody {
			email: credentials.email(),
			password: credentials.password.expose(),
		})?;
		let response = self.dispatch(&request, None).await?;

		match response.status {
			status if status.is_success() => {
				let user = self.store_login(&response)?;

				self.rate_limiter.reset(LOGIN_KEY);

				Ok(LoginOutcome::Authenticated(user))
			},
			StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
				self.rate_limiter.record_attempt(LOGIN_KEY);

				Ok(LoginOutcome::InvalidCredentials)
			},
			status => Err(Error::UnexpectedStatus { status: status.as_u16() }),
		}
	}

	async fn submit_password_reset(&self, email: &str) -> Result<PasswordResetOutcome> {
		let request =
			ApiRequest::post(&self.config.password_reset_path).json(&PasswordResetBody { email })?;
		let response = self.dispatch(&request, None).await?;

		if response.is_success() {
			Ok(PasswordResetOutcome::Sent)
		} else {
			Err(Error::UnexpectedStatus { status: response.status.as_u16() })
		}
	}

	async fn dispatch(
		&self,
		request: &ApiRequest,
		bearer: Option<&TokenSecret>,
	) -> Result<ApiResponse> {
		let url = self.config.endpoint(request.path())?;
		let response = self.transport.execute(request.to_http(url, bearer)?).await?;

		Ok(response.into())
	}

	fn is_refresh_request(&self, request: &ApiRequest) -> Result<bool> {
		Ok(self.config.is_refresh_endpoint(&self.config.endpoint(request.path())?))
	}

	fn store_login(&self, response: &ApiResponse) -> Result<UserRecord> {
		let body: LoginResponseBody = response.json()?;
		let mut builder =
			AuthSession::builder().access_token(body.access_token).user(body.user.clone());

		if let Some(refresh) = body.refresh_token.filter(|token| !token.trim().is_empty()) {
			builder = builder.refresh_token(refresh);
		}

		builder = match (body.expires_at, body.expires_in) {
			(Some(instant), _) => builder.expires_at(instant),
			(None, Some(seconds)) if seconds > 0 => builder.expires_in(Duration::seconds(seconds)),
			_ => builder.expires_in(self.config.session_lifetime),
		};

		let session = builder
			.build()
			.map_err(|e| Error::Validation { field: "session", reason: e.to_string() })?;

		if session.access_token.as_ref().is_none_or(TokenSecret::is_blank) {
			return Err(Error::Validation {
				field: "accessToken",
				reason: "must not be empty".into(),
			});
		}

		self.credentials.store_session(&session)?;
		self.credentials.set_last_activity(OffsetDateTime::now_utc())?;

		Ok(body.user)
	}
}
impl<T> Debug for AuthClient<T>
where
	T: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthClient")
			.field("base_url", &self.config.base_url.as_str())
			.field("coordinator", &self.coordinator)
			.field("logout", &self.logout)
			.finish()
	}
}
