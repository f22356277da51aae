//! Single-flight token refresh with FIFO replay.
//!
//! A request that receives a 401 calls [`RefreshCoordinator::admit`]. The first one while the
//! coordinator is idle becomes the leader and gets a [`RefreshTicket`] that performs the only
//! refresh call; every later arrival is appended to the pending queue. When the ticket finishes,
//! every waiter, leader included, is settled in arrival order with the same outcome: the new
//! access token on success, or the same [`RefreshError`] after the session has been cleared and
//! the logout signal fired once.
//!
//! A 401 that lands after a failed refresh, while still carrying the token that refresh was meant
//! to replace, settles with that refresh's error instead of starting another attempt.
//!
//! The coordinator state lives in one [`Mutex`] that is never held across an `.await`.

mod metrics;

pub use metrics::RefreshMetrics;

// std
use std::mem;
// crates.io
use http::{Method, header::CONTENT_TYPE};
use tokio::sync::oneshot;
// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	credentials::CredentialStore,
	error::RefreshError,
	http::HttpTransport,
	obs::{self, OpKind, OpOutcome, OpSpan},
	signal::{LogoutReason, LogoutSignal},
};

/// Boxed future returned by [`RefreshExchange::exchange`].
pub type RefreshFuture<'a> =
	Pin<Box<dyn Future<Output = Result<RefreshedTokens, RefreshError>> + 'a + Send>>;

type Settle = Box<dyn FnOnce(Result<TokenSecret, RefreshError>) + Send>;

/// Network half of a refresh: trades a refresh token for new credentials.
pub trait RefreshExchange
where
	Self: 'static + Send + Sync,
{
	/// Calls the refresh endpoint with `refresh_token`.
	fn exchange<'a>(&'a self, refresh_token: &'a TokenSecret) -> RefreshFuture<'a>;
}

/// Credentials returned by a successful refresh.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefreshedTokens {
	/// New bearer token.
	pub access_token: TokenSecret,
	/// Rotated refresh token, when the server issued one.
	pub refresh_token: Option<TokenSecret>,
	/// Absolute expiry, when the server reported one.
	pub expires_at: Option<OffsetDateTime>,
}

/// [`RefreshExchange`] that posts `{"refreshToken": ...}` to the refresh endpoint.
///
/// A 2xx body must carry a non-empty `accessToken`; `refreshToken`, `expiresIn` (seconds), and
/// `expiresAt` (RFC 3339) are optional.
#[derive(Debug)]
pub struct HttpRefreshExchange<T>
where
	T: ?Sized,
{
	transport: Arc<T>,
	endpoint: Url,
}
impl<T> HttpRefreshExchange<T>
where
	T: ?Sized + HttpTransport,
{
	/// Creates an exchange that calls `endpoint` through `transport`.
	pub fn new(transport: Arc<T>, endpoint: Url) -> Self {
		Self { transport, endpoint }
	}

	/// Refresh endpoint URL.
	pub fn endpoint(&self) -> &Url {
		&self.endpoint
	}

	fn build_request(
		&self,
		refresh_token: &TokenSecret,
	) -> Result<http::Request<Vec<u8>>, RefreshError> {
		let body = serde_json::to_vec(&RefreshRequestBody { refresh_token: refresh_token.expose() })
			.map_err(|e| RefreshError::Network { message: e.to_string() })?;

		http::Request::builder()
			.method(Method::POST)
			.uri(self.endpoint.as_str())
			.header(CONTENT_TYPE, "application/json")
			.body(body)
			.map_err(|e| RefreshError::Network { message: e.to_string() })
	}
}
impl<T> RefreshExchange for HttpRefreshExchange<T>
where
	T: ?Sized + HttpTransport,
{
	fn exchange<'a>(&'a self, refresh_token: &'a TokenSecret) -> RefreshFuture<'a> {
		Box::pin(async move {
			let request = self.build_request(refresh_token)?;
			let response = self
				.transport
				.execute(request)
				.await
				.map_err(|e| RefreshError::Network { message: e.to_string() })?;
			let status = response.status();

			if !status.is_success() {
				return Err(RefreshError::Rejected { status: status.as_u16() });
			}

			parse_refresh_body(response.body(), OffsetDateTime::now_utc())
		})
	}
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequestBody<'a> {
	refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponseBody {
	#[serde(default)]
	access_token: Option<String>,
	#[serde(default)]
	refresh_token: Option<String>,
	#[serde(default)]
	expires_in: Option<i64>,
	#[serde(default, with = "time::serde::rfc3339::option")]
	expires_at: Option<OffsetDateTime>,
}

/// One request waiting for the in-flight refresh.
pub struct PendingRequest {
	settle: Settle,
}
impl PendingRequest {
	fn new(settle: impl FnOnce(Result<TokenSecret, RefreshError>) + Send + 'static) -> Self {
		Self { settle: Box::new(settle) }
	}

	fn settle(self, outcome: Result<TokenSecret, RefreshError>) {
		(self.settle)(outcome);
	}
}
impl Debug for PendingRequest {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("PendingRequest(..)")
	}
}

/// Coordinator state: idle, or refreshing with the waiters queued in arrival order.
#[derive(Debug, Default)]
pub enum RefreshState {
	/// No refresh in flight.
	#[default]
	Idle,
	/// One refresh in flight; the leader is the first entry.
	Refreshing {
		/// Waiters in arrival order.
		pending: VecDeque<PendingRequest>,
	},
}

/// Read-only snapshot of [`RefreshState`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshPhase {
	/// No refresh in flight.
	Idle,
	/// One refresh in flight.
	Refreshing {
		/// Number of waiters, leader included.
		pending: usize,
	},
}

/// Result of [`RefreshCoordinator::admit`].
#[derive(Debug)]
pub enum Admission<'a> {
	/// A refresh already completed since the rejected request was sent; replay with this token.
	/// The settle callback is dropped without being called.
	Fresh(TokenSecret),
	/// The caller must drive the refresh; its settle callback is first in the queue.
	Leader(RefreshTicket<'a>),
	/// The refresh that would replace the rejected token already failed and the session is still
	/// cleared; the caller gets the same error. The settle callback is dropped without being called.
	Failed(RefreshError),
	/// A refresh is in flight; the settle callback runs when it finishes.
	Queued {
		/// One-based position in the queue, leader included.
		position: usize,
	},
}

#[derive(Debug)]
struct FailedRefresh {
	stale: Option<TokenSecret>,
	error: RefreshError,
}

/// Owns the single in-flight refresh and the queue of requests waiting on it.
pub struct RefreshCoordinator {
	state: Mutex<RefreshState>,
	// Lock order: `state` before `last_failure`.
	last_failure: Mutex<Option<FailedRefresh>>,
	credentials: CredentialStore,
	exchange: Arc<dyn RefreshExchange>,
	logout: LogoutSignal,
	session_lifetime: Duration,
	metrics: RefreshMetrics,
}
impl RefreshCoordinator {
	/// Creates an idle coordinator.
	///
	/// `session_lifetime` sets the expiry when the refresh response carries none.
	pub fn new(
		credentials: CredentialStore,
		exchange: Arc<dyn RefreshExchange>,
		logout: LogoutSignal,
		session_lifetime: Duration,
	) -> Self {
		Self {
			state: Mutex::new(RefreshState::Idle),
			last_failure: Mutex::new(None),
			credentials,
			exchange,
			logout,
			session_lifetime,
			metrics: RefreshMetrics::default(),
		}
	}

	/// Current phase.
	pub fn state(&self) -> RefreshPhase {
		match &*self.state.lock() {
			RefreshState::Idle => RefreshPhase::Idle,
			RefreshState::Refreshing { pending } =>
				RefreshPhase::Refreshing { pending: pending.len() },
		}
	}

	/// Refresh counters.
	pub fn metrics(&self) -> &RefreshMetrics {
		&self.metrics
	}

	/// Registers a request that was rejected with 401 while carrying `used_token`.
	pub fn admit(
		&self,
		used_token: Option<&TokenSecret>,
		settle: impl FnOnce(Result<TokenSecret, RefreshError>) + Send + 'static,
	) -> Admission<'_> {
		let mut state = self.state.lock();

		if let RefreshState::Refreshing { pending } = &mut *state {
			pending.push_back(PendingRequest::new(settle));
			self.metrics.record_queued();

			let position = pending.len();

			obs::obs_event!(debug, position, "Request queued behind the in-flight refresh.");

			return Admission::Queued { position };
		}
		if let Some(current) = self.rotated_since(used_token) {
			return Admission::Fresh(current);
		}
		if let Some(error) = self.failed_for(used_token) {
			obs::obs_event!(debug, error = %error, "Rejection settled by the last failed refresh.");

			return Admission::Failed(error);
		}

		*state = RefreshState::Refreshing { pending: VecDeque::from([PendingRequest::new(settle)]) };

		Admission::Leader(RefreshTicket {
			coordinator: self,
			used_token: used_token.cloned(),
			finished: false,
		})
	}

	/// Waits for a token to replay with: joins the in-flight refresh or starts one.
	pub async fn recover(
		&self,
		used_token: Option<&TokenSecret>,
	) -> Result<TokenSecret, RefreshError> {
		let (tx, rx) = oneshot::channel();
		let admission = self.admit(used_token, move |outcome| {
			let _ = tx.send(outcome);
		});

		match admission {
			Admission::Fresh(token) => Ok(token),
			Admission::Leader(ticket) => ticket.run().await,
			Admission::Failed(error) => Err(error),
			Admission::Queued { .. } => rx.await.unwrap_or(Err(RefreshError::Abandoned)),
		}
	}

	fn rotated_since(&self, used_token: Option<&TokenSecret>) -> Option<TokenSecret> {
		let current = self.credentials.bearer_token().ok().flatten()?;

		(used_token != Some(&current)).then_some(current)
	}

	// A new login stores a refresh token again, which retires the remembered failure.
	fn failed_for(&self, used_token: Option<&TokenSecret>) -> Option<RefreshError> {
		let last_failure = self.last_failure.lock();
		let failed = last_failure.as_ref().filter(|failed| failed.stale.as_ref() == used_token)?;

		matches!(self.credentials.refresh_token(), Ok(None)).then(|| failed.error.clone())
	}

	async fn perform(&self) -> Result<TokenSecret, RefreshError> {
		let refresh_token = match self.credentials.refresh_token() {
			Ok(Some(token)) if !token.is_blank() => token,
			Ok(_) => return Err(RefreshError::MissingRefreshToken),
			Err(e) => return Err(RefreshError::Storage { message: e.to_string() }),
		};
		let tokens = self.exchange.exchange(&refresh_token).await?;
		let expires_at =
			tokens.expires_at.unwrap_or_else(|| OffsetDateTime::now_utc() + self.session_lifetime);

		self.credentials
			.rotate(&tokens.access_token, tokens.refresh_token.as_ref(), expires_at)
			.map_err(|e| RefreshError::Storage { message: e.to_string() })?;

		Ok(tokens.access_token)
	}

	fn finish(&self, stale: Option<TokenSecret>, outcome: &Result<TokenSecret, RefreshError>) {
		match outcome {
			Ok(_) => {
				self.metrics.record_success();

				*self.last_failure.lock() = None;
			},
			Err(error) => {
				self.metrics.record_failure();

				// Waiters must observe the cleared session.
				if self.credentials.clear().is_err() {
					obs::obs_event!(error, "Failed to clear credentials after a refresh failure.");
				}

				// Recorded before the state returns to idle so late rejections find it.
				*self.last_failure.lock() = Some(FailedRefresh { stale, error: error.clone() });
			},
		}

		let pending = match mem::take(&mut *self.state.lock()) {
			RefreshState::Refreshing { pending } => pending,
			RefreshState::Idle => VecDeque::new(),
		};

		for waiter in pending {
			waiter.settle(outcome.clone());
		}

		if let Err(e) = outcome {
			obs::obs_event!(warn, error = %e, "Token refresh failed; session cleared.");

			self.logout.fire(match e {
				RefreshError::MissingRefreshToken => LogoutReason::MissingRefreshToken,
				_ => LogoutReason::RefreshFailed,
			});
		}
	}

	fn abandon(&self) {
		self.metrics.record_failure();

		let pending = match mem::take(&mut *self.state.lock()) {
			RefreshState::Refreshing { pending } => pending,
			RefreshState::Idle => VecDeque::new(),
		};

		for waiter in pending {
			waiter.settle(Err(RefreshError::Abandoned));
		}
	}
}

impl Debug for RefreshCoordinator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshCoordinator")
			.field("state", &self.state())
			.field("session_lifetime", &self.session_lifetime)
			.field("metrics", &self.metrics)
			.finish()
	}
}

/// Permission to perform the single in-flight refresh.
///
/// Dropping the ticket before [`run`](Self::run) completes settles every waiter with
/// [`RefreshError::Abandoned`] and returns the coordinator to idle without touching the session.
#[derive(Debug)]
pub struct RefreshTicket<'a> {
	coordinator: &'a RefreshCoordinator,
	used_token: Option<TokenSecret>,
	finished: bool,
}
impl RefreshTicket<'_> {
	/// Performs the refresh and settles every waiter in arrival order.
	pub async fn run(mut self) -> Result<TokenSecret, RefreshError> {
		let coordinator = self.coordinator;
		let span = OpSpan::new(OpKind::Refresh, "run");

		coordinator.metrics.record_attempt();

		let outcome = span.instrument(coordinator.perform()).await;

		self.finished = true;
		coordinator.finish(self.used_token.take(), &outcome);
		span.record(if outcome.is_ok() { OpOutcome::Success } else { OpOutcome::Failure });

		outcome
	}
}
impl Drop for RefreshTicket<'_> {
	fn drop(&mut self) {
		if !self.finished {
			self.coordinator.abandon();
		}
	}
}

fn parse_refresh_body(body: &[u8], now: OffsetDateTime) -> Result<RefreshedTokens, RefreshError> {
	let mut de = serde_json::Deserializer::from_slice(body);
	let parsed: RefreshResponseBody = serde_path_to_error::deserialize(&mut de)
		.map_err(|e| RefreshError::MalformedResponse { message: e.to_string() })?;
	let access_token = parsed
		.access_token
		.map(TokenSecret::new)
		.filter(|token| !token.is_blank())
		.ok_or_else(|| RefreshError::MalformedResponse {
			message: "`accessToken` is missing or empty".into(),
		})?;
	let expires_at = match (parsed.expires_at, parsed.expires_in) {
		(Some(instant), _) => Some(instant),
		(None, Some(seconds)) if seconds > 0 => Some(now + Duration::seconds(seconds)),
		(None, Some(_)) =>
			return Err(RefreshError::MalformedResponse {
				message: "`expiresIn` must be positive".into(),
			}),
		(None, None) => None,
	};

	Ok(RefreshedTokens {
		access_token,
		refresh_token: parsed.refresh_token.map(TokenSecret::new).filter(|token| !token.is_blank()),
		expires_at,
	})
}
