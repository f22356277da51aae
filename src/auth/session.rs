//! Auth session snapshot, lifecycle status, and builder.

// self
use crate::{
	_prelude::*,
	auth::{TokenSecret, UserRecord},
};

/// Lifecycle status for a stored session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
	/// No access token or no user record is stored.
	Anonymous,
	/// Token and user are present and the expiry lies in the future.
	Active,
	/// Token and user are present but the expiry has passed or is unknown.
	Expired,
}

/// Errors produced by [`AuthSessionBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum SessionBuildError {
	/// Issued when no access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// Issued when no expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
}

/// Credentials and user profile owned by the credential store.
///
/// A session without an access token is never authenticated, regardless of its expiry.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthSession {
	/// Bearer token attached to protected calls.
	pub access_token: Option<TokenSecret>,
	/// Token exchanged at the refresh endpoint.
	pub refresh_token: Option<TokenSecret>,
	/// Profile of the signed-in user.
	pub user: Option<UserRecord>,
	/// Instant after which the session is considered expired.
	pub expires_at: Option<OffsetDateTime>,
}
impl AuthSession {
	/// Returns a builder for a freshly issued session.
	pub fn builder() -> AuthSessionBuilder {
		AuthSessionBuilder::default()
	}

	/// Computes the lifecycle status at a given instant.
	pub fn status_at(&self, instant: OffsetDateTime) -> SessionStatus {
		if self.access_token.is_none() || self.user.is_none() {
			return SessionStatus::Anonymous;
		}

		match self.expires_at {
			Some(expires_at) if instant < expires_at => SessionStatus::Active,
			_ => SessionStatus::Expired,
		}
	}

	/// Convenience helper that checks the status using the current UTC instant.
	pub fn status(&self) -> SessionStatus {
		self.status_at(OffsetDateTime::now_utc())
	}

	/// Returns `true` when the expiry is missing or not after `instant`.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		self.expires_at.is_none_or(|expires_at| instant >= expires_at)
	}

	/// Returns `true` when token, user, and an unexpired session all exist at `instant`.
	pub fn is_authenticated_at(&self, instant: OffsetDateTime) -> bool {
		matches!(self.status_at(instant), SessionStatus::Active)
	}

	/// Returns `true` when the session is authenticated relative to the current clock.
	pub fn is_authenticated(&self) -> bool {
		self.is_authenticated_at(OffsetDateTime::now_utc())
	}

	/// Returns `true` when nothing at all is stored.
	pub fn is_empty(&self) -> bool {
		self.access_token.is_none()
			&& self.refresh_token.is_none()
			&& self.user.is_none()
			&& self.expires_at.is_none()
	}
}
impl Debug for AuthSession {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthSession")
			.field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("user", &self.user)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

/// Builder for [`AuthSession`] values produced by a login.
#[derive(Clone, Debug, Default)]
pub struct AuthSessionBuilder {
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	user: Option<UserRecord>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
}
impl AuthSessionBuilder {
	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Attaches the signed-in user.
	pub fn user(mut self, user: UserRecord) -> Self {
		self.user = Some(user);

		self
	}

	/// Sets the instant relative expiries are computed from (defaults to now).
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a relative expiry duration from the issued instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Consumes the builder and produces an [`AuthSession`].
	pub fn build(self) -> Result<AuthSession, SessionBuildError> {
		let access_token = self.access_token.ok_or(SessionBuildError::MissingAccessToken)?;
		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(delta)) => issued_at + delta,
			(None, None) => return Err(SessionBuildError::MissingExpiry),
		};

		Ok(AuthSession {
			access_token: Some(access_token),
			refresh_token: self.refresh_token,
			user: self.user,
			expires_at: Some(expires_at),
		})
	}
}
