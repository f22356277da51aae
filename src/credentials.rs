//! Credential store: the persisted auth session behind a [`KeyValueStore`].
//!
//! Every field lives under its own key so other processes sharing the same store can read the
//! layout directly:
//!
//! | key              | value                              |
//! |------------------|------------------------------------|
//! | `access_token`   | opaque bearer token                |
//! | `refresh_token`  | opaque refresh token               |
//! | `user_data`      | JSON-serialized [`UserRecord`]     |
//! | `session_expiry` | RFC 3339 timestamp                 |
//! | `last_activity`  | Unix epoch milliseconds            |
//!
//! Multi-field writes (login, refresh rotation, clear) go through a single
//! [`KeyValueStore::apply`] batch so no partial state is observable.

// crates.io
use time::format_description::well_known::Rfc3339;
// self
use crate::{
	_prelude::*,
	auth::{AuthSession, TokenSecret, UserRecord},
	store::{KeyValueStore, StoreError, StoreOp},
};

/// Keys of the persisted session layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CredentialKey {
	/// Bearer token.
	AccessToken,
	/// Refresh token.
	RefreshToken,
	/// Serialized user record.
	UserData,
	/// Session expiry timestamp.
	SessionExpiry,
	/// Last observed user activity.
	LastActivity,
}
impl CredentialKey {
	/// Every key, in layout order.
	pub const ALL: [CredentialKey; 5] = [
		CredentialKey::AccessToken,
		CredentialKey::RefreshToken,
		CredentialKey::UserData,
		CredentialKey::SessionExpiry,
		CredentialKey::LastActivity,
	];

	/// Returns the persisted key name.
	pub const fn as_str(self) -> &'static str {
		match self {
			CredentialKey::AccessToken => "access_token",
			CredentialKey::RefreshToken => "refresh_token",
			CredentialKey::UserData => "user_data",
			CredentialKey::SessionExpiry => "session_expiry",
			CredentialKey::LastActivity => "last_activity",
		}
	}
}
impl Display for CredentialKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Owner of the persisted [`AuthSession`].
///
/// Cloning is cheap; clones share the backing store.
#[derive(Clone)]
pub struct CredentialStore {
	backend: Arc<dyn KeyValueStore>,
}
impl CredentialStore {
	/// Wraps a persistence backend.
	pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
		Self { backend }
	}

	/// Returns the stored access token.
	pub fn access_token(&self) -> Result<Option<TokenSecret>, StoreError> {
		Ok(self.read(CredentialKey::AccessToken)?.map(TokenSecret::new))
	}

	/// Replaces the stored access token.
	pub fn set_access_token(&self, token: &TokenSecret) -> Result<(), StoreError> {
		self.backend.set(CredentialKey::AccessToken.as_str(), token.expose().to_owned())
	}

	/// Returns the stored refresh token.
	pub fn refresh_token(&self) -> Result<Option<TokenSecret>, StoreError> {
		Ok(self.read(CredentialKey::RefreshToken)?.map(TokenSecret::new))
	}

	/// Replaces the stored refresh token.
	pub fn set_refresh_token(&self, token: &TokenSecret) -> Result<(), StoreError> {
		self.backend.set(CredentialKey::RefreshToken.as_str(), token.expose().to_owned())
	}

	/// Returns the stored user record.
	pub fn user(&self) -> Result<Option<UserRecord>, StoreError> {
		self.read(CredentialKey::UserData)?
			.map(|raw| {
				serde_json::from_str(&raw).map_err(|e| StoreError::Serialization {
					message: format!("Failed to parse {}: {e}", CredentialKey::UserData),
				})
			})
			.transpose()
	}

	/// Replaces the stored user record.
	pub fn set_user(&self, user: &UserRecord) -> Result<(), StoreError> {
		self.backend.set(CredentialKey::UserData.as_str(), encode_user(user)?)
	}

	/// Returns the stored session expiry.
	pub fn expires_at(&self) -> Result<Option<OffsetDateTime>, StoreError> {
		self.read(CredentialKey::SessionExpiry)?
			.map(|raw| {
				OffsetDateTime::parse(&raw, &Rfc3339).map_err(|e| StoreError::Serialization {
					message: format!("Failed to parse {}: {e}", CredentialKey::SessionExpiry),
				})
			})
			.transpose()
	}

	/// Replaces the stored session expiry.
	pub fn set_expires_at(&self, instant: OffsetDateTime) -> Result<(), StoreError> {
		self.backend.set(CredentialKey::SessionExpiry.as_str(), encode_instant(instant)?)
	}

	/// Returns the persisted last-activity instant.
	pub fn last_activity(&self) -> Result<Option<OffsetDateTime>, StoreError> {
		self.read(CredentialKey::LastActivity)?
			.map(|raw| {
				raw.parse::<i128>()
					.ok()
					.and_then(|millis| millis.checked_mul(1_000_000))
					.and_then(|nanos| OffsetDateTime::from_unix_timestamp_nanos(nanos).ok())
					.ok_or_else(|| StoreError::Serialization {
						message: format!("Failed to parse {}: {raw:?}", CredentialKey::LastActivity),
					})
			})
			.transpose()
	}

	/// Persists the last-activity instant as epoch milliseconds.
	pub fn set_last_activity(&self, instant: OffsetDateTime) -> Result<(), StoreError> {
		let millis = instant.unix_timestamp_nanos() / 1_000_000;

		self.backend.set(CredentialKey::LastActivity.as_str(), millis.to_string())
	}

	/// Reads every session field.
	pub fn session(&self) -> Result<AuthSession, StoreError> {
		Ok(AuthSession {
			access_token: self.access_token()?,
			refresh_token: self.refresh_token()?,
			user: self.user()?,
			expires_at: self.expires_at()?,
		})
	}

	/// Replaces the whole session in one batch (login).
	///
	/// Fields absent from `session` are removed so nothing from a previous session survives.
	pub fn store_session(&self, session: &AuthSession) -> Result<(), StoreError> {
		let mut batch = Vec::with_capacity(4);

		batch.push(token_op(CredentialKey::AccessToken, session.access_token.as_ref()));
		batch.push(token_op(CredentialKey::RefreshToken, session.refresh_token.as_ref()));
		batch.push(match &session.user {
			Some(user) => StoreOp::set(CredentialKey::UserData.as_str(), encode_user(user)?),
			None => StoreOp::remove(CredentialKey::UserData.as_str()),
		});
		batch.push(match session.expires_at {
			Some(instant) =>
				StoreOp::set(CredentialKey::SessionExpiry.as_str(), encode_instant(instant)?),
			None => StoreOp::remove(CredentialKey::SessionExpiry.as_str()),
		});

		self.backend.apply(batch)
	}

	/// Stores the outcome of a successful refresh in one batch.
	///
	/// The previous refresh token is kept when the endpoint did not rotate it, and the stored
	/// expiry never moves backwards. Returns the expiry that was persisted.
	pub fn rotate(
		&self,
		access_token: &TokenSecret,
		refresh_token: Option<&TokenSecret>,
		expires_at: OffsetDateTime,
	) -> Result<OffsetDateTime, StoreError> {
		let previous = self.expires_at().ok().flatten();
		let expires_at = previous.map_or(expires_at, |previous| previous.max(expires_at));
		let mut batch = vec![
			StoreOp::set(CredentialKey::AccessToken.as_str(), access_token.expose()),
			StoreOp::set(CredentialKey::SessionExpiry.as_str(), encode_instant(expires_at)?),
		];

		if let Some(refresh) = refresh_token {
			batch.push(StoreOp::set(CredentialKey::RefreshToken.as_str(), refresh.expose()));
		}

		self.backend.apply(batch)?;

		Ok(expires_at)
	}

	/// Returns `true` when the stored expiry is missing, unreadable, or not after `now`.
	pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
		match self.expires_at() {
			Ok(Some(expires_at)) => now >= expires_at,
			_ => true,
		}
	}

	/// Checks expiry against the current clock.
	pub fn is_expired(&self) -> bool {
		self.is_expired_at(OffsetDateTime::now_utc())
	}

	/// Returns `true` iff an access token, a user record, and an unexpired session all exist.
	pub fn is_authenticated_at(&self, now: OffsetDateTime) -> bool {
		self.session().map(|session| session.is_authenticated_at(now)).unwrap_or(false)
	}

	/// Checks authentication against the current clock.
	pub fn is_authenticated(&self) -> bool {
		self.is_authenticated_at(OffsetDateTime::now_utc())
	}

	/// Returns the access token to attach at `now`, or `None` when it is absent or expired.
	pub fn bearer_token_at(&self, now: OffsetDateTime) -> Result<Option<TokenSecret>, StoreError> {
		if self.is_expired_at(now) {
			return Ok(None);
		}

		Ok(self.access_token()?.filter(|token| !token.is_blank()))
	}

	/// Returns the access token to attach right now.
	pub fn bearer_token(&self) -> Result<Option<TokenSecret>, StoreError> {
		self.bearer_token_at(OffsetDateTime::now_utc())
	}

	/// Removes every persisted field in one batch.
	pub fn clear(&self) -> Result<(), StoreError> {
		self.backend.apply(
			CredentialKey::ALL.iter().map(|key| StoreOp::remove(key.as_str())).collect(),
		)
	}

	fn read(&self, key: CredentialKey) -> Result<Option<String>, StoreError> {
		self.backend.get(key.as_str())
	}
}
impl Debug for CredentialStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("CredentialStore(..)")
	}
}

fn token_op(key: CredentialKey, token: Option<&TokenSecret>) -> StoreOp {
	match token {
		Some(token) => StoreOp::set(key.as_str(), token.expose()),
		None => StoreOp::remove(key.as_str()),
	}
}

fn encode_user(user: &UserRecord) -> Result<String, StoreError> {
	serde_json::to_string(user).map_err(|e| StoreError::Serialization {
		message: format!("Failed to serialize {}: {e}", CredentialKey::UserData),
	})
}

fn encode_instant(instant: OffsetDateTime) -> Result<String, StoreError> {
	instant.format(&Rfc3339).map_err(|e| StoreError::Serialization {
		message: format!("Failed to format {}: {e}", CredentialKey::SessionExpiry),
	})
}
