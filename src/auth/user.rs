//! Authenticated user record persisted next to the tokens.

// self
use crate::{
	_prelude::*,
	auth::{RoleName, UserId},
};

/// User profile returned by the login endpoint and stored under `user_data`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
	/// User identifier.
	pub id: UserId,
	/// Role granted to the user.
	pub role: RoleName,
	/// Login e-mail address.
	pub email: String,
}
impl UserRecord {
	/// Creates a user record.
	pub fn new(id: UserId, role: RoleName, email: impl Into<String>) -> Self {
		Self { id, role, email: email.into() }
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn user_record_reads_backend_payload() {
		let user: UserRecord =
			serde_json::from_str(r#"{"id":7,"role":"ADMIN","email":"ana@example.com"}"#)
				.expect("Backend user payload should deserialize.");

		assert_eq!(user.id.as_ref(), "7");
		assert_eq!(user.role.as_ref(), "ADMIN");
		assert_eq!(user.email, "ana@example.com");
	}
}
