//! Validated identifiers carried by the stored user record.
//!
//! The backend sends user ids as JSON numbers or strings; both are normalized to text.

// std
use std::borrow::Borrow;
// self
use crate::_prelude::*;

const MAX_LEN: usize = 128;

/// Why a user id or role name was refused.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// Nothing was supplied.
	#[error("{kind} must not be empty.")]
	Empty {
		/// Which identifier failed (`user id`, `role`).
		kind: &'static str,
	},
	/// Whitespace appeared anywhere in the value.
	#[error("{kind} must not contain whitespace.")]
	ContainsWhitespace {
		/// Which identifier failed (`user id`, `role`).
		kind: &'static str,
	},
	/// The value is longer than the accepted maximum.
	#[error("{kind} is longer than {max} bytes.")]
	TooLong {
		/// Which identifier failed (`user id`, `role`).
		kind: &'static str,
		/// Maximum accepted length in bytes.
		max: usize,
	},
	/// The JSON value was neither a string nor a number.
	#[error("{kind} must be a JSON string or number.")]
	UnsupportedType {
		/// Which identifier failed (`user id`, `role`).
		kind: &'static str,
	},
}

macro_rules! identifier {
	($(#[$meta:meta])* $name:ident, $kind:literal) => {
		$(#[$meta])*
		#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
		#[serde(try_from = "serde_json::Value", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Validates and wraps `value`.
			pub fn new(value: impl Into<String>) -> Result<Self, IdentifierError> {
				let value = value.into();

				check($kind, &value)?;

				Ok(Self(value))
			}

			/// Borrowed text form.
			pub fn as_str(&self) -> &str {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(id: $name) -> Self {
				id.0
			}
		}
		impl TryFrom<serde_json::Value> for $name {
			type Error = IdentifierError;

			fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
				match value {
					serde_json::Value::String(text) => Self::new(text),
					serde_json::Value::Number(number) => Self::new(number.to_string()),
					_ => Err(IdentifierError::UnsupportedType { kind: $kind }),
				}
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.debug_tuple(stringify!($name)).field(&self.0).finish()
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
	};
}

identifier! {
	/// Identifier of the authenticated user.
	UserId, "user id"
}
identifier! {
	/// Role granted to the authenticated user, e.g. `ADMIN`.
	RoleName, "role"
}

fn check(kind: &'static str, value: &str) -> Result<(), IdentifierError> {
	if value.is_empty() {
		Err(IdentifierError::Empty { kind })
	} else if value.chars().any(char::is_whitespace) {
		Err(IdentifierError::ContainsWhitespace { kind })
	} else if value.len() > MAX_LEN {
		Err(IdentifierError::TooLong { kind, max: MAX_LEN })
	} else {
		Ok(())
	}
}
