//! Key/value persistence contract and the built-in backends used by the credential store.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::_prelude::*;

/// Persistence capability behind the credential store.
///
/// Implementations must make [`apply`](KeyValueStore::apply) atomic with respect to readers of
/// the same store so a half-written login or a half-cleared session is never observable.
pub trait KeyValueStore
where
	Self: Send + Sync,
{
	/// Reads the value stored under `key`.
	fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

	/// Applies every operation in `batch` as one unit.
	fn apply(&self, batch: Vec<StoreOp>) -> Result<(), StoreError>;

	/// Stores `value` under `key`.
	fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
		self.apply(vec![StoreOp::Set { key: key.to_owned(), value }])
	}

	/// Removes `key`; missing keys are not an error.
	fn remove(&self, key: &str) -> Result<(), StoreError> {
		self.apply(vec![StoreOp::Remove { key: key.to_owned() }])
	}
}

/// Single mutation inside a [`KeyValueStore::apply`] batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreOp {
	/// Insert or replace a value.
	Set {
		/// Target key.
		key: String,
		/// New value.
		value: String,
	},
	/// Delete a value.
	Remove {
		/// Target key.
		key: String,
	},
}
impl StoreOp {
	/// Builds a [`StoreOp::Set`].
	pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
		Self::Set { key: key.into(), value: value.into() }
	}

	/// Builds a [`StoreOp::Remove`].
	pub fn remove(key: impl Into<String>) -> Self {
		Self::Remove { key: key.into() }
	}

	pub(crate) fn apply_to(self, map: &mut HashMap<String, String>) {
		match self {
			Self::Set { key, value } => {
				map.insert(key, value);
			},
			Self::Remove { key } => {
				map.remove(&key);
			},
		}
	}
}

/// Error type produced by [`KeyValueStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend or by stored values.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn store_ops_mutate_maps_in_order() {
		let mut map = HashMap::new();

		for op in [StoreOp::set("a", "1"), StoreOp::set("b", "2"), StoreOp::remove("a")] {
			op.apply_to(&mut map);
		}

		assert_eq!(map.len(), 1);
		assert_eq!(map.get("b").map(String::as_str), Some("2"));
	}
}
