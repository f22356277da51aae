//! Thread-safe in-memory [`KeyValueStore`] for tests and short-lived processes.

// self
use crate::{
	_prelude::*,
	store::{KeyValueStore, StoreError, StoreOp},
};

type StoreMap = Arc<RwLock<HashMap<String, String>>>;

/// Storage backend that keeps values in-process; clones share the same map.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);
impl MemoryStore {
	/// Number of stored keys.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` when no key is stored.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}

	/// Copies the current contents.
	pub fn snapshot(&self) -> HashMap<String, String> {
		self.0.read().clone()
	}
}
impl KeyValueStore for MemoryStore {
	fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
		Ok(self.0.read().get(key).cloned())
	}

	fn apply(&self, batch: Vec<StoreOp>) -> Result<(), StoreError> {
		let mut guard = self.0.write();

		for op in batch {
			op.apply_to(&mut guard);
		}

		Ok(())
	}
}
