//! File-backed [`KeyValueStore`] so sessions survive process restarts.

// std
use std::{
	fs::{self, File},
	io::{self, Write},
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	store::{KeyValueStore, StoreError, StoreOp},
};

type Snapshot = HashMap<String, String>;

/// Persists values to a JSON object file; every batch rewrites the file through a sibling
/// `.tmp` file so readers of the path never see a partial write.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<Snapshot>>,
}
impl FileStore {
	/// Opens (or creates) a store at `path`, loading any existing snapshot.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		create_parent(&path)?;

		let snapshot = read_snapshot(&path)?;

		Ok(Self { path, inner: Arc::new(RwLock::new(snapshot)) })
	}

	/// Location of the backing file.
	pub fn path(&self) -> &Path {
		&self.path
	}
}
impl KeyValueStore for FileStore {
	fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
		Ok(self.inner.read().get(key).cloned())
	}

	fn apply(&self, batch: Vec<StoreOp>) -> Result<(), StoreError> {
		let mut guard = self.inner.write();
		let mut next = guard.clone();

		for op in batch {
			op.apply_to(&mut next);
		}

		write_snapshot(&self.path, &next)?;
		*guard = next;

		Ok(())
	}
}

fn backend(action: &str, path: &Path, e: io::Error) -> StoreError {
	StoreError::Backend { message: format!("Failed to {action} {}: {e}", path.display()) }
}

fn create_parent(path: &Path) -> Result<(), StoreError> {
	match path.parent() {
		Some(parent) if !parent.as_os_str().is_empty() =>
			fs::create_dir_all(parent).map_err(|e| backend("create directory", parent, e)),
		_ => Ok(()),
	}
}

fn read_snapshot(path: &Path) -> Result<Snapshot, StoreError> {
	let bytes = match fs::read(path) {
		Ok(bytes) => bytes,
		Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Snapshot::new()),
		Err(e) => return Err(backend("read", path, e)),
	};

	if bytes.iter().all(u8::is_ascii_whitespace) {
		return Ok(Snapshot::new());
	}

	serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
		message: format!("Failed to parse {}: {e}", path.display()),
	})
}

fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), StoreError> {
	let bytes = serde_json::to_vec_pretty(snapshot)
		.map_err(|e| StoreError::Serialization { message: e.to_string() })?;
	let staging = path.with_extension("tmp");

	create_parent(path)?;

	let mut file = File::create(&staging).map_err(|e| backend("create", &staging, e))?;

	file.write_all(&bytes).map_err(|e| backend("write", &staging, e))?;
	file.sync_all().map_err(|e| backend("sync", &staging, e))?;
	drop(file);

	fs::rename(&staging, path).map_err(|e| backend("replace", path, e))
}
