//! Logout notification raised when the session ends without the user asking for it.

// self
use crate::_prelude::*;

type LogoutHandler = Arc<dyn Fn(LogoutReason) + Send + Sync>;

/// Why a session was ended on the user's behalf.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogoutReason {
	/// The refresh endpoint rejected the refresh token or could not be reached.
	RefreshFailed,
	/// A refresh was needed but no refresh token was stored.
	MissingRefreshToken,
	/// The idle monitor observed no activity for longer than the allowed window.
	IdleTimeout,
}
impl LogoutReason {
	/// Returns a stable label suitable for log fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			LogoutReason::RefreshFailed => "refresh_failed",
			LogoutReason::MissingRefreshToken => "missing_refresh_token",
			LogoutReason::IdleTimeout => "idle_timeout",
		}
	}
}
impl Display for LogoutReason {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Callback slot fired once per forced logout; the host uses it to navigate to its login screen.
///
/// Clones share the slot, so a handler installed after the client was built still reaches the
/// refresh coordinator and the idle monitor.
#[derive(Clone, Default)]
pub struct LogoutSignal(Arc<RwLock<Option<LogoutHandler>>>);
impl LogoutSignal {
	/// Wraps a handler.
	pub fn new(handler: impl Fn(LogoutReason) + Send + Sync + 'static) -> Self {
		let signal = Self::default();

		signal.set(handler);

		signal
	}

	/// Installs `handler`, replacing the previous one for every clone.
	pub fn set(&self, handler: impl Fn(LogoutReason) + Send + Sync + 'static) {
		*self.0.write() = Some(Arc::new(handler));
	}

	/// Returns `true` when a handler is installed.
	pub fn is_set(&self) -> bool {
		self.0.read().is_some()
	}

	/// Invokes the handler with `reason`.
	pub fn fire(&self, reason: LogoutReason) {
		crate::obs::obs_event!(warn, reason = reason.as_str(), "Session ended; requesting logout.");

		// Clone out of the lock so a handler may replace itself.
		let handler = self.0.read().clone();

		if let Some(handler) = handler {
			handler(reason);
		}
	}
}
impl Debug for LogoutSignal {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("LogoutSignal").field(&self.is_set()).finish()
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// self
	use super::*;

	#[test]
	fn fire_reaches_every_clone() {
		let hits = Arc::new(AtomicUsize::new(0));
		let signal = LogoutSignal::new({
			let hits = hits.clone();

			move |reason| {
				assert_eq!(reason, LogoutReason::IdleTimeout);

				hits.fetch_add(1, Ordering::SeqCst);
			}
		});

		signal.clone().fire(LogoutReason::IdleTimeout);
		signal.fire(LogoutReason::IdleTimeout);

		assert_eq!(hits.load(Ordering::SeqCst), 2);
	}

	#[test]
	fn handler_installed_later_reaches_earlier_clones() {
		let signal = LogoutSignal::default();
		let held_by_monitor = signal.clone();
		let hits = Arc::new(AtomicUsize::new(0));

		assert!(!held_by_monitor.is_set());

		held_by_monitor.fire(LogoutReason::RefreshFailed);
		signal.set({
			let hits = hits.clone();

			move |_| {
				hits.fetch_add(1, Ordering::SeqCst);
			}
		});
		held_by_monitor.fire(LogoutReason::RefreshFailed);

		assert_eq!(hits.load(Ordering::SeqCst), 1);
	}
}
