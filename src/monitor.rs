//! Idle-session monitor: expires a session after a period without user activity, independent of
//! token lifetime.
//!
//! The host feeds activity (pointer, key, scroll, touch) into an [`ActivitySource`]; the monitor
//! subscribes to it and evaluates idle time on a fixed interval. Warnings fire while the
//! remaining time is within the warning threshold, at most once per cooldown; expiry fires once
//! and stops the checks.

// std
use std::time::Duration as StdDuration;
// crates.io
use tokio::{
	task::JoinHandle,
	time::{MissedTickBehavior, interval},
};
// self
use crate::{
	_prelude::*,
	config::IdleConfig,
	credentials::CredentialStore,
	obs::{self, OpKind, OpOutcome},
};

/// Activity is persisted at most this often.
const PERSIST_INTERVAL: Duration = Duration::SECOND;

/// Listener registered with an [`ActivitySource`].
pub type ActivityListener = Arc<dyn Fn(ActivityEvent) + Send + Sync>;

/// Kind of user interaction observed at the application boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActivityEvent {
	/// Pointer press or movement.
	Pointer,
	/// Key press.
	Key,
	/// Scroll.
	Scroll,
	/// Touch start.
	Touch,
}

/// Handle returned by [`ActivitySource::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Source of activity events.
pub trait ActivitySource
where
	Self: Send + Sync,
{
	/// Registers `listener` for every future event.
	fn subscribe(&self, listener: ActivityListener) -> SubscriptionId;

	/// Removes a listener; unknown ids are ignored.
	fn unsubscribe(&self, id: SubscriptionId);
}

#[derive(Default)]
struct HubListeners {
	next_id: u64,
	entries: Vec<(SubscriptionId, ActivityListener)>,
}

/// In-process [`ActivitySource`] the host drives with [`emit`](Self::emit); clones share
/// listeners.
#[derive(Clone, Default)]
pub struct ActivityHub(Arc<Mutex<HubListeners>>);
impl ActivityHub {
	/// Delivers `event` to every listener.
	pub fn emit(&self, event: ActivityEvent) {
		let listeners =
			self.0.lock().entries.iter().map(|(_, listener)| listener.clone()).collect::<Vec<_>>();

		for listener in listeners {
			listener(event);
		}
	}

	/// Number of registered listeners.
	pub fn listener_count(&self) -> usize {
		self.0.lock().entries.len()
	}
}
impl ActivitySource for ActivityHub {
	fn subscribe(&self, listener: ActivityListener) -> SubscriptionId {
		let mut listeners = self.0.lock();
		let id = SubscriptionId(listeners.next_id);

		listeners.next_id += 1;
		listeners.entries.push((id, listener));

		id
	}

	fn unsubscribe(&self, id: SubscriptionId) {
		self.0.lock().entries.retain(|(entry, _)| *entry != id);
	}
}
impl Debug for ActivityHub {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ActivityHub").field("listeners", &self.listener_count()).finish()
	}
}

/// Idle evaluation result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdleStatus {
	/// Remaining time is above the warning threshold.
	Active,
	/// Remaining time is within the warning threshold.
	Warning {
		/// Time left before expiry.
		remaining: Duration,
	},
	/// Idle time exceeded the limit.
	Expired,
}

/// What a monitor tick asks the caller to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdleAction {
	/// Nothing to report.
	None,
	/// Warn the user; the session expires in `remaining`.
	Warn {
		/// Time left before expiry.
		remaining: Duration,
	},
	/// End the session.
	Expire,
}

/// Snapshot of the monitor's activity bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActivityRecord {
	/// Most recent observed activity.
	pub last_activity_at: OffsetDateTime,
	/// Most recent warning, cleared by activity.
	pub last_warning_at: Option<OffsetDateTime>,
	last_persisted_at: Option<OffsetDateTime>,
}

/// Tracks user activity and decides when an idle session must end.
///
/// Clones share the same activity record.
#[derive(Clone)]
pub struct SessionMonitor {
	config: IdleConfig,
	record: Arc<Mutex<ActivityRecord>>,
	credentials: Option<CredentialStore>,
}
impl SessionMonitor {
	/// Creates a monitor whose last activity is now.
	pub fn new(config: IdleConfig) -> Self {
		Self::new_at(config, OffsetDateTime::now_utc())
	}

	/// Creates a monitor whose last activity is `now`.
	pub fn new_at(config: IdleConfig, now: OffsetDateTime) -> Self {
		Self {
			config,
			record: Arc::new(Mutex::new(ActivityRecord {
				last_activity_at: now,
				last_warning_at: None,
				last_persisted_at: None,
			})),
			credentials: None,
		}
	}

	/// Persists activity to `credentials` and restores the last persisted activity, if any.
	pub fn with_credentials(mut self, credentials: CredentialStore) -> Self {
		match credentials.last_activity() {
			Ok(Some(instant)) => {
				let mut record = self.record.lock();

				record.last_activity_at = instant;
				record.last_persisted_at = Some(instant);
			},
			Ok(None) => {},
			Err(_) => {
				obs::obs_event!(warn, "Stored last activity is unreadable; starting fresh.");
			},
		}

		self.credentials = Some(credentials);

		self
	}

	/// Idle policy.
	pub fn config(&self) -> &IdleConfig {
		&self.config
	}

	/// Current activity bookkeeping.
	pub fn record(&self) -> ActivityRecord {
		*self.record.lock()
	}

	/// Marks user activity now.
	pub fn record_activity(&self) {
		self.record_activity_at(OffsetDateTime::now_utc());
	}

	/// Marks user activity at `now`; older instants are ignored.
	pub fn record_activity_at(&self, now: OffsetDateTime) {
		let persist = {
			let mut record = self.record.lock();

			if now < record.last_activity_at {
				return;
			}

			record.last_activity_at = now;
			record.last_warning_at = None;

			let due = record.last_persisted_at.is_none_or(|at| now - at >= PERSIST_INTERVAL);

			if due && self.credentials.is_some() {
				record.last_persisted_at = Some(now);
			}

			due
		};

		let Some(credentials) = self.credentials.as_ref().filter(|_| persist) else {
			return;
		};

		if credentials.set_last_activity(now).is_err() {
			obs::obs_event!(warn, "Failed to persist last activity.");
		}
	}

	/// Time since the last activity.
	pub fn idle_time_at(&self, now: OffsetDateTime) -> Duration {
		now - self.record.lock().last_activity_at
	}

	/// Classifies the session at `now` without side effects.
	pub fn evaluate_at(&self, now: OffsetDateTime) -> IdleStatus {
		let idle = self.idle_time_at(now);

		if idle > self.config.max_idle {
			return IdleStatus::Expired;
		}

		let remaining = self.config.max_idle - idle;

		if remaining <= self.config.warning_threshold {
			IdleStatus::Warning { remaining }
		} else {
			IdleStatus::Active
		}
	}

	/// Classifies the session now.
	pub fn evaluate(&self) -> IdleStatus {
		self.evaluate_at(OffsetDateTime::now_utc())
	}

	/// Evaluates at `now` and applies the warning cooldown.
	pub fn poll_at(&self, now: OffsetDateTime) -> IdleAction {
		match self.evaluate_at(now) {
			IdleStatus::Active => IdleAction::None,
			IdleStatus::Expired => IdleAction::Expire,
			IdleStatus::Warning { remaining } => {
				let mut record = self.record.lock();
				let cooled = record
					.last_warning_at
					.is_none_or(|at| now - at >= self.config.warning_cooldown);

				if !cooled {
					return IdleAction::None;
				}

				record.last_warning_at = Some(now);

				IdleAction::Warn { remaining }
			},
		}
	}

	/// Subscribes to `source` and checks idle time every `check_interval` on the tokio runtime.
	///
	/// `on_warning` receives the remaining time; `on_expiry` runs once, after which checks stop.
	/// Must be called within a tokio runtime.
	pub fn start(
		&self,
		source: Arc<dyn ActivitySource>,
		on_expiry: impl FnOnce() + Send + 'static,
		on_warning: impl Fn(Duration) + Send + 'static,
	) -> MonitorHandle {
		let subscription = source.subscribe({
			let monitor = self.clone();

			Arc::new(move |_| monitor.record_activity())
		});
		let monitor = self.clone();
		let task_source = source.clone();
		let period = self.config.check_interval.unsigned_abs().max(StdDuration::from_millis(1));
		let task = tokio::spawn(async move {
			let mut ticks = interval(period);

			ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

			loop {
				ticks.tick().await;

				match monitor.poll_at(OffsetDateTime::now_utc()) {
					IdleAction::None => {},
					IdleAction::Warn { remaining } => {
						obs::obs_event!(
							info,
							remaining_ms = remaining.whole_milliseconds() as i64,
							"Idle session will expire soon."
						);

						on_warning(remaining);
					},
					IdleAction::Expire => {
						obs::record_op_outcome(OpKind::IdleCheck, OpOutcome::Failure);
						obs::obs_event!(warn, "Idle session expired.");

						on_expiry();

						break;
					},
				}
			}

			task_source.unsubscribe(subscription);
		});

		MonitorHandle { task: Some(task), subscription: Some((source, subscription)) }
	}
}
impl Debug for SessionMonitor {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SessionMonitor")
			.field("config", &self.config)
			.field("record", &self.record())
			.field("persisted", &self.credentials.is_some())
			.finish()
	}
}

/// Running idle check started by [`SessionMonitor::start`]; dropping it stops the checks.
pub struct MonitorHandle {
	task: Option<JoinHandle<()>>,
	subscription: Option<(Arc<dyn ActivitySource>, SubscriptionId)>,
}
impl MonitorHandle {
	/// Returns `true` while checks are scheduled.
	pub fn is_running(&self) -> bool {
		self.task.as_ref().is_some_and(|task| !task.is_finished())
	}

	/// Stops the checks and the activity subscription; calling it again does nothing.
	pub fn stop(&mut self) {
		if let Some(task) = self.task.take() {
			task.abort();
		}
		if let Some((source, id)) = self.subscription.take() {
			source.unsubscribe(id);
		}
	}
}
impl Drop for MonitorHandle {
	fn drop(&mut self) {
		self.stop();
	}
}
impl Debug for MonitorHandle {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("MonitorHandle").field("running", &self.is_running()).finish()
	}
}
