//! Event timing state machine
//!
//! Owns every timer the event model needs: `wait` delays, `every` repeats
//! capped by `max-runs`, the `duration-max` press deferral and the
//! `duration-min` longpress/release gates, plus `start` repeats tied to key
//! visibility. The scheduler never executes anything itself — at each fire
//! instant it emits a [`TimerFire`] and the core resolves and runs the
//! action, so actions always see the current configuration.

use std::{
	collections::HashMap,
	path::PathBuf,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	time::Duration,
};

use tokio::{sync::mpsc, task::JoinHandle, time::Instant};
use tracing::debug;

use crate::{
	entity::{event::EventTiming, EventKind},
	model::EventScope,
};

/// "Run the action of this event now."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFire {
	pub scope: EventScope,
	pub kind: EventKind,
}

/// The press/longpress/release timings of one key, resolved at press time.
#[derive(Debug, Clone, Default)]
pub struct KeyPressTimings {
	pub press: Option<EventTiming>,
	pub longpress: Option<EventTiming>,
	pub release: Option<EventTiming>,
}

struct PressState {
	pressed_at: Instant,
	timings: KeyPressTimings,
	press_task: Option<JoinHandle<()>>,
	longpress_task: Option<JoinHandle<()>>,
	/// Set once a `duration-max` press has been held too long.
	press_expired: Option<Arc<AtomicBool>>,
}

impl Drop for PressState {
	fn drop(&mut self) {
		if let Some(task) = self.press_task.take() {
			task.abort();
		}
		if let Some(task) = self.longpress_task.take() {
			task.abort();
		}
	}
}

pub struct EventScheduler {
	fire_tx: mpsc::UnboundedSender<TimerFire>,
	presses: HashMap<(u16, (u8, u8)), PressState>,
	/// `start` repeat tasks, keyed by the owning event path.
	starts: HashMap<PathBuf, JoinHandle<()>>,
}

impl EventScheduler {
	pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerFire>) {
		let (fire_tx, fire_rx) = mpsc::unbounded_channel();
		(
			Self {
				fire_tx,
				presses: HashMap::new(),
				starts: HashMap::new(),
			},
			fire_rx,
		)
	}

	/// Key went down: arm the press and longpress flows.
	pub fn key_pressed(&mut self, page: u16, key: (u8, u8), timings: KeyPressTimings) {
		// A second press without a release replaces the old state (and
		// aborts its timers via Drop).
		let mut state = PressState {
			pressed_at: Instant::now(),
			timings: timings.clone(),
			press_task: None,
			longpress_task: None,
			press_expired: None,
		};
		let scope = EventScope::Key(page, (key.0, key.1));

		if let Some(timing) = &timings.press {
			if let Some(duration_max) = timing.duration_max {
				// Deferred: fires on release, unless held too long.
				let expired = Arc::new(AtomicBool::new(false));
				state.press_expired = Some(expired.clone());
				state.press_task = Some(tokio::spawn(async move {
					tokio::time::sleep(duration_max).await;
					expired.store(true, Ordering::Release);
				}));
			} else {
				state.press_task = Some(self.spawn_fire_and_repeat(
					scope,
					EventKind::Press,
					timing.wait.unwrap_or_default(),
					timing.every,
					timing.max_runs,
				));
			}
		}

		if let Some(timing) = &timings.longpress {
			let hold = timing
				.duration_min
				.unwrap_or(crate::entity::event::LONGPRESS_DURATION_MIN);
			state.longpress_task = Some(self.spawn_fire_and_repeat(
				scope,
				EventKind::LongPress,
				hold + timing.wait.unwrap_or_default(),
				None,
				None,
			));
		}

		self.presses.insert((page, key), state);
	}

	/// Key came up: settle the press flows, maybe fire release.
	pub fn key_released(&mut self, page: u16, key: (u8, u8)) -> Option<Duration> {
		let state = self.presses.remove(&(page, key))?;
		let held = state.pressed_at.elapsed();
		let scope = EventScope::Key(page, (key.0, key.1));

		if let Some(timing) = &state.timings.press {
			if timing.duration_max.is_some() {
				let expired = state
					.press_expired
					.as_ref()
					.is_some_and(|flag| flag.load(Ordering::Acquire));
				if expired {
					debug!("Press on {page}/{key:?} held past duration-max; canceled");
				} else {
					// Released in time: fire now, honoring any wait not yet
					// served by the hold itself.
					let wait = timing.wait.unwrap_or_default().saturating_sub(held);
					self.spawn_fire_once(scope, EventKind::Press, wait);
				}
			}
		}

		if let Some(timing) = &state.timings.release {
			let long_enough = timing
				.duration_min
				.map_or(true, |minimum| held >= minimum);
			if long_enough {
				self.spawn_fire_once(scope, EventKind::Release, timing.wait.unwrap_or_default());
			} else {
				debug!("Release on {page}/{key:?} ignored (held {held:?})");
			}
		}

		// PressState::drop aborts the in-flight press/longpress timers.
		drop(state);
		Some(held)
	}

	/// A `start` event's owner became visible: run it, repeating if asked.
	pub fn activate_start(&mut self, owner: PathBuf, scope: EventScope, timing: &EventTiming) {
		if self.starts.contains_key(&owner) {
			return;
		}
		let task = self.spawn_fire_and_repeat(
			scope,
			EventKind::Start,
			timing.wait.unwrap_or_default(),
			timing.every,
			timing.max_runs,
		);
		self.starts.insert(owner, task);
	}

	/// The owner is no longer visible: stop its repeats.
	pub fn deactivate_start(&mut self, owner: &std::path::Path) -> bool {
		if let Some(task) = self.starts.remove(owner) {
			task.abort();
			true
		} else {
			false
		}
	}

	pub fn start_is_active(&self, owner: &std::path::Path) -> bool {
		self.starts.contains_key(owner)
	}

	/// Owners of currently active `start` repeats.
	pub fn start_owners(&self) -> Vec<PathBuf> {
		self.starts.keys().cloned().collect()
	}

	/// One-shot fire after an optional delay (used for `end` events).
	pub fn fire_once(&self, scope: EventScope, kind: EventKind, wait: Duration) {
		self.spawn_fire_once(scope, kind, wait);
	}

	pub fn cancel_all(&mut self) {
		self.presses.clear();
		for (_, task) in self.starts.drain() {
			task.abort();
		}
	}

	fn spawn_fire_once(&self, scope: EventScope, kind: EventKind, wait: Duration) {
		let fire_tx = self.fire_tx.clone();
		tokio::spawn(async move {
			if !wait.is_zero() {
				tokio::time::sleep(wait).await;
			}
			fire_tx.send(TimerFire { scope, kind }).ok();
		});
	}

	fn spawn_fire_and_repeat(
		&self,
		scope: EventScope,
		kind: EventKind,
		wait: Duration,
		every: Option<Duration>,
		max_runs: Option<u32>,
	) -> JoinHandle<()> {
		let fire_tx = self.fire_tx.clone();
		tokio::spawn(async move {
			if !wait.is_zero() {
				tokio::time::sleep(wait).await;
			}
			if fire_tx.send(TimerFire { scope, kind }).is_err() {
				return;
			}
			let Some(every) = every else {
				return;
			};
			let mut runs = 1_u32;
			loop {
				if max_runs.is_some_and(|cap| runs >= cap) {
					break;
				}
				tokio::time::sleep(every).await;
				if fire_tx.send(TimerFire { scope, kind }).is_err() {
					break;
				}
				runs += 1;
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn timing() -> EventTiming {
		EventTiming {
			wait: None,
			every: None,
			max_runs: None,
			duration_min: None,
			duration_max: None,
			detach: false,
			unique: false,
			quiet: true,
		}
	}

	async fn drain(
		fire_rx: &mut mpsc::UnboundedReceiver<TimerFire>,
		settle: Duration,
	) -> Vec<TimerFire> {
		tokio::time::sleep(settle).await;
		let mut fires = Vec::new();
		while let Ok(fire) = fire_rx.try_recv() {
			fires.push(fire);
		}
		fires
	}

	#[tokio::test(start_paused = true)]
	async fn plain_press_fires_immediately() {
		let (mut scheduler, mut fire_rx) = EventScheduler::new();
		scheduler.key_pressed(
			1,
			(1, 1),
			KeyPressTimings {
				press: Some(timing()),
				..Default::default()
			},
		);

		let fires = drain(&mut fire_rx, Duration::from_millis(10)).await;
		assert_eq!(fires.len(), 1);
		assert_eq!(fires[0].kind, EventKind::Press);
	}

	#[tokio::test(start_paused = true)]
	async fn repeat_respects_max_runs_and_release() {
		let (mut scheduler, mut fire_rx) = EventScheduler::new();
		let press = EventTiming {
			every: Some(Duration::from_millis(100)),
			max_runs: Some(3),
			..timing()
		};
		scheduler.key_pressed(
			1,
			(1, 1),
			KeyPressTimings {
				press: Some(press),
				..Default::default()
			},
		);

		// Held for a full second: exactly three runs.
		let fires = drain(&mut fire_rx, Duration::from_secs(1)).await;
		assert_eq!(fires.len(), 3);
		scheduler.key_released(1, (1, 1));
	}

	#[tokio::test(start_paused = true)]
	async fn release_stops_the_repeat() {
		let (mut scheduler, mut fire_rx) = EventScheduler::new();
		let press = EventTiming {
			every: Some(Duration::from_millis(100)),
			..timing()
		};
		scheduler.key_pressed(
			1,
			(1, 1),
			KeyPressTimings {
				press: Some(press),
				..Default::default()
			},
		);

		let initial = drain(&mut fire_rx, Duration::from_millis(250)).await;
		assert_eq!(initial.len(), 3);

		scheduler.key_released(1, (1, 1));
		let after = drain(&mut fire_rx, Duration::from_millis(500)).await;
		assert!(after.is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn short_press_fires_long_hold_cancels() {
		let (mut scheduler, mut fire_rx) = EventScheduler::new();
		let press = EventTiming {
			duration_max: Some(Duration::from_millis(300)),
			..timing()
		};

		// Released at 200ms: fires.
		scheduler.key_pressed(
			1,
			(1, 1),
			KeyPressTimings {
				press: Some(press),
				..Default::default()
			},
		);
		tokio::time::sleep(Duration::from_millis(200)).await;
		scheduler.key_released(1, (1, 1));
		let fires = drain(&mut fire_rx, Duration::from_millis(50)).await;
		assert_eq!(fires.len(), 1);

		// Held 500ms: canceled.
		scheduler.key_pressed(
			1,
			(1, 1),
			KeyPressTimings {
				press: Some(press),
				..Default::default()
			},
		);
		tokio::time::sleep(Duration::from_millis(500)).await;
		scheduler.key_released(1, (1, 1));
		let fires = drain(&mut fire_rx, Duration::from_millis(50)).await;
		assert!(fires.is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn longpress_needs_the_minimum_hold() {
		let (mut scheduler, mut fire_rx) = EventScheduler::new();
		let longpress = EventTiming {
			duration_min: Some(Duration::from_millis(300)),
			..timing()
		};

		// Released at 200ms: no longpress.
		scheduler.key_pressed(
			1,
			(1, 1),
			KeyPressTimings {
				longpress: Some(longpress),
				..Default::default()
			},
		);
		tokio::time::sleep(Duration::from_millis(200)).await;
		scheduler.key_released(1, (1, 1));
		assert!(drain(&mut fire_rx, Duration::from_millis(500)).await.is_empty());

		// Held 500ms: fires while still down.
		scheduler.key_pressed(
			1,
			(1, 1),
			KeyPressTimings {
				longpress: Some(longpress),
				..Default::default()
			},
		);
		let fires = drain(&mut fire_rx, Duration::from_millis(500)).await;
		assert_eq!(fires.len(), 1);
		assert_eq!(fires[0].kind, EventKind::LongPress);
		scheduler.key_released(1, (1, 1));
	}

	#[tokio::test(start_paused = true)]
	async fn release_honors_duration_min() {
		let (mut scheduler, mut fire_rx) = EventScheduler::new();
		let release = EventTiming {
			duration_min: Some(Duration::from_millis(300)),
			..timing()
		};

		scheduler.key_pressed(
			1,
			(1, 1),
			KeyPressTimings {
				release: Some(release),
				..Default::default()
			},
		);
		tokio::time::sleep(Duration::from_millis(100)).await;
		scheduler.key_released(1, (1, 1));
		assert!(drain(&mut fire_rx, Duration::from_millis(50)).await.is_empty());

		scheduler.key_pressed(
			1,
			(1, 1),
			KeyPressTimings {
				release: Some(release),
				..Default::default()
			},
		);
		tokio::time::sleep(Duration::from_millis(400)).await;
		scheduler.key_released(1, (1, 1));
		let fires = drain(&mut fire_rx, Duration::from_millis(50)).await;
		assert_eq!(fires.len(), 1);
		assert_eq!(fires[0].kind, EventKind::Release);
	}

	#[tokio::test(start_paused = true)]
	async fn start_repeats_until_deactivated() {
		let (mut scheduler, mut fire_rx) = EventScheduler::new();
		let start = EventTiming {
			every: Some(Duration::from_millis(100)),
			..timing()
		};
		let owner = PathBuf::from("/deck/PAGE_1/KEY_1,1/ON_START");
		scheduler.activate_start(owner.clone(), EventScope::Key(1, (1, 1)), &start);
		assert!(scheduler.start_is_active(&owner));

		let fires = drain(&mut fire_rx, Duration::from_millis(250)).await;
		assert_eq!(fires.len(), 3);

		scheduler.deactivate_start(&owner);
		assert!(drain(&mut fire_rx, Duration::from_millis(500)).await.is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn wait_delays_the_first_run() {
		let (mut scheduler, mut fire_rx) = EventScheduler::new();
		let press = EventTiming {
			wait: Some(Duration::from_millis(200)),
			..timing()
		};
		scheduler.key_pressed(
			1,
			(1, 1),
			KeyPressTimings {
				press: Some(press),
				..Default::default()
			},
		);

		assert!(drain(&mut fire_rx, Duration::from_millis(100)).await.is_empty());
		let fires = drain(&mut fire_rx, Duration::from_millis(150)).await;
		assert_eq!(fires.len(), 1);
	}
}
