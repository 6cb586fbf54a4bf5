//! The deck service
//!
//! One cooperative loop per deck: watcher events mutate the model, the
//! dependency graph schedules recomputation at quiescent points, the event
//! scheduler fires actions, the supervisor reaps children, and the scroll
//! clock advances text animations. Compositing is the only work pushed off
//! the loop (a blocking worker per job, superseded results discarded).

use std::{
	collections::{BTreeSet, HashMap, HashSet},
	path::{Path, PathBuf},
	sync::Arc,
	time::Duration,
};

use sdfs_fs_watcher::FsEvent;
use sdfs_images::RgbaImage;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::{
	config::{format_name, parse_name, BaseName, OptionMap},
	device::{DeckDevice, KeyInput, DEFAULT_BRIGHTNESS},
	entity::{
		event::{EventAction, EventSpec, ExecMode, SetVarDest, SetVarSpec},
		EventKind, Versioned,
	},
	error::Result,
	events::{EventScheduler, KeyPressTimings, TimerFire},
	graph::DependencyGraph,
	model::{DeckModel, EventScope, ModelChange},
	pages::PageController,
	render::{ComposedKey, KeyPlan, KeyRenderer},
	resolve::{resolve_event, ResolvedEvent},
	supervisor::{Launch, LaunchCommand, ProcessSupervisor},
	vars::VarScope,
};

/// Scroll animation tick; frames are only sent when pixels move.
const SCROLL_TICK: Duration = Duration::from_millis(50);
/// A scrolling line holds still this long before it starts moving.
const SCROLL_HOLD: Duration = Duration::from_secs(1);

type KeyId = (u16, (u8, u8));

/// `.current_page` content.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct CurrentPageInfo {
	number: Option<u16>,
	name: Option<String>,
	is_overlay: Option<bool>,
}

struct ScrollState {
	offset: i64,
	hold_until: Instant,
	last_advance: Instant,
}

struct CachedKey {
	composed: ComposedKey,
	scrolls: Vec<Option<ScrollState>>,
}

struct ComposeResult {
	key_id: KeyId,
	generation: u64,
	composed: ComposedKey,
}

/// Remembered press context for the event environment.
#[derive(Debug, Clone, Copy)]
struct PressInfo {
	pressed_at: Instant,
	released_after: Option<Duration>,
}

pub struct DeckService<D: DeckDevice> {
	device: Arc<D>,
	model: DeckModel,
	graph: DependencyGraph,
	controller: PageController,
	scheduler: EventScheduler,
	fire_rx: mpsc::UnboundedReceiver<TimerFire>,
	supervisor: ProcessSupervisor,
	exit_rx: mpsc::UnboundedReceiver<crate::supervisor::ProcessExit>,
	renderer: Arc<KeyRenderer>,
	compose_tx: mpsc::UnboundedSender<ComposeResult>,
	compose_rx: mpsc::UnboundedReceiver<ComposeResult>,
	brightness: u8,
	/// Per-key compose generation; stale results are discarded.
	generations: HashMap<KeyId, u64>,
	cache: HashMap<KeyId, CachedKey>,
	/// Exactly what was last sent per physical key, for idempotent output.
	sent: HashMap<(u8, u8), RgbaImage>,
	/// Keys whose page is in the visible stack (their `start`s run).
	displayed: HashSet<KeyId>,
	presses: HashMap<KeyId, PressInfo>,
}

impl<D: DeckDevice + 'static> DeckService<D> {
	pub fn new(device: Arc<D>, root: PathBuf) -> Self {
		let info = device.info();
		let model = DeckModel::new(root, info.serial.clone(), info.rows, info.cols);
		let (scheduler, fire_rx) = EventScheduler::new();
		let (supervisor, exit_rx) = ProcessSupervisor::new();
		let (compose_tx, compose_rx) = mpsc::unbounded_channel();
		Self {
			renderer: Arc::new(KeyRenderer::new(info.key_width, info.key_height)),
			device,
			model,
			graph: DependencyGraph::new(),
			controller: PageController::new(),
			scheduler,
			fire_rx,
			supervisor,
			exit_rx,
			compose_tx,
			compose_rx,
			brightness: DEFAULT_BRIGHTNESS,
			generations: HashMap::new(),
			cache: HashMap::new(),
			sent: HashMap::new(),
			displayed: HashSet::new(),
			presses: HashMap::new(),
		}
	}

	/// Drive the deck until `watcher_rx` closes or shutdown fires.
	pub async fn run(
		mut self,
		mut watcher_rx: mpsc::UnboundedReceiver<FsEvent>,
		mut input_rx: mpsc::UnboundedReceiver<KeyInput>,
		mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
	) -> Result<()> {
		self.startup();

		let mut scroll_tick = tokio::time::interval(SCROLL_TICK);
		scroll_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				maybe_event = watcher_rx.recv() => {
					let Some(event) = maybe_event else {
						warn!("[{}] Watcher stream closed", self.model.serial);
						break;
					};
					// Drain the burst so the graph runs at a quiescent point.
					let mut changes = self.model.apply(&event);
					while let Ok(more) = watcher_rx.try_recv() {
						changes.extend(self.model.apply(&more));
					}
					self.process_changes(changes);
				}

				Some(input) = input_rx.recv() => {
					self.handle_input(input);
				}

				Some(fire) = self.fire_rx.recv() => {
					self.execute_fire(fire);
				}

				Some(exit) = self.exit_rx.recv() => {
					self.supervisor.reaped(exit.id);
				}

				Some(result) = self.compose_rx.recv() => {
					self.accept_compose(result);
				}

				_ = scroll_tick.tick() => {
					self.advance_scrolls();
				}

				_ = &mut shutdown_rx => {
					info!("[{}] Shutting down", self.model.serial);
					break;
				}
			}
		}

		self.shutdown();
		Ok(())
	}

	fn startup(&mut self) {
		let changes = self.model.scan();
		info!(
			"[{}] Loaded {} page(s) from '{}'",
			self.model.serial,
			self.model.pages.len(),
			self.model.root.display()
		);

		self.apply_brightness_file();
		if let Some(event) = resolve_event(&self.model, EventScope::Deck, EventKind::Start) {
			self.scheduler
				.activate_start(event.path.clone(), EventScope::Deck, &event.spec.timing);
		}

		self.controller
			.go_to(&self.model, &crate::entity::event::PageTarget::First);
		self.apply_set_page_file();
		self.write_current_page_file();
		self.sync_displayed();
		self.process_changes(changes);
		self.refresh_visible();
	}

	fn shutdown(&mut self) {
		// Stop timers, fire `end` actions synchronously, then terminate the
		// remaining `start` children with the usual grace.
		self.scheduler.cancel_all();
		let displayed: Vec<KeyId> = self.displayed.drain().collect();
		for (page, key) in displayed {
			self.fire_end_now(EventScope::Key(page, key));
		}
		for page in self.controller.visible_pages().to_vec() {
			self.fire_end_now(EventScope::Page(page));
		}
		self.fire_end_now(EventScope::Deck);
		self.supervisor.terminate_all();
		for path in [".current_page", ".set_current_page"] {
			std::fs::remove_file(self.model.root.join(path)).ok();
		}
	}

	// ---- change processing ---------------------------------------------

	fn process_changes(&mut self, changes: Vec<ModelChange>) {
		if changes.is_empty() {
			return;
		}

		// Ordered so same-tick recomputation is deterministic.
		let mut dirty_keys: BTreeSet<KeyId> = BTreeSet::new();
		let mut pages_touched = false;

		for change in changes {
			match change {
				ModelChange::VarChanged { name } => {
					for consumer in self.graph.consumers_of_vars([name.as_str()]) {
						match self.model.classify_consumer(&consumer) {
							crate::model::Consumer::Key { page, key } => {
								dirty_keys.insert((page, key));
							}
							crate::model::Consumer::Var { .. } | crate::model::Consumer::Other => {}
						}
					}
				}
				ModelChange::KeyChanged { page, key } => {
					dirty_keys.insert((page, key));
					// Keys referencing this one re-resolve too.
					let seed = self.consumer_path(page, key);
					for consumer in self.graph.closure([seed]) {
						if let crate::model::Consumer::Key { page, key } =
							self.model.classify_consumer(&consumer)
						{
							dirty_keys.insert((page, key));
						}
					}
				}
				ModelChange::PageChanged { .. } => {
					pages_touched = true;
				}
				ModelChange::EventChanged { scope, kind } => {
					self.handle_event_change(scope, kind, &mut dirty_keys);
				}
				ModelChange::StateFile { name } => match name.as_str() {
					".set_current_page" => self.apply_set_page_file(),
					".current_brightness" => self.apply_brightness_file(),
					".current_page" => self.write_current_page_file(),
					_ => {}
				},
			}
		}

		if pages_touched {
			if self.controller.prune(&self.model) || self.controller.current_page().is_none() {
				self.controller
					.go_to(&self.model, &crate::entity::event::PageTarget::First);
				self.write_current_page_file();
			}
			self.sync_displayed();
			self.refresh_visible();
			return;
		}

		for (page, key) in dirty_keys {
			self.refresh_key(page, key);
		}
	}

	fn handle_event_change(
		&mut self,
		scope: EventScope,
		kind: EventKind,
		dirty_keys: &mut BTreeSet<KeyId>,
	) {
		match (scope, kind) {
			// A changed `start` re-activates with its new options if its
			// owner is displayed.
			(EventScope::Key(page, key), EventKind::Start) => {
				if self.displayed.contains(&(page, key)) {
					self.sync_key_start(page, key);
				}
				dirty_keys.insert((page, key));
			}
			(EventScope::Key(page, key), _) => {
				// Press-family events resolve at press time; nothing to do
				// beyond re-rendering visibility-sensitive content.
				dirty_keys.insert((page, key));
			}
			(EventScope::Page(number), EventKind::Start) => {
				if self.controller.is_visible(number) {
					self.sync_scope_start(EventScope::Page(number));
				}
			}
			(EventScope::Deck, EventKind::Start) => {
				self.sync_scope_start(EventScope::Deck);
			}
			_ => {}
		}
	}

	// ---- rendering ------------------------------------------------------

	fn refresh_visible(&mut self) {
		let visible: Vec<u16> = self.controller.visible_pages().to_vec();
		let mut keys: Vec<KeyId> = Vec::new();
		for number in visible {
			if let Some(page) = self.model.page(number) {
				keys.extend(page.keys.keys().map(|&key| (number, key)));
			}
		}
		// Keys that vanished from every visible page need their image
		// cleared.
		let stale: Vec<KeyId> = self
			.cache
			.keys()
			.filter(|key_id| !keys.contains(*key_id))
			.copied()
			.collect();
		for key_id in stale {
			self.cache.remove(&key_id);
		}
		for (page, key) in keys {
			self.refresh_key(page, key);
		}
		self.push_all_positions();
	}

	/// Re-plan and re-compose one key.
	fn refresh_key(&mut self, page: u16, key: (u8, u8)) {
		let consumer = self.consumer_path(page, key);
		let plan = self.renderer.plan_key(&self.model, page, key);
		self.graph
			.set_dependencies(&consumer, plan.used_vars.clone(), plan.refs.clone());

		if !self.controller.is_visible(page) {
			return;
		}

		let generation = self.generations.entry((page, key)).or_insert(0);
		*generation += 1;
		let generation = *generation;

		self.spawn_compose((page, key), generation, plan);
	}

	fn spawn_compose(&self, key_id: KeyId, generation: u64, plan: KeyPlan) {
		let renderer = Arc::clone(&self.renderer);
		let compose_tx = self.compose_tx.clone();
		tokio::task::spawn_blocking(move || {
			let composed = renderer.compose(&plan);
			compose_tx
				.send(ComposeResult {
					key_id,
					generation,
					composed,
				})
				.ok();
		});
	}

	fn accept_compose(&mut self, result: ComposeResult) {
		// A newer composite may have superseded this one mid-flight.
		if self.generations.get(&result.key_id) != Some(&result.generation) {
			debug!("Discarding stale composite for {:?}", result.key_id);
			return;
		}
		let now = Instant::now();
		let scrolls = result
			.composed
			.texts
			.iter()
			.map(|rendered| {
				rendered.as_ref().and_then(|text| {
					text.scrollable().map(|_| ScrollState {
						offset: 0,
						hold_until: now + SCROLL_HOLD,
						last_advance: now,
					})
				})
			})
			.collect();
		self.cache.insert(
			result.key_id,
			CachedKey {
				composed: result.composed,
				scrolls,
			},
		);
		self.sync_key_start(result.key_id.0, result.key_id.1);
		self.push_position(result.key_id.1);
	}

	/// Send the image for a physical position: topmost displayed key with
	/// content wins; nothing at all clears the key.
	fn push_position(&mut self, key: (u8, u8)) {
		let mut output: Option<RgbaImage> = None;
		for &page in self.controller.visible_pages() {
			let visibility = self.controller.key_visibility(&self.model, page, key);
			if !visibility.on_top {
				continue;
			}
			if let Some(cached) = self.cache.get(&(page, key)) {
				if cached.composed.has_content() {
					let offsets: Vec<i64> = cached
						.scrolls
						.iter()
						.map(|scroll| scroll.as_ref().map_or(0, |state| state.offset))
						.collect();
					output = Some(
						cached
							.composed
							.frame(&offsets, visibility.overlay_level),
					);
					break;
				}
			}
		}

		let info = self.device.info();
		let output = output.map(|image| info.transform.apply(&image));

		// Idempotent output: identical pixels are not re-sent.
		match output {
			Some(image) => {
				if self.sent.get(&key) == Some(&image) {
					return;
				}
				if let Err(error) = self.device.set_key_image(key.0, key.1, &image) {
					error!("[{}] Device write failed: {error}", self.model.serial);
					return;
				}
				self.sent.insert(key, image);
			}
			None => {
				if self.sent.remove(&key).is_some() {
					if let Err(error) = self.device.clear_key(key.0, key.1) {
						error!("[{}] Device clear failed: {error}", self.model.serial);
					}
				}
			}
		}
	}

	fn push_all_positions(&mut self) {
		let info = self.device.info();
		for row in 1..=info.rows {
			for col in 1..=info.cols {
				self.push_position((row, col));
			}
		}
	}

	fn advance_scrolls(&mut self) {
		let now = Instant::now();
		let mut moved: Vec<(u8, u8)> = Vec::new();
		for (&(_page, key), cached) in &mut self.cache {
			let mut changed = false;
			for (index, slot) in cached.scrolls.iter_mut().enumerate() {
				let Some(state) = slot else {
					continue;
				};
				let Some(rendered) = cached.composed.texts.get(index).and_then(Option::as_ref)
				else {
					continue;
				};
				if now < state.hold_until {
					state.last_advance = now;
					continue;
				}
				let elapsed = now.duration_since(state.last_advance);
				let pixels =
					(elapsed.as_secs_f64() * f64::from(rendered.scroll_pixels())).round() as i64;
				if pixels == 0 {
					continue;
				}
				state.last_advance = now;
				state.offset = rendered.wrap_scrolled(state.offset + pixels);
				changed = true;
			}
			if changed && !moved.contains(&key) {
				moved.push(key);
			}
		}
		for key in moved {
			self.push_position(key);
		}
	}

	// ---- start/end lifecycle -------------------------------------------

	/// Recompute the displayed-key set after any page/visibility change,
	/// firing `start`/`end` transitions for keys entering or leaving.
	fn sync_displayed(&mut self) {
		let mut now_displayed: HashSet<KeyId> = HashSet::new();
		for &page in self.controller.visible_pages() {
			if let Some(page_entity) = self.model.page(page) {
				for (&key, slot) in &page_entity.keys {
					if slot.active().is_some() {
						now_displayed.insert((page, key));
					}
				}
			}
		}

		let gone: Vec<KeyId> = self.displayed.difference(&now_displayed).copied().collect();
		let fresh: Vec<KeyId> = now_displayed.difference(&self.displayed).copied().collect();
		self.displayed = now_displayed;

		for (page, key) in gone {
			self.deactivate_key(page, key);
		}
		for (page, key) in fresh {
			self.sync_key_start(page, key);
		}

		// Page-level start/end follow the visible stack the same way.
		self.sync_page_events();
	}

	fn sync_page_events(&mut self) {
		let visible: HashSet<u16> = self.controller.visible_pages().iter().copied().collect();
		for owner in self.scheduler.start_owners() {
			let Some(scope) = self.scope_of_start_owner(&owner) else {
				continue;
			};
			let still_active = match scope {
				EventScope::Page(number) => visible.contains(&number),
				EventScope::Key(page, key) => self.displayed.contains(&(page, key)),
				EventScope::Deck => true,
			};
			if !still_active {
				self.scheduler.deactivate_start(&owner);
				self.supervisor.terminate_owner(&owner);
				self.fire_end_scheduled(scope);
			}
		}
		for &number in &visible {
			self.sync_scope_start(EventScope::Page(number));
		}
	}

	fn scope_of_start_owner(&self, owner: &Path) -> Option<EventScope> {
		match self.model.classify_consumer(owner) {
			crate::model::Consumer::Key { page, key } => Some(EventScope::Key(page, key)),
			_ => {
				// Either a page event file or a deck event file; count path
				// depth under the root.
				let relative = owner.strip_prefix(&self.model.root).ok()?;
				match relative.components().count() {
					1 => Some(EventScope::Deck),
					2 => {
						let page_dir = relative.components().next()?;
						let name = page_dir.as_os_str().to_str()?;
						match parse_name(name)?.ok()?.base {
							BaseName::Page(number) => Some(EventScope::Page(number)),
							_ => None,
						}
					}
					_ => None,
				}
			}
		}
	}

	fn sync_key_start(&mut self, page: u16, key: (u8, u8)) {
		if !self.displayed.contains(&(page, key)) {
			return;
		}
		self.sync_scope_start(EventScope::Key(page, key));
	}

	fn sync_scope_start(&mut self, scope: EventScope) {
		let Some(event) = resolve_event(&self.model, scope, EventKind::Start) else {
			return;
		};
		if self.scheduler.start_is_active(&event.path) {
			return;
		}
		self.scheduler
			.activate_start(event.path.clone(), scope, &event.spec.timing);
	}

	/// Key ceased to be displayed: stop timers and processes, fire `end`.
	fn deactivate_key(&mut self, page: u16, key: (u8, u8)) {
		let scope = EventScope::Key(page, key);
		if let Some(event) = resolve_event(&self.model, scope, EventKind::Start) {
			if self.scheduler.deactivate_start(&event.path) {
				self.supervisor.terminate_owner(&event.path);
			}
		}
		self.presses.remove(&(page, key));
		self.scheduler.key_released(page, key);
		self.fire_end_scheduled(scope);
	}

	fn fire_end_scheduled(&mut self, scope: EventScope) {
		if let Some(event) = resolve_event(&self.model, scope, EventKind::End) {
			self.scheduler.fire_once(
				scope,
				EventKind::End,
				event.spec.timing.wait.unwrap_or_default(),
			);
		}
	}

	fn fire_end_now(&mut self, scope: EventScope) {
		if let Some(event) = resolve_event(&self.model, scope, EventKind::End) {
			self.execute_event(scope, event);
		}
	}

	// ---- input ----------------------------------------------------------

	fn handle_input(&mut self, input: KeyInput) {
		// Input goes to the current (topmost) page only.
		let Some(page) = self.controller.current_page() else {
			debug!("[{}] Input ignored, no current page", self.model.serial);
			return;
		};
		let key = (input.row, input.col);

		if input.pressed {
			if self.model.key(page, key).is_none() {
				debug!("[{}] KEY {key:?} pressed, not configured", self.model.serial);
				return;
			}
			self.presses.insert(
				(page, key),
				PressInfo {
					pressed_at: Instant::now(),
					released_after: None,
				},
			);
			let timings = KeyPressTimings {
				press: resolve_event(&self.model, EventScope::Key(page, key), EventKind::Press)
					.map(|event| event.spec.timing),
				longpress: resolve_event(
					&self.model,
					EventScope::Key(page, key),
					EventKind::LongPress,
				)
				.map(|event| event.spec.timing),
				release: resolve_event(
					&self.model,
					EventScope::Key(page, key),
					EventKind::Release,
				)
				.map(|event| event.spec.timing),
			};
			self.scheduler.key_pressed(page, key, timings);
		} else {
			// The press may have happened on a page we since left; settle
			// whatever press state exists.
			let held = self.scheduler.key_released(page, key);
			if let (Some(held), Some(press)) = (held, self.presses.get_mut(&(page, key))) {
				press.released_after = Some(held);
			}
		}
	}

	// ---- event execution ------------------------------------------------

	fn execute_fire(&mut self, fire: TimerFire) {
		// Resolve at fire time so the action reflects the current tree.
		let Some(event) = resolve_event(&self.model, fire.scope, fire.kind) else {
			return;
		};
		self.execute_event(fire.scope, event);
	}

	fn execute_event(&mut self, scope: EventScope, event: ResolvedEvent) {
		let ResolvedEvent { path, spec, .. } = event;

		for set_var in &spec.set_vars {
			self.apply_set_var(scope, set_var);
		}

		match &spec.action {
			EventAction::None => {}

			EventAction::Brightness { operation, level } => {
				self.set_brightness(*operation, *level, spec.timing.quiet);
			}

			EventAction::Page(target) => {
				if self.controller.go_to(&self.model, target).is_some() {
					if !spec.timing.quiet {
						info!(
							"[{}] Now on page {:?}",
							self.model.serial,
							self.controller.current_page()
						);
					}
					self.write_current_page_file();
					self.sync_displayed();
					self.refresh_visible();
				}
			}

			EventAction::Exec(mode) => {
				if spec.timing.unique && self.supervisor.has_running(&path) {
					if !spec.timing.quiet {
						warn!(
							"[{}] '{}' still running, execution skipped",
							self.model.serial,
							path.display()
						);
					}
					return;
				}
				let Some(command) = self.exec_command(&path, mode) else {
					return;
				};
				let launch = Launch {
					command,
					working_dir: self.working_dir_of(scope),
					env: self.event_env(scope, &path, &spec),
					detach: spec.timing.detach,
					quiet: spec.timing.quiet,
					owner: path.clone(),
				};
				if let Err(error) = self.supervisor.spawn(launch) {
					error!("[{}] Event spawn failed: {error}", self.model.serial);
				}
			}
		}
	}

	fn exec_command(&self, path: &Path, mode: &ExecMode) -> Option<LaunchCommand> {
		match mode {
			ExecMode::Command(line) => Some(LaunchCommand::Shell(line.clone())),
			ExecMode::Inside => {
				let content = std::fs::read_to_string(path).ok()?;
				let line = content.trim().to_string();
				if line.is_empty() {
					return None;
				}
				Some(LaunchCommand::Shell(line))
			}
			ExecMode::SelfPath => {
				// The file itself must be a non-empty executable.
				let metadata = std::fs::metadata(path).ok()?;
				if metadata.len() == 0 {
					return None;
				}
				#[cfg(unix)]
				{
					use std::os::unix::fs::PermissionsExt;
					if metadata.permissions().mode() & 0o111 == 0 {
						debug!("'{}' is not executable", path.display());
						return None;
					}
				}
				Some(LaunchCommand::Direct(path.to_path_buf()))
			}
		}
	}

	fn working_dir_of(&self, scope: EventScope) -> PathBuf {
		match scope {
			EventScope::Deck => self.model.root.clone(),
			EventScope::Page(number) => self
				.model
				.page(number)
				.map(|page| page.path().to_path_buf())
				.unwrap_or_else(|| self.model.root.clone()),
			EventScope::Key(page, key) => self
				.model
				.key(page, key)
				.map(|key_entity| key_entity.path().to_path_buf())
				.unwrap_or_else(|| self.model.root.clone()),
		}
	}

	/// The `SDFS_*` context bundle handed to child processes.
	fn event_env(&self, scope: EventScope, event_path: &Path, spec: &EventSpec) -> Vec<(String, String)> {
		let info = self.device.info();
		let mut env: Vec<(String, String)> = vec![
			("SDFS_DEVICE_TYPE".to_string(), info.model.clone()),
			("SDFS_DEVICE_SERIAL".to_string(), info.serial.clone()),
			(
				"SDFS_DEVICE_DIRECTORY".to_string(),
				self.model.root.display().to_string(),
			),
			("SDFS_DEVICE_NB_ROWS".to_string(), info.rows.to_string()),
			("SDFS_DEVICE_NB_COLS".to_string(), info.cols.to_string()),
			(
				"SDFS_DEVICE_KEY_WIDTH".to_string(),
				info.key_width.to_string(),
			),
			(
				"SDFS_DEVICE_KEY_HEIGHT".to_string(),
				info.key_height.to_string(),
			),
			(
				"SDFS_DEVICE_BRIGHTNESS".to_string(),
				self.brightness.to_string(),
			),
			("SDFS_EVENT".to_string(), spec.kind.as_str().to_string()),
			(
				"SDFS_EVENT_FILE".to_string(),
				event_path.display().to_string(),
			),
			(
				"SDFS_QUIET".to_string(),
				if spec.timing.quiet { "true" } else { "" }.to_string(),
			),
		];

		if let Some(number) = self.controller.current_page() {
			env.push(("SDFS_PAGE".to_string(), number.to_string()));
			if let Some(name) = self.model.page(number).and_then(|page| page.name()) {
				env.push(("SDFS_PAGE_NAME".to_string(), name.to_string()));
			}
		}

		let scope_vars = match scope {
			EventScope::Key(page, key) => {
				env.push(("SDFS_KEY".to_string(), format!("{},{}", key.0, key.1)));
				env.push(("SDFS_KEY_ROW".to_string(), key.0.to_string()));
				env.push(("SDFS_KEY_COL".to_string(), key.1.to_string()));
				if let Some(key_entity) = self.model.key(page, key) {
					if let Some(name) = key_entity.name() {
						env.push(("SDFS_KEY_NAME".to_string(), name.to_string()));
					}
					env.push((
						"SDFS_KEY_DIRECTORY".to_string(),
						key_entity.path().display().to_string(),
					));
				}
				if !matches!(spec.kind, EventKind::Start | EventKind::End) {
					if let Some(press) = self.presses.get(&(page, key)) {
						env.push((
							"SDFS_PRESSED_AT".to_string(),
							format!("{:?}", press.pressed_at),
						));
						if let Some(held) = press.released_after {
							env.push((
								"SDFS_PRESS_DURATION".to_string(),
								held.as_millis().to_string(),
							));
						}
					}
				}
				VarScope::key(&self.model, page, key)
			}
			EventScope::Page(number) => VarScope::page(&self.model, number),
			EventScope::Deck => VarScope::deck(&self.model),
		};

		// Every in-scope variable, resolved, as SDFS_VAR_<NAME>.
		for name in scope_vars.names_in_scope() {
			if let Some(value) = scope_vars.lookup(&name) {
				env.push((format!("SDFS_VAR_{name}"), value));
			}
		}

		env
	}

	// ---- SetVar ---------------------------------------------------------

	/// Persist a `VAR_NAME=VALUE` assignment to disk at the targeted scope.
	/// The mutation is only a filesystem write; the watcher brings it back
	/// in like any other change.
	fn apply_set_var(&self, scope: EventScope, set_var: &SetVarSpec) {
		let Some(parent_dir) = self.set_var_parent(scope, &set_var.dest) else {
			warn!(
				"[{}] VAR_{} cannot be set: destination not found",
				self.model.serial, set_var.name
			);
			return;
		};

		let existing = self.find_var_file(&parent_dir, &set_var.name);

		let result = if set_var.infile {
			let target = match &existing {
				Some(path) => {
					// Strip a stale `value=` (and any `disabled`) from the
					// filename; the content becomes the value.
					let renamed = rewrite_var_filename(path, &set_var.name, None);
					match renamed {
						Some(new_path) if new_path != *path => {
							std::fs::rename(path, &new_path).map(|()| new_path)
						}
						_ => Ok(path.clone()),
					}
				}
				None => Ok(parent_dir.join(format!("VAR_{}", set_var.name))),
			};
			target.and_then(|path| std::fs::write(path, &set_var.value))
		} else {
			let encoded = encode_var_value(&set_var.value);
			match &existing {
				Some(path) => match rewrite_var_filename(path, &set_var.name, Some(&encoded)) {
					Some(new_path) if new_path != *path => {
						std::fs::rename(path, new_path).map(|_| ())
					}
					_ => Ok(()),
				},
				None => {
					let path = parent_dir.join(format!("VAR_{};value={encoded}", set_var.name));
					std::fs::write(path, "")
				}
			}
		};

		if let Err(error) = result {
			error!(
				"[{}] VAR_{} could not be written: {error}",
				self.model.serial, set_var.name
			);
		}
	}

	fn set_var_parent(&self, scope: EventScope, dest: &SetVarDest) -> Option<PathBuf> {
		let (home_page, home_key) = match scope {
			EventScope::Key(page, key) => (Some(page), Some(key)),
			EventScope::Page(page) => (Some(page), None),
			EventScope::Deck => (None, None),
		};
		match dest {
			SetVarDest::Deck => Some(self.model.root.clone()),
			SetVarDest::Page { page } => {
				let number = match page {
					Some(filter) => self.model.find_page(filter)?.number,
					None => home_page?,
				};
				Some(self.model.page(number)?.path().to_path_buf())
			}
			SetVarDest::Key { page, key } => {
				let number = match page {
					Some(filter) => self.model.find_page(filter)?.number,
					None => home_page?,
				};
				let key_entity = match key {
					Some(filter) => {
						let page_entity = self.model.page(number)?;
						crate::entity::find_by_identifier_or_name(
							page_entity.keys.iter(),
							filter,
							|value| {
								let (row, col) = value.split_once(',')?;
								Some((row.parse().ok()?, col.parse().ok()?))
							},
							|candidate| candidate.name(),
						)?
					}
					None => self.model.key(number, home_key?)?,
				};
				Some(key_entity.path().to_path_buf())
			}
		}
	}

	/// Most recent existing file defining this variable in a directory.
	fn find_var_file(&self, parent_dir: &Path, name: &str) -> Option<PathBuf> {
		let prefix = format!("VAR_{name}");
		let mut candidates: Vec<PathBuf> = std::fs::read_dir(parent_dir)
			.ok()?
			.filter_map(|entry| entry.ok())
			.map(|entry| entry.path())
			.filter(|path| {
				path.file_name()
					.and_then(|file_name| file_name.to_str())
					.is_some_and(|file_name| {
						file_name == prefix || file_name.starts_with(&format!("{prefix};"))
					})
			})
			.collect();
		candidates.sort();
		candidates.pop()
	}

	// ---- brightness & state files --------------------------------------

	fn set_brightness(&mut self, operation: char, level: u8, quiet: bool) {
		let old = self.brightness;
		self.brightness = match operation {
			'+' => old.saturating_add(level).min(100),
			'-' => old.saturating_sub(level),
			_ => level.min(100),
		};
		if self.brightness == old {
			return;
		}
		if !quiet {
			info!(
				"[{}] Brightness {} -> {}",
				self.model.serial, old, self.brightness
			);
		}
		if let Err(error) = self.device.set_brightness(self.brightness) {
			error!("[{}] Brightness write failed: {error}", self.model.serial);
		}
		self.write_brightness_file();
	}

	fn write_brightness_file(&self) {
		let path = self.model.root.join(".current_brightness");
		let content = self.brightness.to_string();
		if std::fs::read_to_string(&path).is_ok_and(|existing| existing.trim() == content) {
			return;
		}
		std::fs::write(path, content).ok();
	}

	fn apply_brightness_file(&mut self) {
		let path = self.model.root.join(".current_brightness");
		match std::fs::read_to_string(&path) {
			Ok(content) => {
				if let Ok(level) = content.trim().parse::<u8>() {
					self.set_brightness('=', level, true);
				}
			}
			Err(_) => self.write_brightness_file(),
		}
		// Keep the backlight usable even if the file said 0.
		if self.brightness < 5 {
			self.set_brightness('=', 5, true);
		}
	}

	fn write_current_page_file(&self) {
		let number = self.controller.current_page();
		let page_info = CurrentPageInfo {
			number,
			name: number
				.and_then(|value| self.model.page(value))
				.and_then(|page| page.name().map(str::to_string)),
			is_overlay: number.map(|_| self.controller.current_is_overlay()),
		};
		let path = self.model.root.join(".current_page");
		if let Ok(serialized) = serde_json::to_string(&page_info) {
			let unchanged = std::fs::read_to_string(&path)
				.ok()
				.and_then(|existing| serde_json::from_str::<CurrentPageInfo>(&existing).ok())
				== Some(page_info);
			if !unchanged {
				std::fs::write(path, serialized).ok();
			}
		}
	}

	fn apply_set_page_file(&mut self) {
		let path = self.model.root.join(".set_current_page");
		let Ok(content) = std::fs::read_to_string(&path) else {
			return;
		};
		std::fs::remove_file(&path).ok();
		let target = crate::entity::event::PageTarget::parse(content.trim());
		if self.controller.go_to(&self.model, &target).is_some() {
			self.write_current_page_file();
			self.sync_displayed();
			self.refresh_visible();
		}
	}

	fn consumer_path(&self, page: u16, key: (u8, u8)) -> PathBuf {
		self.model
			.key(page, key)
			.map(|key_entity| key_entity.path().to_path_buf())
			.unwrap_or_else(|| {
				self.model
					.root
					.join(format!("PAGE_{page}"))
					.join(format!("KEY_{},{}", key.0, key.1))
			})
	}
}

/// Build a new filename for an existing variable file: keep everything but
/// `value` and `disabled`, then append the new value if given.
fn rewrite_var_filename(path: &Path, name: &str, value: Option<&str>) -> Option<PathBuf> {
	let file_name = path.file_name()?.to_str()?;
	let parsed = parse_name(file_name)?.ok()?;
	let mut options: Vec<(String, String)> = parsed
		.options
		.iter()
		.filter(|(key, _)| *key != "value" && *key != "disabled" && *key != "enabled")
		.map(|(key, option_value)| (key.to_string(), option_value.to_string()))
		.collect();
	if let Some(value) = value {
		options.push(("value".to_string(), value.to_string()));
	}
	let new_name = format_name(
		&BaseName::Var(name.to_string()),
		&OptionMap::new(options),
	);
	Some(path.with_file_name(new_name))
}

/// Escape a value for embedding into a filename (the inverse of the default
/// escape decoding).
fn encode_var_value(value: &str) -> String {
	value
		.replace('/', crate::config::DEFAULT_SLASH_REPL)
		.replace(';', crate::config::DEFAULT_SEMICOLON_REPL)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn var_filenames_rewrite_cleanly() {
		let path = PathBuf::from("/deck/VAR_STATE;value=old;disabled");
		let renamed = rewrite_var_filename(&path, "STATE", Some("new")).unwrap();
		assert_eq!(
			renamed,
			PathBuf::from("/deck/VAR_STATE;value=new")
		);

		let stripped = rewrite_var_filename(&path, "STATE", None).unwrap();
		assert_eq!(stripped, PathBuf::from("/deck/VAR_STATE"));
	}

	#[test]
	fn var_values_encode_for_filenames() {
		assert_eq!(encode_var_value("a/b;c"), "a\\\\b^c");
	}

	#[test]
	fn current_page_info_round_trips() {
		let page_info = CurrentPageInfo {
			number: Some(3),
			name: Some("music".to_string()),
			is_overlay: Some(false),
		};
		let serialized = serde_json::to_string(&page_info).unwrap();
		let parsed: CurrentPageInfo = serde_json::from_str(&serialized).unwrap();
		assert_eq!(parsed, page_info);
	}
}
