//! Per-key rendering orchestration
//!
//! A key render happens in two phases. *Planning* runs on the core: it
//! resolves layers and text lines against the current model (reference
//! chains, variables, file reads) and records dependencies. *Composition*
//! is pure pixel work fed to a blocking worker: drawings, rasters and text
//! blocks go through `sdfs-images` and come back as one bitmap.
//!
//! Scroll animation re-frames cached text blocks; nothing is re-rasterized
//! on a scroll tick.

use std::{
	collections::{BTreeSet, HashSet},
	path::{Path, PathBuf},
};

use sdfs_images::{
	composite, dim_for_overlay, load_raster, place_layer, RenderedText, RgbaImage, TextRenderer,
};
use tracing::{debug, warn};

use crate::{
	entity::{
		find_by_identifier_or_name,
		key::KeyEntity,
		layer::{resolve_layer_spec, LayerRef, LayerSource, LayerSpec},
		textline::{resolve_text_spec, TextSource, TextSpec},
	},
	model::DeckModel,
	resolve::{key_chain, resolve_child_options},
	vars::VarScope,
};

/// One layer ready for pixels.
pub struct PlannedLayer {
	pub path: PathBuf,
	pub spec: LayerSpec,
}

/// One text line ready for pixels, content already resolved.
pub struct PlannedText {
	pub path: PathBuf,
	pub spec: TextSpec,
	pub content: String,
}

/// Everything needed to draw one key, plus the dependency report.
pub struct KeyPlan {
	pub layers: Vec<PlannedLayer>,
	pub texts: Vec<PlannedText>,
	pub used_vars: BTreeSet<String>,
	pub refs: HashSet<PathBuf>,
}

impl KeyPlan {
	pub fn is_empty(&self) -> bool {
		self.layers.is_empty() && self.texts.is_empty()
	}
}

/// A composed key: placed layers plus rasterized text blocks. Framing (and
/// scrolling) is cheap against this.
pub struct ComposedKey {
	placed_layers: Vec<(RgbaImage, i64, i64)>,
	pub texts: Vec<Option<RenderedText>>,
	key_width: u32,
	key_height: u32,
}

impl ComposedKey {
	/// Produce the final bitmap at the given per-text scroll offsets.
	/// `overlay_level` > 0 dims the result (key sits under an overlay).
	pub fn frame(&self, scroll_offsets: &[i64], overlay_level: u32) -> RgbaImage {
		let mut image = composite(
			self.placed_layers
				.iter()
				.map(|(layer, x, y)| (layer.clone(), *x, *y)),
			self.key_width,
			self.key_height,
		);
		for (index, rendered) in self.texts.iter().enumerate() {
			let Some(rendered) = rendered else {
				continue;
			};
			let scrolled = scroll_offsets.get(index).copied().unwrap_or(0);
			let (frame, x, y) = rendered.frame(scrolled);
			image::imageops::overlay(&mut image, &frame, x, y);
		}
		if overlay_level > 0 {
			image = dim_for_overlay(&image, overlay_level);
		}
		image
	}

	pub fn has_content(&self) -> bool {
		!self.placed_layers.is_empty() || self.texts.iter().any(Option::is_some)
	}
}

pub struct KeyRenderer {
	text_renderer: TextRenderer,
	key_width: u32,
	key_height: u32,
}

impl KeyRenderer {
	pub fn new(key_width: u32, key_height: u32) -> Self {
		Self {
			text_renderer: TextRenderer::new(),
			key_width,
			key_height,
		}
	}

	/// Resolve what the key should show right now.
	pub fn plan_key(&self, model: &DeckModel, page: u16, key: (u8, u8)) -> KeyPlan {
		let mut plan = KeyPlan {
			layers: Vec::new(),
			texts: Vec::new(),
			used_vars: BTreeSet::new(),
			refs: HashSet::new(),
		};

		let (chain, chain_refs) = key_chain(model, page, key);
		plan.refs.extend(chain_refs);
		if chain.is_empty() {
			return plan;
		}
		let scope = VarScope::key(model, page, key);

		// Children by identity, nearest chain entry winning.
		let mut layer_ids = BTreeSet::new();
		let mut line_ids = BTreeSet::new();
		for entity in &chain {
			layer_ids.extend(entity.layers.keys().copied());
			line_ids.extend(entity.lines.keys().copied());
		}
		// If at least one layered image exists, unlayered ones are ignored.
		if layer_ids.iter().any(|&id| id >= 0) && layer_ids.len() > 1 {
			layer_ids.remove(&-1);
		}
		if line_ids.iter().any(|&id| id >= 0) && line_ids.len() > 1 {
			line_ids.remove(&-1);
		}

		for id in layer_ids {
			let Some(entity) = chain
				.iter()
				.find_map(|key_entity| key_entity.layers.get(&id).and_then(|slot| slot.active()))
			else {
				continue;
			};
			if !entity.version.is_valid() {
				debug!("[LAYER {id}] Invalid at '{}'", entity.version.path.display());
				continue;
			}
			let resolved = resolve_child_options(
				model,
				&scope,
				&entity.version.parsed.options,
				&mut plan.refs,
				|model, layer_ref| find_layer_target(model, page, key, layer_ref),
			);
			plan.used_vars.extend(resolved.used_vars);
			if let Some(error) = resolved.error {
				debug!(
					"[LAYER {id}] Unresolved at '{}': {error}",
					entity.version.path.display()
				);
				continue;
			}
			match resolve_layer_spec(&resolved.options) {
				Ok(spec) => plan.layers.push(PlannedLayer {
					path: entity.version.path.clone(),
					spec,
				}),
				Err(error) => debug!(
					"[LAYER {id}] Invalid at '{}': {error}",
					entity.version.path.display()
				),
			}
		}

		for id in line_ids {
			let Some(entity) = chain
				.iter()
				.find_map(|key_entity| key_entity.lines.get(&id).and_then(|slot| slot.active()))
			else {
				continue;
			};
			if !entity.version.is_valid() {
				debug!("[TEXT {id}] Invalid at '{}'", entity.version.path.display());
				continue;
			}
			let resolved = resolve_child_options(
				model,
				&scope,
				&entity.version.parsed.options,
				&mut plan.refs,
				|model, text_ref| find_text_target(model, page, key, text_ref),
			);
			plan.used_vars.extend(resolved.used_vars);
			if let Some(error) = resolved.error {
				debug!(
					"[TEXT {id}] Unresolved at '{}': {error}",
					entity.version.path.display()
				);
				continue;
			}
			let spec = match resolve_text_spec(&resolved.options) {
				Ok(spec) => spec,
				Err(error) => {
					debug!(
						"[TEXT {id}] Invalid at '{}': {error}",
						entity.version.path.display()
					);
					continue;
				}
			};
			let Some(content) =
				text_content(&spec.source, &entity.version.path, &scope, &mut plan.used_vars)
			else {
				continue;
			};
			plan.texts.push(PlannedText {
				path: entity.version.path.clone(),
				spec,
				content,
			});
		}

		plan
	}

	/// Pure pixel work; run this off the core loop.
	pub fn compose(&self, plan: &KeyPlan) -> ComposedKey {
		let mut placed_layers = Vec::new();
		for layer in &plan.layers {
			match self.compose_layer(layer) {
				Ok(placed) => placed_layers.push(placed),
				// A failing layer renders transparent; the rest of the key
				// survives.
				Err(error) => warn!(
					"[LAYER] Could not be rendered ('{}'): {error}",
					layer.path.display()
				),
			}
		}

		let mut texts = Vec::new();
		for text in &plan.texts {
			match self.text_renderer.render(
				&text.content,
				&text.spec.options,
				self.key_width,
				self.key_height,
			) {
				Ok(rendered) => texts.push(rendered),
				Err(error) => {
					warn!(
						"[TEXT] Could not be rendered ('{}'): {error}",
						text.path.display()
					);
					texts.push(None);
				}
			}
		}

		ComposedKey {
			placed_layers,
			texts,
			key_width: self.key_width,
			key_height: self.key_height,
		}
	}

	fn compose_layer(&self, layer: &PlannedLayer) -> crate::error::Result<(RgbaImage, i64, i64)> {
		let source = match &layer.spec.source {
			LayerSource::Draw(draw) => draw.render(self.key_width, self.key_height)?,
			LayerSource::SelfFile => load_raster(&layer.path)?,
			LayerSource::File(target) => load_raster(&sibling_path(&layer.path, target))?,
			LayerSource::Inside => {
				let target = std::fs::read_to_string(&layer.path)
					.map_err(|source| crate::error::Error::io(layer.path.clone(), source))?;
				load_raster(&sibling_path(&layer.path, target.trim()))?
			}
		};
		Ok(place_layer(
			source,
			&layer.spec.pipeline,
			self.key_width,
			self.key_height,
		)?)
	}
}

/// Resolve a `file=` target against the entity's directory.
fn sibling_path(entity_path: &Path, target: impl AsRef<Path>) -> PathBuf {
	let target = target.as_ref();
	if target.is_absolute() {
		target.to_path_buf()
	} else {
		entity_path
			.parent()
			.map(|parent| parent.join(target))
			.unwrap_or_else(|| target.to_path_buf())
	}
}

/// Fetch and interpolate text content from its source.
fn text_content(
	source: &TextSource,
	entity_path: &Path,
	scope: &VarScope<'_>,
	used_vars: &mut BTreeSet<String>,
) -> Option<String> {
	let raw = match source {
		TextSource::Inline(text) => return Some(text.clone()),
		TextSource::SelfContent => std::fs::read_to_string(entity_path).ok()?,
		TextSource::File(target) => {
			std::fs::read_to_string(sibling_path(entity_path, target)).ok()?
		}
		TextSource::Inside => {
			let target = std::fs::read_to_string(entity_path).ok()?;
			std::fs::read_to_string(sibling_path(entity_path, target.trim())).ok()?
		}
	};
	// File content may reference variables too.
	let interpolated = scope.interpolate(&raw);
	used_vars.extend(interpolated.used);
	match interpolated.result {
		Ok(content) => Some(content),
		Err(error) => {
			debug!(
				"[TEXT] Content interpolation failed ('{}'): {error}",
				entity_path.display()
			);
			None
		}
	}
}

fn find_layer_target(
	model: &DeckModel,
	page: u16,
	key: (u8, u8),
	layer_ref: &LayerRef,
) -> Option<(Vec<PathBuf>, crate::config::OptionMap)> {
	let target_key = find_target_key(model, page, key, layer_ref)?;
	let entity = find_by_identifier_or_name(
		target_key.layers.iter(),
		layer_ref.target.as_deref().unwrap_or("-1"),
		|value| value.parse::<i32>().ok(),
		|layer| layer.name(),
	)?;
	Some((
		vec![
			entity.version.path.clone(),
			target_key.version.path.clone(),
		],
		entity.version.parsed.options.clone(),
	))
}

fn find_text_target(
	model: &DeckModel,
	page: u16,
	key: (u8, u8),
	text_ref: &LayerRef,
) -> Option<(Vec<PathBuf>, crate::config::OptionMap)> {
	let target_key = find_target_key(model, page, key, text_ref)?;
	let entity = find_by_identifier_or_name(
		target_key.lines.iter(),
		text_ref.target.as_deref().unwrap_or("-1"),
		|value| value.parse::<i32>().ok(),
		|line| line.name(),
	)?;
	Some((
		vec![
			entity.version.path.clone(),
			target_key.version.path.clone(),
		],
		entity.version.parsed.options.clone(),
	))
}

fn find_target_key<'a>(
	model: &'a DeckModel,
	page: u16,
	key: (u8, u8),
	layer_ref: &LayerRef,
) -> Option<&'a KeyEntity> {
	let page_number = match &layer_ref.page {
		Some(filter) => model.find_page(filter)?.number,
		None => page,
	};
	match &layer_ref.key {
		Some(filter) => {
			let page_entity = model.page(page_number)?;
			find_by_identifier_or_name(
				page_entity.keys.iter(),
				filter,
				|value| {
					let (row, col) = value.split_once(',')?;
					Some((row.parse().ok()?, col.parse().ok()?))
				},
				|candidate| candidate.name(),
			)
		}
		None => model.key(page_number, key),
	}
}

#[cfg(test)]
mod tests {
	use std::fs;

	use super::*;

	fn touch(path: &Path) {
		fs::write(path, "").expect("write");
	}

	fn scanned(root: &Path) -> DeckModel {
		let mut model = DeckModel::new(root.to_path_buf(), "TESTSERIAL01".to_string(), 3, 5);
		model.scan();
		model
	}

	fn renderer() -> KeyRenderer {
		KeyRenderer::new(72, 72)
	}

	#[test]
	fn empty_keys_plan_nothing() {
		let dir = tempfile::tempdir().expect("tempdir");
		fs::create_dir_all(dir.path().join("PAGE_1/KEY_1,1")).expect("mkdirs");
		let model = scanned(dir.path());
		let plan = renderer().plan_key(&model, 1, (1, 1));
		assert!(plan.is_empty());
	}

	#[test]
	fn drawings_compose_into_pixels() {
		let dir = tempfile::tempdir().expect("tempdir");
		fs::create_dir_all(dir.path().join("PAGE_1/KEY_1,1")).expect("mkdirs");
		touch(&dir.path().join("PAGE_1/KEY_1,1/IMAGE;draw=fill;fill=red"));
		let model = scanned(dir.path());

		let renderer = renderer();
		let plan = renderer.plan_key(&model, 1, (1, 1));
		assert_eq!(plan.layers.len(), 1);

		let composed = renderer.compose(&plan);
		assert!(composed.has_content());
		let image = composed.frame(&[], 0);
		assert_eq!(image.get_pixel(36, 36), &image::Rgba([255, 0, 0, 255]));
	}

	#[test]
	fn layered_images_hide_the_unlayered_one() {
		let dir = tempfile::tempdir().expect("tempdir");
		fs::create_dir_all(dir.path().join("PAGE_1/KEY_1,1")).expect("mkdirs");
		touch(&dir.path().join("PAGE_1/KEY_1,1/IMAGE;draw=fill;fill=red"));
		touch(&dir.path().join("PAGE_1/KEY_1,1/IMAGE;layer=2;draw=fill;fill=blue"));
		let model = scanned(dir.path());

		let plan = renderer().plan_key(&model, 1, (1, 1));
		assert_eq!(plan.layers.len(), 1);
	}

	#[test]
	fn disabled_layers_are_skipped() {
		let dir = tempfile::tempdir().expect("tempdir");
		fs::create_dir_all(dir.path().join("PAGE_1/KEY_1,1")).expect("mkdirs");
		touch(&dir.path().join("PAGE_1/KEY_1,1/IMAGE;draw=fill;fill=red;disabled"));
		let model = scanned(dir.path());
		assert!(renderer().plan_key(&model, 1, (1, 1)).is_empty());
	}

	#[test]
	fn variable_driven_options_register_dependencies() {
		let dir = tempfile::tempdir().expect("tempdir");
		fs::create_dir_all(dir.path().join("PAGE_1/KEY_1,1")).expect("mkdirs");
		touch(&dir.path().join("VAR_COLOR;value=red"));
		touch(&dir.path().join("PAGE_1/KEY_1,1/IMAGE;draw=fill;fill=$VAR_COLOR"));
		let model = scanned(dir.path());

		let plan = renderer().plan_key(&model, 1, (1, 1));
		assert_eq!(plan.layers.len(), 1);
		assert!(plan.used_vars.contains("COLOR"));
	}

	#[test]
	fn unresolved_variables_invalidate_only_that_child() {
		let dir = tempfile::tempdir().expect("tempdir");
		fs::create_dir_all(dir.path().join("PAGE_1/KEY_1,1")).expect("mkdirs");
		touch(&dir.path().join("PAGE_1/KEY_1,1/IMAGE;layer=1;draw=fill;fill=$VAR_NOPE"));
		touch(&dir.path().join("PAGE_1/KEY_1,1/IMAGE;layer=2;draw=fill;fill=green"));
		let model = scanned(dir.path());

		let plan = renderer().plan_key(&model, 1, (1, 1));
		// The broken layer is dropped but still reports its dependency.
		assert_eq!(plan.layers.len(), 1);
		assert!(plan.used_vars.contains("NOPE"));
	}

	#[test]
	fn inline_text_plans_with_content() {
		let dir = tempfile::tempdir().expect("tempdir");
		fs::create_dir_all(dir.path().join("PAGE_1/KEY_1,1")).expect("mkdirs");
		touch(&dir.path().join("PAGE_1/KEY_1,1/TEXT;text=hello"));
		let model = scanned(dir.path());

		let plan = renderer().plan_key(&model, 1, (1, 1));
		assert_eq!(plan.texts.len(), 1);
		assert_eq!(plan.texts[0].content, "hello");
	}

	#[test]
	fn file_content_text_reads_the_entity_file() {
		let dir = tempfile::tempdir().expect("tempdir");
		fs::create_dir_all(dir.path().join("PAGE_1/KEY_1,1")).expect("mkdirs");
		fs::write(dir.path().join("PAGE_1/KEY_1,1/TEXT;line=1"), "from file").expect("write");
		let model = scanned(dir.path());

		let plan = renderer().plan_key(&model, 1, (1, 1));
		assert_eq!(plan.texts[0].content, "from file");
	}

	#[test]
	fn referenced_key_contributes_missing_children() {
		let dir = tempfile::tempdir().expect("tempdir");
		fs::create_dir_all(dir.path().join("PAGE_1/KEY_1,1;ref=:2,2")).expect("mkdirs");
		fs::create_dir_all(dir.path().join("PAGE_1/KEY_2,2")).expect("mkdirs");
		touch(&dir.path().join("PAGE_1/KEY_2,2/IMAGE;draw=fill;fill=red"));
		touch(&dir.path().join("PAGE_1/KEY_1,1/TEXT;text=own"));
		let model = scanned(dir.path());

		let plan = renderer().plan_key(&model, 1, (1, 1));
		assert_eq!(plan.layers.len(), 1);
		assert_eq!(plan.texts.len(), 1);
		assert!(!plan.refs.is_empty());
	}

	#[test]
	fn missing_raster_files_do_not_break_the_key() {
		let dir = tempfile::tempdir().expect("tempdir");
		fs::create_dir_all(dir.path().join("PAGE_1/KEY_1,1")).expect("mkdirs");
		touch(&dir.path().join("PAGE_1/KEY_1,1/IMAGE;file=missing.png"));
		touch(&dir.path().join("PAGE_1/KEY_1,1/IMAGE;layer=1;draw=fill;fill=red"));
		let model = scanned(dir.path());

		let renderer = renderer();
		let plan = renderer.plan_key(&model, 1, (1, 1));
		let composed = renderer.compose(&plan);
		// The drawing still lands; the missing file renders transparent.
		let image = composed.frame(&[], 0);
		assert_eq!(image.get_pixel(36, 36), &image::Rgba([255, 0, 0, 255]));
	}

	#[test]
	fn framing_is_idempotent() {
		let dir = tempfile::tempdir().expect("tempdir");
		fs::create_dir_all(dir.path().join("PAGE_1/KEY_1,1")).expect("mkdirs");
		touch(&dir.path().join("PAGE_1/KEY_1,1/IMAGE;draw=fill;fill=navy"));
		let model = scanned(dir.path());

		let renderer = renderer();
		let plan = renderer.plan_key(&model, 1, (1, 1));
		let composed = renderer.compose(&plan);
		assert_eq!(composed.frame(&[], 0), composed.frame(&[], 0));
	}

	#[test]
	fn overlay_dimming_darkens_the_key() {
		let dir = tempfile::tempdir().expect("tempdir");
		fs::create_dir_all(dir.path().join("PAGE_1/KEY_1,1")).expect("mkdirs");
		touch(&dir.path().join("PAGE_1/KEY_1,1/IMAGE;draw=fill;fill=white"));
		let model = scanned(dir.path());

		let renderer = renderer();
		let plan = renderer.plan_key(&model, 1, (1, 1));
		let composed = renderer.compose(&plan);
		let bright = composed.frame(&[], 0);
		let dimmed = composed.frame(&[], 1);
		assert!(dimmed.get_pixel(36, 36).0[0] < bright.get_pixel(36, 36).0[0]);
	}
}
