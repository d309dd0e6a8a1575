use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;

use crate::RepgenError;
use crate::RepgenResult;

/// Default maximum nesting depth for `include` and `evalTemplate`.
pub const DEFAULT_MAX_INCLUDE_DEPTH: usize = 64;

/// Supported config file locations in discovery order (highest precedence
/// first).
pub const CONFIG_FILE_CANDIDATES: [&str; 3] =
	["repgen.toml", ".repgen.toml", ".config/repgen.toml"];

/// How rendered output is escaped.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
	/// Output is written verbatim.
	#[default]
	Text,
	/// Every interpolated value is HTML-escaped.
	Html,
}

/// Configuration loaded from a `repgen.toml` file.
///
/// ```toml
/// [templates]
/// paths = ["reports", "shared/templates"]
///
/// [render]
/// mode = "html"
/// max_include_depth = 16
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct RepgenConfig {
	/// Reference directories searched for named templates.
	#[serde(default)]
	pub templates: TemplatesConfig,
	/// Rendering behavior.
	#[serde(default)]
	pub render: RenderConfig,
}

/// Configuration for the template search path.
#[derive(Debug, Default, Deserialize)]
pub struct TemplatesConfig {
	/// Directories searched in order for `<name>.tpl`, relative to the
	/// project root. Earlier entries shadow later ones.
	#[serde(default)]
	pub paths: Vec<PathBuf>,
}

/// Configuration for how templates are rendered.
#[derive(Debug, Deserialize)]
pub struct RenderConfig {
	/// `text` (default) or `html`.
	#[serde(default)]
	pub mode: RenderMode,
	/// How deeply includes may nest before rendering fails. Defaults to 64.
	#[serde(default = "default_max_include_depth")]
	pub max_include_depth: usize,
}

impl Default for RenderConfig {
	fn default() -> Self {
		Self {
			mode: RenderMode::default(),
			max_include_depth: DEFAULT_MAX_INCLUDE_DEPTH,
		}
	}
}

fn default_max_include_depth() -> usize {
	DEFAULT_MAX_INCLUDE_DEPTH
}

impl RepgenConfig {
	/// Resolve the config path from known discovery candidates.
	#[must_use]
	pub fn resolve_path(root: &Path) -> Option<PathBuf> {
		CONFIG_FILE_CANDIDATES
			.iter()
			.map(|candidate| root.join(candidate))
			.find(|path| path.is_file())
	}

	/// Load the config from the first discovered config file at `root`.
	/// Returns `None` if no config file exists.
	pub fn load(root: &Path) -> RepgenResult<Option<RepgenConfig>> {
		let Some(config_path) = Self::resolve_path(root) else {
			return Ok(None);
		};

		tracing::debug!(path = %config_path.display(), "loading config");
		let content = std::fs::read_to_string(&config_path)?;
		let config: RepgenConfig =
			toml::from_str(&content).map_err(|e| RepgenError::ConfigParse(e.to_string()))?;

		Ok(Some(config))
	}
}

/// Options a [`Generator`](crate::Generator) renders with.
///
/// Use [`RenderOptions::default()`] for plain text rendering with no
/// reference directories or [`RenderOptions::from_config`] to construct from a
/// [`RepgenConfig`].
#[derive(Debug, Clone)]
pub struct RenderOptions {
	/// Escaping policy.
	pub mode: RenderMode,
	/// Ordered template search path.
	pub reference_dirs: Vec<PathBuf>,
	/// Maximum include nesting depth.
	pub max_include_depth: usize,
}

impl Default for RenderOptions {
	fn default() -> Self {
		Self {
			mode: RenderMode::default(),
			reference_dirs: Vec::new(),
			max_include_depth: DEFAULT_MAX_INCLUDE_DEPTH,
		}
	}
}

impl RenderOptions {
	/// Construct [`RenderOptions`] from an optional [`RepgenConfig`]. Relative
	/// template paths are resolved against `root`.
	pub fn from_config(root: &Path, config: Option<&RepgenConfig>) -> Self {
		let Some(config) = config else {
			return Self::default();
		};

		Self {
			mode: config.render.mode,
			reference_dirs: config
				.templates
				.paths
				.iter()
				.map(|path| root.join(path))
				.collect(),
			max_include_depth: config.render.max_include_depth,
		}
	}
}
