//! Template metadata embedded in a leading comment.
//!
//! A template may open with a JSON blob wrapped in a special comment:
//!
//! ```text
//! {{/*GT: {"display": "Monthly sales", "audience": ["finance"]} */ -}}
//! Sales for {{ dot.month }}
//! ```
//!
//! The marker must be the very first bytes of the file and the block ends on
//! the first line that ends with `*/ -}}`, so it may span several lines. The
//! block is read textually and never rendered: a template whose body is broken
//! still reports its metadata.

use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;
use std::path::PathBuf;

use serde::de::DeserializeOwned;

use crate::RepgenError;
use crate::RepgenResult;
use crate::resolver::TEMPLATE_EXTENSION;

/// Marker that opens a metadata block.
pub const ATTRIBUTES_START: &str = "{{/*GT:";
/// Marker that closes a metadata block.
pub const ATTRIBUTES_END: &str = "*/ -}}";

const INLINE_ORIGIN: &str = "inline template";

/// Metadata read from one template of a scanned directory.
#[derive(Debug)]
pub struct TemplateAttributes<T> {
	/// Template name: the filename without its `.tpl` extension.
	pub name: String,
	/// The decoded metadata, absent when reading the file failed.
	pub attributes: Option<T>,
	/// Why this template's metadata could not be read.
	pub error: Option<RepgenError>,
}

/// Result of scanning a directory for template metadata.
///
/// Templates without a metadata block are left out. Templates whose block
/// could not be read are kept, with their `error` set, so one broken file
/// never hides the metadata of the others.
#[derive(Debug)]
pub struct AttributeScan<T> {
	/// Scanned templates in filename order.
	pub templates: Vec<TemplateAttributes<T>>,
}

impl<T> AttributeScan<T> {
	/// Number of templates whose metadata could not be read.
	pub fn error_count(&self) -> usize {
		self.templates
			.iter()
			.filter(|template| template.error.is_some())
			.count()
	}

	/// Returns true if every template's metadata was read.
	pub fn is_ok(&self) -> bool {
		self.error_count() == 0
	}

	/// Fail with an aggregate error when any template could not be read.
	pub fn check(&self) -> RepgenResult<()> {
		match self.error_count() {
			0 => Ok(()),
			count => Err(RepgenError::AttributeScan { count }),
		}
	}
}

enum BlockScan {
	Absent,
	Unterminated,
	Closed { content: String, lines: usize },
}

/// Walk the leading lines of a template looking for the metadata block.
fn scan_block<I, S>(lines: I) -> std::io::Result<BlockScan>
where
	I: IntoIterator<Item = std::io::Result<S>>,
	S: AsRef<str>,
{
	let mut lines = lines.into_iter();
	let Some(first) = lines.next().transpose()? else {
		return Ok(BlockScan::Absent);
	};
	let Some(rest) = first.as_ref().strip_prefix(ATTRIBUTES_START) else {
		return Ok(BlockScan::Absent);
	};

	let mut content = String::new();
	let mut line = rest.to_string();
	let mut consumed = 1;

	loop {
		if let Some(body) = line.strip_suffix(ATTRIBUTES_END) {
			content.push_str(body);
			return Ok(BlockScan::Closed {
				content: content.trim().to_string(),
				lines: consumed,
			});
		}

		content.push_str(&line);
		content.push('\n');

		let Some(next) = lines.next().transpose()? else {
			return Ok(BlockScan::Unterminated);
		};
		line = next.as_ref().to_string();
		consumed += 1;
	}
}

fn extract_from_lines<I, S>(lines: I, origin: &str) -> RepgenResult<Option<String>>
where
	I: IntoIterator<Item = std::io::Result<S>>,
	S: AsRef<str>,
{
	let scan = scan_block(lines).map_err(|e| {
		RepgenError::ReadTemplate {
			path: origin.to_string(),
			source: e,
		}
	})?;

	match scan {
		BlockScan::Absent => Ok(None),
		BlockScan::Unterminated => {
			Err(RepgenError::Attributes {
				origin: origin.to_string(),
				reason: format!("metadata block is never closed with `{ATTRIBUTES_END}`"),
			})
		}
		BlockScan::Closed { content, .. } if content.is_empty() => Ok(None),
		BlockScan::Closed { content, .. } => Ok(Some(content)),
	}
}

fn decode<T: DeserializeOwned>(content: Option<String>, origin: &str) -> RepgenResult<Option<T>> {
	let Some(content) = content else {
		return Ok(None);
	};

	if content == "null" {
		return Ok(None);
	}

	serde_json::from_str(&content).map(Some).map_err(|e| {
		RepgenError::Attributes {
			origin: origin.to_string(),
			reason: e.to_string(),
		}
	})
}

/// Return the raw text between the metadata markers, trimmed. Returns `None`
/// when the template does not start with a metadata block or the block is
/// empty.
pub fn extract_attribute_string(template: &str) -> RepgenResult<Option<String>> {
	extract_from_lines(template.lines().map(Ok::<_, std::io::Error>), INLINE_ORIGIN)
}

/// Decode the metadata block of `template` as a dynamic JSON value.
pub fn read_attributes_from_str(template: &str) -> RepgenResult<Option<serde_json::Value>> {
	read_attributes_from_str_as(template)
}

/// Decode the metadata block of `template` into `T`. A block holding only
/// `null` counts as no metadata.
pub fn read_attributes_from_str_as<T: DeserializeOwned>(template: &str) -> RepgenResult<Option<T>> {
	decode(extract_attribute_string(template)?, INLINE_ORIGIN)
}

/// Decode the metadata block of the template file at `path` as a dynamic JSON
/// value. Only the leading lines of the file are read.
pub fn read_attributes_from_path(path: &Path) -> RepgenResult<Option<serde_json::Value>> {
	read_attributes_from_path_as(path)
}

/// Decode the metadata block of the template file at `path` into `T`.
pub fn read_attributes_from_path_as<T: DeserializeOwned>(path: &Path) -> RepgenResult<Option<T>> {
	let origin = path.display().to_string();
	let file = std::fs::File::open(path).map_err(|e| {
		RepgenError::ReadTemplate {
			path: origin.clone(),
			source: e,
		}
	})?;

	let content = extract_from_lines(BufReader::new(file).lines(), &origin)?;
	decode(content, &origin)
}

/// Read the metadata of every `*.tpl` file directly inside `dir` as dynamic
/// JSON values.
pub fn scan_directory_attributes(dir: &Path) -> RepgenResult<AttributeScan<serde_json::Value>> {
	scan_directory_attributes_as(dir)
}

/// Read the metadata of every `*.tpl` file directly inside `dir` into `T`.
///
/// Only failing to list the directory is an error here. Per-template failures
/// are recorded on the returned [`AttributeScan`]; call
/// [`AttributeScan::check`] to turn them into an aggregate error.
pub fn scan_directory_attributes_as<T: DeserializeOwned>(
	dir: &Path,
) -> RepgenResult<AttributeScan<T>> {
	let read_dir_error = |e: std::io::Error| {
		RepgenError::ReadDirectory {
			path: dir.display().to_string(),
			reason: e.to_string(),
		}
	};

	let suffix = format!(".{TEMPLATE_EXTENSION}");
	let mut candidates: Vec<(String, PathBuf)> = Vec::new();

	for entry in std::fs::read_dir(dir).map_err(read_dir_error)? {
		let entry = entry.map_err(read_dir_error)?;
		let path = entry.path();

		if path.is_dir() {
			continue;
		}

		let Some(file_name) = entry.file_name().to_str().map(ToOwned::to_owned) else {
			continue;
		};
		let Some(name) = file_name.strip_suffix(suffix.as_str()) else {
			continue;
		};

		candidates.push((name.to_string(), path));
	}

	candidates.sort_by(|a, b| a.0.cmp(&b.0));

	let mut templates = Vec::new();

	for (name, path) in candidates {
		match read_attributes_from_path_as::<T>(&path) {
			Ok(None) => {}
			Ok(Some(attributes)) => {
				templates.push(TemplateAttributes {
					name,
					attributes: Some(attributes),
					error: None,
				});
			}
			Err(error) => {
				tracing::warn!(template = %name, %error, "failed to read template attributes");
				templates.push(TemplateAttributes {
					name,
					attributes: None,
					error: Some(error),
				});
			}
		}
	}

	Ok(AttributeScan { templates })
}

/// Remove a closed leading metadata block and the whitespace that follows it,
/// leaving only the part of the template the engine should see.
///
/// Templates without a block, or with a block that is never closed, are
/// returned unchanged.
pub fn strip_attribute_block(template: &str) -> &str {
	let Ok(BlockScan::Closed { lines, .. }) =
		scan_block(template.lines().map(Ok::<_, std::io::Error>))
	else {
		return template;
	};

	let offset: usize = template
		.split_inclusive('\n')
		.take(lines)
		.map(str::len)
		.sum();

	template[offset..].trim_start()
}
