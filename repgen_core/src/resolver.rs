use std::path::Path;
use std::path::PathBuf;

use crate::RepgenError;
use crate::RepgenResult;

/// Filename extension shared by every template in a reference directory.
pub const TEMPLATE_EXTENSION: &str = "tpl";

/// Find the first readable `<dir>/<name>.tpl` across `refdirs`, in order.
///
/// Earlier directories shadow later ones, which lets a project layer its own
/// templates over a shared set. Nothing is cached; every call probes the
/// filesystem again. `name` is trusted: it may contain path separators to
/// reach into subdirectories and is not checked for traversal.
pub fn find_template(name: &str, refdirs: &[PathBuf]) -> RepgenResult<PathBuf> {
	for dir in refdirs {
		let candidate = template_path(dir, name);
		tracing::trace!(path = %candidate.display(), "probing template candidate");

		if std::fs::File::open(&candidate).is_ok_and(|file| {
			file.metadata().is_ok_and(|metadata| metadata.is_file())
		}) {
			tracing::debug!(name, path = %candidate.display(), "resolved template");
			return Ok(candidate);
		}
	}

	Err(RepgenError::TemplateNotFound(name.to_string()))
}

/// The path a template called `name` would have inside `dir`.
pub fn template_path(dir: &Path, name: &str) -> PathBuf {
	dir.join(format!("{name}.{TEMPLATE_EXTENSION}"))
}
