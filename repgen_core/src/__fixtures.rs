use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

use chrono::DateTime;
use chrono::TimeZone;
use chrono::Utc;
use serde_json::Value;
use serde_json::json;
use tempfile::TempDir;

use crate::Clock;
use crate::DataSource;
use crate::DataSourceError;
use crate::DataSourceResult;
use crate::EmptySource;
use crate::Generator;
use crate::OutputBuffer;
use crate::Record;
use crate::RenderMode;

/// Create a temporary reference directory holding `files` (relative path,
/// content). Parent directories are created as needed.
pub(crate) fn reference_dir(files: &[(&str, &str)]) -> TempDir {
	let dir = tempfile::tempdir().expect("create temp dir");

	for (path, content) in files {
		let path = dir.path().join(path);
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent).expect("create parent dir");
		}
		std::fs::write(path, content).expect("write fixture file");
	}

	dir
}

pub(crate) fn dirs(dirs: &[&TempDir]) -> Vec<PathBuf> {
	dirs.iter().map(|dir| dir.path().to_path_buf()).collect()
}

/// A generator writing plain text into a fresh buffer.
pub(crate) fn text_generator(name: &str) -> (Generator, OutputBuffer) {
	generator_with_source(name, RenderMode::Text, Arc::new(EmptySource))
}

pub(crate) fn generator_with_source(
	name: &str,
	mode: RenderMode,
	source: Arc<dyn DataSource>,
) -> (Generator, OutputBuffer) {
	let output = OutputBuffer::new();
	let generator = Generator::new(name, mode, output.clone(), source);
	(generator, output)
}

/// Walk an error's source chain looking for a `T`.
pub(crate) fn find_cause<'a, T: std::error::Error + 'static>(
	error: &'a (dyn std::error::Error + 'static),
) -> Option<&'a T> {
	let mut current = Some(error);

	while let Some(error) = current {
		if let Some(found) = error.downcast_ref::<T>() {
			return Some(found);
		}
		current = error.source();
	}

	None
}

pub(crate) fn report_start() -> DateTime<Utc> {
	Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 0)
		.single()
		.expect("valid fixture time")
}

/// A clock that moves one second forward every time it is read.
#[derive(Debug, Default)]
pub(crate) struct TickingClock(AtomicI64);

impl Clock for TickingClock {
	fn now(&self) -> DateTime<Utc> {
		let tick = self.0.fetch_add(1, Ordering::SeqCst);
		report_start() + chrono::Duration::seconds(tick)
	}
}

/// A source answering the generic `data` call: the first argument picks the
/// shape of the result and the second is echoed back inside it.
pub(crate) struct EchoSource;

fn echo_record(a: i64, label: &str, suffix: &str) -> Value {
	json!({ "a": a, "c": format!("{label}:{suffix}") })
}

impl DataSource for EchoSource {
	fn rows(&self, _args: &[Value]) -> DataSourceResult<Vec<Record>> {
		Ok(Vec::new())
	}

	fn data(&self, args: &[Value]) -> DataSourceResult<Value> {
		let (Some(Value::String(kind)), Some(Value::String(suffix))) = (args.first(), args.get(1))
		else {
			return Err(DataSourceError::InvalidQuery(Value::Array(args.to_vec()).to_string()));
		};

		match kind.as_str() {
			"field" => Ok(Value::String(format!("<{suffix}>"))),
			"row" => Ok(echo_record(1, "Three", suffix)),
			"rows" => {
				Ok(json!([
					echo_record(1, "Three", suffix),
					echo_record(11, "Thirteen", suffix),
					echo_record(21, "Twentythree", suffix),
				]))
			}
			other => {
				Err(DataSourceError::UnknownQuery {
					query: other.to_string(),
				})
			}
		}
	}
}
