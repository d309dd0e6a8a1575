use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use chrono::DateTime;
use chrono::Utc;
use minijinja::AutoEscape;
use minijinja::Environment;
use minijinja::Error;
use minijinja::ErrorKind;
use minijinja::UndefinedBehavior;
use minijinja::Value;
use minijinja::context;
use minijinja::value::Rest;
use serde::Serialize;

use crate::Clock;
use crate::DataSource;
use crate::DataSourceError;
use crate::RenderMode;
use crate::RenderOptions;
use crate::RepgenError;
use crate::RepgenResult;
use crate::SystemClock;
use crate::attributes::strip_attribute_block;
use crate::config::DEFAULT_MAX_INCLUDE_DEPTH;
use crate::helpers::register_helpers;
use crate::helpers::timestamp_value;
use crate::resolver::find_template;

/// Renders templates from a literal string, a file path or a name resolved
/// against ordered reference directories.
///
/// Besides the stateless helpers, templates can call:
///
/// - `row(query, params...)` / `rows(query, params...)` / `data(args...)` to
///   read from the [`DataSource`].
/// - `include(name, dot?)` to render another named template into the same
///   output, in place.
/// - `evalTemplate(text, dot?)` to do the same with literal template text.
/// - `return(value)` to hand `value` back to the `include`/`evalTemplate`
///   call that rendered the current template.
/// - `reportStartTime()` for the instant the top-level render started.
///
/// The dot value is available as `dot`.
///
/// Nested renders write straight to the sink, so their output lands in place
/// only where the engine streams. Macro bodies, `{% filter %}` blocks and
/// `{% set %}...{% endset %}` blocks are buffered by the engine and emitted
/// when they finish, which puts the output of an `include` or `evalTemplate`
/// made inside them ahead of the surrounding text.
///
/// ```rust
/// use std::sync::Arc;
///
/// use repgen_core::EmptySource;
/// use repgen_core::Generator;
/// use repgen_core::OutputBuffer;
/// use repgen_core::RenderMode;
///
/// let output = OutputBuffer::new();
/// let generator = Generator::new(
/// 	"greeting",
/// 	RenderMode::Text,
/// 	output.clone(),
/// 	Arc::new(EmptySource),
/// );
///
/// generator
/// 	.render_from_string("Hello {{ dot }}\n", "World")
/// 	.unwrap();
/// assert_eq!(output.contents(), "Hello World\n");
/// ```
#[derive(Clone)]
pub struct Generator {
	name: String,
	mode: RenderMode,
	sink: Sink,
	source: Arc<dyn DataSource>,
	reference_dirs: Arc<[PathBuf]>,
	functions: Arc<BTreeMap<String, Value>>,
	clock: Arc<dyn Clock>,
	max_include_depth: usize,
	started_at: Option<DateTime<Utc>>,
	/// Names of the templates that included this one, outermost first.
	chain: Vec<String>,
	include_result: Arc<Mutex<Value>>,
}

impl fmt::Debug for Generator {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Generator")
			.field("name", &self.name)
			.field("mode", &self.mode)
			.field("reference_dirs", &self.reference_dirs)
			.field("functions", &self.functions.keys().collect::<Vec<_>>())
			.field("max_include_depth", &self.max_include_depth)
			.field("started_at", &self.started_at)
			.field("chain", &self.chain)
			.finish_non_exhaustive()
	}
}

impl Generator {
	/// Create a generator writing to `sink` and reading from `source`.
	pub fn new(
		name: impl Into<String>,
		mode: RenderMode,
		sink: impl Write + Send + 'static,
		source: Arc<dyn DataSource>,
	) -> Self {
		Self {
			name: name.into(),
			mode,
			sink: Sink(Arc::new(Mutex::new(sink))),
			source,
			reference_dirs: Arc::from(Vec::new()),
			functions: Arc::default(),
			clock: Arc::new(SystemClock),
			max_include_depth: DEFAULT_MAX_INCLUDE_DEPTH,
			started_at: None,
			chain: Vec::new(),
			include_result: empty_result(),
		}
	}

	/// Apply the mode, reference directories and include limit from `options`.
	#[must_use]
	pub fn with_options(mut self, options: RenderOptions) -> Self {
		self.mode = options.mode;
		self.reference_dirs = options.reference_dirs.into();
		self.max_include_depth = options.max_include_depth;
		self
	}

	/// A copy of this generator rendering under another name. The copy shares
	/// the sink, source, reference directories and functions but has its own
	/// (empty) return value.
	#[must_use]
	pub fn with_name(&self, name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			include_result: empty_result(),
			..self.clone()
		}
	}

	/// Replace the ordered template search path.
	#[must_use]
	pub fn with_reference_dirs(mut self, dirs: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
		self.reference_dirs = dirs.into_iter().map(Into::into).collect();
		self
	}

	/// Register an extra template function, typically built with
	/// [`Value::from_function`]. A function registered under the name of a
	/// builtin replaces the builtin.
	#[must_use]
	pub fn with_function(mut self, name: impl Into<String>, function: Value) -> Self {
		Arc::make_mut(&mut self.functions).insert(name.into(), function);
		self
	}

	/// Register several extra template functions. Later entries win.
	#[must_use]
	pub fn with_functions(mut self, functions: impl IntoIterator<Item = (String, Value)>) -> Self {
		Arc::make_mut(&mut self.functions).extend(functions);
		self
	}

	/// Use `clock` for `reportStartTime()`.
	#[must_use]
	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;
		self
	}

	#[must_use]
	pub fn with_mode(mut self, mode: RenderMode) -> Self {
		self.mode = mode;
		self
	}

	#[must_use]
	pub fn with_max_include_depth(mut self, depth: usize) -> Self {
		self.max_include_depth = depth;
		self
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn mode(&self) -> RenderMode {
		self.mode
	}

	pub fn reference_dirs(&self) -> &[PathBuf] {
		&self.reference_dirs
	}

	/// Render literal template text against `dot`.
	pub fn render_from_string<D: Serialize + ?Sized>(&self, text: &str, dot: &D) -> RepgenResult<()> {
		let generator = self.start();
		generator.render(text, Value::from_serialize(dot))?;
		generator.finish()
	}

	/// Read the template file at `path` and render it against `dot`.
	pub fn render_from_path<D: Serialize + ?Sized>(&self, path: &Path, dot: &D) -> RepgenResult<()> {
		let generator = self.start();
		generator.render_path(path, Value::from_serialize(dot))?;
		generator.finish()
	}

	/// Find `<dir>/<name>.tpl` in the first of `reference_dirs` that has it and
	/// render it against `dot`. Includes made by the template search the same
	/// directories.
	pub fn render_from_name<D: Serialize + ?Sized>(
		&self,
		name: &str,
		reference_dirs: &[PathBuf],
		dot: &D,
	) -> RepgenResult<()> {
		let generator = self
			.with_name(name)
			.with_reference_dirs(reference_dirs.iter().cloned())
			.start();
		let path = find_template(name, &generator.reference_dirs)?;
		generator.render_path(&path, Value::from_serialize(dot))?;
		generator.finish()
	}

	/// Freeze the render start time for this render tree.
	fn start(&self) -> Self {
		let mut generator = self.clone();
		if generator.started_at.is_none() {
			generator.started_at = Some(self.clock.now());
		}
		generator
	}

	fn finish(&self) -> RepgenResult<()> {
		self.sink.clone().flush()?;
		Ok(())
	}

	fn render_path(&self, path: &Path, dot: Value) -> RepgenResult<()> {
		let text = std::fs::read_to_string(path).map_err(|e| {
			RepgenError::ReadTemplate {
				path: path.display().to_string(),
				source: e,
			}
		})?;

		self.render(&text, dot)
	}

	fn render(&self, text: &str, dot: Value) -> RepgenResult<()> {
		tracing::debug!(
			name = %self.name,
			mode = ?self.mode,
			depth = self.chain.len(),
			"rendering template"
		);

		let body = strip_attribute_block(text);
		let mut env = self.environment();
		env.add_template(&self.name, body).map_err(|e| {
			RepgenError::Parse {
				name: self.name.clone(),
				source: e,
			}
		})?;

		let template = env.get_template(&self.name).map_err(|e| {
			RepgenError::Parse {
				name: self.name.clone(),
				source: e,
			}
		})?;

		template
			.render_captured_to(context! { dot => dot }, self.sink.clone())
			.map_err(|e| {
				RepgenError::Execution {
					name: self.name.clone(),
					source: e,
				}
			})?;

		Ok(())
	}

	/// Build the engine environment for one render: escaping policy, builtin
	/// functions bound to this generator, then caller functions on top.
	fn environment<'source>(&self) -> Environment<'source> {
		let mut env = Environment::new();
		env.set_keep_trailing_newline(true);
		env.set_undefined_behavior(UndefinedBehavior::Strict);

		let mode = self.mode;
		env.set_auto_escape_callback(move |_| {
			match mode {
				RenderMode::Text => AutoEscape::None,
				RenderMode::Html => AutoEscape::Html,
			}
		});

		register_helpers(&mut env);

		let source = Arc::clone(&self.source);
		env.add_function("row", move |args: Rest<Value>| -> Result<Value, Error> {
			let args = json_args(&args.0)?;
			let record = source.row(&args).map_err(|e| source_error("row", e))?;
			Ok(Value::from_serialize(&record))
		});

		let source = Arc::clone(&self.source);
		env.add_function("rows", move |args: Rest<Value>| -> Result<Value, Error> {
			let args = json_args(&args.0)?;
			let records = source.rows(&args).map_err(|e| source_error("rows", e))?;
			Ok(Value::from_serialize(&records))
		});

		let source = Arc::clone(&self.source);
		env.add_function("data", move |args: Rest<Value>| -> Result<Value, Error> {
			let args = json_args(&args.0)?;
			let value = source.data(&args).map_err(|e| source_error("data", e))?;
			Ok(Value::from_serialize(&value))
		});

		let generator = self.clone();
		env.add_function(
			"include",
			move |name: String, args: Rest<Value>| -> Result<Value, Error> {
				generator.include(&name, args.0)
			},
		);

		let generator = self.clone();
		env.add_function(
			"evalTemplate",
			move |text: String, args: Rest<Value>| -> Result<Value, Error> {
				generator.eval_template(&text, args.0)
			},
		);

		let slot = Arc::clone(&self.include_result);
		env.add_function("return", move |value: Value| -> Value {
			*lock_result(&slot) = value;
			Value::from("")
		});

		let started_at = timestamp_value(self.started_at.unwrap_or_else(|| self.clock.now()));
		env.add_function("reportStartTime", move || started_at.clone());

		for (name, function) in self.functions.iter() {
			env.add_global(name.clone(), function.clone());
		}

		env
	}

	/// Render `name` into the shared sink. Inside a macro, filter block or
	/// block `set` the output precedes the buffered parent text.
	fn include(&self, name: &str, args: Vec<Value>) -> Result<Value, Error> {
		let dot = nested_dot("include", args)?;
		tracing::debug!(parent = %self.name, name, "including template");

		let child = self
			.derive(name)
			.map_err(|e| nested_error("include", name, e))?;
		let path =
			find_template(name, &self.reference_dirs).map_err(|e| nested_error("include", name, e))?;
		child
			.render_path(&path, dot)
			.map_err(|e| nested_error("include", name, e))?;

		Ok(child.take_result())
	}

	fn eval_template(&self, text: &str, args: Vec<Value>) -> Result<Value, Error> {
		let dot = nested_dot("evalTemplate", args)?;
		let name = format!("{}#eval", self.name);
		tracing::debug!(parent = %self.name, "evaluating template text");

		let child = self
			.derive(&name)
			.map_err(|e| nested_error("evalTemplate", &name, e))?;
		child
			.render(text, dot)
			.map_err(|e| nested_error("evalTemplate", &name, e))?;

		Ok(child.take_result())
	}

	/// A generator for a nested render one level deeper than this one.
	fn derive(&self, name: &str) -> RepgenResult<Self> {
		if self.chain.len() >= self.max_include_depth {
			let chain = self
				.chain
				.iter()
				.map(String::as_str)
				.chain([self.name.as_str(), name])
				.collect::<Vec<_>>()
				.join(" -> ");

			return Err(RepgenError::RecursionLimitExceeded {
				limit: self.max_include_depth,
				chain,
			});
		}

		let mut child = self.with_name(name);
		child.chain.push(self.name.clone());
		Ok(child)
	}

	fn take_result(&self) -> Value {
		std::mem::replace(&mut *lock_result(&self.include_result), Value::from(""))
	}
}

fn empty_result() -> Arc<Mutex<Value>> {
	Arc::new(Mutex::new(Value::from("")))
}

fn lock_result(slot: &Mutex<Value>) -> MutexGuard<'_, Value> {
	slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The optional trailing dot argument of `include` and `evalTemplate`.
fn nested_dot(function: &str, args: Vec<Value>) -> Result<Value, Error> {
	let count = args.len();
	let mut args = args.into_iter();

	match (args.next(), args.next()) {
		(None, _) => Ok(Value::from(())),
		(Some(dot), None) => Ok(dot),
		_ => {
			Err(Error::new(
				ErrorKind::TooManyArguments,
				format!("{function} accepts at most one dot argument, got {count}"),
			))
		}
	}
}

fn nested_error(function: &str, name: &str, error: RepgenError) -> Error {
	Error::new(
		ErrorKind::InvalidOperation,
		format!("{function} of `{name}` failed: {error}"),
	)
	.with_source(error)
}

fn source_error(function: &str, error: DataSourceError) -> Error {
	Error::new(
		ErrorKind::InvalidOperation,
		format!("`{function}` data source call failed: {error}"),
	)
	.with_source(error)
}

fn json_args(args: &[Value]) -> Result<Vec<serde_json::Value>, Error> {
	args.iter()
		.map(|arg| {
			serde_json::to_value(arg).map_err(|e| {
				Error::new(
					ErrorKind::BadSerialization,
					"data source arguments must be plain values",
				)
				.with_source(e)
			})
		})
		.collect()
}

/// The shared output stream of a render tree. Every write locks it briefly so
/// nested renders can append to it while the parent is mid-render.
#[derive(Clone)]
struct Sink(Arc<Mutex<dyn Write + Send>>);

impl Sink {
	fn lock(&self) -> std::io::Result<MutexGuard<'_, dyn Write + Send + 'static>> {
		self.0
			.lock()
			.map_err(|_| std::io::Error::other("output sink lock poisoned"))
	}
}

impl Write for Sink {
	fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
		self.lock()?.write(buf)
	}

	fn flush(&mut self) -> std::io::Result<()> {
		self.lock()?.flush()
	}
}

/// An in-memory sink whose clones share one buffer, so the rendered bytes can
/// be read back after handing a clone to a [`Generator`].
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer(Arc<Mutex<Vec<u8>>>);

impl OutputBuffer {
	pub fn new() -> Self {
		Self::default()
	}

	/// Everything written so far, decoded as UTF-8.
	pub fn contents(&self) -> String {
		let bytes = self.0.lock().unwrap_or_else(PoisonError::into_inner);
		String::from_utf8_lossy(&bytes).into_owned()
	}
}

impl Write for OutputBuffer {
	fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
		self.0
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.write(buf)
	}

	fn flush(&mut self) -> std::io::Result<()> {
		Ok(())
	}
}
