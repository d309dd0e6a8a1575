//! Data sources supply records to the `row`, `rows` and `data` template
//! functions while a report renders.
//!
//! A source is a capability, not a container: the generator only ever calls
//! into it through [`DataSource`] and never mutates it. Query-style sources
//! follow one argument convention: the first positional argument is the query
//! string and the remaining arguments are its positional parameters.

use std::collections::HashMap;

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

/// One record returned by a data source, keyed by field name in column order.
pub type Record = serde_json::Map<String, Value>;

pub type DataSourceResult<T> = Result<T, DataSourceError>;

#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum DataSourceError {
	#[error("data source call is missing the query argument")]
	#[diagnostic(
		code(repgen::data::missing_query),
		help("pass the query string as the first argument, e.g. `rows(\"select ...\")`")
	)]
	MissingQuery,

	#[error("data source query must be a string, got `{0}`")]
	#[diagnostic(code(repgen::data::invalid_query))]
	InvalidQuery(String),

	#[error("expected exactly one row, got {got}")]
	#[diagnostic(
		code(repgen::data::row_count),
		help("use `rows(...)` when a query can return zero or several records")
	)]
	RowCount { got: usize },

	#[error("no results registered for query `{query}`")]
	#[diagnostic(code(repgen::data::unknown_query))]
	UnknownQuery { query: String },

	#[error("data source does not support `{operation}`")]
	#[diagnostic(code(repgen::data::unsupported))]
	Unsupported { operation: String },

	#[error("data source backend failed: {0}")]
	#[diagnostic(code(repgen::data::backend))]
	Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl DataSourceError {
	/// Wrap an error raised by an external backend (database driver, HTTP
	/// client, ...).
	pub fn backend(error: impl std::error::Error + Send + Sync + 'static) -> Self {
		Self::Backend(Box::new(error))
	}
}

/// The capability a report renders against.
///
/// `rows` must materialize its whole result before returning. `row` must fail
/// unless exactly one record matches; the provided implementation enforces
/// that on top of `rows`.
pub trait DataSource: Send + Sync {
	/// Fetch zero or more records.
	fn rows(&self, args: &[Value]) -> DataSourceResult<Vec<Record>>;

	/// Fetch exactly one record.
	fn row(&self, args: &[Value]) -> DataSourceResult<Record> {
		exactly_one(self.rows(args)?)
	}

	/// Fetch an arbitrarily shaped value. Sources opt into this.
	fn data(&self, _args: &[Value]) -> DataSourceResult<Value> {
		Err(DataSourceError::Unsupported {
			operation: "data".to_string(),
		})
	}
}

/// Reduce a result set to its single record.
pub fn exactly_one(mut rows: Vec<Record>) -> DataSourceResult<Record> {
	if rows.len() == 1 {
		Ok(rows.remove(0))
	} else {
		Err(DataSourceError::RowCount { got: rows.len() })
	}
}

/// Split call arguments into the query string and its positional parameters.
pub fn split_query(args: &[Value]) -> DataSourceResult<(&str, &[Value])> {
	let Some((query, params)) = args.split_first() else {
		return Err(DataSourceError::MissingQuery);
	};

	match query {
		Value::String(query) => Ok((query.as_str(), params)),
		other => Err(DataSourceError::InvalidQuery(other.to_string())),
	}
}

/// Expose a binary column value as text. Invalid UTF-8 sequences are replaced
/// rather than rejected.
pub fn bytes_to_value(bytes: &[u8]) -> Value {
	Value::String(String::from_utf8_lossy(bytes).into_owned())
}

/// A source for templates that never touch data. `row` yields an empty record
/// and `rows` an empty list.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptySource;

impl DataSource for EmptySource {
	fn rows(&self, _args: &[Value]) -> DataSourceResult<Vec<Record>> {
		Ok(Vec::new())
	}

	fn row(&self, _args: &[Value]) -> DataSourceResult<Record> {
		Ok(Record::new())
	}
}

/// An in-memory source answering registered queries.
///
/// Results are keyed by the query string together with its positional
/// parameters, so `rows("select * from t where id = ?", 1)` and
/// `rows("select * from t where id = ?", 2)` can return different records.
///
/// ```rust
/// use repgen_core::DataSource;
/// use repgen_core::MemorySource;
/// use serde_json::json;
///
/// let source = MemorySource::new().with_query(
/// 	"select name from users",
/// 	[],
/// 	vec![json!({ "name": "ada" }), json!({ "name": "grace" })],
/// );
///
/// let rows = source.rows(&[json!("select name from users")]).unwrap();
/// assert_eq!(rows.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
	results: HashMap<String, Vec<Record>>,
}

impl MemorySource {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register the records returned for `query` called with `params`. Values
	/// that are not JSON objects are skipped.
	#[must_use]
	pub fn with_query(
		mut self,
		query: impl Into<String>,
		params: impl IntoIterator<Item = Value>,
		rows: Vec<Value>,
	) -> Self {
		let params: Vec<Value> = params.into_iter().collect();
		let records = rows
			.into_iter()
			.filter_map(|row| {
				match row {
					Value::Object(record) => Some(record),
					_ => None,
				}
			})
			.collect();

		self.results
			.insert(result_key(&query.into(), &params), records);
		self
	}
}

impl DataSource for MemorySource {
	fn rows(&self, args: &[Value]) -> DataSourceResult<Vec<Record>> {
		let (query, params) = split_query(args)?;
		tracing::trace!(query, params = params.len(), "memory source lookup");

		self.results
			.get(&result_key(query, params))
			.cloned()
			.ok_or_else(|| {
				DataSourceError::UnknownQuery {
					query: query.to_string(),
				}
			})
	}
}

fn result_key(query: &str, params: &[Value]) -> String {
	format!("{query}\u{0}{}", Value::Array(params.to_vec()))
}
