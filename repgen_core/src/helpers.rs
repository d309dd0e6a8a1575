use std::collections::BTreeMap;

use chrono::DateTime;
use chrono::FixedOffset;
use chrono::SecondsFormat;
use chrono::Utc;
use chrono::format::Item;
use chrono::format::StrftimeItems;
use minijinja::Environment;
use minijinja::Error;
use minijinja::ErrorKind;
use minijinja::Value;
use minijinja::value::Rest;

/// Source of the render start time.
///
/// The generator asks its clock once per top-level render and every nested
/// include sees that same instant through `reportStartTime()`.
pub trait Clock: Send + Sync {
	fn now(&self) -> DateTime<Utc>;
}

/// Reads the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}
}

/// Always reports the same instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
	fn now(&self) -> DateTime<Utc> {
		self.0
	}
}

/// Register the stateless template helpers.
pub(crate) fn register_helpers(env: &mut Environment<'_>) {
	env.add_function("evenodd", evenodd);
	env.add_function("formatTime", format_time);
	env.add_function("mkmap", mkmap);
}

/// `evenodd(n, a, b)` picks `a` when `n` is even and `b` otherwise. Negative
/// numbers follow the same rule.
pub fn evenodd(n: i64, even: Value, odd: Value) -> Value {
	if n % 2 == 0 { even } else { odd }
}

/// `mkmap(k1, v1, k2, v2, ...)` builds a map from alternating keys and values.
/// A repeated key keeps its last value.
pub fn mkmap(args: Rest<Value>) -> Result<Value, Error> {
	if args.0.len() % 2 != 0 {
		return Err(Error::new(
			ErrorKind::InvalidOperation,
			format!(
				"mkmap expects an even number of arguments, got {}",
				args.0.len()
			),
		));
	}

	let mut map = BTreeMap::new();

	for (index, pair) in args.0.chunks_exact(2).enumerate() {
		let Some(key) = pair[0].as_str() else {
			return Err(Error::new(
				ErrorKind::InvalidOperation,
				format!("mkmap key at position {} must be a string", index * 2),
			));
		};
		map.insert(key.to_string(), pair[1].clone());
	}

	Ok(Value::from(map))
}

/// `formatTime(layout, timestamp)` formats a timestamp with a strftime layout
/// such as `%Y-%m-%d %H:%M`. The timestamp is an RFC 3339 string (what
/// `reportStartTime()` returns) or a number of Unix seconds.
pub fn format_time(layout: String, timestamp: Value) -> Result<String, Error> {
	let items: Vec<Item<'_>> = StrftimeItems::new(&layout).collect();

	if items.iter().any(|item| matches!(item, Item::Error)) {
		return Err(Error::new(
			ErrorKind::InvalidOperation,
			format!("invalid time layout `{layout}`"),
		));
	}

	let time = parse_timestamp(&timestamp)?;
	Ok(time.format_with_items(items.iter()).to_string())
}

fn parse_timestamp(timestamp: &Value) -> Result<DateTime<FixedOffset>, Error> {
	if let Some(text) = timestamp.as_str() {
		return DateTime::parse_from_rfc3339(text).map_err(|e| {
			Error::new(
				ErrorKind::InvalidOperation,
				format!("invalid timestamp `{text}`"),
			)
			.with_source(e)
		});
	}

	let invalid = || {
		Error::new(
			ErrorKind::InvalidOperation,
			format!("invalid timestamp `{timestamp}`"),
		)
	};
	let seconds = i64::try_from(timestamp.clone()).map_err(|_| invalid())?;

	DateTime::<Utc>::from_timestamp(seconds, 0)
		.map(Into::into)
		.ok_or_else(invalid)
}

/// The textual form of a render start time handed to templates.
pub(crate) fn timestamp_value(time: DateTime<Utc>) -> String {
	time.to_rfc3339_opts(SecondsFormat::Secs, true)
}
