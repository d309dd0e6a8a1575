//! `repgen_core` is a small report generation layer on top of
//! [`minijinja`](https://docs.rs/minijinja). Reports are templates looked up by
//! name in an ordered list of reference directories, rendered against a dot
//! value, and fed rows on demand by a pluggable [`DataSource`].
//!
//! ## Processing Pipeline
//!
//! ```text
//! Generator::render_from_name
//!   → find_template (first `<dir>/<name>.tpl` across the reference directories)
//!   → read the file
//!   → strip the leading metadata block, render with minijinja
//!       ↳ row / rows / data   → DataSource
//!       ↳ include / evalTemplate → nested render into the same output
//!       ↳ return              → value handed back to the including call
//! ```
//!
//! ## Modules
//!
//! - [`attributes`]: JSON metadata embedded in a template's leading
//!   `{{/*GT: ... */ -}}` comment, read without rendering, per file or for a
//!   whole directory.
//! - [`config`]: `repgen.toml` discovery and the [`RenderOptions`] derived
//!   from it.
//! - [`data`]: the [`DataSource`] capability and the [`EmptySource`] and
//!   [`MemorySource`] implementations.
//! - [`resolver`]: template lookup across reference directories.
//!
//! ## Template Functions
//!
//! | function                   | result                                                      |
//! | -------------------------- | ----------------------------------------------------------- |
//! | `row(query, params...)`    | exactly one record, or an error                             |
//! | `rows(query, params...)`   | a list of records                                           |
//! | `data(args...)`            | whatever the source's `data` capability returns             |
//! | `include(name, dot?)`      | renders `name` in place, returns its `return` value or `""` |
//! | `evalTemplate(text, dot?)` | same as `include` for literal template text                 |
//! | `return(value)`            | publishes `value` to the including call, renders nothing    |
//! | `evenodd(n, a, b)`         | `a` when `n` is even, else `b`                              |
//! | `formatTime(layout, t)`    | `t` formatted with a strftime layout                        |
//! | `reportStartTime()`        | the top-level render's start time (RFC 3339)                |
//! | `mkmap(k, v, ...)`         | a map from alternating keys and values                      |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use repgen_core::EmptySource;
//! use repgen_core::Generator;
//! use repgen_core::RenderMode;
//! use repgen_core::RenderOptions;
//! use repgen_core::RepgenConfig;
//!
//! let root = Path::new(".");
//! let config = RepgenConfig::load(root).unwrap();
//! let options = RenderOptions::from_config(root, config.as_ref());
//! let reference_dirs = options.reference_dirs.clone();
//!
//! let generator = Generator::new(
//! 	"org.example.monthly",
//! 	RenderMode::Text,
//! 	std::io::stdout(),
//! 	Arc::new(EmptySource),
//! )
//! .with_options(options);
//!
//! generator
//! 	.render_from_name("org.example.monthly", &reference_dirs, "2024-05")
//! 	.unwrap();
//! ```

pub use attributes::AttributeScan;
pub use attributes::TemplateAttributes;
pub use config::*;
pub use data::*;
pub use error::*;
pub use generator::*;
pub use helpers::*;
pub use resolver::*;

pub mod attributes;
pub mod config;
pub mod data;
#[allow(unused_assignments)]
mod error;
mod generator;
mod helpers;
pub mod resolver;

#[cfg(test)]
mod __fixtures;
