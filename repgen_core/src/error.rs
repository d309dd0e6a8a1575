use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Diagnostic, Error)]
#[non_exhaustive]
pub enum RepgenError {
	#[error(transparent)]
	#[diagnostic(code(repgen::io_error))]
	Io(#[from] std::io::Error),

	#[error("template not found: `{0}`")]
	#[diagnostic(
		code(repgen::template_not_found),
		help("add `{0}.tpl` to one of the reference directories")
	)]
	TemplateNotFound(String),

	#[error("failed to read template `{path}`: {source}")]
	#[diagnostic(code(repgen::read_template))]
	ReadTemplate {
		path: String,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse template `{name}`: {source}")]
	#[diagnostic(code(repgen::template_parse))]
	Parse {
		name: String,
		#[source]
		source: minijinja::Error,
	},

	#[error("failed to render template `{name}`: {source}")]
	#[diagnostic(code(repgen::template_render))]
	Execution {
		name: String,
		#[source]
		source: minijinja::Error,
	},

	#[error("include depth limit of {limit} exceeded: {chain}")]
	#[diagnostic(
		code(repgen::recursion_limit),
		help("check for templates that include each other, or raise `max_include_depth`")
	)]
	RecursionLimitExceeded { limit: usize, chain: String },

	#[error("invalid metadata block in {origin}: {reason}")]
	#[diagnostic(
		code(repgen::attributes),
		help("the first line must start with `{{{{/*GT:` and the block must end with `*/ -}}}}`")
	)]
	Attributes { origin: String, reason: String },

	#[error("{count} template(s) had errors reading attributes")]
	#[diagnostic(
		code(repgen::attribute_scan),
		help("inspect the `error` field of each scanned template")
	)]
	AttributeScan { count: usize },

	#[error("failed to read template directory `{path}`: {reason}")]
	#[diagnostic(code(repgen::read_directory))]
	ReadDirectory { path: String, reason: String },

	#[error("failed to parse config file: {0}")]
	#[diagnostic(
		code(repgen::config_parse),
		help("check that repgen.toml is valid TOML with [templates] and/or [render] sections")
	)]
	ConfigParse(String),
}

pub type RepgenResult<T> = Result<T, RepgenError>;
pub type AnyError = Box<dyn std::error::Error>;
pub type AnyEmptyResult = Result<(), AnyError>;
pub type AnyResult<T> = Result<T, AnyError>;
