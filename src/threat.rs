//! Stateless screening of free-text input for injection patterns, plus HTML-entity sanitizing.
//!
//! The detectors are deliberately broad: they run before user input reaches the network and a
//! false positive only costs the user a rephrase.

// std
use std::sync::OnceLock;
// crates.io
use regex::RegexSet;
// self
use crate::_prelude::*;

const SQL_PATTERNS: &[&str] = &[
	r"(?i)\b(select\s[\s\S]*\bfrom|insert\s+into|update\s+\w+\s+set|delete\s+from)\b",
	r"(?i)\b(drop|alter|truncate|create)\s+(table|database|schema|index|view)\b",
	r"(?i)\bunion(\s+all)?\s+select\b",
	r"(?i)\b(exec|execute)(\s+|\()\w",
	r"--|/\*|\*/",
	r"(?i)'\s*(or|and)\s+'?\w+'?\s*(=|like)",
	r"'\s*;",
	r"\x00",
];
const XSS_PATTERNS: &[&str] = &[
	r"(?i)<\s*/?\s*script\b",
	r"(?i)javascript\s*:",
	r"(?i)\bon[a-z]+\s*=",
	r"(?i)<\s*(iframe|object|embed)\b",
];
const COMMAND_METACHARACTERS: &[char] = &[';', '&', '|', '`', '$', '(', ')', '{', '}', '[', ']'];

/// Category of injection pattern detected in an input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatKind {
	/// SQL keywords, comment markers, or quote/null-byte sequences.
	Sql,
	/// Script tags, `javascript:` URIs, inline handlers, or embedding tags.
	Xss,
	/// `../` or `..\` sequences.
	PathTraversal,
	/// Shell metacharacters.
	CommandInjection,
}
impl ThreatKind {
	/// Returns a stable label suitable for messages or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			ThreatKind::Sql => "sql",
			ThreatKind::Xss => "xss",
			ThreatKind::PathTraversal => "path_traversal",
			ThreatKind::CommandInjection => "command_injection",
		}
	}
}
impl Display for ThreatKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome of [`screen`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScreenVerdict {
	/// No detector fired.
	Clean,
	/// At least one detector fired; categories are listed in detection order.
	Threats(Vec<ThreatKind>),
}
impl ScreenVerdict {
	/// Returns `true` for [`ScreenVerdict::Clean`].
	pub fn is_clean(&self) -> bool {
		matches!(self, Self::Clean)
	}

	/// Converts the verdict into a [`Result`], mapping threats to [`Error::ThreatDetected`].
	pub fn into_result(self) -> Result<()> {
		match self {
			Self::Clean => Ok(()),
			Self::Threats(threats) => Err(Error::ThreatDetected { threats }),
		}
	}
}

/// Returns `true` if the input matches SQL keyword, comment, or quote/null-byte patterns.
pub fn has_sql_injection(input: &str) -> bool {
	static SET: OnceLock<RegexSet> = OnceLock::new();

	compiled_set(&SET, SQL_PATTERNS).is_match(input)
}

/// Returns `true` if the input contains script tags, `javascript:` URIs, inline event handlers,
/// or `iframe`/`object`/`embed` tags.
pub fn has_xss(input: &str) -> bool {
	static SET: OnceLock<RegexSet> = OnceLock::new();

	compiled_set(&SET, XSS_PATTERNS).is_match(input)
}

/// Returns `true` if the input contains `../` or `..\`.
pub fn has_path_traversal(input: &str) -> bool {
	input.contains("../") || input.contains("..\\")
}

/// Returns `true` if the input contains a shell metacharacter.
pub fn has_command_injection(input: &str) -> bool {
	input.contains(COMMAND_METACHARACTERS)
}

/// Returns `true` iff no detector fires.
pub fn is_secure(input: &str) -> bool {
	screen(input).is_clean()
}

/// Runs every detector and reports which categories fired.
pub fn screen(input: &str) -> ScreenVerdict {
	let threats = [
		(ThreatKind::Sql, has_sql_injection as fn(&str) -> bool),
		(ThreatKind::Xss, has_xss),
		(ThreatKind::PathTraversal, has_path_traversal),
		(ThreatKind::CommandInjection, has_command_injection),
	]
	.into_iter()
	.filter_map(|(kind, detect)| detect(input).then_some(kind))
	.collect::<Vec<_>>();

	if threats.is_empty() { ScreenVerdict::Clean } else { ScreenVerdict::Threats(threats) }
}

/// Returns the input unchanged when it is secure, or [`Error::ThreatDetected`].
pub fn ensure_secure(input: &str) -> Result<&str> {
	screen(input).into_result().map(|()| input)
}

/// Trims surrounding whitespace and HTML-entity-encodes `& < > " '` in a single pass.
///
/// Every `&` is encoded, including one that already starts an entity, so existing entities are
/// double-encoded. Repeated application only leaves text without any of the five characters
/// unchanged.
pub fn sanitize(input: &str) -> String {
	let trimmed = input.trim();
	let mut out = String::with_capacity(trimmed.len());

	for ch in trimmed.chars() {
		match ch {
			'&' => out.push_str("&amp;"),
			'<' => out.push_str("&lt;"),
			'>' => out.push_str("&gt;"),
			'"' => out.push_str("&quot;"),
			'\'' => out.push_str("&#x27;"),
			other => out.push(other),
		}
	}

	out
}

fn compiled_set<'a>(cell: &'a OnceLock<RegexSet>, patterns: &[&str]) -> &'a RegexSet {
	cell.get_or_init(|| RegexSet::new(patterns).expect("Threat patterns must compile."))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn sql_detector_flags_classic_payloads() {
		assert!(has_sql_injection("'; DROP TABLE users; --"));
		assert!(has_sql_injection("1 UNION SELECT password FROM users"));
		assert!(has_sql_injection("admin' OR '1'='1"));
		assert!(has_sql_injection("name\0"));
		assert!(!has_sql_injection("normal text"));
		assert!(!has_sql_injection("Please update the quarterly report"));
		assert!(has_sql_injection("drop table users"));
	}

	#[test]
	fn xss_detector_flags_scripts_and_handlers() {
		assert!(has_xss("<script>alert(1)</script>"));
		assert!(has_xss("<a href=\"javascript:alert(1)\">x</a>"));
		assert!(has_xss("<img src=x onerror=alert(1)>"));
		assert!(has_xss("<IFRAME src=\"//evil\">"));
		assert!(!has_xss("Price < 100"));
		assert!(!has_xss("The onboarding session"));
	}

	#[test]
	fn path_and_command_detectors() {
		assert!(has_path_traversal("../../etc/passwd"));
		assert!(has_path_traversal("..\\windows\\system32"));
		assert!(!has_path_traversal("report..final.pdf"));
		assert!(has_command_injection("file.txt; rm -rf /"));
		assert!(has_command_injection("$(whoami)"));
		assert!(has_command_injection("`id`"));
		assert!(!has_command_injection("quarterly report 2024.pdf"));
	}

	#[test]
	fn screen_lists_every_category() {
		assert_eq!(screen("hello world"), ScreenVerdict::Clean);
		assert!(is_secure("ana@example.com"));
		assert_eq!(
			screen("'; DROP TABLE users; --"),
			ScreenVerdict::Threats(vec![ThreatKind::Sql, ThreatKind::CommandInjection])
		);
		assert!(matches!(
			ensure_secure("<script>"),
			Err(Error::ThreatDetected { threats }) if threats == vec![ThreatKind::Xss]
		));
		assert_eq!(ensure_secure("plain").expect("Plain input should pass."), "plain");
	}

	#[test]
	fn sanitize_encodes_and_trims() {
		assert_eq!(
			sanitize("  <b>\"Tom\" & 'Jerry'</b>  "),
			"&lt;b&gt;&quot;Tom&quot; &amp; &#x27;Jerry&#x27;&lt;/b&gt;"
		);
		assert_eq!(sanitize("plain"), "plain");
	}

	#[test]
	fn existing_entities_are_encoded_again() {
		assert_eq!(sanitize("AT&amp;T"), "AT&amp;amp;T");
		assert_eq!(sanitize("&lt;b&gt;"), "&amp;lt;b&amp;gt;");
		assert_ne!(sanitize("&lt;"), sanitize("<"));
	}

	#[test]
	fn sanitize_is_idempotent_for_entity_free_text() {
		for input in ["  plain text ", "user@example.com", "Price 100 EUR"] {
			let once = sanitize(input);

			assert_eq!(sanitize(&once), once, "Sanitizing twice changed {input:?}.");
		}

		assert_eq!(sanitize(&sanitize("a & b")), "a &amp;amp; b");
	}
}
