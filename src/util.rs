//! Shared helpers: secret handling, API key cleanup and summary formatting.

use std::fmt;
use std::time::Duration;

/// A string wrapper that masks its contents in Debug/Display output.
/// Keeps API keys out of logs and persisted run records.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(s: String) -> Self {
        Self(s)
    }

    /// Access the raw secret value (for headers, URLs, etc.)
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "***")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "***")
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl PartialEq<&str> for SecretString {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Clean up an API key pasted into a `.env` file or shell profile.
///
/// Handles `export NAME=value`, `NAME=value`, surrounding quotes, `$(...)`
/// wrappers and trailing `;`/`)` noise. When an OpenAI style `sk-` fragment is
/// present it is extracted directly.
pub fn clean_api_key(raw: &str) -> String {
    let key = raw.trim();

    if let Some(start) = key.find("sk-") {
        let tail = &key[start..];
        let end = tail
            .find(|c: char| matches!(c, '\n' | '\r' | '"' | '\'' | ')' | ';' | ' ' | '\t'))
            .unwrap_or(tail.len());
        let candidate = tail[..end].trim();
        if candidate.len() >= 10 {
            return candidate.to_string();
        }
    }

    let mut key = key.to_string();

    if key.to_lowercase().starts_with("export ") {
        key = key["export ".len()..].trim().to_string();
    }

    if let Some((name, value)) = key.split_once('=') {
        let name = name.trim().to_uppercase();
        if name.ends_with("KEY") || name == "ROUTER" {
            key = value.trim().to_string();
        }
    }

    if key.len() >= 2
        && ((key.starts_with('"') && key.ends_with('"'))
            || (key.starts_with('\'') && key.ends_with('\'')))
    {
        key = key[1..key.len() - 1].trim().to_string();
    }

    if key.starts_with("$(") && key.ends_with(')') {
        key = key[2..key.len() - 1].trim().to_string();
    }

    key.trim()
        .trim_matches(|c| matches!(c, ';' | ')' | '"' | '\''))
        .to_string()
}

/// Human readable duration: `850ms`, `12.3s`, `2m 05s`, `1h 02m 03s`.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs_f64();
    if total < 1.0 {
        return format!("{}ms", duration.as_millis());
    }
    if total < 60.0 {
        return format!("{:.1}s", total);
    }
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else {
        format!("{}m {:02}s", m, s)
    }
}

/// Format an integer with `,` thousands separators.
pub fn format_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Make a string safe to use as a single path component.
pub fn path_component(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}
