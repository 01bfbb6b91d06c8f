//! Module docblock parsing.
//!
//! Every module source starts with a `/* ... */` comment whose body is TOML:
//!
//! ```text
//! /**
//!  * name = "Glow"
//!  * category = "Light"
//!  * imports = ["ModuleBase", "SDK"]
//!  */
//! (module ...)
//! ```
//!
//! Leading `*` decoration on each line is stripped before parsing.

use serde::Deserialize;

use crate::error::SandboxError;

/// Parsed module header.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Docblock {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    /// Requested imports, checked against the allow-list.
    pub imports: Vec<String>,
}

/// Split `source` into its docblock and the remaining body.
pub fn parse(source: &str) -> Result<(Docblock, &str), SandboxError> {
    let trimmed = source.trim_start();
    let Some(after_open) = trimmed.strip_prefix("/*") else {
        return Err(SandboxError::InvalidDocblock(
            "source must start with a /* ... */ header".into(),
        ));
    };
    let Some(close) = after_open.find("*/") else {
        return Err(SandboxError::InvalidDocblock("unterminated header".into()));
    };

    let raw = &after_open[..close];
    let body = &after_open[close + 2..];

    let toml_text = raw
        .lines()
        .map(strip_decoration)
        .collect::<Vec<_>>()
        .join("\n");

    let docblock: Docblock = toml::from_str(&toml_text)?;
    Ok((docblock, body))
}

fn strip_decoration(line: &str) -> &str {
    let line = line.trim_start();
    match line.strip_prefix('*') {
        Some(rest) => rest.strip_prefix(' ').unwrap_or(rest),
        None => line,
    }
}
