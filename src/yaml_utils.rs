//! Cleanup of iRacing's session YAML before parsing.
//!
//! iRacing emits YAML that strict parsers reject: control characters inside
//! values, and unquoted free-text fields (driver and team names) containing
//! `:`, `#`, quotes, or a leading comma. The fixes here are textual and do
//! not parse the document.

use crate::{Result, TelemetryError};

/// Keys whose values are free text typed by users or livery tools.
const FREE_TEXT_KEYS: &[&str] =
    &["AbbrevName:", "TeamName:", "UserName:", "Initials:", "DriverSetupName:", "CarDesignStr:"];

/// Strip control characters (keeping `\n`, `\r`, `\t`) and single-quote the
/// values of free-text keys.
pub fn preprocess_iracing_yaml(yaml: &str) -> Result<String> {
    let cleaned: String =
        yaml.chars().filter(|&ch| !ch.is_control() || matches!(ch, '\n' | '\r' | '\t')).collect();

    if cleaned.trim().is_empty() {
        return Err(TelemetryError::parse_error("YAML preprocessing", "YAML is empty after preprocessing"));
    }

    let lines: Vec<String> = cleaned.lines().map(quote_free_text).collect();
    Ok(lines.join("\n"))
}

fn quote_free_text(line: &str) -> String {
    for &key in FREE_TEXT_KEYS {
        let Some(key_pos) = line.find(key) else {
            continue;
        };
        let after_key = key_pos + key.len();
        let Some(offset) = line[after_key..].find(|c: char| !c.is_whitespace()) else {
            return line.to_string();
        };
        let value_start = after_key + offset;
        let value = line[value_start..].trim_end();
        if value.starts_with('\'') || value.starts_with('"') {
            return line.to_string();
        }
        return format!("{}'{}'", &line[..value_start], value.replace('\'', "''"));
    }
    line.to_string()
}
