//! `KEY=value` lines as found in `.env` files and shell profiles.

/// Key of a `KEY=value` / `export KEY=value` line; `None` for comments/blanks.
pub(crate) fn line_key(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    trimmed
        .split_once('=')
        .map(|(k, _)| k.trim())
        .filter(|k| !k.is_empty() && !k.contains(char::is_whitespace))
}

/// Every assignment in `content`, in file order, with surrounding quotes
/// stripped from the value.
pub(crate) fn assignments(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .filter_map(|line| {
            let key = line_key(line)?;
            let (_, value) = line.split_once('=')?;
            let value = value.trim().trim_matches('"').trim_matches('\'');
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}
