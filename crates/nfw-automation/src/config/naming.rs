//! Deterministic, stack-scoped resource names.

use crate::error::ConfigError;

/// Longest name the remote service accepts.
pub const MAX_NAME_LENGTH: usize = 128;
const DELIMITER: char = '-';

/// Appends the last `-` segment of `stack_id` to `base`.
///
/// The result is at most [`MAX_NAME_LENGTH`] characters. When it would be
/// longer, `base` is truncated and the suffix is kept intact.
pub fn unique_name(base: &str, stack_id: &str) -> Result<String, ConfigError> {
    if stack_id.is_empty() {
        return Err(ConfigError::MissingStackId);
    }
    let suffix = stack_id.rsplit(DELIMITER).next().unwrap_or(stack_id);
    let suffix_len = suffix.chars().count() + 1;
    if suffix_len >= MAX_NAME_LENGTH {
        return Err(ConfigError::StackIdTooLong(suffix.to_string()));
    }

    let base_len = base.chars().count();
    let name = if base_len + suffix_len > MAX_NAME_LENGTH {
        let keep = MAX_NAME_LENGTH - suffix_len;
        log::info!(
            "Modified name is larger than {} characters, using only the first {} characters of '{}'",
            MAX_NAME_LENGTH,
            keep,
            base
        );
        let trimmed: String = base.chars().take(keep).collect();
        format!("{}{}{}", trimmed, DELIMITER, suffix)
    } else {
        format!("{}{}{}", base, DELIMITER, suffix)
    };

    log::debug!("Unique name for '{}': {}", base, name);
    Ok(name)
}
