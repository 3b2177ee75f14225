use crate::error::{Error, Result};

/// Validate that a table name is safe for use in etcd key paths.
///
/// Table names are interpolated into keys, so a name like
/// `../assignments/other` must never reach the store.
pub fn validate_table_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 128 {
        return Err(Error::invalid_state(
            "table name must be 1-128 characters",
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::invalid_state(
            "table name contains invalid characters (only alphanumeric, dash, underscore allowed)",
        ));
    }
    Ok(())
}

pub fn now_seconds() -> i64 {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    i64::try_from(secs).unwrap_or(i64::MAX)
}
