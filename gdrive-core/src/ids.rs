const ALIASES: &[&str] = &["root", "appDataFolder", "photos"];

/// Checks that `id` looks like a Drive item id (or one of the well-known aliases)
/// before it is interpolated into a listing query.
pub fn validate_folder_id(id: &str) -> bool {
    if ALIASES.contains(&id) {
        return true;
    }
    (10..=100).contains(&id.len())
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_aliases_and_drive_ids() {
        assert!(validate_folder_id("root"));
        assert!(validate_folder_id("1AbC-def_ghIJKLmnop"));
    }

    #[test]
    fn rejects_short_or_quoted_ids() {
        assert!(!validate_folder_id(""));
        assert!(!validate_folder_id("short"));
        assert!(!validate_folder_id("abcdefghij' or 'x"));
    }
}
