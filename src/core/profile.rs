//! Line-level merges into shell profiles and apt source lists.
//!
//! Both files are configuration that gets touched on every build, so a line
//! is added only when no equivalent line is already present.

pub fn source_directive(env_file: &str) -> String {
    format!("source {}", env_file)
}

/// Merge `line` into `existing`. Returns `None` when the line is already there.
///
/// Lines are compared after trimming surrounding whitespace. Commented-out
/// copies do not count as present.
pub fn merge_line(existing: &str, line: &str) -> Option<String> {
    let wanted = line.trim();
    if existing.lines().any(|l| l.trim() == wanted) {
        return None;
    }

    let mut merged = String::with_capacity(existing.len() + wanted.len() + 1);
    merged.push_str(existing);
    if !existing.is_empty() && !existing.ends_with('\n') {
        merged.push('\n');
    }
    merged.push_str(wanted);
    merged.push('\n');
    Some(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_into_empty_file() {
        let merged = merge_line("", "source /app/.env").unwrap();
        assert_eq!(merged, "source /app/.env\n");
    }

    #[test]
    fn test_merge_keeps_existing_content() {
        let existing = "# ~/.bashrc\nexport PS1='$ '";
        let merged = merge_line(existing, "source /app/.env").unwrap();
        assert_eq!(merged, "# ~/.bashrc\nexport PS1='$ '\nsource /app/.env\n");
    }

    #[test]
    fn test_merge_is_idempotent() {
        let once = merge_line("alias ll='ls -l'\n", "source /app/.env").unwrap();
        assert!(merge_line(&once, "source /app/.env").is_none());
        assert_eq!(once.matches("source /app/.env").count(), 1);
    }

    #[test]
    fn test_merge_ignores_surrounding_whitespace() {
        assert!(merge_line("   source /app/.env  \n", "source /app/.env").is_none());
    }

    #[test]
    fn test_commented_directive_is_not_present() {
        let merged = merge_line("# source /app/.env\n", "source /app/.env").unwrap();
        assert_eq!(merged, "# source /app/.env\nsource /app/.env\n");
    }

    #[test]
    fn test_source_directive() {
        assert_eq!(source_directive("/app/.env"), "source /app/.env");
    }
}
