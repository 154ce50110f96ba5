//! The `Match Group` block injected into the SSH daemon configuration.

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// First line of the managed block.
pub const SSHD_BLOCK_BEGIN: &str = "# BEGIN hostcore jail (managed, do not edit)";

/// Last line of the managed block.
pub const SSHD_BLOCK_END: &str = "# END hostcore jail";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Renders the managed block for `group`.
pub fn render_sshd_block(group: &str) -> String {
    let lines = [
        SSHD_BLOCK_BEGIN.to_string(),
        format!("Match Group {group}"),
        "    ChrootDirectory %h".to_string(),
        "    ForceCommand internal-sftp -d /www".to_string(),
        "    AllowTcpForwarding no".to_string(),
        "    X11Forwarding no".to_string(),
        "    PermitTunnel no".to_string(),
        "    AllowAgentForwarding no".to_string(),
        SSHD_BLOCK_END.to_string(),
    ];

    let mut block = lines.join("\n");
    block.push('\n');
    block
}

/// Returns the byte range of the managed block in `content`, end marker line included.
fn find_block(content: &str) -> Option<(usize, usize)> {
    let start = content.find(SSHD_BLOCK_BEGIN)?;
    let end_marker = start + content[start..].find(SSHD_BLOCK_END)?;
    let mut end = end_marker + SSHD_BLOCK_END.len();
    if content[end..].starts_with('\n') {
        end += 1;
    }

    Some((start, end))
}

/// Returns true if `content` already carries the managed block.
pub fn has_sshd_block(content: &str) -> bool {
    find_block(content).is_some()
}

/// Returns the configuration with the managed block for `group` in place, or `None` if it is
/// already exactly right.
///
/// A block for a different group is replaced where it stands. A missing block is appended at the
/// end, after every global option, as `Match` sections must be.
pub fn apply_sshd_block(content: &str, group: &str) -> Option<String> {
    let block = render_sshd_block(group);

    if let Some((start, end)) = find_block(content) {
        if content[start..end] == block {
            return None;
        }

        let mut updated = String::with_capacity(content.len() + block.len());
        updated.push_str(&content[..start]);
        updated.push_str(&block);
        updated.push_str(&content[end..]);
        return Some(updated);
    }

    let mut updated = content.to_string();
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    if !updated.is_empty() {
        updated.push('\n');
    }
    updated.push_str(&block);
    Some(updated)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "Port 22\nSubsystem sftp internal-sftp\nUsePAM yes";

    #[test]
    fn test_append_once() {
        let updated = apply_sshd_block(BASE, "hostcore-jail").unwrap();
        assert!(updated.starts_with("Port 22\n"));
        assert!(updated.contains("\n\n# BEGIN hostcore jail"));
        assert!(updated.contains("Match Group hostcore-jail\n"));
        assert!(updated.contains("ForceCommand internal-sftp -d /www"));
        assert!(updated.ends_with("# END hostcore jail\n"));

        assert_eq!(apply_sshd_block(&updated, "hostcore-jail"), None);
        assert_eq!(updated.matches(SSHD_BLOCK_BEGIN).count(), 1);
    }

    #[test]
    fn test_block_for_other_group_is_replaced_in_place() {
        let with_old = apply_sshd_block(BASE, "old-jail").unwrap();
        let with_trailer = format!("{with_old}# trailing comment\n");

        let updated = apply_sshd_block(&with_trailer, "hostcore-jail").unwrap();
        assert!(!updated.contains("Match Group old-jail"));
        assert!(updated.contains("Match Group hostcore-jail"));
        assert!(updated.ends_with("# END hostcore jail\n# trailing comment\n"));
        assert_eq!(updated.matches(SSHD_BLOCK_BEGIN).count(), 1);
    }

    #[test]
    fn test_empty_config() {
        let updated = apply_sshd_block("", "hostcore-jail").unwrap();
        assert!(updated.starts_with(SSHD_BLOCK_BEGIN));
        assert!(has_sshd_block(&updated));
        assert!(!has_sshd_block(BASE));
    }
}
