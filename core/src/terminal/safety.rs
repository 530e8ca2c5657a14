//! Destructive-command denylist
//!
//! Checked before any spawn, for both run modes. Substring matching is
//! intentionally blunt: a blocked command is reported back to the model as
//! a failure and never reaches the shell.

/// Safety verdict for a command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSafety {
    Safe,
    Dangerous(String),
}

impl CommandSafety {
    pub fn is_dangerous(&self) -> bool {
        matches!(self, CommandSafety::Dangerous(_))
    }
}

/// Substrings that mark a command as destructive regardless of run mode.
const DENYLIST: [&str; 6] = [
    "rm -rf",
    "mkfs",
    "format",
    "del /f/s/q",
    ":(){:|:&};:",
    "> /dev/sda",
];

/// Assess one command line against the denylist, case-insensitively.
pub fn assess(command: &str) -> CommandSafety {
    let lower = command.to_lowercase();
    for pattern in DENYLIST {
        if lower.contains(pattern) {
            return CommandSafety::Dangerous(format!(
                "command matches destructive pattern: {}",
                pattern
            ));
        }
    }
    CommandSafety::Safe
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recursive_delete_is_blocked() {
        assert!(assess("rm -rf /tmp/build").is_dangerous());
        assert!(assess("RM -RF /").is_dangerous());
    }

    #[test]
    fn test_filesystem_format_is_blocked() {
        assert!(assess("mkfs.ext4 /dev/sdb1").is_dangerous());
        assert!(assess("echo y | format c:").is_dangerous());
    }

    #[test]
    fn test_fork_bomb_is_blocked() {
        assert!(assess(":(){:|:&};:").is_dangerous());
    }

    #[test]
    fn test_ordinary_commands_pass() {
        assert_eq!(assess("ls -la"), CommandSafety::Safe);
        assert_eq!(assess("cargo build --release"), CommandSafety::Safe);
        assert_eq!(assess("rm notes.txt"), CommandSafety::Safe);
    }
}
