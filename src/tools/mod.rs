//! Subprocess collaborators: shell commands and version control.

pub mod git;
pub mod shell;

pub use git::{GitCli, VersionControl};
pub use shell::{CommandOutput, CommandRunner, ShellRunner};
