//! Dump collection and process termination seams.

use std::path::Path;
use std::process::Command;

use tracing::info;

use super::HangDumpError;

/// Produces a memory dump of a process.
pub trait DumpCollector: Send + Sync {
    fn collect(&self, process_id: u32, path: &Path) -> Result<(), HangDumpError>;
}

/// Ends a process that was found hung.
pub trait ProcessTerminator: Send + Sync {
    fn terminate(&self, process_id: u32) -> Result<(), HangDumpError>;
}

/// Placeholder for the process id in dump command arguments.
pub const PID_PLACEHOLDER: &str = "{pid}";
/// Placeholder for the dump path in dump command arguments.
pub const PATH_PLACEHOLDER: &str = "{path}";

/// Collects dumps by running an external tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDumpCollector {
    program: String,
    args: Vec<String>,
}

impl CommandDumpCollector {
    /// `args` may contain [`PID_PLACEHOLDER`] and [`PATH_PLACEHOLDER`].
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `procdump` on Windows, `gcore` elsewhere.
    pub fn platform_default() -> Self {
        if cfg!(windows) {
            Self::new("procdump", vec!["-accepteula".into(), "-ma".into(), "{pid}".into(), "{path}".into()])
        } else {
            Self::new("gcore", vec!["-o".into(), "{path}".into(), "{pid}".into()])
        }
    }

    fn command(&self, process_id: u32, path: &Path) -> Command {
        let pid = process_id.to_string();
        let path = path.display().to_string();
        let mut command = Command::new(&self.program);
        command.args(
            self.args
                .iter()
                .map(|arg| arg.replace(PID_PLACEHOLDER, &pid).replace(PATH_PLACEHOLDER, &path)),
        );
        command
    }
}

impl DumpCollector for CommandDumpCollector {
    fn collect(&self, process_id: u32, path: &Path) -> Result<(), HangDumpError> {
        info!(process_id, path = %path.display(), tool = %self.program, "collecting hang dump");
        run(self.command(process_id, path)).map_err(HangDumpError::Dump)
    }
}

/// Kills processes with the operating system's own tool.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessTerminator;

impl ProcessTerminator for SystemProcessTerminator {
    fn terminate(&self, process_id: u32) -> Result<(), HangDumpError> {
        let pid = process_id.to_string();
        let command = if cfg!(windows) {
            let mut command = Command::new("taskkill");
            command.args(["/F", "/T", "/PID", &pid]);
            command
        } else {
            let mut command = Command::new("kill");
            command.args(["-KILL", &pid]);
            command
        };
        run(command).map_err(|reason| HangDumpError::Terminate { process_id, reason })
    }
}

fn run(mut command: Command) -> Result<(), String> {
    let program = command.get_program().to_string_lossy().into_owned();
    let output = command.output().map_err(|e| format!("could not run {}: {}", program, e))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_are_substituted() {
        let collector = CommandDumpCollector::new("dumper", vec!["--pid={pid}".into(), "{path}".into()]);
        let command = collector.command(42, Path::new("/tmp/hang_42.dmp"));
        let args: Vec<_> = command.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["--pid=42", "/tmp/hang_42.dmp"]);
        assert_eq!(command.get_program(), "dumper");
    }

    #[test]
    fn test_missing_tool_is_a_dump_error() {
        let collector = CommandDumpCollector::new("testhost-no-such-dump-tool", Vec::new());
        let err = collector.collect(1, Path::new("x.dmp")).unwrap_err();
        assert!(matches!(err, HangDumpError::Dump(message) if message.contains("testhost-no-such-dump-tool")));
    }
}
