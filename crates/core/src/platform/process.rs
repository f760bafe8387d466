use std::collections::HashMap;
use std::path::Path;
use std::process::{Child, Command as ProcessCommand, Stdio};

use sysinfo::{Pid, System};

use crate::error::ExecutionError;
use crate::logger;
use super::ProcessControl;

/// True when process name `actual` matches the requested `name`, ignoring
/// case and a trailing `.exe` on either side.
pub fn name_matches(actual: &str, name: &str) -> bool {
    fn strip(s: &str) -> &str {
        let n = s.len();
        match s.get(n.saturating_sub(4)..) {
            Some(ext) if n > 4 && ext.eq_ignore_ascii_case(".exe") => &s[..n - 4],
            _ => s,
        }
    }
    strip(actual).eq_ignore_ascii_case(strip(name.trim()))
}

/// Native process control: `std::process` for spawning, `sysinfo` for lookup and kill.
#[derive(Default)]
pub struct SystemProcesses {
    children: HashMap<u32, Child>,
}

impl SystemProcesses {
    pub fn new() -> Self {
        Self::default()
    }

    fn reap(&mut self) {
        self.children.retain(|_, c| matches!(c.try_wait(), Ok(None)));
    }
}

impl ProcessControl for SystemProcesses {
    fn spawn(&mut self, path: &Path) -> Result<u32, ExecutionError> {
        self.reap();
        let child = ProcessCommand::new(path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| ExecutionError::Spawn { path: path.to_path_buf(), source })?;
        let pid = child.id();
        self.children.insert(pid, child);
        Ok(pid)
    }

    fn kill(&mut self, pid: u32) -> Result<(), ExecutionError> {
        if let Some(mut child) = self.children.remove(&pid) {
            child
                .kill()
                .map_err(|e| ExecutionError::Backend(format!("kill {}: {}", pid, e)))?;
            child.wait().ok();
            return Ok(());
        }

        let mut sys = System::new_all();
        sys.refresh_all();
        match sys.process(Pid::from_u32(pid)) {
            Some(p) if p.kill() => Ok(()),
            Some(_) => Err(ExecutionError::Backend(format!("kill {} refused", pid))),
            None => Err(ExecutionError::ProcessNotFound(pid.to_string())),
        }
    }

    fn kill_by_name(&mut self, name: &str) -> Result<usize, ExecutionError> {
        let mut sys = System::new_all();
        sys.refresh_all();

        let mut matched = 0;
        let mut killed = 0;
        for (pid, p) in sys.processes() {
            if !name_matches(&p.name().to_string_lossy(), name) {
                continue;
            }
            matched += 1;
            if p.kill() {
                killed += 1;
                self.children.remove(&pid.as_u32());
            } else {
                logger::warn_p("native", &format!("could not kill {} (pid {})", name, pid));
            }
        }

        match (matched, killed) {
            (0, _) => Err(ExecutionError::ProcessNotFound(name.to_string())),
            (_, 0) => Err(ExecutionError::Backend(format!("permission denied killing '{}'", name))),
            (_, n) => Ok(n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_matches() {
        assert!(name_matches("notepad.exe", "notepad.exe"));
        assert!(name_matches("notepad.exe", "Notepad"));
        assert!(name_matches("firefox", "firefox.exe"));
        assert!(!name_matches("firefox-bin", "firefox"));
        assert!(!name_matches(".exe", "x"));
    }
}
