//! ---
//! docfill_section: "03-update-engine"
//! docfill_subsection: "module"
//! docfill_type: "source"
//! docfill_scope: "code"
//! docfill_description: "Swap script generation and detached launch."
//! docfill_version: "v0.1.0"
//! docfill_owner: "tbd"
//! ---
//! The running process never replaces its own files. It writes a short script
//! that waits for it to exit, copies the staged payload over the application
//! directory, relaunches the executable and deletes itself. Once the script
//! has been launched the update can no longer be cancelled.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use tracing::info;

/// Default wait before the old process is killed.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Script file name on Unix-like systems.
pub const UNIX_SCRIPT_NAME: &str = "run_updater.sh";

/// Script file name on Windows.
pub const WINDOWS_SCRIPT_NAME: &str = "run_updater.bat";

/// Shell dialect of a swap script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptFlavor {
    /// POSIX `sh`.
    Posix,
    /// Windows `cmd.exe` batch file.
    Batch,
}

impl ScriptFlavor {
    /// Dialect of the platform we run on.
    #[must_use]
    pub fn native() -> Self {
        if cfg!(windows) {
            ScriptFlavor::Batch
        } else {
            ScriptFlavor::Posix
        }
    }

    /// File name used for scripts of this dialect.
    #[must_use]
    pub fn script_name(self) -> &'static str {
        match self {
            ScriptFlavor::Posix => UNIX_SCRIPT_NAME,
            ScriptFlavor::Batch => WINDOWS_SCRIPT_NAME,
        }
    }
}

/// What the swap script has to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapPlan {
    /// Installation directory receiving the payload.
    pub app_dir: PathBuf,
    /// Staged payload mirroring `app_dir`.
    pub staging_dir: PathBuf,
    /// Executable relaunched after the copy.
    pub executable: PathBuf,
    /// Process to wait for.
    pub pid: u32,
    /// Wait before force-killing `pid`.
    pub grace: Duration,
}

impl SwapPlan {
    /// Script text for `flavor`.
    #[must_use]
    pub fn render(&self, flavor: ScriptFlavor) -> String {
        match flavor {
            ScriptFlavor::Posix => self.render_posix(),
            ScriptFlavor::Batch => self.render_batch(),
        }
    }

    fn render_posix(&self) -> String {
        format!(
            r#"#!/bin/sh
# DocumentFiller update swap
PID={pid}
GRACE={grace}
APP_DIR={app_dir}
STAGING={staging}
EXE={exe}

waited=0
while kill -0 "$PID" 2>/dev/null; do
    if [ "$waited" -ge "$GRACE" ]; then
        kill -9 "$PID" 2>/dev/null
        sleep 1
        break
    fi
    sleep 1
    waited=$((waited + 1))
done

if cp -R "$STAGING/." "$APP_DIR/"; then
    rm -rf "$STAGING"
fi
chmod +x "$EXE" 2>/dev/null
nohup "$EXE" >/dev/null 2>&1 &
rm -f "$0"
"#,
            pid = self.pid,
            grace = self.grace.as_secs().max(1),
            app_dir = sh_quote(&self.app_dir),
            staging = sh_quote(&self.staging_dir),
            exe = sh_quote(&self.executable),
        )
    }

    fn render_batch(&self) -> String {
        let text = format!(
            r#"@echo off
rem DocumentFiller update swap
setlocal
set "PID={pid}"
set "GRACE={grace}"
set "APP_DIR={app_dir}"
set "STAGING={staging}"
set "EXE={exe}"
set /a WAITED=0

:wait
tasklist /FI "PID eq %PID%" 2>NUL | find "%PID%" >NUL
if errorlevel 1 goto swap
if %WAITED% GEQ %GRACE% (
    taskkill /F /PID %PID% >NUL 2>&1
    timeout /t 1 /nobreak >NUL
    goto swap
)
timeout /t 1 /nobreak >NUL
set /a WAITED+=1
goto wait

:swap
robocopy "%STAGING%" "%APP_DIR%" /E /R:3 /W:1 /NFL /NDL /NJH /NJS >NUL
if %ERRORLEVEL% GEQ 8 goto relaunch
rmdir /S /Q "%STAGING%"

:relaunch
start "" "%EXE%"
(goto) 2>NUL & del "%~f0"
"#,
            pid = self.pid,
            grace = self.grace.as_secs().max(1),
            app_dir = batch_escape(&self.app_dir),
            staging = batch_escape(&self.staging_dir),
            exe = batch_escape(&self.executable),
        );
        text.replace('\n', "\r\n")
    }

    /// Write the native script into `dir` and return its path.
    pub fn write_script(&self, dir: &Path) -> io::Result<PathBuf> {
        self.write_script_as(dir, ScriptFlavor::native())
    }

    /// Write a script of `flavor` into `dir` and return its path.
    pub fn write_script_as(&self, dir: &Path, flavor: ScriptFlavor) -> io::Result<PathBuf> {
        let path = dir.join(flavor.script_name());
        fs::write(&path, self.render(flavor))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        }
        Ok(path)
    }
}

fn sh_quote(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', r"'\''"))
}

fn batch_escape(path: &Path) -> String {
    path.display().to_string().replace('"', "").replace('%', "%%")
}

/// Starts a swap script so that it outlives the current process.
pub trait SwapLauncher: Send + Sync {
    /// Launch `script` and return without waiting for it.
    fn launch(&self, script: &Path) -> io::Result<()>;
}

/// Launches scripts in their own process group with no inherited stdio.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetachedLauncher;

impl SwapLauncher for DetachedLauncher {
    fn launch(&self, script: &Path) -> io::Result<()> {
        let mut command = detached_command(script);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let child = command.spawn()?;
        info!(script = %script.display(), pid = child.id(), "swap script launched");
        Ok(())
    }
}

#[cfg(unix)]
fn detached_command(script: &Path) -> Command {
    use std::os::unix::process::CommandExt;
    let mut command = Command::new("/bin/sh");
    command.arg(script).process_group(0);
    command
}

#[cfg(windows)]
fn detached_command(script: &Path) -> Command {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    let mut command = Command::new("cmd");
    command
        .arg("/C")
        .arg(script)
        .creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
    command
}

#[cfg(not(any(unix, windows)))]
fn detached_command(script: &Path) -> Command {
    Command::new(script)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> SwapPlan {
        SwapPlan {
            app_dir: PathBuf::from("/opt/Document Filler"),
            staging_dir: PathBuf::from("/opt/Document Filler/__update_tmp"),
            executable: PathBuf::from("/opt/Document Filler/DocumentFiller"),
            pid: 4242,
            grace: Duration::from_secs(5),
        }
    }

    #[test]
    fn posix_script_waits_copies_relaunches_and_self_deletes() {
        let script = plan().render(ScriptFlavor::Posix);
        assert!(script.starts_with("#!/bin/sh\n"));
        assert!(script.contains("PID=4242"));
        assert!(script.contains("GRACE=5"));
        assert!(script.contains("kill -0 \"$PID\""));
        assert!(script.contains("kill -9 \"$PID\""));
        assert!(script.contains("APP_DIR='/opt/Document Filler'"));
        assert!(script.contains("cp -R \"$STAGING/.\" \"$APP_DIR/\""));
        assert!(script.contains("nohup \"$EXE\""));
        assert!(script.trim_end().ends_with("rm -f \"$0\""));
        assert!(!script.contains("--delete"));
    }

    #[test]
    fn batch_script_never_mirrors() {
        let script = plan().render(ScriptFlavor::Batch);
        assert!(script.contains("taskkill /F /PID %PID%"));
        assert!(script.contains("robocopy \"%STAGING%\" \"%APP_DIR%\" /E"));
        assert!(!script.contains("/MIR"));
        assert!(script.contains("start \"\" \"%EXE%\""));
        assert!(script.contains("del \"%~f0\""));
        assert!(script.contains("\r\n"));
    }

    #[test]
    fn quoting_survives_awkward_paths() {
        let mut plan = plan();
        plan.app_dir = PathBuf::from("/srv/it's here");
        plan.staging_dir = PathBuf::from("C:\\100%\\stage");
        let posix = plan.render(ScriptFlavor::Posix);
        assert!(posix.contains(r"APP_DIR='/srv/it'\''s here'"));
        let batch = plan.render(ScriptFlavor::Batch);
        assert!(batch.contains(r#"set "STAGING=C:\100%%\stage""#));
    }

    #[test]
    fn written_script_uses_platform_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = plan().write_script(dir.path()).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            ScriptFlavor::native().script_name()
        );
        assert!(fs::read_to_string(&path).unwrap().contains("4242"));
    }
}
