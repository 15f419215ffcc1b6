// Ghidra headless driver
use anyhow::{bail, Context, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

pub const SCRIPT_NAME: &str = "DumpFunctions.java";
const SCRIPT_SOURCE: &str = include_str!("../ghidra/DumpFunctions.java");
const PROJECT_NAME: &str = "recode";
const DUMP_FILE: &str = "functions.c";

/// Lines of Ghidra output kept in the error when it fails
const LOG_TAIL_LINES: usize = 20;

pub struct Ghidra {
    home: PathBuf,
    timeout: Duration,
}

impl Ghidra {
    pub fn new(home: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            home: home.into(),
            timeout,
        }
    }

    pub fn analyze_headless(&self) -> PathBuf {
        self.home.join("support").join("analyzeHeadless")
    }

    pub fn command_args(&self, work: &Path, binary: &Path, dump: &Path) -> Vec<OsString> {
        vec![
            work.join("project").into(),
            PROJECT_NAME.into(),
            "-import".into(),
            binary.into(),
            "-scriptPath".into(),
            work.join("scripts").into(),
            "-postScript".into(),
            SCRIPT_NAME.into(),
            dump.into(),
            "-deleteProject".into(),
        ]
    }

    /// Import `binary` into a throwaway project and decompile every function
    ///
    /// Returns the raw dump text. The child is killed if it outlives the timeout.
    #[instrument(skip(self, work), fields(binary = %binary.display()))]
    pub async fn dump_functions(&self, work: &Path, binary: &Path) -> Result<String> {
        let scripts = work.join("scripts");
        tokio::fs::create_dir_all(&scripts)
            .await
            .context("Failed to create script directory")?;
        tokio::fs::create_dir_all(work.join("project"))
            .await
            .context("Failed to create project directory")?;
        tokio::fs::write(scripts.join(SCRIPT_NAME), SCRIPT_SOURCE)
            .await
            .context("Failed to write Ghidra script")?;

        let dump = work.join(DUMP_FILE);
        let program = self.analyze_headless();
        info!(program = %program.display(), timeout_secs = self.timeout.as_secs(), "Running Ghidra headless analysis");

        let child = tokio::process::Command::new(&program)
            .args(self.command_args(work, binary, &dump))
            .current_dir(self.home.join("support"))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {}", program.display()))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output.context("Failed to wait for Ghidra")?,
            Err(_) => bail!("Ghidra did not finish within {:?}", self.timeout),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!(lines = stdout.lines().count(), "Ghidra finished");

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(status = %output.status, "Ghidra exited with an error");
            bail!(
                "Ghidra exited with {}: {}",
                output.status,
                tail(&format!("{}{}", stdout, stderr), LOG_TAIL_LINES)
            );
        }

        tokio::fs::read_to_string(&dump)
            .await
            .with_context(|| format!("Ghidra produced no output at {}", dump.display()))
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

/// Ghidra home whose `analyzeHeadless` is a shell script with the given body
#[cfg(all(test, unix))]
pub(crate) fn fake_ghidra(body: &str) -> tempfile::TempDir {
    use std::os::unix::fs::PermissionsExt;

    let home = tempfile::tempdir().unwrap();
    let support = home.path().join("support");
    std::fs::create_dir_all(&support).unwrap();
    let script = support.join("analyzeHeadless");
    std::fs::write(&script, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
    home
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line() {
        let ghidra = Ghidra::new("/opt/ghidra", Duration::from_secs(600));
        let args = ghidra.command_args(
            Path::new("/tmp/w"),
            Path::new("/tmp/w/prog.exe"),
            Path::new("/tmp/w/functions.c"),
        );
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();

        assert_eq!(ghidra.analyze_headless(), PathBuf::from("/opt/ghidra/support/analyzeHeadless"));
        assert_eq!(
            args,
            [
                "/tmp/w/project",
                "recode",
                "-import",
                "/tmp/w/prog.exe",
                "-scriptPath",
                "/tmp/w/scripts",
                "-postScript",
                "DumpFunctions.java",
                "/tmp/w/functions.c",
                "-deleteProject",
            ]
        );
    }

    #[test]
    fn test_tail_keeps_last_lines() {
        assert_eq!(tail("a\nb\nc\nd", 2), "c\nd");
        assert_eq!(tail("a", 5), "a");
    }

    #[test]
    fn test_script_is_bundled() {
        assert!(SCRIPT_SOURCE.contains("public class DumpFunctions extends GhidraScript"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reads_dump_written_by_script() {
        let home = fake_ghidra(
            r#"while [ $# -gt 0 ]; do
  if [ "$1" = "-postScript" ]; then out="$3"; fi
  shift
done
printf '// Function: main\nint main(void) {}\n\n' > "$out""#,
        );
        let work = tempfile::tempdir().unwrap();
        let ghidra = Ghidra::new(home.path(), Duration::from_secs(30));

        let dump = ghidra
            .dump_functions(work.path(), &work.path().join("prog.exe"))
            .await
            .unwrap();
        assert_eq!(dump, "// Function: main\nint main(void) {}\n\n");
        assert!(work.path().join("scripts").join(SCRIPT_NAME).exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_an_error() {
        let home = fake_ghidra("echo 'ERROR REPORT: import failed' >&2\nexit 3");
        let work = tempfile::tempdir().unwrap();
        let ghidra = Ghidra::new(home.path(), Duration::from_secs(30));

        let err = ghidra
            .dump_functions(work.path(), &work.path().join("prog.exe"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("import failed"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_ghidra_times_out() {
        let home = fake_ghidra("sleep 30");
        let work = tempfile::tempdir().unwrap();
        let ghidra = Ghidra::new(home.path(), Duration::from_millis(200));

        let err = ghidra
            .dump_functions(work.path(), &work.path().join("prog.exe"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Ghidra did not finish within 200ms");
    }
}
