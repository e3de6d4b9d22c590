//! External image tools
//!
//! Encoding, pixel comparison and image inspection are all delegated to
//! command-line tools (ImageMagick's `magick` and libwebp's `cwebp`). This
//! module owns the process plumbing: every invocation runs under a timeout,
//! both pipes are drained while the child runs, and the child is always
//! reaped, including when it has to be killed.
//!
//! The rest of the crate talks to the tools only through [`ImageTools`], so
//! tests can substitute an in-memory implementation.

use crate::error::ToolError;
use crate::variant::{Codec, QualitySetting};
use std::ffi::OsString;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long output collection may take once the child is gone
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// The four operations the pipeline needs from the outside world
pub trait ImageTools: Send + Sync {
    /// Encode `input` into `output` with the given codec and setting.
    fn encode(
        &self,
        codec: Codec,
        input: &Path,
        setting: QualitySetting,
        output: &Path,
    ) -> Result<(), ToolError>;

    /// Write a visual difference image of `candidate` against `original`.
    fn diff(
        &self,
        original: &Path,
        candidate: &Path,
        fuzz_percent: f64,
        output: &Path,
    ) -> Result<(), ToolError>;

    /// Run one metric comparison and return the tool's raw textual output.
    fn compare(
        &self,
        original: &Path,
        candidate: &Path,
        metric: &str,
        verbose: bool,
    ) -> Result<String, ToolError>;

    /// Return static attributes of an image as a JSON object string.
    fn identify(&self, path: &Path) -> Result<String, ToolError>;
}

/// Captured result of a finished process
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn code(&self) -> Option<i32> {
        self.status.code()
    }
}

/// Runs commands with a bounded wait
#[derive(Debug, Clone)]
pub struct ToolRunner {
    timeout: Duration,
}

impl Default for ToolRunner {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl ToolRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run `program` to completion. A process still running after the
    /// timeout is killed, together with anything it spawned, and reported
    /// as [`ToolError::TimedOut`].
    pub fn run(&self, program: &str, args: &[OsString]) -> Result<ToolOutput, ToolError> {
        debug!(program, ?args, "spawning");

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|source| ToolError::Spawn {
            program: program.to_string(),
            source,
        })?;

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let started = Instant::now();
        let waited = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Ok(status),
                Ok(None) if started.elapsed() >= self.timeout => {
                    terminate(&mut child);
                    break Err(ToolError::TimedOut {
                        program: program.to_string(),
                        timeout: self.timeout,
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(source) => {
                    terminate(&mut child);
                    break Err(ToolError::Io {
                        program: program.to_string(),
                        source,
                    });
                }
            }
        };

        // A grandchild may still hold the pipes open; don't wait on it.
        let deadline = Instant::now() + DRAIN_GRACE;
        let stdout = collect(stdout, deadline);
        let stderr = collect(stderr, deadline);

        waited.map(|status| ToolOutput {
            status,
            stdout,
            stderr,
        })
    }
}

/// Kill the child's whole process group, then reap the child.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        let killed = Command::new("kill")
            .args(["-KILL", "--", group.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(e) = killed {
            debug!("could not signal process group {}: {}", group, e);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(chunk[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    });
    rx
}

/// Whatever a reader delivered before the pipe closed or `deadline` passed
fn collect(rx: Option<Receiver<Vec<u8>>>, deadline: Instant) -> String {
    let mut buf = Vec::new();
    if let Some(rx) = rx {
        while let Ok(chunk) = rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            buf.extend_from_slice(&chunk);
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

// ============================================================================
// ImageMagick / cwebp
// ============================================================================

/// Format string handed to `magick identify`; yields one JSON object.
pub const IDENTIFY_FORMAT: &str =
    r#"{"width": %w, "height": %h, "depth": %z, "colorspace": "%[colorspace]", "format": "%m"}"#;

/// Production [`ImageTools`] backed by `magick` and `cwebp`
#[derive(Debug, Clone)]
pub struct MagickTools {
    runner: ToolRunner,
    magick: String,
    cwebp: String,
}

impl Default for MagickTools {
    fn default() -> Self {
        Self::new(ToolRunner::default())
    }
}

impl MagickTools {
    pub fn new(runner: ToolRunner) -> Self {
        Self {
            runner,
            magick: "magick".to_string(),
            cwebp: "cwebp".to_string(),
        }
    }

    pub fn with_magick(mut self, program: impl Into<String>) -> Self {
        self.magick = program.into();
        self
    }

    pub fn with_cwebp(mut self, program: impl Into<String>) -> Self {
        self.cwebp = program.into();
        self
    }

    fn encoder_program(&self, codec: Codec) -> &str {
        match codec {
            Codec::Webp => &self.cwebp,
            Codec::Jpeg => &self.magick,
        }
    }
}

/// `magick compare` exits 0 for identical and 1 for dissimilar images;
/// anything else is an error.
fn compared_ok(output: &ToolOutput) -> bool {
    matches!(output.code(), Some(0) | Some(1))
}

fn failed(program: &str, output: &ToolOutput) -> ToolError {
    ToolError::Failed {
        program: program.to_string(),
        status: output.status.to_string(),
        stderr: output.stderr.trim().to_string(),
    }
}

/// Arguments for encoding `input` to `output`.
pub fn build_encode_args(
    codec: Codec,
    input: &Path,
    setting: QualitySetting,
    output: &Path,
) -> Vec<OsString> {
    let params = codec.encoder_params(setting).into_iter().map(OsString::from);
    match codec {
        Codec::Webp => {
            let mut args: Vec<OsString> = params.collect();
            args.push(input.into());
            args.push("-o".into());
            args.push(output.into());
            args
        }
        Codec::Jpeg => {
            let mut args: Vec<OsString> = vec![input.into()];
            args.extend(params);
            args.push(output.into());
            args
        }
    }
}

/// Arguments for `magick compare` producing a difference image.
pub fn build_diff_args(
    original: &Path,
    candidate: &Path,
    fuzz_percent: f64,
    output: &Path,
) -> Vec<OsString> {
    vec![
        "compare".into(),
        "-metric".into(),
        "AE".into(),
        "-fuzz".into(),
        format!("{fuzz_percent}%").into(),
        original.into(),
        candidate.into(),
        "-compose".into(),
        "src".into(),
        output.into(),
    ]
}

/// Arguments for `magick compare` computing a single metric.
pub fn build_compare_args(
    original: &Path,
    candidate: &Path,
    metric: &str,
    verbose: bool,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["compare".into()];
    if verbose {
        args.push("-verbose".into());
    }
    args.push("-metric".into());
    args.push(metric.into());
    args.push(original.into());
    args.push(candidate.into());
    args.push("null:".into());
    args
}

pub fn build_identify_args(path: &Path) -> Vec<OsString> {
    vec![
        "identify".into(),
        "-format".into(),
        IDENTIFY_FORMAT.into(),
        path.into(),
    ]
}

impl ImageTools for MagickTools {
    fn encode(
        &self,
        codec: Codec,
        input: &Path,
        setting: QualitySetting,
        output: &Path,
    ) -> Result<(), ToolError> {
        let program = self.encoder_program(codec);
        let result = self
            .runner
            .run(program, &build_encode_args(codec, input, setting, output))?;
        if result.status.success() {
            Ok(())
        } else {
            Err(failed(program, &result))
        }
    }

    fn diff(
        &self,
        original: &Path,
        candidate: &Path,
        fuzz_percent: f64,
        output: &Path,
    ) -> Result<(), ToolError> {
        let result = self.runner.run(
            &self.magick,
            &build_diff_args(original, candidate, fuzz_percent, output),
        )?;
        if compared_ok(&result) && output.exists() {
            Ok(())
        } else {
            Err(failed(&self.magick, &result))
        }
    }

    fn compare(
        &self,
        original: &Path,
        candidate: &Path,
        metric: &str,
        verbose: bool,
    ) -> Result<String, ToolError> {
        let result = self.runner.run(
            &self.magick,
            &build_compare_args(original, candidate, metric, verbose),
        )?;
        if compared_ok(&result) {
            // compare reports distortion on stderr
            Ok(result.stderr)
        } else {
            Err(failed(&self.magick, &result))
        }
    }

    fn identify(&self, path: &Path) -> Result<String, ToolError> {
        let result = self.runner.run(&self.magick, &build_identify_args(path))?;
        if result.status.success() {
            Ok(result.stdout.trim().to_string())
        } else {
            Err(failed(&self.magick, &result))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    // ==========================================================================
    // ARGUMENT BUILDING
    // ==========================================================================

    #[test]
    fn test_webp_lossy_args() {
        let args = build_encode_args(
            Codec::Webp,
            Path::new("in.png"),
            QualitySetting::Lossy(50),
            Path::new("out.webp"),
        );
        assert_eq!(strings(&args), ["-q", "50", "in.png", "-o", "out.webp"]);
    }

    #[test]
    fn test_webp_lossless_args() {
        let args = build_encode_args(
            Codec::Webp,
            Path::new("in.png"),
            QualitySetting::Lossless,
            Path::new("out.webp"),
        );
        assert_eq!(strings(&args), ["-lossless", "in.png", "-o", "out.webp"]);
    }

    #[test]
    fn test_jpeg_args_put_input_first() {
        let args = build_encode_args(
            Codec::Jpeg,
            Path::new("in.png"),
            QualitySetting::Lossy(75),
            Path::new("out.jpg"),
        );
        assert_eq!(strings(&args), ["in.png", "-quality", "75", "out.jpg"]);
    }

    #[test]
    fn test_diff_args_carry_fuzz() {
        let args = build_diff_args(Path::new("a.png"), Path::new("b.jpg"), 5.0, Path::new("d.jpg"));
        let args = strings(&args);
        assert_eq!(args[0], "compare");
        assert!(args.windows(2).any(|w| w[0] == "-fuzz" && w[1] == "5%"));
        assert_eq!(args.last().map(String::as_str), Some("d.jpg"));
    }

    #[test]
    fn test_compare_args_verbose_flag() {
        let quiet = strings(&build_compare_args(Path::new("a"), Path::new("b"), "PSNR", false));
        let verbose = strings(&build_compare_args(Path::new("a"), Path::new("b"), "PSNR", true));
        assert!(!quiet.contains(&"-verbose".to_string()));
        assert!(verbose.contains(&"-verbose".to_string()));
        assert_eq!(verbose.last().map(String::as_str), Some("null:"));
    }

    #[test]
    fn test_identify_format_is_json_shaped() {
        assert!(IDENTIFY_FORMAT.starts_with('{'));
        assert!(IDENTIFY_FORMAT.contains("%[colorspace]"));
    }

    // ==========================================================================
    // PROCESS RUNNER
    // ==========================================================================

    #[test]
    fn test_missing_program_is_spawn_error() {
        let runner = ToolRunner::new(Duration::from_secs(1));
        let err = runner
            .run("squashlab-definitely-not-a-real-tool", &[])
            .unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_runner_captures_output() {
        let runner = ToolRunner::new(Duration::from_secs(10));
        let out = runner
            .run("sh", &["-c".into(), "echo out; echo err 1>&2".into()])
            .unwrap();
        assert!(out.status.success());
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_background_children() {
        let runner = ToolRunner::new(Duration::from_millis(200));
        let started = Instant::now();
        let err = runner
            .run("sh", &["-c".into(), "sleep 4 & sleep 10".into()])
            .unwrap_err();
        assert!(matches!(err, ToolError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[cfg(unix)]
    #[test]
    fn test_finished_tool_with_lingering_child_returns_output() {
        let runner = ToolRunner::new(Duration::from_secs(10));
        let started = Instant::now();
        let out = runner
            .run("sh", &["-c".into(), "echo done; sleep 5 &".into()])
            .unwrap();
        assert!(out.status.success());
        assert_eq!(out.stdout.trim(), "done");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[test]
    fn test_runner_kills_hung_process() {
        let runner = ToolRunner::new(Duration::from_millis(100));
        let started = Instant::now();
        let err = runner.run("sleep", &["5".into()]).unwrap_err();
        assert!(matches!(err, ToolError::TimedOut { .. }));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    // ==========================================================================
    // MAGICK / CWEBP CONTRACT
    // ==========================================================================

    /// Executable shell script standing in for a real tool
    #[cfg(unix)]
    fn stub(dir: &Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    fn magick(dir: &Path, body: &str) -> MagickTools {
        MagickTools::new(ToolRunner::new(Duration::from_secs(10))).with_magick(stub(dir, "magick", body))
    }

    #[cfg(unix)]
    #[test]
    fn test_compare_exit_one_returns_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let tools = magick(dir.path(), "echo '    all: 30.5 (0.3)' >&2; exit 1");
        let out = tools
            .compare(Path::new("a.png"), Path::new("b.webp"), "PSNR", true)
            .unwrap();
        assert_eq!(out.trim(), "all: 30.5 (0.3)");
    }

    #[cfg(unix)]
    #[test]
    fn test_compare_other_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let tools = magick(dir.path(), "echo 'unable to open image' >&2; exit 2");
        let err = tools
            .compare(Path::new("a.png"), Path::new("b.webp"), "PSNR", true)
            .unwrap_err();
        match err {
            ToolError::Failed { stderr, .. } => assert_eq!(stderr, "unable to open image"),
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_diff_requires_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("diff_b.webp");
        let tools = magick(dir.path(), "exit 0");
        let err = tools
            .diff(Path::new("a.png"), Path::new("b.webp"), 5.0, &output)
            .unwrap_err();
        assert!(matches!(err, ToolError::Failed { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_diff_exit_one_with_output_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("diff_b.webp");
        // the output path is the last argument
        let tools = magick(dir.path(), r#"for a; do out="$a"; done; echo x > "$out"; exit 1"#);
        tools
            .diff(Path::new("a.png"), Path::new("b.webp"), 5.0, &output)
            .unwrap();
        assert!(output.is_file());
    }

    #[cfg(unix)]
    #[test]
    fn test_identify_trims_output() {
        let dir = tempfile::tempdir().unwrap();
        let tools = magick(dir.path(), r#"printf '  {"width": 4}\n\n'"#);
        assert_eq!(tools.identify(Path::new("a.png")).unwrap(), r#"{"width": 4}"#);
    }

    #[cfg(unix)]
    #[test]
    fn test_encode_nonzero_exit_names_encoder() {
        let dir = tempfile::tempdir().unwrap();
        let cwebp = stub(dir.path(), "cwebp", "echo 'bad input' >&2; exit 3");
        let tools = MagickTools::new(ToolRunner::new(Duration::from_secs(10))).with_cwebp(cwebp.clone());

        let err = tools
            .encode(
                Codec::Webp,
                Path::new("in.png"),
                QualitySetting::Lossy(50),
                &dir.path().join("out.webp"),
            )
            .unwrap_err();
        match err {
            ToolError::Failed { program, stderr, .. } => {
                assert_eq!(program, cwebp);
                assert_eq!(stderr, "bad input");
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_jpeg_encode_goes_through_magick() {
        let dir = tempfile::tempdir().unwrap();
        let tools = magick(dir.path(), r#"for a; do out="$a"; done; echo x > "$out""#);
        let output = dir.path().join("out.jpg");
        tools
            .encode(Codec::Jpeg, Path::new("in.png"), QualitySetting::Lossy(80), &output)
            .unwrap();
        assert!(output.is_file());
    }
}
