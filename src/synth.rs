//! Piper synthesis: text on stdin → WAV file on disk.
//!
//! One child process per request. The wait is bounded by the configured
//! timeout; on expiry the child is killed and reaped.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::SynthesisConfig;
use crate::error::{Result, SpeakError};

pub struct PiperSynthesizer {
    binary: PathBuf,
    model: PathBuf,
    extra_args: Vec<String>,
    timeout: Duration,
}

impl PiperSynthesizer {
    pub fn new(config: &SynthesisConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            model: config.model.clone(),
            extra_args: config.extra_args.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn model(&self) -> &Path {
        &self.model
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Warn at startup about missing files. Bare command names are left to
    /// PATH lookup at spawn time.
    pub fn check(&self) {
        if self.binary.components().count() > 1 && !self.binary.exists() {
            warn!("Piper binary not found at {}", self.binary.display());
        } else {
            info!("Piper binary: {}", self.binary.display());
        }
        if !self.model.exists() {
            warn!("Piper model not found at {}", self.model.display());
        } else {
            info!("Piper model: {}", self.model.display());
        }
    }

    /// Synthesize `text` into `output`. A non-zero exit is a conversion failure.
    pub async fn synthesize(&self, text: &str, output: &Path) -> Result<()> {
        let status = self.run(text, output).await?;
        if status.success() {
            Ok(())
        } else {
            Err(SpeakError::ConversionFailed(status.code()))
        }
    }

    /// Spawn the synthesizer, feed it `text` and wait for it to exit.
    pub async fn run(&self, text: &str, output: &Path) -> Result<ExitStatus> {
        let t0 = Instant::now();

        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.extra_args)
            .arg("--model")
            .arg(&self.model)
            .arg("--output_file")
            .arg(output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Running {:?}", cmd.as_std());
        let mut child = cmd.spawn().map_err(SpeakError::Spawn)?;

        // Drain stderr concurrently so a chatty child never blocks on a full pipe.
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf).await;
                buf
            })
        });

        // One deadline covers feeding stdin and the wait: a child that never
        // reads would otherwise block the write once the pipe fills.
        let stdin = child.stdin.take();
        let exchange = async {
            if let Some(mut stdin) = stdin {
                stdin
                    .write_all(text.as_bytes())
                    .await
                    .map_err(SpeakError::ProcessIo)?;
                stdin.flush().await.map_err(SpeakError::ProcessIo)?;
                // stdin dropped here: EOF tells the synthesizer the text is complete
            }
            Ok::<_, SpeakError>(child.wait().await?)
        };

        let status = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                warn!("Synthesizer I/O failed: {e}, killing child");
                let _ = child.kill().await;
                abort(stderr_task);
                return Err(e);
            }
            Err(_) => {
                warn!(
                    "Synthesizer exceeded {:?}, killing pid {:?}",
                    self.timeout,
                    child.id()
                );
                let _ = child.kill().await;
                abort(stderr_task);
                return Err(SpeakError::Timeout(self.timeout));
            }
        };

        let elapsed_ms = t0.elapsed().as_secs_f64() * 1000.0;
        if status.success() {
            debug!("Synthesizer finished in {elapsed_ms:.0}ms");
            abort(stderr_task);
        } else {
            let stderr = match stderr_task {
                Some(task) => collect_stderr(task).await,
                None => String::new(),
            };
            warn!(
                "Synthesizer failed ({status}) after {elapsed_ms:.0}ms: {}",
                stderr.trim()
            );
        }

        Ok(status)
    }
}

fn abort(task: Option<tokio::task::JoinHandle<Vec<u8>>>) {
    if let Some(task) = task {
        task.abort();
    }
}

/// Stderr may stay open in grandchildren; don't wait on it for long.
async fn collect_stderr(task: tokio::task::JoinHandle<Vec<u8>>) -> String {
    match tokio::time::timeout(Duration::from_millis(500), task).await {
        Ok(Ok(buf)) => String::from_utf8_lossy(&buf).into_owned(),
        _ => String::new(),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testutil::fake_synthesis;

    #[tokio::test]
    async fn writes_text_as_utf8_and_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        // Echo stdin into the output file so the test can inspect what was sent.
        let config = fake_synthesis(dir.path(), r#"cat > "$out""#);
        let synth = PiperSynthesizer::new(&config);

        let output = dir.path().join("out.wav");
        let text = "Příliš žluťoučký kůň úpěl ďábelské ódy.";
        synth.synthesize(text, &output).await.unwrap();

        assert_eq!(std::fs::read_to_string(&output).unwrap(), text);
    }

    #[tokio::test]
    async fn passes_model_and_output_flags() {
        let dir = tempfile::tempdir().unwrap();
        let config = fake_synthesis(
            dir.path(),
            r#"cat > /dev/null; printf '%s' "$model" > "$out""#,
        );
        let synth = PiperSynthesizer::new(&config);

        let output = dir.path().join("flags.wav");
        synth.synthesize("hello", &output).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            config.model.display().to_string()
        );
    }

    #[tokio::test]
    async fn nonzero_exit_is_conversion_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = fake_synthesis(dir.path(), "cat > /dev/null; echo broken >&2; exit 3");
        let synth = PiperSynthesizer::new(&config);

        let status = synth.run("hello", &dir.path().join("x.wav")).await.unwrap();
        assert_eq!(status.code(), Some(3));

        let err = synth
            .synthesize("hello", &dir.path().join("x.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, SpeakError::ConversionFailed(Some(3))));
    }

    #[tokio::test]
    async fn hung_synthesizer_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = fake_synthesis(dir.path(), "cat > /dev/null; sleep 30");
        config.timeout_secs = 1;
        let synth = PiperSynthesizer::new(&config);

        let t0 = Instant::now();
        let err = synth
            .synthesize("hello", &dir.path().join("x.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, SpeakError::Timeout(d) if d == Duration::from_secs(1)));
        assert!(t0.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn child_that_never_reads_stdin_times_out() {
        let dir = tempfile::tempdir().unwrap();
        // Leaves stdin open but unread, so a large write fills the pipe.
        let mut config = fake_synthesis(dir.path(), "sleep 30");
        config.timeout_secs = 1;
        let synth = PiperSynthesizer::new(&config);

        let text = "a".repeat(2 * 1024 * 1024);
        let t0 = Instant::now();
        let err = synth
            .synthesize(&text, &dir.path().join("x.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, SpeakError::Timeout(d) if d == Duration::from_secs(1)));
        assert!(t0.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn closed_stdin_is_process_io_failure() {
        let dir = tempfile::tempdir().unwrap();
        // Close stdin without reading, then linger so the write hits EPIPE.
        let config = fake_synthesis(dir.path(), "exec 0<&-; sleep 5");
        let synth = PiperSynthesizer::new(&config);

        let text = "a".repeat(4 * 1024 * 1024);
        let err = synth
            .synthesize(&text, &dir.path().join("x.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, SpeakError::ProcessIo(_)));
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = SynthesisConfig {
            binary: dir.path().join("no-such-piper"),
            model: dir.path().join("model.onnx"),
            extra_args: Vec::new(),
            timeout_secs: 5,
        };
        let synth = PiperSynthesizer::new(&config);

        let err = synth
            .synthesize("hello", &dir.path().join("x.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, SpeakError::Spawn(_)));
    }
}
