//! Job processor - sequences one vocal-removal job end to end
//!
//! A [`Processor`] is built once per worker process ([`Processor::init`]) and
//! then handles jobs one call at a time. It holds everything that used to be
//! warm global state: the scratch root, the resolved device and the
//! separation backend.
//!
//! ```text
//! Received → Decoding → Separating → Encoding → Cleaning → Completed
//!     └──────────┴───────────┴───────────┴──→ Failed → Cleaning
//! ```
//!
//! [`Processor::handle`] never returns an error: every stage failure becomes a
//! failure response, and the job's workspace is released on every path.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use super::request::JobRequest;
use super::response::JobResponse;
use crate::codec;
use crate::config::WorkerConfig;
use crate::device::{AcceleratorProbe, DeviceSelection};
use crate::error::Result;
use crate::separation::{DemucsBackend, ModelWarmer, SeparationBackend, SeparationResult};
use crate::workspace::{ScratchRoot, Workspace};

/// Where a job is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Received,
    Decoding,
    Separating,
    Encoding,
    Cleaning,
    Completed,
    Failed,
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Decoding => "decoding",
            Self::Separating => "separating",
            Self::Encoding => "encoding",
            Self::Cleaning => "cleaning",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

fn advance(stage: &mut JobStage, next: JobStage) {
    log::debug!("Job stage: {} -> {}", stage, next);
    *stage = next;
}

/// Data produced by a successful pipeline run, before cleanup
struct Processed {
    encoded: String,
    separation: SeparationResult,
    output_filename: String,
}

/// Per-process job handler
pub struct Processor {
    scratch: ScratchRoot,
    device: DeviceSelection,
    backend: Arc<dyn SeparationBackend>,
    default_profile: String,
}

impl Processor {
    /// Build the processor at worker start
    ///
    /// Creates the scratch root, detects the device once and warms the
    /// configured models. Only a scratch root that can't be created is fatal.
    pub fn init(config: &WorkerConfig, probe: &dyn AcceleratorProbe) -> Result<Self> {
        let scratch = ScratchRoot::init(&config.scratch.root)?;
        let device = DeviceSelection::detect(&config.device, probe);

        let report = ModelWarmer::new(config.warmup.clone()).warm(&device.device);
        if !report.failed.is_empty() {
            log::warn!(
                "{} of {} models failed to pre-load; first jobs may be slower",
                report.failed.len(),
                report.failed.len() + report.loaded.len()
            );
        }

        let backend = Arc::new(DemucsBackend::new(config.separation.clone()));
        Ok(Self::with_backend(
            scratch,
            device,
            backend,
            config.separation.default_profile.clone(),
        ))
    }

    /// Assemble a processor from already-initialised parts
    pub fn with_backend(
        scratch: ScratchRoot,
        device: DeviceSelection,
        backend: Arc<dyn SeparationBackend>,
        default_profile: impl Into<String>,
    ) -> Self {
        Self {
            scratch,
            device,
            backend,
            default_profile: default_profile.into(),
        }
    }

    pub fn device(&self) -> &DeviceSelection {
        &self.device
    }

    pub fn scratch(&self) -> &ScratchRoot {
        &self.scratch
    }

    /// Process one job and always return a structured response
    pub fn handle(&self, job: &Value) -> JobResponse {
        let started = Instant::now();
        let mut stage = JobStage::Received;

        match self.run(job, &mut stage) {
            Ok((request, processed)) => {
                let elapsed = started.elapsed().as_secs_f64();
                log::info!("Vocal removal completed in {:.1}s", elapsed);
                JobResponse::success(
                    processed.encoded,
                    elapsed,
                    request.separation_profile,
                    processed.separation.device,
                    processed.output_filename,
                )
            }
            Err(err) => {
                let elapsed = started.elapsed().as_secs_f64();
                log::warn!("Returning failure after {:.1}s ({}): {}", elapsed, stage, err);
                JobResponse::failure(&err, elapsed)
            }
        }
    }

    fn run(&self, job: &Value, stage: &mut JobStage) -> Result<(JobRequest, Processed)> {
        let request = JobRequest::from_job(job, &self.default_profile)?;
        log::info!(
            "Processing vocal removal: {}, method: {}",
            request.source_filename,
            request.separation_profile
        );

        let workspace = self.scratch.new_workspace()?;
        let outcome = self.process(&request, &workspace, stage);

        if let Err(err) = &outcome {
            log::error!("Job failed while {} [{}]: {}", stage, err.kind(), err);
            advance(stage, JobStage::Failed);
        }
        advance(stage, JobStage::Cleaning);
        workspace.release();
        if outcome.is_ok() {
            advance(stage, JobStage::Completed);
        }

        outcome.map(|processed| (request, processed))
    }

    fn process(
        &self,
        request: &JobRequest,
        workspace: &Workspace,
        stage: &mut JobStage,
    ) -> Result<Processed> {
        advance(stage, JobStage::Decoding);
        let input_path = codec::decode(workspace, &request.audio_payload, &request.source_filename)?;

        advance(stage, JobStage::Separating);
        let separation = self.backend.separate(
            workspace,
            &input_path,
            &request.separation_profile,
            &self.device.device,
        )?;

        advance(stage, JobStage::Encoding);
        let encoded = codec::encode(&separation.artifact)?;
        let output_filename = request.output_filename(&separation.artifact);

        Ok(Processed {
            encoded,
            separation,
            output_filename,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::AcceleratorStatus;
    use crate::error::JobError;
    use crate::separation::SeparationConfig;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde_json::json;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use walkdir::WalkDir;

    enum FakeMode {
        /// Write `no_vocals.wav` with these bytes in the documented layout
        Write(Vec<u8>),
        /// Fail as if the tool exited non-zero
        ToolError(&'static str),
        /// Like `Write`, then make the artifact's directory read-only
        #[cfg(unix)]
        WriteLocked(Vec<u8>),
    }

    struct FakeBackend {
        mode: FakeMode,
        calls: AtomicUsize,
    }

    impl FakeBackend {
        fn new(mode: FakeMode) -> Arc<Self> {
            Arc::new(Self {
                mode,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl SeparationBackend for FakeBackend {
        fn separate(
            &self,
            workspace: &Workspace,
            input_path: &Path,
            profile: &str,
            device: &str,
        ) -> Result<SeparationResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(input_path.starts_with(workspace.path()));
            match &self.mode {
                FakeMode::Write(bytes) => {
                    let out = workspace.create_dir("separated")?;
                    let stem = input_path.file_stem().unwrap();
                    let dir = out.join(profile).join(stem);
                    std::fs::create_dir_all(&dir).unwrap();
                    let artifact = dir.join("no_vocals.wav");
                    std::fs::write(&artifact, bytes).unwrap();
                    Ok(SeparationResult {
                        artifact,
                        device: device.to_string(),
                    })
                }
                FakeMode::ToolError(text) => Err(JobError::ExternalTool {
                    status: "exit status: 1".to_string(),
                    diagnostics: text.to_string(),
                }),
                #[cfg(unix)]
                FakeMode::WriteLocked(bytes) => {
                    use std::os::unix::fs::PermissionsExt;
                    let out = workspace.create_dir("separated")?;
                    let dir = out.join(profile).join("locked");
                    std::fs::create_dir_all(&dir).unwrap();
                    let artifact = dir.join("no_vocals.wav");
                    std::fs::write(&artifact, bytes).unwrap();
                    std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o555)).unwrap();
                    Ok(SeparationResult {
                        artifact,
                        device: device.to_string(),
                    })
                }
            }
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    fn device(name: &str) -> DeviceSelection {
        DeviceSelection {
            device: name.to_string(),
            status: AcceleratorStatus::cpu(),
        }
    }

    fn processor(root: &Path, backend: Arc<dyn SeparationBackend>) -> Processor {
        let scratch = ScratchRoot::init(root).unwrap();
        Processor::with_backend(scratch, device("cpu"), backend, "htdemucs_ft")
    }

    fn snapshot(root: &Path) -> Vec<PathBuf> {
        let mut entries: Vec<PathBuf> = WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.into_path())
            .collect();
        entries.sort();
        entries
    }

    /// 3 seconds of 16-bit mono silence
    fn silent_wav() -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..44100 * 3 {
                writer.write_sample(0i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_missing_audio_data_never_reaches_backend() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new(FakeMode::Write(b"x".to_vec()));
        let processor = processor(dir.path(), backend.clone());

        let response = processor.handle(&json!({"input": {}}));
        let value = response.to_value();

        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "No audio data provided");
        assert!(value["processing_time"].as_f64().is_some());
        assert!(value["timestamp"].is_string());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert!(snapshot(dir.path()).is_empty());
    }

    #[test]
    fn test_garbage_encoding_fails_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new(FakeMode::Write(b"x".to_vec()));
        let processor = processor(dir.path(), backend.clone());

        let response = processor.handle(&json!({"input": {"audio_data": "!!not base64!!"}}));

        assert!(!response.is_success());
        assert!(!response.error().unwrap().is_empty());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert!(snapshot(dir.path()).is_empty());
    }

    #[test]
    fn test_success_with_fake_backend() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new(FakeMode::Write(b"instrumental".to_vec()));
        let processor = processor(dir.path(), backend.clone());

        let response = processor.handle(&json!({"input": {
            "audio_data": STANDARD.encode(silent_wav()),
            "filename": "test.wav",
            "method": "htdemucs"
        }}));

        match response {
            JobResponse::Success(success) => {
                assert!(success.success);
                assert_eq!(success.output_filename, "test_no_vocals.wav");
                assert_eq!(success.profile_used, "htdemucs");
                assert_eq!(success.device_used, "cpu");
                assert_eq!(STANDARD.decode(success.processed_audio).unwrap(), b"instrumental");
            }
            JobResponse::Failure(failure) => panic!("unexpected failure: {}", failure.error),
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert!(snapshot(dir.path()).is_empty());
    }

    #[test]
    fn test_tool_error_becomes_failure_response() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new(FakeMode::ToolError("Model nope not found"));
        let processor = processor(dir.path(), backend);

        let value = processor
            .handle(&json!({"input": {"audio_data": "aGVsbG8=", "method": "nope"}}))
            .to_value();

        assert_eq!(value["success"], false);
        assert_eq!(value["error_kind"], "external_tool");
        assert!(value["error"].as_str().unwrap().contains("Model nope not found"));
        assert!(snapshot(dir.path()).is_empty());
    }

    #[test]
    fn test_concurrent_jobs_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeBackend::new(FakeMode::Write(b"stem".to_vec()));
        let processor = Arc::new(processor(dir.path(), backend.clone()));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let processor = Arc::clone(&processor);
                std::thread::spawn(move || {
                    processor.handle(&json!({"input": {
                        "audio_data": "aGVsbG8=",
                        "filename": format!("track{}.mp3", i)
                    }}))
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap().is_success());
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 4);
        assert!(snapshot(dir.path()).is_empty());
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(JobStage::Separating.to_string(), "separating");
        assert_eq!(JobStage::Cleaning.to_string(), "cleaning");
    }

    // ── End to end against stub separator scripts ──────────────────────────

    #[cfg(unix)]
    mod stub_tool {
        use super::*;

        /// Mirrors the real tool's layout: <out>/<model>/<input stem>/no_vocals.mp3
        const DOCUMENTED_LAYOUT: &str = r#"
out=""; model=""; prev=""; last=""
for a in "$@"; do
  case "$prev" in
    -o) out="$a" ;;
    -n) model="$a" ;;
  esac
  prev="$a"; last="$a"
done
name=$(basename "$last"); stem="${name%.*}"
mkdir -p "$out/$model/$stem"
printf 'accompaniment' > "$out/$model/$stem/no_vocals.mp3"
"#;

        /// Always writes <out>/htdemucs_ft/test/no_vocals.wav
        const FIXED_LAYOUT: &str = r#"
out=""; prev=""
for a in "$@"; do
  [ "$prev" = "-o" ] && out="$a"
  prev="$a"
done
mkdir -p "$out/htdemucs_ft/test"
printf 'stub-stem-bytes' > "$out/htdemucs_ft/test/no_vocals.wav"
"#;

        /// Writes an artifact and still fails
        const FAILING: &str = r#"
out=""; prev=""
for a in "$@"; do
  [ "$prev" = "-o" ] && out="$a"
  prev="$a"
done
mkdir -p "$out/x"
printf 'partial' > "$out/x/no_vocals.wav"
echo "RuntimeError: CUDA error: out of memory" >&2
exit 1
"#;

        const WRITES_NOTHING: &str = "exit 0\n";

        const HANGS: &str = "exec sleep 30\n";

        /// Forks a worker that writes output long after the deadline
        const FORKS_LATE_WRITER: &str = r#"
out=""; prev=""
for a in "$@"; do
  [ "$prev" = "-o" ] && out="$a"
  prev="$a"
done
( sleep 3; mkdir -p "$out/htdemucs_ft/late"; printf late > "$out/htdemucs_ft/late/no_vocals.wav" ) &
wait
"#;

        /// Build a processor whose separator is `sh <script>`
        fn stub_processor(scratch: &Path, tools: &Path, script: &str, timeout_secs: u64) -> Processor {
            let script_path = tools.join("separator.sh");
            std::fs::write(&script_path, script).unwrap();

            let config = SeparationConfig {
                program: PathBuf::from("sh"),
                program_args: vec![script_path.to_string_lossy().into_owned()],
                timeout_secs,
                ..Default::default()
            };
            processor(scratch, Arc::new(DemucsBackend::new(config)))
        }

        fn job(filename: &str) -> Value {
            json!({"input": {
                "audio_data": STANDARD.encode(silent_wav()),
                "filename": filename,
                "method": "htdemucs_ft"
            }})
        }

        #[test]
        fn test_documented_layout_success() {
            let scratch = tempfile::tempdir().unwrap();
            let tools = tempfile::tempdir().unwrap();
            let processor = stub_processor(scratch.path(), tools.path(), DOCUMENTED_LAYOUT, 60);

            let before = snapshot(scratch.path());
            let response = processor.handle(&job("song.flac"));
            assert_eq!(snapshot(scratch.path()), before);

            let success = match response {
                JobResponse::Success(success) => success,
                JobResponse::Failure(failure) => panic!("expected success, got {}", failure.error),
            };
            assert_eq!(success.output_filename, "song_no_vocals.mp3");
            assert_eq!(STANDARD.decode(&success.processed_audio).unwrap(), b"accompaniment");
        }

        #[test]
        fn test_fixed_layout_found_by_fallback() {
            let scratch = tempfile::tempdir().unwrap();
            let tools = tempfile::tempdir().unwrap();
            let processor = stub_processor(scratch.path(), tools.path(), FIXED_LAYOUT, 60);

            let response = processor.handle(&job("test.wav"));

            let success = match response {
                JobResponse::Success(success) => success,
                JobResponse::Failure(failure) => panic!("expected success, got {}", failure.error),
            };
            assert_eq!(success.output_filename, "test_no_vocals.wav");
            assert_eq!(success.profile_used, "htdemucs_ft");
            assert_eq!(STANDARD.decode(&success.processed_audio).unwrap(), b"stub-stem-bytes");
            assert!(snapshot(scratch.path()).is_empty());
        }

        #[test]
        fn test_non_zero_exit_skips_artifact_search() {
            let scratch = tempfile::tempdir().unwrap();
            let tools = tempfile::tempdir().unwrap();
            let processor = stub_processor(scratch.path(), tools.path(), FAILING, 60);

            let value = processor.handle(&job("test.wav")).to_value();

            assert_eq!(value["success"], false);
            assert_eq!(value["error_kind"], "external_tool");
            assert!(value["error"].as_str().unwrap().contains("CUDA error: out of memory"));
            assert!(snapshot(scratch.path()).is_empty());
        }

        #[test]
        fn test_missing_artifact_is_output_not_found() {
            let scratch = tempfile::tempdir().unwrap();
            let tools = tempfile::tempdir().unwrap();
            let processor = stub_processor(scratch.path(), tools.path(), WRITES_NOTHING, 60);

            let value = processor.handle(&job("test.wav")).to_value();

            assert_eq!(value["success"], false);
            assert_eq!(value["error_kind"], "output_not_found");
            assert!(snapshot(scratch.path()).is_empty());
        }

        #[test]
        fn test_timeout_fails_and_removes_workspace() {
            let scratch = tempfile::tempdir().unwrap();
            let tools = tempfile::tempdir().unwrap();
            let processor = stub_processor(scratch.path(), tools.path(), HANGS, 1);

            let started = Instant::now();
            let response = processor.handle(&job("test.wav"));

            assert!(started.elapsed() < Duration::from_secs(20));
            assert!(!response.is_success());
            assert!(response.error().unwrap().contains("timed out"));
            assert!(response.processing_time() >= 1.0);
            assert!(snapshot(scratch.path()).is_empty());
        }

        #[test]
        fn test_timeout_kills_forked_writers() {
            let scratch = tempfile::tempdir().unwrap();
            let tools = tempfile::tempdir().unwrap();
            let processor = stub_processor(scratch.path(), tools.path(), FORKS_LATE_WRITER, 1);

            let value = processor.handle(&job("test.wav")).to_value();
            assert_eq!(value["error_kind"], "timeout");
            assert!(snapshot(scratch.path()).is_empty());

            std::thread::sleep(Duration::from_secs(4));
            assert!(snapshot(scratch.path()).is_empty());
        }

        #[test]
        fn test_cleanup_failure_still_returns_response() {
            use std::os::unix::fs::PermissionsExt;

            // Permission bits do not stop root
            if unsafe { libc::geteuid() } == 0 {
                return;
            }

            let dir = tempfile::tempdir().unwrap();
            let backend = FakeBackend::new(FakeMode::WriteLocked(b"stem".to_vec()));
            let processor = processor(dir.path(), backend);

            let response = processor.handle(&json!({"input": {"audio_data": "aGVsbG8="}}));

            match &response {
                JobResponse::Success(success) => {
                    assert_eq!(STANDARD.decode(&success.processed_audio).unwrap(), b"stem");
                }
                JobResponse::Failure(failure) => panic!("unexpected failure: {}", failure.error),
            }
            let leftover = snapshot(dir.path());
            assert!(leftover.iter().any(|p| p.ends_with("locked/no_vocals.wav")));

            for path in leftover.iter().filter(|p| p.is_dir()) {
                std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
            }
        }

        #[test]
        fn test_missing_program_is_a_failure_response() {
            let scratch = tempfile::tempdir().unwrap();
            let config = SeparationConfig {
                program: PathBuf::from("/nonexistent/demucs"),
                ..Default::default()
            };
            let processor = processor(scratch.path(), Arc::new(DemucsBackend::new(config)));

            let value = processor.handle(&job("test.wav")).to_value();

            assert_eq!(value["success"], false);
            assert!(!value["error"].as_str().unwrap().is_empty());
            assert!(snapshot(scratch.path()).is_empty());
        }
    }
}
