use std::f64::consts::PI;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::watch;

use crate::capture::satellite::Satellite;
use crate::capture::wav::{finalize_wav_header, write_wav_header};
use crate::config::{Config, SdrConfig, SharedConfig};
use crate::events::{EventHub, EventKind, LogLevel};

const COMPONENT: &str = "capture";

/// Copy buffer for the radio subprocess's stdout.
const STREAM_CHUNK_BYTES: usize = 8192;

/// Synthetic tone parameters: the APT subcarrier at a fixed amplitude.
const TONE_FREQ_HZ: f64 = 2400.0;
const TONE_AMPLITUDE: f64 = 16000.0;
const TONE_CHUNK_SAMPLES: usize = 4096;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// Parameters for a single recording session. LOS doubles as the hard
/// deadline for the radio subprocess.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub satellite: Satellite,
    pub aos: DateTime<Utc>,
    pub los: DateTime<Utc>,
    pub max_elev: f64,
}

#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub path: PathBuf,
    pub bytes_written: u64,
}

/// Capture fails only on file-system problems; radio-source read errors are
/// logged and treated as end-of-stream.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture file I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Records satellite passes to WAV files. In synthetic mode it generates a
/// tone instead of spawning the radio binary, so the full pipeline can run
/// without SDR hardware.
pub struct Capturer {
    hub: EventHub,
    cfg: SharedConfig,
    synthetic: bool,
}

impl Capturer {
    pub fn new(hub: EventHub, cfg: SharedConfig, synthetic: bool) -> Self {
        Capturer {
            hub,
            cfg,
            synthetic,
        }
    }

    /// Run one recording session to completion or cancellation. Creates a
    /// timestamped WAV under the data root, streams PCM into it until LOS,
    /// cancellation, or end-of-stream, then patches the header sizes.
    pub async fn capture(
        &self,
        req: &CaptureRequest,
        cancel: &mut watch::Receiver<bool>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<CaptureOutcome, CaptureError> {
        let cfg = self.cfg.read().await.clone();

        let ts = req.aos.format("%Y%m%dT%H%M%SZ");
        let filename = format!("{}_{}.wav", req.satellite.name, ts);
        let out_path = cfg.data.root.join(&filename);

        let mode = if self.synthetic { "synthetic" } else { "live" };
        self.hub.log(
            COMPONENT,
            LogLevel::Info,
            format!(
                "starting {mode} capture for {} at {} Hz (max elev {:.1}°) -> {}",
                req.satellite.name,
                req.satellite.freq_hz,
                req.max_elev,
                out_path.display()
            ),
        );

        let mut f = File::create(&out_path).await?;
        write_wav_header(&mut f, cfg.sdr.sample_rate).await?;

        let bytes_written = if self.synthetic {
            self.synthetic_capture(&cfg, &mut f, req, cancel, shutdown)
                .await?
        } else {
            self.live_capture(&cfg, &mut f, req, cancel, shutdown)
                .await?
        };

        if let Err(e) = finalize_wav_header(&mut f).await {
            log::warn!("capture: failed to finalize WAV header: {e}");
        }

        self.hub.log(
            COMPONENT,
            LogLevel::Info,
            format!(
                "finished {}, {bytes_written} bytes written to {filename}",
                req.satellite.name
            ),
        );

        Ok(CaptureOutcome {
            path: out_path,
            bytes_written,
        })
    }

    /// Record a pass from the radio subprocess's stdout. The process is
    /// killed when LOS arrives, the capture is cancelled, or the daemon shuts
    /// down. A missing or crashing binary is end-of-stream, not an error.
    async fn live_capture(
        &self,
        cfg: &Config,
        f: &mut File,
        req: &CaptureRequest,
        cancel: &mut watch::Receiver<bool>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<u64, CaptureError> {
        let args = build_rtl_fm_args(&cfg.sdr, req.satellite.freq_hz);
        let mut child = match Command::new("rtl_fm")
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                self.hub.log(
                    COMPONENT,
                    LogLevel::Error,
                    format!("failed to start rtl_fm: {e}"),
                );
                return Ok(0);
            }
        };
        let Some(mut stdout) = child.stdout.take() else {
            let _ = child.start_kill();
            let _ = child.wait().await;
            return Ok(0);
        };

        let total_secs = (req.los - req.aos).num_milliseconds() as f64 / 1000.0;
        let remaining = (req.los - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let deadline = tokio::time::sleep(remaining);
        tokio::pin!(deadline);

        let started = Instant::now();
        let mut last_report = Instant::now();
        let mut buf = [0u8; STREAM_CHUNK_BYTES];
        let mut written: u64 = 0;
        let mut write_error: Option<std::io::Error> = None;

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                _ = cancel.changed() => break,
                _ = shutdown.changed() => break,
                n = stdout.read(&mut buf) => match n {
                    Ok(0) => break,
                    Ok(n) => {
                        if let Err(e) = f.write_all(&buf[..n]).await {
                            write_error = Some(e);
                            break;
                        }
                        written += n as u64;
                    }
                    Err(e) => {
                        log::warn!("capture: read error from rtl_fm: {e}");
                        break;
                    }
                },
            }

            if last_report.elapsed() >= PROGRESS_INTERVAL {
                let percent = if total_secs > 0.0 {
                    (started.elapsed().as_secs_f64() / total_secs * 100.0).min(100.0)
                } else {
                    100.0
                };
                self.hub.broadcast(
                    COMPONENT,
                    EventKind::Progress {
                        stage: "recording",
                        percent: percent as u8,
                        detail: format!("{} capture: {written} bytes", req.satellite.name),
                    },
                );
                last_report = Instant::now();
            }
        }

        // kill_on_drop covers panics; the explicit kill-and-reap is the
        // normal path.
        let _ = child.start_kill();
        let _ = child.wait().await;

        match write_error {
            Some(e) => Err(e.into()),
            None => Ok(written),
        }
    }

    /// Write a synthetic 2400 Hz sine wave, throttled to roughly 10x real
    /// time so progress events fire at a visible rate. Duration comes from
    /// demo.interval_seconds (default 15 s).
    async fn synthetic_capture(
        &self,
        cfg: &Config,
        f: &mut File,
        req: &CaptureRequest,
        cancel: &mut watch::Receiver<bool>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<u64, CaptureError> {
        let sample_rate = cfg.sdr.sample_rate as usize;
        let sim_secs = if cfg.demo.interval_seconds > 0 {
            cfg.demo.interval_seconds as usize
        } else {
            15
        };
        let total_samples = sim_secs * sample_rate;
        let throttle_every = (sample_rate / 10).max(1);

        let mut buf = [0u8; TONE_CHUNK_SAMPLES * 2];
        let mut written: u64 = 0;
        let mut samples_written = 0usize;
        let mut last_report = Instant::now();

        while samples_written < total_samples {
            if *cancel.borrow() || *shutdown.borrow() {
                break;
            }

            let n = TONE_CHUNK_SAMPLES.min(total_samples - samples_written);
            for i in 0..n {
                let t = (samples_written + i) as f64 / sample_rate as f64;
                let sample = (TONE_AMPLITUDE * (2.0 * PI * TONE_FREQ_HZ * t).sin()) as i16;
                buf[i * 2..i * 2 + 2].copy_from_slice(&sample.to_le_bytes());
            }

            f.write_all(&buf[..n * 2]).await?;
            written += (n * 2) as u64;
            samples_written += n;

            if samples_written % throttle_every < TONE_CHUNK_SAMPLES {
                tokio::select! {
                    _ = cancel.changed() => break,
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                }
            }

            if last_report.elapsed() >= PROGRESS_INTERVAL {
                let percent = (samples_written as f64 / total_samples as f64 * 100.0) as u8;
                self.hub.broadcast(
                    COMPONENT,
                    EventKind::Progress {
                        stage: "recording",
                        percent,
                        detail: format!(
                            "{} synthetic capture: {written} bytes",
                            req.satellite.name
                        ),
                    },
                );
                last_report = Instant::now();
            }
        }

        Ok(written)
    }
}

/// Command-line flags for rtl_fm. Output goes to stdout ("-") so it pipes
/// straight into the WAV writer.
fn build_rtl_fm_args(sdr: &SdrConfig, freq_hz: u64) -> Vec<String> {
    vec![
        "-f".into(),
        freq_hz.to_string(),
        "-s".into(),
        sdr.sample_rate.to_string(),
        "-g".into(),
        format!("{:.1}", sdr.gain),
        "-p".into(),
        sdr.ppm_correction.to_string(),
        "-d".into(),
        sdr.device_index.to_string(),
        "-E".into(),
        "dc".into(),
        "-M".into(),
        "fm".into(),
        "-".into(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::satellite::SATELLITES;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::RwLock;

    fn test_setup(dir: &TempDir, interval_seconds: i64) -> (SharedConfig, CaptureRequest) {
        let mut cfg = Config::default();
        cfg.data.root = dir.path().to_path_buf();
        cfg.demo.interval_seconds = interval_seconds;
        cfg.sdr.sample_rate = 8000;

        let now = Utc::now();
        let req = CaptureRequest {
            satellite: SATELLITES[2],
            aos: now,
            los: now + chrono::Duration::seconds(interval_seconds.max(1)),
            max_elev: 45.0,
        };
        (Arc::new(RwLock::new(cfg)), req)
    }

    fn read_sizes(path: &std::path::Path) -> (u64, u32, u32) {
        let bytes = std::fs::read(path).unwrap();
        let riff = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let data = u32::from_le_bytes(bytes[40..44].try_into().unwrap());
        (bytes.len() as u64, riff, data)
    }

    #[tokio::test]
    async fn synthetic_capture_produces_finalized_wav() {
        let dir = TempDir::new().unwrap();
        let (cfg, req) = test_setup(&dir, 1);
        let capturer = Capturer::new(EventHub::new(), cfg, true);

        let (_cancel_tx, mut cancel) = watch::channel(false);
        let (_shutdown_tx, mut shutdown) = watch::channel(false);

        let outcome = capturer
            .capture(&req, &mut cancel, &mut shutdown)
            .await
            .unwrap();

        assert!(outcome.path.exists());
        // 1 s of 16-bit mono at 8 kHz.
        assert_eq!(outcome.bytes_written, 16_000);

        let (len, riff, data) = read_sizes(&outcome.path);
        assert_eq!(len, 16_044);
        assert_eq!(u64::from(riff), len - 8);
        assert_eq!(u64::from(data), len - 44);

        let name = outcome.path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("NOAA-19_"));
        assert!(name.ends_with("Z.wav"));
    }

    #[tokio::test]
    async fn cancelled_before_start_yields_valid_header_only_wav() {
        let dir = TempDir::new().unwrap();
        let (cfg, req) = test_setup(&dir, 30);
        let capturer = Capturer::new(EventHub::new(), cfg, true);

        let (cancel_tx, mut cancel) = watch::channel(false);
        cancel_tx.send(true).unwrap();
        let (_shutdown_tx, mut shutdown) = watch::channel(false);

        let outcome = capturer
            .capture(&req, &mut cancel, &mut shutdown)
            .await
            .unwrap();

        assert_eq!(outcome.bytes_written, 0);
        let (len, riff, data) = read_sizes(&outcome.path);
        assert_eq!(len, 44);
        assert_eq!(riff, 36);
        assert_eq!(data, 0);
    }

    #[test]
    fn rtl_fm_args_shape() {
        let sdr = SdrConfig {
            device_index: 1,
            gain: 42.0,
            ppm_correction: -3,
            sample_rate: 48_000,
        };
        let args = build_rtl_fm_args(&sdr, 137_100_000);
        assert_eq!(
            args,
            vec![
                "-f", "137100000", "-s", "48000", "-g", "42.0", "-p", "-3", "-d", "1", "-E",
                "dc", "-M", "fm", "-",
            ]
        );
    }
}
