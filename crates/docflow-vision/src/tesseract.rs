//! Local recognition through the Tesseract CLI.
//!
//! Image bytes are piped to `tesseract stdin stdout`; recognition uses TSV
//! output for per-word confidences and orientation detection uses `--psm 0`.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use docflow_core::{Error, ProviderConfig, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::engine::RecognitionEngine;
use crate::orientation::{OrientationDetection, OrientationDetector};
use crate::types::EngineOutput;

/// Fast engine backed by a local Tesseract install.
pub struct TesseractEngine {
    bin: String,
    lang: String,
    shut_down: AtomicBool,
}

impl TesseractEngine {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            bin: config.tesseract_bin.clone(),
            lang: config.tesseract_lang.clone(),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Verify the binary is runnable. Returns the reported version line.
    pub async fn start(&self) -> Result<String> {
        let output = Command::new(&self.bin)
            .arg("--version")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Error::Recognition(format!("cannot run {}: {}", self.bin, e)))?;

        // Older releases print the version on stderr.
        let raw = if output.stdout.is_empty() {
            output.stderr
        } else {
            output.stdout
        };
        let version = String::from_utf8_lossy(&raw)
            .lines()
            .next()
            .unwrap_or("tesseract")
            .trim()
            .to_string();
        info!("Recognition engine ready: {}", version);
        Ok(version)
    }
}

#[async_trait]
impl RecognitionEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn recognize(&self, image: &[u8]) -> Result<EngineOutput> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(Error::Recognition("engine has been shut down".into()));
        }
        let tsv = run_tesseract(&self.bin, &["-l", &self.lang, "tsv"], image).await?;
        let output = parse_tsv(&tsv);
        debug!(
            chars = output.text_len(),
            confidence = output.confidence,
            "Tesseract recognition complete"
        );
        Ok(output)
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
    }
}

/// Orientation and script detection via Tesseract OSD.
pub struct TesseractOsd {
    bin: String,
}

impl TesseractOsd {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            bin: config.tesseract_bin.clone(),
        }
    }

    /// Factory suitable for [`crate::OrientationCorrector::with_detector`].
    pub fn factory(config: &ProviderConfig) -> crate::DetectorFactory {
        let config = config.clone();
        Box::new(move || Ok(Arc::new(TesseractOsd::new(&config)) as Arc<dyn OrientationDetector>))
    }
}

#[async_trait]
impl OrientationDetector for TesseractOsd {
    async fn detect(&self, image: &[u8]) -> Result<OrientationDetection> {
        let report = run_tesseract(&self.bin, &["--psm", "0"], image).await?;
        parse_osd(&report)
    }
}

async fn run_tesseract(bin: &str, args: &[&str], image: &[u8]) -> Result<String> {
    let mut child = Command::new(bin)
        .arg("stdin")
        .arg("stdout")
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Recognition(format!("cannot run {}: {}", bin, e)))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(image).await?;
        stdin.shutdown().await?;
    }

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(Error::Recognition(format!(
            "tesseract exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Join TSV word rows into lines and average the word confidences.
///
/// Columns: level, page_num, block_num, par_num, line_num, word_num,
/// left, top, width, height, conf, text. Rows with `conf < 0` are layout rows.
pub(crate) fn parse_tsv(tsv: &str) -> EngineOutput {
    let mut lines: Vec<String> = Vec::new();
    let mut current_key: Option<(u32, u32, u32, u32)> = None;
    let mut current = String::new();
    let mut conf_sum = 0.0;
    let mut conf_count = 0usize;

    for row in tsv.lines().skip(1) {
        let cols: Vec<&str> = row.splitn(12, '\t').collect();
        if cols.len() < 12 {
            continue;
        }
        let conf: f64 = match cols[10].trim().parse() {
            Ok(c) => c,
            Err(_) => continue,
        };
        let word = cols[11].trim();
        if conf < 0.0 || word.is_empty() {
            continue;
        }
        let key = (
            cols[1].parse().unwrap_or(0),
            cols[2].parse().unwrap_or(0),
            cols[3].parse().unwrap_or(0),
            cols[4].parse().unwrap_or(0),
        );
        if current_key != Some(key) && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        current_key = Some(key);
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
        conf_sum += conf;
        conf_count += 1;
    }
    if !current.is_empty() {
        lines.push(current);
    }

    let confidence = if conf_count == 0 {
        0.0
    } else {
        (conf_sum / conf_count as f64).clamp(0.0, 100.0)
    };
    EngineOutput::new(lines.join("\n"), confidence)
}

/// Parse a `--psm 0` report. Orientation confidence is scaled ×10 into 0–100.
pub(crate) fn parse_osd(report: &str) -> Result<OrientationDetection> {
    let mut angle = None;
    let mut confidence = 0.0;
    let mut script = "unknown".to_string();

    for line in report.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "Rotate" => angle = value.parse::<u32>().ok(),
            "Orientation confidence" => {
                confidence = value.parse::<f64>().map(|c| (c * 10.0).min(100.0)).unwrap_or(0.0)
            }
            "Script" => script = value.to_string(),
            _ => {}
        }
    }

    let angle = angle.ok_or_else(|| Error::Recognition("OSD report has no rotation".into()))?;
    Ok(OrientationDetection {
        angle,
        script,
        confidence,
    })
}
