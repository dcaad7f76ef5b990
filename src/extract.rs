//! Text extraction cascade for uploaded documents.
//!
//! Tries an ordered list of strategies, cheapest first: the PDF's native
//! text layer, OCR over rendered pages, then a general-purpose AI vision
//! pass. A tier escalates to the next when it errors, returns text below
//! the configured minimum length, or (after tier 1) fails the quality
//! heuristic — this catches scanned PDFs with an empty text layer and
//! corrupt extractions that nominally pass the length check.
//!
//! Extraction has no side effects; callers persist the outcome.

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::ai::AiClient;
use crate::config::ExtractionConfig;

/// Extraction error. Stage-local: the orchestrator converts this into
/// `extraction_status = failed` and halts the document's pipeline.
#[derive(Debug)]
pub enum ExtractError {
    /// Every tier failed or returned below-threshold text.
    AllTiersFailed { last_error: String },
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::AllTiersFailed { last_error } => {
                write!(f, "all extraction tiers failed: {}", last_error)
            }
        }
    }
}

impl std::error::Error for ExtractError {}

/// Which cascade tier produced the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionMethod {
    TextLayer,
    Ocr,
    AiVision,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::TextLayer => "text_layer",
            ExtractionMethod::Ocr => "ocr",
            ExtractionMethod::AiVision => "ai_vision",
        }
    }
}

impl std::fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl serde::Serialize for ExtractionMethod {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Raw result of one strategy attempt.
#[derive(Debug, Clone)]
pub struct ExtractionAttempt {
    pub text: String,
    pub page_count: usize,
    pub confidence: f64,
}

/// Final cascade outcome for one document.
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub text: String,
    pub method: ExtractionMethod,
    pub page_count: usize,
    pub confidence: f64,
}

/// One tier of the cascade. Strategies are stateless; cost ordering is
/// the responsibility of [`TextExtractor`].
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    fn method(&self) -> ExtractionMethod;
    async fn attempt(&self, bytes: &[u8], filename: &str) -> Result<ExtractionAttempt>;
}

/// Heuristic quality score in [0, 1] for extracted text.
///
/// Combines the ratio of word-shaped tokens, the presence of structural
/// punctuation, and the proportion of non-alphanumeric noise. Garbled
/// text layers (wrong encodings, vector-drawn glyphs) score low even
/// when they pass the length check.
pub fn quality_score(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }

    let tokens: Vec<&str> = trimmed.split_whitespace().collect();
    if tokens.is_empty() {
        return 0.0;
    }
    let word_like = tokens
        .iter()
        .filter(|t| t.chars().filter(|c| c.is_alphabetic()).count() >= 2)
        .count();
    let word_ratio = word_like as f64 / tokens.len() as f64;

    let has_punctuation = trimmed
        .chars()
        .any(|c| matches!(c, '.' | ',' | ':' | ';'));
    let punct_score = if has_punctuation { 1.0 } else { 0.0 };

    let total_chars = trimmed.chars().count();
    let noise = trimmed
        .chars()
        .filter(|c| !c.is_alphanumeric() && !c.is_whitespace() && !".,;:()%€$-/'\"".contains(*c))
        .count();
    let noise_ratio = noise as f64 / total_chars as f64;

    (0.6 * word_ratio + 0.2 * punct_score + 0.2 * (1.0 - noise_ratio)).clamp(0.0, 1.0)
}

/// Count pages without extracting text. Best-effort; 0 when unparseable.
pub fn pdf_page_count(bytes: &[u8]) -> usize {
    lopdf::Document::load_mem(bytes)
        .map(|doc| doc.get_pages().len())
        .unwrap_or(0)
}

// ============ Tier 1: native text layer ============

pub struct TextLayerStrategy;

#[async_trait]
impl ExtractionStrategy for TextLayerStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::TextLayer
    }

    async fn attempt(&self, bytes: &[u8], _filename: &str) -> Result<ExtractionAttempt> {
        let text = pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| anyhow::anyhow!("PDF text layer extraction failed: {}", e))?;
        let page_count = pdf_page_count(bytes);
        let confidence = quality_score(&text);
        Ok(ExtractionAttempt {
            text,
            page_count,
            confidence,
        })
    }
}

// ============ Page rendering ============

async fn run_bounded(
    cmd: &mut tokio::process::Command,
    timeout: Duration,
) -> Result<std::process::Output> {
    let out = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| anyhow::anyhow!("subprocess timed out"))??;
    Ok(out)
}

/// Render PDF pages to PNG images with `pdftoppm`. Returns the holding
/// tempdir alongside the sorted page paths; the images disappear with it.
async fn render_pdf_pages(
    pdftoppm_path: &str,
    bytes: &[u8],
    timeout: Duration,
    max_pages: usize,
) -> Result<(tempfile::TempDir, Vec<std::path::PathBuf>)> {
    let tmp = tempfile::tempdir()?;
    let pdf_path = tmp.path().join("input.pdf");
    tokio::fs::write(&pdf_path, bytes).await?;

    // pdftoppm -png -r 200 input.pdf <prefix>
    let prefix = tmp.path().join("page");
    let mut render = tokio::process::Command::new(pdftoppm_path);
    render
        .arg("-png")
        .arg("-r")
        .arg("200")
        .arg(&pdf_path)
        .arg(&prefix);
    let output = run_bounded(&mut render, timeout).await.map_err(|e| {
        anyhow::anyhow!("failed to run pdftoppm (path='{}'): {}", pdftoppm_path, e)
    })?;
    if !output.status.success() {
        anyhow::bail!(
            "pdftoppm failed (exit {}): {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let mut pages: Vec<std::path::PathBuf> = std::fs::read_dir(tmp.path())?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("png"))
        .collect();
    pages.sort();
    if pages.is_empty() {
        anyhow::bail!("pdftoppm produced no page images");
    }
    pages.truncate(max_pages);

    Ok((tmp, pages))
}

// ============ Tier 2: OCR over rendered pages ============

/// Renders pages with `pdftoppm` and runs `tesseract` on each image.
/// Both subprocesses are time-bounded; a timeout fails this tier only.
pub struct OcrStrategy {
    pub language: String,
    pub tesseract_path: String,
    pub pdftoppm_path: String,
    pub timeout: Duration,
    pub max_pages: usize,
}

impl OcrStrategy {
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            language: config.ocr_language.clone(),
            tesseract_path: config.tesseract_path.clone(),
            pdftoppm_path: config.pdftoppm_path.clone(),
            timeout: Duration::from_secs(config.ocr_timeout_secs),
            max_pages: config.max_pages_ocr,
        }
    }

    async fn ocr_page(&self, image: &Path) -> Result<String> {
        let mut cmd = tokio::process::Command::new(&self.tesseract_path);
        cmd.arg(image).arg("stdout").arg("-l").arg(&self.language);
        let output = run_bounded(&mut cmd, self.timeout).await.map_err(|e| {
            anyhow::anyhow!(
                "failed to run tesseract (path='{}'): {}",
                self.tesseract_path,
                e
            )
        })?;
        if !output.status.success() {
            anyhow::bail!(
                "tesseract failed (exit {}): {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ExtractionStrategy for OcrStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Ocr
    }

    async fn attempt(&self, bytes: &[u8], _filename: &str) -> Result<ExtractionAttempt> {
        let (_tmp, pages) =
            render_pdf_pages(&self.pdftoppm_path, bytes, self.timeout, self.max_pages).await?;

        let mut text = String::new();
        for page in &pages {
            let page_text = self.ocr_page(page).await?;
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(page_text.trim());
        }

        let confidence = quality_score(&text);
        Ok(ExtractionAttempt {
            text,
            page_count: pages.len(),
            confidence,
        })
    }
}

// ============ Tier 3: AI vision pass ============

/// Last-resort tier: asks the vision model to transcribe the document.
/// Most expensive, so only reached when the cheaper tiers fall short.
///
/// Vision endpoints accept image inputs only, so PDFs are rendered to
/// PNG pages first and transcribed page by page; non-PDF uploads are
/// sent directly with a sniffed image mime type.
pub struct VisionStrategy {
    client: Arc<dyn AiClient>,
    pdftoppm_path: String,
    timeout: Duration,
    max_pages: usize,
}

impl VisionStrategy {
    pub fn from_config(config: &ExtractionConfig, client: Arc<dyn AiClient>) -> Self {
        Self {
            client,
            pdftoppm_path: config.pdftoppm_path.clone(),
            timeout: Duration::from_secs(config.ocr_timeout_secs),
            max_pages: config.max_pages_ocr,
        }
    }
}

const VISION_PROMPT: &str = "Transcribe all text in this document, in reading order. \
Preserve line breaks between paragraphs and table rows. \
Return only the transcribed text, without commentary.";

/// Best-effort mime sniff from magic bytes. Defaults to PNG.
fn sniff_image_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else {
        "image/png"
    }
}

#[async_trait]
impl ExtractionStrategy for VisionStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::AiVision
    }

    async fn attempt(&self, bytes: &[u8], _filename: &str) -> Result<ExtractionAttempt> {
        if bytes.starts_with(b"%PDF") {
            let (_tmp, pages) =
                render_pdf_pages(&self.pdftoppm_path, bytes, self.timeout, self.max_pages)
                    .await?;

            let mut text = String::new();
            for page in &pages {
                let image = tokio::fs::read(page).await?;
                let page_text = self
                    .client
                    .complete_vision(VISION_PROMPT, &image, "image/png")
                    .await?;
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(page_text.trim());
            }

            let confidence = quality_score(&text);
            return Ok(ExtractionAttempt {
                text,
                page_count: pages.len(),
                confidence,
            });
        }

        let text = self
            .client
            .complete_vision(VISION_PROMPT, bytes, sniff_image_mime(bytes))
            .await?;
        let confidence = quality_score(&text);
        Ok(ExtractionAttempt {
            text,
            page_count: pdf_page_count(bytes),
            confidence,
        })
    }
}

// ============ Cascade ============

/// Ordered extraction cascade. Holds the tiers plus the escalation
/// thresholds from config.
pub struct TextExtractor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
    min_text_length: usize,
    quality_threshold: f64,
}

impl TextExtractor {
    /// Default tiers: text layer, OCR (if enabled), AI vision.
    pub fn new(config: &ExtractionConfig, client: Arc<dyn AiClient>) -> Self {
        let mut strategies: Vec<Box<dyn ExtractionStrategy>> = vec![Box::new(TextLayerStrategy)];
        if config.ocr_enabled {
            strategies.push(Box::new(OcrStrategy::from_config(config)));
        }
        strategies.push(Box::new(VisionStrategy::from_config(config, client)));
        Self {
            strategies,
            min_text_length: config.min_text_length,
            quality_threshold: config.quality_threshold,
        }
    }

    /// Cascade with caller-supplied tiers. Used by tests and by callers
    /// that need a custom ordering.
    pub fn with_strategies(
        strategies: Vec<Box<dyn ExtractionStrategy>>,
        min_text_length: usize,
        quality_threshold: f64,
    ) -> Self {
        Self {
            strategies,
            min_text_length,
            quality_threshold,
        }
    }

    /// Try each tier in order until one yields adequate text.
    ///
    /// `min_length` overrides the configured minimum for this call.
    pub async fn extract(
        &self,
        bytes: &[u8],
        filename: &str,
        min_length: Option<usize>,
    ) -> Result<ExtractionOutcome, ExtractError> {
        let min_len = min_length.unwrap_or(self.min_text_length);
        let mut last_error = String::from("no extraction strategies configured");

        for (tier, strategy) in self.strategies.iter().enumerate() {
            match strategy.attempt(bytes, filename).await {
                Ok(attempt) => {
                    let len = attempt.text.trim().len();
                    if len < min_len {
                        last_error = format!(
                            "{}: extracted {} chars, below minimum {}",
                            strategy.method(),
                            len,
                            min_len
                        );
                        continue;
                    }
                    // Quality escalation only applies to the cheap first
                    // tier; later tiers are accepted on length alone.
                    if tier == 0 && attempt.confidence < self.quality_threshold {
                        last_error = format!(
                            "{}: quality score {:.2} below threshold {:.2}",
                            strategy.method(),
                            attempt.confidence,
                            self.quality_threshold
                        );
                        continue;
                    }
                    return Ok(ExtractionOutcome {
                        text: attempt.text,
                        method: strategy.method(),
                        page_count: attempt.page_count,
                        confidence: attempt.confidence,
                    });
                }
                Err(e) => {
                    last_error = format!("{}: {}", strategy.method(), e);
                }
            }
        }

        Err(ExtractError::AllTiersFailed { last_error })
    }
}
