use crate::error::IngestError;
use crate::models::{NormalizedDocument, PageImage, RawDocument};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, warn};

/// Direct whole-document passes render at screen resolution; the per-page
/// fallback pays for a higher density because it only runs when the cheap
/// pass produced nothing.
const DIRECT_PASS_DPI: u32 = 150;
const FALLBACK_DPI: u32 = 300;

const EMPTY_TEXT_THRESHOLD: usize = 30;
const IMAGE_PLACEHOLDER: &str = "<!-- image";

#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn ocr_document(&self, document: &RawDocument) -> Result<String, IngestError>;

    async fn ocr_page(&self, page: &PageImage, source: &str) -> Result<String, IngestError>;
}

#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render_pages(&self, document: &RawDocument) -> Result<Vec<PageImage>, IngestError>;
}

/// Renders one PNG per page with pdftoppm, without running any OCR.
pub struct PdftoppmRenderer {
    dpi: u32,
}

impl Default for PdftoppmRenderer {
    fn default() -> Self {
        Self { dpi: FALLBACK_DPI }
    }
}

impl PdftoppmRenderer {
    pub fn new(dpi: u32) -> Self {
        Self { dpi }
    }
}

#[async_trait]
impl PageRenderer for PdftoppmRenderer {
    async fn render_pages(&self, document: &RawDocument) -> Result<Vec<PageImage>, IngestError> {
        render_with_pdftoppm(&document.bytes, self.dpi).await
    }
}

async fn render_with_pdftoppm(bytes: &[u8], dpi: u32) -> Result<Vec<PageImage>, IngestError> {
    let workdir = TempDir::new()?;
    let pdf_path = workdir.path().join("input.pdf");
    tokio::fs::write(&pdf_path, bytes).await?;

    let output = Command::new("pdftoppm")
        .arg("-png")
        .arg("-r")
        .arg(dpi.to_string())
        .arg(&pdf_path)
        .arg(workdir.path().join("page"))
        .output()
        .await
        .map_err(|error| IngestError::Conversion(format!("pdftoppm not runnable: {error}")))?;

    if !output.status.success() {
        return Err(IngestError::Conversion(format!(
            "pdftoppm failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let mut rendered = Vec::new();
    let mut entries = tokio::fs::read_dir(workdir.path()).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("png") {
            continue;
        }
        let number = page_number_from_stem(&path).ok_or_else(|| {
            IngestError::Conversion(format!("unexpected render name: {}", path.display()))
        })?;
        rendered.push(PageImage {
            number,
            png: tokio::fs::read(&path).await?,
        });
    }

    if rendered.is_empty() {
        return Err(IngestError::Conversion("pdftoppm produced no pages".to_string()));
    }

    rendered.sort_by_key(|page| page.number);
    Ok(rendered)
}

fn page_number_from_stem(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    let digits = stem.rsplit('-').next()?;
    digits.parse().ok()
}

/// Tesseract CLI engine. The whole-document pass renders every page once and
/// runs a single batched tesseract invocation over the list; the per-page
/// capability OCRs one already-rendered image.
pub struct TesseractOcr {
    languages: Vec<String>,
}

impl TesseractOcr {
    pub fn new(languages: Vec<String>) -> Self {
        Self { languages }
    }

    fn lang_arg(&self) -> String {
        self.languages.join("+")
    }

    async fn run_tesseract(&self, input: &Path) -> Result<String, IngestError> {
        let output = Command::new("tesseract")
            .arg(input)
            .arg("stdout")
            .arg("-l")
            .arg(self.lang_arg())
            .output()
            .await
            .map_err(|error| IngestError::Ocr(format!("tesseract not runnable: {error}")))?;

        if !output.status.success() {
            return Err(IngestError::Ocr(format!(
                "tesseract failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn ocr_document(&self, document: &RawDocument) -> Result<String, IngestError> {
        let pages = render_with_pdftoppm(&document.bytes, DIRECT_PASS_DPI).await?;

        let workdir = TempDir::new()?;
        let mut listing = String::new();
        for page in &pages {
            let path = workdir.path().join(format!("page-{}.png", page.number));
            tokio::fs::write(&path, &page.png).await?;
            listing.push_str(&path.to_string_lossy());
            listing.push('\n');
        }

        let list_path = workdir.path().join("pages.txt");
        tokio::fs::write(&list_path, listing).await?;

        self.run_tesseract(&list_path).await
    }

    async fn ocr_page(&self, page: &PageImage, _source: &str) -> Result<String, IngestError> {
        let workdir = TempDir::new()?;
        let path = workdir.path().join("page.png");
        tokio::fs::write(&path, &page.png).await?;
        self.run_tesseract(&path).await
    }
}

#[derive(Debug, Clone, Serialize)]
struct RemoteDocumentRequest {
    pdf_base64: String,
    name: String,
    languages: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
struct RemotePageRequest {
    image_base64: String,
    name: String,
    page: u32,
    languages: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RemoteOcrResponse {
    markdown: Option<String>,
    text: Option<String>,
}

impl RemoteOcrResponse {
    fn into_text(self, source: &str) -> Result<String, IngestError> {
        self.markdown
            .or(self.text)
            .ok_or_else(|| IngestError::Ocr(format!("ocr response had no text for {source}")))
    }
}

/// HTTP OCR service speaking base64 payloads.
pub struct RemoteOcr {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    languages: Vec<String>,
}

impl RemoteOcr {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, languages: Vec<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
            languages,
        }
    }

    async fn post_ocr<T: Serialize>(&self, payload: &T, source: &str) -> Result<String, IngestError> {
        let mut request = self.client.post(&self.endpoint).json(payload);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(IngestError::Ocr(format!(
                "ocr request to {} returned {}",
                self.endpoint,
                response.status()
            )));
        }

        let payload: RemoteOcrResponse = response.json().await?;
        payload.into_text(source)
    }
}

#[async_trait]
impl OcrEngine for RemoteOcr {
    async fn ocr_document(&self, document: &RawDocument) -> Result<String, IngestError> {
        let payload = RemoteDocumentRequest {
            pdf_base64: STANDARD.encode(&document.bytes),
            name: document.name.clone(),
            languages: self.languages.clone(),
        };
        self.post_ocr(&payload, &document.name).await
    }

    async fn ocr_page(&self, page: &PageImage, source: &str) -> Result<String, IngestError> {
        let payload = RemotePageRequest {
            image_base64: STANDARD.encode(&page.png),
            name: format!("{source}-p{}.png", page.number),
            page: page.number,
            languages: self.languages.clone(),
        };
        self.post_ocr(&payload, source).await
    }
}

/// Engine variant picked once at configuration time.
pub enum OcrBackend {
    Tesseract(TesseractOcr),
    Remote(RemoteOcr),
}

#[async_trait]
impl OcrEngine for OcrBackend {
    async fn ocr_document(&self, document: &RawDocument) -> Result<String, IngestError> {
        match self {
            OcrBackend::Tesseract(engine) => engine.ocr_document(document).await,
            OcrBackend::Remote(engine) => engine.ocr_document(document).await,
        }
    }

    async fn ocr_page(&self, page: &PageImage, source: &str) -> Result<String, IngestError> {
        match self {
            OcrBackend::Tesseract(engine) => engine.ocr_page(page, source).await,
            OcrBackend::Remote(engine) => engine.ocr_page(page, source).await,
        }
    }
}

/// True when the OCR export carries no real text once structural image
/// placeholders are dropped. Gates the per-page fallback.
pub fn looks_like_only_images(markdown: &str) -> bool {
    let text: String = markdown
        .lines()
        .filter(|line| !line.contains(IMAGE_PLACEHOLDER))
        .collect();
    text.trim().len() < EMPTY_TEXT_THRESHOLD
}

fn split_form_feed(text: &str) -> Vec<String> {
    let pages: Vec<String> = text
        .split('\u{000C}')
        .map(|page| page.trim().to_string())
        .filter(|page| !page.is_empty())
        .collect();

    if pages.is_empty() && !text.trim().is_empty() {
        return vec![text.trim().to_string()];
    }
    pages
}

fn pdf_page_count(bytes: &[u8]) -> Result<usize, IngestError> {
    let document = lopdf::Document::load_mem(bytes)
        .map_err(|error| IngestError::Conversion(format!("unparsable pdf: {error}")))?;
    Ok(document.get_pages().len())
}

pub struct Converter<E, R>
where
    E: OcrEngine,
    R: PageRenderer,
{
    engine: E,
    renderer: R,
}

impl<E, R> Converter<E, R>
where
    E: OcrEngine,
    R: PageRenderer,
{
    pub fn new(engine: E, renderer: R) -> Self {
        Self { engine, renderer }
    }

    pub async fn convert(&self, document: &RawDocument) -> Result<NormalizedDocument, IngestError> {
        let page_count = pdf_page_count(&document.bytes)?;
        debug!(source = %document.name, pages = page_count, "direct ocr pass");

        let direct = self.engine.ocr_document(document).await?;
        if !looks_like_only_images(&direct) {
            return Ok(NormalizedDocument {
                source: document.name.clone(),
                pages: split_form_feed(&direct),
                markdown: direct,
            });
        }

        debug!(source = %document.name, "direct pass effectively empty, rendering per page");
        let normalized = self.convert_per_page(document).await?;
        if normalized.markdown.trim().is_empty() {
            warn!(source = %document.name, "document produced no text after fallback");
        }
        Ok(normalized)
    }

    async fn convert_per_page(&self, document: &RawDocument) -> Result<NormalizedDocument, IngestError> {
        let pages = self.renderer.render_pages(document).await?;

        let mut page_texts = Vec::with_capacity(pages.len());
        for page in &pages {
            let text = self.engine.ocr_page(page, &document.name).await?;
            page_texts.push(text.trim().to_string());
        }

        let mut markdown = String::new();
        for (position, text) in page_texts.iter().enumerate() {
            markdown.push_str(&format!("\n\n<!-- page {} -->\n\n", position + 1));
            markdown.push_str(text);
        }

        Ok(NormalizedDocument {
            source: document.name.clone(),
            markdown,
            pages: page_texts,
        })
    }
}

#[cfg(test)]
pub(crate) fn tiny_pdf() -> Vec<u8> {
    use lopdf::{dictionary, Document, Object};

    let mut document = Document::with_version("1.5");
    let pages_id = document.new_object_id();
    let page_id = document.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
    });
    document.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = document.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    document.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    document
        .save_to(&mut bytes)
        .expect("test pdf should serialize");
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawDocument;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeEngine {
        direct_output: String,
        page_output: String,
        direct_calls: AtomicUsize,
        page_calls: AtomicUsize,
    }

    impl FakeEngine {
        fn new(direct_output: &str, page_output: &str) -> Self {
            Self {
                direct_output: direct_output.to_string(),
                page_output: page_output.to_string(),
                direct_calls: AtomicUsize::new(0),
                page_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl OcrEngine for FakeEngine {
        async fn ocr_document(&self, _document: &RawDocument) -> Result<String, IngestError> {
            self.direct_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.direct_output.clone())
        }

        async fn ocr_page(&self, _page: &PageImage, _source: &str) -> Result<String, IngestError> {
            self.page_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.page_output.clone())
        }
    }

    struct FakeRenderer {
        pages: usize,
    }

    #[async_trait]
    impl PageRenderer for FakeRenderer {
        async fn render_pages(&self, _document: &RawDocument) -> Result<Vec<PageImage>, IngestError> {
            Ok((1..=self.pages as u32)
                .map(|number| PageImage {
                    number,
                    png: vec![0u8; 4],
                })
                .collect())
        }
    }

    #[test]
    fn short_stripped_text_counts_as_only_images() {
        let markdown = "<!-- image -->\n<!-- image -->\n0123456789";
        assert!(looks_like_only_images(markdown));
    }

    #[test]
    fn long_stripped_text_does_not_count_as_only_images() {
        let markdown = "a".repeat(500);
        assert!(!looks_like_only_images(&markdown));
    }

    #[test]
    fn placeholder_lines_are_ignored_by_the_heuristic() {
        let padding = "<!-- image -->\n".repeat(50);
        assert!(looks_like_only_images(&padding));
    }

    #[test]
    fn unparsable_bytes_are_a_conversion_error() {
        let error = pdf_page_count(b"%PDF-1.4\n%broken").unwrap_err();
        assert!(matches!(error, IngestError::Conversion(_)));
    }

    #[tokio::test]
    async fn rich_direct_pass_skips_the_fallback() {
        let direct = "Relatório mensal de vendas com metas, funil e tarefas concluídas.";
        let engine = FakeEngine::new(direct, "unused");
        let converter = Converter::new(engine, FakeRenderer { pages: 2 });

        let document = RawDocument::pdf("report.pdf", tiny_pdf());
        let normalized = converter.convert(&document).await.unwrap();

        assert_eq!(normalized.markdown, direct);
        assert_eq!(normalized.source, "report.pdf");
        assert_eq!(converter.engine.direct_calls.load(Ordering::SeqCst), 1);
        assert_eq!(converter.engine.page_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_direct_pass_triggers_per_page_ocr() {
        let engine = FakeEngine::new("<!-- image -->\nabc", "Página reconhecida");
        let converter = Converter::new(engine, FakeRenderer { pages: 3 });

        let document = RawDocument::pdf("scan.pdf", tiny_pdf());
        let normalized = converter.convert(&document).await.unwrap();

        assert_eq!(converter.engine.page_calls.load(Ordering::SeqCst), 3);
        assert_eq!(normalized.pages.len(), 3);
        assert!(normalized.markdown.contains("<!-- page 1 -->"));
        assert!(normalized.markdown.contains("<!-- page 3 -->"));
        assert!(normalized.markdown.contains("Página reconhecida"));
    }

    #[tokio::test]
    async fn conversion_is_idempotent() {
        let engine = FakeEngine::new("Total sales: 120 units over threshold text", "unused");
        let converter = Converter::new(engine, FakeRenderer { pages: 1 });

        let document = RawDocument::pdf("report.pdf", tiny_pdf());
        let first = converter.convert(&document).await.unwrap();
        let second = converter.convert(&document).await.unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn form_feed_output_splits_into_pages() {
        let pages = split_form_feed("First page\u{000C}Second page\n");
        assert_eq!(pages, vec!["First page", "Second page"]);
    }
}
