//! Turn a document into an ordered sequence of raster page images.
//!
//! PDFs are rendered with Poppler's `pdftocairo`. Single images are passed
//! through untouched as a one-page document.

use std::{collections::BTreeMap, sync::LazyLock, vec};

use clap::Args;
use futures::{StreamExt as _, stream};
use regex::Regex;
use tokio::{fs, process::Command};

use crate::{
    async_utils::{BoxedStream, check_for_command_failure},
    cpu_limit::with_cpu_semaphore,
    prelude::*,
};

/// The MIME type of a PDF.
pub const PDF_MIME_TYPE: &str = "application/pdf";

/// Image types we pass straight through to the recognition engine.
pub const SUPPORTED_IMAGE_TYPES: &[&str] =
    &["image/png", "image/jpeg", "image/webp", "image/gif"];

/// Media types that mean "the caller didn't know".
const UNKNOWN_MEDIA_TYPES: &[&str] = &["", "application/octet-stream"];

/// PDF user space is 72 units per inch.
const NOMINAL_DPI: f32 = 72.0;

/// How much we upscale PDF pages by default. Recognition is noticeably more
/// accurate at 2× than at native resolution.
pub const DEFAULT_SCALE: f32 = 2.0;

static ERROR_LINE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error").expect("failed to compile regex"));

/// Poppler reports recoverable damage to the cross-reference table as an
/// error, but renders the document fine.
static RECOVERABLE_ERROR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error: xref num").expect("failed to compile regex")
});

/// Does this line of Poppler output report a real error?
fn is_error_line(line: &str) -> bool {
    ERROR_LINE_REGEX.is_match(line) && !RECOVERABLE_ERROR_REGEX.is_match(line)
}

/// Options controlling how we rasterize documents.
#[derive(Args, Clone, Debug)]
pub struct RasterizeOpts {
    /// How much to upscale PDF pages before recognition. 1.0 renders at 72 DPI.
    #[clap(long, default_value_t = DEFAULT_SCALE)]
    pub scale: f32,

    /// Only render the first N pages of each PDF.
    #[clap(long, value_parser = parse_max_pages)]
    pub max_pages: Option<usize>,
}

/// Parse `--max-pages`. Poppler reads `-l 0` as "the last page", so zero
/// would silently render everything.
fn parse_max_pages(s: &str) -> Result<usize> {
    let max_pages = s
        .parse::<usize>()
        .with_context(|| format!("invalid page count {:?}", s))?;
    if max_pages == 0 {
        return Err(anyhow!("--max-pages must be at least 1"));
    }
    Ok(max_pages)
}

impl RasterizeOpts {
    /// The DPI to pass to `pdftocairo`.
    pub fn dpi(&self) -> u32 {
        (NOMINAL_DPI * self.scale).round().max(1.0) as u32
    }
}

impl Default for RasterizeOpts {
    fn default() -> Self {
        Self {
            scale: DEFAULT_SCALE,
            max_pages: None,
        }
    }
}

/// One rendered page, ready for recognition.
#[derive(Debug)]
pub struct RasterPage {
    /// The 1-based position of this page in the document.
    pub page_index: usize,
    /// The MIME type of `data`. Always one of [`SUPPORTED_IMAGE_TYPES`].
    pub mime_type: String,
    /// The encoded image.
    pub data: Vec<u8>,
}

/// Where the bytes for a page currently live.
#[derive(Debug)]
enum PendingPage {
    /// A single-image document, which we already have in memory.
    InMemory(Vec<u8>),
    /// A page rendered into our scratch directory.
    Rendered(PathBuf),
}

/// The pages of a document, handed out lazily in page order.
///
/// Rendered pages live in a temporary directory until they're read, and each
/// file is deleted as soon as it has been handed out. Dropping this value
/// removes anything left over, so abandoning a run mid-document leaves nothing
/// behind.
#[derive(Debug)]
pub struct RasterPages {
    /// Scratch space for rendered pages, if we needed any.
    tmpdir: Option<tempfile::TempDir>,
    /// The MIME type of every page we return.
    mime_type: String,
    /// Pages we haven't returned yet.
    pending: vec::IntoIter<PendingPage>,
    /// How many pages we will return in total.
    page_count: usize,
    /// The index of the next page we will return.
    next_page_index: usize,
}

impl RasterPages {
    /// A one-page document wrapping an image unchanged.
    fn single_image(mime_type: String, data: Vec<u8>) -> Self {
        Self {
            tmpdir: None,
            mime_type,
            pending: vec![PendingPage::InMemory(data)].into_iter(),
            page_count: 1,
            next_page_index: 1,
        }
    }

    /// How many pages will this sequence produce?
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Get the next page, or `None` when we're done.
    pub async fn next_page(&mut self) -> Option<Result<RasterPage>> {
        let pending = self.pending.next()?;
        let page_index = self.next_page_index;
        self.next_page_index += 1;
        let data = match pending {
            PendingPage::InMemory(data) => data,
            PendingPage::Rendered(path) => match read_and_remove(&path).await {
                Ok(data) => data,
                Err(err) => {
                    return Some(Err(err.context(format!(
                        "failed to load rendered page {}",
                        page_index
                    ))));
                }
            },
        };
        Some(Ok(RasterPage {
            page_index,
            mime_type: self.mime_type.clone(),
            data,
        }))
    }

    /// Convert into an async stream of pages.
    pub fn into_stream(self) -> BoxedStream<Result<RasterPage>> {
        stream::unfold(self, |mut pages| async move {
            let page = pages.next_page().await?;
            Some((page, pages))
        })
        .boxed()
    }
}

impl Drop for RasterPages {
    fn drop(&mut self) {
        if let Some(tmpdir) = self.tmpdir.take() {
            let tmpdir_path = tmpdir.path().to_owned();
            if let Err(err) = tmpdir.close() {
                error!(
                    directory = ?tmpdir_path.display(),
                    "failed to delete temporary directory: {}",
                    err
                );
            }
        }
    }
}

/// Read a rendered page, and delete it to recover disk space early.
async fn read_and_remove(path: &Path) -> Result<Vec<u8>> {
    let data = fs::read(path)
        .await
        .with_context(|| format!("failed to read file {:?}", path.display()))?;
    fs::remove_file(path)
        .await
        .with_context(|| format!("failed to delete file {:?}", path.display()))?;
    Ok(data)
}

/// Figure out what kind of document we have.
///
/// We trust the declared media type when there is one, because that's what
/// the caller told us. Otherwise we sniff the bytes.
pub fn resolve_media_type(declared: &str, data: &[u8]) -> Result<String> {
    let declared = declared.trim();
    let media_type = if UNKNOWN_MEDIA_TYPES.contains(&declared) {
        infer::get(data)
            .map(|kind| kind.mime_type().to_owned())
            .ok_or_else(|| anyhow!("cannot determine the type of this document"))?
    } else {
        declared.to_ascii_lowercase()
    };
    if media_type == PDF_MIME_TYPE || SUPPORTED_IMAGE_TYPES.contains(&media_type.as_str())
    {
        Ok(media_type)
    } else {
        Err(anyhow!(
            "unsupported media type {} (supported: PDF, PNG, JPEG, WebP, GIF)",
            media_type
        ))
    }
}

/// Rasterize a document.
#[instrument(level = "debug", skip_all, fields(media_type = %media_type, len = data.len()))]
pub async fn rasterize(
    data: Vec<u8>,
    media_type: &str,
    opts: &RasterizeOpts,
) -> Result<RasterPages> {
    let media_type = resolve_media_type(media_type, &data)?;
    if media_type == PDF_MIME_TYPE {
        rasterize_pdf(&data, opts).await
    } else {
        Ok(RasterPages::single_image(media_type, data))
    }
}

/// Render each page of a PDF to PNG.
#[instrument(level = "debug", skip_all, fields(dpi = opts.dpi()))]
async fn rasterize_pdf(data: &[u8], opts: &RasterizeOpts) -> Result<RasterPages> {
    let tmpdir = tempfile::TempDir::with_prefix("docket-pages")?;
    let input_path = tmpdir.path().join("input.pdf");
    fs::write(&input_path, data)
        .await
        .context("failed to write PDF to temporary directory")?;

    let total_pages = get_pdf_page_count(&input_path).await?;
    if total_pages == 0 {
        return Err(anyhow!("PDF has no pages"));
    }
    let page_count = match opts.max_pages {
        Some(max_pages) if max_pages < total_pages => {
            warn!(
                total_pages,
                max_pages, "Only rendering the first pages of the document"
            );
            max_pages
        }
        _ => total_pages,
    };

    // `pdftocairo` names its output `page-1.png`, `page-01.png`, etc.,
    // zero-padded to the width of the last page number, so sorting by name
    // gives us page order.
    let pages_dir = tmpdir.path().join("pages");
    fs::create_dir(&pages_dir)
        .await
        .context("failed to create page directory")?;
    let mut cmd = Command::new("pdftocairo");
    cmd.arg("-png")
        .arg("-r")
        .arg(opts.dpi().to_string())
        .arg("-l")
        .arg(page_count.to_string())
        .arg(&input_path)
        .arg(pages_dir.join("page"));
    let output = with_cpu_semaphore(|| async move {
        cmd.output().await.context("failed to run pdftocairo")
    })
    .await?;
    check_for_command_failure("pdftocairo", &output, Some(is_error_line))?;

    let rendered = list_rendered_pages(&pages_dir).await?;
    if rendered.len() < page_count {
        return Err(anyhow!(
            "page {} of {} could not be rendered",
            rendered.len() + 1,
            page_count
        ));
    }
    debug!(page_count, "Rendered PDF pages");

    Ok(RasterPages {
        tmpdir: Some(tmpdir),
        mime_type: "image/png".to_owned(),
        pending: rendered
            .into_iter()
            .map(PendingPage::Rendered)
            .collect::<Vec<_>>()
            .into_iter(),
        page_count,
        next_page_index: 1,
    })
}

/// List the PNG files in `dir`, sorted by name.
async fn list_rendered_pages(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("failed to read directory {:?}", dir.display()))?;
    let mut paths = vec![];
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("failed to read entry in {:?}", dir.display()))?
    {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "png") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Get the number of pages in a PDF file using `pdfinfo`.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn get_pdf_page_count(path: &Path) -> Result<usize> {
    let output = Command::new("pdfinfo")
        .arg(path)
        .output()
        .await
        .context("failed to run pdfinfo")?;
    check_for_command_failure("pdfinfo", &output, None)?;
    let output =
        String::from_utf8(output.stdout).context("pdfinfo output was not valid UTF-8")?;
    parse_pdfinfo_page_count(&output)
}

/// Parse the `Pages:` line out of `pdfinfo` output.
fn parse_pdfinfo_page_count(output: &str) -> Result<usize> {
    let properties = output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect::<BTreeMap<_, _>>();
    let pages = properties
        .get("Pages")
        .ok_or_else(|| anyhow!("failed to find page count in pdfinfo output"))?;
    pages
        .parse::<usize>()
        .with_context(|| format!("failed to parse page count {:?}", pages))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The first bytes of a PNG file.
    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    static TEST_PDF_PATH: &str = "tests/fixtures/two_pages.pdf";

    #[test]
    fn is_error_line_skips_recoverable_errors() {
        assert!(is_error_line("Syntax Error: Couldn't read page 3"));
        assert!(!is_error_line("Syntax Warning: something is odd"));
        assert!(!is_error_line(
            "Internal Error: xref num 1234 not found but needed, try to reconstruct"
        ));
    }

    #[test]
    fn dpi_follows_scale() {
        assert_eq!(RasterizeOpts::default().dpi(), 144);
        let opts = RasterizeOpts {
            scale: 1.0,
            max_pages: None,
        };
        assert_eq!(opts.dpi(), 72);
    }

    #[derive(Debug, clap::Parser)]
    struct TestCli {
        #[clap(flatten)]
        rasterize: RasterizeOpts,
    }

    #[test]
    fn max_pages_must_be_positive() {
        use clap::Parser as _;

        let opts = TestCli::try_parse_from(["test", "--max-pages", "3"]).unwrap();
        assert_eq!(opts.rasterize.max_pages, Some(3));
        assert!(TestCli::try_parse_from(["test", "--max-pages", "0"]).is_err());
        assert!(TestCli::try_parse_from(["test", "--max-pages", "-1"]).is_err());
        let opts = TestCli::try_parse_from(["test"]).unwrap();
        assert_eq!(opts.rasterize.max_pages, None);
    }

    #[test]
    fn declared_media_type_wins() -> Result<()> {
        assert_eq!(resolve_media_type("image/JPEG", b"whatever")?, "image/jpeg");
        assert_eq!(resolve_media_type("application/pdf", b"")?, PDF_MIME_TYPE);
        Ok(())
    }

    #[test]
    fn unknown_media_type_is_sniffed() -> Result<()> {
        assert_eq!(resolve_media_type("", PNG_MAGIC)?, "image/png");
        assert_eq!(
            resolve_media_type("application/octet-stream", b"%PDF-1.4\n")?,
            PDF_MIME_TYPE
        );
        Ok(())
    }

    #[test]
    fn unsupported_media_types_are_rejected() {
        assert!(resolve_media_type("text/plain", b"hello").is_err());
        assert!(resolve_media_type("", b"just some text").is_err());
    }

    #[test]
    fn parses_pdfinfo_output() -> Result<()> {
        let output = "Title:          Example\nPages:          12\nEncrypted:      no\n";
        assert_eq!(parse_pdfinfo_page_count(output)?, 12);
        assert!(parse_pdfinfo_page_count("Title: nothing\n").is_err());
        Ok(())
    }

    #[tokio::test]
    async fn single_image_is_passed_through() -> Result<()> {
        let pages = rasterize(PNG_MAGIC.to_vec(), "image/png", &RasterizeOpts::default())
            .await?;
        assert_eq!(pages.page_count(), 1);
        let pages = pages.into_stream().collect::<Vec<_>>().await;
        assert_eq!(pages.len(), 1);
        let page = pages.into_iter().next().unwrap()?;
        assert_eq!(page.page_index, 1);
        assert_eq!(page.mime_type, "image/png");
        assert_eq!(page.data, PNG_MAGIC);
        Ok(())
    }

    #[tokio::test]
    #[ignore = "Requires poppler-utils to be installed"]
    async fn pdf_pages_are_rendered_in_order() -> Result<()> {
        let data = std::fs::read(TEST_PDF_PATH)?;
        let pages = rasterize(data, PDF_MIME_TYPE, &RasterizeOpts::default()).await?;
        assert_eq!(pages.page_count(), 2);
        let pages = pages
            .into_stream()
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?;
        let indices = pages.iter().map(|p| p.page_index).collect::<Vec<_>>();
        assert_eq!(indices, vec![1, 2]);
        assert!(pages.iter().all(|p| p.data.starts_with(b"\x89PNG")));
        Ok(())
    }

    #[tokio::test]
    #[ignore = "Requires poppler-utils to be installed"]
    async fn pdf_obeys_max_pages() -> Result<()> {
        let data = std::fs::read(TEST_PDF_PATH)?;
        let opts = RasterizeOpts {
            scale: 1.0,
            max_pages: Some(1),
        };
        let pages = rasterize(data, PDF_MIME_TYPE, &opts).await?;
        assert_eq!(pages.page_count(), 1);
        Ok(())
    }

    #[tokio::test]
    #[ignore = "Requires poppler-utils to be installed"]
    async fn corrupt_pdf_fails() {
        let result = rasterize(
            b"%PDF-1.4\nthis is not really a PDF".to_vec(),
            PDF_MIME_TYPE,
            &RasterizeOpts::default(),
        )
        .await;
        assert!(result.is_err());
    }
}
