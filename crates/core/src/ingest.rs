use crate::chunking::{chunk_pages, ChunkingConfig};
use crate::cleaning::TextCleaner;
use crate::collector::{document_id, tag_page_chunks};
use crate::embeddings::Embedder;
use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::guard::{DuplicateGuard, GuardStrategy};
use crate::traits::VectorStore;
use crate::writer::Writer;
use crate::{DocumentFingerprint, IngestError, IngestionOptions};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

#[derive(Debug, Clone)]
pub struct IndexedDocument {
    pub fingerprint: DocumentFingerprint,
    pub chunk_count: usize,
}

#[derive(Debug, Clone)]
pub enum DocumentOutcome {
    AlreadyIndexed { document_id: String },
    Indexed(IndexedDocument),
}

#[derive(Debug, Clone)]
pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct IngestionReport {
    pub indexed: Vec<IndexedDocument>,
    pub already_indexed: Vec<PathBuf>,
    pub skipped_files: Vec<SkippedPdf>,
}

impl IngestionReport {
    pub fn chunk_count(&self) -> usize {
        self.indexed.iter().map(|document| document.chunk_count).sum()
    }
}

/// Extract, clean, chunk, tag, embed and store, one document at a time.
pub struct IngestionPipeline<'a, S: ?Sized, E: ?Sized> {
    store: &'a S,
    collection: String,
    guard: DuplicateGuard<'a, S>,
    writer: Writer<'a, S, E>,
    extractor: Box<dyn PdfExtractor + Send + Sync>,
    cleaner: TextCleaner,
    chunking: ChunkingConfig,
}

impl<'a, S, E> IngestionPipeline<'a, S, E>
where
    S: VectorStore + ?Sized,
    E: Embedder + ?Sized,
{
    /// Fails on invalid chunking parameters before touching any file.
    pub fn new(
        store: &'a S,
        embedder: &'a E,
        collection: impl Into<String>,
        options: &IngestionOptions,
    ) -> Result<Self, IngestError> {
        let collection = collection.into();
        let chunking = ChunkingConfig::try_from(options)?;
        let cleaner = TextCleaner::new(options.max_page_chars)?;

        Ok(Self {
            store,
            guard: DuplicateGuard::new(store, GuardStrategy::default()),
            writer: Writer::new(store, embedder, collection.clone())
                .with_batch_size(options.embed_batch_size),
            extractor: Box::new(LopdfExtractor {
                margin: options.header_footer_margin,
            }),
            cleaner,
            chunking,
            collection,
        })
    }

    pub fn with_guard(mut self, strategy: GuardStrategy) -> Self {
        self.guard = DuplicateGuard::new(self.store, strategy);
        self
    }

    pub fn with_extractor(mut self, extractor: impl PdfExtractor + Send + Sync + 'static) -> Self {
        self.extractor = Box::new(extractor);
        self
    }

    pub async fn ingest_document(&self, path: &Path) -> Result<DocumentOutcome, IngestError> {
        let document_id = document_id(path)?;
        if self.guard.is_indexed(&self.collection, &document_id).await {
            info!(document_id, collection = %self.collection, "document already indexed, skipping");
            return Ok(DocumentOutcome::AlreadyIndexed { document_id });
        }

        let pages = self.extractor.extract_pages(path)?;
        let checksum = digest_file(path).map_err(|error| IngestError::DocumentUnreadable {
            path: path.display().to_string(),
            reason: error.to_string(),
        })?;
        let page_count = pages.len();
        let pages = self.cleaner.clean_pages(pages);
        let page_chunks = chunk_pages(&pages, self.chunking);
        let records = tag_page_chunks(&page_chunks, path)?;
        let chunk_count = self.writer.write(&records).await?;

        info!(document_id, pages = page_count, chunks = chunk_count, "indexed document");
        Ok(DocumentOutcome::Indexed(IndexedDocument {
            fingerprint: DocumentFingerprint {
                document_id,
                source_path: path.to_string_lossy().to_string(),
                checksum,
                page_count,
                ingested_at: Utc::now(),
            },
            chunk_count,
        }))
    }

    /// Ingests a single file or every PDF under a directory.
    ///
    /// Per-document failures are logged and reported, never fatal.
    pub async fn ingest_path(&self, path: &Path) -> Result<IngestionReport, IngestError> {
        let files = if path.is_dir() {
            discover_pdf_files(path)
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            return Err(IngestError::InvalidArgument(format!(
                "{} does not exist",
                path.display()
            )));
        };

        if files.is_empty() {
            return Err(IngestError::InvalidArgument(format!(
                "no pdf files found in {}",
                path.display()
            )));
        }

        let mut report = IngestionReport::default();
        for file in files {
            match self.ingest_document(&file).await {
                Ok(DocumentOutcome::Indexed(document)) => report.indexed.push(document),
                Ok(DocumentOutcome::AlreadyIndexed { .. }) => report.already_indexed.push(file),
                Err(error) => {
                    warn!(path = %file.display(), %error, "skipping document");
                    report.skipped_files.push(SkippedPdf {
                        path: file,
                        reason: error.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::PageText;
    use crate::models::PageFilter;
    use crate::stores::LocalIndexStore;
    use crate::CharacterNgramEmbedder;
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    struct FixedPages(Vec<&'static str>);

    impl PdfExtractor for FixedPages {
        fn extract_pages(&self, _path: &Path) -> Result<Vec<PageText>, IngestError> {
            Ok(self
                .0
                .iter()
                .enumerate()
                .map(|(index, text)| PageText {
                    number: index as u32 + 1,
                    text: text.to_string(),
                })
                .collect())
        }
    }

    #[test]
    fn discover_pdf_files_is_recursive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        File::create(base.join("a.pdf")).and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(nested.join("b.PDF"))
            .and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        fs::write(base.join("notes.txt"), b"not a pdf")?;

        let files = discover_pdf_files(base);
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    fn checksum_is_reproducible() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let file_path = dir.path().join("a.pdf");
        fs::write(&file_path, b"abc")?;

        let first = digest_file(&file_path)?;
        let second = digest_file(&file_path)?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn invalid_chunking_is_rejected_up_front() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = LocalIndexStore::new(dir.path());
        let embedder = CharacterNgramEmbedder::default();
        let options = IngestionOptions {
            chunk_size: 100,
            chunk_overlap: 100,
            ..IngestionOptions::default()
        };

        let result = IngestionPipeline::new(&store, &embedder, "docs", &options);
        assert!(matches!(result, Err(IngestError::InvalidChunkingParameters(_))));
        Ok(())
    }

    #[tokio::test]
    async fn second_ingest_is_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let pdf = dir.path().join("q3.pdf");
        fs::write(&pdf, b"%PDF-1.4\n%stub")?;
        let store = LocalIndexStore::new(dir.path().join("index"));
        let embedder = CharacterNgramEmbedder::default();
        let pipeline =
            IngestionPipeline::new(&store, &embedder, "docs", &IngestionOptions::default())?
                .with_extractor(FixedPages(vec![
                    "Revenue grew 12% year over year.",
                    "",
                    "Costs fell 3%.",
                ]));

        let first = pipeline.ingest_document(&pdf).await?;
        let DocumentOutcome::Indexed(document) = first else {
            panic!("expected the first ingest to index the document");
        };
        assert_eq!(document.chunk_count, 2);
        assert_eq!(document.fingerprint.page_count, 3);
        assert_eq!(document.fingerprint.document_id, "q3.pdf");

        let second = pipeline.ingest_document(&pdf).await?;
        assert!(matches!(second, DocumentOutcome::AlreadyIndexed { .. }));
        assert_eq!(store.count_document("docs", "q3.pdf", PageFilter::All).await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn page_window_guard_misses_front_matter() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let pdf = dir.path().join("short.pdf");
        fs::write(&pdf, b"%PDF-1.4\n%stub")?;
        let store = LocalIndexStore::new(dir.path().join("index"));
        let embedder = CharacterNgramEmbedder::default();
        let pipeline =
            IngestionPipeline::new(&store, &embedder, "docs", &IngestionOptions::default())?
                .with_extractor(FixedPages(vec!["Only the first page has text."]))
                .with_guard(GuardStrategy::MIDDLE_PAGES);

        pipeline.ingest_document(&pdf).await?;
        let again = pipeline.ingest_document(&pdf).await?;

        assert!(matches!(again, DocumentOutcome::Indexed(_)));
        assert_eq!(store.count_document("docs", "short.pdf", PageFilter::All).await?, 2);
        Ok(())
    }

    #[tokio::test]
    async fn missing_files_are_unreadable() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let gone = dir.path().join("gone.pdf");
        let store = LocalIndexStore::new(dir.path().join("index"));
        let embedder = CharacterNgramEmbedder::default();

        let pdf_pipeline =
            IngestionPipeline::new(&store, &embedder, "docs", &IngestionOptions::default())?;
        let result = pdf_pipeline.ingest_document(&gone).await;
        assert!(matches!(result, Err(IngestError::DocumentUnreadable { .. })));

        let fixed_pipeline =
            IngestionPipeline::new(&store, &embedder, "docs", &IngestionOptions::default())?
                .with_extractor(FixedPages(vec!["Text that outlived its file."]));
        let result = fixed_pipeline.ingest_document(&gone).await;
        assert!(matches!(result, Err(IngestError::DocumentUnreadable { .. })));
        assert!(!store.collection_exists("docs").await?);
        Ok(())
    }

    #[tokio::test]
    async fn ingestion_fails_without_pdfs() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = LocalIndexStore::new(dir.path().join("index"));
        let embedder = CharacterNgramEmbedder::default();
        let pipeline =
            IngestionPipeline::new(&store, &embedder, "docs", &IngestionOptions::default())?;

        let result = pipeline.ingest_path(dir.path()).await;
        assert!(matches!(result, Err(IngestError::InvalidArgument(_))));
        Ok(())
    }

    #[tokio::test]
    async fn best_effort_skips_unreadable_pdfs() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let docs = dir.path().join("docs");
        fs::create_dir(&docs)?;
        fs::write(docs.join("unreadable.pdf"), b"%PDF-1.4\n%broken")?;
        let store = LocalIndexStore::new(dir.path().join("index"));
        let embedder = CharacterNgramEmbedder::default();
        let pipeline =
            IngestionPipeline::new(&store, &embedder, "docs", &IngestionOptions::default())?;

        let report = pipeline.ingest_path(&docs).await?;

        assert!(report.indexed.is_empty());
        assert_eq!(report.chunk_count(), 0);
        assert_eq!(report.skipped_files.len(), 1);
        assert_eq!(
            report.skipped_files[0]
                .path
                .file_name()
                .and_then(|name| name.to_str()),
            Some("unreadable.pdf")
        );
        Ok(())
    }
}
