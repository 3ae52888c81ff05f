use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use pdf_qa_core::{
    CharacterNgramEmbedder, DocumentOutcome, IngestionOptions, IngestionPipeline, LanguageModel,
    LanguageModelError, LocalIndexStore, QaService, QaSession, Retriever, VectorStore, Writer,
    NOT_IN_CONTEXT,
};
use std::path::Path;
use tempfile::tempdir;

const COLLECTION: &str = "pdf_embeddings";

fn text_at(y: i64, text: &str) -> Vec<Operation> {
    vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec![Object::Name(b"F1".to_vec()), Object::Integer(12)]),
        Operation::new("Td", vec![Object::Integer(72), Object::Integer(y)]),
        Operation::new("Tj", vec![Object::string_literal(text)]),
        Operation::new("ET", vec![]),
    ]
}

fn write_pdf(path: &Path, pages: &[Vec<Operation>]) -> Result<(), Box<dyn std::error::Error>> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids = Vec::new();
    for operations in pages {
        let content = Content {
            operations: operations.clone(),
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(612),
                Object::Integer(792),
            ],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path)?;
    Ok(())
}

fn manual_pages() -> Vec<Vec<Operation>> {
    let mut first = text_at(770, "ACME CONFIDENTIAL");
    first.extend(text_at(600, "The hydraulic pump operates at three thousand rpm."));
    first.extend(text_at(20, "Page 1 of 2"));

    let mut second = text_at(600, "Vacation requests are filed through the staff portal.");
    second.extend(text_at(20, "Page 2 of 2"));

    vec![first, second]
}

/// Answers only when every long word of the question appears in the context.
struct ContextBoundModel;

#[async_trait]
impl LanguageModel for ContextBoundModel {
    async fn complete(&self, prompt: &str) -> Result<String, LanguageModelError> {
        let lowered = prompt.to_lowercase();
        let (context, question) = lowered
            .split_once("question:")
            .ok_or_else(|| LanguageModelError::InvalidResponse("prompt has no question".into()))?;

        let grounded = question
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| word.len() >= 7)
            .all(|word| context.contains(word));

        Ok(if grounded {
            "The pump operates at three thousand rpm.".to_string()
        } else {
            NOT_IN_CONTEXT.to_string()
        })
    }
}

#[tokio::test]
async fn ingest_then_answer_from_a_real_pdf() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let pdf = dir.path().join("manual.pdf");
    write_pdf(&pdf, &manual_pages())?;

    let store = LocalIndexStore::new(dir.path().join("index"));
    let embedder = CharacterNgramEmbedder::default();
    assert!(!store.collection_exists(COLLECTION).await?);

    let pipeline =
        IngestionPipeline::new(&store, &embedder, COLLECTION, &IngestionOptions::default())?;
    let report = pipeline.ingest_path(dir.path()).await?;
    assert_eq!(report.indexed.len(), 1);
    assert_eq!(report.chunk_count(), 2);
    assert!(report.skipped_files.is_empty());

    let again = pipeline.ingest_document(&pdf).await?;
    assert!(matches!(again, DocumentOutcome::AlreadyIndexed { .. }));

    let retrieved = Retriever::new(&store, &embedder, COLLECTION)
        .search("hydraulic pump", 5)
        .await?;
    assert_eq!(retrieved.len(), 2);
    assert_eq!(retrieved.metadata[0].page, 1);
    assert_eq!(retrieved.metadata[0].document_id, "manual.pdf");
    assert!(retrieved.texts.iter().all(|text| !text.contains("CONFIDENTIAL")));
    assert!(retrieved.texts.iter().all(|text| !text.contains("of 2")));

    let service = QaService::new(&store, &embedder, &ContextBoundModel, COLLECTION);
    let mut session = QaSession::new();

    let grounded = session
        .ask(&service, "How fast does the hydraulic pump operate?", 20)
        .await?;
    assert_ne!(grounded.text, NOT_IN_CONTEXT);
    assert_eq!(grounded.sources.len(), 2);

    let off_topic = session
        .ask(&service, "Who painted the famous Mona Lisa portrait?", 20)
        .await?;
    assert_eq!(off_topic.text, NOT_IN_CONTEXT);
    assert_eq!(session.history().len(), 2);
    Ok(())
}

#[tokio::test]
async fn dropped_collection_no_longer_exists() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let pdf = dir.path().join("manual.pdf");
    write_pdf(&pdf, &manual_pages())?;

    let store = LocalIndexStore::new(dir.path().join("index"));
    let embedder = CharacterNgramEmbedder::default();
    IngestionPipeline::new(&store, &embedder, COLLECTION, &IngestionOptions::default())?
        .ingest_document(&pdf)
        .await?;
    assert!(store.collection_exists(COLLECTION).await?);

    Writer::new(&store, &embedder, COLLECTION)
        .drop_collection()
        .await?;
    assert!(!store.collection_exists(COLLECTION).await?);

    let reingested =
        IngestionPipeline::new(&store, &embedder, COLLECTION, &IngestionOptions::default())?
            .ingest_document(&pdf)
            .await?;
    assert!(matches!(reingested, DocumentOutcome::Indexed(_)));
    Ok(())
}
