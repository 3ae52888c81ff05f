use crate::error::IngestError;
use crate::models::{ChunkMetadata, ChunkRecord};
use std::collections::BTreeMap;
use std::path::Path;

/// Stable document key: the file's basename.
pub fn document_id(path: &Path) -> Result<String, IngestError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))
}

/// Flattens per-page chunks into records, pages ascending, chunks in split order.
pub fn tag_page_chunks(
    page_chunks: &BTreeMap<u32, Vec<String>>,
    source: &Path,
) -> Result<Vec<ChunkRecord>, IngestError> {
    let document_id = document_id(source)?;

    Ok(page_chunks
        .iter()
        .flat_map(|(page, chunks)| {
            let document_id = document_id.clone();
            chunks.iter().map(move |text| ChunkRecord {
                text: text.clone(),
                metadata: ChunkMetadata {
                    page: *page,
                    document_id: document_id.clone(),
                },
            })
        })
        .collect())
}
