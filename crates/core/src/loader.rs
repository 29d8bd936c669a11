use crate::chunking::{build_chunks, normalize_whitespace, ChunkingConfig};
use crate::error::LoadError;
use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::models::{Chunk, ChunkMetadata, ContentType, IngestionOptions};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

/// Turns one file into an ordered sequence of chunks, dispatching on the
/// file's content type. Loading is a pure read.
#[derive(Clone)]
pub struct DocumentLoader {
    options: IngestionOptions,
    extractor: Arc<dyn PdfExtractor>,
}

impl DocumentLoader {
    pub fn new(options: IngestionOptions) -> Self {
        Self::with_extractor(options, Arc::new(LopdfExtractor))
    }

    pub fn with_extractor(options: IngestionOptions, extractor: Arc<dyn PdfExtractor>) -> Self {
        Self { options, extractor }
    }

    pub fn options(&self) -> &IngestionOptions {
        &self.options
    }

    pub fn load(&self, path: &Path) -> Result<Vec<Chunk>, LoadError> {
        let config = ChunkingConfig::from(&self.options);
        config.validate()?;

        if !self.options.is_supported(path) {
            return Err(LoadError::Unsupported(path.to_path_buf()));
        }
        if !path.is_file() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }

        let source = document_name(path)?;
        let chunks = match ContentType::from_path(path) {
            ContentType::Tabular => load_rows(path, &source)?,
            ContentType::Pdf => self.load_pages(path, &source, config)?,
            ContentType::Text => load_text(path, &source, config)?,
        };

        if chunks.is_empty() {
            return Err(LoadError::Empty(path.to_path_buf()));
        }

        Ok(chunks)
    }

    fn load_pages(
        &self,
        path: &Path,
        source: &str,
        config: ChunkingConfig,
    ) -> Result<Vec<Chunk>, LoadError> {
        let mut chunks = Vec::new();
        let mut cursor = 0u64;

        for page in self.extractor.extract_pages(path)? {
            let (page_chunks, next_cursor) = build_chunks(
                source,
                ContentType::Pdf,
                Some(page.number),
                &page.text,
                config,
                cursor,
            );
            cursor = next_cursor;
            chunks.extend(page_chunks);
        }

        Ok(chunks)
    }
}

/// The identifier recorded as `metadata.source`: the file name.
pub fn document_name(path: &Path) -> Result<String, LoadError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| LoadError::Unsupported(path.to_path_buf()))
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, LoadError> {
    fs::read(path).map_err(|source| match source.kind() {
        ErrorKind::NotFound => LoadError::NotFound(path.to_path_buf()),
        _ => LoadError::Io {
            path: path.to_path_buf(),
            source,
        },
    })
}

fn load_text(path: &Path, source: &str, config: ChunkingConfig) -> Result<Vec<Chunk>, LoadError> {
    let bytes = read_bytes(path)?;
    let text = String::from_utf8(bytes).map_err(|error| LoadError::Corrupt {
        path: path.to_path_buf(),
        details: format!("not valid utf-8: {error}"),
    })?;

    if text.trim().is_empty() {
        return Err(LoadError::Empty(path.to_path_buf()));
    }

    Ok(build_chunks(source, ContentType::Text, None, &text, config, 0).0)
}

/// One chunk per data row, each rendered as `header: value` lines so the row
/// carries its own column context.
fn load_rows(path: &Path, source: &str) -> Result<Vec<Chunk>, LoadError> {
    let bytes = read_bytes(path)?;
    let corrupt = |error: csv::Error| LoadError::Corrupt {
        path: path.to_path_buf(),
        details: error.to_string(),
    };

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes.as_slice());
    let headers = reader.headers().map_err(corrupt)?.clone();

    let mut chunks = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.map_err(corrupt)?;
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }

        let content = record
            .iter()
            .enumerate()
            .map(|(column, value)| {
                let header = headers
                    .get(column)
                    .map(str::trim)
                    .filter(|header| !header.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("column_{}", column + 1));
                format!("{header}: {}", normalize_whitespace(value))
            })
            .collect::<Vec<_>>()
            .join("\n");

        chunks.push(Chunk {
            content,
            metadata: ChunkMetadata {
                source: source.to_string(),
                page: None,
                row: Some(row as u64),
                content_type: ContentType::Tabular,
                chunk_index: chunks.len() as u64,
            },
        });
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::PageText;
    use std::path::PathBuf;
    use tempfile::tempdir;

    struct FakePages(Vec<PageText>);

    impl PdfExtractor for FakePages {
        fn extract_pages(&self, _path: &Path) -> Result<Vec<PageText>, LoadError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn csv_yields_one_chunk_per_row_with_header_context() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("a.csv");
        fs::write(&path, "name,price\nbolt,0.10\nnut,0.05\nwasher,0.02\n")?;

        let chunks = DocumentLoader::new(IngestionOptions::default()).load(&path)?;

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].content, "name: bolt\nprice: 0.10");
        assert_eq!(chunks[2].metadata.row, Some(2));
        assert!(chunks.iter().all(|chunk| chunk.metadata.source == "a.csv"));
        Ok(())
    }

    #[test]
    fn pdf_pages_are_split_page_wise() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("doc.pdf");
        fs::write(&path, b"%PDF-1.4")?;

        let extractor = FakePages(vec![
            PageText {
                number: 1,
                text: "Intro page".to_string(),
            },
            PageText {
                number: 3,
                text: "Appendix".to_string(),
            },
        ]);
        let loader = DocumentLoader::with_extractor(IngestionOptions::default(), Arc::new(extractor));
        let chunks = loader.load(&path)?;

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].metadata.page, Some(1));
        assert_eq!(chunks[1].metadata.page, Some(3));
        assert_eq!(chunks[1].metadata.chunk_index, 1);
        assert!(chunks.iter().all(|chunk| chunk.metadata.source == "doc.pdf"));
        Ok(())
    }

    #[test]
    fn text_is_split_with_configured_splitter() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("notes.txt");
        fs::write(&path, "alpha beta\n\ngamma delta")?;

        let options = IngestionOptions {
            chunk_max_chars: 12,
            chunk_overlap_chars: 2,
            ..IngestionOptions::default()
        };
        let chunks = DocumentLoader::new(options).load(&path)?;

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].content, "gamma delta");
        assert_eq!(chunks[1].metadata.content_type, ContentType::Text);
        Ok(())
    }

    #[test]
    fn empty_file_is_a_load_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("blank.txt");
        fs::write(&path, "  \n\n ")?;

        let error = DocumentLoader::new(IngestionOptions::default())
            .load(&path)
            .expect_err("blank file must fail");
        assert!(matches!(error, LoadError::Empty(_)));
        assert_eq!(error.path(), Some(path.as_path()));
        Ok(())
    }

    #[test]
    fn unknown_extension_and_missing_file_fail() {
        let loader = DocumentLoader::new(IngestionOptions::default());

        let unsupported = loader.load(Path::new("/tmp/archive.zip"));
        assert!(matches!(unsupported, Err(LoadError::Unsupported(_))));

        let missing = loader.load(&PathBuf::from("/definitely/not/here.txt"));
        assert!(matches!(missing, Err(LoadError::NotFound(_))));
    }

    #[test]
    fn invalid_utf8_is_corrupt() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("binary.txt");
        fs::write(&path, [0xff, 0xfe, 0x00, 0x41])?;

        let error = DocumentLoader::new(IngestionOptions::default())
            .load(&path)
            .expect_err("invalid utf-8 must fail");
        assert!(matches!(error, LoadError::Corrupt { .. }));
        Ok(())
    }
}
