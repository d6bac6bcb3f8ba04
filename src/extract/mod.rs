use std::{
    io::{Cursor, Read},
    time::Duration,
};

use pdf_extract::extract_text_from_mem as extract_pdf_text;
use quick_xml::{Reader as XmlReader, events::Event};
use tokio::{task, time::timeout};
use zip::ZipArchive;

use crate::{error::ExtractError, storage::BlobStore};

#[derive(Debug, Clone, Copy)]
enum Format {
    Pdf,
    Docx,
    PlainText,
}

fn format_for_extension(extension: &str) -> Option<Format> {
    match extension {
        "pdf" => Some(Format::Pdf),
        "docx" => Some(Format::Docx),
        "txt" | "md" => Some(Format::PlainText),
        _ => None,
    }
}

/// Converts a stored document into plain text, dispatching on the declared
/// file extension.
#[derive(Debug, Clone, Copy)]
pub struct Extractor {
    download_timeout: Duration,
}

impl Extractor {
    pub fn new(download_timeout: Duration) -> Self {
        Self { download_timeout }
    }

    /// Unknown extensions fail before any network call is made. Downloads
    /// are bounded by the configured timeout, and parsing runs on the
    /// blocking pool since the PDF and DOCX decoders are CPU-bound.
    pub async fn extract(
        &self,
        store: &dyn BlobStore,
        reference: &str,
        extension: &str,
    ) -> Result<String, ExtractError> {
        let extension = extension.to_lowercase();
        let format = format_for_extension(&extension)
            .ok_or(ExtractError::UnsupportedFormat(extension))?;

        let bytes = timeout(self.download_timeout, store.fetch(reference))
            .await
            .map_err(|_| ExtractError::DownloadFailed("download timed out".to_string()))?
            .map_err(|err| ExtractError::DownloadFailed(err.to_string()))?;

        if bytes.is_empty() {
            return Err(ExtractError::CorruptedOrProtected);
        }

        let text = task::spawn_blocking(move || parse_bytes(format, &bytes))
            .await
            .map_err(|_| ExtractError::CorruptedOrProtected)??;

        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(ExtractError::NoExtractableText);
        }

        Ok(text)
    }
}

fn parse_bytes(format: Format, bytes: &[u8]) -> Result<String, ExtractError> {
    match format {
        Format::PlainText => Ok(String::from_utf8_lossy(bytes).into_owned()),
        Format::Pdf => extract_pdf_text(bytes).map_err(|_| ExtractError::CorruptedOrProtected),
        Format::Docx => extract_docx_text(bytes),
    }
}

/// Walks `word/document.xml` inside the DOCX archive, emitting paragraph
/// breaks for `w:p`, tabs and line breaks for `w:tab`/`w:br`, and the text
/// of `w:t` nodes.
fn extract_docx_text(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|_| ExtractError::CorruptedOrProtected)?;

    let mut document = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::CorruptedOrProtected)?;

    let mut xml = String::new();
    document
        .read_to_string(&mut xml)
        .map_err(|_| ExtractError::CorruptedOrProtected)?;

    let mut reader = XmlReader::from_str(&xml);
    let mut buf = Vec::new();
    let mut output = String::new();
    let mut in_text_node = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"w:p" => {
                    if !output.is_empty() {
                        output.push_str("\n\n");
                    }
                }
                b"w:tab" => output.push('\t'),
                b"w:br" => output.push('\n'),
                b"w:t" => in_text_node = true,
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"w:p" => {
                    if !output.is_empty() {
                        output.push_str("\n\n");
                    }
                }
                b"w:tab" => output.push('\t'),
                b"w:br" => output.push('\n'),
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_text_node {
                    let value = e
                        .unescape()
                        .map_err(|_| ExtractError::CorruptedOrProtected)?
                        .into_owned();
                    output.push_str(&value);
                }
            }
            Ok(Event::End(ref e)) => {
                if e.name().as_ref() == b"w:t" {
                    in_text_node = false;
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return Err(ExtractError::CorruptedOrProtected),
            _ => {}
        }
        buf.clear();
    }

    Ok(output.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io::Write,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use anyhow::Result;
    use async_trait::async_trait;
    use zip::write::SimpleFileOptions;

    use crate::storage::StoredBlob;

    struct FixtureStore {
        bytes: Vec<u8>,
        fetches: AtomicUsize,
    }

    impl FixtureStore {
        fn new(bytes: Vec<u8>) -> Self {
            Self {
                bytes,
                fetches: AtomicUsize::new(0),
            }
        }

        fn fetch_count(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BlobStore for FixtureStore {
        async fn store(&self, _bytes: &[u8], _extension: &str) -> Result<StoredBlob> {
            unimplemented!("not used by extractor tests")
        }

        async fn fetch(&self, _reference: &str) -> Result<Vec<u8>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.bytes.clone())
        }

        async fn delete(&self, _reference: &str) -> Result<()> {
            Ok(())
        }
    }

    fn extractor() -> Extractor {
        Extractor::new(Duration::from_secs(30))
    }

    fn docx_fixture() -> Vec<u8> {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:r><w:t>Hello</w:t></w:r></w:p>
    <w:p><w:r><w:t>World</w:t></w:r></w:p>
  </w:body>
</w:document>"#;

        let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file("word/document.xml", SimpleFileOptions::default())
            .expect("zip start file");
        zip.write_all(xml.as_bytes()).expect("write xml");
        zip.finish().expect("finish zip").into_inner()
    }

    #[tokio::test]
    async fn unknown_extension_fails_without_fetching() {
        let store = FixtureStore::new(b"irrelevant".to_vec());
        let err = extractor()
            .extract(&store, "ref", "xlsx")
            .await
            .expect_err("should reject extension");
        assert!(matches!(err, ExtractError::UnsupportedFormat(ext) if ext == "xlsx"));
        assert_eq!(store.fetch_count(), 0);
    }

    #[tokio::test]
    async fn legacy_doc_is_unsupported() {
        let store = FixtureStore::new(b"irrelevant".to_vec());
        let err = extractor()
            .extract(&store, "ref", "doc")
            .await
            .expect_err("should reject extension");
        assert!(matches!(err, ExtractError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn zero_byte_download_is_corrupted() {
        let store = FixtureStore::new(Vec::new());
        let err = extractor()
            .extract(&store, "ref", "pdf")
            .await
            .expect_err("should reject empty blob");
        assert!(matches!(err, ExtractError::CorruptedOrProtected));
        assert_eq!(store.fetch_count(), 1);
    }

    #[tokio::test]
    async fn plain_text_round_trips() {
        let store = FixtureStore::new(b"  a small note\n".to_vec());
        let text = extractor()
            .extract(&store, "ref", "txt")
            .await
            .expect("extract text");
        assert_eq!(text, "a small note");
    }

    #[tokio::test]
    async fn whitespace_only_text_has_no_extractable_text() {
        let store = FixtureStore::new(b"   \n\t\n  ".to_vec());
        let err = extractor()
            .extract(&store, "ref", "txt")
            .await
            .expect_err("should reject blank document");
        assert!(matches!(err, ExtractError::NoExtractableText));
    }

    #[tokio::test]
    async fn docx_extraction_returns_plain_text() {
        let store = FixtureStore::new(docx_fixture());
        let text = extractor()
            .extract(&store, "ref", "docx")
            .await
            .expect("extract docx");
        assert_eq!(text, "Hello\n\nWorld");
    }

    #[tokio::test]
    async fn garbage_docx_is_corrupted() {
        let store = FixtureStore::new(b"not a zip archive".to_vec());
        let err = extractor()
            .extract(&store, "ref", "docx")
            .await
            .expect_err("should reject garbage");
        assert!(matches!(err, ExtractError::CorruptedOrProtected));
    }

    #[tokio::test]
    async fn uppercase_extension_still_dispatches() {
        let store = FixtureStore::new(b"note".to_vec());
        let text = extractor()
            .extract(&store, "ref", "TXT")
            .await
            .expect("extract text");
        assert_eq!(text, "note");
    }

    #[test]
    fn extension_dispatch_table() {
        assert!(format_for_extension("pdf").is_some());
        assert!(format_for_extension("md").is_some());
        assert!(format_for_extension("exe").is_none());
    }
}
