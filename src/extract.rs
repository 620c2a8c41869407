//! Text extraction: turn files on disk into [`Document`]s.
//!
//! Paths may be files or directories. Directories are walked recursively
//! and filtered by [`DEFAULT_INCLUDE_GLOBS`]; the results are sorted by
//! relative path so the same tree always yields the same document order.
//!
//! | Extension | Extraction |
//! |-----------|------------|
//! | `.pdf` | `pdf-extract` |
//! | `.docx` | `w:t` runs of `word/document.xml` |
//! | `.pptx` | `a:t` runs of every slide, in slide order |
//! | `.xlsx` | shared-string cells of every worksheet |
//! | anything else | read as UTF-8 text |
//!
//! Extraction is best-effort per batch: every document that fails is
//! reported as an [`Error::Ingestion`] in [`IngestReport::failures`], and
//! the rest are returned. Only an upload in which nothing could be
//! extracted is an error ([`IngestReport::into_documents`]).

use std::collections::HashSet;
use std::io::Read;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use quick_xml::events::Event;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::models::Document;

pub const DEFAULT_INCLUDE_GLOBS: &[&str] = &[
    "**/*.pdf", "**/*.txt", "**/*.md", "**/*.docx", "**/*.pptx", "**/*.xlsx",
];

const EXCLUDE_GLOBS: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

const XLSX_MAX_SHEETS: usize = 100;
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Zip-bomb guard for a single decompressed XML part.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

type ZipArchive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Pdf,
    Docx,
    Pptx,
    Xlsx,
    Text,
}

impl ContentKind {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pdf" => ContentKind::Pdf,
            "docx" => ContentKind::Docx,
            "pptx" => ContentKind::Pptx,
            "xlsx" => ContentKind::Xlsx,
            _ => ContentKind::Text,
        }
    }
}

/// Outcome of loading a batch of paths.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub documents: Vec<Document>,
    /// One [`Error::Ingestion`] per document that could not be read.
    pub failures: Vec<Error>,
}

impl IngestReport {
    /// The extracted documents, or the first failure if none extracted.
    pub fn into_documents(self) -> Result<Vec<Document>> {
        if !self.documents.is_empty() {
            return Ok(self.documents);
        }
        Err(self
            .failures
            .into_iter()
            .next()
            .unwrap_or_else(|| Error::ingestion("(upload)", "no documents found")))
    }
}

/// Extract plain text from `bytes` of the given kind.
pub fn extract_text(bytes: &[u8], kind: ContentKind) -> std::result::Result<String, String> {
    match kind {
        ContentKind::Pdf => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| format!("PDF extraction failed: {}", e)),
        ContentKind::Docx => extract_docx(bytes),
        ContentKind::Pptx => extract_pptx(bytes),
        ContentKind::Xlsx => extract_xlsx(bytes),
        ContentKind::Text => String::from_utf8(bytes.to_vec())
            .map_err(|e| format!("not valid UTF-8 text: {}", e)),
    }
}

/// Read and extract one file. The document is named `name`.
pub fn extract_file(path: &Path, name: &str) -> Result<Document> {
    let bytes = std::fs::read(path).map_err(|e| Error::ingestion(name, e.to_string()))?;
    let text = extract_text(&bytes, ContentKind::from_path(path))
        .map_err(|message| Error::ingestion(name, message))?;
    Ok(Document::new(name, text))
}

/// Load every file named by `paths`, expanding directories.
///
/// Files given directly are named by their file name; files found under a
/// directory are named by their path relative to it. Two documents with
/// the same name are not allowed in one set; the later one is reported
/// as a failure.
pub fn load_paths(paths: &[PathBuf]) -> IngestReport {
    let mut report = IngestReport::default();
    let mut names = HashSet::new();

    for path in paths {
        let candidates = match expand(path) {
            Ok(c) => c,
            Err(e) => {
                report.failures.push(e);
                continue;
            }
        };

        for (file, name) in candidates {
            if !names.insert(name.clone()) {
                report
                    .failures
                    .push(Error::ingestion(&name, "duplicate document name"));
                continue;
            }
            match extract_file(&file, &name) {
                Ok(doc) => {
                    tracing::debug!(document = %name, chars = doc.text.chars().count(), "extracted");
                    report.documents.push(doc);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "skipping document");
                    report.failures.push(e);
                }
            }
        }
    }

    tracing::info!(
        documents = report.documents.len(),
        failures = report.failures.len(),
        "ingested"
    );
    report
}

fn expand(path: &Path) -> Result<Vec<(PathBuf, String)>> {
    let display = path.display().to_string();
    let metadata =
        std::fs::metadata(path).map_err(|e| Error::ingestion(&display, e.to_string()))?;

    if metadata.is_file() {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(display);
        return Ok(vec![(path.to_path_buf(), name)]);
    }

    let include = build_globset(DEFAULT_INCLUDE_GLOBS)?;
    let exclude = build_globset(EXCLUDE_GLOBS)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(path) {
        let entry = entry.map_err(|e| Error::ingestion(&display, e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(path)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        if exclude.is_match(&relative) || !include.is_match(&relative) {
            continue;
        }
        files.push((entry.path().to_path_buf(), relative));
    }

    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

fn build_globset(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).map_err(|e| Error::config(e.to_string()))?);
    }
    builder.build().map_err(|e| Error::config(e.to_string()))
}

// ============ OOXML ============

fn open_zip(bytes: &[u8]) -> std::result::Result<ZipArchive<'_>, String> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| format!("not an OOXML file: {}", e))
}

fn read_part(archive: &mut ZipArchive<'_>, name: &str) -> std::result::Result<Vec<u8>, String> {
    let entry = archive
        .by_name(name)
        .map_err(|e| format!("{}: {}", name, e))?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| format!("{}: {}", name, e))?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(format!("{} exceeds size limit ({} bytes)", name, MAX_XML_ENTRY_BYTES));
    }
    Ok(out)
}

/// Part names matching `prefix<N>.xml`, ordered by N.
fn numbered_parts(archive: &ZipArchive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(str::to_string)
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

/// Concatenate the text of every `<*:t>` element (`w:t` in Word, `a:t` in
/// DrawingML).
fn text_runs(xml: &[u8]) -> std::result::Result<String, String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_t = true,
            Ok(Event::End(e)) if e.local_name().as_ref() == b"t" => in_t = false,
            Ok(Event::End(e))
                if e.local_name().as_ref() == b"p" && !out.is_empty() && !out.ends_with('\n') =>
            {
                out.push('\n')
            }
            Ok(Event::Text(t)) if in_t => {
                out.push_str(&t.unescape().map_err(|e| e.to_string())?);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

fn extract_docx(bytes: &[u8]) -> std::result::Result<String, String> {
    let mut archive = open_zip(bytes)?;
    let xml = read_part(&mut archive, "word/document.xml")?;
    text_runs(&xml)
}

fn extract_pptx(bytes: &[u8]) -> std::result::Result<String, String> {
    let mut archive = open_zip(bytes)?;
    let mut slides = Vec::new();
    for name in numbered_parts(&archive, "ppt/slides/slide") {
        let text = text_runs(&read_part(&mut archive, &name)?)?;
        if !text.is_empty() {
            slides.push(text);
        }
    }
    Ok(slides.join("\n\n"))
}

fn extract_xlsx(bytes: &[u8]) -> std::result::Result<String, String> {
    let mut archive = open_zip(bytes)?;
    let has_shared = archive.file_names().any(|n| n == "xl/sharedStrings.xml");
    let shared = if has_shared {
        shared_strings(&read_part(&mut archive, "xl/sharedStrings.xml")?)?
    } else {
        Vec::new()
    };

    let mut sheets = Vec::new();
    for name in numbered_parts(&archive, "xl/worksheets/sheet")
        .into_iter()
        .take(XLSX_MAX_SHEETS)
    {
        let text = sheet_cells(&read_part(&mut archive, &name)?, &shared)?;
        if !text.is_empty() {
            sheets.push(text);
        }
    }
    Ok(sheets.join("\n"))
}

fn shared_strings(xml: &[u8]) -> std::result::Result<Vec<String>, String> {
    let mut strings = Vec::new();
    let mut current = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"si" => current.clear(),
            Ok(Event::End(e)) if e.local_name().as_ref() == b"si" => {
                strings.push(std::mem::take(&mut current))
            }
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_t = true,
            Ok(Event::End(e)) if e.local_name().as_ref() == b"t" => in_t = false,
            Ok(Event::Text(t)) if in_t => {
                current.push_str(&t.unescape().map_err(|e| e.to_string())?)
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// Shared-string and inline-number cell values, space separated.
fn sheet_cells(xml: &[u8], shared: &[String]) -> std::result::Result<String, String> {
    let mut cells: Vec<String> = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_v = false;
    let mut is_shared = false;
    while cells.len() < XLSX_MAX_CELLS_PER_SHEET {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"c" => {
                is_shared = e.attributes().flatten().any(|a| {
                    a.key.as_ref() == b"t" && a.value.as_ref() == b"s"
                });
            }
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"v" => in_v = true,
            Ok(Event::End(e)) if e.local_name().as_ref() == b"v" => in_v = false,
            Ok(Event::Text(t)) if in_v => {
                let raw = t.unescape().map_err(|e| e.to_string())?;
                let value = raw.trim();
                if is_shared {
                    if let Some(s) = value.parse::<usize>().ok().and_then(|i| shared.get(i)) {
                        cells.push(s.clone());
                    }
                } else if !value.is_empty() {
                    cells.push(value.to_string());
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(cells.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn zip_with(parts: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            for (name, body) in parts {
                zip.start_file(*name, SimpleFileOptions::default()).unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn kind_from_extension() {
        assert_eq!(ContentKind::from_path(Path::new("a/B.PDF")), ContentKind::Pdf);
        assert_eq!(ContentKind::from_path(Path::new("x.docx")), ContentKind::Docx);
        assert_eq!(ContentKind::from_path(Path::new("notes.md")), ContentKind::Text);
        assert_eq!(ContentKind::from_path(Path::new("README")), ContentKind::Text);
    }

    #[test]
    fn invalid_pdf_is_error() {
        assert!(extract_text(b"not a pdf", ContentKind::Pdf).is_err());
    }

    #[test]
    fn invalid_zip_is_error() {
        assert!(extract_text(b"not a zip", ContentKind::Docx).is_err());
    }

    #[test]
    fn invalid_utf8_text_is_error() {
        assert!(extract_text(&[0xff, 0xfe, 0x00], ContentKind::Text).is_err());
    }

    #[test]
    fn docx_paragraphs() {
        let bytes = zip_with(&[(
            "word/document.xml",
            r#"<?xml version="1.0"?><w:document xmlns:w="w"><w:body><w:p><w:r><w:t>The sky </w:t></w:r><w:r><w:t>is blue.</w:t></w:r></w:p><w:p><w:r><w:t>Grass is green.</w:t></w:r></w:p></w:body></w:document>"#,
        )]);
        let text = extract_text(&bytes, ContentKind::Docx).unwrap();
        assert_eq!(text, "The sky is blue.\nGrass is green.");
    }

    #[test]
    fn pptx_slides_in_numeric_order() {
        let bytes = zip_with(&[
            ("ppt/slides/slide10.xml", r#"<p:sld xmlns:a="a" xmlns:p="p"><a:p><a:t>ten</a:t></a:p></p:sld>"#),
            ("ppt/slides/slide2.xml", r#"<p:sld xmlns:a="a" xmlns:p="p"><a:p><a:t>two</a:t></a:p></p:sld>"#),
        ]);
        let text = extract_text(&bytes, ContentKind::Pptx).unwrap();
        assert_eq!(text, "two\n\nten");
    }

    #[test]
    fn xlsx_shared_strings_and_numbers() {
        let bytes = zip_with(&[
            ("xl/sharedStrings.xml", r#"<sst><si><t>alpha</t></si><si><t>beta</t></si></sst>"#),
            (
                "xl/worksheets/sheet1.xml",
                r#"<worksheet><sheetData><row><c t="s"><v>1</v></c><c><v>42</v></c><c t="s"><v>0</v></c></row></sheetData></worksheet>"#,
            ),
        ]);
        let text = extract_text(&bytes, ContentKind::Xlsx).unwrap();
        assert_eq!(text, "beta 42 alpha");
    }

    #[test]
    fn directory_walk_is_sorted_and_filtered() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("sub")).unwrap();
        std::fs::write(tmp.path().join("b.txt"), "bee").unwrap();
        std::fs::write(tmp.path().join("sub/a.md"), "ay").unwrap();
        std::fs::write(tmp.path().join("image.png"), [0u8, 1, 2]).unwrap();

        let report = load_paths(&[tmp.path().to_path_buf()]);
        assert!(report.failures.is_empty());
        let names: Vec<&str> = report.documents.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["b.txt", "sub/a.md"]);
    }

    #[test]
    fn best_effort_keeps_good_documents() {
        let tmp = TempDir::new().unwrap();
        let good = tmp.path().join("good.txt");
        let bad = tmp.path().join("bad.pdf");
        std::fs::write(&good, "The sky is blue.").unwrap();
        std::fs::write(&bad, "definitely not a pdf").unwrap();

        let report = load_paths(&[good, bad, tmp.path().join("missing.txt")]);
        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.failures.len(), 2);
        assert!(report
            .failures
            .iter()
            .all(|e| matches!(e, Error::Ingestion { .. })));
        assert_eq!(report.into_documents().unwrap()[0].text, "The sky is blue.");
    }

    #[test]
    fn nothing_extracted_is_ingestion_error() {
        let tmp = TempDir::new().unwrap();
        let bad = tmp.path().join("bad.docx");
        std::fs::write(&bad, "nope").unwrap();
        let err = load_paths(&[bad]).into_documents().unwrap_err();
        match err {
            Error::Ingestion { document, .. } => assert_eq!(document, "bad.docx"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicate_names_rejected() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("x")).unwrap();
        std::fs::create_dir_all(tmp.path().join("y")).unwrap();
        std::fs::write(tmp.path().join("x/a.txt"), "one").unwrap();
        std::fs::write(tmp.path().join("y/a.txt"), "two").unwrap();
        let report = load_paths(&[tmp.path().join("x/a.txt"), tmp.path().join("y/a.txt")]);
        assert_eq!(report.documents.len(), 1);
        assert_eq!(report.failures.len(), 1);
    }
}
