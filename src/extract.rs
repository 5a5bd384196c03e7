//! Text extraction for `.docx` templates.
//!
//! Reads the main document part plus headers and footers out of the OOXML
//! ZIP container and flattens them into paragraph text. Word frequently
//! splits one visible word across several `<w:r>` runs (spell-check marks,
//! formatting changes mid-placeholder), so text is accumulated per paragraph
//! rather than per run; that way `{{client` + `_name}}` is seen whole.
//!
//! Field instructions (`MERGEFIELD ClientName`) are kept apart from the text.

use quick_xml::events::Event;
use std::io::Read;
use thiserror::Error;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const DOCUMENT_PART: &str = "word/document.xml";

/// Extraction failures. The pipeline records these against the file and moves on.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("not a valid docx archive: {0}")]
    NotAZip(String),
    #[error("missing part {0}")]
    MissingPart(String),
    #[error("ZIP entry {0} exceeds size limit ({1} bytes)")]
    EntryTooLarge(String, u64),
    #[error("malformed XML in {part}: {message}")]
    Xml { part: String, message: String },
}

/// Flattened content of one docx.
#[derive(Debug, Clone, Default)]
pub struct DocxContent {
    /// Paragraph text, one paragraph per line.
    pub text: String,
    /// Raw field instruction strings, e.g. `" MERGEFIELD ClientName \* MERGEFORMAT "`.
    pub field_instructions: Vec<String>,
    pub word_count: usize,
}

impl DocxContent {
    /// Whitespace-collapsed prefix of the text, cut on a char boundary.
    pub fn preview(&self, max_chars: usize) -> String {
        let collapsed = self.text.split_whitespace().collect::<Vec<_>>().join(" ");
        match collapsed.char_indices().nth(max_chars) {
            Some((idx, _)) => format!("{}…", collapsed[..idx].trim_end()),
            None => collapsed,
        }
    }
}

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

pub fn extract_docx(bytes: &[u8]) -> Result<DocxContent, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::NotAZip(e.to_string()))?;

    if archive.index_for_name(DOCUMENT_PART).is_none() {
        return Err(ExtractError::MissingPart(DOCUMENT_PART.to_string()));
    }

    let mut parts = vec![DOCUMENT_PART.to_string()];
    parts.extend(numbered_parts(&archive, "word/header"));
    parts.extend(numbered_parts(&archive, "word/footer"));

    let mut content = DocxContent::default();
    for part in parts {
        let xml = read_zip_entry_bounded(&mut archive, &part, MAX_XML_ENTRY_BYTES)?;
        collect_part(&xml, &part, &mut content)?;
    }
    content.word_count = content.text.split_whitespace().count();
    Ok(content)
}

/// `word/header1.xml`, `word/header2.xml`, ... in numeric order.
fn numbered_parts(archive: &Archive<'_>, stem: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(stem) && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(stem)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|_| ExtractError::MissingPart(name.to_string()))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::NotAZip(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::EntryTooLarge(name.to_string(), max_bytes));
    }
    Ok(out)
}

fn collect_part(xml: &[u8], part: &str, content: &mut DocxContent) -> Result<(), ExtractError> {
    let xml_err = |message: String| ExtractError::Xml {
        part: part.to_string(),
        message,
    };

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut paragraph = String::new();
    let mut instr = String::new();
    let mut in_text = false;
    let mut in_instr = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"t" => in_text = true,
                b"instrText" => in_instr = true,
                b"tab" => paragraph.push('\t'),
                b"br" | b"cr" => paragraph.push('\n'),
                b"fldSimple" => push_simple_field(&e, content),
                b"fldChar" => flush_instruction(&mut instr, content),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => paragraph.push('\t'),
                b"br" | b"cr" => paragraph.push('\n'),
                b"fldSimple" => push_simple_field(&e, content),
                // begin, separate and end all close whatever instruction is open
                b"fldChar" => flush_instruction(&mut instr, content),
                // <w:p/> is an empty paragraph
                b"p" => content.text.push('\n'),
                _ => {}
            },
            Ok(Event::Text(te)) => {
                if in_text || in_instr {
                    let text = te.unescape().map_err(|e| xml_err(e.to_string()))?;
                    if in_text {
                        paragraph.push_str(&text);
                    } else {
                        instr.push_str(&text);
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"instrText" => in_instr = false,
                b"p" => {
                    content.text.push_str(&paragraph);
                    content.text.push('\n');
                    paragraph.clear();
                    flush_instruction(&mut instr, content);
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_err(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    // Text outside any paragraph (rare, but seen in hand-built files)
    if !paragraph.is_empty() {
        content.text.push_str(&paragraph);
        content.text.push('\n');
    }
    flush_instruction(&mut instr, content);
    Ok(())
}

fn flush_instruction(instr: &mut String, content: &mut DocxContent) {
    if !instr.trim().is_empty() {
        content.field_instructions.push(std::mem::take(instr));
    }
    instr.clear();
}

fn push_simple_field(e: &quick_xml::events::BytesStart<'_>, content: &mut DocxContent) {
    for attr in e.attributes().flatten() {
        if attr.key.local_name().as_ref() == b"instr" {
            if let Ok(value) = attr.unescape_value() {
                content.field_instructions.push(value.into_owned());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";

    /// Build a docx with the given `word/document.xml` body and optional extra parts.
    fn docx_with_parts(body: &str, extra: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file("word/document.xml", options).unwrap();
            let xml = format!(
                "<?xml version=\"1.0\"?><w:document xmlns:w=\"{}\"><w:body>{}</w:body></w:document>",
                W_NS, body
            );
            zip.write_all(xml.as_bytes()).unwrap();
            for (name, part_body) in extra {
                zip.start_file(*name, options).unwrap();
                let xml = format!(
                    "<?xml version=\"1.0\"?><w:hdr xmlns:w=\"{}\">{}</w:hdr>",
                    W_NS, part_body
                );
                zip.write_all(xml.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn joins_runs_within_a_paragraph() {
        let body = "<w:p><w:r><w:t>Dear {{client</w:t></w:r><w:r><w:t>_name}},</w:t></w:r></w:p>\
                    <w:p><w:r><w:t xml:space=\"preserve\">Second </w:t></w:r><w:r><w:t>line</w:t></w:r></w:p>";
        let content = extract_docx(&docx_with_parts(body, &[])).unwrap();
        assert_eq!(content.text, "Dear {{client_name}},\nSecond line\n");
        assert_eq!(content.word_count, 4);
    }

    #[test]
    fn tabs_breaks_and_entities() {
        let body = "<w:p><w:r><w:t>A</w:t><w:tab/><w:t>B &amp; C</w:t><w:br/><w:t>D</w:t></w:r></w:p>";
        let content = extract_docx(&docx_with_parts(body, &[])).unwrap();
        assert_eq!(content.text, "A\tB & C\nD\n");
    }

    #[test]
    fn collects_field_instructions() {
        let body = "<w:p><w:r><w:fldChar w:fldCharType=\"begin\"/></w:r>\
                    <w:r><w:instrText xml:space=\"preserve\"> MERGEFIELD ClientName </w:instrText></w:r>\
                    <w:r><w:t>«ClientName»</w:t></w:r></w:p>\
                    <w:p><w:fldSimple w:instr=\" MERGEFIELD CaseNo \"><w:r><w:t>«CaseNo»</w:t></w:r></w:fldSimple></w:p>";
        let content = extract_docx(&docx_with_parts(body, &[])).unwrap();
        assert_eq!(content.field_instructions.len(), 2);
        assert!(content.field_instructions[0].contains("MERGEFIELD ClientName"));
        assert!(content.field_instructions[1].contains("MERGEFIELD CaseNo"));
        assert!(!content.text.contains("MERGEFIELD"));
    }

    #[test]
    fn separates_fields_sharing_a_paragraph() {
        let field = |name: &str| {
            format!(
                "<w:r><w:fldChar w:fldCharType=\"begin\"/></w:r>\
                 <w:r><w:instrText xml:space=\"preserve\"> MERGEFIELD {name} </w:instrText></w:r>\
                 <w:r><w:fldChar w:fldCharType=\"separate\"/></w:r>\
                 <w:r><w:t>«{name}»</w:t></w:r>\
                 <w:r><w:fldChar w:fldCharType=\"end\"/></w:r>"
            )
        };
        let body = format!(
            "<w:p>{}<w:r><w:t xml:space=\"preserve\"> </w:t></w:r>{}</w:p>",
            field("FirstName"),
            field("LastName")
        );
        let content = extract_docx(&docx_with_parts(&body, &[])).unwrap();
        assert_eq!(
            content.field_instructions,
            vec![" MERGEFIELD FirstName ", " MERGEFIELD LastName "]
        );
        assert_eq!(content.text, "«FirstName» «LastName»\n");
    }

    #[test]
    fn reads_headers_and_footers_in_order() {
        let body = "<w:p><w:r><w:t>Body</w:t></w:r></w:p>";
        let extra = [
            ("word/footer1.xml", "<w:p><w:r><w:t>Foot</w:t></w:r></w:p>"),
            ("word/header2.xml", "<w:p><w:r><w:t>Head2</w:t></w:r></w:p>"),
            ("word/header1.xml", "<w:p><w:r><w:t>Head1</w:t></w:r></w:p>"),
        ];
        let content = extract_docx(&docx_with_parts(body, &extra)).unwrap();
        assert_eq!(content.text, "Body\nHead1\nHead2\nFoot\n");
    }

    #[test]
    fn preview_collapses_and_truncates() {
        let content = DocxContent {
            text: "This   is\n\na   long\tpreview text".to_string(),
            ..Default::default()
        };
        assert_eq!(content.preview(100), "This is a long preview text");
        assert_eq!(content.preview(9), "This is a…");
    }

    #[test]
    fn invalid_zip_returns_error() {
        let err = extract_docx(b"not a zip").unwrap_err();
        assert!(matches!(err, ExtractError::NotAZip(_)));
    }

    #[test]
    fn zip_without_document_part_returns_error() {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
            zip.start_file("other.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            zip.write_all(b"<x/>").unwrap();
            zip.finish().unwrap();
        }
        let err = extract_docx(&buf).unwrap_err();
        assert!(matches!(err, ExtractError::MissingPart(_)));
    }

    #[test]
    fn malformed_xml_returns_error() {
        let body = "<w:p><w:r><w:t>unclosed</w:r></w:p>";
        let err = extract_docx(&docx_with_parts(body, &[])).unwrap_err();
        assert!(matches!(err, ExtractError::Xml { .. }));
    }
}
