//! XML encoding of a [`TaskList`].
//!
//! The document has one `tasklist` root holding zero or more `task`
//! elements:
//!
//! ```text
//! <tasklist>
//!     <task id="..." done="1|0" date="-1">
//!         <title>...</title>
//!         <comment>...</comment>
//!     </task>
//! </tasklist>
//! ```
//!
//! `date` is a Unix timestamp, `-1` meaning "no due date". Title and comment
//! text is trimmed on decode.

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};

use crate::task::{Task, TaskId, TaskList};

/// Declaration line written at the top of every document.
const DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;

/// Wire value of a missing due date.
pub const NO_DUE_DATE: i64 = -1;

/// A valid document with no tasks, written when the remote has no file yet.
pub const EMPTY_DOCUMENT: &str =
    "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n<tasklist>\n</tasklist>";

/// Error type for task-list decoding.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The document is not well-formed XML.
    #[error("malformed XML: {0}")]
    Xml(String),
    /// The document is not valid UTF-8.
    #[error("document is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    /// No `tasklist` element was found.
    #[error("document has no <tasklist> element")]
    MissingRoot,
    /// A `task` element lacks a required attribute.
    #[error("<task> element is missing the '{0}' attribute")]
    MissingAttribute(&'static str),
    /// The `date` attribute is not an integer.
    #[error("task {id} has an invalid date '{value}'")]
    InvalidDate {
        /// Id of the offending task.
        id: String,
        /// The raw attribute value.
        value: String,
    },
}

fn xml_error(e: impl std::fmt::Display) -> CodecError {
    CodecError::Xml(e.to_string())
}

/// Serializes a task list into a complete XML document.
#[must_use]
pub fn encode(tasks: &TaskList) -> String {
    let mut out = String::with_capacity(128 + tasks.len() * 128);
    out.push_str(DECLARATION);
    out.push_str("\n<tasklist>\n");
    for task in tasks {
        let done = if task.done { "1" } else { "0" };
        let date = task.due.unwrap_or(NO_DUE_DATE);
        out.push_str(&format!(
            "\t<task id=\"{}\" done=\"{done}\" date=\"{date}\">\n",
            escape(task.id.as_str())
        ));
        out.push_str(&format!("\t\t<title>{}</title>\n", escape(&task.title)));
        out.push_str(&format!(
            "\t\t<comment>\n{}\n\t\t</comment>\n",
            escape(&task.comment)
        ));
        out.push_str("\t</task>\n");
    }
    out.push_str("</tasklist>");
    out
}

/// Parses a document from raw bytes.
///
/// # Errors
///
/// Returns [`CodecError::Utf8`] for non-UTF-8 input, otherwise the same
/// errors as [`decode`].
pub fn decode_bytes(bytes: &[u8]) -> Result<TaskList, CodecError> {
    decode(std::str::from_utf8(bytes)?)
}

/// Parses a document into a task list.
///
/// Only the first `tasklist` element is read. Unknown elements are skipped.
///
/// # Errors
///
/// Returns [`CodecError`] if the XML is malformed, has no root, or a task
/// has a missing or empty `id` or a non-integer `date`.
pub fn decode(text: &str) -> Result<TaskList, CodecError> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) if e.name().as_ref() == b"tasklist" => {
                return read_task_list(&mut reader);
            }
            Event::Empty(e) if e.name().as_ref() == b"tasklist" => {
                return Ok(TaskList::new());
            }
            Event::Eof => return Err(CodecError::MissingRoot),
            _ => {}
        }
    }
}

/// Reads `task` children until the closing `tasklist` tag.
fn read_task_list(reader: &mut Reader<&[u8]>) -> Result<TaskList, CodecError> {
    let mut tasks = TaskList::new();
    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) if e.name().as_ref() == b"task" => {
                let mut task = task_from_attributes(&e)?;
                read_task_body(reader, &mut task)?;
                tasks.insert(task);
            }
            Event::Empty(e) if e.name().as_ref() == b"task" => {
                tasks.insert(task_from_attributes(&e)?);
            }
            Event::Start(_) => skip_element(reader)?,
            Event::End(e) if e.name().as_ref() == b"tasklist" => return Ok(tasks),
            Event::Eof => return Err(CodecError::Xml("unexpected end of document".into())),
            _ => {}
        }
    }
}

fn task_from_attributes(e: &BytesStart<'_>) -> Result<Task, CodecError> {
    let id = attribute(e, "id")?
        .filter(|id| !id.is_empty())
        .ok_or(CodecError::MissingAttribute("id"))?;
    let done = attribute(e, "done")?.is_some_and(|v| v == "1");
    let due = match attribute(e, "date")? {
        None => None,
        Some(value) => {
            let parsed: i64 = value.trim().parse().map_err(|_| CodecError::InvalidDate {
                id: id.clone(),
                value: value.clone(),
            })?;
            (parsed != NO_DUE_DATE).then_some(parsed)
        }
    };

    let mut task = Task::new(TaskId::new(id), String::new());
    task.done = done;
    task.due = due;
    Ok(task)
}

/// Fills title and comment from the children of a `task` element.
fn read_task_body(reader: &mut Reader<&[u8]>, task: &mut Task) -> Result<(), CodecError> {
    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(e) => match e.name().as_ref() {
                b"title" => task.title = read_text(reader)?,
                b"comment" => task.comment = read_text(reader)?,
                _ => skip_element(reader)?,
            },
            Event::End(_) => return Ok(()),
            Event::Eof => return Err(CodecError::Xml("unexpected end of document".into())),
            _ => {}
        }
    }
}

/// Collects the text content of the current element, trimmed.
fn read_text(reader: &mut Reader<&[u8]>) -> Result<String, CodecError> {
    let mut text = String::new();
    let mut depth = 0usize;
    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Text(t) => text.push_str(&t.unescape().map_err(xml_error)?),
            Event::CData(c) => {
                text.push_str(std::str::from_utf8(&c.into_inner())?);
            }
            Event::Start(_) => depth += 1,
            Event::End(_) if depth == 0 => return Ok(text.trim().to_string()),
            Event::End(_) => depth -= 1,
            Event::Eof => return Err(CodecError::Xml("unexpected end of document".into())),
            _ => {}
        }
    }
}

/// Skips the remainder of an element whose start tag was just read.
fn skip_element(reader: &mut Reader<&[u8]>) -> Result<(), CodecError> {
    let mut depth = 0usize;
    loop {
        match reader.read_event().map_err(xml_error)? {
            Event::Start(_) => depth += 1,
            Event::End(_) if depth == 0 => return Ok(()),
            Event::End(_) => depth -= 1,
            Event::Eof => return Err(CodecError::Xml("unexpected end of document".into())),
            _ => {}
        }
    }
}

fn attribute(e: &BytesStart<'_>, name: &str) -> Result<Option<String>, CodecError> {
    for attr in e.attributes() {
        let attr = attr.map_err(xml_error)?;
        if attr.key.as_ref() == name.as_bytes() {
            let value = attr.unescape_value().map_err(xml_error)?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}
