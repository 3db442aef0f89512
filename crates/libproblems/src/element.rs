use std::io::Read;
use std::os::fd::OwnedFd;

use problems_protocol::ElementPayload;

use crate::error::{ProblemsError, Result};

/// Longest accepted element name.
pub const MAX_ELEMENT_NAME_LEN: usize = 64;

/// Text elements larger than this are classified as "big text" for read
/// filtering purposes.
pub const BIG_TEXT_THRESHOLD: usize = 16 * 1024;

/// Values of `type`/`analyzer` reserved for system-generated problems.
/// Unprivileged callers may not claim them.
pub const PRIVILEGED_VALUES: &[&str] = &["Kerneloops", "vmcore", "xorg"];

/// Elements that gate post-processing and therefore must be plain strings.
pub const GATING_ELEMENTS: &[&str] = &["type", "analyzer", "uuid", "duphash"];

/// One element value as handed to the broker. Streams wrap a descriptor
/// passed by the client and are drained at save time, never buffered whole
/// up front.
#[derive(Debug)]
pub enum ElementValue {
    Text(String),
    Binary(Vec<u8>),
    Stream(ElementStream),
}

impl ElementValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ElementValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, ElementValue::Stream(_))
    }
}

impl From<ElementPayload> for ElementValue {
    fn from(payload: ElementPayload) -> Self {
        match payload {
            ElementPayload::Text { value } => ElementValue::Text(value),
            ElementPayload::Binary { data } => ElementValue::Binary(data),
        }
    }
}

/// A readable descriptor received from a client.
///
/// The JSON transport carries inline text and binary payloads only; streams
/// exist for embedders feeding the broker through a transport that passes
/// descriptors (SCM_RIGHTS over a Unix socket).
#[derive(Debug)]
pub struct ElementStream {
    file: std::fs::File,
}

impl ElementStream {
    pub fn from_fd(fd: OwnedFd) -> Self {
        Self { file: fd.into() }
    }

    /// Drain the stream into memory, up to `budget` bytes. The descriptor is
    /// expected to be readable without blocking; a read that would block
    /// fails the whole save rather than stalling the broker.
    pub fn read_limited(&mut self, budget: u64) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            match self.file.read(&mut chunk) {
                Ok(0) => return Ok(data),
                Ok(n) => {
                    data.extend_from_slice(&chunk[..n]);
                    if data.len() as u64 > budget {
                        return Err(ProblemsError::LimitsExceeded(
                            "Problem data is too big".to_string(),
                        ));
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    return Err(ProblemsError::InvalidElement(
                        "Failed to save data of passed file descriptor".to_string(),
                    ));
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(ProblemsError::InvalidElement(format!(
                        "Failed to save data of passed file descriptor: {e}"
                    )));
                }
            }
        }
    }
}

/// Reject names that could escape the problem directory or collide with
/// bookkeeping files.
pub fn validate_element_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name.len() <= MAX_ELEMENT_NAME_LEN
        && name != "."
        && name != ".."
        && !name.starts_with('.')
        && !name.contains('/');
    if ok {
        Ok(())
    } else {
        Err(ProblemsError::InvalidElement(format!(
            "Not allowed problem element name: '{name}'"
        )))
    }
}

/// Unprivileged callers may not label a problem with a privileged type.
pub fn check_privileged_value(name: &str, value: &str, uid: u32) -> Result<()> {
    if uid == 0 || (name != "type" && name != "analyzer") {
        return Ok(());
    }
    if PRIVILEGED_VALUES.contains(&value) {
        return Err(ProblemsError::InvalidElement(format!(
            "You are not allowed to create element '{name}' containing '{value}'"
        )));
    }
    Ok(())
}

/// Kind an element was saved as. Persisted next to the payload so a binary
/// element whose bytes happen to decode as UTF-8 still reads back as binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    Text,
    Binary,
}

/// Classification used by read filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementClass {
    Text,
    BigText,
    Binary,
}

pub fn classify(kind: ElementKind, data: &[u8]) -> ElementClass {
    match kind {
        ElementKind::Binary => ElementClass::Binary,
        ElementKind::Text if data.len() <= BIG_TEXT_THRESHOLD => ElementClass::Text,
        ElementKind::Text => ElementClass::BigText,
    }
}
