//! The snapshot document scope automaton (spec §4.2, §4.4): every
//! current object as a `<publish>` entry.

use crate::base64util::lenient_decode;
use crate::model::{FileEvent, PublishRecord};
use crate::notification::NS;
use crate::xml::{Attributes, ElementSink, XmlError};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Scope {
    Start,
    InSnapshot,
    InPublish,
}

/// What the snapshot's own header must match, carried over from the
/// notification that referenced it (spec §4.2).
#[derive(Clone, Debug)]
pub struct ExpectedHeader {
    pub version: u64,
    pub session_id: String,
    pub serial: u64,
}

pub struct SnapshotHandler {
    session_id: u64,
    expected: ExpectedHeader,
    scope: Scope,
    current: Option<PublishRecord>,
    events: Vec<FileEvent>,
}

impl SnapshotHandler {
    pub fn new(session_id: u64, expected: ExpectedHeader) -> Self {
        SnapshotHandler {
            session_id,
            expected,
            scope: Scope::Start,
            current: None,
            events: Vec::new(),
        }
    }

    /// Drains the file events accumulated since the last call. Intended
    /// to be polled by the owning session after every `feed`.
    pub fn take_events(&mut self) -> Vec<FileEvent> {
        std::mem::take(&mut self.events)
    }
}

impl ElementSink for SnapshotHandler {
    fn start(&mut self, name: &str, attrs: &mut Attributes) -> Result<(), XmlError> {
        match (self.scope, name) {
            (Scope::Start, "snapshot") => {
                let xmlns = attrs.take_req("xmlns")?;
                if xmlns != NS {
                    return Err(XmlError::InvalidAttributeValue { name: "xmlns".into(), value: xmlns });
                }
                let version: u64 = attrs
                    .take_req("version")?
                    .parse()
                    .map_err(|_| XmlError::MalformedTag)?;
                let session_id = attrs.take_req("session_id")?;
                let serial: u64 = attrs
                    .take_req("serial")?
                    .parse()
                    .map_err(|_| XmlError::MalformedTag)?;
                attrs.exhausted()?;

                if version != self.expected.version {
                    return Err(XmlError::InvalidAttributeValue {
                        name: "version".into(),
                        value: version.to_string(),
                    });
                }
                if session_id != self.expected.session_id {
                    return Err(XmlError::InvalidAttributeValue {
                        name: "session_id".into(),
                        value: session_id,
                    });
                }
                if serial != self.expected.serial {
                    return Err(XmlError::InvalidAttributeValue {
                        name: "serial".into(),
                        value: serial.to_string(),
                    });
                }
                self.scope = Scope::InSnapshot;
                Ok(())
            }
            (Scope::InSnapshot, "publish") => {
                let uri = attrs.take_req("uri")?;
                attrs.exhausted()?;
                self.current = Some(PublishRecord::new_publish(uri, None));
                self.scope = Scope::InPublish;
                Ok(())
            }
            (_, other) => Err(XmlError::UnexpectedElement(other.to_string())),
        }
    }

    fn end(&mut self, name: &str) -> Result<(), XmlError> {
        match (self.scope, name) {
            (Scope::InPublish, "publish") => {
                let record = self.current.take().expect("InPublish implies a record");
                let decoded = lenient_decode(&record.data)?;
                self.events.push(FileEvent {
                    session_id: self.session_id,
                    kind: record.kind,
                    uri: record.uri,
                    expected_hash: record.expected_hash,
                    data: Some(decoded),
                });
                self.scope = Scope::InSnapshot;
                Ok(())
            }
            (Scope::InSnapshot, "snapshot") => Ok(()),
            (_, other) => Err(XmlError::UnexpectedEnd(other.to_string())),
        }
    }

    fn text(&mut self, chunk: &[u8]) -> Result<(), XmlError> {
        if self.scope == Scope::InPublish {
            if let Some(record) = self.current.as_mut() {
                record.data.extend_from_slice(chunk);
            }
        }
        Ok(())
    }
}
