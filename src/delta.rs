//! The delta document scope automaton (spec §4.2, §4.4): `<publish>`
//! (add/update) and `<withdraw>` entries for one serial step.

use crate::base64util::lenient_decode;
use crate::hash::decode_hex_hash;
use crate::model::{FileEvent, PublishRecord};
use crate::notification::NS;
use crate::xml::{Attributes, ElementSink, XmlError};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Scope {
    Start,
    InDelta,
    InPublish,
    InWithdraw,
}

/// What the delta's own header must match: the notification's session
/// id and protocol version, and the specific serial this delta was
/// fetched for (spec §4.2).
#[derive(Clone, Debug)]
pub struct ExpectedHeader {
    pub version: u64,
    pub session_id: String,
    pub serial: u64,
}

pub struct DeltaHandler {
    session_id: u64,
    expected: ExpectedHeader,
    scope: Scope,
    current: Option<PublishRecord>,
    events: Vec<FileEvent>,
}

impl DeltaHandler {
    pub fn new(session_id: u64, expected: ExpectedHeader) -> Self {
        DeltaHandler {
            session_id,
            expected,
            scope: Scope::Start,
            current: None,
            events: Vec::new(),
        }
    }

    pub fn take_events(&mut self) -> Vec<FileEvent> {
        std::mem::take(&mut self.events)
    }
}

impl ElementSink for DeltaHandler {
    fn start(&mut self, name: &str, attrs: &mut Attributes) -> Result<(), XmlError> {
        match (self.scope, name) {
            (Scope::Start, "delta") => {
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
                self.scope = Scope::InDelta;
                Ok(())
            }
            (Scope::InDelta, "publish") => {
                let uri = attrs.take_req("uri")?;
                let hash = attrs
                    .take_opt("hash")
                    .map(|h| {
                        decode_hex_hash(&h).map_err(|_| XmlError::InvalidAttributeValue {
                            name: "hash".into(),
                            value: h,
                        })
                    })
                    .transpose()?;
                attrs.exhausted()?;
                self.current = Some(PublishRecord::new_publish(uri, hash));
                self.scope = Scope::InPublish;
                Ok(())
            }
            (Scope::InDelta, "withdraw") => {
                let uri = attrs.take_req("uri")?;
                let hash = attrs.take_req("hash")?;
                let hash = decode_hex_hash(&hash).map_err(|_| XmlError::InvalidAttributeValue {
                    name: "hash".into(),
                    value: hash,
                })?;
                attrs.exhausted()?;
                self.current = Some(PublishRecord::new_withdraw(uri, hash));
                self.scope = Scope::InWithdraw;
                Ok(())
            }
            (_, other) => Err(XmlError::UnexpectedElement(other.to_string())),
        }
    }

    fn end(&mut self, name: &str) -> Result<(), XmlError> {
        match (self.scope, name) {
            (Scope::InPublish, "publish") | (Scope::InWithdraw, "withdraw") => {
                let record = self.current.take().expect("scope implies a record");
                let data = if matches!(self.scope, Scope::InWithdraw) {
                    None
                } else {
                    Some(lenient_decode(&record.data)?)
                };
                self.events.push(FileEvent {
                    session_id: self.session_id,
                    kind: record.kind,
                    uri: record.uri,
                    expected_hash: record.expected_hash,
                    data,
                });
                self.scope = Scope::InDelta;
                Ok(())
            }
            (Scope::InDelta, "delta") => Ok(()),
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
