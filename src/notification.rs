//! The notification document scope automaton, and `check_state` — the
//! session-state comparison logic that decides between "up to date",
//! "apply deltas", and "fall back to snapshot" (spec §4.2, §4.3).

use crate::hash::{decode_hex_hash, DIGEST_LEN};
use crate::model::{DeltaRef, Plan, RepositoryState};
use crate::xml::{Attributes, ElementSink, XmlError};

/// The RRDP XML namespace every document's root element must carry.
pub const NS: &str = "http://www.ripe.net/rpki/rrdp";
/// The only protocol version this worker understands.
pub const MAX_VERSION: u64 = 1;
/// Spec §3: serials are constrained to a non-negative signed 64-bit
/// range.
pub const MAX_SERIAL: u64 = i64::MAX as u64;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Scope {
    Start,
    InNotification,
    InSnapshot,
    PostSnapshot,
}

/// The fully-parsed notification header plus delta list (spec §3
/// `NotificationDoc`).
#[derive(Clone, Debug, Default)]
pub struct NotificationDoc {
    pub version: u64,
    pub session_id: String,
    pub serial: u64,
    pub snapshot_uri: String,
    pub snapshot_hash: [u8; DIGEST_LEN],
    pub deltas: Vec<DeltaRef>,
}

/// Drives the notification scope automaton and, once the document is
/// fully parsed, the plan computation of spec §4.3.
pub struct NotificationHandler {
    scope: Scope,
    repository: RepositoryState,
    doc: NotificationDoc,
    plan: Plan,
}

impl NotificationHandler {
    pub fn new(repository: RepositoryState) -> Self {
        NotificationHandler {
            scope: Scope::Start,
            repository,
            doc: NotificationDoc::default(),
            plan: Plan::Pending,
        }
    }

    pub fn plan(&self) -> Plan {
        self.plan
    }

    pub fn into_doc(self) -> NotificationDoc {
        self.doc
    }

    fn recompute(&mut self, deltas_known: bool) {
        self.plan = check_state(
            &self.repository,
            &self.doc.session_id,
            self.doc.serial,
            deltas_known.then_some(self.doc.deltas.as_slice()),
            self.plan,
        );
    }
}

impl ElementSink for NotificationHandler {
    fn start(&mut self, name: &str, attrs: &mut Attributes) -> Result<(), XmlError> {
        match (self.scope, name) {
            (Scope::Start, "notification") => {
                let xmlns = attrs.take_req("xmlns")?;
                if xmlns != NS {
                    return Err(XmlError::InvalidAttributeValue {
                        name: "xmlns".into(),
                        value: xmlns,
                    });
                }
                let version = parse_version(attrs.take_req("version")?)?;
                self.doc.version = version;
                self.doc.session_id = attrs.take_req("session_id")?;
                self.doc.serial = parse_serial(attrs.take_req("serial")?)?;
                attrs.exhausted()?;
                self.scope = Scope::InNotification;
                // Early bail-out: decide on NONE/SNAPSHOT/ERROR before
                // spending any effort on the delta list.
                self.recompute(false);
                Ok(())
            }
            (Scope::InNotification, "snapshot") => {
                self.doc.snapshot_uri = attrs.take_req("uri")?;
                let hash = attrs.take_req("hash")?;
                self.doc.snapshot_hash = decode_hex_hash(&hash).map_err(|_| {
                    XmlError::InvalidAttributeValue {
                        name: "hash".into(),
                        value: hash,
                    }
                })?;
                attrs.exhausted()?;
                self.scope = Scope::InSnapshot;
                Ok(())
            }
            (Scope::PostSnapshot, "delta") => {
                let serial = parse_serial(attrs.take_req("serial")?)?;
                let uri = attrs.take_req("uri")?;
                let hash = attrs.take_req("hash")?;
                attrs.exhausted()?;
                let hash = decode_hex_hash(&hash).map_err(|_| XmlError::InvalidAttributeValue {
                    name: "hash".into(),
                    value: hash,
                })?;
                if self.doc.deltas.iter().any(|d| d.serial == serial) {
                    return Err(XmlError::DuplicateDelta(serial));
                }
                if serial > self.repository.serial {
                    self.doc.deltas.push(DeltaRef { serial, uri, hash });
                }
                self.scope = Scope::PostSnapshot;
                Ok(())
            }
            (_, other) => Err(XmlError::UnexpectedElement(other.to_string())),
        }
    }

    fn end(&mut self, name: &str) -> Result<(), XmlError> {
        match (self.scope, name) {
            (Scope::InSnapshot, "snapshot") => {
                self.scope = Scope::PostSnapshot;
                Ok(())
            }
            (Scope::PostSnapshot, "delta") => Ok(()),
            (Scope::PostSnapshot, "notification") => {
                self.doc.deltas.sort_by_key(|d| d.serial);
                self.recompute(true);
                Ok(())
            }
            (_, other) => Err(XmlError::UnexpectedEnd(other.to_string())),
        }
    }

    fn text(&mut self, _chunk: &[u8]) -> Result<(), XmlError> {
        Ok(()) // no character data is meaningful in a notification document
    }
}

fn parse_version(s: String) -> Result<u64, XmlError> {
    let v: u64 = s
        .parse()
        .map_err(|_| XmlError::InvalidAttributeValue { name: "version".into(), value: s.clone() })?;
    if v == 0 || v > MAX_VERSION {
        return Err(XmlError::InvalidAttributeValue { name: "version".into(), value: s });
    }
    Ok(v)
}

fn parse_serial(s: String) -> Result<u64, XmlError> {
    let v: u64 = s
        .parse()
        .map_err(|_| XmlError::InvalidAttributeValue { name: "serial".into(), value: s.clone() })?;
    if v == 0 || v > MAX_SERIAL {
        return Err(XmlError::InvalidAttributeValue { name: "serial".into(), value: s });
    }
    Ok(v)
}

/// The session-state comparison logic of spec §4.3. `deltas` is `None`
/// when the delta list has not yet been fully parsed (notification-start
/// call); in that case steps 7–8 are skipped and the sticky `current`
/// plan is returned unchanged (`Pending` until the notification-end
/// call decides for real).
pub fn check_state(
    repository: &RepositoryState,
    notification_session_id: &str,
    notification_serial: u64,
    deltas: Option<&[DeltaRef]>,
    current: Plan,
) -> Plan {
    // 1. sticky: a prior ERROR or NONE verdict is final.
    if matches!(current, Plan::Error | Plan::None) {
        return current;
    }
    // 2.
    if repository.is_unset() {
        return Plan::Snapshot;
    }
    // 3. (session_id/serial are required attributes and always present
    // by the time this is called; kept for parity with the spec.)
    if notification_session_id.is_empty() {
        return Plan::Error;
    }
    // 4.
    if repository.session_id != notification_session_id {
        return Plan::Snapshot;
    }
    // 5./6.
    let diff = notification_serial as i128 - repository.serial as i128;
    if diff == 0 {
        return Plan::None;
    }
    if diff < 0 {
        return Plan::Error;
    }
    // 7.
    let deltas = match deltas {
        Some(d) => d,
        None => return current,
    };
    // 8.
    let needed = diff as u64;
    if deltas.len() as u64 != needed {
        return Plan::Snapshot;
    }
    let mut expected = repository.serial + 1;
    for d in deltas {
        if d.serial != expected {
            return Plan::Snapshot;
        }
        expected += 1;
    }
    Plan::Deltas
}
