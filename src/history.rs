//! The engine's append-only history of field and container modifications.
//!
//! Two readers/writer disciplines are layered: a single [`parking_lot::RwLock`]
//! guards `settings` (which field keys are active, which containers each
//! field key tracks) and is only ever write-locked by `set_tracking_enabled`
//! and `clear_history`; every hot-path append only takes its read side.
//! Each per-locator and per-container list then has its own short-lived
//! lock, so two threads appending to different lists never contend.
//!
//! Settings operate at [`FieldKey`] granularity (class + field, no owning
//! object), matching the external `enable-tracking`/`clear-history` ops;
//! appends and per-owner queries use the full [`FieldLocator`], matching
//! `get-field-modifications(class, field, owner)`.

use std::collections::{HashMap, HashSet};
use std::io::{self, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use chashmap::CHashMap;
use parking_lot::{Mutex, RwLock};

use crate::error::{FieldwatchError, Result};
use crate::identity::IdentityKey;
use crate::locator::{FieldKey, FieldLocator};
use crate::stack::StackFrame;

/// A single field write: the stack at the write site and the value (if
/// non-null) stored into the field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldModification {
    pub stack: Vec<StackFrame>,
    pub container: Option<IdentityKey>,
}

/// A single element insertion or removal observed on a tracked container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerModification {
    pub stack: Vec<StackFrame>,
    pub element: IdentityKey,
    pub is_addition: bool,
}

#[derive(Default)]
struct Settings {
    active: HashSet<FieldKey>,
    /// Which field keys a container is currently tracked through, so
    /// `clear_history` can tell when a container has no remaining tracker.
    trackers: HashMap<IdentityKey, HashSet<FieldKey>>,
}

pub struct HistoryStore {
    settings: RwLock<Settings>,
    /// Every full `FieldLocator` ever appended under a given `FieldKey`,
    /// so `clear_history` can find and drop all of them without scanning
    /// `field_history` itself. Keyed and locked independently of
    /// `settings` so recording a *new* locator for an active key never
    /// takes the settings write lock.
    locator_index: CHashMap<FieldKey, Mutex<HashSet<FieldLocator>>>,
    field_history: CHashMap<FieldLocator, Mutex<Vec<FieldModification>>>,
    container_history: CHashMap<IdentityKey, Mutex<Vec<ContainerModification>>>,
}

impl Default for HistoryStore {
    fn default() -> Self {
        HistoryStore::new()
    }
}

impl HistoryStore {
    pub fn new() -> Self {
        HistoryStore {
            settings: RwLock::new(Settings::default()),
            locator_index: CHashMap::new(),
            field_history: CHashMap::new(),
            container_history: CHashMap::new(),
        }
    }

    pub fn set_tracking_enabled(&self, key: &FieldKey, enabled: bool) {
        let mut settings = self.settings.write();
        if enabled {
            settings.active.insert(key.clone());
        } else {
            settings.active.remove(key);
        }
    }

    pub fn is_active(&self, locator: &FieldLocator) -> bool {
        self.settings.read().active.contains(&locator.key())
    }

    /// Records that `container` is reachable through `key`. Called once a
    /// container has been registered so `clear_history` knows whether it
    /// is orphaned once that key is cleared.
    pub fn record_tracker(&self, container: IdentityKey, key: FieldKey) {
        self.settings.write().trackers.entry(container).or_default().insert(key);
    }

    pub fn has_trackers(&self, container: &IdentityKey) -> bool {
        self.settings.read().trackers.contains_key(container)
    }

    /// Appends a field modification, provided `locator`'s key is still
    /// active. Returns `false` (no side effect) if it is not.
    pub fn append_field_modification(&self, locator: &FieldLocator, modification: FieldModification) -> bool {
        let key = locator.key();
        if !self.settings.read().active.contains(&key) {
            return false;
        }

        self.locator_index
            .upsert(key.clone(), || Mutex::new(HashSet::new()), |_| {});
        if let Some(locators) = self.locator_index.get(&key) {
            locators.lock().insert(locator.clone());
        }

        self.field_history
            .upsert(locator.clone(), || Mutex::new(Vec::new()), |_| {});
        if let Some(list) = self.field_history.get(locator) {
            list.lock().push(modification);
        }
        true
    }

    pub fn append_container_modification(&self, container: &IdentityKey, modification: ContainerModification) {
        self.container_history
            .upsert(container.clone(), || Mutex::new(Vec::new()), |_| {});
        if let Some(list) = self.container_history.get(container) {
            list.lock().push(modification);
        }
    }

    pub fn field_modifications(&self, locator: &FieldLocator) -> Vec<FieldModification> {
        self.field_history
            .get(locator)
            .map(|list| list.lock().clone())
            .unwrap_or_default()
    }

    pub fn container_modifications(&self, container: &IdentityKey) -> Vec<ContainerModification> {
        self.container_history
            .get(container)
            .map(|list| list.lock().clone())
            .unwrap_or_default()
    }

    pub fn field_modification_stack_blob(&self, locator: &FieldLocator, index: usize) -> Option<Vec<u8>> {
        self.field_history
            .get(locator)
            .and_then(|list| list.lock().get(index).map(|m| encode_stack_blob(&m.stack)))
    }

    pub fn container_modification_stack_blob(&self, container: &IdentityKey, index: usize) -> Option<Vec<u8>> {
        self.container_history
            .get(container)
            .and_then(|list| list.lock().get(index).map(|m| encode_stack_blob(&m.stack)))
    }

    /// Drops `key` from `active`, drops every full locator recorded under
    /// it from `field_history`, then drops any container that was tracked
    /// only through `key` from both `trackers` and `container_history`.
    pub fn clear_history(&self, key: &FieldKey) {
        let mut settings = self.settings.write();
        settings.active.remove(key);
        let mut orphaned = Vec::new();
        for (container, keys) in settings.trackers.iter_mut() {
            keys.remove(key);
            if keys.is_empty() {
                orphaned.push(container.clone());
            }
        }
        for container in &orphaned {
            settings.trackers.remove(container);
        }
        drop(settings);

        if let Some(locators) = self.locator_index.remove(key) {
            for locator in locators.into_inner() {
                self.field_history.remove(&locator);
            }
        }
        for container in orphaned {
            self.container_history.remove(&container);
        }
    }
}

const STACK_BLOB_MAGIC: &[u8] = b"fieldwatch stack\0";
const STACK_BLOB_VERSION: u32 = 1;

/// Encodes a captured stack as a binary blob: magic header, `u32` version,
/// `u32` frame count, then each frame as `{u16-length-prefixed class,
/// u16-length-prefixed method, i32 line}`. Every byte written is
/// ISO-8859-1-safe since class/method names are restricted to that range
/// upstream by the bytecode format itself.
pub fn encode_stack_blob(frames: &[StackFrame]) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(STACK_BLOB_MAGIC.len() + 8 + frames.len() * 16);
    buffer.extend_from_slice(STACK_BLOB_MAGIC);
    buffer
        .write_u32::<BigEndian>(STACK_BLOB_VERSION)
        .expect("writes to a Vec<u8> never fail");
    buffer
        .write_u32::<BigEndian>(frames.len() as u32)
        .expect("writes to a Vec<u8> never fail");
    for frame in frames {
        write_string(&mut buffer, &frame.class_name);
        write_string(&mut buffer, &frame.method_name);
        buffer
            .write_i32::<BigEndian>(frame.line_number)
            .expect("writes to a Vec<u8> never fail");
    }
    buffer
}

fn write_string(buffer: &mut Vec<u8>, value: &str) {
    let length = u16::try_from(value.len()).expect("stack frame name too long to encode");
    buffer
        .write_u16::<BigEndian>(length)
        .expect("writes to a Vec<u8> never fail");
    buffer.extend_from_slice(value.as_bytes());
}

/// Decodes a blob produced by [`encode_stack_blob`]. A malformed or
/// truncated blob yields a `StackCaptureFailure`; stack-capture problems
/// are non-fatal to callers.
pub fn decode_stack_blob(bytes: &[u8]) -> Result<Vec<StackFrame>> {
    let mut cursor = io::Cursor::new(bytes);

    let mut magic = vec![0u8; STACK_BLOB_MAGIC.len()];
    cursor.read_exact(&mut magic).map_err(io_err)?;
    if magic != STACK_BLOB_MAGIC {
        return Err(FieldwatchError::StackCaptureFailure {
            reason: "bad magic header".to_owned(),
        });
    }

    let version = cursor.read_u32::<BigEndian>().map_err(io_err)?;
    if version != STACK_BLOB_VERSION {
        return Err(FieldwatchError::StackCaptureFailure {
            reason: format!("unsupported stack blob version {version}"),
        });
    }

    let count = cursor.read_u32::<BigEndian>().map_err(io_err)? as usize;
    let mut frames = Vec::with_capacity(count);
    for _ in 0..count {
        let class_name = read_string(&mut cursor)?;
        let method_name = read_string(&mut cursor)?;
        let line_number = cursor.read_i32::<BigEndian>().map_err(io_err)?;
        frames.push(StackFrame::new(class_name, method_name, line_number));
    }
    Ok(frames)
}

fn read_string(cursor: &mut io::Cursor<&[u8]>) -> Result<String> {
    let length = cursor.read_u16::<BigEndian>().map_err(io_err)? as usize;
    let mut data = vec![0u8; length];
    cursor.read_exact(&mut data).map_err(io_err)?;
    String::from_utf8(data).map_err(|e| FieldwatchError::StackCaptureFailure {
        reason: e.to_string(),
    })
}

fn io_err(cause: io::Error) -> FieldwatchError {
    FieldwatchError::StackCaptureFailure {
        reason: cause.to_string(),
    }
}
