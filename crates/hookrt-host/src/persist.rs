#![forbid(unsafe_code)]

//! Persisted state cells.
//!
//! [`persisted_cell`] creates a [`State`] whose initial value is loaded from a
//! [`StateStorage`] backend and whose every change is written back by an
//! effect. Values are stored as JSON so backends stay type-agnostic.
//!
//! # Backends
//!
//! - [`MemoryStorage`]: a map in memory, for tests and ephemeral sessions.
//! - [`FileStorage`]: one JSON object on disk. Writes go to a sibling temp
//!   file which is then renamed over the target, so a crash mid-write leaves
//!   the previous contents intact.
//!
//! # Failure Modes
//!
//! Loading errors are returned to the caller. Write-back runs inside an
//! effect where there is no caller to report to, so write failures are
//! logged at `warn` and the in-memory value stays authoritative.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use hookrt_core::{Runtime, State, deps};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Errors from loading or storing persisted values.
#[derive(Debug)]
pub enum PersistError {
    /// Reading or writing the backing file failed.
    Io(io::Error),
    /// A value could not be encoded or decoded.
    Json(serde_json::Error),
    /// The backing file does not hold a JSON object.
    NotAnObject { path: PathBuf },
}

impl fmt::Display for PersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "storage I/O error: {e}"),
            Self::Json(e) => write!(f, "storage encoding error: {e}"),
            Self::NotAnObject { path } => {
                write!(f, "{} does not contain a JSON object", path.display())
            }
        }
    }
}

impl std::error::Error for PersistError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::NotAnObject { .. } => None,
        }
    }
}

impl From<io::Error> for PersistError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for PersistError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

/// A named-value store.
pub trait StateStorage {
    /// The stored value for `name`, if any.
    fn load(&self, name: &str) -> Result<Option<Value>, PersistError>;

    /// Store `value` under `name`.
    fn store(&self, name: &str, value: Value) -> Result<(), PersistError>;
}

/// In-memory storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: RefCell<BTreeMap<String, Value>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.values.borrow().get(name).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.borrow().is_empty()
    }
}

impl StateStorage for MemoryStorage {
    fn load(&self, name: &str) -> Result<Option<Value>, PersistError> {
        Ok(self.get(name))
    }

    fn store(&self, name: &str, value: Value) -> Result<(), PersistError> {
        self.values.borrow_mut().insert(name.to_string(), value);
        Ok(())
    }
}

/// Storage backed by a single JSON object file.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    values: RefCell<Map<String, Value>>,
}

impl FileStorage {
    /// Open `path`, reading existing contents if the file exists.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or is not a JSON object.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let path = path.into();
        let values = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes)? {
                Value::Object(map) => map,
                _ => return Err(PersistError::NotAnObject { path }),
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), entries = values.len(), "file storage opened");
        Ok(Self {
            path,
            values: RefCell::new(values),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_atomic(&self, values: &Map<String, Value>) -> Result<(), PersistError> {
        let bytes = serde_json::to_vec_pretty(values)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl StateStorage for FileStorage {
    fn load(&self, name: &str) -> Result<Option<Value>, PersistError> {
        Ok(self.values.borrow().get(name).cloned())
    }

    /// The in-memory copy only changes once the file write succeeds, so a
    /// failed store can be retried with the same value.
    fn store(&self, name: &str, value: Value) -> Result<(), PersistError> {
        let mut next = self.values.borrow().clone();
        if next.get(name) == Some(&value) {
            return Ok(());
        }
        next.insert(name.to_string(), value);
        self.write_atomic(&next)?;
        *self.values.borrow_mut() = next;
        Ok(())
    }
}

/// Create a state cell backed by `storage` under `name`.
///
/// The cell starts from the stored value, or `default` when nothing is
/// stored. An effect depending on the cell writes each new value back.
///
/// # Errors
///
/// Fails if the stored value cannot be loaded or does not decode as `T`.
pub fn persisted_cell<T>(
    runtime: &Runtime,
    storage: Rc<dyn StateStorage>,
    name: &str,
    default: T,
) -> Result<State<T>, PersistError>
where
    T: Serialize + DeserializeOwned + Clone + PartialEq + 'static,
{
    let initial = match storage.load(name)? {
        Some(value) => serde_json::from_value(value)?,
        None => default,
    };
    let cell = runtime.create_cell(initial);
    let reader = cell.clone();
    let name = name.to_string();
    runtime.register_effect(
        move || {
            let result = reader
                .with(|v| serde_json::to_value(v))
                .map_err(PersistError::from)
                .and_then(|value| storage.store(&name, value));
            if let Err(err) = result {
                tracing::warn!(name = %name, error = %err, "failed to persist state");
            }
        },
        deps![cell],
    );
    Ok(cell)
}
