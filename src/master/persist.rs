/*!
    persistence of the identifier to address mapping

    each device class is stored as a text record, one line per slot in slot order, each line listing the identifier bytes separated by commas. Bytes can be written in decimal or `0x` hexadecimal, unmapped slots are written `0x00`:

    ```text
    0x3A, 0x11, 0x09, 0xC2
    0x00
    0x00
    0x00
    ```
*/

use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    };
use thiserror::Error;

use crate::device::{DeviceClass, Uniid, UniidTooLong};


#[derive(Error, Debug)]
pub enum PersistError {
    #[error("problem accessing persisted identifiers")]
    Io(#[from] io::Error),
    #[error("invalid byte {token:?} on line {line}")]
    Parse { line: usize, token: String },
    #[error("invalid identifier on line {line}")]
    Uniid { line: usize, source: UniidTooLong },
}


/// storage of the identifier records, one per device class
pub trait Store {
    /// identifiers persisted for this class in slot order, `None` if nothing was ever saved
    fn load(&mut self, class: DeviceClass) -> Result<Option<Vec<Uniid>>, PersistError>;
    /// replace the identifiers persisted for this class
    fn save(&mut self, class: DeviceClass, identifiers: &[Uniid]) -> Result<(), PersistError>;
}
impl<S: Store + ?Sized> Store for &mut S {
    fn load(&mut self, class: DeviceClass) -> Result<Option<Vec<Uniid>>, PersistError> {
        (**self).load(class)
    }
    fn save(&mut self, class: DeviceClass, identifiers: &[Uniid]) -> Result<(), PersistError> {
        (**self).save(class, identifiers)
    }
}


/// parse a record, blank lines are ignored
pub fn parse_record(text: &str) -> Result<Vec<Uniid>, PersistError> {
    let mut identifiers = Vec::new();
    for (line, content) in text.lines().map(str::trim).filter(|content| !content.is_empty()).enumerate() {
        let bytes = content.split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| parse_byte(token).ok_or_else(|| PersistError::Parse {line, token: token.into()}))
            .collect::<Result<Vec<u8>, _>>()?;
        identifiers.push(Uniid::try_from(&bytes[..])
            .map_err(|source| PersistError::Uniid {line, source})?);
    }
    Ok(identifiers)
}

fn parse_byte(token: &str) -> Option<u8> {
    match token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16).ok(),
        None => token.parse().ok(),
    }
}

/// format a record the way [parse_record] reads it
pub fn format_record(identifiers: &[Uniid]) -> String {
    identifiers.iter()
        .map(|uniid| {
            if uniid.is_empty() {
                "0x00".to_string()
            }
            else {
                uniid.as_bytes().iter()
                    .map(|byte| format!("{:#04X}", byte))
                    .collect::<Vec<_>>()
                    .join(", ")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}


/// records kept in memory, for tests or hosts persisting them by their own means
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    records: HashMap<DeviceClass, String>,
    /// number of successful saves so far
    pub saves: usize,
}
impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_record(mut self, class: DeviceClass, record: impl Into<String>) -> Self {
        self.records.insert(class, record.into());
        self
    }
    pub fn record(&self, class: DeviceClass) -> Option<&str> {
        self.records.get(&class).map(String::as_str)
    }
}
impl Store for MemoryStore {
    fn load(&mut self, class: DeviceClass) -> Result<Option<Vec<Uniid>>, PersistError> {
        self.records.get(&class)
            .map(|record| parse_record(record))
            .transpose()
    }
    fn save(&mut self, class: DeviceClass, identifiers: &[Uniid]) -> Result<(), PersistError> {
        self.records.insert(class, format_record(identifiers));
        self.saves += 1;
        Ok(())
    }
}


/// one file per device class in a directory, named after the class record key
#[derive(Clone, Debug)]
pub struct FileStore {
    directory: PathBuf,
}
impl FileStore {
    pub fn new(directory: impl AsRef<Path>) -> Self {
        Self {directory: directory.as_ref().to_path_buf()}
    }
    pub fn path(&self, class: DeviceClass) -> PathBuf {
        self.directory.join(class.key())
    }
}
impl Store for FileStore {
    fn load(&mut self, class: DeviceClass) -> Result<Option<Vec<Uniid>>, PersistError> {
        match std::fs::read_to_string(self.path(class)) {
            Ok(record) => parse_record(&record).map(Some),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error.into()),
        }
    }
    fn save(&mut self, class: DeviceClass, identifiers: &[Uniid]) -> Result<(), PersistError> {
        std::fs::create_dir_all(&self.directory)?;
        let path = self.path(class);
        let temporary = path.with_extension("tmp");
        // a crash while writing leaves the previous record intact
        std::fs::write(&temporary, format_record(identifiers) + "\n")?;
        std::fs::rename(&temporary, &path)?;
        Ok(())
    }
}
