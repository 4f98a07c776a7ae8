//! On-disk layout of a crawl.
//!
//! ```text
//! <root>/contracts.json                 one JSON encoded record per line, append only
//! <root>/<aa>/<address>_<name>.sol      one file per downloaded contract, sharded by the first address byte
//! ```
//!
//! Whether a contract was already downloaded is derived from the existence of its `.sol` file alone, which is
//! what makes an interrupted crawl resumable. Two processes writing into the same root are not coordinated;
//! both may pass the existence check for the same contract and download it twice (last writer wins).

use crate::error::Error;
use crate::model::ContractRecord;
use log::debug;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

/// Name of the ledger file within the storage root.
pub const LEDGER_FILE_NAME: &str = "contracts.json";

const SOURCE_EXTENSION: &str = "sol";
const TEMP_SUFFIX: &str = ".part";

/// Longest file name most filesystems accept, in bytes.
const MAX_FILE_NAME_BYTES: usize = 255;

pub struct Storage {
    root: PathBuf,
    ledger: PathBuf,
}

impl Storage {
    /// Opens the storage rooted at `root`, creating the directory if it does not exist yet.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        create_dir(&root)?;

        Ok(Storage {
            ledger: root.join(LEDGER_FILE_NAME),
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ledger_path(&self) -> &Path {
        &self.ledger
    }

    /// Returns the shard directory of `record`, creating it if absent.
    pub fn ensure_shard(&self, record: &ContractRecord) -> Result<PathBuf, Error> {
        let shard = self.root.join(record.shard());
        create_dir(&shard)?;

        Ok(shard)
    }

    /// Returns the path the source of `record` is stored at; the same record always maps to the same path.
    ///
    /// Long names are cut such that the file name, including the temporary `.part` suffix used while writing,
    /// stays within [`MAX_FILE_NAME_BYTES`].
    pub fn destination_file(&self, record: &ContractRecord) -> PathBuf {
        let address = record.storage_address();
        let reserved = address.len() + "_.".len() + SOURCE_EXTENSION.len() + TEMP_SUFFIX.len();
        let name = record.sanitized_name();
        let name = truncate(&name, MAX_FILE_NAME_BYTES.saturating_sub(reserved));

        self.root.join(record.shard()).join(format!("{address}_{name}.{SOURCE_EXTENSION}"))
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    /// Writes `source` to `path`, replacing any previous content.
    ///
    /// The content is written to a sibling `.part` file first and renamed afterwards, hence `path` either
    /// doesn't exist or holds the complete source.
    pub fn write_source(&self, path: &Path, source: &str) -> Result<(), Error> {
        let mut temp = path.as_os_str().to_owned();
        temp.push(TEMP_SUFFIX);
        let temp = PathBuf::from(temp);

        let mut file = File::create(&temp).map_err(|err| Error::StorageOpen(temp.clone(), err))?;
        file.write_all(source.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|err| Error::StorageWrite(temp.clone(), err))?;
        drop(file);

        std::fs::rename(&temp, path).map_err(|err| Error::StorageRename(path.to_path_buf(), err))?;
        debug!("Wrote {} bytes to {}", source.len(), path.display());

        Ok(())
    }

    /// Appends `record` as a single JSON line to the ledger, creating the ledger if needed.
    pub fn append_ledger(&self, record: &ContractRecord) -> Result<(), Error> {
        let mut line = serde_json::to_string(record)
            .map_err(|err| Error::StorageSerialize(record.address.clone(), err))?;
        line.push('\n');

        let mut ledger = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.ledger)
            .map_err(|err| Error::StorageOpen(self.ledger.clone(), err))?;

        ledger
            .write_all(line.as_bytes())
            .map_err(|err| Error::StorageWrite(self.ledger.clone(), err))
    }
}

/// Returns the longest prefix of `value` with at most `max_bytes` bytes, cut on a char boundary.
fn truncate(value: &str, max_bytes: usize) -> &str {
    if value.len() <= max_bytes {
        return value;
    }

    let mut end = max_bytes;
    while !value.is_char_boundary(end) {
        end -= 1;
    }

    &value[..end]
}

#[inline]
fn create_dir(path: &Path) -> Result<(), Error> {
    // `create_dir_all` already treats an existing directory as success
    std::fs::create_dir_all(path).map_err(|err| Error::StorageCreateDir(path.to_path_buf(), err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage() -> (TempDir, Storage) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path().join("mainnet")).unwrap();
        (dir, storage)
    }

    #[test]
    fn destination_file_layout() {
        let (_dir, storage) = storage();
        let record = ContractRecord::new("0x01", "Token");

        assert_eq!(storage.destination_file(&record), storage.root().join("01").join("01_Token.sol"));
    }

    #[test]
    fn destination_file_is_deterministic_and_safe() {
        let (_dir, storage) = storage();
        let record = ContractRecord::new("0xAABBCC0011", "Foo/Bar");

        let first = storage.destination_file(&record);
        let second = storage.destination_file(&record.clone());
        assert_eq!(first, second);

        let file_name = first.file_name().unwrap().to_str().unwrap();
        assert_eq!(file_name, "aabbcc0011_Foo_Bar.sol");
        assert!(!file_name.contains('/'));
        assert!(!file_name.contains('\\'));
        assert_eq!(first.parent().unwrap(), storage.root().join("aa"));
    }

    #[test]
    fn destination_file_caps_long_names() {
        let (_dir, storage) = storage();
        let record = ContractRecord::new("0x4a25e19e0765ef63d7196728ac3c3f3119199555", "A".repeat(300));

        let path = storage.destination_file(&record);
        assert_eq!(path, storage.destination_file(&record));

        let file_name = path.file_name().unwrap().to_str().unwrap();
        assert!(file_name.len() + TEMP_SUFFIX.len() <= MAX_FILE_NAME_BYTES);
        assert!(file_name.starts_with("4a25e19e0765ef63d7196728ac3c3f3119199555_AAAA"));
        assert!(file_name.ends_with(".sol"));

        storage.ensure_shard(&record).unwrap();
        storage.write_source(&path, "contract A {}").unwrap();
        assert!(storage.exists(&path));
    }

    #[test]
    fn destination_file_cuts_names_on_char_boundary() {
        let (_dir, storage) = storage();
        let record = ContractRecord::new("0x01", "\u{00e9}".repeat(200));

        let path = storage.destination_file(&record);
        let file_name = path.file_name().unwrap().to_str().unwrap();
        assert!(file_name.len() + TEMP_SUFFIX.len() <= MAX_FILE_NAME_BYTES);
        assert!(file_name.trim_start_matches("01_").trim_end_matches(".sol").chars().all(|x| x == '\u{00e9}'));
    }

    #[test]
    fn truncate_keeps_short_values() {
        assert_eq!(truncate("Token", 10), "Token");
        assert_eq!(truncate("Token", 3), "Tok");
        assert_eq!(truncate("\u{00e9}\u{00e9}", 3), "\u{00e9}");
        assert_eq!(truncate("Token", 0), "");
    }

    #[test]
    fn ensure_shard_is_idempotent() {
        let (_dir, storage) = storage();
        let record = ContractRecord::new("0xab12", "X");

        let first = storage.ensure_shard(&record).unwrap();
        let second = storage.ensure_shard(&record).unwrap();
        assert_eq!(first, second);
        assert!(first.is_dir());
    }

    #[test]
    fn ensure_shard_fails_when_blocked_by_file() {
        let (_dir, storage) = storage();
        std::fs::write(storage.root().join("ab"), b"not a directory").unwrap();

        let err = storage.ensure_shard(&ContractRecord::new("0xab12", "X")).unwrap_err();
        assert!(err.is_storage());
    }

    #[test]
    fn write_source_replaces_content_and_leaves_no_temp_file() {
        let (_dir, storage) = storage();
        let record = ContractRecord::new("0x01", "Token");
        storage.ensure_shard(&record).unwrap();
        let path = storage.destination_file(&record);

        assert!(!storage.exists(&path));
        storage.write_source(&path, "contract A {}").unwrap();
        storage.write_source(&path, "contract B {}").unwrap();

        assert!(storage.exists(&path));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "contract B {}");

        let entries = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn append_ledger_appends_lines() {
        let (_dir, storage) = storage();

        storage.append_ledger(&ContractRecord::new("0x01", "Token")).unwrap();
        storage.append_ledger(&ContractRecord::new("0x02", "Vault")).unwrap();
        storage.append_ledger(&ContractRecord::new("0x01", "Token")).unwrap();

        let content = std::fs::read_to_string(storage.ledger_path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], lines[2]);
        assert!(lines[1].contains("Vault"));
    }

    #[test]
    fn reopening_keeps_existing_ledger() {
        let (dir, storage) = storage();
        storage.append_ledger(&ContractRecord::new("0x01", "Token")).unwrap();

        let reopened = Storage::new(dir.path().join("mainnet")).unwrap();
        reopened.append_ledger(&ContractRecord::new("0x02", "Vault")).unwrap();

        let content = std::fs::read_to_string(reopened.ledger_path()).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
