use crate::types::{AccountRecord, AcmeError, AcmeResult, CertificateBundle};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Write `value` as pretty JSON to `path` atomically.
///
/// The serialized bytes go to a `.tmp` sibling which is flushed, synced and
/// then renamed onto `path`; the rename is the only commit point, so a
/// reader (or a crash) sees either the previous complete file or the new
/// one, never a partial write. On any failure before the rename the temp
/// file is removed and `path` is left untouched.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> AcmeResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let data = serde_json::to_vec_pretty(value)?;
    let tmp = tmp_path(path);
    if let Err(e) = write_and_sync(&tmp, &data) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Read JSON from `path`. A missing file maps to [`AcmeError::NotFound`],
/// distinguishable from every other I/O failure so callers can treat
/// absence as a first-run signal.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> AcmeResult<T> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AcmeError::NotFound(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_slice(&data)?)
}

fn write_and_sync(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// On-disk layout of the persisted ACME state inside the cache directory:
/// `<email>.json` for the account, `<domain>.json` per certificate bundle.
pub struct CertStore {
    cache_dir: PathBuf,
}

impl CertStore {
    pub fn new<P: AsRef<Path>>(cache_dir: P) -> Self {
        Self {
            cache_dir: cache_dir.as_ref().to_path_buf(),
        }
    }

    pub fn account_path(&self, email: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", email))
    }

    pub fn cert_path(&self, domain: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", domain))
    }

    pub fn load_account(&self, email: &str) -> AcmeResult<AccountRecord> {
        read_json(&self.account_path(email))
    }

    pub fn save_account(&self, record: &AccountRecord) -> AcmeResult<()> {
        write_json(&self.account_path(&record.email), record)
    }

    pub fn load_cert(&self, domain: &str) -> AcmeResult<CertificateBundle> {
        read_json(&self.cert_path(domain))
    }

    pub fn save_cert(&self, bundle: &CertificateBundle) -> AcmeResult<()> {
        write_json(&self.cert_path(&bundle.domain), bundle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        value: u32,
    }

    #[test]
    fn test_write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.json");

        let record = Record {
            name: "alpha".into(),
            value: 42,
        };
        write_json(&path, &record).unwrap();

        let back: Record = read_json(&path).unwrap();
        assert_eq!(back, record);
        // The temp sibling must be gone after the commit
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_read_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_json::<Record>(&dir.path().join("missing.json")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_write_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/record.json");
        write_json(&path, &Record { name: "x".into(), value: 1 }).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_stale_temp_file_does_not_shadow_committed_value() {
        // Simulates a crash between temp write and rename: the .tmp file is
        // left behind, the committed file must still read back intact.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.json");

        let record = Record {
            name: "committed".into(),
            value: 7,
        };
        write_json(&path, &record).unwrap();

        let tmp = dir.path().join("record.json.tmp");
        fs::write(&tmp, b"{\"name\": \"partial").unwrap();

        let back: Record = read_json(&path).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_interrupted_first_write_reads_as_not_found() {
        // A temp file alone, with no committed file, must not be readable.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.json");
        fs::write(dir.path().join("record.json.tmp"), b"{\"name\": \"par").unwrap();

        let err = read_json::<Record>(&path).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_overwrite_replaces_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("record.json");

        write_json(&path, &Record { name: "old".into(), value: 1 }).unwrap();
        write_json(&path, &Record { name: "new".into(), value: 2 }).unwrap();

        let back: Record = read_json(&path).unwrap();
        assert_eq!(back, Record { name: "new".into(), value: 2 });
    }

    #[test]
    fn test_cert_store_paths() {
        let store = CertStore::new("/var/cache/autocert");
        assert_eq!(
            store.account_path("admin@example.com"),
            PathBuf::from("/var/cache/autocert/admin@example.com.json")
        );
        assert_eq!(
            store.cert_path("example.com"),
            PathBuf::from("/var/cache/autocert/example.com.json")
        );
    }
}
