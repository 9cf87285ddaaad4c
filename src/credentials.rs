//! 口令存取
//!
//! 单一口令以明文存放在存储分区的固定文件中（仅一行）。文件缺失视为
//! 从未设置过，回退到内置默认口令。每次校验都重新读取文件，写入对下
//! 一次校验立即生效。

use std::fs;
use std::path::PathBuf;

/// 出厂默认口令，存储文件缺失时生效
pub const DEFAULT_SECRET: &str = "passw0rd";

pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// 读取当前口令，去掉尾部空白；读不到就回退默认值
    pub fn read(&self) -> String {
        match fs::read_to_string(&self.path) {
            Ok(raw) => raw.trim_end().to_string(),
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("failed to read {}: {}", self.path.display(), e);
                }
                DEFAULT_SECRET.to_string()
            }
        }
    }

    /// 无条件覆盖旧口令，不保留历史。合法性校验由路由处理器负责
    pub fn write(&self, secret: &str) -> anyhow::Result<()> {
        fs::write(&self.path, secret)?;
        Ok(())
    }

    /// 精确比较，大小写敏感，不做任何归一化
    pub fn verify(&self, supplied: &str) -> bool {
        supplied == self.read()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use super::{CredentialStore, DEFAULT_SECRET};

    fn temp_store(name: &str) -> (CredentialStore, PathBuf) {
        let path = std::env::temp_dir().join(format!("latchkit-test-{}", name));
        let _ = fs::remove_file(&path);
        (CredentialStore::new(&path), path)
    }

    #[test]
    fn missing_file_yields_default() {
        let (store, _path) = temp_store("missing");
        assert_eq!(store.read(), DEFAULT_SECRET);
        assert!(store.verify(DEFAULT_SECRET));
    }

    #[test]
    fn write_then_read_round_trips() {
        let (store, path) = temp_store("roundtrip");
        store.write("hunter42").unwrap();
        assert_eq!(store.read(), "hunter42");
        let _ = fs::remove_file(path);
    }

    #[test]
    fn read_trims_trailing_newline() {
        let (store, path) = temp_store("trailing");
        fs::write(&path, "hunter42\n").unwrap();
        assert_eq!(store.read(), "hunter42");
        let _ = fs::remove_file(path);
    }

    #[test]
    fn verify_is_case_sensitive() {
        let (store, path) = temp_store("case");
        store.write("Sesame").unwrap();
        assert!(store.verify("Sesame"));
        assert!(!store.verify("sesame"));
        let _ = fs::remove_file(path);
    }

    #[test]
    fn write_replaces_previous_secret() {
        let (store, path) = temp_store("replace");
        store.write("first-one").unwrap();
        store.write("second-one").unwrap();
        assert_eq!(store.read(), "second-one");
        assert!(!store.verify("first-one"));
        let _ = fs::remove_file(path);
    }
}
