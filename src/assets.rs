//! 静态资源服务：请求路径即存储路径。

use std::fs::{self, File};
use std::path::PathBuf;

/// 按扩展名确定 Content-Type，未知类型按纯文本处理
pub fn content_type(path: &str) -> &'static str {
    if path.ends_with(".html") {
        "text/html"
    } else if path.ends_with(".css") {
        "text/css"
    } else if path.ends_with(".js") {
        "application/javascript"
    } else if path.ends_with(".png") {
        "image/png"
    } else if path.ends_with(".jpg") {
        "image/jpeg"
    } else if path.ends_with(".ttf") {
        "font/ttf"
    } else {
        "text/plain"
    }
}

/// 已就绪待发送的文件
pub struct Asset {
    pub file: File,
    pub content_type: &'static str,
    pub len: u64,
}

pub struct AssetStore {
    root: PathBuf,
}

impl AssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// 请求路径映射到存储路径；拒绝上跳目录
    fn resolve(&self, request_path: &str) -> Option<PathBuf> {
        let rel = request_path.trim_start_matches('/');
        if rel.is_empty() || rel.split('/').any(|segment| segment == "..") {
            return None;
        }
        Some(self.root.join(rel))
    }

    /// 打开待发送的文件。不存在和打不开都视为未命中，由调用方走
    /// 门户回退
    pub fn open(&self, request_path: &str) -> Option<Asset> {
        let path = self.resolve(request_path)?;
        let meta = fs::metadata(&path).ok()?;
        if !meta.is_file() {
            return None;
        }

        match File::open(&path) {
            Ok(file) => Some(Asset {
                file,
                content_type: content_type(request_path),
                len: meta.len(),
            }),
            Err(e) => {
                log::warn!("failed to open {}: {}", path.display(), e);
                None
            }
        }
    }
}
