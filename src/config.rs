//! 设备配置
//!
//! 可选的 JSON 配置文件，逐字段回退默认值。缺失或解析失败都不阻止
//! 启动，只记录日志。

use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// 热点名称
    pub ssid: String,
    /// 伴侣传感器的确认令牌
    pub confirm_token: String,
    /// 开锁角度（度）
    pub open_angle: u32,
    /// 开锁保持时长（毫秒），超时后回到闭合位
    pub open_hold_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            ssid: "ENDER CHEST".to_string(),
            confirm_token: "authorized".to_string(),
            open_angle: 90,
            open_hold_ms: 5000,
        }
    }
}

impl DeviceConfig {
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => {
                log::info!("no config at {}, using defaults", path.display());
                return Self::default();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(config) => {
                log::info!("loaded config from {}", path.display());
                config
            }
            Err(e) => {
                log::warn!("bad config {}: {}, using defaults", path.display(), e);
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DeviceConfig;

    #[test]
    fn defaults_are_sane() {
        let config = DeviceConfig::default();
        assert_eq!(config.ssid, "ENDER CHEST");
        assert_eq!(config.confirm_token, "authorized");
        assert_eq!(config.open_angle, 90);
        assert_eq!(config.open_hold_ms, 5000);
    }

    #[test]
    fn full_file_overrides_everything() {
        let config: DeviceConfig = serde_json::from_str(
            r#"{"ssid":"WORKSHOP","confirm_token":"let-me-in","open_angle":120,"open_hold_ms":8000}"#,
        )
        .unwrap();
        assert_eq!(config.ssid, "WORKSHOP");
        assert_eq!(config.confirm_token, "let-me-in");
        assert_eq!(config.open_angle, 120);
        assert_eq!(config.open_hold_ms, 8000);
    }

    #[test]
    fn missing_fields_fall_back_per_field() {
        let config: DeviceConfig = serde_json::from_str(r#"{"ssid":"WORKSHOP"}"#).unwrap();
        assert_eq!(config.ssid, "WORKSHOP");
        assert_eq!(config.confirm_token, "authorized");
        assert_eq!(config.open_angle, 90);
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let config = DeviceConfig::load("/definitely/not/a/real/path.json");
        assert_eq!(config.ssid, "ENDER CHEST");
    }
}
