use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::prelude::Peripherals;

mod access;
mod assets;
mod config;
mod credentials;
mod dns;
mod latch;
mod portal;

use latch::Actuator;

/// 存储分区挂载点与固定文件路径
const STORAGE_MOUNT: &str = "/spiffs";
const STORAGE_LABEL: &str = "storage";
const PASSWD_PATH: &str = "/spiffs/passwd.txt";
const CONFIG_PATH: &str = "/spiffs/config.json";

/// 主循环节拍
const TICK: Duration = Duration::from_millis(20);

fn main() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
    log::info!("latchkit {} booting", env!("CARGO_PKG_VERSION"));

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;

    // 挂载失败只降级资源服务和口令持久化，不阻止启动
    if let Err(e) = mount_storage(STORAGE_MOUNT, STORAGE_LABEL) {
        log::error!("storage mount failed, serving without assets: {:?}", e);
    }

    let config = config::DeviceConfig::load(CONFIG_PATH);
    log::info!("config: {:?}", config);

    let (trigger_tx, trigger_rx) = mpsc::channel();

    let ctx = Arc::new(portal::PortalContext {
        store: credentials::CredentialStore::new(PASSWD_PATH),
        assets: assets::AssetStore::new(STORAGE_MOUNT),
        triggers: trigger_tx,
        config: config.clone(),
    });

    let _portal = portal::CaptivePortal::start(peripherals.modem, sysloop, &config.ssid, ctx)?;

    let mut dns = dns::CaptiveDns::bind(portal::AP_IP)?;

    // 舵机信号脚 GPIO13
    let mut latch = latch::ServoLatch::new(peripherals.pins.gpio13.into(), config.open_angle)?;
    latch.reset()?;

    let mut machine = access::AccessMachine::new();
    let open_hold = Duration::from_millis(config.open_hold_ms);
    let mut opened_at: Option<Instant> = None;

    log::info!("entering control loop");
    loop {
        // 1. 域名解析泵
        dns.pump();

        // 2. 排队的触发事件
        access::drain_triggers(&mut machine, &trigger_rx);

        // 3. 到位则开锁，保持窗口过后回到闭合位
        match access::actuate_if_triggered(&mut machine, &mut latch) {
            Ok(true) => opened_at = Some(Instant::now()),
            Ok(false) => {}
            Err(e) => log::error!("latch open failed: {:?}", e),
        }

        if let Some(t) = opened_at {
            if t.elapsed() >= open_hold {
                if let Err(e) = latch.reset() {
                    log::error!("latch reset failed: {:?}", e);
                }
                opened_at = None;
                log::info!("latch back to rest");
            }
        }

        std::thread::sleep(TICK);
    }
}

fn mount_storage(mount: &str, label: &str) -> anyhow::Result<()> {
    use std::ffi::CString;

    let base_path = CString::new(mount)?;
    let partition_label = CString::new(label)?;

    let conf = esp_idf_svc::sys::esp_vfs_spiffs_conf_t {
        base_path: base_path.as_ptr(),
        partition_label: partition_label.as_ptr(),
        max_files: 8,
        format_if_mount_failed: false,
    };

    esp_idf_svc::sys::esp!(unsafe { esp_idf_svc::sys::esp_vfs_spiffs_register(&conf) })?;
    log::info!("storage mounted at {}", mount);
    Ok(())
}
