//! HTTP 服务器和 SoftAP 管理

use std::sync::Arc;

use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::modem::Modem,
    http::server::{Configuration, EspHttpServer},
    ipv4::{self, Mask, Subnet},
    netif::{EspNetif, NetifConfiguration, NetifStack},
    wifi::{
        AccessPointConfiguration, AuthMethod, BlockingWifi, Configuration as WifiConfig, EspWifi,
        WifiDriver,
    },
};

use super::handlers::{self, PortalContext};

/// AP 模式的固定 IP 地址，同时是 DNS 应答与门户重定向的目标
pub const AP_IP: ipv4::Ipv4Addr = ipv4::Ipv4Addr::new(192, 168, 4, 1);
const AP_GATEWAY: ipv4::Ipv4Addr = ipv4::Ipv4Addr::new(192, 168, 4, 1);
const AP_NETMASK: Mask = Mask(24);

pub struct CaptivePortal<'a> {
    _wifi: BlockingWifi<EspWifi<'a>>,
    _server: EspHttpServer<'a>,
}

impl<'a> CaptivePortal<'a> {
    pub fn start(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        ssid: &str,
        ctx: Arc<PortalContext>,
    ) -> anyhow::Result<Self> {
        // 1. 配置并启动 SoftAP
        let wifi = Self::start_ap(modem, sysloop, ssid)?;
        log::info!("SoftAP started: {}", ssid);

        // 2. 启动 HTTP 服务器
        let server = Self::start_http_server(ctx)?;
        log::info!("HTTP server started on {}:80", AP_IP);

        Ok(Self {
            _wifi: wifi,
            _server: server,
        })
    }

    fn start_ap(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        ssid: &str,
    ) -> anyhow::Result<BlockingWifi<EspWifi<'a>>> {
        // 固定 IP，DHCP 把本机地址同时作为 DNS 下发给客户端
        let ap_netif_config = NetifConfiguration {
            ip_configuration: Some(ipv4::Configuration::Router(ipv4::RouterConfiguration {
                subnet: Subnet {
                    gateway: AP_GATEWAY,
                    mask: AP_NETMASK,
                },
                dhcp_enabled: true,
                dns: Some(AP_IP),
                secondary_dns: None,
            })),
            ..NetifConfiguration::wifi_default_router()
        };

        let ap_netif = EspNetif::new_with_conf(&ap_netif_config)?;

        let driver = WifiDriver::new(modem, sysloop.clone(), None)?;

        // AP 模式不使用 STA netif，但 wrap_all 需要
        let sta_netif = EspNetif::new(NetifStack::Sta)?;

        let mut wifi = BlockingWifi::wrap(
            EspWifi::wrap_all(driver, sta_netif, ap_netif)?,
            sysloop,
        )?;

        let ap_config = AccessPointConfiguration {
            ssid: ssid
                .try_into()
                .map_err(|_| anyhow::anyhow!("SSID '{}' is too long", ssid))?,
            ssid_hidden: false,
            channel: 1,
            auth_method: AuthMethod::None,
            max_connections: 4,
            ..Default::default()
        };

        wifi.set_configuration(&WifiConfig::AccessPoint(ap_config))?;
        wifi.start()?;

        Ok(wifi)
    }

    fn start_http_server(ctx: Arc<PortalContext>) -> anyhow::Result<EspHttpServer<'a>> {
        let config = Configuration {
            stack_size: 8192,
            max_uri_handlers: 12,
            // 通配路由承接所有未注册路径
            uri_match_wildcard: true,
            ..Default::default()
        };

        let mut server = EspHttpServer::new(&config)?;

        handlers::register_routes(&mut server, ctx)?;

        Ok(server)
    }
}
