//! HTTP 路由处理器
//!
//! 路由表在启动时一次性注册，之后不可变。未匹配的请求先查静态资源，
//! 再失败则以 302 把客户端弹回门户地址（强制门户行为）。每个请求恰好
//! 写出一个响应。
//!
//! 处理器自身不碰执行机构：有效触发只是排队送往主循环，状态推进与
//! 开锁全部发生在那一侧。

use std::collections::HashMap;
use std::io::Read;
use std::sync::mpsc::Sender;
use std::sync::Arc;

use esp_idf_svc::{
    http::{
        server::{EspHttpConnection, EspHttpServer, Request},
        Method,
    },
    io::Write,
};

use crate::access::Trigger;
use crate::assets::{Asset, AssetStore};
use crate::config::DeviceConfig;
use crate::credentials::CredentialStore;

/// 门户根地址，强制门户重定向的目标
const PORTAL_URL: &str = "http://192.168.4.1";

/// 新口令长度限制（含边界）
const SECRET_MIN_LEN: usize = 4;
const SECRET_MAX_LEN: usize = 32;

/// 请求体上限；门户表单远小于此
const BODY_LIMIT: usize = 1024;

/// 处理器共享的设备侧依赖，显式传入而不是闭包偷偷捕获
pub struct PortalContext {
    pub store: CredentialStore,
    pub assets: AssetStore,
    pub triggers: Sender<Trigger>,
    pub config: DeviceConfig,
}

type Handler =
    for<'r> fn(Request<&mut EspHttpConnection<'r>>, &PortalContext) -> anyhow::Result<()>;

struct Route {
    method: Method,
    path: &'static str,
    handler: Handler,
}

/// 路由表；同一 (method, path) 至多一条
const ROUTES: &[Route] = &[
    Route {
        method: Method::Get,
        path: "/",
        handler: handle_index,
    },
    Route {
        method: Method::Post,
        path: "/open",
        handler: handle_open,
    },
    Route {
        method: Method::Post,
        path: "/edit-passwd",
        handler: handle_edit_passwd,
    },
    Route {
        method: Method::Post,
        path: "/uid",
        handler: handle_uid,
    },
];

/// 注册路由表与未匹配回退
pub fn register_routes(
    server: &mut EspHttpServer<'_>,
    ctx: Arc<PortalContext>,
) -> anyhow::Result<()> {
    for route in ROUTES {
        let ctx = ctx.clone();
        let handler = route.handler;
        server.fn_handler(route.path, route.method, move |req| handler(req, &ctx))?;
    }

    // 未匹配回退：先查静态资源，再退回门户重定向
    for method in [Method::Get, Method::Post] {
        let ctx = ctx.clone();
        server.fn_handler::<anyhow::Error, _>("/*", method, move |req| {
            handle_fallback(req, &ctx)
        })?;
    }

    Ok(())
}

fn handle_index(
    req: Request<&mut EspHttpConnection<'_>>,
    ctx: &PortalContext,
) -> anyhow::Result<()> {
    serve_asset_or_redirect(req, ctx, "/index.html")
}

fn handle_open(
    mut req: Request<&mut EspHttpConnection<'_>>,
    ctx: &PortalContext,
) -> anyhow::Result<()> {
    let body = read_body(&mut req)?;
    let form = parse_form(&body);

    let password = match form.get("password") {
        Some(password) => password,
        None => {
            req.into_status_response(400)?
                .write_all(b"missing 'password' field")?;
            return Ok(());
        }
    };

    if ctx.store.verify(password) {
        if let Err(e) = ctx.triggers.send(Trigger::Password) {
            log::error!("trigger queue closed: {}", e);
        }
        redirect(req, "/success.html")
    } else {
        log::info!("password rejected");
        redirect(req, "/fail.html")
    }
}

fn handle_edit_passwd(
    mut req: Request<&mut EspHttpConnection<'_>>,
    ctx: &PortalContext,
) -> anyhow::Result<()> {
    let body = read_body(&mut req)?;
    let form = parse_form(&body);

    match validate_change(&form, &ctx.store.read()) {
        Ok(new_secret) => {
            ctx.store.write(new_secret)?;
            log::info!("password updated");
            req.into_ok_response()?.write_all(b"password updated")?;
        }
        Err(e) => {
            log::info!("password change rejected: {:?}", e);
            req.into_status_response(e.status())?
                .write_all(e.message().as_bytes())?;
        }
    }

    Ok(())
}

fn handle_uid(
    mut req: Request<&mut EspHttpConnection<'_>>,
    ctx: &PortalContext,
) -> anyhow::Result<()> {
    let body = read_body(&mut req)?;

    if body.is_empty() {
        req.into_status_response(400)?.write_all(b"empty body")?;
        return Ok(());
    }

    // 与令牌精确匹配才算确认，其余内容只应答不推进
    if body == ctx.config.confirm_token {
        if let Err(e) = ctx.triggers.send(Trigger::RemoteConfirm) {
            log::error!("trigger queue closed: {}", e);
        }
    } else {
        log::info!("unrecognized confirmation token");
    }

    req.into_ok_response()?.write_all(b"received")?;
    Ok(())
}

fn handle_fallback(
    req: Request<&mut EspHttpConnection<'_>>,
    ctx: &PortalContext,
) -> anyhow::Result<()> {
    let path = req.uri().split('?').next().unwrap_or("/").to_string();
    log::debug!("unmatched request: {}", path);
    serve_asset_or_redirect(req, ctx, &path)
}

fn serve_asset_or_redirect(
    req: Request<&mut EspHttpConnection<'_>>,
    ctx: &PortalContext,
    path: &str,
) -> anyhow::Result<()> {
    match ctx.assets.open(path) {
        Some(asset) => stream_asset(req, asset),
        None => redirect(req, PORTAL_URL),
    }
}

fn stream_asset(req: Request<&mut EspHttpConnection<'_>>, asset: Asset) -> anyhow::Result<()> {
    let len = asset.len.to_string();
    let mut resp = req.into_response(
        200,
        None,
        &[
            ("Content-Type", asset.content_type),
            ("Content-Length", &len),
        ],
    )?;

    let mut file = asset.file;
    let mut buf = [0u8; 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        resp.write_all(&buf[..n])?;
    }

    Ok(())
}

/// 302 无响应体
fn redirect(req: Request<&mut EspHttpConnection<'_>>, target: &str) -> anyhow::Result<()> {
    req.into_response(302, None, &[("Location", target)])?;
    Ok(())
}

fn read_body(req: &mut Request<&mut EspHttpConnection<'_>>) -> anyhow::Result<String> {
    let mut buf = [0u8; 512];
    let mut data = Vec::new();
    loop {
        let n = req.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > BODY_LIMIT {
            anyhow::bail!("request body exceeds {} bytes", BODY_LIMIT);
        }
    }
    Ok(String::from_utf8(data)?)
}

/// 口令修改被拒的原因，对应各自的响应状态
#[derive(Debug, PartialEq, Eq)]
enum ChangeError {
    MissingField(&'static str),
    WrongOldSecret,
    ConfirmationMismatch,
    BadLength(usize),
}

impl ChangeError {
    fn status(&self) -> u16 {
        match self {
            ChangeError::WrongOldSecret => 403,
            _ => 400,
        }
    }

    fn message(&self) -> String {
        match self {
            ChangeError::MissingField(name) => format!("missing '{}' field", name),
            ChangeError::WrongOldSecret => "old password does not match".to_string(),
            ChangeError::ConfirmationMismatch => {
                "new password and confirmation differ".to_string()
            }
            ChangeError::BadLength(len) => format!(
                "password length {} not in {}..={}",
                len, SECRET_MIN_LEN, SECRET_MAX_LEN
            ),
        }
    }
}

/// 依次校验：字段齐全 -> 旧口令正确 -> 两次输入一致 -> 长度合规。
/// 任一失败都不落盘。
fn validate_change<'f>(
    form: &'f HashMap<String, String>,
    current: &str,
) -> Result<&'f str, ChangeError> {
    let old = form
        .get("oldPassword")
        .ok_or(ChangeError::MissingField("oldPassword"))?;
    let new = form
        .get("newPassword")
        .ok_or(ChangeError::MissingField("newPassword"))?;
    let confirmation = form
        .get("confirmation")
        .ok_or(ChangeError::MissingField("confirmation"))?;

    if old != current {
        return Err(ChangeError::WrongOldSecret);
    }
    if new != confirmation {
        return Err(ChangeError::ConfirmationMismatch);
    }
    if new.len() < SECRET_MIN_LEN || new.len() > SECRET_MAX_LEN {
        return Err(ChangeError::BadLength(new.len()));
    }

    Ok(new)
}

/// 解析 `application/x-www-form-urlencoded` 请求体
fn parse_form(body: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    for pair in body.split('&') {
        if pair.is_empty() {
            continue;
        }
        let mut parts = pair.splitn(2, '=');
        let key = parts.next().unwrap_or("");
        let value = parts.next().unwrap_or("");
        if key.is_empty() {
            continue;
        }
        fields.insert(percent_decode(key), percent_decode(value));
    }
    fields
}

/// `+` 还原为空格，`%XX` 还原为原始字节；非法转义原样保留
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => match (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                (Some(hi), Some(lo)) => {
                    out.push(hi << 4 | lo);
                    i += 3;
                }
                _ => {
                    out.push(b'%');
                    i += 1;
                }
            },
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{parse_form, percent_decode, validate_change, ChangeError, ROUTES};

    fn form(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn route_table_has_no_duplicates() {
        for (i, a) in ROUTES.iter().enumerate() {
            for b in &ROUTES[i + 1..] {
                assert!(
                    !(a.method == b.method && a.path == b.path),
                    "duplicate route {:?} {}",
                    a.method,
                    a.path
                );
            }
        }
    }

    #[test]
    fn form_splits_pairs() {
        let fields = parse_form("password=admin123&extra=1");
        assert_eq!(fields.get("password").unwrap(), "admin123");
        assert_eq!(fields.get("extra").unwrap(), "1");
        assert_eq!(fields.len(), 2);
    }

    #[test]
    fn form_decodes_escapes() {
        let fields = parse_form("password=p%40ss+w0rd%21");
        assert_eq!(fields.get("password").unwrap(), "p@ss w0rd!");
    }

    #[test]
    fn form_tolerates_junk() {
        let fields = parse_form("&=orphan&key");
        assert_eq!(fields.get("key").unwrap(), "");
        assert_eq!(fields.len(), 1);
    }

    #[test]
    fn bad_escape_is_kept_verbatim() {
        assert_eq!(percent_decode("100%z5"), "100%z5");
        assert_eq!(percent_decode("trailing%2"), "trailing%2");
    }

    #[test]
    fn change_requires_all_fields() {
        let err = validate_change(&form(&[("oldPassword", "x")]), "x").unwrap_err();
        assert_eq!(err, ChangeError::MissingField("newPassword"));
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn change_rejects_wrong_old_secret() {
        let fields = form(&[
            ("oldPassword", "nope"),
            ("newPassword", "fresh-one"),
            ("confirmation", "fresh-one"),
        ]);
        let err = validate_change(&fields, "passw0rd").unwrap_err();
        assert_eq!(err, ChangeError::WrongOldSecret);
        assert_eq!(err.status(), 403);
    }

    #[test]
    fn change_rejects_mismatched_confirmation() {
        let fields = form(&[
            ("oldPassword", "passw0rd"),
            ("newPassword", "fresh-one"),
            ("confirmation", "fresh-two"),
        ]);
        assert_eq!(
            validate_change(&fields, "passw0rd").unwrap_err(),
            ChangeError::ConfirmationMismatch
        );
    }

    #[test]
    fn change_enforces_length_bounds() {
        let too_short = form(&[
            ("oldPassword", "passw0rd"),
            ("newPassword", "abc"),
            ("confirmation", "abc"),
        ]);
        assert_eq!(
            validate_change(&too_short, "passw0rd").unwrap_err(),
            ChangeError::BadLength(3)
        );

        let long = "x".repeat(33);
        let too_long = form(&[
            ("oldPassword", "passw0rd"),
            ("newPassword", &long),
            ("confirmation", &long),
        ]);
        assert_eq!(
            validate_change(&too_long, "passw0rd").unwrap_err(),
            ChangeError::BadLength(33)
        );
    }

    #[test]
    fn change_accepts_boundary_lengths() {
        for len in [4usize, 32] {
            let secret = "y".repeat(len);
            let fields = form(&[
                ("oldPassword", "passw0rd"),
                ("newPassword", &secret),
                ("confirmation", &secret),
            ]);
            assert_eq!(validate_change(&fields, "passw0rd").unwrap(), secret);
        }
    }
}
