//! Local HTTP endpoint for operator controls and analytics.
//!
//! Serves plain HTTP/1.1 on a loopback address from a single worker thread.
//! Every analytics request reopens the store read-only, so responses always
//! reflect the log as it is on disk.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::json;

use crate::analytics::{recent_events, summarize};
use crate::config::{MonitorConfig, StoreSettings};
use crate::error::MonitorError;
use crate::policy::ClassLabelPolicy;
use crate::session::SessionHandle;
use crate::storage::open_store;

const MAX_REQUEST_BYTES: usize = 8192;
const DEFAULT_EVENTS_LIMIT: usize = 100;

/// Session handle shared between the daemon and the API thread.
pub type SharedSession = Arc<Mutex<SessionHandle>>;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub store: StoreSettings,
    pub policy: ClassLabelPolicy,
}

impl ApiConfig {
    pub fn from_monitor_config(cfg: &MonitorConfig) -> Self {
        Self {
            addr: cfg.api_addr.clone(),
            store: cfg.store.clone(),
            policy: cfg.policy.clone(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    session: SharedSession,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, session: SharedSession) -> Self {
        Self { cfg, session }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        if !configured_addr.ip().is_loopback() {
            return Err(anyhow!(
                "api address '{}' is not a loopback address",
                configured_addr
            ));
        }
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, &self.cfg, &self.session, shutdown_thread) {
                log::error!("control api stopped: {}", err);
            }
        });
        log::info!("control api listening on http://{}", addr);

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: &ApiConfig,
    session: &SharedSession,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, cfg, session) {
                    log::warn!("control api request failed: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, cfg: &ApiConfig, session: &SharedSession) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    if !peer.ip().is_loopback() {
        write_json_response(&mut stream, 403, &json!({"error": "forbidden"}))?;
        return Ok(());
    }

    let request = read_request(&mut stream)?;
    log::debug!("control api {} {}", request.method, request.raw_path);
    let (status, body) = route(&request, cfg, session)?;
    write_json_response(&mut stream, status, &body)
}

fn route(
    request: &HttpRequest,
    cfg: &ApiConfig,
    session: &SharedSession,
) -> Result<(u16, serde_json::Value)> {
    let expected_method = match request.path.as_str() {
        "/health" | "/session" | "/analytics/summary" | "/analytics/events" => "GET",
        "/session/start" | "/session/stop" => "POST",
        _ => return Ok((404, json!({"error": "not_found"}))),
    };
    if request.method != expected_method {
        return Ok((405, json!({"error": "method_not_allowed"})));
    }

    match request.path.as_str() {
        "/health" => Ok((200, json!({"status": "ok"}))),
        "/session" => {
            let status = lock(session)?.status();
            Ok((200, to_value(&status)?))
        }
        "/session/start" => match lock(session)?.start() {
            Ok(()) => Ok((200, json!({"state": "running"}))),
            Err(err) => Ok(start_error(err)),
        },
        "/session/stop" => {
            let report = lock(session)?.stop()?;
            Ok((200, json!({"state": "idle", "report": to_value(&report)?})))
        }
        "/analytics/summary" => {
            let mut store = open_store(&cfg.store);
            match summarize(store.as_mut()) {
                Ok(summary) => Ok((
                    200,
                    json!({
                        "known_counts": to_value(&summary.known_counts(&cfg.policy))?,
                        "summary": to_value(&summary)?,
                    }),
                )),
                Err(MonitorError::NoData { .. }) => Ok((404, json!({"error": "no_data"}))),
                Err(err) => Err(err.into()),
            }
        }
        "/analytics/events" => {
            let limit = match request.query("limit") {
                Some(raw) => match raw.parse::<usize>() {
                    Ok(limit) => limit,
                    Err(_) => return Ok((400, json!({"error": "invalid_limit"}))),
                },
                None => DEFAULT_EVENTS_LIMIT,
            };
            let mut store = open_store(&cfg.store);
            let events = recent_events(store.as_mut(), Some(limit))?;
            Ok((200, to_value(&events)?))
        }
        _ => Ok((404, json!({"error": "not_found"}))),
    }
}

fn start_error(err: MonitorError) -> (u16, serde_json::Value) {
    match err {
        MonitorError::SessionActive => (409, json!({"error": "session_active"})),
        MonitorError::DeviceUnavailable { device, reason } => (
            503,
            json!({"error": "device_unavailable", "device": device, "reason": reason}),
        ),
        other => (500, json!({"error": "internal", "reason": other.to_string()})),
    }
}

fn lock(session: &SharedSession) -> Result<MutexGuard<'_, SessionHandle>> {
    session
        .lock()
        .map_err(|_| anyhow!("session lock poisoned"))
}

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path, parse_query(query)),
        None => (raw_path, HashMap::new()),
    };
    Ok(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
        query,
        raw_path: raw_path.to_string(),
    })
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn write_json_response(stream: &mut TcpStream, status: u16, body: &serde_json::Value) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    write_response(stream, status, "application/json", &payload)
}

fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> Result<()> {
    let status_line = match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        409 => "HTTP/1.1 409 Conflict",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    };
    let header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        len = body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(body)?;
    Ok(())
}

#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    query: HashMap<String, String>,
    raw_path: String,
}

impl HttpRequest {
    fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }
}
