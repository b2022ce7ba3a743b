//! Common test utilities for updater integration tests
//!
//! This module provides shared test infrastructure including:
//! - Mock descriptor endpoints using wiremock
//! - Recording fakes for process launch and process exit
//! - A raw TCP server that drops the connection mid-transfer

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use opp_updater::install::{InstallLauncher, ProcessExit, ProcessLauncher};
use opp_updater::{Config, Result, UpdateError, UpdateEvent, UpdateManager};

/// Version the manager under test pretends to run
pub const CURRENT_VERSION: &str = "1.5.0";

pub const DESCRIPTOR_PATH: &str = "/update_info.json";
pub const INSTALLER_PATH: &str = "/OPP_Setup.exe";
pub const CHANGELOG_PATH: &str = "/CHANGELOG.md";

/// Descriptor body pointing at the mock server's installer and changelog
pub fn descriptor_json(server: &MockServer, version: &str, file_size: Option<usize>) -> String {
    serde_json::json!({
        "Version": version,
        "ReleaseDate": "2024-05-01",
        "Mandatory": false,
        "DownloadUrl": format!("{}{}", server.uri(), INSTALLER_PATH),
        "ChangelogUrl": format!("{}{}", server.uri(), CHANGELOG_PATH),
        "MinOSVersion": "10.0",
        "FileSize": file_size.unwrap_or(0),
        "UpdateMessages": { "En": "A new version is available", "Ru": "Доступна новая версия" }
    })
    .to_string()
}

pub async fn mount_descriptor(server: &MockServer, body: String) {
    Mock::given(method("GET"))
        .and(path(DESCRIPTOR_PATH))
        .respond_with(ResponseTemplate::new(200)
            .insert_header("Content-Type", "application/json")
            .set_body_string(body))
        .mount(server)
        .await;
}

pub async fn mount_installer(server: &MockServer, payload: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(INSTALLER_PATH))
        .respond_with(ResponseTemplate::new(200)
            .insert_header("Content-Type", "application/octet-stream")
            .set_body_bytes(payload))
        .mount(server)
        .await;
}

/// Deterministic, non-trivial installer payload
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn config(check_url: String, updates_dir: &Path) -> Config {
    Config {
        check_url,
        updates_dir: updates_dir.to_path_buf(),
        timeout: Duration::from_secs(10),
        progress_interval: Duration::ZERO,
        ..Config::default()
    }
}

pub fn config_for(server: &MockServer, updates_dir: &Path) -> Config {
    config(format!("{}{}", server.uri(), DESCRIPTOR_PATH), updates_dir)
}

#[derive(Default)]
pub struct RecordingLauncher {
    pub launches: Mutex<Vec<(PathBuf, Vec<String>)>>,
    pub outcome: Mutex<Option<fn() -> UpdateError>>,
}

impl RecordingLauncher {
    pub fn failing(make_error: fn() -> UpdateError) -> Self {
        Self {
            launches: Mutex::new(Vec::new()),
            outcome: Mutex::new(Some(make_error)),
        }
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }
}

impl ProcessLauncher for RecordingLauncher {
    fn launch_elevated(&self, program: &Path, args: &[String]) -> Result<()> {
        if let Some(make_error) = *self.outcome.lock().unwrap() {
            return Err(make_error());
        }
        self.launches.lock().unwrap().push((program.to_path_buf(), args.to_vec()));
        Ok(())
    }
}

/// Records exit requests instead of terminating the test process
#[derive(Default)]
pub struct RecordingExit {
    pub calls: AtomicUsize,
}

impl RecordingExit {
    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ProcessExit for RecordingExit {
    fn exit(&self, _code: i32) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct Harness {
    pub manager: UpdateManager,
    pub launcher: Arc<RecordingLauncher>,
    pub exit: Arc<RecordingExit>,
}

pub fn harness(config: &Config) -> Harness {
    harness_with(config, RecordingLauncher::default())
}

pub fn harness_with(config: &Config, launcher: RecordingLauncher) -> Harness {
    let launcher = Arc::new(launcher);
    let exit = Arc::new(RecordingExit::default());
    let manager = UpdateManager::new(CURRENT_VERSION, config)
        .unwrap()
        .with_installer(InstallLauncher::new(launcher.clone(), exit.clone()));
    Harness { manager, launcher, exit }
}

/// Everything emitted so far
pub fn drain(events: &mut UnboundedReceiver<UpdateEvent>) -> Vec<UpdateEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

pub fn progress_values(events: &[UpdateEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            UpdateEvent::Progress(p) => Some(*p),
            _ => None,
        })
        .collect()
}

/// Serve `sent` bytes of an announced `announced`-byte body, then hang up
pub async fn spawn_truncating_server(announced: usize, sent: usize) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;

            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                announced
            );
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(&payload(sent)).await;
            let _ = socket.flush().await;
            // Dropping the socket closes the connection mid-body
        }
    });

    format!("http://{}", addr)
}

/// Serve a `total`-byte body in `piece`-byte writes spaced `interval` apart
pub async fn spawn_trickling_server(total: usize, piece: usize, interval: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;

                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    total
                );
                if socket.write_all(head.as_bytes()).await.is_err() {
                    return;
                }
                for part in payload(total).chunks(piece) {
                    if socket.write_all(part).await.is_err() || socket.flush().await.is_err() {
                        return;
                    }
                    tokio::time::sleep(interval).await;
                }
            });
        }
    });

    format!("http://{}", addr)
}

/// Descriptor whose installer lives at `installer_base`
pub fn external_descriptor_json(installer_base: &str, version: &str) -> String {
    serde_json::json!({
        "Version": version,
        "DownloadUrl": format!("{}{}", installer_base, INSTALLER_PATH),
    })
    .to_string()
}
