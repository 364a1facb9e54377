use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use worklog_core::{BackendKind, ConnectionManager, ConnectionProfile, CoreConfig, SwitchState};

/// Request line and authorization header of one received request.
#[derive(Debug, Clone)]
struct Seen {
    request_line: String,
    authorization: Option<String>,
}

/// Minimal document-store stand-in answering every request with `status`.
struct FakeStore {
    endpoint: String,
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl FakeStore {
    fn start(status: u16) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = format!("http://{}", listener.local_addr().unwrap());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        thread::spawn(move || {
            for stream in listener.incoming().flatten() {
                serve(stream, status, &log);
            }
        });
        Self { endpoint, seen }
    }

    fn requests(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }
}

fn serve(mut stream: TcpStream, status: u16, log: &Mutex<Vec<Seen>>) -> Option<()> {
    let mut reader = BufReader::new(stream.try_clone().ok()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).ok()?;

    let mut authorization = None;
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).ok()?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':')?;
        match name.to_ascii_lowercase().as_str() {
            "authorization" => authorization = Some(value.trim().to_string()),
            "content-length" => content_length = value.trim().parse().unwrap_or(0),
            _ => {}
        }
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).ok()?;

    log.lock().unwrap().push(Seen {
        request_line: request_line.trim_end().to_string(),
        authorization,
    });

    let payload = if status == 200 { r#"{"documents":[]}"# } else { r#"{"error":"unavailable"}"# };
    let response = format!(
        "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
        payload.len()
    );
    stream.write_all(response.as_bytes()).ok()
}

fn manager(dir: &Path) -> ConnectionManager {
    let mut config = CoreConfig::in_dir(dir);
    config.bootstrap_defaults = false;
    config.probe_timeout = Duration::from_secs(2);
    ConnectionManager::open(&config).unwrap()
}

fn cloud(name: &str, store: &FakeStore) -> ConnectionProfile {
    ConnectionProfile::document_store(name, "demo-project", store.endpoint.clone())
}

#[test]
fn probe_leaves_no_client_behind() {
    let store = FakeStore::start(200);
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(dir.path());

    assert!(manager.test_connection(&cloud("cloud", &store)));
    assert!(manager.document_clients().is_empty());

    let requests = store.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0]
        .request_line
        .starts_with("GET /v1/projects/demo-project/databases/(default)/documents/employees"));
}

#[test]
fn failing_store_is_unreachable_and_leaves_no_client() {
    let store = FakeStore::start(503);
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(dir.path());
    manager.registry().add(cloud("cloud", &store)).unwrap();

    assert!(!manager.test_connection(&cloud("cloud", &store)));
    assert!(manager.activate("cloud").is_err());
    assert_eq!(manager.switch_state(), SwitchState::Idle);
    assert!(manager.document_clients().is_empty());
}

#[test]
fn live_client_is_registered_until_switching_away() {
    let store = FakeStore::start(200);
    let dir = tempfile::tempdir().unwrap();
    let manager = manager(dir.path());
    manager.registry().add(cloud("cloud", &store)).unwrap();
    manager
        .registry()
        .add(ConnectionProfile::embedded("local", Some(dir.path().join("local.db"))))
        .unwrap();

    let report = manager.activate("cloud").unwrap();
    assert_eq!(report.kind, BackendKind::DocumentStore);
    assert!(!report.provisioned);
    assert_eq!(manager.document_clients(), vec!["worklog-cloud".to_string()]);
    assert_eq!(
        manager.employees().unwrap().binding().kind,
        BackendKind::DocumentStore
    );

    manager.activate("local").unwrap();
    assert!(manager.document_clients().is_empty());
    assert_eq!(manager.employees().unwrap().binding().kind, BackendKind::Embedded);
}

#[test]
fn credentials_file_token_is_sent_as_bearer() {
    let store = FakeStore::start(200);
    let dir = tempfile::tempdir().unwrap();
    let token_path = dir.path().join("token.json");
    std::fs::write(&token_path, r#"{"access_token":"tok-123"}"#).unwrap();
    let manager = manager(dir.path());

    let profile = cloud("cloud", &store).with_credentials_path(&token_path);
    assert!(manager.test_connection(&profile));

    let requests = store.requests();
    assert_eq!(requests[0].authorization.as_deref(), Some("Bearer tok-123"));
}
