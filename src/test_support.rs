//! Test doubles shared across modules.

use crate::error::{MutexError, Result};
use crate::reconcile::{LabelApi, Subject};
use crate::retry::Deadline;
use crate::store::{
    CasOutcome, GENERATION_ABSENT, LockKey, ObjectStore, PutCondition, StoredObject, TableStore,
};
use std::collections::{BTreeSet, HashMap};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

// ============================================================================
// In-memory table store
// ============================================================================

/// Table store in a `HashMap`, with switches to make calls fail.
#[derive(Debug, Default)]
pub(crate) struct MemoryTable {
    values: Mutex<HashMap<LockKey, String>>,
    pub(crate) fail_gets: AtomicBool,
    pub(crate) fail_puts: AtomicBool,
}

impl MemoryTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, key: &LockKey, value: &str) {
        self.values
            .lock()
            .unwrap()
            .insert(key.clone(), value.to_string());
    }

    pub(crate) fn value(&self, key: &LockKey) -> Option<String> {
        self.values.lock().unwrap().get(key).cloned()
    }
}

impl TableStore for MemoryTable {
    fn conditional_put(
        &self,
        key: &LockKey,
        value: &str,
        condition: &PutCondition,
    ) -> Result<CasOutcome> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(MutexError::BackendError("injected put failure".to_string()));
        }
        let mut values = self.values.lock().unwrap();
        let holds = match condition {
            PutCondition::IfAbsent => !values.contains_key(key),
            PutCondition::IfMatches(previous) => values.get(key) == Some(previous),
        };
        if !holds {
            return Ok(CasOutcome::Rejected);
        }
        values.insert(key.clone(), value.to_string());
        Ok(CasOutcome::Applied)
    }

    fn conditional_delete(&self, key: &LockKey, expected: &str) -> Result<CasOutcome> {
        let mut values = self.values.lock().unwrap();
        if values.get(key).map(String::as_str) != Some(expected) {
            return Ok(CasOutcome::Rejected);
        }
        values.remove(key);
        Ok(CasOutcome::Applied)
    }

    fn get(&self, key: &LockKey) -> Result<Option<String>> {
        if self.fail_gets.load(Ordering::SeqCst) {
            return Err(MutexError::BackendError("injected get failure".to_string()));
        }
        Ok(self.values.lock().unwrap().get(key).cloned())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

// ============================================================================
// In-memory object store
// ============================================================================

/// Single object with GCS-like generations. A failed precondition or a
/// delete of a missing object behaves like the real store after retrying
/// until the deadline: it returns `DeadlineExceeded`.
#[derive(Debug)]
pub(crate) struct MemoryObject {
    object: Mutex<Option<StoredObject>>,
    next_generation: AtomicI64,
    pub(crate) fail_reads: AtomicBool,
    /// Every create answers 503 until the deadline.
    pub(crate) fail_creates: AtomicBool,
    /// Value another writer stores just before the next create is evaluated.
    interleaved_write: Mutex<Option<String>>,
}

impl MemoryObject {
    pub(crate) fn new() -> Self {
        Self {
            object: Mutex::new(None),
            next_generation: AtomicI64::new(1),
            fail_reads: AtomicBool::new(false),
            fail_creates: AtomicBool::new(false),
            interleaved_write: Mutex::new(None),
        }
    }

    /// Let another writer store `value` right before the next create.
    pub(crate) fn interleave_write(&self, value: &str) {
        *self.interleaved_write.lock().unwrap() = Some(value.to_string());
    }

    pub(crate) fn put(&self, value: &str) {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        *self.object.lock().unwrap() = Some(StoredObject {
            value: value.to_string(),
            generation,
        });
    }

    pub(crate) fn value(&self) -> Option<String> {
        self.object.lock().unwrap().as_ref().map(|o| o.value.clone())
    }

    pub(crate) fn generation(&self) -> i64 {
        self.object
            .lock()
            .unwrap()
            .as_ref()
            .map_or(GENERATION_ABSENT, |o| o.generation)
    }
}

impl ObjectStore for MemoryObject {
    fn create(&self, value: &str, if_generation_match: i64, _deadline: &Deadline) -> Result<()> {
        if let Some(other) = self.interleaved_write.lock().unwrap().take() {
            self.put(&other);
        }
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(MutexError::DeadlineExceeded {
                attempts: 4,
                last_failure: "create returned 503 Service Unavailable".to_string(),
            });
        }
        let mut object = self.object.lock().unwrap();
        let current = object.as_ref().map_or(GENERATION_ABSENT, |o| o.generation);
        if current != if_generation_match {
            return Err(MutexError::DeadlineExceeded {
                attempts: 3,
                last_failure: "create returned 412 Precondition Failed".to_string(),
            });
        }
        *object = Some(StoredObject {
            value: value.to_string(),
            generation: self.next_generation.fetch_add(1, Ordering::SeqCst),
        });
        Ok(())
    }

    fn delete(&self, _deadline: &Deadline) -> Result<()> {
        match self.object.lock().unwrap().take() {
            Some(_) => Ok(()),
            None => Err(MutexError::DeadlineExceeded {
                attempts: 3,
                last_failure: "delete returned 404 Not Found".to_string(),
            }),
        }
    }

    fn read(&self, _deadline: &Deadline) -> Result<Option<StoredObject>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(MutexError::DeadlineExceeded {
                attempts: 3,
                last_failure: "read returned 503 Service Unavailable".to_string(),
            });
        }
        Ok(self.object.lock().unwrap().clone())
    }

    fn backend_name(&self) -> &'static str {
        "memory-object"
    }
}

// ============================================================================
// Recording label client
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LabelCall {
    Add(Vec<String>),
    Remove(String),
}

/// Label client that tracks the subject's label set like GitHub does:
/// removing a label the subject does not carry answers 404.
#[derive(Debug, Default)]
pub(crate) struct RecordingLabels {
    labels: Mutex<BTreeSet<String>>,
    calls: Mutex<Vec<LabelCall>>,
    failures: Mutex<HashMap<String, u16>>,
}

impl RecordingLabels {
    pub(crate) fn with_labels(present: &[&str]) -> Self {
        let labels = Self::default();
        labels
            .labels
            .lock()
            .unwrap()
            .extend(present.iter().map(|l| l.to_string()));
        labels
    }

    /// Every call touching `label` fails with `status`.
    pub(crate) fn fail_label(&self, label: &str, status: u16) {
        self.failures
            .lock()
            .unwrap()
            .insert(label.to_string(), status);
    }

    pub(crate) fn calls(&self) -> Vec<LabelCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn labels(&self) -> BTreeSet<String> {
        self.labels.lock().unwrap().clone()
    }

    fn injected_failure(&self, label: &str) -> Option<MutexError> {
        self.failures
            .lock()
            .unwrap()
            .get(label)
            .map(|status| MutexError::LabelApi {
                status: Some(*status),
                message: format!("injected failure for '{}'", label),
            })
    }
}

impl LabelApi for RecordingLabels {
    fn add_labels(&self, _subject: &Subject, labels: &[String]) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(LabelCall::Add(labels.to_vec()));
        for label in labels {
            if let Some(err) = self.injected_failure(label) {
                return Err(err);
            }
        }
        self.labels.lock().unwrap().extend(labels.iter().cloned());
        Ok(())
    }

    fn remove_label(&self, _subject: &Subject, label: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(LabelCall::Remove(label.to_string()));
        if let Some(err) = self.injected_failure(label) {
            return Err(err);
        }
        if self.labels.lock().unwrap().remove(label) {
            Ok(())
        } else {
            Err(MutexError::LabelApi {
                status: Some(404),
                message: "Label does not exist".to_string(),
            })
        }
    }
}

// ============================================================================
// Scripted HTTP server
// ============================================================================

/// Canned HTTP response.
#[derive(Debug, Clone)]
pub(crate) struct ScriptedResponse {
    pub(crate) status: u16,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: String,
}

impl ScriptedResponse {
    pub(crate) fn status(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub(crate) fn body(mut self, body: &str) -> Self {
        self.body = body.to_string();
        self
    }

    pub(crate) fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// What the server saw.
#[derive(Debug, Clone)]
pub(crate) struct RecordedRequest {
    pub(crate) method: String,
    pub(crate) target: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: String,
}

impl RecordedRequest {
    pub(crate) fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// HTTP/1.1 server on 127.0.0.1 answering connections with scripted
/// responses in order; the last response repeats once the script runs out.
pub(crate) struct FakeHttpServer {
    base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FakeHttpServer {
    pub(crate) fn start(script: Vec<ScriptedResponse>) -> Self {
        assert!(!script.is_empty(), "script needs at least one response");
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let requests = Arc::clone(&requests);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut served = 0usize;
                for stream in listener.incoming() {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }
                    let Ok(stream) = stream else { continue };
                    let response = &script[served.min(script.len() - 1)];
                    served += 1;
                    serve(stream, response, &requests);
                }
            })
        };

        Self {
            base_url: format!("http://{}", addr),
            requests,
            stop,
            handle: Some(handle),
        }
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Drop for FakeHttpServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // Wake the accept loop so it observes the stop flag.
        let _ = TcpStream::connect(self.base_url.trim_start_matches("http://"));
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Read one request, record it, then answer. Recording first means a client
/// that has seen the response also sees its request in `requests()`.
fn serve(
    stream: TcpStream,
    response: &ScriptedResponse,
    requests: &Mutex<Vec<RecordedRequest>>,
) -> Option<()> {
    let mut reader = BufReader::new(stream.try_clone().ok()?);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).ok()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).ok()? == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }

    let length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).ok()?;
    requests.lock().unwrap().push(RecordedRequest {
        method,
        target,
        headers,
        body: String::from_utf8_lossy(&body).to_string(),
    });

    let mut out = stream;
    let mut head = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        reason(response.status),
        response.body.len()
    );
    for (name, value) in &response.headers {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }
    head.push_str("\r\n");
    out.write_all(head.as_bytes()).ok()?;
    out.write_all(response.body.as_bytes()).ok()?;
    out.flush().ok()
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        412 => "Precondition Failed",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    }
}
