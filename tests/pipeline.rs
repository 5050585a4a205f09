//! End-to-end pipeline tests against an in-process archive server.
//!
//! An axum fixture server plays the remote archive (listings, composite
//! filings, throttling pages, flaky 5xx paths) while the catalog and
//! content store live in a temporary directory.

use async_trait::async_trait;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use edgar_ingest::catalog::Catalog;
use edgar_ingest::config::{self, Config};
use edgar_ingest::db;
use edgar_ingest::error::StoreError;
use edgar_ingest::ingest::{ingest_entries, IngestOptions, IngestOutcome, Orchestrator, Stage};
use edgar_ingest::listing::list_path;
use edgar_ingest::migrate;
use edgar_ingest::models::IndexEntry;
use edgar_ingest::retriever::Retriever;
use edgar_ingest::store::local::LocalStore;
use edgar_ingest::store::ContentStore;

// ─── Fixture archive ────────────────────────────────────────────────

struct Fixture {
    status: u16,
    body: Vec<u8>,
    last_modified: Option<&'static str>,
}

#[derive(Default)]
struct Archive {
    routes: HashMap<String, Fixture>,
    hits: Mutex<HashMap<String, usize>>,
}

impl Archive {
    fn route(mut self, path: &str, status: u16, body: impl Into<Vec<u8>>) -> Self {
        self.routes.insert(
            path.to_string(),
            Fixture {
                status,
                body: body.into(),
                last_modified: None,
            },
        );
        self
    }

    fn with_last_modified(mut self, path: &str, value: &'static str) -> Self {
        if let Some(f) = self.routes.get_mut(path) {
            f.last_modified = Some(value);
        }
        self
    }

    fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

async fn serve_fixture(State(archive): State<Arc<Archive>>, uri: Uri) -> Response {
    let path = uri.path().to_string();
    *archive.hits.lock().unwrap().entry(path.clone()).or_insert(0) += 1;

    match archive.routes.get(&path) {
        Some(f) => {
            let mut headers = HeaderMap::new();
            if let Some(lm) = f.last_modified {
                headers.insert(header::LAST_MODIFIED, HeaderValue::from_static(lm));
            }
            (
                StatusCode::from_u16(f.status).unwrap(),
                headers,
                f.body.clone(),
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, "no such path").into_response(),
    }
}

async fn start_archive(archive: Archive) -> (String, Arc<Archive>) {
    let archive = Arc::new(archive);
    let app = Router::new()
        .fallback(serve_fixture)
        .with_state(Arc::clone(&archive));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/", addr), archive)
}

// ─── Filings ────────────────────────────────────────────────────────

const SHARED_EXHIBIT: &str = "SHARED EXHIBIT BODY\nIdentical in every filing.\n";

fn composite(accession: &str, cik: Option<&str>, main_body: &str) -> String {
    let cik_line = cik
        .map(|c| format!("\t\tCENTRAL INDEX KEY:\t\t\t{}\n", c))
        .unwrap_or_default();
    format!(
        "<SEC-DOCUMENT>{acc}.txt : 20240301
<SEC-HEADER>{acc}.hdr.sgml : 20240301
ACCESSION NUMBER:\t\t{acc}
CONFORMED SUBMISSION TYPE:\t10-K
PUBLIC DOCUMENT COUNT:\t\t2
FILED AS OF DATE:\t\t20240301
FILER:
\tCOMPANY DATA:
\t\tCOMPANY CONFORMED NAME:\t\t\tACME CORP
{cik_line}\t\tSTANDARD INDUSTRIAL CLASSIFICATION:\tSERVICES-PREPACKAGED SOFTWARE [7372]
\t\tIRS NUMBER:\t\t\t\t123456789
\t\tSTATE OF INCORPORATION:\t\t\tDE
\t\tFISCAL YEAR END:\t\t\t1231
\tBUSINESS ADDRESS:
\t\tSTATE:\t\tCA
\t\tBUSINESS PHONE:\t\t555-0100
</SEC-HEADER>
<DOCUMENT>
<TYPE>10-K
<SEQUENCE>1
<FILENAME>acme-10k.htm
<DESCRIPTION>ANNUAL REPORT
<TEXT>
<html><body><p>{main}</p></body></html>
</TEXT>
</DOCUMENT>
<DOCUMENT>
<TYPE>EX-99
<SEQUENCE>2
<FILENAME>ex99.txt
<TEXT>
{shared}</TEXT>
</DOCUMENT>
</SEC-DOCUMENT>
",
        acc = accession,
        cik_line = cik_line,
        main = main_body,
        shared = SHARED_EXHIBIT,
    )
}

const ACC_A: &str = "0000000100-24-000001";
const ACC_B: &str = "0000000100-24-000002";
const ACC_BROKEN: &str = "0000000300-24-000001";
const ACC_THROTTLED: &str = "0000000400-24-000001";

const RATE_LIMIT_PAGE: &str =
    "<html><head><title>SEC.gov | Request Rate Threshold Exceeded</title></head></html>";

fn filing_path(cik: i64, accession: &str) -> String {
    format!("edgar/data/{}/{}.txt", cik, accession)
}

fn remote(path: &str) -> String {
    format!("/Archives/{}", path)
}

fn entry(cik: i64, accession: &str) -> IndexEntry {
    IndexEntry {
        accession_number: accession.to_string(),
        form_type: "10-K".to_string(),
        cik,
        company_name: format!("COMPANY {}", cik),
        date_filed: NaiveDate::from_ymd_opt(2024, 3, 1),
        path: filing_path(cik, accession),
    }
}

fn standard_archive() -> Archive {
    Archive::default()
        .route(
            &remote(&filing_path(100, ACC_A)),
            200,
            composite(ACC_A, Some("0000000100"), "First annual report"),
        )
        .route(
            &remote(&filing_path(100, ACC_B)),
            200,
            composite(ACC_B, Some("0000000100"), "Second annual report"),
        )
        .route(
            &remote(&filing_path(300, ACC_BROKEN)),
            200,
            composite(ACC_BROKEN, None, "No registrant"),
        )
        .route(
            &remote(&filing_path(400, ACC_THROTTLED)),
            200,
            RATE_LIMIT_PAGE,
        )
}

// ─── Environment ────────────────────────────────────────────────────

struct Env {
    _tmp: TempDir,
    store_root: std::path::PathBuf,
    config: Config,
    catalog: Catalog,
}

async fn setup(base_url: &str) -> Env {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    let config_path = root.join("edgar.toml");
    fs::write(
        &config_path,
        format!(
            r#"[db]
path = "{root}/data/edgar.sqlite"

[http]
base_url = "{base}"
backoff_secs = []
request_delay_ms = 0
timeout_secs = 5

[storage]
backend = "local"
document_prefix = "documents"

[storage.local]
root = "{root}/store"
"#,
            root = root.display(),
            base = base_url,
        ),
    )
    .unwrap();

    let config = config::load_config(&config_path).unwrap();
    migrate::run_migrations(&config).await.unwrap();
    let catalog = Catalog::new(db::connect(&config).await.unwrap());

    Env {
        store_root: root.join("store"),
        _tmp: tmp,
        config,
        catalog,
    }
}

impl Env {
    fn store(&self) -> Arc<dyn ContentStore> {
        Arc::new(LocalStore::new(self.store_root.clone(), "documents".into()))
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            Retriever::from_config(&self.config.http).unwrap(),
            self.store(),
            self.catalog.clone(),
            IngestOptions::from(&self.config.ingest),
        )
    }

    fn blob_count(&self, kind: &str) -> usize {
        let dir = self.store_root.join("documents").join(kind);
        if !dir.exists() {
            return 0;
        }
        fs::read_dir(dir).unwrap().count()
    }
}

/// Local store wrapper that can refuse blob writes and records how many
/// index entries had been handed to the pool when each filing was read.
struct HookedStore {
    inner: LocalStore,
    fail_blob_writes: bool,
    pulled: Arc<AtomicUsize>,
    pulled_at_read: Mutex<Vec<usize>>,
}

impl HookedStore {
    fn new(env: &Env) -> Self {
        Self {
            inner: LocalStore::new(env.store_root.clone(), "documents".into()),
            fail_blob_writes: false,
            pulled: Arc::new(AtomicUsize::new(0)),
            pulled_at_read: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ContentStore for HookedStore {
    fn backend(&self) -> &str {
        self.inner.backend()
    }

    fn location(&self) -> String {
        self.inner.location()
    }

    fn document_prefix(&self) -> &str {
        self.inner.document_prefix()
    }

    async fn path_exists(&self, path: &str) -> Result<bool, StoreError> {
        self.inner.path_exists(path).await
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        self.pulled_at_read
            .lock()
            .unwrap()
            .push(self.pulled.load(Ordering::SeqCst));
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        self.inner.get(path).await
    }

    async fn put_path(&self, path: &str, bytes: &[u8]) -> Result<(), StoreError> {
        if self.fail_blob_writes && path.starts_with("documents/") {
            return Err(StoreError::Remote(format!("disk full {}", path)));
        }
        self.inner.put_path(path, bytes).await
    }
}

fn count_files(dir: &Path) -> usize {
    let mut n = 0;
    for entry in fs::read_dir(dir).unwrap() {
        let entry = entry.unwrap();
        if entry.file_type().unwrap().is_dir() {
            n += count_files(&entry.path());
        } else {
            n += 1;
        }
    }
    n
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_ingest_reconciles_filing() {
    let (base, _archive) = start_archive(standard_archive()).await;
    let env = setup(&base).await;

    let outcome = env.orchestrator().ingest(&entry(100, ACC_A)).await;
    assert_eq!(
        outcome,
        IngestOutcome::Reconciled {
            accession_number: ACC_A.to_string(),
            documents: 2,
            blobs_written: 4,
        }
    );

    let filing = env.catalog.find_filing(ACC_A).await.unwrap().unwrap();
    assert!(filing.is_processed);
    assert!(!filing.is_error);
    assert_eq!(filing.document_count, 2);
    assert_eq!(filing.processed_document_count, 2);
    assert_eq!(filing.form_type.as_deref(), Some("10-K"));
    assert!(filing.content_hash.is_some());

    let company = env.catalog.find_company(100).await.unwrap().unwrap();
    assert_eq!(company.name, "ACME CORP");

    let profile = env.catalog.find_profile(100).await.unwrap().unwrap();
    assert_eq!(profile.sic.as_deref(), Some("7372"));
    assert_eq!(profile.state_location.as_deref(), Some("CA"));

    let docs = env.catalog.documents_for(ACC_A).await.unwrap();
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0].sequence, 1);
    assert_eq!(docs[1].sequence, 2);
    assert_eq!(docs[0].content_type, "text/html");

    // Raw blob bytes are exactly the recorded slice of the filing
    let raw = composite(ACC_A, Some("0000000100"), "First annual report");
    let store = env.store();
    for doc in &docs {
        let slice = &raw.as_bytes()[doc.start_pos as usize..doc.end_pos as usize];
        let blob = store
            .get(&format!("documents/raw/{}", doc.content_hash))
            .await
            .unwrap();
        assert_eq!(blob, slice);
    }

    // Extracted text has its markup stripped
    let text = store
        .get(&format!("documents/text/{}", docs[0].content_hash))
        .await
        .unwrap();
    let text = String::from_utf8(text).unwrap();
    assert!(text.contains("First annual report"));
    assert!(!text.contains("<p>"));
}

#[tokio::test]
async fn test_ingest_twice_is_idempotent() {
    let (base, archive) = start_archive(standard_archive()).await;
    let env = setup(&base).await;
    let orchestrator = env.orchestrator();

    let first = orchestrator.ingest(&entry(100, ACC_A)).await;
    assert!(matches!(first, IngestOutcome::Reconciled { .. }));
    let files_after_first = count_files(&env.store_root);

    let second = orchestrator.ingest(&entry(100, ACC_A)).await;
    assert_eq!(second, IngestOutcome::AlreadyIngested);

    let counts = env.catalog.counts().await.unwrap();
    assert_eq!(counts.filings, 1);
    assert_eq!(counts.documents, 2);
    assert_eq!(count_files(&env.store_root), files_after_first);
    assert_eq!(archive.hits(&remote(&filing_path(100, ACC_A))), 1);
}

#[tokio::test]
async fn test_shared_document_stored_once() {
    let (base, _archive) = start_archive(standard_archive()).await;
    let env = setup(&base).await;
    let orchestrator = env.orchestrator();

    orchestrator.ingest(&entry(100, ACC_A)).await;
    let second = orchestrator.ingest(&entry(100, ACC_B)).await;

    // Only the second filing's main document is new
    assert_eq!(
        second,
        IngestOutcome::Reconciled {
            accession_number: ACC_B.to_string(),
            documents: 2,
            blobs_written: 2,
        }
    );

    let a = env.catalog.documents_for(ACC_A).await.unwrap();
    let b = env.catalog.documents_for(ACC_B).await.unwrap();
    assert_eq!(a[1].content_hash, b[1].content_hash);
    assert_ne!(a[0].content_hash, b[0].content_hash);

    assert_eq!(env.blob_count("raw"), 3);
    assert_eq!(env.blob_count("text"), 3);

    let counts = env.catalog.counts().await.unwrap();
    assert_eq!(counts.documents, 4);
    assert_eq!(counts.distinct_hashes, 3);
}

#[tokio::test]
async fn test_filing_without_cik_becomes_error_filing() {
    let (base, _archive) = start_archive(standard_archive()).await;
    let env = setup(&base).await;

    let outcome = env.orchestrator().ingest(&entry(300, ACC_BROKEN)).await;
    match outcome {
        IngestOutcome::Errored { stage, .. } => assert_eq!(stage, Stage::Parse),
        other => panic!("expected parse error, got {:?}", other),
    }

    let filing = env.catalog.find_filing(ACC_BROKEN).await.unwrap().unwrap();
    assert!(filing.is_error);
    assert!(!filing.is_processed);
    assert_eq!(filing.cik, 300);
    assert!(filing.error_message.is_some());
    assert!(env.catalog.documents_for(ACC_BROKEN).await.unwrap().is_empty());

    let errors = env.catalog.list_errors(10).await.unwrap();
    assert_eq!(errors.len(), 1);
}

#[tokio::test]
async fn test_error_filing_can_be_redriven() {
    let (base, archive) = start_archive(standard_archive()).await;
    let env = setup(&base).await;
    let orchestrator = env.orchestrator();

    orchestrator.ingest(&entry(300, ACC_BROKEN)).await;
    assert_eq!(
        orchestrator.ingest(&entry(300, ACC_BROKEN)).await,
        IngestOutcome::AlreadyIngested
    );

    assert!(env.catalog.delete_error_filing(ACC_BROKEN).await.unwrap());
    let retried = orchestrator.ingest(&entry(300, ACC_BROKEN)).await;
    assert!(matches!(retried, IngestOutcome::Errored { .. }));

    // The second attempt reads the cached copy
    assert_eq!(archive.hits(&remote(&filing_path(300, ACC_BROKEN))), 1);
}

#[tokio::test]
async fn test_rate_limit_page_is_fetch_error() {
    let (base, _archive) = start_archive(standard_archive()).await;
    let env = setup(&base).await;

    let outcome = env.orchestrator().ingest(&entry(400, ACC_THROTTLED)).await;
    match outcome {
        IngestOutcome::Errored { stage, message } => {
            assert_eq!(stage, Stage::Fetch);
            assert!(message.contains("rate threshold"), "message: {}", message);
        }
        other => panic!("expected fetch error, got {:?}", other),
    }

    let filing = env.catalog.find_filing(ACC_THROTTLED).await.unwrap().unwrap();
    assert!(filing.is_error);
    // Poisoned bodies are never cached
    assert!(!env.store_root.join(filing_path(400, ACC_THROTTLED)).exists());
}

#[tokio::test]
async fn test_cached_filing_skips_network() {
    let (base, archive) = start_archive(Archive::default()).await;
    let env = setup(&base).await;

    let path = filing_path(100, ACC_A);
    env.store()
        .put_path(&path, composite(ACC_A, Some("0000000100"), "Cached").as_bytes())
        .await
        .unwrap();

    let outcome = env.orchestrator().ingest(&entry(100, ACC_A)).await;
    assert!(matches!(outcome, IngestOutcome::Reconciled { documents: 2, .. }));
    assert_eq!(archive.hits(&remote(&path)), 0);
}

#[tokio::test]
async fn test_missing_remote_filing_is_error() {
    let (base, _archive) = start_archive(Archive::default()).await;
    let env = setup(&base).await;

    let outcome = env.orchestrator().ingest(&entry(100, ACC_A)).await;
    assert!(matches!(
        outcome,
        IngestOutcome::Errored {
            stage: Stage::Fetch,
            ..
        }
    ));
}

#[tokio::test]
async fn test_batch_continues_after_errors() {
    let (base, _archive) = start_archive(standard_archive()).await;
    let env = setup(&base).await;
    let orchestrator = Arc::new(env.orchestrator());

    let entries = vec![
        entry(100, ACC_A),
        entry(300, ACC_BROKEN),
        entry(400, ACC_THROTTLED),
        entry(100, ACC_B),
        entry(100, ACC_A),
    ];
    let summary = ingest_entries(orchestrator, entries, 2).await;

    assert_eq!(summary.reconciled + summary.already_ingested, 3);
    assert!(summary.reconciled >= 2);
    assert_eq!(summary.errored, 2);

    let counts = env.catalog.counts().await.unwrap();
    assert_eq!(counts.filings, 4);
    assert_eq!(counts.processed, 2);
    assert_eq!(counts.errored, 2);
    assert_eq!(counts.documents, 4);
}

#[tokio::test]
async fn test_listing_from_archive() {
    let listing = r#"<html><body><div id="main-content"><table>
<tr><td><a href="/Archives/edgar/data/">Parent Directory</a></td></tr>
<tr><td><a href="0000000100-24-000001.txt">0000000100-24-000001.txt</a></td></tr>
<tr><td><a href="0000000100-24-000002.txt">0000000100-24-000002.txt</a></td></tr>
</table></div></body></html>"#;
    let archive = Archive::default().route("/Archives/edgar/data/100/", 200, listing);
    let (base, _archive) = start_archive(archive).await;
    let env = setup(&base).await;

    let retriever = Retriever::from_config(&env.config.http).unwrap();
    let links = list_path(&retriever, "/Archives/edgar/data/100/").await.unwrap();
    assert_eq!(
        links,
        vec![
            "/Archives/edgar/data/100/0000000100-24-000001.txt".to_string(),
            "/Archives/edgar/data/100/0000000100-24-000002.txt".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_last_modified_and_retry_exhaustion() {
    let archive = Archive::default()
        .route("/Archives/ok.txt", 200, "hello")
        .with_last_modified("/Archives/ok.txt", "Fri, 01 Mar 2024 12:00:00 GMT")
        .route("/Archives/flaky.txt", 503, "unavailable");
    let (base, archive) = start_archive(archive).await;
    let env = setup(&base).await;

    let retriever = Retriever::from_config(&env.config.http)
        .unwrap()
        .with_backoff(vec![std::time::Duration::ZERO; 2]);

    let fetched = retriever.fetch("/Archives/ok.txt").await.unwrap().unwrap();
    assert_eq!(fetched.bytes, b"hello");
    assert_eq!(fetched.last_modified, NaiveDate::from_ymd_opt(2024, 3, 1));

    assert!(retriever.fetch("/Archives/flaky.txt").await.unwrap().is_none());
    assert_eq!(archive.hits("/Archives/flaky.txt"), 3);
}

#[tokio::test]
async fn test_store_failure_rolls_filing_to_error() {
    let (base, _archive) = start_archive(standard_archive()).await;
    let env = setup(&base).await;

    let mut store = HookedStore::new(&env);
    store.fail_blob_writes = true;
    let orchestrator = Orchestrator::new(
        Retriever::from_config(&env.config.http).unwrap(),
        Arc::new(store),
        env.catalog.clone(),
        IngestOptions::from(&env.config.ingest),
    );

    let outcome = orchestrator.ingest(&entry(100, ACC_A)).await;
    match outcome {
        IngestOutcome::Errored { stage, message } => {
            assert_eq!(stage, Stage::Store);
            assert!(message.contains("disk full"), "message: {}", message);
        }
        other => panic!("expected store error, got {:?}", other),
    }

    let filing = env.catalog.find_filing(ACC_A).await.unwrap().unwrap();
    assert!(filing.is_error);
    assert!(!filing.is_processed);
    assert!(filing.error_message.is_some());
    assert!(env.catalog.documents_for(ACC_A).await.unwrap().is_empty());
    assert_eq!(env.blob_count("raw"), 0);

    // The raw filing itself was cached; only the blobs were refused
    assert!(env.store_root.join(filing_path(100, ACC_A)).exists());
}

#[tokio::test]
async fn test_batch_pulls_entries_as_workers_free() {
    let (base, _archive) = start_archive(Archive::default()).await;
    let env = setup(&base).await;

    let accessions: Vec<String> = (1..=6).map(|i| format!("0000000100-24-{:06}", i)).collect();
    let seed = env.store();
    for acc in &accessions {
        seed.put_path(
            &filing_path(100, acc),
            composite(acc, Some("0000000100"), &format!("Report {}", acc)).as_bytes(),
        )
        .await
        .unwrap();
    }

    let store = Arc::new(HookedStore::new(&env));
    let pulled = Arc::clone(&store.pulled);
    let orchestrator = Arc::new(Orchestrator::new(
        Retriever::from_config(&env.config.http).unwrap(),
        Arc::clone(&store) as Arc<dyn ContentStore>,
        env.catalog.clone(),
        IngestOptions::from(&env.config.ingest),
    ));

    let workers = 2;
    let entries = accessions.iter().map(|acc| entry(100, acc)).inspect(move |_| {
        pulled.fetch_add(1, Ordering::SeqCst);
    });
    let summary = ingest_entries(orchestrator, entries, workers).await;
    assert_eq!(summary.reconciled, 6);
    assert_eq!(summary.errored, 0);

    // Before the i-th read at most i filings have finished, so at most
    // i + workers + 1 entries may have been taken from the feed
    let reads = store.pulled_at_read.lock().unwrap().clone();
    assert_eq!(reads.len(), 6);
    for (i, pulled) in reads.iter().enumerate() {
        assert!(
            *pulled <= i + workers + 1,
            "read {} saw {} entries pulled",
            i,
            pulled
        );
    }
}
