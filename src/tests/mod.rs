use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use crate::client::{ClientOptions, CollectionSource, HttpCollectionClient};
use crate::output::print::{NoSurface, PrintSurface};
use crate::record::{EntityKind, OwnerId};
use crate::session::{AuthUser, SessionContext};
use crate::view::{
    AssumeYes, BulkDeleteOutcome, CollectionView, ConfirmGate, CsvOptions, DeleteOutcome,
    LoadOutcome, PrintOptions, ViewError, CONFIRM_DELETE_PROMPT, NO_RECORDS_NOTICE,
};

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct FakeError(String);

struct Scripted {
    delay_ms: u64,
    result: Result<Vec<Value>, String>,
}

/// In-memory backend. Scripted fetch responses are served first, then the
/// live row set.
#[derive(Default)]
struct FakeSource {
    rows: Mutex<Vec<Value>>,
    script: Mutex<VecDeque<Scripted>>,
    delete_error: Mutex<Option<String>>,
    locked: Mutex<Vec<i64>>,
    delete_delay_ms: u64,
    fetches: AtomicUsize,
    deleted: Mutex<Vec<i64>>,
}

impl FakeSource {
    fn with_rows(rows: Vec<Value>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Self::default()
        }
    }

    fn push(&self, delay_ms: u64, result: Result<Vec<Value>, &str>) {
        self.script.lock().unwrap().push_back(Scripted {
            delay_ms,
            result: result.map_err(str::to_string),
        });
    }

    fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl CollectionSource for FakeSource {
    type Error = FakeError;

    async fn fetch(&self, _kind: EntityKind, _owner: OwnerId) -> Result<Vec<Value>, FakeError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let scripted = self.script.lock().unwrap().pop_front();
        let (delay_ms, result) = match scripted {
            Some(s) => (s.delay_ms, s.result),
            None => (0, Ok(self.rows.lock().unwrap().clone())),
        };
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        result.map_err(FakeError)
    }

    async fn delete(&self, _kind: EntityKind, id: i64) -> Result<(), FakeError> {
        if self.delete_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delete_delay_ms)).await;
        }
        if let Some(message) = self.delete_error.lock().unwrap().clone() {
            return Err(FakeError(message));
        }
        if self.locked.lock().unwrap().contains(&id) {
            return Err(FakeError("Record is locked".to_string()));
        }
        self.deleted.lock().unwrap().push(id);
        self.rows
            .lock()
            .unwrap()
            .retain(|r| r.get("id").and_then(Value::as_i64) != Some(id));
        Ok(())
    }
}

struct Decline;

impl ConfirmGate for Decline {
    fn confirm(&self, prompt: &str) -> bool {
        assert_eq!(prompt, CONFIRM_DELETE_PROMPT);
        false
    }
}

/// Accepts every prompt and remembers it.
#[derive(Default)]
struct RecordingGate {
    prompts: Mutex<Vec<String>>,
}

impl ConfirmGate for RecordingGate {
    fn confirm(&self, prompt: &str) -> bool {
        self.prompts.lock().unwrap().push(prompt.to_string());
        true
    }
}

#[derive(Default)]
struct RecordingSurface {
    opened: Mutex<Vec<PathBuf>>,
}

impl PrintSurface for RecordingSurface {
    fn open(&self, path: &Path) -> Result<(), String> {
        self.opened.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}

fn page_size(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap()
}

fn view_of(kind: EntityKind, source: FakeSource) -> CollectionView<FakeSource> {
    CollectionView::new(kind, 7, source, page_size(10))
}

fn health_rows(n: i64) -> Vec<Value> {
    (1..=n)
        .map(|i| {
            json!({
                "id": i,
                "recordedAt": format!("2024-01-{:02}T08:00:00", i),
                "weight": 70 + i,
                "steps": 1000 * i
            })
        })
        .collect()
}

fn e2e_assessments() -> Vec<Value> {
    vec![
        json!({"id": 1, "score": 70, "createdAt": "2024-01-01"}),
        json!({"id": 2, "score": 85, "createdAt": "2024-01-02"}),
    ]
}

fn ids(view: &CollectionView<FakeSource>) -> Vec<i64> {
    view.records().iter().map(|r| r.id).collect()
}

fn read_csv(body: &str) -> Vec<Vec<String>> {
    csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(body.as_bytes())
        .records()
        .map(|r| r.unwrap().iter().map(str::to_string).collect())
        .collect()
}

fn files_in(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect()
}

#[tokio::test]
async fn compare_two_assessments_in_selection_order() {
    let view = view_of(EntityKind::Assessment, FakeSource::with_rows(e2e_assessments()));
    assert_eq!(view.load().await.unwrap(), LoadOutcome::Applied { count: 2 });
    assert_eq!(ids(&view), vec![2, 1]);

    assert!(view.toggle_select(1).unwrap());
    assert!(view.comparison().is_none());
    assert!(view.toggle_select(2).unwrap());

    let cmp = view.comparison().unwrap();
    assert_eq!((cmp.first, cmp.second), (70.0, 85.0));
    assert_eq!(cmp.delta, -15.0);
    assert_eq!(view.comparison_text().as_deref(), Some("Score change: -15"));
}

#[tokio::test]
async fn confirmed_delete_reloads_without_the_record() {
    let view = view_of(EntityKind::Assessment, FakeSource::with_rows(e2e_assessments()));
    view.load().await.unwrap();

    let outcome = view.delete_record(2, &AssumeYes).await.unwrap();
    assert_eq!(outcome, DeleteOutcome::Deleted(LoadOutcome::Applied { count: 1 }));
    assert_eq!(*view.source().deleted.lock().unwrap(), vec![2]);
    assert_eq!(view.source().fetch_count(), 2);
    assert!(view.get(2).is_none());
    assert_eq!(ids(&view), vec![1]);
    assert!(!view.is_deleting(2));
}

#[tokio::test]
async fn failed_first_load_surfaces_server_text() {
    let source = FakeSource::default();
    source.push(0, Err("db unavailable"));
    let view = view_of(EntityKind::HealthData, source);

    match view.load().await {
        Err(ViewError::LoadFailed { message }) => assert!(message.contains("db unavailable")),
        other => panic!("unexpected {other:?}"),
    }
    assert!(view.is_empty());
    assert!(view.error().unwrap().contains("db unavailable"));
}

#[tokio::test]
async fn failed_reload_keeps_previous_collection() {
    let source = FakeSource::with_rows(health_rows(3));
    let view = view_of(EntityKind::HealthData, source);
    view.load().await.unwrap();

    view.source().push(0, Err("timeout"));
    assert!(view.load().await.is_err());
    assert_eq!(view.len(), 3);
    assert_eq!(view.error().as_deref(), Some("timeout"));

    view.load().await.unwrap();
    assert!(view.error().is_none());
}

#[tokio::test]
async fn export_covers_every_row_not_just_the_page() {
    let dir = tempfile::tempdir().unwrap();
    let view = view_of(EntityKind::HealthData, FakeSource::with_rows(health_rows(25)));
    view.load().await.unwrap();
    assert_eq!(view.set_page(2), 2);
    assert_eq!(view.page().rows.len(), 10);
    assert_eq!(view.page().total_pages, 3);

    let artifact = view
        .export_csv(&CsvOptions {
            dir: dir.path().to_path_buf(),
            bom: false,
        })
        .await
        .unwrap();
    assert_eq!(artifact.rows, 25);
    assert_eq!(artifact.content_type, "text/csv");
    let name = artifact.path.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with("health_data_") && name.ends_with(".csv"));

    let body = std::fs::read_to_string(&artifact.path).unwrap();
    let rows = read_csv(&body);
    assert_eq!(rows.len(), 26);
    assert_eq!(rows[0][0], "id");
    assert_eq!(rows[1][0], "25");
    assert_eq!(rows[25][0], "1");
}

#[tokio::test]
async fn csv_cells_survive_a_standard_parser() {
    let dir = tempfile::tempdir().unwrap();
    let tricky = "He said \"hi\",\nbye";
    let source = FakeSource::with_rows(vec![
        json!({"id": 1, "createdAt": "2024-01-01", "score": 50, "summary": tricky}),
    ]);
    let view = view_of(EntityKind::Assessment, source);
    view.load().await.unwrap();

    let artifact = view
        .export_csv(&CsvOptions {
            dir: dir.path().to_path_buf(),
            bom: true,
        })
        .await
        .unwrap();
    let body = std::fs::read_to_string(&artifact.path).unwrap();
    let body = body.strip_prefix('\u{feff}').expect("bom");
    let rows = read_csv(body);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], vec!["id", "createdAt", "score", "type", "summary"]);
    assert_eq!(rows[1][4], tricky);
    assert_eq!(rows[1][2], "50");
}

#[tokio::test]
async fn empty_collection_has_one_page_and_refuses_export() {
    let dir = tempfile::tempdir().unwrap();
    let view = view_of(EntityKind::Medication, FakeSource::default());
    view.load().await.unwrap();

    let page = view.page();
    assert_eq!(page.total_pages, 1);
    assert!(page.rows.is_empty());
    let table = crate::output::render_table(
        crate::output::table_columns(EntityKind::Medication),
        &page.rows,
        &[],
    );
    assert_eq!(table.matches(crate::output::EMPTY_PLACEHOLDER).count(), 1);

    let err = view
        .export_csv(&CsvOptions {
            dir: dir.path().to_path_buf(),
            bom: true,
        })
        .await
        .unwrap_err();
    assert!(err.is_notice());
    assert_eq!(err.to_string(), NO_RECORDS_NOTICE);

    let err = view
        .export_printable(
            &PrintOptions {
                dir: dir.path().to_path_buf(),
            },
            &RecordingSurface::default(),
            None,
        )
        .await
        .unwrap_err();
    assert!(err.is_notice());
    assert!(files_in(dir.path()).is_empty());
}

#[tokio::test]
async fn shrinking_reload_clamps_page_and_prunes_selection() {
    let source = FakeSource::default();
    source.push(0, Ok(health_rows(25)));
    source.push(0, Ok(health_rows(5)));
    let view = view_of(EntityKind::HealthData, source);

    view.load().await.unwrap();
    assert_eq!(view.set_page(3), 3);
    assert_eq!(view.page().rows.len(), 5);
    view.toggle_select(2).unwrap();
    view.toggle_select(20).unwrap();

    view.load().await.unwrap();
    let page = view.page();
    assert_eq!(page.page, 1);
    assert_eq!(page.total_pages, 1);
    assert_eq!(view.selection(), vec![2]);
}

#[tokio::test]
async fn page_navigation_stops_at_edges() {
    let view = view_of(EntityKind::HealthData, FakeSource::with_rows(health_rows(25)));
    view.load().await.unwrap();
    assert_eq!(view.prev_page(), 1);
    assert_eq!(view.next_page(), 2);
    assert_eq!(view.next_page(), 3);
    assert_eq!(view.next_page(), 3);
    assert_eq!(view.set_page(99), 3);
    assert_eq!(view.page().rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![5, 4, 3, 2, 1]);
}

#[tokio::test]
async fn stale_response_is_discarded() {
    let source = FakeSource::default();
    source.push(80, Ok(vec![json!({"id": 1})]));
    source.push(0, Ok(vec![json!({"id": 2}), json!({"id": 3})]));
    let view = view_of(EntityKind::Assessment, source);

    let (first, second) = futures::join!(view.load(), view.load());
    assert_eq!(first.unwrap(), LoadOutcome::Stale);
    assert_eq!(second.unwrap(), LoadOutcome::Applied { count: 2 });
    assert_eq!(ids(&view), vec![2, 3]);
    assert!(!view.is_loading());
}

#[tokio::test]
async fn stale_failure_does_not_set_banner() {
    let source = FakeSource::default();
    source.push(80, Err("old failure"));
    source.push(0, Ok(vec![json!({"id": 2})]));
    let view = view_of(EntityKind::Assessment, source);

    let (first, second) = futures::join!(view.load(), view.load());
    assert_eq!(first.unwrap(), LoadOutcome::Stale);
    assert!(second.is_ok());
    assert!(view.error().is_none());
}

#[tokio::test]
async fn loading_flag_tracks_outstanding_requests() {
    let source = FakeSource::default();
    source.push(60, Ok(vec![json!({"id": 1})]));
    let view = view_of(EntityKind::Assessment, source);

    let (loaded, busy) = futures::join!(view.load(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        view.is_loading()
    });
    assert!(busy);
    assert!(loaded.is_ok());
    assert!(!view.is_loading());
}

#[tokio::test]
async fn abandoned_load_does_not_leave_view_busy() {
    let source = FakeSource::with_rows(vec![json!({"id": 1})]);
    source.push(200, Ok(vec![]));
    let view = view_of(EntityKind::Assessment, source);

    let abandoned = tokio::time::timeout(Duration::from_millis(10), view.load()).await;
    assert!(abandoned.is_err());
    assert!(!view.is_loading());
    assert_eq!(view.load().await.unwrap(), LoadOutcome::Applied { count: 1 });
}

#[tokio::test]
async fn detached_view_ignores_late_responses() {
    let source = FakeSource::default();
    source.push(60, Ok(vec![json!({"id": 1})]));
    let view = view_of(EntityKind::Assessment, source);

    let (outcome, _) = futures::join!(view.load(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        view.detach();
    });
    assert_eq!(outcome.unwrap(), LoadOutcome::Detached);
    assert!(view.is_empty());

    assert_eq!(view.load().await.unwrap(), LoadOutcome::Detached);
    assert_eq!(view.source().fetch_count(), 1);
}

#[tokio::test]
async fn declined_delete_makes_no_request() {
    let view = view_of(EntityKind::Assessment, FakeSource::with_rows(e2e_assessments()));
    view.load().await.unwrap();

    assert_eq!(view.delete_record(1, &Decline).await.unwrap(), DeleteOutcome::Cancelled);
    assert!(view.source().deleted.lock().unwrap().is_empty());
    assert_eq!(view.source().fetch_count(), 1);
    assert_eq!(view.len(), 2);
}

#[tokio::test]
async fn failed_delete_leaves_collection_untouched() {
    let view = view_of(EntityKind::Assessment, FakeSource::with_rows(e2e_assessments()));
    view.load().await.unwrap();
    *view.source().delete_error.lock().unwrap() = Some("Record not found".to_string());

    match view.delete_record(2, &AssumeYes).await {
        Err(ViewError::MutationFailed { id, message }) => {
            assert_eq!(id, 2);
            assert_eq!(message, "Record not found");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(view.len(), 2);
    assert_eq!(view.error().as_deref(), Some("Record not found"));
    assert!(!view.is_deleting(2));
    assert_eq!(view.source().fetch_count(), 1);
}

#[tokio::test]
async fn second_delete_of_same_row_is_rejected_while_in_flight() {
    let source = FakeSource {
        rows: Mutex::new(e2e_assessments()),
        delete_delay_ms: 60,
        ..FakeSource::default()
    };
    let view = view_of(EntityKind::Assessment, source);
    view.load().await.unwrap();

    let (first, (busy, second)) = futures::join!(view.delete_record(2, &AssumeYes), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        (view.is_deleting(2), view.delete_record(2, &AssumeYes).await)
    });
    assert!(busy);
    assert!(matches!(second, Err(ViewError::DeleteInFlight { id: 2 })));
    assert!(matches!(first, Ok(DeleteOutcome::Deleted(_))));
    assert!(!view.is_deleting(2));
    assert_eq!(*view.source().deleted.lock().unwrap(), vec![2]);
}

#[tokio::test]
async fn bulk_delete_asks_once_and_reloads_once() {
    let rows = vec![
        json!({"medGuidanceId": 1, "symptoms": "cough"}),
        json!({"medGuidanceId": 2, "symptoms": "fever"}),
        json!({"medGuidanceId": 3, "symptoms": "rash"}),
    ];
    let source = FakeSource::with_rows(rows.clone());
    let view = view_of(EntityKind::Medication, source);
    view.load().await.unwrap();
    view.source().rows.lock().unwrap().clear();
    view.source().rows.lock().unwrap().push(rows[1].clone());

    let gate = RecordingGate::default();
    let outcome = view.delete_records(&[1, 3, 1], &gate).await.unwrap();
    let report = match outcome {
        BulkDeleteOutcome::Finished(report) => report,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(*gate.prompts.lock().unwrap(), vec!["Delete 2 record(s)?".to_string()]);
    assert_eq!(report.deleted, vec![1, 3]);
    assert!(report.failed.is_empty());
    assert_eq!(report.reload, Ok(LoadOutcome::Applied { count: 1 }));
    assert_eq!(view.source().fetch_count(), 2);
    assert_eq!(ids(&view), vec![2]);
    assert!(!view.is_deleting(1) && !view.is_deleting(3));
    assert!(view.error().is_none());
}

#[tokio::test]
async fn bulk_delete_keeps_going_after_a_failure() {
    let source = FakeSource::with_rows(health_rows(3));
    source.locked.lock().unwrap().push(2);
    let view = view_of(EntityKind::HealthData, source);
    view.load().await.unwrap();

    let outcome = view.delete_records(&[3, 2, 1], &AssumeYes).await.unwrap();
    let report = match outcome {
        BulkDeleteOutcome::Finished(report) => report,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(report.deleted, vec![3, 1]);
    assert_eq!(report.failed, vec![(2, "Record is locked".to_string())]);
    assert_eq!(report.reload, Ok(LoadOutcome::Applied { count: 1 }));
    assert_eq!(ids(&view), vec![2]);
    assert_eq!(view.source().fetch_count(), 2);
    assert!(view.error().unwrap().contains("Record is locked"));
    assert!(!view.is_deleting(2));
}

#[tokio::test]
async fn bulk_delete_that_removes_nothing_does_not_reload() {
    let source = FakeSource::with_rows(e2e_assessments());
    source.locked.lock().unwrap().extend([1, 2]);
    let view = view_of(EntityKind::Assessment, source);
    view.load().await.unwrap();

    match view.delete_records(&[1, 2], &AssumeYes).await {
        Err(ViewError::MutationFailed { id, message }) => {
            assert_eq!(id, 1);
            assert_eq!(message, "Record is locked");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(view.len(), 2);
    assert_eq!(view.source().fetch_count(), 1);
}

#[tokio::test]
async fn bulk_delete_checks_every_id_before_asking() {
    let view = view_of(EntityKind::Assessment, FakeSource::with_rows(e2e_assessments()));
    view.load().await.unwrap();
    let gate = RecordingGate::default();

    assert!(matches!(
        view.delete_records(&[1, 42], &gate).await,
        Err(ViewError::UnknownRecord { id: 42, .. })
    ));
    assert!(gate.prompts.lock().unwrap().is_empty());
    assert!(view.source().deleted.lock().unwrap().is_empty());
    assert_eq!(
        view.delete_records(&[], &gate).await.unwrap(),
        BulkDeleteOutcome::Cancelled
    );
}

#[tokio::test]
async fn unknown_ids_are_rejected() {
    let view = view_of(EntityKind::Assessment, FakeSource::with_rows(e2e_assessments()));
    view.load().await.unwrap();
    assert!(matches!(
        view.toggle_select(42),
        Err(ViewError::UnknownRecord { id: 42, .. })
    ));
    assert!(matches!(
        view.delete_record(42, &AssumeYes).await,
        Err(ViewError::UnknownRecord { id: 42, .. })
    ));
    assert!(view.selection().is_empty());
}

#[tokio::test]
async fn medication_view_has_no_comparison() {
    let rows = vec![
        json!({"medGuidanceId": 1, "symptoms": "cough"}),
        json!({"medGuidanceId": 2, "symptoms": "fever"}),
    ];
    let view = view_of(EntityKind::Medication, FakeSource::with_rows(rows));
    view.load().await.unwrap();
    view.toggle_select(1).unwrap();
    view.toggle_select(2).unwrap();
    assert_eq!(view.selection(), vec![1, 2]);
    assert!(view.comparison().is_none());
}

#[test]
fn signed_out_session_cannot_open_a_view() {
    let session = SessionContext::signed_out();
    let result = CollectionView::for_session(
        EntityKind::Assessment,
        &session,
        FakeSource::default(),
        page_size(10),
    );
    assert!(matches!(result, Err(ViewError::SignedOut)));

    let session = SessionContext::with_user(AuthUser {
        user_id: 42,
        username: "dana".into(),
        email: None,
        full_name: None,
        role: None,
    });
    let view = CollectionView::for_session(
        EntityKind::Assessment,
        &session,
        FakeSource::default(),
        page_size(10),
    )
    .unwrap();
    assert_eq!(view.owner(), 42);
}

#[tokio::test]
async fn print_opens_a_self_contained_document() {
    let dir = tempfile::tempdir().unwrap();
    let view = view_of(EntityKind::Assessment, FakeSource::with_rows(e2e_assessments()));
    view.load().await.unwrap();
    let surface = RecordingSurface::default();

    let artifact = view
        .export_printable(
            &PrintOptions {
                dir: dir.path().to_path_buf(),
            },
            &surface,
            Some(&[1][..]),
        )
        .await
        .unwrap();
    assert_eq!(artifact.rows, 1);
    assert_eq!(artifact.content_type, "text/html");
    assert_eq!(*surface.opened.lock().unwrap(), vec![artifact.path.clone()]);

    let html = std::fs::read_to_string(&artifact.path).unwrap();
    assert!(html.contains("Health Assessment Report"));
    assert!(html.contains("#1"));
    assert!(!html.contains("#2 "));
    assert!(!html.contains("http://") && !html.contains("https://"));
}

#[tokio::test]
async fn blocked_print_reports_the_written_file() {
    let dir = tempfile::tempdir().unwrap();
    let view = view_of(EntityKind::Medication, FakeSource::with_rows(vec![json!({"medGuidanceId": 5})]));
    view.load().await.unwrap();

    let options = PrintOptions {
        dir: dir.path().to_path_buf(),
    };
    match view.export_printable(&options, &NoSurface, None).await {
        Err(ViewError::PopupBlocked { path, reason }) => {
            assert!(path.exists());
            assert!(!reason.is_empty());
            let name = path.file_name().unwrap().to_string_lossy().to_string();
            assert!(name.starts_with("medication_") && name.ends_with(".html"));
        }
        other => panic!("unexpected {other:?}"),
    }

    assert!(matches!(
        view.export_printable(&options, &NoSurface, Some(&[99][..])).await,
        Err(ViewError::UnknownRecord { id: 99, .. })
    ));
}

#[tokio::test]
async fn repeated_exports_never_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let view = view_of(EntityKind::Assessment, FakeSource::with_rows(e2e_assessments()));
    view.load().await.unwrap();
    let options = CsvOptions {
        dir: dir.path().to_path_buf(),
        bom: true,
    };
    let a = view.export_csv(&options).await.unwrap();
    let b = view.export_csv(&options).await.unwrap();
    assert_ne!(a.path, b.path);
    assert_eq!(files_in(dir.path()).len(), 2);
}

#[derive(Clone, Default)]
struct Backend {
    assessments: Arc<Mutex<Vec<Value>>>,
    owners: Arc<Mutex<Vec<i64>>>,
}

async fn start_backend(backend: Backend) -> String {
    use axum::extract::{Path as UrlPath, State};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};

    async fn list_assessments(
        State(b): State<Backend>,
        UrlPath(owner): UrlPath<i64>,
    ) -> Json<Value> {
        b.owners.lock().unwrap().push(owner);
        let rows = b.assessments.lock().unwrap().clone();
        Json(Value::Array(rows))
    }

    async fn delete_assessment(
        State(b): State<Backend>,
        UrlPath(id): UrlPath<i64>,
    ) -> (StatusCode, Json<Value>) {
        if id == 13 {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Record is locked"})),
            );
        }
        let mut rows = b.assessments.lock().unwrap();
        let before = rows.len();
        rows.retain(|r| r.get("id").and_then(Value::as_i64) != Some(id));
        if rows.len() == before {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Record not found"})),
            );
        }
        (StatusCode::OK, Json(json!({"message": "Deleted"})))
    }

    async fn list_medications(UrlPath(_owner): UrlPath<i64>) -> Json<Value> {
        Json(json!({"data": [
            {"medGuidanceId": 8, "createdAt": "2024-05-01T10:00:00", "symptoms": "headache"},
            {"medGuidanceId": 9, "createdAt": "2024-05-02T10:00:00", "symptoms": "sore throat"}
        ]}))
    }

    async fn broken(UrlPath(_owner): UrlPath<i64>) -> (StatusCode, &'static str) {
        (StatusCode::INTERNAL_SERVER_ERROR, "db unavailable")
    }

    let app = Router::new()
        .route("/api/health-assessments/user/:owner", get(list_assessments))
        .route(
            "/api/health-assessments/:id",
            axum::routing::delete(delete_assessment),
        )
        .route("/api/medication-guidance/user/:owner", get(list_medications))
        .route("/api/health-data/user/:owner", get(broken))
        .with_state(backend);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn http_client(base: &str) -> HttpCollectionClient {
    HttpCollectionClient::new(ClientOptions {
        base_url: base.to_string(),
        timeout_secs: 5,
        ..ClientOptions::default()
    })
    .unwrap()
}

#[tokio::test]
async fn http_view_loads_and_deletes_through_the_api() {
    let backend = Backend::default();
    *backend.assessments.lock().unwrap() = vec![
        json!({"id": 1, "overallScore": 70, "createdAt": "2024-01-01T09:00:00"}),
        json!({"id": 2, "overallScore": 85, "createdAt": "2024-01-02T09:00:00"}),
        json!({"id": 13, "overallScore": 60, "createdAt": "2023-12-01T09:00:00"}),
    ];
    let base = start_backend(backend.clone()).await;
    let view = CollectionView::new(EntityKind::Assessment, 7, http_client(&base), page_size(10));

    assert_eq!(view.load().await.unwrap(), LoadOutcome::Applied { count: 3 });
    assert_eq!(*backend.owners.lock().unwrap(), vec![7]);
    assert_eq!(view.records()[0].id, 2);

    let outcome = view.delete_record(2, &AssumeYes).await.unwrap();
    assert_eq!(outcome, DeleteOutcome::Deleted(LoadOutcome::Applied { count: 2 }));
    assert!(view.get(2).is_none());

    match view.delete_record(13, &AssumeYes).await {
        Err(ViewError::MutationFailed { id: 13, message }) => {
            assert_eq!(message, "Record is locked")
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(view.len(), 2);
}

#[tokio::test]
async fn http_server_error_text_reaches_the_view() {
    let base = start_backend(Backend::default()).await;
    let view = CollectionView::new(EntityKind::HealthData, 7, http_client(&base), page_size(10));

    match view.load().await {
        Err(ViewError::LoadFailed { message }) => assert!(message.contains("db unavailable")),
        other => panic!("unexpected {other:?}"),
    }
    assert!(view.is_empty());
}

#[tokio::test]
async fn http_wrapped_lists_and_id_aliases_are_normalized() {
    let base = start_backend(Backend::default()).await;
    let client = http_client(&base);
    let rows = client.fetch(EntityKind::Medication, 3).await.unwrap();
    assert_eq!(rows.len(), 2);

    let view = CollectionView::new(EntityKind::Medication, 3, client, page_size(10));
    view.load().await.unwrap();
    assert_eq!(view.records().iter().map(|r| r.id).collect::<Vec<_>>(), vec![9, 8]);
}

#[tokio::test]
async fn http_transport_failure_is_a_load_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let view = CollectionView::new(
        EntityKind::Assessment,
        1,
        http_client(&format!("http://{addr}")),
        page_size(10),
    );
    assert!(matches!(view.load().await, Err(ViewError::LoadFailed { .. })));
    assert!(view.error().is_some());
}
