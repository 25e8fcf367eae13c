pub mod paginator;
pub mod selection;
pub mod trend;

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info, warn};

use crate::client::CollectionSource;
use crate::output::print::{self, PrintSurface};
use crate::output::{self, ExportArtifact};
use crate::record::{build_collection, EntityKind, OwnerId, Record};
use crate::session::SessionContext;
use crate::utils;

pub use paginator::Paginator;
pub use selection::{Comparison, SelectionSet};

pub const CONFIRM_DELETE_PROMPT: &str = "Delete this record?";
pub const NO_RECORDS_NOTICE: &str = "No records to export.";

#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    #[error("{message}")]
    LoadFailed { message: String },

    #[error("failed to delete record {id}: {message}")]
    MutationFailed { id: i64, message: String },

    #[error("record {id} is already being deleted")]
    DeleteInFlight { id: i64 },

    #[error("{notice}")]
    ExportPrecondition { notice: &'static str },

    #[error("could not open the print view ({reason}); open {} in a browser and print it from there", path.display())]
    PopupBlocked { path: PathBuf, reason: String },

    #[error("failed to write export into {}: {source}", path.display())]
    ExportWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("record {id} is not in the loaded {kind} list")]
    UnknownRecord { kind: EntityKind, id: i64 },

    #[error("not signed in; run `healthmate session set` first")]
    SignedOut,
}

impl ViewError {
    /// User-facing notices that are not failures.
    pub fn is_notice(&self) -> bool {
        matches!(self, Self::ExportPrecondition { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    Applied { count: usize },
    /// A newer load was issued before this one finished.
    Stale,
    Detached,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted(LoadOutcome),
    /// The backend removed the record but the follow-up reload failed.
    DeletedReloadFailed { message: String },
    Cancelled,
}

/// Removal of several records, reloaded once afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BulkDeleteReport {
    pub deleted: Vec<i64>,
    pub failed: Vec<(i64, String)>,
    /// The follow-up load, or its error text.
    pub reload: Result<LoadOutcome, String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BulkDeleteOutcome {
    Finished(BulkDeleteReport),
    Cancelled,
}

pub fn delete_many_prompt(count: usize) -> String {
    format!("Delete {count} record(s)?")
}

/// Asked before a destructive action.
pub trait ConfirmGate {
    fn confirm(&self, prompt: &str) -> bool;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct AssumeYes;

impl ConfirmGate for AssumeYes {
    fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

#[derive(Clone, Debug)]
pub struct CsvOptions {
    pub dir: PathBuf,
    pub bom: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            bom: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PrintOptions {
    pub dir: PathBuf,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
        }
    }
}

/// One rendered page of the collection.
#[derive(Clone, Debug, PartialEq)]
pub struct PageView {
    pub page: usize,
    pub total_pages: usize,
    pub total_records: usize,
    pub rows: Vec<Record>,
}

#[derive(Debug, Default)]
struct ViewState {
    records: Vec<Record>,
    paginator: Paginator,
    selection: SelectionSet,
    issued: u64,
    applied: u64,
    pending_loads: usize,
    deleting: HashSet<i64>,
    detached: bool,
    error: Option<String>,
}

/// Clears the in-flight mark for a delete however the call ends.
struct DeleteMark<'a> {
    state: &'a Mutex<ViewState>,
    id: i64,
}

impl Drop for DeleteMark<'_> {
    fn drop(&mut self) {
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        st.deleting.remove(&self.id);
    }
}

/// Counts one outstanding load until the fetch settles or is dropped.
struct PendingLoad<'a> {
    state: &'a Mutex<ViewState>,
}

impl Drop for PendingLoad<'_> {
    fn drop(&mut self) {
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        st.pending_loads = st.pending_loads.saturating_sub(1);
    }
}

/// Paginated, selectable, exportable view over one owner's records of one kind.
pub struct CollectionView<S> {
    kind: EntityKind,
    owner: OwnerId,
    source: S,
    state: Mutex<ViewState>,
}

impl<S: CollectionSource> CollectionView<S> {
    pub fn new(kind: EntityKind, owner: OwnerId, source: S, page_size: NonZeroUsize) -> Self {
        let state = ViewState {
            paginator: Paginator::new(page_size),
            ..ViewState::default()
        };
        Self {
            kind,
            owner,
            source,
            state: Mutex::new(state),
        }
    }

    /// View for the signed-in user of `session`.
    pub fn for_session(
        kind: EntityKind,
        session: &SessionContext,
        source: S,
        page_size: NonZeroUsize,
    ) -> Result<Self, ViewError> {
        let owner = session.owner().ok_or(ViewError::SignedOut)?;
        Ok(Self::new(kind, owner, source, page_size))
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn state(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetches the whole collection and replaces the loaded one. Safe to call
    /// while another load is outstanding: only the most recently issued
    /// response is applied.
    pub async fn load(&self) -> Result<LoadOutcome, ViewError> {
        let (generation, pending) = {
            let mut st = self.state();
            if st.detached {
                return Ok(LoadOutcome::Detached);
            }
            st.issued += 1;
            st.pending_loads += 1;
            let pending = PendingLoad { state: &self.state };
            (st.issued, pending)
        };
        debug!(kind = %self.kind, owner = self.owner, generation, "loading");

        let result = self.source.fetch(self.kind, self.owner).await;
        drop(pending);

        let mut guard = self.state();
        let st = &mut *guard;
        if st.detached {
            debug!(kind = %self.kind, generation, "view detached, response dropped");
            return Ok(LoadOutcome::Detached);
        }
        if generation <= st.applied {
            warn!(kind = %self.kind, generation, applied = st.applied, "discarding stale response");
            return Ok(LoadOutcome::Stale);
        }
        st.applied = generation;

        match result {
            Ok(rows) => {
                st.records = build_collection(self.kind, rows);
                let len = st.records.len();
                st.paginator.clamp(len);
                st.selection.retain_present(&st.records);
                st.error = None;
                info!(kind = %self.kind, owner = self.owner, count = len, "collection loaded");
                Ok(LoadOutcome::Applied { count: len })
            }
            Err(e) => {
                let message = e.to_string();
                error!(kind = %self.kind, owner = self.owner, error = %message, "load failed");
                st.error = Some(message.clone());
                Err(ViewError::LoadFailed { message })
            }
        }
    }

    /// Deletes one record after confirmation, then reloads the collection.
    pub async fn delete_record<G: ConfirmGate + ?Sized>(
        &self,
        id: i64,
        gate: &G,
    ) -> Result<DeleteOutcome, ViewError> {
        self.ensure_deletable(&self.state(), id)?;

        if !gate.confirm(CONFIRM_DELETE_PROMPT) {
            debug!(kind = %self.kind, id, "delete cancelled");
            return Ok(DeleteOutcome::Cancelled);
        }

        let mark = {
            let mut st = self.state();
            if !st.deleting.insert(id) {
                return Err(ViewError::DeleteInFlight { id });
            }
            DeleteMark {
                state: &self.state,
                id,
            }
        };

        let result = self.source.delete(self.kind, id).await;
        drop(mark);

        if let Err(e) = result {
            let message = e.to_string();
            error!(kind = %self.kind, id, error = %message, "delete failed");
            self.state().error = Some(message.clone());
            return Err(ViewError::MutationFailed { id, message });
        }
        info!(kind = %self.kind, id, "record deleted");

        match self.load().await {
            Ok(outcome) => Ok(DeleteOutcome::Deleted(outcome)),
            Err(ViewError::LoadFailed { message }) => {
                Ok(DeleteOutcome::DeletedReloadFailed { message })
            }
            Err(e) => Err(e),
        }
    }

    /// Deletes every record in `ids` behind a single confirmation. Requests
    /// run one after another; a failure does not stop the rest. The
    /// collection is reloaded once when at least one delete succeeded.
    pub async fn delete_records<G: ConfirmGate + ?Sized>(
        &self,
        ids: &[i64],
        gate: &G,
    ) -> Result<BulkDeleteOutcome, ViewError> {
        let mut targets: Vec<i64> = Vec::with_capacity(ids.len());
        for &id in ids {
            if !targets.contains(&id) {
                targets.push(id);
            }
        }
        if targets.is_empty() {
            return Ok(BulkDeleteOutcome::Cancelled);
        }
        {
            let st = self.state();
            for &id in &targets {
                self.ensure_deletable(&st, id)?;
            }
        }

        if !gate.confirm(&delete_many_prompt(targets.len())) {
            debug!(kind = %self.kind, count = targets.len(), "bulk delete cancelled");
            return Ok(BulkDeleteOutcome::Cancelled);
        }

        let marks: Vec<DeleteMark<'_>> = {
            let mut st = self.state();
            if let Some(&id) = targets.iter().find(|&&id| st.deleting.contains(&id)) {
                return Err(ViewError::DeleteInFlight { id });
            }
            st.deleting.extend(targets.iter().copied());
            targets
                .iter()
                .map(|&id| DeleteMark {
                    state: &self.state,
                    id,
                })
                .collect()
        };

        let mut deleted = Vec::new();
        let mut failed = Vec::new();
        for mark in marks {
            let id = mark.id;
            let result = self.source.delete(self.kind, id).await;
            drop(mark);
            match result {
                Ok(()) => {
                    info!(kind = %self.kind, id, "record deleted");
                    deleted.push(id);
                }
                Err(e) => {
                    let message = e.to_string();
                    error!(kind = %self.kind, id, error = %message, "delete failed");
                    failed.push((id, message));
                }
            }
        }

        if deleted.is_empty() {
            if let Some((id, message)) = failed.first().cloned() {
                self.state().error = Some(message.clone());
                return Err(ViewError::MutationFailed { id, message });
            }
        }

        let reload = match self.load().await {
            Ok(outcome) => Ok(outcome),
            Err(ViewError::LoadFailed { message }) => Err(message),
            Err(e) => return Err(e),
        };
        if let (Ok(_), Some((id, message))) = (&reload, failed.first()) {
            self.state().error = Some(format!("failed to delete record {id}: {message}"));
        }
        Ok(BulkDeleteOutcome::Finished(BulkDeleteReport {
            deleted,
            failed,
            reload,
        }))
    }

    fn ensure_deletable(&self, st: &ViewState, id: i64) -> Result<(), ViewError> {
        if st.deleting.contains(&id) {
            return Err(ViewError::DeleteInFlight { id });
        }
        if !st.records.iter().any(|r| r.id == id) {
            return Err(ViewError::UnknownRecord {
                kind: self.kind,
                id,
            });
        }
        Ok(())
    }

    /// Toggles selection of a loaded record. Returns whether it is selected
    /// afterwards.
    pub fn toggle_select(&self, id: i64) -> Result<bool, ViewError> {
        let mut st = self.state();
        if !st.records.iter().any(|r| r.id == id) {
            return Err(ViewError::UnknownRecord {
                kind: self.kind,
                id,
            });
        }
        Ok(st.selection.toggle(id))
    }

    pub fn clear_selection(&self) {
        self.state().selection.clear();
    }

    pub fn selection(&self) -> Vec<i64> {
        self.state().selection.ids()
    }

    pub fn comparison(&self) -> Option<Comparison> {
        let field = self.kind.comparison_field()?;
        let st = self.state();
        st.selection.comparison(&st.records, field)
    }

    /// `"Score change: -15"` style line, when a comparison exists.
    pub fn comparison_text(&self) -> Option<String> {
        self.comparison().map(|c| {
            format!(
                "{}: {}",
                self.kind.comparison_label(),
                utils::format_signed(c.delta)
            )
        })
    }

    pub fn set_page(&self, page: usize) -> usize {
        let mut guard = self.state();
        let st = &mut *guard;
        st.paginator.set_page(page, st.records.len())
    }

    pub fn next_page(&self) -> usize {
        let mut guard = self.state();
        let st = &mut *guard;
        st.paginator.next(st.records.len())
    }

    pub fn prev_page(&self) -> usize {
        self.state().paginator.prev()
    }

    pub fn page(&self) -> PageView {
        let st = self.state();
        let len = st.records.len();
        PageView {
            page: st.paginator.page(),
            total_pages: st.paginator.total_pages(len),
            total_records: len,
            rows: st.paginator.window(&st.records).to_vec(),
        }
    }

    pub fn records(&self) -> Vec<Record> {
        self.state().records.clone()
    }

    pub fn len(&self) -> usize {
        self.state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().records.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<Record> {
        self.state().records.iter().find(|r| r.id == id).cloned()
    }

    pub fn is_loading(&self) -> bool {
        self.state().pending_loads > 0
    }

    pub fn is_deleting(&self, id: i64) -> bool {
        self.state().deleting.contains(&id)
    }

    /// Text of the last failed load or delete, cleared by the next successful load.
    pub fn error(&self) -> Option<String> {
        self.state().error.clone()
    }

    /// Stops applying responses. Loads still in flight finish as `Detached`.
    pub fn detach(&self) {
        self.state().detached = true;
    }

    pub fn is_detached(&self) -> bool {
        self.state().detached
    }

    /// Writes the whole collection as CSV into `options.dir`.
    pub async fn export_csv(&self, options: &CsvOptions) -> Result<ExportArtifact, ViewError> {
        let records = self.records();
        if records.is_empty() {
            return Err(ViewError::ExportPrecondition {
                notice: NO_RECORDS_NOTICE,
            });
        }
        let body = output::render_csv(output::csv_columns(self.kind), &records, options.bom);
        let stem = output::export_stem(self.kind, chrono::Utc::now().timestamp_millis());
        let path = output::write_unique(&options.dir, &stem, "csv", body.as_bytes())
            .await
            .map_err(|e| ViewError::ExportWrite {
                path: options.dir.clone(),
                source: e,
            })?;
        info!(kind = %self.kind, rows = records.len(), path = %path.display(), "csv exported");
        Ok(ExportArtifact {
            path,
            rows: records.len(),
            content_type: output::CSV_CONTENT_TYPE,
        })
    }

    /// Writes a printable document for the collection (or just `ids`) and
    /// asks `surface` to open it.
    pub async fn export_printable<P: PrintSurface + ?Sized>(
        &self,
        options: &PrintOptions,
        surface: &P,
        ids: Option<&[i64]>,
    ) -> Result<ExportArtifact, ViewError> {
        let records = self.records();
        if let Some(ids) = ids {
            if let Some(missing) = ids.iter().find(|id| !records.iter().any(|r| r.id == **id)) {
                return Err(ViewError::UnknownRecord {
                    kind: self.kind,
                    id: *missing,
                });
            }
        }
        let section = print::build_section(self.kind, &records, ids);
        if section.is_empty() {
            return Err(ViewError::ExportPrecondition {
                notice: NO_RECORDS_NOTICE,
            });
        }

        let generated = chrono::Local::now()
            .format(utils::DISPLAY_DATE_FORMAT)
            .to_string();
        let html = print::render_document(&section, &generated);
        let stem = output::export_stem(self.kind, chrono::Utc::now().timestamp_millis());
        let path = output::write_unique(&options.dir, &stem, "html", html.as_bytes())
            .await
            .map_err(|e| ViewError::ExportWrite {
                path: options.dir.clone(),
                source: e,
            })?;
        let rows = section.blocks.len();
        info!(kind = %self.kind, rows, path = %path.display(), "print document written");

        if let Err(reason) = surface.open(&path) {
            warn!(path = %path.display(), %reason, "print surface unavailable");
            return Err(ViewError::PopupBlocked { path, reason });
        }
        Ok(ExportArtifact {
            path,
            rows,
            content_type: output::HTML_CONTENT_TYPE,
        })
    }
}
