//! Full propagation-cycle tests over the in-memory backends.
//!
//! These drive the same propagator code paths the binary runs, with the
//! MySQL store, the remote sheet, and the mark file replaced by their
//! in-memory counterparts.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use sheet_sync::memory::MemoryStore;
use sheet_sync::{
    ChangeOp, LoopSuppressor, PullPropagator, PushPropagator, RelationalStore, RowRecord,
};
use sync_mark::{MemoryMarkStore, SyncMarkStore};
use tabular_endpoint::{EndpointError, MemorySheet, TabularEndpoint};

fn record(pairs: &[(&str, &str)]) -> RowRecord {
    RowRecord::new(
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    )
}

/// Seed a table row without leaving a change-log entry behind.
async fn seed_row(store: &MemoryStore, pairs: &[(&str, &str)]) {
    store.insert_row(&record(pairs)).await.unwrap();
    store.clear_change_log();
}

/// A sheet that can inject failures: the nth write fails once, and reads can
/// be failed wholesale.
struct FlakySheet {
    inner: MemorySheet,
    writes: AtomicUsize,
    fail_nth_write: usize,
    fail_reads: AtomicBool,
}

impl FlakySheet {
    fn failing_nth_write(inner: MemorySheet, nth: usize) -> Self {
        Self {
            inner,
            writes: AtomicUsize::new(0),
            fail_nth_write: nth,
            fail_reads: AtomicBool::new(false),
        }
    }

    fn failing_reads(inner: MemorySheet) -> Self {
        let sheet = Self::failing_nth_write(inner, 0);
        sheet.fail_reads.store(true, Ordering::SeqCst);
        sheet
    }

    fn check_write(&self) -> Result<(), EndpointError> {
        let n = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_nth_write {
            return Err(EndpointError::Write("injected write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl TabularEndpoint for FlakySheet {
    async fn values_get(&self, range: &str) -> Result<Vec<Vec<String>>, EndpointError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(EndpointError::Read("injected read failure".into()));
        }
        self.inner.values_get(range).await
    }

    async fn values_update(
        &self,
        range: &str,
        values: Vec<Vec<String>>,
    ) -> Result<(), EndpointError> {
        self.check_write()?;
        self.inner.values_update(range, values).await
    }

    async fn values_append(
        &self,
        range: &str,
        values: Vec<Vec<String>>,
    ) -> Result<(), EndpointError> {
        self.check_write()?;
        self.inner.values_append(range, values).await
    }
}

#[tokio::test]
async fn captured_insert_is_appended_to_sheet() {
    let store = Arc::new(MemoryStore::new());
    store
        .create_table(&["Id".to_string(), "Name".to_string()])
        .await
        .unwrap();
    let sheet = Arc::new(MemorySheet::with_rows(vec![vec!["Id", "Name"]]));
    let suppressor = Arc::new(LoopSuppressor::new());

    store
        .insert_row(&record(&[("Id", "1"), ("Name", "A")]))
        .await
        .unwrap();
    assert_eq!(store.pending_changes().await.unwrap().len(), 1);

    let push = PushPropagator::new(
        store.clone() as Arc<dyn RelationalStore>,
        sheet.clone() as Arc<dyn TabularEndpoint>,
        "Sheet1",
        suppressor,
    );
    push.run_cycle().await.unwrap();

    assert_eq!(sheet.rows()[1], vec!["1".to_string(), "A".to_string()]);
    assert!(store.pending_changes().await.unwrap().is_empty());
    assert!(store.capture_enabled());
}

#[tokio::test]
async fn failed_replay_preserves_fifo_order() {
    let store = Arc::new(MemoryStore::new());
    store
        .create_table(&["Id".to_string(), "Name".to_string()])
        .await
        .unwrap();
    // Second write to the sheet fails once.
    let sheet = Arc::new(FlakySheet::failing_nth_write(
        MemorySheet::with_rows(vec![vec!["Id", "Name"]]),
        2,
    ));
    let suppressor = Arc::new(LoopSuppressor::new());

    for (id, name) in [("1", "A"), ("2", "B"), ("3", "C")] {
        store
            .insert_row(&record(&[("Id", id), ("Name", name)]))
            .await
            .unwrap();
    }

    let push = PushPropagator::new(
        store.clone() as Arc<dyn RelationalStore>,
        sheet.clone() as Arc<dyn TabularEndpoint>,
        "Sheet1",
        suppressor,
    );
    assert!(push.run_cycle().await.is_err());

    // The first entry was acknowledged, the failed one and everything behind
    // it stayed queued in order.
    let remaining = store.pending_changes().await.unwrap();
    let row_ids: Vec<&str> = remaining.iter().map(|e| e.row_id.as_str()).collect();
    assert_eq!(row_ids, vec!["2", "3"]);
    assert!(store.capture_enabled());

    // The next cycle drains the rest.
    push.run_cycle().await.unwrap();
    assert!(store.pending_changes().await.unwrap().is_empty());
    let rows = sheet.inner.rows();
    assert_eq!(rows[1], vec!["1".to_string(), "A".to_string()]);
    assert_eq!(rows[2], vec!["2".to_string(), "B".to_string()]);
    assert_eq!(rows[3], vec!["3".to_string(), "C".to_string()]);
}

#[tokio::test]
async fn update_replay_finds_row_by_id_not_position() {
    let store = Arc::new(MemoryStore::new());
    store
        .create_table(&["Id".to_string(), "Name".to_string()])
        .await
        .unwrap();
    seed_row(&store, &[("Id", "1"), ("Name", "A")]).await;
    seed_row(&store, &[("Id", "2"), ("Name", "B")]).await;
    // Rows in the sheet are in the reverse order of their ids.
    let sheet = Arc::new(MemorySheet::with_rows(vec![
        vec!["Id", "Name"],
        vec!["2", "B"],
        vec!["1", "A"],
    ]));
    let suppressor = Arc::new(LoopSuppressor::new());

    store
        .update_row(&record(&[("Id", "1"), ("Name", "A2")]))
        .await
        .unwrap();

    let push = PushPropagator::new(
        store.clone() as Arc<dyn RelationalStore>,
        sheet.clone() as Arc<dyn TabularEndpoint>,
        "Sheet1",
        suppressor,
    );
    push.run_cycle().await.unwrap();

    let rows = sheet.rows();
    assert_eq!(rows[1], vec!["2".to_string(), "B".to_string()]);
    assert_eq!(rows[2], vec!["1".to_string(), "A2".to_string()]);
}

#[tokio::test]
async fn repeated_update_replay_converges() {
    let store = Arc::new(MemoryStore::new());
    store
        .create_table(&["Id".to_string(), "Name".to_string()])
        .await
        .unwrap();
    seed_row(&store, &[("Id", "1"), ("Name", "A")]).await;
    let sheet = Arc::new(MemorySheet::with_rows(vec![
        vec!["Id", "Name"],
        vec!["1", "A"],
    ]));
    let suppressor = Arc::new(LoopSuppressor::new());

    // Two queued updates to the same row both replay the current database
    // state, so the second is a no-op overwrite rather than a duplicate.
    store
        .update_row(&record(&[("Id", "1"), ("Name", "B")]))
        .await
        .unwrap();
    store
        .update_row(&record(&[("Id", "1"), ("Name", "C")]))
        .await
        .unwrap();

    let push = PushPropagator::new(
        store.clone() as Arc<dyn RelationalStore>,
        sheet.clone() as Arc<dyn TabularEndpoint>,
        "Sheet1",
        suppressor,
    );
    push.run_cycle().await.unwrap();

    let rows = sheet.rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1], vec!["1".to_string(), "C".to_string()]);
}

#[tokio::test]
async fn delete_replay_blanks_the_sheet_row() {
    let store = Arc::new(MemoryStore::new());
    store
        .create_table(&["Id".to_string(), "Name".to_string()])
        .await
        .unwrap();
    seed_row(&store, &[("Id", "1"), ("Name", "A")]).await;
    seed_row(&store, &[("Id", "2"), ("Name", "B")]).await;
    let sheet = Arc::new(MemorySheet::with_rows(vec![
        vec!["Id", "Name"],
        vec!["1", "A"],
        vec!["2", "B"],
    ]));
    let suppressor = Arc::new(LoopSuppressor::new());

    store.delete_row("1").await.unwrap();

    let push = PushPropagator::new(
        store.clone() as Arc<dyn RelationalStore>,
        sheet.clone() as Arc<dyn TabularEndpoint>,
        "Sheet1",
        suppressor,
    );
    push.run_cycle().await.unwrap();

    let rows = sheet.rows();
    // Row 2 is blanked in place, row 3 keeps its position.
    assert_eq!(rows[1], vec!["".to_string(), "".to_string()]);
    assert_eq!(rows[2], vec!["2".to_string(), "B".to_string()]);
}

#[tokio::test]
async fn stale_change_entry_is_acknowledged_without_replay() {
    let store = Arc::new(MemoryStore::new());
    store
        .create_table(&["Id".to_string(), "Name".to_string()])
        .await
        .unwrap();
    let sheet = Arc::new(MemorySheet::with_rows(vec![vec!["Id", "Name"]]));
    let suppressor = Arc::new(LoopSuppressor::new());

    // Insert then delete before any cycle runs: the INSERT entry now points
    // at a row that no longer exists.
    store
        .insert_row(&record(&[("Id", "1"), ("Name", "A")]))
        .await
        .unwrap();
    store.delete_row("1").await.unwrap();

    let push = PushPropagator::new(
        store.clone() as Arc<dyn RelationalStore>,
        sheet.clone() as Arc<dyn TabularEndpoint>,
        "Sheet1",
        suppressor,
    );
    push.run_cycle().await.unwrap();

    assert!(store.pending_changes().await.unwrap().is_empty());
    // Nothing was ever appended for the vanished row.
    assert_eq!(sheet.rows().len(), 1);
}

#[tokio::test]
async fn pull_upserts_fresh_rows_and_skips_stale_ones() {
    let store = Arc::new(MemoryStore::new());
    store
        .create_table(&["Id".to_string(), "Name".to_string()])
        .await
        .unwrap();
    seed_row(&store, &[("Id", "1"), ("Name", "old")]).await;
    seed_row(&store, &[("Id", "2"), ("Name", "keep")]).await;

    // Column C holds the last-modified timestamps; its header cell is blank
    // so it stays outside the active column run.
    let sheet = Arc::new(MemorySheet::with_rows(vec![
        vec!["Id", "Name"],
        vec!["1", "fresh", "2024-03-06 00:00:00"],
        vec!["2", "ignored", "2024-03-04 00:00:00"],
    ]));
    let mark_store = Arc::new(MemoryMarkStore::new());
    let mark = sheet_sync::pull::parse_timestamp("2024-03-05 00:00:00").unwrap();
    mark_store.store(mark).await.unwrap();
    let suppressor = Arc::new(LoopSuppressor::new());

    let pull = PullPropagator::new(
        store.clone() as Arc<dyn RelationalStore>,
        sheet.clone() as Arc<dyn TabularEndpoint>,
        "Sheet1",
        "C",
        mark_store.clone() as Arc<dyn SyncMarkStore>,
        suppressor,
    );
    pull.run_cycle().await.unwrap();

    let row1 = store.fetch_row("1").await.unwrap().unwrap();
    assert_eq!(row1.get("Name"), Some("fresh"));
    let row2 = store.fetch_row("2").await.unwrap().unwrap();
    assert_eq!(row2.get("Name"), Some("keep"));

    // The mark advanced past the old value after the completed cycle.
    let stored = mark_store.load().await.unwrap().unwrap();
    assert!(stored > mark);
}

#[tokio::test]
async fn pull_inserts_new_sheet_rows() {
    let store = Arc::new(MemoryStore::new());
    store
        .create_table(&["Id".to_string(), "Name".to_string()])
        .await
        .unwrap();
    let sheet = Arc::new(MemorySheet::with_rows(vec![
        vec!["Id", "Name"],
        vec!["7", "new", "2024-03-06 00:00:00"],
    ]));
    let mark_store = Arc::new(MemoryMarkStore::new());
    let suppressor = Arc::new(LoopSuppressor::new());

    let pull = PullPropagator::new(
        store.clone() as Arc<dyn RelationalStore>,
        sheet.clone() as Arc<dyn TabularEndpoint>,
        "Sheet1",
        "C",
        mark_store as Arc<dyn SyncMarkStore>,
        suppressor,
    );
    pull.run_cycle().await.unwrap();

    let row = store.fetch_row("7").await.unwrap().unwrap();
    assert_eq!(row.get("Name"), Some("new"));
    // Upserts during the cycle were not echoed into the change log.
    assert!(store.pending_changes().await.unwrap().is_empty());
    assert!(store.capture_enabled());
}

#[tokio::test]
async fn pull_deletes_rows_missing_from_sheet() {
    let store = Arc::new(MemoryStore::new());
    store
        .create_table(&["Id".to_string(), "Name".to_string()])
        .await
        .unwrap();
    for (id, name) in [("1", "A"), ("2", "B"), ("3", "C")] {
        seed_row(&store, &[("Id", id), ("Name", name)]).await;
    }
    let sheet = Arc::new(MemorySheet::with_rows(vec![
        vec!["Id", "Name"],
        vec!["1", "A", "2024-03-04 00:00:00"],
        vec!["3", "C", "2024-03-04 00:00:00"],
    ]));
    let mark_store = Arc::new(MemoryMarkStore::new());
    let suppressor = Arc::new(LoopSuppressor::new());

    let pull = PullPropagator::new(
        store.clone() as Arc<dyn RelationalStore>,
        sheet.clone() as Arc<dyn TabularEndpoint>,
        "Sheet1",
        "C",
        mark_store as Arc<dyn SyncMarkStore>,
        suppressor,
    );
    pull.run_cycle().await.unwrap();

    assert_eq!(
        store.list_ids().await.unwrap(),
        vec!["1".to_string(), "3".to_string()]
    );
    // The reconciling delete was not echoed into the change log.
    assert!(store.pending_changes().await.unwrap().is_empty());
}

#[tokio::test]
async fn pull_treats_blanked_rows_as_absent() {
    let store = Arc::new(MemoryStore::new());
    store
        .create_table(&["Id".to_string(), "Name".to_string()])
        .await
        .unwrap();
    seed_row(&store, &[("Id", "1"), ("Name", "A")]).await;
    seed_row(&store, &[("Id", "2"), ("Name", "B")]).await;
    // Row 2 was blanked by a replayed delete.
    let sheet = Arc::new(MemorySheet::with_rows(vec![
        vec!["Id", "Name"],
        vec!["", ""],
        vec!["2", "B", "2024-03-04 00:00:00"],
    ]));
    let mark_store = Arc::new(MemoryMarkStore::new());
    let suppressor = Arc::new(LoopSuppressor::new());

    let pull = PullPropagator::new(
        store.clone() as Arc<dyn RelationalStore>,
        sheet.clone() as Arc<dyn TabularEndpoint>,
        "Sheet1",
        "C",
        mark_store as Arc<dyn SyncMarkStore>,
        suppressor,
    );
    pull.run_cycle().await.unwrap();

    assert_eq!(store.list_ids().await.unwrap(), vec!["2".to_string()]);
}

#[tokio::test]
async fn pull_reconciles_schema_from_headers() {
    let store = Arc::new(MemoryStore::new());
    store
        .create_table(&["Id".to_string(), "Name".to_string(), "Legacy".to_string()])
        .await
        .unwrap();
    seed_row(&store, &[("Id", "1"), ("Name", "A"), ("Legacy", "x")]).await;

    // Headers gained Email and lost Legacy; timestamps live in column E,
    // past the blank cell that ends the active header run.
    let sheet = Arc::new(MemorySheet::with_rows(vec![
        vec!["Id", "Name", "Email"],
        vec!["1", "A", "a@example.com", "", "2024-03-06 00:00:00"],
    ]));
    let mark_store = Arc::new(MemoryMarkStore::new());
    let suppressor = Arc::new(LoopSuppressor::new());

    let pull = PullPropagator::new(
        store.clone() as Arc<dyn RelationalStore>,
        sheet.clone() as Arc<dyn TabularEndpoint>,
        "Sheet1",
        "E",
        mark_store as Arc<dyn SyncMarkStore>,
        suppressor,
    );
    pull.run_cycle().await.unwrap();

    let columns = store.current_columns().await.unwrap();
    assert_eq!(
        columns,
        vec!["Id".to_string(), "Name".to_string(), "Email".to_string()]
    );
    let row = store.fetch_row("1").await.unwrap().unwrap();
    assert_eq!(row.get("Email"), Some("a@example.com"));
    assert_eq!(row.get("Legacy"), None);
}

#[tokio::test]
async fn failed_pull_leaves_mark_untouched_and_capture_enabled() {
    let store = Arc::new(MemoryStore::new());
    store
        .create_table(&["Id".to_string(), "Name".to_string()])
        .await
        .unwrap();
    let sheet = Arc::new(FlakySheet::failing_reads(MemorySheet::with_rows(vec![
        vec!["Id", "Name"],
        vec!["1", "A", "2024-03-06 00:00:00"],
    ])));
    let mark_store = Arc::new(MemoryMarkStore::new());
    let suppressor = Arc::new(LoopSuppressor::new());

    let pull = PullPropagator::new(
        store.clone() as Arc<dyn RelationalStore>,
        sheet.clone() as Arc<dyn TabularEndpoint>,
        "Sheet1",
        "C",
        mark_store.clone() as Arc<dyn SyncMarkStore>,
        suppressor,
    );
    assert!(pull.run_cycle().await.is_err());

    assert_eq!(mark_store.load().await.unwrap(), None);
    assert!(store.capture_enabled());
}

#[tokio::test]
async fn concurrent_cycles_never_overlap_capture_brackets() {
    let store = Arc::new(MemoryStore::new());
    store
        .create_table(&["Id".to_string(), "Name".to_string()])
        .await
        .unwrap();
    seed_row(&store, &[("Id", "1"), ("Name", "A")]).await;
    let sheet = Arc::new(MemorySheet::with_rows(vec![
        vec!["Id", "Name"],
        vec!["1", "A", "2024-03-06 00:00:00"],
    ]));
    let mark_store = Arc::new(MemoryMarkStore::new());
    let suppressor = Arc::new(LoopSuppressor::new());

    let push = PushPropagator::new(
        store.clone() as Arc<dyn RelationalStore>,
        sheet.clone() as Arc<dyn TabularEndpoint>,
        "Sheet1",
        suppressor.clone(),
    );
    let pull = PullPropagator::new(
        store.clone() as Arc<dyn RelationalStore>,
        sheet.clone() as Arc<dyn TabularEndpoint>,
        "Sheet1",
        "C",
        mark_store as Arc<dyn SyncMarkStore>,
        suppressor,
    );

    store
        .update_row(&record(&[("Id", "1"), ("Name", "B")]))
        .await
        .unwrap();

    let (push_result, pull_result) = tokio::join!(
        async {
            for _ in 0..4 {
                push.run_cycle().await?;
            }
            anyhow::Ok(())
        },
        async {
            for _ in 0..4 {
                pull.run_cycle().await?;
            }
            anyhow::Ok(())
        }
    );
    push_result.unwrap();
    pull_result.unwrap();

    assert_eq!(store.overlapping_disables(), 0);
    assert!(store.capture_enabled());
    assert!(store.pending_changes().await.unwrap().is_empty());
}

#[tokio::test]
async fn round_trip_does_not_echo() {
    let store = Arc::new(MemoryStore::new());
    store
        .create_table(&["Id".to_string(), "Name".to_string()])
        .await
        .unwrap();
    let sheet = Arc::new(MemorySheet::with_rows(vec![vec!["Id", "Name"]]));
    let mark_store = Arc::new(MemoryMarkStore::new());
    let suppressor = Arc::new(LoopSuppressor::new());

    let push = PushPropagator::new(
        store.clone() as Arc<dyn RelationalStore>,
        sheet.clone() as Arc<dyn TabularEndpoint>,
        "Sheet1",
        suppressor.clone(),
    );
    let pull = PullPropagator::new(
        store.clone() as Arc<dyn RelationalStore>,
        sheet.clone() as Arc<dyn TabularEndpoint>,
        "Sheet1",
        "C",
        mark_store as Arc<dyn SyncMarkStore>,
        suppressor,
    );

    // An application insert propagates to the sheet...
    store
        .insert_row(&record(&[("Id", "1"), ("Name", "A")]))
        .await
        .unwrap();
    push.run_cycle().await.unwrap();
    assert_eq!(sheet.rows()[1], vec!["1".to_string(), "A".to_string()]);

    // ...and the following pull sees the same row without a timestamp (the
    // replay does not stamp one), so it neither upserts nor deletes it, and
    // no new change-log entries appear.
    pull.run_cycle().await.unwrap();
    assert!(store.pending_changes().await.unwrap().is_empty());
    assert_eq!(store.list_ids().await.unwrap(), vec!["1".to_string()]);

    push.run_cycle().await.unwrap();
    assert_eq!(sheet.rows().len(), 2);
}

#[tokio::test]
async fn empty_sheet_is_a_quiet_noop() {
    let store = Arc::new(MemoryStore::new());
    let sheet = Arc::new(MemorySheet::new());
    let mark_store = Arc::new(MemoryMarkStore::new());
    let suppressor = Arc::new(LoopSuppressor::new());

    let pull = PullPropagator::new(
        store.clone() as Arc<dyn RelationalStore>,
        sheet as Arc<dyn TabularEndpoint>,
        "Sheet1",
        "C",
        mark_store.clone() as Arc<dyn SyncMarkStore>,
        suppressor,
    );
    pull.run_cycle().await.unwrap();

    // Nothing to sync: no table created, no mark written.
    assert!(!store.table_exists().await.unwrap());
    assert_eq!(mark_store.load().await.unwrap(), None);
}

#[tokio::test]
async fn replay_order_survives_insert_update_delete_sequences() {
    let store = Arc::new(MemoryStore::new());
    store
        .create_table(&["Id".to_string(), "Name".to_string()])
        .await
        .unwrap();
    let sheet = Arc::new(MemorySheet::with_rows(vec![vec!["Id", "Name"]]));
    let suppressor = Arc::new(LoopSuppressor::new());

    store
        .insert_row(&record(&[("Id", "1"), ("Name", "A")]))
        .await
        .unwrap();
    store
        .update_row(&record(&[("Id", "1"), ("Name", "A2")]))
        .await
        .unwrap();
    store
        .insert_row(&record(&[("Id", "2"), ("Name", "B")]))
        .await
        .unwrap();

    let ops: Vec<ChangeOp> = store
        .pending_changes()
        .await
        .unwrap()
        .iter()
        .map(|e| e.op)
        .collect();
    assert_eq!(ops, vec![ChangeOp::Insert, ChangeOp::Update, ChangeOp::Insert]);

    let push = PushPropagator::new(
        store.clone() as Arc<dyn RelationalStore>,
        sheet.clone() as Arc<dyn TabularEndpoint>,
        "Sheet1",
        suppressor,
    );
    push.run_cycle().await.unwrap();

    let rows = sheet.rows();
    assert_eq!(rows[1], vec!["1".to_string(), "A2".to_string()]);
    assert_eq!(rows[2], vec!["2".to_string(), "B".to_string()]);
}
