//! Checkpoint tracking lifecycle under a paused tokio clock

#[path = "test_utils.rs"]
mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use signalmeter::core::clock::Clock;
use signalmeter::db::{CellValue, RowStore};
use signalmeter::jobs::{
    AbandonReason, CheckpointResult, CheckpointTask, StopReason, TaskState, Tracker,
};
use signalmeter::metrics::Metrics;
use signalmeter::models::{CheckpointLabel, CheckpointPlan, Signal};
use signalmeter::services::market_data::OracleError;
use signalmeter::signals::SignalLedger;
use tokio::sync::watch;

use test_utils::{job_context, paused_clock, signals_store, FlakyStore, ScriptedOracle};

async fn accept(
    store: Arc<dyn RowStore>,
    clock: &dyn Clock,
    ticker: &str,
    price: &str,
    side: &str,
) -> Signal {
    let ledger = SignalLedger::new(store, Duration::from_secs(60));
    ledger
        .submit(ticker, price, side, clock.now())
        .await
        .expect("signal accepted")
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}

#[tokio::test(start_paused = true)]
async fn applies_every_checkpoint_in_due_order() {
    let clock = paused_clock();
    let store = signals_store();
    let signal = accept(store.clone(), clock.as_ref(), "BINANCE:BTCUSDT", "100", "buy").await;
    let oracle = Arc::new(ScriptedOracle::new(110.0, clock.clone()));
    let ctx = Arc::new(job_context(oracle.clone(), store.clone(), clock.clone()));
    let (_stop, rx) = watch::channel(false);

    let report = CheckpointTask::new(signal.clone(), ctx, rx).run().await;

    assert_eq!(report.state, TaskState::Completed);
    assert_eq!(report.stop, None);
    assert_eq!(report.applied_count(), 4);
    assert_eq!(oracle.call_count(), 4);

    let plan = CheckpointPlan::new(signal.entry_time);
    let mut previous = None;
    for (label, result) in &report.results {
        let applied_at = result.applied_at().expect("applied");
        assert!(applied_at >= plan.due_at(*label), "{label} applied early");
        if let Some(prev) = previous {
            assert!(applied_at >= prev, "{label} applied out of order");
        }
        previous = Some(applied_at);
    }

    let row = store.row(signal.row_id).expect("row present");
    for label in CheckpointLabel::ALL {
        assert_eq!(row.get(&label.price_column()), Some(&CellValue::Number(110.0)));
        let pct = row.get(&label.pct_column()).and_then(|c| c.as_f64()).unwrap();
        assert_close(pct, 0.10);
        assert!(row
            .get(&label.applied_column())
            .and_then(|c| c.as_timestamp())
            .is_some());
    }
    assert_eq!(row.get("status"), Some(&CellValue::from("completed")));
}

#[tokio::test(start_paused = true)]
async fn sell_signals_gain_when_price_falls() {
    let clock = paused_clock();
    let store = signals_store();
    let signal = accept(store.clone(), clock.as_ref(), "ETHUSDT", "200", "sell").await;
    let oracle = Arc::new(ScriptedOracle::new(180.0, clock.clone()));
    let ctx = Arc::new(job_context(oracle, store.clone(), clock.clone()));
    let (_stop, rx) = watch::channel(false);

    let report = CheckpointTask::new(signal, ctx, rx).run().await;

    match report.result(CheckpointLabel::M15) {
        Some(CheckpointResult::Applied { pct_change, .. }) => assert_close(*pct_change, 0.10),
        other => panic!("unexpected 15m result: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn rerunning_a_finished_task_writes_nothing_twice() {
    let clock = paused_clock();
    let store = signals_store();
    let signal = accept(store.clone(), clock.as_ref(), "SOLUSDT", "50", "buy").await;
    let oracle = Arc::new(ScriptedOracle::new(55.0, clock.clone()));
    let ctx = Arc::new(job_context(oracle.clone(), store.clone(), clock.clone()));
    let (_stop, rx) = watch::channel(false);

    let first = CheckpointTask::new(signal.clone(), ctx.clone(), rx.clone())
        .run()
        .await;
    assert_eq!(first.applied_count(), 4);

    let second = CheckpointTask::new(signal.clone(), ctx, rx).run().await;
    assert!(second
        .results
        .iter()
        .all(|(_, r)| *r == CheckpointResult::AlreadyApplied));
    assert_eq!(oracle.call_count(), 4);

    for label in CheckpointLabel::ALL {
        assert_eq!(store.write_count(signal.row_id, &label.price_column()), 1);
        assert_eq!(store.write_count(signal.row_id, &label.pct_column()), 1);
        assert_eq!(store.write_count(signal.row_id, &label.applied_column()), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn stored_price_without_applied_mark_is_reconciled_without_fetching() {
    let clock = paused_clock();
    let store = signals_store();
    let signal = accept(store.clone(), clock.as_ref(), "BTCUSDT", "100", "buy").await;
    store
        .write_cell(signal.row_id, "price_15m", CellValue::from(95.0))
        .await
        .unwrap();
    let oracle = Arc::new(ScriptedOracle::new(120.0, clock.clone()));
    let ctx = Arc::new(job_context(oracle.clone(), store.clone(), clock.clone()));
    let (_stop, rx) = watch::channel(false);

    let report = CheckpointTask::new(signal.clone(), ctx, rx).run().await;

    match report.result(CheckpointLabel::M15) {
        Some(CheckpointResult::Reconciled { price, pct_change, .. }) => {
            assert_close(*price, 95.0);
            assert_close(*pct_change, -0.05);
        }
        other => panic!("unexpected 15m result: {other:?}"),
    }
    assert_eq!(oracle.call_count(), 3);
    assert_eq!(store.write_count(signal.row_id, "price_15m"), 1);
}

#[tokio::test(start_paused = true)]
async fn deleting_the_row_between_second_and_third_checkpoint_abandons() {
    let clock = paused_clock();
    let store = signals_store();
    let signal = accept(store.clone(), clock.as_ref(), "BTCUSDT", "100", "buy").await;
    let oracle = Arc::new(ScriptedOracle::new(101.0, clock.clone()));
    let ctx = Arc::new(job_context(oracle.clone(), store.clone(), clock.clone()));
    let (_stop, rx) = watch::channel(false);

    let deleter = store.clone();
    let row = signal.row_id;
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2 * 3600)).await;
        assert!(deleter.delete_row(row));
    });

    let report = CheckpointTask::new(signal, ctx, rx).run().await;

    assert_eq!(report.state, TaskState::Abandoned);
    assert_eq!(report.stop, Some(StopReason::RowMissing(CheckpointLabel::H4)));
    assert_eq!(report.results.len(), 2);
    assert_eq!(report.applied_count(), 2);
    assert_eq!(oracle.call_count(), 2);
    // the deletion is noticed by a liveness check, well before 4h
    assert!(clock.now() < clock_start_plus(3 * 3600));
}

fn clock_start_plus(secs: i64) -> chrono::DateTime<chrono::Utc> {
    test_utils::wall_start() + chrono::Duration::seconds(secs)
}

#[tokio::test(start_paused = true)]
async fn exhausted_oracle_abandons_one_checkpoint_and_the_next_runs_on_time() {
    let clock = paused_clock();
    let store = signals_store();
    let signal = accept(store.clone(), clock.as_ref(), "BTCUSDT", "100", "buy").await;
    // one try plus two retries, all failing
    let oracle = Arc::new(ScriptedOracle::new(104.0, clock.clone()).failing_times(3));
    let ctx = Arc::new(job_context(oracle.clone(), store.clone(), clock.clone()));
    let (_stop, rx) = watch::channel(false);

    let report = CheckpointTask::new(signal.clone(), ctx, rx).run().await;

    assert!(matches!(
        report.result(CheckpointLabel::M15),
        Some(CheckpointResult::Abandoned(AbandonReason::OracleExhausted(_)))
    ));
    for label in [CheckpointLabel::H1, CheckpointLabel::H4, CheckpointLabel::D1] {
        assert!(report.result(label).unwrap().is_applied(), "{label} not applied");
    }

    let calls = oracle.call_times();
    assert_eq!(calls.len(), 6);
    let due_1h = CheckpointPlan::new(signal.entry_time).due_at(CheckpointLabel::H1);
    assert!(calls[3] >= due_1h);
    assert!(calls[3] - due_1h < chrono::Duration::seconds(1));

    let row = store.row(signal.row_id).unwrap();
    assert_eq!(row.get("price_15m"), None);
    assert_eq!(row.get("status"), Some(&CellValue::from("abandoned")));
}

#[tokio::test(start_paused = true)]
async fn unknown_symbol_is_not_retried() {
    let clock = paused_clock();
    let store = signals_store();
    let signal = accept(store.clone(), clock.as_ref(), "NOPEUSDT", "1", "buy").await;
    let oracle = Arc::new(
        ScriptedOracle::new(1.0, clock.clone()).then(Err(OracleError::NotFound("NOPEUSDT".into()))),
    );
    let ctx = Arc::new(job_context(oracle.clone(), store.clone(), clock.clone()));
    let (_stop, rx) = watch::channel(false);

    let report = CheckpointTask::new(signal, ctx, rx).run().await;

    assert!(matches!(
        report.result(CheckpointLabel::M15),
        Some(CheckpointResult::Abandoned(AbandonReason::SymbolNotFound(_)))
    ));
    assert_eq!(oracle.call_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn a_failed_write_is_retried_once_then_the_checkpoint_is_abandoned() {
    let clock = paused_clock();
    let memory = signals_store();
    let store = Arc::new(FlakyStore::new(memory.clone()));
    let signal = accept(store.clone(), clock.as_ref(), "BTCUSDT", "100", "buy").await;
    store.fail_next_writes(2);
    let oracle = Arc::new(ScriptedOracle::new(100.0, clock.clone()));
    let ctx = Arc::new(job_context(oracle.clone(), store.clone(), clock.clone()));
    let (_stop, rx) = watch::channel(false);

    let report = CheckpointTask::new(signal.clone(), ctx, rx).run().await;

    assert!(matches!(
        report.result(CheckpointLabel::M15),
        Some(CheckpointResult::Abandoned(AbandonReason::StoreFailure(_)))
    ));
    assert!(report.result(CheckpointLabel::H1).unwrap().is_applied());
    assert_eq!(memory.write_count(signal.row_id, "price_15m"), 0);
}

#[tokio::test(start_paused = true)]
async fn half_written_checkpoint_is_completed_before_the_next_one() {
    let clock = paused_clock();
    let memory = signals_store();
    let store = Arc::new(FlakyStore::new(memory.clone()));
    let signal = accept(store.clone(), clock.as_ref(), "BTCUSDT", "100", "buy").await;
    // the price lands, both attempts at the pct cell fail
    store.fail_column_writes("pct_15m", 2);
    let oracle = Arc::new(ScriptedOracle::new(110.0, clock.clone()));
    let ctx = Arc::new(job_context(oracle.clone(), store.clone(), clock.clone()));
    let (_stop, rx) = watch::channel(false);

    let report = CheckpointTask::new(signal.clone(), ctx, rx).run().await;

    match report.result(CheckpointLabel::M15) {
        Some(CheckpointResult::Reconciled { price, pct_change, applied_at }) => {
            assert_close(*price, 110.0);
            assert_close(*pct_change, 0.10);
            let due_1h = CheckpointPlan::new(signal.entry_time).due_at(CheckpointLabel::H1);
            assert!(*applied_at >= due_1h, "reconciled at the next checkpoint");
        }
        other => panic!("unexpected 15m result: {other:?}"),
    }
    assert_eq!(report.applied_count(), 4);
    assert_eq!(oracle.call_count(), 4);

    let row = memory.row(signal.row_id).unwrap();
    assert_eq!(row.get("price_15m"), Some(&CellValue::Number(110.0)));
    assert_close(row.get("pct_15m").and_then(|c| c.as_f64()).unwrap(), 0.10);
    assert!(row.get("applied_15m").and_then(|c| c.as_timestamp()).is_some());
    assert_eq!(memory.write_count(signal.row_id, "price_15m"), 1);
    assert_eq!(row.get("status"), Some(&CellValue::from("completed")));
}

#[tokio::test(start_paused = true)]
async fn half_written_last_checkpoint_is_completed_before_finishing() {
    let clock = paused_clock();
    let memory = signals_store();
    let store = Arc::new(FlakyStore::new(memory.clone()));
    let signal = accept(store.clone(), clock.as_ref(), "ETHUSDT", "200", "sell").await;
    // one failure on the applied mark, then one more on the retry
    store.fail_column_writes("applied_1d", 2);
    let oracle = Arc::new(ScriptedOracle::new(190.0, clock.clone()));
    let ctx = Arc::new(job_context(oracle, store.clone(), clock.clone()));
    let (_stop, rx) = watch::channel(false);

    let report = CheckpointTask::new(signal.clone(), ctx, rx).run().await;

    assert!(matches!(
        report.result(CheckpointLabel::D1),
        Some(CheckpointResult::Reconciled { .. })
    ));
    let row = memory.row(signal.row_id).unwrap();
    assert!(row.get("applied_1d").and_then(|c| c.as_timestamp()).is_some());
    assert_eq!(row.get("status"), Some(&CellValue::from("completed")));
}

#[tokio::test(start_paused = true)]
async fn a_single_failed_write_recovers_on_retry() {
    let clock = paused_clock();
    let memory = signals_store();
    let store = Arc::new(FlakyStore::new(memory.clone()));
    let signal = accept(store.clone(), clock.as_ref(), "BTCUSDT", "100", "buy").await;
    store.fail_next_writes(1);
    let oracle = Arc::new(ScriptedOracle::new(100.0, clock.clone()));
    let ctx = Arc::new(job_context(oracle, store.clone(), clock.clone()));
    let (_stop, rx) = watch::channel(false);

    let report = CheckpointTask::new(signal, ctx, rx).run().await;

    assert_eq!(report.applied_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn tracker_keys_tasks_by_signal_id() {
    let clock = paused_clock();
    let store = signals_store();
    let oracle = Arc::new(ScriptedOracle::new(100.0, clock.clone()));
    let metrics = Arc::new(Metrics::new().expect("metrics initialization"));
    let ctx = job_context(oracle, store.clone(), clock.clone()).with_metrics(metrics.clone());
    let tracker = Tracker::new(Arc::new(ctx));
    let mut reports = tracker.subscribe();

    let ledger = SignalLedger::new(store.clone(), Duration::from_secs(60));
    let a = ledger.submit("BTCUSDT", "100", "buy", clock.now()).await.unwrap();
    let b = ledger.submit("BTCUSDT", "101", "buy", clock.now()).await.unwrap();

    assert!(tracker.track(a.clone()));
    assert!(tracker.track(b.clone()));
    assert!(!tracker.track(a.clone()), "second track of a live id is a no-op");
    assert_eq!(tracker.active(), 2);
    assert_eq!(metrics.tracking_tasks_active.get(), 2);

    let mut finished = Vec::new();
    for _ in 0..2 {
        let report = reports.recv().await.expect("report");
        assert_eq!(report.state, TaskState::Completed);
        finished.push(report.signal_id);
    }
    finished.sort();
    let mut expected = vec![a.id.clone(), b.id.clone()];
    expected.sort();
    assert_eq!(finished, expected);

    while tracker.active() > 0 {
        tokio::task::yield_now().await;
    }
    assert!(!tracker.is_tracking(&a.id));
    assert_eq!(metrics.tracking_tasks_active.get(), 0);
    assert_eq!(
        metrics
            .checkpoints_applied_total
            .with_label_values(&["1d"])
            .get(),
        2
    );
}

#[tokio::test(start_paused = true)]
async fn cancel_stops_a_task_and_frees_its_slot() {
    let clock = paused_clock();
    let store = signals_store();
    let oracle = Arc::new(ScriptedOracle::new(100.0, clock.clone()));
    let tracker = Tracker::new(Arc::new(job_context(oracle.clone(), store.clone(), clock.clone())));
    let signal = accept(store.clone(), clock.as_ref(), "BTCUSDT", "100", "buy").await;

    assert!(tracker.track(signal.clone()));
    assert!(tracker.cancel(&signal.id));
    assert!(!tracker.cancel(&signal.id));
    assert_eq!(tracker.active(), 0);

    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(oracle.call_count(), 0);
    assert!(tracker.track(signal), "a cancelled id can be tracked again");
}

#[tokio::test(start_paused = true)]
async fn shutdown_wakes_waiting_tasks() {
    let clock = paused_clock();
    let store = signals_store();
    let oracle = Arc::new(ScriptedOracle::new(100.0, clock.clone()));
    let tracker = Tracker::new(Arc::new(job_context(oracle.clone(), store.clone(), clock.clone())));
    let mut reports = tracker.subscribe();
    let signal = accept(store.clone(), clock.as_ref(), "BTCUSDT", "100", "buy").await;

    assert!(tracker.track(signal.clone()));
    let aborted = tracker.shutdown(Duration::from_secs(5)).await;
    assert_eq!(aborted, 0);

    let report = reports.recv().await.expect("report");
    assert_eq!(report.state, TaskState::Abandoned);
    assert_eq!(report.stop, Some(StopReason::Shutdown(CheckpointLabel::M15)));
    assert_eq!(oracle.call_count(), 0);
    assert!(!tracker.track(signal), "no new tasks after shutdown");
}
