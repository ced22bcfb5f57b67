use std::time::Duration;

use pretty_assertions::assert_eq;
use recon_jobs::{api, JobConfig, JobContext, JobKind, JobQueue};
use recon_model::Document;
use recon_store::{Filter, Store};

fn ctx() -> JobContext {
    let store = Store::open_in_memory().expect("open store");
    let config = JobConfig {
        batch_delay: Duration::from_millis(0),
        ..JobConfig::default()
    };
    JobContext::with_config(store, config)
}

#[tokio::test(flavor = "current_thread")]
async fn enqueued_jobs_run_in_the_background_worker() {
    let ctx = ctx();
    api::create_data_source(&ctx, "orders", vec!["order_id".to_string()]).expect("create");
    api::set_selected_fields(
        &ctx,
        "orders",
        vec!["order_id".to_string(), "amount".to_string()],
    )
    .expect("fields");

    let mut row = Document::new();
    row.insert("order_id", "O1");
    row.insert("amount", "10");
    ctx.store
        .collection("orders")
        .expect("raw")
        .insert_one(&row)
        .expect("insert");

    let queue = JobQueue::spawn(ctx.clone());
    queue
        .enqueue(JobKind::Promote {
            collection: Some("orders".to_string()),
        })
        .expect("enqueue");
    // Shutdown drains queued jobs before stopping the worker.
    queue.shutdown().await;

    let processed = ctx.store.collection("orders_processed").expect("processed");
    assert_eq!(processed.count(&Filter::empty()).expect("count"), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn queued_jobs_run_in_submission_order() {
    let ctx = ctx();
    api::create_data_source(&ctx, "orders", vec!["order_id".to_string()]).expect("create");
    api::set_selected_fields(
        &ctx,
        "orders",
        vec!["order_id".to_string(), "amount".to_string()],
    )
    .expect("fields");

    let mut row = Document::new();
    row.insert("order_id", "O1");
    row.insert("amount", "10");
    ctx.store
        .collection("orders")
        .expect("raw")
        .insert_one(&row)
        .expect("insert");

    let mut report = recon_model::FormulaDocument {
        report_name: "recon_queue".to_string(),
        formulas: vec![recon_model::Formula {
            logic_name_key: "TOTAL".to_string(),
            formula_text: "orders.amount".to_string(),
            fields: Vec::new(),
            conditions: Vec::new(),
        }],
        mapping_keys: Default::default(),
        conditions: Default::default(),
        delta_columns: Vec::new(),
        reasons: Vec::new(),
        missing_delta_policy: Default::default(),
    };
    report
        .mapping_keys
        .insert("orders".to_string(), vec!["order_id".to_string()]);
    api::define_report(&ctx, &report).expect("define");

    // Promotion must land before evaluation reads the processed rows.
    let queue = JobQueue::spawn(ctx.clone());
    queue
        .enqueue(JobKind::Promote { collection: None })
        .expect("enqueue promote");
    queue
        .enqueue(JobKind::EvaluateReports { report: None })
        .expect("enqueue evaluate");
    queue.shutdown().await;

    let rows = ctx
        .store
        .collection("recon_queue")
        .expect("report")
        .find_all(&Filter::empty())
        .expect("find");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].1.get("total"),
        Some(&recon_model::Value::Int(10))
    );
}
