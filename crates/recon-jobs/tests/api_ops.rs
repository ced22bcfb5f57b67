use std::io::Write;
use std::time::Duration;

use pretty_assertions::assert_eq;
use recon_jobs::{api, JobConfig, JobContext};
use recon_model::{Formula, FormulaDocument};
use recon_store::{Filter, Store};

fn ctx() -> JobContext {
    let store = Store::open_in_memory().expect("open store");
    let config = JobConfig {
        batch_delay: Duration::from_millis(0),
        ..JobConfig::default()
    };
    JobContext::with_config(store, config)
}

fn spec(name: &str, formulas: Vec<Formula>) -> FormulaDocument {
    FormulaDocument {
        report_name: name.to_string(),
        formulas,
        mapping_keys: Default::default(),
        conditions: Default::default(),
        delta_columns: Vec::new(),
        reasons: Vec::new(),
        missing_delta_policy: Default::default(),
    }
}

fn formula(key: &str, text: &str) -> Formula {
    Formula {
        logic_name_key: key.to_string(),
        formula_text: text.to_string(),
        fields: Vec::new(),
        conditions: Vec::new(),
    }
}

#[test]
fn create_data_source_normalizes_and_conflicts_on_duplicates() {
    let ctx = ctx();
    let result = api::create_data_source(&ctx, "  Orders  ", vec!["order_id".to_string()])
        .expect("create");
    assert_eq!(result.status, 200);
    assert_eq!(result.data["collection_name"], "orders");
    assert_eq!(result.data["processed_collection_name"], "orders_processed");
    assert_eq!(result.data["backup_collection_name"], "orders_backup");

    assert!(ctx.store.collection_exists("orders").expect("exists"));
    assert!(ctx.store.collection_exists("orders_processed").expect("exists"));
    assert!(ctx.store.collection_exists("orders_backup").expect("exists"));

    let envelope =
        api::envelope(api::create_data_source(&ctx, "ORDERS", Vec::new()));
    assert_eq!(envelope.status, 409);
}

#[test]
fn invalid_names_are_rejected_with_400() {
    let ctx = ctx();
    let envelope = api::envelope(api::create_data_source(&ctx, "", Vec::new()));
    assert_eq!(envelope.status, 400);
    let envelope = api::envelope(api::create_data_source(&ctx, "bad name", Vec::new()));
    assert_eq!(envelope.status, 400);
}

#[test]
fn selected_fields_require_an_existing_data_source() {
    let ctx = ctx();
    let envelope = api::envelope(api::set_selected_fields(
        &ctx,
        "ghost",
        vec!["a".to_string()],
    ));
    assert_eq!(envelope.status, 404);

    api::create_data_source(&ctx, "orders", Vec::new()).expect("create");
    let envelope = api::envelope(api::set_selected_fields(&ctx, "orders", Vec::new()));
    assert_eq!(envelope.status, 400);

    let result = api::set_selected_fields(&ctx, "orders", vec!["a".to_string()])
        .expect("set fields");
    assert_eq!(result.status, 200);

    // Saving again replaces the mapping instead of duplicating it.
    api::set_selected_fields(&ctx, "orders", vec!["a".to_string(), "b".to_string()])
        .expect("replace");
    let mappings = recon_jobs::registry::list_field_mappings(&ctx.store).expect("list");
    assert_eq!(mappings.len(), 1);
    assert_eq!(mappings[0].selected_fields, vec!["a", "b"]);
}

#[test]
fn report_validation_rejects_empty_names_and_texts() {
    let ctx = ctx();
    let envelope = api::envelope(api::define_report(&ctx, &spec("", Vec::new())));
    assert_eq!(envelope.status, 400);

    let bad = spec("recon", vec![formula("", "1 + 1")]);
    assert_eq!(api::envelope(api::define_report(&ctx, &bad)).status, 400);

    let bad = spec("recon", vec![formula("TOTAL", "  ")]);
    assert_eq!(api::envelope(api::define_report(&ctx, &bad)).status, 400);
}

#[test]
fn report_crud_round_trips() {
    let ctx = ctx();
    let report = spec("recon", vec![formula("TOTAL", "orders.amt")]);

    let result = api::define_report(&ctx, &report).expect("define");
    assert_eq!(result.status, 200);
    assert_eq!(result.data["collection_existed"], false);

    let result = api::define_report(&ctx, &report).expect("redefine");
    assert_eq!(result.data["collection_existed"], true);

    let fetched = api::get_report(&ctx, "recon").expect("get");
    assert_eq!(fetched.data["report_name"], "recon");
    assert_eq!(fetched.data["formulas"][0]["logicNameKey"], "TOTAL");

    let listed = api::list_reports(&ctx).expect("list");
    assert_eq!(listed.data["count"], 1);

    let mut updated = report.clone();
    updated.formulas.push(formula("DOUBLE_TOTAL", "TOTAL * 2"));
    api::update_report(&ctx, &updated).expect("update");
    let fetched = api::get_report(&ctx, "recon").expect("get");
    assert_eq!(fetched.data["formulas"].as_array().map(Vec::len), Some(2));

    api::delete_report(&ctx, "recon").expect("delete");
    assert_eq!(api::envelope(api::get_report(&ctx, "recon")).status, 404);
    assert_eq!(
        api::envelope(api::update_report(&ctx, &updated)).status,
        404
    );
    assert_eq!(api::envelope(api::delete_report(&ctx, "recon")).status, 404);
}

#[tokio::test(flavor = "current_thread")]
async fn unknown_names_surface_as_404() {
    let ctx = ctx();
    assert_eq!(
        api::envelope(api::promote_collections(&ctx, Some("ghost")).await).status,
        404
    );
    assert_eq!(
        api::envelope(api::evaluate_report(&ctx, Some("ghost")).await).status,
        404
    );
    assert_eq!(
        api::envelope(api::ingest_file(&ctx, "ghost", std::path::Path::new("no.csv"))).status,
        404
    );
}

#[tokio::test(flavor = "current_thread")]
async fn the_full_pipeline_runs_end_to_end() {
    let ctx = ctx();
    api::create_data_source(&ctx, "orders", vec!["order_id".to_string()]).expect("create");
    api::set_selected_fields(
        &ctx,
        "orders",
        vec!["order_id".to_string(), "amount".to_string()],
    )
    .expect("fields");

    let mut file = tempfile::NamedTempFile::new().expect("tmpfile");
    writeln!(file, "Order ID,Amount").expect("write");
    writeln!(file, "O1,100").expect("write");
    writeln!(file, "O2,40").expect("write");
    file.flush().expect("flush");

    let result = api::ingest_file(&ctx, "orders", file.path()).expect("ingest");
    assert_eq!(result.status, 200);
    assert_eq!(result.data["rows_inserted"], 2);

    let result = api::promote_collections(&ctx, Some("orders")).await.expect("promote");
    assert_eq!(result.data["total_documents_processed"], 2);

    let report = spec("recon_e2e", vec![formula("TOTAL", "orders.amount")]);
    let mut report = report;
    report
        .mapping_keys
        .insert("orders".to_string(), vec!["order_id".to_string()]);
    api::define_report(&ctx, &report).expect("define");

    let result = api::evaluate_report(&ctx, Some("recon_e2e")).await.expect("evaluate");
    assert_eq!(result.data["total_documents_processed"], 2);

    let rows = ctx
        .store
        .collection("recon_e2e")
        .expect("report")
        .find_all(&Filter::empty())
        .expect("find");
    assert_eq!(rows.len(), 2);

    let uploads = api::list_uploads(&ctx, Some("orders")).expect("uploads");
    assert_eq!(uploads.data["count"], 1);
    assert_eq!(uploads.data["uploads"][0]["status"], "processed");

    let sources = api::list_data_sources(&ctx).expect("sources");
    assert_eq!(sources.data["count"], 1);
}
