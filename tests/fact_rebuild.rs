use anyhow::Result;
use marketplace_warehouse::config::Layout;
use marketplace_warehouse::entities::SALES_TRAFFIC_CHILD_ASIN_DAILY;
use marketplace_warehouse::pipeline::FactRebuilder;
use marketplace_warehouse::storage::{Store, TableRef};
use marketplace_warehouse::table::{Cell, Table, Value};
use marketplace_warehouse::PipelineError;

fn rebuilder(layout: &Layout) -> FactRebuilder {
    FactRebuilder::new(
        layout.sales_traffic_staging(),
        layout.sales_traffic_fact(),
        SALES_TRAFFIC_CHILD_ASIN_DAILY,
    )
}

fn seed_staging(store: &mut Store, staging: &TableRef, columns: &[&str], rows: Vec<Vec<Cell>>) {
    store.ensure_namespace(&staging.schema).unwrap();
    let mut t = Table::new(columns.iter().map(|c| c.to_string()).collect());
    for r in rows {
        t.push_row(r);
    }
    store.append(staging, &t).unwrap();
}

fn text(v: &str) -> Cell {
    Some(Value::text(v))
}

fn int(v: i64) -> Cell {
    Some(Value::Integer(v))
}

#[test]
fn test_latest_load_wins_and_measures_are_derived() -> Result<()> {
    let layout = Layout::default();
    let mut store = Store::open_in_memory()?;
    let staging = layout.sales_traffic_staging();
    let columns = [
        "date",
        "asin",
        "sessions_total",
        "units_ordered",
        "ordered_product_sales_usd",
        "load_id",
        "load_ts",
    ];
    // The newer generation is inserted first; recency must come from load_ts.
    seed_staging(
        &mut store,
        &staging,
        &columns,
        vec![
            vec![
                text("2024-01-01"),
                text("B001"),
                int(20),
                int(5),
                Some(Value::Real(100.0)),
                text("L2"),
                text("2024-01-05T00:00:00.000000Z"),
            ],
            vec![
                text("2024-01-01"),
                text("B001"),
                int(10),
                int(1),
                Some(Value::Real(10.0)),
                text("L1"),
                text("2024-01-04T00:00:00.000000Z"),
            ],
            vec![
                text("2024-01-02"),
                text("B001"),
                int(0),
                int(0),
                Some(Value::Real(0.0)),
                text("L2"),
                text("2024-01-05T00:00:00.000000Z"),
            ],
        ],
    );

    let report = rebuilder(&layout).run(&mut store)?;
    assert_eq!(report.rows_read, 3);
    assert_eq!(report.duplicates_removed, 1);
    assert_eq!(report.rows_written, 2);
    assert_eq!(report.date_min.as_deref(), Some("2024-01-01"));
    assert_eq!(report.date_max.as_deref(), Some("2024-01-02"));
    assert_eq!(
        report.derived_measures,
        vec!["revenue_per_session_usd", "conversion_rate_pct_calc"]
    );

    let (sessions, revenue, conversion, load_id): (i64, Option<f64>, Option<f64>, String) =
        store.connection().query_row(
            &format!(
                "SELECT sessions_total, revenue_per_session_usd, conversion_rate_pct_calc, load_id \
                 FROM {} WHERE date = '2024-01-01' AND child_asin = 'B001'",
                layout.sales_traffic_fact().qualified()
            ),
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )?;
    assert_eq!(sessions, 20);
    assert_eq!(revenue, Some(5.0));
    assert_eq!(conversion, Some(25.0));
    assert_eq!(load_id, "L2");

    let zero_day: (Option<f64>, Option<f64>) = store.connection().query_row(
        &format!(
            "SELECT revenue_per_session_usd, conversion_rate_pct_calc FROM {} WHERE date = '2024-01-02'",
            layout.sales_traffic_fact().qualified()
        ),
        [],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    assert_eq!(zero_day, (None, None));
    Ok(())
}

#[test]
fn test_rebuild_replaces_previous_fact() -> Result<()> {
    let layout = Layout::default();
    let mut store = Store::open_in_memory()?;
    let staging = layout.sales_traffic_staging();
    seed_staging(
        &mut store,
        &staging,
        &["date", "child_asin", "units_ordered"],
        vec![vec![text("2024-02-01"), text("B001"), int(3)]],
    );
    rebuilder(&layout).run(&mut store)?;

    seed_staging(
        &mut store,
        &staging,
        &["date", "child_asin", "units_ordered"],
        vec![vec![text("2024-02-02"), text("B002"), int(4)]],
    );
    let report = rebuilder(&layout).run(&mut store)?;
    assert_eq!(report.rows_written, 2);
    assert!(report.derived_measures.is_empty());

    let fact = store.read_table(&layout.sales_traffic_fact())?;
    assert_eq!(fact.len(), 2);
    assert_eq!(fact.columns(), ["date", "child_asin", "units_ordered"]);
    Ok(())
}

#[test]
fn test_empty_or_missing_staging_is_not_found() -> Result<()> {
    let layout = Layout::default();
    let mut store = Store::open_in_memory()?;
    let err = rebuilder(&layout).run(&mut store).unwrap_err();
    assert!(matches!(err, PipelineError::NotFound(_)));

    seed_staging(
        &mut store,
        &layout.sales_traffic_staging(),
        &["date", "child_asin"],
        vec![],
    );
    let err = rebuilder(&layout).run(&mut store).unwrap_err();
    assert!(matches!(err, PipelineError::NotFound(_)));
    Ok(())
}

#[test]
fn test_missing_date_fails_without_writing_fact() -> Result<()> {
    let layout = Layout::default();
    let mut store = Store::open_in_memory()?;
    seed_staging(
        &mut store,
        &layout.sales_traffic_staging(),
        &["child_asin", "sessions_total"],
        vec![vec![text("B001"), int(1)]],
    );
    let err = rebuilder(&layout).run(&mut store).unwrap_err();
    assert!(err.is_schema_error());
    assert!(!store.table_exists(&layout.sales_traffic_fact())?);
    Ok(())
}
