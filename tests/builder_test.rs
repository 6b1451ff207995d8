//! Integration tests for the statement builder and descriptor-driven plans.

use pgscope::models::{PgType, SchemaDescriptor, SqlValue};
use pgscope::sql::{self, BuilderWarning, TablePlan, TableRef};
use pgscope::sql_values;
use proptest::prelude::*;

fn sensor_readings() -> SchemaDescriptor {
    SchemaDescriptor::builder("telemetry", "sensor_readings")
        .column("ts", PgType::TimestampTz)
        .column("sensor_id", PgType::Integer)
        .column("reading", PgType::DoublePrecision)
        .column("note", PgType::Text)
        .time_index("ts")
        .primary_keys(["sensor_id"])
        .build()
        .unwrap()
}

#[test]
fn test_plan_for_hypertable_with_foreign_key_column() {
    let descriptor = sensor_readings();
    let statements = TablePlan::new(&descriptor)
        .chunk_interval("1 day")
        .statements()
        .unwrap();

    assert_eq!(statements.len(), 4);
    assert_eq!(statements[0], "CREATE SCHEMA IF NOT EXISTS telemetry;");
    assert!(statements[1].starts_with("CREATE TABLE telemetry.sensor_readings ("));
    assert!(statements[1].contains("ts TIMESTAMPTZ NOT NULL"));
    assert!(statements[1].contains("sensor_id INTEGER NOT NULL"));
    assert!(statements[1].contains("note TEXT"));
    assert!(!statements[1].contains("note TEXT NOT NULL"));
    assert!(statements[1].contains("CONSTRAINT pk_sensor_readings PRIMARY KEY (sensor_id)"));
    assert_eq!(
        statements[2],
        "SELECT create_hypertable('telemetry.sensor_readings', 'ts', if_not_exists => TRUE, \
         chunk_time_interval => interval '1 day');"
    );
    assert_eq!(
        statements[3],
        "CREATE INDEX idx_sensor_readings_ts ON telemetry.sensor_readings (ts);"
    );
}

#[test]
fn test_plan_without_time_index_is_plain_table() {
    let descriptor = SchemaDescriptor::builder("app", "users")
        .column("id", PgType::BigSerial)
        .column("email", PgType::varchar(255))
        .primary_keys(["id"])
        .build()
        .unwrap();

    let statements = TablePlan::new(&descriptor).statements().unwrap();
    assert_eq!(statements.len(), 2);
    assert!(TablePlan::new(&descriptor).time_index_name().is_none());
}

#[test]
fn test_plan_rejects_quoted_interval() {
    let descriptor = sensor_readings();
    let err = TablePlan::new(&descriptor)
        .chunk_interval("1 day'); DROP TABLE x; --")
        .statements()
        .unwrap_err();
    assert_eq!(err.field(), Some("interval"));
}

#[test]
fn test_insert_for_and_time_range_select() {
    let descriptor = sensor_readings();

    let insert = sql::insert_for(
        &descriptor,
        sql_values! { "sensor_id" => 7, "reading" => 21.5 },
        Some("ts"),
    )
    .unwrap();
    assert_eq!(
        insert.sql(),
        "INSERT INTO telemetry.sensor_readings (sensor_id, reading) VALUES ($1, $2) RETURNING ts;"
    );
    assert_eq!(insert.params(), &[SqlValue::Int(7), SqlValue::Float(21.5)]);

    let err = sql::insert_for(&descriptor, sql_values! { "humidity" => 0.4 }, None).unwrap_err();
    assert_eq!(err.field(), Some("values"));

    let select = sql::time_range_select(
        &descriptor,
        Some(SqlValue::from("2024-01-01T00:00:00Z")),
        None,
        &[("sensor_id", SqlValue::Int(7))],
        Some(100),
    )
    .unwrap();
    assert!(select.sql().contains("WHERE ts >= $1 AND sensor_id = $2"));
    assert!(select.sql().contains("ORDER BY ts DESC"));
    assert!(select.sql().contains("LIMIT 100"));
    assert_eq!(select.params().len(), 2);
}

#[test]
fn test_unbounded_writes_carry_warnings() {
    let update = sql::update("jobs", sql_values! { "state" => "queued" }, None, None).unwrap();
    assert_eq!(update.warnings(), &[BuilderWarning::UnboundedUpdate]);

    let delete = sql::delete(TableRef::qualified("ops", "jobs"), Some("  "), None).unwrap();
    assert_eq!(delete.sql(), "DELETE FROM ops.jobs;");
    assert_eq!(delete.warnings(), &[BuilderWarning::UnboundedDelete]);

    let bounded = sql::delete("jobs", Some("id = 4"), None).unwrap();
    assert!(!bounded.has_warnings());
}

#[test]
fn test_builder_accepts_descriptor_as_table() {
    let descriptor = sensor_readings();
    let select = sql::select(&descriptor, &["ts", "reading"], None, None, Some(1)).unwrap();
    assert_eq!(
        select.sql(),
        "SELECT ts, reading FROM telemetry.sensor_readings LIMIT 1;"
    );
}

fn identifier() -> impl Strategy<Value = String> {
    "[a-z_][a-z0-9_]{0,15}"
}

/// Each column's value is its own name, so a binding can be traced back.
fn labelled_values(columns: &std::collections::HashSet<String>) -> Vec<(String, SqlValue)> {
    columns
        .iter()
        .map(|c| (c.clone(), SqlValue::from(c.as_str())))
        .collect()
}

/// `$7` -> 7
fn placeholder_index(slot: &str) -> usize {
    slot.trim().trim_start_matches('$').parse().unwrap()
}

proptest! {
    #[test]
    fn prop_insert_binds_each_value_to_its_column(
        columns in prop::collection::hash_set(identifier(), 1..12),
        returning in prop::option::of(identifier()),
    ) {
        let values = labelled_values(&columns);
        let statement = sql::insert("t", values.clone(), returning.as_deref()).unwrap();

        let sql = statement.sql();
        let open = sql.find('(').unwrap();
        let close = sql.find(") VALUES (").unwrap();
        let names: Vec<&str> = sql[open + 1..close].split(", ").collect();
        let slots_start = close + ") VALUES (".len();
        let slots_end = slots_start + sql[slots_start..].find(')').unwrap();
        let slots: Vec<&str> = sql[slots_start..slots_end].split(", ").collect();

        prop_assert_eq!(names.len(), values.len());
        prop_assert_eq!(slots.len(), values.len());
        prop_assert_eq!(statement.params().len(), values.len());
        for (name, slot) in names.iter().zip(&slots) {
            let bound = &statement.params()[placeholder_index(slot) - 1];
            prop_assert_eq!(bound, &SqlValue::from(*name));
        }
        let past_end = format!("${}", values.len() + 1);
        prop_assert!(!sql.contains(&past_end));
    }

    #[test]
    fn prop_update_binds_each_value_to_its_column(
        columns in prop::collection::hash_set(identifier(), 1..12),
        filtered in any::<bool>(),
    ) {
        let values = labelled_values(&columns);
        let filter = filtered.then_some("id = 1");
        let statement = sql::update("t", values.clone(), filter, None).unwrap();

        let sql = statement.sql();
        let set_start = sql.find(" SET ").unwrap() + " SET ".len();
        let set_end = sql.find(" WHERE ").or_else(|| sql.rfind(';')).unwrap();
        let assignments: Vec<&str> = sql[set_start..set_end].split(", ").collect();

        prop_assert_eq!(assignments.len(), values.len());
        prop_assert_eq!(statement.params().len(), values.len());
        for assignment in assignments {
            let (name, slot) = assignment.split_once(" = ").unwrap();
            let bound = &statement.params()[placeholder_index(slot) - 1];
            prop_assert_eq!(bound, &SqlValue::from(name));
        }
        prop_assert_eq!(statement.has_warnings(), !filtered);
    }

    #[test]
    fn prop_insert_many_is_row_major(rows in 1usize..8, cols in 1usize..6) {
        let data: Vec<Vec<(String, SqlValue)>> = (0..rows)
            .map(|r| {
                (0..cols)
                    .map(|c| (format!("c{}", c), SqlValue::Int((r * cols + c) as i64)))
                    .collect()
            })
            .collect();
        let statement = sql::insert_many("t", data, None).unwrap();

        prop_assert_eq!(statement.params().len(), rows * cols);
        for (i, value) in statement.params().iter().enumerate() {
            prop_assert_eq!(value, &SqlValue::Int(i as i64));
        }
    }

    #[test]
    fn prop_qualified_name_joins_parts(schema in identifier(), table in identifier()) {
        let descriptor = SchemaDescriptor::builder(schema.clone(), table.clone())
            .column("id", PgType::Integer)
            .build()
            .unwrap();
        prop_assert_eq!(descriptor.qualified_name(), format!("{}.{}", schema, table));
    }

    #[test]
    fn prop_undeclared_time_index_or_key_is_rejected(name in identifier()) {
        prop_assume!(name != "id");
        let time = SchemaDescriptor::builder("public", "t")
            .column("id", PgType::Integer)
            .time_index(name.clone())
            .build()
            .unwrap_err();
        prop_assert_eq!(time.field(), Some("time_index"));

        let key = SchemaDescriptor::builder("public", "t")
            .column("id", PgType::Integer)
            .primary_keys([name])
            .build()
            .unwrap_err();
        prop_assert_eq!(key.field(), Some("primary_keys"));
    }
}
