//! Unit tests for streamshift-rdbc types module

use chrono::NaiveDate;
use streamshift_rdbc::types::{Row, Value};

#[test]
fn test_value_sql_types() {
    assert_eq!(Value::Null.sql_type(), "NULL");
    assert_eq!(Value::Int32(1).sql_type(), "INTEGER");
    assert_eq!(Value::Int64(1).sql_type(), "BIGINT");
    assert_eq!(Value::Float64(1.0).sql_type(), "DOUBLE PRECISION");
    assert_eq!(Value::from("x").sql_type(), "TEXT");
}

#[test]
fn test_value_display() {
    let ts = NaiveDate::from_ymd_opt(2023, 11, 14)
        .unwrap()
        .and_hms_opt(22, 13, 20)
        .unwrap();

    assert_eq!(Value::DateTime(ts).to_string(), "2023-11-14 22:13:20");
    assert_eq!(Value::from("a").to_string(), "\"a\"");
    assert_eq!(Value::Null.to_string(), "NULL");
}

#[test]
fn test_value_as_datetime() {
    let ts = NaiveDate::from_ymd_opt(2020, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();

    assert_eq!(Value::DateTime(ts).as_datetime(), Some(ts));
    assert_eq!(Value::DateTimeTz(ts.and_utc()).as_datetime(), Some(ts));
    assert_eq!(Value::Int64(0).as_datetime(), None);
}

#[test]
fn test_row_from_iterator() {
    let row: Row = vec![
        ("id".to_string(), Value::Int32(1)),
        ("username".to_string(), Value::from("testuser")),
    ]
    .into_iter()
    .collect();

    assert_eq!(row.columns(), &["id", "username"]);
    assert_eq!(row.values(), &[Value::Int32(1), Value::from("testuser")]);
    assert!(row.contains("username"));
    assert!(!row.contains("email"));
}

#[test]
fn test_row_iter_pairs() {
    let row = Row::empty().with("a", 1).with("b", Value::Null);
    let pairs: Vec<_> = row.iter().collect();

    assert_eq!(pairs, vec![("a", &Value::Int32(1)), ("b", &Value::Null)]);
}

#[test]
fn test_empty_row() {
    let row = Row::empty();
    assert!(row.is_empty());
    assert_eq!(row.len(), 0);
    assert_eq!(row.get_by_name("id"), None);
}
