//! Test fixtures for warehouse client integration tests
//!
//! Metadata listings shaped like `information_schema.columns`, covering the
//! table layouts most warehouses carry.

#![allow(dead_code)]

use quarry_core::{DimensionType, FieldValue, QueryResult, TableSelector};

pub type ListingRow = (&'static str, &'static str, &'static str, &'static str, &'static str);

/// A users table in `analytics.public`
pub fn users_listing() -> Vec<ListingRow> {
    vec![
        ("analytics", "public", "users", "id", "bigint"),
        ("analytics", "public", "users", "email", "character varying"),
        ("analytics", "public", "users", "created_at", "timestamp with time zone"),
        ("analytics", "public", "users", "signup_date", "date"),
        ("analytics", "public", "users", "is_active", "boolean"),
    ]
}

/// An orders table in `analytics.public`
pub fn orders_listing() -> Vec<ListingRow> {
    vec![
        ("analytics", "public", "orders", "id", "bigint"),
        ("analytics", "public", "orders", "user_id", "bigint"),
        ("analytics", "public", "orders", "total_amount", "numeric(10,2)"),
        ("analytics", "public", "orders", "status", "text"),
    ]
}

/// Tables in other schemas and databases that no selector should pick up
pub fn unrelated_listing() -> Vec<ListingRow> {
    vec![
        ("analytics", "staging", "users", "id", "bigint"),
        ("raw", "public", "users", "id", "bigint"),
        ("analytics", "public", "events", "payload", "jsonb"),
    ]
}

/// Every fixture table in one instance-wide listing
pub fn full_listing() -> Vec<ListingRow> {
    let mut rows = users_listing();
    rows.extend(orders_listing());
    rows.extend(unrelated_listing());
    rows
}

pub fn users_selector() -> TableSelector {
    TableSelector::new("analytics", "public", "users")
}

pub fn orders_selector() -> TableSelector {
    TableSelector::new("analytics", "public", "orders")
}

/// The result a warehouse returns for `SELECT 1`
pub fn select_one() -> QueryResult {
    QueryResult::from_columns(
        vec![("?column?".to_string(), DimensionType::Number)],
        vec![vec![FieldValue::Int(1)]],
    )
}

/// A small result with one column of each dimension type
pub fn mixed_result() -> QueryResult {
    QueryResult::from_columns(
        vec![
            ("id".to_string(), DimensionType::Number),
            ("name".to_string(), DimensionType::String),
            ("active".to_string(), DimensionType::Boolean),
            ("day".to_string(), DimensionType::Date),
            ("seen_at".to_string(), DimensionType::Timestamp),
        ],
        vec![
            vec![
                FieldValue::Int(1),
                FieldValue::from("alice"),
                FieldValue::Bool(true),
                FieldValue::Date(chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
                FieldValue::Null,
            ],
            vec![
                FieldValue::Int(2),
                FieldValue::Null,
                FieldValue::Bool(false),
                FieldValue::Null,
                FieldValue::Null,
            ],
        ],
    )
}
