//! SqlJson: parsing, rendering, wire form and logical equivalence.

use modelforge::session::ModelDraft;
use modelforge::sql::{
    ensure_read_only, ColumnRef, FilterOp, JoinType, SqlError, SqlJson,
};
use serde_json::json;

const QUERIES: &[&str] = &[
    "SELECT id FROM orders",
    "SELECT * FROM orders LIMIT 5",
    "SELECT id FROM orders ORDER BY id LIMIT 3 OFFSET 2",
    "SELECT o.* FROM orders AS o",
    "SELECT o.id, c.name AS customer FROM orders AS o \
     JOIN customers AS c ON o.customer_id = c.id",
    "SELECT o.id FROM sales.orders AS o \
     LEFT JOIN crm.accounts AS a ON a.customer_id = o.customer_id AND a.region = o.region \
     WHERE o.status = 'shipped' AND a.tier IS NOT NULL ORDER BY o.id DESC, a.tier",
    "SELECT \"order\".id FROM \"order\" WHERE total >= 9.5 AND note LIKE 'O''Brien%'",
    "SELECT id FROM t WHERE delta < -3 AND flag = TRUE AND gone IS NULL",
    "SELECT a.x, b.y FROM a FULL OUTER JOIN b ON a.k = b.k RIGHT JOIN c ON c.k = b.k",
];

#[test]
fn test_render_then_parse_round_trips() {
    for sql in QUERIES {
        let parsed = SqlJson::parse(sql).unwrap_or_else(|e| panic!("{}: {}", sql, e));
        let rendered = parsed.to_sql();
        let reparsed = SqlJson::parse(&rendered)
            .unwrap_or_else(|e| panic!("{} rendered as {}: {}", sql, rendered, e));

        assert!(parsed.logically_equivalent(&reparsed), "{}", rendered);
        assert_eq!(parsed, reparsed, "{}", rendered);
        assert_eq!(reparsed.to_sql(), rendered);
    }
}

#[test]
fn test_wire_form_round_trips() {
    for sql in QUERIES {
        let parsed = SqlJson::parse(sql).unwrap();
        let wire = serde_json::to_string(&parsed).unwrap();
        let back: SqlJson = serde_json::from_str(&wire).unwrap();
        assert_eq!(back, parsed, "{}", wire);
    }
}

#[test]
fn test_client_authored_json() {
    let query: SqlJson = serde_json::from_value(json!({
        "select": [
            {"table": "o", "column": "id"},
            {"table": "c", "column": "name", "alias": "customer"}
        ],
        "from": {"name": "orders", "alias": "o"},
        "joins": [{
            "joinType": "left",
            "table": {"name": "customers", "alias": "c"},
            "on": [{"left": {"table": "o", "column": "customer_id"}, "right": {"table": "c", "column": "id"}}]
        }],
        "filters": [{"column": {"table": "o", "column": "status"}, "op": "=", "value": "open"}],
        "orderBy": [{"column": {"table": "o", "column": "id"}, "descending": true}],
        "limit": 10
    }))
    .unwrap();

    assert_eq!(
        query.to_sql(),
        "SELECT o.id, c.name AS customer FROM orders AS o \
         LEFT JOIN customers AS c ON o.customer_id = c.id \
         WHERE o.status = 'open' ORDER BY o.id DESC LIMIT 10"
    );
}

#[test]
fn test_parse_structure() {
    let query = SqlJson::parse(
        "SELECT o.id FROM orders o INNER JOIN customers c ON c.id = o.customer_id \
         WHERE 10 < o.total AND c.name LIKE 'A%'",
    )
    .unwrap();

    assert_eq!(query.from.reference(), "o");
    assert_eq!(query.joins[0].join_type, JoinType::Inner);
    assert_eq!(query.joins[0].on[0].left, ColumnRef::new("c", "id"));

    assert_eq!(query.filters[0].column, ColumnRef::new("o", "total"));
    assert_eq!(query.filters[0].op, FilterOp::Gt);
    assert_eq!(query.filters[0].value, json!(10));
    assert_eq!(query.filters[1].op, FilterOp::Like);
}

#[test]
fn test_aliases_do_not_affect_equivalence() {
    let aliased = SqlJson::parse(
        "SELECT o.id, c.name FROM orders AS o JOIN customers AS c ON o.customer_id = c.id",
    )
    .unwrap();
    let plain = SqlJson::parse(
        "SELECT customers.name, orders.id FROM orders \
         JOIN customers ON customers.id = orders.customer_id",
    )
    .unwrap();
    assert!(aliased.logically_equivalent(&plain));

    let other_column = SqlJson::parse(
        "SELECT o.id, c.email FROM orders AS o JOIN customers AS c ON o.customer_id = c.id",
    )
    .unwrap();
    assert!(!aliased.logically_equivalent(&other_column));

    let left_join = SqlJson::parse(
        "SELECT o.id, c.name FROM orders AS o LEFT JOIN customers AS c ON o.customer_id = c.id",
    )
    .unwrap();
    assert!(!aliased.logically_equivalent(&left_join));
}

#[test]
fn test_outside_the_structural_subset() {
    for sql in [
        "SELECT status, COUNT(*) FROM orders GROUP BY status",
        "SELECT DISTINCT status FROM orders",
        "WITH x AS (SELECT 1) SELECT * FROM x",
        "SELECT id FROM a UNION SELECT id FROM b",
        "SELECT id FROM a, b",
        "SELECT UPPER(name) FROM customers",
        "SELECT id FROM orders WHERE a = 1 OR b = 2",
        "SELECT id FROM orders JOIN customers USING (id)",
    ] {
        assert!(
            matches!(SqlJson::parse(sql), Err(SqlError::Unsupported(_))),
            "{}",
            sql
        );
    }
    assert!(matches!(
        SqlJson::parse("SELEC id FROM"),
        Err(SqlError::Syntax(_))
    ));
}

#[test]
fn test_read_only_guard() {
    ensure_read_only("SELECT * FROM orders", None).unwrap();
    ensure_read_only("WITH r AS (SELECT 1) SELECT * FROM r", None).unwrap();

    for sql in [
        "DELETE FROM orders",
        "CREATE TABLE x (id INT)",
        "SELECT 1; SELECT 2",
        "SELECT * INTO backup FROM orders",
    ] {
        assert!(
            matches!(ensure_read_only(sql, None), Err(SqlError::NotReadOnly(_))),
            "{}",
            sql
        );
    }
}

#[test]
fn test_draft_normalization() {
    let from_text = ModelDraft {
        sql_text: "SELECT id, status FROM orders".into(),
        ..ModelDraft::default()
    }
    .normalized()
    .unwrap();
    assert_eq!(
        from_text.sql_json.as_ref().map(|q| q.select.len()),
        Some(2)
    );

    let from_json = ModelDraft {
        sql_json: from_text.sql_json.clone(),
        ..ModelDraft::default()
    }
    .normalized()
    .unwrap();
    assert_eq!(from_json.sql_text, "SELECT id, status FROM orders");

    let text_only = ModelDraft {
        sql_text: "SELECT status, COUNT(*) FROM orders GROUP BY status".into(),
        ..ModelDraft::default()
    }
    .normalized()
    .unwrap();
    assert!(text_only.sql_json.is_none());

    let mismatched = ModelDraft {
        sql_text: "SELECT id FROM customers".into(),
        sql_json: from_text.sql_json,
        ..ModelDraft::default()
    };
    assert!(mismatched.normalized().is_err());
}

#[test]
fn test_mirror_of_unstructured_text_is_dropped() {
    let draft = ModelDraft {
        sql_text: "SELECT COUNT(*) FROM orders".into(),
        sql_json: Some(SqlJson::parse("SELECT name FROM customers").unwrap()),
        ..ModelDraft::default()
    }
    .normalized()
    .unwrap();

    assert_eq!(draft.sql_text, "SELECT COUNT(*) FROM orders");
    assert!(draft.sql_json.is_none());
}

#[test]
fn test_offset_survives_the_mirror() {
    let query = SqlJson::parse("SELECT id FROM orders ORDER BY id LIMIT 1 OFFSET 1").unwrap();
    assert_eq!(query.offset, Some(1));
    assert_eq!(
        query.to_sql(),
        "SELECT id FROM orders ORDER BY id LIMIT 1 OFFSET 1"
    );

    let without = SqlJson::parse("SELECT id FROM orders ORDER BY id LIMIT 1").unwrap();
    assert!(!query.logically_equivalent(&without));

    let mismatched = ModelDraft {
        sql_text: "SELECT id FROM orders ORDER BY id LIMIT 1 OFFSET 1".into(),
        sql_json: Some(without),
        ..ModelDraft::default()
    };
    assert!(mismatched.normalized().is_err());
}

#[test]
fn test_filters_are_part_of_equivalence() {
    let open = SqlJson::parse("SELECT id FROM orders WHERE status = 'open'").unwrap();
    let all = SqlJson::parse("SELECT id FROM orders").unwrap();
    let flipped = SqlJson::parse("SELECT id FROM orders WHERE 'open' = status").unwrap();

    assert!(!open.logically_equivalent(&all));
    assert!(open.logically_equivalent(&flipped));
}
