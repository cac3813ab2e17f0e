use crossbar::crossbar::sql::ast::{Evaluator, FieldOperator, Query};
use crossbar::crossbar::sql::datasource::{
    DataRow, Enlarged, MapRowAccessor, MemoryDataSource,
};
use crossbar::crossbar::sql::error::SqlError;
use crossbar::crossbar::sql::evaluator::QueryEngine;
use crossbar::crossbar::sql::functions::FunctionRegistry;
use crossbar::crossbar::sql::types::FieldValue;

fn people_source() -> MemoryDataSource {
    let mut source = MemoryDataSource::new();
    source.register(
        "people",
        vec![
            DataRow::new().with("name", "alice").with("age", 30i64),
            DataRow::new().with("name", "bob").with("age", 17i64),
            DataRow::new().with("name", "anna").with("age", 22i64),
        ],
    );
    source
}

fn join_source() -> MemoryDataSource {
    let mut source = MemoryDataSource::new();
    source.register(
        "person",
        vec![
            DataRow::new().with("id", 1i64).with("name", "a"),
            DataRow::new().with("id", 2i64).with("name", "b"),
        ],
    );
    source.register(
        "orders",
        vec![
            DataRow::new().with("pid", 1i64).with("total", 50i64),
            DataRow::new().with("pid", 1i64).with("total", 150i64),
            DataRow::new().with("pid", 2i64).with("total", 200i64),
        ],
    );
    source
}

fn evaluate(source: &MemoryDataSource, sql: &str) -> Result<Vec<DataRow>, SqlError> {
    let accessor = MapRowAccessor;
    let functions = FunctionRegistry::new();
    let engine = QueryEngine::new(source, &accessor, &functions);
    let query = Query::compile(sql)?;
    engine.evaluate(&query)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_project_order_limit() {
        let source = people_source();
        let rows = evaluate(
            &source,
            "SELECT name, age*2 AS d FROM people WHERE age >= 18 AND name LIKE 'a%' ORDER BY age DESC LIMIT 2",
        )
        .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("name"), Some(&FieldValue::String("alice".to_string())));
        assert_eq!(rows[0].get("d"), Some(&FieldValue::Integer(60)));
        assert_eq!(rows[1].get("name"), Some(&FieldValue::String("anna".to_string())));
        assert_eq!(rows[1].get("d"), Some(&FieldValue::Integer(44)));
        // Projection drops undeclared fields
        assert_eq!(rows[0].get("age"), None);
    }

    #[test]
    fn test_inner_join_with_predicate() {
        let source = join_source();
        let mut rows = evaluate(
            &source,
            "SELECT p.name, o.total FROM person p INNER JOIN orders o ON p.id=o.pid WHERE o.total > 100",
        )
        .unwrap();

        rows.sort_by_key(|row| match row.get("total") {
            Some(FieldValue::Integer(total)) => *total,
            _ => 0,
        });
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("name"), Some(&FieldValue::String("a".to_string())));
        assert_eq!(rows[0].get("total"), Some(&FieldValue::Integer(150)));
        assert_eq!(rows[1].get("name"), Some(&FieldValue::String("b".to_string())));
        assert_eq!(rows[1].get("total"), Some(&FieldValue::Integer(200)));
    }

    #[test]
    fn test_left_join_emits_unmatched_outer_rows() {
        let mut source = MemoryDataSource::new();
        source.register(
            "person",
            vec![
                DataRow::new().with("id", 1i64).with("name", "a"),
                DataRow::new().with("id", 3i64).with("name", "c"),
            ],
        );
        source.register(
            "orders",
            vec![DataRow::new().with("pid", 1i64).with("total", 50i64)],
        );

        let rows = evaluate(
            &source,
            "SELECT * FROM person p LEFT JOIN orders o ON p.id=o.pid",
        )
        .unwrap();

        assert_eq!(rows.len(), 2);
        let unmatched = rows
            .iter()
            .find(|row| row.get("name") == Some(&FieldValue::String("c".to_string())))
            .expect("unmatched person row present");
        // The missing side reads as nulls
        assert_eq!(unmatched.get("total"), None);
    }

    #[test]
    fn test_limit_zero_yields_empty() {
        let source = people_source();
        let rows = evaluate(&source, "SELECT * FROM people LIMIT 0").unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_start_beyond_size_yields_empty() {
        let source = people_source();
        let rows = evaluate(&source, "SELECT * FROM people START 10 LIMIT 5").unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_start_skips_passing_rows() {
        let source = people_source();
        let rows = evaluate(
            &source,
            "SELECT name FROM people WHERE age >= 18 START 1",
        )
        .unwrap();
        // alice passes first and is skipped, anna remains
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&FieldValue::String("anna".to_string())));
    }

    #[test]
    fn test_group_by_folds_rows() {
        let mut source = MemoryDataSource::new();
        source.register(
            "events",
            vec![
                DataRow::new().with("kind", "a").with("value", 1i64),
                DataRow::new().with("kind", "b").with("value", 2i64),
                DataRow::new().with("kind", "a").with("value", 3i64),
            ],
        );

        let rows = evaluate(&source, "SELECT * FROM events GROUP BY kind").unwrap();
        assert_eq!(rows.len(), 2);
        let folded = rows
            .iter()
            .find(|row| row.get("kind") == Some(&FieldValue::String("a".to_string())))
            .expect("group a present");
        assert_eq!(
            folded.get("value"),
            Some(&FieldValue::Array(vec![
                FieldValue::Integer(1),
                FieldValue::Integer(3)
            ]))
        );
    }

    #[test]
    fn test_aggregate_count_and_mean() {
        let source = people_source();

        let rows = evaluate(&source, "SELECT count() AS n FROM people WHERE age >= 18").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("n"), Some(&FieldValue::Integer(2)));

        let rows = evaluate(&source, "SELECT mean(age) AS m FROM people").unwrap();
        assert_eq!(rows[0].get("m"), Some(&FieldValue::Integer(23)));
    }

    #[test]
    fn test_subquery_in_operand() {
        let source = join_source();
        let rows = evaluate(
            &source,
            "SELECT total FROM orders WHERE pid IN (SELECT id FROM person WHERE name = 'a')",
        )
        .unwrap();

        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert_ne!(row.get("total"), None);
        }
    }

    #[test]
    fn test_replaceable_parameters() {
        let source = people_source();
        let accessor = MapRowAccessor;
        let functions = FunctionRegistry::new();
        let engine = QueryEngine::new(&source, &accessor, &functions);
        let query = Query::compile("SELECT name FROM people WHERE age > ?").unwrap();

        let rows = engine
            .evaluate_with_parameters(&query, &[FieldValue::Integer(25)])
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&FieldValue::String("alice".to_string())));

        // A missing parameter surfaces as an evaluation error
        assert!(engine.evaluate(&query).is_err());
    }

    #[test]
    fn test_reduce_evaluates_identically() {
        let source = people_source();
        let accessor = MapRowAccessor;
        let functions = FunctionRegistry::new();
        let engine = QueryEngine::new(&source, &accessor, &functions);

        let query = Query::compile("SELECT name FROM people WHERE age >= 18 AND age > 17").unwrap();
        let full = engine.evaluate(&query).unwrap();

        // `age > 17` is implied by `age >= 18`; folding it to TRUE must not
        // change the result
        let target = query.collect_field_evaluators("age", &[FieldOperator::GreaterThan]);
        assert_eq!(target.len(), 1);
        let reduced = query.reduce(&target);
        assert!(matches!(reduced.evaluators()[1], Evaluator::True));
        let reduced_rows = engine.evaluate(&reduced).unwrap();
        assert_eq!(full, reduced_rows);
    }

    #[test]
    fn test_like_against_non_string_aborts() {
        let source = people_source();
        let result = evaluate(&source, "SELECT * FROM people WHERE age LIKE 'a%'");
        assert!(matches!(result, Err(SqlError::TypeError { .. })));
    }

    #[test]
    fn test_unknown_resource_surfaces() {
        let source = people_source();
        let result = evaluate(&source, "SELECT * FROM nowhere");
        assert!(matches!(result, Err(SqlError::ResourceError { .. })));
    }

    #[test]
    fn test_unknown_function_surfaces() {
        let source = people_source();
        let result = evaluate(&source, "SELECT frobnicate(name) FROM people");
        assert!(matches!(result, Err(SqlError::FunctionError { .. })));
    }

    #[test]
    fn test_order_by_nulls_first() {
        let mut source = MemoryDataSource::new();
        source.register(
            "items",
            vec![
                DataRow::new().with("name", "x").with("rank", 2i64),
                DataRow::new().with("name", "y"),
                DataRow::new().with("name", "z").with("rank", 1i64),
            ],
        );

        let rows = evaluate(&source, "SELECT * FROM items ORDER BY rank").unwrap();
        assert_eq!(rows[0].get("name"), Some(&FieldValue::String("y".to_string())));
        assert_eq!(rows[1].get("name"), Some(&FieldValue::String("z".to_string())));
        assert_eq!(rows[2].get("name"), Some(&FieldValue::String("x".to_string())));
    }

    #[test]
    fn test_scalar_functions_in_projection() {
        let source = people_source();
        let rows = evaluate(
            &source,
            "SELECT upper(name) AS loud FROM people WHERE name = 'alice'",
        )
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("loud"), Some(&FieldValue::String("ALICE".to_string())));
    }

    #[test]
    fn test_query_parcel_round_trip() {
        let query =
            Query::compile("SELECT name FROM people WHERE age >= 18 ORDER BY age DESC").unwrap();
        let parcel = serde_json::to_string(&query).unwrap();
        assert!(parcel.contains("__query__"));
        let restored: Query = serde_json::from_str(&parcel).unwrap();
        assert_eq!(query, restored);
    }
}
