use crossbar::crossbar::sql::ast::*;
use crossbar::crossbar::sql::types::FieldValue;
use crossbar::crossbar::sql::QueryParser;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_select_all() {
        let parser = QueryParser::new();
        let query = parser.parse("SELECT * FROM orders").unwrap();

        assert!(query.returns_all());
        assert_eq!(query.resource_name(), "orders");
        assert!(query.evaluators().is_empty());
        assert!(query.joins().is_empty());
    }

    #[test]
    fn test_select_specific_fields() {
        let parser = QueryParser::new();
        let query = parser
            .parse("SELECT customer_id, amount, created FROM orders")
            .unwrap();

        assert!(!query.returns_all());
        assert_eq!(query.return_parameters().len(), 3);
        match &query.return_parameters()[0].value {
            ReturnValue::Field(field) => assert_eq!(field.field_name(), "customer_id"),
            other => panic!("Expected field, got {:?}", other),
        }
    }

    #[test]
    fn test_select_with_alias() {
        let parser = QueryParser::new();
        let query = parser
            .parse("SELECT customer_id AS cid, amount AS total FROM orders")
            .unwrap();

        assert_eq!(
            query.return_parameters()[0].alias.as_deref(),
            Some("cid")
        );
        assert_eq!(
            query.return_parameters()[1].alias.as_deref(),
            Some("total")
        );
    }

    #[test]
    fn test_where_operators() {
        let parser = QueryParser::new();
        let query = parser
            .parse("SELECT * FROM people WHERE age >= 18 AND name != 'bob'")
            .unwrap();

        assert_eq!(query.evaluators().len(), 2);
        match &query.evaluators()[0] {
            Evaluator::Field(evaluator) => {
                assert_eq!(evaluator.operator, FieldOperator::GreaterThanOrEqual);
                assert_eq!(
                    evaluator.right,
                    Operand::Literal(FieldValue::Integer(18))
                );
            }
            other => panic!("Expected field evaluator, got {:?}", other),
        }
        match &query.evaluators()[1] {
            Evaluator::Field(evaluator) => {
                assert_eq!(evaluator.operator, FieldOperator::Distinct);
                assert_eq!(
                    evaluator.right,
                    Operand::Literal(FieldValue::String("bob".to_string()))
                );
            }
            other => panic!("Expected field evaluator, got {:?}", other),
        }
    }

    #[test]
    fn test_not_in_and_collection_literal() {
        let parser = QueryParser::new();
        let query = parser
            .parse("SELECT * FROM people WHERE id NOT IN (1, 2, 3)")
            .unwrap();

        match &query.evaluators()[0] {
            Evaluator::Field(evaluator) => {
                assert_eq!(evaluator.operator, FieldOperator::NotIn);
                match &evaluator.right {
                    Operand::Collection(items) => assert_eq!(items.len(), 3),
                    other => panic!("Expected collection, got {:?}", other),
                }
            }
            other => panic!("Expected field evaluator, got {:?}", other),
        }
    }

    #[test]
    fn test_parenthesized_or_group() {
        let parser = QueryParser::new();
        let query = parser
            .parse("SELECT * FROM people WHERE age > 18 AND (name = 'a' OR name = 'b')")
            .unwrap();

        assert_eq!(query.evaluators().len(), 2);
        assert!(matches!(query.evaluators()[1], Evaluator::Or(_)));
    }

    #[test]
    fn test_join_clause_with_aliases() {
        let parser = QueryParser::new();
        let query = parser
            .parse("SELECT p.name, o.total FROM person p INNER JOIN orders o ON p.id = o.pid")
            .unwrap();

        assert_eq!(query.joins().len(), 1);
        let join = &query.joins()[0];
        assert_eq!(join.join_type, JoinType::Inner);
        assert_eq!(join.resource_name(), "orders");
        assert_eq!(join.left_field.field_name(), "id");
        assert_eq!(join.left_field.resource().unwrap().name(), "person");
        assert_eq!(join.right_field.field_name(), "pid");
        assert_eq!(join.right_field.resource().unwrap().name(), "orders");
    }

    #[test]
    fn test_join_with_extra_predicates() {
        let parser = QueryParser::new();
        let query = parser
            .parse("SELECT * FROM person JOIN orders ON person.id = orders.pid AND orders.total > 10")
            .unwrap();

        let join = &query.joins()[0];
        assert_eq!(join.join_type, JoinType::Join);
        assert_eq!(join.evaluators.len(), 1);
    }

    #[test]
    fn test_group_order_limit_start() {
        let parser = QueryParser::new();
        let query = parser
            .parse("SELECT name FROM people GROUP BY name ORDER BY age DESC, name LIMIT 5 START 2")
            .unwrap();

        assert_eq!(query.group_parameters().len(), 1);
        assert_eq!(query.order_parameters().len(), 2);
        assert!(query.order_parameters()[0].desc);
        assert!(!query.order_parameters()[1].desc);
        assert_eq!(query.limit(), Some(5));
        assert_eq!(query.start(), Some(2));
    }

    #[test]
    fn test_math_expression_becomes_function() {
        let parser = QueryParser::new();
        let query = parser.parse("SELECT age*2 AS d FROM people").unwrap();

        match &query.return_parameters()[0].value {
            ReturnValue::Function(function) => {
                assert_eq!(function.name(), "mathEval");
                assert_eq!(function.args().len(), 3);
            }
            other => panic!("Expected function, got {:?}", other),
        }
        assert_eq!(query.return_parameters()[0].alias.as_deref(), Some("d"));
    }

    #[test]
    fn test_named_function_call() {
        let parser = QueryParser::new();
        let query = parser
            .parse("SELECT upper(name) AS loud FROM people")
            .unwrap();

        match &query.return_parameters()[0].value {
            ReturnValue::Function(function) => {
                assert_eq!(function.name(), "upper");
                assert_eq!(function.args().len(), 1);
            }
            other => panic!("Expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_subquery_operand() {
        let parser = QueryParser::new();
        let query = parser
            .parse("SELECT * FROM orders WHERE pid IN (SELECT id FROM person WHERE age > 30)")
            .unwrap();

        match &query.evaluators()[0] {
            Evaluator::Field(evaluator) => match &evaluator.right {
                Operand::SubQuery(subquery) => {
                    assert_eq!(subquery.resource_name(), "person");
                    assert_eq!(subquery.evaluators().len(), 1);
                }
                other => panic!("Expected subquery, got {:?}", other),
            },
            other => panic!("Expected field evaluator, got {:?}", other),
        }
    }

    #[test]
    fn test_replaceable_values() {
        let parser = QueryParser::new();
        let query = parser
            .parse("SELECT * FROM people WHERE name = ? AND age > ?")
            .unwrap();

        let indexes: Vec<usize> = query
            .evaluators()
            .iter()
            .filter_map(|evaluator| match evaluator {
                Evaluator::Field(field) => match field.right {
                    Operand::Replaceable(index) => Some(index),
                    _ => None,
                },
                _ => None,
            })
            .collect();
        assert_eq!(indexes, vec![0, 1]);
    }

    #[test]
    fn test_string_with_escaped_quote() {
        let parser = QueryParser::new();
        let query = parser
            .parse("SELECT * FROM people WHERE name = 'O\\'Brien'")
            .unwrap();

        match &query.evaluators()[0] {
            Evaluator::Field(evaluator) => assert_eq!(
                evaluator.right,
                Operand::Literal(FieldValue::String("O'Brien".to_string()))
            ),
            other => panic!("Expected field evaluator, got {:?}", other),
        }
    }

    #[test]
    fn test_date_literal() {
        let parser = QueryParser::new();
        let query = parser
            .parse("SELECT * FROM events WHERE created > '2024-06-01 12:00:00'")
            .unwrap();

        match &query.evaluators()[0] {
            Evaluator::Field(evaluator) => {
                assert!(matches!(
                    evaluator.right,
                    Operand::Literal(FieldValue::Date(_))
                ));
            }
            other => panic!("Expected field evaluator, got {:?}", other),
        }
    }

    #[test]
    fn test_uuid_literal() {
        let parser = QueryParser::new();
        let query = parser
            .parse("SELECT * FROM people WHERE id = 550e8400-e29b-41d4-a716-446655440000")
            .unwrap();

        match &query.evaluators()[0] {
            Evaluator::Field(evaluator) => {
                assert!(matches!(
                    evaluator.right,
                    Operand::Literal(FieldValue::Uuid(_))
                ));
            }
            other => panic!("Expected field evaluator, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_query_reports_fragment() {
        let parser = QueryParser::new();
        let result = parser.parse("UPDATE people SET age = 1");
        assert!(result.is_err());

        let result = parser.parse("SELECT * FROM people WHERE (age > 18");
        assert!(result.is_err());
    }

    #[test]
    fn test_round_trip_structural_equality() {
        let parser = QueryParser::new();
        let statements = [
            "SELECT * FROM people",
            "SELECT name,age AS years FROM people WHERE age >= 18 ORDER BY age DESC LIMIT 2",
            "SELECT * FROM people WHERE name LIKE 'a%' AND age < 65",
            "SELECT p.name,o.total FROM person INNER JOIN orders ON p.id = o.pid WHERE o.total > 100",
            "SELECT name FROM people WHERE id IN (1,2,3) GROUP BY name START 1 LIMIT 10",
            "SELECT * FROM people WHERE (age > 18 OR age < 5) AND name = 'x'",
        ];

        for statement in statements {
            let first = parser.parse(statement).unwrap();
            let reparsed = parser.parse(&first.to_string()).unwrap();
            assert_eq!(first, reparsed, "round trip failed for '{}'", statement);
        }
    }
}
