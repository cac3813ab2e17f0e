//! Textual query compiler.
//!
//! Parsing happens in three passes. Single-quoted regions are first replaced
//! with `$RT<n>$` tokens (a `\` before the delimiter escapes it), then every
//! parenthesized group is replaced, innermost first, with a `$G<n>$` token so
//! the remaining top-level text is flat. The flat text is matched against the
//! SELECT pattern and the conditional tail is split on the clause keywords;
//! every clause is parsed independently, recursing into group tokens where
//! they appear.

use crate::crossbar::config::{QueryPatterns, QueryProperties, ServiceProperties};
use crate::crossbar::sql::ast::*;
use crate::crossbar::sql::error::SqlError;
use crate::crossbar::sql::types::FieldValue;
use chrono::NaiveDateTime;
use lazy_static::lazy_static;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

const RICH_TEXT_TOKEN: &str = "$RT";
const GROUP_TOKEN: &str = "$G";
const TOKEN_END: char = '$';
const SKIP_CHARACTER: char = '\\';
const STRING_DELIMITER: char = '\'';

lazy_static! {
    static ref DEFAULT_PARSER: QueryParser = QueryParser::new();
}

impl Query {
    /// Compile a query with the default properties.
    pub fn compile(sql: &str) -> Result<Query, SqlError> {
        DEFAULT_PARSER.parse(sql)
    }
}

pub struct QueryParser {
    properties: QueryProperties,
    patterns: QueryPatterns,
}

impl Default for QueryParser {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryParser {
    pub fn new() -> Self {
        Self {
            properties: QueryProperties::default(),
            patterns: QueryPatterns::compile()
                .expect("default query patterns must compile"),
        }
    }

    pub fn with_properties(properties: &ServiceProperties) -> Self {
        Self {
            properties: properties.query.clone(),
            patterns: properties.patterns.clone(),
        }
    }

    /// Compile a single SELECT statement into a [`Query`].
    pub fn parse(&self, sql: &str) -> Result<Query, SqlError> {
        let (no_rich_text, rich_texts) = extract_rich_text(sql)?;
        let flattened = no_rich_text.replace(['\n', '\r'], " ");
        let (top, groups) = replace_groups(&flattened)?;
        self.compile_text(top.trim(), &groups, &rich_texts, &mut 0)
    }

    fn compile_text(
        &self,
        text: &str,
        groups: &[String],
        rich_texts: &[String],
        places: &mut usize,
    ) -> Result<Query, SqlError> {
        let captures = self.patterns.select.captures(text).ok_or_else(|| {
            SqlError::parse_error("Not a SELECT statement", Some(text.to_string()))
        })?;

        let select_body = captures.name("select").map(|m| m.as_str()).unwrap_or("");
        let from_body = captures.name("from").map(|m| m.as_str()).unwrap_or("");
        let conditional_body = captures
            .name("conditional")
            .map(|m| m.as_str())
            .unwrap_or("");

        let mut query = Query::new(from_body.trim());
        let mut aliases: HashMap<String, String> = HashMap::new();

        for item in select_body.split(',') {
            let item = item.trim();
            if item.is_empty() {
                return Err(SqlError::parse_error(
                    "Empty return item",
                    Some(select_body.to_string()),
                ));
            }
            if item == "*" {
                query.set_return_all(true);
                continue;
            }
            let parameter = self.parse_return_item(item, groups, rich_texts, places)?;
            query.add_return_parameter(parameter);
        }

        let (resource_alias, clauses) = self.split_conditional(conditional_body)?;
        if let Some(alias) = resource_alias {
            aliases.insert(alias, query.resource_name().to_string());
        }

        for (keyword, clause) in clauses {
            match keyword.as_str() {
                "JOIN" | "INNER JOIN" | "LEFT JOIN" | "RIGHT JOIN" => {
                    let join_type = match keyword.as_str() {
                        "INNER JOIN" => JoinType::Inner,
                        "LEFT JOIN" => JoinType::Left,
                        "RIGHT JOIN" => JoinType::Right,
                        _ => JoinType::Join,
                    };
                    let (join, alias) =
                        self.parse_join(&clause, join_type, groups, rich_texts, places)?;
                    if let Some(alias) = alias {
                        aliases.insert(alias, join.resource_name().to_string());
                    }
                    query.add_join(join);
                }
                "WHERE" => {
                    for evaluator in
                        self.parse_evaluator_collection(&clause, groups, rich_texts, places)?
                    {
                        query.add_evaluator(evaluator);
                    }
                }
                "GROUP BY" => {
                    for item in clause.split(',') {
                        let parameter =
                            self.parse_return_item(item.trim(), groups, rich_texts, places)?;
                        query.add_group_parameter(parameter);
                    }
                }
                "ORDER BY" => {
                    for item in clause.split(',') {
                        let parameter =
                            self.parse_order_item(item.trim(), groups, rich_texts, places)?;
                        query.add_order_parameter(parameter);
                    }
                }
                "LIMIT" => {
                    let limit = clause.trim().parse().map_err(|_| {
                        SqlError::parse_error("LIMIT expects a number", Some(clause.clone()))
                    })?;
                    query.set_limit(Some(limit));
                }
                "START" => {
                    let start = clause.trim().parse().map_err(|_| {
                        SqlError::parse_error("START expects a number", Some(clause.clone()))
                    })?;
                    query.set_start(Some(start));
                }
                other => {
                    return Err(SqlError::parse_error(
                        format!("Unexpected clause keyword '{}'", other),
                        Some(clause),
                    ));
                }
            }
        }

        query.resolve_aliases(&aliases);
        Ok(query)
    }

    /// Split the conditional tail into (keyword, clause) pairs, preserving
    /// order. A single identifier before the first keyword is the FROM
    /// resource alias.
    fn split_conditional(
        &self,
        conditional: &str,
    ) -> Result<(Option<String>, Vec<(String, String)>), SqlError> {
        let mut alias: Option<String> = None;
        let mut clauses = Vec::new();
        let mut pending: Option<String> = None;
        let mut last_end = 0;

        let take_alias = |body: &str| -> Result<Option<String>, SqlError> {
            let body = body.trim();
            if body.is_empty() {
                Ok(None)
            } else if body.split_whitespace().count() == 1 {
                Ok(Some(body.to_string()))
            } else {
                Err(SqlError::parse_error(
                    "Unparseable text before first clause",
                    Some(body.to_string()),
                ))
            }
        };

        for keyword_match in self.patterns.conditional.find_iter(conditional) {
            let body = &conditional[last_end..keyword_match.start()];
            match pending.take() {
                Some(keyword) => clauses.push((keyword, body.trim().to_string())),
                None => alias = take_alias(body)?,
            }
            pending = Some(normalize_keyword(keyword_match.as_str()));
            last_end = keyword_match.end();
        }

        let tail = &conditional[last_end..];
        match pending {
            Some(keyword) => clauses.push((keyword, tail.trim().to_string())),
            None => alias = take_alias(tail)?,
        }

        Ok((alias, clauses))
    }

    fn parse_join(
        &self,
        clause: &str,
        join_type: JoinType,
        groups: &[String],
        rich_texts: &[String],
        places: &mut usize,
    ) -> Result<(Join, Option<String>), SqlError> {
        let captures = self.patterns.join_on.captures(clause).ok_or_else(|| {
            SqlError::parse_error("Join expects 'resource ON condition'", Some(clause.to_string()))
        })?;
        let resource = captures.name("resource").map(|m| m.as_str()).unwrap_or("");
        let alias = captures.name("alias").map(|m| m.as_str().to_string());
        let mut on_body = captures
            .name("on")
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();

        // A fully parenthesized ON condition arrives as a single group token.
        if let Some(index) = parse_token_index(&on_body, GROUP_TOKEN) {
            on_body = groups
                .get(index)
                .cloned()
                .ok_or_else(|| SqlError::parse_error("Unknown group", Some(on_body.clone())))?;
        }

        let mut evaluators =
            self.parse_evaluator_collection(&on_body, groups, rich_texts, places)?;
        if evaluators.is_empty() {
            return Err(SqlError::parse_error(
                "Join without condition",
                Some(clause.to_string()),
            ));
        }

        let first = evaluators.remove(0);
        let (left_field, right_field) = match first {
            Evaluator::Field(FieldEvaluator {
                operator: FieldOperator::Equals,
                left: Operand::Field(left),
                right: Operand::Field(right),
            }) => (left, right),
            other => {
                return Err(SqlError::parse_error(
                    "Join condition must start with a field equality",
                    Some(other.to_string()),
                ));
            }
        };

        let mut join = Join::new(resource, join_type, left_field, right_field);
        join.evaluators = evaluators;
        Ok((join, alias))
    }

    /// Parse a predicate body into a collection with AND semantics at the top
    /// level. OR binds looser than AND: `a AND b OR c` becomes
    /// `(a AND b) OR c`.
    fn parse_evaluator_collection(
        &self,
        text: &str,
        groups: &[String],
        rich_texts: &[String],
        places: &mut usize,
    ) -> Result<Vec<Evaluator>, SqlError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }

        let mut terms: Vec<Evaluator> = Vec::new();
        let mut run: Vec<Evaluator> = Vec::new();
        let mut last_end = 0;

        for connector in self.patterns.connector.find_iter(text) {
            let definition = text[last_end..connector.start()].trim();
            run.push(self.parse_definition(definition, groups, rich_texts, places)?);
            if connector.as_str().eq_ignore_ascii_case("OR") {
                terms.push(collapse_run(std::mem::take(&mut run)));
            }
            last_end = connector.end();
        }

        let definition = text[last_end..].trim();
        run.push(self.parse_definition(definition, groups, rich_texts, places)?);

        if terms.is_empty() {
            Ok(run)
        } else {
            terms.push(collapse_run(run));
            Ok(vec![Evaluator::Or(terms)])
        }
    }

    /// Parse one predicate definition: a nested group, a bare boolean operand
    /// or a `left operator right` comparison.
    fn parse_definition(
        &self,
        definition: &str,
        groups: &[String],
        rich_texts: &[String],
        places: &mut usize,
    ) -> Result<Evaluator, SqlError> {
        let definition = definition.trim();
        if definition.is_empty() {
            return Err(SqlError::parse_error("Empty predicate", None));
        }

        if let Some(index) = parse_token_index(definition, GROUP_TOKEN) {
            let content = groups.get(index).ok_or_else(|| {
                SqlError::parse_error("Unknown group", Some(definition.to_string()))
            })?;
            let collection =
                self.parse_evaluator_collection(content, groups, rich_texts, places)?;
            return Ok(collapse_run(collection));
        }

        let operator_match = match self.patterns.operator.find(definition) {
            Some(operator_match) => operator_match,
            None => {
                let operand =
                    self.process_operand(definition, groups, rich_texts, places)?;
                return Ok(Evaluator::Boolean(operand));
            }
        };

        let left_text = definition[..operator_match.start()].trim();
        let right_text = definition[operator_match.end()..].trim();
        if left_text.is_empty() || right_text.is_empty() {
            return Err(SqlError::parse_error(
                "Comparison missing an operand",
                Some(definition.to_string()),
            ));
        }

        let operator = match normalize_keyword(operator_match.as_str()).as_str() {
            "=" => FieldOperator::Equals,
            "!=" | "<>" => FieldOperator::Distinct,
            ">" => FieldOperator::GreaterThan,
            ">=" => FieldOperator::GreaterThanOrEqual,
            "<" => FieldOperator::SmallerThan,
            "<=" => FieldOperator::SmallerThanOrEqual,
            "IN" => FieldOperator::In,
            "NOT IN" => FieldOperator::NotIn,
            "LIKE" => FieldOperator::Like,
            other => {
                return Err(SqlError::parse_error(
                    format!("Unsupported operator '{}'", other),
                    Some(definition.to_string()),
                ));
            }
        };

        let left = self.process_operand(left_text, groups, rich_texts, places)?;
        let right = self.process_operand(right_text, groups, rich_texts, places)?;
        Ok(Evaluator::Field(FieldEvaluator::new(operator, left, right)))
    }

    fn parse_return_item(
        &self,
        item: &str,
        groups: &[String],
        rich_texts: &[String],
        places: &mut usize,
    ) -> Result<ReturnParameter, SqlError> {
        let parts: Vec<&str> = self.patterns.as_suffix.splitn(item, 2).collect();
        let (value_text, alias) = if parts.len() == 2 {
            (parts[0].trim(), Some(parts[1].trim().to_string()))
        } else {
            (item, None)
        };

        let value = self.parse_return_value(value_text, groups, rich_texts, places)?;
        Ok(ReturnParameter { value, alias })
    }

    fn parse_order_item(
        &self,
        item: &str,
        groups: &[String],
        rich_texts: &[String],
        places: &mut usize,
    ) -> Result<OrderParameter, SqlError> {
        let (value_text, desc) = match self.patterns.desc_suffix.find(item) {
            Some(suffix) => (
                item[..suffix.start()].trim(),
                suffix.as_str().trim().eq_ignore_ascii_case("DESC"),
            ),
            None => (item, self.properties.default_desc_order),
        };

        let value = self.parse_return_value(value_text, groups, rich_texts, places)?;
        Ok(OrderParameter { value, desc })
    }

    fn parse_return_value(
        &self,
        text: &str,
        groups: &[String],
        rich_texts: &[String],
        places: &mut usize,
    ) -> Result<ReturnValue, SqlError> {
        match self.process_operand(text, groups, rich_texts, places)? {
            Operand::Field(field) => Ok(ReturnValue::Field(field)),
            Operand::Function(function) => Ok(ReturnValue::Function(function)),
            other => Err(SqlError::parse_error(
                "Return and order items must be fields or functions",
                Some(other.to_string()),
            )),
        }
    }

    /// Operand recognition, applied in a fixed order: replaceable value,
    /// reserved literals, quoted string or date, subquery or collection
    /// group, UUID, integer, decimal, scientific, math expression, function
    /// application, field reference.
    fn process_operand(
        &self,
        text: &str,
        groups: &[String],
        rich_texts: &[String],
        places: &mut usize,
    ) -> Result<Operand, SqlError> {
        let text = text.trim();

        if text == "?" {
            let operand = Operand::Replaceable(*places);
            *places += 1;
            return Ok(operand);
        }

        if text.eq_ignore_ascii_case("NULL") {
            return Ok(Operand::Literal(FieldValue::Null));
        }
        if text.eq_ignore_ascii_case("TRUE") {
            return Ok(Operand::Literal(FieldValue::Boolean(true)));
        }
        if text.eq_ignore_ascii_case("FALSE") {
            return Ok(Operand::Literal(FieldValue::Boolean(false)));
        }

        if let Some(inner) = text.strip_prefix(STRING_DELIMITER) {
            let inner = inner.strip_suffix(STRING_DELIMITER).ok_or_else(|| {
                SqlError::parse_error("Unterminated string literal", Some(text.to_string()))
            })?;
            let index = parse_token_index(inner, RICH_TEXT_TOKEN).ok_or_else(|| {
                SqlError::parse_error("Malformed string literal", Some(text.to_string()))
            })?;
            let raw = rich_texts.get(index).ok_or_else(|| {
                SqlError::parse_error("Unknown rich text", Some(text.to_string()))
            })?;
            let value = raw.replace(
                &format!("{}{}", SKIP_CHARACTER, STRING_DELIMITER),
                &STRING_DELIMITER.to_string(),
            );
            return match NaiveDateTime::parse_from_str(&value, &self.properties.date_format) {
                Ok(date) => Ok(Operand::Literal(FieldValue::Date(date))),
                Err(_) => Ok(Operand::Literal(FieldValue::String(value))),
            };
        }

        if let Some(index) = parse_token_index(text, GROUP_TOKEN) {
            let content = groups
                .get(index)
                .ok_or_else(|| SqlError::parse_error("Unknown group", Some(text.to_string())))?;
            if content.trim_start().to_uppercase().starts_with("SELECT") {
                let subquery = self.compile_text(content.trim(), groups, rich_texts, places)?;
                return Ok(Operand::SubQuery(Box::new(subquery)));
            }
            let mut items = Vec::new();
            for item in content.split(',') {
                items.push(self.process_operand(item, groups, rich_texts, places)?);
            }
            return Ok(Operand::Collection(items));
        }

        if self.patterns.uuid.is_match(text) {
            let value = Uuid::parse_str(text).map_err(|_| {
                SqlError::parse_error("Malformed UUID literal", Some(text.to_string()))
            })?;
            return Ok(Operand::Literal(FieldValue::Uuid(value)));
        }

        if self.patterns.integer.is_match(text) {
            let value: i64 = text.parse().map_err(|_| {
                SqlError::parse_error("Integer literal out of range", Some(text.to_string()))
            })?;
            return Ok(Operand::Literal(FieldValue::Integer(value)));
        }

        if self.patterns.decimal.is_match(text) {
            let value = Decimal::from_str(text).map_err(|_| {
                SqlError::parse_error("Unable to parse decimal number", Some(text.to_string()))
            })?;
            return Ok(Operand::Literal(FieldValue::Decimal(value)));
        }

        if self.patterns.scientific.is_match(text) {
            let value: f64 = text.parse().map_err(|_| {
                SqlError::parse_error("Unable to parse scientific number", Some(text.to_string()))
            })?;
            return Ok(Operand::Literal(FieldValue::Float(value)));
        }

        if self.patterns.math.is_match(text) {
            return self.process_math(text, groups, rich_texts, places);
        }

        if let Some(group_start) = text.find(GROUP_TOKEN) {
            // name$Gn$ is a function application over the group's arguments
            let name = text[..group_start].trim();
            let token = &text[group_start..];
            let index = parse_token_index(token, GROUP_TOKEN).ok_or_else(|| {
                SqlError::parse_error("Malformed function call", Some(text.to_string()))
            })?;
            let content = groups
                .get(index)
                .ok_or_else(|| SqlError::parse_error("Unknown group", Some(text.to_string())))?;
            let mut args = Vec::new();
            if !content.trim().is_empty() {
                for arg in content.split(',') {
                    args.push(self.process_operand(arg, groups, rich_texts, places)?);
                }
            }
            let original = format!(
                "{}({})",
                name,
                restore_text(content, groups, rich_texts)
            );
            return Ok(Operand::Function(QueryFunction::new(original, name, args)));
        }

        Ok(Operand::Field(QueryField::new(text)))
    }

    /// A math expression compiles to a `mathEval` function whose arguments
    /// alternate operands and connector literals.
    fn process_math(
        &self,
        text: &str,
        groups: &[String],
        rich_texts: &[String],
        places: &mut usize,
    ) -> Result<Operand, SqlError> {
        let mut args = Vec::new();
        let mut last_end = 0;
        for connector in self.patterns.math_splitter.find_iter(text) {
            let part = text[last_end..connector.start()].trim();
            args.push(self.process_operand(part, groups, rich_texts, places)?);
            args.push(Operand::Literal(FieldValue::String(
                connector.as_str().to_string(),
            )));
            last_end = connector.end();
        }
        let part = text[last_end..].trim();
        args.push(self.process_operand(part, groups, rich_texts, places)?);

        let original = restore_text(text, groups, rich_texts);
        Ok(Operand::Function(QueryFunction::new(
            original, "mathEval", args,
        )))
    }
}

/// Collapse an AND run into a single evaluator.
fn collapse_run(mut run: Vec<Evaluator>) -> Evaluator {
    if run.len() == 1 {
        run.remove(0)
    } else {
        Evaluator::And(run)
    }
}

/// Normalize a matched keyword: uppercase with single spaces.
fn normalize_keyword(keyword: &str) -> String {
    keyword
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// If `text` is exactly a `<token><digits>$` token, return the digits.
fn parse_token_index(text: &str, token: &str) -> Option<usize> {
    let text = text.trim();
    let rest = text.strip_prefix(token)?;
    let rest = rest.strip_suffix(TOKEN_END)?;
    if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

/// Replace every single-quoted region with a `$RT<n>$` token, honoring the
/// `\` skip character. The delimiters stay in the processed text.
fn extract_rich_text(sql: &str) -> Result<(String, Vec<String>), SqlError> {
    let mut processed = String::with_capacity(sql.len());
    let mut rich_texts = Vec::new();
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != STRING_DELIMITER {
            processed.push(ch);
            continue;
        }

        let mut content = String::new();
        let mut terminated = false;
        while let Some(inner) = chars.next() {
            if inner == SKIP_CHARACTER && chars.peek() == Some(&STRING_DELIMITER) {
                content.push(inner);
                content.push(STRING_DELIMITER);
                chars.next();
                continue;
            }
            if inner == STRING_DELIMITER {
                terminated = true;
                break;
            }
            content.push(inner);
        }
        if !terminated {
            return Err(SqlError::parse_error(
                "Unterminated string literal",
                Some(content),
            ));
        }

        processed.push(STRING_DELIMITER);
        processed.push_str(&format!("{}{}{}", RICH_TEXT_TOKEN, rich_texts.len(), TOKEN_END));
        processed.push(STRING_DELIMITER);
        rich_texts.push(content);
    }

    Ok((processed, rich_texts))
}

/// Replace every parenthesized group with a `$G<n>$` token, innermost first.
/// Reversing the substitution yields the original text.
fn replace_groups(text: &str) -> Result<(String, Vec<String>), SqlError> {
    let mut current = text.to_string();
    let mut groups = Vec::new();

    loop {
        let close = match current.find(')') {
            Some(position) => position,
            None => break,
        };
        let open = current[..close].rfind('(').ok_or_else(|| {
            SqlError::parse_error("Unbalanced parenthesis", Some(current.clone()))
        })?;

        let content = current[open + 1..close].to_string();
        current.replace_range(
            open..=close,
            &format!("{}{}{}", GROUP_TOKEN, groups.len(), TOKEN_END),
        );
        groups.push(content);
    }

    if current.contains('(') {
        return Err(SqlError::parse_error(
            "Unbalanced parenthesis",
            Some(current),
        ));
    }

    Ok((current, groups))
}

/// Reverse the group and rich-text substitutions inside `text`, restoring the
/// original textual form.
fn restore_text(text: &str, groups: &[String], rich_texts: &[String]) -> String {
    let mut current = text.to_string();
    loop {
        let mut changed = false;
        for (index, group) in groups.iter().enumerate() {
            let token = format!("{}{}{}", GROUP_TOKEN, index, TOKEN_END);
            if current.contains(&token) {
                current = current.replace(&token, &format!("({})", group));
                changed = true;
            }
        }
        for (index, rich) in rich_texts.iter().enumerate() {
            let token = format!("{}{}{}", RICH_TEXT_TOKEN, index, TOKEN_END);
            if current.contains(&token) {
                current = current.replace(&token, rich);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rich_text_extraction() {
        let (processed, rich) = extract_rich_text("WHERE name = 'O\\'Brien'").unwrap();
        assert_eq!(processed, "WHERE name = '$RT0$'");
        assert_eq!(rich, vec!["O\\'Brien".to_string()]);
    }

    #[test]
    fn test_group_replacement_is_reversible() {
        let (top, groups) = replace_groups("a in (1, (2), 3)").unwrap();
        assert_eq!(top, "a in $G1$");
        assert_eq!(groups, vec!["2".to_string(), "1, $G0$, 3".to_string()]);
        assert_eq!(restore_text(&top, &groups, &[]), "a in (1, (2), 3)");
    }

    #[test]
    fn test_unbalanced_groups_fail() {
        assert!(replace_groups("(a").is_err());
        assert!(replace_groups("a)").is_err());
    }

    #[test]
    fn test_replaceable_values_are_indexed_in_order() {
        let query = Query::compile("SELECT * FROM people WHERE name = ? AND age > ?").unwrap();
        let replaceables: Vec<usize> = query
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
        assert_eq!(replaceables, vec![0, 1]);
    }

    #[test]
    fn test_or_binds_looser_than_and() {
        let query =
            Query::compile("SELECT * FROM people WHERE age > 18 AND age < 65 OR name = 'root'")
                .unwrap();
        assert_eq!(query.evaluators().len(), 1);
        match &query.evaluators()[0] {
            Evaluator::Or(terms) => {
                assert_eq!(terms.len(), 2);
                assert!(matches!(terms[0], Evaluator::And(_)));
                assert!(matches!(terms[1], Evaluator::Field(_)));
            }
            other => panic!("Expected OR collection, got {:?}", other),
        }
    }
}
