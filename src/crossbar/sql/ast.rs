//! Query AST.
//!
//! A [`Query`] is a tree rooted at a resource: return, group and order
//! parameter lists, joins and a predicate collection, plus START and LIMIT
//! bounds. The AST is immutable once parsed except that unqualified field
//! names are attached to the query resource when they enter the tree.
//!
//! `Display` produces the round-trippable textual form: parsing the printed
//! query yields a structurally identical tree.

use crate::crossbar::sql::types::FieldValue;
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt;

/// Default date format used when printing date literals.
pub const DISPLAY_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Any kind of resource a query can address.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueryResource {
    name: String,
}

impl QueryResource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into().trim().to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for QueryResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A field reference, optionally qualified with its resource and carrying an
/// index expression (`tags[2]`).
#[derive(Debug, Clone, PartialEq)]
pub struct QueryField {
    resource: Option<QueryResource>,
    /// True when the qualification was written in the source text, false when
    /// it was attached from the owning query.
    qualified: bool,
    field_name: String,
    index: Option<String>,
}

impl QueryField {
    /// Parse a field reference of the form `[resource.]name[\[index\]]`.
    pub fn new(text: &str) -> Self {
        let text = text.trim();
        let (resource, rest) = match text.rfind('.') {
            Some(position) => (
                Some(QueryResource::new(&text[..position])),
                text[position + 1..].trim(),
            ),
            None => (None, text),
        };

        let (field_name, index) = match (rest.find('['), rest.rfind(']')) {
            (Some(open), Some(close)) if open < close => (
                rest[..open].trim().to_string(),
                Some(rest[open + 1..close].trim().to_string()),
            ),
            _ => (rest.to_string(), None),
        };

        Self {
            qualified: resource.is_some(),
            resource,
            field_name,
            index,
        }
    }

    pub fn resource(&self) -> Option<&QueryResource> {
        self.resource.as_ref()
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn index(&self) -> Option<&str> {
        self.index.as_deref()
    }

    /// Resource name and field name in one value.
    pub fn complete_field_name(&self) -> String {
        match &self.resource {
            Some(resource) => format!("{}.{}", resource, self.field_name),
            None => self.field_name.clone(),
        }
    }

    pub(crate) fn attach_resource(&mut self, resource: &QueryResource) {
        if self.resource.is_none() {
            self.resource = Some(resource.clone());
        }
    }

    /// Replace an alias qualification with the resource it names.
    pub(crate) fn rename_resource(&mut self, aliases: &std::collections::HashMap<String, String>) {
        if let Some(resource) = &self.resource {
            if let Some(name) = aliases.get(resource.name()) {
                self.resource = Some(QueryResource::new(name.clone()));
            }
        }
    }
}

impl fmt::Display for QueryField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.qualified {
            if let Some(resource) = &self.resource {
                write!(f, "{}.", resource)?;
            }
        }
        write!(f, "{}", self.field_name)?;
        if let Some(index) = &self.index {
            write!(f, "[{}]", index)?;
        }
        Ok(())
    }
}

/// A named function applied to operands.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFunction {
    /// Textual form as written in the source, kept for printing
    original: String,
    name: String,
    args: Vec<Operand>,
}

impl QueryFunction {
    pub fn new(original: impl Into<String>, name: impl Into<String>, args: Vec<Operand>) -> Self {
        Self {
            original: original.into().trim().to_string(),
            name: name.into(),
            args,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[Operand] {
        &self.args
    }

    /// All the resources referenced by field arguments, recursively.
    pub fn resources(&self) -> BTreeSet<QueryResource> {
        let mut resources = BTreeSet::new();
        for arg in &self.args {
            match arg {
                Operand::Field(field) => {
                    if let Some(resource) = field.resource() {
                        resources.insert(resource.clone());
                    }
                }
                Operand::Function(function) => {
                    resources.extend(function.resources());
                }
                _ => {}
            }
        }
        resources
    }

    pub(crate) fn attach_resource(&mut self, resource: &QueryResource) {
        for arg in &mut self.args {
            arg.attach_resource(resource);
        }
    }

    pub(crate) fn rename_resources(&mut self, aliases: &std::collections::HashMap<String, String>) {
        for arg in &mut self.args {
            arg.rename_resources(aliases);
        }
    }
}

impl fmt::Display for QueryFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original)
    }
}

/// An operand of a predicate, return item or function argument.
#[derive(Debug, Clone)]
pub enum Operand {
    /// A literal value
    Literal(FieldValue),
    /// A `?` placeholder resolved from the positional parameter list
    Replaceable(usize),
    /// A nested SELECT
    SubQuery(Box<Query>),
    /// A field reference
    Field(QueryField),
    /// A function application
    Function(QueryFunction),
    /// A parenthesized literal collection
    Collection(Vec<Operand>),
    /// A precompiled pattern, only constructible programmatically, matched by
    /// the LIKE operator
    Pattern(Regex),
}

impl Operand {
    pub fn literal(value: impl Into<FieldValue>) -> Self {
        Operand::Literal(value.into())
    }

    pub fn field(name: &str) -> Self {
        Operand::Field(QueryField::new(name))
    }

    fn attach_resource(&mut self, resource: &QueryResource) {
        match self {
            Operand::Field(field) => field.attach_resource(resource),
            Operand::Function(function) => function.attach_resource(resource),
            Operand::Collection(items) => {
                for item in items {
                    item.attach_resource(resource);
                }
            }
            _ => {}
        }
    }

    fn rename_resources(&mut self, aliases: &std::collections::HashMap<String, String>) {
        match self {
            Operand::Field(field) => field.rename_resource(aliases),
            Operand::Function(function) => function.rename_resources(aliases),
            Operand::Collection(items) => {
                for item in items {
                    item.rename_resources(aliases);
                }
            }
            _ => {}
        }
    }
}

impl PartialEq for Operand {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Operand::Literal(left), Operand::Literal(right)) => left == right,
            (Operand::Replaceable(left), Operand::Replaceable(right)) => left == right,
            (Operand::SubQuery(left), Operand::SubQuery(right)) => left == right,
            (Operand::Field(left), Operand::Field(right)) => left == right,
            (Operand::Function(left), Operand::Function(right)) => left == right,
            (Operand::Collection(left), Operand::Collection(right)) => left == right,
            (Operand::Pattern(left), Operand::Pattern(right)) => left.as_str() == right.as_str(),
            _ => false,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(value) => write!(f, "{}", value.to_query_string(DISPLAY_DATE_FORMAT)),
            Operand::Replaceable(_) => write!(f, "?"),
            Operand::SubQuery(query) => write!(f, "({})", query),
            Operand::Field(field) => write!(f, "{}", field),
            Operand::Function(function) => write!(f, "{}", function),
            Operand::Collection(items) => {
                let elements: Vec<String> = items.iter().map(|item| item.to_string()).collect();
                write!(f, "({})", elements.join(","))
            }
            Operand::Pattern(pattern) => write!(f, "'{}'", pattern.as_str()),
        }
    }
}

/// Comparison operators of a field evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOperator {
    Equals,
    Distinct,
    GreaterThan,
    GreaterThanOrEqual,
    SmallerThan,
    SmallerThanOrEqual,
    In,
    NotIn,
    Like,
}

impl FieldOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            FieldOperator::Equals => "=",
            FieldOperator::Distinct => "!=",
            FieldOperator::GreaterThan => ">",
            FieldOperator::GreaterThanOrEqual => ">=",
            FieldOperator::SmallerThan => "<",
            FieldOperator::SmallerThanOrEqual => "<=",
            FieldOperator::In => "IN",
            FieldOperator::NotIn => "NOT IN",
            FieldOperator::Like => "LIKE",
        }
    }
}

/// A single comparison between two operands.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldEvaluator {
    pub operator: FieldOperator,
    pub left: Operand,
    pub right: Operand,
}

impl FieldEvaluator {
    pub fn new(operator: FieldOperator, left: Operand, right: Operand) -> Self {
        Self {
            operator,
            left,
            right,
        }
    }
}

/// A node of the predicate collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluator {
    /// Always true, the unit left behind by [`Query::reduce`]
    True,
    /// A plain boolean operand evaluated for truthiness
    Boolean(Operand),
    /// A comparison
    Field(FieldEvaluator),
    /// Conjunction
    And(Vec<Evaluator>),
    /// Disjunction
    Or(Vec<Evaluator>),
}

impl Evaluator {
    pub fn equals(field: &str, value: impl Into<FieldValue>) -> Self {
        Evaluator::Field(FieldEvaluator::new(
            FieldOperator::Equals,
            Operand::field(field),
            Operand::literal(value),
        ))
    }

    pub fn compare(field: &str, operator: FieldOperator, value: impl Into<FieldValue>) -> Self {
        Evaluator::Field(FieldEvaluator::new(
            operator,
            Operand::field(field),
            Operand::literal(value),
        ))
    }

    /// `field IN (values)`, the shape the join planner pushes into neighbour
    /// subqueries.
    pub fn in_collection(field: QueryField, values: Vec<FieldValue>) -> Self {
        Evaluator::Field(FieldEvaluator::new(
            FieldOperator::In,
            Operand::Field(field),
            Operand::Collection(values.into_iter().map(Operand::Literal).collect()),
        ))
    }

    pub fn like(field: &str, pattern: impl Into<FieldValue>) -> Self {
        Evaluator::Field(FieldEvaluator::new(
            FieldOperator::Like,
            Operand::field(field),
            Operand::literal(pattern),
        ))
    }

    fn attach_resource(&mut self, resource: &QueryResource) {
        match self {
            Evaluator::Field(evaluator) => {
                evaluator.left.attach_resource(resource);
                evaluator.right.attach_resource(resource);
            }
            Evaluator::Boolean(operand) => operand.attach_resource(resource),
            Evaluator::And(children) | Evaluator::Or(children) => {
                for child in children {
                    child.attach_resource(resource);
                }
            }
            Evaluator::True => {}
        }
    }

    fn rename_resources(&mut self, aliases: &std::collections::HashMap<String, String>) {
        match self {
            Evaluator::Field(evaluator) => {
                evaluator.left.rename_resources(aliases);
                evaluator.right.rename_resources(aliases);
            }
            Evaluator::Boolean(operand) => operand.rename_resources(aliases),
            Evaluator::And(children) | Evaluator::Or(children) => {
                for child in children {
                    child.rename_resources(aliases);
                }
            }
            Evaluator::True => {}
        }
    }
}

impl fmt::Display for Evaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Evaluator::True => write!(f, "TRUE"),
            Evaluator::Boolean(operand) => write!(f, "{}", operand),
            Evaluator::Field(evaluator) => write!(
                f,
                "{} {} {}",
                evaluator.left,
                evaluator.operator.symbol(),
                evaluator.right
            ),
            Evaluator::And(children) => {
                let elements: Vec<String> =
                    children.iter().map(|child| child.to_string()).collect();
                write!(f, "({})", elements.join(" AND "))
            }
            Evaluator::Or(children) => {
                let elements: Vec<String> =
                    children.iter().map(|child| child.to_string()).collect();
                write!(f, "({})", elements.join(" OR "))
            }
        }
    }
}

/// An expression usable in return, group and order positions.
#[derive(Debug, Clone, PartialEq)]
pub enum ReturnValue {
    Field(QueryField),
    Function(QueryFunction),
}

impl ReturnValue {
    fn attach_resource(&mut self, resource: &QueryResource) {
        match self {
            ReturnValue::Field(field) => field.attach_resource(resource),
            ReturnValue::Function(function) => function.attach_resource(resource),
        }
    }

    fn rename_resources(&mut self, aliases: &std::collections::HashMap<String, String>) {
        match self {
            ReturnValue::Field(field) => field.rename_resource(aliases),
            ReturnValue::Function(function) => function.rename_resources(aliases),
        }
    }
}

impl fmt::Display for ReturnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnValue::Field(field) => write!(f, "{}", field),
            ReturnValue::Function(function) => write!(f, "{}", function),
        }
    }
}

/// A return item, optionally aliased.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnParameter {
    pub value: ReturnValue,
    pub alias: Option<String>,
}

impl ReturnParameter {
    pub fn field(name: &str, alias: Option<String>) -> Self {
        Self {
            value: ReturnValue::Field(QueryField::new(name)),
            alias,
        }
    }

    /// The name this item projects under: its alias or its textual form.
    pub fn label(&self) -> String {
        match &self.alias {
            Some(alias) => alias.clone(),
            None => match &self.value {
                ReturnValue::Field(field) => field.field_name().to_string(),
                ReturnValue::Function(function) => function.to_string(),
            },
        }
    }
}

/// An order item with its direction.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderParameter {
    pub value: ReturnValue,
    pub desc: bool,
}

impl OrderParameter {
    pub fn field(name: &str, desc: bool) -> Self {
        Self {
            value: ReturnValue::Field(QueryField::new(name)),
            desc,
        }
    }
}

/// Join kinds. Plain `JOIN` behaves as `INNER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Join,
    Inner,
    Left,
    Right,
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinType::Join => write!(f, "JOIN"),
            JoinType::Inner => write!(f, "INNER"),
            JoinType::Left => write!(f, "LEFT"),
            JoinType::Right => write!(f, "RIGHT"),
        }
    }
}

/// A join against another resource: the equality pair plus any extra
/// predicates written after it.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub resource: QueryResource,
    pub join_type: JoinType,
    pub left_field: QueryField,
    pub right_field: QueryField,
    pub evaluators: Vec<Evaluator>,
}

impl Join {
    pub fn new(
        resource: impl Into<String>,
        join_type: JoinType,
        left_field: QueryField,
        right_field: QueryField,
    ) -> Self {
        Self {
            resource: QueryResource::new(resource),
            join_type,
            left_field,
            right_field,
            evaluators: Vec::new(),
        }
    }

    pub fn resource_name(&self) -> &str {
        self.resource.name()
    }
}

/// A complete query.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    resource: QueryResource,
    return_parameters: Vec<ReturnParameter>,
    group_parameters: Vec<ReturnParameter>,
    order_parameters: Vec<OrderParameter>,
    joins: Vec<Join>,
    evaluators: Vec<Evaluator>,
    limit: Option<usize>,
    start: Option<usize>,
    return_all: bool,
}

impl Query {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: QueryResource::new(resource),
            return_parameters: Vec::new(),
            group_parameters: Vec::new(),
            order_parameters: Vec::new(),
            joins: Vec::new(),
            evaluators: Vec::new(),
            limit: None,
            start: None,
            return_all: false,
        }
    }

    pub fn resource(&self) -> &QueryResource {
        &self.resource
    }

    pub fn resource_name(&self) -> &str {
        self.resource.name()
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn set_limit(&mut self, limit: Option<usize>) {
        self.limit = limit;
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start(&self) -> Option<usize> {
        self.start
    }

    pub fn set_start(&mut self, start: Option<usize>) {
        self.start = start;
    }

    pub fn with_start(mut self, start: usize) -> Self {
        self.start = Some(start);
        self
    }

    /// The query returns every field when `*` was selected or nothing was.
    pub fn returns_all(&self) -> bool {
        self.return_all || self.return_parameters.is_empty()
    }

    pub fn set_return_all(&mut self, return_all: bool) {
        self.return_all = return_all;
    }

    pub fn return_parameters(&self) -> &[ReturnParameter] {
        &self.return_parameters
    }

    pub fn group_parameters(&self) -> &[ReturnParameter] {
        &self.group_parameters
    }

    pub fn order_parameters(&self) -> &[OrderParameter] {
        &self.order_parameters
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    pub fn evaluators(&self) -> &[Evaluator] {
        &self.evaluators
    }

    /// Add a return field by name. `*` switches the query to return-all.
    pub fn add_return_field(&mut self, name: &str) -> &mut Self {
        if name.trim() == "*" {
            self.return_all = true;
        } else {
            self.add_return_parameter(ReturnParameter::field(name, None));
        }
        self
    }

    pub fn add_return_parameter(&mut self, mut parameter: ReturnParameter) -> &mut Self {
        parameter.value.attach_resource(&self.resource);
        self.return_parameters.push(parameter);
        self
    }

    pub fn add_group_parameter(&mut self, mut parameter: ReturnParameter) -> &mut Self {
        parameter.value.attach_resource(&self.resource);
        self.group_parameters.push(parameter);
        self
    }

    pub fn add_order_field(&mut self, name: &str, desc: bool) -> &mut Self {
        self.add_order_parameter(OrderParameter::field(name, desc))
    }

    pub fn add_order_parameter(&mut self, mut parameter: OrderParameter) -> &mut Self {
        parameter.value.attach_resource(&self.resource);
        self.order_parameters.push(parameter);
        self
    }

    pub fn add_join(&mut self, mut join: Join) -> &mut Self {
        join.left_field.attach_resource(&self.resource);
        let join_resource = join.resource.clone();
        join.right_field.attach_resource(&join_resource);
        for evaluator in &mut join.evaluators {
            evaluator.attach_resource(&join_resource);
        }
        self.joins.push(join);
        self
    }

    /// Add a predicate. Unqualified field references are attached to the
    /// query resource.
    pub fn add_evaluator(&mut self, mut evaluator: Evaluator) -> &mut Self {
        evaluator.attach_resource(&self.resource);
        self.evaluators.push(evaluator);
        self
    }

    /// Replace alias qualifications with the resources they name, after the
    /// whole statement has been parsed. Subqueries carry their own scope and
    /// are left alone.
    pub(crate) fn resolve_aliases(&mut self, aliases: &std::collections::HashMap<String, String>) {
        if aliases.is_empty() {
            return;
        }
        for parameter in &mut self.return_parameters {
            parameter.value.rename_resources(aliases);
        }
        for parameter in &mut self.group_parameters {
            parameter.value.rename_resources(aliases);
        }
        for parameter in &mut self.order_parameters {
            parameter.value.rename_resources(aliases);
        }
        for evaluator in &mut self.evaluators {
            evaluator.rename_resources(aliases);
        }
        for join in &mut self.joins {
            join.left_field.rename_resource(aliases);
            join.right_field.rename_resource(aliases);
            for evaluator in &mut join.evaluators {
                evaluator.rename_resources(aliases);
            }
        }
    }

    /// Copy of this query with every evaluator contained in
    /// `evaluators_to_remove` replaced by [`Evaluator::True`], recursively.
    /// The reduced copy evaluates identically wherever the removed predicates
    /// are known to hold.
    pub fn reduce(&self, evaluators_to_remove: &[Evaluator]) -> Query {
        let mut copy = self.clone();
        if !evaluators_to_remove.is_empty() {
            reduce_collection(&mut copy.evaluators, evaluators_to_remove);
        }
        copy
    }

    /// Reduce every evaluator comparing `field_name` with one of `operators`.
    pub fn reduce_field_evaluator(
        &self,
        field_name: &str,
        operators: &[FieldOperator],
    ) -> Query {
        let matches = self.collect_field_evaluators(field_name, operators);
        self.reduce(&matches)
    }

    /// All the evaluators whose left side references `field_name` with one of
    /// the given operators, searched recursively.
    pub fn collect_field_evaluators(
        &self,
        field_name: &str,
        operators: &[FieldOperator],
    ) -> Vec<Evaluator> {
        let mut matches = Vec::new();
        collect_field_evaluators(&self.evaluators, field_name, operators, &mut matches);
        matches
    }
}

fn reduce_collection(evaluators: &mut [Evaluator], to_remove: &[Evaluator]) {
    for evaluator in evaluators.iter_mut() {
        if to_remove.contains(evaluator) {
            *evaluator = Evaluator::True;
        } else if let Evaluator::And(children) | Evaluator::Or(children) = evaluator {
            reduce_collection(children, to_remove);
        }
    }
}

fn collect_field_evaluators(
    evaluators: &[Evaluator],
    field_name: &str,
    operators: &[FieldOperator],
    matches: &mut Vec<Evaluator>,
) {
    for evaluator in evaluators {
        match evaluator {
            Evaluator::Field(field_evaluator) => {
                if let Operand::Field(field) = &field_evaluator.left {
                    if field.field_name() == field_name
                        && operators.contains(&field_evaluator.operator)
                    {
                        matches.push(evaluator.clone());
                    }
                }
            }
            Evaluator::And(children) | Evaluator::Or(children) => {
                collect_field_evaluators(children, field_name, operators, matches);
            }
            _ => {}
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SELECT ")?;
        if self.return_all || self.return_parameters.is_empty() {
            write!(f, "*")?;
            if !self.return_parameters.is_empty() {
                write!(f, ",")?;
            }
        }
        let items: Vec<String> = self
            .return_parameters
            .iter()
            .map(|parameter| match &parameter.alias {
                Some(alias) => format!("{} AS {}", parameter.value, alias),
                None => parameter.value.to_string(),
            })
            .collect();
        write!(f, "{}", items.join(","))?;

        write!(f, " FROM {}", self.resource)?;

        for join in &self.joins {
            if join.join_type != JoinType::Join {
                write!(f, " {}", join.join_type)?;
            }
            write!(
                f,
                " JOIN {} ON {} = {}",
                join.resource, join.left_field, join.right_field
            )?;
            if !join.evaluators.is_empty() {
                let elements: Vec<String> = join
                    .evaluators
                    .iter()
                    .map(|evaluator| evaluator.to_string())
                    .collect();
                write!(f, " AND {}", elements.join(" AND "))?;
            }
        }

        if !self.evaluators.is_empty() {
            let elements: Vec<String> = self
                .evaluators
                .iter()
                .map(|evaluator| evaluator.to_string())
                .collect();
            write!(f, " WHERE {}", elements.join(" AND "))?;
        }

        if !self.group_parameters.is_empty() {
            let items: Vec<String> = self
                .group_parameters
                .iter()
                .map(|parameter| parameter.value.to_string())
                .collect();
            write!(f, " GROUP BY {}", items.join(","))?;
        }

        if !self.order_parameters.is_empty() {
            let items: Vec<String> = self
                .order_parameters
                .iter()
                .map(|parameter| {
                    if parameter.desc {
                        format!("{} DESC", parameter.value)
                    } else {
                        parameter.value.to_string()
                    }
                })
                .collect();
            write!(f, " ORDER BY {}", items.join(","))?;
        }

        if let Some(start) = self.start {
            write!(f, " START {}", start)?;
        }

        if let Some(limit) = self.limit {
            write!(f, " LIMIT {}", limit)?;
        }

        Ok(())
    }
}

/// Field name queries travel under when parceled for persistence or the
/// wire.
pub const QUERY_PARCEL_FIELD: &str = "__query__";

impl serde::Serialize for Query {
    /// A query parcels as a single-field document holding its textual form.
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(QUERY_PARCEL_FIELD, &self.to_string())?;
        map.end()
    }
}

impl<'de> serde::Deserialize<'de> for Query {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(serde::Deserialize)]
        struct Parcel {
            #[serde(rename = "__query__")]
            query: String,
        }
        let parcel = Parcel::deserialize(deserializer)?;
        Query::compile(&parcel.query).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_parsing() {
        let field = QueryField::new("people.tags[2]");
        assert_eq!(field.resource().unwrap().name(), "people");
        assert_eq!(field.field_name(), "tags");
        assert_eq!(field.index(), Some("2"));
        assert_eq!(field.to_string(), "people.tags[2]");
    }

    #[test]
    fn test_unqualified_field_attaches_resource() {
        let mut query = Query::new("people");
        query.add_evaluator(Evaluator::equals("name", "alice"));
        match &query.evaluators()[0] {
            Evaluator::Field(evaluator) => match &evaluator.left {
                Operand::Field(field) => {
                    assert_eq!(field.resource().unwrap().name(), "people");
                    // Inferred qualification does not leak into the textual form
                    assert_eq!(field.to_string(), "name");
                }
                other => panic!("Expected field operand, got {:?}", other),
            },
            other => panic!("Expected field evaluator, got {:?}", other),
        }
    }

    #[test]
    fn test_display_round_shape() {
        let mut query = Query::new("people");
        query.add_return_field("name");
        query.add_return_parameter(ReturnParameter {
            value: ReturnValue::Field(QueryField::new("age")),
            alias: Some("years".to_string()),
        });
        query.add_evaluator(Evaluator::compare(
            "age",
            FieldOperator::GreaterThanOrEqual,
            18i64,
        ));
        query.add_order_field("age", true);
        query.set_limit(Some(2));

        assert_eq!(
            query.to_string(),
            "SELECT name,age AS years FROM people WHERE age >= 18 ORDER BY age DESC LIMIT 2"
        );
    }

    #[test]
    fn test_reduce_replaces_with_true() {
        let mut query = Query::new("people");
        let target = Evaluator::equals("name", "alice");
        query.add_evaluator(target.clone());
        query.add_evaluator(Evaluator::compare(
            "age",
            FieldOperator::GreaterThan,
            21i64,
        ));

        // Reduce matches the stored evaluator, which carries the inferred
        // resource on its field operand.
        let attached = query.evaluators()[0].clone();
        let reduced = query.reduce(&[attached]);
        assert_eq!(reduced.evaluators()[0], Evaluator::True);
        assert_ne!(reduced.evaluators()[1], Evaluator::True);
    }

    #[test]
    fn test_returns_all_when_empty() {
        let query = Query::new("people");
        assert!(query.returns_all());
    }
}
