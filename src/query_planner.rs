use async_trait::async_trait;
use graphql_parser::query::{
    Definition, Directive, Document, Field, FragmentDefinition, Mutation, OperationDefinition,
    Query, Selection, SelectionSet, Value as GqlValue, VariableDefinition, parse_query,
};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::{GatewayError, Result};
use crate::{FederatedSchema, Fetch, GraphQLRequest, OperationKind, QueryPlan};

const TYPENAME: &str = "__typename";

#[async_trait]
pub trait QueryPlanner {
    async fn plan_query(
        &self,
        request: &GraphQLRequest,
        schema: &FederatedSchema,
    ) -> Result<QueryPlan>;
}

/// Routes each root field to the first service declaring it and sends every
/// service an operation holding only its own root fields.
///
/// Mutation fields keep their document order: the plan is split wherever the
/// owning service changes, so `addUser addBook updateUser` becomes three
/// fetches rather than two.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimpleQueryPlanner;

type Fragments<'d, 'a> = HashMap<&'d str, &'d FragmentDefinition<'a, String>>;

struct RootOperation<'d, 'a> {
    kind: OperationKind,
    name: Option<&'d String>,
    variable_definitions: &'d [VariableDefinition<'a, String>],
    directives: &'d [Directive<'a, String>],
    selection_set: &'d SelectionSet<'a, String>,
}

/// Variables and fragments referenced by a set of selections.
#[derive(Default)]
struct Usage {
    variables: BTreeSet<String>,
    fragments: BTreeSet<String>,
}

impl SimpleQueryPlanner {
    pub fn new() -> Self {
        SimpleQueryPlanner
    }

    fn select_operation<'d, 'a>(
        &self,
        document: &'d Document<'a, String>,
        operation_name: Option<&str>,
    ) -> Result<RootOperation<'d, 'a>> {
        let operations: Vec<&OperationDefinition<'a, String>> = document
            .definitions
            .iter()
            .filter_map(|definition| match definition {
                Definition::Operation(op) => Some(op),
                Definition::Fragment(_) => None,
            })
            .collect();

        let operation = match operation_name {
            Some(wanted) => operations
                .into_iter()
                .find(|op| operation_name_of(op) == Some(wanted))
                .ok_or_else(|| GatewayError::UnknownOperation(wanted.to_string()))?,
            None => match operations.as_slice() {
                [op] => *op,
                [] => {
                    return Err(GatewayError::QueryParse(
                        "document contains no operation".to_string(),
                    ));
                }
                _ => return Err(GatewayError::AmbiguousOperation),
            },
        };

        match operation {
            OperationDefinition::SelectionSet(selection_set) => Ok(RootOperation {
                kind: OperationKind::Query,
                name: None,
                variable_definitions: &[],
                directives: &[],
                selection_set,
            }),
            OperationDefinition::Query(q) => Ok(RootOperation {
                kind: OperationKind::Query,
                name: q.name.as_ref(),
                variable_definitions: &q.variable_definitions,
                directives: &q.directives,
                selection_set: &q.selection_set,
            }),
            OperationDefinition::Mutation(m) => Ok(RootOperation {
                kind: OperationKind::Mutation,
                name: m.name.as_ref(),
                variable_definitions: &m.variable_definitions,
                directives: &m.directives,
                selection_set: &m.selection_set,
            }),
            OperationDefinition::Subscription(_) => Err(GatewayError::SubscriptionsDisabled),
        }
    }

    fn find_service_for_field<'s>(
        &self,
        kind: OperationKind,
        field_name: &str,
        schema: &'s FederatedSchema,
    ) -> Option<&'s String> {
        let key = format!("{}.{}", kind.root_type(), field_name);
        schema.services_for(&key).first()
    }

    fn build_service_query<'a>(
        &self,
        root: &RootOperation<'_, 'a>,
        fields: Vec<Field<'a, String>>,
        fragments: &Fragments<'_, 'a>,
        definitions: &[Definition<'a, String>],
    ) -> (String, Usage) {
        let selection_set = SelectionSet {
            span: root.selection_set.span,
            items: fields.into_iter().map(Selection::Field).collect(),
        };

        let mut usage = Usage::default();
        collect_directives(root.directives, &mut usage);
        collect_selection_set(&selection_set, fragments, &mut usage);

        let variable_definitions = root
            .variable_definitions
            .iter()
            .filter(|def| usage.variables.contains(&def.name))
            .cloned()
            .collect();

        let position = root.selection_set.span.0;
        let operation = match root.kind {
            OperationKind::Query => OperationDefinition::Query(Query {
                position,
                name: root.name.cloned(),
                variable_definitions,
                directives: root.directives.to_vec(),
                selection_set,
            }),
            OperationKind::Mutation => OperationDefinition::Mutation(Mutation {
                position,
                name: root.name.cloned(),
                variable_definitions,
                directives: root.directives.to_vec(),
                selection_set,
            }),
        };

        let mut service_definitions = vec![Definition::Operation(operation)];
        service_definitions.extend(definitions.iter().filter_map(|definition| match definition {
            Definition::Fragment(fragment) if usage.fragments.contains(&fragment.name) => {
                Some(Definition::Fragment(fragment.clone()))
            }
            _ => None,
        }));

        let document = Document {
            definitions: service_definitions,
        };

        (document.to_string(), usage)
    }
}

#[async_trait]
impl QueryPlanner for SimpleQueryPlanner {
    async fn plan_query(
        &self,
        request: &GraphQLRequest,
        schema: &FederatedSchema,
    ) -> Result<QueryPlan> {
        let document = parse_query::<String>(&request.query)
            .map_err(|e| GatewayError::QueryParse(e.to_string()))?;

        let fragments: Fragments<'_, '_> = document
            .definitions
            .iter()
            .filter_map(|definition| match definition {
                Definition::Fragment(fragment) => Some((fragment.name.as_str(), fragment)),
                Definition::Operation(_) => None,
            })
            .collect();

        let root = self.select_operation(&document, request.operation_name.as_deref())?;

        let variables = match &request.variables {
            Some(Value::Object(variables)) => Some(variables),
            _ => None,
        };
        let conditions = Conditions {
            variables,
            definitions: root.variable_definitions,
        };

        let mut root_fields = Vec::new();
        flatten_root_selections(
            root.selection_set,
            &fragments,
            &conditions,
            &mut HashSet::new(),
            &mut root_fields,
        )?;

        // Insertion ordered so root `__typename` lands on the first routed service.
        let mut groups: Vec<(String, Vec<Field<'_, String>>)> = Vec::new();
        let mut typenames = Vec::new();

        for field in root_fields {
            if field.name == TYPENAME {
                typenames.push(field);
                continue;
            }

            let service_name = self
                .find_service_for_field(root.kind, &field.name, schema)
                .ok_or_else(|| GatewayError::NoServiceForField(field.name.clone()))?;

            let group = match root.kind {
                OperationKind::Query => groups.iter_mut().find(|(name, _)| name == service_name),
                OperationKind::Mutation => groups
                    .last_mut()
                    .filter(|(name, _)| name == service_name),
            };
            match group {
                Some((_, fields)) => fields.push(field),
                None => groups.push((service_name.clone(), vec![field])),
            }
        }

        match groups.first_mut() {
            Some((_, fields)) => fields.extend(typenames),
            None => return Err(GatewayError::EmptyPlan),
        }

        let mut plan = QueryPlan {
            kind: root.kind,
            fetches: Vec::with_capacity(groups.len()),
        };
        for (service_name, fields) in groups {
            let (query, usage) =
                self.build_service_query(&root, fields, &fragments, &document.definitions);

            let fetch_variables: Map<String, Value> = variables
                .into_iter()
                .flatten()
                .filter(|(name, _)| usage.variables.contains(*name))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();

            tracing::debug!(service = %service_name, %query, "planned subgraph operation");
            plan.fetches.push(Fetch {
                service_name,
                query,
                variables: Value::Object(fetch_variables),
            });
        }

        Ok(plan)
    }
}

fn operation_name_of<'d>(operation: &'d OperationDefinition<'_, String>) -> Option<&'d str> {
    match operation {
        OperationDefinition::SelectionSet(_) => None,
        OperationDefinition::Query(q) => q.name.as_deref(),
        OperationDefinition::Mutation(m) => m.name.as_deref(),
        OperationDefinition::Subscription(s) => s.name.as_deref(),
    }
}

/// Resolves `@skip` and `@include` on root selections. Fragments at the root
/// are flattened away, so their conditions must be decided here.
struct Conditions<'r, 'd, 'a> {
    variables: Option<&'r Map<String, Value>>,
    definitions: &'d [VariableDefinition<'a, String>],
}

impl Conditions<'_, '_, '_> {
    fn includes(&self, directives: &[Directive<'_, String>]) -> Result<bool> {
        for directive in directives {
            let included = match directive.name.as_str() {
                "skip" => !self.condition(directive)?,
                "include" => self.condition(directive)?,
                _ => continue,
            };
            if !included {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn condition(&self, directive: &Directive<'_, String>) -> Result<bool> {
        let value = match directive.arguments.iter().find(|(name, _)| name == "if") {
            Some((_, GqlValue::Boolean(value))) => Some(*value),
            Some((_, GqlValue::Variable(name))) => self.variable(name),
            _ => None,
        };

        value.ok_or_else(|| {
            GatewayError::QueryParse(format!(
                "`@{}` requires a Boolean `if` argument",
                directive.name
            ))
        })
    }

    fn variable(&self, name: &str) -> Option<bool> {
        if let Some(value) = self.variables.and_then(|variables| variables.get(name)) {
            return value.as_bool();
        }

        self.definitions
            .iter()
            .find(|def| def.name == name)
            .and_then(|def| match &def.default_value {
                Some(GqlValue::Boolean(value)) => Some(*value),
                _ => None,
            })
    }
}

/// Expands fragments at the root so every root field can be routed on its own.
/// Excluded fields and fragments are dropped before routing.
fn flatten_root_selections<'a>(
    selection_set: &SelectionSet<'a, String>,
    fragments: &Fragments<'_, 'a>,
    conditions: &Conditions<'_, '_, '_>,
    visited: &mut HashSet<String>,
    out: &mut Vec<Field<'a, String>>,
) -> Result<()> {
    for selection in &selection_set.items {
        match selection {
            Selection::Field(field) => {
                if conditions.includes(&field.directives)? {
                    out.push(field.clone());
                }
            }
            Selection::InlineFragment(inline) => {
                if conditions.includes(&inline.directives)? {
                    flatten_root_selections(
                        &inline.selection_set,
                        fragments,
                        conditions,
                        visited,
                        out,
                    )?;
                }
            }
            Selection::FragmentSpread(spread) => {
                let fragment = fragments
                    .get(spread.fragment_name.as_str())
                    .ok_or_else(|| {
                        GatewayError::QueryParse(format!(
                            "unknown fragment `{}`",
                            spread.fragment_name
                        ))
                    })?;
                if conditions.includes(&spread.directives)?
                    && visited.insert(spread.fragment_name.clone())
                {
                    flatten_root_selections(
                        &fragment.selection_set,
                        fragments,
                        conditions,
                        visited,
                        out,
                    )?;
                }
            }
        }
    }
    Ok(())
}

fn collect_selection_set(
    selection_set: &SelectionSet<'_, String>,
    fragments: &Fragments<'_, '_>,
    usage: &mut Usage,
) {
    for selection in &selection_set.items {
        match selection {
            Selection::Field(field) => {
                for (_, value) in &field.arguments {
                    collect_value(value, usage);
                }
                collect_directives(&field.directives, usage);
                collect_selection_set(&field.selection_set, fragments, usage);
            }
            Selection::InlineFragment(inline) => {
                collect_directives(&inline.directives, usage);
                collect_selection_set(&inline.selection_set, fragments, usage);
            }
            Selection::FragmentSpread(spread) => {
                collect_directives(&spread.directives, usage);
                if usage.fragments.insert(spread.fragment_name.clone()) {
                    if let Some(fragment) = fragments.get(spread.fragment_name.as_str()) {
                        collect_directives(&fragment.directives, usage);
                        collect_selection_set(&fragment.selection_set, fragments, usage);
                    }
                }
            }
        }
    }
}

fn collect_directives(directives: &[Directive<'_, String>], usage: &mut Usage) {
    for directive in directives {
        for (_, value) in &directive.arguments {
            collect_value(value, usage);
        }
    }
}

fn collect_value(value: &GqlValue<'_, String>, usage: &mut Usage) {
    match value {
        GqlValue::Variable(name) => {
            usage.variables.insert(name.clone());
        }
        GqlValue::List(items) => items.iter().for_each(|item| collect_value(item, usage)),
        GqlValue::Object(fields) => fields.values().for_each(|item| collect_value(item, usage)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn schema() -> FederatedSchema {
        let mut type_to_service_map = HashMap::new();
        for (key, service) in [
            ("Query.getUser", "user-service"),
            ("Query.getAllBooks", "books-service"),
            ("Query.getBooks", "books-service"),
            ("Mutation.addUser", "user-service"),
            ("Mutation.updateUser", "user-service"),
            ("Mutation.addBook", "books-service"),
        ] {
            type_to_service_map.insert(key.to_string(), vec![service.to_string()]);
        }
        FederatedSchema {
            type_to_service_map,
        }
    }

    fn request(query: &str, variables: Option<Value>, operation_name: Option<&str>) -> GraphQLRequest {
        GraphQLRequest {
            query: query.to_string(),
            variables,
            operation_name: operation_name.map(str::to_string),
        }
    }

    async fn plan(request: GraphQLRequest) -> Result<QueryPlan> {
        SimpleQueryPlanner::new().plan_query(&request, &schema()).await
    }

    fn fetch<'p>(plan: &'p QueryPlan, service_name: &'p str) -> &'p Fetch {
        let mut fetches = plan.fetches_for(service_name);
        let fetch = fetches
            .next()
            .unwrap_or_else(|| panic!("no fetch planned for {service_name}"));
        assert!(fetches.next().is_none(), "more than one fetch for {service_name}");
        fetch
    }

    fn services(plan: &QueryPlan) -> Vec<&str> {
        plan.fetches
            .iter()
            .map(|fetch| fetch.service_name.as_str())
            .collect()
    }

    fn reparse(query: &str) -> Document<'_, String> {
        parse_query::<String>(query).expect("planned query must be valid GraphQL")
    }

    #[tokio::test]
    async fn single_service_query() {
        let plan = plan(request("{ getAllBooks { isbn } }", None, None))
            .await
            .unwrap();

        assert_eq!(plan.kind, OperationKind::Query);
        assert_eq!(services(&plan), vec!["books-service"]);
        let books = fetch(&plan, "books-service");
        assert!(books.query.contains("getAllBooks"));
        reparse(&books.query);
        assert_eq!(books.variables, json!({}));
    }

    #[tokio::test]
    async fn splits_fields_and_variables_per_service() {
        let query = r#"
            query Shelf($name: String!, $owner: String!) {
              getUser(username: $name) { fullname }
              getBooks(username: $owner) { bookname }
            }
        "#;
        let variables = json!({ "name": "ada", "owner": "grace" });

        let plan = plan(request(query, Some(variables), None)).await.unwrap();

        let users = fetch(&plan, "user-service");
        assert!(users.query.contains("getUser"));
        assert!(!users.query.contains("getBooks"));
        assert!(users.query.contains("$name"));
        assert!(!users.query.contains("$owner"));
        reparse(&users.query);

        let books = fetch(&plan, "books-service");
        assert!(books.query.contains("getBooks"));
        assert!(!books.query.contains("getUser"));
        reparse(&books.query);

        assert_eq!(users.variables, json!({ "name": "ada" }));
        assert_eq!(books.variables, json!({ "owner": "grace" }));
    }

    #[tokio::test]
    async fn keeps_only_fragments_each_service_uses() {
        let query = r#"
            query {
              getUser(username: "ada") { ...UserFields }
              getAllBooks { ...BookFields }
            }
            fragment UserFields on User { username fullname }
            fragment BookFields on Book { isbn }
        "#;

        let plan = plan(request(query, None, None)).await.unwrap();

        let users = &fetch(&plan, "user-service").query;
        assert!(users.contains("fragment UserFields"));
        assert!(!users.contains("fragment BookFields"));
        reparse(users);
    }

    #[tokio::test]
    async fn expands_root_fragments() {
        let query = r#"
            query { ...Root ... on Query { getAllBooks { isbn } } }
            fragment Root on Query { getUser(username: "ada") { fullname } }
        "#;

        let plan = plan(request(query, None, None)).await.unwrap();

        assert!(fetch(&plan, "user-service").query.contains("getUser"));
        assert!(fetch(&plan, "books-service").query.contains("getAllBooks"));
    }

    const CONDITIONAL_BOOKS: &str = r#"
        query Q($withBooks: Boolean!) {
          getUser(username: "a") { fullname }
          ... @include(if: $withBooks) { getAllBooks { isbn } }
        }
    "#;

    #[tokio::test]
    async fn excluded_root_fragment_is_not_routed() {
        let plan = plan(request(
            CONDITIONAL_BOOKS,
            Some(json!({ "withBooks": false })),
            None,
        ))
        .await
        .unwrap();

        assert_eq!(services(&plan), vec!["user-service"]);
        assert!(!fetch(&plan, "user-service").query.contains("getAllBooks"));
    }

    #[tokio::test]
    async fn included_root_fragment_is_routed() {
        let plan = plan(request(
            CONDITIONAL_BOOKS,
            Some(json!({ "withBooks": true })),
            None,
        ))
        .await
        .unwrap();

        assert_eq!(services(&plan), vec!["user-service", "books-service"]);
        let books = fetch(&plan, "books-service");
        assert!(books.query.contains("getAllBooks"));
        assert!(!books.query.contains("@include"));
        reparse(&books.query);
    }

    #[tokio::test]
    async fn skip_on_spreads_and_fields_is_honoured() {
        let query = r#"
            mutation M($skipBook: Boolean = true) {
              addUser(username: "ada", fullname: "Ada") { status }
              ...Book @skip(if: $skipBook)
              updateUser(username: "ada", fullname: "Ada L") @skip(if: true) { status }
            }
            fragment Book on Mutation {
              addBook(bookname: "Dune", isbn: "42", authorname: "Herbert", username: "ada") { status }
            }
        "#;

        let skipped = plan(request(query, None, None)).await.unwrap();
        assert_eq!(services(&skipped), vec!["user-service"]);
        assert!(!fetch(&skipped, "user-service").query.contains("updateUser"));

        let kept = plan(request(query, Some(json!({ "skipBook": false })), None))
            .await
            .unwrap();
        assert_eq!(services(&kept), vec!["user-service", "books-service"]);
    }

    #[tokio::test]
    async fn root_condition_without_boolean_is_rejected() {
        let query = "query Q($flag: Boolean) { ... @include(if: $flag) { getAllBooks { isbn } } }";

        assert!(matches!(
            plan(request(query, None, None)).await,
            Err(GatewayError::QueryParse(message)) if message.contains("@include")
        ));
    }

    #[tokio::test]
    async fn root_typename_goes_to_first_service() {
        let plan = plan(request("{ getUser(username: \"a\") { fullname } __typename }", None, None))
            .await
            .unwrap();

        assert!(fetch(&plan, "user-service").query.contains("__typename"));
    }

    #[tokio::test]
    async fn mutations_are_routed_by_mutation_fields() {
        let query = r#"
            mutation AddBook($isbn: String!) {
              addBook(bookname: "Dune", isbn: $isbn, authorname: "Herbert", username: "ada") { status }
            }
        "#;

        let plan = plan(request(query, Some(json!({ "isbn": "42" })), None))
            .await
            .unwrap();

        assert_eq!(plan.kind, OperationKind::Mutation);
        let books = fetch(&plan, "books-service");
        assert!(books.query.contains("mutation AddBook"));
        assert_eq!(books.variables, json!({ "isbn": "42" }));
    }

    #[tokio::test]
    async fn mutation_fetches_follow_field_order() {
        let query = r#"
            mutation {
              addUser(username: "ada", fullname: "Ada") { status }
              addBook(bookname: "Dune", isbn: "42", authorname: "Herbert", username: "ada") { status }
              updateUser(username: "ada", fullname: "Ada L") { status }
            }
        "#;

        let plan = plan(request(query, None, None)).await.unwrap();

        assert_eq!(
            services(&plan),
            vec!["user-service", "books-service", "user-service"]
        );
        assert!(plan.fetches[0].query.contains("addUser"));
        assert!(!plan.fetches[0].query.contains("updateUser"));
        assert!(plan.fetches[2].query.contains("updateUser"));
    }

    #[tokio::test]
    async fn adjacent_mutation_fields_share_a_fetch() {
        let query = r#"
            mutation {
              addUser(username: "ada", fullname: "Ada") { status }
              updateUser(username: "ada", fullname: "Ada L") { status }
            }
        "#;

        let plan = plan(request(query, None, None)).await.unwrap();

        let users = fetch(&plan, "user-service");
        assert!(users.query.contains("addUser"));
        assert!(users.query.contains("updateUser"));
    }

    #[tokio::test]
    async fn selects_named_operation() {
        let query = "query A { getAllBooks { isbn } } query B { getUser(username: \"x\") { fullname } }";

        let plan = plan(request(query, None, Some("B"))).await.unwrap();
        assert_eq!(services(&plan), vec!["user-service"]);
        assert!(!fetch(&plan, "user-service").query.contains("getAllBooks"));
    }

    #[tokio::test]
    async fn operation_selection_errors() {
        let query = "query A { getAllBooks { isbn } } query B { getAllBooks { isbn } }";

        assert!(matches!(
            plan(request(query, None, None)).await,
            Err(GatewayError::AmbiguousOperation)
        ));
        assert!(matches!(
            plan(request(query, None, Some("C"))).await,
            Err(GatewayError::UnknownOperation(name)) if name == "C"
        ));
    }

    #[tokio::test]
    async fn rejects_subscriptions() {
        assert!(matches!(
            plan(request("subscription { getAllBooks { isbn } }", None, None)).await,
            Err(GatewayError::SubscriptionsDisabled)
        ));
    }

    #[tokio::test]
    async fn unroutable_and_empty_queries() {
        assert!(matches!(
            plan(request("{ nope }", None, None)).await,
            Err(GatewayError::NoServiceForField(field)) if field == "nope"
        ));
        assert!(matches!(
            plan(request("{ __typename }", None, None)).await,
            Err(GatewayError::EmptyPlan)
        ));
        assert!(matches!(
            plan(request("{ getUser(", None, None)).await,
            Err(GatewayError::QueryParse(_))
        ));
    }
}
