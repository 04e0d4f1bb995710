//! Convenience getters and REST wrappers built on the client.

use chrono::{DateTime, SecondsFormat, Utc};
use hogql::{Direction, FilterValue, Operator, QueryFilter, Select, escape_like_pattern};
use serde_json::{Map, Value, json};
use strum::AsRefStr;
use tracing::debug;

use crate::client::PostHogClient;
use crate::error::{DriverError, DriverResult};
use crate::executor::ApiRequest;
use crate::records::QueryResult;
use crate::schema::{EntityType, parse_entity_type};

pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_LIMIT: u32 = 10_000;

const EVENT_COLUMNS: [&str; 5] = ["uuid", "event", "distinct_id", "timestamp", "properties"];
const PERSON_COLUMNS: [&str; 3] = ["id", "created_at", "properties"];
const SESSION_COLUMNS: [&str; 5] = [
    "session_id",
    "distinct_id",
    "$start_timestamp",
    "$end_timestamp",
    "$session_duration"
];

fn check_limit(limit: u32) -> DriverResult<u32> {
    if (1..=MAX_LIMIT).contains(&limit) {
        Ok(limit)
    } else {
        Err(DriverError::validation(
            "limit",
            format!("must be between 1 and {MAX_LIMIT}, got {limit}")
        ))
    }
}

fn check_range(after: Option<DateTime<Utc>>, before: Option<DateTime<Utc>>) -> DriverResult<()> {
    match (after, before) {
        (Some(after), Some(before)) if after > before => Err(DriverError::validation(
            "after",
            format!("{after} is later than {before}")
        )),
        _ => Ok(())
    }
}

fn property_filter(
    mut filter: QueryFilter,
    prefix: &str,
    properties: &[(String, FilterValue)]
) -> QueryFilter {
    for (key, value) in properties {
        filter = filter.where_equals(format!("{prefix}.{key}"), value.clone());
    }
    filter
}

/// Filter for [`PostHogClient::get_events`].
#[derive(Debug, Clone, PartialEq)]
pub struct EventFilter {
    pub event: Option<String>,
    pub distinct_id: Option<String>,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    pub properties: Vec<(String, FilterValue)>,
    pub limit: u32
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            event: None,
            distinct_id: None,
            after: None,
            before: None,
            properties: Vec::new(),
            limit: DEFAULT_LIMIT
        }
    }
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    #[must_use]
    pub fn distinct_id(mut self, distinct_id: impl Into<String>) -> Self {
        self.distinct_id = Some(distinct_id.into());
        self
    }

    #[must_use]
    pub fn after(mut self, after: DateTime<Utc>) -> Self {
        self.after = Some(after);
        self
    }

    #[must_use]
    pub fn before(mut self, before: DateTime<Utc>) -> Self {
        self.before = Some(before);
        self
    }

    /// Matches `properties.<key> = value`.
    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn to_hogql(&self) -> DriverResult<String> {
        let limit = check_limit(self.limit)?;
        check_range(self.after, self.before)?;

        let mut filter = QueryFilter::new();
        if let Some(event) = &self.event {
            filter = filter.where_equals("event", event);
        }
        if let Some(distinct_id) = &self.distinct_id {
            filter = filter.where_equals("distinct_id", distinct_id);
        }
        if let Some(after) = self.after {
            filter = filter.where_gte("timestamp", after);
        }
        if let Some(before) = self.before {
            filter = filter.where_lte("timestamp", before);
        }
        filter = property_filter(filter, "properties", &self.properties);

        Ok(Select::from("events")
            .columns(EVENT_COLUMNS)
            .filter(filter)
            .order_by("timestamp", Direction::Desc)
            .limit(limit)
            .build())
    }
}

/// Filter for [`PostHogClient::get_persons`].
#[derive(Debug, Clone, PartialEq)]
pub struct PersonFilter {
    /// Case-insensitive substring match on `properties.email`.
    pub search: Option<String>,
    /// Restricts to members of this cohort.
    pub cohort: Option<i64>,
    pub properties: Vec<(String, FilterValue)>,
    pub limit: u32
}

impl Default for PersonFilter {
    fn default() -> Self {
        Self {
            search: None,
            cohort: None,
            properties: Vec::new(),
            limit: DEFAULT_LIMIT
        }
    }
}

impl PersonFilter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    #[must_use]
    pub fn cohort(mut self, cohort_id: i64) -> Self {
        self.cohort = Some(cohort_id);
        self
    }

    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn to_hogql(&self) -> DriverResult<String> {
        let limit = check_limit(self.limit)?;

        let mut filter = QueryFilter::new();
        if let Some(search) = self.search.as_deref().filter(|s| !s.trim().is_empty()) {
            let pattern = format!("%{}%", escape_like_pattern(search));
            filter = filter.where_op("properties.email", Operator::ILike, pattern);
        }
        if let Some(cohort_id) = self.cohort {
            filter = filter.where_op("id", Operator::InCohort, cohort_id);
        }
        filter = property_filter(filter, "properties", &self.properties);

        Ok(Select::from("persons")
            .columns(PERSON_COLUMNS)
            .filter(filter)
            .order_by("created_at", Direction::Desc)
            .limit(limit)
            .build())
    }
}

/// Filter for [`PostHogClient::get_sessions`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionFilter {
    pub distinct_id: Option<String>,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    pub limit: u32
}

impl Default for SessionFilter {
    fn default() -> Self {
        Self {
            distinct_id: None,
            after: None,
            before: None,
            limit: DEFAULT_LIMIT
        }
    }
}

impl SessionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn distinct_id(mut self, distinct_id: impl Into<String>) -> Self {
        self.distinct_id = Some(distinct_id.into());
        self
    }

    #[must_use]
    pub fn after(mut self, after: DateTime<Utc>) -> Self {
        self.after = Some(after);
        self
    }

    #[must_use]
    pub fn before(mut self, before: DateTime<Utc>) -> Self {
        self.before = Some(before);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn to_hogql(&self) -> DriverResult<String> {
        let limit = check_limit(self.limit)?;
        check_range(self.after, self.before)?;

        let mut filter = QueryFilter::new();
        if let Some(distinct_id) = &self.distinct_id {
            filter = filter.where_equals("distinct_id", distinct_id);
        }
        if let Some(after) = self.after {
            filter = filter.where_gte("$start_timestamp", after);
        }
        if let Some(before) = self.before {
            filter = filter.where_lte("$start_timestamp", before);
        }

        Ok(Select::from("sessions")
            .columns(SESSION_COLUMNS)
            .filter(filter)
            .order_by("$start_timestamp", Direction::Desc)
            .limit(limit)
            .build())
    }
}

fn export_hogql(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    event_names: &[String],
    properties: &Map<String, Value>
) -> DriverResult<String> {
    if start > end {
        return Err(DriverError::validation(
            "start",
            format!("{start} is later than {end}")
        ));
    }

    let mut filter = QueryFilter::new()
        .where_gte("timestamp", start)
        .where_lte("timestamp", end);
    if !event_names.is_empty() {
        filter = filter.where_in("event", event_names.to_vec());
    }
    let filter = filter.where_json_equals("properties.", properties)?;

    Ok(Select::from("events")
        .columns(EVENT_COLUMNS)
        .filter(filter)
        .order_by("timestamp", Direction::Asc)
        .build())
}

/// Visibility of an annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum AnnotationScope {
    #[default]
    Project,
    Organization,
    DashboardItem
}

fn timestamp_param(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// An id becomes one path segment under the project, so it may not carry
/// separators, dot segments or escapes that would move the request
/// elsewhere.
fn require_id(id: &str) -> DriverResult<&str> {
    let id = id.trim();
    if id.is_empty() {
        return Err(DriverError::validation("id", "entity id must not be empty"));
    }
    if id.contains(['/', '\\', '?', '#', '%']) || id.contains("..") || id.chars().any(char::is_control) {
        return Err(DriverError::validation(
            "id",
            "entity id must be a single path segment"
        ));
    }
    Ok(id)
}

impl PostHogClient {
    /// Most recent events matching `filter`, newest first.
    pub async fn get_events(&self, filter: &EventFilter) -> DriverResult<QueryResult> {
        let hogql = filter.to_hogql()?;
        self.query(&hogql).await
    }

    /// Every event in `[start, end]`, oldest first.
    pub async fn export_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        event_names: &[String],
        properties: &Map<String, Value>
    ) -> DriverResult<QueryResult> {
        let hogql = export_hogql(start, end, event_names, properties)?;
        debug!(%start, %end, events = event_names.len(), "Exporting events");
        self.query(&hogql).await
    }

    pub async fn get_persons(&self, filter: &PersonFilter) -> DriverResult<QueryResult> {
        let hogql = filter.to_hogql()?;
        self.query(&hogql).await
    }

    pub async fn get_sessions(&self, filter: &SessionFilter) -> DriverResult<QueryResult> {
        let hogql = filter.to_hogql()?;
        self.query(&hogql).await
    }

    /// Saved insights, optionally restricted to one type (`TRENDS`,
    /// `FUNNELS`, `RETENTION`, `PATHS`...).
    pub async fn get_insights(
        &self,
        insight_type: Option<&str>,
        limit: u32,
        offset: u32
    ) -> DriverResult<QueryResult> {
        let limit = check_limit(limit)?;
        let mut request = ApiRequest::get(self.project_path("insights/"))
            .with_query("limit", limit)
            .with_query("offset", offset);
        if let Some(kind) = insight_type {
            request = request.with_query("insight", kind.to_uppercase());
        }
        self.list(&request).await
    }

    pub async fn create_insight(
        &self,
        name: &str,
        insight_type: &str,
        filters: Map<String, Value>
    ) -> DriverResult<Value> {
        if name.trim().is_empty() {
            return Err(DriverError::validation("name", "insight name must not be empty"));
        }
        let mut all_filters = Map::new();
        all_filters.insert("insight".to_string(), json!(insight_type.to_uppercase()));
        all_filters.extend(filters);

        let request = ApiRequest::post(
            self.project_path("insights/"),
            json!({"name": name, "filters": all_filters})
        );
        self.send(&request).await?.require_json("create_insight")
    }

    pub async fn get_cohorts(&self, search: Option<&str>) -> DriverResult<QueryResult> {
        let mut request = ApiRequest::get(self.project_path("cohorts/"));
        if let Some(search) = search {
            request = request.with_query("search", search);
        }
        self.list(&request).await
    }

    pub async fn create_cohort(
        &self,
        name: &str,
        description: Option<&str>,
        filters: Value
    ) -> DriverResult<Value> {
        if name.trim().is_empty() {
            return Err(DriverError::validation("name", "cohort name must not be empty"));
        }
        let request = ApiRequest::post(
            self.project_path("cohorts/"),
            json!({
                "name": name,
                "description": description.unwrap_or_default(),
                "filters": filters
            })
        );
        self.send(&request).await?.require_json("create_cohort")
    }

    pub async fn get_feature_flags(&self) -> DriverResult<QueryResult> {
        self.list(&ApiRequest::get(self.project_path("feature_flags/")))
            .await
    }

    pub async fn get_experiments(&self) -> DriverResult<QueryResult> {
        self.list(&ApiRequest::get(self.project_path("experiments/")))
            .await
    }

    pub async fn get_annotations(
        &self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>
    ) -> DriverResult<QueryResult> {
        check_range(after, before)?;
        let mut request = ApiRequest::get(self.project_path("annotations/"));
        if let Some(after) = after {
            request = request.with_query("after", timestamp_param(after));
        }
        if let Some(before) = before {
            request = request.with_query("before", timestamp_param(before));
        }
        self.list(&request).await
    }

    pub async fn create_annotation(
        &self,
        content: &str,
        date_marker: DateTime<Utc>,
        scope: AnnotationScope
    ) -> DriverResult<Value> {
        if content.trim().is_empty() {
            return Err(DriverError::validation("content", "annotation content must not be empty"));
        }
        let request = ApiRequest::post(
            self.project_path("annotations/"),
            json!({
                "content": content,
                "scope": scope.as_ref(),
                "date_marker": timestamp_param(date_marker)
            })
        );
        self.send(&request).await?.require_json("create_annotation")
    }

    pub async fn get_project_info(&self) -> DriverResult<Value> {
        self.send(&ApiRequest::get(self.project_path("")))
            .await?
            .require_json("get_project_info")
    }

    /// Verifies that the API is reachable and the credentials are accepted.
    pub async fn health_check(&self) -> DriverResult<()> {
        self.send(&ApiRequest::get(self.project_path(""))).await?;
        Ok(())
    }

    pub async fn list_entities(
        &self,
        entity_type: &str,
        limit: u32,
        offset: u32
    ) -> DriverResult<QueryResult> {
        let limit = check_limit(limit)?;
        let request = ApiRequest::get(self.entity_path(entity_type, None)?)
            .with_query("limit", limit)
            .with_query("offset", offset);
        self.list(&request).await
    }

    pub async fn get_entity(&self, entity_type: &str, id: &str) -> DriverResult<Value> {
        let path = self.entity_path(entity_type, Some(id))?;
        self.send(&ApiRequest::get(path))
            .await?
            .require_json("get_entity")
    }

    pub async fn create_entity(&self, entity_type: &str, body: Value) -> DriverResult<Value> {
        let path = self.entity_path(entity_type, None)?;
        self.send(&ApiRequest::post(path, body))
            .await?
            .require_json("create_entity")
    }

    /// Partial update (`PATCH`).
    pub async fn update_entity(&self, entity_type: &str, id: &str, body: Value) -> DriverResult<Value> {
        let path = self.entity_path(entity_type, Some(id))?;
        self.send(&ApiRequest::patch(path, body))
            .await?
            .require_json("update_entity")
    }

    pub async fn delete_entity(&self, entity_type: &str, id: &str) -> DriverResult<()> {
        let path = self.entity_path(entity_type, Some(id))?;
        self.send(&ApiRequest::delete(path)).await?;
        Ok(())
    }

    async fn list(&self, request: &ApiRequest) -> DriverResult<QueryResult> {
        let response = self.send(request).await?;
        QueryResult::from_response(response.body)
    }

    fn entity_path(&self, entity_type: &str, id: Option<&str>) -> DriverResult<String> {
        let entity: EntityType = parse_entity_type(entity_type)?;
        let Some(collection) = entity.rest_path() else {
            return Err(DriverError::validation(
                "entity",
                format!("{entity} is only available through HogQL queries")
            ));
        };
        match id {
            Some(id) => Ok(self.project_path(&format!("{collection}/{}/", require_id(id)?))),
            None => Ok(self.project_path(&format!("{collection}/")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_event_filter_query() {
        let hogql = EventFilter::new()
            .event("User Signup")
            .after(at(1))
            .property("plan", "pro")
            .limit(50)
            .to_hogql()
            .unwrap();
        assert_eq!(
            hogql,
            "SELECT uuid, event, distinct_id, timestamp, properties FROM events \
             WHERE event = 'User Signup' \
             AND timestamp >= toDateTime('2024-01-01 00:00:00', 'UTC') \
             AND properties.plan = 'pro' \
             ORDER BY timestamp DESC LIMIT 50"
        );
    }

    #[test]
    fn test_event_filter_escapes_values() {
        let hogql = EventFilter::new().distinct_id("a' OR '1'='1").to_hogql().unwrap();
        assert!(hogql.contains("distinct_id = 'a'' OR ''1''=''1'"));
    }

    #[test]
    fn test_limit_bounds() {
        for bad in [0, MAX_LIMIT + 1] {
            match EventFilter::new().limit(bad).to_hogql() {
                Err(DriverError::Validation { field, .. }) => assert_eq!(field, "limit"),
                other => panic!("expected limit error, got {other:?}")
            }
        }
        assert!(EventFilter::new().limit(MAX_LIMIT).to_hogql().is_ok());
        assert!(SessionFilter::new().limit(0).to_hogql().is_err());
    }

    #[test]
    fn test_inverted_range_rejected() {
        assert!(EventFilter::new().after(at(5)).before(at(1)).to_hogql().is_err());
        assert!(export_hogql(at(5), at(1), &[], &Map::new()).is_err());
    }

    #[test]
    fn test_export_query() {
        let mut props = Map::new();
        props.insert("$browser".to_string(), json!("Chrome"));
        let hogql = export_hogql(
            at(1),
            at(31),
            &["$pageview".to_string(), "signup".to_string()],
            &props
        )
        .unwrap();
        assert!(hogql.contains("event IN ('$pageview', 'signup')"));
        assert!(hogql.contains("properties.$browser = 'Chrome'"));
        assert!(hogql.ends_with("ORDER BY timestamp ASC"));

        props.insert("nested".to_string(), json!({"a": 1}));
        assert!(matches!(
            export_hogql(at(1), at(2), &[], &props),
            Err(DriverError::Validation { .. })
        ));
    }

    #[test]
    fn test_person_search() {
        let hogql = PersonFilter::new().search("acme.com").limit(10).to_hogql().unwrap();
        assert!(hogql.contains("FROM persons WHERE properties.email ILIKE '%acme.com%'"));
        assert!(hogql.ends_with("LIMIT 10"));
    }

    #[test]
    fn test_person_search_matches_wildcards_literally() {
        let hogql = PersonFilter::new().search("first_last%").to_hogql().unwrap();
        assert!(hogql.contains("properties.email ILIKE '%first\\\\_last\\\\%%'"));
    }

    #[test]
    fn test_person_cohort() {
        let hogql = PersonFilter::new().cohort(7).search("acme").to_hogql().unwrap();
        assert!(hogql.contains("WHERE properties.email ILIKE '%acme%' AND id IN COHORT 7"));
    }

    #[test]
    fn test_ids_must_be_single_segments() {
        for id in ["../../999/cohorts/1", "1/2", "1?limit=5", "1#x", "%2e%2e", "..", "a\\b"] {
            match require_id(id) {
                Err(DriverError::Validation { field, .. }) => assert_eq!(field, "id"),
                other => panic!("expected id rejection for {id:?}, got {other:?}")
            }
        }
        assert_eq!(require_id(" 42 ").unwrap(), "42");
        assert_eq!(require_id("0190b6c3-7f1e-7c3a-9d1e-4a2b3c4d5e6f").unwrap().len(), 36);
    }

    #[test]
    fn test_session_query() {
        let hogql = SessionFilter::new().distinct_id("u1").to_hogql().unwrap();
        assert!(hogql.starts_with("SELECT session_id, distinct_id, $start_timestamp"));
        assert!(hogql.contains("FROM sessions WHERE distinct_id = 'u1'"));
        assert!(hogql.contains("ORDER BY $start_timestamp DESC LIMIT 100"));
    }

    #[test]
    fn test_annotation_scope_names() {
        assert_eq!(AnnotationScope::default().as_ref(), "project");
        assert_eq!(AnnotationScope::DashboardItem.as_ref(), "dashboard_item");
    }
}
