//! Static entity registry backing `list_objects` / `get_fields`.

use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Serialize, Serializer};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::error::{DriverError, DriverResult};
use FieldType::String as Text;
use FieldType::{Array, Boolean, Datetime, Number, Object};

/// PostHog object kinds exposed through the driver contract.
///
/// Declaration order is the order reported by [`list_entity_types`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display, EnumIter, EnumString, IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum EntityType {
    Events,
    Insights,
    Persons,
    Cohorts,
    FeatureFlags,
    Sessions,
    Annotations,
    Experiments,
    Dashboards,
    Actions,
    Surveys,
    SessionRecordings,
    Groups,
    EventDefinitions,
    PropertyDefinitions
}

impl EntityType {
    /// Collection segment under `/api/projects/{id}/`, or `None` for kinds
    /// that are only reachable through HogQL.
    pub fn rest_path(self) -> Option<&'static str> {
        match self {
            Self::Events | Self::Sessions => None,
            Self::Insights => Some("insights"),
            Self::Persons => Some("persons"),
            Self::Cohorts => Some("cohorts"),
            Self::FeatureFlags => Some("feature_flags"),
            Self::Annotations => Some("annotations"),
            Self::Experiments => Some("experiments"),
            Self::Dashboards => Some("dashboards"),
            Self::Actions => Some("actions"),
            Self::Surveys => Some("surveys"),
            Self::SessionRecordings => Some("session_recordings"),
            Self::Groups => Some("groups"),
            Self::EventDefinitions => Some("event_definitions"),
            Self::PropertyDefinitions => Some("property_definitions")
        }
    }

    pub fn schema(self) -> &'static EntitySchema {
        // Every variant has a row in SCHEMAS, in declaration order.
        &SCHEMAS[self as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Datetime,
    Object,
    Array
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub field_type: FieldType,
    pub description: &'static str
}

impl Serialize for FieldSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("FieldSpec", 2)?;
        state.serialize_field("type", &self.field_type)?;
        state.serialize_field("description", self.description)?;
        state.end()
    }
}

/// Field definitions of one entity type. Serializes as an ordered
/// `{field: {type, description}}` map.
#[derive(Debug, PartialEq, Eq)]
pub struct EntitySchema {
    pub entity: EntityType,
    pub fields: &'static [FieldSpec]
}

impl EntitySchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|f| f.name)
    }
}

impl Serialize for EntitySchema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for field in self.fields {
            map.serialize_entry(field.name, field)?;
        }
        map.end()
    }
}

/// Entity type names in stable order.
pub fn list_entity_types() -> Vec<&'static str> {
    EntityType::iter().map(<&'static str>::from).collect()
}

/// Field schema of `entity_type`; unknown names fail with `NotFound`.
pub fn get_schema(entity_type: &str) -> DriverResult<&'static EntitySchema> {
    parse_entity_type(entity_type).map(EntityType::schema)
}

pub fn parse_entity_type(entity_type: &str) -> DriverResult<EntityType> {
    entity_type.parse::<EntityType>().map_err(|_| DriverError::NotFound {
        resource: format!(
            "entity type '{entity_type}' (available: {})",
            list_entity_types().join(", ")
        )
    })
}

const fn field(name: &'static str, field_type: FieldType, description: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        field_type,
        description
    }
}

static SCHEMAS: [EntitySchema; 15] = [
    EntitySchema {
        entity: EntityType::Events,
        fields: &[
            field("uuid", Text, "Unique event ID"),
            field("event", Text, "Event name (e.g. \"$pageview\", \"User Signup\")"),
            field("timestamp", Datetime, "When the event occurred (ISO 8601)"),
            field("distinct_id", Text, "Identifier of the user or device that sent the event"),
            field("properties", Object, "Event properties (custom key-value pairs)"),
            field("person", Object, "Associated person with their properties")
        ]
    },
    EntitySchema {
        entity: EntityType::Insights,
        fields: &[
            field("id", Number, "Insight ID"),
            field("short_id", Text, "Short identifier used in insight URLs"),
            field("name", Text, "Insight name"),
            field("filters", Object, "Insight configuration (events, date ranges, filters)"),
            field("query", Object, "Query definition for query-based insights"),
            field("result", Array, "Computed insight results (trends, funnel steps, etc.)"),
            field("insight", Text, "Insight type: TRENDS, FUNNELS, RETENTION, PATHS"),
            field("created_at", Datetime, "Creation timestamp")
        ]
    },
    EntitySchema {
        entity: EntityType::Persons,
        fields: &[
            field("id", Text, "Person UUID"),
            field("distinct_ids", Array, "Distinct IDs merged into this person"),
            field("properties", Object, "Person properties (email, name, custom attributes)"),
            field("created_at", Datetime, "First seen timestamp")
        ]
    },
    EntitySchema {
        entity: EntityType::Cohorts,
        fields: &[
            field("id", Number, "Cohort ID"),
            field("name", Text, "Cohort name"),
            field("description", Text, "Cohort description"),
            field("filters", Object, "Cohort definition (behavioral/property filters)"),
            field("is_static", Boolean, "Whether membership is a fixed upload"),
            field("count", Number, "Number of persons in the cohort")
        ]
    },
    EntitySchema {
        entity: EntityType::FeatureFlags,
        fields: &[
            field("id", Number, "Flag ID"),
            field("key", Text, "Flag key used in code"),
            field("name", Text, "Flag description"),
            field("active", Boolean, "Whether the flag is active"),
            field("rollout_percentage", Number, "Percentage of users with the flag enabled"),
            field("filters", Object, "Targeting rules, groups and multivariate variants")
        ]
    },
    EntitySchema {
        entity: EntityType::Sessions,
        fields: &[
            field("session_id", Text, "Unique session ID"),
            field("distinct_id", Text, "User identifier"),
            field("$start_timestamp", Datetime, "Session start"),
            field("$end_timestamp", Datetime, "Session end"),
            field("$session_duration", Number, "Session length in seconds"),
            field("$pageview_count", Number, "Number of pageviews in the session"),
            field("$entry_current_url", Text, "First URL of the session")
        ]
    },
    EntitySchema {
        entity: EntityType::Annotations,
        fields: &[
            field("id", Number, "Annotation ID"),
            field("content", Text, "Annotation text"),
            field("date_marker", Datetime, "Date marked on the timeline"),
            field("scope", Text, "project, organization or dashboard_item"),
            field("created_at", Datetime, "Creation timestamp")
        ]
    },
    EntitySchema {
        entity: EntityType::Experiments,
        fields: &[
            field("id", Number, "Experiment ID"),
            field("name", Text, "Experiment name"),
            field("feature_flag_key", Text, "Feature flag backing the experiment"),
            field("parameters", Object, "Variants and minimum detectable effect"),
            field("start_date", Datetime, "Launch date"),
            field("end_date", Datetime, "Completion date"),
            field("results", Object, "Statistical analysis results")
        ]
    },
    EntitySchema {
        entity: EntityType::Dashboards,
        fields: &[
            field("id", Number, "Dashboard ID"),
            field("name", Text, "Dashboard name"),
            field("description", Text, "Dashboard description"),
            field("pinned", Boolean, "Whether the dashboard is pinned"),
            field("tiles", Array, "Insights and text cards on the dashboard"),
            field("created_at", Datetime, "Creation timestamp")
        ]
    },
    EntitySchema {
        entity: EntityType::Actions,
        fields: &[
            field("id", Number, "Action ID"),
            field("name", Text, "Action name"),
            field("steps", Array, "Event/URL/selector matchers composing the action"),
            field("created_at", Datetime, "Creation timestamp")
        ]
    },
    EntitySchema {
        entity: EntityType::Surveys,
        fields: &[
            field("id", Text, "Survey ID"),
            field("name", Text, "Survey name"),
            field("type", Text, "popover, api or widget"),
            field("questions", Array, "Survey questions"),
            field("start_date", Datetime, "Launch date"),
            field("end_date", Datetime, "Completion date")
        ]
    },
    EntitySchema {
        entity: EntityType::SessionRecordings,
        fields: &[
            field("id", Text, "Recording (session) ID"),
            field("distinct_id", Text, "User identifier"),
            field("start_time", Datetime, "Recording start"),
            field("end_time", Datetime, "Recording end"),
            field("recording_duration", Number, "Duration in seconds"),
            field("click_count", Number, "Clicks captured in the recording")
        ]
    },
    EntitySchema {
        entity: EntityType::Groups,
        fields: &[
            field("group_type_index", Number, "Index of the group type (0-4)"),
            field("group_key", Text, "Group identifier (e.g. company ID)"),
            field("group_properties", Object, "Group properties"),
            field("created_at", Datetime, "First seen timestamp")
        ]
    },
    EntitySchema {
        entity: EntityType::EventDefinitions,
        fields: &[
            field("id", Text, "Definition ID"),
            field("name", Text, "Event name"),
            field("volume_30_day", Number, "Events received in the last 30 days"),
            field("last_seen_at", Datetime, "Last time the event was ingested")
        ]
    },
    EntitySchema {
        entity: EntityType::PropertyDefinitions,
        fields: &[
            field("id", Text, "Definition ID"),
            field("name", Text, "Property name"),
            field("property_type", Text, "String, Numeric, Boolean or DateTime"),
            field("is_numerical", Boolean, "Whether the property holds numbers")
        ]
    }
];
