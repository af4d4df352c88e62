//! Event schema registry and structural validation.
//!
//! Every publishable event type has an [`EventSchema`] describing which
//! event-level fields must be populated and, optionally, the shape of the
//! `data` payload (required/optional fields with expected primitive
//! types). Validation is fail-closed: an event type without a registered
//! schema is rejected. All problems are collected into one
//! [`ValidationReport`] rather than short-circuiting on the first.

use std::collections::HashMap;

use chrono::DateTime;
use serde_json::Value;

use crate::catalog;
use crate::event::DomainEvent;

// ---------------------------------------------------------------------------
// Field types
// ---------------------------------------------------------------------------

/// Expected primitive type of a `data` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    /// An RFC 3339 timestamp string.
    Date,
    Array,
    Object,
}

impl FieldType {
    /// Human-readable name used in error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::Array => "array",
            FieldType::Object => "object",
        }
    }

    /// Whether the JSON value satisfies this type.
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Date => value
                .as_str()
                .is_some_and(|s| DateTime::parse_from_rfc3339(s).is_ok()),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
        }
    }

    /// Short description of what a JSON value actually is.
    fn describe(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

// ---------------------------------------------------------------------------
// Event-level fields
// ---------------------------------------------------------------------------

/// Event-level fields a schema may require beyond what the struct itself
/// guarantees (non-empty strings, populated options, non-empty payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventField {
    Source,
    CorrelationId,
    CausationId,
    Data,
}

impl EventField {
    fn name(&self) -> &'static str {
        match self {
            EventField::Source => "source",
            EventField::CorrelationId => "correlationId",
            EventField::CausationId => "causationId",
            EventField::Data => "data",
        }
    }

    fn is_populated(&self, event: &DomainEvent) -> bool {
        match self {
            EventField::Source => !event.source.is_empty(),
            EventField::CorrelationId => {
                event.correlation_id.as_deref().is_some_and(|s| !s.is_empty())
            }
            EventField::CausationId => {
                event.causation_id.as_deref().is_some_and(|s| !s.is_empty())
            }
            EventField::Data => !event.data.is_empty(),
        }
    }
}

// ---------------------------------------------------------------------------
// Schemas
// ---------------------------------------------------------------------------

/// Expected shape of the `data` payload.
#[derive(Debug, Clone, Default)]
pub struct DataSchema {
    required: Vec<(String, FieldType)>,
    optional: Vec<(String, FieldType)>,
}

impl DataSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field that must be present with the given type.
    pub fn required(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.required.push((name.into(), field_type));
        self
    }

    /// Add a field that may be absent but is type-checked when present.
    pub fn optional(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.optional.push((name.into(), field_type));
        self
    }
}

/// Validation rules for one event type.
#[derive(Debug, Clone, Default)]
pub struct EventSchema {
    required_fields: Vec<EventField>,
    data: Option<DataSchema>,
}

impl EventSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require an event-level field to be populated.
    pub fn require(mut self, field: EventField) -> Self {
        self.required_fields.push(field);
        self
    }

    /// Attach a `data` payload schema.
    pub fn data(mut self, data: DataSchema) -> Self {
        self.data = Some(data);
        self
    }
}

// ---------------------------------------------------------------------------
// Validation report
// ---------------------------------------------------------------------------

/// Outcome of validating one event. `errors` lists every problem found.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn ok() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
        }
    }

    fn failed(errors: Vec<String>) -> Self {
        Self {
            is_valid: false,
            errors,
        }
    }

    /// All errors joined into one message, for error types and logs.
    pub fn summary(&self) -> String {
        self.errors.join("; ")
    }
}

// ---------------------------------------------------------------------------
// SchemaRegistry
// ---------------------------------------------------------------------------

/// Registry of event schemas keyed by dot-namespaced event type.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, EventSchema>,
}

impl SchemaRegistry {
    /// An empty registry. Every event is rejected until schemas are added.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the schema for an event type.
    pub fn register(&mut self, event_type: impl Into<String>, schema: EventSchema) {
        self.schemas.insert(event_type.into(), schema);
    }

    /// Whether a schema exists for the event type.
    pub fn contains(&self, event_type: &str) -> bool {
        self.schemas.contains_key(event_type)
    }

    /// Validate an event against its registered schema.
    ///
    /// Pure function over the registry and the event: no side effects, and
    /// every field problem is reported, not just the first.
    pub fn validate(&self, event: &DomainEvent) -> ValidationReport {
        let Some(schema) = self.schemas.get(&event.event_type) else {
            return ValidationReport::failed(vec![format!(
                "No schema registered for event type: {}",
                event.event_type
            )]);
        };

        let mut errors = Vec::new();

        if event.id.is_empty() {
            errors.push("id: must not be empty".to_string());
        }

        for field in &schema.required_fields {
            if !field.is_populated(event) {
                errors.push(format!("{}: required field missing", field.name()));
            }
        }

        if let Some(data_schema) = &schema.data {
            for (name, field_type) in &data_schema.required {
                match event.data.get(name) {
                    None => errors.push(format!("data.{name}: required field missing")),
                    Some(value) if !field_type.matches(value) => errors.push(format!(
                        "data.{name}: expected {}, got {}",
                        field_type.as_str(),
                        FieldType::describe(value)
                    )),
                    Some(_) => {}
                }
            }
            for (name, field_type) in &data_schema.optional {
                if let Some(value) = event.data.get(name) {
                    if !field_type.matches(value) {
                        errors.push(format!(
                            "data.{name}: expected {}, got {}",
                            field_type.as_str(),
                            FieldType::describe(value)
                        ));
                    }
                }
            }
        }

        if errors.is_empty() {
            ValidationReport::ok()
        } else {
            ValidationReport::failed(errors)
        }
    }

    /// Registry pre-loaded with the platform event catalog.
    pub fn platform_defaults() -> Self {
        let mut registry = Self::new();

        registry.register(
            catalog::EVENT_PAYMENT_SUCCEEDED,
            EventSchema::new().require(EventField::Data).data(
                DataSchema::new()
                    .required("amount", FieldType::Number)
                    .required("currency", FieldType::String)
                    .required("userId", FieldType::String)
                    .optional("invoiceId", FieldType::String),
            ),
        );
        registry.register(
            catalog::EVENT_PAYMENT_FAILED,
            EventSchema::new().require(EventField::Data).data(
                DataSchema::new()
                    .required("amount", FieldType::Number)
                    .required("currency", FieldType::String)
                    .required("userId", FieldType::String)
                    .optional("reason", FieldType::String),
            ),
        );
        registry.register(
            catalog::EVENT_PAYMENT_REFUNDED,
            EventSchema::new()
                .require(EventField::Data)
                .require(EventField::CorrelationId)
                .data(
                    DataSchema::new()
                        .required("amount", FieldType::Number)
                        .required("currency", FieldType::String)
                        .required("userId", FieldType::String)
                        .optional("reason", FieldType::String),
                ),
        );
        registry.register(
            catalog::EVENT_USER_REGISTERED,
            EventSchema::new().require(EventField::Data).data(
                DataSchema::new()
                    .required("userId", FieldType::String)
                    .required("email", FieldType::String)
                    .optional("plan", FieldType::String),
            ),
        );
        registry.register(
            catalog::EVENT_USER_LOGIN,
            EventSchema::new().require(EventField::Data).data(
                DataSchema::new()
                    .required("userId", FieldType::String)
                    .optional("ip", FieldType::String),
            ),
        );
        registry.register(
            catalog::EVENT_COURSE_ENROLLED,
            EventSchema::new().require(EventField::Data).data(
                DataSchema::new()
                    .required("enrollmentType", FieldType::String)
                    .required("enrolledAt", FieldType::Date)
                    .required("progress", FieldType::Number)
                    .optional("courseId", FieldType::String)
                    .optional("userId", FieldType::String),
            ),
        );
        registry.register(
            catalog::EVENT_COURSE_COMPLETED,
            EventSchema::new().require(EventField::Data).data(
                DataSchema::new()
                    .required("courseId", FieldType::String)
                    .required("userId", FieldType::String)
                    .required("completedAt", FieldType::Date),
            ),
        );
        registry.register(
            catalog::EVENT_PATH_UPDATED,
            EventSchema::new().require(EventField::Data).data(
                DataSchema::new()
                    .required("pathId", FieldType::String)
                    .required("updatedFields", FieldType::Array),
            ),
        );
        registry.register(
            catalog::EVENT_LAB_STARTED,
            EventSchema::new().require(EventField::Data).data(
                DataSchema::new()
                    .required("labId", FieldType::String)
                    .required("userId", FieldType::String),
            ),
        );
        registry.register(
            catalog::EVENT_LAB_COMPLETED,
            EventSchema::new().require(EventField::Data).data(
                DataSchema::new()
                    .required("labId", FieldType::String)
                    .required("userId", FieldType::String)
                    .required("durationSeconds", FieldType::Number),
            ),
        );
        registry.register(
            catalog::EVENT_ADMIN_ACTION,
            EventSchema::new().require(EventField::Data).data(
                DataSchema::new()
                    .required("actorId", FieldType::String)
                    .required("action", FieldType::String)
                    .optional("targetId", FieldType::String),
            ),
        );
        registry.register(
            catalog::EVENT_SYSTEM_MAINTENANCE,
            EventSchema::new().data(
                DataSchema::new()
                    .required("startsAt", FieldType::Date)
                    .optional("message", FieldType::String),
            ),
        );

        registry
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::DomainEvent;

    fn enrolled_event() -> DomainEvent {
        DomainEvent::new(catalog::EVENT_COURSE_ENROLLED, "course").with_data(serde_json::json!({
            "enrollmentType": "free",
            "enrolledAt": "2026-01-10T12:00:00Z",
            "progress": 0
        }))
    }

    // -- registry lookup --

    #[test]
    fn unregistered_type_fails_closed() {
        let registry = SchemaRegistry::platform_defaults();
        let event = DomainEvent::new("marketing.campaign_sent", "marketing")
            .with_data(serde_json::json!({"campaignId": "c-1"}));

        let report = registry.validate(&event);
        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("No schema registered"));
        assert!(report.errors[0].contains("marketing.campaign_sent"));
    }

    #[test]
    fn empty_registry_rejects_everything() {
        let registry = SchemaRegistry::new();
        assert!(!registry.validate(&enrolled_event()).is_valid);
    }

    // -- happy path --

    #[test]
    fn catalog_event_with_valid_data_passes() {
        let registry = SchemaRegistry::platform_defaults();
        let report = registry.validate(&enrolled_event());
        assert!(report.is_valid, "unexpected errors: {:?}", report.errors);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn optional_fields_may_be_absent() {
        let registry = SchemaRegistry::platform_defaults();
        let event = DomainEvent::new(catalog::EVENT_USER_LOGIN, "auth")
            .with_data(serde_json::json!({"userId": "u-1"}));
        assert!(registry.validate(&event).is_valid);
    }

    // -- field errors --

    #[test]
    fn missing_required_data_field_is_reported() {
        let registry = SchemaRegistry::platform_defaults();
        let event = DomainEvent::new(catalog::EVENT_PAYMENT_SUCCEEDED, "payments")
            .with_data(serde_json::json!({"amount": 49.99, "currency": "USD"}));

        let report = registry.validate(&event);
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("data.userId")));
    }

    #[test]
    fn type_mismatches_are_all_reported_in_one_pass() {
        let registry = SchemaRegistry::platform_defaults();
        let event = DomainEvent::new(catalog::EVENT_PAYMENT_SUCCEEDED, "payments").with_data(
            serde_json::json!({
                "amount": "not-a-number",
                "currency": 840,
                "userId": "u-1"
            }),
        );

        let report = registry.validate(&event);
        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 2);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("data.amount") && e.contains("expected number")));
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("data.currency") && e.contains("expected string")));
    }

    #[test]
    fn optional_field_with_wrong_type_is_reported() {
        let registry = SchemaRegistry::platform_defaults();
        let event = DomainEvent::new(catalog::EVENT_USER_LOGIN, "auth")
            .with_data(serde_json::json!({"userId": "u-1", "ip": 127001}));

        let report = registry.validate(&event);
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("data.ip")));
    }

    #[test]
    fn date_fields_require_rfc3339_strings() {
        let registry = SchemaRegistry::platform_defaults();
        let event = DomainEvent::new(catalog::EVENT_COURSE_ENROLLED, "course").with_data(
            serde_json::json!({
                "enrollmentType": "free",
                "enrolledAt": "next tuesday",
                "progress": 0
            }),
        );

        let report = registry.validate(&event);
        assert!(!report.is_valid);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("data.enrolledAt") && e.contains("expected date")));
    }

    // -- event-level fields --

    #[test]
    fn required_correlation_id_is_enforced() {
        let registry = SchemaRegistry::platform_defaults();
        let event = DomainEvent::new(catalog::EVENT_PAYMENT_REFUNDED, "payments").with_data(
            serde_json::json!({"amount": 10.0, "currency": "USD", "userId": "u-1"}),
        );

        let report = registry.validate(&event);
        assert!(!report.is_valid);
        assert!(report
            .errors
            .iter()
            .any(|e| e.contains("correlationId: required field missing")));

        let correlated = event.with_correlation("order-1");
        assert!(registry.validate(&correlated).is_valid);
    }

    #[test]
    fn empty_event_id_is_rejected() {
        let registry = SchemaRegistry::platform_defaults();
        let mut event = enrolled_event();
        event.id.clear();

        let report = registry.validate(&event);
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.starts_with("id:")));
    }

    #[test]
    fn summary_joins_all_errors() {
        let registry = SchemaRegistry::platform_defaults();
        let event =
            DomainEvent::new(catalog::EVENT_PAYMENT_SUCCEEDED, "payments").with_data(
                serde_json::json!({"amount": "x", "currency": 1, "userId": "u-1"}),
            );

        let summary = registry.validate(&event).summary();
        assert!(summary.contains("data.amount"));
        assert!(summary.contains("; "));
    }
}
