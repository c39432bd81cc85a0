use log::{debug, warn};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::models::{
    ApiKeyLocation, OAuthFlows, OpenIdConnectUrl, SecurityScheme, SecuritySchemeType, FIELD_BEARER_FORMAT,
    FIELD_DESCRIPTION, FIELD_FLOWS, FIELD_IN, FIELD_IN_ALIAS, FIELD_NAME, FIELD_OPEN_ID_CONNECT_URL, FIELD_SCHEME,
    FIELD_TYPE, KNOWN_FIELDS,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemeError {
    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    #[error("Expected a mapping for the security scheme, found {0}")]
    NotAMapping(String),

    #[error("Missing required field: {0}")]
    MissingRequiredField(String),

    #[error("Invalid value for field '{0}': {1}")]
    InvalidFieldValue(String, String),
}

impl SchemeError {
    /// Name of the offending field, if the error is about one
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::MissingRequiredField(field) | Self::InvalidFieldValue(field, _) => Some(field),
            _ => None,
        }
    }

    // Qualify the error with the name the scheme is registered under
    fn within(self, scheme_name: &str) -> Self {
        match self {
            Self::MissingRequiredField(field) => {
                Self::MissingRequiredField(format!("{}.{}", scheme_name, field))
            }
            Self::InvalidFieldValue(field, reason) => {
                Self::InvalidFieldValue(format!("{}.{}", scheme_name, field), reason)
            }
            Self::NotAMapping(shape) => Self::InvalidFieldValue(
                scheme_name.to_string(),
                format!("expected a security scheme mapping, found {}", shape),
            ),
            other => other,
        }
    }
}

/// Human readable shape of a JSON value, used in error messages
pub fn describe_shape(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn wrong_kind(field: &str, expected: &str, found: &Value) -> SchemeError {
    SchemeError::InvalidFieldValue(
        field.to_string(),
        format!("expected {}, found {}", expected, describe_shape(found)),
    )
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValidationMode {
    /// Only the shape of each field is checked
    #[default]
    Lenient,
    /// Also reject unknown keys and fields that don't match `type`
    Strict,
}

/// Builds [`SecurityScheme`] records from wire mappings
#[derive(Debug, Clone, Default)]
pub struct SchemeParser {
    mode: ValidationMode,
}

impl SchemeParser {
    pub fn new(mode: ValidationMode) -> Self {
        Self { mode }
    }

    pub fn strict() -> Self {
        Self::new(ValidationMode::Strict)
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    pub fn parse_json(&self, text: &str) -> Result<SecurityScheme, SchemeError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| SchemeError::MalformedDocument(e.to_string()))?;
        self.parse_value(&value)
    }

    pub fn parse_yaml(&self, text: &str) -> Result<SecurityScheme, SchemeError> {
        let value: Value =
            serde_yaml::from_str(text).map_err(|e| SchemeError::MalformedDocument(e.to_string()))?;
        self.parse_value(&value)
    }

    pub fn parse_value(&self, value: &Value) -> Result<SecurityScheme, SchemeError> {
        match value {
            Value::Object(map) => self.parse_map(map),
            other => Err(SchemeError::NotAMapping(describe_shape(other).to_string())),
        }
    }

    pub fn parse_map(&self, map: &Map<String, Value>) -> Result<SecurityScheme, SchemeError> {
        // The discriminator has no default
        let type_ = match map.get(FIELD_TYPE) {
            None => return Err(SchemeError::MissingRequiredField(FIELD_TYPE.to_string())),
            Some(Value::String(text)) => text
                .parse::<SecuritySchemeType>()
                .map_err(|reason| SchemeError::InvalidFieldValue(FIELD_TYPE.to_string(), reason))?,
            Some(other) => return Err(wrong_kind(FIELD_TYPE, "a string", other)),
        };

        // Optional fields, read by their wire names
        let mut scheme = SecurityScheme::new(type_);
        scheme.description = optional_text(map, FIELD_DESCRIPTION)?;
        scheme.name = optional_text(map, FIELD_NAME)?;
        // `in` may also arrive under its internal name
        scheme.security_scheme_in = parse_location(map)?;
        scheme.scheme = optional_text(map, FIELD_SCHEME)?;
        scheme.bearer_format = optional_text(map, FIELD_BEARER_FORMAT)?;
        scheme.flows = parse_flows(map)?;
        // Never rejected, relative text is kept as-is
        scheme.open_id_connect_url =
            optional_text(map, FIELD_OPEN_ID_CONNECT_URL)?.map(|text| OpenIdConnectUrl::parse(&text));

        // Keep extensions, then deal with whatever is left over
        for (key, value) in map {
            if KNOWN_FIELDS.contains(&key.as_str()) {
                continue;
            }
            if key.starts_with("x-") {
                scheme.extensions.insert(key.clone(), value.clone());
                continue;
            }
            match self.mode {
                ValidationMode::Strict => {
                    return Err(SchemeError::InvalidFieldValue(
                        key.clone(),
                        "unknown security scheme field".to_string(),
                    ));
                }
                ValidationMode::Lenient => warn!("Ignoring unknown security scheme field: {}", key),
            }
        }

        // Cross-field checks are opt-in
        if self.mode == ValidationMode::Strict {
            scheme.validate_requirements()?;
        }

        debug!("Parsed {} security scheme", scheme.type_);
        Ok(scheme)
    }

    /// Parse a `securitySchemes`-style mapping of scheme name to scheme
    pub fn parse_named(&self, value: &Value) -> Result<BTreeMap<String, SecurityScheme>, SchemeError> {
        // The container itself must be a mapping too
        let map = match value {
            Value::Object(map) => map,
            other => return Err(SchemeError::NotAMapping(describe_shape(other).to_string())),
        };

        let mut schemes = BTreeMap::new();
        for (name, entry) in map {
            // Report errors against the registered name, e.g. BasicAuth.type
            let scheme = self.parse_value(entry).map_err(|e| e.within(name))?;
            schemes.insert(name.clone(), scheme);
        }

        debug!("Parsed {} named security schemes", schemes.len());
        Ok(schemes)
    }
}

// `null` is treated the same as an absent key
fn optional_text(map: &Map<String, Value>, field: &str) -> Result<Option<String>, SchemeError> {
    match map.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.clone())),
        Some(other) => Err(wrong_kind(field, "a string", other)),
    }
}

fn parse_location(map: &Map<String, Value>) -> Result<Option<ApiKeyLocation>, SchemeError> {
    let text = match (optional_text(map, FIELD_IN)?, optional_text(map, FIELD_IN_ALIAS)?) {
        (Some(wire), Some(internal)) if wire != internal => {
            return Err(SchemeError::InvalidFieldValue(
                FIELD_IN.to_string(),
                format!(
                    "conflicting values '{}' and '{}' given for '{}' and '{}'",
                    wire, internal, FIELD_IN, FIELD_IN_ALIAS
                ),
            ));
        }
        (Some(wire), _) => Some(wire),
        (None, internal) => internal,
    };

    text.map(|text| {
        text.parse::<ApiKeyLocation>()
            .map_err(|reason| SchemeError::InvalidFieldValue(FIELD_IN.to_string(), reason))
    })
    .transpose()
}

fn parse_flows(map: &Map<String, Value>) -> Result<Option<OAuthFlows>, SchemeError> {
    match map.get(FIELD_FLOWS) {
        None | Some(Value::Null) => Ok(None),
        Some(value @ Value::Object(_)) => serde_json::from_value::<OAuthFlows>(value.clone())
            .map(Some)
            .map_err(|e| SchemeError::InvalidFieldValue(FIELD_FLOWS.to_string(), e.to_string())),
        Some(other) => Err(wrong_kind(FIELD_FLOWS, "an OAuth flows object", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_missing_type() {
        let err = SchemeParser::default()
            .parse_value(&json!({"scheme": "basic"}))
            .unwrap_err();
        assert_eq!(err, SchemeError::MissingRequiredField("type".to_string()));
        assert_eq!(err.field(), Some("type"));
    }

    #[test]
    fn test_unknown_type() {
        let err = SchemeParser::default()
            .parse_value(&json!({"type": "digest"}))
            .unwrap_err();
        assert_eq!(err.field(), Some("type"));
        assert!(err.to_string().contains("`digest`"));
    }

    #[test]
    fn test_type_must_be_a_string() {
        let err = SchemeParser::default()
            .parse_value(&json!({"type": 42}))
            .unwrap_err();
        assert_eq!(
            err,
            SchemeError::InvalidFieldValue("type".to_string(), "expected a string, found a number".to_string())
        );
    }

    #[test]
    fn test_not_a_mapping() {
        let err = SchemeParser::default().parse_value(&json!(["http"])).unwrap_err();
        assert_eq!(err, SchemeError::NotAMapping("an array".to_string()));
    }

    #[test]
    fn test_flows_given_a_scalar() {
        let err = SchemeParser::default()
            .parse_value(&json!({"type": "oauth2", "flows": "implicit"}))
            .unwrap_err();
        assert_eq!(
            err,
            SchemeError::InvalidFieldValue(
                "flows".to_string(),
                "expected an OAuth flows object, found a string".to_string()
            )
        );
    }

    #[test]
    fn test_flow_without_scopes() {
        let err = SchemeParser::default()
            .parse_value(&json!({
                "type": "oauth2",
                "flows": {"password": {"tokenUrl": "https://example.com/token"}}
            }))
            .unwrap_err();
        assert_eq!(err.field(), Some("flows"));
        assert!(err.to_string().contains("scopes"));
    }

    #[test]
    fn test_alias_accepted() {
        let parser = SchemeParser::default();
        let wire = parser
            .parse_value(&json!({"type": "apiKey", "name": "api_key", "in": "query"}))
            .unwrap();
        let internal = parser
            .parse_value(&json!({"type": "apiKey", "name": "api_key", "security_scheme_in": "query"}))
            .unwrap();
        let both = parser
            .parse_value(&json!({
                "type": "apiKey",
                "name": "api_key",
                "in": "query",
                "security_scheme_in": "query"
            }))
            .unwrap();
        assert_eq!(wire, internal);
        assert_eq!(wire, both);
        assert_eq!(internal.security_scheme_in, Some(ApiKeyLocation::Query));
    }

    #[test]
    fn test_alias_conflict() {
        let err = SchemeParser::default()
            .parse_value(&json!({"type": "apiKey", "in": "query", "security_scheme_in": "header"}))
            .unwrap_err();
        assert_eq!(err.field(), Some("in"));
    }

    #[test]
    fn test_invalid_location() {
        let err = SchemeParser::default()
            .parse_value(&json!({"type": "apiKey", "name": "k", "in": "body"}))
            .unwrap_err();
        assert_eq!(err.field(), Some("in"));
    }

    #[test]
    fn test_null_is_absent() {
        let scheme = SchemeParser::default()
            .parse_value(&json!({"type": "http", "scheme": "basic", "description": null}))
            .unwrap();
        assert_eq!(scheme.description, None);
        assert_eq!(scheme.to_value().unwrap(), json!({"type": "http", "scheme": "basic"}));
    }

    #[test]
    fn test_lenient_ignores_mismatched_fields() {
        let scheme = SchemeParser::default()
            .parse_value(&json!({"type": "http", "name": "api_key", "unknown": true}))
            .unwrap();
        assert_eq!(scheme.name.as_deref(), Some("api_key"));
        assert_eq!(scheme.scheme, None);
        assert_eq!(scheme.to_value().unwrap(), json!({"type": "http", "name": "api_key"}));
    }

    #[test]
    fn test_extensions_round_trip() {
        let raw = json!({"type": "mutualTLS", "x-internal": {"team": "platform"}});
        let scheme = SchemeParser::strict().parse_value(&raw).unwrap();
        assert_eq!(scheme.extensions.get("x-internal"), Some(&json!({"team": "platform"})));
        assert_eq!(scheme.to_value().unwrap(), raw);
    }

    #[test]
    fn test_strict_requires_companion_fields() {
        let err = SchemeParser::strict()
            .parse_value(&json!({"type": "http"}))
            .unwrap_err();
        assert_eq!(
            err,
            SchemeError::InvalidFieldValue("scheme".to_string(), "required when type is http".to_string())
        );

        let err = SchemeParser::strict()
            .parse_value(&json!({"type": "openIdConnect"}))
            .unwrap_err();
        assert_eq!(err.field(), Some("openIdConnectUrl"));
    }

    #[test]
    fn test_strict_rejects_foreign_fields() {
        let err = SchemeParser::strict()
            .parse_value(&json!({"type": "http", "scheme": "basic", "name": "api_key"}))
            .unwrap_err();
        assert_eq!(err.field(), Some("name"));
    }

    #[test]
    fn test_strict_rejects_unknown_keys() {
        let err = SchemeParser::strict()
            .parse_value(&json!({"type": "http", "scheme": "basic", "realm": "x"}))
            .unwrap_err();
        assert_eq!(
            err,
            SchemeError::InvalidFieldValue("realm".to_string(), "unknown security scheme field".to_string())
        );
    }

    #[test]
    fn test_strict_allows_advisory_fields() {
        let scheme = SchemeParser::strict()
            .parse_value(&json!({
                "type": "http",
                "scheme": "bearer",
                "bearerFormat": "JWT",
                "description": "Token issued by the auth service"
            }))
            .unwrap();
        assert_eq!(scheme.bearer_format.as_deref(), Some("JWT"));
    }

    #[test]
    fn test_parse_yaml() {
        let scheme = SchemeParser::default()
            .parse_yaml("type: apiKey\nname: api_key\nin: cookie\n")
            .unwrap();
        assert_eq!(scheme, SecurityScheme::api_key("api_key", ApiKeyLocation::Cookie));
    }

    #[test]
    fn test_malformed_json() {
        let err = SchemeParser::default().parse_json("{\"type\": ").unwrap_err();
        assert!(matches!(err, SchemeError::MalformedDocument(_)));
        assert_eq!(err.field(), None);
    }

    #[test]
    fn test_parse_named() {
        let schemes = SchemeParser::default()
            .parse_named(&json!({
                "BasicAuth": {"type": "http", "scheme": "basic"},
                "ApiKeyAuth": {"type": "apiKey", "name": "X-API-Key", "in": "header"}
            }))
            .unwrap();
        assert_eq!(schemes.len(), 2);
        assert_eq!(schemes["BasicAuth"], SecurityScheme::http("basic"));
    }

    #[test]
    fn test_parse_named_qualifies_errors() {
        let parser = SchemeParser::default();
        let err = parser
            .parse_named(&json!({"BasicAuth": {"scheme": "basic"}}))
            .unwrap_err();
        assert_eq!(err, SchemeError::MissingRequiredField("BasicAuth.type".to_string()));

        let err = parser.parse_named(&json!({"BasicAuth": "basic"})).unwrap_err();
        assert_eq!(err.field(), Some("BasicAuth"));
    }
}
