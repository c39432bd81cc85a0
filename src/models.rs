use log::{debug, warn};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::parser::{SchemeError, SchemeParser};

// Wire names of the Security Scheme object
pub const FIELD_TYPE: &str = "type";
pub const FIELD_DESCRIPTION: &str = "description";
pub const FIELD_NAME: &str = "name";
pub const FIELD_IN: &str = "in";
/// Internal name of `in`, accepted on input and never emitted
pub const FIELD_IN_ALIAS: &str = "security_scheme_in";
pub const FIELD_SCHEME: &str = "scheme";
pub const FIELD_BEARER_FORMAT: &str = "bearerFormat";
pub const FIELD_FLOWS: &str = "flows";
pub const FIELD_OPEN_ID_CONNECT_URL: &str = "openIdConnectUrl";

/// Every key a Security Scheme mapping may carry, aside from `x-` extensions
pub const KNOWN_FIELDS: [&str; 9] = [
    FIELD_TYPE,
    FIELD_DESCRIPTION,
    FIELD_NAME,
    FIELD_IN,
    FIELD_IN_ALIAS,
    FIELD_SCHEME,
    FIELD_BEARER_FORMAT,
    FIELD_FLOWS,
    FIELD_OPEN_ID_CONNECT_URL,
];

/// Type of a security scheme. Acts as the discriminator deciding which of the
/// other fields are meaningful.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecuritySchemeType {
    #[serde(rename = "apiKey")]
    ApiKey,
    #[serde(rename = "http")]
    Http,
    #[serde(rename = "mutualTLS")]
    MutualTls,
    #[serde(rename = "oauth2")]
    OAuth2,
    #[serde(rename = "openIdConnect")]
    OpenIdConnect,
}

impl SecuritySchemeType {
    pub const ALL: [SecuritySchemeType; 5] = [
        Self::ApiKey,
        Self::Http,
        Self::MutualTls,
        Self::OAuth2,
        Self::OpenIdConnect,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiKey => "apiKey",
            Self::Http => "http",
            Self::MutualTls => "mutualTLS",
            Self::OAuth2 => "oauth2",
            Self::OpenIdConnect => "openIdConnect",
        }
    }

    /// Fields that must be populated for a scheme of this type
    pub fn companion_fields(&self) -> &'static [&'static str] {
        match self {
            Self::ApiKey => &[FIELD_NAME, FIELD_IN],
            Self::Http => &[FIELD_SCHEME],
            Self::MutualTls => &[],
            Self::OAuth2 => &[FIELD_FLOWS],
            Self::OpenIdConnect => &[FIELD_OPEN_ID_CONNECT_URL],
        }
    }
}

impl fmt::Display for SecuritySchemeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecuritySchemeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "unknown security scheme type `{}`, expected one of apiKey, http, mutualTLS, oauth2, openIdConnect",
                    s
                )
            })
    }
}

/// Location of an API key
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyLocation {
    Query,
    Header,
    Cookie,
}

impl ApiKeyLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Header => "header",
            Self::Cookie => "cookie",
        }
    }
}

impl fmt::Display for ApiKeyLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiKeyLocation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "query" => Ok(Self::Query),
            "header" => Ok(Self::Header),
            "cookie" => Ok(Self::Cookie),
            other => Err(format!(
                "unknown API key location `{}`, expected one of query, header, cookie",
                other
            )),
        }
    }
}

/// OpenID Connect discovery URL.
///
/// Absolute URLs are parsed but keep the text they were given, so they are
/// re-emitted byte for byte. Anything `Url::parse` rejects (typically a
/// relative path such as `openIdConnect`) is kept as plain text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenIdConnectUrl {
    Absolute { url: Url, text: String },
    Relative(String),
}

impl OpenIdConnectUrl {
    /// Never fails: text that is not an absolute URL becomes [`OpenIdConnectUrl::Relative`]
    pub fn parse(text: &str) -> Self {
        match Url::parse(text) {
            Ok(url) => Self::Absolute {
                url,
                text: text.to_string(),
            },
            Err(e) => {
                debug!("Keeping openIdConnectUrl '{}' as relative text: {}", text, e);
                Self::Relative(text.to_string())
            }
        }
    }

    /// The text as supplied, not the normalized URL
    pub fn as_str(&self) -> &str {
        match self {
            Self::Absolute { text, .. } => text,
            Self::Relative(text) => text,
        }
    }

    /// Parsed form, if the text is an absolute URL
    pub fn url(&self) -> Option<&Url> {
        match self {
            Self::Absolute { url, .. } => Some(url),
            Self::Relative(_) => None,
        }
    }

    pub fn is_absolute(&self) -> bool {
        matches!(self, Self::Absolute { .. })
    }
}

impl fmt::Display for OpenIdConnectUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for OpenIdConnectUrl {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OpenIdConnectUrl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(Self::parse(&text))
    }
}

/// OAuth Flows Object
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OAuthFlows {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub implicit: Option<OAuthFlow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<OAuthFlow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_credentials: Option<OAuthFlow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_code: Option<OAuthFlow>,
    // Extensions and anything else we don't model, re-emitted as-is
    #[serde(flatten)]
    pub extensions: BTreeMap<String, Value>,
}

/// OAuth Flow Object
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OAuthFlow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_url: Option<String>,
    pub scopes: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extensions: BTreeMap<String, Value>,
}

/// Security Scheme Object.
///
/// Defines a security scheme that can be used by the operations: HTTP
/// authentication, an API key (header, cookie or query parameter), mutual
/// TLS, OAuth2 flows, or OpenID Connect Discovery.
///
/// Which of the optional fields must be set depends on `type_`:
///
/// | type            | required fields        |
/// |-----------------|------------------------|
/// | `apiKey`        | `name`, `in`           |
/// | `http`          | `scheme`               |
/// | `oauth2`        | `flows`                |
/// | `openIdConnect` | `openIdConnectUrl`     |
/// | `mutualTLS`     | none                   |
///
/// These requirements are only checked by [`SecurityScheme::validate_requirements`]
/// and by a [`SchemeParser`] in strict mode. Deserializing through serde is
/// lenient.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct SecurityScheme {
    #[serde(rename = "type")]
    pub type_: SecuritySchemeType,
    /// CommonMark syntax may be used for rich text representation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Name of the header, query or cookie parameter carrying the key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "in", skip_serializing_if = "Option::is_none")]
    pub security_scheme_in: Option<ApiKeyLocation>,
    /// HTTP Authorization scheme, as registered with IANA (`basic`, `bearer`, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    /// Hint for how a bearer token is formatted, documentation only
    #[serde(rename = "bearerFormat", skip_serializing_if = "Option::is_none")]
    pub bearer_format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flows: Option<OAuthFlows>,
    #[serde(rename = "openIdConnectUrl", skip_serializing_if = "Option::is_none")]
    pub open_id_connect_url: Option<OpenIdConnectUrl>,
    /// `x-` specification extensions. Other keys are never emitted.
    #[serde(flatten, serialize_with = "spec_extensions::serialize")]
    pub extensions: BTreeMap<String, Value>,
}

mod spec_extensions {
    use serde::Serializer;
    use serde_json::Value;
    use std::collections::BTreeMap;

    pub const PREFIX: &str = "x-";

    // a non-extension key would clash with the record's own fields
    pub fn serialize<S: Serializer>(extensions: &BTreeMap<String, Value>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(extensions.iter().filter(|(key, _)| key.starts_with(PREFIX)))
    }
}

impl<'de> Deserialize<'de> for SecurityScheme {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        SchemeParser::default()
            .parse_value(&value)
            .map_err(de::Error::custom)
    }
}

impl SecurityScheme {
    pub fn new(type_: SecuritySchemeType) -> Self {
        Self {
            type_,
            description: None,
            name: None,
            security_scheme_in: None,
            scheme: None,
            bearer_format: None,
            flows: None,
            open_id_connect_url: None,
            extensions: BTreeMap::new(),
        }
    }

    pub fn api_key(name: impl Into<String>, location: ApiKeyLocation) -> Self {
        Self {
            name: Some(name.into()),
            security_scheme_in: Some(location),
            ..Self::new(SecuritySchemeType::ApiKey)
        }
    }

    pub fn http(scheme: impl Into<String>) -> Self {
        Self {
            scheme: Some(scheme.into()),
            ..Self::new(SecuritySchemeType::Http)
        }
    }

    pub fn bearer() -> Self {
        Self::http("bearer")
    }

    pub fn mutual_tls() -> Self {
        Self::new(SecuritySchemeType::MutualTls)
    }

    pub fn oauth2(flows: OAuthFlows) -> Self {
        Self {
            flows: Some(flows),
            ..Self::new(SecuritySchemeType::OAuth2)
        }
    }

    pub fn open_id_connect(url: &str) -> Self {
        Self {
            open_id_connect_url: Some(OpenIdConnectUrl::parse(url)),
            ..Self::new(SecuritySchemeType::OpenIdConnect)
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_bearer_format(mut self, format: impl Into<String>) -> Self {
        self.bearer_format = Some(format.into());
        self
    }

    /// Add an `x-` specification extension; any other key is dropped
    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        if key.starts_with(spec_extensions::PREFIX) {
            self.extensions.insert(key, value);
        } else {
            warn!("Ignoring extension '{}': extension keys must start with 'x-'", key);
        }
        self
    }

    /// Serialize into a mapping keyed by wire names, omitting unset fields
    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    fn has_field(&self, field: &str) -> bool {
        match field {
            FIELD_NAME => self.name.is_some(),
            FIELD_IN => self.security_scheme_in.is_some(),
            FIELD_SCHEME => self.scheme.is_some(),
            FIELD_FLOWS => self.flows.is_some(),
            FIELD_OPEN_ID_CONNECT_URL => self.open_id_connect_url.is_some(),
            _ => false,
        }
    }

    /// Companion fields `type_` asks for that are not set
    pub fn missing_companion_fields(&self) -> Vec<&'static str> {
        self.type_
            .companion_fields()
            .iter()
            .copied()
            .filter(|field| !self.has_field(field))
            .collect()
    }

    /// Check that the fields required by `type_` are set and that no field
    /// belonging to another type is.
    pub fn validate_requirements(&self) -> Result<(), SchemeError> {
        if let Some(field) = self.missing_companion_fields().first() {
            return Err(SchemeError::InvalidFieldValue(
                field.to_string(),
                format!("required when type is {}", self.type_),
            ));
        }

        let own = self.type_.companion_fields();
        for other in SecuritySchemeType::ALL {
            for field in other.companion_fields() {
                if !own.contains(field) && self.has_field(field) {
                    return Err(SchemeError::InvalidFieldValue(
                        field.to_string(),
                        format!("only applies to {} schemes, not {}", other, self.type_),
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Documented example payloads for the Security Scheme object
pub fn examples() -> Vec<Value> {
    vec![
        json!({"type": "http", "scheme": "basic"}),
        json!({"type": "apiKey", "name": "api_key", "in": "header"}),
        json!({"type": "http", "scheme": "bearer", "bearerFormat": "JWT"}),
        json!({
            "type": "oauth2",
            "flows": {
                "implicit": {
                    "authorizationUrl": "https://example.com/api/oauth/dialog",
                    "scopes": {
                        "write:pets": "modify pets in your account",
                        "read:pets": "read your pets"
                    }
                }
            }
        }),
        json!({"type": "openIdConnect", "openIdConnectUrl": "https://example.com/openIdConnect"}),
        // relative paths are accepted as well
        json!({"type": "openIdConnect", "openIdConnectUrl": "openIdConnect"}),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_type_wire_names() {
        for type_ in SecuritySchemeType::ALL {
            let wire = serde_json::to_value(type_).unwrap();
            assert_eq!(wire, json!(type_.as_str()));
            assert_eq!(type_.as_str().parse::<SecuritySchemeType>().unwrap(), type_);
        }
        assert_eq!(SecuritySchemeType::MutualTls.to_string(), "mutualTLS");
        assert!("ApiKey".parse::<SecuritySchemeType>().is_err());
    }

    #[test]
    fn test_api_key_location() {
        assert_eq!("cookie".parse::<ApiKeyLocation>().unwrap(), ApiKeyLocation::Cookie);
        let err = "body".parse::<ApiKeyLocation>().unwrap_err();
        assert!(err.contains("`body`"));
    }

    #[test]
    fn test_open_id_connect_url_variants() {
        let absolute = OpenIdConnectUrl::parse("https://example.com/openIdConnect");
        assert!(absolute.is_absolute());
        assert_eq!(absolute.as_str(), "https://example.com/openIdConnect");

        let relative = OpenIdConnectUrl::parse("openIdConnect");
        assert_eq!(relative, OpenIdConnectUrl::Relative("openIdConnect".to_string()));
        assert_eq!(serde_json::to_value(&relative).unwrap(), json!("openIdConnect"));

        let path = OpenIdConnectUrl::parse("/.well-known/openid-configuration");
        assert!(!path.is_absolute());
    }

    #[test]
    fn test_absolute_url_keeps_supplied_text() {
        for text in ["https://Example.com", "https://example.com/a b", "HTTPS://example.com:443/x"] {
            let url = OpenIdConnectUrl::parse(text);
            assert!(url.is_absolute());
            assert_eq!(url.as_str(), text);
            assert_eq!(serde_json::to_value(&url).unwrap(), json!(text));
        }

        let url = OpenIdConnectUrl::parse("https://Example.com");
        assert_eq!(url.url().unwrap().as_str(), "https://example.com/");
        assert_eq!(OpenIdConnectUrl::parse("openIdConnect").url(), None);
    }

    #[test]
    fn test_serialize_omits_unset_fields() {
        let scheme = SecurityScheme::http("basic");
        assert_eq!(scheme.to_value().unwrap(), json!({"type": "http", "scheme": "basic"}));
    }

    #[test]
    fn test_serialize_uses_in_not_internal_name() {
        let scheme = SecurityScheme::api_key("X-API-Key", ApiKeyLocation::Header);
        let value = scheme.to_value().unwrap();
        assert_eq!(value, json!({"type": "apiKey", "name": "X-API-Key", "in": "header"}));
        assert!(value.get(FIELD_IN_ALIAS).is_none());
    }

    #[test]
    fn test_extensions_cannot_shadow_fields() {
        let mut scheme = SecurityScheme::api_key("api_key", ApiKeyLocation::Header)
            .with_extension("x-team", json!("platform"))
            .with_extension("name", json!("ignored"));
        assert_eq!(scheme.extensions.len(), 1);

        scheme.extensions.insert("type".to_string(), json!("http"));
        scheme.extensions.insert("in".to_string(), json!("query"));
        let expected = json!({"type": "apiKey", "name": "api_key", "in": "header", "x-team": "platform"});
        assert_eq!(scheme.to_value().unwrap(), expected);

        let text = serde_json::to_string(&scheme).unwrap();
        assert_eq!(text.matches("\"type\"").count(), 1);
        assert_eq!(serde_json::from_str::<Value>(&text).unwrap(), expected);
    }

    #[test]
    fn test_empty_string_is_not_absent() {
        let scheme = SecurityScheme::mutual_tls().with_description("");
        assert_eq!(scheme.to_value().unwrap(), json!({"type": "mutualTLS", "description": ""}));
    }

    #[test]
    fn test_oauth_flows_round_trip_unknown_keys() {
        let raw = json!({
            "clientCredentials": {
                "tokenUrl": "https://example.com/token",
                "scopes": {},
                "x-audience": "api"
            },
            "x-provider": "internal"
        });
        let flows: OAuthFlows = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(
            flows.client_credentials.as_ref().unwrap().token_url.as_deref(),
            Some("https://example.com/token")
        );
        assert_eq!(serde_json::to_value(&flows).unwrap(), raw);
    }

    #[test]
    fn test_validate_requirements() {
        assert!(SecurityScheme::bearer().with_bearer_format("JWT").validate_requirements().is_ok());
        assert!(SecurityScheme::mutual_tls().validate_requirements().is_ok());

        let mut api_key = SecurityScheme::new(SecuritySchemeType::ApiKey);
        api_key.name = Some("api_key".to_string());
        assert_eq!(api_key.missing_companion_fields(), vec![FIELD_IN]);
        assert_eq!(
            api_key.validate_requirements(),
            Err(SchemeError::InvalidFieldValue(
                "in".to_string(),
                "required when type is apiKey".to_string()
            ))
        );

        let mut http = SecurityScheme::http("basic");
        http.flows = Some(OAuthFlows::default());
        assert_eq!(
            http.validate_requirements(),
            Err(SchemeError::InvalidFieldValue(
                "flows".to_string(),
                "only applies to oauth2 schemes, not http".to_string()
            ))
        );
    }

    #[test]
    fn test_examples_are_valid() {
        for example in examples() {
            let scheme: SecurityScheme = serde_json::from_value(example.clone()).unwrap();
            scheme.validate_requirements().unwrap();
            assert_eq!(scheme.to_value().unwrap(), example);
        }
    }
}
