use anyhow::{Context, Result};
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use walkdir::WalkDir;

use crate::models::{ApiKeyLocation, OAuthFlow, OAuthFlows, OpenIdConnectUrl, SecurityScheme, SecuritySchemeType};

static ANNOTATION_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*//\s*@([\w.:\-]+)(?:\s+(.*?))?\s*$").unwrap()
});

const DEFINITION_PREFIX: &str = "securitydefinitions.";

// Annotations that only make sense right after a @securityDefinitions line
const PROPERTY_ANNOTATIONS: [&str; 7] = [
    "in",
    "name",
    "bearerformat",
    "authorizationurl",
    "tokenurl",
    "refreshurl",
    "openidconnecturl",
];

#[derive(Error, Debug)]
pub enum AnnotationError {
    #[error("Unknown security definition type: {0}")]
    UnknownSecurityType(String),

    #[error("Unknown OAuth2 flow: {0}")]
    UnknownOAuthFlow(String),

    #[error("Security definition '{0}' requires a scheme name")]
    MissingSchemeName(String),

    #[error("Invalid value for @{0}: {1}")]
    InvalidValue(String, String),

    #[error("line {line}: {source}")]
    AtLine {
        line: usize,
        #[source]
        source: Box<AnnotationError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlowKind {
    Implicit,
    Password,
    ClientCredentials,
    AuthorizationCode,
}

impl FlowKind {
    fn from_annotation(name: &str) -> Result<Self, AnnotationError> {
        match name {
            "implicit" => Ok(Self::Implicit),
            "password" => Ok(Self::Password),
            "clientcredentials" | "application" => Ok(Self::ClientCredentials),
            "authorizationcode" | "accesscode" => Ok(Self::AuthorizationCode),
            other => Err(AnnotationError::UnknownOAuthFlow(other.to_string())),
        }
    }

    fn slot(self, flows: &mut OAuthFlows) -> &mut Option<OAuthFlow> {
        match self {
            Self::Implicit => &mut flows.implicit,
            Self::Password => &mut flows.password,
            Self::ClientCredentials => &mut flows.client_credentials,
            Self::AuthorizationCode => &mut flows.authorization_code,
        }
    }
}

/// A @securityDefinitions block being filled in by the annotations below it
struct Definition {
    name: String,
    scheme: SecurityScheme,
    flow: Option<FlowKind>,
}

impl Definition {
    fn start(kind: &str, value: &str) -> Result<Self, AnnotationError> {
        let name = value
            .split_whitespace()
            .next()
            .ok_or_else(|| AnnotationError::MissingSchemeName(kind.to_string()))?
            .to_string();

        let (base, sub) = match kind.split_once('.') {
            Some((base, sub)) => (base, Some(sub)),
            None => (kind, None),
        };

        // only oauth2 takes a sub-kind (the flow)
        if base != "oauth2" && sub.is_some() {
            return Err(AnnotationError::UnknownSecurityType(kind.to_string()));
        }

        let mut flow = None;
        let scheme = match base {
            "apikey" => SecurityScheme::new(SecuritySchemeType::ApiKey),
            "basic" => SecurityScheme::http("basic"),
            "bearer" => SecurityScheme::bearer(),
            "jwt" => SecurityScheme::bearer().with_bearer_format("JWT"),
            "mutualtls" => SecurityScheme::mutual_tls(),
            "openidconnect" => SecurityScheme::new(SecuritySchemeType::OpenIdConnect),
            "oauth2" => {
                let kind = FlowKind::from_annotation(sub.unwrap_or_default())?;
                let mut flows = OAuthFlows::default();
                *kind.slot(&mut flows) = Some(OAuthFlow::default());
                flow = Some(kind);
                SecurityScheme::oauth2(flows)
            }
            other => return Err(AnnotationError::UnknownSecurityType(other.to_string())),
        };

        debug!("Starting {} security definition: {}", scheme.type_, name);
        Ok(Self { name, scheme, flow })
    }

    fn flow_mut(&mut self, annotation: &str) -> Result<&mut OAuthFlow, AnnotationError> {
        let Some(kind) = self.flow.filter(|_| self.scheme.flows.is_some()) else {
            return Err(AnnotationError::InvalidValue(
                annotation.to_string(),
                format!("only valid in an oauth2 definition, '{}' is {}", self.name, self.scheme.type_),
            ));
        };
        let flows = self.scheme.flows.get_or_insert_with(OAuthFlows::default);
        Ok(kind.slot(flows).get_or_insert_with(OAuthFlow::default))
    }
}

/// Collects security schemes from swag-style `@securityDefinitions` comments
#[derive(Debug, Default)]
pub struct AnnotationParser;

impl AnnotationParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_str(&self, source: &str) -> Result<BTreeMap<String, SecurityScheme>, AnnotationError> {
        let mut schemes = BTreeMap::new();
        let mut current: Option<Definition> = None;

        for (index, line) in source.lines().enumerate() {
            let Some(captures) = ANNOTATION_REGEX.captures(line) else {
                continue;
            };
            let key = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
            let value = captures.get(2).map(|m| m.as_str()).unwrap_or_default();

            self.apply(key, value, &mut current, &mut schemes)
                .map_err(|e| AnnotationError::AtLine {
                    line: index + 1,
                    source: Box::new(e),
                })?;
        }

        if let Some(definition) = current.take() {
            finish(definition, &mut schemes);
        }

        Ok(schemes)
    }

    fn apply(
        &self,
        key: &str,
        value: &str,
        current: &mut Option<Definition>,
        schemes: &mut BTreeMap<String, SecurityScheme>,
    ) -> Result<(), AnnotationError> {
        let lowered = key.to_lowercase();

        if let Some(kind) = lowered.strip_prefix(DEFINITION_PREFIX) {
            if let Some(done) = current.take() {
                finish(done, schemes);
            }
            *current = Some(Definition::start(kind, value)?);
            return Ok(());
        }

        let Some(definition) = current.as_mut() else {
            if PROPERTY_ANNOTATIONS.contains(&lowered.as_str()) || lowered.starts_with("scope.") {
                warn!("@{} outside a security definition, ignoring", key);
            }
            return Ok(());
        };

        match lowered.as_str() {
            "in" => {
                let location = value
                    .parse::<ApiKeyLocation>()
                    .map_err(|reason| AnnotationError::InvalidValue(key.to_string(), reason))?;
                definition.scheme.security_scheme_in = Some(location);
            }
            "name" => definition.scheme.name = Some(value.to_string()),
            "description" => definition.scheme.description = Some(value.to_string()),
            "bearerformat" => definition.scheme.bearer_format = Some(value.to_string()),
            "openidconnecturl" => {
                definition.scheme.open_id_connect_url = Some(OpenIdConnectUrl::parse(value));
            }
            "authorizationurl" => definition.flow_mut(key)?.authorization_url = Some(value.to_string()),
            "tokenurl" => definition.flow_mut(key)?.token_url = Some(value.to_string()),
            "refreshurl" => definition.flow_mut(key)?.refresh_url = Some(value.to_string()),
            _ if lowered.starts_with("scope.") => {
                // scope names keep their original case
                let scope = key["scope.".len()..].to_string();
                definition.flow_mut(key)?.scopes.insert(scope, value.to_string());
            }
            _ => {
                // any other annotation ends the definition block
                if let Some(done) = current.take() {
                    finish(done, schemes);
                }
            }
        }

        Ok(())
    }

    pub fn parse_file(&self, file_path: impl AsRef<Path>) -> Result<BTreeMap<String, SecurityScheme>> {
        let file_path = file_path.as_ref();
        debug!("Parsing security annotations from file: {:?}", file_path);

        let source = fs::read_to_string(file_path)
            .context(format!("Failed to read file: {:?}", file_path))?;

        let schemes = self
            .parse_str(&source)
            .with_context(|| format!("Invalid security annotation in {:?}", file_path))?;
        Ok(schemes)
    }

    /// Parse every `.go` file below `directories`, skipping anything under `excluded_dirs`
    pub fn parse_dirs(
        &self,
        directories: &[impl AsRef<Path>],
        excluded_dirs: &[impl AsRef<Path>],
    ) -> Result<BTreeMap<String, SecurityScheme>> {
        let mut file_paths = Vec::new();
        for dir in directories {
            collect_go_files(dir.as_ref(), excluded_dirs, &mut file_paths);
        }
        file_paths.sort();
        debug!("Found {} Go files to parse", file_paths.len());

        let mut schemes = BTreeMap::new();
        for file_path in &file_paths {
            for (name, scheme) in self.parse_file(file_path)? {
                if schemes.insert(name.clone(), scheme).is_some() {
                    warn!("Security scheme {} defined more than once, keeping {:?}", name, file_path);
                }
            }
        }

        Ok(schemes)
    }
}

fn finish(definition: Definition, schemes: &mut BTreeMap<String, SecurityScheme>) {
    if let Some(field) = definition.scheme.missing_companion_fields().first() {
        warn!(
            "Security scheme {} ({}) has no {}",
            definition.name, definition.scheme.type_, field
        );
    }
    if schemes.insert(definition.name.clone(), definition.scheme).is_some() {
        warn!("Security scheme {} defined more than once, keeping the last definition", definition.name);
    }
}

fn collect_go_files(dir_path: &Path, excluded_dirs: &[impl AsRef<Path>], file_paths: &mut Vec<PathBuf>) {
    debug!("Scanning for Go files in directory: {}", dir_path.display());

    for entry in WalkDir::new(dir_path).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if excluded_dirs.iter().any(|excluded| path.starts_with(excluded.as_ref())) {
            debug!("Skipping excluded path: {:?}", path);
            continue;
        }
        if path.is_file() && path.extension().is_some_and(|ext| ext == "go") {
            file_paths.push(path.to_path_buf());
        }
    }
}
