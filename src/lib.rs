pub mod annotation;
pub mod generator;
pub mod models;
pub mod parser;

pub use models::{ApiKeyLocation, OAuthFlow, OAuthFlows, OpenIdConnectUrl, SecurityScheme, SecuritySchemeType};
pub use parser::{SchemeError, SchemeParser, ValidationMode};
