use anyhow::{Context, Result};
use log::{debug, info};
use serde_json::{json, Value};
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use crate::models::SecurityScheme;

const OUTPUT_BASENAME: &str = "security_schemes";

/// Renders named security schemes as an OpenAPI `components.securitySchemes` fragment
pub struct Generator {
    schemes: BTreeMap<String, SecurityScheme>,
}

impl Generator {
    pub fn new(schemes: BTreeMap<String, SecurityScheme>) -> Self {
        Self { schemes }
    }

    pub fn schemes(&self) -> &BTreeMap<String, SecurityScheme> {
        &self.schemes
    }

    /// Write the fragment in each of `output_types` (json, yaml), returning the files written
    pub fn generate(&self, output_dir: impl AsRef<Path>, output_types: &[String]) -> Result<Vec<PathBuf>> {
        let output_dir = output_dir.as_ref();

        // Create output directory if it doesn't exist
        fs::create_dir_all(output_dir)
            .context(format!("Failed to create output directory: {:?}", output_dir))?;

        // Generate the requested output types, skipping ones we don't know
        let mut written = Vec::new();
        for output_type in output_types {
            match output_type.as_str() {
                "json" => written.push(self.write_file(output_dir, "json", &self.to_json()?)?),
                "yaml" => written.push(self.write_file(output_dir, "yaml", &self.to_yaml()?)?),
                _ => debug!("Unknown output type: {}", output_type),
            }
        }

        Ok(written)
    }

    pub fn build_components(&self) -> Result<Value> {
        // Named schemes sit under components.securitySchemes
        let schemes = serde_json::to_value(&self.schemes)
            .context("Failed to serialize security schemes")?;
        Ok(json!({ "components": { "securitySchemes": schemes } }))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.build_components()?)
            .context("Failed to serialize security schemes to JSON")
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(&self.build_components()?)
            .context("Failed to serialize security schemes to YAML")
    }

    fn write_file(&self, output_dir: &Path, file_ext: &str, content: &str) -> Result<PathBuf> {
        let file_path = output_dir.join(format!("{}.{}", OUTPUT_BASENAME, file_ext));
        let mut file = File::create(&file_path)
            .context(format!("Failed to create file: {:?}", file_path))?;

        file.write_all(content.as_bytes())
            .context(format!("Failed to write to file: {:?}", file_path))?;

        info!("Generated file: {:?}", file_path);
        Ok(file_path)
    }
}
