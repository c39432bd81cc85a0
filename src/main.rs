use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use env_logger::Env;
use log::{debug, info};
use serde_json::Value;
use std::{fs, path::Path};

use oas_security_scheme::{
    annotation::AnnotationParser, generator::Generator, models, SchemeParser, ValidationMode,
};

/// Validate and normalize OpenAPI Security Scheme objects
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Format {
    Json,
    Yaml,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse a security scheme document and print its normalized form
    Check {
        /// JSON or YAML file holding one scheme, or a name -> scheme mapping with --named
        file: String,

        /// Treat the file as a securitySchemes mapping of name to scheme
        #[arg(long)]
        named: bool,

        /// Enforce the fields required by each scheme type
        #[arg(long)]
        strict: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "json")]
        format: Format,
    },

    /// Print the documented example schemes
    Examples {
        /// Output format
        #[arg(short, long, value_enum, default_value = "json")]
        format: Format,
    },

    /// Generate a securitySchemes fragment from Go security annotations
    Init {
        /// Directories to parse, comma separated
        #[arg(short, long, default_value = "./")]
        dir: String,

        /// Output directory for generated files
        #[arg(short, long, default_value = "./docs")]
        output: String,

        /// Output types to generate (json,yaml)
        #[arg(long = "ot", default_value = "json,yaml")]
        output_types: String,

        /// Directories to exclude, comma separated
        #[arg(long = "exclude-dir")]
        exclude_dir: Option<String>,

        /// Fail when a scheme is missing the fields its type requires
        #[arg(long)]
        strict: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let env = Env::default().filter_or("RUST_LOG", if cli.verbose { "debug" } else { "info" });
    env_logger::init_from_env(env);

    debug!("Starting oas-security-scheme...");

    match &cli.command {
        Commands::Check { file, named, strict, format } => {
            let mode = if *strict { ValidationMode::Strict } else { ValidationMode::Lenient };
            let parser = SchemeParser::new(mode);
            debug!("Checking {} in {:?} mode", file, mode);

            let document = load_document(file)?;
            let normalized = if *named {
                let schemes = parser.parse_named(&document)?;
                info!("{} security schemes are valid", schemes.len());
                serde_json::to_value(&schemes)?
            } else {
                let scheme = parser.parse_value(&document)?;
                info!("{} security scheme is valid", scheme.type_);
                scheme.to_value()?
            };

            print!("{}", render(&normalized, *format)?);
        }
        Commands::Examples { format } => {
            let examples = Value::Array(models::examples());
            print!("{}", render(&examples, *format)?);
        }
        Commands::Init { dir, output, output_types, exclude_dir, strict } => {
            info!("Generating security schemes");

            let dirs: Vec<String> = split_list(dir);
            let output_types: Vec<String> = split_list(output_types);
            let excluded_dirs: Vec<String> = exclude_dir.as_deref().map(split_list).unwrap_or_default();

            debug!("Directories to parse: {:?}", dirs);
            debug!("Directories to exclude: {:?}", excluded_dirs);
            debug!("Output directory: {}", output);

            let schemes = AnnotationParser::new().parse_dirs(dirs.as_slice(), excluded_dirs.as_slice())?;
            debug!("Parsed {} security schemes", schemes.len());

            if *strict {
                for (name, scheme) in &schemes {
                    scheme
                        .validate_requirements()
                        .with_context(|| format!("Security scheme {} is incomplete", name))?;
                }
            }

            let written = Generator::new(schemes).generate(output, &output_types)?;
            info!("Security schemes generated successfully ({} files)", written.len());
        }
    }

    Ok(())
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Read a JSON or YAML document, picking the format from the file extension
fn load_document(file: &str) -> Result<Value> {
    let path = Path::new(file);
    let text = fs::read_to_string(path).context(format!("Failed to read file: {:?}", path))?;

    let is_json = path.extension().is_some_and(|ext| ext == "json");
    if is_json {
        serde_json::from_str(&text).context(format!("Failed to parse JSON: {:?}", path))
    } else {
        serde_yaml::from_str(&text).context(format!("Failed to parse YAML: {:?}", path))
    }
}

fn render(value: &Value, format: Format) -> Result<String> {
    match format {
        Format::Json => Ok(format!("{}\n", serde_json::to_string_pretty(value)?)),
        Format::Yaml => Ok(serde_yaml::to_string(value)?),
    }
}
