//! CLI command implementations
//!
//! Both commands load the configuration, resolve the schema directory into
//! a registry and print one JSON response.

use std::fs;
use std::path::Path;

use serde_json::{json, Map, Value};
use tokio::runtime::Runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::MapperConfig;
use crate::create::{convert_create_object_dissection_to_batch, dissect_create_object_operation};
use crate::fields::create_default_field_type_registry;
use crate::schema::{SchemaLoader, StorageRegistry};
use crate::Object;

use super::args::Command;
use super::errors::{CliError, CliResult};
use super::io::{read_request, write_error, write_response};

/// Load configuration from file
pub fn load_config(path: &Path) -> CliResult<MapperConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| CliError::config_error(format!("Failed to read config: {}", e)))?;

    let config: MapperConfig = serde_json::from_str(&content)
        .map_err(|e| CliError::config_error(format!("Invalid config JSON: {}", e)))?;

    config.validate().map_err(CliError::config_error)?;

    Ok(config)
}

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    let result = run_command(cli.command);
    if let Err(e) = &result {
        // Best effort: the error is also returned to main
        let _ = write_error(e.code_str(), e.message());
    }
    result
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Inspect { config } => inspect(&config),
        Command::Plan {
            config,
            collection,
            object,
        } => plan(&config, &collection, object.as_deref()),
    }
}

/// Print the resolved schema history
pub fn inspect(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;
    init_logging(&config)?;
    write_response(inspect_schema(config_path, &config)?)
}

/// Print the dissection and batch a nested create would produce
pub fn plan(config_path: &Path, collection: &str, object: Option<&str>) -> CliResult<()> {
    let config = load_config(config_path)?;
    init_logging(&config)?;

    let object = match object {
        None | Some("-") => read_request()?,
        Some(text) => serde_json::from_str(text)?,
    };
    let Value::Object(object) = object else {
        return Err(CliError::command_failed("The object to plan must be a JSON object"));
    };

    write_response(plan_create(config_path, &config, collection, &object)?)
}

/// Schema history as JSON, oldest version first
pub fn inspect_schema(config_path: &Path, config: &MapperConfig) -> CliResult<Value> {
    let registry = build_registry(config_path, config)?;

    let mut history = Vec::new();
    for entry in registry.get_schema_history()? {
        let mut collections = Map::new();
        for (name, definition) in &entry.collections {
            collections.insert(name.clone(), serde_json::to_value(definition.as_ref())?);
        }
        history.push(json!({
            "version": entry.version.to_rfc3339(),
            "collections": collections,
        }));
    }

    let current: Vec<String> = registry.collections()?.keys().cloned().collect();
    Ok(json!({
        "collections": current,
        "history": history,
    }))
}

/// Dissection and batch for creating `object` in `collection`
pub fn plan_create(
    config_path: &Path,
    config: &MapperConfig,
    collection: &str,
    object: &Object,
) -> CliResult<Value> {
    let registry = build_registry(config_path, config)?;
    let dissection = dissect_create_object_operation(collection, object, &registry)?;
    let batch = convert_create_object_dissection_to_batch(&dissection);

    Ok(json!({
        "dissection": dissection,
        "batch": batch,
    }))
}

fn build_registry(config_path: &Path, config: &MapperConfig) -> CliResult<StorageRegistry> {
    let schema_dir = config.schema_dir_relative_to(config_path);
    let mut loader = SchemaLoader::new(&schema_dir);
    let files = loader.load_all()?;

    let registry =
        StorageRegistry::new(create_default_field_type_registry(config.random_key_length));
    loader.register_into(&registry)?;

    let runtime = Runtime::new()
        .map_err(|e| CliError::command_failed(format!("Failed to start runtime: {}", e)))?;
    runtime.block_on(registry.finish_initialization())?;

    info!(
        schema_dir = %schema_dir.display(),
        files,
        collections = loader.collection_count(),
        "Schema resolved"
    );
    Ok(registry)
}

fn init_logging(config: &MapperConfig) -> CliResult<()> {
    let filter = EnvFilter::try_new(&config.log_filter)
        .map_err(|e| CliError::config_error(format!("Invalid log_filter: {}", e)))?;

    // A subscriber may already be installed when commands run in-process
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
    Ok(())
}
