//! Hotswap - Entry Point
//!
//! Applies the ECS changes of a CloudFormation template to a deployed stack
//! without a full stack update.
//!
//! ```text
//! hotswap --stack=<name> --template=<new.json> [--settings=<file>]
//!         [--mode=fall-back|hotswap-only] [--parameters=<file.json>]
//!         [--assembly-dir=<dir>]
//! ```

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use hotswap::aws::{current_account, load_sdk_config, url_suffix_for_partition, AwsClients};
use hotswap::evaluate::{EvaluateCloudFormationTemplate, EvaluateOptions, LazyListStackResources};
use hotswap::hotswap::{
    read_current_template_with_nested_stacks, try_hotswap_deployment, DetectorRegistry,
    HotswapMode,
};
use hotswap::logs::{init_logging, LogOptions};
use hotswap::models::template::Template;
use hotswap::settings::Settings;
use hotswap::utils::{parse_cli_args, version_info};

use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let cli_args = parse_cli_args(env::args().skip(1));

    // Print version and exit
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(version) => println!("{}", version),
            Err(e) => eprintln!("{}", e),
        }
        return ExitCode::SUCCESS;
    }

    // Retrieve the settings file
    let mut settings = match cli_args.get("settings") {
        Some(path) => match Settings::load(Path::new(path)).await {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Unable to read settings file: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => Settings::default(),
    };
    if let Some(mode) = cli_args.get("mode") {
        match mode.parse() {
            Ok(mode) => settings.mode = mode,
            Err(e) => {
                eprintln!("{}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_file: settings.log_file.as_ref().map(PathBuf::from),
        json_format: settings.json_logs,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    match run(&cli_args, &settings).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            error!("Hotswap failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Returns `false` when the change set needs a full deployment
async fn run(cli_args: &HashMap<String, String>, settings: &Settings) -> anyhow::Result<bool> {
    let stack_name = cli_args
        .get("stack")
        .ok_or_else(|| anyhow!("Missing --stack=<name>"))?;
    let template_path = cli_args
        .get("template")
        .ok_or_else(|| anyhow!("Missing --template=<file>"))?;

    let template_path = Path::new(template_path);
    // nested templates are referenced relative to the cloud assembly
    let assembly_dir = match cli_args.get("assembly-dir") {
        Some(dir) => PathBuf::from(dir),
        None => template_path.parent().map(Path::to_path_buf).unwrap_or_default(),
    };

    let mut new_template = read_json(template_path)
        .await
        .context("Unable to read the new template")?;
    let parameters: HashMap<String, String> = match cli_args.get("parameters") {
        Some(path) => serde_json::from_value(read_json(Path::new(path)).await?)
            .context("Parameters must be a JSON object of strings")?,
        None => HashMap::new(),
    };

    let config = load_sdk_config(&settings.aws).await?;
    let region = config
        .region()
        .map(|r| r.to_string())
        .ok_or_else(|| anyhow!("No region configured"))?;
    let clients = Arc::new(AwsClients::from_config(&config));
    let identity = current_account(&config).await?;

    let current = read_current_template_with_nested_stacks(
        clients.cloudformation(),
        stack_name,
        &mut new_template,
        &assembly_dir,
    )
    .await
    .with_context(|| format!("Unable to read the deployed template of {}", stack_name))?;

    let evaluate = EvaluateCloudFormationTemplate::new(EvaluateOptions {
        template: Template::new(new_template),
        parameters,
        account: identity.account,
        url_suffix: url_suffix_for_partition(&identity.partition).to_string(),
        partition: identity.partition,
        region,
        stack_name: stack_name.clone(),
        stack_resources: Arc::new(LazyListStackResources::new(
            clients.cloudformation(),
            stack_name.clone(),
        )),
    });
    let registry = DetectorRegistry::with_builtin_detectors(settings.waiter_options());

    info!("Hotswapping stack {} in {} mode", stack_name, settings.mode);
    let outcome = try_hotswap_deployment(
        clients,
        &evaluate,
        &current.deployed_template,
        &current.nested_stack_names,
        settings.mode,
        &registry,
    )
    .await?;

    match outcome {
        None => {
            info!("Could not hotswap; a full deployment of {} is required", stack_name);
            Ok(false)
        }
        Some(outcome) if outcome.no_op => {
            info!("No hotswappable changes found for {}", stack_name);
            Ok(true)
        }
        Some(outcome) => {
            info!("Hotswapped {}", outcome.hotswapped.join(", "));
            if settings.mode == HotswapMode::HotswapOnly && !outcome.skipped.is_empty() {
                info!("{} change(s) were not deployed", outcome.skipped.len());
            }
            Ok(true)
        }
    }
}

async fn read_json(path: &Path) -> anyhow::Result<serde_json::Value> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Unable to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("{} is not valid JSON", path.display()))
}
