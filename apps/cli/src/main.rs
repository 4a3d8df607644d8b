use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chartpilot_core_sdk::{
    config::{self, ServerSettings},
    dataset,
    db::{self, StoredProvider},
    models::{DynamicData, ProviderConfig, ProviderKind},
    server, telemetry,
    validation::{validate_provider_config, validate_upload},
    Dispatcher, ProviderRegistry,
};

/**
 * \brief Command-line entry: provider setup, one-shot generation and the HTTP server.
 */
#[derive(Parser, Debug)]
#[command(name = "chartpilot", version, about = "Natural-language charts from tabular data")]
struct Cli {
    /// Settings database
    #[arg(long, global = true, env = "CHARTPILOT_DB", default_value = db::DEFAULT_DB_FILE)]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief Validates and saves a provider, then selects it as default.
     */
    Init {
        /// GOOGLE, OPENAI, ANTHROPIC, OPENAI_COMPATIBLE or OLLAMA
        #[arg(long)]
        provider: String,
        #[arg(long)]
        model: String,
        #[arg(long, env = "CHARTPILOT_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
        #[arg(long)]
        base_url: Option<String>,
        #[arg(long, default_value = "default")]
        name: String,
        #[arg(long, default_value_t = false)]
        enable_telemetry: bool,
    },

    /// List saved providers (keys masked)
    Providers,

    /**
     * \brief Changes fields of a saved provider; omitted flags keep their value.
     */
    Edit {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        base_url: Option<String>,
    },

    /// Delete a saved provider
    Remove { id: i64 },

    /// Select the default provider
    Use { id: i64 },

    /**
     * \brief Generates one chart and prints it as JSON.
     */
    Generate {
        #[arg(long)]
        prompt: String,
        /// DynamicData JSON object, or a bare JSON array of rows
        #[arg(long)]
        data: PathBuf,
        /// Original upload name used when `--data` is a bare row array
        #[arg(long, default_value = "dataset.csv")]
        file_name: String,
        #[arg(long, env = "CHARTPILOT_PROMPT_FILE")]
        template: Option<PathBuf>,
        #[arg(long)]
        provider_id: Option<i64>,
    },

    /// Print suggested questions for a dataset
    Suggest {
        #[arg(long)]
        data: PathBuf,
        #[arg(long, default_value = "dataset.csv")]
        file_name: String,
        #[arg(long)]
        provider_id: Option<i64>,
    },

    /// Start the HTTP server
    Serve {
        #[arg(long)]
        addr: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let conn = db::open_db(&cli.db).context("open database failed")?;
    db::migrate(&conn).context("apply migrations failed")?;
    let telemetry_enabled = db::get_telemetry_enabled(&conn).unwrap_or(false);
    telemetry::set_enabled(telemetry_enabled);

    match cli.command {
        Commands::Init {
            provider,
            model,
            api_key,
            base_url,
            name,
            enable_telemetry,
        } => {
            let kind = parse_kind(&provider)?;
            let config = ProviderConfig {
                provider: kind,
                api_key,
                model,
                base_url,
            };
            validate_provider_config(&config)
                .map_err(|errs| anyhow!("Invalid configuration: {}", errs))?;

            let provider_id =
                db::upsert_default_provider(&conn, &name, &config).context("save provider failed")?;
            db::set_telemetry_enabled(&conn, enable_telemetry).context("save telemetry failed")?;
            telemetry::set_enabled(enable_telemetry);
            telemetry::log_event("cli.init", &format!("provider={} id={}", kind, provider_id));
            println!(
                "Saved provider id={} (name={} | {} | {})",
                provider_id, name, kind, config.model
            );
        }
        Commands::Providers => {
            let default_id = db::get_default_provider_id(&conn).context("load default failed")?;
            let providers = db::list_providers(&conn).context("list providers failed")?;
            if providers.is_empty() {
                println!("No providers saved, run: chartpilot init --provider ... --model ...");
            }
            for p in providers {
                let marker = if Some(p.id) == default_id { "*" } else { " " };
                println!(
                    "{} {:>3}  {:<16} {:<18} {:<24} {:<28} {}",
                    marker,
                    p.id,
                    p.name,
                    p.config.provider,
                    p.config.model,
                    p.config.base_url().unwrap_or("-"),
                    p.masked_key()
                );
            }
        }
        Commands::Edit {
            id,
            name,
            provider,
            model,
            api_key,
            base_url,
        } => {
            let current = db::get_provider_by_id(&conn, id)
                .context("load provider failed")?
                .with_context(|| format!("provider id {} not found", id))?;
            let config = edited_config(&current.config, provider, model, api_key, base_url)?;
            validate_provider_config(&config)
                .map_err(|errs| anyhow!("Invalid configuration: {}", errs))?;
            let name = name.unwrap_or(current.name);
            db::update_provider(&conn, id, &name, &config).context("update provider failed")?;
            println!(
                "Updated provider id={} (name={} | {} | {})",
                id, name, config.provider, config.model
            );
        }
        Commands::Remove { id } => {
            db::delete_provider(&conn, id).context("remove provider failed")?;
            println!("Removed provider id={}", id);
        }
        Commands::Use { id } => {
            db::set_default_provider_id(&conn, id).context("select provider failed")?;
            println!("Default provider set to id={}", id);
        }
        Commands::Generate {
            prompt,
            data,
            file_name,
            template,
            provider_id,
        } => {
            let provider = resolve_provider(&conn, provider_id)?;
            let dynamic_data = load_dynamic_data(&data, &file_name)?;
            let template = config::load_prompt_template(template.as_deref())?;
            let dispatcher = Dispatcher::new(ProviderRegistry::with_defaults()?);

            info!(provider = %provider.config.provider, rows = dynamic_data.dataset.len(), "generating chart");
            let chart = dispatcher
                .generate_chart(&prompt, &provider.config, &template, Some(&dynamic_data))
                .await
                .context("chart generation failed")?;
            println!("{}", serde_json::to_string_pretty(&chart)?);
        }
        Commands::Suggest {
            data,
            file_name,
            provider_id,
        } => {
            let provider = resolve_provider(&conn, provider_id)?;
            let dynamic_data = load_dynamic_data(&data, &file_name)?;
            let template = ServerSettings::from_env().load_prompt_template()?;
            let dispatcher = Dispatcher::new(ProviderRegistry::with_defaults()?);

            let suggestions = dispatcher
                .generate_suggestions(&provider.config, &template, &dynamic_data)
                .await;
            for s in suggestions_or_fallback(suggestions, dynamic_data) {
                println!("- {}", s);
            }
        }
        Commands::Serve { addr } => {
            let mut settings = ServerSettings::from_env();
            settings.db_path = cli.db;
            if let Some(addr) = addr {
                settings.addr = addr;
            }
            server::run(&settings).await?;
        }
    }

    Ok(())
}

fn resolve_provider(conn: &db::DbConnection, id: Option<i64>) -> Result<StoredProvider> {
    let provider = match id {
        Some(id) => db::get_provider_by_id(conn, id)
            .context("load provider failed")?
            .with_context(|| format!("provider id {} not found", id))?,
        None => db::get_default_provider(conn)
            .context("load provider failed")?
            .context("no default provider, run: chartpilot init --provider ... --model ...")?,
    };
    Ok(provider)
}

fn parse_kind(provider: &str) -> Result<ProviderKind> {
    ProviderKind::parse(provider).ok_or_else(|| {
        anyhow!(
            "unknown provider {}, expected one of: {}",
            provider,
            ProviderKind::ALL.map(|k| k.as_str()).join(", ")
        )
    })
}

/**
 * \brief Overlays the `edit` flags on a stored config. An empty string clears the key or base URL.
 */
fn edited_config(
    current: &ProviderConfig,
    provider: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
) -> Result<ProviderConfig> {
    let provider = match provider {
        Some(p) => parse_kind(&p)?,
        None => current.provider,
    };
    let clear_if_empty = |v: String| if v.is_empty() { None } else { Some(v) };
    Ok(ProviderConfig {
        provider,
        model: model.unwrap_or_else(|| current.model.clone()),
        api_key: api_key.map_or_else(|| current.api_key.clone(), clear_if_empty),
        base_url: base_url.map_or_else(|| current.base_url.clone(), clear_if_empty),
    })
}

/**
 * \brief Model suggestions win; otherwise the upload's own list is topped up with heuristics.
 */
fn suggestions_or_fallback(from_model: Vec<String>, mut data: DynamicData) -> Vec<String> {
    if !from_model.is_empty() {
        return from_model;
    }
    let heuristics = dataset::heuristic_suggestions(&data.dataset);
    data.merge_suggestions(heuristics);
    let mut list = data.suggestions.unwrap_or_default();
    list.truncate(3);
    list
}

/**
 * \brief Reads `--data`: a DynamicData object or a bare array of row objects.
 */
fn load_dynamic_data(path: &Path, file_name: &str) -> Result<DynamicData> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read data file {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("data file {} is not valid JSON", path.display()))?;

    let data = match value {
        Value::Array(items) => {
            let rows = items
                .into_iter()
                .enumerate()
                .map(|(i, item)| match item {
                    Value::Object(row) => Ok(row),
                    _ => Err(anyhow!("row {} is not a JSON object", i)),
                })
                .collect::<Result<Vec<_>>>()?;
            dataset::from_rows(file_name, rows)
        }
        other => serde_json::from_value::<DynamicData>(other)
            .context("data file is neither a dataset object nor an array of rows")?,
    };

    validate_upload(&data.file_name, raw.len() as u64)
        .map_err(|errs| anyhow!("Upload rejected: {}", errs))?;
    Ok(data)
}
