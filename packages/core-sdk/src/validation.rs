use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use url::Url;

use crate::error::ValidationErrors;
use crate::models::{ChartSpec, ChartType, DataPoint, DataValue, ProviderConfig, ProviderKind};

pub const QUERY_MIN_CHARS: usize = 5;
pub const QUERY_MAX_CHARS: usize = 500;
pub const MODEL_MAX_CHARS: usize = 50;
pub const TITLE_MAX_CHARS: usize = 200;
pub const DESCRIPTION_MAX_CHARS: usize = 1000;
pub const MAX_DATA_POINTS: usize = 2000;
pub const MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;
pub const UPLOAD_EXTENSIONS: [&str; 3] = ["csv", "xlsx", "xls"];

/**
 * \brief Hosts the local daemon variant may point at.
 */
pub const LOOPBACK_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "::1"];

static MODEL_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.:\-]+$").expect("model name pattern"));

/**
 * \brief Validates a natural-language query and returns it trimmed.
 */
pub fn validate_user_query(query: &str) -> Result<String, ValidationErrors> {
    let mut errs = ValidationErrors::new();
    let trimmed = query.trim();
    let len = trimmed.chars().count();
    if len == 0 {
        errs.push("Query cannot be empty after trimming whitespace");
    } else if len < QUERY_MIN_CHARS {
        errs.push(format!(
            "Query is too short (minimum {} characters)",
            QUERY_MIN_CHARS
        ));
    }
    if len > QUERY_MAX_CHARS {
        errs.push(format!(
            "Query is too long (maximum {} characters)",
            QUERY_MAX_CHARS
        ));
    }
    errs.into_result(trimmed.to_string())
}

/**
 * \brief Validates provider settings, including per-provider requirements.
 */
pub fn validate_provider_config(config: &ProviderConfig) -> Result<(), ValidationErrors> {
    let mut errs = ValidationErrors::new();

    let model_len = config.model.chars().count();
    if model_len == 0 {
        errs.push("Model name cannot be empty");
    } else {
        if model_len > MODEL_MAX_CHARS {
            errs.push(format!(
                "Model name is too long (max {} characters)",
                MODEL_MAX_CHARS
            ));
        }
        if !MODEL_NAME.is_match(&config.model) {
            errs.push(
                "Model name can only contain letters, numbers, and these characters: _ - : .",
            );
        }
    }

    let parsed_url = match config.base_url() {
        Some(raw) => match Url::parse(raw) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => {
                Some(url)
            }
            _ => {
                errs.push("baseUrl must be a valid http(s) URL");
                None
            }
        },
        None => None,
    };

    match config.provider {
        ProviderKind::OpenAi | ProviderKind::Anthropic => {
            if config.api_key().is_none() {
                errs.push(format!(
                    "apiKey is required for {}",
                    config.provider.label()
                ));
            }
        }
        ProviderKind::OpenAiCompatible => {
            if config.base_url().is_none() {
                errs.push("baseUrl is required for OpenAI Compatible providers");
            }
        }
        ProviderKind::Ollama => {
            if config.base_url().is_none() {
                errs.push("baseUrl is required for Ollama");
            } else if let Some(url) = &parsed_url {
                if !is_loopback_host(url) {
                    errs.push(format!(
                        "baseUrl host for Ollama must be one of: {}",
                        LOOPBACK_HOSTS.join(", ")
                    ));
                }
            }
        }
        ProviderKind::Google => {}
    }

    errs.into_result(())
}

fn is_loopback_host(url: &Url) -> bool {
    match url.host_str() {
        Some(host) => {
            let host = host.trim_start_matches('[').trim_end_matches(']');
            LOOPBACK_HOSTS.iter().any(|allowed| host.eq_ignore_ascii_case(allowed))
        }
        None => false,
    }
}

/**
 * \brief Upload pre-check for the file-parsing collaborator.
 */
pub fn validate_upload(file_name: &str, size_bytes: u64) -> Result<(), ValidationErrors> {
    let mut errs = ValidationErrors::new();
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match extension {
        Some(ext) if UPLOAD_EXTENSIONS.contains(&ext.as_str()) => {}
        _ => errs.push("Unsupported file format. Please upload CSV or Excel."),
    }
    if size_bytes == 0 {
        errs.push("File is empty");
    } else if size_bytes > MAX_UPLOAD_BYTES {
        errs.push(format!(
            "File is too large (max {} MB)",
            MAX_UPLOAD_BYTES / (1024 * 1024)
        ));
    }
    errs.into_result(())
}

/**
 * \brief Validates raw model output against the chart contract.
 *
 * `type` is uppercased first. Cross-field rules run only once the shape itself is sound.
 * A model-supplied `id` is dropped; ids belong to the caller.
 */
pub fn validate_chart(value: Value) -> Result<ChartSpec, ValidationErrors> {
    let mut errs = ValidationErrors::new();
    let mut obj = match value {
        Value::Object(obj) => obj,
        _ => {
            errs.push("Chart must be a JSON object");
            return Err(errs);
        }
    };

    let title = bounded_string(&obj, "title", "Chart title", TITLE_MAX_CHARS, &mut errs);
    let description = bounded_string(
        &obj,
        "description",
        "Chart description",
        DESCRIPTION_MAX_CHARS,
        &mut errs,
    );

    if let Some(Value::String(t)) = obj.get_mut("type") {
        *t = t.to_uppercase();
    }
    let chart_type = match obj.get("type") {
        Some(Value::String(t)) => match ChartType::from_name(t) {
            Some(ct) => Some(ct),
            None => {
                errs.push(format!(
                    "Chart type must be one of: {}",
                    ChartType::NAMES.join(", ")
                ));
                None
            }
        },
        _ => {
            errs.push("Chart type is required");
            None
        }
    };

    let x_axis_key = non_empty_string(&obj, "xAxisKey", "X-axis key", &mut errs);
    let data_key = non_empty_string(&obj, "dataKey", "Data key", &mut errs);
    let data = data_points(obj.get("data"), &mut errs);

    if let (Some(x_key), Some(d_key), Some(points)) = (&x_axis_key, &data_key, &data) {
        let all_have_keys = points
            .iter()
            .all(|p| p.contains_key(x_key) && p.contains_key(d_key));
        if !all_have_keys {
            errs.push("All data points must contain both xAxisKey and dataKey fields");
        } else if !points.iter().all(|p| p[d_key].is_number()) {
            errs.push("All dataKey values must be numbers for proper chart rendering");
        }
    }

    if !errs.is_empty() {
        return Err(errs);
    }

    match (title, description, chart_type, x_axis_key, data_key, data) {
        (Some(title), Some(description), Some(chart_type), Some(x_axis_key), Some(data_key), Some(data)) => {
            Ok(ChartSpec {
                title,
                description,
                chart_type,
                x_axis_key,
                data_key,
                data,
                id: None,
            })
        }
        _ => {
            errs.push("Chart structure is incomplete");
            Err(errs)
        }
    }
}

fn bounded_string(
    obj: &Map<String, Value>,
    key: &str,
    label: &str,
    max: usize,
    errs: &mut ValidationErrors,
) -> Option<String> {
    match obj.get(key) {
        Some(Value::String(s)) => {
            let len = s.chars().count();
            if len == 0 {
                errs.push(format!("{} cannot be empty", label));
                None
            } else if len > max {
                errs.push(format!("{} is too long (max {} characters)", label, max));
                None
            } else {
                Some(s.clone())
            }
        }
        _ => {
            errs.push(format!("{} is required", label));
            None
        }
    }
}

fn non_empty_string(
    obj: &Map<String, Value>,
    key: &str,
    label: &str,
    errs: &mut ValidationErrors,
) -> Option<String> {
    match obj.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::String(_)) => {
            errs.push(format!("{} cannot be empty", label));
            None
        }
        _ => {
            errs.push(format!("{} is required", label));
            None
        }
    }
}

fn data_points(value: Option<&Value>, errs: &mut ValidationErrors) -> Option<Vec<DataPoint>> {
    let items = match value {
        Some(Value::Array(items)) => items,
        _ => {
            errs.push("Chart data must be an array of data points");
            return None;
        }
    };
    if items.is_empty() {
        errs.push("Chart must have at least one data point");
        return None;
    }
    if items.len() > MAX_DATA_POINTS {
        errs.push(format!(
            "Too many data points (max {})",
            MAX_DATA_POINTS
        ));
        return None;
    }

    let mut points = Vec::with_capacity(items.len());
    let mut ok = true;
    for (idx, item) in items.iter().enumerate() {
        let Value::Object(fields) = item else {
            errs.push(format!("Data point {} must be an object", idx));
            ok = false;
            continue;
        };
        let mut point = DataPoint::new();
        for (key, cell) in fields {
            match cell {
                Value::Number(n) => {
                    point.insert(key.clone(), DataValue::Number(n.clone()));
                }
                Value::String(s) => {
                    point.insert(key.clone(), DataValue::Text(s.clone()));
                }
                _ => {
                    errs.push(format!(
                        "Data point {} field \"{}\" must be a string or number",
                        idx, key
                    ));
                    ok = false;
                }
            }
        }
        points.push(point);
    }
    ok.then_some(points)
}
