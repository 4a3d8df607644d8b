use crate::error::GenerateError;
use crate::models::{DatasetRow, DynamicData};

/** \brief Row cap for anything sent to a model. */
pub const MAX_ROWS_FOR_AI: usize = 500;

pub const SCHEMA_PLACEHOLDER: &str = "{{SCHEMA}}";
pub const DATASET_PLACEHOLDER: &str = "{{DATASET}}";

/** \brief Built-in template used when no prompt file is configured. */
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a data visualization assistant. You turn a user's question about a dataset into a single chart definition.

The dataset is described below. Only use columns that exist in it.

{{SCHEMA}}

Dataset rows (JSON, possibly truncated):
{{DATASET}}

Respond with ONE JSON object and nothing else, using exactly this shape:
{
  "title": "<short chart title, max 200 characters>",
  "description": "<one or two sentences explaining the insight, max 1000 characters>",
  "type": "BAR" | "LINE" | "AREA" | "PIE",
  "xAxisKey": "<key used for the category / x axis>",
  "dataKey": "<key holding the numeric value>",
  "data": [ { "<xAxisKey>": "<label>", "<dataKey>": <number> } ]
}

Rules:
1. Aggregate the rows yourself (sum, count, average) when the question asks for it.
2. Every object in "data" must contain both xAxisKey and dataKey.
3. Every dataKey value must be a JSON number, never a string.
4. Use LINE or AREA for trends over time, PIE for parts of a whole, BAR otherwise.
5. Do not wrap the JSON in markdown or add commentary."#;

/**
 * \brief First `MAX_ROWS_FOR_AI` rows of a dataset.
 */
pub fn sample_rows(rows: &[DatasetRow]) -> &[DatasetRow] {
    &rows[..rows.len().min(MAX_ROWS_FOR_AI)]
}

/**
 * \brief Serializes the truncated sample as a JSON array.
 */
pub fn dataset_json(rows: &[DatasetRow]) -> Result<String, GenerateError> {
    serde_json::to_string(sample_rows(rows))
        .map_err(|e| GenerateError::Input(format!("dataset could not be serialized: {}", e)))
}

/**
 * \brief Substitutes both placeholders in one pass.
 *
 * Placeholder text inside `schema` or `dataset_json` is never expanded again, so
 * the result does not depend on substitution order. A template missing either
 * placeholder is rejected instead of silently dropping data.
 */
pub fn render_template(
    template: &str,
    schema: &str,
    dataset_json: &str,
) -> Result<String, GenerateError> {
    let missing: Vec<&str> = [SCHEMA_PLACEHOLDER, DATASET_PLACEHOLDER]
        .into_iter()
        .filter(|p| !template.contains(p))
        .collect();
    if !missing.is_empty() {
        return Err(GenerateError::Input(format!(
            "System prompt template is missing placeholder(s): {}",
            missing.join(", ")
        )));
    }

    let mut out = String::with_capacity(template.len() + schema.len() + dataset_json.len());
    let mut rest = template;
    while let Some(pos) = rest.find("{{") {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if let Some(after) = tail.strip_prefix(SCHEMA_PLACEHOLDER) {
            out.push_str(schema);
            rest = after;
        } else if let Some(after) = tail.strip_prefix(DATASET_PLACEHOLDER) {
            out.push_str(dataset_json);
            rest = after;
        } else {
            out.push_str("{{");
            rest = &tail[2..];
        }
    }
    out.push_str(rest);
    Ok(out)
}

/**
 * \brief Renders the chart system prompt from a template and uploaded data.
 */
pub fn build_system_prompt(template: &str, data: &DynamicData) -> Result<String, GenerateError> {
    let rows = dataset_json(&data.dataset)?;
    render_template(template, &data.schema, &rows)
}

/**
 * \brief Built-in request for follow-up questions about a dataset.
 */
pub fn build_suggestions_prompt(data: &DynamicData) -> Result<String, GenerateError> {
    let rows = dataset_json(&data.dataset)?;
    Ok(format!(
        "Analyze the following dataset schema and data sample.\n\
         Generate 3 insightful questions that a user could ask to create meaningful charts/visualizations from this data.\n\
         Return the result as a JSON object with a \"suggestions\" key containing an array of strings.\n\n\
         Schema:\n{}\n\n\
         Data Sample:\n{}",
        data.schema, rows
    ))
}
