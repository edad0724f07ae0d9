use libpartsync_core::PartsyncError;
use serde::Serialize;

use crate::cli::Cli;

const SCHEMA_VERSION: u32 = 1;

/// JSON response envelope
#[derive(Serialize)]
pub struct JsonResponse<T: Serialize> {
    pub schema_version: u32,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonError>,
}

#[derive(Serialize)]
pub struct JsonError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

/// Output a successful result. Human output is printed by `render`.
pub fn output_success<T: Serialize>(cli: &Cli, data: &T, render: impl FnOnce(&T)) {
    if cli.json {
        let response = JsonResponse {
            schema_version: SCHEMA_VERSION,
            ok: true,
            data: Some(data),
            error: None,
        };
        match serde_json::to_string_pretty(&response) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("error: cannot encode response: {}", e),
        }
    } else if !cli.quiet {
        render(data);
    }
}

/// Output an error
pub fn output_error(cli: &Cli, err: &PartsyncError) {
    let suggestions = err.suggestions();
    if cli.json {
        let details = if suggestions.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::json!({ "suggestions": suggestions })
        };

        let response: JsonResponse<()> = JsonResponse {
            schema_version: SCHEMA_VERSION,
            ok: false,
            data: None,
            error: Some(JsonError {
                code: err.error_code().to_string(),
                message: err.to_string(),
                details,
            }),
        };
        match serde_json::to_string_pretty(&response) {
            Ok(json) => eprintln!("{}", json),
            Err(_) => eprintln!("error: {}", err),
        }
    } else {
        eprintln!("error: {}", err);
        if !suggestions.is_empty() {
            eprintln!();
            eprintln!("Suggestions:");
            for suggestion in suggestions {
                eprintln!("  - {}", suggestion);
            }
        }
    }
}
