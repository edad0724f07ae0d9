//! Probe command: one-shot endpoint check

use std::sync::Arc;

use libpartsync_core::endpoint::check_endpoint;
use libpartsync_core::{PartsyncError, ProbeError};
use libpartsync_ipc::SystemProbe;
use serde::Serialize;

use crate::cli::Cli;
use crate::commands::load;
use crate::output::output_success;

#[derive(Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
enum StrategyOutput {
    NotConfigured,
    Found,
    NotFound,
    Error { message: String },
}

impl From<Option<Result<bool, ProbeError>>> for StrategyOutput {
    fn from(result: Option<Result<bool, ProbeError>>) -> Self {
        match result {
            None => StrategyOutput::NotConfigured,
            Some(Ok(true)) => StrategyOutput::Found,
            Some(Ok(false)) => StrategyOutput::NotFound,
            Some(Err(e)) => StrategyOutput::Error {
                message: e.to_string(),
            },
        }
    }
}

#[derive(Serialize)]
struct ProbeOutput {
    present: bool,
    ipc: StrategyOutput,
    process: StrategyOutput,
    process_names: Vec<String>,
}

pub fn run(cli: &Cli) -> Result<(), PartsyncError> {
    let config = load(cli)?;
    let probe = Arc::new(SystemProbe::new(
        config.endpoint.ipc_path.clone(),
        &config.endpoint.process_names,
    ));
    let timeout = config.monitor_settings().probe_timeout;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let report = runtime.block_on(check_endpoint(&probe, timeout));

    let output = ProbeOutput {
        present: report.present(),
        ipc: report.ipc.into(),
        process: report.process.into(),
        process_names: probe.process_names().to_vec(),
    };
    output_success(cli, &output, |out| {
        if out.present {
            println!("design tool is running");
        } else {
            println!("design tool not found");
        }
        if let StrategyOutput::Error { message } = &out.ipc {
            println!("  ipc probe failed: {}", message);
        }
        if let StrategyOutput::Error { message } = &out.process {
            println!("  process probe failed: {}", message);
        }
    });
    Ok(())
}
