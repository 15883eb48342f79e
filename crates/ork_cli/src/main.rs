//! Read-only CLI over the built-in resources.
//!
//! # Responsibility
//! - Load a JSON config, bring up logging and the pool, run one query.
//! - Print records as JSON on stdout and errors on stderr.
//!
//! Usage: `ork_cli <config.json> <resource> list|count|get [rid] [key=value ...]`

use log::info;
use ork_core::{
    builtin, init_from_config, parse_criteria, AppConfig, AppContext, EngineError, ListPage,
    ResourceEngine,
};
use std::process::ExitCode;

const USAGE: &str = "usage: ork_cli <config.json> <resource> list|count|get [rid] [key=value ...]";

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args) {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(message) => {
            eprintln!("{message}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &[String]) -> Result<String, String> {
    let [config_path, resource, command, rest @ ..] = args else {
        return Err(USAGE.to_string());
    };

    let config = AppConfig::load(config_path).map_err(|err| err.to_string())?;
    init_from_config(&config.log)?;

    let context = AppContext::new();
    context
        .refresh(config.db.clone())
        .map_err(|err| EngineError::from(err).to_string())?;
    info!(
        "event=cli_command module=cli status=start resource={} command={}",
        resource, command
    );

    let descriptor = builtin::descriptor(resource).map_err(|err| err.to_string())?;
    let engine = ResourceEngine::new(descriptor, &context);
    let output = match (command.as_str(), rest) {
        ("get", [rid]) => engine
            .get(rid.as_str())
            .map(serde_json::Value::Object)
            .map_err(|err| err.to_string())?,
        ("list", pairs) => {
            let criteria = parse_criteria(split_pairs(pairs)?, None).map_err(|err| err.to_string())?;
            let count = engine
                .count(&criteria.filters)
                .map_err(|err| err.to_string())?;
            let data = engine.list(&criteria).map_err(|err| err.to_string())?;
            serde_json::to_value(ListPage { count, data }).map_err(|err| err.to_string())?
        }
        ("count", pairs) => {
            let criteria = parse_criteria(split_pairs(pairs)?, None).map_err(|err| err.to_string())?;
            let count = engine
                .count(&criteria.filters)
                .map_err(|err| err.to_string())?;
            serde_json::json!({ "count": count })
        }
        _ => return Err(USAGE.to_string()),
    };

    context.shutdown();
    serde_json::to_string_pretty(&output).map_err(|err| err.to_string())
}

fn split_pairs(raw: &[String]) -> Result<Vec<(&str, &str)>, String> {
    raw.iter()
        .map(|pair| {
            pair.split_once('=')
                .ok_or_else(|| format!("expected key=value, got `{pair}`"))
        })
        .collect()
}
