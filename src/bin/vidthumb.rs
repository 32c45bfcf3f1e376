use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use vidthumb_core::ThumbnailError;
use vidthumb_core::sidecar_api;

#[derive(Debug, Parser)]
#[command(
    name = "vidthumb",
    version,
    about = "Render a looping GIF or MP4 preview from sections of a video"
)]
struct Cli {
    /// Source video file
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Request options as a JSON object, e.g. '{"format":"mp4","autoSections":4}'
    #[arg(short, long, value_name = "JSON", value_parser = parse_options_json)]
    options: Option<serde_json::Value>,
}

fn parse_options_json(raw: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("Invalid options payload: {}", e))
}

/// Options errors share clap's usage-error status.
fn exit_status_for(err: &ThumbnailError) -> u8 {
    match err {
        ThumbnailError::Options(_) => 2,
        _ => 1,
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    sidecar_api::cleanup_startup_temp();

    let options = cli.options.unwrap_or(serde_json::Value::Null);
    let result = sidecar_api::generate_with_events(&cli.input, options, None);
    match result {
        Ok(result) => match result.to_json() {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("vidthumb: failed to serialize result: {}", e);
                ExitCode::from(1)
            }
        },
        Err(err) => {
            let payload = sidecar_api::error_payload(&err);
            eprintln!("vidthumb: {}", payload.summary);
            if payload.detail != payload.summary {
                log::debug!(target: "vidthumb::cli", "{}", payload.detail);
            }
            ExitCode::from(exit_status_for(&err))
        }
    }
}
