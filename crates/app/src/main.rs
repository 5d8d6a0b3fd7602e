use std::process::ExitCode;
use std::sync::Arc;

use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tracing_subscriber::EnvFilter;
use transgpt_chat::audio::WavReplayInput;
use transgpt_chat::{ChatHub, DefaultBackends, HubConfig, Settings, SettingsError, SettingsStore};
use transgpt_llm::{AudioTranscriber, WhisperClient, create_remote_source};

mod commands;
mod shell;

use shell::Shell;

#[derive(Debug, Snafu)]
enum AppError {
    #[snafu(display("failed to read from stdin on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to save settings on `{stage}`: {source}"))]
    SaveSettings {
        stage: &'static str,
        source: SettingsError,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "transgpt=info,transgpt_chat=info,transgpt_llm=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(error = %error, "transgpt exited with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), AppError> {
    let store = SettingsStore::load();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let settings = ensure_api_key(&store, &mut lines).await?;
    let hub = build_hub(&settings);
    println!("transgpt ready. /help lists commands.");

    Shell::new(hub, settings.export_dir.clone(), settings.languages.clone())
        .run(lines)
        .await
        .context(ReadInputSnafu {
            stage: "shell-loop",
        })
}

/// Prompts for the API key when none is configured and saves it. An empty answer
/// keeps the remote backend disabled.
async fn ensure_api_key<R>(
    store: &SettingsStore,
    lines: &mut Lines<R>,
) -> Result<Arc<Settings>, AppError>
where
    R: AsyncBufRead + Unpin,
{
    let settings = store.settings();
    if settings.has_api_key() {
        return Ok(settings);
    }

    println!("No OpenAI API key configured. Enter one (empty to skip):");
    let answer = lines.next_line().await.context(ReadInputSnafu {
        stage: "read-api-key",
    })?;
    let api_key = answer.unwrap_or_default().trim().to_string();
    if api_key.is_empty() {
        tracing::warn!("no API key provided; only the local model is available");
        return Ok(settings);
    }

    let mut updated = Settings::clone(&settings);
    updated.provider.api_key = api_key;
    store.update(updated).context(SaveSettingsSnafu {
        stage: "save-api-key",
    })?;
    tracing::info!(path = %store.config_path().display(), "API key saved");
    Ok(store.settings())
}

fn build_hub(settings: &Settings) -> ChatHub {
    let provider_config = settings.to_provider_config();

    let remote = match provider_config.clone().map(create_remote_source) {
        Some(Ok(source)) => Some(source),
        Some(Err(error)) => {
            tracing::warn!(error = %error, "remote backend disabled");
            None
        }
        None => None,
    };
    let backends = DefaultBackends::new(
        remote,
        settings.local.runner.clone(),
        settings.local.params.clone(),
    );

    let mut hub = ChatHub::new(HubConfig::from_settings(settings), Arc::new(backends));

    if let Some(config) = provider_config {
        match WhisperClient::new(config) {
            Ok(client) => {
                let transcriber: Arc<dyn AudioTranscriber> = Arc::new(client);
                hub = hub.with_transcriber(transcriber);
            }
            Err(error) => tracing::warn!(error = %error, "transcription disabled"),
        }
    }

    match &settings.audio.input_file {
        Some(path) => {
            tracing::info!(path = %path.display(), "replaying audio input from file");
            hub = hub.with_audio_input(Arc::new(WavReplayInput::new(path.clone())));
        }
        None => tracing::info!("no audio input configured; recording is disabled"),
    }

    hub
}
