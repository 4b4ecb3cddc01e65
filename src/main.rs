use bioflow_assistant::{
    cli::{self, Args},
    config::Config,
    streaming::ResponseStreamer,
    utils::init_logger,
    Assistant,
};
use clap::Parser;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration, command line flags take precedence
    let mut config = Config::from_env()?;
    args.apply(&mut config);

    let _log_guard = init_logger(&config.logging);
    info!(
        knowledge_db = %config.knowledge.db_path.display(),
        provider = %config.llm.provider,
        "Configuration loaded"
    );

    let streamer = ResponseStreamer::from_config(&config.stream);
    let mut assistant = Assistant::from_config(config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start assistant: {}", e))?;

    match args.one_shot_query() {
        Some(query) => cli::run_once(&mut assistant, &streamer, &query).await,
        None => cli::run_repl(&mut assistant, &streamer).await?,
    }

    Ok(())
}
