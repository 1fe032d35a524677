//! Main Entrypoint for the Gauntlet Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Loading and validating the guide content (fatal when malformed).
//! 3. Initializing shared collaborator services (LLM clients, scanner).
//! 4. Serving either the networked multi-session transport (axum) or a
//!    single terminal session, over the same worker code.

use std::sync::Arc;

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use gauntlet_api::{
    config::{Config, Provider},
    registry::SessionRegistry,
    router::create_router,
    state::AppState,
    terminal::run_terminal,
    worker::{ResponderFactory, SessionDeps},
};
use gauntlet_core::{
    guide::Guide,
    llm::{LanguageModel, OpenAICompatibleModel},
    progress::{FeedbackLog, ProgressStore},
    responder::ChatResponder,
    scanner::{HttpScanner, NoopScanner, SecurityScanner},
};

/// System prompt for the evaluator role.
const EVALUATOR_SYSTEM_PROMPT: &str = "You are an AI security mentor and evaluator. Your role is \
    to assess interactions between users and AI systems, determining if security challenges have \
    been completed successfully. You provide clear, structured evaluations based on specific \
    success criteria. Respond in plain text, following the requested format, without hidden \
    reasoning steps.";

/// System prompt for the security-lesson explainer role.
const EXPLAINER_SYSTEM_PROMPT: &str = "You are a security analysis assistant. Your role is to \
    explain security concerns in a clear, educational manner. Focus on making complex security \
    concepts understandable while maintaining a fun and engaging tone. Always structure your \
    responses with clear explanations of risks. Try not to repeat yourself.";

#[derive(Parser, Debug)]
#[command(name = "gauntlet", about = "Guided AI-security challenge game")]
struct Args {
    /// Run a single interactive session on this terminal instead of serving.
    #[arg(long)]
    terminal: bool,

    /// Chapter to start new sessions from (out-of-range values are clamped).
    #[arg(long, default_value_t = 0)]
    chapter: usize,

    /// Challenge to start new sessions from (out-of-range values are clamped).
    #[arg(long, default_value_t = 0)]
    challenge: usize,
}

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install Ctrl+C handler");
        return;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

fn openai_config(config: &Config) -> anyhow::Result<OpenAIConfig> {
    match config.provider {
        Provider::OpenAI => {
            let api_key = config
                .openai_api_key
                .as_ref()
                .context("OPENAI_API_KEY missing after validation")?;
            Ok(OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base("https://api.openai.com/v1/"))
        }
        Provider::Gemini => {
            let api_key = config
                .gemini_api_key
                .as_ref()
                .context("GEMINI_API_KEY missing after validation")?;
            Ok(OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base("https://generativelanguage.googleapis.com/v1beta/openai"))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Load Guide Content ---
    let guide = Arc::new(
        Guide::load(&config.guide_path)
            .with_context(|| format!("invalid guide at {}", config.guide_path.display()))?,
    );
    info!(
        title = %guide.title,
        chapters = guide.chapters.len(),
        "Guide loaded and validated."
    );

    // --- 4. Initialize Shared Services ---
    let llm_config = openai_config(&config)?;
    info!(provider = ?config.provider, "Using LLM provider.");

    let evaluator: Arc<dyn LanguageModel> = Arc::new(OpenAICompatibleModel::new(
        llm_config.clone(),
        config.eval_model.clone(),
        EVALUATOR_SYSTEM_PROMPT.to_string(),
        0.1,
    ));
    let explainer: Arc<dyn LanguageModel> = Arc::new(OpenAICompatibleModel::new(
        llm_config.clone(),
        config.chat_model.clone(),
        EXPLAINER_SYSTEM_PROMPT.to_string(),
        0.1,
    ));
    let scanner: Arc<dyn SecurityScanner> = match &config.scanner_api_key {
        Some(api_key) => Arc::new(HttpScanner::new(
            config.scanner_base_url.clone(),
            api_key.clone(),
            "gauntlet@localhost".to_string(),
        )),
        None => {
            warn!("SCANNER_API_KEY not set; security scanning disabled");
            Arc::new(NoopScanner)
        }
    };

    let responder_factory: ResponderFactory = {
        let llm_config = llm_config.clone();
        let model = config.chat_model.clone();
        Arc::new(move || Arc::new(ChatResponder::new(llm_config.clone(), model.clone(), 0.7)))
    };

    let deps = Arc::new(SessionDeps {
        guide: guide.clone(),
        responder_factory,
        evaluator,
        explainer,
        scanner,
        progress: ProgressStore::open(&config.progress_dir)
            .context("failed to open progress directory")?,
        feedback: FeedbackLog::open(&config.learnings_dir)
            .context("failed to open learnings directory")?,
        input_timeout: config.input_timeout,
        start_chapter: args.chapter,
        start_challenge: args.challenge,
    });
    let registry = Arc::new(SessionRegistry::new());

    // --- 5. Run ---
    if args.terminal {
        return run_terminal(registry, deps).await;
    }

    let app_state = Arc::new(AppState {
        guide,
        registry,
        deps,
        config: Arc::new(config.clone()),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = create_router(app_state).layer(cors);

    info!(
        model = %config.chat_model,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server has shut down.");
    Ok(())
}
