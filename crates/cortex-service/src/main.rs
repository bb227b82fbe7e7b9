use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use cortex_agent::tools::{BrainSearchTool, FactsCheckSkill, FactsTool, WebSearchTool};
use cortex_agent::{run_event_loop, ContextComposer, MessagePipeline, Notifier};
use cortex_conversation::ConversationManager;
use cortex_core::config::{Config, DEFAULT_KEEP_RECENT};
use cortex_hooks::{CitationHook, HookSet, IntentClassifierHook};
use cortex_mcp::McpManager;
use cortex_provider::anthropic::AnthropicProvider;
use cortex_provider::ollama::OllamaProvider;
use cortex_provider::{ApiKeyStore, ModelManager, ModelPrefsStore};
use cortex_search::web::{WebSearchClient, WebSearchProvider};
use cortex_search::SemanticSearchClient;
use cortex_secrets::{resolve_ref, EnvSecretStore, HttpSecretStore, SecretStore};
use cortex_tool::{ToolRegistry, ToolStateStore};

mod console;
mod health;
mod supervisor;

#[derive(Parser)]
#[command(name = "cortex", about = "Cortex conversational assistant service")]
struct Cli {
    /// Tool-server config (overlaid by the sibling .local.json).
    #[arg(long, default_value = "config/tool_servers.json")]
    tool_servers: PathBuf,

    /// Bind address for the health endpoint.
    #[arg(long, default_value = "127.0.0.1:9090")]
    health_bind: String,

    /// Give up on a reply after this many seconds (0 = no bound).
    #[arg(long, default_value_t = 120)]
    reply_timeout_secs: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cortex=info,tower_http=warn".into()),
        )
        .init();

    std::process::exit(run(Cli::parse()).await);
}

async fn run(cli: Cli) -> i32 {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration error");
            return 1;
        }
    };
    info!(
        brain = %config.brain_folder,
        llm = %config.llm_url,
        model = %config.model,
        "starting cortex"
    );

    // Secret backend. A configured-but-unreachable store is a fatal
    // initialization error; without one, secrets come from the environment.
    let secrets: Arc<dyn SecretStore> = match &config.secret_store_url {
        Some(url) => {
            let store =
                HttpSecretStore::new(url, config.secret_store_token.as_deref().unwrap_or(""));
            if !store.health_check().await {
                error!(url = %url, "secret store configured but unreachable");
                return 1;
            }
            Arc::new(store)
        }
        None => Arc::new(EnvSecretStore),
    };

    // Providers: the pipe-inference server is always registered and is the
    // default route; the remote REST provider joins when a key resolves.
    let ollama = Arc::new(OllamaProvider::new(&config.llm_url));
    let api_keys = Arc::new(ApiKeyStore::new(None));
    let mut models = ModelManager::new("ollama", &config.model, ModelPrefsStore::new(None));
    models.register(ollama.clone());
    match secrets.get("ANTHROPIC_API_KEY").await {
        Ok(key) => {
            models.register(Arc::new(
                AnthropicProvider::new(Some(key), None).with_user_keys(api_keys.clone()),
            ));
        }
        Err(_) => info!("no Anthropic key configured, remote provider disabled"),
    }
    let models = Arc::new(models);

    let conversations = Arc::new(
        ConversationManager::new(&config.brain_folder)
            .with_summarizer(ollama.clone(), &config.model),
    );

    // Search collaborators.
    let brain = config
        .enable_brain_search
        .then(|| Arc::new(SemanticSearchClient::new(&config.search_url)));
    let web = if config.enable_web_search {
        match build_web_provider(&config, secrets.as_ref()).await {
            Some(provider) => Some(Arc::new(WebSearchClient::new(provider, 5))),
            None => None,
        }
    } else {
        None
    };

    // Tool registry: built-ins, the facts-check skill, then tool servers.
    let registry = Arc::new(ToolRegistry::new(ToolStateStore::new(None)));
    registry.register(Arc::new(FactsTool::new(None)));
    registry.register(Arc::new(FactsCheckSkill::new(None)));
    if let Some(brain) = &brain {
        registry.register(Arc::new(BrainSearchTool::new(brain.clone(), 5)));
    }
    if let Some(web) = &web {
        registry.register(Arc::new(WebSearchTool::new(web.clone())));
    }

    let mut mcp = McpManager::new(registry.clone(), secrets.clone(), &cli.tool_servers, None);
    mcp.startup().await;

    let mut hooks = HookSet::new();
    hooks.register_pre(Arc::new(IntentClassifierHook));
    hooks.register_post(Arc::new(CitationHook));

    let platform = Arc::new(console::ConsolePlatform::new());
    let composer = ContextComposer::new(
        conversations.clone(),
        brain.clone(),
        web.clone(),
        None,
        config.max_context_tokens,
        DEFAULT_KEEP_RECENT,
    );
    let mut pipeline = MessagePipeline::new(
        platform,
        composer,
        conversations,
        registry.clone(),
        models.clone(),
        Arc::new(hooks),
    );
    if cli.reply_timeout_secs > 0 {
        pipeline =
            pipeline.with_reply_timeout(std::time::Duration::from_secs(cli.reply_timeout_secs));
    }
    let pipeline = Arc::new(pipeline);

    let notifier = config.notify_topic.as_deref().map(Notifier::new);

    // Health endpoint.
    let health_state = Arc::new(health::HealthState {
        models: models.clone(),
        brain: brain.clone(),
    });
    match tokio::net::TcpListener::bind(&cli.health_bind).await {
        Ok(listener) => {
            info!(bind = %cli.health_bind, "health endpoint listening");
            let router = health::router(health_state);
            tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, router).await {
                    warn!(error = %e, "health server exited");
                }
            });
        }
        Err(e) => warn!(bind = %cli.health_bind, error = %e, "health endpoint disabled"),
    }

    // Graceful shutdown on SIGINT/SIGTERM.
    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    // Supervised service loop: restart-on-crash with backoff.
    let result = supervisor::supervise("message-pipeline", cancel.clone(), || {
        let pipeline = pipeline.clone();
        let cancel = cancel.clone();
        async move {
            let source = console::StdinEventSource::new();
            run_event_loop(source, pipeline, cancel).await;
            Ok(())
        }
    })
    .await;

    mcp.shutdown().await;

    match result {
        Ok(()) => {
            info!("cortex stopped");
            0
        }
        Err(e) => {
            error!(error = %e, "cortex failed permanently");
            if let Some(notifier) = &notifier {
                notifier
                    .notify("❌ Cortex down", &e.to_string(), "high")
                    .await;
            }
            1
        }
    }
}

/// Resolve the configured web search provider, following `secret:NAME`
/// references for the API key.
async fn build_web_provider(
    config: &Config,
    secrets: &dyn SecretStore,
) -> Option<WebSearchProvider> {
    match config.web_search_provider.as_str() {
        "tavily" => {
            let key_ref = config.web_search_api_key.as_deref().unwrap_or("");
            if key_ref.is_empty() {
                warn!("tavily selected but WEB_SEARCH_API_KEY unset, web search disabled");
                return None;
            }
            match resolve_ref(secrets, key_ref).await {
                Ok(key) => Some(WebSearchProvider::Tavily { api_key: key }),
                Err(e) => {
                    warn!(error = %e, "failed to resolve web search API key, web search disabled");
                    None
                }
            }
        }
        "searx" => Some(WebSearchProvider::Searx {
            // WEB_SEARCH_API_KEY doubles as the instance URL for the
            // keyless provider.
            base_url: config
                .web_search_api_key
                .clone()
                .unwrap_or_else(|| "http://localhost:8888".to_string()),
        }),
        other => {
            warn!(provider = other, "unknown web search provider, web search disabled");
            None
        }
    }
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(sig) => sig,
                    Err(e) => {
                        warn!(error = %e, "failed to install SIGTERM handler");
                        let _ = ctrl_c.await;
                        cancel.cancel();
                        return;
                    }
                };
            tokio::select! {
                _ = ctrl_c => info!("SIGINT received"),
                _ = sigterm.recv() => info!("SIGTERM received"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("SIGINT received");
        }
        cancel.cancel();
    });
}
