use std::{env, path::PathBuf, sync::Arc};

use anyhow::{Result, anyhow};
use assist_tools::{
    BraveSearchTool, Config, FindPlacesTool, HomeAssistantForecasts, SearxngSearchTool,
    WeatherForecastTool, WikipediaSearchTool,
    config::{
        CONF_BRAVE_ENABLED, CONF_GOOGLE_PLACES_ENABLED, CONF_SEARXNG_ENABLED,
        CONF_WEATHER_ENABLED, CONF_WIKIPEDIA_ENABLED,
    },
};
use cache::{Cache, NoCache};
use context_server::{ContextServer, ContextServerRpcRequest, ContextServerRpcResponse};
use context_server_utils::{
    prompt_registry::PromptRegistry, resource_registry::ResourceRegistry,
    tool_registry::ToolRegistry,
};
use directories::ProjectDirs;
use http_client::HttpClient;
use http_client_reqwest::HttpClientReqwest;
use local_cache::LocalCache;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

const CONFIG_PATH_VAR: &str = "ASSIST_TOOLS_CONFIG";

struct ContextServerState {
    rpc: ContextServer,
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("code", "fdionisi", "assist-tools-mcp")
        .ok_or_else(|| anyhow!("unable to find project directory"))
}

fn config_path() -> Result<PathBuf> {
    match env::var_os(CONFIG_PATH_VAR) {
        Some(path) => Ok(PathBuf::from(path)),
        None => Ok(project_dirs()?.config_dir().join("config.json")),
    }
}

fn database_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().join("cache"))
}

/// Opens the response cache, falling back to [`NoCache`] so that a storage
/// failure only disables caching.
fn open_cache(database_dir: Result<PathBuf>, config: &Config) -> Arc<dyn Cache> {
    let local_cache = database_dir.and_then(|dir| {
        LocalCache::with_map_size(
            dir,
            Some(config.cache_max_age()),
            config.cache_max_size(),
        )
    });

    match local_cache {
        Ok(local_cache) => {
            match local_cache.purge_expired() {
                Ok(purged) => log::info!("Purged {} expired cache entries", purged),
                Err(err) => log::warn!("Unable to purge expired cache entries: {}", err),
            }
            Arc::new(local_cache)
        }
        Err(err) => {
            log::warn!("Response cache unavailable, continuing without it: {}", err);
            Arc::new(NoCache)
        }
    }
}

impl ContextServerState {
    fn new(
        http_client: Arc<dyn HttpClient>,
        config: Config,
        local_cache: Arc<dyn Cache>,
    ) -> Result<Self> {
        let resource_registry = Arc::new(ResourceRegistry::default());

        let tool_registry = Arc::new(ToolRegistry::default());

        let config = Arc::new(config);

        if config.is_enabled(CONF_SEARXNG_ENABLED) {
            tool_registry.register(Arc::new(SearxngSearchTool::new(
                http_client.clone(),
                local_cache.clone(),
                config.clone(),
            )));
        }
        if config.is_enabled(CONF_BRAVE_ENABLED) {
            tool_registry.register(Arc::new(BraveSearchTool::new(
                http_client.clone(),
                local_cache.clone(),
                config.clone(),
            )));
        }
        if config.is_enabled(CONF_WIKIPEDIA_ENABLED) {
            tool_registry.register(Arc::new(WikipediaSearchTool::new(
                http_client.clone(),
                local_cache.clone(),
                config.clone(),
            )));
        }
        if config.is_enabled(CONF_GOOGLE_PLACES_ENABLED) {
            tool_registry.register(Arc::new(FindPlacesTool::new(
                http_client.clone(),
                local_cache.clone(),
                config.clone(),
            )));
        }
        if config.is_enabled(CONF_WEATHER_ENABLED) {
            let forecasts = Arc::new(HomeAssistantForecasts::new(http_client.clone(), &config));
            tool_registry.register(Arc::new(WeatherForecastTool::new(
                forecasts,
                config.clone(),
            )));
        }

        let prompt_registry = Arc::new(PromptRegistry::default());

        Ok(Self {
            rpc: ContextServer::builder()
                .with_server_info((env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")))
                .with_resources(resource_registry)
                .with_tools(tool_registry)
                .with_prompts(prompt_registry)
                .build()?,
        })
    }

    async fn process_request(
        &self,
        request: ContextServerRpcRequest,
    ) -> Result<Option<ContextServerRpcResponse>> {
        self.rpc.handle_incoming_message(request).await
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the protocol, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = config_path()?;
    let config = Config::load(&config_path)?.with_overrides(Config::env_overrides());
    log::info!("Loaded configuration from {}", config_path.display());

    let http_client = Arc::new(HttpClientReqwest::default());

    let local_cache = open_cache(database_dir(), &config);
    let state = ContextServerState::new(http_client, config, local_cache)?;

    let mut stdin = BufReader::new(io::stdin()).lines();
    let mut stdout = io::stdout();

    while let Some(line) = stdin.next_line().await? {
        let request: ContextServerRpcRequest = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                log::error!("Error parsing request: {}", e);
                continue;
            }
        };

        if let Some(response) = state.process_request(request).await? {
            let response_json = serde_json::to_string(&response)?;
            stdout.write_all(response_json.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
    }

    Ok(())
}
