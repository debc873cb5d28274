use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use nl_ga4::assistant::Assistant;
use nl_ga4::catalog::TemplateLibrary;
use nl_ga4::config::{AppConfig, CliArgs};
use nl_ga4::gcp::Credentials;
use nl_ga4::llm::LlmManager;
use nl_ga4::query::{BigQueryExecutor, ConnectionContext, QueryExecutor};
use nl_ga4::session::Session;
use nl_ga4::util::logging::init_tracing;
use nl_ga4::web::{self, state::AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = CliArgs::parse();

    // Initialize logging
    init_tracing(args.log_json);

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    let library = TemplateLibrary::load(config.catalog.path.as_deref())?;
    info!("Loaded {} query templates", library.len());

    if args.list_templates {
        for (name, description) in library.list_descriptions() {
            println!("{}\t{}", name, description);
        }
        return Ok(());
    }

    let credentials = match &config.warehouse.access_token {
        Some(token) => Credentials::Static(token.clone()),
        None => match Credentials::discover().await {
            Ok(credentials) => credentials,
            Err(e) => {
                error!("Failed to initialize Google credentials: {}", e);
                return Err(e.into());
            }
        },
    };

    let project_id = match config.warehouse.project_id.clone() {
        Some(project_id) => project_id,
        None => credentials
            .project_id()
            .await
            .ok_or("No project id configured and none found in the credentials (set GA4_PROJECT_ID)")?,
    };
    info!(
        "Using BigQuery dataset {}.{}",
        project_id, config.warehouse.dataset_id
    );

    // Initialize LLM manager
    info!("Initializing LLM manager with backend: {}", config.llm.backend);
    let llm_manager = LlmManager::new(&config.llm, &project_id, &credentials)?;

    let executor: Arc<dyn QueryExecutor> = Arc::new(BigQueryExecutor::new(
        &config.warehouse,
        project_id.clone(),
        credentials,
    ));

    let assistant = Arc::new(Assistant::new(
        Arc::new(library),
        ConnectionContext {
            project_id,
            dataset_id: config.warehouse.dataset_id.clone(),
        },
        Arc::new(llm_manager),
        executor,
    )?);

    if let Some(question) = &args.ask {
        let mut session = Session::new();
        let turn = assistant.run_turn(&mut session, question).await;
        println!("{}", turn.content);
        if args.details {
            if let Some(details) = &turn.details {
                println!("{}", serde_json::to_string_pretty(details)?);
            }
        }
        return Ok(());
    }

    let app_state = Arc::new(AppState::new(config.clone(), assistant));

    // Start the web server
    info!("Starting nl-ga4 server on {}:{}", config.web.host, config.web.port);
    match web::run_server(config.web, app_state).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}
