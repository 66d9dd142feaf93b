use std::sync::Arc;

use finmail::backend::BackendClient;
use finmail::classifier::create_classifier;
use finmail::config::AppConfig;
use finmail::institutions::InstitutionRegistry;
use finmail::pipeline::processor::{MessageProcessor, ProcessorConfig};
use finmail::server::{ServerState, inbound_routes};
use finmail::verification::{NoticeForwarder, WebhookForwarder};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = AppConfig::from_env()?;

    eprintln!("📬 Finmail worker v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Webhook: http://{}/inbound", config.bind_addr);
    eprintln!(
        "   Classifier: {}",
        config
            .classifier
            .as_ref()
            .map(|c| c.model.as_str())
            .unwrap_or("disabled")
    );

    let classifier = create_classifier(config.classifier.as_ref())?;
    let sink = Arc::new(BackendClient::new(&config.backend)?);

    let forwarder = match &config.forward_url {
        Some(url) => {
            Some(Arc::new(WebhookForwarder::new(url.clone())?) as Arc<dyn NoticeForwarder>)
        }
        None => None,
    };

    let processor = Arc::new(MessageProcessor::new(
        InstitutionRegistry::default_registry(),
        classifier,
        sink,
        forwarder,
        ProcessorConfig {
            classifier_deadline: config.classifier_deadline,
            inbound_domain: config.inbound_domain.clone(),
        },
    ));

    let app = inbound_routes(ServerState { processor });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "Inbound mail worker listening");
    axum::serve(listener, app).await?;

    Ok(())
}
