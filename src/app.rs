use crate::catalog::ClassCatalog;
use crate::config::Settings;
use crate::detection::DetectionFilter;
use crate::detection_service::DetectionService;
use crate::ort_service::OrtModelService;
use crate::server::HttpServer;

use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

pub async fn start_app(config: Settings) -> Result<(), Box<dyn Error>> {
    let model_service = match OrtModelService::new(&config.model) {
        Ok(service) => service,
        Err(e) => {
            tracing::error!("Failed to initialize model service: {:?}", e);
            return Err(e);
        }
    };

    let catalog = match ClassCatalog::load(&config.labels.get_labels_path()) {
        Ok(catalog) => catalog,
        Err(e) => {
            tracing::error!("Failed to load class catalog: {:?}", e);
            return Err(Box::new(e));
        }
    };
    tracing::info!("Loaded {} class labels", catalog.len());

    let filter = DetectionFilter::new(&config.detection);
    let detection_service = Arc::new(DetectionService::new(model_service, catalog, filter));

    let server = HttpServer::new(detection_service, &config).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_shutdown_rx = shutdown_tx.subscribe();

    let server_handle = server.run(server_shutdown_rx).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    let _ = server_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
