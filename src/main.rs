use anyhow::Result;
use bytewatt_bridge::logging::{get_logger, init_logging};
use bytewatt_bridge::{Bridge, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    init_logging(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    let logger = get_logger("main");
    logger.info(&format!(
        "Byte-Watt bridge {} starting up",
        env!("APP_VERSION")
    ));

    let bridge =
        Bridge::init(config).map_err(|e| anyhow::anyhow!("Failed to create bridge: {}", e))?;

    let web_task = if bridge.config().web.enabled {
        let web_bridge = bridge.clone();
        let host = bridge.config().web.host.clone();
        let port = bridge.config().web.port;
        Some(tokio::spawn(async move {
            if let Err(e) = bytewatt_bridge::web::serve(web_bridge, &host, port).await {
                get_logger("web").error(&format!("Web server error: {}", e));
            }
        }))
    } else {
        None
    };

    let signal_bridge = bridge.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            get_logger("main").info("Interrupt received, shutting down");
        }
        signal_bridge.shutdown();
    });

    let result = bridge.run().await;
    bridge.shutdown();
    if let Some(task) = web_task {
        let _ = task.await;
    }

    match result {
        Ok(()) => {
            logger.info("Bridge shutdown complete");
            Ok(())
        }
        Err(e) => {
            logger.error(&format!("Bridge failed with error: {}", e));
            Err(anyhow::anyhow!("Bridge error: {}", e))
        }
    }
}
