mod roles;
mod settings;

use mule_dtn::node::Node;
use std::sync::Arc;
use tracing::{error, info, trace};

fn listen_for_cancel(
    node: Arc<Node>,
    task_set: &mut tokio::task::JoinSet<()>,
    cancel_token: tokio_util::sync::CancellationToken,
) {
    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            let mut term_handler =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to register signal handlers");
        } else {
            let mut term_handler = std::future::pending();
        }
    }
    task_set.spawn(async move {
        tokio::select! {
            _ = term_handler.recv() => {
                info!("Received terminate signal, stopping...");
                cancel_token.cancel();
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received CTRL+C, stopping...");
                cancel_token.cancel();
            }
            _ = cancel_token.cancelled() => {}
        }

        node.shutdown().await;
    });
}

#[tokio::main]
async fn main() {
    // Parse command line and configuration; errors here are exit code 2
    let settings = match settings::init() {
        Ok(Some(settings)) => settings,
        Ok(None) => return,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    let node = match Node::start(settings.config, roles::application(settings.role)).await {
        Ok(node) => node,
        Err(e) => {
            error!("Failed to start node: {e}");
            std::process::exit(1);
        }
    };

    // Prepare for graceful shutdown
    let cancel_token = tokio_util::sync::CancellationToken::new();
    let mut task_set = tokio::task::JoinSet::new();

    if settings.role == roles::Role::Source {
        roles::spawn_source(
            node.clone(),
            settings.telemetry,
            &mut task_set,
            cancel_token.clone(),
        );
    }
    roles::spawn_metrics_log(
        node.clone(),
        settings.metrics_period,
        &mut task_set,
        cancel_token.clone(),
    );

    listen_for_cancel(node, &mut task_set, cancel_token);

    info!("Started successfully");

    // Wait for all tasks to finish
    while let Some(r) = task_set.join_next().await {
        r.expect("Task terminated unexpectedly");
    }

    info!("Stopped");
}
