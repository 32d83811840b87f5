use syncroom::{config, routes, state};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = config::Config::from_env();
    let port = config.port;
    let state = state::AppState::in_memory(config);

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "syncroom coordinator listening");
    axum::serve(listener, app).await.expect("server failed");
}
