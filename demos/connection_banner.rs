use std::sync::Arc;

use gestor_http::{ApiClient, ConnectionState, FileStore};

fn banner(state: &ConnectionState, max_retries: u32) -> String {
    if state.is_retrying {
        format!("Reconnecting... (attempt {}/{max_retries})", state.retry_count)
    } else if state.is_connected {
        "Connected".to_owned()
    } else {
        state
            .last_error_message
            .clone()
            .unwrap_or_else(|| "No connection to the server".to_owned())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let store = Arc::new(FileStore::open(".gestor-session.json")?);
    let client = ApiClient::from_env()
        .map_err(anyhow::Error::msg)?
        .with_store(store)
        .on_auth_invalidated(|signal| {
            println!("session expired ({}), go to {}", signal.status, signal.redirect_to);
        });

    let max_retries = client.options().max_retries;
    let _banner = client.subscribe_to_connection_state(move |state| {
        println!("[status] {}", banner(state, max_retries));
    });

    if !client.check_connection().await {
        println!("health check failed, trying the API anyway");
        client.reset_connection_state();
    }

    match client.get::<serde_json::Value>("/balance/me").await {
        Ok(response) => println!("balance: {}", response.data),
        Err(err) if err.is_backend_unavailable() => {
            println!("backend unavailable ({}): {}", err.kind(), err.message())
        }
        Err(err) => println!("request failed: {err}"),
    }

    Ok(())
}
