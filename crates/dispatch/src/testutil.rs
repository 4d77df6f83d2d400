//! Mock upstreams and credential builders shared by the dispatch tests

use std::sync::Arc;

use provider::{ModelCredential, Supplier};
use tokio::net::TcpListener;

/// Serve `app` on an ephemeral local port and return its base URL.
pub async fn spawn_upstream(app: axum::Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// A credential whose secret is `sk-<descriptor>`.
pub fn credential(supplier: &str, base_url: &str, descriptor: &str, model: &str) -> ModelCredential {
    let supplier = Arc::new(Supplier::new(supplier, base_url));
    ModelCredential::new(supplier, descriptor, format!("sk-{descriptor}"), model)
}
