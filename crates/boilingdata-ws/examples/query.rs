// Copyright (C) 2025 Tom Waddington
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

//! Run one SQL statement against a query service endpoint
//!
//! ```bash
//! BOILINGDATA_URL=ws://localhost:8080 RUST_LOG=boilingdata_ws=debug \
//!     cargo run -p boilingdata-ws --example query -- "SELECT 1 AS one"
//! ```

use boilingdata_ws::{ClientConfig, Payload, Result, WssClient, encode_payload};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let url = std::env::var("BOILINGDATA_URL").unwrap_or_else(|_| "ws://localhost:8080".into());
    let sql = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "SELECT 1 AS one".to_string());

    let client = WssClient::new(ClientConfig::new(url));
    client.connect().await?;
    println!("✓ Connected");

    let payload = Payload::query(sql);
    client
        .send_message(encode_payload(&payload)?, &payload.request_id)
        .await?;
    println!("✓ Sent {}", payload.request_id);

    let response = client.get_response(&payload.request_id).await?;
    println!("✓ Columns: {:?}", response.keys);
    for row in &response.data {
        println!("  {}", serde_json::Value::Object(row.clone()));
    }

    client.shutdown().await;
    println!("✓ Closed");
    Ok(())
}
