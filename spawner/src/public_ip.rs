use anyhow::{bail, Context, Result};
use std::net::IpAddr;
use std::time::Duration;
use tracing::{info, warn};

const DETECT_URL: &str = "https://ifconfig.co/ip";
const DETECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Endpoint the remote sites use to reach the scheduler.
///
/// An explicit override wins. Otherwise the public address is looked up over
/// HTTPS, and if that fails the system hostname is used. There is no way to
/// tell from here whether the detected address is behind NAT.
pub async fn resolve_scheduler_endpoint(explicit: Option<&str>) -> String {
    if let Some(endpoint) = explicit {
        info!("Using configured public endpoint {}", endpoint);
        return endpoint.to_string();
    }

    match detect_public_ip(DETECT_URL).await {
        Ok(ip) => {
            info!(
                "Detected public IP is {} (it may be NATed; use --public-endpoint to override)",
                ip
            );
            ip.to_string()
        }
        Err(e) => {
            let fallback = hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "localhost".to_string());
            warn!(
                "Public IP detection failed ({:#}), falling back to hostname {}",
                e, fallback
            );
            fallback
        }
    }
}

async fn detect_public_ip(url: &str) -> Result<IpAddr> {
    let client = reqwest::Client::builder()
        .timeout(DETECT_TIMEOUT)
        .user_agent(format!("meshspawn/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let resp = client.get(url).send().await.context("Request failed")?;
    if !resp.status().is_success() {
        bail!("{} returned {}", url, resp.status());
    }

    let body = resp.text().await.context("Failed to read response")?;
    parse_ip(&body)
}

fn parse_ip(body: &str) -> Result<IpAddr> {
    body.trim()
        .parse()
        .with_context(|| format!("Not an IP address: {:?}", body.trim()))
}
