use colloquy_core::CapabilityDescriptor;
use serde::Deserialize;

#[derive(Deserialize)]
struct CapabilitiesResponse {
    capabilities: Vec<CapabilityDescriptor>,
}

/// Query a running gateway and print its health and capability table.
pub async fn run(base_url: &str) -> anyhow::Result<()> {
    let base = base_url.trim_end_matches('/');

    let health: serde_json::Value = reqwest::get(format!("{}/v1/health", base))
        .await?
        .json()
        .await?;
    println!(
        "gateway: {}  sessions: {}",
        health["status"].as_str().unwrap_or("unknown"),
        health["sessions"]
    );

    let caps: CapabilitiesResponse = reqwest::get(format!("{}/v1/capabilities", base))
        .await?
        .json()
        .await?;
    if caps.capabilities.is_empty() {
        println!("no capabilities registered");
        return Ok(());
    }
    for cap in caps.capabilities {
        println!(
            "  {:<16} {:<24} {:?}",
            cap.name, cap.bus_topic, cap.health
        );
    }
    Ok(())
}
