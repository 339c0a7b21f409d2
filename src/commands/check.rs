//! Check command implementation.
//!
//! Sends one authenticated request per resource and reports reachability and
//! credential status.

use anyhow::Context;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Instant;

use livetv_exporter::api::{EmbyClient, MediaServer, Resource};
use livetv_exporter::config::{validate_effective_config, Config};
use livetv_exporter::error::ApiError;
use livetv_exporter::metrics::ExporterTelemetry;

/// Runs one request against `resource` and returns the item count.
async fn probe(client: &EmbyClient, resource: Resource) -> Result<usize, ApiError> {
    match resource {
        Resource::ServerInfo => client.server_info().await.map(|_| 1),
        Resource::Sessions => client.sessions().await.map(|v| v.len()),
        Resource::Channels => client.channels().await.map(|v| v.len()),
        Resource::Tuners => client.tuners().await.map(|v| v.len()),
        Resource::Timers => client.timers().await.map(|v| v.len()),
        Resource::Recordings => client.recordings().await.map(|v| v.len()),
        Resource::Guide => {
            let now = Utc::now();
            client
                .programs(now, now + ChronoDuration::hours(1))
                .await
                .map(|v| v.len())
        }
    }
}

/// Validates configuration and connectivity to the Emby server.
pub async fn command_check(auth_only: bool, config: &Config) -> anyhow::Result<()> {
    println!("🔍 Emby Live TV Exporter - Connectivity Check");
    println!("=============================================");

    let mut all_ok = true;

    println!("\n⚙️  Checking configuration...");
    match validate_effective_config(config) {
        Ok(_) => println!("   ✅ Configuration is valid"),
        Err(e) => {
            println!("   ❌ Configuration invalid: {}", e);
            all_ok = false;
        }
    }

    let telemetry = Arc::new(ExporterTelemetry::new().context("creating telemetry")?);
    let client = EmbyClient::new(config.client_options(), telemetry)
        .context("building HTTP client")?;

    println!("\n🌐 Checking {} ...", config.server_url());
    let resources: &[Resource] = if auth_only {
        &[Resource::ServerInfo]
    } else {
        &Resource::ALL
    };

    for &resource in resources {
        let start = Instant::now();
        let result = probe(&client, resource).await;
        let ms = start.elapsed().as_secs_f64() * 1000.0;
        match result {
            Ok(_) if resource == Resource::ServerInfo => {
                println!("   ✅ {:12} reachable, API key accepted ({:.0}ms)", resource, ms)
            }
            Ok(count) => println!("   ✅ {:12} {} items ({:.0}ms)", resource, count, ms),
            Err(e @ ApiError::Auth { .. }) => {
                println!("   ❌ {:12} {}", resource, e);
                println!("      The API key was rejected; check EMBY_API_KEY");
                all_ok = false;
            }
            Err(e) => {
                println!("   ❌ {:12} {}", resource, e);
                all_ok = false;
            }
        }
    }

    println!("\n📋 Summary:");
    if all_ok {
        println!("   ✅ All checks passed - exporter is ready");
        Ok(())
    } else {
        println!("   ❌ Some checks failed - please review the output above");
        std::process::exit(1);
    }
}
