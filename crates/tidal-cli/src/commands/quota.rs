use std::path::Path;

use tidal_core::models::StorageQuota;
use tidal_core::SyncService;

use crate::commands::common::format_bytes;
use crate::error::CliError;

pub async fn run_quota(
    service: &SyncService,
    cache_dir: &Path,
    as_json: bool,
) -> Result<StorageQuota, CliError> {
    let assets = service.asset_manager(cache_dir).await?;
    let quota = assets.storage_quota().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&quota)?);
        return Ok(quota);
    }

    let cached = assets.list().await?.len();
    println!("Cache directory: {}", assets.dir().display());
    println!("Cached assets:   {cached}");
    println!(
        "Used:            {} of {} ({:.1}%)",
        format_bytes(quota.used_bytes),
        format_bytes(quota.total_bytes),
        quota.usage_ratio() * 100.0
    );
    Ok(quota)
}
