use std::env;
use std::path::PathBuf;

use tidal_core::util::is_http_url;

use crate::cli::ConfigCommands;
use crate::commands::common::CliContext;
use crate::config_profiles::{
    normalize_text_option, CliProfile, CliProfilesConfig, PROFILE_ENV,
};
use crate::error::CliError;

/// Values supplied to `tidal config init`.
#[derive(Debug, Default)]
pub struct ProfileUpdate {
    pub remote_url: Option<String>,
    pub anon_key: Option<String>,
    pub access_token: Option<String>,
    pub cache_dir: Option<PathBuf>,
    pub cache_quota_mb: Option<u64>,
}

pub fn run_config(
    command: ConfigCommands,
    global_profile: Option<&str>,
    cli_db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    match command {
        ConfigCommands::Init {
            profile,
            remote_url,
            anon_key,
            access_token,
            cache_dir,
            cache_quota_mb,
            no_activate,
        } => run_config_init(
            profile.as_deref().or(global_profile),
            ProfileUpdate {
                remote_url,
                anon_key,
                access_token,
                cache_dir,
                cache_quota_mb,
            },
            no_activate,
        ),
        ConfigCommands::Show { profile } => {
            run_config_show(profile.as_deref().or(global_profile), cli_db_path)
        }
    }
}

pub fn run_config_init(
    profile_name: Option<&str>,
    update: ProfileUpdate,
    no_activate: bool,
) -> Result<(), CliError> {
    let mut config = CliProfilesConfig::load().map_err(CliError::Config)?;
    let profile_name = config.resolve_profile_name(profile_name);

    apply_profile_update(config.profile_mut_or_default(&profile_name), update)?;
    if !no_activate || config.active_profile.is_none() {
        config.active_profile = Some(profile_name.clone());
    }

    let path = config.save().map_err(CliError::Config)?;
    println!("Saved profile '{profile_name}' to {}", path.display());
    if config.active_profile.as_deref() == Some(profile_name.as_str()) {
        println!("Active profile: {profile_name}");
    }
    Ok(())
}

/// Merge explicit values into `profile`, leaving unspecified fields as they were.
pub fn apply_profile_update(profile: &mut CliProfile, update: ProfileUpdate) -> Result<(), CliError> {
    if let Some(url) = normalize_text_option(update.remote_url) {
        if !is_http_url(&url) {
            return Err(CliError::Config(format!(
                "Remote URL must include http:// or https://: {url}"
            )));
        }
        profile.remote_url = Some(url.trim_end_matches('/').to_string());
    }
    if let Some(anon_key) = normalize_text_option(update.anon_key) {
        profile.anon_key = Some(anon_key);
    }
    if let Some(access_token) = normalize_text_option(update.access_token) {
        profile.access_token = Some(access_token);
    }
    if let Some(cache_dir) = update.cache_dir {
        profile.cache_dir = Some(cache_dir);
    }
    if let Some(quota_mb) = update.cache_quota_mb {
        if quota_mb == 0 {
            return Err(CliError::Config(
                "Cache quota must be at least 1 MiB".to_string(),
            ));
        }
        profile.cache_quota_mb = Some(quota_mb);
    }
    Ok(())
}

fn run_config_show(
    profile_name: Option<&str>,
    cli_db_path: Option<PathBuf>,
) -> Result<(), CliError> {
    let context = CliContext::resolve(cli_db_path, profile_name)?;
    let remote = &context.config.remote;

    println!("Profile:      {}", context.profile_name);
    println!("Database:     {}", context.db_path.display());
    println!(
        "Remote URL:   {}",
        remote.url.as_deref().unwrap_or("(not set)")
    );
    println!("Anon key:     {}", redacted(remote.anon_key.as_deref()));
    println!("Access token: {}", redacted(remote.access_token.as_deref()));
    if let Some(dir) = &context.config.cache.dir {
        println!("Cache dir:    {}", dir.display());
    }
    println!("Cache quota:  {} bytes", context.config.cache.quota_bytes);
    if env::var_os(PROFILE_ENV).is_some() {
        println!("(profile selected via TIDAL_PROFILE)");
    }
    Ok(())
}

pub fn redacted(value: Option<&str>) -> &'static str {
    if value.is_some() {
        "[REDACTED]"
    } else {
        "(not set)"
    }
}
