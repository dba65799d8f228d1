//! Cache inspection CLI.
//!
//! Opens the configured cache directory and prints every entry's key, size,
//! age, and expiry state, plus the store total against its budget. Read-only
//! apart from the corrupt-entry cleanup `DiskCache::open` always performs.

use chrono::Utc;

use churnboard::cache::DiskCache;
use churnboard::config;

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("cache_report: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let config = config::load_config()?;
    let cache_dir = config.cache_dir()?;
    let cache = DiskCache::open(&cache_dir, &config.cache)
        .map_err(|e| format!("Failed to open cache at {}: {}", cache_dir.display(), e))?;

    let entries = cache.entries();
    if entries.is_empty() {
        println!("Cache at {} is empty.", cache_dir.display());
        return Ok(());
    }

    println!("Cache at {}:", cache_dir.display());
    println!("{:<48} {:>10} {:>12}  {}", "KEY", "SIZE", "AGE", "STATE");

    let now = Utc::now();
    for entry in &entries {
        let age_secs = (now - entry.stored_at).num_seconds().max(0);
        let state = if entry.expired { "expired" } else { "fresh" };
        println!(
            "{:<48} {:>10} {:>12}  {}",
            entry.key,
            format_bytes(entry.bytes),
            format_age(age_secs),
            state
        );
    }

    let expired = entries.iter().filter(|e| e.expired).count();
    println!(
        "\n{} entries ({} expired), {} of {} used.",
        entries.len(),
        expired,
        format_bytes(cache.store_bytes()),
        format_bytes(config.cache.max_store_bytes)
    );

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

fn format_age(secs: i64) -> String {
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}
