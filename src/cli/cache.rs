//! Offline cache subcommands.
//!
//! - `get`: Print the local path of a cached recitation
//! - `put`: Download a recitation into the cache
//! - `rm`: Remove one recitation
//! - `clear`: Remove everything
//! - `ls`: List cached recitations
//! - `size`: Total cached bytes

use anyhow::Result;
use chrono::{TimeZone, Utc};
use clap::Subcommand;

use crate::cache::{OfflineCache, TrackMetadata};

/// Cache-related subcommands
#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Show where a recitation is cached
    Get {
        /// Recitation ID
        id: String,
    },

    /// Download a recitation for offline playback
    Put {
        /// Recitation ID
        id: String,

        /// Source URL
        url: String,

        /// Surah name stored with the entry
        #[arg(long, default_value = "")]
        surah: String,

        /// Reciter name stored with the entry
        #[arg(long, default_value = "")]
        reciter: String,
    },

    /// Remove a cached recitation
    Rm {
        /// Recitation ID
        id: String,
    },

    /// Remove every cached recitation
    Clear,

    /// List cached recitations
    Ls,

    /// Show total cache size
    Size,
}

pub async fn execute(cache: &OfflineCache, command: CacheCommands) -> Result<()> {
    match command {
        CacheCommands::Get { id } => match cache.get(&id).await? {
            Some(path) => println!("{}", path.display()),
            None => anyhow::bail!("'{}' is not cached", id),
        },
        CacheCommands::Put {
            id,
            url,
            surah,
            reciter,
        } => {
            let metadata = TrackMetadata {
                surah_name: surah,
                reciter_name: reciter,
            };
            let path = cache.cache(&id, &url, &metadata).await?;
            println!("{}", path.display());
        }
        CacheCommands::Rm { id } => {
            cache.remove(&id).await?;
            println!("Removed {}", id);
        }
        CacheCommands::Clear => {
            cache.clear().await?;
            println!("Cache cleared");
        }
        CacheCommands::Ls => {
            let entries = cache.list().await?;
            if entries.is_empty() {
                println!("Cache is empty");
                return Ok(());
            }

            println!(
                "{:<24} {:<20} {:<20} {:>10} {:<20}",
                "ID", "SURAH", "RECITER", "SIZE", "CACHED"
            );
            println!("{}", "-".repeat(98));
            for entry in entries {
                let cached = Utc
                    .timestamp_millis_opt(entry.cached_at)
                    .single()
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default();
                println!(
                    "{:<24} {:<20} {:<20} {:>10} {:<20}",
                    entry.id,
                    entry.surah_name,
                    entry.reciter_name,
                    format_bytes(entry.size),
                    cached
                );
            }
        }
        CacheCommands::Size => {
            let total = cache.total_size().await?;
            println!("{} ({} bytes)", format_bytes(total), total);
        }
    }

    Ok(())
}

/// Human-readable byte count
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
