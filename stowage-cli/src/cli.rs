use std::path::PathBuf;

use clap::Parser;
use stowage_engine::StowageConfig;

#[derive(Parser, Debug)]
#[command(name = "stowage")]
#[command(author, version, about = "Archive HLS titles into verified per-title directories", long_about = None)]
pub struct Args {
    /// Title ids to archive
    pub ids: Vec<String>,

    /// Read title ids from a file, one per line (`#` starts a comment)
    #[arg(short = 'i', long, value_name = "FILE")]
    pub ids_file: Option<PathBuf>,

    /// Configuration file (default: <config dir>/stowage/config.toml)
    #[arg(short, long, env = "STOWAGE_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory that receives one sub-directory per title
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Title API base URL
    #[arg(long, env = "STOWAGE_API_URL", value_name = "URL")]
    pub api_url: Option<String>,

    /// Keep VP9 variants
    #[arg(long)]
    pub no_exclude_vp9: bool,

    /// Total attempts per fragment and per manifest request
    #[arg(long, value_name = "N")]
    pub retry_limit: Option<u32>,

    /// Titles, and fragment transfers, processed at the same time
    #[arg(short = 'j', long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Stop starting titles once free space drops below this many bytes (0 disables)
    #[arg(long, value_name = "BYTES")]
    pub disk_floor: Option<u64>,

    /// Fetch titles again even if their status says Done
    #[arg(long)]
    pub force: bool,

    /// Print the final reports as JSON
    #[arg(long)]
    pub json: bool,

    /// Debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors and hide the progress bar
    #[arg(short, long)]
    pub quiet: bool,

    /// Also write daily-rotated log files into this directory
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,
}

impl Args {
    /// Applies command line overrides on top of the file configuration.
    pub fn apply_overrides(&self, config: &mut StowageConfig) {
        if let Some(output) = &self.output {
            config.output_dir = output.clone();
        }
        if let Some(url) = &self.api_url {
            config.api.base_url = Some(url.clone());
        }
        if self.no_exclude_vp9 {
            config.exclude_vp9 = false;
        }
        if let Some(limit) = self.retry_limit {
            config.retry_limit = limit;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(floor) = self.disk_floor {
            config.disk_space_floor = floor;
        }
        if self.force {
            config.skip_completed = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides() {
        let args = Args::parse_from([
            "stowage",
            "--no-exclude-vp9",
            "--retry-limit",
            "5",
            "-j",
            "8",
            "--disk-floor",
            "0",
            "--force",
            "-o",
            "/data/titles",
            "101",
            "102",
        ]);
        assert_eq!(args.ids, vec!["101", "102"]);

        let mut config = StowageConfig::default();
        args.apply_overrides(&mut config);
        assert!(!config.exclude_vp9);
        assert_eq!(config.retry_limit, 5);
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.disk_space_floor, 0);
        assert!(!config.skip_completed);
        assert_eq!(config.output_dir, PathBuf::from("/data/titles"));
    }

    #[test]
    fn test_no_flags_keep_file_values() {
        let args = Args::parse_from(["stowage", "1"]);
        let mut config = StowageConfig {
            retry_limit: 7,
            ..Default::default()
        };
        args.apply_overrides(&mut config);
        assert_eq!(config.retry_limit, 7);
        assert!(config.exclude_vp9);
    }

    #[test]
    fn test_verbose_and_quiet_conflict() {
        assert!(Args::try_parse_from(["stowage", "-v", "-q", "1"]).is_err());
    }
}
