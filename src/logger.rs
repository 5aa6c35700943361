// logger.rs - Structured logging module with modern display

use log::{debug, error, info, warn, LevelFilter};
use serde::Serialize;
use std::sync::Once;

static INIT: Once = Once::new();

/// ANSI color codes for modern terminal output
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BOLD: &str = "\x1b[1m";
    pub const DIM: &str = "\x1b[2m";
    pub const BLUE: &str = "\x1b[34m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const RED: &str = "\x1b[31m";
    pub const CYAN: &str = "\x1b[36m";
    pub const MAGENTA: &str = "\x1b[35m";
    pub const WHITE: &str = "\x1b[37m";
    pub const BG_BLUE: &str = "\x1b[44m";
    pub const BG_YELLOW: &str = "\x1b[43m";
    pub const BG_RED: &str = "\x1b[41m";
    pub const BG_MAGENTA: &str = "\x1b[45m";
}

#[derive(Debug, Clone)]
pub struct Logger {
    _enabled: bool,
    _max_level: LevelFilter,
}

impl Logger {
    pub fn init(level: &str, _enabled: bool) {
        INIT.call_once(|| {
            let level_filter = match level.to_uppercase().as_str() {
                "DEBUG" => LevelFilter::Debug,
                "TRACE" => LevelFilter::Trace,
                "WARN" => LevelFilter::Warn,
                "ERROR" => LevelFilter::Error,
                _ => LevelFilter::Info,
            };

            env_logger::Builder::new()
                .filter_level(level_filter)
                .format_timestamp(None)
                .format_module_path(false)
                .format_target(false)
                .init();
        });
    }

    pub fn new(level: &str, enabled: bool) -> Self {
        let max_level = match level.to_uppercase().as_str() {
            "DEBUG" => LevelFilter::Debug,
            "TRACE" => LevelFilter::Trace,
            "WARN" => LevelFilter::Warn,
            "ERROR" => LevelFilter::Error,
            _ => LevelFilter::Info,
        };

        Logger { _enabled: enabled, _max_level: max_level }
    }

    pub fn format_bytes(&self, bytes: u64) -> String {
        if bytes == 0 {
            return "0 B".to_string();
        }

        let sizes = ["B", "KB", "MB", "GB", "TB"];
        let i = ((bytes as f64).ln() / 1024.0_f64.ln()).floor() as usize;
        let size = bytes as f64 / 1024.0_f64.powi(i as i32);

        format!("{:.1} {}", size, sizes[i.min(sizes.len() - 1)])
    }

    fn truncate_name(&self, name: &str, max_length: usize) -> String {
        if name.len() > max_length {
            format!("{}...", &name[..max_length.saturating_sub(3)])
        } else {
            name.to_string()
        }
    }

    /// One line per finished re-encode: family badge, size delta, quality
    pub fn log_reencode(
        &self,
        family: &str,
        original_size: u64,
        final_size: u64,
        quality: Option<u8>,
        within_budget: bool,
    ) {
        use colors::*;

        let family_badge = match family {
            "png" => String::new() + BG_BLUE + WHITE + BOLD + " PNG " + RESET,
            "jpeg" => String::new() + BG_YELLOW + WHITE + BOLD + " JPEG " + RESET,
            _ => String::new() + BG_BLUE + WHITE + BOLD + " " + &family.to_uppercase() + " " + RESET,
        };

        let percent = if original_size > 0 {
            (original_size as f64 - final_size as f64) / original_size as f64 * 100.0
        } else {
            0.0
        };

        let quality_note = match quality {
            Some(q) => format!("Q:{}", q),
            None => "optimized".to_string(),
        };

        let mut msg = family_badge
            + " " + DIM + "reencode" + RESET
            + " " + WHITE + &self.format_bytes(original_size) + RESET
            + " " + DIM + "→" + RESET
            + " " + GREEN + &self.format_bytes(final_size) + RESET
            + " " + CYAN + &format!("(-{:.1}%)", percent) + RESET
            + " " + DIM + &quality_note + RESET;

        if within_budget {
            info!("{}", msg);
        } else {
            msg = msg + " " + BG_RED + WHITE + BOLD + " OVER BUDGET " + RESET;
            warn!("{}", msg);
        }
    }

    pub fn log_request(
        &self,
        filename: &str,
        content_type: Option<&str>,
        size: u64,
        budget_kb: u32,
        ip: Option<&str>,
    ) {
        use colors::*;

        let truncated_name = self.truncate_name(filename, 40);

        let msg = String::new()
            + DIM + "━━━━━" + RESET
            + " " + BOLD + CYAN + "UPLOAD" + RESET + " "
            + DIM + "━━━━━" + RESET
            + " " + DIM + "FILE:" + RESET + " " + BLUE + &truncated_name + RESET
            + " " + DIM + "IP:" + RESET + " " + WHITE + ip.unwrap_or("Unknown") + RESET
            + " " + DIM + "TYPE:" + RESET + " " + WHITE + content_type.unwrap_or("Unknown") + RESET
            + " " + DIM + "SIZE:" + RESET + " " + WHITE + &self.format_bytes(size) + RESET
            + " " + DIM + "CAP:" + RESET + " " + MAGENTA + &format!("{} KB", budget_kb) + RESET
            + " " + DIM + "━━━━━" + RESET;
        debug!("{}", msg);
    }

    pub fn log_reject(&self, filename: &str, size: u64, reason: &str) {
        use colors::*;

        let reason_badge = match reason {
            "empty_upload" => String::new() + BG_YELLOW + WHITE + BOLD + " EMPTY " + RESET,
            "too_large" => String::new() + BG_RED + WHITE + BOLD + " TOO BIG " + RESET,
            "bad_budget" => String::new() + BG_YELLOW + WHITE + BOLD + " BAD CAP " + RESET,
            "unsupported" => String::new() + BG_MAGENTA + WHITE + BOLD + " NON-IMG " + RESET,
            _ => String::new() + BG_YELLOW + WHITE + BOLD + " " + &reason.to_uppercase() + " " + RESET,
        };

        let msg = reason_badge
            + " " + DIM + "reject" + RESET
            + " " + WHITE + &self.format_bytes(size) + RESET
            + " " + DIM + "→" + RESET
            + " " + BLUE + &self.truncate_name(filename, 50) + RESET;
        info!("{}", msg);
    }

    pub fn error<T: Serialize>(&self, message: &str, metadata: &T) {
        use colors::*;
        let meta = serde_json::to_string(metadata).unwrap_or_default();
        let msg = String::new()
            + BG_RED + WHITE + BOLD + " ✗ ERROR " + RESET
            + " " + RED + &format!("{} | {}", message, meta) + RESET;
        error!("{}", msg);
    }

    #[allow(dead_code)]
    pub fn warn<T: Serialize>(&self, message: &str, metadata: &T) {
        use colors::*;
        let meta = serde_json::to_string(metadata).unwrap_or_default();
        let msg = String::new()
            + BG_YELLOW + WHITE + BOLD + " ⚠ WARN " + RESET
            + " " + YELLOW + &format!("{} | {}", message, meta) + RESET;
        warn!("{}", msg);
    }

    #[allow(dead_code)]
    pub fn info<T: Serialize>(&self, message: &str, metadata: &T) {
        use colors::*;
        let meta = serde_json::to_string(metadata).unwrap_or_default();
        let msg = String::new()
            + BG_BLUE + WHITE + BOLD + " ℹ INFO " + RESET
            + " " + CYAN + &format!("{} | {}", message, meta) + RESET;
        info!("{}", msg);
    }

    pub fn debug<T: Serialize>(&self, message: &str, metadata: &T) {
        use colors::*;
        let meta = serde_json::to_string(metadata).unwrap_or_default();
        let msg = String::new()
            + BG_MAGENTA + WHITE + BOLD + " ⋯ DEBUG " + RESET
            + " " + MAGENTA + &format!("{} | {}", message, meta) + RESET;
        debug!("{}", msg);
    }

    /// Log server startup with style
    pub fn log_startup(&self, version: &str, address: &str) {
        use colors::*;

        let box_style = String::new() + BOLD + BG_BLUE + WHITE;
        let r = RESET;

        eprintln!();
        eprintln!("{box_style} ════════════════════════════════════════════════════ {r}{box_style} ════════════════════════════════════════════════════ {r}");
        eprintln!("{box_style} ║ {r}                                              {box_style} ║ {r}");
        eprintln!("{box_style} ║  {BOLD}{WHITE} 🗜  SIZECAP SERVER {r} {box_style}                            {r}{box_style} ║ {r}");
        eprintln!("{box_style} ║  {WHITE}Version: {CYAN}{version}{r} {box_style}                                 {r}{box_style} ║ {r}");
        eprintln!("{box_style} ║  {WHITE}Address: {GREEN}{address}{r} {box_style}                              {r}{box_style} ║ {r}");
        eprintln!("{box_style} ║ {r}                                              {box_style} ║ {r}");
        eprintln!("{box_style} ════════════════════════════════════════════════════ {r}{box_style} ════════════════════════════════════════════════════ {r}");
        eprintln!();
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new("INFO", true)
    }
}
