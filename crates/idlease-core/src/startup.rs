//! Startup output for the idlease binary
//!
//! A banner plus a grouped configuration summary when logging to a terminal,
//! and phase/ready markers in the log stream.

use std::io::IsTerminal;

use crate::config::IdleaseConfig;

/// Service information for the startup banner
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub name: &'static str,
    pub version: &'static str,
    /// Environment (development, staging, production)
    pub environment: String,
}

/// A single configuration entry for display
#[derive(Debug, Clone)]
pub struct ConfigEntry {
    pub category: &'static str,
    pub key: &'static str,
    /// Value already formatted as string
    pub value: String,
}

impl ConfigEntry {
    pub fn new(category: &'static str, key: &'static str, value: impl ToString) -> Self {
        Self { category, key, value: value.to_string() }
    }
}

/// Summary entries for a loaded configuration
pub fn config_entries(config: &IdleaseConfig) -> Vec<ConfigEntry> {
    let lease = &config.lease;
    let mut entries = vec![
        ConfigEntry::new("Lease", "table", &lease.table),
        ConfigEntry::new("Lease", "range", format!("[{}, {}]", lease.min_id, lease.max_id)),
        ConfigEntry::new("Lease", "ttl", format!("{}s", lease.ttl_seconds)),
        ConfigEntry::new(
            "Lease",
            "renewal_period",
            format!("{}ms", lease.renewal_period().as_millis()),
        ),
        ConfigEntry::new("Storage", "backend", &config.storage.backend),
    ];

    if let Some(cluster_file) = &config.storage.fdb_cluster_file {
        entries.push(ConfigEntry::new("Storage", "fdb_cluster_file", cluster_file));
    }

    entries.push(ConfigEntry::new(
        "Server",
        "http",
        format!("{}:{}", config.server.http_host, config.server.http_port),
    ));
    entries.push(ConfigEntry::new("Observability", "log_level", &config.observability.log_level));
    entries.push(ConfigEntry::new(
        "Observability",
        "metrics",
        if config.observability.metrics_enabled { "enabled" } else { "disabled" },
    ));

    entries
}

/// Builder for creating a structured startup display
pub struct StartupDisplay {
    service: ServiceInfo,
    entries: Vec<ConfigEntry>,
    use_ansi: bool,
}

impl StartupDisplay {
    pub fn new(service: ServiceInfo) -> Self {
        Self { service, entries: Vec::new(), use_ansi: std::io::stdout().is_terminal() }
    }

    /// Set whether to use ANSI colors
    pub fn with_ansi(mut self, use_ansi: bool) -> Self {
        self.use_ansi = use_ansi;
        self
    }

    pub fn entries(mut self, entries: impl IntoIterator<Item = ConfigEntry>) -> Self {
        self.entries.extend(entries);
        self
    }

    /// Print the banner and configuration summary to stdout
    pub fn display(&self) {
        print!("{}", self.render());
    }

    fn render(&self) -> String {
        let (dim, reset, bold, cyan, green) = if self.use_ansi {
            ("\x1b[2m", "\x1b[0m", "\x1b[1m", "\x1b[36m", "\x1b[32m")
        } else {
            ("", "", "", "", "")
        };

        let mut out = String::new();
        let rule = "─".repeat(61);
        let title = format!("{} v{}", self.service.name, self.service.version);

        out.push('\n');
        out.push_str(&format!("{dim}┌{rule}┐{reset}\n"));
        out.push_str(&format!("{dim}│{reset}  {bold}{cyan}{title:^57}{reset}  {dim}│{reset}\n"));
        out.push_str(&format!(
            "{dim}│{reset}  {env:^57}  {dim}│{reset}\n",
            env = self.service.environment
        ));
        out.push_str(&format!("{dim}└{rule}┘{reset}\n\n"));

        if self.entries.is_empty() {
            return out;
        }

        // Group entries by category, keeping first-seen order
        let mut categories: Vec<(&str, Vec<&ConfigEntry>)> = Vec::new();
        for entry in &self.entries {
            match categories.iter_mut().find(|(cat, _)| *cat == entry.category) {
                Some((_, group)) => group.push(entry),
                None => categories.push((entry.category, vec![entry])),
            }
        }

        let width = self.entries.iter().map(|e| e.key.len()).max().unwrap_or(0).max(16);

        out.push_str(&format!("{bold}Configuration:{reset}\n\n"));
        for (category, group) in categories {
            out.push_str(&format!("  {dim}[{category}]{reset}\n"));
            for entry in group {
                out.push_str(&format!(
                    "    {key:<width$}  {green}{value}{reset}\n",
                    key = entry.key,
                    value = entry.value
                ));
            }
            out.push('\n');
        }

        out
    }
}

/// Log a successful initialization step
pub fn log_initialized(component: &str) {
    tracing::info!("✓ {} initialized", component);
}

/// Log a skipped initialization step
pub fn log_skipped(component: &str, reason: &str) {
    tracing::info!("○ {} skipped: {}", component, reason);
}

/// Log that the service holds its ID and is serving
pub fn log_ready(service: &str, id: i64, addresses: &[(&str, &str)]) {
    tracing::info!("━━━ {} Ready (ID {}) ━━━", service, id);
    for (name, addr) in addresses {
        tracing::info!("  {} → {}", name, addr);
    }
}
