//! Built-in scan templates and nmap argument construction.

use std::net::IpAddr;
use std::path::Path;

use ipnet::IpNet;

use panopticon_core::{ScanParameters, ScanTemplate};

use crate::error::{Result, ScanError};

/// Template used when a request names one that does not exist.
pub const DEFAULT_TEMPLATE: &str = "default";

fn template(id: &str, description: &str, args: &[&str], rate_limit: u32) -> ScanTemplate {
    ScanTemplate {
        id: id.to_string(),
        name: id.to_string(),
        description: description.to_string(),
        nmap_args: args.iter().map(|a| a.to_string()).collect(),
        rate_limit,
    }
}

/// All built-in templates, sorted by id.
pub fn builtin_templates() -> Vec<ScanTemplate> {
    vec![
        template(
            "default",
            "Standard network scan",
            &["-sS", "-sV", "-O", "--osscan-limit"],
            1000,
        ),
        template("quick", "Fast scan of common ports", &["-sS", "-F"], 2000),
        template(
            "stealth",
            "Low-impact scan for sensitive networks",
            &["-sS", "-T2", "--max-retries", "1"],
            100,
        ),
        template(
            "thorough",
            "Detailed scan of all ports",
            &["-sS", "-sV", "-p-", "-O", "--osscan-guess"],
            500,
        ),
    ]
}

/// Look up a template by id, falling back to [`DEFAULT_TEMPLATE`].
pub fn resolve_template(id: &str) -> ScanTemplate {
    let mut templates = builtin_templates();
    if let Some(pos) = templates.iter().position(|t| t.id == id) {
        return templates.swap_remove(pos);
    }
    tracing::warn!(template = %id, "Template not found, using default");
    let pos = templates
        .iter()
        .position(|t| t.id == DEFAULT_TEMPLATE)
        .unwrap_or(0);
    templates.swap_remove(pos)
}

/// Build the nmap argument list for one run.
///
/// Order: `-oX <output>`, template arguments (with `-p…` replaced by `-p-`
/// when scanning all ports), `-Pn` when ping is disabled, `--max-rate`, then
/// the target.
pub fn build_args(
    template: &ScanTemplate,
    params: &ScanParameters,
    default_target: &str,
    output: &Path,
) -> Result<Vec<String>> {
    let target = params
        .target_network
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| default_target.trim());
    validate_target(target)?;

    let mut args = vec!["-oX".to_string(), output.to_string_lossy().into_owned()];

    if params.scan_all_ports {
        args.extend(
            template
                .nmap_args
                .iter()
                .filter(|a| !a.starts_with("-p"))
                .cloned(),
        );
        args.push("-p-".to_string());
    } else {
        args.extend(template.nmap_args.iter().cloned());
    }

    if params.disable_ping && !args.iter().any(|a| a == "-Pn") {
        args.push("-Pn".to_string());
    }

    let rate = params
        .rate_limit
        .filter(|r| *r > 0)
        .unwrap_or(template.rate_limit);
    args.push("--max-rate".to_string());
    args.push(rate.to_string());

    args.push(target.to_string());
    Ok(args)
}

/// A target must be a CIDR network or a single IP address.
pub fn validate_target(target: &str) -> Result<()> {
    if target.is_empty() {
        return Err(ScanError::Config("no target network specified".to_string()));
    }
    if target.parse::<IpNet>().is_ok() || target.parse::<IpAddr>().is_ok() {
        return Ok(());
    }
    Err(ScanError::Config(format!(
        "invalid target network: {target}"
    )))
}
