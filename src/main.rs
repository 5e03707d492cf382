//! `certfetch` command-line entry point.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use certfetch::{Config, FetchReport};

/// Save the certificate chain a TLS server presents.
///
/// Creates <host>_bundle.pem containing every certificate in the chain, usable
/// with curl, wget and other TLS clients, plus one .crt file per certificate.
#[derive(Parser, Debug)]
#[command(name = "certfetch")]
#[command(author, version, about)]
#[command(after_help = "Examples:
  certfetch example.com
  certfetch example.com:443
  certfetch https://github.com
  certfetch smtp://smtp.gmail.com:587
  certfetch --insecure self-signed.example.com")]
struct Cli {
    /// Target server: host, host:port or scheme://host[:port] (https, tls, smtp, imap, pop3)
    #[arg(value_name = "TARGET", required_unless_present = "target_flag")]
    target: Option<String>,

    /// Target server, as an alternative to the positional argument
    #[arg(short = 't', long = "target", value_name = "TARGET", conflicts_with = "target")]
    target_flag: Option<String>,

    /// Skip certificate verification (self-signed or test servers only)
    #[arg(short = 'k', long)]
    insecure: bool,

    /// Connect, negotiation and handshake timeout: seconds, or a number with an `ms`, `s` or `m` suffix
    #[arg(long, value_name = "DURATION", default_value = "10s", value_parser = parse_timeout)]
    timeout: Duration,

    /// Directory to write the bundle and certificate files to
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Log each step of the fetch
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let target = cli
        .target
        .or(cli.target_flag)
        .context("no target given")?;

    let config = Config::new()
        .with_timeout(cli.timeout)
        .with_insecure(cli.insecure)
        .with_output_dir(cli.output_dir);

    let report = certfetch::fetch(&target, &config)
        .with_context(|| format!("failed to get certificates from {target}"))?;

    print_report(&report);
    print!(
        "{}",
        usage_instructions(&report.written.bundle, report.target.host())
    );
    Ok(())
}

fn print_report(report: &FetchReport) {
    println!(
        "Created certificate bundle: {}",
        report.written.bundle.display()
    );
    println!("Bundle contains {} certificate(s)", report.chain.len());
    for path in &report.written.saved {
        println!("Saving individual cert: {}", path.display());
    }
    for path in &report.written.skipped {
        println!("Individual cert already exists: {}", path.display());
    }
}

fn usage_instructions(bundle: &Path, host: &str) -> String {
    let absolute = std::path::absolute(bundle).unwrap_or_else(|_| bundle.to_path_buf());
    let dir = match bundle.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    format!(
        "
Usage with curl:
  curl --cacert {bundle} https://{host}/
  curl --capath {dir} https://{host}/

Usage with environment variables:
  export SSL_CERT_FILE='{absolute}'
  export REQUESTS_CA_BUNDLE='{absolute}'
",
        bundle = bundle.display(),
        dir = dir.display(),
        absolute = absolute.display(),
    )
}

/// Parses `10`, `10s`, `500ms` or `2m` into a non-zero duration.
fn parse_timeout(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let (number, unit) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(at) => raw.split_at(at),
        None => (raw, "s"),
    };
    let value: u64 = number
        .parse()
        .map_err(|_| format!("`{raw}` is not a duration"))?;
    let timeout = match unit {
        "ms" => Duration::from_millis(value),
        "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value.saturating_mul(60)),
        other => return Err(format!("unknown unit `{other}`, expected ms, s or m")),
    };
    if timeout.is_zero() {
        return Err("timeout must be greater than zero".to_owned());
    }
    Ok(timeout)
}
