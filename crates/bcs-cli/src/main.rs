#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use bcs::{BcsError, SimConfig, Strategy, replay};
use std::env;
use std::io;
use std::process;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Exit status for usage and construction errors (`-1` as a byte).
const EXIT_SETUP: i32 = 255;
/// Exit status for errors raised while replaying the trace.
const EXIT_REPLAY: i32 = 1;

fn main() {
    init_tracing();
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        process::exit(exit_code(&error));
    }
}

/// Logs go to stderr so stdout carries only the report.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn exit_code(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<BcsError>() {
        Some(
            BcsError::Io(_)
            | BcsError::Trace { .. }
            | BcsError::InvalidHandle { .. }
            | BcsError::UnknownGeneration { .. },
        ) => EXIT_REPLAY,
        _ => EXIT_SETUP,
    }
}

#[derive(Debug, PartialEq, Eq)]
struct CliArgs {
    config: SimConfig,
    json: bool,
}

fn run() -> Result<()> {
    let Some(args) = parse_args(env::args().skip(1))? else {
        print_usage();
        return Ok(());
    };

    debug!(
        strategy = %args.config.strategy,
        cache_percentage = args.config.cache_percentage,
        seed = args.config.seed,
        "cli: starting replay"
    );
    let stdin = io::stdin();
    let outcome = replay(&args.config, stdin.lock()).context("trace replay failed")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&outcome).context("serialize output")?
        );
    } else {
        println!(
            "{}",
            outcome.report.summary_line(args.config.cache_percentage)
        );
    }
    Ok(())
}

/// `None` when help was requested.
fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Option<CliArgs>> {
    let mut config = SimConfig::default();
    let mut json = false;
    let mut positional = Vec::new();

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(None),
            "--json" => json = true,
            "--seed" => config.seed = flag_value(&mut args, "--seed")?,
            "--buckets" => config.index_buckets = Some(flag_value(&mut args, "--buckets")?),
            "--block-size" => config.block_size = flag_value(&mut args, "--block-size")?,
            flag if flag.starts_with("--") => bail!("unknown option: {flag}"),
            _ => positional.push(arg),
        }
    }

    let (pct, low_memory) = match positional.as_slice() {
        [pct] => (pct, None),
        [pct, low] => (pct, Some(low)),
        _ => bail!("expected <cache_percentage> [<low_memory_target_percentage>]"),
    };
    config.cache_percentage = pct
        .parse()
        .with_context(|| format!("invalid cache percentage {pct:?}"))?;
    if let Some(low) = low_memory {
        let target: u32 = low
            .parse()
            .with_context(|| format!("invalid low-memory target percentage {low:?}"))?;
        if target != 0 {
            config.strategy = Strategy::LowMemory;
            config.low_memory_target_percentage = target;
        }
    }
    config.validate()?;
    Ok(Some(CliArgs { config, json }))
}

fn flag_value<T>(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let Some(value) = args.next() else {
        bail!("{flag} requires a value");
    };
    value
        .parse()
        .with_context(|| format!("invalid value for {flag}: {value:?}"))
}

fn print_usage() {
    println!("bcs: block cache hit-ratio simulator\n");
    println!("USAGE:");
    println!("  bcs <cache_percentage> [<low_memory_target_percentage>] [OPTIONS] < trace");
    println!();
    println!("A non-zero second argument selects the low-memory LRU.");
    println!();
    println!("OPTIONS:");
    println!("  --json            print the full replay outcome as JSON");
    println!("  --seed <N>        seed for low-memory victim sampling");
    println!("  --buckets <N>     hash index bucket count (default: cache capacity)");
    println!("  --block-size <N>  bytes per block (default: 512)");
    println!();
    println!("TRACE FORMAT:");
    println!("  <total_blocks> then repeated <start_block> <length_bytes> <R|W>");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Option<CliArgs>> {
        parse_args(args.iter().map(|s| (*s).to_owned()))
    }

    #[test]
    fn percentage_only_selects_exact() {
        let args = parse(&["10"]).expect("parse").expect("args");
        assert_eq!(args.config.cache_percentage, 10);
        assert_eq!(args.config.strategy, Strategy::Exact);
        assert!(!args.json);
    }

    #[test]
    fn nonzero_second_argument_selects_low_memory() {
        let args = parse(&["20", "40", "--json"]).expect("parse").expect("args");
        assert_eq!(args.config.strategy, Strategy::LowMemory);
        assert_eq!(args.config.low_memory_target_percentage, 40);
        assert!(args.json);

        let args = parse(&["20", "0"]).expect("parse").expect("args");
        assert_eq!(args.config.strategy, Strategy::Exact);
    }

    #[test]
    fn options_override_defaults() {
        let args = parse(&["--seed", "9", "5", "--buckets", "64", "--block-size", "4096"])
            .expect("parse")
            .expect("args");
        assert_eq!(args.config.seed, 9);
        assert_eq!(args.config.index_buckets, Some(64));
        assert_eq!(args.config.block_size, 4096);
    }

    #[test]
    fn bad_arguments_are_setup_errors() {
        for bad in [
            &[][..],
            &["1", "2", "3"][..],
            &["ten"][..],
            &["101"][..],
            &["10", "--seed"][..],
            &["10", "--frobnicate"][..],
        ] {
            let err = parse(bad).expect_err("rejected");
            assert_eq!(exit_code(&err), EXIT_SETUP, "{bad:?}");
        }
        assert!(parse(&["--help"]).expect("parse").is_none());
    }

    #[test]
    fn trace_errors_exit_with_replay_status() {
        let err = replay(&SimConfig::default(), "100\n1 x R".as_bytes())
            .context("trace replay failed")
            .expect_err("bad trace");
        assert_eq!(exit_code(&err), EXIT_REPLAY);
    }
}
