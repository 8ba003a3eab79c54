#![allow(clippy::result_large_err)]

use anyhow::Context;
use notifier::app::{NotifierApp, StaticCatalog};
use notifier::config::{CatalogConfig, NotifierConfig};
use notifier::telemetry;
use std::path::PathBuf;

#[derive(Default)]
struct CatalogOverrides {
    events_path: Option<PathBuf>,
    templates_path: Option<PathBuf>,
}

impl CatalogOverrides {
    fn apply(self, catalog: &mut CatalogConfig) {
        if let Some(path) = self.events_path {
            catalog.events_path = path;
        }
        if let Some(path) = self.templates_path {
            catalog.templates_path = path;
        }
    }
}

enum CliCommand {
    Run {
        config_path: Option<PathBuf>,
        overrides: CatalogOverrides,
        verbose: bool,
    },
    Check {
        overrides: CatalogOverrides,
    },
    Help,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    match parse_cli_args(std::env::args().skip(1))? {
        CliCommand::Run {
            config_path,
            overrides,
            verbose,
        } => {
            telemetry::init_tracing(verbose).context("failed to initialise telemetry")?;

            let mut config = NotifierConfig::load(config_path.as_deref())
                .context("failed to load configuration")?;
            overrides.apply(&mut config.catalog);

            let app = NotifierApp::initialise(config)
                .await
                .context("failed to construct application")?;

            app.run().await.context("application runtime error")
        }
        CliCommand::Check { overrides } => {
            let mut catalog = CatalogConfig::default();
            overrides.apply(&mut catalog);
            run_check_command(&catalog)
        }
        CliCommand::Help => {
            print_help();
            Ok(())
        }
    }
}

fn parse_cli_args<I>(args: I) -> anyhow::Result<CliCommand>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().peekable();
    let check = args.peek().is_some_and(|first| first == "check");
    if check {
        args.next();
    }

    let mut config_path = None;
    let mut overrides = CatalogOverrides::default();
    let mut verbose = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" if !check => {
                if config_path.is_some() {
                    anyhow::bail!("config path specified multiple times");
                }
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("expected path after {arg}"))?;
                config_path = Some(PathBuf::from(value));
            }
            "--events" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("expected path after --events"))?;
                overrides.events_path = Some(PathBuf::from(value));
            }
            "--templates" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("expected path after --templates"))?;
                overrides.templates_path = Some(PathBuf::from(value));
            }
            "-v" | "--verbose" if !check => verbose = true,
            "-h" | "--help" => return Ok(CliCommand::Help),
            other => anyhow::bail!("unrecognised argument `{other}`"),
        }
    }

    if check {
        Ok(CliCommand::Check { overrides })
    } else {
        Ok(CliCommand::Run {
            config_path,
            overrides,
            verbose,
        })
    }
}

fn print_help() {
    println!(
        "\
Usage: notifier [OPTIONS]
       notifier check [--events <PATH>] [--templates <PATH>]

Options:
  -c, --config <PATH>      Extra configuration file layered over config/<env>
      --events <PATH>      Event catalog file (default events.json)
      --templates <PATH>   Template file (default templates.json)
  -v, --verbose            Debug logging for notifier targets
  -h, --help               Print this help message

Check:
  Validates the event catalog against the builtin payload schemas and the
  template file without connecting to the database.
"
    );
}

fn run_check_command(catalog: &CatalogConfig) -> anyhow::Result<()> {
    let statics = StaticCatalog::load(catalog)?;
    let mismatches = statics.check().context("event catalog failed validation")?;

    println!(
        "validated {} events against {} templates and {} payload schemas",
        statics.catalog.len(),
        statics.templates.len(),
        statics.payloads.len()
    );

    if mismatches.is_empty() {
        return Ok(());
    }

    for mismatch in &mismatches {
        eprintln!(
            "- event {}: template has {} placeholders, payload schema supplies {} arguments",
            mismatch.event_id, mismatch.placeholders, mismatch.arguments
        );
    }
    anyhow::bail!("{} template(s) disagree with their payload schema", mismatches.len())
}
