//! E2E scenario runner entry point
//!
//! This file is the test binary that runs scenarios from YAML specs against
//! a running Lumina dev server. It is opt-in so a plain `cargo test` stays
//! hermetic:
//!
//! LUMINA_E2E=1 cargo test --package lumina-e2e --test e2e -- --tag smoke

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use lumina_e2e::playwright::{PlaywrightConfig, PlaywrightDriver};
use lumina_e2e::{
    Browser, E2eError, E2eResult, HarnessConfig, ScenarioExecutor, TestRunner, Viewport,
};

#[derive(Parser, Debug)]
#[command(name = "lumina-e2e")]
#[command(about = "UI acceptance scenarios for the Lumina web studio")]
struct Args {
    /// Run even without LUMINA_E2E set
    #[arg(long)]
    run: bool,

    /// Harness config file (YAML); flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to scenarios directory
    #[arg(short, long, default_value = "tests/e2e/scenarios")]
    scenarios: PathBuf,

    /// Run only scenarios matching this tag
    #[arg(short, long)]
    tag: Option<String>,

    /// Run only a specific scenario by name
    #[arg(short, long)]
    name: Option<String>,

    /// Origin of the application under test
    #[arg(long)]
    base_url: Option<String>,

    /// Locale prefix for relative URLs
    #[arg(long)]
    locale: Option<String>,

    #[arg(long, value_enum)]
    browser: Option<Browser>,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Viewport width
    #[arg(long)]
    viewport_width: Option<u32>,

    /// Viewport height
    #[arg(long)]
    viewport_height: Option<u32>,

    /// Scenarios run at once
    #[arg(long)]
    concurrency: Option<usize>,

    /// Do not wait for the application before running
    #[arg(long)]
    skip_ready_check: bool,

    /// Results file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn harness_config(&self) -> E2eResult<HarnessConfig> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::from_file(path)?,
            None => HarnessConfig::default(),
        };
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if let Some(locale) = &self.locale {
            config.locale = Some(locale.clone()).filter(|l| !l.is_empty());
        }
        if let Some(browser) = self.browser {
            config.browser = browser;
        }
        if self.headed {
            config.headless = false;
        }
        config.viewport = Viewport::new(
            self.viewport_width.unwrap_or(config.viewport.width),
            self.viewport_height.unwrap_or(config.viewport.height),
        );
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(output) = &self.output {
            config.results_path = output.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if !args.run && std::env::var_os("LUMINA_E2E").is_none() {
        info!("Skipping E2E scenarios (set LUMINA_E2E=1 or pass --run)");
        return;
    }

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create tokio runtime: {}", e);
            std::process::exit(2);
        }
    };

    match rt.block_on(async_main(args)) {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    }
}

async fn async_main(args: Args) -> E2eResult<bool> {
    let config = args.harness_config()?;
    let results_path = config.results_path.clone();

    let driver = Arc::new(PlaywrightDriver::launch(PlaywrightConfig::from_harness(&config)).await?);
    let executor = ScenarioExecutor::new(driver.clone(), config);
    let runner = TestRunner::new(executor, args.scenarios.clone());

    let cancel = runner.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, aborting running scenarios");
            cancel.cancel();
        }
    });

    let outcome = async {
        if !args.skip_ready_check {
            runner.wait_for_app().await?;
        }

        let results = if let Some(name) = &args.name {
            runner.run_named(name).await?
        } else if let Some(tag) = &args.tag {
            runner.run_tagged(tag).await?
        } else {
            runner.run_all().await?
        };

        runner.write_results(&results, &results_path)?;
        Ok::<bool, E2eError>(results.success())
    }
    .await;

    driver.shutdown().await;
    if let Err(e) = &outcome {
        error!("Scenario run aborted: {}", e);
    }
    outcome
}
