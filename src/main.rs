use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use white_light::backtest::BacktestConfig;
use white_light::error::EngineError;
use white_light::pipeline::{
    self, build_alerts, build_broker, build_providers, SessionDeps,
};
use white_light::secrets::EnvSecrets;
use white_light::Config;

#[derive(Parser, Debug)]
#[clap(author, version, about = "NDX volatility-targeted ETF rotation engine")]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daily live pipeline
    Run {
        /// Plan and report without submitting orders
        #[clap(long)]
        dry_run: bool,
    },
    /// Bring the bar cache up to date and validate it
    Sync,
    /// Replay the strategy over cached history
    Backtest {
        #[clap(long)]
        start: NaiveDate,
        #[clap(long)]
        end: NaiveDate,
        /// Initial capital in dollars
        #[clap(long, default_value = "100000")]
        capital: Decimal,
        /// Bar source: "cache" replays as-is, a provider name ("polygon",
        /// "stooq") syncs the cache first
        #[clap(long, default_value = "cache")]
        source: String,
        /// Uniform per-side slippage in basis points
        #[clap(long, default_value = "0")]
        slippage_bps: Decimal,
        /// Write the equity curve to this CSV path
        #[clap(long)]
        equity_csv: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_target(true)
        .init();

    let args = Args::parse();

    // Configuration problems exit 2 before any network I/O.
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration error");
            std::process::exit(2);
        }
    };

    let code = match run(args.command, &config).await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "command failed");
            e.exit_code()
        }
    };
    std::process::exit(code);
}

async fn run(command: Command, config: &Config) -> Result<(), EngineError> {
    info!("white_light v{}", env!("CARGO_PKG_VERSION"));
    let secrets = EnvSecrets;
    let today = Utc::now().date_naive();

    match command {
        Command::Run { dry_run } => {
            let deps = SessionDeps {
                providers: build_providers(config, &secrets)?,
                broker: build_broker(config, &secrets, today)?,
                alerts: build_alerts(config, &secrets)?,
            };
            let dry_run = dry_run || config.execution.dry_run;
            pipeline::run_session(config, &deps, dry_run, today, Utc::now()).await?;
            Ok(())
        }
        Command::Sync => {
            let providers = build_providers(config, &secrets)?;
            pipeline::run_sync(config, providers, today).await
        }
        Command::Backtest {
            start,
            end,
            capital,
            source,
            slippage_bps,
            equity_csv,
        } => {
            if source != "cache" {
                let mut provider_config = config.clone();
                provider_config.data.providers = vec![source];
                let providers = build_providers(&provider_config, &secrets)?;
                pipeline::run_sync(&provider_config, providers, today).await?;
            }
            let backtest_config =
                BacktestConfig::new(start, end, capital).with_slippage_bps(slippage_bps);
            let result = pipeline::run_backtest(config, backtest_config)?;
            println!("{}", result.summary());
            if let Some(path) = equity_csv {
                result
                    .equity_to_csv(&path)
                    .map_err(|e| EngineError::DataGap(e.to_string()))?;
                info!(%path, "equity curve written");
            }
            Ok(())
        }
    }
}
