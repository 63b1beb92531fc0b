#![deny(rust_2018_idioms)]
#![deny(clippy::all)]

use std::sync::Arc;

use clap::{Arg, Command};
use slog::{error, info, Drain, Logger};

use adapter::Signer;
use clearnode::{db, reconciler::ChainReconciler, Application};
use primitives::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Command::new("clearnode")
        .about("Broker node for off-chain payment channels")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("FILE")
                .help("path to the TOML configuration file"),
        )
        .get_matches();

    let mut config = match cli.get_one::<String>("config") {
        Some(path) => Config::from_file(path)?,
        None => primitives::config::DEVELOPMENT_CONFIG.clone(),
    };

    // production secrets come from the environment, not the config file
    if let Ok(database_url) = std::env::var("DATABASE_URL") {
        config.database_url = database_url;
    }
    if let Ok(private_key) = std::env::var("CLEARNODE_PRIVATE_KEY") {
        config.private_key = private_key;
    }

    let logger = logger();

    // an unloadable broker key is fatal
    let signer = Arc::new(Signer::from_hex(&config.private_key)?);
    info!(logger, "broker identity"; "address" => %signer.address());

    let pool = db::connect(&config.database_url).await?;
    db::migrations(&pool).await?;

    {
        let client = pool.get().await?;
        db::asset::seed(&*client, &config.assets()).await?;
    }

    let app = Arc::new(Application::new(
        signer,
        config.clone(),
        logger.clone(),
        pool,
    ));

    for (name, chain_info) in &config.chains {
        let reconciler = match ChainReconciler::new(Arc::clone(&app), chain_info.clone()) {
            Ok(reconciler) => reconciler,
            Err(err) => {
                error!(logger, "failed to initialize chain reconciler";
                       "chain" => name.as_str(), "error" => %err);
                continue;
            }
        };

        info!(logger, "starting chain reconciler";
              "chain" => name.as_str(), "chain_id" => %chain_info.chain.chain_id);
        tokio::spawn(reconciler.run());
    }

    app.run().await;

    Ok(())
}

fn logger() -> Logger {
    use slog::o;

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    Logger::root(drain, o!("app" => "clearnode"))
}
