//! charla - terminal chat client for a local inference gateway

mod repl;

use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use charla_app::{ChatApp, Storage};
use charla_gateway::GatewayClient;

/// charla - chat with a local inference gateway
#[derive(Parser, Debug)]
#[command(name = "charla")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Gateway base URL
    #[arg(short, long, default_value = "http://localhost:3000")]
    url: String,

    /// Gateway password (prompted when omitted)
    #[arg(short, long)]
    password: Option<String>,

    /// Model to use (default: first model the gateway lists)
    #[arg(short, long)]
    model: Option<String>,

    /// Disable streaming responses
    #[arg(long)]
    no_stream: bool,

    /// Data directory for history and settings
    #[arg(long)]
    data_dir: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "charla=debug".into()),
            )
            .init();
    }

    let gateway = GatewayClient::new(&args.url);
    let storage = match &args.data_dir {
        Some(dir) => Storage::with_dir(dir),
        None => Storage::new(),
    };
    let app = Arc::new(
        ChatApp::new(Arc::new(gateway), storage).context("failed to load application state")?,
    );

    if args.no_stream {
        let mut settings = app.settings();
        settings.streaming = false;
        app.set_settings(settings)?;
    }

    login(&app, args.password.as_deref()).await?;

    let models = app
        .list_models()
        .await
        .context("could not list models; is the gateway running?")?;
    let model = match args.model {
        Some(model) => model,
        None => models
            .first()
            .cloned()
            .context("the gateway lists no models")?,
    };
    println!("Modelo: {model}");

    repl::run(app, model).await
}

/// Authenticate against the gateway, prompting until a password is accepted.
async fn login(app: &ChatApp, password: Option<&str>) -> anyhow::Result<()> {
    if let Some(password) = password {
        if app.login(password).await? {
            return Ok(());
        }
        anyhow::bail!("contraseña incorrecta");
    }
    loop {
        print!("Contraseña: ");
        std::io::stdout().flush()?;
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line)? == 0 {
            anyhow::bail!("no password given");
        }
        if app.login(line.trim_end()).await? {
            return Ok(());
        }
        println!("Contraseña incorrecta, prueba de nuevo.");
    }
}
