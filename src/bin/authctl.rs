use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mappedout::auth::{PopupRequest, provider::GOOGLE_PROVIDER_ID};
use mappedout::config::DEFAULT_CONFIG_FILE;
use mappedout::{
    App, AppConfig, Auth, AuthError, FederatedProvider, InMemoryIdentityService, PopupHandler,
    Principal,
};

#[derive(Debug, Parser)]
#[command(name = "authctl", about = "Inspect and exercise the mapped-out auth setup")]
struct Args {
    /// TOML config file; MAPPEDOUT_* environment variables override it
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load and validate the configuration
    Validate,

    /// Print the popup handler URL for Google sign-in
    PopupUrl,

    /// Sign in, check, sign out and check again against the in-process service
    Demo {
        #[arg(long)]
        uid: String,

        #[arg(long)]
        email: Option<String>,
    },
}

/// Popup stand-in that always signs in the same user
struct FixedPrincipal(Principal);

#[async_trait]
impl PopupHandler for FixedPrincipal {
    async fn complete(&self, request: &PopupRequest) -> Result<Principal, AuthError> {
        info!(url = %request.url(), "Popup would open");
        Ok(self.0.clone())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mappedout=info,authctl=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = AppConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let app = App::initialize(config)?;

    match args.command {
        Command::Validate => {
            println!(
                "ok: project {} via {}",
                app.config().project_id,
                app.config().auth_domain
            );
        }
        Command::PopupUrl => {
            let request = PopupRequest::new(app.config(), &FederatedProvider::google(), app.name())?;
            println!("{}", request.url());
        }
        Command::Demo { uid, email } => {
            let mut principal = Principal::new(uid, GOOGLE_PROVIDER_ID);
            if let Some(email) = email {
                principal = principal.with_email(email, true);
            }

            let service = InMemoryIdentityService::new(&app, Arc::new(FixedPrincipal(principal)));
            let auth = Auth::new(&app, Arc::new(service));

            println!("before sign-in: {:?}", auth.check_auth().await?);
            auth.sign_in().await?;
            println!(
                "after sign-in: {}",
                serde_json::to_string_pretty(&auth.check_auth().await?)?
            );
            auth.log_out().await?;
            println!("after sign-out: {:?}", auth.check_auth().await?);
        }
    }

    Ok(())
}
