use clap::Parser;
use greenbite_reqwest::{AuthClient, AuthConfig};
use greenbite_tokens::{sources::jwt::dto::LoginCredentials, Email, Password};

#[derive(Debug, Parser)]
struct Opts {
    /// The backend's base URL
    #[arg(short, long, env = "GREENBITE_BASE_URL", default_value = "http://127.0.0.1:8000/")]
    base_url: reqwest::Url,

    /// The email address to sign in with
    #[arg(short, long, env = "GREENBITE_EMAIL")]
    email: Email,

    /// The password to sign in with
    #[arg(short, long, env = "GREENBITE_PASSWORD", hide_env_values = true)]
    password: Password,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let client = AuthClient::new(AuthConfig::new(opts.base_url))?;
    let mut events = client.subscribe();

    client
        .login(&LoginCredentials::new(opts.email, opts.password))
        .await?;

    let user = client.current_user().await?;
    tracing::info!(
        id = ?user.id,
        username = ?user.username,
        admin = user.is_admin(),
        subscribed = user.is_subscribed(),
        "fetched current user"
    );

    client.logout();

    while let Ok(event) = events.try_recv() {
        tracing::info!(?event, "session event");
    }

    Ok(())
}
