use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use shared_types::{
    AuthUserResponse, CredentialsRequest, ErrorResponse, HealthResponse, RefreshRequest,
    SignUpResponse, TokenResponse,
};

#[derive(Parser)]
#[command(name = "auth-cli")]
#[command(about = "CLI for the auth service: sign up, sign in, rotate and revoke tokens")]
#[command(
    long_about = "A command-line interface for interacting with the auth server.\n\n\
    Every command prints the server's JSON response. Tokens returned by \
    'signin' and 'refresh' are passed back explicitly to later commands."
)]
struct Cli {
    /// Auth server URL to connect to.
    #[arg(
        short,
        long,
        default_value = "http://localhost:9001",
        env = "AUTH_API_URL"
    )]
    base_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new account. Issues no tokens.
    Signup {
        email: String,
        password: String,
    },

    /// Sign in and print a fresh access/refresh token pair
    Signin {
        email: String,
        password: String,
    },

    /// Rotate a token pair
    ///
    /// Both old tokens stop working once this succeeds.
    Refresh {
        /// The current access token
        #[arg(long, value_name = "TOKEN")]
        access_token: String,

        /// The refresh token issued together with the access token
        #[arg(long, value_name = "TOKEN")]
        refresh_token: String,
    },

    /// Revoke a session. Succeeds even if it was already revoked.
    Revoke {
        #[arg(long, value_name = "TOKEN")]
        access_token: String,
    },

    /// Show who an access token belongs to, if it is still live
    Me {
        #[arg(long, value_name = "TOKEN")]
        access_token: String,
    },

    /// Check server and credential store health
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = cli.base_url.trim_end_matches('/');

    match cli.command {
        Commands::Signup { email, password } => {
            let req = CredentialsRequest::new(email, password);
            let res: SignUpResponse =
                send(client.post(format!("{}/signup", base_url)).json(&req)).await?;
            print_json(&res)?;
        }
        Commands::Signin { email, password } => {
            let req = CredentialsRequest::new(email, password);
            let res: TokenResponse =
                send(client.post(format!("{}/signin", base_url)).json(&req)).await?;
            print_json(&res)?;
        }
        Commands::Refresh {
            access_token,
            refresh_token,
        } => {
            let req = RefreshRequest { refresh_token };
            let res: TokenResponse = send(
                client
                    .post(format!("{}/refresh", base_url))
                    .bearer_auth(access_token)
                    .json(&req),
            )
            .await?;
            print_json(&res)?;
        }
        Commands::Revoke { access_token } => {
            let response = client
                .post(format!("{}/revoke", base_url))
                .bearer_auth(access_token)
                .send()
                .await
                .context("Failed to reach auth server")?;
            ensure_success(response).await?;
            println!("Revoked.");
        }
        Commands::Me { access_token } => {
            let res: AuthUserResponse = send(
                client
                    .get(format!("{}/me", base_url))
                    .bearer_auth(access_token),
            )
            .await?;
            print_json(&res)?;
        }
        Commands::Health => {
            let response = client
                .get(format!("{}/health", base_url))
                .send()
                .await
                .context("Failed to reach auth server")?;
            // 503 still carries a HealthResponse body
            let status = response.status();
            if status == StatusCode::OK || status == StatusCode::SERVICE_UNAVAILABLE {
                let res: HealthResponse = response.json().await?;
                print_json(&res)?;
            } else {
                ensure_success(response).await?;
            }
        }
    }

    Ok(())
}

async fn send<T: DeserializeOwned>(request: RequestBuilder) -> anyhow::Result<T> {
    let response = request
        .send()
        .await
        .context("Failed to reach auth server")?;
    let response = ensure_success(response).await?;

    response
        .json()
        .await
        .context("Unexpected response body from auth server")
}

async fn ensure_success(response: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(err) => match err.details {
            Some(details) => bail!("{} ({}): {}", err.error, status, details),
            None => bail!("{} ({})", err.error, status),
        },
        Err(_) => bail!("Request failed ({}): {}", status, body),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
