use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::{Input, Password};
use std::sync::Arc;

use shortlink_client::auth::{AuthManager, CredentialStore, Session};
use shortlink_client::config::{Command, Config, Credentials, ShellLine};
use shortlink_client::error::ClientError;
use shortlink_client::http_client::HttpClient;
use shortlink_client::links::LinkService;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let (config, command) = Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("🚀 Shortlink client starting...");
    tracing::info!("Backend: {}", config.api_url);

    let client = Arc::new(HttpClient::new(
        config.api_url.clone(),
        config.http_connect_timeout,
        config.http_request_timeout,
    )?);
    if let Some(cookie) = config.refresh_cookie() {
        client.seed_cookie(&cookie);
        tracing::debug!("Seeded persisted refresh token");
    }

    let store = Arc::new(CredentialStore::new());
    let auth = AuthManager::new(Arc::clone(&client), store);
    auth.install().await;
    watch_session(&auth);

    let app = App {
        links: LinkService::new(client),
        auth,
    };

    // One silent refresh attempt; no polling
    let session = app.auth.bootstrap().await;

    match command {
        Command::Shell => app.shell(session).await,
        command => app.run(command).await,
    }
}

/// Log every session transition, the way a view tree would re-render on it
fn watch_session(auth: &AuthManager) {
    let mut rx = auth.subscribe();
    tokio::spawn(async move {
        let mut last = rx.borrow_and_update().session();
        while rx.changed().await.is_ok() {
            let session = rx.borrow_and_update().session();
            if session != last {
                tracing::info!(?session, "Session changed");
                last = session;
            }
        }
    });
}

struct App {
    auth: AuthManager,
    links: LinkService,
}

impl App {
    async fn run(&self, command: Command) -> Result<()> {
        match command {
            Command::Login(credentials) => {
                let password = password_for(&credentials)?;
                self.auth
                    .login(&credentials.username, &password, credentials.persistent)
                    .await
                    .context("Login failed")?;
                println!("Logged in as {}", credentials.username);
            }

            Command::Register(credentials) => {
                let password = password_for(&credentials)?;
                self.auth
                    .register(&credentials.username, &password, credentials.persistent)
                    .await
                    .context("Registration failed")?;
                println!("Account {} created, logged in", credentials.username);
            }

            Command::Shorten { url, code } => {
                let short_code = self
                    .links
                    .shorten(&url, code.as_deref())
                    .await
                    .map_err(login_hint)
                    .context("Could not shorten link")?;
                println!("{}", self.links.short_url(&short_code));
            }

            Command::Links => {
                let links = self
                    .links
                    .user_links()
                    .await
                    .map_err(login_hint)
                    .context("Could not fetch links")?;
                if links.is_empty() {
                    println!("No links available");
                }
                for link in links {
                    println!("{} - {} - {}", link.code, link.long_url, link.short_url);
                }
            }

            Command::Logout => {
                self.auth.logout().await.context("Logout failed")?;
                println!("Logged out");
            }

            Command::Status => {
                let snapshot = self.auth.store().snapshot();
                match snapshot.session() {
                    Session::Authenticated => println!(
                        "Authenticated (since {})",
                        snapshot.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
                    ),
                    Session::Anonymous => println!("Not logged in"),
                }
            }

            Command::Shell => println!("Already in a shell"),
        }

        Ok(())
    }

    /// Read commands until `exit`, keeping one session across them
    async fn shell(&self, session: Session) -> Result<()> {
        if session == Session::Anonymous {
            println!("Not logged in. Use `login -n <user>` or `register -n <user>`.");
        }

        loop {
            let prompt = match self.auth.session() {
                Session::Authenticated => "shortlink",
                Session::Anonymous => "shortlink (login required)",
            };
            let line: String = Input::new()
                .with_prompt(prompt)
                .allow_empty(true)
                .interact_text()
                .context("Failed to read command")?;

            let line = line.trim();
            match line {
                "" => continue,
                "exit" | "quit" => return Ok(()),
                _ => {}
            }

            let command = match ShellLine::try_parse_from(line.split_whitespace()) {
                Ok(parsed) => parsed.command,
                Err(e) => {
                    println!("{}", e);
                    continue;
                }
            };

            if let Err(e) = self.run(command).await {
                println!("Error: {:#}", e);
            }
        }
    }
}

fn password_for(credentials: &Credentials) -> Result<String> {
    match credentials.password {
        Some(ref password) => Ok(password.clone()),
        None => Password::new()
            .with_prompt(format!("Password for {}", credentials.username))
            .interact()
            .context("Failed to read password"),
    }
}

/// An authentication failure reaching the user means the session is gone
fn login_hint(error: ClientError) -> anyhow::Error {
    if error.is_authentication_failure() {
        anyhow::Error::new(error).context("Session expired or missing, please log in")
    } else {
        error.into()
    }
}
