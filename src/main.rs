use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use url::Url;

use ocpi_gateway::api::admin::PartyView;
use ocpi_gateway::ocpi::{OcpiResponse, VersionId};
use ocpi_gateway::parties::{PartyDraft, PartyIdentity, RemoteParty};
use ocpi_gateway::registration::RegisterOptions;
use ocpi_gateway::security::AccessToken;
use ocpi_gateway::{Config, Daemon};

/// OCPI gateway - credentials exchange, trust and command correlation
#[derive(Parser)]
#[command(name = "ocpi", version, about)]
struct Cli {
    /// Port to listen on (overrides config)
    #[arg(long, env = "OCPI_PORT")]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway (default)
    Serve,
    /// List known parties
    Parties,
    /// Add or update a party before registering with it
    AddParty {
        /// Identity in `CC*PID*ROLE` form
        identity: String,
        /// The party's versions endpoint
        #[arg(long)]
        versions_url: Option<Url>,
        /// Token the party gave us to register with
        #[arg(long)]
        remote_token: Option<String>,
        /// Token we hand the party; generated when omitted
        #[arg(long)]
        local_token: Option<String>,
        /// Accept registrations that lower the selected version
        #[arg(long)]
        allow_downgrades: bool,
    },
    /// Run the credentials handshake with a party
    Register {
        identity: String,
        /// Register with exactly this version
        #[arg(long)]
        version: Option<String>,
    },
    /// Tear down the registration with a party
    Unregister { identity: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,ocpi_gateway=info",
        1 => "info,ocpi_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(port) = cli.port {
        config.api_server.port = port;
    }
    tracing::debug!(?config, "loaded configuration");

    let allow_downgrades_default = config.allow_downgrades;
    let daemon = Daemon::new(config)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => daemon.run().await?,
        Command::Parties => {
            let parties: Vec<PartyView> = daemon
                .registry()
                .list()?
                .into_iter()
                .map(PartyView::from)
                .collect();
            println!("{}", serde_json::to_string_pretty(&parties)?);
        }
        Command::AddParty {
            identity,
            versions_url,
            remote_token,
            local_token,
            allow_downgrades,
        } => {
            let identity: PartyIdentity = identity.parse()?;
            let local_token = local_token.map_or_else(AccessToken::generate, AccessToken::new);
            let mut draft = PartyDraft::new(identity)
                .local_token(local_token.clone())
                .allow_downgrades(allow_downgrades || allow_downgrades_default);
            if let Some(url) = versions_url {
                draft = draft.versions_url(url);
            }
            if let Some(token) = remote_token {
                draft = draft.remote_token(AccessToken::new(token));
            }

            let party = daemon.registry().add_or_update(draft)?;
            println!("{}", serde_json::to_string_pretty(&PartyView::from(party))?);
            println!("token for the party: {}", local_token.expose());
        }
        Command::Register { identity, version } => {
            let identity: PartyIdentity = identity.parse()?;
            let options = match version {
                Some(v) => RegisterOptions::version(VersionId::parse(&v)?),
                None => RegisterOptions::default(),
            };
            let server = daemon.spawn_api();
            let response = daemon.registration().register(&identity, options).await;
            server.abort();
            report(response)?;
        }
        Command::Unregister { identity } => {
            let identity: PartyIdentity = identity.parse()?;
            let response = daemon.registration().unregister(&identity).await;
            report(response)?;
        }
    }

    Ok(())
}

fn report(response: OcpiResponse<RemoteParty>) -> anyhow::Result<()> {
    let success = response.is_success();
    let message = response.status_message.clone().unwrap_or_default();
    let code = response.status_code;
    println!(
        "{}",
        serde_json::to_string_pretty(&response.map(PartyView::from))?
    );
    if !success {
        anyhow::bail!("handshake failed ({code}): {message}");
    }
    Ok(())
}
