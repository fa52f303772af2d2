mod cli;

use std::future::Future;
use std::sync::Arc;

use clap::Parser;
use eyre::{eyre, WrapErr};
use serde::Serialize;

use ledger_rpc_core::{ChainClient, ClientConfig};

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let file_config = match &args.config {
        Some(path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .wrap_err_with(|| format!("read configuration file `{}`", path.display()))?,
        ),
        None => None,
    };
    let config = build_config(&args, file_config.as_deref())?;
    let endpoint = config.node.endpoint.clone();

    let client = Arc::new(ChainClient::connect(config).wrap_err("invalid client configuration")?);

    let outcome = tokio::select! {
        outcome = run(&client, &args.command) => outcome,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted; flushing queued requests");
            Ok(())
        }
    };

    if args.print_stats {
        print_json(&client.statistics())?;
    }
    client.shutdown().await;

    outcome.map_err(|err| {
        let message = format_rpc_error(&endpoint, &format!("{err:#}"));
        err.wrap_err(message)
    })
}

/// Merge the optional configuration file with command-line overrides.
fn build_config(args: &Cli, file_config: Option<&str>) -> eyre::Result<ClientConfig> {
    let mut config = match file_config {
        Some(raw) => ClientConfig::from_json_str(raw).wrap_err("parse configuration file")?,
        None => ClientConfig::default(),
    };

    if let Some(endpoint) = &args.endpoint {
        config.node.endpoint = endpoint.clone();
    }
    if let Some(user) = &args.rpc_user {
        config.node.rpc_user = user.clone();
    }
    if let Some(password) = &args.rpc_password {
        config.node.rpc_password = password.clone();
    }
    if let Some(max_retries) = args.max_retries {
        config.pool.max_retries = max_retries;
    }
    if args.requests_per_second.is_some() {
        config.pool.requests_per_second = args.requests_per_second;
    }
    if args.no_batching {
        config.batch.enabled = false;
    }

    config.validate().wrap_err("invalid client configuration")?;
    Ok(config)
}

async fn run(client: &Arc<ChainClient>, command: &Command) -> eyre::Result<()> {
    match command {
        Command::Status => {
            let status = client.get_status().await?;
            tracing::info!(
                chain = %status.chain_name,
                blocks = status.blocks,
                "connected to node"
            );
            print_json(&status)
        }
        Command::Health => {
            if client.is_healthy().await {
                println!("healthy");
                Ok(())
            } else {
                Err(eyre!("node did not answer a status query"))
            }
        }
        Command::Submit { raw_tx } => {
            let txids = fan_out(client, raw_tx, |client, raw| async move {
                client.submit_transaction(&raw).await
            })
            .await?;
            print_json(&txids)
        }
        Command::TxStatus { txids } => {
            let statuses = fan_out(client, txids, |client, txid| async move {
                client.get_transaction_status(&txid).await
            })
            .await?;
            print_json(&statuses)
        }
        Command::Block { id } => print_json(&client.get_block(id).await?),
        Command::Balance { addresses } => {
            let states = fan_out(client, addresses, |client, address| async move {
                client.get_account_state(&address).await
            })
            .await?;
            print_json(&states)
        }
        Command::Stats => {
            let healthy = client.is_healthy().await;
            tracing::info!(healthy, "probed node");
            print_json(&client.statistics())
        }
    }
}

/// Run one operation per operand concurrently so the batch layer sees
/// them together. Results keep operand order.
async fn fan_out<T, F, Fut>(
    client: &Arc<ChainClient>,
    operands: &[String],
    operation: F,
) -> eyre::Result<Vec<T>>
where
    T: Send + 'static,
    F: Fn(Arc<ChainClient>, String) -> Fut,
    Fut: Future<Output = Result<T, ledger_rpc_core::CoreError>> + Send + 'static,
{
    let handles: Vec<_> = operands
        .iter()
        .map(|operand| tokio::spawn(operation(Arc::clone(client), operand.clone())))
        .collect();

    let mut results = Vec::with_capacity(handles.len());
    for (operand, handle) in operands.iter().zip(handles) {
        let result = handle
            .await
            .wrap_err("request task panicked")?
            .wrap_err_with(|| format!("request for `{operand}` failed"))?;
        results.push(result);
    }
    Ok(results)
}

fn print_json<T: Serialize>(value: &T) -> eyre::Result<()> {
    let rendered = serde_json::to_string_pretty(value).wrap_err("render JSON output")?;
    println!("{rendered}");
    Ok(())
}

fn format_rpc_error(endpoint: &str, source_error: &str) -> String {
    let mut lines = vec![format!("request to `{endpoint}` failed")];

    if source_error.contains("dns error") || source_error.contains("Could not resolve host") {
        lines.push(
            "hint: hostname resolution failed; verify the endpoint hostname and your DNS/network"
                .into(),
        );
    } else if source_error.contains("tls")
        || source_error.contains("certificate")
        || source_error.contains("SSL")
    {
        lines.push(
            "hint: TLS handshake failed; verify certificate trust and that the endpoint uses HTTPS"
                .into(),
        );
    } else if source_error.contains("HTTP status 401") || source_error.contains("HTTP status 403")
    {
        lines.push("hint: authentication failed; verify --rpc-user/--rpc-password".into());
    } else if source_error.contains("HTTP status 404") {
        lines.push("hint: endpoint path is invalid; verify the full RPC URL".into());
    } else if source_error.contains("error sending request for url") {
        lines.push(
            "hint: request could not be sent; verify the node is running and the RPC port is reachable"
                .into(),
        );
    }

    lines.join("\n")
}
