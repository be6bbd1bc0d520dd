//! Subcommands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::Subcommand;
use ire_core::{CallError, EventHandler, MethodHandler, Peer};
use ire_transport::LineTransport;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept connections and serve the demo methods on each.
    Serve {
        /// Address to bind.
        #[arg(long, default_value = "127.0.0.1:7878")]
        listen: String,
    },
    /// Invoke a remote method and print its result as JSON.
    Call {
        /// Address of the remote peer.
        #[arg(long)]
        connect: String,
        method: String,
        /// Arguments, each parsed as JSON (plain words become strings).
        args: Vec<String>,
        /// Give up waiting after this many milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Fire an event at the remote peer.
    Emit {
        #[arg(long)]
        connect: String,
        event: String,
        /// Payload, parsed as JSON. Defaults to `null`.
        data: Option<String>,
    },
    /// Print the payload of every matching event the remote peer emits.
    Listen {
        #[arg(long)]
        connect: String,
        event: String,
        /// Stop after the first event.
        #[arg(long)]
        once: bool,
    },
}

/// What a finished command has to report.
#[derive(Debug, PartialEq)]
pub enum CommandResult {
    Done,
    Value(Value),
    Received(usize),
}

impl Command {
    pub async fn execute(self) -> Result<CommandResult> {
        match self {
            Command::Serve { listen } => serve(&listen).await,
            Command::Call {
                connect,
                method,
                args,
                timeout_ms,
            } => {
                let args = args.iter().map(|arg| parse_arg(arg)).collect();
                call(&connect, &method, args, timeout_ms.map(Duration::from_millis)).await
            }
            Command::Emit {
                connect,
                event,
                data,
            } => {
                let data = data.as_deref().map(parse_arg).unwrap_or(Value::Null);
                emit(&connect, &event, data).await
            }
            Command::Listen {
                connect,
                event,
                once,
            } => listen(&connect, &event, once).await,
        }
    }
}

/// JSON if it parses, otherwise the raw text as a JSON string.
pub fn parse_arg(arg: &str) -> Value {
    serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.to_string()))
}

async fn serve(addr: &str) -> Result<CommandResult> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %listener.local_addr()?, "serving");

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    tokio::spawn(async move {
                        let transport = Arc::new(LineTransport::from_tcp(stream));
                        match demo_peer(transport.clone()) {
                            Ok(peer) => {
                                info!(%remote, "peer connected");
                                transport.closed().await;
                                peer.unhook();
                                info!(%remote, "peer disconnected");
                            }
                            Err(e) => error!(%remote, error = %e, "failed to set up peer"),
                        }
                    });
                }
                Err(e) => error!(error = %e, "failed to accept connection"),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("received ctrl-c, shutting down");
                break;
            }
        }
    }
    Ok(CommandResult::Done)
}

/// A peer with the demo methods and the `ping` listener installed.
pub fn demo_peer(transport: Arc<dyn ire_core::Transport>) -> Result<Peer> {
    let peer = Peer::with_transport(transport)?;

    peer.register("echo", MethodHandler::sync(|args| Ok(Value::Array(args))))?
        .register("add", MethodHandler::sync(add))?
        .register(
            "sleep",
            MethodHandler::new(|args| async move {
                let ms = args.first().and_then(Value::as_u64).unwrap_or_default();
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(Value::from(ms))
            }),
        )?
        .register(
            "fail",
            MethodHandler::sync(|args| {
                let message = match args.first() {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => "failed".to_string(),
                };
                Err(anyhow!(message))
            }),
        )?;

    let ponger = peer.downgrade();
    peer.on(
        "ping",
        EventHandler::new(move |data| {
            let Some(peer) = ponger.upgrade() else {
                return;
            };
            if let Err(e) = peer.emit("pong", data.clone()) {
                debug!(error = %e, "could not answer ping");
            }
        }),
    )?;
    Ok(peer)
}

fn add(args: Vec<Value>) -> Result<Value> {
    if args.iter().all(|v| v.is_i64()) {
        let sum = args
            .iter()
            .filter_map(Value::as_i64)
            .try_fold(0i64, i64::checked_add)
            .ok_or_else(|| anyhow!("add overflowed"))?;
        return Ok(Value::from(sum));
    }
    let mut sum = 0.0;
    for arg in &args {
        match arg.as_f64() {
            Some(n) => sum += n,
            None => bail!("add expects numbers, got {arg}"),
        }
    }
    Ok(Value::from(sum))
}

async fn call(
    addr: &str,
    method: &str,
    args: Vec<Value>,
    timeout: Option<Duration>,
) -> Result<CommandResult> {
    let transport = Arc::new(LineTransport::connect(addr).await?);
    let peer = Peer::with_transport(transport.clone())?;

    let pending = peer.invoke(method, args)?;
    debug!(method, id = pending.id(), "waiting for response");
    let outcome = match timeout {
        Some(limit) => tokio::time::timeout(limit, pending)
            .await
            .with_context(|| format!("no response to {method:?} within {limit:?}"))?,
        None => pending.await,
    };

    peer.unhook();
    transport.shutdown().await;
    match outcome {
        Ok(value) => Ok(CommandResult::Value(value)),
        Err(CallError::Rejected(reason)) => bail!("{method:?} failed: {reason}"),
        Err(CallError::TransportClosed) => bail!("connection closed before {method:?} answered"),
    }
}

async fn emit(addr: &str, event: &str, data: Value) -> Result<CommandResult> {
    let transport = Arc::new(LineTransport::connect(addr).await?);
    let peer = Peer::with_transport(transport.clone())?;
    peer.emit(event, data)?;
    peer.unhook();
    transport.shutdown().await;
    Ok(CommandResult::Done)
}

async fn listen(addr: &str, event: &str, once: bool) -> Result<CommandResult> {
    let transport = Arc::new(LineTransport::connect(addr).await?);
    let peer = Peer::with_transport(transport.clone())?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    peer.add_listener(
        event,
        EventHandler::new(move |data| {
            let _ = tx.send(data.clone());
        }),
        once,
    )?;

    let mut received = 0;
    loop {
        tokio::select! {
            Some(data) = rx.recv() => {
                println!("{data}");
                received += 1;
                if once {
                    break;
                }
            }
            _ = transport.closed() => {
                info!("connection closed");
                break;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    peer.unhook();
    transport.shutdown().await;
    Ok(CommandResult::Received(received))
}
