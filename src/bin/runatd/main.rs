mod args;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use runat::line_reader::LineReader;
use runat::parser::ParsingError;
use runat::types::protocol::{Command, Response};
use runat::types::serialisable::LineSerialisable;
use runat::util::bytes_to_human_str;
use runat::{
    Config, ConfigurationError, EligibilityIndex, MemoryIndex,
    ScheduleRequest, Scheduler, WorkQueue,
};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::{select, signal};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn, Level};

use crate::args::Args;

type Store = dyn EligibilityIndex;

/// State shared by every connection.
struct Shared {
    store: Arc<Store>,
    config: Config,
    scheduler: Scheduler<Store>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logging
    if args.debug {
        tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .init();
    } else {
        tracing_subscriber::fmt().json().init();
    }

    let shared = match setup(&args).await {
        Ok(shared) => Arc::new(shared),
        Err(error) => {
            error!(%error, "unusable configuration");
            return ExitCode::from(2);
        },
    };

    // Cancellation and termination channel.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(error) = signal::ctrl_c().await {
                warn!(%error, "something strange with ctrl-c handling!");
            };
            cancel.cancel();
        });
    }

    let (shutdown_hold, mut shutdown_wait) = mpsc::channel::<()>(1);

    let exit_code =
        if let Err(error) = begin(&args, shared, cancel, shutdown_hold).await {
            error!(%error, "encountered runtime error");
            ExitCode::FAILURE
        } else {
            ExitCode::SUCCESS
        };

    // Resolves once every connection task has dropped its hold.
    shutdown_wait.recv().await;

    exit_code
}

async fn setup(args: &Args) -> Result<Shared, ConfigurationError> {
    let config = args.queue_config()?;
    let store = open_store(args.redis_url.as_deref()).await?;
    let scheduler = Scheduler::new(store.clone(), &config)?;

    info!(queue = %config.queue_name, "serving queue");

    Ok(Shared {
        store,
        config,
        scheduler,
    })
}

#[cfg(feature = "redis")]
async fn open_store(
    redis_url: Option<&str>,
) -> Result<Arc<Store>, ConfigurationError> {
    Ok(match redis_url {
        Some(url) => Arc::new(runat::store::RedisIndex::connect(url).await?),
        None => Arc::new(MemoryIndex::new()),
    })
}

#[cfg(not(feature = "redis"))]
async fn open_store(
    redis_url: Option<&str>,
) -> Result<Arc<Store>, ConfigurationError> {
    match redis_url {
        Some(_) => Err(ConfigurationError::Store(
            "built without the redis feature".into(),
        )),
        None => Ok(Arc::new(MemoryIndex::new())),
    }
}

async fn begin(
    args: &Args,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    shutdown_hold: mpsc::Sender<()>,
) -> Result<()> {
    let listener = TcpListener::bind((args.listen, args.port)).await?;
    info!(addr = %listener.local_addr()?, "listening");

    // Accept incoming connections until an exit signal is sent, and handle each
    // connection as its own task.
    loop {
        let conn = match select! {
            accept = listener.accept() => accept,
            _ = cancel.cancelled() => break,
        } {
            Ok((conn, _)) => conn,
            Err(error) => {
                warn!(%error, "failed to accept connection");
                continue;
            },
        };

        tokio::spawn(begin_handle(
            shared.clone(),
            cancel.clone(),
            shutdown_hold.clone(),
            conn,
        ));
    }

    Ok(())
}

#[instrument(name = "handle", err, fields(peer = %conn.peer_addr()?), skip_all)]
async fn begin_handle(
    shared: Arc<Shared>,
    cancel: CancellationToken,
    _shutdown_hold: mpsc::Sender<()>,
    mut conn: TcpStream,
) -> Result<()> {
    debug!("accepted connection");

    conn.set_nodelay(true).context("setting NODELAY")?;

    let ret = handle_conn(&shared, cancel, &mut conn).await;

    conn.shutdown().await.context("during shutdown")?;

    debug!("closed connection");

    ret
}

async fn handle_conn(
    shared: &Shared,
    cancel: CancellationToken,
    conn: &mut TcpStream,
) -> Result<()> {
    // Split conn into read and write halves, where the read half uses our
    // LineReader.
    let (r, mut w) = conn.split();
    let mut r: LineReader<_> = r.into();

    // Keep taking lines and parsing and processing them.
    loop {
        let line = select!(
           x = r.read_line() => match x? {
                Some(x) => x,
                None => return Ok(()),
           },
           _ = cancel.cancelled() => return Ok(()),
        );

        trace!(line = bytes_to_human_str(&line), "processing command");

        let cmd: Result<Command, ParsingError> = (&line as &[u8]).try_into();

        let resp = match cmd {
            Ok(Command::Quit) => return Ok(()),
            Ok(Command::Watch) => {
                return watch(shared, &cancel, &mut r, &mut w).await;
            },
            Ok(Command::Schedule { key, eligible_at }) => {
                let request = ScheduleRequest {
                    key: Some(key),
                    eligible_at,
                };
                match shared.scheduler.schedule(request).await {
                    Ok(()) => Response::Scheduled,
                    Err(error) => Response::from(&error),
                }
            },
            Err(error) => {
                if !send(&mut w, &cancel, &error).await? {
                    return Ok(());
                }
                continue;
            },
        };

        if !send(&mut w, &cancel, &resp).await? {
            return Ok(());
        }
    }
}

/// Serves the connection as a consumer until it closes or the server shuts
/// down.
async fn watch<R, W>(
    shared: &Shared,
    cancel: &CancellationToken,
    r: &mut LineReader<R>,
    w: &mut W,
) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut queue = WorkQueue::new(shared.store.clone(), &shared.config)
        .context("creating consumer")?;

    let watching = Response::Watching {
        queue: queue.queue_name().to_owned(),
    };
    if !send(w, cancel, &watching).await? {
        return Ok(());
    }

    debug!("watching");

    let ret = loop {
        select! {
            key = queue.next() => match key {
                Some(key) => {
                    if !send(w, cancel, &Response::Due { key }).await? {
                        break Ok(());
                    }
                },
                None => break Ok(()),
            },
            line = r.read_line() => match line? {
                Some(line) if &line[..] == b"quit" => break Ok(()),
                Some(line) => {
                    trace!(
                        line = bytes_to_human_str(&line),
                        "ignoring input while watching"
                    );
                },
                None => break Ok(()),
            },
            _ = cancel.cancelled() => break Ok(()),
        }
    };

    // Keys claimed but not yet written are lost along with the connection.
    queue.stop();

    ret
}

/// Writes one response and flushes it. Returns false if the server began
/// shutting down first.
async fn send<W: AsyncWrite + Unpin>(
    w: &mut W,
    cancel: &CancellationToken,
    msg: &impl LineSerialisable,
) -> Result<bool> {
    let buf = msg.serialise_line();

    // Slightly convoluted, but ensures we write out the buffer properly
    // with cancel safety.
    select! {
        x = w.write_all(&buf) => x?,
        _ = cancel.cancelled() => return Ok(false),
    };

    // NB: flush() appears not to be implemented for TCPStreams, but this
    // should provide forward-compatibility for other transports.
    select! {
        x = w.flush() => x?,
        _ = cancel.cancelled() => return Ok(false),
    };

    Ok(true)
}
