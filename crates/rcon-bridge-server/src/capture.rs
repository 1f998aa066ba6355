//! Run the game server as a child process and forward its console output

use crate::sink::LogSink;
use rcon_bridge_core::{BridgeError, Result};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
enum Echo {
    Stdout,
    Stderr,
    Off,
}

/// Spawn `program`, tee its stdout/stderr to ours and to `sink`
///
/// Stdin is inherited so the local operator can still type into the game
/// console. Returns the child's exit status once both pipes are drained.
pub async fn capture_child_output<S>(
    program: &str,
    args: &[String],
    sink: S,
    echo: bool,
) -> Result<ExitStatus>
where
    S: LogSink + Clone + 'static,
{
    info!("Starting {} {:?}", program, args);
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| BridgeError::Transport(format!("Failed to spawn {}: {}", program, e)))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| BridgeError::Transport("child stdout not captured".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| BridgeError::Transport("child stderr not captured".into()))?;

    let (out_echo, err_echo) = if echo {
        (Echo::Stdout, Echo::Stderr)
    } else {
        (Echo::Off, Echo::Off)
    };
    let out_task = tokio::spawn(pump(stdout, sink.clone(), out_echo));
    let err_task = tokio::spawn(pump(stderr, sink, err_echo));

    let status = child.wait().await?;
    let _ = out_task.await;
    let _ = err_task.await;

    info!("{} exited with {}", program, status);
    Ok(status)
}

async fn pump<R, S>(reader: R, sink: S, echo: Echo)
where
    R: AsyncRead + Unpin,
    S: LogSink,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                match echo {
                    Echo::Stdout => println!("{}", line),
                    Echo::Stderr => eprintln!("{}", line),
                    Echo::Off => {}
                }
                sink.forward_line(&line);
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Stopped reading child output: {}", e);
                break;
            }
        }
    }
}
