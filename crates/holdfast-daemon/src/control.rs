//! Control socket: one JSON request per line in, one JSON response per line out.

use crate::toggle::ToggleGate;
use anyhow::Result;
use holdfast_core::control::{dispatch, ControlRequest, ControlResponse};
use holdfast_core::{ControllerHandle, ToggleEvent};
use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Accept control connections until the listener fails.
pub(crate) async fn serve(
    listener: TcpListener,
    handle: ControllerHandle,
    gate: ToggleGate,
) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!("control connection from {peer}");
        let handle = handle.clone();
        let gate = gate.clone();
        tokio::spawn(async move {
            if let Err(err) = session(stream, &handle, &gate).await {
                warn!("control session with {peer} failed: {err:#}");
            }
        });
    }
}

async fn session(stream: TcpStream, handle: &ControllerHandle, gate: &ToggleGate) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match ControlRequest::parse(&line) {
            Ok(ControlRequest::Toggle) => gate.toggle(handle, ToggleEvent::press()).await,
            Ok(request) => dispatch(handle, request).await,
            Err(err) => ControlResponse::Error {
                message: format!("malformed request: {err}"),
            },
        };
        writer.write_all(response.to_line()?.as_bytes()).await?;
    }
    Ok(())
}
