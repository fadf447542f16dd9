//! Channel-backed host link standing in for the two CDC-ACM ports.

use crate::command::{Command, Response};
use crate::error::PMError;
use crate::hal::Transport;
use crate::report::ReportBatch;
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;

// Default timeout for host-side receives
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Build a connected link. The command receiver goes to [`crate::rig::Rig::run`].
pub fn channel_link(capacity: usize) -> (HostLink, ChannelTransport, mpsc::Receiver<Bytes>) {
    let (command_tx, command_rx) = mpsc::channel(capacity);
    let (response_tx, response_rx) = mpsc::channel(capacity);
    let (report_tx, report_rx) = mpsc::channel(capacity);

    let host = HostLink {
        command_tx,
        response_rx,
        report_rx,
        timeout: DEFAULT_TIMEOUT,
    };
    let transport = ChannelTransport { response_tx, report_tx };
    (host, transport, command_rx)
}

/// Device side: responses and reports leave through bounded channels.
pub struct ChannelTransport {
    response_tx: mpsc::Sender<Bytes>,
    report_tx: mpsc::Sender<Bytes>,
}

impl Transport for ChannelTransport {
    async fn send_response(&mut self, frame: &[u8]) -> Result<(), PMError> {
        self.response_tx
            .send(Bytes::copy_from_slice(frame))
            .await
            .map_err(|_| PMError::TransportClosed)
    }

    async fn send_report(&mut self, frame: &[u8]) -> Result<(), PMError> {
        self.report_tx
            .send(Bytes::copy_from_slice(frame))
            .await
            .map_err(|_| PMError::TransportClosed)
    }
}

/// Host side of the link
pub struct HostLink {
    command_tx: mpsc::Sender<Bytes>,
    response_rx: mpsc::Receiver<Bytes>,
    report_rx: mpsc::Receiver<Bytes>,
    timeout: Duration,
}

impl HostLink {
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Send a raw command frame
    pub async fn send_raw(&mut self, frame: Bytes) -> Result<(), PMError> {
        debug!(frame = %hex::encode(&frame), "host -> device");
        self.command_tx
            .send(frame)
            .await
            .map_err(|_| PMError::TransportClosed)
    }

    pub async fn send(&mut self, command: Command) -> Result<(), PMError> {
        self.send_raw(command.to_bytes()).await
    }

    /// Send a command and wait for its response
    pub async fn request(&mut self, command: Command) -> Result<Response, PMError> {
        self.send(command).await?;
        self.recv_response().await
    }

    pub async fn recv_response(&mut self) -> Result<Response, PMError> {
        let frame = timeout(self.timeout, self.response_rx.recv())
            .await
            .map_err(|_| PMError::Timeout)?
            .ok_or(PMError::TransportClosed)?;
        Response::try_from(frame.as_ref())
    }

    /// Raw report frame as received
    pub async fn recv_report_frame(&mut self) -> Result<Bytes, PMError> {
        timeout(self.timeout, self.report_rx.recv())
            .await
            .map_err(|_| PMError::Timeout)?
            .ok_or(PMError::TransportClosed)
    }

    pub async fn recv_report(&mut self) -> Result<ReportBatch, PMError> {
        let frame = self.recv_report_frame().await?;
        ReportBatch::from_bytes(&frame)
    }
}
