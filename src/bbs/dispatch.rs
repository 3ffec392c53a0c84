//! Per-channel request dispatcher.
//!
//! SSH channel requests (RFC 4254 §6) arrive on the connection handler. Each is
//! wrapped in a [`ChannelRequest`] carrying its wire payload and pushed onto a
//! queue owned by the channel; [`run_dispatcher`] is the consumer loop that
//! applies terminal changes and answers the ones that want a reply.
//!
//! | request         | effect                                  | reply |
//! |-----------------|-----------------------------------------|-------|
//! | `pty-req`       | clear prompt, apply geometry            | true  |
//! | `shell`         | none                                    | true  |
//! | `window-change` | apply geometry                          | none  |
//! | anything else   | none                                    | false |
//!
//! The loop ends when every [`RequestHandle`] is dropped, which happens when
//! the channel closes.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::{debug, trace};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::terminal::{Geometry, TerminalControl};

pub const PTY_REQ: &str = "pty-req";
pub const SHELL: &str = "shell";
pub const WINDOW_CHANGE: &str = "window-change";
pub const EXEC: &str = "exec";
pub const SUBSYSTEM: &str = "subsystem";
pub const ENV: &str = "env";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    TerminalSetup,
    ShellStart,
    Resize,
    Other,
}

impl RequestKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            PTY_REQ => RequestKind::TerminalSetup,
            SHELL => RequestKind::ShellStart,
            WINDOW_CHANGE => RequestKind::Resize,
            _ => RequestKind::Other,
        }
    }
}

/// One in-band request on the interactive channel.
#[derive(Debug)]
pub struct ChannelRequest {
    pub name: String,
    pub payload: Bytes,
    /// Present when the client asked for a reply.
    pub reply: Option<oneshot::Sender<bool>>,
}

impl ChannelRequest {
    pub fn kind(&self) -> RequestKind {
        RequestKind::from_name(&self.name)
    }

    fn answer(self, ok: bool) {
        if let Some(reply) = self.reply {
            let _ = reply.send(ok);
        }
    }
}

/// Producer side of a channel's request queue.
#[derive(Clone, Debug)]
pub struct RequestHandle {
    tx: mpsc::UnboundedSender<ChannelRequest>,
}

impl RequestHandle {
    /// Queue a request and wait for the dispatcher's answer. A dispatcher that
    /// has already stopped counts as a refusal.
    pub async fn request(&self, name: &str, payload: Bytes) -> bool {
        let (tx, rx) = oneshot::channel();
        let req = ChannelRequest { name: name.to_string(), payload, reply: Some(tx) };
        if self.tx.send(req).is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Queue a request that expects no reply.
    pub fn notify(&self, name: &str, payload: Bytes) {
        let _ = self.tx.send(ChannelRequest { name: name.to_string(), payload, reply: None });
    }
}

/// Spawn the dispatcher for one channel.
pub fn start_dispatcher(control: TerminalControl) -> (RequestHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_dispatcher(rx, control));
    (RequestHandle { tx }, task)
}

pub async fn run_dispatcher(mut rx: mpsc::UnboundedReceiver<ChannelRequest>, control: TerminalControl) {
    while let Some(req) = rx.recv().await {
        trace!("channel request {} ({} bytes)", req.name, req.payload.len());
        match req.kind() {
            RequestKind::TerminalSetup => {
                let geometry = parse_pty_geometry(&req.payload);
                control.set_prompt("");
                control.set_size(geometry);
                debug!("pty {}x{}", geometry.width, geometry.height);
                req.answer(true);
            }
            RequestKind::ShellStart => req.answer(true),
            RequestKind::Resize => {
                let geometry = Geometry::parse(&req.payload);
                control.set_size(geometry);
                debug!("window resized to {}x{}", geometry.width, geometry.height);
            }
            RequestKind::Other => {
                debug!("refusing channel request {}", req.name);
                req.answer(false);
            }
        }
    }
    debug!("request dispatcher finished");
}

/// Geometry of a pty-req payload: the bytes after the length-prefixed TERM string.
pub fn parse_pty_geometry(payload: &[u8]) -> Geometry {
    let mut buf = payload;
    if buf.remaining() < 4 {
        return Geometry::default();
    }
    let term_len = buf.get_u32() as usize;
    if term_len > buf.remaining() {
        return Geometry::default();
    }
    Geometry::parse(&buf[term_len..])
}

fn put_string(buf: &mut BytesMut, s: &[u8]) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s);
}

/// `string term, uint32 cols, uint32 rows, uint32 px_w, uint32 px_h, string modes`.
/// Modes are re-encoded as just `TTY_OP_END`.
pub fn encode_pty_request(term: &str, cols: u32, rows: u32, px_width: u32, px_height: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(term.len() + 25);
    put_string(&mut buf, term.as_bytes());
    buf.put_u32(cols);
    buf.put_u32(rows);
    buf.put_u32(px_width);
    buf.put_u32(px_height);
    put_string(&mut buf, &[0]);
    buf.freeze()
}

pub fn encode_window_change(cols: u32, rows: u32, px_width: u32, px_height: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(16);
    buf.put_u32(cols);
    buf.put_u32(rows);
    buf.put_u32(px_width);
    buf.put_u32(px_height);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pty_geometry_after_term_string() {
        let payload = encode_pty_request("xterm-256color", 132, 43, 0, 0);
        assert_eq!(parse_pty_geometry(&payload), Geometry { width: 132, height: 43 });
    }

    #[test]
    fn pty_with_overrunning_term_defaults() {
        let mut buf = BytesMut::new();
        buf.put_u32(200);
        buf.put_slice(b"xterm");
        assert_eq!(parse_pty_geometry(&buf), Geometry::default());
        assert_eq!(parse_pty_geometry(&[0, 0]), Geometry::default());
    }

    #[test]
    fn pty_with_truncated_dimensions_defaults() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, b"vt100");
        buf.put_u32(100);
        assert_eq!(parse_pty_geometry(&buf), Geometry::default());
    }

    #[test]
    fn request_kinds() {
        assert_eq!(RequestKind::from_name("pty-req"), RequestKind::TerminalSetup);
        assert_eq!(RequestKind::from_name("shell"), RequestKind::ShellStart);
        assert_eq!(RequestKind::from_name("window-change"), RequestKind::Resize);
        assert_eq!(RequestKind::from_name("x11-req"), RequestKind::Other);
    }

    #[tokio::test]
    async fn dispatcher_answers_and_applies_geometry() {
        let control = TerminalControl::new();
        let (handle, task) = start_dispatcher(control.clone());

        assert!(handle.request(PTY_REQ, encode_pty_request("xterm", 100, 30, 0, 0)).await);
        assert_eq!(control.geometry(), Geometry { width: 100, height: 30 });
        assert_eq!(control.prompt(), "");

        assert!(handle.request(SHELL, Bytes::new()).await);
        assert!(!handle.request(EXEC, Bytes::new()).await);
        assert!(!handle.request(SUBSYSTEM, Bytes::new()).await);
        assert!(!handle.request(ENV, Bytes::new()).await);

        handle.notify(WINDOW_CHANGE, encode_window_change(120, 40, 0, 0));
        handle.notify(WINDOW_CHANGE, Bytes::from_static(&[0, 0, 0]));
        drop(handle);
        task.await.unwrap();
        assert_eq!(control.geometry(), Geometry::default());
    }

    #[tokio::test]
    async fn requests_after_shutdown_are_refused() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let handle = RequestHandle { tx };
        assert!(!handle.request(SHELL, Bytes::new()).await);
    }
}
