//! Thin transport wrapper around ewebsock (native) / quad-net (WASM) that
//! moves [`Frame`] values instead of ad-hoc byte tags. Message framing is
//! handed off to `protocol::codec` rather than parsed by hand here.

use protocol::{codec, Frame};

#[cfg(not(target_arch = "wasm32"))]
use ewebsock::WsEvent::{Closed, Error, Message, Opened};
#[cfg(not(target_arch = "wasm32"))]
use ewebsock::{WsMessage, WsReceiver, WsSender};

#[cfg(target_arch = "wasm32")]
unsafe extern "C" {
    fn quad_ws_connect(url_ptr: *const u8, url_len: usize);
    fn quad_ws_connected() -> i32;
    fn quad_ws_send(data_ptr: *const u8, data_len: usize);
    fn quad_ws_next_message_len() -> usize;
    fn quad_ws_recv(buffer_ptr: *mut u8, buffer_len: usize) -> usize;
}

/// One websocket connection to the relay, carrying wire [`Frame`]s.
pub struct Socket {
    #[cfg(not(target_arch = "wasm32"))]
    sender: WsSender,
    #[cfg(not(target_arch = "wasm32"))]
    receiver: WsReceiver,
}

impl Socket {
    #[cfg(not(target_arch = "wasm32"))]
    pub fn connect(url: &str) -> Result<Self, String> {
        let (sender, receiver) = ewebsock::connect(url, ewebsock::Options::default())
            .map_err(|_| "could not reach websocket endpoint".to_string())?;
        Ok(Socket { sender, receiver })
    }

    #[cfg(target_arch = "wasm32")]
    pub fn connect(url: &str) -> Result<Self, String> {
        unsafe {
            quad_ws_connect(url.as_ptr(), url.len());
        }
        Ok(Socket {})
    }

    pub fn send(&mut self, frame: &Frame) {
        let bytes = codec::encode(frame);
        self.send_binary(&bytes);
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn send_binary(&mut self, bytes: &[u8]) {
        self.sender.send(WsMessage::Binary(bytes.to_vec()));
    }

    #[cfg(target_arch = "wasm32")]
    fn send_binary(&mut self, bytes: &[u8]) {
        unsafe {
            quad_ws_send(bytes.as_ptr(), bytes.len());
        }
    }

    /// Drains every frame currently buffered by the transport. Frames that
    /// fail to decode are dropped silently — a malformed frame from a
    /// well-behaved relay is not something the caller can act on.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn poll(&mut self) -> Result<Vec<Frame>, String> {
        let mut out = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Some(Message(WsMessage::Binary(bytes))) => {
                    if let Ok(frame) = codec::decode(&bytes) {
                        out.push(frame);
                    }
                }
                Some(Message(_)) => continue,
                Some(Opened) => continue,
                Some(Closed) => return Err("connection closed by peer".to_string()),
                Some(Error(reason)) => return Err(reason),
                None => break,
            }
        }
        Ok(out)
    }

    #[cfg(target_arch = "wasm32")]
    pub fn poll(&mut self) -> Result<Vec<Frame>, String> {
        let mut out = Vec::new();
        unsafe {
            loop {
                let len = quad_ws_next_message_len();
                if len == 0 {
                    break;
                }
                let mut buffer = vec![0u8; len];
                quad_ws_recv(buffer.as_mut_ptr(), buffer.len());
                if let Ok(frame) = codec::decode(&buffer) {
                    out.push(frame);
                }
            }
            if quad_ws_connected() == 0 {
                return Err("connection lost".to_string());
            }
        }
        Ok(out)
    }
}
