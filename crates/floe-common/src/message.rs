use std::time::Duration;

use bytes::{Buf, BufMut};

use crate::addr::ServiceAddr;
use crate::error::{Error, ErrorCode, Result};

/// Wire frame carrying either a request or a response.
///
/// Body layout (the transport adds a `u32` big-endian length prefix):
///
/// ```text
/// trace            u64
/// session          i32   (0 = post, no response expected)
/// src              u32   (originator service addr; 0 in error responses)
/// dst              u32   (target service addr on the destination node)
/// func_name length u16   (0 on responses)
/// func_name        [u8]  (UTF-8)
/// payload length   u32
/// payload          [u8]  (codec output)
/// err length       u32   (0 on success)
/// err              [u8]  (UTF-8, leading "[CODE]" tag)
/// ```
///
/// `timeout` is a local hint derived from the caller deadline; it does not
/// travel on the wire.
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub trace: u64,
    pub session: i32,
    pub src: ServiceAddr,
    pub dst: ServiceAddr,
    pub func_name: String,
    pub payload: Vec<u8>,
    pub err: Option<String>,
    pub timeout: Option<Duration>,
}

impl Message {
    pub fn request(
        src: ServiceAddr,
        dst: ServiceAddr,
        func_name: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Message {
            src,
            dst,
            func_name: func_name.into(),
            payload,
            ..Default::default()
        }
    }

    /// A response is a frame with no function name.
    pub fn is_response(&self) -> bool {
        self.func_name.is_empty()
    }

    /// The error carried by a failed response, reconstructed with its stable
    /// code.
    pub fn error(&self) -> Error {
        match &self.err {
            Some(s) => Error::from_wire(s),
            None => Error::new(ErrorCode::Unknown, "response carried no error"),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.func_name.len() > u16::MAX as usize {
            return Err(Error::with_op(
                ErrorCode::InvalidArgument,
                "message.encode",
                format!("function name too long: {} bytes", self.func_name.len()),
            ));
        }

        let err = self.err.as_deref().unwrap_or("");
        let mut buf = Vec::with_capacity(26 + self.func_name.len() + self.payload.len() + err.len());
        buf.put_u64(self.trace);
        buf.put_i32(self.session);
        buf.put_u32(self.src.raw());
        buf.put_u32(self.dst.raw());
        buf.put_u16(self.func_name.len() as u16);
        buf.put_slice(self.func_name.as_bytes());
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
        buf.put_u32(err.len() as u32);
        buf.put_slice(err.as_bytes());
        Ok(buf)
    }

    pub fn decode(body: &[u8]) -> Result<Message> {
        let mut buf = body;

        if buf.remaining() < 22 {
            return Err(truncated("header"));
        }
        let trace = buf.get_u64();
        let session = buf.get_i32();
        if session < 0 {
            return Err(Error::with_op(
                ErrorCode::InvalidArgument,
                "message.decode",
                format!("negative session id {session}"),
            ));
        }
        let src = ServiceAddr::from_raw(buf.get_u32());
        let dst = ServiceAddr::from_raw(buf.get_u32());

        let func_len = buf.get_u16() as usize;
        if buf.remaining() < func_len {
            return Err(truncated("function name"));
        }
        let func_name = std::str::from_utf8(&buf[..func_len])
            .map_err(|e| Error::wrap(ErrorCode::InvalidArgument, "message.decode", e))?
            .to_owned();
        buf.advance(func_len);

        if buf.remaining() < 4 {
            return Err(truncated("payload length"));
        }
        let payload_len = buf.get_u32() as usize;
        if buf.remaining() < payload_len {
            return Err(truncated("payload"));
        }
        let payload = buf[..payload_len].to_vec();
        buf.advance(payload_len);

        if buf.remaining() < 4 {
            return Err(truncated("error length"));
        }
        let err_len = buf.get_u32() as usize;
        if buf.remaining() < err_len {
            return Err(truncated("error"));
        }
        let err = if err_len == 0 {
            None
        } else {
            Some(
                std::str::from_utf8(&buf[..err_len])
                    .map_err(|e| Error::wrap(ErrorCode::InvalidArgument, "message.decode", e))?
                    .to_owned(),
            )
        };

        Ok(Message {
            trace,
            session,
            src,
            dst,
            func_name,
            payload,
            err,
            timeout: None,
        })
    }

    /// Releases payload references once the message has been consumed.
    pub fn clear(&mut self) {
        self.func_name.clear();
        self.payload = Vec::new();
        self.err = None;
    }
}

fn truncated(what: &str) -> Error {
    Error::with_op(
        ErrorCode::InvalidArgument,
        "message.decode",
        format!("truncated frame: missing {what}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trip() {
        let mut m = Message::request(
            ServiceAddr::new(1, 1),
            ServiceAddr::new(2, 1),
            "Hello",
            b"[\"hi\"]".to_vec(),
        );
        m.trace = 0xDEAD_BEEF;
        m.session = 7;

        let decoded = Message::decode(&m.encode().unwrap()).unwrap();
        assert_eq!(decoded.trace, 0xDEAD_BEEF);
        assert_eq!(decoded.session, 7);
        assert_eq!(decoded.src, ServiceAddr::new(1, 1));
        assert_eq!(decoded.dst, ServiceAddr::new(2, 1));
        assert_eq!(decoded.func_name, "Hello");
        assert_eq!(decoded.payload, b"[\"hi\"]");
        assert!(decoded.err.is_none());
        assert!(!decoded.is_response());
    }

    #[test]
    fn error_response_round_trip() {
        let m = Message {
            session: 9,
            dst: ServiceAddr::new(1, 1),
            err: Some("[TIMEOUT] rpc.call: deadline exceeded".into()),
            ..Default::default()
        };

        let decoded = Message::decode(&m.encode().unwrap()).unwrap();
        assert!(decoded.is_response());
        assert_eq!(decoded.error().code(), ErrorCode::Timeout);
        assert_eq!(decoded.src, ServiceAddr::NONE);
    }

    #[test]
    fn negative_session_rejected() {
        let mut m = Message::request(
            ServiceAddr::new(1, 1),
            ServiceAddr::new(2, 1),
            "Hello",
            Vec::new(),
        );
        m.session = 1;
        let mut body = m.encode().unwrap();
        // Overwrite the session field (bytes 8..12) with -1.
        body[8..12].copy_from_slice(&(-1i32).to_be_bytes());

        let err = Message::decode(&body).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn truncated_frames_rejected() {
        let m = Message::request(
            ServiceAddr::new(1, 1),
            ServiceAddr::new(2, 1),
            "Hello",
            b"payload".to_vec(),
        );
        let body = m.encode().unwrap();

        for cut in [0, 10, 21, body.len() - 1] {
            let err = Message::decode(&body[..cut]).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidArgument, "cut at {cut}");
        }
    }
}
