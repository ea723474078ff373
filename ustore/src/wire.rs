//! Wire protocol (§6.3): length-prefixed, `borsh`-encoded request and
//! response envelopes.
//!
//! `borsh` gives us the field encoding; the length prefix that frames one
//! envelope on a byte stream is hand-rolled (`read_frame`/`write_frame`
//! below) rather than built on `tokio_util::codec`, which the teacher's
//! network crate uses but which is not part of this workspace's
//! dependency set.

use std::io;

use borsh::{BorshDeserialize, BorshSerialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use ustore_primitives::ErrorCode;

/// The sixteen request types §6.3 requires the core to implement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize, strum::IntoStaticStr)]
pub enum RequestType {
    Put,
    Get,
    Merge,
    ListKeys,
    ListBranches,
    Exists,
    GetBranchHead,
    IsBranchHead,
    GetLatestVersion,
    IsLatestVersion,
    Branch,
    Rename,
    Delete,
    PutUnkeyed,
    GetChunk,
    PutChunk,
    ExistsChunk,
    GetInfo,
}

/// The value payload carried by `Put`/`Merge` of structured (non-scalar)
/// objects: a splice description against `base`, per §6.3.
#[derive(Clone, Debug, Default, BorshSerialize, BorshDeserialize)]
pub struct ValuePayload {
    pub object_type: u8,
    pub base: [u8; 20],
    pub pos: u64,
    pub dels: u64,
    pub values: Vec<Vec<u8>>,
    pub keys: Vec<Vec<u8>>,
    pub ctx: Vec<u8>,
}

/// The request envelope (§6.3).
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub struct Request {
    pub request_type: RequestType,
    pub source: u32,
    pub key: Option<Vec<u8>>,
    pub branch: Option<Vec<u8>>,
    pub version: Option<[u8; 20]>,
    pub ref_branch: Option<Vec<u8>>,
    pub ref_version: Option<[u8; 20]>,
    pub value: Option<ValuePayload>,
}

/// The response envelope (§6.3). `stat` is `ErrorCode` erased to its wire
/// ordinal (`ErrorCode::Ok` on success).
#[derive(Clone, Debug, BorshSerialize, BorshDeserialize)]
pub struct Response {
    pub stat: u32,
    pub value: Option<Vec<u8>>,
    pub bvalue: bool,
    pub lvalue: Vec<Vec<u8>>,
}

impl Response {
    pub fn ok(value: Option<Vec<u8>>, bvalue: bool, lvalue: Vec<Vec<u8>>) -> Self {
        Response { stat: error_code_ordinal(ErrorCode::Ok), value, bvalue, lvalue }
    }

    pub fn err(code: ErrorCode) -> Self {
        Response { stat: error_code_ordinal(code), value: None, bvalue: false, lvalue: Vec::new() }
    }

    pub fn is_ok(&self) -> bool {
        self.stat == error_code_ordinal(ErrorCode::Ok)
    }
}

/// `ErrorCode` has no explicit discriminants (it mirrors the wire `stat`
/// code by variant order, per its own doc comment), so its wire ordinal
/// is its `strum::EnumIter` position.
fn error_code_ordinal(code: ErrorCode) -> u32 {
    use strum::IntoEnumIterator;
    ErrorCode::iter().position(|c| c == code).expect("ErrorCode::iter covers every variant") as u32
}

/// Write `msg` as one length-prefixed frame: `u32 len LE | borsh bytes`.
pub async fn write_frame<W, M>(writer: &mut W, msg: &M) -> io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
    M: BorshSerialize,
{
    let bytes = borsh::to_vec(msg).map_err(io::Error::other)?;
    writer.write_all(&(bytes.len() as u32).to_le_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await
}

/// Read one length-prefixed frame and decode it.
pub async fn read_frame<R, M>(reader: &mut R) -> io::Result<M>
where
    R: tokio::io::AsyncRead + Unpin,
    M: BorshDeserialize,
{
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    M::try_from_slice(&buf).map_err(io::Error::other)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_round_trips_through_a_frame() {
        let req = Request {
            request_type: RequestType::Put,
            source: 7,
            key: Some(b"k".to_vec()),
            branch: Some(b"master".to_vec()),
            version: None,
            ref_branch: None,
            ref_version: None,
            value: Some(ValuePayload {
                object_type: 3,
                base: [0u8; 20],
                pos: 0,
                dels: 0,
                values: vec![b"v".to_vec()],
                keys: vec![],
                ctx: vec![],
            }),
        };

        let mut buf = Vec::new();
        write_frame(&mut buf, &req).await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let back: Request = read_frame(&mut cursor).await.unwrap();
        assert_eq!(back.source, 7);
        assert_eq!(back.request_type, RequestType::Put);
    }

    #[test]
    fn ok_response_has_ok_stat() {
        let resp = Response::ok(Some(b"x".to_vec()), false, vec![]);
        assert!(resp.is_ok());
    }

    #[test]
    fn err_response_carries_the_code() {
        let resp = Response::err(ErrorCode::KeyNotExists);
        assert!(!resp.is_ok());
    }
}
