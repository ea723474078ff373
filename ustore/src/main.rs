//! `ustored`: the wire-protocol server (§6.3) and, when a multi-node
//! `chunk_server_file` is configured, the cross-node chunk-fetch server
//! (§4.10) for the same process.

use std::net::SocketAddr;
use std::time::Instant;

use clap::Parser;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use ustore::config::Config;
use ustore::engine::{Database, PrevRef, SpliceRequest};
use ustore::metrics;
use ustore::wire::{self, Request, RequestType, Response, ValuePayload};
use ustore_primitives::{ChunkType, Hash, UError};
use ustore_store::Chunk;

#[derive(Parser, Debug)]
#[command(name = "ustored", about = "UStore node: wire-protocol server and chunk store")]
struct Cli {
    /// Path to the `key: value` config file (§6.4).
    #[arg(long)]
    config: std::path::PathBuf,

    /// This node's own `host:port` entry in `chunk_server_file`, needed
    /// only when running more than one node (§4.10).
    #[arg(long)]
    self_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    let db = std::sync::Arc::new(Database::open(&config, cli.self_addr)?);

    if let (true, Some(self_addr)) = (db.partitioner().is_some(), cli.self_addr) {
        ustore_store::partition::spawn_chunk_fetch_server(
            &tokio::runtime::Handle::current(),
            self_addr,
            db.loader().clone(),
        )?;
        tracing::info!(target: "ustore", %self_addr, "chunk-fetch server listening");
    }

    let addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(target: "ustore", %addr, "wire-protocol server listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        let db = db.clone();
        tokio::spawn(async move {
            if let Err(err) = serve_connection(stream, db).await {
                tracing::warn!(target: "ustore", %peer, %err, "connection closed with error");
            }
        });
    }
}

async fn serve_connection<S>(mut stream: S, db: std::sync::Arc<Database>) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let request: Request = match wire::read_frame(&mut stream).await {
            Ok(req) => req,
            Err(_) => return Ok(()),
        };
        let request_type_label: &'static str = request.request_type.into();
        metrics::REQUESTS_RECEIVED.with_label_values(&[request_type_label]).inc();

        let started = Instant::now();
        let (response, failed_code) = dispatch(&db, request);
        metrics::REQUEST_LATENCY_SECONDS
            .with_label_values(&[request_type_label])
            .observe(started.elapsed().as_secs_f64());
        if let Some(code) = failed_code {
            let code_label: &'static str = code.into();
            metrics::REQUESTS_FAILED.with_label_values(&[code_label]).inc();
        }

        wire::write_frame(&mut stream, &response).await?;
    }
}

/// Resolve the wire request's `branch`/`version` fields into a
/// [`PrevRef`] — a branch name takes precedence when both are absent
/// (defaults to `master`), matching §4.9's "prev_hash or branch_name".
fn prev_ref(branch: &Option<Vec<u8>>, version: &Option<[u8; 20]>) -> PrevRef {
    if let Some(version) = version {
        PrevRef::Version(Hash::from_bytes(*version))
    } else if let Some(branch) = branch {
        PrevRef::Branch(branch.clone())
    } else {
        PrevRef::Branch(b"master".to_vec())
    }
}

fn splice_request(value: &Option<ValuePayload>) -> SpliceRequest {
    match value {
        Some(v) => SpliceRequest {
            pos: v.pos,
            dels: v.dels,
            values: v.values.clone(),
            keys: v.keys.clone(),
        },
        None => SpliceRequest::default(),
    }
}

fn object_kind_of(value: &Option<ValuePayload>) -> ChunkType {
    value.as_ref().map(|v| ChunkType::from_tag(v.object_type)).unwrap_or(ChunkType::Blob)
}

/// Translate one `Request` into a `Database` call and a `Response`
/// (§6.3). Every arm maps one-to-one onto a `RequestType` variant.
fn dispatch(db: &Database, req: Request) -> (Response, Option<ustore_primitives::ErrorCode>) {
    let key = req.key.clone().unwrap_or_default();
    let branch = req.branch.clone().unwrap_or_default();

    let result: Result<Response, UError> = match req.request_type {
        RequestType::Put => {
            let prev = prev_ref(&req.branch, &req.version);
            let splice = splice_request(&req.value);
            let kind = object_kind_of(&req.value);
            db.put(&key, kind, prev, &splice).map(ok_hash)
        }
        RequestType::PutUnkeyed => {
            let splice = splice_request(&req.value);
            let kind = object_kind_of(&req.value);
            db.put_unkeyed(kind, &splice).map(|(key, version)| {
                Response::ok(Some(version.as_bytes().to_vec()), false, vec![key])
            })
        }
        // `branch` names the merge destination (the onto-branch, whose
        // head becomes the new `UCell`'s `prev1`); `ref_branch`/
        // `ref_version` name the incoming side being merged in (`prev2`).
        // `value` carries the splice Merge applies against the onto-
        // branch head, exactly as `Put`'s `value` does (§4.9: "Merge is
        // identical [to Put] except the UCell's prev2 is non-null").
        RequestType::Merge => {
            let other = prev_ref(&req.ref_branch, &req.ref_version);
            let splice = splice_request(&req.value);
            let kind = object_kind_of(&req.value);
            db.merge(&key, kind, &branch, other, &splice).map(ok_hash)
        }
        RequestType::Get => {
            let prev = prev_ref(&req.branch, &req.version);
            db.get(&key, prev).and_then(|versioned| {
                let scanned = db.scan_object(&versioned.cell)?;
                Ok(Response::ok(Some(versioned.version.as_bytes().to_vec()), false, scanned))
            })
        }
        RequestType::Exists => db.exists(&key, &branch).map(ok_bool),
        RequestType::GetBranchHead => {
            db.get_branch_head(&key, &branch).map(|h| ok_hash(h.unwrap_or(Hash::NULL)))
        }
        RequestType::IsBranchHead => {
            let version = req.version.map(Hash::from_bytes).unwrap_or(Hash::NULL);
            db.is_branch_head(&key, &branch, version).map(ok_bool)
        }
        RequestType::GetLatestVersion => db.get_latest_versions(&key).map(|versions| {
            Response::ok(None, false, versions.into_iter().map(|h| h.as_bytes().to_vec()).collect())
        }),
        RequestType::IsLatestVersion => {
            let version = req.version.map(Hash::from_bytes).unwrap_or(Hash::NULL);
            db.is_latest_version(&key, version).map(ok_bool)
        }
        RequestType::ListBranches => {
            db.list_branches(&key).map(|branches| Response::ok(None, false, branches))
        }
        RequestType::ListKeys => db.list_keys().map(|keys| Response::ok(None, false, keys)),
        RequestType::Branch => {
            let src = prev_ref(&req.ref_branch, &req.ref_version);
            db.branch(&key, src, &branch).map(ok_hash)
        }
        RequestType::Rename => {
            let new_branch = req.ref_branch.clone().unwrap_or_default();
            db.rename(&key, &branch, &new_branch).map(|_| Response::ok(None, true, vec![]))
        }
        RequestType::Delete => db.delete(&key, &branch).map(|_| Response::ok(None, true, vec![])),
        RequestType::GetChunk => {
            let hash = req.version.map(Hash::from_bytes).unwrap_or(Hash::NULL);
            db.get_chunk(&hash).map(|maybe_chunk| match maybe_chunk {
                Some(chunk) => Response::ok(Some(chunk.as_bytes().to_vec()), true, vec![]),
                None => Response::ok(None, false, vec![]),
            })
        }
        RequestType::PutChunk => {
            let bytes = req.value.as_ref().and_then(|v| v.values.first()).cloned().unwrap_or_default();
            match Chunk::from_bytes(bytes) {
                Some(chunk) => db.put_chunk(&chunk).map(ok_bool),
                None => Err(UError::InvalidCommandArgument("malformed chunk payload".to_string())),
            }
        }
        RequestType::ExistsChunk => {
            let hash = req.version.map(Hash::from_bytes).unwrap_or(Hash::NULL);
            db.exists_chunk(&hash).map(ok_bool)
        }
        RequestType::GetInfo => db.get_info().map(|info| {
            let json = serde_json::to_vec(&info).unwrap_or_default();
            Response::ok(Some(json), false, vec![])
        }),
    };

    match result {
        Ok(response) => (response, None),
        Err(err) => {
            tracing::debug!(target: "ustore", %err, "request failed");
            let code = err.code();
            (Response::err(code), Some(code))
        }
    }
}

fn ok_hash(hash: Hash) -> Response {
    Response::ok(Some(hash.as_bytes().to_vec()), false, vec![])
}

fn ok_bool(value: bool) -> Response {
    Response::ok(None, value, vec![])
}
