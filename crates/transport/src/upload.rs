//! Serving fetch: reachability closure and pack streaming.

use std::collections::HashSet;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

use storage::object::{Object, ObjectId, ObjectType};
use storage::pack;
use storage::store::{self, ObjectStore, TypeHint};

use crate::session::{Error, Session};

const PIPE_CAPACITY: usize = 64 * 1024;

/// A fetch request: what the client wants and what it already has.
#[derive(Debug, Clone, Default)]
pub struct UploadPackRequest {
    /// Tips the client asks for.
    pub wants: Vec<ObjectId>,
    /// Tips the client already has.
    pub haves: Vec<ObjectId>,
    /// Shallow roots; always rejected.
    pub shallows: Vec<ObjectId>,
    /// Requested capability tokens.
    pub capabilities: Vec<String>,
}

/// The streamed reply: a pipe carrying the packfile, plus the writer task.
///
/// If the writer fails mid-stream the pipe ends early; the reader observes a
/// truncated (checksum-failing) pack rather than a silent success, and
/// [`UploadPackResponse::read_all`] surfaces the writer's error directly.
#[derive(Debug)]
pub struct UploadPackResponse {
    reader: DuplexStream,
    writer: JoinHandle<Result<(), Error>>,
}

impl UploadPackResponse {
    /// Drain the whole packfile, propagating any writer error.
    pub async fn read_all(mut self) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::new();
        let read = self.reader.read_to_end(&mut buf).await;
        match self.writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(join) => return Err(Error::Io(std::io::Error::other(join))),
        }
        read?;
        Ok(buf)
    }

    /// Split into the raw pipe and the writer handle.
    pub fn into_parts(self) -> (DuplexStream, JoinHandle<Result<(), Error>>) {
        (self.reader, self.writer)
    }
}

pub(crate) async fn upload_pack(
    session: &mut Session,
    req: UploadPackRequest,
) -> Result<UploadPackResponse, Error> {
    if req.wants.is_empty() {
        return Err(Error::EmptyUploadPackRequest);
    }
    session.capabilities().validate(&req.capabilities)?;
    if !req.shallows.is_empty() {
        return Err(Error::ShallowUnsupported);
    }

    let storer = session.storer().await?;
    let objects = storer.objects();

    // everything the client has, then everything it wants that we must send
    let haves = closure(objects.as_ref(), &req.haves, &HashSet::new(), true)
        .await?
        .seen;
    let wants = closure(objects.as_ref(), &req.wants, &haves, false).await?;
    tracing::debug!(
        wants = req.wants.len(),
        objects = wants.objects.len(),
        "encoding packfile"
    );

    let pack = pack::encode(&wants.objects);
    let (mut tx, rx) = tokio::io::duplex(PIPE_CAPACITY);
    let writer = tokio::spawn(async move {
        for chunk in pack.chunks(PIPE_CAPACITY) {
            tx.write_all(chunk).await?;
        }
        tx.shutdown().await?;
        Ok(())
    });

    Ok(UploadPackResponse { reader: rx, writer })
}

pub(crate) struct Closure {
    pub objects: Vec<Object>,
    pub seen: HashSet<ObjectId>,
}

/// Walk the object graph from `roots`, stopping at `stop`.
///
/// Objects are collected in visitation order (commits before the trees and
/// blobs they introduce). With `tolerate_missing`, absent roots are skipped
/// instead of failing, since a client's haves may name history this
/// repository never saw.
pub(crate) async fn closure(
    store: &dyn ObjectStore,
    roots: &[ObjectId],
    stop: &HashSet<ObjectId>,
    tolerate_missing: bool,
) -> Result<Closure, Error> {
    let mut queue: Vec<ObjectId> = roots.to_vec();
    let mut seen = HashSet::new();
    let mut objects = Vec::new();

    while let Some(id) = queue.pop() {
        if id.is_zero() || seen.contains(&id) || stop.contains(&id) {
            continue;
        }
        let obj = match store.get(TypeHint::Any, &id).await {
            Ok(obj) => obj,
            Err(store::Error::NotFound(_)) if tolerate_missing => continue,
            Err(e) => return Err(e.into()),
        };
        seen.insert(id);

        match obj.kind {
            ObjectType::Commit => {
                let commit = gix::objs::CommitRef::from_bytes(&obj.data)
                    .map_err(|e| corrupt(id, e))?;
                queue.push(oid(commit.tree()));
                queue.extend(commit.parents().map(oid));
            }
            ObjectType::Tree => {
                let tree =
                    gix::objs::TreeRef::from_bytes(&obj.data).map_err(|e| corrupt(id, e))?;
                for entry in tree.entries {
                    use gix::objs::tree::EntryKind;
                    match entry.mode.kind() {
                        // submodule pointers reference foreign history
                        EntryKind::Commit => {}
                        _ => queue.push(oid(entry.oid.to_owned())),
                    }
                }
            }
            ObjectType::Tag => {
                let tag =
                    gix::objs::TagRef::from_bytes(&obj.data).map_err(|e| corrupt(id, e))?;
                queue.push(oid(tag.target()));
            }
            ObjectType::Blob => {}
            // the store never hands back deltas
            ObjectType::OfsDelta | ObjectType::RefDelta => {
                return Err(corrupt_msg(id, "delta in object store"));
            }
        }
        objects.push(obj);
    }

    Ok(Closure { objects, seen })
}

fn oid(raw: gix::ObjectId) -> ObjectId {
    ObjectId::from_bytes(raw.as_bytes().try_into().expect("sha-1 object id"))
}

fn corrupt(id: ObjectId, e: impl std::fmt::Display) -> Error {
    Error::CorruptGraph {
        id,
        message: e.to_string(),
    }
}

fn corrupt_msg(id: ObjectId, message: &str) -> Error {
    Error::CorruptGraph {
        id,
        message: message.to_owned(),
    }
}
