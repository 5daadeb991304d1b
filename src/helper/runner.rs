//! The line-based helper loop.
//!
//! Translates the git-remote-helper commands (`capabilities`, `list`,
//! `push`, `fetch`) into transport sessions. Responses go to the writer the
//! runner owns; anything human-readable goes to stderr through tracing.

use std::collections::HashSet;
use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::{Context, Result};

use chaintree::repo::{CreateOpts, ObjectStorage, RepoTree};
use storage::object::{Object, ObjectId, ObjectType};
use storage::pack::{self, PackEvent, PackReader};
use storage::store::ObjectStore;
use transport::receive::{ReceivePackRequest, RefCommand};
use transport::upload::UploadPackRequest;
use transport::{Client, Endpoint, Error as TransportError, PrivateKeyAuth, Service};

/// One helper process: a command loop bound to a local repository and a
/// remote endpoint.
pub struct Runner<W: Write> {
    client: Arc<Client>,
    endpoint: Endpoint,
    auth: PrivateKeyAuth,
    local: gix::Repository,
    username: String,
    storage: ObjectStorage,
    wants: Vec<ObjectId>,
    out: W,
}

impl<W: Write> Runner<W> {
    /// Assemble a runner.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<Client>,
        endpoint: Endpoint,
        auth: PrivateKeyAuth,
        local: gix::Repository,
        username: impl Into<String>,
        storage: ObjectStorage,
        out: W,
    ) -> Self {
        Runner {
            client,
            endpoint,
            auth,
            local,
            username: username.into(),
            storage,
            wants: Vec::new(),
            out,
        }
    }

    /// Read commands from `input` until EOF or the blank terminator.
    pub async fn run<R: BufRead>(&mut self, input: R) -> Result<()> {
        for line in input.lines() {
            let line = line?;
            tracing::trace!(command = %line, "helper command");
            if !self.dispatch(line.trim_end()).await? {
                break;
            }
        }
        self.out.flush()?;
        Ok(())
    }

    /// Handle one command; `Ok(false)` ends the loop.
    async fn dispatch(&mut self, line: &str) -> Result<bool> {
        if line.is_empty() {
            self.flush_fetch().await?;
            writeln!(self.out)?;
            self.out.flush()?;
            return Ok(false);
        }
        match line {
            "capabilities" => {
                writeln!(self.out, "*push")?;
                writeln!(self.out, "*fetch")?;
                writeln!(self.out)?;
                self.out.flush()?;
            }
            "list" | "list for-push" => self.list(line.ends_with("for-push")).await?,
            _ => {
                if let Some(spec) = line.strip_prefix("push ") {
                    self.push(spec.trim()).await?;
                } else if let Some(rest) = line.strip_prefix("fetch ") {
                    let sha = rest
                        .split_whitespace()
                        .next()
                        .context("malformed fetch command")?;
                    self.wants.push(ObjectId::from_hex(sha)?);
                } else {
                    anyhow::bail!("unknown helper command `{line}`");
                }
            }
        }
        Ok(true)
    }

    fn session(&self, service: Service) -> transport::Session {
        self.client
            .session(self.endpoint.clone(), service, self.auth.clone())
    }

    /// `list` / `list for-push`: advertise the remote's refs.
    async fn list(&mut self, for_push: bool) -> Result<()> {
        let service = if for_push {
            Service::ReceivePack
        } else {
            Service::UploadPack
        };
        let mut session = self.session(service);
        match session.advertised_refs().await {
            Ok(adv) => {
                if let Some(head) = adv.head() {
                    writeln!(self.out, "@{} HEAD", head.name)?;
                }
                for reference in &adv.refs {
                    writeln!(self.out, "{} {}", reference.target.hex(), reference.name)?;
                }
            }
            Err(TransportError::RepositoryNotFound(name)) if for_push => {
                // fresh repo: the first push will create it
                tracing::debug!(repo = %name, "repository does not exist yet");
            }
            Err(TransportError::RepositoryNotFound(name)) => {
                anyhow::bail!("repository `{name}` not found; push to create it");
            }
            Err(TransportError::EmptyRemoteRepository) => {
                tracing::debug!("remote repository is empty");
            }
            Err(e) => return Err(e.into()),
        }
        writeln!(self.out)?;
        self.out.flush()?;
        Ok(())
    }

    /// `push <src>:<dst>`: pack what the remote lacks, then move the ref.
    async fn push(&mut self, spec: &str) -> Result<()> {
        let spec = spec.strip_prefix('+').unwrap_or(spec);
        let (src, dst) = spec.split_once(':').context("malformed push refspec")?;

        let mut session = self.session(Service::ReceivePack);
        let adv = match session.advertised_refs().await {
            Ok(adv) => adv,
            Err(TransportError::RepositoryNotFound(_)) => {
                self.create_remote_repo().await?;
                session = self.session(Service::ReceivePack);
                session.advertised_refs().await?
            }
            Err(e) => return Err(e.into()),
        };
        let old = adv
            .refs
            .iter()
            .find(|r| r.name == dst)
            .map(|r| r.target);

        let (objects, new) = if src.is_empty() {
            (Vec::new(), None)
        } else {
            let mut reference = self
                .local
                .find_reference(src)
                .with_context(|| format!("resolving local ref `{src}`"))?;
            let tip = to_ours(
                reference
                    .peel_to_id_in_place()
                    .with_context(|| format!("peeling `{src}`"))?
                    .detach(),
            );
            let storer = session.storer().await?.clone();
            let objects = self.missing_objects(tip, storer.objects().as_ref()).await?;
            (objects, Some(tip))
        };
        tracing::debug!(src, dst, objects = objects.len(), "pushing");

        let mut capabilities = vec!["report-status".to_owned()];
        if new.is_none() {
            capabilities.push("delete-refs".to_owned());
        }
        let report = session
            .receive_pack(ReceivePackRequest {
                capabilities,
                commands: vec![RefCommand::new(dst, old, new)],
                packfile: if objects.is_empty() {
                    Vec::new()
                } else {
                    pack::encode(&objects)
                },
            })
            .await?;

        for status in &report.commands {
            match &status.status {
                Ok(()) => writeln!(self.out, "ok {}", status.name)?,
                Err(message) => writeln!(self.out, "error {} {}", status.name, message)?,
            }
        }
        self.out.flush()?;
        Ok(())
    }

    /// Auto-create the remote repository, once, for a first push.
    async fn create_remote_repo(&self) -> Result<()> {
        anyhow::ensure!(
            self.endpoint.username == self.username,
            "repository {} does not exist and belongs to `{}`, not you",
            self.endpoint,
            self.endpoint.username,
        );
        RepoTree::create(
            self.client.ledger(),
            CreateOpts {
                username: self.endpoint.username.clone(),
                reponame: self.endpoint.repo.clone(),
                storage: self.storage,
            },
            self.auth.key(),
        )
        .await?;
        tracing::info!(repo = %self.endpoint, "created remote repository");
        Ok(())
    }

    /// Walk the local graph from `tip`, collecting every object the remote
    /// does not already have. An object the remote holds closes its whole
    /// subgraph.
    async fn missing_objects(
        &self,
        tip: ObjectId,
        store: &dyn ObjectStore,
    ) -> Result<Vec<Object>> {
        let mut queue = vec![tip];
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        while let Some(id) = queue.pop() {
            if !seen.insert(id) || store.contains(&id).await? {
                continue;
            }
            let found = self
                .local
                .find_object(to_gix(&id))
                .with_context(|| format!("object {id} not in the local repository"))?;
            let kind = kind_to_ours(found.kind)?;
            let data = found.data.clone();

            match kind {
                ObjectType::Commit => {
                    let commit = gix::objs::CommitRef::from_bytes(&data)
                        .with_context(|| format!("parsing commit {id}"))?;
                    queue.push(to_ours(commit.tree()));
                    queue.extend(commit.parents().map(to_ours));
                }
                ObjectType::Tree => {
                    let tree = gix::objs::TreeRef::from_bytes(&data)
                        .with_context(|| format!("parsing tree {id}"))?;
                    for entry in tree.entries {
                        use gix::objs::tree::EntryKind;
                        if !matches!(entry.mode.kind(), EntryKind::Commit) {
                            queue.push(to_ours(entry.oid.to_owned()));
                        }
                    }
                }
                ObjectType::Tag => {
                    let tag = gix::objs::TagRef::from_bytes(&data)
                        .with_context(|| format!("parsing tag {id}"))?;
                    queue.push(to_ours(tag.target()));
                }
                _ => {}
            }
            out.push(Object::new(kind, data));
        }
        Ok(out)
    }

    /// Complete the accumulated `fetch` batch: pull one packfile and
    /// explode it into the local object database.
    async fn flush_fetch(&mut self) -> Result<()> {
        if self.wants.is_empty() {
            return Ok(());
        }
        let mut wants: Vec<ObjectId> = self.wants.drain(..).collect();
        wants.dedup();

        let mut session = self.session(Service::UploadPack);
        let response = session
            .upload_pack(UploadPackRequest {
                wants,
                haves: self.local_tips()?,
                shallows: Vec::new(),
                capabilities: Vec::new(),
            })
            .await?;
        let bytes = response.read_all().await?;

        use gix::objs::Write as _;
        let mut reader = PackReader::new(&bytes);
        let mut count = 0usize;
        while let Some(event) = reader.next_event()? {
            if let PackEvent::Object(obj) = event {
                self.local
                    .objects
                    .write_buf(kind_to_gix(obj.kind)?, &obj.data)
                    .map_err(|e| anyhow::anyhow!("writing fetched object: {e}"))?;
                count += 1;
            }
        }
        tracing::debug!(objects = count, "fetch complete");
        Ok(())
    }

    /// Every local ref tip, for the haves line of an upload-pack request.
    fn local_tips(&self) -> Result<Vec<ObjectId>> {
        let mut tips = Vec::new();
        let platform = self
            .local
            .references()
            .map_err(|e| anyhow::anyhow!("listing local refs: {e}"))?;
        let iter = platform
            .all()
            .map_err(|e| anyhow::anyhow!("listing local refs: {e}"))?;
        for reference in iter.flatten() {
            let mut reference = reference;
            if let Ok(id) = reference.peel_to_id_in_place() {
                tips.push(to_ours(id.detach()));
            }
        }
        Ok(tips)
    }
}

fn to_ours(id: gix::ObjectId) -> ObjectId {
    ObjectId::from_bytes(id.as_bytes().try_into().expect("sha-1 object id"))
}

fn to_gix(id: &ObjectId) -> gix::ObjectId {
    gix::ObjectId::from(*id.as_bytes())
}

fn kind_to_ours(kind: gix::objs::Kind) -> Result<ObjectType> {
    Ok(match kind {
        gix::objs::Kind::Commit => ObjectType::Commit,
        gix::objs::Kind::Tree => ObjectType::Tree,
        gix::objs::Kind::Blob => ObjectType::Blob,
        gix::objs::Kind::Tag => ObjectType::Tag,
    })
}

fn kind_to_gix(kind: ObjectType) -> Result<gix::objs::Kind> {
    Ok(match kind {
        ObjectType::Commit => gix::objs::Kind::Commit,
        ObjectType::Tree => gix::objs::Kind::Tree,
        ObjectType::Blob => gix::objs::Kind::Blob,
        ObjectType::Tag => gix::objs::Kind::Tag,
        delta => anyhow::bail!("cannot store a {delta} object"),
    })
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use super::*;
    use chaintree::Ledger;
    use chaintree::keys::{Keypair, USER_NAMESPACE, genesis_key};
    use chaintree::memory::MemoryLedger;
    use chaintree::user::UserTree;
    use storage::blob::MemoryBlobNetwork;
    use storage::store::TypeHint;
    use tempfile::TempDir;

    struct Fixture {
        ledger: Arc<dyn Ledger>,
        client: Arc<Client>,
        key: Keypair,
    }

    impl Fixture {
        async fn new() -> Self {
            let ledger: Arc<dyn Ledger> = Arc::new(MemoryLedger::new());
            let key = genesis_key("alice-signing", USER_NAMESPACE);
            UserTree::create(ledger.clone(), "alice", vec![key.address().to_string()])
                .await
                .unwrap();
            let client = Arc::new(Client::new(
                ledger.clone(),
                Arc::new(MemoryBlobNetwork::new()),
            ));
            Fixture {
                ledger,
                client,
                key,
            }
        }

        /// Run helper input against a local repo, returning stdout.
        async fn run(&self, local: &gix::Repository, url: &str, input: &str) -> String {
            let mut runner = Runner::new(
                self.client.clone(),
                Endpoint::parse(url).unwrap(),
                PrivateKeyAuth::new(self.key.clone()),
                local.clone(),
                "alice",
                ObjectStorage::Chaintree,
                Vec::new(),
            );
            runner.run(Cursor::new(input.as_bytes())).await.unwrap();
            String::from_utf8(runner.out).unwrap()
        }
    }

    /// A scratch repository with one commit on `refs/heads/master`.
    fn seeded_repo() -> (TempDir, gix::Repository, ObjectId) {
        let (dir, repo) = empty_repo();
        let blob = repo.write_blob(b"hello dgit\n").unwrap().detach();
        let entry = gix::objs::tree::Entry {
            mode: gix::objs::tree::EntryKind::Blob.into(),
            filename: "file.txt".into(),
            oid: blob,
        };
        let tree = repo
            .write_object(&gix::objs::Tree {
                entries: vec![entry],
            })
            .unwrap()
            .detach();
        let commit = repo
            .commit(
                "refs/heads/master",
                "first commit",
                tree,
                Vec::<gix::ObjectId>::new(),
            )
            .unwrap()
            .detach();
        (dir, repo, to_ours(commit))
    }

    fn empty_repo() -> (TempDir, gix::Repository) {
        use std::io::Write as _;
        let dir = tempfile::tempdir().unwrap();
        let repo = gix::init(dir.path()).unwrap();
        let mut config = std::fs::OpenOptions::new()
            .append(true)
            .open(repo.git_dir().join("config"))
            .unwrap();
        config
            .write_all(b"[user]\n\tname = Test\n\temail = test@example.com\n")
            .unwrap();
        drop(config);
        let repo = gix::open(dir.path()).unwrap();
        (dir, repo)
    }

    #[tokio::test]
    async fn capabilities() {
        let fixture = Fixture::new().await;
        let (_dir, repo) = empty_repo();
        let out = fixture
            .run(&repo, "dgit://alice/widgets", "capabilities\n")
            .await;
        assert_eq!(out, "*push\n*fetch\n\n");
    }

    #[tokio::test]
    async fn list_for_push_on_a_fresh_repo_is_blank() {
        let fixture = Fixture::new().await;
        let (_dir, repo) = empty_repo();
        let out = fixture
            .run(&repo, "dgit://alice/widgets", "list for-push\n")
            .await;
        assert_eq!(out, "\n");
    }

    #[tokio::test]
    async fn push_creates_the_repo_and_lands_everything() {
        let fixture = Fixture::new().await;
        let (_dir, repo, commit) = seeded_repo();

        let out = fixture
            .run(
                &repo,
                "dgit://alice/widgets",
                "push refs/heads/master:refs/heads/master\n\n",
            )
            .await;
        assert_eq!(out, "ok refs/heads/master\n\n");

        // the ref landed with the commit's id, and its closure is readable
        let remote =
            chaintree::repo::RepoTree::find(fixture.ledger.clone(), "alice", "widgets")
                .await
                .unwrap();
        let storer = storage::Storer::open(
            remote.into_tree(),
            fixture.key.clone(),
            Arc::new(MemoryBlobNetwork::new()),
        )
        .unwrap();
        let reference = storer.refs().get("refs/heads/master").await.unwrap();
        assert_eq!(reference.target, commit);

        let fetched = storer
            .objects()
            .get(TypeHint::Any, &commit)
            .await
            .unwrap();
        assert_eq!(fetched.kind, ObjectType::Commit);
        assert_eq!(storer.objects().iter(TypeHint::Any).collect().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn push_rename_delete_and_list() {
        let fixture = Fixture::new().await;
        let (_dir, repo, commit) = seeded_repo();
        let url = "dgit://alice/widgets";

        fixture
            .run(&repo, url, "push refs/heads/master:refs/heads/master\n\n")
            .await;

        // push to a renamed branch
        let out = fixture
            .run(&repo, url, "push refs/heads/master:refs/heads/feature/test\n\n")
            .await;
        assert_eq!(out, "ok refs/heads/feature/test\n\n");

        let out = fixture.run(&repo, url, "list\n").await;
        assert_eq!(
            out,
            format!(
                "@refs/heads/master HEAD\n{sha} refs/heads/feature/test\n{sha} refs/heads/master\n\n",
                sha = commit.hex()
            )
        );

        // delete the branch again
        let out = fixture
            .run(&repo, url, "push :refs/heads/feature/test\n\n")
            .await;
        assert_eq!(out, "ok refs/heads/feature/test\n\n");

        let out = fixture.run(&repo, url, "list\n").await;
        assert!(!out.contains("refs/heads/feature/test"));
        assert!(out.contains("refs/heads/master"));
    }

    #[tokio::test]
    async fn head_prefers_master_else_last_ref() {
        let fixture = Fixture::new().await;
        let (_dir, repo, _) = seeded_repo();
        let url = "dgit://alice/headless";

        fixture
            .run(&repo, url, "push refs/heads/master:refs/heads/alpha\n\n")
            .await;
        fixture
            .run(&repo, url, "push refs/heads/master:refs/heads/zeta\n\n")
            .await;

        let out = fixture.run(&repo, url, "list\n").await;
        assert!(out.starts_with("@refs/heads/zeta HEAD\n"), "got: {out}");
    }

    #[tokio::test]
    async fn second_push_sends_only_new_objects() {
        let fixture = Fixture::new().await;
        let (_dir, repo, _) = seeded_repo();
        let url = "dgit://alice/widgets";
        fixture
            .run(&repo, url, "push refs/heads/master:refs/heads/master\n\n")
            .await;

        // an identical push finds nothing missing and still reports ok
        let out = fixture
            .run(&repo, url, "push refs/heads/master:refs/heads/other\n\n")
            .await;
        assert_eq!(out, "ok refs/heads/other\n\n");
    }

    #[tokio::test]
    async fn fetch_explodes_the_pack_into_the_local_repo() {
        let fixture = Fixture::new().await;
        let (_dir, source, commit) = seeded_repo();
        let url = "dgit://alice/widgets";
        fixture
            .run(&source, url, "push refs/heads/master:refs/heads/master\n\n")
            .await;

        let (_dir2, sink) = empty_repo();
        let out = fixture
            .run(
                &sink,
                url,
                &format!("fetch {} refs/heads/master\n\n", commit.hex()),
            )
            .await;
        assert_eq!(out, "\n");

        let found = sink.find_object(to_gix(&commit)).unwrap();
        assert_eq!(found.kind, gix::objs::Kind::Commit);
    }
}
