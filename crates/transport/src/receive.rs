//! Serving push: pack ingestion then ref mutation.
//!
//! Ordering contract: the whole inbound packfile lands as one object
//! transaction (one ledger batch) before any ref is touched; ref mutations
//! are a second, separate batch. A failed ref batch can therefore leave
//! dangling objects but never a ref without its objects.

use chaintree::ledger::Transaction;
use chaintree::value::Value;

use storage::object::ObjectId;

use crate::caps::Capability;
use crate::session::{Error, Service, Session};

/// What a ref command asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Create a ref that must not exist yet.
    Create,
    /// Move an existing ref.
    Update,
    /// Delete an existing ref.
    Delete,
}

/// One requested ref mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefCommand {
    /// The full ref name.
    pub name: String,
    /// The value the client believes the ref has (`None` = absent).
    pub old: Option<ObjectId>,
    /// The value to set (`None` = delete).
    pub new: Option<ObjectId>,
}

impl RefCommand {
    /// Build a command; zero ids are normalized to `None`.
    pub fn new(name: impl Into<String>, old: Option<ObjectId>, new: Option<ObjectId>) -> Self {
        RefCommand {
            name: name.into(),
            old: old.filter(|id| !id.is_zero()),
            new: new.filter(|id| !id.is_zero()),
        }
    }

    /// Classify the command.
    pub fn action(&self) -> Action {
        match (&self.old, &self.new) {
            (None, _) => Action::Create,
            (Some(_), Some(_)) => Action::Update,
            (Some(_), None) => Action::Delete,
        }
    }
}

/// A push request: capabilities, ref commands, and the packfile bytes.
#[derive(Debug, Clone, Default)]
pub struct ReceivePackRequest {
    /// Requested capability tokens.
    pub capabilities: Vec<String>,
    /// Ref mutations, applied in order.
    pub commands: Vec<RefCommand>,
    /// The packfile; may be empty for delete-only pushes.
    pub packfile: Vec<u8>,
}

/// The per-command outcome of a push.
#[derive(Debug, Clone)]
pub struct CommandStatus {
    /// The ref the command addressed.
    pub name: String,
    /// `Ok` or the error string reported to git.
    pub status: Result<(), String>,
}

/// The outcome of a push.
#[derive(Debug, Clone)]
pub struct ReportStatus {
    /// `Ok` once the packfile was fully unpacked and committed.
    pub unpack: Result<(), String>,
    /// One status per command, in request order.
    pub commands: Vec<CommandStatus>,
}

impl ReportStatus {
    /// Whether everything succeeded.
    pub fn ok(&self) -> bool {
        self.unpack.is_ok() && self.commands.iter().all(|c| c.status.is_ok())
    }

    fn failed(commands: &[RefCommand], unpack: String, reason: &str) -> Self {
        ReportStatus {
            unpack: Err(unpack),
            commands: commands
                .iter()
                .map(|c| CommandStatus {
                    name: c.name.clone(),
                    status: Err(reason.to_owned()),
                })
                .collect(),
        }
    }
}

pub(crate) async fn receive_pack(
    session: &mut Session,
    req: ReceivePackRequest,
) -> Result<ReportStatus, Error> {
    debug_assert_eq!(session.service(), Service::ReceivePack);
    session.capabilities().validate(&req.capabilities)?;
    let report_status = req
        .capabilities
        .iter()
        .any(|t| t == Capability::ReportStatus.as_str());
    let key = session.auth().key().clone();
    let storer = session.storer().await?.clone();

    // stage 1: the object batch
    if !req.packfile.is_empty() {
        if let Err(e) = storer.objects().write_pack(&req.packfile).await {
            tracing::warn!(error = %e, "packfile ingestion failed");
            let report = ReportStatus::failed(&req.commands, e.to_string(), "unpacker error");
            return finish(report, report_status);
        }
    }

    // stage 2: classify each command against the current refs
    let mut statuses = Vec::with_capacity(req.commands.len());
    let mut txns = Vec::new();
    let mut applied = Vec::new();
    for cmd in &req.commands {
        let current = match storer.refs().get(&cmd.name).await {
            Ok(reference) => Some(reference.target),
            Err(storage::refs::Error::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };
        let verdict = match cmd.action() {
            Action::Create if current.is_some() => Err("reference already exists".to_owned()),
            Action::Update | Action::Delete if current.is_none() => {
                Err("reference does not exist".to_owned())
            }
            _ => Ok(()),
        };
        if verdict.is_ok() {
            let value = match &cmd.new {
                Some(target) => Value::Str(target.hex()),
                None => Value::Null,
            };
            txns.push(Transaction::SetData {
                path: cmd.name.clone(),
                value,
            });
            applied.push(statuses.len());
        }
        statuses.push(CommandStatus {
            name: cmd.name.clone(),
            status: verdict,
        });
    }

    // stage 3: one batched ref play for every surviving command
    if !txns.is_empty() {
        let tree = storer.tree();
        let mut tree = tree.lock().await;
        if let Err(e) = tree.play(&key, txns).await {
            tracing::warn!(error = %e, "ref batch failed");
            let message = e.to_string();
            for index in &applied {
                statuses[*index].status = Err(message.clone());
            }
        }
    }

    finish(
        ReportStatus {
            unpack: Ok(()),
            commands: statuses,
        },
        report_status,
    )
}

/// With `report-status` negotiated the report is always returned; without
/// it a failure becomes the call's error.
fn finish(report: ReportStatus, negotiated: bool) -> Result<ReportStatus, Error> {
    if negotiated || report.ok() {
        return Ok(report);
    }
    let message = report
        .unpack
        .as_ref()
        .err()
        .cloned()
        .or_else(|| {
            report
                .commands
                .iter()
                .find_map(|c| c.status.as_ref().err().map(|e| format!("{}: {e}", c.name)))
        })
        .unwrap_or_else(|| "push failed".to_owned());
    Err(Error::PushRejected(message))
}
