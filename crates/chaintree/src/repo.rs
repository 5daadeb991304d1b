//! Repository trees: config, default team, and the object/ref path space.
//!
//! A repo tree is owned by its default team's DID, so write authority flows
//! members → team → repo without the repo tree ever naming individuals.

use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use crate::keys::{self, Keypair, REPO_NAMESPACE};
use crate::ledger::{Ledger, Transaction};
use crate::team::{self, Members, TeamTree};
use crate::tree::{self, Tree};
use crate::user::{self, UserTree};
use crate::value::{self, Value};

/// Content path of the object-storage backend selector.
pub const STORAGE_TYPE_PATH: &str = "config/objectStorage/type";
/// Content path of the default team's DID.
pub const DEFAULT_TEAM_PATH: &str = "teams/default";

/// Which backend a repository keeps its git objects in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObjectStorage {
    /// Objects inline in the repo tree itself.
    Chaintree,
    /// Objects in the external blob network, linked by URI.
    #[default]
    Siaskynet,
}

impl std::fmt::Display for ObjectStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ObjectStorage::Chaintree => "chaintree",
            ObjectStorage::Siaskynet => "siaskynet",
        })
    }
}

impl FromStr for ObjectStorage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chaintree" => Ok(ObjectStorage::Chaintree),
            "siaskynet" => Ok(ObjectStorage::Siaskynet),
            other => Err(Error::UnknownStorage(other.to_owned())),
        }
    }
}

/// An error from a repo-tree operation.
#[derive(Error, Debug)]
pub enum Error {
    /// The owning user does not exist.
    #[error("no user found for `{0}`; run `dgit init` first")]
    UserNotFound(String),
    /// The key creating the repo is not one of the user's keys.
    #[error("`{address}` is not an owner of user `{username}`")]
    NotOwner {
        /// The user the repo was to be created under.
        username: String,
        /// The rejected address.
        address: String,
    },
    /// The user already has a repo of that name.
    #[error("repo `{0}` already exists")]
    RepoExists(String),
    /// No repo tree exists for the name.
    #[error("no repository found for `{0}`")]
    NotFound(String),
    /// The config names a backend this build does not know.
    #[error("unknown object storage type `{0}`")]
    UnknownStorage(String),
    /// The repo tree names no default team.
    #[error("repository `{0}` has no default team")]
    MissingTeam(String),
    /// The owning user tree failed.
    #[error(transparent)]
    User(#[from] user::Error),
    /// The default team tree failed.
    #[error(transparent)]
    Team(#[from] team::Error),
    /// The underlying tree failed.
    #[error(transparent)]
    Tree(#[from] tree::Error),
    /// A content node did not have the shape expected.
    #[error(transparent)]
    Value(#[from] value::Error),
}

/// Inputs to [`RepoTree::create`].
#[derive(Debug, Clone)]
pub struct CreateOpts {
    /// The owning username.
    pub username: String,
    /// The repository name under that user.
    pub reponame: String,
    /// Which object-storage backend the repo will use.
    pub storage: ObjectStorage,
}

/// The tree holding one repository.
#[derive(Debug)]
pub struct RepoTree {
    tree: Tree,
}

impl RepoTree {
    /// The canonical `<user>/<repo>` name, lowercased.
    pub fn full_name(username: &str, reponame: &str) -> String {
        format!("{}/{}", username, reponame).to_lowercase()
    }

    /// The DID the repo tree for `<user>/<repo>` has, whether or not it
    /// exists yet.
    pub fn did_for(username: &str, reponame: &str) -> String {
        keys::genesis_did(&Self::full_name(username, reponame), REPO_NAMESPACE)
    }

    /// Create a repository tree.
    ///
    /// Preconditions are checked in order: the owning user must exist, the
    /// signing key must be one of the user's keys, and the repo name must be
    /// free. On success the default team (user as sole member) and the repo
    /// tree are created and the repo DID registered in the user tree.
    pub async fn create(
        ledger: Arc<dyn Ledger>,
        opts: CreateOpts,
        owner_key: &Keypair,
    ) -> Result<Self, Error> {
        let username = opts.username.to_lowercase();
        let reponame = opts.reponame.to_lowercase();
        let full_name = Self::full_name(&username, &reponame);

        let mut user = match UserTree::find(ledger.clone(), &username).await {
            Ok(user) => user,
            Err(user::Error::NotFound(_)) => return Err(Error::UserNotFound(username)),
            Err(e) => return Err(e.into()),
        };
        let address = owner_key.address().to_string();
        if !user.is_owner(&address) {
            return Err(Error::NotOwner { username, address });
        }
        if user.repos().contains_key(&reponame) {
            return Err(Error::RepoExists(full_name));
        }

        let team = TeamTree::create(
            ledger.clone(),
            &format!("{full_name}/teams/default"),
            Members::from([(username.clone(), user.did().to_owned())]),
        )
        .await?;

        let genesis = keys::genesis_key(&full_name, REPO_NAMESPACE);
        let extra = vec![
            Transaction::set(STORAGE_TYPE_PATH, opts.storage.to_string()),
            Transaction::set(DEFAULT_TEAM_PATH, team.did()),
        ];
        let tree = Tree::create(
            ledger.clone(),
            &full_name,
            vec![team.did().to_owned()],
            &genesis,
            extra,
        )
        .await?;

        user.add_repo(owner_key, &reponame, tree.did()).await?;
        tracing::info!(repo = %full_name, did = %tree.did(), "created repository");
        Ok(RepoTree { tree })
    }

    /// Load the repository tree for `<user>/<repo>`.
    pub async fn find(
        ledger: Arc<dyn Ledger>,
        username: &str,
        reponame: &str,
    ) -> Result<Self, Error> {
        let full_name = Self::full_name(username, reponame);
        let did = keys::genesis_did(&full_name, REPO_NAMESPACE);
        match Tree::find(ledger, &did).await {
            Ok(tree) => Ok(RepoTree { tree }),
            Err(tree::Error::NotFound { .. }) => Err(Error::NotFound(full_name)),
            Err(e) => Err(e.into()),
        }
    }

    /// The repo tree's DID.
    pub fn did(&self) -> &str {
        self.tree.did()
    }

    /// The `<user>/<repo>` name.
    pub fn name(&self) -> &str {
        self.tree.name()
    }

    /// The configured object-storage backend; the default when unset.
    pub fn storage_type(&self) -> Result<ObjectStorage, Error> {
        match self.tree.resolve(STORAGE_TYPE_PATH) {
            (Some(v), _) => v.expect_str(STORAGE_TYPE_PATH)?.parse(),
            (None, _) => Ok(ObjectStorage::default()),
        }
    }

    /// Load the team registered under `teams/<name>`.
    pub async fn team(&self, name: &str) -> Result<TeamTree, Error> {
        let path = format!("teams/{name}");
        let did = match self.tree.resolve(&path) {
            (Some(Value::Str(did)), _) => did.clone(),
            _ => return Err(Error::MissingTeam(self.name().to_owned())),
        };
        Ok(TeamTree::find(self.tree.ledger(), &did).await?)
    }

    /// Consume the view, yielding the raw tree for the storage layer.
    pub fn into_tree(self) -> Tree {
        self.tree
    }

    /// The raw tree.
    pub fn tree(&self) -> &Tree {
        &self.tree
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::keys::{USER_NAMESPACE, genesis_key};
    use crate::memory::MemoryLedger;

    async fn setup() -> (Arc<dyn Ledger>, Keypair) {
        let ledger: Arc<dyn Ledger> = Arc::new(MemoryLedger::new());
        let key = genesis_key("alice-signing", USER_NAMESPACE);
        UserTree::create(ledger.clone(), "alice", vec![key.address().to_string()])
            .await
            .unwrap();
        (ledger, key)
    }

    fn opts() -> CreateOpts {
        CreateOpts {
            username: "alice".into(),
            reponame: "widgets".into(),
            storage: ObjectStorage::Chaintree,
        }
    }

    #[tokio::test]
    async fn create_wires_user_team_and_config() {
        let (ledger, key) = setup().await;
        let repo = RepoTree::create(ledger.clone(), opts(), &key).await.unwrap();

        assert_eq!(repo.name(), "alice/widgets");
        assert_eq!(repo.storage_type().unwrap(), ObjectStorage::Chaintree);

        let team = repo.team("default").await.unwrap();
        assert_eq!(
            team.members().get("alice").map(String::as_str),
            Some(UserTree::did_for("alice").as_str())
        );
        assert_eq!(repo.tree().owners(), [team.did().to_owned()]);

        let user = UserTree::find(ledger.clone(), "alice").await.unwrap();
        assert_eq!(
            user.repos().get("widgets").map(String::as_str),
            Some(repo.did())
        );

        let found = RepoTree::find(ledger, "Alice", "Widgets").await.unwrap();
        assert_eq!(found.did(), repo.did());
    }

    #[tokio::test]
    async fn preconditions_fail_in_order() {
        let (ledger, key) = setup().await;

        let err = RepoTree::create(
            ledger.clone(),
            CreateOpts {
                username: "ghost".into(),
                ..opts()
            },
            &key,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::UserNotFound(_)));

        let stranger = genesis_key("stranger", USER_NAMESPACE);
        let err = RepoTree::create(ledger.clone(), opts(), &stranger)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotOwner { .. }));

        RepoTree::create(ledger.clone(), opts(), &key).await.unwrap();
        let err = RepoTree::create(ledger, opts(), &key).await.unwrap_err();
        assert!(matches!(err, Error::RepoExists(_)));
    }

    #[tokio::test]
    async fn find_missing_repo() {
        let (ledger, _) = setup().await;
        let err = RepoTree::find(ledger, "alice", "nothing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(name) if name == "alice/nothing"));
    }
}
