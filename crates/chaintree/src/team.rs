//! Team trees: a member set with transitive write authority.
//!
//! Invariant maintained by every mutation here: the tree's ownership set is
//! exactly the DIDs of its members. Ownership and the `members` map are
//! always changed in one batch so the two can never drift.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use crate::keys::{self, Keypair, TEAM_NAMESPACE};
use crate::ledger::{Ledger, Transaction};
use crate::tree::{self, Tree};
use crate::value::Value;

/// Members by username → user-tree DID.
pub type Members = BTreeMap<String, String>;

/// An error from a team-tree operation.
#[derive(Error, Debug)]
pub enum Error {
    /// A team must always keep at least one member.
    #[error("a team may not be emptied")]
    Empty,
    /// The underlying tree failed.
    #[error(transparent)]
    Tree(#[from] tree::Error),
}

/// A tree whose owners are its members.
#[derive(Debug)]
pub struct TeamTree {
    tree: Tree,
}

impl TeamTree {
    /// Create a team named `name` with the given initial members.
    pub async fn create(
        ledger: Arc<dyn Ledger>,
        name: &str,
        members: Members,
    ) -> Result<Self, Error> {
        if members.is_empty() {
            return Err(Error::Empty);
        }
        let genesis = keys::genesis_key(name, TEAM_NAMESPACE);
        let owners = members.values().cloned().collect();
        let extra = vec![Transaction::set("members", members_value(&members))];
        let tree = Tree::create(ledger, name, owners, &genesis, extra).await?;
        Ok(TeamTree { tree })
    }

    /// Load the team tree at `did`.
    pub async fn find(ledger: Arc<dyn Ledger>, did: &str) -> Result<Self, Error> {
        Ok(TeamTree {
            tree: Tree::find(ledger, did).await?,
        })
    }

    /// The team tree's DID.
    pub fn did(&self) -> &str {
        self.tree.did()
    }

    /// The current member set. Empty only for a malformed tree.
    pub fn members(&self) -> Members {
        let mut members = Members::new();
        if let (Some(Value::Map(m)), _) = self.tree.resolve("members") {
            for (username, v) in m {
                if let Value::Str(did) = v {
                    members.insert(username.clone(), did.clone());
                }
            }
        }
        members
    }

    /// The ownership set, for checking the member/owner invariant.
    pub fn owners(&self) -> &[String] {
        self.tree.owners()
    }

    /// Replace the member set, keeping owners in lock-step.
    pub async fn set_members(&mut self, key: &Keypair, members: Members) -> Result<(), Error> {
        if members.is_empty() {
            return Err(Error::Empty);
        }
        let owners = members.values().cloned().collect();
        self.tree
            .play(
                key,
                vec![
                    Transaction::SetOwnership {
                        authentications: owners,
                    },
                    Transaction::set("members", members_value(&members)),
                ],
            )
            .await?;
        Ok(())
    }

    /// Add members (username → user DID), keeping existing ones.
    pub async fn add_members(&mut self, key: &Keypair, new: Members) -> Result<(), Error> {
        let mut members = self.members();
        members.extend(new);
        self.set_members(key, members).await
    }

    /// Remove members by username.
    pub async fn remove_members(
        &mut self,
        key: &Keypair,
        usernames: &[String],
    ) -> Result<(), Error> {
        let mut members = self.members();
        for username in usernames {
            members.remove(&username.to_lowercase());
        }
        self.set_members(key, members).await
    }
}

fn members_value(members: &Members) -> Value {
    Value::Map(
        members
            .iter()
            .map(|(username, did)| (username.to_lowercase(), Value::Str(did.clone())))
            .collect(),
    )
}

#[cfg(test)]
mod test {
    use std::collections::BTreeSet;

    use super::*;
    use crate::keys::{USER_NAMESPACE, genesis_key};
    use crate::memory::MemoryLedger;
    use crate::user::UserTree;

    async fn user(ledger: &Arc<dyn Ledger>, name: &str) -> (Keypair, UserTree) {
        let key = genesis_key(&format!("{name}-signing"), USER_NAMESPACE);
        let tree = UserTree::create(ledger.clone(), name, vec![key.address().to_string()])
            .await
            .unwrap();
        (key, tree)
    }

    fn assert_invariant(team: &TeamTree) {
        let owners: BTreeSet<_> = team.owners().iter().cloned().collect();
        let member_dids: BTreeSet<_> = team.members().values().cloned().collect();
        assert_eq!(owners, member_dids);
    }

    #[tokio::test]
    async fn owners_track_members() {
        let ledger: Arc<dyn Ledger> = Arc::new(MemoryLedger::new());
        let (alice_key, alice) = user(&ledger, "alice").await;
        let (_, bob) = user(&ledger, "bob").await;

        let mut team = TeamTree::create(
            ledger.clone(),
            "alice/widgets/teams/default",
            Members::from([("alice".to_owned(), alice.did().to_owned())]),
        )
        .await
        .unwrap();
        assert_invariant(&team);

        team.add_members(
            &alice_key,
            Members::from([("bob".to_owned(), bob.did().to_owned())]),
        )
        .await
        .unwrap();
        assert_eq!(team.members().len(), 2);
        assert_invariant(&team);

        team.remove_members(&alice_key, &["bob".to_owned()])
            .await
            .unwrap();
        assert_eq!(team.members().len(), 1);
        assert_invariant(&team);
    }

    #[tokio::test]
    async fn team_cannot_be_emptied() {
        let ledger: Arc<dyn Ledger> = Arc::new(MemoryLedger::new());
        let (alice_key, alice) = user(&ledger, "alice").await;

        let mut team = TeamTree::create(
            ledger.clone(),
            "alice/widgets/teams/default",
            Members::from([("alice".to_owned(), alice.did().to_owned())]),
        )
        .await
        .unwrap();

        let err = team
            .remove_members(&alice_key, &["alice".to_owned()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Empty));
    }

    #[tokio::test]
    async fn non_member_cannot_mutate() {
        let ledger: Arc<dyn Ledger> = Arc::new(MemoryLedger::new());
        let (_, alice) = user(&ledger, "alice").await;
        let (mallory_key, mallory) = user(&ledger, "mallory").await;

        let mut team = TeamTree::create(
            ledger.clone(),
            "alice/widgets/teams/default",
            Members::from([("alice".to_owned(), alice.did().to_owned())]),
        )
        .await
        .unwrap();

        let err = team
            .add_members(
                &mallory_key,
                Members::from([("mallory".to_owned(), mallory.did().to_owned())]),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Tree(tree::Error::Ledger(crate::ledger::Error::Unauthorized { .. }))
        ));
    }
}
