//! Protocol capability negotiation.

use std::collections::BTreeSet;

use crate::session::Error;

/// Capabilities this transport can honor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Capability {
    /// `agent`: software identification, value carried but ignored.
    Agent,
    /// `ofs-delta`: offset deltas accepted in packfiles.
    OfsDelta,
    /// `report-status`: per-command push reporting.
    ReportStatus,
    /// `delete-refs`: ref deletion on push.
    DeleteRefs,
}

impl Capability {
    /// The wire token.
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Agent => "agent",
            Capability::OfsDelta => "ofs-delta",
            Capability::ReportStatus => "report-status",
            Capability::DeleteRefs => "delete-refs",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        // a requested capability may carry a value: `agent=git/2.41`
        let name = token.split('=').next().unwrap_or(token);
        match name {
            "agent" => Some(Capability::Agent),
            "ofs-delta" => Some(Capability::OfsDelta),
            "report-status" => Some(Capability::ReportStatus),
            "delete-refs" => Some(Capability::DeleteRefs),
            _ => None,
        }
    }
}

/// The set of capabilities a session supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilitySet {
    caps: BTreeSet<Capability>,
    agent: String,
}

impl CapabilitySet {
    fn new(caps: impl IntoIterator<Item = Capability>) -> Self {
        CapabilitySet {
            caps: caps.into_iter().collect(),
            agent: format!("dgit/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// The set advertised when serving a fetch.
    pub fn for_fetch() -> Self {
        Self::new([Capability::Agent, Capability::OfsDelta])
    }

    /// The set advertised when serving a push.
    pub fn for_push() -> Self {
        Self::new([
            Capability::Agent,
            Capability::OfsDelta,
            Capability::ReportStatus,
            Capability::DeleteRefs,
        ])
    }

    /// Whether `cap` is in the set.
    pub fn supports(&self, cap: Capability) -> bool {
        self.caps.contains(&cap)
    }

    /// Check every requested token against the set.
    ///
    /// Any token naming a capability outside the set fails the whole call.
    pub fn validate(&self, requested: &[String]) -> Result<(), Error> {
        for token in requested {
            match Capability::from_token(token) {
                Some(cap) if self.caps.contains(&cap) => {}
                _ => return Err(Error::UnsupportedCapability(token.clone())),
            }
        }
        Ok(())
    }

    /// The advertisement tokens, `agent` carrying its value.
    pub fn advertise(&self) -> Vec<String> {
        self.caps
            .iter()
            .map(|cap| match cap {
                Capability::Agent => format!("agent={}", self.agent),
                other => other.as_str().to_owned(),
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fetch_set_is_narrower_than_push() {
        let fetch = CapabilitySet::for_fetch();
        let push = CapabilitySet::for_push();
        assert!(!fetch.supports(Capability::ReportStatus));
        assert!(push.supports(Capability::ReportStatus));
        assert!(push.supports(Capability::DeleteRefs));
    }

    #[test]
    fn unknown_tokens_fail_validation() {
        let caps = CapabilitySet::for_push();
        caps.validate(&["agent=git/2.41".into(), "report-status".into()])
            .unwrap();
        let err = caps.validate(&["side-band-64k".into()]).unwrap_err();
        assert!(matches!(err, Error::UnsupportedCapability(token) if token == "side-band-64k"));
    }

    #[test]
    fn advertisement_carries_the_agent_value() {
        let tokens = CapabilitySet::for_fetch().advertise();
        assert!(tokens.iter().any(|t| t.starts_with("agent=dgit/")));
        assert!(tokens.contains(&"ofs-delta".to_owned()));
    }
}
