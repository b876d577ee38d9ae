//! Per-account session state machine.
//!
//! ```text
//! Uninitialized -> Initializing -> WaitingPairing -> Connected
//!                               \-----------------> Connected
//! Connected -> Disconnected (transient close, reconnect scheduled)
//! any       -> LoggedOut    (terminal)
//! ```
//!
//! The machine is pure: it turns transport events into [`Action`]s and
//! leaves every side effect to the session driver.

use bulkwa_common::{SessionRecord, SessionStatus};

use crate::{
    auth::Credentials,
    transport::{DisconnectKind, TransportEvent},
};

/// Side effect requested by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Persist(SessionRecord),
    PersistCredentials(Credentials),
    /// The connection opened; the pairing attempt is over.
    Established,
    /// Reopen the session after the reconnect delay.
    Reconnect(DisconnectKind),
    /// Tear the session down for good.
    Terminate,
}

/// Observable state of one session, broadcast to waiters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub pairing_code: Option<String>,
    pub identity: Option<String>,
    pub display_name: Option<String>,
}

impl SessionSnapshot {
    pub fn is_connected(&self) -> bool {
        self.status == SessionStatus::Connected
    }
}

#[derive(Debug, Clone)]
pub struct SessionMachine {
    account_id: String,
    status: SessionStatus,
    pairing_code: Option<String>,
    identity: Option<String>,
    display_name: Option<String>,
}

impl SessionMachine {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            status: SessionStatus::Uninitialized,
            pairing_code: None,
            identity: None,
            display_name: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Start a (re)connection attempt.
    pub fn begin(&mut self) -> SessionRecord {
        self.status = SessionStatus::Initializing;
        self.pairing_code = None;
        self.identity = None;
        self.display_name = None;
        self.record()
    }

    pub fn handle(&mut self, event: TransportEvent) -> Vec<Action> {
        if self.status == SessionStatus::LoggedOut {
            return Vec::new();
        }
        match event {
            TransportEvent::PairingCode(code) => {
                self.status = SessionStatus::WaitingPairing;
                self.pairing_code = Some(code);
                self.identity = None;
                vec![Action::Persist(self.record())]
            },
            TransportEvent::Open {
                identity,
                display_name,
            } => {
                self.status = SessionStatus::Connected;
                self.pairing_code = None;
                self.identity = Some(identity);
                self.display_name = display_name;
                vec![Action::Persist(self.record()), Action::Established]
            },
            TransportEvent::Close(reason) => {
                self.pairing_code = None;
                self.identity = None;
                self.display_name = None;
                match reason.kind() {
                    DisconnectKind::LoggedOut => {
                        self.status = SessionStatus::LoggedOut;
                        vec![Action::Persist(self.record()), Action::Terminate]
                    },
                    kind => {
                        self.status = SessionStatus::Disconnected;
                        vec![Action::Persist(self.record()), Action::Reconnect(kind)]
                    },
                }
            },
            TransportEvent::CredentialsUpdated(delta) => {
                vec![Action::PersistCredentials(delta)]
            },
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status,
            pairing_code: self.pairing_code.clone(),
            identity: self.identity.clone(),
            display_name: self.display_name.clone(),
        }
    }

    pub fn record(&self) -> SessionRecord {
        let id = self.account_id.as_str();
        match self.status {
            SessionStatus::Uninitialized => SessionRecord::uninitialized(id),
            SessionStatus::Initializing => SessionRecord::initializing(id),
            SessionStatus::WaitingPairing => {
                SessionRecord::waiting_pairing(id, self.pairing_code.clone().unwrap_or_default())
            },
            SessionStatus::Connected => {
                SessionRecord::connected(id, self.identity.clone().unwrap_or_default())
            },
            SessionStatus::Disconnected => SessionRecord::disconnected(id),
            SessionStatus::LoggedOut => SessionRecord::logged_out(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use {super::*, crate::transport::CloseReason};

    fn statuses(actions: &[Action]) -> Vec<SessionStatus> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Persist(r) => Some(r.status()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn pairing_then_open() {
        let mut m = SessionMachine::new("acct");
        assert_eq!(m.begin().status(), SessionStatus::Initializing);

        let actions = m.handle(TransportEvent::PairingCode("2@qr".into()));
        assert_eq!(statuses(&actions), vec![SessionStatus::WaitingPairing]);
        assert_eq!(m.snapshot().pairing_code.as_deref(), Some("2@qr"));

        let actions = m.handle(TransportEvent::Open {
            identity: "15551234567".into(),
            display_name: Some("Shop".into()),
        });
        assert_eq!(statuses(&actions), vec![SessionStatus::Connected]);
        assert!(actions.contains(&Action::Established));
        let snap = m.snapshot();
        assert!(snap.pairing_code.is_none());
        assert_eq!(snap.identity.as_deref(), Some("15551234567"));
    }

    #[test]
    fn logout_is_terminal() {
        let mut m = SessionMachine::new("acct");
        m.begin();
        let actions = m.handle(TransportEvent::Close(CloseReason::logged_out()));
        assert_eq!(statuses(&actions), vec![SessionStatus::LoggedOut]);
        assert_eq!(actions.last(), Some(&Action::Terminate));

        assert!(m.handle(TransportEvent::PairingCode("x".into())).is_empty());
        assert_eq!(m.status(), SessionStatus::LoggedOut);
    }

    #[test]
    fn other_closes_reconnect() {
        let mut m = SessionMachine::new("acct");
        m.begin();
        m.handle(TransportEvent::Open {
            identity: "1555".into(),
            display_name: None,
        });

        let actions = m.handle(TransportEvent::Close(CloseReason::new(Some(405), "bad version")));
        assert_eq!(statuses(&actions), vec![SessionStatus::Disconnected]);
        assert_eq!(
            actions.last(),
            Some(&Action::Reconnect(DisconnectKind::VersionMismatch))
        );

        m.begin();
        let actions = m.handle(TransportEvent::Close(CloseReason::transient("reset")));
        assert_eq!(
            actions.last(),
            Some(&Action::Reconnect(DisconnectKind::Transient))
        );
    }

    #[test]
    fn credentials_only_persist() {
        let mut m = SessionMachine::new("acct");
        m.begin();
        let actions = m.handle(TransportEvent::CredentialsUpdated(Credentials::new()));
        assert_eq!(actions, vec![Action::PersistCredentials(Credentials::new())]);
        assert_eq!(m.status(), SessionStatus::Initializing);
    }
}
