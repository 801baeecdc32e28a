//! Explicit secure-upgrade commands.
//!
//! With explicit TLS the connection starts in plaintext and the client asks
//! the server to switch, e.g. FTP's `AUTH TLS`. The command is pluggable so
//! other protocols (or tests) can supply their own exchange.

use ftplink_core::{ConnectError, ConnectResult, Exchange, Stage, TransportHandle};
use std::time::Duration;

/// Server answer to an upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// The next bytes on the connection are the TLS handshake.
    Accepted,
    /// The server refused; carries its reply when one was read.
    Declined(Option<String>),
}

/// Asks the server to start TLS on an established plaintext connection.
pub trait SecureUpgrade: Send {
    /// Every read and write must finish within `timeout`.
    fn negotiate(
        &mut self,
        handle: &mut TransportHandle,
        timeout: Duration,
    ) -> ConnectResult<UpgradeOutcome>;
}

impl<F> SecureUpgrade for F
where
    F: FnMut(&mut TransportHandle, Duration) -> ConnectResult<UpgradeOutcome> + Send,
{
    fn negotiate(
        &mut self,
        handle: &mut TransportHandle,
        timeout: Duration,
    ) -> ConnectResult<UpgradeOutcome> {
        self(handle, timeout)
    }
}

/// FTP `AUTH TLS` (RFC 4217). Reads the server greeting first unless it
/// was already consumed, then expects `234`.
#[derive(Debug, Clone, Copy)]
pub struct AuthTlsCommand {
    read_greeting: bool,
}

impl Default for AuthTlsCommand {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthTlsCommand {
    pub fn new() -> Self {
        Self {
            read_greeting: true,
        }
    }

    /// For connections whose greeting the caller has already read.
    pub fn after_greeting() -> Self {
        Self {
            read_greeting: false,
        }
    }
}

impl SecureUpgrade for AuthTlsCommand {
    fn negotiate(
        &mut self,
        handle: &mut TransportHandle,
        timeout: Duration,
    ) -> ConnectResult<UpgradeOutcome> {
        // A USER@host proxy login already swallowed the greeting.
        let must_read = self.read_greeting && handle.proxy_banner().is_none();
        let mut greeting = None;
        let reply = {
            let mut x = Exchange::new(&mut *handle, Stage::UpgradeCommand, timeout);
            if must_read {
                let g = x.read_reply("server greeting")?;
                if g.code != 220 {
                    return Err(ConnectError::proxy_connect(format!(
                        "server refused the connection: {} {}",
                        g.code,
                        g.text()
                    )));
                }
                greeting = Some(g.text());
            }
            x.send(b"AUTH TLS\r\n", "AUTH TLS")?;
            x.read_reply("AUTH TLS reply")?
        };
        if greeting.is_some() {
            handle.set_greeting(greeting);
        }

        if reply.code == 234 {
            Ok(UpgradeOutcome::Accepted)
        } else {
            Ok(UpgradeOutcome::Declined(Some(format!(
                "{} {}",
                reply.code,
                reply.text()
            ))))
        }
    }
}
