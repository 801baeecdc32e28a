//! `USER user@host` FTP proxies.
//!
//! The proxy speaks FTP itself and forwards to whichever host the client
//! names in its login. There is no tunnel-setup protocol: if the proxy has
//! its own credentials the client logs in to the proxy first, then the
//! target username is rewritten to `user@host` for the application
//! protocol's login.

use super::chain::Traversal;
use ftplink_core::{
    ConnectError, ConnectResult, Credentials, Exchange, ProxyDescriptor, ProxyState, Reply, Stage,
    Target, DETAIL_CONNECTION,
};
use std::net::TcpStream;

/// Dialogue used to log in to the proxy itself.
pub trait ProxyLogin: Send + Sync {
    /// Read the proxy's greeting.
    fn read_greeting(&self, channel: &mut Exchange<'_, TcpStream>) -> ConnectResult<Reply>;

    /// Authenticate with the proxy's own credentials.
    fn authenticate(
        &self,
        channel: &mut Exchange<'_, TcpStream>,
        credentials: &Credentials,
    ) -> ConnectResult<()>;
}

/// Plain `USER`/`PASS` login.
#[derive(Debug, Default, Clone, Copy)]
pub struct FtpProxyLogin;

impl ProxyLogin for FtpProxyLogin {
    fn read_greeting(&self, channel: &mut Exchange<'_, TcpStream>) -> ConnectResult<Reply> {
        let reply = channel.read_reply("proxy greeting")?;
        if reply.code != 220 {
            return Err(ConnectError::proxy_connect(format!(
                "FTP proxy greeted with {} {}",
                reply.code,
                reply.text()
            )));
        }
        Ok(reply)
    }

    fn authenticate(
        &self,
        channel: &mut Exchange<'_, TcpStream>,
        credentials: &Credentials,
    ) -> ConnectResult<()> {
        channel.send(
            format!("USER {}\r\n", credentials.username).as_bytes(),
            "proxy USER",
        )?;
        let mut reply = channel.read_reply("proxy USER reply")?;
        if reply.is_positive_intermediate() {
            channel.send(
                format!("PASS {}\r\n", credentials.password).as_bytes(),
                "proxy PASS",
            )?;
            reply = channel.read_reply("proxy PASS reply")?;
        }
        if reply.is_positive_completion() {
            Ok(())
        } else {
            Err(ConnectError::proxy_auth(format!(
                "FTP proxy rejected login: {} {}",
                reply.code,
                reply.text()
            )))
        }
    }
}

/// Result of a `USER@host` hop.
#[derive(Debug, Clone)]
pub(crate) struct LoginOutcome {
    pub credentials: Option<Credentials>,
    pub banner: Option<String>,
}

pub(crate) fn negotiate(
    t: &mut Traversal<'_>,
    stream: &mut TcpStream,
    proxy: &ProxyDescriptor,
    target: &Target,
    login: &dyn ProxyLogin,
) -> ConnectResult<LoginOutcome> {
    t.enter(ProxyState::ProxyHandshaking);
    let mut banner = None;

    if let Some(proxy_creds) = &proxy.credentials {
        let greeting = login.read_greeting(&mut t.exchange(stream, Stage::ProxyHandshake))?;
        banner = Some(greeting.text());

        t.enter(ProxyState::ProxyAuthenticating);
        login.authenticate(&mut t.exchange(stream, Stage::ProxyAuthentication), proxy_creds)?;
        t.diag()
            .verbose(DETAIL_CONNECTION, "Authenticated with FTP proxy");
    }

    let credentials = target
        .credentials
        .as_ref()
        .map(|c| rewrite_target_username(c, &target.host));
    if let Some(c) = &credentials {
        t.diag().verbose(
            DETAIL_CONNECTION,
            format!(
                "Target login rewritten to {}",
                mask_user(&c.username, t.diag().logs_hosts())
            ),
        );
    }
    Ok(LoginOutcome { credentials, banner })
}

/// `user` → `user@host`. The target port never becomes part of the
/// login name.
///
/// Idempotent: a username that already carries the suffix is returned
/// unchanged.
pub fn rewrite_target_username(credentials: &Credentials, host: &str) -> Credentials {
    let suffix = format!("@{}", host);
    let mut out = credentials.clone();
    if !out.username.ends_with(&suffix) {
        out.username.push_str(&suffix);
    }
    out
}

fn mask_user(username: &str, log_host: bool) -> String {
    match (log_host, username.rsplit_once('@')) {
        (false, Some((user, _))) => format!("{}@***", user),
        _ => username.to_string(),
    }
}
